// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client of the membrane service.
//!
//! Under an enforcing policy the hook module cannot open framework files
//! itself, so its file-access callbacks are answered by the membrane, a
//! privileged service started for [`ServiceTier::Membrane`]. Every request
//! uses its own connection to the service socket. Frames are a
//! little-endian `u32` length followed by the payload.
//!
//! Request payload: one opcode byte, then for `access` the mode as `i32`,
//! then the raw path bytes. Response payload: an `i32` errno (`0` on
//! success) followed, on success, by the stat record (`u64` size, `u32`
//! mode, `i64` mtime) or the file content.
//!
//! [`ServiceTier::Membrane`]: crate::services::ServiceTier::Membrane

use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::AccessFlags;
use tracing::debug;

use crate::file_access::{FileAccess, FileStat};

pub const OP_ACCESS: u8 = 1;
pub const OP_STAT: u8 = 2;
pub const OP_READ: u8 = 3;

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const STAT_RECORD_LEN: usize = 8 + 4 + 8;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`FileAccess`] answered by the membrane service.
#[derive(Debug, Clone)]
pub struct MembraneFileAccess {
    socket: PathBuf,
    timeout: Duration,
}

impl MembraneFileAccess {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn call(&self, op: u8, mode: Option<i32>, path: &Path) -> io::Result<Vec<u8>> {
        let path = path.as_os_str().as_bytes();
        if path.contains(&0) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let mut request = Vec::with_capacity(1 + 4 + path.len());
        request.push(op);
        if let Some(mode) = mode {
            request.extend_from_slice(&mode.to_le_bytes());
        }
        request.extend_from_slice(path);

        let mut stream = UnixStream::connect(&self.socket).inspect_err(|e| {
            debug!(socket = %self.socket.display(), error = %e, "Membrane not reachable")
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        write_frame(&mut stream, &request)?;
        let response = read_frame(&mut stream)?;
        split_status(response)
    }
}

impl FileAccess for MembraneFileAccess {
    fn access(&self, path: &Path, mode: AccessFlags) -> io::Result<()> {
        self.call(OP_ACCESS, Some(mode.bits()), path).map(|_| ())
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let body = self.call(OP_STAT, None, path)?;
        decode_stat(&body)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.call(OP_READ, None, path)
    }
}

pub fn write_frame(stream: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

pub fn read_frame(stream: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

fn split_status(mut response: Vec<u8>) -> io::Result<Vec<u8>> {
    let Some(status) = response.get(..4) else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short response"));
    };
    let errno = i32::from_le_bytes([status[0], status[1], status[2], status[3]]);
    if errno != 0 {
        return Err(io::Error::from_raw_os_error(errno));
    }
    response.drain(..4);
    Ok(response)
}

fn decode_stat(body: &[u8]) -> io::Result<FileStat> {
    if body.len() != STAT_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad stat record"));
    }
    let mut size = [0u8; 8];
    let mut mode = [0u8; 4];
    let mut mtime = [0u8; 8];
    size.copy_from_slice(&body[..8]);
    mode.copy_from_slice(&body[8..12]);
    mtime.copy_from_slice(&body[12..]);
    Ok(FileStat {
        size: u64::from_le_bytes(size),
        mode: u32::from_le_bytes(mode),
        mtime: i64::from_le_bytes(mtime),
    })
}
