// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Diagnostic command-line options of the runtime host.
//!
//! They are recognized only as the sole argument after the program name and
//! never change any persistent state.

use std::io::{self, Write};

use crate::flags::FlagStore;
use crate::safemode::SafemodeTrigger;

pub const VERSION_FLAG: &str = "--hookstrap-version";
pub const TEST_SAFEMODE_FLAG: &str = "--hookstrap-test-safemode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsOutcome {
    /// A diagnostic ran; the host should exit
    Handled,
    Continue,
}

pub fn handle_options<S: AsRef<str>>(
    argv: &[S],
    safemode: &dyn SafemodeTrigger,
    flags: &FlagStore,
    out: &mut dyn Write,
) -> io::Result<OptionsOutcome> {
    let [_, option] = argv else {
        return Ok(OptionsOutcome::Continue);
    };

    match option.as_ref() {
        VERSION_FLAG => {
            writeln!(out, "hookstrap version {}", env!("CARGO_PKG_VERSION"))?;
        }
        TEST_SAFEMODE_FLAG => {
            writeln!(out, "Testing safemode trigger")?;
            if safemode.detect(flags.should_skip_safemode_delay()) {
                writeln!(out, "Safemode triggered")?;
            } else {
                writeln!(out, "Safemode not triggered")?;
            }
        }
        _ => return Ok(OptionsOutcome::Continue),
    }
    out.flush()?;
    Ok(OptionsOutcome::Handled)
}
