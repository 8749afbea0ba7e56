// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::ffi::OsString;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use hs_bootstrap::classpath::CLASSPATH_VAR;
use hs_bootstrap::options::{TEST_SAFEMODE_FLAG, VERSION_FLAG};
use hs_bootstrap::{
    drop_capabilities, AbortReason, Bootstrap, BootstrapConfig, Decision, Environment,
    ProcessEnvironment, ProcessRole,
};
use hs_logging::CliLoggingArgs;
use tracing::{error, info, warn};

mod argv;

const COMPONENT: &str = "hs-launcher";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Start as the launcher (zygote) host
    #[arg(long)]
    zygote: bool,

    /// The launcher also starts the system server
    #[arg(long, requires = "zygote")]
    start_system_server: bool,

    /// Rewrite the visible process name
    #[arg(long)]
    nice_name: Option<String>,

    /// Bootstrap configuration file
    #[arg(long, env = "HOOKSTRAP_CONFIG")]
    config: Option<PathBuf>,

    /// Capabilities to retain once the activation decision is taken,
    /// comma separated; a negative id ends the list
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    keep_caps: Option<Vec<i8>>,

    /// Runtime host to exec after the bootstrap
    #[arg(long)]
    exec: Option<PathBuf>,

    #[command(flatten)]
    logging: CliLoggingArgs,

    /// Class started by a standalone tool
    class_name: Option<String>,

    /// Arguments for the started class
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Launcher failed");
            eprintln!("hs-launcher: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let raw: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    // Diagnostics bypass argument parsing and logging setup entirely.
    if let [_, option] = raw.as_slice() {
        if option == VERSION_FLAG || option == TEST_SAFEMODE_FLAG {
            let config = BootstrapConfig::load(None)?;
            let bootstrap = Bootstrap::builder(config, ProcessRole::LauncherHost).build();
            let mut out = std::io::stdout().lock();
            bootstrap.handle_options(raw.as_slice(), &mut out)?;
            out.flush()?;
            return Ok(ExitCode::SUCCESS);
        }
    }

    let mut args = Args::parse();
    let config = BootstrapConfig::load(args.config.as_deref())?;
    config.logging.apply_defaults(&mut args.logging);
    args.logging.clone().init(COMPONENT)?;

    let role = ProcessRole::from_flags(args.zygote, args.start_system_server);
    let mut builder = Bootstrap::builder(config, role);
    if let Some(name) = &args.class_name {
        builder = builder.class_name(name.as_str());
    }
    let mut bootstrap = builder.build();

    // The heuristic sees the tool's command slot first.
    let mut tool_argv: Vec<&str> = Vec::with_capacity(args.args.len() + 1);
    tool_argv.push(command_name(args.class_name.as_deref()));
    tool_argv.extend(args.args.iter().map(String::as_str));

    let mut env = ProcessEnvironment;
    let prior_classpath = env.var(CLASSPATH_VAR);
    let mut decision = bootstrap.initialize(tool_argv.as_slice(), &mut env);

    if let Some(keep) = &args.keep_caps {
        if let Err(e) = drop_capabilities(keep) {
            error!(error = %e, "Capabilities not dropped, hooking disabled for this run");
            if decision.is_proceed() {
                restore_classpath(&mut env, prior_classpath);
                decision = Decision::Abort(AbortReason::Capabilities);
            }
        }
    }

    match decision {
        Decision::Proceed => info!(%role, "Hooking active"),
        Decision::Abort(AbortReason::NotLauncher) => {}
        Decision::Abort(reason) => info!(%role, %reason, "Hooking inactive"),
    }

    if let Some(name) = &args.nice_name {
        rename(name);
    }

    let Some(program) = args.exec else {
        println!("{}", describe(decision));
        return Ok(ExitCode::SUCCESS);
    };

    let mut command = Command::new(&program);
    if let Some(class_name) = &args.class_name {
        command.arg(class_name);
    }
    command.args(&args.args);
    let err = command.exec();
    Err(err).with_context(|| format!("exec {}", program.display()))
}

fn command_name(class_name: Option<&str>) -> &str {
    match class_name.and_then(|name| name.rsplit('.').next()) {
        Some(short) => short,
        None => "",
    }
}

fn restore_classpath(env: &mut ProcessEnvironment, prior: Option<OsString>) {
    match prior {
        Some(value) => env.set_var(CLASSPATH_VAR, &value),
        None => std::env::remove_var(CLASSPATH_VAR),
    }
}

fn rename(name: &str) {
    let Some(mut span) = argv::take_argument_span() else {
        warn!("Original arguments not available, process keeps its name");
        return;
    };
    match span.rename(name) {
        Ok(outcome) if outcome.truncated => {
            warn!(name, written = outcome.written, "Process name truncated")
        }
        Ok(_) => info!(name, "Process renamed"),
        Err(e) => warn!(error = %e, "Could not rename process"),
    }
}

fn describe(decision: Decision) -> String {
    match decision {
        Decision::Proceed => "hooking: active".to_string(),
        Decision::Abort(reason) => format!("hooking: inactive ({reason})"),
    }
}
