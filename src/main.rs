mod cli;
mod server;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use ratewatch::TransferError;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::server::{run_monitor, run_sink};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Run(run)) => run_monitor(run),
        Some(Commands::Sink(sink)) => run_sink(sink),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: transport failure, 3: sink unreachable, 4: bind failure, 1: other
    for cause in err.chain() {
        if let Some(te) = cause.downcast_ref::<TransferError>() {
            return match te {
                TransferError::Transport { .. } => 2,
                TransferError::SinkUnreachable { .. } => 3,
                _ => 1,
            };
        }
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            return match ioe.kind() {
                AddrInUse | AddrNotAvailable | PermissionDenied => 4,
                _ => 1,
            };
        }
    }
    1
}
