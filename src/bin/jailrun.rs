//! jailrun - run an executable inside a registry image
//!
//! ## Usage
//!
//! ```sh
//! jailrun run <image[:tag]> <absolute-executable-path> [arg ...]
//! ```
//!
//! Exits with the executable's exit code; 1 if it was killed by a signal or
//! if anything before it failed. Logs go to stderr, filtered by
//! `JAILRUN_LOG` (default `warn`).

use jailrun::{Command, EXIT_FAILURE, Error, RunConfig, invocation::USAGE, pipeline};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "JAILRUN_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: failed to set tracing subscriber");
    }
}

fn cmd_run(invocation: jailrun::Invocation) -> Result<i32, Error> {
    let config = RunConfig::from_env()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let prepared = runtime.block_on(pipeline::prepare(&config, &invocation))?;
    // No threads may be left when the launcher unshares the PID namespace
    drop(runtime);

    pipeline::launch_prepared(prepared, &config)
}

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}", e);
            if matches!(e, Error::Usage(_)) {
                eprint!("{}", USAGE);
            }
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match command {
        Command::Help => {
            print!("{}", USAGE);
            ExitCode::SUCCESS
        }
        Command::Version => {
            println!("jailrun {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::Run(invocation) => match cmd_run(invocation) {
            // Exit statuses are 8 bits wide
            Ok(code) => ExitCode::from((code & 0xff) as u8),
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::from(e.exit_code())
            }
        },
    }
}
