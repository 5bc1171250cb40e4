mod cli;
mod commands;
mod config;
mod error;
mod mailbox;
mod output;
mod prompt;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use arlo_core::{Engine, EngineDeps, OneTimeCodeSource};

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::mailbox::ImapCodeSource;
use crate::prompt::PromptCodeSource;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need an account session
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "arlo", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let engine_config = config::build_engine_config(&cli.global)?;
            let code_source: Arc<dyn OneTimeCodeSource> = if config::reads_mailbox(&engine_config) {
                Arc::new(ImapCodeSource)
            } else {
                Arc::new(PromptCodeSource)
            };
            let engine = Engine::with_deps(
                engine_config,
                EngineDeps {
                    code_source: Some(code_source),
                    ..EngineDeps::default()
                },
            )?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &engine, &cli.global).await;
            engine.shutdown().await;
            result
        }
    }
}
