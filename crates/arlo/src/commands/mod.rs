//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod config_cmd;
pub mod control;
pub mod devices;
pub mod local;
pub mod login;
pub mod util;
pub mod watch;

use std::time::Duration;

use arlo_core::Engine;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Dispatch an engine-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Login => login::handle(engine, global).await,
        Command::Devices(args) => devices::handle(engine, args, global).await,
        Command::Watch(args) => watch::handle(engine, args, global).await,
        Command::Arm(args) => control::mode(engine, args, true, global).await,
        Command::Disarm(args) => control::mode(engine, args, false, global).await,
        Command::Privacy(args) => control::privacy(engine, args, global).await,
        Command::Siren(args) => control::siren(engine, args, global).await,
        Command::Stream(args) => control::stream(engine, args, global).await,
        Command::Snapshot(args) => control::snapshot(engine, args, global).await,
        Command::Local(args) => local::handle(engine, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}

/// Log in and wait until the hub and its devices are known.
pub async fn connect(engine: &Engine, global: &GlobalOpts) -> Result<usize, CliError> {
    engine.login().await?;
    let spinner = output::spinner(global, "Discovering devices…");
    let result = engine.wait_until_ready(Duration::from_secs(global.wait)).await;
    spinner.finish_and_clear();
    let count = result?;
    tracing::debug!(count, "devices discovered");
    Ok(count)
}
