//! Handlers that send one command and report its outcome.

use arlo_core::Engine;

use crate::cli::{CameraArgs, GlobalOpts, HubArgs, StreamArgs, StreamCommand, ToggleArgs};
use crate::error::CliError;

use super::util;

pub async fn mode(engine: &Engine, args: HubArgs, arm: bool, global: &GlobalOpts) -> Result<(), CliError> {
    super::connect(engine, global).await?;
    let commands = engine.commands();
    let target = args.device.as_deref();
    let (result, action) = if arm {
        (commands.arm(target).await?, "armed")
    } else {
        (commands.disarm(target).await?, "disarmed")
    };
    util::print_result(&result, action, global);
    Ok(())
}

pub async fn privacy(engine: &Engine, args: ToggleArgs, global: &GlobalOpts) -> Result<(), CliError> {
    super::connect(engine, global).await?;
    let on = args.state.is_on();
    let result = engine.commands().set_privacy(&args.camera, on).await?;
    let action = format!("privacy {} on {}", if on { "enabled" } else { "disabled" }, args.camera);
    util::print_result(&result, &action, global);
    Ok(())
}

pub async fn siren(engine: &Engine, args: ToggleArgs, global: &GlobalOpts) -> Result<(), CliError> {
    super::connect(engine, global).await?;
    let commands = engine.commands();
    let result = if args.state.is_on() {
        commands.siren_on(&args.camera).await?
    } else {
        commands.siren_off(&args.camera).await?
    };
    let action = format!("siren {} on {}", if args.state.is_on() { "on" } else { "off" }, args.camera);
    util::print_result(&result, &action, global);
    Ok(())
}

pub async fn stream(engine: &Engine, args: StreamArgs, global: &GlobalOpts) -> Result<(), CliError> {
    super::connect(engine, global).await?;
    let commands = engine.commands();
    match args.command {
        StreamCommand::Start(CameraArgs { camera }) => {
            let result = commands.start_stream(&camera).await?;
            util::print_result(&result, &format!("stream started on {camera}"), global);
        }
        StreamCommand::Stop(CameraArgs { camera }) => {
            let result = commands.stop_stream(&camera).await?;
            util::print_result(&result, &format!("stream stopped on {camera}"), global);
        }
    }
    Ok(())
}

pub async fn snapshot(engine: &Engine, args: CameraArgs, global: &GlobalOpts) -> Result<(), CliError> {
    super::connect(engine, global).await?;
    let result = engine.commands().take_snapshot(&args.camera).await?;
    util::print_result(&result, &format!("snapshot requested from {}", args.camera), global);
    Ok(())
}
