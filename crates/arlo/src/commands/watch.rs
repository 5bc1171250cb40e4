//! Live event output.

use std::time::Duration;

use chrono::Local;
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use arlo_core::{DomainEvent, Engine};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// One human-readable line per event.
fn line(event: &DomainEvent, color: bool) -> String {
    let time = Local::now().format("%H:%M:%S");
    let name = if color {
        event.name().cyan().to_string()
    } else {
        event.name().to_owned()
    };
    let device = event.device_id().map(ToString::to_string).unwrap_or_default();
    let summary = match event {
        DomainEvent::Mode { mode, armed, .. } => format!("{mode} armed={armed}"),
        DomainEvent::Battery { battery_level, .. } => {
            battery_level.map(|b| format!("{b}%")).unwrap_or_default()
        }
        DomainEvent::DeviceUpdated { properties, .. } => {
            properties.keys().cloned().collect::<Vec<_>>().join(",")
        }
        DomainEvent::StreamStateChanged { active, .. } => format!("active={active}"),
        DomainEvent::FullFrameSnapshot { url, .. } => url.clone(),
        DomainEvent::GotAllDevices { count } => format!("{count} devices"),
        DomainEvent::LocalStorageOpened { ip, port } => format!("{ip}:{port}"),
        DomainEvent::ConnectionLost { reason } | DomainEvent::DiscoveryFailed { reason } => reason.clone(),
        _ => String::new(),
    };
    format!("{time}  {name:<28} {device:<16} {summary}").trim_end().to_owned()
}

fn render(event: &DomainEvent, global: &GlobalOpts, color: bool) -> String {
    match global.output {
        OutputFormat::Table => line(event, color),
        // One document per event so the stream stays line-oriented.
        OutputFormat::Json | OutputFormat::JsonCompact => {
            output::render_single(&OutputFormat::JsonCompact, event, |_| String::new(), |_| String::new())
        }
        OutputFormat::Yaml => format!(
            "---\n{}",
            output::render_single(&OutputFormat::Yaml, event, |_| String::new(), |_| String::new())
        ),
        OutputFormat::Plain => event.name().to_owned(),
    }
}

pub async fn handle(engine: &Engine, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    // Subscribe before login so discovery events are shown too.
    let mut events = engine.events();
    super::connect(engine, global).await?;

    let color = output::should_color(&global.color);
    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut seen = 0_usize;

    loop {
        let until_deadline = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = until_deadline => break,
            received = events.recv() => match received {
                Ok(event) => {
                    output::print_output(&render(&event, global, color), global.quiet);
                    seen += 1;
                    if args.count.is_some_and(|n| seen >= n) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::debug!(seen, "watch finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arlo_core::DeviceId;

    #[test]
    fn mode_line_names_hub_and_mode() {
        let event = DomainEvent::Mode {
            hub_id: DeviceId::new("HUB1"),
            mode: "mode1".into(),
            armed: true,
        };
        let text = line(&event, false);
        assert!(text.contains("mode"));
        assert!(text.contains("HUB1"));
        assert!(text.ends_with("mode1 armed=true"));
    }
}
