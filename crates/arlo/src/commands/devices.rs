//! Device command handlers.

use std::sync::Arc;

use tabled::Tabled;

use arlo_core::{Device, DeviceType, Engine};

use crate::cli::{DeviceKind, DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Hub")]
    parent: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Privacy")]
    privacy: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Stream")]
    stream: String,
}

fn row(d: &Arc<Device>, color: bool) -> DeviceRow {
    let mode = match (d.armed, d.active_mode.as_deref()) {
        (Some(armed), Some(mode)) => output::state_cell(&format!("{} ({mode})", armed_label(armed)), armed, color),
        (Some(armed), None) => output::state_cell(armed_label(armed), armed, color),
        (None, _) => String::new(),
    };
    DeviceRow {
        id: d.id.to_string(),
        name: d.display_name().to_owned(),
        kind: d.device_type.to_string(),
        parent: d.parent_id.as_ref().map(ToString::to_string).unwrap_or_default(),
        battery: d.battery_level().map(|b| format!("{b}%")).unwrap_or_default(),
        privacy: d
            .privacy_active()
            .map(|on| output::state_cell(if on { "on" } else { "off" }, on, color))
            .unwrap_or_default(),
        mode,
        stream: if d.stream_active {
            output::state_cell("live", true, color)
        } else {
            String::new()
        },
    }
}

fn armed_label(armed: bool) -> &'static str {
    if armed { "armed" } else { "disarmed" }
}

fn detail(d: &Arc<Device>) -> String {
    let mut lines = vec![
        format!("ID:       {}", d.id),
        format!("Name:     {}", d.display_name()),
        format!("Type:     {}", d.device_type),
        format!("Model:    {}", d.model_id.as_deref().unwrap_or("-")),
        format!(
            "Hub:      {}",
            d.parent_id.as_ref().map_or_else(|| "-".into(), ToString::to_string)
        ),
        format!("Subscribed: {}", d.is_subscribed),
    ];
    if let Some(level) = d.battery_level() {
        lines.push(format!("Battery:  {level}%"));
    }
    if let Some(privacy) = d.privacy_active() {
        lines.push(format!("Privacy:  {privacy}"));
    }
    if let Some(siren) = d.siren_state() {
        lines.push(format!("Siren:    {siren}"));
    }
    if let Some(armed) = d.armed {
        lines.push(format!("Mode:     {} {}", armed_label(armed), d.active_mode.as_deref().unwrap_or("")));
    }
    if let Some(ref url) = d.media.last_image {
        lines.push(format!("Image:    {url}"));
    }
    if !d.properties.is_empty() {
        lines.push("Properties:".into());
        let mut keys: Vec<_> = d.properties.keys().collect();
        keys.sort();
        for key in keys {
            lines.push(format!("  {key}: {}", d.properties[key]));
        }
    }
    lines.join("\n")
}

impl From<DeviceKind> for DeviceType {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Hub => Self::Hub,
            DeviceKind::Camera => Self::Camera,
            DeviceKind::CameraQ => Self::CameraQ,
            DeviceKind::CameraQs => Self::CameraQS,
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(engine: &Engine, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    super::connect(engine, global).await?;
    let color = output::should_color(&global.color);

    match args.command {
        DevicesCommand::List { kind } => {
            let snap = engine.devices_snapshot();
            let devices: Vec<Arc<Device>> = match kind {
                Some(kind) => {
                    let wanted = DeviceType::from(kind);
                    snap.iter().filter(|d| d.device_type == wanted).cloned().collect()
                }
                None => snap.iter().cloned().collect(),
            };
            let out = output::render_list(&global.output, &devices, |d| row(d, color), |d| d.id.to_string());
            output::print_output(&out, global.quiet);
            Ok(())
        }
        DevicesCommand::Get { id } => {
            let device = engine.registry().get(&id).ok_or_else(|| CliError::NotFound {
                resource_type: "device".into(),
                identifier: id.clone(),
                list_command: "devices list".into(),
            })?;
            let out = output::render_single(&global.output, &device, detail, |d| d.id.to_string());
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
