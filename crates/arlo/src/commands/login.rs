//! Login handler: verifies credentials and discovery end to end.

use chrono::{DateTime, Utc};
use serde::Serialize;

use arlo_core::Engine;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct LoginSummary {
    user_id: String,
    serial_number: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
    hub: Option<String>,
    devices: usize,
}

fn detail(s: &LoginSummary) -> String {
    [
        format!("User:     {}", s.user_id),
        format!("Serial:   {}", s.serial_number.as_deref().unwrap_or("-")),
        format!(
            "Expires:  {}",
            s.token_expiry
                .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        ),
        format!("Hub:      {}", s.hub.as_deref().unwrap_or("-")),
        format!("Devices:  {}", s.devices),
    ]
    .join("\n")
}

pub async fn handle(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = super::connect(engine, global).await?;
    let session = engine.session().session().ok_or(CliError::AuthFailed {
        reason: "session ended during discovery".into(),
    })?;

    let summary = LoginSummary {
        user_id: session.identity.user_id,
        serial_number: session.identity.serial_number,
        token_expiry: session.token_expiry,
        hub: engine.registry().hub().map(|hub| hub.display_name().to_owned()),
        devices,
    };
    let out = output::render_single(&global.output, &summary, detail, |s| s.user_id.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}
