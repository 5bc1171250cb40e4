//! Hub-local recording handlers.

use chrono::Local;
use tabled::Tabled;

use arlo_core::{Engine, Recording};

use crate::cli::{GlobalOpts, LocalArgs, LocalCommand};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct RecordingRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Camera")]
    camera: String,
    #[tabled(rename = "Created (UTC)")]
    created: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

impl From<&Recording> for RecordingRow {
    fn from(r: &Recording) -> Self {
        Self {
            name: r.name.clone().unwrap_or_default(),
            camera: r.device_id.clone().unwrap_or_default(),
            created: util::format_millis(r.utc_create_date),
            duration: r.duration.map(|d| format!("{d:.0}s")).unwrap_or_default(),
        }
    }
}

pub async fn handle(engine: &Engine, args: LocalArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        LocalCommand::List { from, to } => {
            let from = match from {
                Some(ref value) => util::parse_date("from", value)?,
                None => Local::now().date_naive(),
            };
            let to = match to {
                Some(ref value) => util::parse_date("to", value)?,
                None => from,
            };
            if to < from {
                return Err(CliError::Validation {
                    field: "to".into(),
                    reason: "must not be before --from".into(),
                });
            }

            super::connect(engine, global).await?;
            let recordings = engine.local_media().list_recordings(from, to).await?;
            let out = output::render_list(
                &global.output,
                &recordings,
                |r| RecordingRow::from(r),
                |r| r.name.clone().unwrap_or_default(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        LocalCommand::Download { path, dest } => {
            super::connect(engine, global).await?;
            let spinner = output::spinner(global, &format!("Downloading {path}…"));
            let result = engine.local_media().download(&path, &dest).await;
            spinner.finish_and_clear();
            let written = result?;
            if !global.quiet {
                eprintln!("✓ Wrote {written} bytes to {}", dest.display());
            }
            Ok(())
        }

        LocalCommand::Reset => {
            engine.local_media().reset_credentials().await?;
            if !global.quiet {
                eprintln!("✓ Local credentials removed; they will be reissued on next use");
            }
            Ok(())
        }
    }
}
