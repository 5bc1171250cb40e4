//! CLI configuration: a thin wrapper around `arlo_config` that applies
//! `GlobalOpts` overrides (--profile, --timeout).

use std::time::Duration;

use arlo_core::{AuthFlow, CodeRetry, EngineConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use arlo_config::{Config, MfaMode, Profile, config_path, load_config_or_default, save_config};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Comma-separated profile names for error help text.
pub fn available_profiles(config: &Config) -> String {
    let mut names: Vec<_> = config.profiles.keys().cloned().collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort();
    names.join(", ")
}

/// Build the engine configuration for the active profile.
pub fn build_engine_config(global: &GlobalOpts) -> Result<EngineConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let Some(profile) = cfg.profiles.get(&profile_name) else {
        if cfg.profiles.is_empty() {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: available_profiles(&cfg),
        });
    };

    let mut config = arlo_config::profile_to_engine_config(profile, &profile_name)?;
    if let Some(secs) = global.timeout.or(profile.timeout) {
        config.transport.timeout = Duration::from_secs(secs);
    } else {
        config.transport.timeout = Duration::from_secs(cfg.defaults.timeout);
    }

    // A typed code needs no wait between attempts; a mailbox does.
    if !reads_mailbox(&config) {
        if let AuthFlow::Email { retry, .. } = &mut config.flow {
            *retry = CodeRetry {
                attempts: retry.attempts,
                delay: Duration::ZERO,
            };
        }
    }

    Ok(config)
}

/// Whether the one-time code comes from an IMAP mailbox rather than a prompt.
pub fn reads_mailbox(config: &EngineConfig) -> bool {
    matches!(&config.flow, AuthFlow::Email { mailbox, .. } if !mailbox.host.is_empty())
}
