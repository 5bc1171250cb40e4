//! Shared configuration for the Arlo CLI and any other front end.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `arlo_core::EngineConfig`. The CLI adds
//! flag-aware wrappers on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use arlo_core::{
    AuthFlow, CodeRetry, Credentials, EngineConfig, Endpoints, MailboxConnection, ReconnectConfig,
};

/// Service name under which secrets are kept in the OS keyring.
pub const KEYRING_SERVICE: &str = "arlo";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {secret} configured for profile '{profile}'")]
    NoCredentials { profile: String, secret: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// Second factor used at login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaMode {
    /// Code mailed to an inbox the CLI can read.
    Email,
    /// Silent approval by a paired mobile device.
    #[default]
    Push,
}

/// A named account profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account email address.
    pub email: String,

    /// Account password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    #[serde(default)]
    pub mfa: MfaMode,

    // ── Email factor ──
    pub mailbox_host: Option<String>,
    pub mailbox_port: Option<u16>,
    /// Defaults to the account email.
    pub mailbox_user: Option<String>,
    /// Mailbox password (plaintext, prefer keyring).
    pub mailbox_password: Option<String>,

    // ── Push factor ──
    pub mobile_payload: Option<String>,
    /// Access token from a previous login, validated before a full handshake.
    pub saved_token: Option<String>,

    // ── Endpoint overrides ──
    pub auth_base: Option<String>,
    pub api_base: Option<String>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,

    /// Full rediscovery period in seconds. Unset or 0 disables it.
    pub refresh_interval: Option<u64>,

    /// Per-device property poll in seconds. Unset or 0 disables it.
    pub poll_interval: Option<u64>,

    /// Hub subscription keep-alive in seconds.
    pub keepalive: Option<u64>,

    /// Wait before logging in again after a remote logout, in seconds.
    pub relogin_delay: Option<u64>,

    /// Consecutive stream failures tolerated. 0 retries forever.
    pub reconnect_max_retries: Option<u32>,

    /// Backoff cap between stream reconnects, in seconds.
    pub reconnect_max_delay: Option<u64>,

    /// Where local-media keys and certificates live.
    pub credential_dir: Option<PathBuf>,

    /// Client id sent with certificate requests.
    pub app_id: Option<String>,

    /// Reuse window of a hub token, in seconds.
    pub hub_token_validity: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "arlo-rs", "arlo")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default local-media credential directory for a profile.
pub fn credential_dir(profile_name: &str) -> PathBuf {
    project_dirs()
        .map_or_else(|| dirs_fallback(".local/share"), |dirs| dirs.data_dir().to_path_buf())
        .join(profile_name)
        .join("certs")
}

fn dirs_fallback(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("arlo");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Layer defaults, the TOML file at `path`, then `ARLO_*` variables.
///
/// Nested keys use a double underscore, e.g. `ARLO_PROFILES__HOME__EMAIL`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ARLO_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the account password: env var, then keyring, then plaintext.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env, then ARLO_PASSWORD
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }
    if let Ok(pw) = std::env::var("ARLO_PASSWORD") {
        return Ok(SecretString::from(pw));
    }

    // 2. System keyring
    if let Some(pw) = keyring_secret(&format!("{profile_name}/password")) {
        return Ok(pw);
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
        secret: "password".into(),
    })
}

/// Resolve the mailbox password for the email factor, if any is configured.
pub fn resolve_mailbox_password(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    if let Ok(pw) = std::env::var("ARLO_MAILBOX_PASSWORD") {
        return Some(SecretString::from(pw));
    }
    keyring_secret(&format!("{profile_name}/mailbox-password"))
        .or_else(|| profile.mailbox_password.clone().map(SecretString::from))
}

fn keyring_secret(key: &str) -> Option<SecretString> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, key).ok()?;
    entry.get_password().ok().map(SecretString::from)
}

/// Store a secret in the OS keyring under `{profile}/{name}`.
pub fn store_secret(profile_name: &str, name: &str, secret: &str) -> Result<(), ConfigError> {
    let keyring_err = |e: keyring::Error| ConfigError::Validation {
        field: "keyring".into(),
        reason: e.to_string(),
    };
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{name}"))
        .map_err(keyring_err)?
        .set_password(secret)
        .map_err(keyring_err)
}

// ── Translation to EngineConfig ─────────────────────────────────────

/// Build an `EngineConfig` from a profile, resolving secrets.
pub fn profile_to_engine_config(profile: &Profile, profile_name: &str) -> Result<EngineConfig, ConfigError> {
    let password = resolve_password(profile, profile_name)?;
    let mailbox_password = match profile.mfa {
        MfaMode::Email => resolve_mailbox_password(profile, profile_name),
        MfaMode::Push => None,
    };
    build_engine_config(profile, profile_name, password, mailbox_password)
}

/// Build an `EngineConfig` from a profile and already-resolved secrets.
pub fn build_engine_config(
    profile: &Profile,
    profile_name: &str,
    password: SecretString,
    mailbox_password: Option<SecretString>,
) -> Result<EngineConfig, ConfigError> {
    if profile.email.trim().is_empty() {
        return Err(invalid("email", "account email is required"));
    }

    let flow = match profile.mfa {
        MfaMode::Email => {
            // Without a mailbox host the code source is expected to ask a human.
            let password = match (&profile.mailbox_host, mailbox_password) {
                (_, Some(password)) => password,
                (None, None) => SecretString::from(String::new()),
                (Some(_), None) => {
                    return Err(ConfigError::NoCredentials {
                        profile: profile_name.into(),
                        secret: "mailbox password".into(),
                    });
                }
            };
            AuthFlow::Email {
                mailbox: MailboxConnection {
                    user: profile.mailbox_user.clone().unwrap_or_else(|| profile.email.clone()),
                    password,
                    host: profile.mailbox_host.clone().unwrap_or_default(),
                    port: profile.mailbox_port.unwrap_or(993),
                },
                retry: CodeRetry::default(),
            }
        }
        MfaMode::Push => AuthFlow::Push {
            mobile_payload: profile
                .mobile_payload
                .clone()
                .map(SecretString::from)
                .ok_or_else(|| invalid("mobile_payload", "required for the push factor"))?,
            saved_token: profile.saved_token.clone().map(SecretString::from),
        },
    };

    let mut config = EngineConfig::new(
        Credentials {
            email: profile.email.clone(),
            password,
        },
        flow,
    );

    if profile.auth_base.is_some() || profile.api_base.is_some() {
        let defaults = Endpoints::default();
        config.endpoints = Endpoints::new(
            profile.auth_base.as_deref().unwrap_or(defaults.auth_base.as_str()),
            profile.api_base.as_deref().unwrap_or(defaults.api_base.as_str()),
        )
        .map_err(|e| invalid("auth_base/api_base", &e.to_string()))?;
    }

    config.transport.timeout = Duration::from_secs(profile.timeout.unwrap_or(30));
    config.refresh_interval = nonzero_secs(profile.refresh_interval);
    config.poll_interval = nonzero_secs(profile.poll_interval);
    if let Some(secs) = profile.keepalive {
        if secs == 0 {
            return Err(invalid("keepalive", "must be at least one second"));
        }
        config.keepalive = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.relogin_delay {
        config.relogin_delay = Duration::from_secs(secs);
    }

    let reconnect = ReconnectConfig::default();
    config.reconnect = ReconnectConfig {
        max_retries: match profile.reconnect_max_retries {
            Some(0) => None,
            Some(n) => Some(n),
            None => reconnect.max_retries,
        },
        max_delay: profile
            .reconnect_max_delay
            .map_or(reconnect.max_delay, Duration::from_secs)
            .max(reconnect.initial_delay),
        ..reconnect
    };

    config.credential_dir = profile
        .credential_dir
        .clone()
        .unwrap_or_else(|| credential_dir(profile_name));
    config.local_media.app_id.clone_from(&profile.app_id);
    if let Some(secs) = profile.hub_token_validity {
        config.local_media.validity = Duration::from_secs(secs);
    }

    Ok(config)
}

fn nonzero_secs(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn push_profile() -> Profile {
        Profile {
            email: "me@example.com".into(),
            mobile_payload: Some("payload".into()),
            ..Profile::default()
        }
    }

    fn pw() -> SecretString {
        SecretString::from("pw".to_string())
    }

    #[test]
    fn file_profiles_are_layered_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[defaults]
output = "json"

[profiles.home]
email = "me@example.com"
mfa = "email"
mailbox_host = "imap.example.com"
refresh_interval = 3600
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("home"));
        assert_eq!(cfg.defaults.output, "json");
        assert_eq!(cfg.defaults.timeout, 30);
        let home = &cfg.profiles["home"];
        assert_eq!(home.mfa, MfaMode::Email);
        assert_eq!(home.refresh_interval, Some(3600));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), push_profile());
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["default"].email, "me@example.com");
        assert_eq!(loaded.profiles["default"].mfa, MfaMode::Push);
    }

    #[test]
    fn push_profile_builds_engine_config() {
        let mut profile = push_profile();
        profile.saved_token = Some("tok".into());
        profile.refresh_interval = Some(0);
        profile.poll_interval = Some(60);
        profile.reconnect_max_retries = Some(0);
        profile.hub_token_validity = Some(120);
        profile.credential_dir = Some(PathBuf::from("/tmp/arlo-certs"));

        let config = build_engine_config(&profile, "default", pw(), None).unwrap();
        assert_eq!(config.credentials.email, "me@example.com");
        assert_eq!(config.credentials.password.expose_secret(), "pw");
        match &config.flow {
            AuthFlow::Push {
                mobile_payload,
                saved_token,
            } => {
                assert_eq!(mobile_payload.expose_secret(), "payload");
                assert_eq!(saved_token.as_ref().unwrap().expose_secret(), "tok");
            }
            AuthFlow::Email { .. } => panic!("expected push flow"),
        }
        assert_eq!(config.refresh_interval, None);
        assert_eq!(config.poll_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.reconnect.max_retries, None);
        assert_eq!(config.local_media.validity, Duration::from_secs(120));
        assert_eq!(config.credential_dir, PathBuf::from("/tmp/arlo-certs"));
        assert_eq!(config.endpoints, Endpoints::default());
    }

    #[test]
    fn email_profile_with_mailbox_needs_its_password() {
        let profile = Profile {
            email: "me@example.com".into(),
            mfa: MfaMode::Email,
            ..Profile::default()
        };
        // No mailbox: the code is typed in.
        let config = build_engine_config(&profile, "default", pw(), None).unwrap();
        assert!(matches!(&config.flow, AuthFlow::Email { mailbox, .. } if mailbox.host.is_empty()));

        let profile = Profile {
            mailbox_host: Some("imap.example.com".into()),
            ..profile
        };
        let err = build_engine_config(&profile, "default", pw(), None).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));

        let config =
            build_engine_config(&profile, "default", pw(), Some(SecretString::from("mail".to_string()))).unwrap();
        match &config.flow {
            AuthFlow::Email { mailbox, .. } => {
                assert_eq!(mailbox.user, "me@example.com");
                assert_eq!(mailbox.port, 993);
                assert_eq!(mailbox.host, "imap.example.com");
            }
            AuthFlow::Push { .. } => panic!("expected email flow"),
        }
    }

    #[test]
    fn endpoint_overrides_keep_the_other_default() {
        let profile = Profile {
            api_base: Some("http://127.0.0.1:9000/hmsweb".into()),
            ..push_profile()
        };
        let config = build_engine_config(&profile, "default", pw(), None).unwrap();
        assert_eq!(config.endpoints.api_base.as_str(), "http://127.0.0.1:9000/hmsweb/");
        assert_eq!(config.endpoints.auth_base, Endpoints::default().auth_base);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let profile = Profile {
            email: "  ".into(),
            ..push_profile()
        };
        assert!(build_engine_config(&profile, "default", pw(), None).is_err());

        let profile = Profile {
            keepalive: Some(0),
            ..push_profile()
        };
        assert!(build_engine_config(&profile, "default", pw(), None).is_err());

        let profile = Profile {
            mobile_payload: None,
            ..push_profile()
        };
        assert!(build_engine_config(&profile, "default", pw(), None).is_err());
    }
}
