//! Config subcommand handlers.

use std::fmt::Write as _;

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, MfaMode, Profile};
use crate::error::CliError;
use crate::output;

use super::util::prompt_err;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking secrets.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "email = \"{}\"", p.email);
        let _ = writeln!(out, "mfa = \"{}\"", mfa_name(p.mfa));
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        if let Some(ref env) = p.password_env {
            let _ = writeln!(out, "password_env = \"{env}\"");
        }
        for (key, value) in [
            ("mailbox_host", p.mailbox_host.clone()),
            ("mailbox_user", p.mailbox_user.clone()),
            ("auth_base", p.auth_base.clone()),
            ("api_base", p.api_base.clone()),
            ("app_id", p.app_id.clone()),
            ("credential_dir", p.credential_dir.as_ref().map(|d| d.display().to_string())),
        ] {
            if let Some(value) = value {
                let _ = writeln!(out, "{key} = \"{value}\"");
            }
        }
        for (key, present) in [
            ("mailbox_password", p.mailbox_password.is_some()),
            ("mobile_payload", p.mobile_payload.is_some()),
            ("saved_token", p.saved_token.is_some()),
        ] {
            if present {
                let _ = writeln!(out, "{key} = \"****\"");
            }
        }
        for (key, value) in [
            ("mailbox_port", p.mailbox_port.map(u64::from)),
            ("timeout", p.timeout),
            ("refresh_interval", p.refresh_interval),
            ("poll_interval", p.poll_interval),
            ("keepalive", p.keepalive),
            ("relogin_delay", p.relogin_delay),
            ("reconnect_max_retries", p.reconnect_max_retries.map(u64::from)),
            ("reconnect_max_delay", p.reconnect_max_delay),
            ("hub_token_validity", p.hub_token_validity),
        ] {
            if let Some(value) = value {
                let _ = writeln!(out, "{key} = {value}");
            }
        }
    }

    out
}

fn mfa_name(mode: MfaMode) -> &'static str {
    match mode {
        MfaMode::Email => "email",
        MfaMode::Push => "push",
    }
}

fn parse_num<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: "must be a non-negative number".into(),
    })
}

/// Offer to store a secret in the system keyring or return it for plaintext config.
///
/// Returns `Some(secret)` if the user chose plaintext, `None` if stored in keyring.
fn prompt_keyring_storage(
    secret: String,
    profile_name: &str,
    keyring_name: &str,
    label: &str,
) -> Result<Option<String>, CliError> {
    let choices = &["Store in system keyring (recommended)", "Save to config file (plaintext)"];
    let selection = Select::new()
        .with_prompt(format!("Where to store the {label}?"))
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        arlo_config::store_secret(profile_name, keyring_name, &secret)?;
        eprintln!("   ✓ {label} stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret))
    }
}

fn prompt_secret(prompt: &str, field: &str) -> Result<String, CliError> {
    let secret = rpassword::prompt_password(prompt).map_err(prompt_err)?;
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: field.into(),
            reason: "value cannot be empty".into(),
        });
    }
    Ok(secret)
}

/// Apply one `config set` key to a profile.
fn set_key(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key.replace('-', "_").as_str() {
        "email" => profile.email = value,
        "mfa" => {
            profile.mfa = match value.as_str() {
                "email" => MfaMode::Email,
                "push" => MfaMode::Push,
                _ => {
                    return Err(CliError::Validation {
                        field: "mfa".into(),
                        reason: "must be 'email' or 'push'".into(),
                    });
                }
            };
        }
        "password_env" => profile.password_env = Some(value),
        "mailbox_host" => profile.mailbox_host = Some(value),
        "mailbox_port" => profile.mailbox_port = Some(parse_num("mailbox_port", &value)?),
        "mailbox_user" => profile.mailbox_user = Some(value),
        "mobile_payload" => profile.mobile_payload = Some(value),
        "saved_token" => profile.saved_token = Some(value),
        "auth_base" => profile.auth_base = Some(value),
        "api_base" => profile.api_base = Some(value),
        "timeout" => profile.timeout = Some(parse_num("timeout", &value)?),
        "refresh_interval" => profile.refresh_interval = Some(parse_num("refresh_interval", &value)?),
        "poll_interval" => profile.poll_interval = Some(parse_num("poll_interval", &value)?),
        "keepalive" => profile.keepalive = Some(parse_num("keepalive", &value)?),
        "relogin_delay" => profile.relogin_delay = Some(parse_num("relogin_delay", &value)?),
        "reconnect_max_retries" => {
            profile.reconnect_max_retries = Some(parse_num("reconnect_max_retries", &value)?);
        }
        "reconnect_max_delay" => profile.reconnect_max_delay = Some(parse_num("reconnect_max_delay", &value)?),
        "credential_dir" => profile.credential_dir = Some(value.into()),
        "app_id" => profile.app_id = Some(value),
        "hub_token_validity" => profile.hub_token_validity = Some(parse_num("hub_token_validity", &value)?),
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: email, mfa, password_env, mailbox_host, \
                     mailbox_port, mailbox_user, mobile_payload, saved_token, auth_base, api_base, timeout, \
                     refresh_interval, poll_interval, keepalive, relogin_delay, reconnect_max_retries, \
                     reconnect_max_delay, credential_dir, app_id, hub_token_validity"
                ),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(&global.output, &cfg, format_config_redacted, |_| "config".into());
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let profile = cfg.profiles.entry(profile_name.clone()).or_default();
            set_key(profile, &key, value)?;
            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: arlo config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetPassword { mailbox } => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(CliError::ProfileNotFound {
                    name: profile_name,
                    available: config::available_profiles(&cfg),
                });
            }

            let (keyring_name, prompt) = if mailbox {
                ("mailbox-password", "Mailbox password: ")
            } else {
                ("password", "Arlo password: ")
            };
            let secret = prompt_secret(prompt, keyring_name)?;
            arlo_config::store_secret(&profile_name, keyring_name, &secret)?;
            eprintln!("✓ Secret stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}

/// Interactive wizard writing a fresh config with one profile.
fn init() -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("✨ Arlo CLI configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    let email: String = Input::new()
        .with_prompt("Arlo account email")
        .interact_text()
        .map_err(prompt_err)?;

    let password = prompt_secret("Arlo password: ", "password")?;
    let password = prompt_keyring_storage(password, &profile_name, "password", "password")?;

    let mfa_choices = &[
        "Push (approve on a paired phone, needs its mobile payload)",
        "Email (type the one-time code when prompted)",
    ];
    let mfa_selection = Select::new()
        .with_prompt("Second factor")
        .items(mfa_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let mut profile = Profile {
        email,
        password,
        ..Profile::default()
    };
    if mfa_selection == 0 {
        profile.mfa = MfaMode::Push;
        let payload = prompt_secret("Mobile payload: ", "mobile_payload")?;
        profile.mobile_payload = Some(payload);
    } else {
        profile.mfa = MfaMode::Email;
        let host: String = Input::new()
            .with_prompt("IMAP host for reading the code (empty to type it in)")
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_err)?;
        if !host.trim().is_empty() {
            let port: u16 = Input::new()
                .with_prompt("IMAP port (implicit TLS)")
                .default(993)
                .interact_text()
                .map_err(prompt_err)?;
            let user: String = Input::new()
                .with_prompt("Mailbox user")
                .default(profile.email.clone())
                .interact_text()
                .map_err(prompt_err)?;
            let secret = prompt_secret("Mailbox password: ", "mailbox_password")?;
            profile.mailbox_password =
                prompt_keyring_storage(secret, &profile_name, "mailbox-password", "mailbox password")?;
            profile.mailbox_host = Some(host.trim().to_owned());
            profile.mailbox_port = Some(port);
            profile.mailbox_user = Some(user);
        }
    }

    let mut cfg = config::load_config_or_default();
    cfg.profiles.insert(profile_name.clone(), profile);
    cfg.default_profile = Some(profile_name.clone());
    config::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Test it: arlo login");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_key_accepts_dashes_and_numbers() {
        let mut profile = Profile::default();
        set_key(&mut profile, "refresh-interval", "3600".into()).unwrap();
        set_key(&mut profile, "mfa", "email".into()).unwrap();
        set_key(&mut profile, "mailbox_port", "143".into()).unwrap();
        assert_eq!(profile.refresh_interval, Some(3600));
        assert_eq!(profile.mfa, MfaMode::Email);
        assert_eq!(profile.mailbox_port, Some(143));
    }

    #[test]
    fn set_key_rejects_bad_input() {
        let mut profile = Profile::default();
        assert!(set_key(&mut profile, "timeout", "soon".into()).is_err());
        assert!(set_key(&mut profile, "mfa", "sms".into()).is_err());
        assert!(set_key(&mut profile, "colour", "red".into()).is_err());
    }

    #[test]
    fn redacted_config_hides_secrets() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "home".into(),
            Profile {
                email: "me@example.com".into(),
                password: Some("hunter2".into()),
                mobile_payload: Some("payload".into()),
                keepalive: Some(20),
                ..Profile::default()
            },
        );
        let text = format_config_redacted(&cfg);
        assert!(text.contains("[profiles.home]"));
        assert!(text.contains("email = \"me@example.com\""));
        assert!(text.contains("keepalive = 20"));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("\"payload\""));
    }
}
