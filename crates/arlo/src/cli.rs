//! Clap derive structures for the `arlo` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// arlo -- control Arlo cameras from the command line
#[derive(Debug, Parser)]
#[command(
    name = "arlo",
    version,
    about = "Control Arlo cameras from the command line",
    long_about = "Logs in to the Arlo cloud (email or push second factor), discovers\n\
        the hub and its cameras over the push event stream, and sends\n\
        mode, privacy, siren, stream and snapshot commands.\n\n\
        Recordings stored on the hub can be listed and downloaded over\n\
        a direct mutual-TLS connection.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "ARLO_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(long, short = 'o', env = "ARLO_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "ARLO_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Seconds to wait for device discovery after login
    #[arg(long, default_value = "30", global = true)]
    pub wait: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DeviceKind {
    Hub,
    Camera,
    CameraQ,
    CameraQs,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and show the account identity
    Login,

    /// List and inspect discovered devices
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Stream push events until interrupted
    Watch(WatchArgs),

    /// Arm the hub (set the armed mode)
    Arm(HubArgs),

    /// Disarm the hub
    Disarm(HubArgs),

    /// Turn a camera's privacy mode on or off
    Privacy(ToggleArgs),

    /// Sound or silence a camera's siren
    Siren(ToggleArgs),

    /// Start or stop a live stream
    Stream(StreamArgs),

    /// Request a full-frame snapshot
    Snapshot(CameraArgs),

    /// Recordings stored on the hub
    Local(LocalArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared Arguments ─────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CameraArgs {
    /// Camera device id
    pub camera: String,
}

#[derive(Debug, Args)]
pub struct HubArgs {
    /// Hub or self-hosted camera id (defaults to the hub)
    pub device: Option<String>,
}

#[derive(Debug, Args)]
pub struct ToggleArgs {
    /// Camera device id
    pub camera: String,

    /// Desired state
    pub state: Toggle,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List devices
    #[command(alias = "ls")]
    List {
        /// Only devices of this kind
        #[arg(long, short = 't')]
        kind: Option<DeviceKind>,
    },

    /// Show one device with its properties
    Get {
        /// Device id
        id: String,
    },
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

// ── Stream ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StreamArgs {
    #[command(subcommand)]
    pub command: StreamCommand,
}

#[derive(Debug, Subcommand)]
pub enum StreamCommand {
    /// Start a live stream and print its URL
    Start(CameraArgs),

    /// Stop a live stream
    Stop(CameraArgs),
}

// ── Local storage ────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LocalArgs {
    #[command(subcommand)]
    pub command: LocalCommand,
}

#[derive(Debug, Subcommand)]
pub enum LocalCommand {
    /// List recordings between two dates (YYYY-MM-DD, inclusive)
    #[command(alias = "ls")]
    List {
        /// First day (defaults to today)
        #[arg(long)]
        from: Option<String>,

        /// Last day (defaults to --from)
        #[arg(long)]
        to: Option<String>,
    },

    /// Download one recording
    Download {
        /// Recording path as listed by the hub
        path: String,

        /// Destination file
        dest: std::path::PathBuf,
    },

    /// Delete stored keys and certificates so they are reissued
    Reset,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Set a configuration value on the active profile
    Set {
        /// Profile key (e.g., "email", "mfa", "refresh_interval")
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store the active profile's password in the system keyring
    SetPassword {
        /// Store the mailbox password instead
        #[arg(long)]
        mailbox: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
