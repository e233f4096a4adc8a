//! Runner configuration.
//!
//! Settings come from three layers: command-line flags (or their `LAMDUCT_*`
//! environment variables), an optional TOML file, and built-in defaults. A
//! flag wins over the file, the file wins over the default.

use crate::duct::{DuctPolicy, StopRelay};
use crate::error::{DuctError, Result};
use crate::offline::SpawnPolicy;
use crate::server::{ConnectOptions, DEFAULT_PORT_BASE, DEFAULT_PORT_WINDOW};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_COMMAND: &str = "./punter";
pub const DEFAULT_CLIENT_LOG: &str = "client.log";
pub const DEFAULT_TURN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

/// Play one punter game online with an offline client.
#[derive(Parser, Debug, Default)]
#[command(name = "lamduct")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server host
    #[arg(short = 'a', long, env = "LAMDUCT_HOST")]
    pub host: Option<String>,

    /// Server port; probes the port window when omitted
    #[arg(short, long, env = "LAMDUCT_PORT")]
    pub port: Option<u16>,

    /// Name to play under; defaults to the offline client's own name
    #[arg(short, long, env = "LAMDUCT_NAME")]
    pub name: Option<String>,

    /// Offline client command line
    #[arg(long, env = "LAMDUCT_CMD")]
    pub cmd: Option<String>,

    /// File the offline client's stderr is appended to
    #[arg(long, env = "LAMDUCT_LOG")]
    pub log: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long, env = "LAMDUCT_SILENT")]
    pub silent: bool,

    /// How long each offline client process lives
    #[arg(long, value_enum, env = "LAMDUCT_SPAWN")]
    pub spawn: Option<SpawnPolicy>,

    /// Limit on each offline handshake or turn, in milliseconds (0 = none)
    #[arg(long, env = "LAMDUCT_TURN_TIMEOUT_MS")]
    pub turn_timeout_ms: Option<u64>,

    /// Limit on each connection attempt, in milliseconds
    #[arg(long, env = "LAMDUCT_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Base of the probed port window
    #[arg(long, env = "LAMDUCT_PORT_BASE")]
    pub port_base: Option<u16>,

    /// Number of ports probed above the base
    #[arg(long, env = "LAMDUCT_PORT_WINDOW")]
    pub port_window: Option<u16>,

    /// Run timeout notices through the offline client
    #[arg(long, env = "LAMDUCT_FORWARD_TIMEOUTS")]
    pub forward_timeouts: bool,

    /// How the final stop message reaches the offline client
    #[arg(long, value_enum, env = "LAMDUCT_STOP_RELAY")]
    pub stop_relay: Option<StopRelay>,

    /// TOML file supplying defaults for any of the above
    #[arg(short, long, env = "LAMDUCT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Contents of a `--config` file. Keys are the long flag names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub cmd: Option<String>,
    pub log: Option<PathBuf>,
    pub silent: Option<bool>,
    pub spawn: Option<SpawnPolicy>,
    pub turn_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub port_base: Option<u16>,
    pub port_window: Option<u16>,
    pub forward_timeouts: Option<bool>,
    pub stop_relay: Option<StopRelay>,
}

impl FileConfig {
    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DuctError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| DuctError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse config file contents.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Fully resolved runner settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub cmd: String,
    pub log: PathBuf,
    pub silent: bool,
    pub spawn: SpawnPolicy,
    pub turn_timeout: Option<Duration>,
    pub connect: ConnectOptions,
    pub policy: DuctPolicy,
}

impl Settings {
    /// Resolve `args`, reading its `--config` file if one is named.
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    /// Layer `args` over `file` over the defaults.
    pub fn merge(args: Args, file: FileConfig) -> Result<Self> {
        let port = args.port.or(file.port);
        let port_window = args
            .port_window
            .or(file.port_window)
            .unwrap_or(DEFAULT_PORT_WINDOW);
        if port.is_none() && port_window == 0 {
            return Err(DuctError::Config(
                "no port given and the port window is empty".into(),
            ));
        }

        let turn_timeout_ms = args
            .turn_timeout_ms
            .or(file.turn_timeout_ms)
            .unwrap_or(DEFAULT_TURN_TIMEOUT_MS);
        let connect_timeout_ms = args
            .connect_timeout_ms
            .or(file.connect_timeout_ms)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        Ok(Self {
            host: args
                .host
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            name: args.name.or(file.name),
            cmd: args
                .cmd
                .or(file.cmd)
                .unwrap_or_else(|| DEFAULT_COMMAND.to_string()),
            log: args
                .log
                .or(file.log)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_LOG)),
            silent: args.silent || file.silent.unwrap_or(false),
            spawn: args.spawn.or(file.spawn).unwrap_or_default(),
            turn_timeout: (turn_timeout_ms > 0).then(|| Duration::from_millis(turn_timeout_ms)),
            connect: ConnectOptions {
                port_base: args
                    .port_base
                    .or(file.port_base)
                    .unwrap_or(DEFAULT_PORT_BASE),
                port_window,
                connect_timeout: Duration::from_millis(connect_timeout_ms),
            },
            policy: DuctPolicy {
                forward_timeouts: args.forward_timeouts || file.forward_timeouts.unwrap_or(false),
                stop_relay: args.stop_relay.or(file.stop_relay).unwrap_or_default(),
            },
        })
    }

    /// Default log directive for the runner's own events.
    pub fn log_directive(&self) -> &'static str {
        if self.silent { "lamduct=warn" } else { "lamduct=info" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::merge(Args::default(), FileConfig::default()).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, None);
        assert_eq!(settings.name, None);
        assert_eq!(settings.cmd, "./punter");
        assert_eq!(settings.log, PathBuf::from("client.log"));
        assert!(!settings.silent);
        assert_eq!(settings.spawn, SpawnPolicy::PerTurn);
        assert_eq!(settings.turn_timeout, Some(Duration::from_secs(10)));
        assert_eq!(settings.connect.port_base, 9000);
        assert_eq!(settings.connect.port_window, 10);
        assert_eq!(settings.connect.connect_timeout, Duration::from_secs(2));
        assert_eq!(settings.policy, DuctPolicy::default());
        assert_eq!(settings.log_directive(), "lamduct=info");
    }

    #[test]
    fn file_overrides_defaults_and_flags_override_file() {
        let file = FileConfig::from_toml(
            r#"
            host = "punter.example"
            port = 9005
            cmd = "python3 bot.py"
            spawn = "persistent"
            stop-relay = "turn"
            silent = true
            "#,
        )
        .unwrap();
        let args = Args::try_parse_from(["lamduct", "--port", "9007", "-n", "duct-bot"]).unwrap();

        let settings = Settings::merge(args, file).unwrap();
        assert_eq!(settings.host, "punter.example");
        assert_eq!(settings.port, Some(9007));
        assert_eq!(settings.name.as_deref(), Some("duct-bot"));
        assert_eq!(settings.cmd, "python3 bot.py");
        assert_eq!(settings.spawn, SpawnPolicy::Persistent);
        assert_eq!(settings.policy.stop_relay, StopRelay::Turn);
        assert_eq!(settings.log_directive(), "lamduct=warn");
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::try_parse_from([
            "lamduct",
            "-a",
            "10.0.0.2",
            "-s",
            "--spawn",
            "persistent",
            "--stop-relay",
            "turn",
            "--forward-timeouts",
            "--turn-timeout-ms",
            "0",
        ])
        .unwrap();
        let settings = Settings::merge(args, FileConfig::default()).unwrap();
        assert_eq!(settings.host, "10.0.0.2");
        assert!(settings.silent);
        assert_eq!(settings.spawn, SpawnPolicy::Persistent);
        assert!(settings.policy.forward_timeouts);
        assert_eq!(settings.turn_timeout, None);
    }

    #[test]
    fn empty_window_without_port_is_rejected() {
        let file = FileConfig {
            port_window: Some(0),
            ..FileConfig::default()
        };
        assert!(matches!(
            Settings::merge(Args::default(), file.clone()),
            Err(DuctError::Config(_))
        ));

        let args = Args {
            port: Some(9001),
            ..Args::default()
        };
        assert!(Settings::merge(args, file).is_ok());
    }

    #[test]
    fn unknown_file_key_is_rejected() {
        assert!(FileConfig::from_toml("hots = \"typo\"").is_err());
    }

    #[test]
    fn missing_config_file() {
        let err = FileConfig::from_file(Path::new("/nonexistent/lamduct.toml")).unwrap_err();
        assert!(matches!(err, DuctError::Config(_)));
    }
}
