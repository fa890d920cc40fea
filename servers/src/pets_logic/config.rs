use clap::Parser;
use lib_common::core::JobIdPrecedence;
use lib_common::ingestors::discord_gateway::DISCORD_GATEWAY_URL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "server_pets.conf";
const DEFAULT_CHANNEL_ID: &str = "1411527848585330850";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DISCORD_TOKEN is not set; the tracker cannot connect without a bot token")]
    MissingToken,
    #[error("invalid job id precedence: {0}")]
    InvalidPrecedence(String),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Discord Pet Server Tracker", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PETS_PORT", help = "Port the read API listens on.")]
    pub port: Option<u16>,

    #[clap(long, env = "PETS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PETS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PETS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DISCORD_TOKEN", hide_env_values = true, help = "Discord bot token.")]
    pub discord_token: Option<String>,

    #[clap(long, env = "PETS_CHANNEL_ID", help = "The only channel whose embeds are tracked.")]
    pub channel_id: Option<String>,

    #[clap(long, env = "DISCORD_GATEWAY_URL", help = "Discord gateway WebSocket URL.")]
    pub gateway_url: Option<String>,

    #[clap(long, env = "PETS_STORE_PATH", help = "Path of the JSON snapshot of tracked records.")]
    pub store_path: Option<PathBuf>,

    #[clap(long, env = "PETS_CAPACITY", help = "Maximum number of records kept.")]
    pub capacity: Option<usize>,

    #[clap(long, env = "PETS_RECENT_WINDOW_SECONDS", help = "Age limit in seconds for /recent-pets.")]
    pub recent_window_seconds: Option<u64>,

    #[clap(long, env = "PETS_RECONNECT_DELAY_MS", help = "Delay in milliseconds before reconnecting to the gateway.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "PETS_JOB_ID_PRECEDENCE", help = "Which job id source wins: explicit or script.")]
    pub job_id_precedence: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            discord_token: other.discord_token.or(self.discord_token),
            channel_id: other.channel_id.or(self.channel_id),
            gateway_url: other.gateway_url.or(self.gateway_url),
            store_path: other.store_path.or(self.store_path),
            capacity: other.capacity.or(self.capacity),
            recent_window_seconds: other.recent_window_seconds.or(self.recent_window_seconds),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            job_id_precedence: other.job_id_precedence.or(self.job_id_precedence),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            channel_id: Some(DEFAULT_CHANNEL_ID.to_string()),
            gateway_url: Some(DISCORD_GATEWAY_URL.to_string()),
            store_path: Some(PathBuf::from("./pet_servers.json")),
            capacity: Some(20),
            recent_window_seconds: Some(900),
            reconnect_delay_ms: Some(5000),
            job_id_precedence: Some(JobIdPrecedence::default().to_string()),
            ..Default::default()
        }
    }

    /// Turns the layered values into settings the server can run with.
    fn resolve(self, config_file: ConfigFile) -> Result<Settings, ConfigError> {
        let merged = Config::defaults().merge(self);

        let discord_token = merged
            .discord_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let job_id_precedence = match merged.job_id_precedence {
            Some(value) => value.parse::<JobIdPrecedence>().map_err(ConfigError::InvalidPrecedence)?,
            None => JobIdPrecedence::default(),
        };

        // Every remaining field is covered by `defaults()`.
        Ok(Settings {
            port: merged.port.unwrap_or(8080),
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            discord_token,
            channel_id: merged.channel_id.unwrap_or_else(|| DEFAULT_CHANNEL_ID.to_string()),
            gateway_url: merged.gateway_url.unwrap_or_else(|| DISCORD_GATEWAY_URL.to_string()),
            store_path: merged.store_path.unwrap_or_else(|| PathBuf::from("./pet_servers.json")),
            capacity: merged.capacity.unwrap_or(20),
            recent_window: Duration::from_secs(merged.recent_window_seconds.unwrap_or(900)),
            reconnect_delay: Duration::from_millis(merged.reconnect_delay_ms.unwrap_or(5000)),
            job_id_precedence,
            config_file,
        })
    }
}

/// What happened to the JSON config file during loading. Logged once the
/// logger is up, since loading happens before it exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigFile {
    Loaded(PathBuf),
    Missing(PathBuf),
    Invalid(PathBuf, String),
}

impl ConfigFile {
    pub fn log(&self) {
        match self {
            ConfigFile::Loaded(path) => log::info!("Loaded config file {}", path.display()),
            ConfigFile::Missing(path) => log::info!(
                "Config file not found at {}. Using defaults and environment/CLI variables.",
                path.display()
            ),
            ConfigFile::Invalid(path, reason) => log::warn!(
                "Failed to load config file {}: {}. Falling back to other sources.",
                path.display(),
                reason
            ),
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub discord_token: String,
    pub channel_id: String,
    pub gateway_url: String,
    pub store_path: PathBuf,
    pub capacity: usize,
    pub recent_window: Duration,
    pub reconnect_delay: Duration,
    pub job_id_precedence: JobIdPrecedence,
    pub config_file: ConfigFile,
}

/// Loads settings from defaults, the JSON config file, `.env` and the
/// process environment, and CLI flags, in increasing priority.
pub fn load_config() -> Result<Settings, ConfigError> {
    // Populate the environment first so clap sees `.env` values through `env = ...`.
    let _ = dotenvy::dotenv();
    layer(Config::parse())
}

/// Applies the config file named by `cli` (or the default file) underneath
/// `cli` and resolves the result.
fn layer(cli: Config) -> Result<Settings, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let (file_config, status) = read_config_file(&config_file_path);
    file_config.merge(cli).resolve(status)
}

fn read_config_file(path: &Path) -> (Config, ConfigFile) {
    if !path.exists() {
        return (Config::default(), ConfigFile::Missing(path.to_path_buf()));
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => (file_config, ConfigFile::Loaded(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigFile::Invalid(path.to_path_buf(), e.to_string())),
        },
        Err(e) => (Config::default(), ConfigFile::Invalid(path.to_path_buf(), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_pets"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_apply_when_nothing_else_is_set() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.conf");
        let settings = layer(cli(&[
            "--config-path",
            missing.to_str().unwrap(),
            "--discord-token",
            "abc",
        ]))
        .unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.channel_id, "1411527848585330850");
        assert_eq!(settings.gateway_url, DISCORD_GATEWAY_URL);
        assert_eq!(settings.store_path, PathBuf::from("./pet_servers.json"));
        assert_eq!(settings.capacity, 20);
        assert_eq!(settings.recent_window, Duration::from_secs(900));
        assert_eq!(settings.reconnect_delay, Duration::from_millis(5000));
        assert_eq!(settings.job_id_precedence, JobIdPrecedence::Explicit);
        assert_eq!(settings.config_file, ConfigFile::Missing(missing));
    }

    #[test]
    fn test_file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_pets.conf");
        fs::write(
            &path,
            r#"{ "port": 9100, "capacity": 5, "channelId": "42", "discordToken": "from-file" }"#,
        )
        .unwrap();

        let settings = layer(cli(&["--config-path", path.to_str().unwrap(), "--port", "9200"])).unwrap();

        assert_eq!(settings.port, 9200);
        assert_eq!(settings.capacity, 5);
        assert_eq!(settings.channel_id, "42");
        assert_eq!(settings.discord_token, "from-file");
        assert_eq!(settings.config_file, ConfigFile::Loaded(path));
    }

    #[test]
    fn test_missing_or_blank_token_is_fatal() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.conf");
        let path = missing.to_str().unwrap();

        let result = layer(cli(&["--config-path", path, "--discord-token", "   "]));
        assert!(matches!(result, Err(ConfigError::MissingToken)));

        // Only meaningful when the test environment carries no token of its own.
        if std::env::var_os("DISCORD_TOKEN").is_none() {
            let result = layer(cli(&["--config-path", path]));
            assert!(matches!(result, Err(ConfigError::MissingToken)));
        }
    }

    #[test]
    fn test_unknown_precedence_is_rejected() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.conf");
        let result = layer(cli(&[
            "--config-path",
            missing.to_str().unwrap(),
            "--discord-token",
            "abc",
            "--job-id-precedence",
            "newest",
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidPrecedence(_))));

        let settings = layer(cli(&[
            "--config-path",
            missing.to_str().unwrap(),
            "--discord-token",
            "abc",
            "--job-id-precedence",
            "Script",
        ]))
        .unwrap();
        assert_eq!(settings.job_id_precedence, JobIdPrecedence::Script);
    }

    #[test]
    fn test_precedence_is_read_from_the_file_as_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_pets.conf");
        fs::write(&path, r#"{ "discordToken": "abc", "jobIdPrecedence": "script" }"#).unwrap();
        let settings = layer(cli(&["--config-path", path.to_str().unwrap()])).unwrap();
        assert_eq!(settings.job_id_precedence, JobIdPrecedence::Script);
        assert_eq!(settings.job_id_precedence.to_string().parse::<JobIdPrecedence>(), Ok(JobIdPrecedence::Script));

        fs::write(&path, r#"{ "discordToken": "abc", "jobIdPrecedence": "newest" }"#).unwrap();
        let result = layer(cli(&["--config-path", path.to_str().unwrap()]));
        assert!(matches!(result, Err(ConfigError::InvalidPrecedence(ref v)) if v.contains("newest")));
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server_pets.conf");
        fs::write(&path, "{ not json").unwrap();

        let settings = layer(cli(&["--config-path", path.to_str().unwrap(), "--discord-token", "abc"])).unwrap();
        assert_eq!(settings.port, 8080);
        assert!(matches!(settings.config_file, ConfigFile::Invalid(_, _)));
    }
}
