use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::LevelFilter;

const DEFAULT_MAX_STEM_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub state_timeout: Duration,
    pub stem_timeout: Duration,
    pub max_stem_bytes: usize,
    pub dedupe_stems: bool,
    pub log_level: LevelFilter,
}

impl Config {
    /// Reads the environment, after loading `.env` if one exists.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            data_dir: env::var("STEM_PEER_DATA_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parse_var("API_PORT", 9000),
            state_timeout: Duration::from_secs(parse_var("STATE_TIMEOUT_SECS", 10)),
            stem_timeout: Duration::from_secs(parse_var("STEM_TIMEOUT_SECS", 60)),
            max_stem_bytes: parse_var("MAX_STEM_BYTES", DEFAULT_MAX_STEM_BYTES),
            dedupe_stems: parse_var("DEDUPE_STEMS", false),
            log_level: parse_var("LOG_LEVEL", LevelFilter::Info),
        }
    }

    /// Defaults rooted at `data_dir`, ignoring the environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            api_host: "127.0.0.1".to_string(),
            api_port: 9000,
            state_timeout: Duration::from_secs(10),
            stem_timeout: Duration::from_secs(60),
            max_stem_bytes: DEFAULT_MAX_STEM_BYTES,
            dedupe_stems: false,
            log_level: LevelFilter::Info,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn stems_dir(&self) -> PathBuf {
        self.data_dir.join("stems")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("incoming")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("stem-peer"))
        .unwrap_or_else(|| PathBuf::from("stem-peer-data"))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
