//! Layered configuration: defaults, an optional TOML file, `TRELLIS_*`
//! environment overrides, then CLI flags on top.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use trellis_core::{ContactInfo, ID_LEN, encode_id};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("bootstrap `{raw}` is not of the form ip|port")]
    Bootstrap { raw: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Node name; a random identifier when unset.
    pub name: Option<String>,
    /// Address advertised to peers.
    pub ip: String,
    pub p2p_port: u16,
    pub monitoring_port: u16,
    /// Seconds between recurring rounds.
    pub delay_secs: u64,
    /// Cache entry lifetime, in seconds.
    pub expiration_secs: u64,
    /// Subtree size at which a location becomes delegable.
    pub delegation_threshold: i64,
    /// Set capacity before shrinking.
    pub set_length: usize,
    /// Backup path prefix.
    pub storage: PathBuf,
    /// Bootstrap peer as `ip|port`.
    pub bootstrap: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: None,
            ip: "127.0.0.1".to_string(),
            p2p_port: 21000,
            monitoring_port: 19000,
            delay_secs: 10,
            expiration_secs: 300,
            delegation_threshold: 1000,
            set_length: ID_LEN,
            storage: PathBuf::from(".data/backup"),
            bootstrap: None,
        }
    }
}

pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Some(name) = env("TRELLIS_NAME") {
        config.name = Some(name);
    }
    if let Some(ip) = env("TRELLIS_IP") {
        config.ip = ip;
    }
    override_parsed("TRELLIS_P2P_PORT", &mut config.p2p_port);
    override_parsed("TRELLIS_MONITORING_PORT", &mut config.monitoring_port);
    override_parsed("TRELLIS_DELAY_SECS", &mut config.delay_secs);
    override_parsed("TRELLIS_EXPIRATION_SECS", &mut config.expiration_secs);
    override_parsed("TRELLIS_DELEGATION_THRESHOLD", &mut config.delegation_threshold);
    override_parsed("TRELLIS_SET_LENGTH", &mut config.set_length);
    if let Some(storage) = env("TRELLIS_STORAGE") {
        config.storage = PathBuf::from(storage);
    }
    if let Some(bootstrap) = env("TRELLIS_BOOTSTRAP") {
        config.bootstrap = Some(bootstrap);
    }
}

impl Config {
    /// The bootstrap contacts to acknowledge at startup. The placeholder
    /// name is the zero identifier; the first ping learns the real one.
    pub fn bootstrap_contacts(&self) -> Result<Vec<ContactInfo>, ConfigError> {
        let Some(raw) = &self.bootstrap else {
            return Ok(Vec::new());
        };
        let Some((ip, port)) = raw.split_once('|') else {
            return Err(ConfigError::Bootstrap { raw: raw.clone() });
        };
        let port: u16 = port.parse().map_err(|_| ConfigError::Bootstrap { raw: raw.clone() })?;
        if ip.is_empty() {
            return Err(ConfigError::Bootstrap { raw: raw.clone() });
        }
        Ok(vec![ContactInfo {
            name: encode_id(&[0u8; ID_LEN]),
            ips: [ip.to_string()].into(),
            ip: ip.to_string(),
            port,
        }])
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn override_parsed<T: std::str::FromStr>(key: &str, slot: &mut T) {
    let Some(raw) = env(key) else { return };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, raw = %raw, "ignoring unparsable override"),
    }
}
