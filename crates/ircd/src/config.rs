use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Operator name -> bcrypt hash.
    #[serde(default)]
    pub operators: HashMap<String, String>,
    /// SASL authcid -> bcrypt hash.
    #[serde(default)]
    pub accounts: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub description: String,
    /// bcrypt hash of the connection password; absent means no PASS needed.
    pub password: Option<String>,
    pub motd: Option<PathBuf>,
    #[serde(default)]
    pub listen: Vec<String>,
    #[serde(default)]
    pub tls_listen: Vec<TlsListenConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TlsListenConfig {
    pub addr: String,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_whowas_size")]
    pub whowas_size: usize,
}

fn default_whowas_size() -> usize {
    100
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig { whowas_size: default_whowas_size() }
    }
}

impl Config {
    /// Load and parse the TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        if config.server.listen.is_empty() && config.server.tls_listen.is_empty() {
            return Err(ConfigError::NoListeners);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        name = "irc.example.com"
        description = "example server"
        listen = ["127.0.0.1:6667"]
        motd = "motd.txt"

        [network]
        name = "ExampleNet"

        [limits]
        whowas_size = 50

        [operators]
        root = "$2b$10$hashhashhashhashhashhash"

        [accounts]
        alice = "$2b$10$hashhashhashhashhashhash"
    "#;

    #[test]
    fn parses_a_full_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.name, "irc.example.com");
        assert_eq!(config.network.name, "ExampleNet");
        assert_eq!(config.limits.whowas_size, 50);
        assert!(config.operators.contains_key("root"));
        assert!(config.accounts.contains_key("alice"));
        assert!(config.server.password.is_none());
    }

    #[test]
    fn limits_default_when_absent() {
        let minimal = r#"
            [server]
            name = "irc.example.com"
            description = "d"
            listen = ["127.0.0.1:6667"]

            [network]
            name = "Net"
        "#;
        let config: Config = toml::from_str(minimal).unwrap();
        assert_eq!(config.limits.whowas_size, 100);
        assert!(config.operators.is_empty());
    }
}
