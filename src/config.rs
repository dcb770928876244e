//! Configuration management for the dispatcher
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub dispatch: DispatchConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Native value attached to every send, in ether (e.g. "0.01")
    pub attached_value_eth: String,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Only accept deliveries whose source routing code matches the sender
    #[serde(default)]
    pub match_source_chain: bool,
    /// Only accept deliveries carrying the exact payload that was sent
    #[serde(default = "default_true")]
    pub match_payload: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// EVM chain id used for signing
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub contract_address: String,
    /// Destination id understood by the messaging protocol (LayerZero `uint16`)
    pub routing_code: u16,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_inclusion_timeout_secs")]
    pub inclusion_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_delivery_timeout_secs() -> u64 {
    20
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_inclusion_timeout_secs() -> u64 {
    300
}

fn default_private_key_env() -> String {
    "DISPATCHER_PRIVATE_KEY".to_string()
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from the file named by `DISPATCHER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("DISPATCHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn parse(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.enabled_chains().len() < 2 {
            anyhow::bail!("At least two chains must be enabled to route messages");
        }

        self.dispatch.attached_value()?;
        if self.dispatch.delivery_timeout_secs == 0 {
            anyhow::bail!("dispatch.delivery_timeout_secs must be positive");
        }

        let mut routing_codes = HashSet::new();
        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            chain
                .contract_address
                .parse::<Address>()
                .with_context(|| format!("Chain {} has an invalid contract address", name))?;
            if !routing_codes.insert(chain.routing_code) {
                anyhow::bail!(
                    "Chain {} reuses routing code {}",
                    name,
                    chain.routing_code
                );
            }
        }

        Ok(())
    }

    /// Get list of enabled chains, keyed by their dispatcher identifier
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        let mut chains: Vec<_> = self.chains.iter().filter(|(_, c)| c.enabled).collect();
        chains.sort_by(|a, b| a.0.cmp(b.0));
        chains
    }
}

impl DispatchConfig {
    /// Attached value in wei
    pub fn attached_value(&self) -> Result<U256> {
        parse_ether(&self.attached_value_eth)
            .with_context(|| format!("Invalid attached value: {}", self.attached_value_eth))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl WalletConfig {
    /// Read the signing key; startup fails when it is absent
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.private_key_env)
            .with_context(|| format!("Missing signing key: set {}", self.private_key_env))
    }
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.inclusion_timeout_secs)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[dispatch]
attached_value_eth = "0.01"
delivery_timeout_secs = 20

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[wallet]
private_key_env = "TEST_DISPATCHER_KEY"

[chains.1]
chain_id = 31337
name = "localhost"
rpc_urls = ["http://localhost:8545"]
contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
routing_code = 10121

[chains.2]
chain_id = 80002
name = "amoy"
rpc_urls = ["${TEST_AMOY_RPC}"]
contract_address = "0x1CBd3b2770909D4e10f157cABC84C7264073C9Ec"
routing_code = 10109
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn parses_sample_config_with_defaults() {
        env::set_var("TEST_AMOY_RPC", "https://rpc-amoy.example");
        let settings = Settings::parse(SAMPLE).unwrap();

        assert_eq!(settings.dispatch.delivery_timeout(), Duration::from_secs(20));
        assert!(settings.dispatch.match_payload);
        assert!(!settings.dispatch.match_source_chain);
        assert_eq!(
            settings.dispatch.attached_value().unwrap(),
            U256::from(10_000_000_000_000_000u64)
        );

        let amoy = &settings.chains["2"];
        assert_eq!(amoy.rpc_urls, vec!["https://rpc-amoy.example".to_string()]);
        assert_eq!(amoy.routing_code, 10109);
        assert_eq!(amoy.poll_interval(), Duration::from_millis(2000));

        let names: Vec<_> = settings.enabled_chains().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["1", "2"]);
    }

    #[test]
    fn rejects_single_chain() {
        let single = SAMPLE.split("[chains.2]").next().unwrap();
        let err = Settings::parse(single).unwrap_err();
        assert!(err.to_string().contains("At least two chains"));
    }

    #[test]
    fn rejects_duplicate_routing_codes() {
        let dup = SAMPLE.replace("routing_code = 10109", "routing_code = 10121");
        let err = Settings::parse(&dup).unwrap_err();
        assert!(err.to_string().contains("reuses routing code"));
    }

    #[test]
    fn rejects_bad_contract_address() {
        let bad = SAMPLE.replace("0x1CBd3b2770909D4e10f157cABC84C7264073C9Ec", "not-an-address");
        assert!(Settings::parse(&bad).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.api.port, 8080);
    }

    #[test]
    fn missing_private_key_is_an_error() {
        let wallet = WalletConfig {
            private_key_env: "TEST_DISPATCHER_KEY_THAT_IS_UNSET".to_string(),
        };
        let err = wallet.private_key().unwrap_err();
        assert!(err.to_string().contains("TEST_DISPATCHER_KEY_THAT_IS_UNSET"));
    }
}
