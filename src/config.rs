//! Bridge configuration: CLI flags (`clap`) layered over an optional TOML
//! file (`serde`/`toml`), matching `spec.md` §6's CLI surface plus the
//! operational knobs the original implementation hardcodes as constants.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_session_timeout_secs() -> u64 {
    40
}

fn default_stager_timeout_secs() -> u64 {
    160
}

fn default_registry_tick_secs() -> u64 {
    20
}

fn default_reactor_tick_secs() -> u64 {
    10
}

fn default_ip_addr() -> Ipv4Addr {
    Ipv4Addr::new(127, 0, 0, 1)
}

/// Validated, merged configuration threaded through the bridge's
/// constructors. Built by [`BridgeConfig::from_cli`]; tests and the
/// integration suite construct it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// `[addr:]port` for the DNS listener (UDP + TCP).
    pub dns_addr: String,
    /// `[addr:]port` for the controller TCP listener.
    pub listen_addr: String,
    /// Authoritative domains this server answers for.
    pub domains: Vec<String>,
    /// Static A-record answer for the configured domains.
    #[serde(default = "default_ip_addr")]
    pub ip_addr: Ipv4Addr,

    /// Seconds of inactivity after which a session is reclaimed (spec §4.7,
    /// hardcoded to 40s in the original).
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Seconds an unsubscribed stage payload is kept before eviction (spec
    /// §4.7, hardcoded to 160s in the original).
    #[serde(default = "default_stager_timeout_secs")]
    pub stager_timeout_secs: u64,
    /// Registry timeout-sweep tick interval (spec §4.7: 20s default).
    #[serde(default = "default_registry_tick_secs")]
    pub registry_tick_secs: u64,
    /// Controller reactor select timeout (spec §4.5: 10s default).
    #[serde(default = "default_reactor_tick_secs")]
    pub reactor_tick_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dns_addr: "0.0.0.0:53".to_string(),
            listen_addr: "0.0.0.0:4444".to_string(),
            domains: Vec::new(),
            ip_addr: default_ip_addr(),
            session_timeout_secs: default_session_timeout_secs(),
            stager_timeout_secs: default_stager_timeout_secs(),
            registry_tick_secs: default_registry_tick_secs(),
            reactor_tick_secs: default_reactor_tick_secs(),
        }
    }
}

impl BridgeConfig {
    /// Layers `cli` over an optional TOML file at `config_path`. CLI flags
    /// win on conflict (clap's usual override semantics).
    pub fn load(config_path: Option<&PathBuf>, cli: CliOverrides) -> anyhow::Result<Self> {
        let mut cfg = match config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {}: {}", path.display(), e))?;
                toml::from_str(&text).map_err(|e| anyhow::anyhow!("parsing config file {}: {}", path.display(), e))?
            }
            None => BridgeConfig::default(),
        };

        if let Some(dns_addr) = cli.dns_addr {
            cfg.dns_addr = dns_addr;
        }
        if let Some(listen_addr) = cli.listen_addr {
            cfg.listen_addr = listen_addr;
        }
        if !cli.domains.is_empty() {
            cfg.domains = cli.domains;
        }
        if let Some(ip_addr) = cli.ip_addr {
            cfg.ip_addr = ip_addr;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domains.is_empty() {
            anyhow::bail!("at least one --domain is required");
        }
        if self.dns_addr.is_empty() {
            anyhow::bail!("--dnsaddr must not be empty");
        }
        if self.listen_addr.is_empty() {
            anyhow::bail!("--laddr must not be empty");
        }
        Ok(())
    }
}

/// The subset of `Cli` that overrides file-loaded config (spec §6).
pub struct CliOverrides {
    pub dns_addr: Option<String>,
    pub listen_addr: Option<String>,
    pub domains: Vec<String>,
    pub ip_addr: Option<Ipv4Addr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_domain_list() {
        let cfg = BridgeConfig {
            domains: Vec::new(),
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_populated_config() {
        let cfg = BridgeConfig {
            domains: vec!["tunnel.example.com".to_string()],
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_without_file_applies_cli_overrides() {
        let overrides = CliOverrides {
            dns_addr: Some("0.0.0.0:5353".to_string()),
            listen_addr: None,
            domains: vec!["tunnel.example.com".to_string()],
            ip_addr: None,
        };
        let cfg = BridgeConfig::load(None, overrides).unwrap();
        assert_eq!(cfg.dns_addr, "0.0.0.0:5353");
        assert_eq!(cfg.domains, vec!["tunnel.example.com".to_string()]);
    }
}
