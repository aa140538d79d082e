//! External configuration document.
//!
//! The config file is a JSON document with three sections: `dns`,
//! `v4networks` and `machines`. It is only a transport format — nothing in
//! here is validated beyond JSON shape. [`crate::book::Book::from_config`]
//! turns it into the compiled, validated Book.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub v4networks: BTreeMap<String, V4NetworkConfig>,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsConfig {
    /// UDP listen address, e.g. `"10.0.0.1:53"`. Empty disables DNS.
    #[serde(default)]
    pub listen: String,
    /// Names of networks whose hosts may query this server.
    #[serde(default)]
    pub networks: Vec<String>,
    /// TTL for answers resolved from the Book. Negatives clamp to 0.
    #[serde(default, rename = "local-ttl")]
    pub local_ttl: i64,
    /// TTL for answers resolved via external recursive lookup.
    #[serde(default, rename = "global-ttl")]
    pub global_ttl: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V4NetworkConfig {
    /// OS interface name, e.g. `"eth0"`.
    pub interface: String,
    /// Our own address plus the subnet, in CIDR form, e.g. `"10.0.0.1/24"`.
    pub network: String,
    /// UDP listen endpoint for DHCP4. Empty disables DHCP for this network.
    #[serde(default, rename = "dhcp4-listen")]
    pub dhcp4_listen: String,
    #[serde(default, rename = "lease-duration-days")]
    pub lease_duration_days: f64,
    #[serde(default, rename = "nameserver-address")]
    pub nameserver_addresses: Vec<String>,
    #[serde(default, rename = "gateway-address")]
    pub gateway_address: String,
}

/// A machine is an ordered list of NIC bindings.
pub type MachineConfig = Vec<InterfaceConfig>;

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    #[serde(rename = "hardware-address")]
    pub hardware_address: String,
    #[serde(rename = "ipv4-address")]
    pub ipv4_address: String,
    /// Fully-qualified domain name served over DNS, e.g. `"zoi.example."`.
    #[serde(default)]
    pub fqdn: String,
}

impl Config {
    /// Reads and parses a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read(path)?;
        Self::from_slice(&content)
    }

    /// Parses config bytes. Used by the reload path.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
