//! OS network-interface enumeration.
//!
//! The Book compiler has to reconcile configured networks against the
//! interfaces and addresses the OS actually has. That lookup lives behind
//! [`NetifSource`] so compilation can be tested with fabricated interfaces.

use std::net::Ipv4Addr;

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};

use crate::error::Result;

/// A snapshot of one host interface.
#[derive(Debug, Clone)]
pub struct Netif {
    pub name: String,
    pub index: u32,
    pub mac: Option<String>,
    /// IPv4 addresses currently bound to the interface.
    pub addrs: Vec<Ipv4Addr>,
}

/// Source of host interface snapshots.
pub trait NetifSource {
    fn interfaces(&self) -> Result<Vec<Netif>>;
}

/// The live system, via the `network-interface` crate.
pub struct SystemNetifs;

impl NetifSource for SystemNetifs {
    fn interfaces(&self) -> Result<Vec<Netif>> {
        let interfaces = NetworkInterface::show()
            .map_err(|e| std::io::Error::other(format!("interface enumeration failed: {e}")))?;

        let mut result: Vec<Netif> = Vec::new();
        for interface in interfaces {
            let addrs: Vec<Ipv4Addr> = interface
                .addr
                .iter()
                .filter_map(|addr| match addr {
                    Addr::V4(v4) => Some(v4.ip),
                    Addr::V6(_) => None,
                })
                .collect();

            // The crate reports one entry per address family on some
            // platforms; merge entries that share a name.
            if let Some(existing) = result.iter_mut().find(|n| n.name == interface.name) {
                existing.addrs.extend(addrs);
            } else {
                result.push(Netif {
                    name: interface.name,
                    index: interface.index,
                    mac: interface.mac_addr,
                    addrs,
                });
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Fixed interface table for compiler tests.
    pub struct FakeNetifs(pub Vec<Netif>);

    impl NetifSource for FakeNetifs {
        fn interfaces(&self) -> Result<Vec<Netif>> {
            Ok(self.0.clone())
        }
    }

    /// One interface named `name` with the given bound addresses.
    pub fn single(name: &str, addrs: &[Ipv4Addr]) -> FakeNetifs {
        FakeNetifs(vec![Netif {
            name: name.to_string(),
            index: 2,
            mac: Some("02:00:00:00:00:01".to_string()),
            addrs: addrs.to_vec(),
        }])
    }
}
