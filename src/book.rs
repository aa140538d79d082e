//! The Book: an immutable, validated snapshot of the network inventory.
//!
//! A Book is born from [`Book::from_config`], which parses the external
//! configuration, reconciles it against live OS interfaces, and runs every
//! cross-entity check before returning. A partially valid Book is never
//! observable. Listener tasks read the current Book once per request and
//! never mutate it; reload replaces the whole snapshot.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use tracing::{error, warn};

use crate::config::{Config, MachineConfig, V4NetworkConfig};
use crate::error::{Error, Result};
use crate::netif::{Netif, NetifSource};

/// A 6-byte Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HardwareAddr(pub [u8; 6]);

impl HardwareAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for HardwareAddr {
    type Err = String;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let separator = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut count = 0;

        for part in s.split(separator) {
            if count == 6 {
                return Err(format!("too many octets in {s:?}"));
            }
            octets[count] = u8::from_str_radix(part, 16)
                .map_err(|_| format!("bad octet {part:?} in {s:?}"))?;
            count += 1;
        }
        if count != 6 {
            return Err(format!("expected 6 octets in {s:?}, got {count}"));
        }
        Ok(Self(octets))
    }
}

impl std::fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// DNS settings carried by the Book.
#[derive(Debug, Clone)]
pub struct DnsSettings {
    /// UDP listen address. `None` disables DNS entirely.
    pub listen: Option<SocketAddr>,
    /// Networks whose hosts may query this server.
    pub networks: Vec<String>,
    /// TTL for answers resolved from the Book.
    pub local_ttl: u32,
    /// TTL for answers resolved via external recursive lookup.
    pub global_ttl: u32,
}

/// One managed subnet.
#[derive(Debug, Clone)]
pub struct V4Network {
    pub name: String,
    /// OS interface this network lives on.
    pub interface: String,
    /// The daemon's own address on that interface.
    pub my_address: Ipv4Addr,
    pub subnet: Ipv4Network,
    /// DHCP4 listen endpoint. `None` disables DHCP for this network.
    pub dhcp4_listen: Option<SocketAddr>,
    pub name_servers: Vec<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    /// Lease lifetime, validated at compile time.
    pub lease_duration: Duration,
}

/// A named host with one or more NIC bindings.
#[derive(Debug, Clone)]
pub struct Machine {
    pub name: String,
    pub interfaces: Vec<Interface>,
}

/// One NIC binding: hardware address, static IPv4 address, optional FQDN.
#[derive(Debug, Clone)]
pub struct Interface {
    pub hardware: HardwareAddr,
    pub address: Ipv4Addr,
    pub fqdn: Option<String>,
}

/// The immutable network/machine inventory.
#[derive(Debug, Clone)]
pub struct Book {
    pub dns: DnsSettings,
    pub v4_networks: BTreeMap<String, V4Network>,
    pub machines: BTreeMap<String, Machine>,
}

impl Book {
    /// Compiles and validates a configuration against live OS state.
    ///
    /// # Errors
    ///
    /// Returns the first compile or validation error encountered; no Book
    /// is produced on any failure.
    pub fn from_config(config: &Config, netifs: &dyn NetifSource) -> Result<Self> {
        for network in &config.dns.networks {
            if !config.v4networks.contains_key(network) {
                return Err(Error::UnknownNetwork(network.clone()));
            }
        }

        let listen = if config.dns.listen.is_empty() {
            None
        } else {
            Some(config.dns.listen.parse().map_err(|_| Error::InvalidAddress {
                field: "dns.listen".to_string(),
                value: config.dns.listen.clone(),
            })?)
        };

        let dns = DnsSettings {
            listen,
            networks: config.dns.networks.clone(),
            local_ttl: config.dns.local_ttl.max(0) as u32,
            global_ttl: config.dns.global_ttl.max(0) as u32,
        };

        let interfaces = netifs.interfaces()?;

        let mut v4_networks = BTreeMap::new();
        for (name, network_config) in &config.v4networks {
            let network = compile_network(name, network_config, &interfaces)?;
            v4_networks.insert(name.clone(), network);
        }

        let mut machines = BTreeMap::new();
        for (name, machine_config) in &config.machines {
            let machine = compile_machine(name, machine_config)?;
            machines.insert(name.clone(), machine);
        }

        let book = Self {
            dns,
            v4_networks,
            machines,
        };
        book.validate()?;
        Ok(book)
    }

    /// Cross-entity invariants, checked once at compile time.
    ///
    /// Runs the gateway-in-subnet check, then the duplicate-IP scan, then
    /// the duplicate-MAC scan, returning the first violation. A machine
    /// address outside every managed network only logs a warning: hosts may
    /// be registered purely for DNS.
    pub fn validate(&self) -> Result<()> {
        for (name, network) in &self.v4_networks {
            if let Some(gateway) = network.gateway
                && !network.subnet.contains(gateway)
            {
                return Err(Error::GatewayOutsideSubnet {
                    network: name.clone(),
                    gateway,
                    subnet: network.subnet.to_string(),
                });
            }
        }

        let mut ip_owner: HashMap<Ipv4Addr, &str> = HashMap::new();
        for (name, machine) in &self.machines {
            for nic in &machine.interfaces {
                if let Some(other) = ip_owner.get(&nic.address) {
                    return Err(Error::DuplicateAddress {
                        address: nic.address,
                        owner: name.clone(),
                        other: (*other).to_string(),
                    });
                }
                let managed = self
                    .v4_networks
                    .values()
                    .any(|network| network.subnet.contains(nic.address));
                if !managed {
                    warn!(
                        machine = %name, address = %nic.address,
                        "address is not in any managed network"
                    );
                }
                ip_owner.insert(nic.address, name);
            }
        }

        let mut hw_owner: HashMap<HardwareAddr, &str> = HashMap::new();
        for (name, machine) in &self.machines {
            for nic in &machine.interfaces {
                if let Some(other) = hw_owner.get(&nic.hardware) {
                    return Err(Error::DuplicateHardwareAddress {
                        address: nic.hardware,
                        owner: name.clone(),
                        other: (*other).to_string(),
                    });
                }
                hw_owner.insert(nic.hardware, name);
            }
        }

        Ok(())
    }

    /// Statically bound address for a hardware address, if any.
    pub fn lookup_ip_for_hardware(&self, hardware: HardwareAddr) -> Option<Ipv4Addr> {
        self.machines.values().find_map(|machine| {
            machine
                .interfaces
                .iter()
                .find(|nic| nic.hardware == hardware)
                .map(|nic| nic.address)
        })
    }

    /// Address for a fully-qualified domain name, if any interface claims it.
    ///
    /// Comparison is case-insensitive and ignores the trailing root dot.
    pub fn lookup_ip_for_fqdn(&self, fqdn: &str) -> Option<Ipv4Addr> {
        let wanted = normalize_fqdn(fqdn);
        self.machines.values().find_map(|machine| {
            machine
                .interfaces
                .iter()
                .find(|nic| {
                    nic.fqdn
                        .as_deref()
                        .is_some_and(|name| normalize_fqdn(name) == wanted)
                })
                .map(|nic| nic.address)
        })
    }
}

fn normalize_fqdn(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn compile_network(name: &str, config: &V4NetworkConfig, interfaces: &[Netif]) -> Result<V4Network> {
    let Some(netif) = interfaces.iter().find(|n| n.name == config.interface) else {
        error!(interface = %config.interface, "interface not found; all host interfaces:");
        for nif in interfaces {
            error!(
                "  [{:02}] {} hw={} addrs={:?}",
                nif.index,
                nif.name,
                nif.mac.as_deref().unwrap_or("-"),
                nif.addrs
            );
        }
        return Err(Error::InterfaceNotFound(config.interface.clone()));
    };

    let subnet: Ipv4Network = config.network.parse().map_err(
        |e: ipnetwork::IpNetworkError| Error::InvalidSubnet {
            network: name.to_string(),
            value: config.network.clone(),
            reason: e.to_string(),
        },
    )?;
    let my_address = subnet.ip();

    if !netif.addrs.contains(&my_address) {
        error!(
            interface = %config.interface, address = %my_address,
            "address is not assigned to the interface; bound addresses:"
        );
        for addr in &netif.addrs {
            error!("  - {addr}");
        }
        return Err(Error::AddressNotAssigned {
            interface: config.interface.clone(),
            address: my_address,
        });
    }

    let dhcp4_listen = if config.dhcp4_listen.is_empty() {
        None
    } else {
        Some(
            config
                .dhcp4_listen
                .parse()
                .map_err(|_| Error::InvalidAddress {
                    field: format!("v4networks.{name}.dhcp4-listen"),
                    value: config.dhcp4_listen.clone(),
                })?,
        )
    };

    if config.nameserver_addresses.is_empty() {
        warn!(network = %name, "no nameserver addresses configured");
    }
    let mut name_servers = Vec::with_capacity(config.nameserver_addresses.len());
    for addr in &config.nameserver_addresses {
        let ip: Ipv4Addr = addr.parse().map_err(|_| Error::InvalidAddress {
            field: format!("v4networks.{name}.nameserver-address"),
            value: addr.clone(),
        })?;
        name_servers.push(ip);
    }

    let gateway = if config.gateway_address.is_empty() {
        warn!(network = %name, "no gateway address configured");
        None
    } else {
        Some(
            config
                .gateway_address
                .parse()
                .map_err(|_| Error::InvalidAddress {
                    field: format!("v4networks.{name}.gateway-address"),
                    value: config.gateway_address.clone(),
                })?,
        )
    };

    // try_from_secs_f64 rejects negative, non-finite, and overflowing
    // values, all of which would panic at reply time otherwise.
    let lease_duration = Duration::try_from_secs_f64(config.lease_duration_days * 86_400.0)
        .map_err(|_| Error::InvalidLeaseDuration {
            network: name.to_string(),
            value: config.lease_duration_days,
        })?;

    Ok(V4Network {
        name: name.to_string(),
        interface: config.interface.clone(),
        my_address,
        subnet,
        dhcp4_listen,
        name_servers,
        gateway,
        lease_duration,
    })
}

fn compile_machine(name: &str, config: &MachineConfig) -> Result<Machine> {
    let mut interfaces = Vec::with_capacity(config.len());
    for nic in config {
        let hardware = nic
            .hardware_address
            .parse()
            .map_err(|_| Error::InvalidHardwareAddress {
                machine: name.to_string(),
                value: nic.hardware_address.clone(),
            })?;
        let address = nic.ipv4_address.parse().map_err(|_| Error::InvalidIpAddress {
            machine: name.to_string(),
            value: nic.ipv4_address.clone(),
        })?;
        let fqdn = if nic.fqdn.is_empty() {
            None
        } else {
            Some(nic.fqdn.clone())
        };
        interfaces.push(Interface {
            hardware,
            address,
            fqdn,
        });
    }
    Ok(Machine {
        name: name.to_string(),
        interfaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netif::testing::single;

    fn sample_config() -> Config {
        Config::from_slice(
            br#"{
                "dns": {
                    "listen": "127.0.0.1:20000",
                    "networks": ["lan"],
                    "local-ttl": 300,
                    "global-ttl": -5
                },
                "v4networks": {
                    "lan": {
                        "interface": "eth0",
                        "network": "10.0.0.1/24",
                        "dhcp4-listen": "10.0.0.1:67",
                        "lease-duration-days": 1.0,
                        "nameserver-address": ["10.0.0.1"],
                        "gateway-address": "10.0.0.254"
                    }
                },
                "machines": {
                    "zoi": [
                        {
                            "hardware-address": "aa:bb:cc:dd:ee:ff",
                            "ipv4-address": "10.0.0.5",
                            "fqdn": "zoi.example."
                        }
                    ]
                }
            }"#,
        )
        .unwrap()
    }

    fn eth0() -> crate::netif::testing::FakeNetifs {
        single("eth0", &[Ipv4Addr::new(10, 0, 0, 1)])
    }

    #[test]
    fn test_hardware_addr_parse_and_display() {
        let addr: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.octets(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(addr.to_string(), "aa:bb:cc:dd:ee:ff");

        let dashed: HardwareAddr = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(dashed, addr);

        assert!("aa:bb:cc:dd:ee".parse::<HardwareAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<HardwareAddr>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<HardwareAddr>().is_err());
    }

    #[test]
    fn test_compile_sample() {
        let book = Book::from_config(&sample_config(), &eth0()).unwrap();

        assert_eq!(book.dns.listen, Some("127.0.0.1:20000".parse().unwrap()));
        assert_eq!(book.dns.local_ttl, 300);
        assert_eq!(book.dns.global_ttl, 0, "negative TTL clamps to 0");

        let lan = &book.v4_networks["lan"];
        assert_eq!(lan.my_address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(lan.dhcp4_listen, Some("10.0.0.1:67".parse().unwrap()));
        assert_eq!(lan.gateway, Some(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(lan.lease_duration, Duration::from_secs(86_400));

        let zoi = &book.machines["zoi"];
        assert_eq!(zoi.interfaces[0].address, Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_unknown_dns_network_rejected() {
        let mut config = sample_config();
        config.dns.networks.push("dmz".to_string());

        let err = Book::from_config(&config, &eth0()).unwrap_err();
        assert!(matches!(err, Error::UnknownNetwork(name) if name == "dmz"));
    }

    #[test]
    fn test_interface_not_found() {
        let config = sample_config();
        let netifs = single("wlan0", &[Ipv4Addr::new(10, 0, 0, 1)]);

        let err = Book::from_config(&config, &netifs).unwrap_err();
        assert!(matches!(err, Error::InterfaceNotFound(name) if name == "eth0"));
    }

    #[test]
    fn test_address_not_assigned() {
        let config = sample_config();
        let netifs = single("eth0", &[Ipv4Addr::new(192, 168, 1, 1)]);

        let err = Book::from_config(&config, &netifs).unwrap_err();
        assert!(matches!(err, Error::AddressNotAssigned { .. }));
    }

    #[test]
    fn test_invalid_subnet() {
        let mut config = sample_config();
        config.v4networks.get_mut("lan").unwrap().network = "10.0.0.1/33".to_string();

        let err = Book::from_config(&config, &eth0()).unwrap_err();
        assert!(matches!(err, Error::InvalidSubnet { .. }));
    }

    #[test]
    fn test_bad_lease_duration_rejected() {
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let mut config = sample_config();
            config.v4networks.get_mut("lan").unwrap().lease_duration_days = bad;

            let err = Book::from_config(&config, &eth0()).unwrap_err();
            assert!(matches!(err, Error::InvalidLeaseDuration { network, .. } if network == "lan"));
        }
    }

    #[test]
    fn test_invalid_machine_addresses() {
        let mut config = sample_config();
        config.machines.get_mut("zoi").unwrap()[0].hardware_address = "nope".to_string();
        let err = Book::from_config(&config, &eth0()).unwrap_err();
        assert!(matches!(err, Error::InvalidHardwareAddress { machine, .. } if machine == "zoi"));

        let mut config = sample_config();
        config.machines.get_mut("zoi").unwrap()[0].ipv4_address = "10.0.0".to_string();
        let err = Book::from_config(&config, &eth0()).unwrap_err();
        assert!(matches!(err, Error::InvalidIpAddress { machine, .. } if machine == "zoi"));
    }

    #[test]
    fn test_duplicate_ip_rejected() {
        let mut config = sample_config();
        config.machines.insert(
            "umiko".to_string(),
            vec![crate::config::InterfaceConfig {
                hardware_address: "11:22:33:44:55:66".to_string(),
                ipv4_address: "10.0.0.5".to_string(),
                fqdn: String::new(),
            }],
        );

        let err = Book::from_config(&config, &eth0()).unwrap_err();
        assert!(matches!(err, Error::DuplicateAddress { address, .. }
            if address == Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn test_duplicate_mac_rejected() {
        let mut config = sample_config();
        config.machines.insert(
            "umiko".to_string(),
            vec![crate::config::InterfaceConfig {
                hardware_address: "aa:bb:cc:dd:ee:ff".to_string(),
                ipv4_address: "10.0.0.6".to_string(),
                fqdn: String::new(),
            }],
        );

        let err = Book::from_config(&config, &eth0()).unwrap_err();
        assert!(matches!(err, Error::DuplicateHardwareAddress { .. }));
    }

    #[test]
    fn test_gateway_outside_subnet_rejected() {
        let mut config = sample_config();
        config.v4networks.get_mut("lan").unwrap().gateway_address = "192.168.1.1".to_string();

        let err = Book::from_config(&config, &eth0()).unwrap_err();
        assert!(matches!(err, Error::GatewayOutsideSubnet { network, .. } if network == "lan"));
    }

    #[test]
    fn test_machine_outside_all_networks_is_not_fatal() {
        // Externally reachable DNS-only hosts are allowed; only a warning.
        let mut config = sample_config();
        config.machines.get_mut("zoi").unwrap()[0].ipv4_address = "203.0.113.7".to_string();

        let book = Book::from_config(&config, &eth0()).unwrap();
        assert_eq!(
            book.machines["zoi"].interfaces[0].address,
            Ipv4Addr::new(203, 0, 113, 7)
        );
    }

    #[test]
    fn test_lookup_by_hardware() {
        let book = Book::from_config(&sample_config(), &eth0()).unwrap();
        let mac: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();

        assert_eq!(
            book.lookup_ip_for_hardware(mac),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
        let unknown: HardwareAddr = "00:00:00:00:00:01".parse().unwrap();
        assert_eq!(book.lookup_ip_for_hardware(unknown), None);
    }

    #[test]
    fn test_lookup_by_fqdn() {
        let book = Book::from_config(&sample_config(), &eth0()).unwrap();

        assert_eq!(
            book.lookup_ip_for_fqdn("zoi.example."),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
        // Case-insensitive, trailing dot optional.
        assert_eq!(
            book.lookup_ip_for_fqdn("ZOI.Example"),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
        assert_eq!(book.lookup_ip_for_fqdn("hifumi.example."), None);
    }

    #[test]
    fn test_dns_disabled_when_listen_empty() {
        let mut config = sample_config();
        config.dns.listen = String::new();
        config.dns.networks.clear();

        let book = Book::from_config(&config, &eth0()).unwrap();
        assert!(book.dns.listen.is_none());
    }
}
