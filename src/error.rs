//! Error types for the daemon.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Compile and validation errors are
//! fatal at startup and rejecting at reload; runtime listener errors are
//! pushed onto the orchestrator's error stream and never terminate the
//! process.

use std::net::Ipv4Addr;

use crate::book::HardwareAddr;

/// Errors that can occur while compiling, validating or serving a Book.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error (config file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A network name listed as DNS-permitted has no entry in `v4networks`.
    #[error("network [{0}] (allowed for serving DNS) not found")]
    UnknownNetwork(String),

    /// The OS does not have an interface with the configured name.
    ///
    /// The compiler logs every host interface (index, MAC, bound addresses)
    /// before returning this, to aid operator debugging.
    #[error("interface {0} not found")]
    InterfaceNotFound(String),

    /// The configured `network` field is not a valid IPv4 CIDR.
    #[error("invalid subnet {value:?} for network {network}: {reason}")]
    InvalidSubnet {
        network: String,
        value: String,
        reason: String,
    },

    /// The daemon's own address is not currently bound to the interface.
    #[error("address {address} is not assigned to {interface}")]
    AddressNotAssigned {
        interface: String,
        address: Ipv4Addr,
    },

    /// A listen endpoint or nameserver/gateway address failed to parse.
    /// `field` names the offending configuration entry.
    #[error("invalid address {value:?} in {field}")]
    InvalidAddress { field: String, value: String },

    /// A network's lease duration is negative, not finite, or too large
    /// to represent.
    #[error("invalid lease duration {value} days for network {network}")]
    InvalidLeaseDuration { network: String, value: f64 },

    /// A machine interface's hardware address failed to parse.
    #[error("invalid hardware address {value:?} for machine {machine}")]
    InvalidHardwareAddress { machine: String, value: String },

    /// A machine interface's IPv4 address failed to parse.
    #[error("invalid IPv4 address {value:?} for machine {machine}")]
    InvalidIpAddress { machine: String, value: String },

    /// Two machine interfaces share one IPv4 address.
    #[error("IPv4 address {address} (assigned to {owner}) is also assigned to {other}")]
    DuplicateAddress {
        address: Ipv4Addr,
        owner: String,
        other: String,
    },

    /// Two machine interfaces share one hardware address.
    #[error("hardware address {address} (assigned to {owner}) is also assigned to {other}")]
    DuplicateHardwareAddress {
        address: HardwareAddr,
        owner: String,
        other: String,
    },

    /// A network's configured gateway lies outside its subnet.
    #[error("gateway {gateway} (for {network}) is not in the network {subnet}")]
    GatewayOutsideSubnet {
        network: String,
        gateway: Ipv4Addr,
        subnet: String,
    },

    /// Reload asked for a different listener set than is currently running.
    /// Adding or removing listeners requires a full restart.
    #[error("reload would change listener topology: {0}")]
    TopologyChanged(String),

    /// A DHCP client requested an address it is not statically bound to.
    /// Answered with NAK; reported on the error stream; never fatal.
    #[error(
        "DHCP4 client {hardware} (\"{sname}\") on {network} requested {requested:?}, expected {expected:?}"
    )]
    WrongAddressRequested {
        network: String,
        sname: String,
        hardware: HardwareAddr,
        requested: Option<Ipv4Addr>,
        expected: Option<Ipv4Addr>,
    },

    /// DNS listener failure, reported on the error stream.
    #[error("DNS error @ {listen}: {source}")]
    Dns {
        listen: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// DHCP4 listener failure for one network, reported on the error stream.
    #[error("DHCP4 error on network {network}: {source}")]
    Dhcp4 {
        network: String,
        source: std::io::Error,
    },

    /// Malformed DHCP or DNS packet received.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
