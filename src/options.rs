//! DHCP options (RFC 2132) used by the static-lease negotiator.
//!
//! Each option is a TLV: code (1 byte), length (1 byte), data. Only the
//! options this server emits or inspects get typed variants; everything
//! else is preserved raw as [`DhcpOption::Unknown`] so the parameter
//! request list can still be honored without understanding every code.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Options carry a 1-byte length, so at most 63 IPv4 addresses fit.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

/// Option codes this server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding, skipped during parsing.
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// Lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// Parameter request list (RFC 2132 §9.8).
    ParameterRequestList = 55,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            55 => Ok(Self::ParameterRequestList),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message types (Option 53, RFC 2132 §9.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with an address offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates the address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases its address.
    Release = 7,
    /// Client requests config without address allocation.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// A parsed DHCP option.
#[derive(Debug, Clone)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Router addresses (Option 3). First address is the default gateway.
    Router(Vec<Ipv4Addr>),
    /// DNS server addresses (Option 6).
    DnsServer(Vec<Ipv4Addr>),
    /// Client's requested IP address (Option 50).
    RequestedIpAddress(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Server identifier, the IP of the responding server (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Option codes the client wants in the reply (Option 55).
    ParameterRequestList(Vec<u8>),
    /// Any option without a typed variant, kept raw.
    Unknown(u8, Vec<u8>),
}

fn single_addr(code: OptionCode, data: &[u8]) -> Result<Ipv4Addr> {
    if data.len() != 4 {
        return Err(Error::InvalidPacket(format!(
            "option {} must be 4 bytes, got {}",
            code as u8,
            data.len()
        )));
    }
    Ok(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
}

fn addr_list(code: OptionCode, data: &[u8]) -> Result<Vec<Ipv4Addr>> {
    if data.is_empty() || !data.len().is_multiple_of(4) {
        return Err(Error::InvalidPacket(format!(
            "option {} length {} is not a non-empty multiple of 4",
            code as u8,
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}

impl DhcpOption {
    /// Returns the wire code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::ParameterRequestList(_) => OptionCode::ParameterRequestList as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Parses one option from its code and data bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] when the data length does not fit
    /// the option type.
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => {
                Ok(Self::SubnetMask(single_addr(OptionCode::SubnetMask, data)?))
            }
            Ok(OptionCode::Router) => Ok(Self::Router(addr_list(OptionCode::Router, data)?)),
            Ok(OptionCode::DnsServer) => {
                Ok(Self::DnsServer(addr_list(OptionCode::DnsServer, data)?))
            }
            Ok(OptionCode::RequestedIpAddress) => Ok(Self::RequestedIpAddress(single_addr(
                OptionCode::RequestedIpAddress,
                data,
            )?)),
            Ok(OptionCode::LeaseTime) => {
                if data.len() != 4 {
                    return Err(Error::InvalidPacket("invalid lease time length".to_string()));
                }
                Ok(Self::LeaseTime(u32::from_be_bytes([
                    data[0], data[1], data[2], data[3],
                ])))
            }
            Ok(OptionCode::MessageType) => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket(
                        "invalid message type length".to_string(),
                    ));
                }
                let msg_type = MessageType::try_from(data[0]).map_err(|value| {
                    Error::InvalidPacket(format!("unknown message type: {value}"))
                })?;
                Ok(Self::MessageType(msg_type))
            }
            Ok(OptionCode::ServerIdentifier) => Ok(Self::ServerIdentifier(single_addr(
                OptionCode::ServerIdentifier,
                data,
            )?)),
            Ok(OptionCode::ParameterRequestList) => Ok(Self::ParameterRequestList(data.to_vec())),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => Err(Error::InvalidPacket(
                "pad/end are not standalone options".to_string(),
            )),
            Err(unknown_code) => Ok(Self::Unknown(unknown_code, data.to_vec())),
        }
    }

    /// Encodes the option to wire format (code + length + data).
    pub fn encode(&self) -> Vec<u8> {
        fn tlv(code: u8, data: &[u8]) -> Vec<u8> {
            let len = data.len().min(255);
            let mut result = vec![code, len as u8];
            result.extend_from_slice(&data[..len]);
            result
        }

        match self {
            Self::SubnetMask(addr) => tlv(OptionCode::SubnetMask as u8, &addr.octets()),
            Self::Router(addrs) => tlv(OptionCode::Router as u8, &encode_addrs(addrs)),
            Self::DnsServer(addrs) => tlv(OptionCode::DnsServer as u8, &encode_addrs(addrs)),
            Self::RequestedIpAddress(addr) => {
                tlv(OptionCode::RequestedIpAddress as u8, &addr.octets())
            }
            Self::LeaseTime(time) => tlv(OptionCode::LeaseTime as u8, &time.to_be_bytes()),
            Self::MessageType(msg_type) => tlv(OptionCode::MessageType as u8, &[*msg_type as u8]),
            Self::ServerIdentifier(addr) => tlv(OptionCode::ServerIdentifier as u8, &addr.octets()),
            Self::ParameterRequestList(params) => {
                tlv(OptionCode::ParameterRequestList as u8, params)
            }
            Self::Unknown(code, data) => tlv(*code, data),
        }
    }
}

fn encode_addrs(addrs: &[Ipv4Addr]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(addrs.len().min(MAX_ADDRESSES_PER_OPTION) * 4);
    for addr in addrs.iter().take(MAX_ADDRESSES_PER_OPTION) {
        bytes.extend_from_slice(&addr.octets());
    }
    bytes
}
