//! DHCP packet parsing and encoding per RFC 2131.
//!
//! A packet is a fixed 236-byte header, the 4-byte magic cookie, then
//! TLV options. Only DHCP proper is handled: a packet whose cookie is
//! missing, or that carries no Message Type option, is treated as BOOTP
//! and rejected upstream.

use std::net::Ipv4Addr;

use crate::book::HardwareAddr;
use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType, OptionCode};

/// Magic cookie distinguishing DHCP from plain BOOTP.
const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const SNAME_OFFSET: usize = 44;
const SNAME_SIZE: usize = 64;
const FILE_OFFSET: usize = SNAME_OFFSET + SNAME_SIZE;
const FILE_SIZE: usize = 128;
const COOKIE_OFFSET: usize = FILE_OFFSET + FILE_SIZE;

/// Fixed header plus cookie; the smallest parseable packet.
const FIXED_HEADER_SIZE: usize = COOKIE_OFFSET + 4;

/// Replies are padded to 300 bytes for BOOTP relay compatibility.
const MIN_PACKET_SIZE: usize = 300;

/// Relay loop protection per RFC 2131 §4.1.
const MAX_HOPS: u8 = 16;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Hardware type and address length for Ethernet.
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

/// A parsed DHCP packet, request or reply.
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// [`BOOTREQUEST`] or [`BOOTREPLY`].
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    /// Hop count, incremented by relay agents.
    pub hops: u8,
    /// Transaction ID chosen by the client, echoed in replies.
    pub xid: u32,
    pub secs: u16,
    /// Bit 15 (0x8000) is the broadcast flag.
    pub flags: u16,
    /// Client address, set by the client when renewing or rebinding.
    pub ciaddr: Ipv4Addr,
    /// "Your" address, the one being assigned to the client.
    pub yiaddr: Ipv4Addr,
    /// Next-server address.
    pub siaddr: Ipv4Addr,
    /// Relay agent address.
    pub giaddr: Ipv4Addr,
    /// Client hardware address, zero-padded to 16 bytes.
    pub chaddr: [u8; 16],
    /// Server host name field, kept for diagnostics.
    pub sname: [u8; 64],
    /// Boot file name field.
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// Parses a packet from raw datagram bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] for packets shorter than the fixed
    /// header, a missing magic cookie, a hop count over [`MAX_HOPS`], an
    /// Ethernet hlen other than 6, or malformed options.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "packet too short: {} bytes (minimum {})",
                data.len(),
                FIXED_HEADER_SIZE
            )));
        }

        if data[COOKIE_OFFSET..COOKIE_OFFSET + 4] != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("missing magic cookie".to_string()));
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];

        if hops > MAX_HOPS {
            return Err(Error::InvalidPacket(format!(
                "hop count {hops} exceeds maximum {MAX_HOPS}"
            )));
        }
        if htype == HTYPE_ETHERNET && hlen != HLEN_ETHERNET {
            return Err(Error::InvalidPacket(format!(
                "invalid hlen {hlen} for Ethernet"
            )));
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; SNAME_SIZE];
        sname.copy_from_slice(&data[SNAME_OFFSET..FILE_OFFSET]);
        let mut file = [0u8; FILE_SIZE];
        file.copy_from_slice(&data[FILE_OFFSET..COOKIE_OFFSET]);

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options: parse_options(&data[FIXED_HEADER_SIZE..])?,
        })
    }

    /// Encodes the packet for transmission, padded to at least 300 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(MIN_PACKET_SIZE);

        packet.push(self.op);
        packet.push(self.htype);
        packet.push(self.hlen);
        packet.push(self.hops);
        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());
        packet.extend_from_slice(&self.ciaddr.octets());
        packet.extend_from_slice(&self.yiaddr.octets());
        packet.extend_from_slice(&self.siaddr.octets());
        packet.extend_from_slice(&self.giaddr.octets());
        packet.extend_from_slice(&self.chaddr);
        packet.extend_from_slice(&self.sname);
        packet.extend_from_slice(&self.file);
        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in &self.options {
            packet.extend_from_slice(&option.encode());
        }
        packet.push(OptionCode::End as u8);

        while packet.len() < MIN_PACKET_SIZE {
            packet.push(0);
        }
        packet
    }

    /// Message type (Option 53). `None` for BOOTP packets.
    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::MessageType(t) => Some(*t),
            _ => None,
        })
    }

    /// Requested IP address (Option 50), if present.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Server identifier (Option 54), if present. In a REQUEST this names
    /// the server whose offer the client is accepting.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::ServerIdentifier(ip) => Some(*ip),
            _ => None,
        })
    }

    /// Parameter request list (Option 55), if present.
    pub fn parameter_request_list(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::ParameterRequestList(params) => Some(params.as_slice()),
            _ => None,
        })
    }

    /// Client hardware address as a typed value.
    ///
    /// `None` when the packet is not an Ethernet request.
    pub fn hardware(&self) -> Option<HardwareAddr> {
        if self.htype != HTYPE_ETHERNET || self.hlen != HLEN_ETHERNET {
            return None;
        }
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&self.chaddr[..6]);
        Some(HardwareAddr(octets))
    }

    /// Server name field as text, trimmed of trailing NULs.
    pub fn server_name(&self) -> String {
        let end = self
            .sname
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.sname.len());
        String::from_utf8_lossy(&self.sname[..end]).to_string()
    }

    /// True when the client set the broadcast flag.
    pub fn is_broadcast(&self) -> bool {
        (self.flags & 0x8000) != 0
    }

    /// Builds a reply, echoing xid, flags, giaddr, chaddr, htype, and hlen
    /// from the request. The message type becomes the first option.
    pub fn create_reply(
        request: &DhcpPacket,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = vec![DhcpOption::MessageType(message_type)];
        all_options.extend(options);

        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: all_options,
        }
    }
}

fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>> {
    let mut options = Vec::new();
    let mut index = 0;

    while index < data.len() {
        let code = data[index];

        if code == OptionCode::Pad as u8 {
            index += 1;
            continue;
        }
        if code == OptionCode::End as u8 {
            break;
        }
        if index + 1 >= data.len() {
            return Err(Error::InvalidPacket("option length missing".to_string()));
        }

        let length = data[index + 1] as usize;
        if index + 2 + length > data.len() {
            return Err(Error::InvalidPacket("option data truncated".to_string()));
        }

        options.push(DhcpOption::parse(code, &data[index + 2..index + 2 + length])?);
        index += 2 + length;
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn raw_request(message_type: MessageType) -> Vec<u8> {
        let mut packet = vec![0u8; 300];
        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&0x1234_5678u32.to_be_bytes());
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet[240] = OptionCode::MessageType as u8;
        packet[241] = 1;
        packet[242] = message_type as u8;
        packet[243] = OptionCode::End as u8;
        packet
    }

    #[test]
    fn test_parse_and_roundtrip() {
        let data = raw_request(MessageType::Discover);
        let packet = DhcpPacket::parse(&data).unwrap();

        assert_eq!(packet.op, BOOTREQUEST);
        assert_eq!(packet.xid, 0x1234_5678);
        assert_eq!(packet.message_type(), Some(MessageType::Discover));
        assert_eq!(
            packet.hardware(),
            Some("aa:bb:cc:dd:ee:ff".parse().unwrap())
        );

        let reparsed = DhcpPacket::parse(&packet.encode()).unwrap();
        assert_eq!(reparsed.xid, packet.xid);
        assert_eq!(reparsed.message_type(), packet.message_type());
    }

    #[test]
    fn test_parse_request_options() {
        let mut data = raw_request(MessageType::Request);
        data[243] = OptionCode::RequestedIpAddress as u8;
        data[244] = 4;
        data[245..249].copy_from_slice(&[10, 0, 0, 5]);
        data[249] = OptionCode::ServerIdentifier as u8;
        data[250] = 4;
        data[251..255].copy_from_slice(&[10, 0, 0, 1]);
        data[255] = OptionCode::End as u8;

        let packet = DhcpPacket::parse(&data).unwrap();
        assert_eq!(packet.requested_ip(), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            packet.server_identifier(),
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
    }

    #[test]
    fn test_invalid_packets() {
        assert!(DhcpPacket::parse(&[0u8; 100]).is_err());
        assert!(DhcpPacket::parse(&[0u8; 239]).is_err());

        // No magic cookie: plain BOOTP, rejected at parse time.
        let bootp = [0u8; 300];
        assert!(DhcpPacket::parse(&bootp).is_err());
    }

    #[test]
    fn test_hlen_validation() {
        let mut data = raw_request(MessageType::Discover);
        data[2] = 7;
        assert!(DhcpPacket::parse(&data).is_err());
        data[2] = HLEN_ETHERNET;
        assert!(DhcpPacket::parse(&data).is_ok());
    }

    #[test]
    fn test_hops_limit() {
        let mut data = raw_request(MessageType::Discover);
        data[3] = 17;
        assert!(DhcpPacket::parse(&data).is_err());
        data[3] = 16;
        assert!(DhcpPacket::parse(&data).is_ok());
    }

    #[test]
    fn test_hardware_none_for_non_ethernet() {
        let mut data = raw_request(MessageType::Discover);
        data[1] = 6;
        data[2] = 8;
        let packet = DhcpPacket::parse(&data).unwrap();
        assert_eq!(packet.hardware(), None);
    }

    #[test]
    fn test_server_name_trims_nuls() {
        let mut data = raw_request(MessageType::Request);
        data[44..49].copy_from_slice(b"other");
        let packet = DhcpPacket::parse(&data).unwrap();
        assert_eq!(packet.server_name(), "other");
    }

    #[test]
    fn test_create_reply() {
        let discover = DhcpPacket::parse(&raw_request(MessageType::Discover)).unwrap();

        let offer = DhcpPacket::create_reply(
            &discover,
            MessageType::Offer,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 1),
            vec![DhcpOption::LeaseTime(86_400)],
        );

        assert_eq!(offer.op, BOOTREPLY);
        assert_eq!(offer.xid, discover.xid);
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.chaddr, discover.chaddr);
    }

    #[test]
    fn test_giaddr_and_flags_preserved_in_reply() {
        let mut data = raw_request(MessageType::Discover);
        data[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        data[24..28].copy_from_slice(&[10, 0, 1, 1]);

        let request = DhcpPacket::parse(&data).unwrap();
        let reply = DhcpPacket::create_reply(
            &request,
            MessageType::Offer,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 1),
            vec![],
        );

        assert_eq!(reply.giaddr, Ipv4Addr::new(10, 0, 1, 1));
        assert!(reply.is_broadcast());
    }

    #[test]
    fn test_encode_pads_to_minimum() {
        let request = DhcpPacket::parse(&raw_request(MessageType::Discover)).unwrap();
        let reply = DhcpPacket::create_reply(
            &request,
            MessageType::Nak,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(10, 0, 0, 1),
            vec![],
        );
        assert!(reply.encode().len() >= MIN_PACKET_SIZE);
    }

    #[test]
    fn test_pad_options_skipped() {
        let mut data = raw_request(MessageType::Discover);
        // Shift the message type past a run of pad bytes.
        data[240..248].fill(OptionCode::Pad as u8);
        data[248] = OptionCode::MessageType as u8;
        data[249] = 1;
        data[250] = MessageType::Discover as u8;
        data[251] = OptionCode::End as u8;

        let packet = DhcpPacket::parse(&data).unwrap();
        assert_eq!(packet.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_truncated_option_rejected() {
        let mut data = raw_request(MessageType::Discover);
        data.truncate(242);
        data[240] = OptionCode::LeaseTime as u8;
        data[241] = 4;
        assert!(DhcpPacket::parse(&data).is_err());
    }

    #[test]
    fn test_unknown_option_preserved() {
        let mut data = raw_request(MessageType::Discover);
        data[243] = 200;
        data[244] = 4;
        data[245..249].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        data[249] = OptionCode::End as u8;

        let packet = DhcpPacket::parse(&data).unwrap();
        assert!(packet.options.iter().any(
            |opt| matches!(opt, DhcpOption::Unknown(200, d) if d == &[0xde, 0xad, 0xbe, 0xef])
        ));
    }
}
