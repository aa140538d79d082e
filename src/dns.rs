//! DNS A-record resolution over UDP, RFC 1035 by hand.
//!
//! The wire format here is deliberately minimal: parse standard queries,
//! answer A/IN questions, emit compression pointers back at each
//! question's name. Names found in the Book are answered with the local
//! TTL; everything else falls through to the host resolver and gets the
//! global TTL. Queries from addresses outside the permitted networks are
//! dropped without a reply.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::book::Book;
use crate::error::{Error, Result};

const DNS_HEADER_SIZE: usize = 12;
const RECV_BUFFER_SIZE: usize = 4096;

/// Pause between rebind attempts after a socket failure.
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// A record: IPv4 host address.
pub const QTYPE_A: u16 = 1;
/// IN class.
pub const QCLASS_IN: u16 = 1;

/// One question from the query's question section.
#[derive(Debug, Clone)]
pub struct Question {
    /// Lowercased labels joined with dots, no trailing root dot.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Byte offset of the QNAME in the original packet, used to emit a
    /// compression pointer in the answer.
    pub name_offset: u16,
}

/// A parsed DNS query.
#[derive(Debug)]
pub struct DnsQuery {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    /// Where the question section ends, so responses can echo it.
    pub question_end: usize,
}

impl DnsQuery {
    /// Parses a query packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] for short packets, responses
    /// (QR=1), compressed or oversized labels, and truncated questions.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < DNS_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "dns packet too short: {} bytes",
                packet.len()
            )));
        }

        let id = u16::from_be_bytes([packet[0], packet[1]]);
        let flags = u16::from_be_bytes([packet[2], packet[3]]);
        let qdcount = u16::from_be_bytes([packet[4], packet[5]]);

        if (flags >> 15) & 1 != 0 {
            return Err(Error::InvalidPacket("dns packet is a response".to_string()));
        }

        let mut pos = DNS_HEADER_SIZE;
        // qdcount is attacker-controlled; size the vec as we go.
        let mut questions = Vec::new();

        for _ in 0..qdcount {
            let name_offset = pos as u16;
            let mut labels: Vec<String> = Vec::new();

            loop {
                let label_len = *packet
                    .get(pos)
                    .ok_or_else(|| Error::InvalidPacket("qname truncated".to_string()))?
                    as usize;
                pos += 1;

                if label_len == 0 {
                    break;
                }
                // Compression pointers never appear in queries we serve.
                if label_len > 63 {
                    return Err(Error::InvalidPacket(format!(
                        "bad label length {label_len}"
                    )));
                }
                let label = packet
                    .get(pos..pos + label_len)
                    .ok_or_else(|| Error::InvalidPacket("label truncated".to_string()))?;
                labels.push(String::from_utf8_lossy(label).to_ascii_lowercase());
                pos += label_len;
            }

            let tail = packet
                .get(pos..pos + 4)
                .ok_or_else(|| Error::InvalidPacket("question truncated".to_string()))?;
            let qtype = u16::from_be_bytes([tail[0], tail[1]]);
            let qclass = u16::from_be_bytes([tail[2], tail[3]]);
            pos += 4;

            questions.push(Question {
                name: labels.join("."),
                qtype,
                qclass,
                name_offset,
            });
        }

        Ok(Self {
            id,
            flags,
            questions,
            question_end: pos,
        })
    }

    /// Opcode bits from the flags word. 0 is a standard query.
    pub fn opcode(&self) -> u16 {
        (self.flags >> 11) & 0xF
    }
}

/// One resolved answer, tied back to its question's name.
#[derive(Debug, Clone, Copy)]
pub struct Answer {
    pub name_offset: u16,
    pub address: Ipv4Addr,
    pub ttl: u32,
}

/// Builds a response echoing the query's question section, with one A
/// record per answer. Answer names are compression pointers into the
/// echoed section.
pub fn build_response(packet: &[u8], query: &DnsQuery, answers: &[Answer]) -> Vec<u8> {
    let mut resp = Vec::with_capacity(query.question_end + answers.len() * 16);

    resp.extend_from_slice(&query.id.to_be_bytes());
    let rd = (query.flags >> 8) & 1;
    // QR=1, AA=1, RD echoed, RA=1.
    let flags: u16 = 0x8000 | 0x0400 | (rd << 8) | 0x0080;
    resp.extend_from_slice(&flags.to_be_bytes());
    resp.extend_from_slice(&(query.questions.len() as u16).to_be_bytes());
    resp.extend_from_slice(&(answers.len() as u16).to_be_bytes());
    resp.extend_from_slice(&0u16.to_be_bytes());
    resp.extend_from_slice(&0u16.to_be_bytes());

    resp.extend_from_slice(&packet[DNS_HEADER_SIZE..query.question_end]);

    for answer in answers {
        resp.extend_from_slice(&(0xC000 | answer.name_offset).to_be_bytes());
        resp.extend_from_slice(&QTYPE_A.to_be_bytes());
        resp.extend_from_slice(&QCLASS_IN.to_be_bytes());
        resp.extend_from_slice(&answer.ttl.to_be_bytes());
        resp.extend_from_slice(&4u16.to_be_bytes());
        resp.extend_from_slice(&answer.address.octets());
    }

    resp
}

/// True when the source address belongs to one of the networks the Book
/// permits to query.
pub fn source_permitted(book: &Book, source: IpAddr) -> bool {
    let IpAddr::V4(source) = source else {
        return false;
    };
    book.dns.networks.iter().any(|name| {
        book.v4_networks
            .get(name)
            .is_some_and(|network| network.subnet.contains(source))
    })
}

/// Resolves every A/IN question in the query against the Book, falling
/// back to the host resolver for names the Book does not carry.
///
/// Returns `None` when no reply should be sent at all (non-QUERY
/// opcodes). Questions that cannot be answered are simply omitted.
pub async fn resolve(book: &Book, packet: &[u8], query: &DnsQuery) -> Option<Vec<u8>> {
    if query.opcode() != 0 {
        warn!(opcode = query.opcode(), "unsupported dns opcode, not replying");
        return None;
    }

    let mut answers = Vec::with_capacity(query.questions.len());
    for question in &query.questions {
        if question.qtype != QTYPE_A || question.qclass != QCLASS_IN {
            warn!(
                name = %question.name, qtype = question.qtype,
                "skipping unsupported question type"
            );
            continue;
        }

        if let Some(address) = book.lookup_ip_for_fqdn(&question.name) {
            info!(name = %question.name, %address, "answered from book");
            answers.push(Answer {
                name_offset: question.name_offset,
                address,
                ttl: book.dns.local_ttl,
            });
            continue;
        }

        let addresses = lookup_external(&question.name).await;
        if addresses.is_empty() {
            warn!(name = %question.name, "no answer");
            continue;
        }
        info!(name = %question.name, count = addresses.len(), "answered from resolver");
        for address in addresses {
            answers.push(Answer {
                name_offset: question.name_offset,
                address,
                ttl: book.dns.global_ttl,
            });
        }
    }

    Some(build_response(packet, query, &answers))
}

/// Asks the host resolver, keeping every IPv4 address it returns.
async fn lookup_external(name: &str) -> Vec<Ipv4Addr> {
    let host = name.trim_end_matches('.');
    match tokio::net::lookup_host((host, 0u16)).await {
        Ok(addrs) => addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .collect(),
        Err(error) => {
            debug!(name = %host, "external lookup failed: {error}");
            Vec::new()
        }
    }
}

/// The UDP listener answering DNS queries.
pub struct DnsServer {
    listen: SocketAddr,
    book: watch::Receiver<Arc<Book>>,
    errors: mpsc::UnboundedSender<Error>,
    shutdown: watch::Receiver<bool>,
}

impl DnsServer {
    pub fn new(
        listen: SocketAddr,
        book: watch::Receiver<Arc<Book>>,
        errors: mpsc::UnboundedSender<Error>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listen,
            book,
            errors,
            shutdown,
        }
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::Dns {
            listen: self.listen,
            source,
        }
    }

    /// Serves until shutdown, rebinding after socket failures the same
    /// way the DHCP listeners do.
    pub async fn run(mut self) {
        while !*self.shutdown.borrow() {
            match self.serve().await {
                Ok(()) => {
                    info!(listen = %self.listen, "dns stopped");
                    return;
                }
                Err(error) => {
                    let _ = self.errors.send(error);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn serve(&mut self) -> Result<()> {
        let socket = UdpSocket::bind(self.listen)
            .await
            .map_err(|e| self.io_error(e))?;

        info!(listen = %self.listen, "dns listening");
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buffer) => {
                    let (size, source) = result.map_err(|e| self.io_error(e))?;

                    let book = self.book.borrow().clone();
                    if !source_permitted(&book, source.ip()) {
                        warn!(%source, "dns query from unpermitted source");
                        continue;
                    }

                    let packet = &buffer[..size];
                    let query = match DnsQuery::parse(packet) {
                        Ok(query) => query,
                        Err(error) => {
                            warn!(%source, "bad dns packet: {error}");
                            continue;
                        }
                    };

                    if let Some(response) = resolve(&book, packet, &query).await {
                        socket
                            .send_to(&response, source)
                            .await
                            .map_err(|e| self.io_error(e))?;
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
