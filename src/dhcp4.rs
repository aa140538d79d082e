//! DHCPv4 negotiation against the static inventory.
//!
//! There is no dynamic pool: a client either has a binding in the Book or
//! it gets nothing. DISCOVER from a known hardware address is answered
//! with an OFFER of its bound address; REQUEST is acknowledged only when
//! the requested address matches the binding, otherwise the client is
//! NAKed and the mismatch is reported on the error stream. Release,
//! Decline, and Inform carry no state to update and are only logged.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use rand::seq::SliceRandom;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::book::{Book, HardwareAddr, V4Network};
use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType, OptionCode};
use crate::packet::{BOOTREQUEST, DhcpPacket};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// Pause between rebind attempts after a socket failure, so a persistent
/// fault does not spin the task.
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Stateless negotiation logic for one managed network.
///
/// Split from the socket loop so every protocol decision is testable
/// without I/O: [`handle`](Self::handle) maps a request to an optional
/// reply against a Book snapshot. Only the network's name is held here;
/// its settings are resolved from the passed-in Book on every packet so
/// a reloaded Book takes effect wholesale, never mixed with old state.
pub struct Dhcp4Handler {
    network: String,
    errors: mpsc::UnboundedSender<Error>,
}

impl Dhcp4Handler {
    pub fn new(network: String, errors: mpsc::UnboundedSender<Error>) -> Self {
        Self { network, errors }
    }

    /// Produces the reply for one request, or `None` when the packet
    /// should be silently dropped.
    pub fn handle(&self, book: &Book, request: &DhcpPacket) -> Option<DhcpPacket> {
        if request.op != BOOTREQUEST {
            return None;
        }
        let Some(network) = book.v4_networks.get(&self.network) else {
            // Reload keeps the network set fixed, so this is a bug.
            warn!(network = %self.network, "network missing from current book, dropping request");
            return None;
        };
        let Some(hardware) = request.hardware() else {
            debug!(network = %self.network, "dropping non-Ethernet request");
            return None;
        };
        let Some(message_type) = request.message_type() else {
            // Plain BOOTP carries no message type; not served here.
            debug!(network = %self.network, client = %hardware, "dropping BOOTP request");
            return None;
        };

        info!(network = %self.network, client = %hardware, "{message_type}");

        match message_type {
            MessageType::Discover => self.handle_discover(network, book, request, hardware),
            MessageType::Request => self.handle_request(network, book, request, hardware),
            MessageType::Release | MessageType::Decline | MessageType::Inform => {
                // Nothing to release or mark: bindings are static.
                info!(network = %self.network, client = %hardware, "ignoring {message_type}");
                None
            }
            MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                warn!(network = %self.network, client = %hardware,
                    "dropping server-side {message_type} on request port");
                None
            }
        }
    }

    fn handle_discover(
        &self,
        network: &V4Network,
        book: &Book,
        request: &DhcpPacket,
        hardware: HardwareAddr,
    ) -> Option<DhcpPacket> {
        let Some(bound) = book.lookup_ip_for_hardware(hardware) else {
            info!(network = %self.network, client = %hardware, "no binding, not offering");
            return None;
        };

        let options = filter_by_prl(reply_options(network), request.parameter_request_list());
        let offer = DhcpPacket::create_reply(
            request,
            MessageType::Offer,
            bound,
            network.my_address,
            options,
        );
        info!(network = %self.network, client = %hardware, address = %bound, "OFFER");
        Some(offer)
    }

    fn handle_request(
        &self,
        network: &V4Network,
        book: &Book,
        request: &DhcpPacket,
        hardware: HardwareAddr,
    ) -> Option<DhcpPacket> {
        if let Some(server_id) = request.server_identifier()
            && server_id != network.my_address
        {
            info!(network = %self.network, client = %hardware, server = %server_id,
                "REQUEST is for another server");
            return None;
        }

        let requested = request.requested_ip().or_else(|| {
            (request.ciaddr != Ipv4Addr::UNSPECIFIED).then_some(request.ciaddr)
        });
        let bound = book.lookup_ip_for_hardware(hardware);

        match (bound, requested) {
            (Some(bound), Some(requested)) if bound == requested => {
                let options =
                    filter_by_prl(reply_options(network), request.parameter_request_list());
                let ack = DhcpPacket::create_reply(
                    request,
                    MessageType::Ack,
                    bound,
                    network.my_address,
                    options,
                );
                info!(network = %self.network, client = %hardware, address = %bound, "ACK");
                Some(ack)
            }
            (bound, requested) => {
                let _ = self.errors.send(Error::WrongAddressRequested {
                    network: self.network.clone(),
                    sname: request.server_name(),
                    hardware,
                    requested,
                    expected: bound,
                });
                let nak = DhcpPacket::create_reply(
                    request,
                    MessageType::Nak,
                    Ipv4Addr::UNSPECIFIED,
                    network.my_address,
                    vec![DhcpOption::ServerIdentifier(network.my_address)],
                );
                warn!(network = %self.network, client = %hardware, "NAK");
                Some(nak)
            }
        }
    }
}

/// Options for OFFER and ACK. Nameservers are shuffled per reply so
/// clients spread their queries.
fn reply_options(network: &V4Network) -> Vec<DhcpOption> {
    let lease_secs = network.lease_duration.as_secs().min(u64::from(u32::MAX)) as u32;
    let mut options = vec![
        DhcpOption::ServerIdentifier(network.my_address),
        DhcpOption::LeaseTime(lease_secs),
        DhcpOption::SubnetMask(network.subnet.mask()),
    ];
    if let Some(gateway) = network.gateway {
        options.push(DhcpOption::Router(vec![gateway]));
    }
    if !network.name_servers.is_empty() {
        let mut servers = network.name_servers.clone();
        servers.shuffle(&mut rand::thread_rng());
        options.push(DhcpOption::DnsServer(servers));
    }
    options
}

/// Drops options the client did not ask for. Message type, server
/// identifier, and lease time are always kept.
fn filter_by_prl(
    options: Vec<DhcpOption>,
    parameter_request_list: Option<&[u8]>,
) -> Vec<DhcpOption> {
    let Some(prl) = parameter_request_list else {
        return options;
    };
    options
        .into_iter()
        .filter(|opt| {
            let code = opt.option_code();
            code == OptionCode::MessageType as u8
                || code == OptionCode::ServerIdentifier as u8
                || code == OptionCode::LeaseTime as u8
                || prl.contains(&code)
        })
        .collect()
}

/// Where a reply goes, per RFC 2131 §4.1: relayed packets return through
/// the relay on the server port, NAKs and broadcast requests are
/// broadcast, everything else unicasts to ciaddr.
pub(crate) fn reply_destination(request: &DhcpPacket, reply: &DhcpPacket) -> SocketAddr {
    let is_nak = reply.message_type() == Some(MessageType::Nak);

    if request.giaddr != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(request.giaddr), DHCP_SERVER_PORT)
    } else if is_nak || request.is_broadcast() || request.ciaddr == Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
    } else {
        SocketAddr::new(IpAddr::V4(request.ciaddr), DHCP_CLIENT_PORT)
    }
}

/// The UDP listener for one network's DHCP endpoint.
pub struct Dhcp4Server {
    handler: Dhcp4Handler,
    listen: SocketAddr,
    network_name: String,
    book: watch::Receiver<Arc<Book>>,
    errors: mpsc::UnboundedSender<Error>,
    shutdown: watch::Receiver<bool>,
}

impl Dhcp4Server {
    pub fn new(
        network: String,
        listen: SocketAddr,
        book: watch::Receiver<Arc<Book>>,
        errors: mpsc::UnboundedSender<Error>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handler: Dhcp4Handler::new(network.clone(), errors.clone()),
            listen,
            network_name: network,
            book,
            errors,
            shutdown,
        }
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::Dhcp4 {
            network: self.network_name.clone(),
            source,
        }
    }

    /// DHCP needs SO_BROADCAST and a non-blocking socket handed to tokio;
    /// plain `UdpSocket::bind` cannot express that.
    fn create_socket(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| self.io_error(e))?;
        socket.set_reuse_address(true).map_err(|e| self.io_error(e))?;
        socket.set_broadcast(true).map_err(|e| self.io_error(e))?;
        socket.set_nonblocking(true).map_err(|e| self.io_error(e))?;

        let bind_addr = match self.listen {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, addr.port()),
        };
        socket.bind(&bind_addr.into()).map_err(|e| self.io_error(e))?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| self.io_error(e))
    }

    /// Serves until shutdown. Socket failures are pushed onto the error
    /// stream and the listener rebinds and carries on; only shutdown
    /// ends the task.
    pub async fn run(mut self) {
        while !*self.shutdown.borrow() {
            match self.serve().await {
                Ok(()) => {
                    info!(network = %self.network_name, "dhcp4 stopped");
                    return;
                }
                Err(error) => {
                    let _ = self.errors.send(error);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// One bind-and-serve cycle. Returns `Ok(())` on shutdown and the
    /// socket error otherwise; malformed packets are only logged.
    async fn serve(&mut self) -> Result<()> {
        let socket = self.create_socket()?;
        info!(network = %self.network_name, listen = %self.listen, "dhcp4 listening");
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buffer) => {
                    let (size, source) = result.map_err(|e| self.io_error(e))?;
                    let request = match DhcpPacket::parse(&buffer[..size]) {
                        Ok(packet) => packet,
                        Err(error) => {
                            warn!(network = %self.network_name, %source, "bad packet: {error}");
                            continue;
                        }
                    };

                    let book = self.book.borrow().clone();
                    if let Some(reply) = self.handler.handle(&book, &request) {
                        let destination = reply_destination(&request, &reply);
                        socket
                            .send_to(&reply.encode(), destination)
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
