//! Listener orchestration: one DNS task plus one DHCP task per network,
//! all reading the current Book through a watch channel.
//!
//! Reload swaps the Book snapshot in place, but only when the listener
//! topology is unchanged: sockets are bound once at start, so a new Book
//! that adds, removes, or moves a listener is rejected and the running
//! Book stays in effect.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::book::Book;
use crate::dhcp4::Dhcp4Server;
use crate::dns::DnsServer;
use crate::error::{Error, Result};

/// The set of sockets a Book wants bound. Two Books with equal
/// topologies are interchangeable at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Topology {
    dns_listen: Option<SocketAddr>,
    dhcp4_listen: BTreeMap<String, SocketAddr>,
}

impl Topology {
    fn of(book: &Book) -> Self {
        let dhcp4_listen = book
            .v4_networks
            .iter()
            .filter_map(|(name, network)| {
                network.dhcp4_listen.map(|listen| (name.clone(), listen))
            })
            .collect();
        Self {
            dns_listen: book.dns.listen,
            dhcp4_listen,
        }
    }
}

/// Owns the listener tasks and the shared Book snapshot.
pub struct Server {
    topology: Topology,
    book: watch::Sender<Arc<Book>>,
    shutdown: watch::Sender<bool>,
    errors: mpsc::UnboundedSender<Error>,
    handles: Vec<JoinHandle<()>>,
}

impl Server {
    /// Builds a server around a Book and returns it together with the
    /// runtime error stream: socket failures and wrong-address REQUESTs
    /// arrive there, and the caller drains it.
    pub fn from_book(book: Book) -> (Self, mpsc::UnboundedReceiver<Error>) {
        let topology = Topology::of(&book);
        let (book_tx, _) = watch::channel(Arc::new(book));
        let (shutdown_tx, _) = watch::channel(false);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let server = Self {
            topology,
            book: book_tx,
            shutdown: shutdown_tx,
            errors: errors_tx,
            handles: Vec::new(),
        };
        (server, errors_rx)
    }

    /// The Book currently served.
    pub fn current_book(&self) -> Arc<Book> {
        self.book.borrow().clone()
    }

    /// Spawns every listener the Book calls for.
    pub fn start(&mut self) {
        let book = self.current_book();

        if let Some(listen) = book.dns.listen {
            let dns = DnsServer::new(
                listen,
                self.book.subscribe(),
                self.errors.clone(),
                self.shutdown.subscribe(),
            );
            self.handles.push(tokio::spawn(dns.run()));
        }

        for (name, network) in &book.v4_networks {
            if let Some(listen) = network.dhcp4_listen {
                let dhcp = Dhcp4Server::new(
                    name.clone(),
                    listen,
                    self.book.subscribe(),
                    self.errors.clone(),
                    self.shutdown.subscribe(),
                );
                self.handles.push(tokio::spawn(dhcp.run()));
            }
        }

        info!(listeners = self.handles.len(), "server started");
    }

    /// Replaces the served Book when the new one keeps the same listener
    /// topology.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TopologyChanged`] and leaves the current Book in
    /// place when the new Book binds a different set of sockets.
    pub fn reload(&self, book: Book) -> Result<()> {
        let topology = Topology::of(&book);
        if topology != self.topology {
            return Err(Error::TopologyChanged(format!(
                "running {:?} vs reloaded {:?}",
                self.topology, topology
            )));
        }
        self.book.send_replace(Arc::new(book));
        info!("book reloaded");
        Ok(())
    }

    /// Signals shutdown and waits for every listener to exit.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("server stopped");
    }
}
