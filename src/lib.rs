//! # hostbook
//!
//! DHCPv4 and DNS for a small, statically inventoried network.
//!
//! The whole daemon is driven by a single JSON inventory of networks and
//! machines, compiled and validated into an immutable [`Book`]. DHCP
//! hands out only the addresses the Book binds to hardware addresses,
//! and DNS answers A queries from the same inventory, falling back to
//! the host resolver for everything else.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hostbook::{Book, Config, Server, SystemNetifs};
//!
//! #[tokio::main]
//! async fn main() -> hostbook::Result<()> {
//!     let config = Config::load("config.json")?;
//!     let book = Book::from_config(&config, &SystemNetifs)?;
//!     let (mut server, _errors) = Server::from_book(book);
//!     server.start();
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - the JSON inventory document
//! - [`Book`] - the compiled, validated snapshot everything serves from
//! - [`Server`] - spawns and supervises the DNS and DHCP listeners
//! - [`DhcpPacket`] / [`DhcpOption`] - RFC 2131/2132 wire handling
//! - [`dns`] - RFC 1035 query parsing and A-record resolution

pub mod book;
pub mod config;
pub mod dhcp4;
pub mod dns;
pub mod error;
pub mod netif;
pub mod options;
pub mod packet;
pub mod server;

pub use book::{Book, HardwareAddr};
pub use config::Config;
pub use error::{Error, Result};
pub use netif::{NetifSource, SystemNetifs};
pub use options::{DhcpOption, MessageType};
pub use packet::DhcpPacket;
pub use server::Server;
