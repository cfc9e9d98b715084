//! Export the messages of a POP3 mailbox into `.eml` files.
//!
//! The crate has two layers. The lower one is a small blocking POP3 client ([`Client`],
//! [`Session`], [`ClientBuilder`]) speaking the RFC 1939 commands an exporter needs. The upper
//! one is the export driver ([`export::Exporter`]), which walks a mailbox under an
//! [`ExportPolicy`](export::ExportPolicy), names every message from its headers
//! ([`naming::NameSynthesizer`]), writes it to a [`FileStore`](store::FileStore) and remembers
//! what it exported in an [`ExportLedger`](ledger::ExportLedger).
//!
//! # Usage
//!
//! Talking to a server directly:
//!
//! ```no_run
//! # fn main() -> Result<(), export_mail::Error> {
//! let client = export_mail::ClientBuilder::new("pop.example.com", 995).connect()?;
//!
//! // the client we have here is unauthenticated.
//! // to do anything useful with the maildrop, we need to log in
//! let mut session = client
//!     .login("me@example.com", "password")
//!     .map_err(|e| e.0)?;
//!
//! let stat = session.stat()?;
//! println!("{}", stat);
//! for msg in session.uidl(None)? {
//!     let raw = session.retr(msg.index)?;
//!     println!("{}: {} bytes", msg, raw.len());
//! }
//!
//! // be nice to the server and log out
//! session.quit()?;
//! # Ok(())
//! # }
//! ```
//!
//! Exporting a whole mailbox:
//!
//! ```no_run
//! use export_mail::config::{ExportConfig, Limit};
//! use export_mail::export::Exporter;
//! use export_mail::mailbox::Pop3Mailbox;
//! use export_mail::store::FsStore;
//!
//! # fn main() -> Result<(), export_mail::Error> {
//! let mut config = ExportConfig::new("pop.example.com");
//! config.output_dir = "backup".into();
//! config.limit = Limit::from(100);
//! let summary = Exporter::new(Pop3Mailbox::new("me", "password"), FsStore, config).run()?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```
//!
//! ## Opting out of `native_tls`
//!
//! Without the default `native-tls` feature only [`ConnectionMode::Plain`] can be used with
//! [`ClientBuilder::connect`]. Other TLS stacks can still be plugged in through
//! [`ClientBuilder::connect_with`].

mod parse;
mod utils;

pub mod types;

mod client_builder;
pub use client_builder::{ClientBuilder, ConnectionMode};

mod conn;
pub use conn::Connection;

pub mod client;
pub use client::{Client, Session};

pub mod error;
pub use error::{Error, Result};

pub use types::*;

pub mod codec;
pub mod config;
pub mod export;
pub mod ledger;
pub mod mailbox;
pub mod naming;
pub mod store;

#[cfg(any(test, feature = "test_helpers"))]
pub mod testing;

#[cfg(test)]
mod mock_stream;
