//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async client for the Asterisk Manager Interface,
//! the line-oriented TCP protocol Asterisk exposes for call control and
//! monitoring. The client keeps one long-lived connection to a switch:
//! it logs in on its own, reconnects after the link drops, matches
//! responses to the actions that caused them and hands every other event
//! to registered listeners.
//!
//! # Architecture
//!
//! - [`AmiClient`] (Clone + Send) sends actions and manages listeners from
//!   any task
//! - a background connection task owns the socket and every piece of mutable
//!   state; handles talk to it through a mailbox
//! - listener callbacks run on their own spawned tasks, so a slow or
//!   panicking listener never stalls message processing
//!
//! # Example
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{Action, AmiClient, AmiConfig, AmiError, ListenerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let config = AmiConfig::new("pbx.example.com", "admin", "secret").with_name("pbx1");
//!     let client = AmiClient::start(config)?;
//!     client.wait_ready().await?;
//!
//!     let pong = client.send(Action::ping()).await?;
//!     println!("ping: {:?}", pong.key("ping"));
//!
//!     // List actions resolve once the terminating event arrives.
//!     let peers = client.send(Action::new("SIPpeers")).await?.into_result()?;
//!     for event in peers.events() {
//!         println!("peer {:?}", event.key("objectname"));
//!     }
//!
//!     client
//!         .add_listener(
//!             |_, _, event| event.is("Hangup"),
//!             |source, _, event| {
//!                 println!("[{}] hangup on {:?}", source, event.key("channel"));
//!             },
//!             ListenerOptions::default(),
//!         )
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await.map_err(AmiError::from)?;
//!     client.close().await
//! }
//! ```
//!
//! # Reconnection
//!
//! A lost connection is re-established after
//! [`AmiConfig::reconnect_delay_ms`], forever, until [`AmiClient::close`] is
//! called or every handle is dropped. Actions in flight when the link drops
//! fail with [`AmiError::ConnectionLost`]; they are not replayed.

#[macro_use]
mod macros;

pub mod action;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod headers;
pub mod listener;

pub(crate) mod correlation;
pub(crate) mod protocol;
pub(crate) mod transport;

pub use action::Action;
pub use config::{AmiConfig, TlsConfig};
pub use connection::{AmiClient, ConnectionState};
pub use constants::DEFAULT_AMI_PORT;
pub use error::{AmiError, AmiResult};
pub use event::{Event, Response};
pub use headers::{AmiHeader, EventListMarker, ResponseStatus};
pub use listener::{ListenerCallback, ListenerFilter, ListenerId, ListenerOptions};

/// Re-exported so callers can build a [`TlsConfig`] without pinning a
/// matching rustls version themselves.
pub use tokio_rustls::rustls;
