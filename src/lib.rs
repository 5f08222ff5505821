//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async client for Asterisk's Manager Interface,
//! allowing applications to send actions, correlate their responses and
//! react to server events over one long-lived connection.
//!
//! # Architecture
//!
//! Each connection runs on a background task that owns both stream halves:
//! - [`Manager`] (Clone + Send): send actions from any task, register callbacks
//! - [`PendingResponse`]: a future resolving once the action's reply (or the
//!   whole reply list) has arrived
//! - event callbacks run on the connection task, in stream order
//!
//! Lost connections are re-established after `reconnect_delay_ms`; pending
//! actions fail with [`AmiError::ConnectionClosed`] rather than hang.
//!
//! # Examples
//!
//! ## Sending Actions
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{Action, AmiError, Manager, ManagerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let config = ManagerConfig::new("127.0.0.1", 5038).with_credentials("admin", "secret");
//!     let manager = Manager::new(config)?;
//!
//!     if !manager.connect().await || !manager.wait_for_login().await {
//!         eprintln!("could not log in");
//!         return Ok(());
//!     }
//!
//!     let version = manager.send_command("core show version")?.await?;
//!     println!("{:?}", version.first());
//!
//!     // Replies announcing a list are collected until the list completes.
//!     let queues = manager.send_action(Action::new("QueueStatus"))?.await?;
//!     for message in queues.messages() {
//!         println!("{}", message);
//!     }
//!
//!     manager.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Event Callbacks
//!
//! Patterns are globs matched against the whole event name:
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiError, Manager, ManagerConfig, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let manager = Manager::new(ManagerConfig::default().with_credentials("admin", "secret"))?;
//!
//!     manager.register_event("Peer*", |event: &Message, _: &Manager| {
//!         println!("{} is {:?}", event.header("Peer").unwrap_or("?"), event.header("PeerStatus"));
//!         Ok(())
//!     })?;
//!
//!     manager.connect().await;
//!     tokio::signal::ctrl_c().await?;
//!     manager.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Messages
//!
//! ```rust
//! use asterisk_ami_tokio::Message;
//!
//! let message = Message::parse("Response: Success\r\nActionID: 1\r\nPing: Pong").unwrap();
//! assert!(message.is_success());
//! assert_eq!(message.header("ping"), Some("Pong"));
//! ```

#[macro_use]
mod macros;

pub mod action;
pub mod config;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod headers;
pub mod manager;
pub mod message;
pub mod registry;
pub mod transport;

pub mod constants;
pub(crate) mod protocol;

pub use action::{Action, ActionIdGenerator, ActionKind, PendingResponse, Response};
pub use config::ManagerConfig;
pub use connection::{ConnectionStatus, DisconnectReason};
pub use constants::DEFAULT_AMI_PORT;
pub use encoding::{ParseEncodingError, TextEncoding};
pub use error::{AmiError, AmiResult, CallbackError};
pub use headers::{ManagerHeader, ParseManagerHeaderError};
pub use manager::{AuthState, Manager, ManagerBuilder};
pub use message::Message;
pub use registry::{EventCallback, EventRegistry, Registrar};
pub use transport::{AmiStream, BoxedStream, Connector, TcpConnector};
