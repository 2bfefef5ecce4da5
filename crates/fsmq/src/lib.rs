//! fsmq — a message-queue transport backed entirely by the filesystem
//!
//! A directory is a queue, a file is a message. Producers write uniquely
//! named `{uuid}.{type}` files; subscribers watch the directory, replay any
//! backlog already on disk, and claim each file with read-then-delete
//! semantics. The atomic delete arbitrates between competing subscribers —
//! even across processes — so every message is delivered to exactly one
//! winner.
//!
//! This crate is the transport core only. Serialization, endpoint addressing,
//! and failure policy belong to the hosting engine; request-reply and
//! temporary destinations are explicitly unsupported and error out.
//!
//! ```no_run
//! use fsmq::{BinaryMessage, JailStrategy, Transport};
//!
//! let transport = Transport::new(JailStrategy::Fixed("session-1".into()), |err| {
//!     eprintln!("transport failure: {err}");
//! });
//! let group = transport.create_processing_group(|_| {})?;
//!
//! let subscription = group.subscribe(
//!     "/var/queues/orders",
//!     |msg| println!("got {} byte(s) of {}", msg.bytes.len(), msg.type_tag),
//!     Some("order"),
//! )?;
//!
//! group.send(
//!     "/var/queues/orders",
//!     &BinaryMessage::new(b"payload".to_vec(), "order"),
//!     None,
//! )?;
//!
//! subscription.dispose();
//! transport.dispose();
//! # Ok::<(), fsmq::TransportError>(())
//! ```

pub mod error;
pub mod group;
pub mod logging;
pub mod message;
pub mod transport;
pub mod watch;

pub use error::TransportError;
pub use group::{FailureHandler, ProcessingGroup, Subscription};
pub use message::{BinaryMessage, Destination};
pub use transport::{JailStrategy, Transport};
pub use watch::MessageFilter;
