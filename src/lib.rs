//! Client-side streaming protocol for a remote table/view engine.
//!
//! A [`Connection`] runs one websocket session: it sends the handshake,
//! keeps the session alive with a `"ping"` heartbeat, correlates responses
//! to commands by caller-assigned id, and pairs transferable control frames
//! with the binary frame that follows them.
//!
//! ```no_run
//! # async fn demo() -> tabwire::Result<()> {
//! use tabwire::{Command, Connection, Payload};
//!
//! let conn = Connection::connect("ws://127.0.0.1:8080/websocket").await?;
//! let rows = conn.request(Command::new(1, "table_size").with_field("name", "prices")).await?;
//! if let Payload::Json(value) = rows {
//!     println!("{value}");
//! }
//! conn.terminate().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlator;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;
pub mod reassembler;
pub mod transport;

mod connection;

pub use config::ClientConfig;
pub use connection::{Connection, ConnectionStats};
pub use correlator::{Delivery, Subscription, Waiter};
pub use error::{ClientError, Result};
pub use frames::{Arg, CodecError, Command};
pub use lifecycle::{CloseReason, ConnectionState};
pub use reassembler::{Payload, ProtocolViolation, ReassembledMessage};
