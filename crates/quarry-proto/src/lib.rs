//! Quarry Proto - wire vocabulary shared by every logic node.
//!
//! Logic nodes exchange exactly one [`NodeMessage`] per UDP datagram. The
//! message carries a [`MessageKind`] discriminant and kind-specific optional
//! fields. Before a message touches the socket it is wrapped by an
//! [`Envelope`], and every received datagram is unwrapped by the same
//! envelope type, so causal metadata stays symmetric across the mesh.
//!
//! # Example
//!
//! ```
//! use quarry_proto::{Coord, Envelope, MessageKind, NodeMessage, PlainEnvelope};
//!
//! let msg = NodeMessage::new(MessageKind::Move, "7", "127.0.0.1:9000")
//!     .with_coord(Coord::new(3, 4))
//!     .with_seq(1);
//! let envelope = PlainEnvelope;
//! let bytes = envelope.wrap(&msg).unwrap();
//! assert_eq!(envelope.unwrap(&bytes).unwrap(), msg);
//! ```

pub mod envelope;
pub mod error;
pub mod message;
pub mod types;

pub use envelope::{CausalEnvelope, Envelope, PlainEnvelope, VectorClock};
pub use error::{Error, Result};
pub use message::{MessageKind, NodeMessage, Recipient};
pub use types::{Coord, GameState, MoveCommit, PREY_IDENTIFIER};

/// Upper bound on a single datagram, envelope metadata included.
pub const MAX_DATAGRAM_SIZE: usize = 2048;
