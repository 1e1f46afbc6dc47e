//! Quarry Transfer - UDP datagram transport
//!
//! Peer traffic between logic nodes is connectionless: one message per
//! datagram, no retransmission at this layer. Reliability, where the game
//! needs it, comes from the ack quorum above.
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_transfer::{TransportConfig, TransportHandle};
//!
//! let transport = TransportHandle::new(TransportConfig {
//!     bind: "0.0.0.0:9000".parse()?,
//!     ..Default::default()
//! })
//! .await?;
//! transport.send_to(peer_addr, &datagram).await?;
//! ```

pub mod transport;

pub use transport::{resolve, TransportConfig, TransportHandle};
