//! A rank-addressed TCP communicator for partitioned multi-physics coupling.
//!
//! One participant calls [`Communicator::accept_connection`] and must run a
//! singleton local communicator; the other calls
//! [`Communicator::request_connection`] from however many ranks its own
//! local communicator has. Once connected, both sides exchange typed frames
//! with the `send_*`/`receive_*` family, addressing the other side's ranks
//! directly, or `RankSelector::AnySender` on the acceptor side to take
//! whichever rank has something pending first.

#![forbid(unsafe_code)]

mod codec;
mod communicator;
mod config;
mod connection;
mod error;
mod handshake;
mod query;
mod rank;

pub use communicator::Communicator;
pub use config::{Config, CONNECT_RETRY_INTERVAL, DEFAULT_CONNECT_ATTEMPT_LIMIT};
pub use error::{Error, Result};
pub use rank::RankSelector;
