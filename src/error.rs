//! Error types returned by this crate's public API.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while establishing or using a coupling
/// connection.
#[derive(Debug, Error)]
pub enum Error {
    /// A [`crate::Config`] value was inconsistent with the role being bound.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The connect/accept handshake failed or reported inconsistent state.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// The underlying socket failed while sending or receiving a frame.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation was attempted on a communicator in the wrong state,
    /// or addressed to a rank that does not exist.
    #[error("precondition violated: {0}")]
    Precondition(String),
}
