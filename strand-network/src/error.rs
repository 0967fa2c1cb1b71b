use keynesis::key::ed25519::PublicKey;
use std::{io, net::SocketAddr};
use strand_lib::{identity::KeyDecodingError, AddressError};
use thiserror::Error;

/// errors of [`Transport::dial`] and [`TcpTransport::listen`]
///
/// [`Transport::dial`]: crate::Transport::dial
/// [`TcpTransport::listen`]: crate::TcpTransport::listen
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid peer address")]
    Address(#[from] AddressError),

    #[error("Unsupported transport {0:?}, no fallback transport available")]
    UnsupportedTransport(String),

    #[error("Cannot connect to {address}")]
    Connect {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Timed out connecting to {0}")]
    Timeout(SocketAddr),

    #[error("Cannot listen to {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to negotiate upgrades with {address}")]
    Negotiation {
        address: SocketAddr,
        #[source]
        source: NegotiationError,
    },
}

/// errors while exchanging the negotiation envelopes and running the
/// secure channel handshake
///
/// these are fatal to the connection attempt and never retried
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("I/O error while negotiating the upgrades")]
    Io(#[from] io::Error),

    #[error("Negotiation timed out")]
    Timeout,

    #[error("Invalid negotiation envelope")]
    InvalidEnvelope(#[source] serde_json::Error),

    #[error("The peer agreed on a secure channel but did not send its channel material")]
    MissingChannelMaterial,

    #[error("Invalid channel material")]
    InvalidChannelMaterial(#[from] KeyDecodingError),

    #[error("The peer identified as {received} but the address expects {expected}")]
    IdentityMismatch {
        expected: PublicKey,
        received: PublicKey,
    },

    #[error("Rejecting peer {0}, its identity does not match its channel material")]
    Rejected(PublicKey),

    #[error("Secure channel handshake failed: {0}")]
    Handshake(String),

    #[error("No channel material for the peer")]
    Registry(#[from] RegistryError),
}

/// errors of the [`Connection`] operations
///
/// [`Connection`]: crate::Connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error on the connection")]
    Io(#[from] io::Error),

    #[error("Invalid sealed frame")]
    Sealing(#[from] SealingError),

    #[error("Cannot encode or decode the object")]
    Codec(#[from] serde_json::Error),

    #[error("Frame of {0} bytes is too large")]
    FrameTooLarge(usize),

    #[error("The connection is closed")]
    Closed,
}

/// failure to seal or unseal a frame of the secure channel
///
/// This is not an I/O error: the peer is using a different key, a
/// different protocol or the frame was tampered with.
#[derive(Debug, Error)]
pub enum SealingError {
    #[error("Sealed frame length {0} is out of bounds")]
    InvalidLength(usize),

    #[error("Cannot seal frame: {0}")]
    Seal(String),

    #[error("Cannot unseal frame: {0}")]
    Unseal(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No inbound channel registered for {0}")]
    NotFound(SocketAddr),
}
