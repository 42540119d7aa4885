// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sans-IO TLS contexts.
//!
//! A [`TlsContext`] consumes and produces TLS records as byte buffers; it
//! never touches a socket. The [`TlsLayer`][`crate::stack::TlsLayer`] wraps
//! one to put it into the layer stack after STARTTLS.

use std::error::Error as StdError;
use std::fmt;

#[cfg(feature = "tls-rust")]
mod rustls;
#[cfg(feature = "tls-rust")]
pub use self::rustls::RustlsContextFactory;

#[cfg(test)]
pub(crate) mod testing;

/// TLS failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsError {
    /// The configuration could not be built
    Config(String),
    /// The server name is not a valid DNS name
    InvalidServerName(String),
    /// The peer's certificate did not verify
    InvalidCertificate(String),
    /// Any other protocol failure
    Handshake(String),
}

impl fmt::Display for TlsError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TlsError::Config(e) => write!(fmt, "TLS configuration error: {}", e),
            TlsError::InvalidServerName(e) => write!(fmt, "invalid server name: {}", e),
            TlsError::InvalidCertificate(e) => write!(fmt, "invalid certificate: {}", e),
            TlsError::Handshake(e) => write!(fmt, "TLS failure: {}", e),
        }
    }
}

impl StdError for TlsError {}

/// Result of feeding records into a [`TlsContext`].
#[derive(Debug, Default)]
pub struct TlsOutput {
    /// Records to send to the peer
    pub to_peer: Vec<u8>,
    /// Decrypted application data
    pub plaintext: Vec<u8>,
    /// The handshake completed during this call
    pub handshake_completed: bool,
}

/// Client side of one TLS connection.
pub trait TlsContext {
    /// Begin the handshake, returning the records to send.
    fn connect(&mut self) -> Result<Vec<u8>, TlsError>;

    /// Process records received from the peer.
    fn handle_data_read(&mut self, data: &[u8]) -> Result<TlsOutput, TlsError>;

    /// Encrypt application data, returning the records to send.
    fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Whether the handshake is done.
    fn is_handshake_complete(&self) -> bool;
}

/// Produces [`TlsContext`]s for new connections.
pub trait TlsContextFactory {
    /// Create a context verifying the peer as `server_name`.
    fn create_context(&self, server_name: &str) -> Result<Box<dyn TlsContext>, TlsError>;
}
