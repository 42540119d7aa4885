// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use sasl::client::MechanismError as SaslMechanismError;
use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::str::Utf8Error;

use crate::{jid, minidom, tls::TlsError};

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(IoError),
    /// Error parsing Jabber-Id
    JidParse(jid::Error),
    /// The session finished with an error
    Session(SessionError),
    /// Operation not valid in the current session state
    InvalidState,
    /// TLS setup error
    Tls(TlsError),
    /// XML or schema error
    Parse(ParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::JidParse(e) => write!(fmt, "jid parse error: {}", e),
            Error::Session(e) => write!(fmt, "session error: {}", e),
            Error::InvalidState => write!(fmt, "invalid state"),
            Error::Tls(e) => write!(fmt, "TLS error: {}", e),
            Error::Parse(e) => write!(fmt, "parse error: {}", e),
        }
    }
}

impl StdError for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Error::Session(e)
    }
}

impl From<TlsError> for Error {
    fn from(e: TlsError) -> Self {
        Error::Tls(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

/// Errors raised while turning stream bytes into headers and elements.
#[derive(Debug)]
pub enum ParseError {
    /// Tokenizer error
    Xml(quick_xml::Error),
    /// Tree builder error
    Dom(minidom::Error),
    /// Element bytes were not valid UTF-8
    Utf8(Utf8Error),
    /// The stream header was malformed
    InvalidHeader(&'static str),
    /// A negotiation element did not match its schema
    MalformedElement(&'static str),
    /// A stanza did not match its schema
    Stanza(String),
    /// Too many bytes were buffered without completing an element
    BufferOverflow,
}

impl fmt::Display for ParseError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Xml(e) => write!(fmt, "XML error: {}", e),
            ParseError::Dom(e) => write!(fmt, "XML tree error: {}", e),
            ParseError::Utf8(e) => write!(fmt, "UTF-8 error: {}", e),
            ParseError::InvalidHeader(e) => write!(fmt, "invalid stream header: {}", e),
            ParseError::MalformedElement(e) => write!(fmt, "malformed <{}/>", e),
            ParseError::Stanza(e) => write!(fmt, "invalid stanza: {}", e),
            ParseError::BufferOverflow => write!(fmt, "receive buffer limit exceeded"),
        }
    }
}

impl StdError for ParseError {}

impl From<quick_xml::Error> for ParseError {
    fn from(e: quick_xml::Error) -> Self {
        ParseError::Xml(e)
    }
}

impl From<minidom::Error> for ParseError {
    fn from(e: minidom::Error) -> Self {
        ParseError::Dom(e)
    }
}

impl From<Utf8Error> for ParseError {
    fn from(e: Utf8Error) -> Self {
        ParseError::Utf8(e)
    }
}

/// Failure reported by a session stream.
///
/// These are posted as events rather than returned, since they originate
/// from asynchronous transport or layer activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Reading from the transport failed or it closed unexpectedly
    ConnectionRead,
    /// Writing to the transport failed
    ConnectionWrite,
    /// Incoming bytes could not be parsed
    Parse,
    /// The TLS layer failed
    Tls(String),
    /// The peer presented a certificate which did not verify
    InvalidTlsCertificate(String),
    /// The compression layer failed
    Compression,
}

impl fmt::Display for StreamErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StreamErrorKind::ConnectionRead => write!(fmt, "connection read error"),
            StreamErrorKind::ConnectionWrite => write!(fmt, "connection write error"),
            StreamErrorKind::Parse => write!(fmt, "stream parse error"),
            StreamErrorKind::Tls(e) => write!(fmt, "TLS error: {}", e),
            StreamErrorKind::InvalidTlsCertificate(e) => write!(fmt, "invalid certificate: {}", e),
            StreamErrorKind::Compression => write!(fmt, "compression error"),
        }
    }
}

/// Terminal error a session finished with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The connection broke while reading
    ConnectionRead,
    /// The connection broke while writing
    ConnectionWrite,
    /// TLS handshake failed
    TlsHandshake(String),
    /// Server certificate did not verify
    InvalidTlsCertificate(String),
    /// Received bytes were not a well-formed stream
    StreamParse,
    /// Server answered STARTTLS with `<failure/>`
    TlsNegotiationRefused,
    /// TLS is required by configuration but the stream cannot be encrypted
    TlsNotSupported,
    /// Stream compression failed
    CompressionFailed,
    /// No mechanism offered by the server is usable
    NoSupportedAuthMechanism,
    /// No credentials were supplied
    NoCredentials,
    /// Authentication failed
    AuthenticationFailed(AuthError),
    /// Resource binding failed
    ResourceBind,
    /// Legacy session establishment failed
    SessionStart,
    /// Peer violated XEP-0198 counters
    StreamManagementFailed,
    /// An element arrived which is not valid in the current state
    UnexpectedElement,
    /// `<stream:error/>` received
    StreamError {
        /// Defined condition, e.g. `host-unknown`
        condition: String,
        /// Optional human readable text
        text: Option<String>,
    },
    /// Peer closed the stream
    StreamEnd,
    /// Negotiation did not complete in time
    NegotiationTimeout,
}

impl fmt::Display for SessionError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::ConnectionRead => write!(fmt, "connection read error"),
            SessionError::ConnectionWrite => write!(fmt, "connection write error"),
            SessionError::TlsHandshake(e) => write!(fmt, "TLS handshake failed: {}", e),
            SessionError::InvalidTlsCertificate(e) => {
                write!(fmt, "invalid TLS certificate: {}", e)
            }
            SessionError::StreamParse => write!(fmt, "stream parse error"),
            SessionError::TlsNegotiationRefused => write!(fmt, "server refused STARTTLS"),
            SessionError::TlsNotSupported => write!(fmt, "TLS required but not available"),
            SessionError::CompressionFailed => write!(fmt, "stream compression failed"),
            SessionError::NoSupportedAuthMechanism => {
                write!(fmt, "no supported authentication mechanism")
            }
            SessionError::NoCredentials => write!(fmt, "no credentials supplied"),
            SessionError::AuthenticationFailed(e) => write!(fmt, "authentication failed: {}", e),
            SessionError::ResourceBind => write!(fmt, "resource binding failed"),
            SessionError::SessionStart => write!(fmt, "session start failed"),
            SessionError::StreamManagementFailed => write!(fmt, "stream management failed"),
            SessionError::UnexpectedElement => write!(fmt, "unexpected element"),
            SessionError::StreamError { condition, text } => match text {
                Some(text) => write!(fmt, "stream error {}: {}", condition, text),
                None => write!(fmt, "stream error {}", condition),
            },
            SessionError::StreamEnd => write!(fmt, "stream closed by peer"),
            SessionError::NegotiationTimeout => write!(fmt, "negotiation timed out"),
        }
    }
}

impl StdError for SessionError {}

impl From<StreamErrorKind> for SessionError {
    fn from(e: StreamErrorKind) -> Self {
        match e {
            StreamErrorKind::ConnectionRead => SessionError::ConnectionRead,
            StreamErrorKind::ConnectionWrite => SessionError::ConnectionWrite,
            StreamErrorKind::Parse => SessionError::StreamParse,
            StreamErrorKind::Tls(e) => SessionError::TlsHandshake(e),
            StreamErrorKind::InvalidTlsCertificate(e) => SessionError::InvalidTlsCertificate(e),
            StreamErrorKind::Compression => SessionError::CompressionFailed,
        }
    }
}

/// Authentication error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Local SASL implementation error
    Sasl(String),
    /// Failure from server, with its defined condition
    Fail(String),
    /// The server's final message did not prove knowledge of the password
    ServerVerification,
}

impl StdError for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::Sasl(s) => write!(fmt, "local SASL implementation error: {}", s),
            AuthError::Fail(c) => write!(fmt, "failure from the server: {}", c),
            AuthError::ServerVerification => write!(fmt, "server signature mismatch"),
        }
    }
}

impl From<SaslMechanismError> for AuthError {
    fn from(e: SaslMechanismError) -> Self {
        AuthError::Sasl(e.to_string())
    }
}
