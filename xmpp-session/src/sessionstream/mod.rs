// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Session streams
//!
//! A [`SessionStream`] is what the [`ClientSession`][`crate::session::ClientSession`]
//! talks to: it writes headers, elements and footers, can be asked to
//! switch on TLS or compression, and reports what it receives as
//! [`SessionStreamEvent`]s.
//!
//! [`BasicSessionStream`] is the implementation over a [`Transport`][`crate::connect::Transport`],
//! a [`LayerStack`][`crate::stack::LayerStack`] and an [`XmppParser`][`crate::xmlstream::XmppParser`].

use crate::element::StreamElement;
use crate::error::StreamErrorKind;
use crate::header::ProtocolHeader;
use crate::timer::TimerKind;

mod basic;
pub use basic::BasicSessionStream;

/// Something received or observed on a session stream.
#[derive(Debug)]
pub enum SessionStreamEvent {
    /// The peer opened its stream
    StreamStart(ProtocolHeader),
    /// A complete first-level element
    Element(StreamElement),
    /// The peer closed its stream
    StreamEnd,
    /// The TLS handshake completed
    TlsEncrypted,
    /// The stream failed
    Error(StreamErrorKind),
    /// The transport closed
    Closed,
}

/// The stream a session negotiates over.
///
/// Failures are never returned from the write methods; they surface as
/// [`SessionStreamEvent::Error`] on a later [`SessionStream::poll_event`].
pub trait SessionStream {
    /// Whether the transport is still usable.
    fn is_open(&self) -> bool;

    /// Open a new outgoing stream.
    fn write_header(&mut self, header: &ProtocolHeader);

    /// Send a first-level element.
    fn write_element(&mut self, element: StreamElement);

    /// Close the outgoing stream.
    fn write_footer(&mut self);

    /// Whether TLS can be added to this stream.
    fn supports_tls_encryption(&self) -> bool;

    /// Insert a TLS layer and start the handshake.
    ///
    /// Completion is signalled with [`SessionStreamEvent::TlsEncrypted`].
    fn add_tls_encryption(&mut self);

    /// Whether the TLS handshake completed.
    fn is_tls_encrypted(&self) -> bool;

    /// Whether zlib compression can be added to this stream.
    fn supports_zlib_compression(&self) -> bool;

    /// Insert a zlib compression layer.
    fn add_zlib_compression(&mut self);

    /// Enable or disable whitespace keepalives.
    fn set_whitespace_ping_enabled(&mut self, enabled: bool);

    /// Forget any partially parsed input; the next bytes start a new
    /// document.
    fn reset_xmpp_parser(&mut self);

    /// Deliver an expired timer owned by the stream.
    fn handle_timer(&mut self, _kind: TimerKind) {}

    /// Next pending event, if any.
    fn poll_event(&mut self) -> Option<SessionStreamEvent>;

    /// Close the transport.
    fn close(&mut self);
}
