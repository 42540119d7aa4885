// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Byte transports and the inputs they post to the event loop.
//!
//! The session itself never performs I/O. A [`Transport`] accepts bytes to
//! send; everything it observes (received data, failures, closure) is posted
//! as an [`Input`] which the event loop hands to
//! [`Client::handle_input`][`crate::Client::handle_input`], in arrival order.

use std::io;

use bytes::Bytes;

use crate::timer::TimerKind;

pub mod tcp;
pub use tcp::TcpTransport;

/// Failure observed by a transport.
#[derive(Debug)]
pub enum TransportError {
    /// Reading failed
    Read(io::Error),
    /// Writing failed
    Write(io::Error),
}

/// Something a transport observed.
#[derive(Debug)]
pub enum TransportEvent {
    /// Bytes were received
    DataRead(Bytes),
    /// The transport failed and is closed
    Error(TransportError),
    /// The peer closed the connection
    Closed,
}

/// Anything posted to the single event-processing loop.
#[derive(Debug)]
pub enum Input {
    /// Transport activity
    Transport(TransportEvent),
    /// A timer expired
    Timer(TimerKind),
}

/// Byte-oriented duplex connection.
pub trait Transport {
    /// Queue bytes for sending. Failures are reported asynchronously as
    /// [`TransportEvent::Error`].
    fn write(&mut self, data: &[u8]);

    /// Close the connection. No further writes are sent.
    fn close(&mut self);
}
