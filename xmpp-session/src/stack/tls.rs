// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::any::Any;

use super::{LayerEvent, LayerIo, StreamLayer};
use crate::error::StreamErrorKind;
use crate::tls::{TlsContext, TlsError};

/// Encrypts the stream with a [`TlsContext`].
pub struct TlsLayer {
    context: Box<dyn TlsContext>,
    failed: bool,
}

impl TlsLayer {
    /// Wrap a fresh context.
    pub fn new(context: Box<dyn TlsContext>) -> Self {
        Self {
            context,
            failed: false,
        }
    }

    /// Start the handshake. The returned records go to the transport.
    pub fn connect(&mut self) -> Result<Vec<u8>, TlsError> {
        self.context.connect()
    }

    /// Whether the handshake completed.
    pub fn is_encrypted(&self) -> bool {
        self.context.is_handshake_complete()
    }

    fn fail(&mut self, e: TlsError, io: &mut LayerIo) {
        log::debug!("TLS layer failed: {}", e);
        self.failed = true;
        io.events.push(LayerEvent::Error(e.into()));
    }
}

impl From<TlsError> for StreamErrorKind {
    fn from(e: TlsError) -> Self {
        match e {
            TlsError::InvalidCertificate(e) => StreamErrorKind::InvalidTlsCertificate(e),
            e => StreamErrorKind::Tls(e.to_string()),
        }
    }
}

impl StreamLayer for TlsLayer {
    fn write_data(&mut self, data: &[u8], io: &mut LayerIo) {
        if self.failed {
            return;
        }
        match self.context.encrypt(data) {
            Ok(records) => io.down = records,
            Err(e) => self.fail(e, io),
        }
    }

    fn handle_data_read(&mut self, data: &[u8], io: &mut LayerIo) {
        if self.failed {
            return;
        }
        match self.context.handle_data_read(data) {
            Ok(output) => {
                io.down = output.to_peer;
                io.up = output.plaintext;
                if output.handshake_completed {
                    io.events.push(LayerEvent::TlsConnected);
                }
            }
            Err(e) => self.fail(e, io),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
