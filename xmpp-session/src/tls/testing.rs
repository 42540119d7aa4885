// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::{TlsContext, TlsContextFactory, TlsError, TlsOutput};

/// Handshake completes on the first record received; "encryption"
/// prefixes data with `E:`. Records starting with `BAD` fail
/// certificate verification.
#[derive(Default)]
pub(crate) struct FakeTls {
    connected: bool,
}

impl TlsContext for FakeTls {
    fn connect(&mut self) -> Result<Vec<u8>, TlsError> {
        Ok(b"HELLO".to_vec())
    }

    fn handle_data_read(&mut self, data: &[u8]) -> Result<TlsOutput, TlsError> {
        if data.starts_with(b"BAD") {
            return Err(TlsError::InvalidCertificate("untrusted".to_owned()));
        }
        let mut output = TlsOutput::default();
        if !self.connected {
            self.connected = true;
            output.handshake_completed = true;
            output.to_peer = b"FINISHED".to_vec();
            return Ok(output);
        }
        output.plaintext = data.strip_prefix(b"E:").unwrap_or(data).to_vec();
        Ok(output)
    }

    fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut out = b"E:".to_vec();
        out.extend_from_slice(data);
        Ok(out)
    }

    fn is_handshake_complete(&self) -> bool {
        self.connected
    }
}

pub(crate) struct FakeTlsFactory;

impl TlsContextFactory for FakeTlsFactory {
    fn create_context(&self, _server_name: &str) -> Result<Box<dyn TlsContext>, TlsError> {
        Ok(Box::new(FakeTls::default()))
    }
}
