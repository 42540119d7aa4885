// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use super::{TlsContext, TlsContextFactory, TlsError, TlsOutput};

impl From<rustls::Error> for TlsError {
    fn from(e: rustls::Error) -> Self {
        match e {
            rustls::Error::InvalidCertificate(e) => TlsError::InvalidCertificate(format!("{:?}", e)),
            e => TlsError::Handshake(e.to_string()),
        }
    }
}

impl From<io::Error> for TlsError {
    fn from(e: io::Error) -> Self {
        TlsError::Handshake(e.to_string())
    }
}

/// Creates rustls client connections.
#[derive(Debug, Clone)]
pub struct RustlsContextFactory {
    config: Arc<ClientConfig>,
}

impl RustlsContextFactory {
    /// Factory trusting the `webpki-roots` certificate store.
    pub fn new() -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(Self::with_config(Arc::new(config)))
    }

    /// Factory using a custom configuration.
    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }
}

impl TlsContextFactory for RustlsContextFactory {
    fn create_context(&self, server_name: &str) -> Result<Box<dyn TlsContext>, TlsError> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| TlsError::InvalidServerName(e.to_string()))?;
        let conn = ClientConnection::new(self.config.clone(), name)?;
        Ok(Box::new(RustlsContext {
            conn,
            connected: false,
        }))
    }
}

struct RustlsContext {
    conn: ClientConnection,
    connected: bool,
}

impl RustlsContext {
    fn drain_records(&mut self) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut out)?;
        }
        Ok(out)
    }

    fn drain_plaintext(&mut self, out: &mut Vec<u8>) -> Result<(), TlsError> {
        let mut buf = [0u8; 4096];
        loop {
            match self.conn.reader().read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl TlsContext for RustlsContext {
    fn connect(&mut self) -> Result<Vec<u8>, TlsError> {
        self.drain_records()
    }

    fn handle_data_read(&mut self, data: &[u8]) -> Result<TlsOutput, TlsError> {
        let mut output = TlsOutput::default();
        let mut rd: &[u8] = data;
        while !rd.is_empty() {
            self.conn.read_tls(&mut rd)?;
            if let Err(e) = self.conn.process_new_packets() {
                // Flush the alert describing the failure before giving up.
                let _ = self.drain_records();
                return Err(e.into());
            }
            self.drain_plaintext(&mut output.plaintext)?;
        }
        if !self.connected && !self.conn.is_handshaking() {
            log::debug!("TLS handshake completed");
            self.connected = true;
            output.handshake_completed = true;
        }
        output.to_peer = self.drain_records()?;
        Ok(output)
    }

    fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, TlsError> {
        self.conn.writer().write_all(data)?;
        self.drain_records()
    }

    fn is_handshake_complete(&self) -> bool {
        self.connected
    }
}
