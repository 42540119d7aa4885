// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Session options.

use core::time::Duration;

/// Whether the session encrypts the stream with STARTTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseTls {
    /// Never negotiate TLS, even if offered.
    Never,
    /// Negotiate TLS when the server offers it.
    #[default]
    Optional,
    /// Fail the session if the stream cannot be encrypted.
    Required,
}

/// Configuration for timeouts on a session.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Maximum time from `start()` until the session is ready for stanzas.
    pub negotiation: Duration,

    /// Interval between whitespace keepalives once the session is
    /// established.
    pub whitespace_ping: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            negotiation: Duration::new(60, 0),
            whitespace_ping: Duration::new(60, 0),
        }
    }
}

impl Timeouts {
    /// Tight timeouts suitable for communicating on a fast LAN or localhost.
    pub fn tight() -> Self {
        Self {
            negotiation: Duration::new(5, 0),
            whitespace_ping: Duration::new(2, 0),
        }
    }
}

/// Options influencing negotiation of a [`ClientSession`][`crate::session::ClientSession`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TLS policy
    pub use_tls: UseTls,

    /// Negotiate zlib stream compression (XEP-0138) when offered.
    pub use_stream_compression: bool,

    /// Permit the PLAIN mechanism on a stream which is not encrypted.
    /// On by default; turn it off to require TLS before sending a password
    /// in the clear.
    pub allow_plain_without_tls: bool,

    /// Enable stream management acknowledgements (XEP-0198) when offered.
    pub use_stream_management: bool,

    /// Timeouts
    pub timeouts: Timeouts,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            use_tls: UseTls::Optional,
            use_stream_compression: true,
            allow_plain_without_tls: true,
            use_stream_management: true,
            timeouts: Timeouts::default(),
        }
    }
}

impl ClientOptions {
    /// Set the TLS policy.
    pub fn with_tls(mut self, use_tls: UseTls) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Enable or disable stream compression.
    pub fn with_stream_compression(mut self, enabled: bool) -> Self {
        self.use_stream_compression = enabled;
        self
    }

    /// Allow or forbid PLAIN over cleartext.
    pub fn with_plain_without_tls(mut self, allowed: bool) -> Self {
        self.allow_plain_without_tls = allowed;
        self
    }

    /// Enable or disable stream management.
    pub fn with_stream_management(mut self, enabled: bool) -> Self {
        self.use_stream_management = enabled;
        self
    }

    /// Replace the timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}
