// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Event-driven [XMPP](https://xmpp.org/) client sessions.
//!
//! The crate negotiates a client-to-server stream (STARTTLS, stream
//! compression, SASL authentication, resource binding, session
//! establishment and stream management) and then exchanges stanzas over
//! it. It does no I/O on its own: a [`connect::Transport`] moves bytes,
//! timers come from a [`timer::TimerFactory`], and everything they report
//! is fed back in order as [`connect::Input`].
//!
//! # Getting started
//!
//! Most users want a [`Client`]. Create one, hand it a connected
//! transport such as [`connect::TcpTransport`], then route every input the
//! transport and the timers post into [`Client::handle_input`] and drain
//! [`Client::poll_event`]. The `echo_bot` demo in the repository shows a
//! complete event loop on tokio.
//!
//! # Layers
//!
//! - [`xmlstream`]: incremental parser and serializer for the XML stream
//! - [`stack`]: byte layers between the transport and the parser (TLS,
//!   zlib compression, whitespace keepalive)
//! - [`sessionstream`]: the stream a session talks to
//! - [`session`]: the negotiation state machine
//! - [`channel`]: id assignment, IQ tracking and stanza dispatch
//!
//! # Features
//!
//! - `tls-rust` (default): STARTTLS with rustls and the webpki roots.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod channel;
mod client;
pub use client::Client;
pub mod config;
pub use config::{ClientOptions, Timeouts, UseTls};
pub mod connect;
pub mod element;
pub mod features;
pub mod header;
pub mod session;
pub mod sessionstream;
pub mod stack;
pub mod timer;
pub mod tls;
pub mod xmlstream;

mod event;
pub use event::{ClientEvent, ListenerId, Listeners, Stanza};

/// Detailed error types
pub mod error;

#[doc(inline)]
/// Generic xmpp-session Error
pub use crate::error::Error;

// Re-exports
pub use jid;
pub use minidom;
pub use xmpp_parsers as parsers;
