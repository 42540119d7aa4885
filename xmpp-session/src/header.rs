// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<stream:stream>` opening tag.

use quick_xml::escape::escape;

use crate::element::ns;

/// Maximum length of a stream identifier we accept from a peer.
const MAX_STREAM_ID_LEN: usize = 1023;

/// Attributes of a `<stream:stream>` opening tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Sending entity
    pub from: Option<String>,

    /// Receiving entity
    pub to: Option<String>,

    /// Stream identifier, assigned by the receiving entity
    pub id: Option<String>,

    /// Protocol version
    pub version: String,

    /// Default language of the stream
    pub lang: Option<String>,
}

impl Default for ProtocolHeader {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            id: None,
            version: "1.0".to_owned(),
            lang: None,
        }
    }
}

impl ProtocolHeader {
    /// Header a client sends to open a stream to `domain`.
    pub fn for_domain(domain: &str) -> Self {
        Self {
            to: Some(domain.to_owned()),
            ..Self::default()
        }
    }

    /// Whether the stream identifier is present and well-formed.
    pub fn has_valid_id(&self) -> bool {
        match self.id {
            Some(ref id) => {
                !id.is_empty()
                    && id.len() <= MAX_STREAM_ID_LEN
                    && !id.chars().any(|c| c.is_whitespace() || c.is_control())
            }
            None => false,
        }
    }

    /// Serialise the opening tag, including the XML declaration.
    pub fn to_xml(&self) -> String {
        let mut out = format!(
            "<?xml version='1.0'?><stream:stream xmlns='{}' xmlns:stream='{}'",
            ns::JABBER_CLIENT,
            ns::STREAM
        );
        let attrs = [
            ("from", self.from.as_deref()),
            ("to", self.to.as_deref()),
            ("id", self.id.as_deref()),
            ("version", Some(self.version.as_str())),
            ("xml:lang", self.lang.as_deref()),
        ];
        for (name, value) in attrs {
            if let Some(value) = value {
                out.push_str(&format!(" {}='{}'", name, escape(value)));
            }
        }
        out.push('>');
        out
    }
}
