// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! First-level stream elements.
//!
//! Every element exchanged directly below `<stream:stream>` is represented
//! by one variant of [`StreamElement`]. SASL and stream management payloads
//! are the [`xmpp_parsers`] types; the STARTTLS, compression and stream
//! error elements are built here. Conversion from and to
//! [`minidom::Element`] is a single table keyed on (namespace, name).

use core::fmt;

use xmpp_parsers::{sasl, sm};

use crate::error::ParseError;
use crate::event::Stanza;
use crate::features::StreamFeatures;
use crate::minidom::Element;

/// Namespaces of the negotiation elements.
pub mod ns {
    pub use xmpp_parsers::ns::{BIND, JABBER_CLIENT, SASL, SM, STREAM, TLS};

    /// Stream error conditions
    pub const STREAM_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
    /// RFC 3921 session establishment
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    /// XEP-0138 stream feature
    pub const COMPRESS_FEATURE: &str = "http://jabber.org/features/compress";
    /// XEP-0138 negotiation
    pub const COMPRESS: &str = "http://jabber.org/protocol/compress";
}

/// A first-level element of an XMPP stream.
#[derive(Debug, Clone)]
pub enum StreamElement {
    /// `<stream:features/>`
    Features(StreamFeatures),
    /// `<starttls/>` request
    StartTls,
    /// `<proceed/>` answer to STARTTLS
    TlsProceed,
    /// `<failure/>` answer to STARTTLS
    TlsFailure,
    /// `<compress/>` request
    Compress {
        /// Requested method
        method: String,
    },
    /// `<compressed/>` answer
    Compressed,
    /// `<failure/>` answer to `<compress/>`
    CompressFailure {
        /// Condition element name, if any
        condition: Option<String>,
    },
    /// SASL `<auth/>`. An empty initial response goes out as `=`.
    Auth(sasl::Auth),
    /// SASL `<challenge/>`
    Challenge(sasl::Challenge),
    /// SASL `<response/>`
    Response(sasl::Response),
    /// SASL `<success/>` with additional data
    Success(sasl::Success),
    /// SASL `<failure/>`
    AuthFailure(sasl::Failure),
    /// XEP-0198 `<enable/>`
    SmEnable(sm::Enable),
    /// XEP-0198 `<enabled/>`
    SmEnabled(sm::Enabled),
    /// XEP-0198 `<failed/>`
    SmFailed(sm::Failed),
    /// XEP-0198 `<r/>`
    SmRequest,
    /// XEP-0198 `<a/>`
    SmAck(sm::A),
    /// `<stream:error/>`
    StreamError {
        /// Defined condition
        condition: String,
        /// Optional text
        text: Option<String>,
    },
    /// Message, presence or IQ
    Stanza(Stanza),
    /// Anything else, including stanzas which failed to parse
    Unknown(Element),
}

impl From<Stanza> for StreamElement {
    fn from(other: Stanza) -> Self {
        Self::Stanza(other)
    }
}

/// Name of the defined condition of a SASL `<failure/>`.
pub fn sasl_condition(failure: &sasl::Failure) -> String {
    Element::from(failure.defined_condition.clone())
        .name()
        .to_owned()
}

/// Convert with an [`xmpp_parsers`] type, reporting schema violations as
/// [`ParseError::MalformedElement`].
fn parse_with<T>(elem: Element, name: &'static str) -> Result<T, ParseError>
where
    T: TryFrom<Element>,
    T::Error: fmt::Display,
{
    T::try_from(elem).map_err(|e| {
        log::debug!("Invalid <{}/>: {}", name, e);
        ParseError::MalformedElement(name)
    })
}

/// RFC 6120 marks an empty SASL payload as `=`, which is not base64.
fn sasl_payload(elem: Element) -> Element {
    if elem.text().trim() == "=" {
        let mut builder = Element::builder(elem.name(), ns::SASL);
        for (name, value) in elem.attrs() {
            builder = builder.attr(name, value);
        }
        builder.build()
    } else {
        elem
    }
}

/// Name of the first child element in `namespace` other than `<text/>`.
fn condition_of(elem: &Element, namespace: &str) -> Option<String> {
    elem.children()
        .find(|c| c.ns() == namespace && c.name() != "text")
        .map(|c| c.name().to_owned())
}

impl TryFrom<Element> for StreamElement {
    type Error = ParseError;

    fn try_from(elem: Element) -> Result<Self, ParseError> {
        let namespace = elem.ns();
        let name = elem.name().to_owned();
        let element = match (namespace.as_str(), name.as_str()) {
            (ns::STREAM, "features") => Self::Features(StreamFeatures::from_element(&elem)),
            (ns::STREAM, "error") => Self::StreamError {
                condition: condition_of(&elem, ns::STREAM_ERRORS)
                    .unwrap_or_else(|| "undefined-condition".to_owned()),
                text: elem
                    .get_child("text", ns::STREAM_ERRORS)
                    .map(|t| t.text()),
            },
            (ns::TLS, "starttls") => Self::StartTls,
            (ns::TLS, "proceed") => Self::TlsProceed,
            (ns::TLS, "failure") => Self::TlsFailure,
            (ns::COMPRESS, "compress") => Self::Compress {
                method: elem
                    .get_child("method", ns::COMPRESS)
                    .map(|m| m.text())
                    .ok_or(ParseError::MalformedElement("compress"))?,
            },
            (ns::COMPRESS, "compressed") => Self::Compressed,
            (ns::COMPRESS, "failure") => Self::CompressFailure {
                condition: condition_of(&elem, ns::COMPRESS),
            },
            (ns::SASL, "auth") => Self::Auth(parse_with(sasl_payload(elem), "auth")?),
            (ns::SASL, "challenge") => {
                Self::Challenge(parse_with(sasl_payload(elem), "challenge")?)
            }
            (ns::SASL, "response") => Self::Response(parse_with(sasl_payload(elem), "response")?),
            (ns::SASL, "success") => Self::Success(parse_with(sasl_payload(elem), "success")?),
            (ns::SASL, "failure") => Self::AuthFailure(parse_with(elem, "failure")?),
            (ns::SM, "enable") => Self::SmEnable(parse_with(elem, "enable")?),
            (ns::SM, "enabled") => Self::SmEnabled(parse_with(elem, "enabled")?),
            (ns::SM, "failed") => Self::SmFailed(parse_with(elem, "failed")?),
            (ns::SM, "r") => {
                parse_with::<sm::R>(elem, "r")?;
                Self::SmRequest
            }
            (ns::SM, "a") => Self::SmAck(parse_with(elem, "a")?),
            _ if Stanza::is_stanza(&elem) => match Stanza::try_from(elem.clone()) {
                Ok(stanza) => Self::Stanza(stanza),
                Err(e) => {
                    log::warn!("Ignoring malformed <{}/> stanza: {}", name, e);
                    Self::Unknown(elem)
                }
            },
            _ => Self::Unknown(elem),
        };
        Ok(element)
    }
}

fn condition_element(name: &str, namespace: &str, condition: Option<String>) -> Element {
    Element::builder(name, namespace)
        .append_all(condition.map(|c| Element::builder(c, namespace).build()))
        .build()
}

impl From<StreamElement> for Element {
    fn from(other: StreamElement) -> Element {
        match other {
            StreamElement::Features(features) => features.into(),
            StreamElement::StartTls => Element::builder("starttls", ns::TLS).build(),
            StreamElement::TlsProceed => Element::builder("proceed", ns::TLS).build(),
            StreamElement::TlsFailure => Element::builder("failure", ns::TLS).build(),
            StreamElement::Compress { method } => Element::builder("compress", ns::COMPRESS)
                .append(Element::builder("method", ns::COMPRESS).append(method).build())
                .build(),
            StreamElement::Compressed => Element::builder("compressed", ns::COMPRESS).build(),
            StreamElement::CompressFailure { condition } => {
                condition_element("failure", ns::COMPRESS, condition)
            }
            StreamElement::Auth(auth) => {
                let empty = auth.data.is_empty();
                let mut elem = Element::from(auth);
                if empty {
                    elem.append_text_node("=");
                }
                elem
            }
            StreamElement::Challenge(challenge) => challenge.into(),
            StreamElement::Response(response) => response.into(),
            StreamElement::Success(success) => success.into(),
            StreamElement::AuthFailure(failure) => failure.into(),
            StreamElement::SmEnable(enable) => enable.into(),
            StreamElement::SmEnabled(enabled) => enabled.into(),
            StreamElement::SmFailed(failed) => failed.into(),
            StreamElement::SmRequest => sm::R.into(),
            StreamElement::SmAck(ack) => ack.into(),
            StreamElement::StreamError { condition, text } => {
                Element::builder("error", ns::STREAM)
                    .append(Element::builder(condition, ns::STREAM_ERRORS).build())
                    .append_all(
                        text.map(|t| Element::builder("text", ns::STREAM_ERRORS).append(t).build()),
                    )
                    .build()
            }
            StreamElement::Stanza(stanza) => stanza.into(),
            StreamElement::Unknown(elem) => elem,
        }
    }
}
