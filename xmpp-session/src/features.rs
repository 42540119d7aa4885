// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream features advertised by the server.
//!
//! [`StreamFeatures`] is what the session consults after every stream
//! (re)start to pick its next negotiation step.

use xmpp_parsers::sm;

use crate::element::ns;
use crate::minidom::Element;

/// Capabilities advertised by the server in `<stream:features/>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFeatures {
    /// STARTTLS is offered.
    pub starttls: bool,

    /// STARTTLS is offered and marked as mandatory.
    pub starttls_required: bool,

    /// Compression methods, in the order offered.
    pub compression_methods: Vec<String>,

    /// SASL mechanisms, in server preference order.
    pub sasl_mechanisms: Vec<String>,

    /// Resource binding is offered.
    pub bind: bool,

    /// Legacy session establishment is offered.
    pub session: bool,

    /// Legacy session establishment is offered but flagged `<optional/>`.
    pub session_optional: bool,

    /// XEP-0198 stream management is offered.
    pub stream_management: bool,

    /// Features we do not interpret.
    pub others: Vec<Element>,
}

impl StreamFeatures {
    /// Whether `method` is among the offered compression methods.
    pub fn has_compression_method(&self, method: &str) -> bool {
        self.compression_methods.iter().any(|m| m == method)
    }

    /// Whether any SASL mechanism is offered.
    pub fn has_authentication_mechanisms(&self) -> bool {
        !self.sasl_mechanisms.is_empty()
    }

    /// Whether a legacy session must be established after binding.
    pub fn needs_session_start(&self) -> bool {
        self.session && !self.session_optional
    }

    /// Parse a `<stream:features/>` element.
    ///
    /// Malformed optional children are logged and skipped rather than
    /// failing the whole advertisement.
    pub fn from_element(elem: &Element) -> Self {
        let mut features = StreamFeatures::default();
        for child in elem.children() {
            if child.is("starttls", ns::TLS) {
                features.starttls = true;
                features.starttls_required = child.get_child("required", ns::TLS).is_some();
            } else if child.is("compression", ns::COMPRESS_FEATURE) {
                features.compression_methods = child
                    .children()
                    .filter(|m| m.is("method", ns::COMPRESS_FEATURE))
                    .map(|m| m.text().trim().to_owned())
                    .collect();
            } else if child.is("mechanisms", ns::SASL) {
                for mechanism in child.children() {
                    if !mechanism.is("mechanism", ns::SASL) {
                        continue;
                    }
                    let name = mechanism.text().trim().to_owned();
                    if name.is_empty() {
                        log::warn!("Ignoring empty SASL mechanism name in stream features");
                        continue;
                    }
                    features.sasl_mechanisms.push(name);
                }
            } else if child.is("bind", ns::BIND) {
                features.bind = true;
            } else if child.is("session", ns::SESSION) {
                features.session = true;
                features.session_optional = child.get_child("optional", ns::SESSION).is_some();
            } else if child.is("sm", ns::SM) {
                features.stream_management = true;
            } else {
                features.others.push(child.clone());
            }
        }
        features
    }
}

impl From<StreamFeatures> for Element {
    fn from(features: StreamFeatures) -> Element {
        let mut builder = Element::builder("features", ns::STREAM);
        if features.starttls {
            let mut starttls = Element::builder("starttls", ns::TLS);
            if features.starttls_required {
                starttls = starttls.append(Element::builder("required", ns::TLS).build());
            }
            builder = builder.append(starttls.build());
        }
        if !features.compression_methods.is_empty() {
            builder = builder.append(
                Element::builder("compression", ns::COMPRESS_FEATURE)
                    .append_all(features.compression_methods.into_iter().map(|m| {
                        Element::builder("method", ns::COMPRESS_FEATURE)
                            .append(m)
                            .build()
                    }))
                    .build(),
            );
        }
        if !features.sasl_mechanisms.is_empty() {
            builder = builder.append(
                Element::builder("mechanisms", ns::SASL)
                    .append_all(
                        features
                            .sasl_mechanisms
                            .into_iter()
                            .map(|m| Element::builder("mechanism", ns::SASL).append(m).build()),
                    )
                    .build(),
            );
        }
        if features.bind {
            builder = builder.append(Element::builder("bind", ns::BIND).build());
        }
        if features.session {
            let mut session = Element::builder("session", ns::SESSION);
            if features.session_optional {
                session = session.append(Element::builder("optional", ns::SESSION).build());
            }
            builder = builder.append(session.build());
        }
        if features.stream_management {
            builder = builder.append(Element::from(sm::StreamManagement));
        }
        builder.append_all(features.others).build()
    }
}
