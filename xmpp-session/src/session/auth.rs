// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use sasl::client::mechanisms::{Anonymous, Plain, Scram};
use sasl::client::Mechanism;
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::Credentials;
use xmpp_parsers::sasl as sasl_elements;

use crate::error::AuthError;
use crate::jid::Jid;

/// SASL mechanisms this crate can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismKind {
    /// `SCRAM-SHA-256`
    ScramSha256,
    /// `SCRAM-SHA-1`
    ScramSha1,
    /// `PLAIN`
    Plain,
    /// `ANONYMOUS`
    Anonymous,
}

impl MechanismKind {
    /// Mechanisms from most to least preferred. The first one the server
    /// also offers wins, regardless of the server's own order.
    pub const PREFERENCE: [MechanismKind; 4] = [
        MechanismKind::ScramSha256,
        MechanismKind::ScramSha1,
        MechanismKind::Plain,
        MechanismKind::Anonymous,
    ];

    /// SASL name of the mechanism.
    pub fn name(self) -> &'static str {
        match self {
            MechanismKind::ScramSha256 => "SCRAM-SHA-256",
            MechanismKind::ScramSha1 => "SCRAM-SHA-1",
            MechanismKind::Plain => "PLAIN",
            MechanismKind::Anonymous => "ANONYMOUS",
        }
    }

    /// The mechanism as named in `<auth/>`.
    pub(crate) fn element_mechanism(self) -> sasl_elements::Mechanism {
        match self {
            MechanismKind::ScramSha256 => sasl_elements::Mechanism::ScramSha256,
            MechanismKind::ScramSha1 => sasl_elements::Mechanism::ScramSha1,
            MechanismKind::Plain => sasl_elements::Mechanism::Plain,
            MechanismKind::Anonymous => sasl_elements::Mechanism::Anonymous,
        }
    }

    /// Whether a password must be obtained before authenticating.
    pub fn needs_credentials(self) -> bool {
        self != MechanismKind::Anonymous
    }
}

/// Pick a mechanism among those `offered`.
///
/// A JID without local part only ever authenticates anonymously, and one
/// with a local part never does. PLAIN is skipped on a cleartext stream
/// unless `allow_plain` is set.
pub(super) fn select_mechanism(
    offered: &[String],
    has_node: bool,
    encrypted: bool,
    allow_plain: bool,
) -> Option<MechanismKind> {
    MechanismKind::PREFERENCE.into_iter().find(|kind| {
        let usable = match kind {
            MechanismKind::Anonymous => !has_node,
            MechanismKind::Plain => has_node && (encrypted || allow_plain),
            MechanismKind::ScramSha256 | MechanismKind::ScramSha1 => has_node,
        };
        usable && offered.iter().any(|name| name == kind.name())
    })
}

/// Instantiate the client side of `kind`.
pub(super) fn create_mechanism(
    kind: MechanismKind,
    jid: &Jid,
    password: &str,
) -> Result<Box<dyn Mechanism>, AuthError> {
    if kind == MechanismKind::Anonymous {
        return Ok(Box::new(Anonymous::new()));
    }
    let username = jid
        .node()
        .map(|node| node.as_str().to_owned())
        .ok_or_else(|| AuthError::Sasl("no username".to_owned()))?;
    let creds = Credentials::default()
        .with_username(username)
        .with_password(password);
    Ok(match kind {
        MechanismKind::ScramSha256 => Box::new(Scram::<Sha256>::from_credentials(creds)?),
        MechanismKind::ScramSha1 => Box::new(Scram::<Sha1>::from_credentials(creds)?),
        MechanismKind::Plain => Box::new(Plain::from_credentials(creds)?),
        MechanismKind::Anonymous => Box::new(Anonymous::new()),
    })
}
