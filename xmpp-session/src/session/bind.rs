// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use xmpp_parsers::bind::{BindQuery, BindResponse};
use xmpp_parsers::iq::{Iq, IqType};

use crate::element::ns;
use crate::jid::{FullJid, Jid};
use crate::minidom::Element;

pub(super) const BIND_REQ_ID: &str = "session-bind";
pub(super) const SESSION_REQ_ID: &str = "session-start";

/// Bind request asking for the JID's resource, or for any resource.
pub(super) fn bind_request(jid: &Jid) -> Iq {
    let resource = jid.resource().map(|x| x.as_str().to_owned());
    Iq::from_set(BIND_REQ_ID, BindQuery::new(resource))
}

/// Identity assigned by the server.
pub(super) fn parse_bind_response(iq: Iq) -> Result<FullJid, String> {
    match iq.payload {
        IqType::Result(Some(payload)) => BindResponse::try_from(payload)
            .map(FullJid::from)
            .map_err(|e| e.to_string()),
        IqType::Result(None) => Err("Bind response has no payload".to_owned()),
        IqType::Error(error) => Err(format!("{:?}", error.defined_condition)),
        _ => Err("Unexpected IQ type in response to bind request".to_owned()),
    }
}

/// RFC 3921 session establishment request.
pub(super) fn session_request() -> Iq {
    Iq {
        from: None,
        to: None,
        id: SESSION_REQ_ID.to_owned(),
        payload: IqType::Set(Element::builder("session", ns::SESSION).build()),
    }
}

pub(super) fn check_session_response(iq: &Iq) -> Result<(), String> {
    match iq.payload {
        IqType::Result(_) => Ok(()),
        IqType::Error(ref error) => Err(format!("{:?}", error.defined_condition)),
        _ => Err("Unexpected IQ type in response to session request".to_owned()),
    }
}
