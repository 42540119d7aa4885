// Copyright (c) 2025 Jonas Schäfer <jonas@zombofant.net>
// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use alloc::collections::BTreeMap;
use core::fmt;
use core::ops::ControlFlow;

use xmpp_parsers::{
    iq::{Iq, IqType},
    stanza_error::StanzaError,
};

use crate::{event::make_id, jid::Jid, minidom::Element};

/// An IQ request payload
pub enum IqRequest {
    /// Payload for a `type="get"` request
    Get(Element),

    /// Payload for a `type="set"` request
    Set(Element),
}

impl From<IqRequest> for IqType {
    fn from(other: IqRequest) -> IqType {
        match other {
            IqRequest::Get(v) => Self::Get(v),
            IqRequest::Set(v) => Self::Set(v),
        }
    }
}

/// An IQ response payload
#[derive(Debug)]
pub enum IqResponse {
    /// Payload for a `type="result"` response.
    Result(Option<Element>),

    /// Payload for a `type="error"` response.
    Error(StanzaError),
}

impl From<IqResponse> for IqType {
    fn from(other: IqResponse) -> IqType {
        match other {
            IqResponse::Result(v) => Self::Result(v),
            IqResponse::Error(v) => Self::Error(v),
        }
    }
}

type IqKey = (Option<Jid>, String);
type IqCallback = Box<dyn FnOnce(IqResponse)>;

/// Utility struct to track IQ responses.
///
/// Every request is keyed by its recipient and id. A response completes
/// the request's callback exactly once; later responses with the same key
/// are not matched anymore.
#[derive(Default)]
pub struct IqResponseTracker {
    map: BTreeMap<IqKey, IqCallback>,
}

impl fmt::Debug for IqResponseTracker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IqResponseTracker")
            .field("pending", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl IqResponseTracker {
    /// Create a new empty response tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests still waiting for a response.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no request is waiting.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Attempt to handle an IQ stanza as IQ response.
    ///
    /// Returns the IQ stanza unharmed if it is not an IQ response matching
    /// any request which is still being tracked. A request sent without
    /// recipient is answered by the account itself, so a response from
    /// `local`'s bare JID or its domain matches it too.
    pub fn handle_iq(&mut self, iq: Iq, local: Option<&Jid>) -> ControlFlow<(), Iq> {
        let payload = match iq.payload {
            IqType::Error(error) => IqResponse::Error(error),
            IqType::Result(result) => IqResponse::Result(result),
            _ => return ControlFlow::Continue(iq),
        };
        let key = (iq.from, iq.id);
        let mut callback = self.map.remove(&key);
        if callback.is_none() && is_own_account(key.0.as_ref(), local) {
            callback = self.map.remove(&(None, key.1.clone()));
        }
        match callback {
            None => {
                log::warn!(
                    "not handling IQ response from {:?} with id {:?}: no active tracker for this tuple",
                    key.0,
                    key.1
                );
                ControlFlow::Continue(Iq {
                    from: key.0,
                    id: key.1,
                    to: iq.to,
                    payload: payload.into(),
                })
            }
            Some(callback) => {
                callback(payload);
                ControlFlow::Break(())
            }
        }
    }

    /// Register a request, assigning it a unique id.
    ///
    /// `callback` runs when the response arrives. It never runs if the
    /// request is abandoned.
    pub fn allocate_iq(
        &mut self,
        to: Option<Jid>,
        req: IqRequest,
        callback: IqCallback,
    ) -> Iq {
        let mut key = (to, make_id());
        while self.map.contains_key(&key) {
            key.1 = make_id();
        }
        self.map.insert(key.clone(), callback);
        Iq {
            from: None,
            to: key.0,
            id: key.1,
            payload: req.into(),
        }
    }

    /// Stop tracking a request whose IQ could not be sent.
    pub(crate) fn remove(&mut self, to: Option<Jid>, id: String) -> bool {
        self.map.remove(&(to, id)).is_some()
    }

    /// Drop every pending request without completing it.
    pub fn abandon_all(&mut self) -> usize {
        let count = self.map.len();
        self.map.clear();
        count
    }
}

fn is_own_account(from: Option<&Jid>, local: Option<&Jid>) -> bool {
    match (from, local) {
        (Some(from), Some(local)) => {
            from.resource().is_none()
                && from.domain() == local.domain()
                && (from.node().is_none() || from.node() == local.node())
        }
        _ => false,
    }
}
