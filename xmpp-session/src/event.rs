// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use rand::{thread_rng, Rng};
use xmpp_parsers::{iq::Iq, message::Message, presence::Presence};

use crate::error::{ParseError, SessionError};
use crate::{jid::Jid, minidom::Element};

pub(crate) fn make_id() -> String {
    let id: u64 = thread_rng().gen();
    format!("{}", id)
}

/// A stanza sent/received over the stream.
#[derive(Debug, Clone)]
pub enum Stanza {
    /// IQ stanza
    Iq(Iq),

    /// Message stanza
    Message(Message),

    /// Presence stanza
    Presence(Presence),
}

impl Stanza {
    /// Assign a random ID to the stanza, if no ID has been assigned yet.
    pub fn ensure_id(&mut self) -> &str {
        match self {
            Self::Iq(iq) => {
                if iq.id.is_empty() {
                    iq.id = make_id();
                }
                &iq.id
            }
            Self::Message(message) => message.id.get_or_insert_with(make_id),
            Self::Presence(presence) => presence.id.get_or_insert_with(make_id),
        }
    }

    /// The stanza's ID, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Iq(iq) => Some(iq.id.as_str()).filter(|id| !id.is_empty()),
            Self::Message(message) => message.id.as_deref(),
            Self::Presence(presence) => presence.id.as_deref(),
        }
    }

    /// Sender of the stanza.
    pub fn from(&self) -> Option<&Jid> {
        match self {
            Self::Iq(iq) => iq.from.as_ref(),
            Self::Message(message) => message.from.as_ref(),
            Self::Presence(presence) => presence.from.as_ref(),
        }
    }

    /// Whether `elem` has the name of a stanza.
    pub(crate) fn is_stanza(elem: &Element) -> bool {
        matches!(elem.name(), "iq" | "message" | "presence")
            && elem.ns() == xmpp_parsers::ns::DEFAULT_NS
    }
}

impl TryFrom<Element> for Stanza {
    type Error = ParseError;

    fn try_from(elem: Element) -> Result<Self, ParseError> {
        match elem.name() {
            "iq" => Iq::try_from(elem)
                .map(Stanza::Iq)
                .map_err(|e| ParseError::Stanza(e.to_string())),
            "message" => Message::try_from(elem)
                .map(Stanza::Message)
                .map_err(|e| ParseError::Stanza(e.to_string())),
            "presence" => Presence::try_from(elem)
                .map(Stanza::Presence)
                .map_err(|e| ParseError::Stanza(e.to_string())),
            _ => Err(ParseError::MalformedElement("stanza")),
        }
    }
}

impl From<Stanza> for Element {
    fn from(other: Stanza) -> Self {
        match other {
            Stanza::Iq(st) => st.into(),
            Stanza::Message(st) => st.into(),
            Stanza::Presence(st) => st.into(),
        }
    }
}

impl From<Iq> for Stanza {
    fn from(other: Iq) -> Self {
        Self::Iq(other)
    }
}

impl From<Presence> for Stanza {
    fn from(other: Presence) -> Self {
        Self::Presence(other)
    }
}

impl From<Message> for Stanza {
    fn from(other: Message) -> Self {
        Self::Message(other)
    }
}

impl TryFrom<Stanza> for Message {
    type Error = Stanza;

    fn try_from(other: Stanza) -> Result<Self, Self::Error> {
        match other {
            Stanza::Message(st) => Ok(st),
            other => Err(other),
        }
    }
}

impl TryFrom<Stanza> for Presence {
    type Error = Stanza;

    fn try_from(other: Stanza) -> Result<Self, Self::Error> {
        match other {
            Stanza::Presence(st) => Ok(st),
            other => Err(other),
        }
    }
}

impl TryFrom<Stanza> for Iq {
    type Error = Stanza;

    fn try_from(other: Stanza) -> Result<Self, Self::Error> {
        match other {
            Stanza::Iq(st) => Ok(st),
            other => Err(other),
        }
    }
}

/// Handle returned when registering a listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of callbacks for one kind of notification.
///
/// Listeners are invoked synchronously, in registration order.
pub struct Listeners<T: ?Sized> {
    next_id: u64,
    slots: Vec<(ListenerId, Box<dyn FnMut(&T)>)>,
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            slots: Vec::new(),
        }
    }
}

impl<T: ?Sized> Listeners<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn connect<F: FnMut(&T) + 'static>(&mut self, f: F) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.slots.push((id, Box::new(f)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn disconnect(&mut self, id: ListenerId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot, _)| *slot != id);
        self.slots.len() != before
    }

    /// Invoke every listener with `value`.
    pub fn emit(&mut self, value: &T) {
        for (_, f) in self.slots.iter_mut() {
            f(value);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// High-level event emitted by [`Client`][`crate::Client`]
#[derive(Debug)]
pub enum ClientEvent {
    /// The session is established and stanzas can be exchanged
    Connected {
        /// Server-set Jabber-Id for your session
        ///
        /// This may turn out to be a different JID resource than
        /// expected, so use this one instead of the JID with which
        /// the connection was setup.
        bound_jid: Jid,
    },
    /// Credentials are needed to continue authenticating
    NeedCredentials,
    /// Received stanza
    Stanza(Stanza),
    /// The server confirmed reception of a stanza we sent
    StanzaAcked(Stanza),
    /// The session finished, with the error if it was not a clean shutdown
    SessionFinished(Option<SessionError>),
    /// The connection is gone
    Disconnected(Option<SessionError>),
}

impl ClientEvent {
    /// `Connected` event?
    pub fn is_connected(&self) -> bool {
        matches!(self, ClientEvent::Connected { .. })
    }

    /// Get the server-assigned JID for the `Connected` event
    pub fn get_jid(&self) -> Option<&Jid> {
        match *self {
            ClientEvent::Connected { ref bound_jid } => Some(bound_jid),
            _ => None,
        }
    }

    /// If this is a `Stanza` event, get its data
    pub fn as_stanza(&self) -> Option<&Stanza> {
        match *self {
            ClientEvent::Stanza(ref stanza) => Some(stanza),
            _ => None,
        }
    }

    /// If this is a `Stanza` event, unwrap into its data
    pub fn into_stanza(self) -> Option<Stanza> {
        match self {
            ClientEvent::Stanza(stanza) => Some(stanza),
            _ => None,
        }
    }
}
