// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Stanza channel
//!
//! The [`StanzaChannel`] sits between the application and the active
//! [`ClientSession`]. It assigns ids to outgoing stanzas, keeps track of
//! IQ requests until their response arrives, and dispatches incoming
//! stanzas to the registered listeners.

use core::ops::ControlFlow;

use xmpp_parsers::{message::Message, presence::Presence};

use crate::error::Error;
use crate::event::{ListenerId, Listeners, Stanza};
use crate::jid::Jid;
use crate::session::ClientSession;
use crate::sessionstream::SessionStream;

mod iq;

pub use iq::{IqRequest, IqResponse, IqResponseTracker};

/// Routes stanzas between the application and a session.
pub struct StanzaChannel<S: SessionStream> {
    session: Option<ClientSession<S>>,
    tracker: IqResponseTracker,
    listeners: Listeners<Stanza>,
}

impl<S: SessionStream> Default for StanzaChannel<S> {
    fn default() -> Self {
        Self {
            session: None,
            tracker: IqResponseTracker::new(),
            listeners: Listeners::new(),
        }
    }
}

impl<S: SessionStream> StanzaChannel<S> {
    /// Create a channel without session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the session stanzas are sent over.
    pub fn set_session(&mut self, session: ClientSession<S>) {
        self.session = Some(session);
    }

    /// Detach the session.
    pub fn take_session(&mut self) -> Option<ClientSession<S>> {
        self.session.take()
    }

    /// The attached session.
    pub fn session(&self) -> Option<&ClientSession<S>> {
        self.session.as_ref()
    }

    /// The attached session, mutably.
    pub fn session_mut(&mut self) -> Option<&mut ClientSession<S>> {
        self.session.as_mut()
    }

    /// Whether stanzas can be sent.
    pub fn is_available(&self) -> bool {
        self.session
            .as_ref()
            .map_or(false, ClientSession::is_available)
    }

    /// Number of IQ requests waiting for their response.
    pub fn pending_iq_count(&self) -> usize {
        self.tracker.len()
    }

    /// Send a stanza as is.
    pub fn send_stanza(&mut self, stanza: Stanza) -> Result<(), Error> {
        self.session
            .as_mut()
            .ok_or(Error::InvalidState)?
            .send_stanza(stanza)
    }

    /// Send a message, assigning an id if it has none. Returns the id.
    pub fn send_message(&mut self, message: Message) -> Result<String, Error> {
        self.send_with_id(Stanza::Message(message))
    }

    /// Send a presence, assigning an id if it has none. Returns the id.
    pub fn send_presence(&mut self, presence: Presence) -> Result<String, Error> {
        self.send_with_id(Stanza::Presence(presence))
    }

    fn send_with_id(&mut self, mut stanza: Stanza) -> Result<String, Error> {
        let id = stanza.ensure_id().to_owned();
        self.send_stanza(stanza)?;
        Ok(id)
    }

    /// Send an IQ request and register `callback` for its response.
    ///
    /// Returns the id assigned to the request. If the session finishes
    /// before the response arrives, `callback` is dropped without being
    /// called.
    pub fn send_iq<F>(
        &mut self,
        to: Option<Jid>,
        request: IqRequest,
        callback: F,
    ) -> Result<String, Error>
    where
        F: FnOnce(IqResponse) + 'static,
    {
        if !self.is_available() {
            return Err(Error::InvalidState);
        }
        let iq = self.tracker.allocate_iq(to, request, Box::new(callback));
        let (to, id) = (iq.to.clone(), iq.id.clone());
        if let Err(e) = self.send_stanza(iq.into()) {
            self.tracker.remove(to, id);
            return Err(e);
        }
        Ok(id)
    }

    /// Register a listener for every incoming stanza.
    pub fn on_stanza<F: FnMut(&Stanza) + 'static>(&mut self, f: F) -> ListenerId {
        self.listeners.connect(f)
    }

    /// Remove a listener registered with [`StanzaChannel::on_stanza`].
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.disconnect(id)
    }

    /// Dispatch a stanza received on the session.
    ///
    /// Listeners see every stanza. IQ responses are then handed to the
    /// request they answer; the stanza is returned unless it was consumed
    /// that way.
    pub fn handle_incoming(&mut self, stanza: Stanza) -> Option<Stanza> {
        self.listeners.emit(&stanza);
        let Stanza::Iq(iq) = stanza else {
            return Some(stanza);
        };
        let local = self
            .session
            .as_ref()
            .map(|s| s.bound_jid().unwrap_or_else(|| s.jid()));
        match self.tracker.handle_iq(iq, local) {
            ControlFlow::Break(()) => None,
            ControlFlow::Continue(iq) => Some(Stanza::Iq(iq)),
        }
    }

    /// Forget every pending IQ request. Returns how many there were.
    pub fn abandon_pending(&mut self) -> usize {
        let count = self.tracker.abandon_all();
        if count > 0 {
            log::debug!("Abandoned {} pending IQ requests", count);
        }
        count
    }
}
