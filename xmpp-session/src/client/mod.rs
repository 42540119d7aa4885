// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::rc::Rc;

use xmpp_parsers::{message::Message, presence::Presence};

use crate::channel::{IqRequest, IqResponse, StanzaChannel};
use crate::config::ClientOptions;
use crate::connect::{Input, Transport};
use crate::error::{Error, SessionError};
use crate::event::{ClientEvent, ListenerId, Listeners, Stanza};
use crate::jid::Jid;
use crate::session::{ClientSession, SessionEvent};
use crate::sessionstream::BasicSessionStream;
use crate::timer::TimerFactory;
use crate::tls::TlsContextFactory;


/// XMPP client connection and state
///
/// The client does no I/O of its own. Hand it a connected [`Transport`]
/// with [`connect`][`Client::connect`], then feed it every [`Input`] the
/// transport and the timers post, in order, through
/// [`handle_input`][`Client::handle_input`]. What happens is reported both
/// to registered listeners and as [`ClientEvent`]s from
/// [`poll_event`][`Client::poll_event`].
///
/// Listeners run synchronously while an input is handled and cannot call
/// back into the client; anything that needs to act on the client, like
/// answering [`ClientEvent::NeedCredentials`], goes through the polled
/// events.
pub struct Client<T: Transport> {
    jid: Jid,
    password: Option<String>,
    options: ClientOptions,
    timer_factory: Rc<dyn TimerFactory>,
    tls_factory: Option<Rc<dyn TlsContextFactory>>,
    channel: StanzaChannel<BasicSessionStream<T>>,
    events: VecDeque<ClientEvent>,
    on_connected: Listeners<Jid>,
    on_disconnected: Listeners<Option<SessionError>>,
    on_need_credentials: Listeners<()>,
    on_stanza_acked: Listeners<Stanza>,
    on_session_finished: Listeners<Option<SessionError>>,
}

impl<T: Transport> Client<T> {
    /// Create a client for `jid`.
    ///
    /// If `password` is given, it is supplied automatically whenever the
    /// server asks for credentials. Streams are encrypted with rustls
    /// when the `tls-rust` feature is enabled; see
    /// [`with_tls_factory`][`Client::with_tls_factory`] to change that.
    pub fn new(
        jid: Jid,
        password: Option<String>,
        options: ClientOptions,
        timer_factory: Rc<dyn TimerFactory>,
    ) -> Self {
        Self {
            jid,
            password,
            options,
            timer_factory,
            tls_factory: default_tls_factory(),
            channel: StanzaChannel::new(),
            events: VecDeque::new(),
            on_connected: Listeners::new(),
            on_disconnected: Listeners::new(),
            on_need_credentials: Listeners::new(),
            on_stanza_acked: Listeners::new(),
            on_session_finished: Listeners::new(),
        }
    }

    /// Replace the TLS context factory. `None` disables STARTTLS.
    pub fn with_tls_factory(mut self, factory: Option<Rc<dyn TlsContextFactory>>) -> Self {
        self.tls_factory = factory;
        self
    }

    /// The JID the client was created for.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// Get the client's bound JID (the one reported by the XMPP
    /// server).
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.channel.session().and_then(ClientSession::bound_jid)
    }

    /// Whether a session is running, established or not.
    pub fn is_active(&self) -> bool {
        self.channel.session().is_some()
    }

    /// Whether stanzas can be sent.
    pub fn is_available(&self) -> bool {
        self.channel.is_available()
    }

    /// The running session, if any.
    pub fn session(&self) -> Option<&ClientSession<BasicSessionStream<T>>> {
        self.channel.session()
    }

    /// Start a session over a freshly connected transport.
    ///
    /// Fails with [`Error::InvalidState`] while another session is active.
    pub fn connect(&mut self, transport: T) -> Result<(), Error> {
        if self.is_active() {
            return Err(Error::InvalidState);
        }
        log::debug!("Connecting as {}", self.jid);
        let stream = BasicSessionStream::new(
            transport,
            self.jid.domain().as_str(),
            self.tls_factory.clone(),
            &*self.timer_factory,
            self.options.timeouts.whitespace_ping,
        );
        let mut session = ClientSession::new(
            self.jid.clone(),
            stream,
            self.options.clone(),
            &*self.timer_factory,
        );
        session.start();
        self.channel.set_session(session);
        Ok(())
    }

    /// Close the session cleanly.
    ///
    /// Pending IQ requests are abandoned.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.channel.session_mut() {
            session.finish();
        }
        self.pump();
    }

    /// Process one input posted by the transport or a timer.
    pub fn handle_input(&mut self, input: Input) {
        let Some(session) = self.channel.session_mut() else {
            log::debug!("Dropping input without session: {:?}", input);
            return;
        };
        match input {
            Input::Transport(event) => session.stream_mut().handle_transport_event(event),
            Input::Timer(kind) => session.handle_timer(kind),
        }
        self.pump();
    }

    /// Continue authentication after [`ClientEvent::NeedCredentials`].
    pub fn send_credentials(&mut self, password: &str) -> Result<(), Error> {
        self.channel
            .session_mut()
            .ok_or(Error::InvalidState)?
            .send_credentials(password)?;
        self.pump();
        Ok(())
    }

    /// Send a stanza as is.
    pub fn send_stanza(&mut self, stanza: Stanza) -> Result<(), Error> {
        let result = self.channel.send_stanza(stanza);
        self.pump();
        result
    }

    /// Send a message, assigning an id if it has none. Returns the id.
    pub fn send_message(&mut self, message: Message) -> Result<String, Error> {
        let result = self.channel.send_message(message);
        self.pump();
        result
    }

    /// Send a presence, assigning an id if it has none. Returns the id.
    pub fn send_presence(&mut self, presence: Presence) -> Result<String, Error> {
        let result = self.channel.send_presence(presence);
        self.pump();
        result
    }

    /// Send an IQ request; `callback` receives the response.
    ///
    /// Returns the id of the request. The callback is dropped uncalled if
    /// the session ends first.
    pub fn send_iq<F>(
        &mut self,
        to: Option<Jid>,
        request: IqRequest,
        callback: F,
    ) -> Result<String, Error>
    where
        F: FnOnce(IqResponse) + 'static,
    {
        let result = self.channel.send_iq(to, request, callback);
        self.pump();
        result
    }

    /// Next pending event, if any.
    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Called with the bound JID once the session is established.
    pub fn on_connected<F: FnMut(&Jid) + 'static>(&mut self, f: F) -> ListenerId {
        self.on_connected.connect(f)
    }

    /// Called when the session is gone, with its error if any.
    pub fn on_disconnected<F: FnMut(&Option<SessionError>) + 'static>(
        &mut self,
        f: F,
    ) -> ListenerId {
        self.on_disconnected.connect(f)
    }

    /// Called when credentials are needed and no password was configured.
    pub fn on_need_credentials<F: FnMut(&()) + 'static>(&mut self, f: F) -> ListenerId {
        self.on_need_credentials.connect(f)
    }

    /// Called for every received stanza.
    pub fn on_stanza<F: FnMut(&Stanza) + 'static>(&mut self, f: F) -> ListenerId {
        self.channel.on_stanza(f)
    }

    /// Called when the server acknowledged a stanza we sent.
    pub fn on_stanza_acked<F: FnMut(&Stanza) + 'static>(&mut self, f: F) -> ListenerId {
        self.on_stanza_acked.connect(f)
    }

    /// Called when the session finished, before
    /// [`on_disconnected`][`Client::on_disconnected`].
    pub fn on_session_finished<F: FnMut(&Option<SessionError>) + 'static>(
        &mut self,
        f: F,
    ) -> ListenerId {
        self.on_session_finished.connect(f)
    }

    /// Drain the session until it has nothing more to report.
    fn pump(&mut self) {
        loop {
            let Some(session) = self.channel.session_mut() else {
                return;
            };
            session.process_stream_events();
            let Some(event) = session.poll_event() else {
                return;
            };
            self.handle_session_event(event);
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::NeedCredentials => match self.password.clone() {
                Some(password) => {
                    if let Some(session) = self.channel.session_mut() {
                        if let Err(e) = session.send_credentials(&password) {
                            log::warn!("Could not send configured credentials: {}", e);
                        }
                    }
                }
                None => {
                    self.on_need_credentials.emit(&());
                    self.events.push_back(ClientEvent::NeedCredentials);
                }
            },
            SessionEvent::Initialized { bound_jid } => {
                log::debug!("Connected as {}", bound_jid);
                self.on_connected.emit(&bound_jid);
                self.events.push_back(ClientEvent::Connected { bound_jid });
            }
            SessionEvent::StanzaReceived(stanza) => {
                if let Some(stanza) = self.channel.handle_incoming(stanza) {
                    self.events.push_back(ClientEvent::Stanza(stanza));
                }
            }
            SessionEvent::StanzaAcked(stanza) => {
                self.on_stanza_acked.emit(&stanza);
                self.events.push_back(ClientEvent::StanzaAcked(stanza));
            }
            SessionEvent::Finished(error) => {
                self.channel.abandon_pending();
                self.channel.take_session();
                self.on_session_finished.emit(&error);
                self.events
                    .push_back(ClientEvent::SessionFinished(error.clone()));
                self.on_disconnected.emit(&error);
                self.events.push_back(ClientEvent::Disconnected(error));
            }
        }
    }
}

#[cfg(feature = "tls-rust")]
fn default_tls_factory() -> Option<Rc<dyn TlsContextFactory>> {
    match crate::tls::RustlsContextFactory::new() {
        Ok(factory) => Some(Rc::new(factory)),
        Err(e) => {
            log::warn!("TLS unavailable: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "tls-rust"))]
fn default_tls_factory() -> Option<Rc<dyn TlsContextFactory>> {
    None
}
