// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Client session
//!
//! [`ClientSession`] drives one stream from the opening header to the
//! point where stanzas can flow, and then carries those stanzas. It never
//! blocks: the owner feeds it whatever its [`SessionStream`] reports via
//! [`ClientSession::process_stream_events`], delivers expired timers via
//! [`ClientSession::handle_timer`] and collects [`SessionEvent`]s with
//! [`ClientSession::poll_event`].
//!
//! Negotiation follows a fixed order: TLS, compression, authentication,
//! resource binding, legacy session establishment and stream management.
//! Each step is only taken if the server offers it (and the options allow
//! it); every stream restart reissues the header and waits for fresh
//! features.

use std::collections::VecDeque;

use sasl::client::Mechanism;
use xmpp_parsers::{sasl as sasl_elements, sm};

use crate::config::{ClientOptions, UseTls};
use crate::element::{sasl_condition, StreamElement};
use crate::error::{AuthError, Error, SessionError};
use crate::event::Stanza;
use crate::features::StreamFeatures;
use crate::header::ProtocolHeader;
use crate::jid::Jid;
use crate::sessionstream::{SessionStream, SessionStreamEvent};
use crate::timer::{Timer, TimerFactory, TimerKind};

mod auth;
mod bind;
mod stream_management;

pub use auth::MechanismKind;
use stream_management::SmState;

#[cfg(test)]
mod tests;

/// Negotiation progress of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not started yet
    Initial,
    /// Waiting for the server's header or features
    Negotiating,
    /// STARTTLS requested or TLS handshake running
    Encrypting,
    /// Compression requested
    Compressing,
    /// A mechanism was selected, the password is needed
    WaitingForCredentials,
    /// SASL exchange running
    Authenticating,
    /// Resource bind request sent
    BindingResource,
    /// Legacy session request sent
    StartingSession,
    /// `<enable/>` sent
    EnablingStreamManagement,
    /// Stanzas may be exchanged
    SessionStarted,
    /// Terminal
    Finished,
}

/// Something the owner of a session needs to know about.
#[derive(Debug)]
pub enum SessionEvent {
    /// Call [`ClientSession::send_credentials`] to continue.
    NeedCredentials,
    /// Negotiation completed.
    Initialized {
        /// Identity assigned by the server
        bound_jid: Jid,
    },
    /// A stanza arrived.
    StanzaReceived(Stanza),
    /// The server confirmed receipt of a stanza we sent.
    StanzaAcked(Stanza),
    /// The session is over. `None` for a clean finish.
    Finished(Option<SessionError>),
}

/// XMPP client session state machine.
pub struct ClientSession<S: SessionStream> {
    jid: Jid,
    stream: S,
    options: ClientOptions,
    state: State,
    error: Option<SessionError>,

    /// The header we sent has not been answered yet.
    awaiting_header: bool,
    server_header: Option<ProtocolHeader>,

    compressed: bool,
    authenticated: bool,
    mechanism_kind: Option<MechanismKind>,
    mechanism: Option<Box<dyn Mechanism>>,

    needs_session_start: bool,
    sm_offered: bool,
    bound_jid: Option<Jid>,
    sm: Option<SmState>,

    negotiation_timer: Box<dyn Timer>,
    events: VecDeque<SessionEvent>,
}

impl<S: SessionStream> ClientSession<S> {
    /// Create a session for `jid` over `stream`.
    ///
    /// Nothing is sent until [`ClientSession::start`].
    pub fn new(
        jid: Jid,
        stream: S,
        options: ClientOptions,
        timer_factory: &dyn TimerFactory,
    ) -> Self {
        let negotiation_timer =
            timer_factory.create_timer(TimerKind::Negotiation, options.timeouts.negotiation);
        Self {
            jid,
            stream,
            options,
            state: State::Initial,
            error: None,
            awaiting_header: false,
            server_header: None,
            compressed: false,
            authenticated: false,
            mechanism_kind: None,
            mechanism: None,
            needs_session_start: false,
            sm_offered: false,
            bound_jid: None,
            sm: None,
            negotiation_timer,
            events: VecDeque::new(),
        }
    }

    /// Send the opening header.
    ///
    /// # Panics
    ///
    /// If the session was started before.
    pub fn start(&mut self) {
        assert_eq!(self.state, State::Initial, "session started twice");
        log::debug!("Starting session for {}", self.jid);
        self.state = State::Negotiating;
        self.negotiation_timer.start();
        self.restart_stream();
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The error the session finished with, if any.
    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// Whether stanzas can be sent.
    pub fn is_available(&self) -> bool {
        self.state == State::SessionStarted
    }

    /// Whether the session reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// JID the session was created for.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// Identity assigned by the server, once negotiation completed.
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.bound_jid.as_ref()
    }

    /// Header of the server's current stream.
    pub fn server_header(&self) -> Option<&ProtocolHeader> {
        self.server_header.as_ref()
    }

    /// XEP-0198 resumption id, if the server granted one.
    pub fn stream_management_id(&self) -> Option<&str> {
        self.sm.as_ref().and_then(SmState::resumption_id)
    }

    /// Preferred reconnection location for resumption, if the server gave
    /// one.
    pub fn stream_management_location(&self) -> Option<&str> {
        self.sm.as_ref().and_then(SmState::location)
    }

    /// Whether XEP-0198 acknowledgements are active.
    pub fn is_stream_management_enabled(&self) -> bool {
        self.sm.is_some()
    }

    /// The stream the session runs over.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// The stream the session runs over, mutably.
    ///
    /// Used to deliver transport events to the stream before calling
    /// [`ClientSession::process_stream_events`].
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Next pending event, if any.
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Handle everything the stream has to report.
    pub fn process_stream_events(&mut self) {
        while let Some(event) = self.stream.poll_event() {
            self.handle_stream_event(event);
        }
    }

    /// Continue authentication with the user's password.
    ///
    /// Only valid after [`SessionEvent::NeedCredentials`]. An empty password
    /// finishes the session with [`SessionError::NoCredentials`].
    pub fn send_credentials(&mut self, password: &str) -> Result<(), Error> {
        let (State::WaitingForCredentials, Some(kind)) = (self.state, self.mechanism_kind) else {
            return Err(Error::InvalidState);
        };
        if password.is_empty() {
            self.finish_session(Some(SessionError::NoCredentials));
            return Ok(());
        }
        match auth::create_mechanism(kind, &self.jid, password) {
            Ok(mechanism) => self.authenticate(kind, mechanism),
            Err(e) => self.finish_session(Some(SessionError::AuthenticationFailed(e))),
        }
        Ok(())
    }

    /// Send a stanza on an established session.
    ///
    /// With stream management active the stanza is kept until the server
    /// acknowledges it, which is reported as [`SessionEvent::StanzaAcked`].
    pub fn send_stanza(&mut self, stanza: Stanza) -> Result<(), Error> {
        if self.state != State::SessionStarted {
            return Err(Error::InvalidState);
        }
        match self.sm.as_mut().map(|sm| sm.enqueue(stanza.clone())) {
            Some(Err(e)) => {
                log::warn!("Cannot track outgoing stanza: {}", e);
                self.finish_session(Some(SessionError::StreamManagementFailed));
                Err(Error::Session(SessionError::StreamManagementFailed))
            }
            Some(Ok(())) => {
                self.stream.write_element(StreamElement::Stanza(stanza));
                self.stream.write_element(StreamElement::SmRequest);
                Ok(())
            }
            None => {
                self.stream.write_element(StreamElement::Stanza(stanza));
                Ok(())
            }
        }
    }

    /// Close the stream cleanly.
    pub fn finish(&mut self) {
        self.finish_session(None);
    }

    /// Deliver an expired timer.
    pub fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Negotiation => match self.state {
                State::Initial | State::SessionStarted | State::Finished => {
                    log::trace!("Ignoring negotiation timeout in state {:?}", self.state)
                }
                _ => self.finish_session(Some(SessionError::NegotiationTimeout)),
            },
            kind => self.stream.handle_timer(kind),
        }
    }

    fn handle_stream_event(&mut self, event: SessionStreamEvent) {
        if self.state == State::Finished {
            log::trace!("Ignoring stream event after finish: {:?}", event);
            return;
        }
        match event {
            SessionStreamEvent::StreamStart(header) => self.handle_stream_start(header),
            SessionStreamEvent::Element(element) => self.handle_element(element),
            SessionStreamEvent::StreamEnd => self.finish_session(Some(SessionError::StreamEnd)),
            SessionStreamEvent::TlsEncrypted => self.handle_tls_encrypted(),
            SessionStreamEvent::Error(kind) => self.finish_session(Some(kind.into())),
            SessionStreamEvent::Closed => self.finish_session(Some(SessionError::ConnectionRead)),
        }
    }

    fn handle_stream_start(&mut self, header: ProtocolHeader) {
        if !self.awaiting_header {
            log::warn!("Unexpected stream header: {:?}", header);
            self.finish_session(Some(SessionError::UnexpectedElement));
            return;
        }
        if !header.has_valid_id() {
            log::warn!("Server sent stream header with invalid id: {:?}", header.id);
            self.finish_session(Some(SessionError::StreamParse));
            return;
        }
        log::debug!("Server opened stream {:?}", header.id);
        self.awaiting_header = false;
        self.server_header = Some(header);
    }

    fn handle_tls_encrypted(&mut self) {
        if self.state != State::Encrypting {
            log::warn!("TLS completed in state {:?}, ignoring", self.state);
            return;
        }
        log::debug!("Stream encrypted, restarting");
        self.stream.reset_xmpp_parser();
        self.state = State::Negotiating;
        self.restart_stream();
    }

    fn handle_element(&mut self, element: StreamElement) {
        if let StreamElement::StreamError { condition, text } = element {
            log::debug!("Received stream error {}: {:?}", condition, text);
            self.finish_session(Some(SessionError::StreamError { condition, text }));
            return;
        }
        if self.awaiting_header {
            log::warn!("Element before stream header: {:?}", element);
            self.finish_session(Some(SessionError::UnexpectedElement));
            return;
        }

        match (self.state, element) {
            (State::Negotiating, StreamElement::Features(features)) => {
                self.handle_features(features)
            }
            (State::Encrypting, StreamElement::TlsProceed) => {
                log::debug!("Server accepted STARTTLS");
                self.stream.add_tls_encryption();
            }
            (State::Encrypting, StreamElement::TlsFailure) => {
                self.finish_session(Some(SessionError::TlsNegotiationRefused))
            }
            (State::Compressing, StreamElement::Compressed) => {
                log::debug!("Stream compressed, restarting");
                self.compressed = true;
                self.stream.add_zlib_compression();
                self.stream.reset_xmpp_parser();
                self.state = State::Negotiating;
                self.restart_stream();
            }
            (State::Compressing, StreamElement::CompressFailure { condition }) => {
                log::debug!("Compression refused: {:?}", condition);
                self.finish_session(Some(SessionError::CompressionFailed));
            }
            (State::Authenticating, StreamElement::Challenge(challenge)) => {
                self.handle_challenge(&challenge.data)
            }
            (State::Authenticating, StreamElement::Success(success)) => {
                self.handle_auth_success(&success.data)
            }
            (State::Authenticating, StreamElement::AuthFailure(failure)) => {
                let condition = sasl_condition(&failure);
                log::debug!("Authentication failed: {} {:?}", condition, failure.texts);
                self.finish_session(Some(SessionError::AuthenticationFailed(AuthError::Fail(
                    condition,
                ))));
            }
            (State::BindingResource, StreamElement::Stanza(Stanza::Iq(iq)))
                if iq.id == bind::BIND_REQ_ID =>
            {
                match bind::parse_bind_response(iq) {
                    Ok(jid) => {
                        log::debug!("Bound to {}", jid);
                        self.bound_jid = Some(jid.into());
                        self.continue_after_bind();
                    }
                    Err(e) => {
                        log::warn!("Resource binding failed: {}", e);
                        self.finish_session(Some(SessionError::ResourceBind));
                    }
                }
            }
            (State::StartingSession, StreamElement::Stanza(Stanza::Iq(iq)))
                if iq.id == bind::SESSION_REQ_ID =>
            {
                match bind::check_session_response(&iq) {
                    Ok(()) => self.continue_after_session_start(),
                    Err(e) => {
                        log::warn!("Session establishment failed: {}", e);
                        self.finish_session(Some(SessionError::SessionStart));
                    }
                }
            }
            (State::EnablingStreamManagement, StreamElement::SmEnabled(enabled)) => {
                let resume = enabled.resume == sm::ResumeAttr::True;
                log::debug!("Stream management enabled (resumable: {})", resume);
                self.sm = Some(SmState::new(
                    enabled.id.map(|id| id.0),
                    resume,
                    enabled.location,
                ));
                self.session_started();
            }
            (State::EnablingStreamManagement, StreamElement::SmFailed(failed)) => {
                log::warn!(
                    "Server refused stream management ({:?}), continuing without acks",
                    failed.error
                );
                self.session_started();
            }
            (State::SessionStarted, element) => self.handle_session_element(element),
            (state, element) => {
                log::warn!("Unexpected element in state {:?}: {:?}", state, element);
                self.finish_session(Some(SessionError::UnexpectedElement));
            }
        }
    }

    fn handle_features(&mut self, features: StreamFeatures) {
        let encrypted = self.stream.is_tls_encrypted();

        if features.starttls
            && !encrypted
            && self.options.use_tls != UseTls::Never
            && self.stream.supports_tls_encryption()
        {
            log::debug!("Requesting STARTTLS");
            self.state = State::Encrypting;
            self.stream.write_element(StreamElement::StartTls);
            return;
        }
        let tls_required = self.options.use_tls == UseTls::Required || features.starttls_required;
        if tls_required && !encrypted {
            self.finish_session(Some(SessionError::TlsNotSupported));
            return;
        }

        if self.options.use_stream_compression
            && !self.compressed
            && features.has_compression_method("zlib")
            && self.stream.supports_zlib_compression()
        {
            log::debug!("Requesting zlib compression");
            self.state = State::Compressing;
            self.stream.write_element(StreamElement::Compress {
                method: "zlib".to_owned(),
            });
            return;
        }

        if !self.authenticated && features.has_authentication_mechanisms() {
            self.select_mechanism(&features, encrypted);
            return;
        }

        self.needs_session_start = features.needs_session_start();
        self.sm_offered = features.stream_management;
        if features.bind {
            log::debug!("Binding resource");
            self.state = State::BindingResource;
            self.stream
                .write_element(StreamElement::Stanza(bind::bind_request(&self.jid).into()));
            return;
        }
        self.continue_after_bind();
    }

    fn select_mechanism(&mut self, features: &StreamFeatures, encrypted: bool) {
        let selected = auth::select_mechanism(
            &features.sasl_mechanisms,
            self.jid.node().is_some(),
            encrypted,
            self.options.allow_plain_without_tls,
        );
        let Some(kind) = selected else {
            log::debug!(
                "No usable mechanism among {:?}",
                features.sasl_mechanisms
            );
            self.finish_session(Some(SessionError::NoSupportedAuthMechanism));
            return;
        };
        log::debug!("Selected SASL mechanism {}", kind.name());
        self.mechanism_kind = Some(kind);
        if kind.needs_credentials() {
            self.state = State::WaitingForCredentials;
            self.events.push_back(SessionEvent::NeedCredentials);
            return;
        }
        match auth::create_mechanism(kind, &self.jid, "") {
            Ok(mechanism) => self.authenticate(kind, mechanism),
            Err(e) => self.finish_session(Some(SessionError::AuthenticationFailed(e))),
        }
    }

    fn authenticate(&mut self, kind: MechanismKind, mut mechanism: Box<dyn Mechanism>) {
        let initial = mechanism.initial();
        self.mechanism = Some(mechanism);
        self.state = State::Authenticating;
        self.stream
            .write_element(StreamElement::Auth(sasl_elements::Auth {
                mechanism: kind.element_mechanism(),
                data: initial,
            }));
    }

    fn handle_challenge(&mut self, data: &[u8]) {
        let response = match self.mechanism.as_mut() {
            Some(mechanism) => mechanism.response(data).map_err(AuthError::from),
            None => Err(AuthError::Sasl("challenge without mechanism".to_owned())),
        };
        match response {
            Ok(data) => self
                .stream
                .write_element(StreamElement::Response(sasl_elements::Response { data })),
            Err(e) => self.finish_session(Some(SessionError::AuthenticationFailed(e))),
        }
    }

    fn handle_auth_success(&mut self, data: &[u8]) {
        let verified = match self.mechanism.take() {
            Some(mut mechanism) => mechanism.success(data),
            None => Ok(()),
        };
        if let Err(e) = verified {
            log::warn!("Server verification failed: {}", e);
            self.finish_session(Some(SessionError::AuthenticationFailed(
                AuthError::ServerVerification,
            )));
            return;
        }
        log::debug!("Authenticated, restarting stream");
        self.authenticated = true;
        self.stream.reset_xmpp_parser();
        self.state = State::Negotiating;
        self.restart_stream();
    }

    fn continue_after_bind(&mut self) {
        if self.needs_session_start {
            log::debug!("Starting legacy session");
            self.state = State::StartingSession;
            self.stream
                .write_element(StreamElement::Stanza(bind::session_request().into()));
            return;
        }
        self.continue_after_session_start();
    }

    fn continue_after_session_start(&mut self) {
        if self.sm_offered && self.options.use_stream_management {
            log::debug!("Enabling stream management");
            self.state = State::EnablingStreamManagement;
            self.stream
                .write_element(StreamElement::SmEnable(sm::Enable::new().with_resume()));
            return;
        }
        self.session_started();
    }

    fn session_started(&mut self) {
        self.negotiation_timer.stop();
        self.stream.set_whitespace_ping_enabled(true);
        self.state = State::SessionStarted;
        let bound_jid = self
            .bound_jid
            .get_or_insert_with(|| self.jid.clone())
            .clone();
        log::debug!("Session started as {}", bound_jid);
        self.events
            .push_back(SessionEvent::Initialized { bound_jid });
    }

    fn handle_session_element(&mut self, element: StreamElement) {
        match element {
            StreamElement::Stanza(stanza) => {
                if let Some(sm) = self.sm.as_mut() {
                    sm.count_inbound();
                }
                self.events.push_back(SessionEvent::StanzaReceived(stanza));
            }
            // Unparseable stanzas still count towards the acknowledged total.
            StreamElement::Unknown(elem) if Stanza::is_stanza(&elem) => {
                if let Some(sm) = self.sm.as_mut() {
                    sm.count_inbound();
                }
                log::debug!("Dropped malformed <{}/> stanza", elem.name());
            }
            StreamElement::SmRequest => match self.sm.as_ref().map(SmState::inbound_ctr) {
                Some(h) => self.stream.write_element(StreamElement::SmAck(sm::A::new(h))),
                None => log::warn!("Ignoring <r/> without stream management"),
            },
            StreamElement::SmAck(ack) => match self.sm.as_mut().map(|sm| sm.remote_acked(ack.h)) {
                Some(Ok(acked)) => self
                    .events
                    .extend(acked.into_iter().map(SessionEvent::StanzaAcked)),
                Some(Err(e)) => {
                    log::warn!("Invalid acknowledgement: {}", e);
                    self.finish_session(Some(SessionError::StreamManagementFailed));
                }
                None => log::warn!("Ignoring <a/> without stream management"),
            },
            other => log::warn!("Ignoring unexpected element: {:?}", other),
        }
    }

    fn restart_stream(&mut self) {
        self.awaiting_header = true;
        self.server_header = None;
        self.stream
            .write_header(&ProtocolHeader::for_domain(self.jid.domain().as_str()));
    }

    fn finish_session(&mut self, error: Option<SessionError>) {
        if self.state == State::Finished {
            return;
        }
        match error {
            Some(ref e) => log::debug!("Session finished with error: {}", e),
            None => log::debug!("Session finished"),
        }
        let header_sent = self.state != State::Initial;
        self.state = State::Finished;
        self.negotiation_timer.stop();
        self.stream.set_whitespace_ping_enabled(false);
        if header_sent && self.stream.is_open() {
            self.stream.write_footer();
        }
        self.stream.close();
        self.mechanism = None;
        self.error = error.clone();
        self.events.push_back(SessionEvent::Finished(error));
    }
}
