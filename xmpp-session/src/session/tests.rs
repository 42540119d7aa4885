// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, VecDeque};

use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::Message;
use xmpp_parsers::{sasl as sasl_elements, sm};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

use super::*;
use crate::config::Timeouts;
use crate::error::StreamErrorKind;
use crate::minidom::Element;
use crate::timer::ManualTimerFactory;

#[derive(Debug)]
enum Written {
    Header(ProtocolHeader),
    Element(StreamElement),
    Footer,
}

/// Records what the session does to its stream and replays queued events.
#[derive(Default)]
struct MockStream {
    written: VecDeque<Written>,
    incoming: VecDeque<SessionStreamEvent>,
    can_tls: bool,
    tls_added: bool,
    tls_encrypted: bool,
    compressed: bool,
    parser_resets: usize,
    whitespace: bool,
    closed: bool,
    timers: Vec<TimerKind>,
}

impl SessionStream for MockStream {
    fn is_open(&self) -> bool {
        !self.closed
    }

    fn write_header(&mut self, header: &ProtocolHeader) {
        self.written.push_back(Written::Header(header.clone()));
    }

    fn write_element(&mut self, element: StreamElement) {
        self.written.push_back(Written::Element(element));
    }

    fn write_footer(&mut self) {
        self.written.push_back(Written::Footer);
    }

    fn supports_tls_encryption(&self) -> bool {
        self.can_tls && !self.tls_added
    }

    fn add_tls_encryption(&mut self) {
        self.tls_added = true;
    }

    fn is_tls_encrypted(&self) -> bool {
        self.tls_encrypted
    }

    fn supports_zlib_compression(&self) -> bool {
        !self.compressed
    }

    fn add_zlib_compression(&mut self) {
        self.compressed = true;
    }

    fn set_whitespace_ping_enabled(&mut self, enabled: bool) {
        self.whitespace = enabled;
    }

    fn reset_xmpp_parser(&mut self) {
        self.parser_resets += 1;
    }

    fn handle_timer(&mut self, kind: TimerKind) {
        self.timers.push(kind);
    }

    fn poll_event(&mut self) -> Option<SessionStreamEvent> {
        self.incoming.pop_front()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

struct Fixture {
    session: ClientSession<MockStream>,
    timers: ManualTimerFactory,
}

impl Fixture {
    fn new(jid: &str) -> Self {
        Self::with_options(jid, ClientOptions::default())
    }

    fn with_options(jid: &str, options: ClientOptions) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let timers = ManualTimerFactory::new();
        let stream = MockStream {
            can_tls: true,
            ..MockStream::default()
        };
        let session = ClientSession::new(Jid::new(jid).unwrap(), stream, options, &timers);
        Self { session, timers }
    }

    fn stream(&mut self) -> &mut MockStream {
        self.session.stream_mut()
    }

    fn receive(&mut self, event: SessionStreamEvent) {
        self.stream().incoming.push_back(event);
        self.session.process_stream_events();
    }

    fn receive_element(&mut self, element: StreamElement) {
        self.receive(SessionStreamEvent::Element(element));
    }

    fn receive_header(&mut self) {
        self.receive(SessionStreamEvent::StreamStart(ProtocolHeader {
            from: Some("example.com".to_owned()),
            id: Some("stream-1".to_owned()),
            ..ProtocolHeader::default()
        }));
    }

    fn receive_features(&mut self, features: StreamFeatures) {
        self.receive_element(StreamElement::Features(features));
    }

    fn receive_iq_result(&mut self, id: &str, payload: Option<Element>) {
        self.receive_element(StreamElement::Stanza(Stanza::Iq(Iq {
            from: None,
            to: None,
            id: id.to_owned(),
            payload: IqType::Result(payload),
        })));
    }

    fn next_written(&mut self) -> Written {
        self.stream()
            .written
            .pop_front()
            .expect("nothing was written")
    }

    fn expect_header(&mut self) {
        match self.next_written() {
            Written::Header(header) => assert_eq!(header.to.as_deref(), Some("example.com")),
            other => panic!("expected header, got {:?}", other),
        }
    }

    fn expect_element(&mut self) -> StreamElement {
        match self.next_written() {
            Written::Element(element) => element,
            other => panic!("expected element, got {:?}", other),
        }
    }

    fn expect_nothing_written(&mut self) {
        assert!(
            self.stream().written.is_empty(),
            "unexpected writes: {:?}",
            self.stream().written
        );
    }

    fn events(&mut self) -> Vec<SessionEvent> {
        core::iter::from_fn(|| self.session.poll_event()).collect()
    }

    fn expect_finished_with(&mut self, error: SessionError) {
        assert_eq!(self.session.state(), State::Finished);
        assert_eq!(self.session.error(), Some(&error));
        let events = self.events();
        assert!(
            matches!(events.last(), Some(SessionEvent::Finished(Some(e))) if *e == error),
            "{:?}",
            events
        );
        assert!(self.stream().closed);
    }

    /// Start and negotiate PLAIN over an encrypted stream up to the restart
    /// after `<success/>`.
    fn authenticate(&mut self) {
        self.stream().tls_encrypted = true;
        self.session.start();
        self.expect_header();
        self.receive_header();
        self.receive_features(StreamFeatures {
            sasl_mechanisms: vec!["PLAIN".to_owned()],
            ..StreamFeatures::default()
        });
        assert!(matches!(
            self.events().as_slice(),
            [SessionEvent::NeedCredentials]
        ));
        self.session.send_credentials("secret").unwrap();
        let _ = self.expect_element();
        self.receive_success();
        self.expect_header();
        self.receive_header();
    }

    fn receive_success(&mut self) {
        self.receive_element(StreamElement::Success(sasl_elements::Success {
            data: Vec::new(),
        }));
    }

    fn bind_features() -> StreamFeatures {
        StreamFeatures {
            bind: true,
            ..StreamFeatures::default()
        }
    }

    fn bind_response(jid: &str) -> Element {
        format!(
            "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>{}</jid></bind>",
            jid
        )
        .parse()
        .unwrap()
    }

    /// Authenticate and bind without further features.
    fn establish(&mut self) {
        self.authenticate();
        self.receive_features(Self::bind_features());
        let _ = self.expect_element();
        self.receive_iq_result(
            bind::BIND_REQ_ID,
            Some(Self::bind_response("me@example.com/res")),
        );
        assert!(self.session.is_available());
        let _ = self.events();
    }
}

#[test]
fn test_start_sends_header_and_arms_timeout() {
    let mut f = Fixture::new("me@example.com");
    assert_eq!(f.session.state(), State::Initial);
    f.session.start();
    assert_eq!(f.session.state(), State::Negotiating);
    f.expect_header();
    assert!(f.timers.is_running(TimerKind::Negotiation));
    assert_eq!(
        f.timers.interval(TimerKind::Negotiation),
        Some(Timeouts::default().negotiation)
    );
}

#[test]
#[should_panic]
fn test_start_twice() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.session.start();
}

#[test]
fn test_connection_break_before_data() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive(SessionStreamEvent::Error(StreamErrorKind::ConnectionRead));
    let events = f.events();
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Finished(Some(SessionError::ConnectionRead))]
    ));
    assert_eq!(f.session.error(), Some(&SessionError::ConnectionRead));
    assert!(!f.timers.is_running(TimerKind::Negotiation));
}

#[test]
fn test_transport_closed() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive(SessionStreamEvent::Closed);
    f.expect_finished_with(SessionError::ConnectionRead);
}

#[test]
fn test_invalid_stream_id() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive(SessionStreamEvent::StreamStart(ProtocolHeader::default()));
    f.expect_finished_with(SessionError::StreamParse);
}

#[test]
fn test_starttls() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        starttls: true,
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    assert!(matches!(f.expect_element(), StreamElement::StartTls));
    assert_eq!(f.session.state(), State::Encrypting);

    f.receive_element(StreamElement::TlsProceed);
    assert!(f.stream().tls_added);

    f.stream().tls_encrypted = true;
    f.receive(SessionStreamEvent::TlsEncrypted);
    assert_eq!(f.stream().parser_resets, 1);
    f.expect_header();
    assert_eq!(f.session.state(), State::Negotiating);

    // Encryption is not negotiated twice.
    f.receive_header();
    f.receive_features(StreamFeatures {
        starttls: true,
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    assert_eq!(f.session.state(), State::WaitingForCredentials);
    f.expect_nothing_written();
}

#[test]
fn test_starttls_server_error() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        starttls: true,
        ..StreamFeatures::default()
    });
    f.receive_element(StreamElement::TlsFailure);
    f.expect_finished_with(SessionError::TlsNegotiationRefused);
    assert!(!f.stream().tls_added);
    assert!(!f.session.stream().is_tls_encrypted());
}

#[test]
fn test_starttls_handshake_error() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        starttls: true,
        ..StreamFeatures::default()
    });
    f.receive_element(StreamElement::TlsProceed);
    f.receive(SessionStreamEvent::Error(StreamErrorKind::Tls(
        "handshake".to_owned(),
    )));
    f.expect_finished_with(SessionError::TlsHandshake("handshake".to_owned()));
}

#[test]
fn test_tls_required_but_not_offered() {
    let mut f = Fixture::with_options(
        "me@example.com",
        ClientOptions::default().with_tls(UseTls::Required),
    );
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["SCRAM-SHA-1".to_owned()],
        ..StreamFeatures::default()
    });
    f.expect_finished_with(SessionError::TlsNotSupported);
}

#[test]
fn test_server_requires_tls_we_cannot_provide() {
    let mut f = Fixture::new("me@example.com");
    f.stream().can_tls = false;
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        starttls: true,
        starttls_required: true,
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    assert!(matches!(f.next_written(), Written::Footer));
    f.expect_finished_with(SessionError::TlsNotSupported);

    let mut f = Fixture::with_options(
        "me@example.com",
        ClientOptions::default().with_tls(UseTls::Never),
    );
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        starttls: true,
        starttls_required: true,
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    f.expect_finished_with(SessionError::TlsNotSupported);
}

#[test]
fn test_tls_never_skips_starttls() {
    let mut f = Fixture::with_options(
        "me@example.com",
        ClientOptions::default().with_tls(UseTls::Never),
    );
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        starttls: true,
        sasl_mechanisms: vec!["SCRAM-SHA-1".to_owned()],
        ..StreamFeatures::default()
    });
    assert_eq!(f.session.state(), State::WaitingForCredentials);
    f.expect_nothing_written();
}

#[test]
fn test_compression() {
    let mut f = Fixture::new("me@example.com");
    f.stream().tls_encrypted = true;
    f.session.start();
    f.expect_header();
    f.receive_header();
    let features = StreamFeatures {
        compression_methods: vec!["zlib".to_owned()],
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    };
    f.receive_features(features.clone());
    assert!(matches!(
        f.expect_element(),
        StreamElement::Compress { ref method } if method == "zlib"
    ));
    f.receive_element(StreamElement::Compressed);
    assert!(f.stream().compressed);
    assert_eq!(f.stream().parser_resets, 1);
    f.expect_header();

    f.receive_header();
    f.receive_features(features);
    assert_eq!(f.session.state(), State::WaitingForCredentials);
}

#[test]
fn test_compression_failure() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        compression_methods: vec!["zlib".to_owned()],
        ..StreamFeatures::default()
    });
    f.receive_element(StreamElement::CompressFailure {
        condition: Some("setup-failed".to_owned()),
    });
    f.expect_finished_with(SessionError::CompressionFailed);
}

#[test]
fn test_plain_authentication() {
    let mut f = Fixture::new("me@example.com");
    f.stream().tls_encrypted = true;
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    assert!(matches!(
        f.events().as_slice(),
        [SessionEvent::NeedCredentials]
    ));
    f.expect_nothing_written();

    f.session.send_credentials("mypass").unwrap();
    match f.expect_element() {
        StreamElement::Auth(auth) => {
            assert_eq!(auth.mechanism, sasl_elements::Mechanism::Plain);
            assert_eq!(auth.data, b"\0me\0mypass");
        }
        other => panic!("expected auth, got {:?}", other),
    }
    f.expect_nothing_written();
    assert_eq!(f.session.state(), State::Authenticating);

    f.receive_success();
    assert_eq!(f.stream().parser_resets, 1);
    f.expect_header();
    assert!(f.events().is_empty());
}

#[test]
fn test_authentication_failure() {
    let mut f = Fixture::new("me@example.com");
    f.stream().tls_encrypted = true;
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    f.session.send_credentials("mypass").unwrap();
    let _ = f.expect_element();
    f.receive_element(StreamElement::AuthFailure(sasl_elements::Failure {
        defined_condition: sasl_elements::DefinedCondition::NotAuthorized,
        texts: BTreeMap::new(),
    }));
    assert!(matches!(f.next_written(), Written::Footer));
    f.expect_nothing_written();
    f.expect_finished_with(SessionError::AuthenticationFailed(AuthError::Fail(
        "not-authorized".to_owned(),
    )));
}

#[test]
fn test_no_supported_mechanism() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["EXTERNAL".to_owned()],
        ..StreamFeatures::default()
    });
    let events = f.events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::NeedCredentials)));
    assert_eq!(
        f.session.error(),
        Some(&SessionError::NoSupportedAuthMechanism)
    );
}

#[test]
fn test_plain_refused_over_cleartext() {
    let mut f = Fixture::with_options(
        "me@example.com",
        ClientOptions::default().with_plain_without_tls(false),
    );
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    f.expect_finished_with(SessionError::NoSupportedAuthMechanism);
}

#[test]
fn test_plain_over_cleartext_by_default() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        ..StreamFeatures::default()
    });
    assert_eq!(f.session.state(), State::WaitingForCredentials);
    f.session.send_credentials("mypass").unwrap();
    assert!(matches!(
        f.expect_element(),
        StreamElement::Auth(sasl_elements::Auth {
            mechanism: sasl_elements::Mechanism::Plain,
            ..
        })
    ));
}

#[test]
fn test_empty_password() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["SCRAM-SHA-256".to_owned()],
        ..StreamFeatures::default()
    });
    f.session.send_credentials("").unwrap();
    f.expect_finished_with(SessionError::NoCredentials);
}

#[test]
fn test_credentials_in_wrong_state() {
    let mut f = Fixture::new("me@example.com");
    assert!(matches!(
        f.session.send_credentials("secret"),
        Err(Error::InvalidState)
    ));
    f.session.start();
    assert!(matches!(
        f.session.send_credentials("secret"),
        Err(Error::InvalidState)
    ));
}

#[test]
fn test_scram_invalid_challenge() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["PLAIN".to_owned(), "SCRAM-SHA-1".to_owned()],
        ..StreamFeatures::default()
    });
    f.session.send_credentials("pencil").unwrap();
    match f.expect_element() {
        StreamElement::Auth(auth) => {
            assert_eq!(auth.mechanism, sasl_elements::Mechanism::ScramSha1);
            let initial = String::from_utf8(auth.data).unwrap();
            assert!(initial.contains("n=me,r="));
        }
        other => panic!("expected auth, got {:?}", other),
    }
    // No server nonce, no salt.
    f.receive_element(StreamElement::Challenge(sasl_elements::Challenge {
        data: b"i=4096".to_vec(),
    }));
    assert!(matches!(
        f.session.error(),
        Some(SessionError::AuthenticationFailed(AuthError::Sasl(_)))
    ));
}

#[test]
fn test_anonymous_does_not_ask_for_credentials() {
    let mut f = Fixture::new("example.com");
    f.session.start();
    f.expect_header();
    f.receive_header();
    f.receive_features(StreamFeatures {
        sasl_mechanisms: vec!["PLAIN".to_owned(), "ANONYMOUS".to_owned()],
        ..StreamFeatures::default()
    });
    match f.expect_element() {
        StreamElement::Auth(auth) => {
            assert_eq!(auth.mechanism, sasl_elements::Mechanism::Anonymous)
        }
        other => panic!("expected auth, got {:?}", other),
    }
    assert!(f.events().is_empty());
    assert_eq!(f.session.state(), State::Authenticating);
}

#[test]
fn test_resource_bind_adopts_server_resource() {
    let mut f = Fixture::new("me@example.com/requested");
    f.authenticate();
    f.receive_features(Fixture::bind_features());
    match f.expect_element() {
        StreamElement::Stanza(Stanza::Iq(iq)) => assert_eq!(iq.id, bind::BIND_REQ_ID),
        other => panic!("expected bind request, got {:?}", other),
    }
    assert_eq!(f.session.state(), State::BindingResource);

    f.receive_iq_result(
        bind::BIND_REQ_ID,
        Some(Fixture::bind_response("me@example.com/assigned")),
    );
    let expected = Jid::new("me@example.com/assigned").unwrap();
    assert_eq!(f.session.bound_jid(), Some(&expected));
    assert!(matches!(
        f.events().as_slice(),
        [SessionEvent::Initialized { bound_jid }] if *bound_jid == expected
    ));
    assert!(f.session.is_available());
    assert!(f.stream().whitespace);
    assert!(!f.timers.is_running(TimerKind::Negotiation));
}

#[test]
fn test_resource_bind_error() {
    let mut f = Fixture::new("me@example.com");
    f.authenticate();
    f.receive_features(Fixture::bind_features());
    let _ = f.expect_element();
    f.receive_element(StreamElement::Stanza(Stanza::Iq(Iq {
        from: None,
        to: None,
        id: bind::BIND_REQ_ID.to_owned(),
        payload: IqType::Error(StanzaError::new(
            ErrorType::Modify,
            DefinedCondition::BadRequest,
            "en",
            "no",
        )),
    })));
    f.expect_finished_with(SessionError::ResourceBind);
}

#[test]
fn test_session_start() {
    let mut f = Fixture::new("me@example.com");
    f.authenticate();
    f.receive_features(StreamFeatures {
        bind: true,
        session: true,
        ..StreamFeatures::default()
    });
    let _ = f.expect_element();
    f.receive_iq_result(
        bind::BIND_REQ_ID,
        Some(Fixture::bind_response("me@example.com/res")),
    );
    match f.expect_element() {
        StreamElement::Stanza(Stanza::Iq(iq)) => assert_eq!(iq.id, bind::SESSION_REQ_ID),
        other => panic!("expected session request, got {:?}", other),
    }
    assert_eq!(f.session.state(), State::StartingSession);
    f.receive_iq_result(bind::SESSION_REQ_ID, None);
    assert!(f.session.is_available());
}

#[test]
fn test_optional_session_is_skipped() {
    let mut f = Fixture::new("me@example.com");
    f.authenticate();
    f.receive_features(StreamFeatures {
        bind: true,
        session: true,
        session_optional: true,
        ..StreamFeatures::default()
    });
    let _ = f.expect_element();
    f.receive_iq_result(
        bind::BIND_REQ_ID,
        Some(Fixture::bind_response("me@example.com/res")),
    );
    f.expect_nothing_written();
    assert!(f.session.is_available());
}

#[test]
fn test_session_start_error() {
    let mut f = Fixture::new("me@example.com");
    f.authenticate();
    f.receive_features(StreamFeatures {
        bind: true,
        session: true,
        ..StreamFeatures::default()
    });
    let _ = f.expect_element();
    f.receive_iq_result(
        bind::BIND_REQ_ID,
        Some(Fixture::bind_response("me@example.com/res")),
    );
    let _ = f.expect_element();
    f.receive_element(StreamElement::Stanza(Stanza::Iq(Iq {
        from: None,
        to: None,
        id: bind::SESSION_REQ_ID.to_owned(),
        payload: IqType::Error(StanzaError::new(
            ErrorType::Wait,
            DefinedCondition::InternalServerError,
            "en",
            "later",
        )),
    })));
    f.expect_finished_with(SessionError::SessionStart);
}

#[test]
fn test_send_and_receive_stanzas() {
    let mut f = Fixture::new("me@example.com");
    assert!(matches!(
        f.session
            .send_stanza(Message::new(None).into()),
        Err(Error::InvalidState)
    ));

    f.establish();
    f.session.send_stanza(Message::new(None).into()).unwrap();
    assert!(matches!(
        f.expect_element(),
        StreamElement::Stanza(Stanza::Message(_))
    ));
    f.expect_nothing_written();

    f.receive_element(StreamElement::Stanza(Message::new(None).into()));
    assert!(matches!(
        f.events().as_slice(),
        [SessionEvent::StanzaReceived(Stanza::Message(_))]
    ));

    // Non-stanza elements are ignored once the session runs.
    f.receive_element(StreamElement::Compressed);
    assert!(f.session.is_available());
}

#[test]
fn test_stream_management() {
    let mut f = Fixture::new("me@example.com");
    f.authenticate();
    f.receive_features(StreamFeatures {
        bind: true,
        stream_management: true,
        ..StreamFeatures::default()
    });
    let _ = f.expect_element();
    f.receive_iq_result(
        bind::BIND_REQ_ID,
        Some(Fixture::bind_response("me@example.com/res")),
    );
    match f.expect_element() {
        StreamElement::SmEnable(enable) => assert_eq!(enable.resume, sm::ResumeAttr::True),
        other => panic!("expected enable, got {:?}", other),
    }
    assert_eq!(f.session.state(), State::EnablingStreamManagement);
    f.receive_element(StreamElement::SmEnabled(sm::Enabled {
        id: Some(sm::StreamId("sm-1".to_owned())),
        location: None,
        max: None,
        resume: sm::ResumeAttr::True,
    }));
    assert!(f.session.is_available());
    assert_eq!(f.session.stream_management_id(), Some("sm-1"));
    let _ = f.events();

    f.session.send_stanza(Message::new(None).into()).unwrap();
    assert!(matches!(
        f.expect_element(),
        StreamElement::Stanza(Stanza::Message(_))
    ));
    assert!(matches!(f.expect_element(), StreamElement::SmRequest));

    f.receive_element(StreamElement::SmAck(sm::A::new(1)));
    assert!(matches!(
        f.events().as_slice(),
        [SessionEvent::StanzaAcked(Stanza::Message(_))]
    ));

    f.receive_element(StreamElement::Stanza(Message::new(None).into()));
    f.receive_element(StreamElement::Unknown(
        "<presence xmlns='jabber:client'><priority>abc</priority></presence>"
            .parse()
            .unwrap(),
    ));
    assert_eq!(f.events().len(), 1);
    f.receive_element(StreamElement::SmRequest);
    assert!(matches!(
        f.expect_element(),
        StreamElement::SmAck(sm::A { h: 2 })
    ));

    f.receive_element(StreamElement::SmAck(sm::A::new(5)));
    f.expect_finished_with(SessionError::StreamManagementFailed);
}

#[test]
fn test_stream_management_refused() {
    let mut f = Fixture::new("me@example.com");
    f.authenticate();
    f.receive_features(StreamFeatures {
        bind: true,
        stream_management: true,
        ..StreamFeatures::default()
    });
    let _ = f.expect_element();
    f.receive_iq_result(
        bind::BIND_REQ_ID,
        Some(Fixture::bind_response("me@example.com/res")),
    );
    let _ = f.expect_element();
    f.receive_element(StreamElement::SmFailed(sm::Failed {
        h: None,
        error: None,
    }));
    assert!(f.session.is_available());
    assert!(!f.session.is_stream_management_enabled());
}

fn label(written: &Written) -> &'static str {
    match written {
        Written::Header(_) => "header",
        Written::Footer => "footer",
        Written::Element(StreamElement::StartTls) => "starttls",
        Written::Element(StreamElement::Compress { .. }) => "compress",
        Written::Element(StreamElement::Auth(_)) => "auth",
        Written::Element(StreamElement::Stanza(Stanza::Iq(iq))) if iq.id == bind::BIND_REQ_ID => {
            "bind"
        }
        Written::Element(StreamElement::Stanza(Stanza::Iq(iq)))
            if iq.id == bind::SESSION_REQ_ID =>
        {
            "session"
        }
        Written::Element(StreamElement::SmEnable(_)) => "enable",
        other => panic!("unexpected write {:?}", other),
    }
}

#[test]
fn test_full_negotiation_order() {
    let mut f = Fixture::new("me@example.com");
    // Everything is advertised on every restart; each step is taken once.
    let features = StreamFeatures {
        starttls: true,
        compression_methods: vec!["zlib".to_owned()],
        sasl_mechanisms: vec!["PLAIN".to_owned()],
        bind: true,
        session: true,
        stream_management: true,
        ..StreamFeatures::default()
    };
    f.session.start();
    f.receive_header();
    f.receive_features(features.clone());
    assert_eq!(f.session.state(), State::Encrypting);
    f.receive_element(StreamElement::TlsProceed);
    f.stream().tls_encrypted = true;
    f.receive(SessionStreamEvent::TlsEncrypted);

    f.receive_header();
    f.receive_features(features.clone());
    assert_eq!(f.session.state(), State::Compressing);
    f.receive_element(StreamElement::Compressed);

    f.receive_header();
    f.receive_features(features.clone());
    assert_eq!(f.session.state(), State::WaitingForCredentials);
    f.session.send_credentials("secret").unwrap();
    f.receive_success();

    f.receive_header();
    f.receive_features(features);
    assert_eq!(f.session.state(), State::BindingResource);
    f.receive_iq_result(
        bind::BIND_REQ_ID,
        Some(Fixture::bind_response("me@example.com/res")),
    );
    assert_eq!(f.session.state(), State::StartingSession);
    f.receive_iq_result(bind::SESSION_REQ_ID, None);
    assert_eq!(f.session.state(), State::EnablingStreamManagement);
    f.receive_element(StreamElement::SmEnabled(sm::Enabled {
        id: None,
        location: None,
        max: None,
        resume: sm::ResumeAttr::False,
    }));
    assert!(f.session.is_available());

    let order: Vec<&str> = f.stream().written.iter().map(label).collect();
    assert_eq!(
        order,
        vec![
            "header", "starttls", "header", "compress", "header", "auth", "header", "bind",
            "session", "enable",
        ]
    );
    assert_eq!(f.stream().parser_resets, 3);
    assert!(f.stream().tls_added);
    assert!(f.stream().compressed);
}

#[test]
fn test_whitespace_ping_delegated() {
    let mut f = Fixture::new("me@example.com");
    f.establish();
    assert!(f.stream().whitespace);
    f.session.handle_timer(TimerKind::WhitespacePing);
    assert_eq!(f.stream().timers, vec![TimerKind::WhitespacePing]);
    f.session.finish();
    assert!(!f.stream().whitespace);
}

#[test]
fn test_negotiation_timeout() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.session.handle_timer(TimerKind::Negotiation);
    f.expect_finished_with(SessionError::NegotiationTimeout);
}

#[test]
fn test_timeout_after_start_ignored() {
    let mut f = Fixture::new("me@example.com");
    f.establish();
    f.session.handle_timer(TimerKind::Negotiation);
    assert!(f.session.is_available());
}

#[test]
fn test_stream_error() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.receive_element(StreamElement::StreamError {
        condition: "host-unknown".to_owned(),
        text: None,
    });
    f.expect_finished_with(SessionError::StreamError {
        condition: "host-unknown".to_owned(),
        text: None,
    });
}

#[test]
fn test_stream_end_while_running() {
    let mut f = Fixture::new("me@example.com");
    f.establish();
    f.receive(SessionStreamEvent::StreamEnd);
    f.expect_finished_with(SessionError::StreamEnd);
}

#[test]
fn test_unexpected_element_during_negotiation() {
    let mut f = Fixture::new("me@example.com");
    f.session.start();
    f.receive_header();
    f.receive_element(StreamElement::SmRequest);
    f.expect_finished_with(SessionError::UnexpectedElement);
}

#[test]
fn test_clean_finish() {
    let mut f = Fixture::new("me@example.com");
    f.establish();
    f.session.finish();
    assert!(matches!(f.next_written(), Written::Footer));
    assert!(f.stream().closed);
    assert!(matches!(
        f.events().as_slice(),
        [SessionEvent::Finished(None)]
    ));
    assert_eq!(f.session.error(), None);

    // Events after the finish are dropped.
    f.receive(SessionStreamEvent::StreamEnd);
    assert!(f.events().is_empty());
}
