// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::time::Duration;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{SessionStream, SessionStreamEvent};
use crate::connect::{Transport, TransportError, TransportEvent};
use crate::element::StreamElement;
use crate::error::StreamErrorKind;
use crate::header::ProtocolHeader;
use crate::stack::{
    CompressionLayer, LayerEvent, LayerStack, StackOutput, TlsLayer, WhitespacePingLayer,
};
use crate::timer::{TimerFactory, TimerKind};
use crate::tls::TlsContextFactory;
use crate::xmlstream::{ParserEvent, XmppParser, XmppSerializer};

/// Session stream over a [`Transport`].
///
/// Incoming bytes go through the layer stack into the parser as soon as
/// they arrive, but are only parsed when [`SessionStream::poll_event`] asks
/// for the next event. Anything still unparsed when a layer is inserted is
/// replayed through that layer.
pub struct BasicSessionStream<T: Transport> {
    transport: T,
    open: bool,
    server_name: String,
    layers: LayerStack,
    parser: XmppParser,
    parser_failed: bool,
    serializer: XmppSerializer,
    tls_factory: Option<Rc<dyn TlsContextFactory>>,
    events: VecDeque<SessionStreamEvent>,
}

impl<T: Transport> BasicSessionStream<T> {
    /// Create a stream over a connected transport.
    ///
    /// `server_name` is verified against the certificate if TLS is added.
    /// Without a `tls_factory` the stream cannot be encrypted.
    pub fn new(
        transport: T,
        server_name: &str,
        tls_factory: Option<Rc<dyn TlsContextFactory>>,
        timer_factory: &dyn TimerFactory,
        whitespace_ping_interval: Duration,
    ) -> Self {
        let mut layers = LayerStack::new();
        layers.push(Box::new(WhitespacePingLayer::new(
            timer_factory.create_timer(TimerKind::WhitespacePing, whitespace_ping_interval),
        )));
        Self {
            transport,
            open: true,
            server_name: server_name.to_owned(),
            layers,
            parser: XmppParser::new(),
            parser_failed: false,
            serializer: XmppSerializer::new(),
            tls_factory,
            events: VecDeque::new(),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Process something the transport observed.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DataRead(data) => {
                if !self.open {
                    log::debug!("Ignoring {} bytes read after close", data.len());
                    return;
                }
                let out = self.layers.handle_data_read(&data);
                self.apply(out);
            }
            TransportEvent::Error(TransportError::Read(e)) => {
                log::debug!("Transport read error: {}", e);
                self.open = false;
                self.events
                    .push_back(SessionStreamEvent::Error(StreamErrorKind::ConnectionRead));
            }
            TransportEvent::Error(TransportError::Write(e)) => {
                log::debug!("Transport write error: {}", e);
                self.open = false;
                self.events
                    .push_back(SessionStreamEvent::Error(StreamErrorKind::ConnectionWrite));
            }
            TransportEvent::Closed => {
                log::debug!("Transport closed");
                self.open = false;
                self.events.push_back(SessionStreamEvent::Closed);
            }
        }
    }

    fn apply(&mut self, out: StackOutput) {
        if !out.to_transport.is_empty() {
            self.transport.write(&out.to_transport);
        }
        if !out.to_parser.is_empty() {
            self.parser.feed(&out.to_parser);
        }
        for event in out.events {
            self.events.push_back(match event {
                LayerEvent::TlsConnected => SessionStreamEvent::TlsEncrypted,
                LayerEvent::Error(kind) => SessionStreamEvent::Error(kind),
            });
        }
    }

    fn write_bytes(&mut self, data: &str) {
        if !self.open {
            log::debug!("Not writing to closed stream: {}", data);
            return;
        }
        log::trace!("SEND: {}", data);
        let out = self.layers.write(data.as_bytes());
        self.apply(out);
    }

    fn insert_layer(&mut self, index: usize, layer: Box<dyn crate::stack::StreamLayer>) {
        let pending = self.parser.take_buffered();
        let out = self.layers.insert(index, layer, &pending);
        self.apply(out);
    }
}

impl<T: Transport> SessionStream for BasicSessionStream<T> {
    fn is_open(&self) -> bool {
        self.open
    }

    fn write_header(&mut self, header: &ProtocolHeader) {
        let data = self.serializer.serialize_header(header);
        self.write_bytes(&data);
    }

    fn write_element(&mut self, element: StreamElement) {
        let data = self.serializer.serialize_element(element);
        self.write_bytes(&data);
    }

    fn write_footer(&mut self) {
        let data = self.serializer.serialize_footer();
        self.write_bytes(data);
    }

    fn supports_tls_encryption(&self) -> bool {
        self.tls_factory.is_some() && self.layers.position::<TlsLayer>().is_none()
    }

    fn add_tls_encryption(&mut self) {
        let Some(factory) = self.tls_factory.clone() else {
            self.events.push_back(SessionStreamEvent::Error(StreamErrorKind::Tls(
                "no TLS context factory".to_owned(),
            )));
            return;
        };
        let mut layer = match factory.create_context(&self.server_name) {
            Ok(context) => TlsLayer::new(context),
            Err(e) => {
                self.events.push_back(SessionStreamEvent::Error(e.into()));
                return;
            }
        };
        match layer.connect() {
            Ok(hello) => self.transport.write(&hello),
            Err(e) => {
                self.events.push_back(SessionStreamEvent::Error(e.into()));
                return;
            }
        }
        log::debug!("Inserting TLS layer for {}", self.server_name);
        self.insert_layer(0, Box::new(layer));
    }

    fn is_tls_encrypted(&self) -> bool {
        self.layers
            .get::<TlsLayer>()
            .map_or(false, TlsLayer::is_encrypted)
    }

    fn supports_zlib_compression(&self) -> bool {
        self.layers.position::<CompressionLayer>().is_none()
    }

    fn add_zlib_compression(&mut self) {
        let index = self.layers.position::<TlsLayer>().map_or(0, |i| i + 1);
        log::debug!("Inserting compression layer at {}", index);
        self.insert_layer(index, Box::new(CompressionLayer::new()));
    }

    fn set_whitespace_ping_enabled(&mut self, enabled: bool) {
        if let Some(layer) = self.layers.get_mut::<WhitespacePingLayer>() {
            if enabled {
                layer.set_active();
            } else {
                layer.set_inactive();
            }
        }
    }

    fn reset_xmpp_parser(&mut self) {
        self.parser.reset();
        self.parser_failed = false;
    }

    fn handle_timer(&mut self, kind: TimerKind) {
        if !self.open {
            return;
        }
        let out = self.layers.handle_timer(kind);
        self.apply(out);
    }

    fn poll_event(&mut self) -> Option<SessionStreamEvent> {
        if !self.parser_failed {
            match self.parser.next_event() {
                Ok(Some(ParserEvent::StreamStart(header))) => {
                    return Some(SessionStreamEvent::StreamStart(header))
                }
                Ok(Some(ParserEvent::Element(element))) => {
                    return Some(SessionStreamEvent::Element(element))
                }
                Ok(Some(ParserEvent::StreamEnd)) => return Some(SessionStreamEvent::StreamEnd),
                Ok(None) => (),
                Err(e) => {
                    log::warn!("Failed to parse incoming stream: {}", e);
                    self.parser_failed = true;
                    return Some(SessionStreamEvent::Error(StreamErrorKind::Parse));
                }
            }
        }
        self.events.pop_front()
    }

    fn close(&mut self) {
        self.set_whitespace_ping_enabled(false);
        if self.open {
            self.open = false;
            self.transport.close();
        }
    }
}
