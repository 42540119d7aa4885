// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Incremental XML stream framing
//!
//! [`XmppParser`] is fed raw bytes as they arrive and yields the stream
//! header, complete first-level elements and the stream footer as
//! [`ParserEvent`]s. Parsing is lazy: bytes stay in the parser's buffer
//! until [`XmppParser::next_event`] is called, so a caller which installs a
//! new transformation layer after some element can take the unconsumed
//! bytes back with [`XmppParser::take_buffered`].
//!
//! [`XmppSerializer`] produces the bytes for the outgoing direction.

use core::ops::Range;

use bytes::BytesMut;
use quick_xml::errors::SyntaxError;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::element::{ns, StreamElement};
use crate::error::ParseError;
use crate::header::ProtocolHeader;
use crate::minidom::Element;


/// Upper bound for bytes buffered while waiting for an element to complete.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Something parsed off the stream.
#[derive(Debug)]
pub enum ParserEvent {
    /// The peer opened the stream
    StreamStart(ProtocolHeader),
    /// A complete first-level element
    Element(StreamElement),
    /// The peer closed the stream
    StreamEnd,
}

/// Qualified name and namespace declarations of the open stream, needed to
/// parse first-level elements in isolation.
#[derive(Debug, Clone)]
struct OpenStream {
    qname: String,
    declarations: String,
}

enum Frame {
    Header(ProtocolHeader, OpenStream),
    Element(Range<usize>),
    Footer,
}

/// Incremental parser for one XML stream.
#[derive(Debug, Default)]
pub struct XmppParser {
    buffer: BytesMut,
    stream: Option<OpenStream>,
}

impl XmppParser {
    /// Create a parser waiting for a stream header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    #[cfg(test)]
    fn is_stream_open(&self) -> bool {
        self.stream.is_some()
    }

    #[cfg(test)]
    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard the open stream and everything not parsed yet.
    ///
    /// Used on stream restarts: the next bytes must start a new document.
    pub fn reset(&mut self) {
        log::trace!(
            "Resetting XML parser, discarding {} buffered bytes",
            self.buffer.len()
        );
        self.buffer.clear();
        self.stream = None;
    }

    /// Take all bytes not parsed yet, leaving the buffer empty.
    pub fn take_buffered(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Parse the next event out of the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed.
    pub fn next_event(&mut self) -> Result<Option<ParserEvent>, ParseError> {
        let Some((frame, consumed)) = scan(&self.buffer, self.stream.as_ref())? else {
            if self.buffer.len() > MAX_BUFFER_SIZE {
                return Err(ParseError::BufferOverflow);
            }
            return Ok(None);
        };
        let event = match frame {
            Frame::Header(header, stream) => {
                log::trace!("Stream header: {:?}", header);
                self.stream = Some(stream);
                ParserEvent::StreamStart(header)
            }
            Frame::Element(range) => {
                let elem = self.parse_element(range)?;
                ParserEvent::Element(StreamElement::try_from(elem)?)
            }
            Frame::Footer => {
                self.stream = None;
                ParserEvent::StreamEnd
            }
        };
        let _ = self.buffer.split_to(consumed);
        Ok(Some(event))
    }

    /// Parse a framed element within the context of the stream header.
    fn parse_element(&self, range: Range<usize>) -> Result<Element, ParseError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or(ParseError::InvalidHeader("element before stream header"))?;
        let text = core::str::from_utf8(&self.buffer[range])?;
        log::trace!("RECV: {}", text);
        let wrapped = format!(
            "<{0}{1}>{2}</{0}>",
            stream.qname, stream.declarations, text
        );
        let root: Element = wrapped.parse()?;
        root.children()
            .next()
            .cloned()
            .ok_or(ParseError::MalformedElement("stream child"))
    }
}

fn is_incomplete(e: &quick_xml::Error) -> bool {
    matches!(
        e,
        quick_xml::Error::Syntax(
            SyntaxError::UnclosedTag
                | SyntaxError::UnclosedComment
                | SyntaxError::UnclosedCData
                | SyntaxError::UnclosedDoctype
                | SyntaxError::UnclosedPIOrXmlDecl
                | SyntaxError::InvalidBangMarkup
        )
    )
}

/// Find the next complete frame in `buf`.
///
/// Returns the frame and the number of bytes it spans, including leading
/// whitespace, or `None` if `buf` ends before the frame does.
fn scan(buf: &[u8], stream: Option<&OpenStream>) -> Result<Option<(Frame, usize)>, ParseError> {
    let stream_open = stream.is_some();
    let mut reader = Reader::from_reader(buf);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;
    // The stream's own start tag is never seen by this reader, so its end
    // tag arrives unmatched.
    reader.config_mut().allow_unmatched_ends = true;

    let mut depth: u32 = 0;
    let mut start: usize = 0;

    loop {
        let pos = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) if is_incomplete(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match event {
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => (),
            Event::Text(_) | Event::CData(_) => (),
            Event::Start(e) if !stream_open => {
                let end = reader.buffer_position() as usize;
                let (header, stream) = parse_header(&e)?;
                return Ok(Some((Frame::Header(header, stream), end)));
            }
            Event::Empty(_) if !stream_open => {
                return Err(ParseError::InvalidHeader("expected <stream:stream>"));
            }
            Event::Start(_) => {
                if depth == 0 {
                    start = pos;
                }
                depth += 1;
            }
            Event::Empty(_) => {
                if depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::Element(pos..end), end)));
                }
            }
            Event::End(e) => {
                if depth == 0 {
                    if stream.map(|s| s.qname.as_bytes()) != Some(e.name().as_ref()) {
                        return Err(ParseError::MalformedElement("stream:stream"));
                    }
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::Footer, end)));
                }
                depth -= 1;
                if depth == 0 {
                    let end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::Element(start..end), end)));
                }
            }
            Event::Eof => return Ok(None),
        }
    }
}

fn parse_header(e: &BytesStart) -> Result<(ProtocolHeader, OpenStream), ParseError> {
    let qname = core::str::from_utf8(e.name().as_ref())?.to_owned();
    if e.name().local_name().as_ref() != b"stream" {
        return Err(ParseError::InvalidHeader("expected <stream:stream>"));
    }
    let prefix = e
        .name()
        .prefix()
        .map(|p| core::str::from_utf8(p.as_ref()).map(str::to_owned))
        .transpose()?;

    let mut header = ProtocolHeader {
        version: String::new(),
        ..ProtocolHeader::default()
    };
    let mut declarations = String::new();
    let mut stream_ns = None;
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = core::str::from_utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        match key {
            "from" => header.from = Some(value),
            "to" => header.to = Some(value),
            "id" => header.id = Some(value),
            "version" => header.version = value,
            "xml:lang" => header.lang = Some(value),
            _ => {
                let declared = if key == "xmlns" {
                    Some(None)
                } else {
                    key.strip_prefix("xmlns:").map(Some)
                };
                let Some(declared) = declared else {
                    log::debug!("Ignoring stream header attribute {}", key);
                    continue;
                };
                if declared == prefix.as_deref() {
                    stream_ns = Some(value.clone());
                }
                declarations.push_str(&format!(" {}='{}'", key, escape(value.as_str())));
            }
        }
    }
    if stream_ns.as_deref() != Some(ns::STREAM) {
        return Err(ParseError::InvalidHeader("wrong stream namespace"));
    }
    Ok((
        header,
        OpenStream {
            qname,
            declarations,
        },
    ))
}

/// Produces the bytes of the outgoing stream.
#[derive(Debug, Default)]
pub struct XmppSerializer;

impl XmppSerializer {
    /// Create a serializer.
    pub fn new() -> Self {
        Self
    }

    /// Opening tag of a new stream.
    pub fn serialize_header(&self, header: &ProtocolHeader) -> String {
        header.to_xml()
    }

    /// A first-level element.
    pub fn serialize_element(&self, element: StreamElement) -> String {
        String::from(&Element::from(element))
    }

    /// Closing tag of the stream.
    pub fn serialize_footer(&self) -> &'static str {
        "</stream:stream>"
    }
}
