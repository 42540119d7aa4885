// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::any::Any;
use std::io::{self, Write};

use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use super::{LayerEvent, LayerIo, StreamLayer};
use crate::error::StreamErrorKind;

/// XEP-0138 zlib compression.
///
/// Every write is sync-flushed so the peer can decompress each stanza as
/// soon as it arrives.
pub struct CompressionLayer {
    encoder: ZlibEncoder<Vec<u8>>,
    decoder: ZlibDecoder<Vec<u8>>,
    failed: bool,
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionLayer {
    /// Create a layer with fresh zlib streams in both directions.
    pub fn new() -> Self {
        Self {
            encoder: ZlibEncoder::new(Vec::new(), Compression::default()),
            decoder: ZlibDecoder::new(Vec::new()),
            failed: false,
        }
    }

    fn compress(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        self.encoder.write_all(data)?;
        self.encoder.flush()?;
        Ok(core::mem::take(self.encoder.get_mut()))
    }

    fn decompress(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        self.decoder.write_all(data)?;
        self.decoder.flush()?;
        Ok(core::mem::take(self.decoder.get_mut()))
    }

    fn fail(&mut self, e: io::Error, io: &mut LayerIo) {
        log::debug!("Compression layer failed: {}", e);
        self.failed = true;
        io.events.push(LayerEvent::Error(StreamErrorKind::Compression));
    }
}

impl StreamLayer for CompressionLayer {
    fn write_data(&mut self, data: &[u8], io: &mut LayerIo) {
        if self.failed {
            return;
        }
        match self.compress(data) {
            Ok(out) => io.down = out,
            Err(e) => self.fail(e, io),
        }
    }

    fn handle_data_read(&mut self, data: &[u8], io: &mut LayerIo) {
        if self.failed {
            return;
        }
        match self.decompress(data) {
            Ok(out) => io.up = out,
            Err(e) => self.fail(e, io),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_decompresses_each_write() {
        let mut ours = CompressionLayer::new();
        let mut theirs = CompressionLayer::new();
        for stanza in [&b"<presence/>"[..], b"<message><body>hello</body></message>"] {
            let mut io = LayerIo::default();
            ours.write_data(stanza, &mut io);
            assert!(!io.down.is_empty());
            let wire = io.down;
            let mut io = LayerIo::default();
            theirs.handle_data_read(&wire, &mut io);
            assert_eq!(io.up, stanza);
        }
    }

    #[test]
    fn test_corrupt_input_raises_error() {
        let mut layer = CompressionLayer::new();
        let mut io = LayerIo::default();
        layer.handle_data_read(b"this is not zlib", &mut io);
        assert_eq!(
            io.events,
            vec![LayerEvent::Error(StreamErrorKind::Compression)]
        );
        let mut io = LayerIo::default();
        layer.handle_data_read(b"more", &mut io);
        assert!(io.events.is_empty());
        assert!(io.up.is_empty());
    }
}
