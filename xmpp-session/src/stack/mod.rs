// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Layer stack
//!
//! Bytes travel between the transport and the XML parser through an
//! ordered list of [`StreamLayer`]s. Index 0 is the layer closest to the
//! transport. Outgoing data enters at the top and leaves at index 0;
//! incoming data takes the opposite route.
//!
//! A layer may produce output in both directions from a single input (a
//! TLS layer answers handshake records while reading), so every call
//! receives a [`LayerIo`] collecting bytes for either neighbour and
//! [`LayerEvent`]s for the owner of the stack.

use core::any::Any;

use crate::error::StreamErrorKind;
use crate::timer::TimerKind;

mod compression;
mod tls;
mod whitespace;

pub use compression::CompressionLayer;
pub use tls::TlsLayer;
pub use whitespace::WhitespacePingLayer;

/// Notification raised by a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerEvent {
    /// The TLS handshake completed
    TlsConnected,
    /// The layer failed and the stream is unusable
    Error(StreamErrorKind),
}

/// Output of one layer call.
#[derive(Debug, Default)]
pub struct LayerIo {
    /// Bytes for the layer below
    pub down: Vec<u8>,
    /// Bytes for the layer above
    pub up: Vec<u8>,
    /// Events for the stack owner
    pub events: Vec<LayerEvent>,
}

/// Output of the whole stack.
#[derive(Debug, Default)]
pub struct StackOutput {
    /// Bytes for the transport
    pub to_transport: Vec<u8>,
    /// Bytes for the XML parser
    pub to_parser: Vec<u8>,
    /// Events raised by layers, in order
    pub events: Vec<LayerEvent>,
}

/// A bidirectional transformation.
pub trait StreamLayer: Any {
    /// Transform outgoing bytes.
    fn write_data(&mut self, data: &[u8], io: &mut LayerIo);

    /// Transform incoming bytes.
    fn handle_data_read(&mut self, data: &[u8], io: &mut LayerIo);

    /// React to a timer.
    fn handle_timer(&mut self, _kind: TimerKind, _io: &mut LayerIo) {}

    /// Upcast for [`LayerStack::get_mut`].
    fn as_any(&self) -> &dyn Any;

    /// Upcast for [`LayerStack::get_mut`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Ordered chain of layers.
#[derive(Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn StreamLayer>>,
}

impl LayerStack {
    /// Create an empty stack. Data passes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Add a layer on top.
    pub fn push(&mut self, layer: Box<dyn StreamLayer>) {
        self.layers.push(layer);
    }

    /// Insert a layer at `index`, shifting the layers above it up.
    ///
    /// `pending` holds bytes which already left the top of the stack but
    /// were not consumed yet; they are replayed from the new layer upward.
    /// Layers above `index` therefore see them a second time, which is only
    /// correct for layers which pass reads through unchanged.
    pub fn insert(
        &mut self,
        index: usize,
        layer: Box<dyn StreamLayer>,
        pending: &[u8],
    ) -> StackOutput {
        assert!(index <= self.layers.len());
        self.layers.insert(index, layer);
        let mut out = StackOutput::default();
        if !pending.is_empty() {
            log::trace!(
                "Replaying {} buffered bytes through new layer at {}",
                pending.len(),
                index
            );
            self.read_from(index, pending, &mut out);
        }
        out
    }

    /// Position of the first layer of type `L`.
    pub fn position<L: StreamLayer>(&self) -> Option<usize> {
        self.layers.iter().position(|l| l.as_any().is::<L>())
    }

    /// First layer of type `L`.
    pub fn get<L: StreamLayer>(&self) -> Option<&L> {
        self.layers
            .iter()
            .find_map(|l| l.as_any().downcast_ref::<L>())
    }

    /// First layer of type `L`, mutably.
    pub fn get_mut<L: StreamLayer>(&mut self) -> Option<&mut L> {
        self.layers
            .iter_mut()
            .find_map(|l| l.as_any_mut().downcast_mut::<L>())
    }

    /// Send bytes from the top of the stack to the transport.
    pub fn write(&mut self, data: &[u8]) -> StackOutput {
        self.write_below(self.layers.len(), data)
    }

    /// Send bytes down through the layers below `index`.
    fn write_below(&mut self, index: usize, data: &[u8]) -> StackOutput {
        let mut out = StackOutput::default();
        self.write_from(index, data, &mut out);
        out
    }

    /// Feed bytes from the transport up to the parser.
    pub fn handle_data_read(&mut self, data: &[u8]) -> StackOutput {
        let mut out = StackOutput::default();
        self.read_from(0, data, &mut out);
        out
    }

    /// Deliver a timer to every layer.
    pub fn handle_timer(&mut self, kind: TimerKind) -> StackOutput {
        let mut out = StackOutput::default();
        for index in 0..self.layers.len() {
            let mut io = LayerIo::default();
            self.layers[index].handle_timer(kind, &mut io);
            self.dispatch(index, io, &mut out);
        }
        out
    }

    fn write_from(&mut self, index: usize, data: &[u8], out: &mut StackOutput) {
        if data.is_empty() {
            return;
        }
        if index == 0 {
            out.to_transport.extend_from_slice(data);
            return;
        }
        let mut io = LayerIo::default();
        self.layers[index - 1].write_data(data, &mut io);
        self.dispatch(index - 1, io, out);
    }

    fn read_from(&mut self, index: usize, data: &[u8], out: &mut StackOutput) {
        if data.is_empty() {
            return;
        }
        if index == self.layers.len() {
            out.to_parser.extend_from_slice(data);
            return;
        }
        let mut io = LayerIo::default();
        self.layers[index].handle_data_read(data, &mut io);
        self.dispatch(index, io, out);
    }

    /// Route the output of the layer at `index` to its neighbours.
    fn dispatch(&mut self, index: usize, io: LayerIo, out: &mut StackOutput) {
        out.events.extend(io.events);
        self.write_from(index, &io.down, out);
        self.read_from(index + 1, &io.up, out);
    }
}
