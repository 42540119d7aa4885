// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::any::Any;

use super::{LayerIo, StreamLayer};
use crate::timer::{Timer, TimerKind};

/// Writes a single space down the stack at every interval while enabled.
///
/// Data passes through unchanged in both directions.
pub struct WhitespacePingLayer {
    timer: Box<dyn Timer>,
    enabled: bool,
}

impl WhitespacePingLayer {
    /// Create a disabled layer driven by `timer`.
    pub fn new(timer: Box<dyn Timer>) -> Self {
        Self {
            timer,
            enabled: false,
        }
    }

    /// Whether keepalives are being sent.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start sending keepalives.
    pub fn set_active(&mut self) {
        self.enabled = true;
        self.timer.start();
    }

    /// Stop sending keepalives.
    pub fn set_inactive(&mut self) {
        self.enabled = false;
        self.timer.stop();
    }
}

impl StreamLayer for WhitespacePingLayer {
    fn write_data(&mut self, data: &[u8], io: &mut LayerIo) {
        io.down.extend_from_slice(data);
    }

    fn handle_data_read(&mut self, data: &[u8], io: &mut LayerIo) {
        io.up.extend_from_slice(data);
    }

    fn handle_timer(&mut self, kind: TimerKind, io: &mut LayerIo) {
        if kind != TimerKind::WhitespacePing || !self.enabled {
            return;
        }
        log::trace!("Sending whitespace keepalive");
        io.down.push(b' ');
        self.timer.start();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for WhitespacePingLayer {
    fn drop(&mut self) {
        self.timer.stop();
    }
}
