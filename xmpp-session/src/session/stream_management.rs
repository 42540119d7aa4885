// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::fmt;
use std::collections::VecDeque;

use crate::event::Stanza;

/// Counters go up to u32 and wrap. Past half the number space a wrapped
/// difference reads as negative (RFC 1982), so the queue stays below that.
const MAX_QUEUE_SIZE: usize = (u32::MAX / 2 - 1) as usize;

#[derive(Debug)]
pub(super) enum SmResumeInfo {
    NotResumable,
    Resumable {
        /// XEP-0198 stream ID
        id: String,

        /// Preferred reconnection location indicated by the peer
        location: Option<String>,
    },
}

/// XEP-0198 acknowledgement state of an established session.
pub(super) struct SmState {
    /// Last value seen from the remote stanza counter.
    outbound_base: u32,

    /// Counter for received stanzas
    inbound_ctr: u32,

    resumption: SmResumeInfo,

    /// Unacked stanzas in the order they were sent
    unacked_stanzas: VecDeque<Stanza>,
}

impl fmt::Debug for SmState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SmState")
            .field("outbound_base", &self.outbound_base)
            .field("inbound_ctr", &self.inbound_ctr)
            .field("resumption", &self.resumption)
            .field("len(unacked_stanzas)", &self.unacked_stanzas.len())
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum SmError {
    RemoteAckedMoreStanzas {
        local_base: u32,
        queue_len: u32,
        remote_ctr: u32,
    },
    RemoteAckWentBackwards {
        local_base: u32,
        remote_ctr: u32,
    },
    QueueFull,
}

impl fmt::Display for SmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RemoteAckedMoreStanzas {
                local_base,
                queue_len,
                remote_ctr,
            } => {
                let local_tip = local_base.wrapping_add(*queue_len);
                write!(f, "remote acked more stanzas than we sent: remote counter = {}. queue covers range {}..<{}", remote_ctr, local_base, local_tip)
            }
            Self::RemoteAckWentBackwards {
                local_base,
                remote_ctr,
            } => {
                write!(f, "remote acked less stanzas than before: remote counter = {}, local queue starts at {}", remote_ctr, local_base)
            }
            Self::QueueFull => write!(f, "too many unacknowledged stanzas"),
        }
    }
}

impl SmState {
    /// State after `<enabled/>`.
    pub fn new(id: Option<String>, resume: bool, location: Option<String>) -> Self {
        let resumption = match (resume, id) {
            (true, Some(id)) => SmResumeInfo::Resumable { id, location },
            (true, None) => {
                log::warn!("peer replied with <enabled resume='true'/>, but without an ID! cannot make this stream resumable.");
                SmResumeInfo::NotResumable
            }
            (false, _) => SmResumeInfo::NotResumable,
        };
        Self {
            outbound_base: 0,
            inbound_ctr: 0,
            resumption,
            unacked_stanzas: VecDeque::new(),
        }
    }

    /// Keep a sent stanza until the peer acknowledges it.
    pub fn enqueue(&mut self, stanza: Stanza) -> Result<(), SmError> {
        if self.unacked_stanzas.len() >= MAX_QUEUE_SIZE {
            return Err(SmError::QueueFull);
        }
        self.unacked_stanzas.push_back(stanza);
        log::trace!(
            "Stored stanza in SmState. We are now at {} unacked stanzas.",
            self.unacked_stanzas.len()
        );
        Ok(())
    }

    /// Count a received stanza.
    pub fn count_inbound(&mut self) {
        self.inbound_ctr = self.inbound_ctr.wrapping_add(1);
    }

    /// Process remote `<a/>`, returning the stanzas it acknowledges.
    pub fn remote_acked(&mut self, h: u32) -> Result<Vec<Stanza>, SmError> {
        log::debug!("remote_acked: {self:?}::remote_acked({h})");
        let to_drop = h.wrapping_sub(self.outbound_base) as usize;
        if to_drop == 0 {
            log::trace!("remote_acked: no stanzas to drop");
            return Ok(Vec::new());
        }
        if to_drop > self.unacked_stanzas.len() {
            if to_drop as u32 > u32::MAX / 2 {
                return Err(SmError::RemoteAckWentBackwards {
                    local_base: self.outbound_base,
                    remote_ctr: h,
                });
            }
            return Err(SmError::RemoteAckedMoreStanzas {
                local_base: self.outbound_base,
                queue_len: self.unacked_stanzas.len() as u32,
                remote_ctr: h,
            });
        }
        self.outbound_base = h;
        log::debug!("remote_acked: remote acked {to_drop} stanzas");
        Ok(self.unacked_stanzas.drain(..to_drop).collect())
    }

    /// Get the current inbound counter.
    #[inline(always)]
    pub fn inbound_ctr(&self) -> u32 {
        self.inbound_ctr
    }

    /// Stream id for resumption, if the peer granted it.
    pub fn resumption_id(&self) -> Option<&str> {
        match self.resumption {
            SmResumeInfo::Resumable { ref id, .. } => Some(id),
            SmResumeInfo::NotResumable => None,
        }
    }

    /// Preferred reconnection location, if the peer gave one.
    pub fn location(&self) -> Option<&str> {
        match self.resumption {
            SmResumeInfo::Resumable { ref location, .. } => location.as_deref(),
            SmResumeInfo::NotResumable => None,
        }
    }
}
