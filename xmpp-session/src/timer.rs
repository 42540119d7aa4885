// Copyright (c) 2025 xmpp-session contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Timer abstraction.
//!
//! Timers never call back into the session directly. When one fires, the
//! owner of the event loop is handed an [`Input::Timer`] and routes it to
//! [`ClientSession::handle_timer`][`crate::session::ClientSession::handle_timer`].

use core::time::Duration;
use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connect::Input;

/// Purpose of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Bounds the time the session may spend negotiating
    Negotiation,
    /// Interval of whitespace keepalives
    WhitespacePing,
}

/// A one-shot timer.
pub trait Timer {
    /// Arm the timer. Restarts it if it is already running.
    fn start(&mut self);

    /// Disarm the timer.
    fn stop(&mut self);
}

/// Creates timers on behalf of the session and its stream.
pub trait TimerFactory {
    /// Create a stopped timer which fires `after` once started.
    fn create_timer(&self, kind: TimerKind, after: Duration) -> Box<dyn Timer>;
}

#[derive(Debug)]
struct ManualTimerEntry {
    kind: TimerKind,
    after: Duration,
    running: bool,
}

/// Timer factory which only records timer state.
///
/// Firing is up to the caller, who checks [`ManualTimerFactory::is_running`]
/// and then delivers the [`TimerKind`] to the session. This is what a
/// sans-IO embedding or a test uses.
#[derive(Debug, Clone, Default)]
pub struct ManualTimerFactory {
    timers: Rc<RefCell<Vec<ManualTimerEntry>>>,
}

impl ManualTimerFactory {
    /// Create a factory with no timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a timer of `kind` is currently armed.
    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.timers
            .borrow()
            .iter()
            .any(|t| t.kind == kind && t.running)
    }

    /// Interval of the armed timer of `kind`, if any.
    pub fn interval(&self, kind: TimerKind) -> Option<Duration> {
        self.timers
            .borrow()
            .iter()
            .find(|t| t.kind == kind && t.running)
            .map(|t| t.after)
    }
}

struct ManualTimer {
    index: usize,
    timers: Rc<RefCell<Vec<ManualTimerEntry>>>,
}

impl Timer for ManualTimer {
    fn start(&mut self) {
        self.timers.borrow_mut()[self.index].running = true;
    }

    fn stop(&mut self) {
        self.timers.borrow_mut()[self.index].running = false;
    }
}

impl Drop for ManualTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TimerFactory for ManualTimerFactory {
    fn create_timer(&self, kind: TimerKind, after: Duration) -> Box<dyn Timer> {
        let mut timers = self.timers.borrow_mut();
        timers.push(ManualTimerEntry {
            kind,
            after,
            running: false,
        });
        Box::new(ManualTimer {
            index: timers.len() - 1,
            timers: self.timers.clone(),
        })
    }
}

/// Timer factory backed by the tokio runtime.
///
/// Expired timers post [`Input::Timer`] into the event loop's channel.
/// Timers must be started from within a runtime context.
#[derive(Debug, Clone)]
pub struct TokioTimerFactory {
    tx: mpsc::UnboundedSender<Input>,
}

impl TokioTimerFactory {
    /// Create a factory posting into `tx`.
    pub fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }
}

struct TokioTimer {
    kind: TimerKind,
    after: Duration,
    tx: mpsc::UnboundedSender<Input>,
    task: Option<JoinHandle<()>>,
}

impl Timer for TokioTimer {
    fn start(&mut self) {
        self.stop();
        let (kind, after, tx) = (self.kind, self.after, self.tx.clone());
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            log::trace!("Timer {:?} fired after {:?}", kind, after);
            let _: Result<_, _> = tx.send(Input::Timer(kind));
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TimerFactory for TokioTimerFactory {
    fn create_timer(&self, kind: TimerKind, after: Duration) -> Box<dyn Timer> {
        Box::new(TokioTimer {
            kind,
            after,
            tx: self.tx.clone(),
            task: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_timer_state() {
        let factory = ManualTimerFactory::new();
        let mut timer = factory.create_timer(TimerKind::Negotiation, Duration::from_secs(3));
        assert!(!factory.is_running(TimerKind::Negotiation));
        timer.start();
        assert!(factory.is_running(TimerKind::Negotiation));
        assert_eq!(
            factory.interval(TimerKind::Negotiation),
            Some(Duration::from_secs(3))
        );
        drop(timer);
        assert!(!factory.is_running(TimerKind::Negotiation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = TokioTimerFactory::new(tx);
        let mut timer = factory.create_timer(TimerKind::WhitespacePing, Duration::from_secs(30));
        timer.start();
        match rx.recv().await {
            Some(Input::Timer(TimerKind::WhitespacePing)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = TokioTimerFactory::new(tx);
        let mut timer = factory.create_timer(TimerKind::Negotiation, Duration::from_secs(1));
        timer.start();
        timer.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
