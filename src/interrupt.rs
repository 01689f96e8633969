// SPDX-License-Identifier: Apache-2.0

//! Interrupt-side state, plus static [`Mutex`].
//!
//! Two interrupt sources do real work:
//!
//! - the capture timer's update interrupt ends a window. It stops the timer, snapshots the edge
//!   count and raises the completion flag through [`CaptureHandoff`], in that order;
//! - the comparator edge interrupt, outside of a capture, acts as a one-shot wake source through
//!   [`EdgeWake`].
//!
//! The poll loop reads the flag first and the count second, so the handoff needs no lock.

use core::{
    cell::{Cell, RefCell},
    sync::atomic::{AtomicBool, AtomicU16, Ordering},
};
use critical_section::Mutex;

use crate::buffer::CaptureBuffer;

/// Edges recorded by the comparator interrupt during the current window
pub static CAPTURE_EDGES: Mutex<RefCell<CaptureBuffer>> =
    Mutex::new(RefCell::new(CaptureBuffer::new()));
/// Completion of the current capture window
pub static CAPTURE_DONE: CaptureHandoff = CaptureHandoff::new();
/// External wake on a comparator edge
pub static EDGE_WAKE: EdgeWake = EdgeWake::new();

/// Single-producer/single-consumer completion signal from the timer interrupt to the poll loop.
///
/// Only atomic loads and stores are used, so this works on cores without compare-and-swap.
#[derive(Debug)]
pub struct CaptureHandoff {
    /// Edge count snapshot, valid once `done` is set
    events: AtomicU16,
    /// Window finished
    done: AtomicBool,
}

impl CaptureHandoff {
    /// Cleared handoff
    pub const fn new() -> Self {
        Self {
            events: AtomicU16::new(0),
            done: AtomicBool::new(false),
        }
    }

    /// Forget the previous window. Call before arming the timer.
    pub fn clear(&self) {
        self.done.store(false, Ordering::Release);
        self.events.store(0, Ordering::Relaxed);
    }

    /// Interrupt side: publish the edge count, then the completion flag.
    pub fn complete(&self, event_count: usize) {
        let count = u16::try_from(event_count).unwrap_or(u16::MAX);
        self.events.store(count, Ordering::Relaxed);
        self.done.store(true, Ordering::Release);
    }

    /// Poll side: the window has finished. Check before reading [`event_count`](Self::event_count).
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Edge count published by [`complete`](Self::complete)
    pub fn event_count(&self) -> usize {
        self.events.load(Ordering::Relaxed) as usize
    }
}

impl Default for CaptureHandoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback run from interrupt context when a wake edge arrives.
///
/// Must return quickly and must not call back into the measurement engines.
pub trait WakeHandler: Sync {
    /// A qualifying edge was seen
    fn on_edge(&self);
}

/// One-shot wake on a comparator edge.
///
/// Once armed, the first edge disarms the source and then runs the registered [`WakeHandler`].
/// Later edges are ignored until re-armed.
pub struct EdgeWake {
    /// Callback registered at setup
    handler: Mutex<Cell<Option<&'static dyn WakeHandler>>>,
    /// Waiting for an edge
    armed: AtomicBool,
}

impl EdgeWake {
    /// Disarmed, with no handler
    pub const fn new() -> Self {
        Self {
            handler: Mutex::new(Cell::new(None)),
            armed: AtomicBool::new(false),
        }
    }

    /// Install the callback, replacing any previous one.
    pub fn register(&self, handler: &'static dyn WakeHandler) {
        critical_section::with(|cs| self.handler.borrow(cs).set(Some(handler)));
    }

    /// Wait for the next edge
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Stop waiting
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Waiting for an edge
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Interrupt side: disarm and run the handler. Returns `false` if the source was not armed.
    pub fn on_edge(&self) -> bool {
        if !self.armed.load(Ordering::Acquire) {
            return false;
        }
        self.armed.store(false, Ordering::Release);
        match critical_section::with(|cs| self.handler.borrow(cs).get()) {
            Some(handler) => handler.on_edge(),
            None => warn!("Wake edge with no handler registered"),
        }
        true
    }
}

impl Default for EdgeWake {
    fn default() -> Self {
        Self::new()
    }
}

/// Comparator interrupt body while a capture window is open: stamp one edge.
pub fn record_edge(tick: u16) {
    if CAPTURE_DONE.is_complete() {
        return;
    }
    let stored = critical_section::with(|cs| CAPTURE_EDGES.borrow_ref_mut(cs).push(tick));
    if !stored {
        #[cfg(feature = "trace_captures")]
        trace!("Edge buffer full, dropped tick {}", tick);
    }
}

/// Timer update interrupt body, once the timer is stopped: publish the window.
pub fn finish_window() {
    let count = critical_section::with(|cs| CAPTURE_EDGES.borrow_ref(cs).len());
    CAPTURE_DONE.complete(count);
}

/// Reset the shared window before the timer is armed again.
pub fn reset_window() {
    CAPTURE_DONE.clear();
    critical_section::with(|cs| CAPTURE_EDGES.borrow_ref_mut(cs).clear());
}
