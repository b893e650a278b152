//! Quadrature decoding for a two-line rotary encoder.
//!
//! ```text
//!           +---------+         +---------+      0
//!  A        |         |         |         |
//!  ---------+         +---------+         +----- 1
//!
//!      +---------+         +---------+            0
//!  B   |         |         |         |
//!  ----+         +---------+         +---------+  1
//! ```
//!
//! Each edge on either line is folded with the previous two-bit state into a
//! four-bit transition code. Only the eight single-step Gray-code transitions
//! move the position; everything else is bounce or a missed edge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinLevels {
    pub a: bool,
    pub b: bool,
}

impl PinLevels {
    pub fn new(a: bool, b: bool) -> Self {
        Self { a, b }
    }

    pub fn encoded(self) -> u8 {
        (u8::from(self.a) << 1) | u8::from(self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Forward,
    Reverse,
}

impl Step {
    pub fn delta(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    Stepped(Step),
    /// Transition outside both step sets; state updated, position untouched.
    Glitch,
    /// Another edge was being decoded; nothing changed.
    Dropped,
}

pub fn classify_transition(sum: u8) -> Option<Step> {
    match sum & 0b1111 {
        0b1101 | 0b0100 | 0b0010 | 0b1011 => Some(Step::Forward),
        0b1110 | 0b0111 | 0b0001 | 0b1000 => Some(Step::Reverse),
        _ => None,
    }
}

/// Detent counter shared between the edge callbacks and the poll loop.
#[derive(Debug, Clone, Default)]
pub struct EncoderPosition(Arc<AtomicI64>);

impl EncoderPosition {
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    fn apply(&self, step: Step) {
        self.0.fetch_add(step.delta(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct QuadratureDecoder {
    last_encoded: AtomicU8,
    busy: AtomicBool,
    position: EncoderPosition,
}

impl QuadratureDecoder {
    pub fn new(position: EncoderPosition) -> Self {
        Self {
            last_encoded: AtomicU8::new(0),
            busy: AtomicBool::new(false),
            position,
        }
    }

    pub fn seed(&self, levels: PinLevels) {
        self.last_encoded.store(levels.encoded(), Ordering::Relaxed);
    }

    pub fn position(&self) -> &EncoderPosition {
        &self.position
    }

    pub fn last_encoded(&self) -> u8 {
        self.last_encoded.load(Ordering::Relaxed)
    }

    /// Edge callback body. Safe to call from several interrupt threads; calls
    /// overlapping an in-progress decode are dropped.
    pub fn on_edge(&self, levels: PinLevels) -> EdgeOutcome {
        let Some(_section) = self.enter() else {
            return EdgeOutcome::Dropped;
        };

        let encoded = levels.encoded();
        let sum = (self.last_encoded.load(Ordering::Relaxed) << 2) | encoded;
        self.last_encoded.store(encoded, Ordering::Relaxed);

        match classify_transition(sum) {
            Some(step) => {
                self.position.apply(step);
                EdgeOutcome::Stepped(step)
            }
            None => EdgeOutcome::Glitch,
        }
    }

    fn enter(&self) -> Option<CriticalSection<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| CriticalSection { busy: &self.busy })
    }
}

struct CriticalSection<'a> {
    busy: &'a AtomicBool,
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
