//! Presentation side: takes the latest processed frame on each display tick.

pub mod surface;

pub use surface::SurfacePresenter;

use crate::handoff::HandoffSlot;
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Something a finished frame can be shown on.
pub trait PresentTarget {
    type Frame;

    /// Copy `frame` onto the target and present it. Must not wait for the GPU.
    fn present(&mut self, frame: &Self::Frame) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    Idle,
    Presenting,
}

/// What a single display tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented,
    /// Nothing new in the slot; the previous frame stays on screen.
    NoFrame,
    /// A previous tick was still presenting; nothing was started.
    Busy,
    Failed,
}

/// Drives presentation from the handoff slot, one blit at a time.
pub struct PresentationDriver<T: PresentTarget> {
    slot: Arc<HandoffSlot<T::Frame>>,
    target: Mutex<T>,
    presenting: AtomicBool,
}

struct PresentingGuard<'a>(&'a AtomicBool);

impl Drop for PresentingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: PresentTarget> PresentationDriver<T> {
    pub fn new(slot: Arc<HandoffSlot<T::Frame>>, target: T) -> Self {
        Self {
            slot,
            target: Mutex::new(target),
            presenting: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PresentState {
        if self.presenting.load(Ordering::Acquire) {
            PresentState::Presenting
        } else {
            PresentState::Idle
        }
    }

    /// Handle one display tick. Never blocks on the producer or on another tick.
    pub fn tick(&self) -> TickOutcome {
        if self
            .presenting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TickOutcome::Busy;
        }
        let _guard = PresentingGuard(&self.presenting);

        let Some(frame) = self.slot.take_latest() else {
            return TickOutcome::NoFrame;
        };

        match self.target.lock().present(&frame) {
            Ok(()) => TickOutcome::Presented,
            Err(e) => {
                warn!("Presentation failed: {:#}", e);
                TickOutcome::Failed
            }
        }
    }

    /// Run `f` against the target, e.g. to resize it. Waits for an in-flight present.
    pub fn with_target<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.target.lock())
    }
}

/// Region of a blit: the smaller of the frame and the surface in each dimension.
pub fn blit_extent(frame: (u32, u32), surface: (u32, u32)) -> (u32, u32) {
    (frame.0.min(surface.0), frame.1.min(surface.1))
}

/// Fallback when the monitor does not report its refresh rate.
pub const DEFAULT_REFRESH_HZ: u32 = 60;

/// Spaces display ticks at a fixed interval.
#[derive(Debug, Clone)]
pub struct TickPacer {
    interval: Duration,
    next: Instant,
}

impl TickPacer {
    /// `cap` wins over the monitor rate; either falls back to [`DEFAULT_REFRESH_HZ`].
    pub fn new(cap: Option<u32>, native_hz: Option<u32>, now: Instant) -> Self {
        let hz = cap
            .filter(|hz| *hz > 0)
            .or(native_hz.filter(|hz| *hz > 0))
            .unwrap_or(DEFAULT_REFRESH_HZ);
        Self {
            interval: Duration::from_secs_f64(1.0 / hz as f64),
            next: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    /// True when a tick is due at `now`. Missed ticks are not replayed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.interval;
        if self.next <= now {
            self.next = now + self.interval;
        }
        true
    }
}
