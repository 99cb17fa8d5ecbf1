//! Transport primitives: URB allocation, submission, completion classification
//! and teardown.
//!
//! This is the only part of the crate that touches `libusb1-sys` directly.
//! Everything above this module works with [`CompletionStatus`] and the safe
//! [`urb::IsoUrb`] / [`urb::InterruptUrb`] handles.

pub mod urb;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::Direction;
use crate::device::DeviceInner;

/// What a completion callback needs to find its way back to the owning
/// device and stream, without a raw back-pointer that could outlive its
/// target: a weak handle plus the (direction, index) coordinates of this URB
/// in the device's fixed arena. `Device` invalidates the handle (by dropping
/// its last `Arc<DeviceInner>`) only after every URB has been killed and
/// freed, so a callback that does manage to fire always finds either live
/// state or a handle that upgrades to `None` — never dangling memory.
pub struct UrbUserData {
    pub device: Weak<DeviceInner>,
    pub direction: Direction,
    pub index: usize,
}

/// Same idea as [`UrbUserData`], for the single persistent HID IN transfer
/// (no stream direction/index applies).
pub struct HidUserData {
    pub device: Weak<DeviceInner>,
}

/// What a completed transfer's `libusb_transfer_status` means to the rest of
/// the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Ok,
    Cancelled,
    DeviceGone,
    Stall,
    Overflow,
    Other,
}

impl CompletionStatus {
    pub fn from_raw(status: libusb1_sys::constants::libusb_transfer_status) -> Self {
        use libusb1_sys::constants::*;
        match status {
            LIBUSB_TRANSFER_COMPLETED => CompletionStatus::Ok,
            LIBUSB_TRANSFER_CANCELLED => CompletionStatus::Cancelled,
            LIBUSB_TRANSFER_NO_DEVICE => CompletionStatus::DeviceGone,
            LIBUSB_TRANSFER_STALL => CompletionStatus::Stall,
            LIBUSB_TRANSFER_OVERFLOW => CompletionStatus::Overflow,
            _ => CompletionStatus::Other,
        }
    }
}

/// The transport state machine: every submit checks for non-`Dead`, every
/// completion-time error may transition to `Dead`, and `Draining` is the
/// state held while `stop` synchronously waits out in-flight URBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Dead = 3,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TransportState::Idle,
            1 => TransportState::Running,
            2 => TransportState::Draining,
            _ => TransportState::Dead,
        }
    }
}

/// Atomic box around [`TransportState`], shared between the completion
/// context and the user/control thread without taking a lock.
pub struct TransportStateCell(AtomicU8);

impl TransportStateCell {
    pub fn new(initial: TransportState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> TransportState {
        TransportState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: TransportState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// True once the device is gone; every error path and resubmit site
    /// checks this.
    pub fn is_dead(&self) -> bool {
        matches!(self.load(), TransportState::Dead)
    }
}

impl Default for TransportStateCell {
    fn default() -> Self {
        Self::new(TransportState::Idle)
    }
}

/// Gates a log line to at most once per `interval`. Completion callbacks run
/// on libusb's event-handling thread and can fire thousands of times a
/// second under sustained error conditions; without this, a stuck device
/// would flood the log at that rate.
pub struct LogRateLimiter {
    last: Mutex<Option<Instant>>,
    interval: Duration,
}

impl LogRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            interval,
        }
    }

    /// Returns `true` the first time it's called and at most once per
    /// `interval` after that; `false` otherwise.
    pub fn allow(&self) -> bool {
        let mut last = self.last.lock();
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.interval {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}
