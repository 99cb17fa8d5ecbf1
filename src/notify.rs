//! The host notification bus boundary and the in-process events the
//! completion/HID-dispatch contexts emit towards it.
//!
//! Completion callbacks never block, so every signal that needs to leave a
//! completion context goes through a bounded `crossbeam-channel` and a
//! non-blocking `try_send`. A full channel means a slow consumer, not a
//! reason to stall real-time work; it is logged and dropped.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::Direction;

/// A host-visible event raised while a stream or the HID channel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A period boundary was crossed.
    PeriodElapsed(Direction),
    /// A persistent transport error was recorded as an xrun.
    Xrun(Direction),
    /// The device went away.
    Disconnected,
    /// Overload Status changed (report code 0x34).
    OverloadChanged,
    /// Phono Switch Status changed (report code 0x38).
    PhonoChanged,
}

/// A trait a host integration implements to receive [`Event`]s, mirroring
/// how the PCM traits in `pcm.rs` stand in for the ALSA/JACK side. Provided
/// so callers who don't want to drain a channel themselves can plug in a
/// callback-shaped notifier instead.
pub trait ControlNotifier: Send + Sync {
    fn notify(&self, event: Event);
}

/// A `ControlNotifier` backed by a bounded channel, used internally by
/// `Device` and handed out to callers who'd rather poll than implement a
/// trait.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: Sender<Event>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, Receiver<Event>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl ControlNotifier for ChannelNotifier {
    fn notify(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("notification channel full, dropping {event:?}");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("notification channel has no receiver, dropping {event:?}");
            }
        }
    }
}
