//! The streaming engine: per-direction isochronous ring pumping audio
//! between a host PCM ring and USB packets.

pub mod clock;

use std::os::raw::c_int;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libusb1_sys::libusb_transfer;
use parking_lot::Mutex;

use crate::config::{
    Direction, Rate, FRAME_BYTES, ISO_PACKETS, MAX_PACKET_FRAMES, MAX_PACKET_SIZE, NUM_URBS,
    TRANSFER_BUFFER_SIZE,
};
use crate::device::DeviceInner;
use crate::error::{StreamError, TransportError};
use crate::notify::Event;
use crate::pcm::{PcmSink, PcmSource};
use crate::transport::urb::IsoUrb;
use crate::transport::{CompletionStatus, LogRateLimiter, UrbUserData};

pub use clock::RateClock;

/// Minimum gap between consecutive "iso transfer overflow" log lines.
const OVERFLOW_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Device-wide implicit-feedback value: the most recent capture URB's total
/// sample count, published by the capture completion path and consumed by
/// the next playback fill as an implicit feedback signal. A plain atomic is
/// enough here: there is exactly one writer (capture completion) and the
/// reader only ever takes a single snapshot.
#[derive(Default)]
pub struct FeedbackSamples(AtomicU32);

impl FeedbackSamples {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn publish(&self, samples: u32) {
        self.0.store(samples, Ordering::Release);
    }

    pub fn snapshot(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// The mutable state a single stream direction's lock protects: URB
/// contexts, the ring position, the per-period accumulator and the running
/// flag.
struct StreamState {
    urbs: Vec<IsoUrb>,
    last_len: Vec<u32>,
    running: bool,
    hwptr: u64,
    transfer_done: u64,
    period_size: usize,
    clock: RateClock,
    sink: Option<Arc<dyn PcmSink>>,
    source: Option<Arc<dyn PcmSource>>,
}

/// One direction's isochronous ring. `Device` owns one of these for playback
/// and one for capture.
pub struct Stream {
    direction: Direction,
    endpoint: u8,
    feedback: Arc<FeedbackSamples>,
    state: Mutex<StreamState>,
    overflow_log_limiter: LogRateLimiter,
}

impl Stream {
    /// Allocates the fixed 16-URB ring. Allocation failures roll back
    /// atomically: the partially filled `Vec<IsoUrb>` is dropped, and each
    /// `IsoUrb::drop` frees its own transfer.
    pub fn new(
        direction: Direction,
        endpoint: u8,
        feedback: Arc<FeedbackSamples>,
        rate: Rate,
    ) -> Result<Self, TransportError> {
        let mut urbs = Vec::with_capacity(NUM_URBS);
        for index in 0..NUM_URBS {
            urbs.push(IsoUrb::alloc(index)?);
        }
        Ok(Self {
            direction,
            endpoint,
            feedback,
            state: Mutex::new(StreamState {
                last_len: vec![0u32; urbs.len()],
                urbs,
                running: false,
                hwptr: 0,
                transfer_done: 0,
                period_size: 0,
                clock: RateClock::new(rate),
                sink: None,
                source: None,
            }),
            overflow_log_limiter: LogRateLimiter::new(OVERFLOW_LOG_INTERVAL),
        })
    }

    /// Binds each URB's completion `user_data` to a weak handle back to the
    /// owning device. Called once, right after the device's `Arc` is
    /// constructed (see `device::Device::open`'s use of `Arc::new_cyclic`)
    /// since the weak handle cannot exist beforehand.
    pub fn bind_device(&self, device: std::sync::Weak<DeviceInner>) {
        let mut state = self.state.lock();
        for (index, urb) in state.urbs.iter_mut().enumerate() {
            urb.bind(UrbUserData {
                device: device.clone(),
                direction: self.direction,
                index,
            });
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn has_user_source(&self) -> bool {
        self.state.lock().source.is_some()
    }

    pub fn set_sink(&self, sink: Option<Arc<dyn PcmSink>>) {
        self.state.lock().sink = sink;
    }

    pub fn set_source(&self, source: Option<Arc<dyn PcmSource>>) {
        self.state.lock().source = source;
    }

    pub fn set_period_size(&self, frames: usize) {
        self.state.lock().period_size = frames;
    }

    pub fn hwptr_frames(&self) -> u64 {
        self.state.lock().hwptr
    }

    /// Resets the fractional accumulator at every rate switch.
    pub fn reset_accumulator(&self, rate: Rate) {
        self.state.lock().clock.set_rate(rate);
    }

    /// Start: idempotent, pre-fills all URBs, flips `running` before
    /// recursively starting the sibling stream (implicit feedback source),
    /// then submits.
    pub fn start(
        &self,
        device: &Arc<DeviceInner>,
        sibling: Option<&Stream>,
    ) -> Result<(), StreamError> {
        if device.transport_state.is_dead() {
            return Err(StreamError::DeviceGone);
        }
        let mut state = self.state.lock();
        if state.running {
            return Ok(());
        }
        if self.direction == Direction::Playback {
            state.clock.reset();
        }
        let count = state.urbs.len();
        for index in 0..count {
            match self.direction {
                Direction::Playback => {
                    self.fill_playback_urb(&mut state, index, false);
                }
                Direction::Capture => {
                    self.prep_capture_urb(&mut state, index);
                    state.last_len[index] = TRANSFER_BUFFER_SIZE as u32;
                }
            }
        }
        state.running = true;
        drop(state);

        if self.direction == Direction::Playback {
            if let Some(capture) = sibling {
                if !capture.is_running() {
                    if let Err(e) = capture.start(device, None) {
                        self.state.lock().running = false;
                        return Err(e);
                    }
                }
            }
        }

        let handle = device.usb_handle();
        let callback = match self.direction {
            Direction::Playback => playback_completion,
            Direction::Capture => capture_completion,
        };
        let mut state = self.state.lock();
        for index in 0..count {
            let len = state.last_len[index];
            if let Err(e) = unsafe {
                state.urbs[index].submit(handle.as_raw(), self.endpoint, len as c_int, callback)
            } {
                state.running = false;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Stop: marks not-running, kills every URB (which synchronously drains
    /// completions through the host's libusb event loop), then stops the
    /// sibling stream if it was only running as an implicit-feedback source.
    pub fn stop(&self, device: &Arc<DeviceInner>, sibling: Option<&Stream>) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        for urb in state.urbs.iter_mut() {
            urb.cancel();
        }
        drop(state);

        if self.direction == Direction::Playback {
            if let Some(capture) = sibling {
                if capture.is_running() && !capture.has_user_source() {
                    capture.stop(device, None);
                }
            }
        }
    }

    /// Dispatched from the completion trampoline below for one URB's
    /// completion.
    fn on_completion(&self, index: usize, device: &Arc<DeviceInner>) {
        let mut state = self.state.lock();
        if !state.running {
            // stop() drains; a late completion must not mutate state.
            return;
        }
        let status = state.urbs[index].status();
        let periods = match status {
            CompletionStatus::Ok => self.handle_ok(&mut state, index, device),
            CompletionStatus::Cancelled => 0,
            CompletionStatus::DeviceGone => {
                drop(state);
                device.mark_disconnected();
                return;
            }
            CompletionStatus::Stall => {
                let handle = device.usb_handle();
                let _ = handle.clear_halt(self.endpoint);
                device.record_discontinuity();
                let len = state.last_len[index];
                self.resubmit(&mut state, index, device, len);
                0
            }
            CompletionStatus::Overflow => {
                if self.overflow_log_limiter.allow() {
                    log::warn!("{:?} iso transfer overflow on urb {index}", self.direction);
                }
                device.record_discontinuity();
                let len = state.last_len[index];
                self.resubmit(&mut state, index, device, len);
                0
            }
            CompletionStatus::Other => {
                state.urbs[index].consecutive_errors += 1;
                if state.urbs[index].consecutive_errors >= 3 {
                    drop(state);
                    device.record_xrun(self.direction);
                    device.notifier.notify(Event::Xrun(self.direction));
                    return;
                }
                let len = state.last_len[index];
                self.resubmit(&mut state, index, device, len);
                0
            }
        };
        drop(state);
        for _ in 0..periods {
            device.notifier.notify(Event::PeriodElapsed(self.direction));
        }
    }

    fn handle_ok(&self, state: &mut StreamState, index: usize, device: &Arc<DeviceInner>) -> u32 {
        state.urbs[index].consecutive_errors = 0;
        device.record_completion(self.direction);
        let total_len = match self.direction {
            Direction::Playback => {
                let capture_running = device.capture.is_running();
                self.fill_playback_urb(state, index, capture_running)
            }
            Direction::Capture => {
                let samples = self.intake_capture_urb(state, index);
                self.feedback.publish(samples);
                self.prep_capture_urb(state, index);
                state.last_len[index] = TRANSFER_BUFFER_SIZE as u32;
                TRANSFER_BUFFER_SIZE as u32
            }
        };
        let periods = periods_crossed(&mut state.transfer_done, state.period_size);
        self.resubmit(state, index, device, total_len);
        periods
    }

    fn resubmit(&self, state: &mut StreamState, index: usize, device: &Arc<DeviceInner>, len: u32) {
        if device.transport_state.is_dead() {
            return;
        }
        let handle = device.usb_handle();
        let callback = match self.direction {
            Direction::Playback => playback_completion,
            Direction::Capture => capture_completion,
        };
        if let Err(e) = unsafe {
            state.urbs[index].submit(handle.as_raw(), self.endpoint, len as c_int, callback)
        } {
            log::warn!("failed to resubmit {:?} urb {index}: {e}", self.direction);
        }
    }

    /// Playback URB fill: distributes implicit feedback first, falls back
    /// to the rate-clock pattern, copies from the host ring (or zero-fills
    /// if none is attached), and advances `hwptr`/`transfer_done`.
    fn fill_playback_urb(&self, state: &mut StreamState, index: usize, capture_running: bool) -> u32 {
        let mut feedback_total = if capture_running { self.feedback.snapshot() } else { 0 };
        let mut offset = 0usize;
        let mut total_len = 0u32;
        for packet in 0..ISO_PACKETS {
            let remaining = (ISO_PACKETS - packet) as u32;
            let samples = if feedback_total > 0 {
                let want = feedback_packet_size(feedback_total, remaining);
                feedback_total -= want;
                want
            } else {
                state.clock.next_samples()
            };
            let len = samples as usize * FRAME_BYTES;
            let mut tmp = [0u8; MAX_PACKET_SIZE];
            if let Some(sink) = &state.sink {
                sink.read_frames(state.hwptr, samples as usize, &mut tmp[..len]);
            }
            state.urbs[index].buffer_mut()[offset..offset + len].copy_from_slice(&tmp[..len]);
            state.urbs[index].set_packet_length(packet, len as u32);
            state.hwptr = state.hwptr.wrapping_add(samples as u64);
            state.transfer_done += samples as u64;
            offset += len;
            total_len += len as u32;
        }
        state.last_len[index] = total_len;
        total_len
    }

    /// Capture URB intake: truncates each packet's reported `actual_length`
    /// to a whole frame count, copies into the host ring, and returns the
    /// total sample count for feedback publication.
    fn intake_capture_urb(&self, state: &mut StreamState, index: usize) -> u32 {
        let mut offset = 0usize;
        let mut total_samples = 0u32;
        for packet in 0..ISO_PACKETS {
            let actual = state.urbs[index].packet_actual_length(packet) as usize;
            let samples = actual / FRAME_BYTES;
            let len = samples * FRAME_BYTES;
            if samples > 0 {
                let mut tmp = [0u8; MAX_PACKET_SIZE];
                tmp[..len].copy_from_slice(&state.urbs[index].buffer()[offset..offset + len]);
                if let Some(source) = &state.source {
                    source.write_frames(state.hwptr, samples, &tmp[..len]);
                }
            }
            state.hwptr = state.hwptr.wrapping_add(samples as u64);
            state.transfer_done += samples as u64;
            total_samples += samples as u32;
            offset += MAX_PACKET_SIZE;
        }
        total_samples
    }

    fn prep_capture_urb(&self, state: &mut StreamState, index: usize) {
        for packet in 0..ISO_PACKETS {
            state.urbs[index].set_packet_length(packet, MAX_PACKET_SIZE as u32);
        }
    }
}

/// Implicit-feedback distribution for one packet: ceil of what remains over
/// the packets still to come, clamped to the max packet frame count.
fn feedback_packet_size(feedback_total: u32, remaining_packets: u32) -> u32 {
    feedback_total
        .div_ceil(remaining_packets)
        .min(MAX_PACKET_FRAMES as u32)
}

/// Period-boundary bookkeeping.
fn periods_crossed(transfer_done: &mut u64, period_size: usize) -> u32 {
    if period_size == 0 {
        return 0;
    }
    let mut periods = 0;
    while *transfer_done >= period_size as u64 {
        *transfer_done -= period_size as u64;
        periods += 1;
    }
    periods
}

pub extern "system" fn playback_completion(transfer: *mut libusb_transfer) {
    completion_trampoline(transfer, Direction::Playback);
}

pub extern "system" fn capture_completion(transfer: *mut libusb_transfer) {
    completion_trampoline(transfer, Direction::Capture);
}

fn completion_trampoline(transfer: *mut libusb_transfer, expected: Direction) {
    let user_data = unsafe { &*((*transfer).user_data as *const UrbUserData) };
    debug_assert_eq!(user_data.direction, expected);
    let Some(device) = user_data.device.upgrade() else {
        return;
    };
    let stream = match user_data.direction {
        Direction::Playback => &device.playback,
        Direction::Capture => &device.capture,
    };
    stream.on_completion(user_data.index, &device);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Once a capture completion publishes a feedback total of 50 samples,
    /// the next playback fill distributes exactly 50 across its 8 packets,
    /// ceiling-per-remaining, never overshooting.
    #[test]
    fn feedback_distributes_exactly_across_eight_packets() {
        let mut total = 50u32;
        let mut sum = 0u32;
        for remaining in (1..=8u32).rev() {
            let want = feedback_packet_size(total, remaining);
            assert!(want <= MAX_PACKET_FRAMES as u32);
            total -= want;
            sum += want;
        }
        assert_eq!(sum, 50);
        assert_eq!(total, 0);
    }

    #[test]
    fn feedback_distribution_never_goes_negative_with_small_remainder() {
        let mut total = 3u32;
        for remaining in (1..=8u32).rev() {
            let want = feedback_packet_size(total, remaining);
            total -= want;
        }
        assert_eq!(total, 0);
    }

    /// Across any sequence of completions, the number of period-elapsed
    /// signals equals floor(total_frames_advanced / period_size).
    #[test]
    fn period_count_matches_floor_division() {
        let period_size = 100usize;
        let advances = [30u64, 40, 50, 120, 5, 255, 0, 1000];
        let mut transfer_done = 0u64;
        let mut total_periods = 0u64;
        let mut total_advanced = 0u64;
        for &advance in &advances {
            transfer_done += advance;
            total_advanced += advance;
            total_periods += periods_crossed(&mut transfer_done, period_size) as u64;
        }
        assert_eq!(total_periods, total_advanced / period_size as u64);
        assert!(transfer_done < period_size as u64);
    }

    #[test]
    fn zero_period_size_never_signals() {
        let mut transfer_done = 500u64;
        assert_eq!(periods_crossed(&mut transfer_done, 0), 0);
    }

    #[test]
    fn feedback_samples_roundtrip() {
        let feedback = FeedbackSamples::new();
        assert_eq!(feedback.snapshot(), 0);
        feedback.publish(42);
        assert_eq!(feedback.snapshot(), 42);
    }
}
