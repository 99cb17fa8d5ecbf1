//! Device lifecycle and control plane: probe, disconnect, rate-change and
//! routing-change sequences, plus the shared state the transport, HID and
//! streaming modules read through `Weak`/`Arc` handles.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{
    Deck, DeviceConfig, Direction, Rate, RoutingMode, ALT_SETTING_STREAMING, EP_ISO_IN, EP_ISO_OUT,
    HANDSHAKE_STABILIZE_MS, HID_REPORT_SIZE, IFACE_AUDIO_IN, IFACE_AUDIO_OUT, IFACE_HID,
    PRODUCT_ID, RATE_CHANGE_STABILIZE_MS, VENDOR_ID,
};
use crate::error::{DeviceError, DeviceResult, TransportError};
use crate::hid::{Command, HidChannel};
use crate::notify::{ControlNotifier, Event};
use crate::pcm::{PcmSink, PcmSource};
use crate::stream::{FeedbackSamples, Stream};
use crate::transport::TransportState;
use crate::transport::TransportStateCell;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub urbs_completed: [u64; 2],
    pub underruns: u64,
    pub overruns: u64,
    pub discontinuities: u64,
}

fn direction_index(direction: Direction) -> usize {
    match direction {
        Direction::Playback => 0,
        Direction::Capture => 1,
    }
}

struct ControlState {
    current_rate: Rate,
    routing: [RoutingMode; 3],
}

/// The root object. Held behind an `Arc` so that every URB and the HID
/// channel can carry a `Weak<DeviceInner>` back-reference that survives
/// hot-unplug without ever dangling.
pub struct DeviceInner {
    handle: rusb::DeviceHandle<rusb::Context>,
    pub(crate) transport_state: TransportStateCell,
    pub(crate) hid: HidChannel,
    pub(crate) playback: Stream,
    pub(crate) capture: Stream,
    control_state: Mutex<ControlState>,
    pub(crate) overload_cache: Mutex<[u8; 6]>,
    pub(crate) phono_cache: Mutex<[u8; 3]>,
    usb_port_cache: Mutex<[u8; 4]>,
    pub(crate) notifier: Arc<dyn ControlNotifier>,
    counters: Mutex<Counters>,
    feedback: Arc<FeedbackSamples>,
}

impl DeviceInner {
    pub(crate) fn usb_handle(&self) -> &rusb::DeviceHandle<rusb::Context> {
        &self.handle
    }

    /// Idempotent: only the first observer of a device-gone completion (or
    /// explicit `disconnect`) flips state and raises the notification.
    pub(crate) fn mark_disconnected(&self) {
        if self.transport_state.is_dead() {
            return;
        }
        self.transport_state.store(TransportState::Dead);
        self.notifier.notify(Event::Disconnected);
    }

    pub(crate) fn record_xrun(&self, direction: Direction) {
        let mut counters = self.counters.lock();
        match direction {
            Direction::Playback => counters.underruns += 1,
            Direction::Capture => counters.overruns += 1,
        }
    }

    pub(crate) fn record_completion(&self, direction: Direction) {
        self.counters.lock().urbs_completed[direction_index(direction)] += 1;
    }

    pub(crate) fn record_discontinuity(&self) {
        self.counters.lock().discontinuities += 1;
    }

    pub(crate) fn counters_snapshot(&self) -> Counters {
        *self.counters.lock()
    }

    pub(crate) fn feedback_snapshot(&self) -> u32 {
        self.feedback.snapshot()
    }
}

/// Public handle to a probed Rane SL3. Cheaply cloneable; every clone shares
/// the same underlying device.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

impl Device {
    /// Probe: find and open the device, claim interfaces 1-3, bring up HID,
    /// allocate both URB rings, and run the initialization handshake.
    /// Returns a fully live `Device` or unwinds cleanly.
    pub fn open(config: DeviceConfig, notifier: Arc<dyn ControlNotifier>) -> DeviceResult<Self> {
        let context = rusb::Context::new().map_err(TransportError::Usb)?;
        let handle = find_and_open(&context)?;
        claim_interfaces(&handle)?;

        let feedback = Arc::new(FeedbackSamples::new());
        let hid = match HidChannel::new() {
            Ok(hid) => hid,
            Err(e) => {
                release_interfaces(&handle);
                return Err(e.into());
            }
        };
        let playback = match Stream::new(
            Direction::Playback,
            EP_ISO_OUT,
            feedback.clone(),
            config.default_rate,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                release_interfaces(&handle);
                return Err(e.into());
            }
        };
        let capture = match Stream::new(
            Direction::Capture,
            EP_ISO_IN,
            feedback.clone(),
            config.default_rate,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                release_interfaces(&handle);
                return Err(e.into());
            }
        };

        let inner: Arc<DeviceInner> = Arc::new_cyclic(|weak: &Weak<DeviceInner>| {
            playback.bind_device(weak.clone());
            capture.bind_device(weak.clone());
            DeviceInner {
                handle,
                transport_state: TransportStateCell::default(),
                hid,
                playback,
                capture,
                control_state: Mutex::new(ControlState {
                    current_rate: config.default_rate,
                    routing: [RoutingMode::Usb; 3],
                }),
                overload_cache: Mutex::new([0u8; 6]),
                phono_cache: Mutex::new([0u8; 3]),
                usb_port_cache: Mutex::new([0u8; 4]),
                notifier,
                counters: Mutex::new(Counters::default()),
                feedback,
            }
        });

        if let Err(e) = inner.hid.arm(&inner.handle, Arc::downgrade(&inner)) {
            release_interfaces(&inner.handle);
            return Err(DeviceError::Hid(e));
        }

        run_handshake(&inner, config.default_rate);

        Ok(Device(inner))
    }

    pub fn set_playback_sink(&self, sink: Option<Arc<dyn PcmSink>>) {
        self.0.playback.set_sink(sink);
    }

    pub fn set_capture_source(&self, source: Option<Arc<dyn PcmSource>>) {
        self.0.capture.set_source(source);
    }

    pub fn set_playback_period(&self, frames: usize) {
        self.0.playback.set_period_size(frames);
    }

    pub fn set_capture_period(&self, frames: usize) {
        self.0.capture.set_period_size(frames);
    }

    pub fn start_playback(&self) -> DeviceResult<()> {
        self.0
            .playback
            .start(&self.0, Some(&self.0.capture))
            .map_err(DeviceError::from)
    }

    pub fn stop_playback(&self) {
        self.0.playback.stop(&self.0, Some(&self.0.capture));
    }

    pub fn start_capture(&self) -> DeviceResult<()> {
        self.0.capture.start(&self.0, None).map_err(DeviceError::from)
    }

    pub fn stop_capture(&self) {
        self.0.capture.stop(&self.0, None);
    }

    /// Pointer query: once the device is gone, subsequent pointer queries
    /// return an error rather than a stale position.
    pub fn playback_pointer(&self) -> DeviceResult<u64> {
        self.check_alive()?;
        Ok(self.0.playback.hwptr_frames())
    }

    pub fn capture_pointer(&self) -> DeviceResult<u64> {
        self.check_alive()?;
        Ok(self.0.capture.hwptr_frames())
    }

    fn check_alive(&self) -> DeviceResult<()> {
        if self.0.transport_state.is_dead() {
            Err(DeviceError::Disconnected)
        } else {
            Ok(())
        }
    }

    pub fn rate(&self) -> Rate {
        self.0.control_state.lock().current_rate
    }

    pub fn routing(&self, deck: Deck) -> RoutingMode {
        self.0.control_state.lock().routing[deck.index()]
    }

    pub(crate) fn overload_raw(&self) -> [u8; 6] {
        *self.0.overload_cache.lock()
    }

    pub(crate) fn phono_raw(&self) -> [u8; 3] {
        *self.0.phono_cache.lock()
    }

    pub fn usb_port_raw(&self) -> [u8; 4] {
        *self.0.usb_port_cache.lock()
    }

    pub(crate) fn counters(&self) -> Counters {
        self.0.counters_snapshot()
    }

    pub(crate) fn last_feedback_samples(&self) -> u32 {
        self.0.feedback_snapshot()
    }

    /// Rate-change sequence. Holding `control_state`'s lock for the whole
    /// sequence is what doubles as the stream-serialization mutex -- there
    /// is no separate lock, since nothing else needs to read `current_rate`
    /// mid-switch.
    pub fn set_rate(&self, hz: u32) -> DeviceResult<()> {
        self.check_alive()?;
        let rate = Rate::from_hz(hz)?;
        let mut state = self.0.control_state.lock();
        if state.current_rate == rate {
            return Ok(());
        }
        if self.0.playback.is_running() || self.0.capture.is_running() {
            return Err(DeviceError::Busy);
        }
        self.0
            .hid
            .send_command(&self.0.handle, Command::SetSampleRate(rate))?;
        std::thread::sleep(Duration::from_millis(RATE_CHANGE_STABILIZE_MS));
        self.0.playback.reset_accumulator(rate);
        self.0.capture.reset_accumulator(rate);
        state.current_rate = rate;
        Ok(())
    }

    /// Routing change: fire-and-forget HID command, no-op if unchanged,
    /// with whether it actually changed reported back to the caller.
    pub fn set_routing(&self, deck: Deck, mode: RoutingMode) -> DeviceResult<bool> {
        self.check_alive()?;
        let mut state = self.0.control_state.lock();
        let idx = deck.index();
        if state.routing[idx] == mode {
            return Ok(false);
        }
        self.0.hid.send_command(
            &self.0.handle,
            Command::SetRouting {
                deck,
                mode_raw: mode.as_raw(),
            },
        )?;
        state.routing[idx] = mode;
        Ok(true)
    }

    /// Disconnect: flips the transport to `Dead`, drains both streams,
    /// tears down HID, and releases the claimed interfaces. The
    /// `DeviceInner` itself (and its URB/HID allocations) is freed once the
    /// last `Device` clone is dropped -- the Rust equivalent of freeing the
    /// card only after the last open file is closed.
    pub fn disconnect(&self) {
        self.0.mark_disconnected();
        self.0.playback.stop(&self.0, Some(&self.0.capture));
        self.0.capture.stop(&self.0, None);
        self.0.hid.shutdown();
        release_interfaces(&self.0.handle);
    }
}

fn find_and_open(
    context: &rusb::Context,
) -> Result<rusb::DeviceHandle<rusb::Context>, TransportError> {
    let devices = context.devices().map_err(TransportError::Usb)?;
    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if descriptor.vendor_id() == VENDOR_ID && descriptor.product_id() == PRODUCT_ID {
            return device.open().map_err(TransportError::Usb);
        }
    }
    Err(TransportError::DeviceGone)
}

/// Claims interfaces 1 (audio-out), 2 (audio-in) and 3 (HID), selecting
/// alt-setting 1 on the two streaming interfaces. On any failure, unwinds
/// in strict reverse order.
fn claim_interfaces(handle: &rusb::DeviceHandle<rusb::Context>) -> Result<(), TransportError> {
    let mut claimed: Vec<u8> = Vec::new();
    let result: Result<(), rusb::Error> = (|| {
        handle.claim_interface(IFACE_AUDIO_OUT)?;
        claimed.push(IFACE_AUDIO_OUT);
        handle.set_alternate_setting(IFACE_AUDIO_OUT, ALT_SETTING_STREAMING)?;

        handle.claim_interface(IFACE_AUDIO_IN)?;
        claimed.push(IFACE_AUDIO_IN);
        handle.set_alternate_setting(IFACE_AUDIO_IN, ALT_SETTING_STREAMING)?;

        handle.claim_interface(IFACE_HID)?;
        claimed.push(IFACE_HID);
        Ok(())
    })();

    if let Err(e) = result {
        for iface in claimed.into_iter().rev() {
            let _ = handle.set_alternate_setting(iface, 0);
            let _ = handle.release_interface(iface);
        }
        return Err(TransportError::Usb(e));
    }
    Ok(())
}

fn release_interfaces(handle: &rusb::DeviceHandle<rusb::Context>) {
    for iface in [IFACE_HID, IFACE_AUDIO_IN, IFACE_AUDIO_OUT] {
        let _ = handle.set_alternate_setting(iface, 0);
        let _ = handle.release_interface(iface);
    }
}

/// Initialization handshake: Init, Status query, Set sample rate, Query
/// phono, then a 100 ms stabilization sleep. Failures are logged as
/// warnings and do not abort probe.
fn run_handshake(inner: &Arc<DeviceInner>, default_rate: Rate) {
    let mut issue = |cmd: Command, label: &str| -> Option<[u8; HID_REPORT_SIZE]> {
        match inner.hid.send_command(&inner.handle, cmd) {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("HID handshake step '{label}' failed: {e}");
                None
            }
        }
    };

    issue(Command::Init, "init");
    // Status query's response is round-tripped but its payload is never
    // consumed; its meaning is undocumented.
    issue(Command::StatusQuery, "status query");
    issue(Command::SetSampleRate(default_rate), "set sample rate");
    if let Some(resp) = issue(Command::QueryPhono, "query phono") {
        let mut phono = [0u8; 3];
        phono.copy_from_slice(&resp[5..8]);
        *inner.phono_cache.lock() = phono;
    }

    std::thread::sleep(Duration::from_millis(HANDSHAKE_STABILIZE_MS));
}
