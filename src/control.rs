//! Mixer control plane. Each control group is a small zero-sized type
//! implementing [`Control`]; `put` reports whether the write actually
//! changed anything.

use crate::config::{Deck, RoutingMode};
use crate::device::Device;
use crate::error::DeviceError;

/// A mixer control: reads and writes go through the owning `Device`, which
/// holds the actual state and HID wiring.
pub trait Control {
    type Value;

    fn get(&self, device: &Device) -> Self::Value;

    /// Returns `Ok(true)` iff the write changed the cached value.
    fn put(&self, device: &Device, value: Self::Value) -> Result<bool, DeviceError>;
}

/// "Sample Rate": enumerated {"44100 Hz", "48000 Hz"}, R/W.
pub struct SampleRate;

impl Control for SampleRate {
    type Value = u32;

    fn get(&self, device: &Device) -> u32 {
        device.rate().as_hz()
    }

    fn put(&self, device: &Device, value: u32) -> Result<bool, DeviceError> {
        let before = device.rate();
        device.set_rate(value)?;
        Ok(device.rate() != before)
    }
}

/// "Deck A/B/C Output Source": enumerated {"Analog", "USB"}, R/W.
pub struct DeckOutputSource(pub Deck);

impl Control for DeckOutputSource {
    type Value = RoutingMode;

    fn get(&self, device: &Device) -> RoutingMode {
        device.routing(self.0)
    }

    fn put(&self, device: &Device, value: RoutingMode) -> Result<bool, DeviceError> {
        device.set_routing(self.0, value)
    }
}

/// "Overload Status": boolean[6], R (volatile). Updated from the HID IN
/// dispatch (report code 0x34); there is no `put`.
pub struct OverloadStatus;

impl OverloadStatus {
    pub fn get(&self, device: &Device) -> [bool; 6] {
        let raw = device.overload_raw();
        let mut out = [false; 6];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = raw[i] != 0;
        }
        out
    }
}

/// "Phono Switch Status": boolean[3] (1 = phono, 0 = line), R (volatile).
/// Updated from the HID IN dispatch (report code 0x38).
pub struct PhonoSwitchStatus;

impl PhonoSwitchStatus {
    pub fn get(&self, device: &Device) -> [bool; 3] {
        let raw = device.phono_raw();
        let mut out = [false; 3];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = raw[i] != 0;
        }
        out
    }
}
