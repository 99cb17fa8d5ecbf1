//! Host-side USB transport and control-plane driver for the Rane SL3 audio
//! interface.
//!
//! The device presents six channels of 24-bit PCM at 44.1 or 48 kHz over
//! raw isochronous endpoints, with mixer-style controls and status carried
//! over a vendor HID report channel. This crate owns the hard, real-time
//! part of that: URB lifecycle, the HID request/response and notification
//! channel, the streaming engine's packet sizing and implicit feedback, and
//! the device lifecycle that ties start/stop, rate changes and hot-unplug
//! together. The host audio subsystem's PCM buffer protocol and control
//! notification bus are modeled as traits (see [`pcm`] and [`notify`]) that
//! a host integration implements.

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod hid;
pub mod notify;
pub mod pcm;
pub mod status;
pub mod stream;
pub mod transport;

pub use config::{Deck, DeviceConfig, Direction, Rate, RoutingMode};
pub use device::Device;
pub use error::{DeviceError, DeviceResult};
pub use notify::{ChannelNotifier, ControlNotifier, Event};
pub use pcm::{ByteRing, PcmSink, PcmSource};
