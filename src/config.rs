//! Shared constants and small value types.

use crate::error::DeviceError;

/// USB vendor/product id. Sent big-endian in the HID command header.
pub const VENDOR_ID: u16 = 0x1CC5;
pub const PRODUCT_ID: u16 = 0x0001;

pub const IFACE_AUDIO_CONTROL: u8 = 0;
pub const IFACE_AUDIO_OUT: u8 = 1;
pub const IFACE_AUDIO_IN: u8 = 2;
pub const IFACE_HID: u8 = 3;
pub const ALT_SETTING_STREAMING: u8 = 1;

pub const EP_ISO_OUT: u8 = 0x06;
pub const EP_ISO_IN: u8 = 0x82;
pub const EP_HID_OUT: u8 = 0x01;
pub const EP_HID_IN: u8 = 0x81;

/// 6 channels * 24-bit (3 byte) samples, packed.
pub const CHANNELS: usize = 6;
pub const BYTES_PER_SAMPLE: usize = 3;
pub const FRAME_BYTES: usize = CHANNELS * BYTES_PER_SAMPLE; // 18

/// Isochronous framing.
pub const ISO_PACKETS: usize = 8;
pub const MAX_PACKET_FRAMES: usize = 7; // 7 frames * 18 B = 126 B, the max iso payload
pub const MAX_PACKET_SIZE: usize = MAX_PACKET_FRAMES * FRAME_BYTES; // 126
pub const TRANSFER_BUFFER_SIZE: usize = ISO_PACKETS * MAX_PACKET_SIZE; // 1008
pub const NUM_URBS: usize = 16;

/// HID report framing.
pub const HID_REPORT_SIZE: usize = 64;
pub const HID_HEADER_LEN: usize = 5;
pub const HID_PAYLOAD_MAX: usize = HID_REPORT_SIZE - HID_HEADER_LEN; // 59
pub const HID_OUT_TIMEOUT_MS: u64 = 1000;
pub const HID_RESPONSE_TIMEOUT_MS: u64 = 500;
pub const HANDSHAKE_STABILIZE_MS: u64 = 100;
pub const RATE_CHANGE_STABILIZE_MS: u64 = 100;

/// Sample rates the device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rate {
    Hz44100,
    Hz48000,
}

impl Rate {
    pub fn as_hz(self) -> u32 {
        match self {
            Rate::Hz44100 => 44_100,
            Rate::Hz48000 => 48_000,
        }
    }

    pub fn from_hz(hz: u32) -> Result<Self, DeviceError> {
        match hz {
            44_100 => Ok(Rate::Hz44100),
            48_000 => Ok(Rate::Hz48000),
            other => Err(DeviceError::UnsupportedRate(other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rate::Hz44100 => "44100 Hz",
            Rate::Hz48000 => "48000 Hz",
        }
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::Hz48000
    }
}

/// Per-pair output routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    Analog = 0,
    Usb = 1,
}

impl RoutingMode {
    pub fn from_raw(v: u8) -> Result<Self, DeviceError> {
        match v {
            0 => Ok(RoutingMode::Analog),
            1 => Ok(RoutingMode::Usb),
            other => Err(DeviceError::InvalidRouting(other)),
        }
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            RoutingMode::Analog => "Analog",
            RoutingMode::Usb => "USB",
        }
    }
}

/// One of the three stereo channel pairs (spec GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deck {
    A,
    B,
    C,
}

impl Deck {
    /// Pair id sent in the Set-routing HID command.
    pub fn pair_id(self) -> u8 {
        match self {
            Deck::A => 0x08,
            Deck::B => 0x0E,
            Deck::C => 0x14,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Deck::A => 0,
            Deck::B => 1,
            Deck::C => 2,
        }
    }
}

/// Transport direction, used throughout the streaming engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Playback,
    Capture,
}

/// Construction-time configuration (replaces the kernel module parameter
/// `default_sample_rate` — there is no module-parameter subsystem in
/// userspace, so this is a plain constructor argument).
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    pub default_rate: Rate,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            default_rate: Rate::default(),
        }
    }
}
