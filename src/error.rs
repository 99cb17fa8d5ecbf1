//! Crate-wide error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Errors from the transport layer (URB allocation, submission, teardown).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("libusb transfer allocation failed")]
    AllocFailed,
    #[error("libusb transfer submission failed: code {0}")]
    SubmitFailed(i32),
    #[error("device is gone")]
    DeviceGone,
}

/// Errors from the HID command/notification channel.
#[derive(Debug, Error)]
pub enum HidError {
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("payload of {len} bytes does not fit in a command frame (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("device is gone")]
    DeviceGone,
}

/// Errors from the isochronous streaming engine.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("stream is already running")]
    AlreadyRunning,
    #[error("device is gone")]
    DeviceGone,
}

/// Errors from the device lifecycle and control plane.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Hid(#[from] HidError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("sample rate {0} Hz is not supported (must be 44100 or 48000)")]
    UnsupportedRate(u32),
    #[error("routing value {0} is invalid (must be 0=Analog or 1=USB)")]
    InvalidRouting(u8),
    #[error("rate change refused: a stream is running")]
    Busy,
    #[error("device has been disconnected")]
    Disconnected,
}

impl From<TransportError> for HidError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Usb(u) => HidError::Usb(u),
            TransportError::DeviceGone => HidError::DeviceGone,
            TransportError::AllocFailed | TransportError::SubmitFailed(_) => {
                HidError::Usb(rusb::Error::Other)
            }
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
pub type HidResult<T> = Result<T, HidError>;
pub type StreamResult<T> = Result<T, StreamError>;
pub type DeviceResult<T> = Result<T, DeviceError>;
