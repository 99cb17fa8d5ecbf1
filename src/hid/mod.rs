//! HID request/response and asynchronous-notification channel.

pub mod frame;
pub mod mailbox;

use std::sync::Arc;
use std::time::Duration;

use libusb1_sys::libusb_transfer;
use parking_lot::Mutex;

use crate::config::{EP_HID_IN, EP_HID_OUT, HID_OUT_TIMEOUT_MS, HID_RESPONSE_TIMEOUT_MS};
use crate::device::DeviceInner;
use crate::error::HidError;
use crate::transport::urb::InterruptUrb;
use crate::transport::{CompletionStatus, HidUserData, LogRateLimiter};

/// Minimum gap between consecutive "HID IN transfer error" log lines.
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(1);

pub use frame::Command;

/// A decoded IN report, ready to be folded into device state.
#[derive(Debug, Clone, Copy)]
pub enum Notification {
    Overload([u8; 6]),
    Phono([u8; 3]),
    UsbPort([u8; 4]),
    Response([u8; 64]),
}

/// Classifies one completed IN report. Returns `None` for a known
/// notification code whose report is shorter than its length guard — the
/// caller resubmits without taking any action.
pub fn classify_report(report: &[u8; 64], len: usize) -> Option<Notification> {
    match report[0] {
        frame::CODE_OVERLOAD if len >= frame::MIN_LEN_OVERLOAD => {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&report[5..11]);
            Some(Notification::Overload(bytes))
        }
        frame::CODE_OVERLOAD => None,
        frame::CODE_PHONO if len >= frame::MIN_LEN_PHONO => {
            let mut bytes = [0u8; 3];
            bytes.copy_from_slice(&report[5..8]);
            Some(Notification::Phono(bytes))
        }
        frame::CODE_PHONO => None,
        frame::CODE_USB_PORT if len >= frame::MIN_LEN_USB_PORT => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&report[5..9]);
            Some(Notification::UsbPort(bytes))
        }
        frame::CODE_USB_PORT => None,
        _ => Some(Notification::Response(*report)),
    }
}

/// The HID channel: persistent IN URB plus the mutex-serialized OUT/command
/// path and its single-slot response mailbox.
pub struct HidChannel {
    out_mutex: Mutex<()>,
    mailbox: mailbox::Mailbox,
    in_urb: Mutex<InterruptUrb>,
    error_log_limiter: LogRateLimiter,
}

impl HidChannel {
    pub fn new() -> Result<Self, HidError> {
        Ok(Self {
            out_mutex: Mutex::new(()),
            mailbox: mailbox::Mailbox::new(),
            in_urb: Mutex::new(InterruptUrb::alloc()?),
            error_log_limiter: LogRateLimiter::new(ERROR_LOG_INTERVAL),
        })
    }

    /// Submits the persistent IN URB for the first time, as part of device
    /// initialization.
    pub fn arm(
        &self,
        handle: &rusb::DeviceHandle<rusb::Context>,
        device: std::sync::Weak<DeviceInner>,
    ) -> Result<(), HidError> {
        let mut urb = self.in_urb.lock();
        urb.bind(HidUserData { device });
        unsafe {
            urb.submit(handle.as_raw(), EP_HID_IN, hid_in_completion, 0)?;
        }
        Ok(())
    }

    /// Kills and drains the IN URB.
    pub fn shutdown(&self) {
        self.in_urb.lock().cancel();
    }

    /// OUT/command path: build the frame, optionally reset the
    /// mailbox, issue a synchronous interrupt-OUT transfer with a 1000 ms
    /// timeout, and optionally wait up to 500 ms for a response.
    pub fn send_command(
        &self,
        handle: &rusb::DeviceHandle<rusb::Context>,
        cmd: Command,
    ) -> Result<Option<[u8; 64]>, HidError> {
        let _guard = self.out_mutex.lock();
        if cmd.waits_for_response() {
            self.mailbox.reset();
        }
        let frame = cmd.to_frame()?;
        handle
            .write_interrupt(EP_HID_OUT, &frame, Duration::from_millis(HID_OUT_TIMEOUT_MS))
            .map_err(HidError::Usb)?;

        if cmd.waits_for_response() {
            self.mailbox
                .wait(Duration::from_millis(HID_RESPONSE_TIMEOUT_MS))
                .map(Some)
                .ok_or(HidError::Timeout(Duration::from_millis(HID_RESPONSE_TIMEOUT_MS)))
        } else {
            Ok(None)
        }
    }

    fn deliver_response(&self, report: [u8; 64]) {
        self.mailbox.deliver(report);
    }
}

/// Completion trampoline for the persistent HID IN transfer. Runs on
/// libusb's event-handling thread; must not block.
pub extern "system" fn hid_in_completion(transfer: *mut libusb_transfer) {
    let user_data = unsafe { &*((*transfer).user_data as *const HidUserData) };
    let Some(device) = user_data.device.upgrade() else {
        // Device has been torn down; nothing left to resubmit into.
        return;
    };
    let status = CompletionStatus::from_raw(unsafe { (*transfer).status });
    match status {
        CompletionStatus::Ok => {
            let len = unsafe { (*transfer).actual_length as usize };
            let mut report = [0u8; 64];
            let buf = device.hid.in_urb.lock();
            report.copy_from_slice(buf.buffer());
            drop(buf);
            device.handle_hid_report(&report, len);
            resubmit(&device);
        }
        CompletionStatus::Cancelled | CompletionStatus::DeviceGone => {
            if status == CompletionStatus::DeviceGone {
                device.mark_disconnected();
            }
            // Normal shutdown or device loss: do not resubmit.
        }
        CompletionStatus::Stall => {
            let _ = device.usb_handle().clear_halt(EP_HID_IN);
            resubmit(&device);
        }
        CompletionStatus::Overflow | CompletionStatus::Other => {
            if device.hid.error_log_limiter.allow() {
                log::warn!("HID IN transfer error: {status:?}");
            }
            resubmit(&device);
        }
    }
}

fn resubmit(device: &Arc<DeviceInner>) {
    if device.transport_state.is_dead() {
        return;
    }
    let handle = device.usb_handle();
    let mut urb = device.hid.in_urb.lock();
    if let Err(e) = unsafe { urb.submit(handle.as_raw(), EP_HID_IN, hid_in_completion, 0) } {
        log::warn!("failed to resubmit HID IN transfer: {e}");
    }
}

impl DeviceInner {
    /// Shared by the completion trampoline above: classifies the report and
    /// folds it into device state.
    pub(crate) fn handle_hid_report(&self, report: &[u8; 64], len: usize) {
        match classify_report(report, len) {
            None => {} // guard failed; resubmitted unchanged
            Some(Notification::Overload(bytes)) => {
                *self.overload_cache.lock() = bytes;
                self.notifier.notify(crate::notify::Event::OverloadChanged);
            }
            Some(Notification::Phono(bytes)) => {
                *self.phono_cache.lock() = bytes;
                self.notifier.notify(crate::notify::Event::PhonoChanged);
            }
            Some(Notification::UsbPort(bytes)) => {
                *self.usb_port_cache.lock() = bytes;
            }
            Some(Notification::Response(resp)) => {
                self.hid.deliver_response(resp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(code: u8, tail: &[u8]) -> [u8; 64] {
        let mut r = [0u8; 64];
        r[0] = code;
        r[5..5 + tail.len()].copy_from_slice(tail);
        r
    }

    /// A known notification code updates only its own notification; an
    /// unknown code produces only a response.
    #[test]
    fn overload_report_classifies_as_overload_only() {
        let r = report(frame::CODE_OVERLOAD, &[1, 2, 3, 4, 5, 6]);
        match classify_report(&r, 11) {
            Some(Notification::Overload(bytes)) => assert_eq!(bytes, [1, 2, 3, 4, 5, 6]),
            other => panic!("expected Overload, got {other:?}"),
        }
    }

    #[test]
    fn short_overload_report_is_ignored() {
        let r = report(frame::CODE_OVERLOAD, &[1, 2, 3, 4, 5, 6]);
        assert!(classify_report(&r, 10).is_none());
    }

    #[test]
    fn phono_report_classifies_as_phono() {
        let r = report(frame::CODE_PHONO, &[9, 8, 7]);
        match classify_report(&r, 8) {
            Some(Notification::Phono(bytes)) => assert_eq!(bytes, [9, 8, 7]),
            other => panic!("expected Phono, got {other:?}"),
        }
    }

    #[test]
    fn short_phono_report_is_ignored() {
        let r = report(frame::CODE_PHONO, &[9, 8, 7]);
        assert!(classify_report(&r, 7).is_none());
    }

    #[test]
    fn usb_port_report_classifies_as_usb_port() {
        let r = report(frame::CODE_USB_PORT, &[1, 2, 3, 4]);
        match classify_report(&r, 9) {
            Some(Notification::UsbPort(bytes)) => assert_eq!(bytes, [1, 2, 3, 4]),
            other => panic!("expected UsbPort, got {other:?}"),
        }
    }

    #[test]
    fn unknown_code_becomes_a_response() {
        let r = report(0x50, &[0xAA; 5]);
        match classify_report(&r, 64) {
            Some(Notification::Response(resp)) => assert_eq!(resp, r),
            other => panic!("expected Response, got {other:?}"),
        }
    }
}
