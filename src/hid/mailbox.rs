//! The single-slot response mailbox for the HID command/response path. The
//! HID mutex that serializes command issuance is what makes a single-slot
//! mailbox sufficient: only one command can be awaiting a response at a
//! time.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::HID_REPORT_SIZE;

#[derive(Default)]
pub struct Mailbox {
    slot: Mutex<Option<[u8; HID_REPORT_SIZE]>>,
    signal: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any stale response before a new command is sent.
    pub fn reset(&self) {
        *self.slot.lock() = None;
    }

    /// Called from the HID IN dispatch path when a report does not match a
    /// known notification code and is therefore a command response.
    pub fn deliver(&self, report: [u8; HID_REPORT_SIZE]) {
        *self.slot.lock() = Some(report);
        self.signal.notify_one();
    }

    /// Blocks the issuing thread up to `timeout` for a response.
    pub fn wait(&self, timeout: Duration) -> Option<[u8; HID_REPORT_SIZE]> {
        let mut guard = self.slot.lock();
        if let Some(report) = guard.take() {
            return Some(report);
        }
        let result = self.signal.wait_for(&mut guard, timeout);
        if result.timed_out() {
            None
        } else {
            guard.take()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out_with_no_delivery() {
        let mailbox = Mailbox::new();
        let got = mailbox.wait(Duration::from_millis(20));
        assert!(got.is_none());
    }

    #[test]
    fn deliver_wakes_a_waiter() {
        let mailbox = Arc::new(Mailbox::new());
        let mailbox2 = mailbox.clone();
        let handle = thread::spawn(move || mailbox2.wait(Duration::from_secs(1)));
        thread::sleep(Duration::from_millis(20));
        let mut report = [0u8; HID_REPORT_SIZE];
        report[0] = 0x99;
        mailbox.deliver(report);
        let got = handle.join().unwrap();
        assert_eq!(got.unwrap()[0], 0x99);
    }

    #[test]
    fn reset_discards_a_stale_response() {
        let mailbox = Mailbox::new();
        mailbox.deliver([7u8; HID_REPORT_SIZE]);
        mailbox.reset();
        assert!(mailbox.wait(Duration::from_millis(10)).is_none());
    }
}
