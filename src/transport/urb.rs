//! Raw libusb async-transfer handles: the crate's equivalent of a kernel
//! URB. `rusb`'s safe surface only exposes synchronous control/bulk/
//! interrupt transfers, so the hot isochronous path and the persistent HID
//! IN transfer go through `libusb1-sys` directly.

use std::ffi::c_void;
use std::os::raw::c_int;

use libusb1_sys::{
    constants::LIBUSB_TRANSFER_TYPE_ISOCHRONOUS, libusb_alloc_transfer, libusb_cancel_transfer,
    libusb_device_handle, libusb_fill_interrupt_transfer, libusb_fill_iso_transfer,
    libusb_free_transfer, libusb_iso_packet_descriptor, libusb_submit_transfer, libusb_transfer,
};

use crate::config::{HID_REPORT_SIZE, ISO_PACKETS, TRANSFER_BUFFER_SIZE};
use crate::error::TransportError;
use crate::transport::{CompletionStatus, HidUserData, UrbUserData};

/// Pointer arithmetic over the flexible `iso_packet_desc` array member of
/// `libusb_transfer`. Safe callers guarantee `i < num_iso_packets`.
unsafe fn iso_desc_mut(transfer: *mut libusb_transfer, i: usize) -> *mut libusb_iso_packet_descriptor {
    (*transfer).iso_packet_desc.as_mut_ptr().add(i)
}

/// One isochronous URB: a `libusb_transfer` bound to its own DMA-style
/// buffer, its stream index and a consecutive-error counter that resets on
/// every successful completion.
pub struct IsoUrb {
    transfer: *mut libusb_transfer,
    buffer: Box<[u8; TRANSFER_BUFFER_SIZE]>,
    user_data: Option<Box<UrbUserData>>,
    pub index: usize,
    pub consecutive_errors: u8,
    freed: bool,
}

// `transfer` points at a heap allocation owned exclusively by this struct;
// `buffer`'s address is stable across moves of `IsoUrb` itself (the Box
// doesn't reallocate). Submission and completion never overlap in time for
// a single URB, so there is no aliasing across threads at any instant.
unsafe impl Send for IsoUrb {}

impl IsoUrb {
    pub fn alloc(index: usize) -> Result<Self, TransportError> {
        let transfer = unsafe { libusb_alloc_transfer(ISO_PACKETS as c_int) };
        if transfer.is_null() {
            return Err(TransportError::AllocFailed);
        }
        Ok(Self {
            transfer,
            buffer: Box::new([0u8; TRANSFER_BUFFER_SIZE]),
            user_data: None,
            index,
            consecutive_errors: 0,
            freed: false,
        })
    }

    /// Binds the (device, direction, index) coordinates this URB's
    /// completion callback will see as `user_data`. Call once after
    /// `alloc`; the binding is reused across every resubmission.
    pub fn bind(&mut self, user_data: UrbUserData) {
        self.user_data = Some(Box::new(user_data));
    }

    fn user_data_ptr(&mut self) -> *mut c_void {
        self.user_data
            .as_deref_mut()
            .expect("IsoUrb::bind must be called before submit")
            as *mut UrbUserData as *mut c_void
    }

    pub fn buffer_mut(&mut self) -> &mut [u8; TRANSFER_BUFFER_SIZE] {
        &mut self.buffer
    }

    pub fn buffer(&self) -> &[u8; TRANSFER_BUFFER_SIZE] {
        &self.buffer
    }

    /// Requested length of packet `i`, set just before submission.
    pub fn set_packet_length(&mut self, i: usize, len: u32) {
        unsafe {
            (*iso_desc_mut(self.transfer, i)).length = len;
        }
    }

    /// Device-reported length of packet `i` after completion
    /// (`actual_length`).
    pub fn packet_actual_length(&self, i: usize) -> u32 {
        unsafe { (*iso_desc_mut(self.transfer, i)).actual_length }
    }

    pub fn status(&self) -> CompletionStatus {
        CompletionStatus::from_raw(unsafe { (*self.transfer).status })
    }

    /// Fills and submits this transfer against `dev_handle`/`endpoint`, with
    /// `callback` as the completion trampoline. Interval is fixed at 1
    /// microframe (every frame); the `libusb_transfer_type` is set once at
    /// fill time and never changes across resubmissions.
    ///
    /// # Safety
    /// `dev_handle` must outlive the transfer. [`IsoUrb::bind`] must have
    /// been called first; the bound `user_data` must remain valid until
    /// `callback` runs, which holds because `Stream::stop` kills and
    /// synchronously drains every URB before any is freed.
    pub unsafe fn submit(
        &mut self,
        dev_handle: *mut libusb_device_handle,
        endpoint: u8,
        total_length: c_int,
        callback: extern "system" fn(*mut libusb_transfer),
    ) -> Result<(), TransportError> {
        let user_data = self.user_data_ptr();
        libusb_fill_iso_transfer(
            self.transfer,
            dev_handle,
            endpoint,
            self.buffer.as_mut_ptr(),
            total_length,
            ISO_PACKETS as c_int,
            callback,
            user_data,
            0, // "as soon as possible" scheduling: no fixed per-transfer timeout
        );
        debug_assert_eq!(
            (*self.transfer).transfer_type,
            LIBUSB_TRANSFER_TYPE_ISOCHRONOUS
        );
        let rc = libusb_submit_transfer(self.transfer);
        if rc != 0 {
            return Err(TransportError::SubmitFailed(rc));
        }
        Ok(())
    }

    /// Requests cancellation; the completion callback still fires
    /// (with `CompletionStatus::Cancelled`) and is what actually drains it.
    pub fn cancel(&mut self) {
        unsafe {
            libusb_cancel_transfer(self.transfer);
        }
    }
}

impl Drop for IsoUrb {
    fn drop(&mut self) {
        if !self.freed {
            unsafe { libusb_free_transfer(self.transfer) };
            self.freed = true;
        }
    }
}

/// The persistent interrupt IN transfer that carries HID reports. Unlike
/// `IsoUrb` there is exactly one of these, and it
/// is resubmitted from within its own completion handler for as long as the
/// channel is alive.
pub struct InterruptUrb {
    transfer: *mut libusb_transfer,
    buffer: Box<[u8; HID_REPORT_SIZE]>,
    user_data: Option<Box<HidUserData>>,
    freed: bool,
}

unsafe impl Send for InterruptUrb {}

impl InterruptUrb {
    pub fn alloc() -> Result<Self, TransportError> {
        let transfer = unsafe { libusb_alloc_transfer(0) };
        if transfer.is_null() {
            return Err(TransportError::AllocFailed);
        }
        Ok(Self {
            transfer,
            buffer: Box::new([0u8; HID_REPORT_SIZE]),
            user_data: None,
            freed: false,
        })
    }

    pub fn bind(&mut self, user_data: HidUserData) {
        self.user_data = Some(Box::new(user_data));
    }

    fn user_data_ptr(&mut self) -> *mut c_void {
        self.user_data
            .as_deref_mut()
            .expect("InterruptUrb::bind must be called before submit")
            as *mut HidUserData as *mut c_void
    }

    pub fn buffer(&self) -> &[u8; HID_REPORT_SIZE] {
        &self.buffer
    }

    pub fn status(&self) -> CompletionStatus {
        CompletionStatus::from_raw(unsafe { (*self.transfer).status })
    }

    pub fn actual_length(&self) -> usize {
        unsafe { (*self.transfer).actual_length as usize }
    }

    /// # Safety
    /// Same obligations as [`IsoUrb::submit`].
    pub unsafe fn submit(
        &mut self,
        dev_handle: *mut libusb_device_handle,
        endpoint: u8,
        callback: extern "system" fn(*mut libusb_transfer),
        timeout_ms: u32,
    ) -> Result<(), TransportError> {
        let user_data = self.user_data_ptr();
        libusb_fill_interrupt_transfer(
            self.transfer,
            dev_handle,
            endpoint,
            self.buffer.as_mut_ptr(),
            HID_REPORT_SIZE as c_int,
            callback,
            user_data,
            timeout_ms,
        );
        let rc = libusb_submit_transfer(self.transfer);
        if rc != 0 {
            return Err(TransportError::SubmitFailed(rc));
        }
        Ok(())
    }

    pub fn cancel(&mut self) {
        unsafe {
            libusb_cancel_transfer(self.transfer);
        }
    }
}

impl Drop for InterruptUrb {
    fn drop(&mut self) {
        if !self.freed {
            unsafe { libusb_free_transfer(self.transfer) };
            self.freed = true;
        }
    }
}
