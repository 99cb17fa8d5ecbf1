//! The host PCM ring buffer boundary. The streaming engine only ever needs
//! to copy frames in and out of a ring at a given frame offset; it does not
//! need to know whether that ring is an mmap'd ALSA buffer, a JACK port, or
//! a test fixture. These two traits are that seam.

use crate::config::FRAME_BYTES;

/// Playback source: the streaming engine reads frames out of this ring to
/// fill outgoing isochronous packets.
pub trait PcmSink: Send {
    /// Ring capacity, in frames.
    fn ring_frames(&self) -> usize;

    /// Copy `frames` frames starting at ring position `hwptr_frames`
    /// (`hwptr_frames % ring_frames()`) into `out`, wrapping around the end
    /// of the ring as needed. `out` must be exactly `frames * FRAME_BYTES`
    /// long.
    fn read_frames(&self, hwptr_frames: u64, frames: usize, out: &mut [u8]);
}

/// Capture sink: the streaming engine writes frames it pulled off the wire
/// into this ring.
pub trait PcmSource: Send {
    fn ring_frames(&self) -> usize;

    /// Copy `frames` frames from `data` (`frames * FRAME_BYTES` bytes) into
    /// the ring starting at `hwptr_frames`, wrapping as needed.
    fn write_frames(&self, hwptr_frames: u64, frames: usize, data: &[u8]);
}

/// A plain heap-backed ring, usable directly in tests and as a minimal
/// standalone sink/source for host integrations that don't (yet) mmap a
/// real ALSA/JACK buffer. Exercises the exact wraparound arithmetic the
/// real streaming code relies on.
pub struct ByteRing {
    buf: parking_lot::Mutex<Vec<u8>>,
    frames: usize,
}

impl ByteRing {
    pub fn new(frames: usize) -> Self {
        Self {
            buf: parking_lot::Mutex::new(vec![0u8; frames * FRAME_BYTES]),
            frames,
        }
    }

    fn copy_wrapping(ring: &mut [u8], frames_total: usize, start_frame: u64, frames: usize, src: &[u8], dst: &mut [u8], to_ring: bool) {
        let start = (start_frame % frames_total as u64) as usize;
        let first_run = (frames_total - start).min(frames);
        let second_run = frames - first_run;
        let first_bytes = first_run * FRAME_BYTES;
        let second_bytes = second_run * FRAME_BYTES;
        let start_byte = start * FRAME_BYTES;

        if to_ring {
            ring[start_byte..start_byte + first_bytes].copy_from_slice(&src[..first_bytes]);
            if second_run > 0 {
                ring[..second_bytes].copy_from_slice(&src[first_bytes..first_bytes + second_bytes]);
            }
        } else {
            dst[..first_bytes].copy_from_slice(&ring[start_byte..start_byte + first_bytes]);
            if second_run > 0 {
                dst[first_bytes..first_bytes + second_bytes].copy_from_slice(&ring[..second_bytes]);
            }
        }
    }
}

impl PcmSink for ByteRing {
    fn ring_frames(&self) -> usize {
        self.frames
    }

    fn read_frames(&self, hwptr_frames: u64, frames: usize, out: &mut [u8]) {
        let mut ring = self.buf.lock();
        Self::copy_wrapping(&mut ring, self.frames, hwptr_frames, frames, &[], out, false);
    }
}

impl PcmSource for ByteRing {
    fn ring_frames(&self) -> usize {
        self.frames
    }

    fn write_frames(&self, hwptr_frames: u64, frames: usize, data: &[u8]) {
        let mut ring = self.buf.lock();
        Self::copy_wrapping(&mut ring, self.frames, hwptr_frames, frames, data, &mut [], true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back_matches() {
        let ring = ByteRing::new(10);
        let data: Vec<u8> = (0..(4 * FRAME_BYTES) as u8).collect();
        ring.write_frames(0, 4, &data);
        let mut out = vec![0u8; 4 * FRAME_BYTES];
        ring.read_frames(0, 4, &mut out);
        assert_eq!(out, data);
    }

    /// For any hwptr and bytes <= ring_size, copying preserves byte
    /// ordering modulo ring_size.
    #[test]
    fn wraparound_preserves_order() {
        let ring_frames = 8;
        let ring = ByteRing::new(ring_frames);
        let data: Vec<u8> = (0..(ring_frames * FRAME_BYTES) as u8).collect();
        // write the whole ring content once, at an offset near the end so
        // the write wraps.
        let start = 6u64;
        let mut rotated = vec![0u8; ring_frames * FRAME_BYTES];
        // frame `start + i (mod ring_frames)` should receive source frame i.
        for i in 0..ring_frames {
            let dst_frame = (start as usize + i) % ring_frames;
            rotated[dst_frame * FRAME_BYTES..(dst_frame + 1) * FRAME_BYTES]
                .copy_from_slice(&data[i * FRAME_BYTES..(i + 1) * FRAME_BYTES]);
        }
        ring.write_frames(start, ring_frames, &data);

        let mut out = vec![0u8; ring_frames * FRAME_BYTES];
        ring.read_frames(0, ring_frames, &mut out);
        assert_eq!(out, rotated);

        // Reading back from `start` should reproduce the original data.
        let mut roundtrip = vec![0u8; ring_frames * FRAME_BYTES];
        ring.read_frames(start, ring_frames, &mut roundtrip);
        assert_eq!(roundtrip, data);
    }

    #[test]
    fn partial_wrap_near_end() {
        let ring = ByteRing::new(8);
        let data: Vec<u8> = (0..(3 * FRAME_BYTES) as u8).collect();
        ring.write_frames(7, 3, &data); // wraps after 1 frame
        let mut out = vec![0u8; 3 * FRAME_BYTES];
        ring.read_frames(7, 3, &mut out);
        assert_eq!(out, data);
    }
}
