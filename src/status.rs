//! Human-readable status surfaces. The host integration owns the actual
//! procfs/sysfs-equivalent plumbing; this module only renders the driver's
//! own state.

use std::fmt;

use crate::config::Rate;
use crate::device::Device;

/// A point-in-time copy of the driver's counters and caches, cheap to take
/// and safe to format or serialize on any thread.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub connected: bool,
    pub nominal_rate: Rate,
    pub overload: [bool; 6],
    pub phono: [bool; 3],
    pub usb_port_raw: [u8; 4],
    pub urbs_completed_playback: u64,
    pub urbs_completed_capture: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub discontinuities: u64,
    pub last_feedback_samples: u32,
}

impl Snapshot {
    pub fn capture(device: &Device) -> Self {
        let counters = device.counters();
        let overload_raw = device.overload_raw();
        let phono_raw = device.phono_raw();
        let mut overload = [false; 6];
        for (i, slot) in overload.iter_mut().enumerate() {
            *slot = overload_raw[i] != 0;
        }
        let mut phono = [false; 3];
        for (i, slot) in phono.iter_mut().enumerate() {
            *slot = phono_raw[i] != 0;
        }
        Self {
            connected: device.playback_pointer().is_ok(),
            nominal_rate: device.rate(),
            overload,
            phono,
            usb_port_raw: device.usb_port_raw(),
            urbs_completed_playback: counters.urbs_completed[0],
            urbs_completed_capture: counters.urbs_completed[1],
            underruns: counters.underruns,
            overruns: counters.overruns,
            discontinuities: counters.discontinuities,
            last_feedback_samples: device.last_feedback_samples(),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Rane SL3: {} @ {}",
            if self.connected { "connected" } else { "disconnected" },
            self.nominal_rate.label()
        )?;
        writeln!(
            f,
            "Overload: {}",
            fmt_bools(&self.overload, &["1", "2", "3", "4", "5", "6"], "overload", "ok")
        )?;
        writeln!(
            f,
            "Phono: {}",
            fmt_bools(&self.phono, &["A", "B", "C"], "phono", "line")
        )?;
        writeln!(f, "USB port raw: {:02x?}", self.usb_port_raw)?;
        writeln!(
            f,
            "URBs completed: playback={} capture={}",
            self.urbs_completed_playback, self.urbs_completed_capture
        )?;
        write!(
            f,
            "Underruns: {} Overruns: {} Discontinuities: {}",
            self.underruns, self.overruns, self.discontinuities
        )
    }
}

fn fmt_bools(values: &[bool], labels: &[&str], if_true: &str, if_false: &str) -> String {
    values
        .iter()
        .zip(labels)
        .map(|(v, label)| format!("{label}={}", if *v { if_true } else { if_false }))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_bools_pairs_values_with_labels() {
        let out = fmt_bools(&[true, false], &["A", "B"], "on", "off");
        assert_eq!(out, "A=on B=off");
    }
}
