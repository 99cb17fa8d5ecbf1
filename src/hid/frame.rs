//! HID command-frame encoding and the known command table.

use byteorder::{BigEndian, ByteOrder};

use crate::config::{Deck, Rate, HID_HEADER_LEN, HID_PAYLOAD_MAX, HID_REPORT_SIZE, PRODUCT_ID, VENDOR_ID};
use crate::error::HidError;

/// Report codes the device sends unsolicited.
pub const CODE_OVERLOAD: u8 = 0x34;
pub const CODE_PHONO: u8 = 0x38;
pub const CODE_USB_PORT: u8 = 0x39;

/// Minimum report length each notification code requires before it is
/// trusted; shorter reports are silently resubmitted.
pub const MIN_LEN_OVERLOAD: usize = 11;
pub const MIN_LEN_PHONO: usize = 8;
pub const MIN_LEN_USB_PORT: usize = 9;

/// The sub-command byte observed in the Set-routing payload; its meaning is
/// undocumented, so it is preserved byte-for-byte rather than interpreted.
pub const ROUTING_SUBCOMMAND: u8 = 0x01;

/// Host -> device commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    StatusQuery,
    SetSampleRate(Rate),
    QueryPhono,
    SetRouting { deck: Deck, mode_raw: u8 },
}

impl Command {
    pub fn code(self) -> u8 {
        match self {
            Command::Init => 0x03,
            Command::StatusQuery => 0x36,
            Command::SetSampleRate(_) => 0x31,
            Command::QueryPhono => 0x32,
            Command::SetRouting { .. } => 0x33,
        }
    }

    /// Whether the OUT path should wait on the response mailbox.
    pub fn waits_for_response(self) -> bool {
        !matches!(self, Command::SetRouting { .. })
    }

    fn write_payload(self, out: &mut [u8]) -> usize {
        match self {
            Command::Init => {
                out[0] = 0x00;
                1
            }
            Command::StatusQuery => {
                out[0] = 0x01;
                1
            }
            Command::SetSampleRate(rate) => {
                BigEndian::write_u16(&mut out[0..2], rate.as_hz() as u16);
                2
            }
            Command::QueryPhono => 0,
            Command::SetRouting { deck, mode_raw } => {
                out[0] = deck.pair_id();
                out[1] = ROUTING_SUBCOMMAND;
                out[2] = mode_raw;
                3
            }
        }
    }

    /// Builds the 64-byte frame for this command.
    pub fn to_frame(self) -> Result<[u8; HID_REPORT_SIZE], HidError> {
        let mut payload = [0u8; HID_PAYLOAD_MAX];
        let len = self.write_payload(&mut payload);
        build_frame(self.code(), &payload[..len])
    }
}

/// Builds a 64-byte command frame: `byte[0] = cmd`, `byte[1..5] = vendor/
/// product id big-endian, `byte[5..5+len] = payload`, remainder zero.
pub fn build_frame(cmd: u8, payload: &[u8]) -> Result<[u8; HID_REPORT_SIZE], HidError> {
    if payload.len() > HID_PAYLOAD_MAX {
        return Err(HidError::PayloadTooLarge {
            len: payload.len(),
            max: HID_PAYLOAD_MAX,
        });
    }
    let mut frame = [0u8; HID_REPORT_SIZE];
    frame[0] = cmd;
    BigEndian::write_u16(&mut frame[1..3], VENDOR_ID);
    BigEndian::write_u16(&mut frame[3..5], PRODUCT_ID);
    frame[HID_HEADER_LEN..HID_HEADER_LEN + payload.len()].copy_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// For any command and payload <= 59 bytes, the emitted frame has the
    /// exact header/payload/padding layout.
    #[test]
    fn frame_header_matches_vendor_product_id() {
        let payload = [0xAAu8; 10];
        let frame = build_frame(0x31, &payload).unwrap();
        assert_eq!(frame[0], 0x31);
        assert_eq!(&frame[1..5], &[0x1C, 0xC5, 0x00, 0x01]);
        assert_eq!(&frame[5..15], &payload);
        assert!(frame[15..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = [0u8; HID_PAYLOAD_MAX + 1];
        assert!(build_frame(0x31, &payload).is_err());
    }

    #[test]
    fn set_sample_rate_44100_big_endian_bytes() {
        let frame = Command::SetSampleRate(Rate::Hz44100).to_frame().unwrap();
        let rate = BigEndian::read_u16(&frame[5..7]);
        assert_eq!(rate, 44100u16);
    }

    #[test]
    fn set_routing_preserves_subcommand_byte() {
        let frame = Command::SetRouting {
            deck: Deck::B,
            mode_raw: 0,
        }
        .to_frame()
        .unwrap();
        assert_eq!(frame[0], 0x33);
        assert_eq!(frame[5], Deck::B.pair_id());
        assert_eq!(frame[6], ROUTING_SUBCOMMAND);
        assert_eq!(frame[7], 0);
    }

    #[test]
    fn init_and_status_query_waits() {
        assert!(Command::Init.waits_for_response());
        assert!(Command::StatusQuery.waits_for_response());
        assert!(Command::QueryPhono.waits_for_response());
        assert!(!Command::SetRouting {
            deck: Deck::A,
            mode_raw: 1
        }
        .waits_for_response());
    }
}
