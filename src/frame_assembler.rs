use crc16::{State, MODBUS};
use log::{trace, warn};

/// Accumulates notification payloads until they form a complete response frame.
///
/// The frame format is:
///
/// Start Byte | End Byte     | Meaning
/// 0          | 1            | A constant header with value [0x01, 0x03]
/// 2          | 2            | N, the length in bytes of the payload
/// 3          | N+2          | The payload
/// N+3        | N+4          | A MODBUS CRC over the bytes 0..N+3
///
/// A response may arrive split over several notifications, so the buffer is only ever
/// matched as a whole. It is not cleared when a frame is recognised; the owner decides
/// when a frame belongs to a stale poll cycle and calls [`FrameAssembler::clear`].
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    /// Largest buffer that is kept before the next append starts over
    pub const MAX_RESPONSE_SIZE: usize = 43;
    const MSG_HEADER: [u8; 2] = [0x01, 0x03];
    const HEADER_LEN: usize = 3;
    const CRC_LEN: usize = 2;

    pub fn new() -> Self {
        Self { buffer: Vec::with_capacity(Self::MAX_RESPONSE_SIZE) }
    }

    /// Append received bytes.
    ///
    /// If the buffer has already grown past [`Self::MAX_RESPONSE_SIZE`] it is dropped first,
    /// so noise or a misaligned stream cannot accumulate forever.
    pub fn append(&mut self, data: &[u8]) {
        if self.buffer.len() > Self::MAX_RESPONSE_SIZE {
            warn!("Maximum response size exceeded, dropping {} bytes", self.buffer.len());
            self.buffer.clear();
        }

        self.buffer.extend_from_slice(data);
        trace!("Appending {} bytes", data.len());
    }

    /// Return the payload if the buffer currently holds exactly one complete frame.
    pub fn try_take_frame(&self) -> Option<&[u8]> {
        self.frame().map(|frame| &frame[Self::HEADER_LEN..frame.len() - Self::CRC_LEN])
    }

    /// The whole frame, header and CRC included, if the buffer holds one
    pub fn frame(&self) -> Option<&[u8]> {
        let buffer = &self.buffer[..];
        if buffer.len() < Self::HEADER_LEN + Self::CRC_LEN {
            return None;
        }

        if buffer[0..2] != Self::MSG_HEADER {
            return None;
        }

        let expected_len = Self::HEADER_LEN + buffer[2] as usize + Self::CRC_LEN;
        if buffer.len() != expected_len {
            return None;
        }

        Some(buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check the trailing MODBUS CRC of a complete frame.
    ///
    /// The controller protocol is normally consumed without this check; it is only
    /// applied when explicitly enabled in [`crate::Config`].
    pub fn verify_frame_checksum(frame: &[u8]) -> bool {
        if frame.len() < Self::CRC_LEN {
            return false;
        }
        let (body, crc_actual) = frame.split_at(frame.len() - Self::CRC_LEN);
        crc_actual == Self::crc(body)
    }

    /// Compute the CRC check value for the given bytes
    fn crc(data: &[u8]) -> [u8; 2] {
        State::<MODBUS>::calculate(data).to_le_bytes()
    }
}

#[cfg(test)]
pub(crate) fn full_frame() -> Vec<u8> {
    use crate::message::read_registers::PAYLOAD_HEX;
    hex::decode(format!("010326{PAYLOAD_HEX}dec4")).unwrap()
}

#[test]
fn test_try_take_frame_happy() {
    let mut assembler = FrameAssembler::new();
    assembler.append(&full_frame());
    let payload = hex::decode(crate::message::read_registers::PAYLOAD_HEX).unwrap();
    assert_eq!(assembler.try_take_frame(), Some(&payload[..]));
}

#[test]
fn test_try_take_frame_does_not_clear() {
    let mut assembler = FrameAssembler::new();
    assembler.append(&full_frame());
    assert!(assembler.try_take_frame().is_some());
    assert!(assembler.try_take_frame().is_some());
    assert_eq!(assembler.len(), 43);
}

#[test]
fn test_try_take_frame_no_header() {
    let mut assembler = FrameAssembler::new();
    assembler.append(&hex::decode("0103").unwrap());
    assert_eq!(assembler.try_take_frame(), None);
}

#[test]
fn test_try_take_frame_incomplete() {
    let mut assembler = FrameAssembler::new();
    let frame = full_frame();
    assembler.append(&frame[..frame.len() - 1]);
    assert_eq!(assembler.try_take_frame(), None);
}

#[test]
fn test_try_take_frame_wrong_header() {
    let mut assembler = FrameAssembler::new();
    let mut frame = full_frame();
    frame[1] = 0x04;
    assembler.append(&frame);
    assert_eq!(assembler.try_take_frame(), None);
}

#[test]
fn test_try_take_frame_empty_payload() {
    let mut assembler = FrameAssembler::new();
    assembler.append(&hex::decode("0103004061").unwrap());
    assert_eq!(assembler.try_take_frame(), Some(&[][..]));
}

#[test]
fn test_missing_leading_fragment_never_matches() {
    let mut assembler = FrameAssembler::new();
    let frame = full_frame();
    assembler.append(&frame[3..]);
    assembler.append(&frame[..3]);
    assert_eq!(assembler.try_take_frame(), None);
}

#[test]
fn test_fragmentation_invariance() {
    let frame = full_frame();
    let len = frame.len();
    let mut splits: Vec<Vec<usize>> = vec![vec![]];
    for a in 1..len {
        splits.push(vec![a]);
        for b in a + 1..len {
            splits.push(vec![a, b]);
        }
    }

    for cuts in splits {
        let mut assembler = FrameAssembler::new();
        let mut bounds = vec![0];
        bounds.extend(cuts.iter().copied());
        bounds.push(len);

        let mut matches = 0;
        for window in bounds.windows(2) {
            assembler.append(&frame[window[0]..window[1]]);
            if assembler.try_take_frame().is_some() {
                matches += 1;
                assert_eq!(window[1], len, "matched early for cuts {cuts:?}");
            }
        }
        assert_eq!(matches, 1, "cuts {cuts:?}");
    }
}

#[test]
fn test_overflow_guard() {
    let mut assembler = FrameAssembler::new();
    assembler.append(&[0xaa; 43]);
    assert_eq!(assembler.len(), 43);

    // Exactly at capacity is kept, the next append grows past it
    assembler.append(&[0xbb; 2]);
    assert_eq!(assembler.len(), 45);

    assembler.append(&hex::decode("010300").unwrap());
    assert_eq!(assembler.len(), 3);

    // The stale bytes are gone, so the rest of a short frame completes it
    assembler.append(&[0x40, 0x61]);
    assert_eq!(assembler.try_take_frame(), Some(&[][..]));
}

#[test]
fn test_overflow_guard_recovers_frame() {
    let mut assembler = FrameAssembler::new();
    assembler.append(&[0x00; 44]);
    assembler.append(&full_frame());
    assert!(assembler.try_take_frame().is_some());
}

#[test]
fn test_append_past_recognised_frame() {
    let mut assembler = FrameAssembler::new();
    assembler.append(&full_frame());
    assembler.append(&[0x01]);
    assert_eq!(assembler.try_take_frame(), None);
    assert_eq!(assembler.len(), 44);
}

#[test]
fn test_verify_frame_checksum() {
    let mut frame = full_frame();
    assert!(FrameAssembler::verify_frame_checksum(&frame));
    frame[10] ^= 0x01;
    assert!(!FrameAssembler::verify_frame_checksum(&frame));
}

#[test]
fn test_checksum() {
    let payload = [0x01, 0x03, 0x01, 0x01, 0x00, 0x13];
    let expected = 0x3b54;
    assert_eq!(State::<MODBUS>::calculate(&payload), expected);
}
