//! Binary frame codec for the hardware control rig
//!
//! Layout (little-endian, 16 bytes):
//! `[sync:u8][accel:f32][decel:f32][steering:i32][handbrake:u8][gear:u8][turn_signal:u8]`

use bytes::{Buf, BytesMut};

use crate::sim::{Gear, TurnSignal};

/// First byte of every frame
pub const SYNC_BYTE: u8 = 0xAA;

/// Full frame size including the sync byte
pub const FRAME_LEN: usize = 16;

/// One decoded reading in the rig's raw units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawFrame {
    pub acceleration: f32,
    pub deceleration: f32,
    pub steering: i32,
    pub handbrake: bool,
    /// `None` when the rig sent a code we don't know
    pub gear: Option<Gear>,
    pub turn_signal: Option<TurnSignal>,
}

/// Incremental decoder. Bytes are pushed as they arrive and complete frames
/// are pulled out; anything before a sync byte is dropped one byte at a time.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    discarded: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(FRAME_LEN * 4),
            discarded: 0,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes thrown away while hunting for a sync byte
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Bytes waiting for the rest of their frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        loop {
            let first = *self.buf.first()?;
            if first == SYNC_BYTE {
                break;
            }
            self.buf.advance(1);
            self.discarded += 1;
        }

        if self.buf.len() < FRAME_LEN {
            return None;
        }

        let mut frame = self.buf.split_to(FRAME_LEN);
        frame.advance(1);
        Some(RawFrame {
            acceleration: frame.get_f32_le(),
            deceleration: frame.get_f32_le(),
            steering: frame.get_i32_le(),
            handbrake: frame.get_u8() != 0,
            gear: Gear::from_code(frame.get_u8()),
            turn_signal: TurnSignal::from_code(frame.get_u8()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::BufMut;

    use super::*;

    pub(crate) fn frame_bytes(acc: f32, dec: f32, steer: i32, handbrake: bool, gear: u8, signal: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_LEN);
        out.put_u8(SYNC_BYTE);
        out.put_f32_le(acc);
        out.put_f32_le(dec);
        out.put_i32_le(steer);
        out.put_u8(u8::from(handbrake));
        out.put_u8(gear);
        out.put_u8(signal);
        out
    }

    #[test]
    fn decodes_a_complete_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame_bytes(512.0, 380.0, -7, true, b'D', b'L'));

        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.acceleration, 512.0);
        assert_eq!(frame.deceleration, 380.0);
        assert_eq!(frame.steering, -7);
        assert!(frame.handbrake);
        assert_eq!(frame.gear, Some(Gear::Drive));
        assert_eq!(frame.turn_signal, Some(TurnSignal::Left));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn waits_for_split_frames() {
        let bytes = frame_bytes(1.0, 2.0, 3, false, b'P', b'N');
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..7]);
        assert!(decoder.next_frame().is_none());
        decoder.extend(&bytes[7..]);
        assert_eq!(decoder.next_frame().unwrap().steering, 3);
    }

    #[test]
    fn resyncs_after_garbage() {
        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend(frame_bytes(10.0, 0.0, 5, false, b'R', b'R'));
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);

        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.gear, Some(Gear::Reverse));
        assert_eq!(decoder.discarded(), 3);
    }

    #[test]
    fn corrupted_sync_byte_yields_nothing() {
        let mut bytes = frame_bytes(10.0, 0.0, 5, false, b'D', b'N');
        bytes[0] = 0xAB;
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn unknown_codes_decode_to_none() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame_bytes(0.0, 0.0, 0, false, b'N', b'?'));
        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.gear, None);
        assert_eq!(frame.turn_signal, None);
    }
}
