//! Decoding (and, for the emulator and tests, encoding) of the fixed-length
//! binary frames the chip emits while streaming.
//!
//! A frame has no delimiter or length prefix; framing is purely by byte
//! count. The layout is:
//!
//! ```text
//! [packet_id: 1B] [ch0: 8B] [ch1: 8B] ... [chN-1: 8B]
//! ```
//!
//! where each channel record is big-endian, signed: `eeg: 4B`, `i: 2B`,
//! `q: 2B`. With the default 8 channels a frame is exactly 65 bytes.

use crate::channel_store::ChannelSample;
use std::fmt;

/// Bytes occupied by one channel record inside a frame.
pub const BYTES_PER_CHANNEL: usize = 8;

/// Default number of physical channels on the chip.
pub const DEFAULT_NUM_CHANNELS: usize = 8;

/// Frame length for the default channel count.
pub const FRAME_LEN: usize = frame_len(DEFAULT_NUM_CHANNELS);

/// Total frame length for a given channel count.
pub const fn frame_len(num_channels: usize) -> usize {
    1 + num_channels * BYTES_PER_CHANNEL
}

/// Returned when a buffer handed to [`decode_frame`] is not exactly one
/// frame long. No partial results are produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramingError {
    /// How many bytes the caller supplied.
    pub got: usize,
    /// How many bytes one frame requires.
    pub expected: usize,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "framing error: got {} bytes, expected a {}-byte frame",
            self.got, self.expected
        )
    }
}

impl std::error::Error for FramingError {}

/// Decodes one frame into its packet id and per-channel samples, in
/// channel declaration order. Every sample carries the frame's packet id
/// so a store slot can be replaced in one piece.
pub fn decode_frame(
    buf: &[u8],
    num_channels: usize,
) -> Result<(u8, Vec<ChannelSample>), FramingError> {
    let expected = frame_len(num_channels);
    if buf.len() != expected {
        return Err(FramingError {
            got: buf.len(),
            expected,
        });
    }

    let packet_id = buf[0];
    let samples = buf[1..]
        .chunks_exact(BYTES_PER_CHANNEL)
        .map(|rec| ChannelSample {
            packet_id,
            eeg: i32::from_be_bytes(rec[0..4].try_into().expect("4-byte slice")),
            i: i16::from_be_bytes(rec[4..6].try_into().expect("2-byte slice")),
            q: i16::from_be_bytes(rec[6..8].try_into().expect("2-byte slice")),
        })
        .collect();

    Ok((packet_id, samples))
}

/// Encodes a frame from a packet id and channel samples. The inverse of
/// [`decode_frame`]; used by the emulated device and round-trip tests.
pub fn encode_frame(packet_id: u8, samples: &[ChannelSample]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame_len(samples.len()));
    buf.push(packet_id);
    for s in samples {
        buf.extend_from_slice(&s.eeg.to_be_bytes());
        buf.extend_from_slice(&s.i.to_be_bytes());
        buf.extend_from_slice(&s.q.to_be_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(packet_id: u8, eeg: i32, i: i16, q: i16) -> ChannelSample {
        ChannelSample {
            packet_id,
            eeg,
            i,
            q,
        }
    }

    #[test]
    fn round_trip_default_frame() {
        let samples: Vec<ChannelSample> = (0..DEFAULT_NUM_CHANNELS)
            .map(|c| sample(42, -1000 * c as i32, c as i16, -(c as i16)))
            .collect();

        let buf = encode_frame(42, &samples);
        assert_eq!(buf.len(), FRAME_LEN);

        let (packet_id, decoded) = decode_frame(&buf, DEFAULT_NUM_CHANNELS).unwrap();
        assert_eq!(packet_id, 42);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn negative_fields_stay_signed() {
        let samples = vec![sample(7, -2_000_000, -300, i16::MIN)];
        let buf = encode_frame(7, &samples);
        let (_, decoded) = decode_frame(&buf, 1).unwrap();
        assert_eq!(decoded[0].eeg, -2_000_000);
        assert_eq!(decoded[0].i, -300);
        assert_eq!(decoded[0].q, i16::MIN);
    }

    #[test]
    fn short_buffer_is_a_framing_error() {
        let err = decode_frame(&[0u8; 4], DEFAULT_NUM_CHANNELS).unwrap_err();
        assert_eq!(
            err,
            FramingError {
                got: 4,
                expected: FRAME_LEN
            }
        );
    }

    #[test]
    fn long_buffer_is_a_framing_error() {
        assert!(decode_frame(&[0u8; FRAME_LEN + 1], DEFAULT_NUM_CHANNELS).is_err());
    }

    #[test]
    fn extreme_values_round_trip() {
        let samples = vec![
            sample(255, i32::MAX, i16::MAX, i16::MAX),
            sample(255, i32::MIN, i16::MIN, i16::MIN),
        ];
        let buf = encode_frame(255, &samples);
        let (packet_id, decoded) = decode_frame(&buf, 2).unwrap();
        assert_eq!(packet_id, 255);
        assert_eq!(decoded, samples);
    }
}
