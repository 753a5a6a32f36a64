use thiserror::Error;
use tokio::time::Instant;
use tracing::{instrument, warn};

use crate::model::Sample;

/// Length of a single-sample notification.
pub const SINGLE_SAMPLE_LEN: usize = 2;
/// Length of a ten-sample burst notification.
pub const BURST_LEN: usize = 20;

/// Errors returned while framing notification payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameError {
    #[error("notification payload of {len} bytes is neither {SINGLE_SAMPLE_LEN} nor {BURST_LEN} bytes")]
    UnsupportedLength { len: usize },
}

/// Decodes raw notification payloads into samples.
pub struct PayloadDecoder;

impl PayloadDecoder {
    /// Decodes the big-endian `u16` values carried by one payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is not exactly 2 or 20 bytes long.
    pub fn decode_values(payload: &[u8]) -> Result<Vec<u16>, FrameError> {
        match payload.len() {
            SINGLE_SAMPLE_LEN | BURST_LEN => Ok(payload
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()),
            len => Err(FrameError::UnsupportedLength { len }),
        }
    }

    /// Decodes one payload into samples stamped with the capture time.
    ///
    /// Malformed payloads are logged and yield no samples.
    #[instrument(skip(payload, captured_at), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode(payload: &[u8], captured_at: Instant) -> Vec<Sample> {
        match Self::decode_values(payload) {
            Ok(values) => values
                .into_iter()
                .map(|value| Sample::new(captured_at, value))
                .collect(),
            Err(error) => {
                warn!(%error, payload = %hex::encode(payload), "dropping malformed notification");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn decode_single_sample_is_big_endian() {
        let values = PayloadDecoder::decode_values(&[0x03, 0xE8])
            .expect("two-byte payload should decode cleanly");
        assert_eq!(vec![1000], values);
    }

    #[test]
    fn decode_burst_keeps_byte_order() {
        let payload: Vec<u8> = (0..10u16).flat_map(|v| (v * 257).to_be_bytes()).collect();
        let values =
            PayloadDecoder::decode_values(&payload).expect("burst payload should decode cleanly");
        assert_eq!(vec![0, 257, 514, 771, 1028, 1285, 1542, 1799, 2056, 2313], values);
    }

    #[test]
    fn decode_zeroed_burst_yields_ten_zero_samples() {
        let captured_at = Instant::now();
        let samples = PayloadDecoder::decode(&[0; BURST_LEN], captured_at);
        assert_eq!(10, samples.len());
        assert!(samples.iter().all(|sample| sample.value() == 0));
        assert!(samples.iter().all(|sample| sample.timestamp() == captured_at));
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    #[case(4)]
    #[case(19)]
    #[case(21)]
    fn decode_rejects_unsupported_lengths(#[case] len: usize) {
        let payload = vec![0xAB; len];
        assert_matches!(
            PayloadDecoder::decode_values(&payload),
            Err(FrameError::UnsupportedLength { len: rejected }) if rejected == len
        );
        assert!(PayloadDecoder::decode(&payload, Instant::now()).is_empty());
    }
}
