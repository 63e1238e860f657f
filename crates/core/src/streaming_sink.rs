//! Streaming Sink collaborator contract (§1, out of scope; referenced only
//! through its contract).
//!
//! Grounded on the teacher's `StreamingEncoder` trait: a small, `Send`
//! boundary trait the capture session fans frames out to on a best-effort
//! basis, never blocking on the sink's own backpressure.

use async_trait::async_trait;

/// Consumes float-PCM frames from the live capture stream (§4.2 live fan-out).
///
/// Implementations must not block for long: the capture session treats this
/// as best-effort and drops frames rather than queueing when the sink can't
/// keep up.
#[async_trait]
pub trait StreamingSink: Send + Sync {
    /// Accepts one batch of interleaved little-endian 32-bit float samples,
    /// already deinterleaved to mono at the streaming sample rate.
    async fn push_samples(&self, samples: &[f32]);
}

/// A sink that discards everything. Useful as a default when no live
/// transcription consumer is configured, and in tests.
pub struct NullSink;

#[async_trait]
impl StreamingSink for NullSink {
    async fn push_samples(&self, _samples: &[f32]) {}
}

/// Splits a raw byte chunk from the capture subprocess's stdout into
/// little-endian f32 samples (§4.2, §8 invariant: `len(f) mod 4 = 0`).
///
/// Any trailing bytes that don't form a complete 4-byte sample are dropped by
/// this function; the caller (`capture_session::fan_out_stream`) carries such
/// bytes over to the next read so a pipe read landing mid-sample doesn't
/// permanently misalign the stream, only delays the affected sample by one
/// read.
pub fn bytes_to_f32_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_count_is_byte_len_divided_by_four() {
        let bytes = vec![0u8; 4 * 10];
        let samples = bytes_to_f32_samples(&bytes);
        assert_eq!(samples.len(), 10);
    }

    #[test]
    fn trailing_partial_sample_is_dropped() {
        let mut bytes = vec![0u8; 4 * 3];
        bytes.extend_from_slice(&[1, 2, 3]); // 3 stray bytes, not a full sample
        let samples = bytes_to_f32_samples(&bytes);
        assert_eq!(samples.len(), 3);
    }

    #[tokio::test]
    async fn null_sink_accepts_without_panicking() {
        let sink = NullSink;
        sink.push_samples(&[0.1, 0.2, 0.3]).await;
    }
}
