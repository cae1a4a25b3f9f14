//! Signed 16-bit little-endian PCM byte packing.

use crate::error::CodecError;

/// Unpacks little-endian PCM16 bytes into samples.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPcm`] if the byte length is odd.
pub fn pcm_bytes_to_samples(data: &[u8]) -> Result<Vec<i16>, CodecError> {
    if data.len() % 2 != 0 {
        return Err(CodecError::MalformedPcm(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Packs samples into little-endian PCM16 bytes.
pub fn pcm_samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_samples() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 12345, -12345];
        let bytes = pcm_samples_to_bytes(&samples);
        assert_eq!(pcm_bytes_to_samples(&bytes).unwrap(), samples);
    }

    #[test]
    fn rejects_odd_byte_length() {
        assert!(matches!(
            pcm_bytes_to_samples(&[0, 1, 2]),
            Err(CodecError::MalformedPcm(3))
        ));
    }
}
