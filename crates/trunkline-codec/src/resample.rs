//! Linear-interpolation sample-rate conversion.

use crate::error::CodecError;

/// Resamples linear PCM samples from `from_rate` to `to_rate` using
/// linear interpolation.
///
/// Output length is `len * to_rate / from_rate` rounded down, so duration
/// is preserved to within one sample period. Equal rates return the input
/// unchanged.
///
/// # Errors
///
/// Returns [`CodecError::SampleRate`] if either rate is zero.
pub fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>, CodecError> {
    if from_rate == 0 {
        return Err(CodecError::SampleRate(from_rate));
    }
    if to_rate == 0 {
        return Err(CodecError::SampleRate(to_rate));
    }
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let out_len = ((input.len() as u64 * to_rate as u64) / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let a = input[idx.min(last)] as f64;
        let b = input[(idx + 1).min(last)] as f64;
        out.push((a + (b - a) * frac).round() as i16);
    }

    Ok(out)
}
