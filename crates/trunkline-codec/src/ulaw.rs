//! G.711 u-law companding.
//!
//! Standard CCITT G.711 encode/decode with the 0x84 bias and 32635 clip.
//! Encoding a decoded byte is exact for all 256 code points, which is the
//! property the telephony leg relies on when a frame passes through the
//! engine untouched.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Compands one linear PCM16 sample to a u-law byte.
pub fn ulaw_encode_sample(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Expands one u-law byte to a linear PCM16 sample.
pub fn ulaw_decode_sample(byte: u8) -> i16 {
    let code = !byte;
    let sign = code & 0x80;
    let exponent = ((code >> 4) & 0x07) as i32;
    let mantissa = (code & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -(magnitude as i16)
    } else {
        magnitude as i16
    }
}

/// Compands a slice of linear samples.
pub fn ulaw_encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| ulaw_encode_sample(s)).collect()
}

/// Expands a slice of u-law bytes.
pub fn ulaw_decode(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| ulaw_decode_sample(b)).collect()
}
