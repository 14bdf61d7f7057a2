//! G.711 mu-law companding and naive resampling.
//!
//! Carrier audio is 8 kHz, 8-bit mu-law. Speech providers speak 16-bit
//! linear PCM at various rates. Everything here is pure and allocation is
//! one output buffer per call.

use popline_types::TELEPHONY_SAMPLE_RATE;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Segment (exponent) lookup indexed by the biased magnitude's upper byte.
static EXPONENT_TABLE: [u8; 256] = build_exponent_table();

/// Reconstructed PCM value for every mu-law byte.
static DECODE_TABLE: [i16; 256] = build_decode_table();

const fn build_exponent_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i: usize = 2;
    while i < 256 {
        // floor(log2(i))
        table[i] = (usize::BITS - 1 - i.leading_zeros()) as u8;
        i += 1;
    }
    table
}

const fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut byte: usize = 0;
    while byte < 256 {
        let u = !(byte as u8);
        let exponent = ((u >> 4) & 0x07) as i32;
        let mantissa = (u & 0x0F) as i32;
        let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
        table[byte] = if u & 0x80 != 0 {
            -magnitude as i16
        } else {
            magnitude as i16
        };
        byte += 1;
    }
    table
}

/// Compands one linear sample. Magnitudes above 32 635 are clipped.
pub fn encode_sample(sample: i16) -> u8 {
    let mut s = sample as i32;
    let sign = if s < 0 { 0x80 } else { 0x00 };
    if sign != 0 {
        s = -s;
    }
    s = s.min(CLIP) + BIAS;

    let exponent = EXPONENT_TABLE[((s >> 7) & 0xFF) as usize] as i32;
    let mantissa = (s >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn decode_sample(byte: u8) -> i16 {
    DECODE_TABLE[byte as usize]
}

/// Linear PCM to mu-law, one byte per sample.
pub fn encode(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| encode_sample(s)).collect()
}

/// Mu-law to linear PCM. Lossy: each byte maps to one of 256 values.
pub fn decode(mulaw: &[u8]) -> Vec<i16> {
    mulaw.iter().map(|&b| decode_sample(b)).collect()
}

/// Linear-interpolation resampler with no anti-aliasing filter.
///
/// Output length is `floor(len / (from_rate / to_rate))`. Reads past the
/// end of the input clamp to the last sample. Equal rates return the input
/// unchanged; a zero rate yields no output.
pub fn resample(pcm: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return pcm.to_vec();
    }
    if from_rate == 0 || to_rate == 0 || pcm.is_empty() {
        return Vec::new();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (pcm.len() as f64 / ratio).floor() as usize;
    let last = pcm.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = pcm[idx.min(last)] as f64;
            let b = pcm[(idx + 1).min(last)] as f64;
            (a * (1.0 - frac) + b * frac).round() as i16
        })
        .collect()
}

/// Resamples synthesized PCM to 8 kHz and compands it for the carrier.
pub fn convert_to_outbound_format(pcm: &[i16], source_rate: u32) -> Vec<u8> {
    encode(&resample(pcm, source_rate, TELEPHONY_SAMPLE_RATE))
}

/// Parses signed 16-bit little-endian bytes. A trailing odd byte is dropped.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn pcm_to_le_bytes(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().flat_map(|s| s.to_le_bytes()).collect()
}
