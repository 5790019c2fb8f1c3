//! G.711 µ-law ⇄ PCM16 conversion and silence classification.
//!
//! PCM buffers are little-endian signed 16-bit mono samples, the layout both
//! the realtime API and the telephony leg agree on once µ-law is expanded.

use crate::{Error, Result};

/// µ-law byte that expands to a zero sample.
pub const MULAW_SILENCE: u8 = 0xFF;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// Tunable parameters for [`is_silent`].
///
/// The defaults are empirical tuning values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceGate {
    /// Samples with an absolute amplitude at or below this are quiet.
    pub threshold: u16,
    /// Fraction of inspected samples that must be quiet.
    pub ratio: f32,
    /// Inspect every `stride`-th sample.
    pub stride: usize,
}

impl Default for SilenceGate {
    fn default() -> Self {
        Self {
            threshold: 25,
            ratio: 0.9,
            stride: 4,
        }
    }
}

impl SilenceGate {
    #[must_use]
    pub fn is_silent(&self, pcm: &[u8]) -> bool {
        let stride = self.stride.max(1);
        let mut inspected = 0usize;
        let mut quiet = 0usize;
        for frame in pcm.chunks_exact(2).step_by(stride) {
            let sample = i16::from_le_bytes([frame[0], frame[1]]);
            inspected += 1;
            if sample.unsigned_abs() <= self.threshold {
                quiet += 1;
            }
        }
        if inspected == 0 {
            return true;
        }
        #[allow(clippy::cast_precision_loss)]
        let quiet_ratio = quiet as f32 / inspected as f32;
        quiet_ratio >= self.ratio
    }
}

/// Expand one µ-law byte to a linear sample (ITU-T G.711 table values).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn mulaw_to_linear(byte: u8) -> i16 {
    let inverted = !byte;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = (inverted & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if inverted & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compress one linear sample to µ-law.
#[must_use]
pub const fn linear_to_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > MULAW_CLIP {
        pcm = MULAW_CLIP;
    }
    pcm += MULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Expand a µ-law buffer to PCM16 bytes. Every input length is valid.
#[must_use]
pub fn decode(mulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw.len() * 2);
    for &byte in mulaw {
        pcm.extend_from_slice(&mulaw_to_linear(byte).to_le_bytes());
    }
    pcm
}

/// Compress PCM16 bytes to µ-law.
///
/// # Errors
/// Returns [`Error::Codec`] if the buffer does not hold whole samples.
pub fn encode(pcm: &[u8]) -> Result<Vec<u8>> {
    Ok(samples(pcm)?.into_iter().map(linear_to_mulaw).collect())
}

/// Classify a PCM16 buffer using the default [`SilenceGate`].
#[must_use]
pub fn is_silent(pcm: &[u8]) -> bool {
    SilenceGate::default().is_silent(pcm)
}

/// View PCM16 bytes as samples.
///
/// # Errors
/// Returns [`Error::Codec`] for odd-length buffers.
pub fn samples(pcm: &[u8]) -> Result<Vec<i16>> {
    if pcm.len() % 2 != 0 {
        return Err(Error::Codec(format!(
            "pcm16 buffer has odd length {}",
            pcm.len()
        )));
    }
    Ok(pcm
        .chunks_exact(2)
        .map(|frame| i16::from_le_bytes([frame[0], frame[1]]))
        .collect())
}

#[must_use]
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    buf
}
