//! Sample-rate conversion between the narrowband telephony leg and the
//! wideband realtime leg.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::codec::{self, SilenceGate};
use crate::{Error, Result};

pub const TELEPHONY_RATE: u32 = 8_000;
pub const REALTIME_RATE: u32 = 24_000;

const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of output samples for `input_samples` converted from `from` to `to` Hz.
#[must_use]
pub fn output_len(input_samples: usize, from: u32, to: u32) -> usize {
    if from == 0 {
        return 0;
    }
    let scaled = input_samples as u128 * u128::from(to) / u128::from(from);
    usize::try_from(scaled).unwrap_or(usize::MAX)
}

/// Per-sample linear interpolation.
///
/// Output sample `i` is read at source position `i * (n - 1) / (m - 1)`,
/// where `n` and `m` are the input and output lengths.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn linear_resample(input: &[i16], from: u32, to: u32) -> Vec<i16> {
    let out_len = output_len(input.len(), from, to);
    if out_len == 0 || input.is_empty() {
        return Vec::new();
    }
    let last = input.len() - 1;
    let step = if out_len > 1 {
        last as f64 / (out_len - 1) as f64
    } else {
        0.0
    };

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let a = f64::from(input[idx]);
            let b = f64::from(input[next]);
            (a + (b - a) * frac)
                .round()
                .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
        })
        .collect()
}

/// Rate conversion through an external program reading and writing raw
/// signed 16-bit little-endian mono PCM on stdin/stdout.
///
/// `{from}` and `{to}` in the argument list are replaced with the rates.
/// The child is killed if it outlives `timeout`.
#[derive(Debug, Clone)]
pub struct ExternalResampler {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ExternalResampler {
    /// `sox` reading and writing raw PCM16 on the standard streams.
    #[must_use]
    pub fn sox() -> Self {
        let args = [
            "-t", "raw", "-r", "{from}", "-e", "signed", "-b", "16", "-c", "1", "-",
            "-t", "raw", "-r", "{to}", "-e", "signed", "-b", "16", "-c", "1", "-",
        ];
        Self {
            program: "sox".to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            timeout: DEFAULT_EXTERNAL_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_args(&self, from: u32, to: u32) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{from}", &from.to_string())
                    .replace("{to}", &to.to_string())
            })
            .collect()
    }

    async fn run(&self, pcm: &[u8], from: u32, to: u32) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(self.command_args(from, to))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Resample("child stdin unavailable".to_string()))?;
        let input = pcm.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Resample(format!("{} timed out", self.program)))??;
        writer
            .await
            .map_err(|e| Error::Resample(e.to_string()))??;

        if !output.status.success() {
            return Err(Error::Resample(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Clone, Default)]
pub enum ResampleStrategy {
    #[default]
    Linear,
    External(ExternalResampler),
}

/// Converts PCM16 buffers between sample rates.
///
/// Identical rates return the input untouched and silent buffers come back
/// as zeros sized for the target rate. An external strategy that fails or
/// times out falls back to linear interpolation.
#[derive(Debug, Clone, Default)]
pub struct Resampler {
    strategy: ResampleStrategy,
    gate: SilenceGate,
}

impl Resampler {
    #[must_use]
    pub const fn new(strategy: ResampleStrategy, gate: SilenceGate) -> Self {
        Self { strategy, gate }
    }

    #[must_use]
    pub fn linear() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn gate(&self) -> &SilenceGate {
        &self.gate
    }

    /// # Errors
    /// Returns [`Error::Codec`] for odd-length input when a conversion is needed,
    /// or [`Error::Resample`] for a zero sample rate.
    pub async fn resample(&self, pcm: &[u8], from: u32, to: u32) -> Result<Vec<u8>> {
        if from == to {
            return Ok(pcm.to_vec());
        }
        if from == 0 || to == 0 {
            return Err(Error::Resample(format!("invalid rate {from} -> {to}")));
        }
        let input = codec::samples(pcm)?;
        let out_len = output_len(input.len(), from, to);

        if self.gate.is_silent(pcm) {
            return Ok(vec![0u8; out_len * 2]);
        }

        match &self.strategy {
            ResampleStrategy::Linear => Ok(codec::samples_to_bytes(&linear_resample(&input, from, to))),
            ResampleStrategy::External(external) => match external.run(pcm, from, to).await {
                Ok(mut converted) => {
                    converted.resize(out_len * 2, 0);
                    Ok(converted)
                }
                Err(err) => {
                    tracing::warn!(program = %external.program, "external resampler failed, using linear: {err}");
                    Ok(codec::samples_to_bytes(&linear_resample(&input, from, to)))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| if i % 2 == 0 { 8_000 } else { -8_000 })
            .collect()
    }

    #[test]
    fn output_len_scales_by_rate() {
        assert_eq!(output_len(160, 8_000, 24_000), 480);
        assert_eq!(output_len(480, 24_000, 8_000), 160);
        assert_eq!(output_len(5, 24_000, 8_000), 1);
        assert_eq!(output_len(10, 0, 8_000), 0);
    }

    #[test]
    fn linear_keeps_endpoints() {
        let input = [0i16, 100, 200, 300];
        let out = linear_resample(&input, 8_000, 16_000);
        assert_eq!(out.len(), 8);
        assert_eq!(out[0], 0);
        assert_eq!(out[7], 300);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn linear_handles_single_output_sample() {
        let out = linear_resample(&[42, 7, 9], 24_000, 8_000);
        assert_eq!(out, vec![42]);
    }

    #[tokio::test]
    async fn same_rate_is_identity() {
        let pcm = codec::samples_to_bytes(&tone(32));
        let resampler = Resampler::linear();
        let out = resampler.resample(&pcm, 8_000, 8_000).await.unwrap();
        assert_eq!(out, pcm);
    }

    #[tokio::test]
    async fn silent_input_yields_zeroes_at_target_length() {
        let pcm = vec![0u8; 320];
        let out = Resampler::linear().resample(&pcm, 8_000, 24_000).await.unwrap();
        assert_eq!(out.len(), 960);
        assert!(out.iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn odd_length_is_rejected() {
        let err = Resampler::linear().resample(&[1, 2, 3], 8_000, 24_000).await.unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn sox_arguments_carry_both_rates() {
        let sox = ExternalResampler::sox().with_timeout(Duration::from_millis(500));
        let args = sox.command_args(8_000, 24_000);
        assert_eq!(args.iter().filter(|a| *a == "8000").count(), 1);
        assert_eq!(args.iter().filter(|a| *a == "24000").count(), 1);
        assert!(!args.iter().any(|a| a.contains('{')));
        assert_eq!(sox.timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn missing_external_program_falls_back_to_linear() {
        let external = ExternalResampler {
            program: "definitely-not-a-resampler-binary".to_string(),
            args: Vec::new(),
            timeout: Duration::from_millis(200),
        };
        let resampler = Resampler::new(ResampleStrategy::External(external), SilenceGate::default());
        let input = tone(80);
        let pcm = codec::samples_to_bytes(&input);
        let out = resampler.resample(&pcm, 8_000, 24_000).await.unwrap();
        assert_eq!(out, codec::samples_to_bytes(&linear_resample(&input, 8_000, 24_000)));
    }
}
