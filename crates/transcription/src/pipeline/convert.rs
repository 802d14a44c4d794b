//! Conversion collaborator: any supported container → normalized mono 16kHz PCM WAV.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::SAMPLE_RATE;
use super::wav_reader::{read_wav_16k_mono, wav_duration_secs, write_wav_mono};
use crate::error::ConversionError;

#[async_trait]
pub trait AudioConverter: Send + Sync + 'static {
    /// Produces a normalized single-channel 16kHz waveform at `output`.
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}

/// Pure-Rust normalizer for WAV inputs (down-mix + resample).
#[derive(Debug, Default, Clone, Copy)]
pub struct WavNormalizer;

#[async_trait]
impl AudioConverter for WavNormalizer {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        if !is_wav(input) {
            return Err(ConversionError::Unsupported {
                path: input.to_path_buf(),
                reason: "not a WAV file".to_string(),
            });
        }

        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let (samples, _) = read_wav_16k_mono(&input).map_err(|e| ConversionError::Corrupt {
                path: input.clone(),
                reason: e.to_string(),
            })?;
            write_wav_mono(&output, &samples, SAMPLE_RATE)
                .map_err(|e| ConversionError::Tool(e.to_string()))?;
            debug!(input = %input.display(), samples = samples.len(), "WAV normalized");
            Ok(())
        })
        .await
        .map_err(|e| ConversionError::Tool(format!("normalizer join error: {e}")))?
    }
}

/// Shells out to `ffmpeg` for arbitrary containers.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    binary: PathBuf,
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegConverter {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let out = Command::new(&self.binary)
            .arg("-nostdin")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-vn", "-ac", "1", "-ar"])
            .arg(SAMPLE_RATE.to_string())
            .args(["-c:a", "pcm_s16le", "-loglevel", "error"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConversionError::Tool(format!("failed to spawn ffmpeg: {e}")))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            warn!(input = %input.display(), %stderr, "ffmpeg conversion failed");
            return Err(ConversionError::Corrupt {
                path: input.to_path_buf(),
                reason: if stderr.is_empty() {
                    format!("ffmpeg exited with {}", out.status)
                } else {
                    stderr
                },
            });
        }
        Ok(())
    }
}

/// Picks [`WavNormalizer`] for WAV inputs and [`FfmpegConverter`] for everything else.
#[derive(Debug, Default, Clone)]
pub struct AutoConverter {
    wav: WavNormalizer,
    ffmpeg: FfmpegConverter,
}

#[async_trait]
impl AudioConverter for AutoConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        if is_wav(input) {
            match self.wav.convert(input, output).await {
                Ok(()) => return Ok(()),
                // Some WAV flavours (ADPCM, mu-law) are not readable by hound
                Err(ConversionError::Corrupt { reason, .. }) => {
                    debug!(%reason, "WAV normalizer rejected input, retrying with ffmpeg");
                }
                Err(e) => return Err(e),
            }
        }
        self.ffmpeg.convert(input, output).await
    }
}

/// Best-effort duration lookup: WAV header first, then `ffprobe`.
pub async fn detect_duration_secs(path: &Path) -> Option<f64> {
    if is_wav(path)
        && let Ok(secs) = wav_duration_secs(path)
    {
        return Some(secs);
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;

    String::from_utf8(output.stdout).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wav_normalizer_resamples_to_16k() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_wav_mono(&input, &vec![0.1f32; 8000 * 2], 8000).unwrap();

        WavNormalizer.convert(&input, &output).await.unwrap();

        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let secs = wav_duration_secs(&output).unwrap();
        assert!((secs - 2.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_wav_normalizer_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.wav");
        std::fs::write(&input, b"definitely not riff").unwrap();

        let err = WavNormalizer
            .convert(&input, &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_detect_reads_wav_header() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.wav");
        write_wav_mono(&input, &vec![0.0f32; 16000 * 5], SAMPLE_RATE).unwrap();
        let secs = detect_duration_secs(&input).await.unwrap();
        assert!((secs - 5.0).abs() < 1e-6);
    }
}
