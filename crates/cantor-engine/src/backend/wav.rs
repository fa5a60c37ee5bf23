use std::path::Path;

use super::{Result, SampleInfo, SampleLoader};
use crate::error::BackendError;

/// Reads WAV headers to learn sample lengths.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavSampleLoader;

impl WavSampleLoader {
    pub fn new() -> Self {
        Self
    }
}

impl SampleLoader for WavSampleLoader {
    fn inspect(&self, path: &Path) -> Result<SampleInfo> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(BackendError::EmptySample(path.to_path_buf()));
        }
        let frames = reader.duration();
        Ok(SampleInfo {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            seconds: frames as f32 / spec.sample_rate as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    #[test]
    fn reads_length_from_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kick.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).expect("writer");
        for _ in 0..4_000 {
            writer.write_sample(0i16).expect("left");
            writer.write_sample(0i16).expect("right");
        }
        writer.finalize().expect("finalize");

        let info = WavSampleLoader::new().inspect(&path).expect("inspect");
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 8_000);
        assert!((info.seconds - 0.5).abs() < 1e-6);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = WavSampleLoader::new()
            .inspect(&dir.path().join("missing.wav"))
            .unwrap_err();
        assert!(matches!(err, BackendError::Hound(_)));
    }
}
