//! Collaborators that produce sound, read samples and render scores.
//!
//! The engine only talks to these traits. Calls are made with no registry
//! or session lock held.

mod memory;
pub(crate) mod osc;
mod score_file;
mod script;
mod wav;

pub use memory::{BackendCall, MemoryBackend, MemoryRenderer};
pub use osc::OscBackend;
pub use score_file::JsonScoreRenderer;
pub use script::{ScriptScoreRenderer, NRT_DONE, READ_SCD_FILE, RENDER_TIMEOUT};
pub use wav::WavSampleLoader;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::BackendError;
use crate::nrt::Score;
use crate::samples::Sample;
use crate::voice::VoiceHandle;

pub type Result<T> = std::result::Result<T, BackendError>;

/// Sound-producing backend addressed by node number.
pub trait SynthBackend: Send + Sync {
    fn spawn(&self, node: VoiceHandle, definition: &str, params: &BTreeMap<String, f32>)
        -> Result<()>;

    fn set_params(&self, node: VoiceHandle, params: &BTreeMap<String, f32>) -> Result<()>;

    /// Closes the gate; the node fades out over its release time.
    fn release(&self, node: VoiceHandle) -> Result<()>;

    fn free(&self, node: VoiceHandle) -> Result<()>;

    fn load_sample(&self, sample: &Sample) -> Result<()>;

    fn create_definition(&self, source: &str) -> Result<()>;

    /// Hands arbitrary source to the language host.
    fn run_source(&self, source: &str) -> Result<()>;
}

/// Facts about a sample file the scheduler needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub seconds: f32,
}

pub trait SampleLoader: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<SampleInfo>;
}

/// Turns a compiled score into an output artifact and returns its path.
pub trait ScoreRenderer: Send + Sync {
    fn render(&self, score: &Score) -> Result<PathBuf>;
}

/// Final path component of a score's output name, so renders stay inside
/// their directory.
pub(crate) fn file_stem(output_name: &str) -> String {
    Path::new(output_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "score".to_owned())
}
