use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{Result, ScoreRenderer, SynthBackend};
use crate::nrt::Score;
use crate::samples::Sample;
use crate::voice::VoiceHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Spawn {
        node: VoiceHandle,
        definition: String,
        params: BTreeMap<String, f32>,
    },
    SetParams {
        node: VoiceHandle,
        params: BTreeMap<String, f32>,
    },
    Release(VoiceHandle),
    Free(VoiceHandle),
    LoadSample(Sample),
    CreateDefinition(String),
    RunSource(String),
}

/// Backend that records calls instead of producing sound.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    calls: Mutex<Vec<BackendCall>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn take(&self) -> Vec<BackendCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    fn record(&self, call: BackendCall) -> Result<()> {
        tracing::debug!(?call, "backend call");
        self.calls.lock().push(call);
        Ok(())
    }
}

impl SynthBackend for MemoryBackend {
    fn spawn(
        &self,
        node: VoiceHandle,
        definition: &str,
        params: &BTreeMap<String, f32>,
    ) -> Result<()> {
        self.record(BackendCall::Spawn {
            node,
            definition: definition.to_owned(),
            params: params.clone(),
        })
    }

    fn set_params(&self, node: VoiceHandle, params: &BTreeMap<String, f32>) -> Result<()> {
        self.record(BackendCall::SetParams {
            node,
            params: params.clone(),
        })
    }

    fn release(&self, node: VoiceHandle) -> Result<()> {
        self.record(BackendCall::Release(node))
    }

    fn free(&self, node: VoiceHandle) -> Result<()> {
        self.record(BackendCall::Free(node))
    }

    fn load_sample(&self, sample: &Sample) -> Result<()> {
        self.record(BackendCall::LoadSample(sample.clone()))
    }

    fn create_definition(&self, source: &str) -> Result<()> {
        self.record(BackendCall::CreateDefinition(source.to_owned()))
    }

    fn run_source(&self, source: &str) -> Result<()> {
        self.record(BackendCall::RunSource(source.to_owned()))
    }
}

/// Renderer that keeps compiled scores in memory.
#[derive(Debug, Default)]
pub struct MemoryRenderer {
    scores: Mutex<Vec<Score>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scores(&self) -> Vec<Score> {
        self.scores.lock().clone()
    }
}

impl ScoreRenderer for MemoryRenderer {
    fn render(&self, score: &Score) -> Result<PathBuf> {
        self.scores.lock().push(score.clone());
        Ok(Path::new(&score.output_name).to_path_buf())
    }
}
