//! Active notes and samples.

mod pattern;
mod registry;

pub use pattern::VoicePattern;
pub use registry::{ModifyOutcome, Released, Touched, Transition, VoiceRegistry};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Node number assigned to a voice by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct VoiceHandle(pub i32);

impl VoiceHandle {
    pub fn node(self) -> i32 {
        self.0
    }
}

impl fmt::Display for VoiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoiceKind {
    Note,
    Sample,
}

/// What a voice plays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DefinitionRef {
    Synth(String),
    Sample {
        pack: String,
        index: i32,
        category: Option<String>,
        buffer: i32,
    },
}

impl DefinitionRef {
    /// Synth definition to instantiate for this voice.
    pub fn synth_name<'a>(&'a self, sampler: &'a str) -> &'a str {
        match self {
            DefinitionRef::Synth(name) => name,
            DefinitionRef::Sample { .. } => sampler,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoiceState {
    Attacking,
    Sustaining,
    Releasing,
    Freed,
}

impl VoiceState {
    /// Forward-only lifecycle; any live state may jump to `Releasing`.
    pub fn can_become(self, next: VoiceState) -> bool {
        use VoiceState::*;
        matches!(
            (self, next),
            (Attacking, Sustaining)
                | (Attacking, Releasing)
                | (Sustaining, Releasing)
                | (Releasing, Freed)
        )
    }

    pub fn is_live(self) -> bool {
        matches!(self, VoiceState::Attacking | VoiceState::Sustaining)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Voice {
    pub handle: VoiceHandle,
    pub external_id: String,
    pub kind: VoiceKind,
    pub definition: DefinitionRef,
    pub params: BTreeMap<String, f32>,
    pub state: VoiceState,
    /// Every state the voice has entered, oldest first.
    pub history: Vec<VoiceState>,
    /// Clock time at which the voice starts sounding.
    pub starts_at: Duration,
    pub scheduled_free_at: Option<Duration>,
    /// Whether the backend has been asked to create the node.
    pub spawned: bool,
}

impl Voice {
    /// Moves to `next` if the lifecycle allows it.
    pub(crate) fn enter(&mut self, next: VoiceState) -> bool {
        if !self.state.can_become(next) {
            return false;
        }
        self.state = next;
        self.history.push(next);
        true
    }
}

/// Request to create a voice.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSpec {
    /// Caller id; `{nodeId}` is replaced with the assigned node number.
    pub external_id: String,
    pub kind: VoiceKind,
    pub definition: DefinitionRef,
    pub params: BTreeMap<String, f32>,
    pub delay: Duration,
    /// Seconds until automatic release, for timed notes.
    pub gate: Option<f32>,
    /// Natural playback length in seconds, for samples.
    pub length: Option<f32>,
    /// Release tail in seconds, added to the gate for the expected free time.
    pub release: f32,
}

impl VoiceSpec {
    pub fn note(definition: &str, external_id: &str) -> Self {
        Self {
            external_id: external_id.to_owned(),
            kind: VoiceKind::Note,
            definition: DefinitionRef::Synth(definition.to_owned()),
            params: BTreeMap::new(),
            delay: Duration::ZERO,
            gate: None,
            length: None,
            release: 0.0,
        }
    }

    pub fn with_gate(mut self, gate: f32, release: f32) -> Self {
        self.gate = Some(gate);
        self.release = release;
        self
    }

    pub fn with_param(mut self, name: &str, value: f32) -> Self {
        self.params.insert(name.to_owned(), value);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Negative and NaN spans are zero; spans too long to represent saturate.
pub(crate) fn seconds(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_forward_only() {
        use VoiceState::*;
        assert!(Attacking.can_become(Sustaining));
        assert!(Attacking.can_become(Releasing));
        assert!(Sustaining.can_become(Releasing));
        assert!(Releasing.can_become(Freed));
        assert!(!Sustaining.can_become(Attacking));
        assert!(!Releasing.can_become(Sustaining));
        assert!(!Freed.can_become(Releasing));
        assert!(!Attacking.can_become(Freed));
    }

    #[test]
    fn sample_voices_use_the_sampler() {
        let def = DefinitionRef::Sample {
            pack: "drums".into(),
            index: 0,
            category: None,
            buffer: 12,
        };
        assert_eq!(def.synth_name("sampler"), "sampler");
        assert_eq!(DefinitionRef::Synth("pluck".into()).synth_name("sampler"), "pluck");
    }
}
