use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::Mutex;

use super::{seconds, Voice, VoiceHandle, VoicePattern, VoiceSpec, VoiceState};
use crate::config::EngineConfig;

const GATE: &str = "gate";

/// A voice whose parameters were overridden by a modify.
#[derive(Debug, Clone, PartialEq)]
pub struct Touched {
    pub handle: VoiceHandle,
    pub spawned: bool,
    /// Overrides to forward to the backend.
    pub params: BTreeMap<String, f32>,
}

/// A voice moved to `Releasing` by a modify.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Released {
    pub handle: VoiceHandle,
    pub spawned: bool,
    pub free_at: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyOutcome {
    pub touched: Vec<Touched>,
    pub released: Vec<Released>,
}

impl ModifyOutcome {
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.released.is_empty()
    }
}

/// Result of applying a scheduled state change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Voice),
    Refused { from: VoiceState },
    Missing,
}

#[derive(Debug)]
struct RegistryState {
    next_node: i32,
    by_id: HashMap<String, VoiceHandle>,
    voices: BTreeMap<VoiceHandle, Voice>,
}

/// Voices by external id. All mutation goes through one lock.
#[derive(Debug)]
pub struct VoiceRegistry {
    config: EngineConfig,
    state: Mutex<RegistryState>,
}

impl VoiceRegistry {
    pub fn new(config: EngineConfig) -> Self {
        let state = RegistryState {
            next_node: config.first_node,
            by_id: HashMap::new(),
            voices: BTreeMap::new(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Registers a voice in `Attacking`.
    ///
    /// A colliding external id is rebound to the new voice. The superseded
    /// voice keeps its pending timers and is no longer reachable by id.
    pub fn start(&self, spec: VoiceSpec, now: Duration) -> VoiceHandle {
        let mut state = self.state.lock();
        let handle = VoiceHandle(state.next_node);
        state.next_node = state.next_node.wrapping_add(1);

        let external_id = spec
            .external_id
            .replace("{nodeId}", &handle.node().to_string());
        let starts_at = now.saturating_add(spec.delay);
        let scheduled_free_at = match (spec.gate, spec.length) {
            (Some(gate), _) => Some(
                starts_at
                    .saturating_add(seconds(gate))
                    .saturating_add(seconds(spec.release)),
            ),
            (None, Some(length)) => Some(starts_at.saturating_add(seconds(length))),
            (None, None) => None,
        };

        if let Some(previous) = state.by_id.insert(external_id.clone(), handle) {
            tracing::debug!(%external_id, %previous, "external id rebound to new voice");
        }
        state.voices.insert(
            handle,
            Voice {
                handle,
                external_id,
                kind: spec.kind,
                definition: spec.definition,
                params: spec.params,
                state: VoiceState::Attacking,
                history: vec![VoiceState::Attacking],
                starts_at,
                scheduled_free_at,
                spawned: false,
            },
        );
        handle
    }

    /// Handles of voices whose whole external id matches `pattern`.
    pub fn lookup_matching(&self, pattern: &VoicePattern) -> Vec<VoiceHandle> {
        let state = self.state.lock();
        Self::matching(&state, pattern)
    }

    fn matching(state: &RegistryState, pattern: &VoicePattern) -> Vec<VoiceHandle> {
        let handles: BTreeSet<VoiceHandle> = state
            .by_id
            .iter()
            .filter(|(id, _)| pattern.matches(id))
            .map(|(_, handle)| *handle)
            .collect();
        handles.into_iter().collect()
    }

    /// Applies overrides to every matching voice without restarting it.
    ///
    /// `gate = 0` releases each live match once and reports when it should be
    /// freed. `gate > 0` on a releasing voice is ignored.
    pub fn modify(
        &self,
        pattern: &VoicePattern,
        updates: &BTreeMap<String, f32>,
        now: Duration,
    ) -> ModifyOutcome {
        let mut state = self.state.lock();
        let mut outcome = ModifyOutcome::default();
        let gate = updates.get(GATE).copied();

        for handle in Self::matching(&state, pattern) {
            let Some(voice) = state.voices.get_mut(&handle) else {
                continue;
            };
            let mut forwarded = BTreeMap::new();
            for (name, value) in updates.iter().filter(|(name, _)| name.as_str() != GATE) {
                voice.params.insert(name.clone(), *value);
                forwarded.insert(name.clone(), *value);
            }

            match gate {
                Some(value) if value <= 0.0 && voice.enter(VoiceState::Releasing) => {
                    let free_at = now.saturating_add(seconds(self.config.release_of(&voice.params)));
                    voice.scheduled_free_at = Some(free_at);
                    outcome.released.push(Released {
                        handle,
                        spawned: voice.spawned,
                        free_at,
                    });
                }
                Some(value) if value > 0.0 && voice.state.is_live() => {
                    forwarded.insert(GATE.to_owned(), value);
                }
                _ => {}
            }

            if !forwarded.is_empty() {
                outcome.touched.push(Touched {
                    handle,
                    spawned: voice.spawned,
                    params: forwarded,
                });
            }
        }
        outcome
    }

    /// Marks a voice as sent to the backend. Returns `None` for voices that
    /// were released or freed before their start time.
    pub fn begin_playback(&self, handle: VoiceHandle) -> Option<Voice> {
        let mut state = self.state.lock();
        let voice = state.voices.get_mut(&handle)?;
        if voice.spawned || !voice.state.is_live() {
            return None;
        }
        voice.spawned = true;
        Some(voice.clone())
    }

    pub fn transition(&self, handle: VoiceHandle, next: VoiceState) -> Transition {
        let mut state = self.state.lock();
        let Some(voice) = state.voices.get_mut(&handle) else {
            return Transition::Missing;
        };
        if !voice.enter(next) {
            return Transition::Refused { from: voice.state };
        }
        Transition::Applied(voice.clone())
    }

    /// Natural end of a timed note's gate. Returns the voice and its free time.
    pub fn release(&self, handle: VoiceHandle, now: Duration) -> Option<(Voice, Duration)> {
        let mut state = self.state.lock();
        let voice = state.voices.get_mut(&handle)?;
        if !voice.enter(VoiceState::Releasing) {
            return None;
        }
        let free_at = now.saturating_add(seconds(self.config.release_of(&voice.params)));
        voice.scheduled_free_at = Some(free_at);
        Some((voice.clone(), free_at))
    }

    /// Removes a voice. A live voice passes through `Releasing` on the way
    /// out. Freeing an absent handle is a no-op.
    pub fn free(&self, handle: VoiceHandle) -> Option<Voice> {
        let mut state = self.state.lock();
        let mut voice = state.voices.remove(&handle)?;
        if state.by_id.get(&voice.external_id) == Some(&handle) {
            state.by_id.remove(&voice.external_id);
        }
        if voice.state.is_live() {
            voice.enter(VoiceState::Releasing);
        }
        voice.enter(VoiceState::Freed);
        Some(voice)
    }

    /// Removes the voice currently bound to `external_id`, if any.
    pub fn free_external(&self, external_id: &str) -> Option<Voice> {
        let handle = self.state.lock().by_id.get(external_id).copied()?;
        self.free(handle)
    }

    /// Removes every voice matching `pattern`.
    pub fn remove_matching(&self, pattern: &VoicePattern) -> Vec<Voice> {
        let handles = self.lookup_matching(pattern);
        handles
            .into_iter()
            .filter_map(|handle| self.free(handle))
            .collect()
    }

    pub fn get(&self, handle: VoiceHandle) -> Option<Voice> {
        self.state.lock().voices.get(&handle).cloned()
    }

    pub fn handle_of(&self, external_id: &str) -> Option<VoiceHandle> {
        self.state.lock().by_id.get(external_id).copied()
    }

    /// Voices still tracked, superseded ones included.
    pub fn len(&self) -> usize {
        self.state.lock().voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::VoiceKind;

    fn registry() -> VoiceRegistry {
        VoiceRegistry::new(EngineConfig::default())
    }

    fn pattern(source: &str) -> VoicePattern {
        VoicePattern::new(source).expect("pattern")
    }

    fn gate(value: f32) -> BTreeMap<String, f32> {
        BTreeMap::from([(GATE.to_owned(), value)])
    }

    #[test]
    fn handles_start_at_configured_node() {
        let registry = registry();
        let first = registry.start(VoiceSpec::note("pluck", "a"), Duration::ZERO);
        let second = registry.start(VoiceSpec::note("pluck", "b"), Duration::ZERO);
        assert_eq!(first, VoiceHandle(100));
        assert_eq!(second, VoiceHandle(101));
    }

    #[test]
    fn node_id_placeholder_is_substituted() {
        let registry = registry();
        let handle = registry.start(VoiceSpec::note("pluck", "lead-{nodeId}"), Duration::ZERO);
        assert_eq!(registry.handle_of("lead-100"), Some(handle));
    }

    #[test]
    fn timed_note_records_expected_free_time() {
        let registry = registry();
        let spec = VoiceSpec::note("pluck", "a")
            .with_gate(0.5, 0.25)
            .with_delay(Duration::from_millis(100));
        let handle = registry.start(spec, Duration::from_secs(1));
        let voice = registry.get(handle).expect("voice");
        assert_eq!(voice.starts_at, Duration::from_millis(1100));
        assert_eq!(voice.scheduled_free_at, Some(Duration::from_millis(1850)));
    }

    #[test]
    fn non_matching_modify_changes_nothing() {
        let registry = registry();
        let handle = registry.start(
            VoiceSpec::note("pluck", "lead").with_param("freq", 220.0),
            Duration::ZERO,
        );
        let before = registry.get(handle).expect("voice");
        let updates = BTreeMap::from([("freq".to_owned(), 440.0), (GATE.to_owned(), 0.0)]);
        let outcome = registry.modify(&pattern("bass.*"), &updates, Duration::ZERO);
        assert!(outcome.is_empty());
        assert_eq!(registry.get(handle), Some(before));
    }

    #[test]
    fn gate_zero_releases_once() {
        let registry = registry();
        let handle = registry.start(VoiceSpec::note("pluck", "lead"), Duration::ZERO);
        let first = registry.modify(&pattern("lead|le.*"), &gate(0.0), Duration::ZERO);
        assert_eq!(first.released.len(), 1);
        assert_eq!(first.released[0].handle, handle);
        let second = registry.modify(&pattern("lead"), &gate(0.0), Duration::ZERO);
        assert!(second.released.is_empty());
        assert_eq!(
            registry.get(handle).map(|voice| voice.state),
            Some(VoiceState::Releasing)
        );
    }

    #[test]
    fn release_uses_overridden_release_time() {
        let registry = registry();
        registry.start(VoiceSpec::note("pluck", "lead"), Duration::ZERO);
        let updates = BTreeMap::from([("relT".to_owned(), 2.0), (GATE.to_owned(), 0.0)]);
        let outcome = registry.modify(&pattern("lead"), &updates, Duration::from_secs(1));
        assert_eq!(outcome.released[0].free_at, Duration::from_secs(3));
        assert_eq!(outcome.touched[0].params.get("relT"), Some(&2.0));
    }

    #[test]
    fn revive_on_releasing_voice_is_ignored() {
        let registry = registry();
        let handle = registry.start(VoiceSpec::note("pluck", "lead"), Duration::ZERO);
        registry.modify(&pattern("lead"), &gate(0.0), Duration::ZERO);
        let updates = BTreeMap::from([(GATE.to_owned(), 1.0), ("amp".to_owned(), 0.3)]);
        let outcome = registry.modify(&pattern("lead"), &updates, Duration::ZERO);
        assert!(outcome.released.is_empty());
        assert_eq!(outcome.touched.len(), 1);
        assert_eq!(outcome.touched[0].params.get(GATE), None);
        let voice = registry.get(handle).expect("voice");
        assert_eq!(voice.state, VoiceState::Releasing);
        assert_eq!(voice.params.get("amp"), Some(&0.3));
    }

    #[test]
    fn colliding_id_supersedes_lookup() {
        let registry = registry();
        let old = registry.start(VoiceSpec::note("pluck", "lead"), Duration::ZERO);
        let new = registry.start(VoiceSpec::note("pluck", "lead"), Duration::ZERO);
        assert_eq!(registry.lookup_matching(&pattern("lead")), vec![new]);
        assert_eq!(registry.len(), 2);
        // Freeing the superseded voice leaves the new binding intact.
        assert!(registry.free(old).is_some());
        assert_eq!(registry.handle_of("lead"), Some(new));
    }

    #[test]
    fn free_is_idempotent() {
        let registry = registry();
        let handle = registry.start(VoiceSpec::note("pluck", "lead"), Duration::ZERO);
        let freed = registry.free(handle).expect("freed");
        assert_eq!(freed.state, VoiceState::Freed);
        assert!(registry.free(handle).is_none());
        assert!(registry.free_external("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn released_voice_is_not_spawned_late() {
        let registry = registry();
        let handle = registry.start(
            VoiceSpec::note("pluck", "lead").with_delay(Duration::from_secs(1)),
            Duration::ZERO,
        );
        registry.modify(&pattern("lead"), &gate(0.0), Duration::ZERO);
        assert!(registry.begin_playback(handle).is_none());
    }

    fn assert_forward_only(history: &[VoiceState]) {
        assert!(
            history.windows(2).all(|pair| pair[0].can_become(pair[1])),
            "history: {history:?}"
        );
    }

    #[test]
    fn freed_sample_passes_through_releasing() {
        use VoiceState::*;
        let registry = registry();
        let spec = VoiceSpec {
            kind: VoiceKind::Sample,
            length: Some(0.5),
            ..VoiceSpec::note("sampler", "hit")
        };
        let handle = registry.start(spec, Duration::ZERO);
        registry.transition(handle, Sustaining);
        let freed = registry.free(handle).expect("freed");
        assert_eq!(freed.history, vec![Attacking, Sustaining, Releasing, Freed]);
        assert_forward_only(&freed.history);
    }

    #[test]
    fn removed_voices_pass_through_releasing() {
        use VoiceState::*;
        let registry = registry();
        let attacking = registry.start(VoiceSpec::note("pluck", "drone1"), Duration::ZERO);
        let sustaining = registry.start(VoiceSpec::note("pluck", "drone2"), Duration::ZERO);
        let releasing = registry.start(VoiceSpec::note("pluck", "drone3"), Duration::ZERO);
        registry.transition(sustaining, Sustaining);
        registry.modify(&pattern("drone3"), &gate(0.0), Duration::ZERO);

        let removed = registry.remove_matching(&pattern("drone\\d"));
        let histories: Vec<_> = removed
            .iter()
            .map(|voice| (voice.handle, voice.history.clone()))
            .collect();
        assert_eq!(
            histories,
            vec![
                (attacking, vec![Attacking, Releasing, Freed]),
                (sustaining, vec![Attacking, Sustaining, Releasing, Freed]),
                (releasing, vec![Attacking, Releasing, Freed]),
            ]
        );
        for voice in &removed {
            assert_forward_only(&voice.history);
        }
    }

    #[test]
    fn oversized_spans_saturate() {
        let registry = registry();
        let spec = VoiceSpec::note("pluck", "a").with_gate(1.0e19, 1.0e19);
        let handle = registry.start(spec, Duration::from_secs(1));
        let voice = registry.get(handle).expect("voice");
        assert_eq!(voice.scheduled_free_at, Some(Duration::MAX));

        let updates = BTreeMap::from([("relT".to_owned(), f32::INFINITY), (GATE.to_owned(), 0.0)]);
        let outcome = registry.modify(&pattern("a"), &updates, Duration::from_secs(2));
        assert_eq!(outcome.released[0].free_at, Duration::MAX);
    }

    #[test]
    fn transitions_refuse_backwards_moves() {
        let registry = registry();
        let handle = registry.start(VoiceSpec::note("pluck", "lead"), Duration::ZERO);
        assert!(matches!(
            registry.transition(handle, VoiceState::Sustaining),
            Transition::Applied(_)
        ));
        assert_eq!(
            registry.transition(handle, VoiceState::Attacking),
            Transition::Refused {
                from: VoiceState::Sustaining
            }
        );
        assert_eq!(
            registry.transition(VoiceHandle(1), VoiceState::Releasing),
            Transition::Missing
        );
    }
}
