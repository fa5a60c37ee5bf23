//! Routing of classified packets to the live or batch sink.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::backend::{SampleLoader, ScoreRenderer, SynthBackend};
use crate::classify::{plan, Plan, Tag};
use crate::command::{
    is_recordable, Command, EventTrigger, LoadSample, NoteModify, NoteOn, PlaySample,
};
use crate::config::EngineConfig;
use crate::error::{DispatchError, DispatchResult, ErrorKind, SessionError};
use crate::message::{decode, time_tag, Message, Packet, Value};
use crate::nrt::{self, BatchCompiler, CompilerState, SessionHeader};
use crate::samples::{SampleEntry, SampleLibrary};
use crate::sched::{Clock, Scheduler, Slot, TimerKey};
use crate::voice::{
    seconds, DefinitionRef, VoiceHandle, VoiceKind, VoiceRegistry, VoiceSpec, VoiceState,
};

pub const TIMED_MSG_INFO: &str = "/timed_msg_info";
pub const RECORD_FINISHED: &str = "/nrt_record_finished";
/// Reply to an event trigger, carrying the time the event is due.
pub const EVENT: &str = "/jdw_sc_event";

/// Tempo used for live gate lengths until `/set_bpm` says otherwise.
pub const DEFAULT_BPM: f32 = 120.0;

/// Where a parsed message goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sink {
    /// Play now (or after the payload's own delay).
    Live,
    /// Reserve at `offset` beats in the open recording session.
    Batch { offset: f32 },
}

/// Deferred work executed by [`Dispatcher::run_due`].
#[derive(Debug, Clone)]
pub enum TimerAction {
    Start(VoiceHandle),
    Sustain(VoiceHandle),
    Release(VoiceHandle),
    Free(VoiceHandle),
    Modify(NoteModify),
}

#[derive(Debug)]
pub struct Failure {
    pub address: String,
    pub error: DispatchError,
}

/// Outcome of handling one packet.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Messages accepted by a sink.
    pub accepted: usize,
    pub failures: Vec<Failure>,
    /// Messages to send back to the packet's sender.
    pub replies: Vec<Message>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.failures
            .iter()
            .map(|failure| failure.error.kind())
            .collect()
    }

    fn fail(&mut self, address: &str, error: DispatchError) {
        tracing::warn!(address, kind = ?error.kind(), reason = %error, "message rejected");
        self.failures.push(Failure {
            address: address.to_owned(),
            error,
        });
    }

    fn record(&mut self, address: &str, result: DispatchResult<()>) {
        match result {
            Ok(()) => self.accepted += 1,
            Err(err) => self.fail(address, err),
        }
    }

    fn answer(&mut self, address: &str, result: DispatchResult<Option<Message>>) {
        match result {
            Ok(reply) => {
                self.accepted += 1;
                self.replies.extend(reply);
            }
            Err(err) => self.fail(address, err),
        }
    }
}

/// External collaborators used by the dispatcher.
#[derive(Clone)]
pub struct Collaborators {
    pub synth: Arc<dyn SynthBackend>,
    pub loader: Arc<dyn SampleLoader>,
    pub renderer: Arc<dyn ScoreRenderer>,
}

pub struct Dispatcher {
    config: EngineConfig,
    registry: VoiceRegistry,
    scheduler: Scheduler<TimerAction>,
    compiler: BatchCompiler,
    samples: Mutex<SampleLibrary>,
    definitions: Mutex<Vec<String>>,
    bpm: Mutex<f32>,
    collaborators: Collaborators,
}

impl Dispatcher {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, collaborators: Collaborators) -> Self {
        Self {
            registry: VoiceRegistry::new(config.clone()),
            scheduler: Scheduler::new(clock),
            compiler: BatchCompiler::new(),
            samples: Mutex::new(SampleLibrary::new()),
            definitions: Mutex::new(Vec::new()),
            bpm: Mutex::new(DEFAULT_BPM),
            config,
            collaborators,
        }
    }

    pub fn registry(&self) -> &VoiceRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler<TimerAction> {
        &self.scheduler
    }

    pub fn compiler(&self) -> &BatchCompiler {
        &self.compiler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bpm(&self) -> f32 {
        *self.bpm.lock()
    }

    /// Decodes and handles one datagram.
    pub fn handle_bytes(&self, bytes: &[u8]) -> DispatchReport {
        match decode(bytes) {
            Ok(packet) => self.handle_packet(packet),
            Err(err) => {
                let mut report = DispatchReport::default();
                report.fail("<packet>", err.into());
                report
            }
        }
    }

    /// Classifies the whole packet, then routes it. A bad tag anywhere
    /// rejects the packet with nothing applied.
    pub fn handle_packet(&self, packet: Packet) -> DispatchReport {
        let mut report = DispatchReport::default();
        match plan(packet) {
            Ok(plan) => self.run_plan(plan, &mut report),
            Err(err) => report.fail(crate::message::BUNDLE_INFO, err.into()),
        }
        report
    }

    fn run_plan(&self, plan: Plan, report: &mut DispatchReport) {
        match plan {
            Plan::Message(message) => {
                let result = self.dispatch(&message, Sink::Live);
                report.answer(&message.address, result);
            }
            Plan::Group { tag, contents } => match tag {
                Tag::NoteTimedGroup | Tag::Untagged => {
                    for item in contents {
                        self.run_plan(item, report);
                    }
                }
                Tag::TimedMessageGroup => match timed_payload(&contents) {
                    Ok((offset, payload)) => {
                        let result = self.dispatch(payload, Sink::Batch { offset });
                        report.answer(&payload.address, result);
                    }
                    Err(err) => report.fail(TIMED_MSG_INFO, err),
                },
                Tag::RecordSession => self.record(contents, report),
                Tag::Preload => self.preload(contents, report),
            },
        }
    }

    /// Routes a single message to `sink`. Returns the reply owed to the
    /// sender, if any.
    pub fn dispatch(&self, message: &Message, sink: Sink) -> DispatchResult<Option<Message>> {
        match sink {
            Sink::Live => {
                let command = Command::parse(message)?;
                tracing::debug!(%message, "live");
                self.execute(command)
            }
            Sink::Batch { offset } => {
                if !offset.is_finite() || offset < 0.0 {
                    return Err(DispatchError::invalid_arguments(
                        TIMED_MSG_INFO,
                        format!("offset must be a non-negative number, got {offset}"),
                    ));
                }
                if self.compiler.state() != CompilerState::Recording {
                    return Err(SessionError::NoActiveSession.into());
                }
                if is_recordable(&message.address) {
                    Command::parse(message)?;
                }
                tracing::debug!(%message, offset, "batch");
                self.compiler.submit(offset, message.clone())?;
                Ok(None)
            }
        }
    }

    fn execute(&self, command: Command) -> DispatchResult<Option<Message>> {
        let result = match command {
            Command::EventTrigger(trigger) => return self.event_due(&trigger).map(Some),
            Command::NoteOn(note) => {
                self.start_note(note);
                Ok(())
            }
            Command::NoteModify(modify) if modify.delay_ms > 0 => {
                let delay = Duration::from_millis(u64::from(modify.delay_ms));
                self.scheduler.defer(delay, TimerAction::Modify(modify));
                Ok(())
            }
            Command::NoteModify(modify) => self.apply_modify(&modify),
            Command::PlaySample(play) => self.play_sample(play),
            Command::LoadSample(load) => self.load_sample(load),
            Command::CreateDefinition(source) => self.create_definition(source),
            Command::FreeNotes(pattern) => {
                let freed = self.registry.remove_matching(&pattern);
                let mut result = Ok(());
                for voice in freed {
                    self.scheduler.cancel_voice(voice.handle);
                    if voice.spawned {
                        keep_first(&mut result, self.collaborators.synth.free(voice.handle));
                    }
                }
                result
            }
            Command::ClearNrt => {
                self.compiler.clear();
                tracing::info!("offline preloads and assets cleared");
                Ok(())
            }
            Command::SetBpm(bpm) => {
                *self.bpm.lock() = bpm;
                Ok(())
            }
            Command::ReadSource(source) => {
                self.collaborators.synth.run_source(&source)?;
                Ok(())
            }
        };
        result.map(|()| None)
    }

    /// Wall-clock time at which a payload with the trigger's delay would
    /// sound, as `/jdw_sc_event [name, time]`.
    fn event_due(&self, trigger: &EventTrigger) -> DispatchResult<Message> {
        let due = SystemTime::now()
            .checked_add(Duration::from_millis(u64::from(trigger.delay_ms)))
            .and_then(time_tag)
            .ok_or_else(|| {
                DispatchError::invalid_arguments(
                    crate::command::EVENT_TRIGGER,
                    "event time is outside the time tag range",
                )
            })?;
        Ok(Message::new(
            EVENT,
            vec![Value::from(trigger.name.as_str()), Value::Time(due)],
        ))
    }

    fn beats_to_seconds(&self, beats: f32) -> f32 {
        beats * 60.0 / self.bpm()
    }

    fn start_note(&self, note: NoteOn) {
        let now = self.scheduler.now();
        let delay = Duration::from_millis(u64::from(note.delay_ms));
        let gate = note.gate.map(|beats| self.beats_to_seconds(beats));
        let attack = self.config.attack_of(&note.params);
        let release = self.config.release_of(&note.params);
        let spec = VoiceSpec {
            external_id: note.external_id,
            kind: VoiceKind::Note,
            definition: DefinitionRef::Synth(note.definition),
            params: note.params,
            delay,
            gate,
            length: None,
            release,
        };
        let handle = self.registry.start(spec, now);
        let starts_at = now.saturating_add(delay);
        self.scheduler.schedule_at(
            TimerKey::Voice(handle, Slot::Start),
            starts_at,
            TimerAction::Start(handle),
        );
        self.scheduler.schedule_at(
            TimerKey::Voice(handle, Slot::Sustain),
            starts_at.saturating_add(seconds(attack)),
            TimerAction::Sustain(handle),
        );
        if let Some(gate) = gate {
            self.scheduler.schedule_at(
                TimerKey::Voice(handle, Slot::Release),
                starts_at.saturating_add(seconds(gate)),
                TimerAction::Release(handle),
            );
        }
    }

    fn play_sample(&self, play: PlaySample) -> DispatchResult<()> {
        let sample = self
            .samples
            .lock()
            .find(&play.pack, play.index, play.category.as_deref())
            .cloned()
            .ok_or_else(|| DispatchError::UnknownSample {
                pack: play.pack.clone(),
                index: play.index,
            })?;
        let now = self.scheduler.now();
        let delay = Duration::from_millis(u64::from(play.delay_ms));
        let length = sample.seconds.unwrap_or(self.config.default_sample_seconds);
        let mut params = play.params;
        params.insert("buf".to_owned(), sample.buffer as f32);
        let spec = VoiceSpec {
            external_id: play.external_id,
            kind: VoiceKind::Sample,
            definition: DefinitionRef::Sample {
                pack: play.pack,
                index: play.index,
                category: play.category,
                buffer: sample.buffer,
            },
            params,
            delay,
            gate: None,
            length: Some(length),
            release: 0.0,
        };
        let handle = self.registry.start(spec, now);
        let starts_at = now.saturating_add(delay);
        self.scheduler.schedule_at(
            TimerKey::Voice(handle, Slot::Start),
            starts_at,
            TimerAction::Start(handle),
        );
        self.scheduler.schedule_at(
            TimerKey::Voice(handle, Slot::Sustain),
            starts_at,
            TimerAction::Sustain(handle),
        );
        self.scheduler.schedule_at(
            TimerKey::Voice(handle, Slot::Free),
            starts_at.saturating_add(seconds(length)),
            TimerAction::Free(handle),
        );
        Ok(())
    }

    fn apply_modify(&self, modify: &NoteModify) -> DispatchResult<()> {
        let now = self.scheduler.now();
        let outcome = self.registry.modify(&modify.pattern, &modify.params, now);
        let synth = &self.collaborators.synth;
        let mut result = Ok(());
        for touched in outcome.touched.iter().filter(|touched| touched.spawned) {
            keep_first(&mut result, synth.set_params(touched.handle, &touched.params));
        }
        for released in &outcome.released {
            // The early release replaces the natural one.
            self.scheduler.cancel(TimerKey::Voice(released.handle, Slot::Sustain));
            self.scheduler.cancel(TimerKey::Voice(released.handle, Slot::Release));
            self.scheduler.schedule_at(
                TimerKey::Voice(released.handle, Slot::Free),
                released.free_at,
                TimerAction::Free(released.handle),
            );
            if released.spawned {
                keep_first(&mut result, synth.release(released.handle));
            } else {
                self.scheduler.cancel(TimerKey::Voice(released.handle, Slot::Start));
            }
        }
        result
    }

    fn load_sample(&self, load: LoadSample) -> DispatchResult<()> {
        let seconds = match self.collaborators.loader.inspect(&load.path) {
            Ok(info) => Some(info.seconds),
            Err(err) => {
                tracing::warn!(path = %load.path.display(), %err, "sample length unknown");
                None
            }
        };
        let entry = SampleEntry {
            path: load.path,
            pack: load.pack,
            buffer: load.buffer,
            category: load.category,
            tone_index: load.tone_index,
            seconds,
        };
        self.compiler.register_sample(entry.clone());
        let sample = self.samples.lock().register(entry);
        tracing::info!(
            buffer = sample.buffer,
            tone_index = sample.tone_index,
            category = %sample.category,
            "sample registered"
        );
        self.collaborators.synth.load_sample(&sample)?;
        Ok(())
    }

    fn create_definition(&self, source: String) -> DispatchResult<()> {
        self.compiler.add_definition(&source);
        let is_new = {
            let mut definitions = self.definitions.lock();
            if definitions.contains(&source) {
                false
            } else {
                definitions.push(source.clone());
                true
            }
        };
        if is_new {
            self.collaborators.synth.create_definition(&source)?;
        }
        Ok(())
    }

    fn record(&self, contents: Vec<Plan>, report: &mut DispatchReport) {
        let mut items = contents.into_iter();
        let header = match items.next() {
            Some(Plan::Message(info)) => SessionHeader::from_message(&info),
            _ => Err(SessionError::InvalidSessionHeader(
                "session info message missing".to_owned(),
            )),
        };
        let header = match header {
            Ok(header) => header,
            Err(err) => {
                report.fail(nrt::RECORD_INFO, err.into());
                return;
            }
        };
        let output_name = header.output_name.clone();
        let bpm = header.bpm;
        if let Err(err) = self.compiler.begin(header) {
            report.fail(nrt::RECORD_INFO, err.into());
            return;
        }

        for item in items {
            self.record_item(item, report);
        }

        let assets = self.compiler.assets();
        let finalized = self
            .compiler
            .finalize(|event| nrt::extent(event, bpm, &assets.samples, &self.config));
        let timeline = match finalized {
            Ok(timeline) => timeline,
            Err(err) => {
                report.fail(nrt::RECORD_INFO, err.into());
                return;
            }
        };
        let score = nrt::compile(&timeline, &assets, &self.config);
        let rendered = self.collaborators.renderer.render(&score);
        if let Err(err) = self.compiler.complete() {
            report.fail(nrt::RECORD_INFO, err.into());
        }

        let status = match rendered {
            Ok(path) => {
                tracing::info!(output = %output_name, path = %path.display(), "recording rendered");
                report.accepted += 1;
                "SUCCESS"
            }
            Err(err) => {
                report.fail(nrt::RECORD_INFO, err.into());
                "FAILURE"
            }
        };
        report.replies.push(Message::new(
            RECORD_FINISHED,
            vec![Value::from(status), Value::from(output_name)],
        ));
    }

    /// Timed bundles inside a record bundle, directly or wrapped in untagged
    /// bundles.
    fn record_item(&self, item: Plan, report: &mut DispatchReport) {
        match item {
            Plan::Group {
                tag: Tag::TimedMessageGroup,
                contents,
            } => match timed_payload(&contents) {
                Ok((offset, payload)) => {
                    let result = self.dispatch(payload, Sink::Batch { offset });
                    report.answer(&payload.address, result);
                }
                Err(err) => report.fail(TIMED_MSG_INFO, err),
            },
            Plan::Group {
                tag: Tag::Untagged,
                contents,
            } => {
                for nested in contents {
                    self.record_item(nested, report);
                }
            }
            Plan::Message(message) => report.fail(
                &message.address,
                DispatchError::invalid_arguments(
                    &message.address,
                    "recorded messages must be wrapped in a timed_msg bundle",
                ),
            ),
            Plan::Group { tag, .. } => report.fail(
                nrt::RECORD_INFO,
                DispatchError::invalid_arguments(
                    nrt::RECORD_INFO,
                    format!("{tag} bundle inside a recording"),
                ),
            ),
        }
    }

    fn preload(&self, contents: Vec<Plan>, report: &mut DispatchReport) {
        for item in contents {
            let result = match &item {
                Plan::Group {
                    tag: Tag::TimedMessageGroup,
                    contents,
                } => timed_payload(contents).and_then(|(offset, payload)| {
                    Command::parse(payload)?;
                    self.compiler.preload(offset, payload.clone())?;
                    Ok(())
                }),
                _ => Err(DispatchError::invalid_arguments(
                    "nrt_preload",
                    "preloads must be timed_msg bundles",
                )),
            };
            report.record(TIMED_MSG_INFO, result);
        }
        tracing::info!(preloads = self.compiler.preload_count(), "offline preloads stored");
    }

    /// Executes every timer that is due. Returns the number executed.
    pub fn run_due(&self) -> usize {
        let due = self.scheduler.take_due();
        let count = due.len();
        for (key, action) in due {
            if let Err(err) = self.fire(action) {
                tracing::warn!(?key, %err, "scheduled transition failed");
            }
        }
        count
    }

    fn fire(&self, action: TimerAction) -> DispatchResult<()> {
        let synth = &self.collaborators.synth;
        match action {
            TimerAction::Start(handle) => {
                if let Some(voice) = self.registry.begin_playback(handle) {
                    let definition = voice.definition.synth_name(&self.config.sampler_definition);
                    synth.spawn(handle, definition, &voice.params)?;
                }
            }
            TimerAction::Sustain(handle) => {
                let outcome = self
                    .registry
                    .transition(handle, VoiceState::Sustaining);
                tracing::trace!(%handle, ?outcome, "sustain");
            }
            TimerAction::Release(handle) => {
                let now = self.scheduler.now();
                if let Some((voice, free_at)) = self.registry.release(handle, now) {
                    self.scheduler.cancel(TimerKey::Voice(handle, Slot::Sustain));
                    self.scheduler.schedule_at(
                        TimerKey::Voice(handle, Slot::Free),
                        free_at,
                        TimerAction::Free(handle),
                    );
                    if voice.spawned {
                        synth.release(handle)?;
                    }
                }
            }
            TimerAction::Free(handle) => {
                self.scheduler.cancel_voice(handle);
                if let Some(voice) = self.registry.free(handle) {
                    if voice.spawned {
                        synth.free(handle)?;
                    }
                }
            }
            TimerAction::Modify(modify) => self.apply_modify(&modify)?,
        }
        Ok(())
    }
}

/// Splits `[/timed_msg_info offset] [payload]`.
fn timed_payload(contents: &[Plan]) -> DispatchResult<(f32, &Message)> {
    let [Plan::Message(info), Plan::Message(payload)] = contents else {
        return Err(DispatchError::invalid_arguments(
            TIMED_MSG_INFO,
            "timed bundle must hold an info message and one payload message",
        ));
    };
    if info.address != TIMED_MSG_INFO {
        return Err(DispatchError::invalid_arguments(
            TIMED_MSG_INFO,
            format!("expected {TIMED_MSG_INFO}, got {}", info.address),
        ));
    }
    let offset = info
        .cursor()
        .float("offset")
        .map_err(|err| DispatchError::from_args(TIMED_MSG_INFO, err))?;
    Ok((offset, payload))
}

fn keep_first(result: &mut DispatchResult<()>, next: crate::backend::Result<()>) {
    if let Err(err) = next {
        tracing::warn!(%err, "backend call failed");
        if result.is_ok() {
            *result = Err(err.into());
        }
    }
}
