//! Typed view of the supported control addresses.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DispatchError, DispatchResult};
use crate::message::{ArgCursor, Message};
use crate::voice::VoicePattern;

pub const NOTE_ON_TIMED: &str = "/note_on_timed";
pub const NOTE_ON: &str = "/note_on";
pub const NOTE_MODIFY: &str = "/note_modify";
pub const PLAY_SAMPLE: &str = "/play_sample";
pub const LOAD_SAMPLE: &str = "/load_sample";
pub const CREATE_SYNTHDEF: &str = "/create_synthdef";
pub const FREE_NOTES: &str = "/free_notes";
pub const CLEAR_NRT: &str = "/clear_nrt";
pub const SET_BPM: &str = "/set_bpm";
pub const READ_SCD: &str = "/read_scd";
pub const EVENT_TRIGGER: &str = "/jdw_sc_event_trigger";

/// Addresses that may be reserved on a recording session's timeline.
pub const RECORDABLE: [&str; 4] = [NOTE_ON_TIMED, NOTE_ON, NOTE_MODIFY, PLAY_SAMPLE];

pub fn is_recordable(address: &str) -> bool {
    RECORDABLE.contains(&address)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteOn {
    pub definition: String,
    pub external_id: String,
    /// Beats until automatic release. Only `/note_on_timed` carries one.
    pub gate: Option<f32>,
    pub delay_ms: u32,
    pub params: BTreeMap<String, f32>,
}

#[derive(Debug, Clone)]
pub struct NoteModify {
    pub pattern: VoicePattern,
    pub delay_ms: u32,
    pub params: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaySample {
    pub external_id: String,
    pub pack: String,
    pub index: i32,
    pub category: Option<String>,
    pub delay_ms: u32,
    pub params: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadSample {
    pub path: PathBuf,
    pub pack: String,
    pub buffer: i32,
    pub category: String,
    pub tone_index: Option<i32>,
}

/// Asks for the time at which a payload with `delay_ms` would sound.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTrigger {
    pub name: String,
    pub delay_ms: u32,
}

#[derive(Debug, Clone)]
pub enum Command {
    NoteOn(NoteOn),
    NoteModify(NoteModify),
    PlaySample(PlaySample),
    LoadSample(LoadSample),
    CreateDefinition(String),
    FreeNotes(VoicePattern),
    ClearNrt,
    SetBpm(f32),
    /// Source passed verbatim to the language host.
    ReadSource(String),
    EventTrigger(EventTrigger),
}

impl Command {
    /// Validates arity and argument types for `message`.
    pub fn parse(message: &Message) -> DispatchResult<Self> {
        let address = message.address.as_str();
        let invalid = |err| DispatchError::from_args(address, err);
        let mut args = message.cursor();

        let command = match address {
            NOTE_ON_TIMED | NOTE_ON => {
                let definition = args.string("definition").map_err(invalid)?.to_owned();
                let external_id = args.string("external id").map_err(invalid)?.to_owned();
                let gate = if address == NOTE_ON_TIMED {
                    let gate = args.float("gate").map_err(invalid)?;
                    if !gate.is_finite() || gate < 0.0 {
                        return Err(DispatchError::invalid_arguments(
                            address,
                            format!("gate must be a non-negative number, got {gate}"),
                        ));
                    }
                    Some(gate)
                } else {
                    None
                };
                let delay_ms = delay(address, &mut args)?;
                let params = args.named_pairs().map_err(invalid)?;
                Command::NoteOn(NoteOn {
                    definition,
                    external_id,
                    gate,
                    delay_ms,
                    params,
                })
            }
            NOTE_MODIFY => {
                let pattern = pattern(address, &mut args)?;
                let delay_ms = delay(address, &mut args)?;
                let params = args.named_pairs().map_err(invalid)?;
                Command::NoteModify(NoteModify {
                    pattern,
                    delay_ms,
                    params,
                })
            }
            PLAY_SAMPLE => {
                let external_id = args.string("external id").map_err(invalid)?.to_owned();
                let pack = args.string("sample pack").map_err(invalid)?.to_owned();
                let index = args.int("index").map_err(invalid)?;
                if index < 0 {
                    return Err(DispatchError::invalid_arguments(
                        address,
                        format!("index must not be negative, got {index}"),
                    ));
                }
                let category = args.string("category").map_err(invalid)?;
                let category = (!category.is_empty()).then(|| category.to_owned());
                let delay_ms = delay(address, &mut args)?;
                let params = args.named_pairs().map_err(invalid)?;
                Command::PlaySample(PlaySample {
                    external_id,
                    pack,
                    index,
                    category,
                    delay_ms,
                    params,
                })
            }
            LOAD_SAMPLE => {
                let path = PathBuf::from(args.string("file path").map_err(invalid)?);
                let pack = args.string("sample pack").map_err(invalid)?.to_owned();
                let buffer = args.int("buffer number").map_err(invalid)?;
                let category = args.string("category").map_err(invalid)?.to_owned();
                let tone_index = args.optional_int();
                finish(address, &args)?;
                Command::LoadSample(LoadSample {
                    path,
                    pack,
                    buffer,
                    category,
                    tone_index,
                })
            }
            CREATE_SYNTHDEF => {
                let source = args.string("definition source").map_err(invalid)?.to_owned();
                finish(address, &args)?;
                Command::CreateDefinition(source)
            }
            FREE_NOTES => {
                let pattern = pattern(address, &mut args)?;
                finish(address, &args)?;
                Command::FreeNotes(pattern)
            }
            CLEAR_NRT => {
                finish(address, &args)?;
                Command::ClearNrt
            }
            SET_BPM => {
                let bpm = args.float("bpm").map_err(invalid)?;
                finish(address, &args)?;
                if !bpm.is_finite() || bpm <= 0.0 {
                    return Err(DispatchError::invalid_arguments(
                        address,
                        format!("bpm must be positive, got {bpm}"),
                    ));
                }
                Command::SetBpm(bpm)
            }
            READ_SCD => {
                let source = args.string("source").map_err(invalid)?.to_owned();
                finish(address, &args)?;
                Command::ReadSource(source)
            }
            EVENT_TRIGGER => {
                let name = args.string("event name").map_err(invalid)?.to_owned();
                let delay_ms = args.int("delay").map_err(invalid)?;
                finish(address, &args)?;
                let delay_ms = u32::try_from(delay_ms).map_err(|_| {
                    DispatchError::invalid_arguments(
                        address,
                        format!("delay must not be negative, got {delay_ms}"),
                    )
                })?;
                Command::EventTrigger(EventTrigger { name, delay_ms })
            }
            other => return Err(DispatchError::UnknownAddress(other.to_owned())),
        };
        Ok(command)
    }

    pub fn address(&self) -> &'static str {
        match self {
            Command::NoteOn(note) if note.gate.is_some() => NOTE_ON_TIMED,
            Command::NoteOn(_) => NOTE_ON,
            Command::NoteModify(_) => NOTE_MODIFY,
            Command::PlaySample(_) => PLAY_SAMPLE,
            Command::LoadSample(_) => LOAD_SAMPLE,
            Command::CreateDefinition(_) => CREATE_SYNTHDEF,
            Command::FreeNotes(_) => FREE_NOTES,
            Command::ClearNrt => CLEAR_NRT,
            Command::SetBpm(_) => SET_BPM,
            Command::ReadSource(_) => READ_SCD,
            Command::EventTrigger(_) => EVENT_TRIGGER,
        }
    }

    /// Execution delay requested by the payload itself.
    pub fn delay(&self) -> Duration {
        let ms = match self {
            Command::NoteOn(note) => note.delay_ms,
            Command::NoteModify(modify) => modify.delay_ms,
            Command::PlaySample(sample) => sample.delay_ms,
            Command::EventTrigger(trigger) => trigger.delay_ms,
            _ => 0,
        };
        Duration::from_millis(u64::from(ms))
    }
}

fn delay(address: &str, args: &mut ArgCursor<'_>) -> DispatchResult<u32> {
    match args.optional_int() {
        None => Ok(0),
        Some(ms) => u32::try_from(ms).map_err(|_| {
            DispatchError::invalid_arguments(address, format!("delay must not be negative, got {ms}"))
        }),
    }
}

fn pattern(address: &str, args: &mut ArgCursor<'_>) -> DispatchResult<VoicePattern> {
    let source = args
        .string("id pattern")
        .map_err(|err| DispatchError::from_args(address, err))?;
    VoicePattern::new(source).map_err(|err| DispatchError::invalid_arguments(address, err))
}

fn finish(address: &str, args: &ArgCursor<'_>) -> DispatchResult<()> {
    match args.remaining() {
        0 => Ok(()),
        extra => Err(DispatchError::invalid_arguments(
            address,
            format!("{extra} unexpected trailing arguments"),
        )),
    }
}
