use std::collections::BTreeMap;

use serde::Serialize;

use super::{TimedEvent, Timeline};
use crate::backend::osc::{alloc_read, gate_off, n_set, s_new};
use crate::command::{Command, NoteOn, PlaySample};
use crate::config::EngineConfig;
use crate::message::Message;
use crate::samples::SampleLibrary;
use crate::voice::{seconds, DefinitionRef, VoiceKind, VoiceRegistry, VoiceSpec};

/// Definitions and samples available to offline renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NrtAssets {
    pub definitions: Vec<String>,
    pub samples: SampleLibrary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    pub beat: f32,
    pub seconds: f32,
    pub message: Message,
}

/// Synth-level commands of one session, ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub output_name: String,
    pub bpm: f32,
    pub end_beat: f32,
    pub end_seconds: f32,
    pub definitions: Vec<String>,
    /// Buffer reads issued before the first row.
    pub buffers: Vec<Message>,
    pub rows: Vec<ScoreRow>,
}

/// How far past its offset an event sounds, in beats.
pub fn extent(event: &TimedEvent, bpm: f32, samples: &SampleLibrary, config: &EngineConfig) -> f32 {
    match Command::parse(&event.payload) {
        Ok(Command::NoteOn(NoteOn {
            gate: Some(gate), ..
        })) => gate,
        Ok(Command::PlaySample(play)) => {
            let length = samples
                .find(&play.pack, play.index, play.category.as_deref())
                .and_then(|sample| sample.seconds)
                .unwrap_or(config.default_sample_seconds);
            length * bpm / 60.0
        }
        _ => 0.0,
    }
}

/// Turns a finalized timeline into synth commands.
///
/// Node numbers are local to the score. Modifies resolve their pattern
/// against notes started earlier in the timeline; a payload's own delay is
/// ignored because its offset already fixes its position.
pub fn compile(timeline: &Timeline, assets: &NrtAssets, config: &EngineConfig) -> Score {
    let header = &timeline.header;
    let registry = VoiceRegistry::new(config.clone());
    let mut rows: Vec<(f32, Message)> = Vec::new();

    for event in &timeline.events {
        let beat = event.offset;
        let now = seconds(header.beats_to_seconds(beat));
        let command = match Command::parse(&event.payload) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(address = %event.payload.address, %err, "event left out of score");
                continue;
            }
        };
        match command {
            Command::NoteOn(note) => {
                let spec = VoiceSpec {
                    external_id: note.external_id,
                    kind: VoiceKind::Note,
                    definition: DefinitionRef::Synth(note.definition.clone()),
                    params: note.params.clone(),
                    delay: Default::default(),
                    gate: None,
                    length: None,
                    release: 0.0,
                };
                let handle = registry.start(spec, now);
                rows.push((beat, s_new(handle, &note.definition, &note.params)));
                if let Some(gate) = note.gate {
                    rows.push((beat + gate, gate_off(handle)));
                }
            }
            Command::NoteModify(modify) => {
                let outcome = registry.modify(&modify.pattern, &modify.params, now);
                for touched in &outcome.touched {
                    rows.push((beat, n_set(touched.handle, &touched.params)));
                }
                for released in &outcome.released {
                    rows.push((beat, gate_off(released.handle)));
                }
            }
            Command::PlaySample(play) => match sample_row(&registry, &play, assets, config, now) {
                Some(message) => rows.push((beat, message)),
                None => tracing::warn!(
                    pack = %play.pack,
                    index = play.index,
                    "sample missing from offline library"
                ),
            },
            other => {
                tracing::warn!(address = other.address(), "event left out of score");
            }
        }
    }

    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    Score {
        output_name: header.output_name.clone(),
        bpm: header.bpm,
        end_beat: timeline.end_beat,
        end_seconds: header.beats_to_seconds(timeline.end_beat),
        definitions: assets.definitions.clone(),
        buffers: assets.samples.samples().map(alloc_read).collect(),
        rows: rows
            .into_iter()
            .map(|(beat, message)| ScoreRow {
                beat,
                seconds: header.beats_to_seconds(beat),
                message,
            })
            .collect(),
    }
}

fn sample_row(
    registry: &VoiceRegistry,
    play: &PlaySample,
    assets: &NrtAssets,
    config: &EngineConfig,
    now: std::time::Duration,
) -> Option<Message> {
    let sample = assets
        .samples
        .find(&play.pack, play.index, play.category.as_deref())?;
    let mut params: BTreeMap<String, f32> = play.params.clone();
    params.insert("buf".to_owned(), sample.buffer as f32);
    let spec = VoiceSpec {
        external_id: play.external_id.clone(),
        kind: VoiceKind::Sample,
        definition: DefinitionRef::Sample {
            pack: play.pack.clone(),
            index: play.index,
            category: play.category.clone(),
            buffer: sample.buffer,
        },
        params: params.clone(),
        delay: Default::default(),
        gate: None,
        length: sample.seconds,
        release: 0.0,
    };
    let handle = registry.start(spec, now);
    Some(s_new(handle, &config.sampler_definition, &params))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::command::{NOTE_MODIFY, NOTE_ON_TIMED, PLAY_SAMPLE};
    use crate::message::Value;
    use crate::nrt::SessionHeader;
    use crate::samples::SampleEntry;

    fn event(offset: f32, arrival: u64, payload: Message) -> TimedEvent {
        TimedEvent {
            offset,
            payload,
            arrival,
        }
    }

    fn timed_note(id: &str, gate: f32) -> Message {
        Message::new(
            NOTE_ON_TIMED,
            vec!["pluck".into(), id.into(), gate.into(), "freq".into(), 220.0.into()],
        )
    }

    fn assets() -> NrtAssets {
        let mut samples = SampleLibrary::new();
        samples.register(SampleEntry {
            path: PathBuf::from("/packs/drums/kick.wav"),
            pack: "drums".into(),
            buffer: 7,
            category: "bd".into(),
            tone_index: Some(0),
            seconds: Some(0.25),
        });
        NrtAssets {
            definitions: vec!["SynthDef(\\pluck, {})".into()],
            samples,
        }
    }

    #[test]
    fn sample_extent_is_converted_to_beats() {
        let play = Message::new(
            PLAY_SAMPLE,
            vec!["k".into(), "drums".into(), Value::Int(0), "bd".into()],
        );
        let config = EngineConfig::default();
        let length = extent(&event(0.0, 0, play), 120.0, &assets().samples, &config);
        assert_eq!(length, 0.5);
        let gated = extent(&event(0.0, 0, timed_note("a", 1.5)), 120.0, &assets().samples, &config);
        assert_eq!(gated, 1.5);
    }

    #[test]
    fn notes_get_gate_off_rows_in_time_order() {
        let timeline = Timeline {
            header: SessionHeader::new(120.0, "take", None),
            events: vec![
                event(0.0, 0, timed_note("a", 2.0)),
                event(1.0, 1, timed_note("b", 0.5)),
            ],
            end_beat: 2.0,
        };
        let score = compile(&timeline, &assets(), &EngineConfig::default());
        let summary: Vec<(f32, &str, i32)> = score
            .rows
            .iter()
            .map(|row| {
                let node = match &row.message.args[..] {
                    [Value::String(_), Value::Int(node), ..] | [Value::Int(node), ..] => *node,
                    _ => -1,
                };
                (row.beat, row.message.address.as_str(), node)
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (0.0, "/s_new", 100),
                (1.0, "/s_new", 101),
                (1.5, "/n_set", 101),
                (2.0, "/n_set", 100),
            ]
        );
        assert_eq!(score.end_seconds, 1.0);
        assert_eq!(score.rows[2].seconds, 0.75);
    }

    #[test]
    fn modify_only_reaches_earlier_notes() {
        let modify = Message::new(
            NOTE_MODIFY,
            vec!["lead.*".into(), "gate".into(), 0.0.into()],
        );
        let timeline = Timeline {
            header: SessionHeader::new(60.0, "take", None),
            events: vec![
                event(0.0, 0, Message::new("/note_on", vec!["pluck".into(), "lead1".into()])),
                event(1.0, 1, modify),
                event(2.0, 2, Message::new("/note_on", vec!["pluck".into(), "lead2".into()])),
            ],
            end_beat: 2.0,
        };
        let score = compile(&timeline, &assets(), &EngineConfig::default());
        let gate_offs: Vec<&ScoreRow> = score
            .rows
            .iter()
            .filter(|row| row.message.address == "/n_set")
            .collect();
        assert_eq!(gate_offs.len(), 1);
        assert_eq!(gate_offs[0].message, gate_off(crate::voice::VoiceHandle(100)));
    }

    #[test]
    fn samples_use_sampler_with_buffer() {
        let timeline = Timeline {
            header: SessionHeader::new(120.0, "take", None),
            events: vec![
                event(
                    0.0,
                    0,
                    Message::new(
                        PLAY_SAMPLE,
                        vec!["k".into(), "drums".into(), Value::Int(0), "".into()],
                    ),
                ),
                event(
                    0.5,
                    1,
                    Message::new(
                        PLAY_SAMPLE,
                        vec!["k".into(), "drums".into(), Value::Int(9), "".into()],
                    ),
                ),
            ],
            end_beat: 1.0,
        };
        let score = compile(&timeline, &assets(), &EngineConfig::default());
        assert_eq!(score.rows.len(), 1);
        let args = &score.rows[0].message.args;
        assert_eq!(args[0], Value::from("sampler"));
        assert_eq!(&args[4..], &[Value::from("buf"), Value::Float(7.0)]);
        assert_eq!(score.buffers.len(), 1);
        assert_eq!(score.definitions.len(), 1);
    }
}
