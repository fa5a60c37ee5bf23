//! Offline batch compilation of timed events.
//!
//! A session moves `Idle -> Recording -> Finalizing -> Idle`. Events arrive
//! in any order and are only ordered when the session is finalized.

mod score;
mod session;

pub use score::{compile, extent, NrtAssets, Score, ScoreRow};
pub use session::{SessionHeader, TimedEvent, Timeline, RECORD_INFO};

use parking_lot::Mutex;

use crate::command::is_recordable;
use crate::error::SessionError;
use crate::message::Message;
use crate::samples::{Sample, SampleEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerState {
    Idle,
    Recording,
    Finalizing,
}

#[derive(Debug)]
struct Session {
    header: SessionHeader,
    events: Vec<TimedEvent>,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Recording(Session),
    Finalizing(SessionHeader),
}

#[derive(Debug, Default)]
struct CompilerInner {
    phase: Phase,
    next_arrival: u64,
    preloads: Vec<(f32, Message)>,
    assets: NrtAssets,
}

impl CompilerInner {
    fn push(session: &mut Session, next_arrival: &mut u64, offset: f32, payload: Message) {
        session.events.push(TimedEvent {
            offset,
            payload,
            arrival: *next_arrival,
        });
        *next_arrival += 1;
    }
}

/// Single in-flight recording session plus the assets offline renders use.
#[derive(Debug, Default)]
pub struct BatchCompiler {
    inner: Mutex<CompilerInner>,
}

impl BatchCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CompilerState {
        match self.inner.lock().phase {
            Phase::Idle => CompilerState::Idle,
            Phase::Recording(_) => CompilerState::Recording,
            Phase::Finalizing(_) => CompilerState::Finalizing,
        }
    }

    /// Opens a session. Preloaded events are submitted first.
    pub fn begin(&self, header: SessionHeader) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        match &inner.phase {
            Phase::Idle => {}
            Phase::Recording(session) => {
                return Err(SessionError::SessionAlreadyOpen(
                    session.header.output_name.clone(),
                ))
            }
            Phase::Finalizing(header) => {
                return Err(SessionError::SessionAlreadyOpen(header.output_name.clone()))
            }
        }
        tracing::info!(
            output = %header.output_name,
            bpm = header.bpm,
            preloads = inner.preloads.len(),
            "recording session opened"
        );
        let mut session = Session {
            header,
            events: Vec::with_capacity(inner.preloads.len()),
        };
        for (offset, payload) in &inner.preloads {
            CompilerInner::push(&mut session, &mut inner.next_arrival, *offset, payload.clone());
        }
        inner.phase = Phase::Recording(session);
        Ok(())
    }

    /// Appends an event to the open session. Unsupported payloads are
    /// dropped and the session stays open.
    pub fn submit(&self, offset: f32, payload: Message) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let Phase::Recording(session) = &mut inner.phase else {
            return Err(SessionError::NoActiveSession);
        };
        if !is_recordable(&payload.address) {
            return Err(SessionError::UnsupportedEventType(payload.address));
        }
        CompilerInner::push(session, &mut inner.next_arrival, offset, payload);
        Ok(())
    }

    /// Events accumulated so far, in submission order.
    pub fn pending_events(&self) -> Option<Vec<TimedEvent>> {
        match &self.inner.lock().phase {
            Phase::Recording(session) => Some(session.events.clone()),
            _ => None,
        }
    }

    /// Orders the session's events by offset, keeping submission order for
    /// ties, and resolves the end beat from `extent` when the header has
    /// none.
    pub fn finalize<F>(&self, extent: F) -> Result<Timeline, SessionError>
    where
        F: Fn(&TimedEvent) -> f32,
    {
        let mut inner = self.inner.lock();
        let session = match std::mem::take(&mut inner.phase) {
            Phase::Recording(session) => session,
            other => {
                inner.phase = other;
                return Err(SessionError::NoActiveSession);
            }
        };
        let Session { header, mut events } = session;
        events.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        let end_beat = header.end_beat.unwrap_or_else(|| {
            events
                .iter()
                .map(|event| event.offset + extent(event).max(0.0))
                .fold(0.0, f32::max)
        });
        inner.phase = Phase::Finalizing(header.clone());
        tracing::debug!(events = events.len(), end_beat, "recording session finalized");
        Ok(Timeline {
            header,
            events,
            end_beat,
        })
    }

    /// Returns a finalized compiler to `Idle`.
    pub fn complete(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Finalizing(_) => {
                inner.phase = Phase::Idle;
                Ok(())
            }
            _ => Err(SessionError::NoActiveSession),
        }
    }

    /// Stores an event to be prepended to every later session.
    pub fn preload(&self, offset: f32, payload: Message) -> Result<(), SessionError> {
        if !is_recordable(&payload.address) {
            return Err(SessionError::UnsupportedEventType(payload.address));
        }
        self.inner.lock().preloads.push((offset, payload));
        Ok(())
    }

    pub fn preload_count(&self) -> usize {
        self.inner.lock().preloads.len()
    }

    /// Registers a definition for offline renders. Returns `false` when the
    /// source is already known.
    pub fn add_definition(&self, source: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.assets.definitions.iter().any(|known| known == source) {
            return false;
        }
        inner.assets.definitions.push(source.to_owned());
        true
    }

    pub fn register_sample(&self, entry: SampleEntry) -> Sample {
        self.inner.lock().assets.samples.register(entry)
    }

    pub fn assets(&self) -> NrtAssets {
        self.inner.lock().assets.clone()
    }

    /// Drops preloads, offline definitions and offline samples.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.preloads.clear();
        inner.assets = NrtAssets::default();
    }
}
