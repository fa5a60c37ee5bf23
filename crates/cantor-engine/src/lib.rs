//! Cantor Engine
//! =============
//! Receives tagged OSC bundles, drives voice lifecycles on a live synthesis
//! backend and compiles recording sessions into offline scores.

pub mod backend;
pub mod classify;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod nrt;
pub mod samples;
pub mod sched;
pub mod server;
pub mod voice;

pub use classify::{classify, plan, Plan, Tag};
pub use command::Command;
pub use config::EngineConfig;
pub use dispatch::{Collaborators, DispatchReport, Dispatcher, Sink, TimerAction};
pub use error::{DispatchError, DispatchResult, ErrorKind};
pub use message::{Bundle, Message, Packet, Value};
pub use nrt::{BatchCompiler, CompilerState, Score, SessionHeader};
pub use sched::{Clock, ManualClock, Scheduler, SystemClock};
pub use server::{ServerConfig, ServerHandle};
pub use voice::{VoiceHandle, VoicePattern, VoiceRegistry, VoiceState};
