//! Bundle classification by embedded tag.

use std::fmt;

use crate::error::ClassifyError;
use crate::message::{Bundle, Message, Packet, Value, BUNDLE_INFO};

/// Processing pipeline selected by a bundle's leading info message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `batch-send`: contents are dispatched one by one.
    NoteTimedGroup,
    /// `timed_msg`: one payload reserved at an offset in a recording session.
    TimedMessageGroup,
    /// `nrt_record`: header plus the events of one offline session.
    RecordSession,
    /// `nrt_preload`: timed events prepended to every later session.
    Preload,
    Untagged,
}

impl Tag {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "batch-send" => Some(Tag::NoteTimedGroup),
            "timed_msg" => Some(Tag::TimedMessageGroup),
            "nrt_record" => Some(Tag::RecordSession),
            "nrt_preload" => Some(Tag::Preload),
            _ => None,
        }
    }

    /// Wire name, `None` for untagged bundles.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Tag::NoteTimedGroup => Some("batch-send"),
            Tag::TimedMessageGroup => Some("timed_msg"),
            Tag::RecordSession => Some("nrt_record"),
            Tag::Preload => Some("nrt_preload"),
            Tag::Untagged => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("untagged"))
    }
}

/// Reads the tag of `bundle` without looking at nested bundles.
pub fn classify(bundle: &Bundle) -> Result<Tag, ClassifyError> {
    let Some(info) = bundle.first_message() else {
        return Ok(Tag::Untagged);
    };
    if info.address != BUNDLE_INFO {
        return Ok(Tag::Untagged);
    }
    match info.args.as_slice() {
        [Value::String(name)] => Tag::from_name(name)
            .ok_or_else(|| ClassifyError::InvalidBundleTag(format!("unknown tag {name:?}"))),
        [other] => Err(ClassifyError::InvalidBundleTag(format!(
            "tag must be a string, got {}",
            other.type_name()
        ))),
        args => Err(ClassifyError::InvalidBundleTag(format!(
            "info message needs exactly one argument, got {}",
            args.len()
        ))),
    }
}

/// A fully classified packet tree. Info messages are stripped from tagged
/// groups.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Message(Message),
    Group { tag: Tag, contents: Vec<Plan> },
}

impl Plan {
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Plan::Message(_) => None,
            Plan::Group { tag, .. } => Some(*tag),
        }
    }

    /// Number of messages in the tree.
    pub fn message_count(&self) -> usize {
        match self {
            Plan::Message(_) => 1,
            Plan::Group { contents, .. } => contents.iter().map(Plan::message_count).sum(),
        }
    }
}

/// Classifies every bundle in `packet` before anything runs, so a bad tag
/// anywhere rejects the whole packet.
pub fn plan(packet: Packet) -> Result<Plan, ClassifyError> {
    match packet {
        Packet::Message(message) => Ok(Plan::Message(message)),
        Packet::Bundle(bundle) => {
            let tag = classify(&bundle)?;
            let skip = usize::from(tag != Tag::Untagged);
            let contents = bundle
                .contents
                .into_iter()
                .skip(skip)
                .map(plan)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Plan::Group { tag, contents })
        }
    }
}
