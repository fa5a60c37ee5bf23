//! Typed control messages and bundles.
//!
//! Values decoded from the wire are immutable; handlers only ever read them.

mod args;
mod codec;

pub use args::{ArgCursor, ArgError};
pub use codec::{decode, encode, time_tag};

#[cfg(any(test, feature = "fuzzing"))]
pub use codec::fuzz_parse_packet;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of the message that carries a bundle's tag.
pub const BUNDLE_INFO: &str = "/bundle_info";

/// NTP-style time tag: seconds since 1900 plus a 2^-32 fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTag {
    pub seconds: u32,
    pub fractional: u32,
}

/// A single positional argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Float(f32),
    String(String),
    Time(TimeTag),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view of the value. Strings holding a number are accepted since
    /// clients send some durations as text.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Int(value) => Some(*value as f32),
            Value::Float(value) => Some(*value),
            Value::String(value) => value.trim().parse::<f32>().ok(),
            Value::Time(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Time(_) => "time tag",
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::String(value) => write!(f, "{value:?}"),
            Value::Time(tag) => write!(f, "{}.{:08x}", tag.seconds, tag.fractional),
        }
    }
}

/// An addressed control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub address: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Cursor over the arguments used by typed command parsers.
    pub fn cursor(&self) -> ArgCursor<'_> {
        ArgCursor::new(&self.args)
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// An ordered group of packets handled as a unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bundle {
    pub contents: Vec<Packet>,
}

impl Bundle {
    pub fn new(contents: Vec<Packet>) -> Self {
        Self { contents }
    }

    /// Builds a bundle whose first element is the info message for `tag`.
    pub fn tagged(tag: &str, rest: impl IntoIterator<Item = Packet>) -> Self {
        let mut contents = vec![Packet::Message(Message::new(
            BUNDLE_INFO,
            vec![Value::from(tag)],
        ))];
        contents.extend(rest);
        Self { contents }
    }

    pub fn first_message(&self) -> Option<&Message> {
        match self.contents.first() {
            Some(Packet::Message(message)) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        Packet::Message(message)
    }
}

impl From<Bundle> for Packet {
    fn from(bundle: Bundle) -> Self {
        Packet::Bundle(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_read_as_floats() {
        assert_eq!(Value::from("0.25").as_float(), Some(0.25));
        assert_eq!(Value::from("soon").as_float(), None);
        assert_eq!(Value::Int(2).as_float(), Some(2.0));
    }

    #[test]
    fn tagged_bundle_leads_with_info_message() {
        let bundle = Bundle::tagged("timed_msg", [Message::new("/x", vec![]).into()]);
        let info = bundle.first_message().expect("info");
        assert_eq!(info.address, BUNDLE_INFO);
        assert_eq!(info.args, vec![Value::from("timed_msg")]);
        assert_eq!(bundle.contents.len(), 2);
    }

    #[test]
    fn display_lists_arguments() {
        let message = Message::new("/n_set", vec![Value::Int(100), "gate".into(), 0.0.into()]);
        assert_eq!(message.to_string(), "/n_set 100 \"gate\" 0");
    }
}
