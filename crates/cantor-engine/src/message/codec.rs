use std::time::SystemTime;

use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};

use super::{Bundle, Message, Packet, TimeTag, Value};
use crate::error::CodecError;

/// "Execute immediately" in OSC time tag terms.
const IMMEDIATELY: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

/// Decodes one datagram into a packet.
///
/// The whole buffer must be consumed; argument types other than int, float,
/// string and time tag are rejected.
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    let (rest, packet) = rosc::decoder::decode_udp(bytes)
        .map_err(|err| CodecError::MalformedEncoding(format!("{err:?}")))?;
    if !rest.is_empty() {
        return Err(CodecError::MalformedEncoding(format!(
            "{} trailing bytes after packet",
            rest.len()
        )));
    }
    from_osc(packet)
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    rosc::encoder::encode(&to_osc(packet))
        .map_err(|err| CodecError::MalformedEncoding(format!("{err:?}")))
}

fn from_osc(packet: OscPacket) -> Result<Packet, CodecError> {
    match packet {
        OscPacket::Message(message) => {
            let args = message
                .args
                .into_iter()
                .map(|arg| value_from_osc(&message.addr, arg))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Packet::Message(Message::new(message.addr, args)))
        }
        OscPacket::Bundle(bundle) => {
            let contents = bundle
                .content
                .into_iter()
                .map(from_osc)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Packet::Bundle(Bundle::new(contents)))
        }
    }
}

fn value_from_osc(address: &str, arg: OscType) -> Result<Value, CodecError> {
    match arg {
        OscType::Int(value) => Ok(Value::Int(value)),
        OscType::Float(value) => Ok(Value::Float(value)),
        OscType::String(value) => Ok(Value::String(value)),
        OscType::Time(time) => Ok(Value::Time(TimeTag {
            seconds: time.seconds,
            fractional: time.fractional,
        })),
        other => Err(CodecError::MalformedEncoding(format!(
            "unsupported argument {other:?} in {address}"
        ))),
    }
}

fn to_osc(packet: &Packet) -> OscPacket {
    match packet {
        Packet::Message(message) => OscPacket::Message(OscMessage {
            addr: message.address.clone(),
            args: message.args.iter().map(value_to_osc).collect(),
        }),
        Packet::Bundle(bundle) => OscPacket::Bundle(OscBundle {
            timetag: IMMEDIATELY,
            content: bundle.contents.iter().map(to_osc).collect(),
        }),
    }
}

fn value_to_osc(value: &Value) -> OscType {
    match value {
        Value::Int(value) => OscType::Int(*value),
        Value::Float(value) => OscType::Float(*value),
        Value::String(value) => OscType::String(value.clone()),
        Value::Time(tag) => OscType::Time(OscTime {
            seconds: tag.seconds,
            fractional: tag.fractional,
        }),
    }
}

/// Wall-clock instant as a time tag. `None` before 1900 or past 2036.
pub fn time_tag(at: SystemTime) -> Option<TimeTag> {
    let time = OscTime::try_from(at).ok()?;
    Some(TimeTag {
        seconds: time.seconds,
        fractional: time.fractional,
    })
}

/// Entry point for the packet fuzz target. Must never panic.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_parse_packet(data: &[u8]) {
    if let Ok(packet) = decode(data) {
        let _ = encode(&packet);
        let _ = crate::classify::plan(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, Tag};

    #[test]
    fn message_round_trips() {
        let packet = Packet::Message(Message::new(
            "/note_on_timed",
            vec!["pluck".into(), "p1".into(), "0.5".into(), "freq".into(), 440.0.into()],
        ));
        let bytes = encode(&packet).expect("encode");
        assert_eq!(decode(&bytes).expect("decode"), packet);
    }

    #[test]
    fn nested_bundle_round_trips() {
        let inner = Bundle::tagged(
            "timed_msg",
            [
                Message::new("/timed_msg_info", vec![1.5.into()]).into(),
                Message::new("/note_on", vec!["s".into(), "a".into()]).into(),
            ],
        );
        let outer = Packet::Bundle(Bundle::new(vec![inner.clone().into()]));
        let bytes = encode(&outer).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded, outer);

        let Packet::Bundle(decoded) = decoded else {
            panic!("expected bundle");
        };
        let Some(Packet::Bundle(decoded_inner)) = decoded.contents.first() else {
            panic!("expected nested bundle");
        };
        assert_eq!(classify(decoded_inner), classify(&inner));
        assert_eq!(classify(decoded_inner), Ok(Tag::TimedMessageGroup));
        assert_eq!(classify(&decoded), Ok(Tag::Untagged));
    }

    #[test]
    fn time_tags_survive_the_wire() {
        let at = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let tag = time_tag(at).expect("in range");
        let packet = Packet::Message(Message::new(
            "/jdw_sc_event",
            vec!["kick".into(), Value::Time(tag)],
        ));
        let bytes = encode(&packet).expect("encode");
        assert_eq!(decode(&bytes).expect("decode"), packet);
        assert_eq!(tag.seconds, 1_700_000_000 + 2_208_988_800);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode(&[0xff, 0x00, 0x12]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedEncoding(_)));
    }

    #[test]
    fn unsupported_argument_type_is_malformed() {
        let packet = OscPacket::Message(OscMessage {
            addr: "/x".into(),
            args: vec![OscType::Double(1.0)],
        });
        let bytes = rosc::encoder::encode(&packet).expect("encode");
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn truncated_message_is_malformed() {
        let packet = Packet::Message(Message::new("/load_sample", vec!["a.wav".into()]));
        let bytes = encode(&packet).expect("encode");
        assert!(decode(&bytes[..bytes.len() - 4]).is_err());
    }
}
