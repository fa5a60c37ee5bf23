use cantor_engine::command::NOTE_ON;
use cantor_engine::message::{decode, encode};
use cantor_engine::{plan, BatchCompiler, Message, Packet, SessionHeader, Value};
use proptest::prelude::*;

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Int),
        (-1.0e6f32..1.0e6).prop_map(Value::Float),
        "[a-zA-Z0-9_ ]{0,12}".prop_map(Value::String),
    ]
}

fn message() -> impl Strategy<Value = Message> {
    ("/[a-z_]{1,12}", prop::collection::vec(value(), 0..8))
        .prop_map(|(address, args)| Message::new(address, args))
}

proptest! {
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(packet) = decode(&bytes) {
            let _ = plan(packet);
        }
    }

    #[test]
    fn messages_survive_the_wire(message in message()) {
        let packet = Packet::Message(message);
        let bytes = encode(&packet).expect("encode");
        prop_assert_eq!(decode(&bytes).expect("decode"), packet);
    }

    #[test]
    fn finalized_events_are_ordered_and_ties_stable(
        offsets in prop::collection::vec(0u8..8, 1..40)
    ) {
        let compiler = BatchCompiler::new();
        compiler.begin(SessionHeader::new(120.0, "take", None)).expect("begin");
        for (index, offset) in offsets.iter().enumerate() {
            let payload = Message::new(NOTE_ON, vec!["pluck".into(), Value::Int(index as i32)]);
            compiler.submit(f32::from(*offset), payload).expect("submit");
        }
        let timeline = compiler.finalize(|_| 0.0).expect("finalize");
        prop_assert_eq!(timeline.events.len(), offsets.len());
        for pair in timeline.events.windows(2) {
            prop_assert!(pair[0].offset <= pair[1].offset);
            if pair[0].offset == pair[1].offset {
                prop_assert!(pair[0].arrival < pair[1].arrival);
            }
        }
        let max = offsets.iter().copied().max().map(f32::from).unwrap_or(0.0);
        prop_assert_eq!(timeline.end_beat, max);
    }
}
