use std::sync::Arc;
use std::time::Duration;

use cantor_engine::backend::{MemoryBackend, MemoryRenderer, WavSampleLoader};
use cantor_engine::command::{NOTE_MODIFY, NOTE_ON, NOTE_ON_TIMED};
use cantor_engine::dispatch::TIMED_MSG_INFO;
use cantor_engine::message::{decode, encode};
use cantor_engine::nrt::RECORD_INFO;
use cantor_engine::{
    Bundle, Collaborators, Dispatcher, EngineConfig, ManualClock, Message, Packet, Value,
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn dispatcher() -> (Dispatcher, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let dispatcher = Dispatcher::new(
        EngineConfig::default(),
        clock.clone(),
        Collaborators {
            synth: Arc::new(MemoryBackend::new()),
            loader: Arc::new(WavSampleLoader::new()),
            renderer: Arc::new(MemoryRenderer::new()),
        },
    );
    (dispatcher, clock)
}

fn record_session(events: usize) -> Packet {
    let mut contents: Vec<Packet> =
        vec![Message::new(RECORD_INFO, vec![120.0.into(), "bench".into()]).into()];
    for index in 0..events {
        let offset = ((events - index) % 64) as f32 * 0.25;
        let note = Message::new(
            NOTE_ON_TIMED,
            vec![
                "pluck".into(),
                format!("voice{index}").into(),
                0.5.into(),
                "freq".into(),
                (110.0 + index as f32).into(),
            ],
        );
        let timed = Bundle::tagged(
            "timed_msg",
            [Message::new(TIMED_MSG_INFO, vec![offset.into()]).into(), note.into()],
        );
        contents.push(timed.into());
    }
    Bundle::tagged("nrt_record", contents).into()
}

fn live_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("live");
    group.measurement_time(Duration::from_secs(5));

    let bytes = encode(&Packet::Message(Message::new(
        NOTE_ON,
        vec!["pluck".into(), "lead".into(), "amp".into(), 0.2.into()],
    )))
    .expect("encode");
    group.bench_function("decode_note_on", |b| {
        b.iter(|| decode(&bytes).expect("decode"));
    });

    group.bench_function("modify_512_voices", |b| {
        let (dispatcher, clock) = dispatcher();
        for index in 0..512 {
            let note = Message::new(NOTE_ON, vec!["pluck".into(), format!("pad{index}").into()]);
            dispatcher.handle_packet(note.into());
        }
        clock.advance(Duration::from_millis(1));
        dispatcher.run_due();
        let modify = Packet::Message(Message::new(
            NOTE_MODIFY,
            vec!["pad1.*".into(), "cutoff".into(), Value::Float(900.0)],
        ));
        b.iter(|| dispatcher.handle_packet(modify.clone()));
    });

    group.finish();
}

fn offline_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("offline");
    group.sample_size(20);
    let session = record_session(2_000);
    group.bench_function("record_2000_events", |b| {
        b.iter_batched(
            || (dispatcher().0, session.clone()),
            |(dispatcher, packet)| dispatcher.handle_packet(packet),
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, live_dispatch, offline_compile);
criterion_main!(benches);
