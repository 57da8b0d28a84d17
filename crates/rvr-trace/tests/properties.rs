//! Backend contract tests over generated and scripted event sequences.

use std::io::Cursor;
use std::sync::Once;

use rvr_trace::fixtures::{
    MiniEngine, RecordingTracer, branch_scenario, countdown_program, generate_events, load_scenario,
};
use rvr_trace::{
    BinaryLogTracer, Event, EventKind, FilterTracer, KindSet, NoopTracer, RingBufferTracer,
    SpikeTracer, StatsTracer, TraceReader, TraceSession, Tracer, TracerConfig, decode_all,
    replay_all,
};

const SEEDS: [u64; 4] = [1, 7, 0xDEAD_BEEF, 1 << 40];

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn ring_window(capacity: usize, events: &[Event]) -> Vec<Event> {
    let mut ring = RingBufferTracer::new(capacity).unwrap();
    ring.init().unwrap();
    replay_all(&mut ring, events);
    ring.fini().unwrap();
    ring.drain()
}

fn binlog_bytes(events: &[Event]) -> Vec<u8> {
    let mut log = BinaryLogTracer::new(Vec::<u8>::new()).with_flush_threshold(256);
    log.init().unwrap();
    replay_all(&mut log, events);
    log.fini().unwrap();
    log.into_sink().unwrap()
}

#[test]
fn test_noop_accepts_every_event() {
    init_logging();
    let events = generate_events(3, 10_000);
    let mut tracer = NoopTracer;
    tracer.init().unwrap();
    replay_all(&mut tracer, &events);
    tracer.fini().unwrap();
}

#[test]
fn test_ring_under_capacity_drains_unchanged() {
    init_logging();
    for seed in SEEDS {
        let events = generate_events(seed, 50);
        let window = ring_window(events.len(), &events);
        assert_eq!(window, events);
        let window = ring_window(events.len() + 100, &events);
        assert_eq!(window, events);
    }
}

#[test]
fn test_ring_over_capacity_keeps_suffix() {
    init_logging();
    for seed in SEEDS {
        let events = generate_events(seed, 300);
        for capacity in [1, 2, 17, 64, events.len() - 1] {
            let window = ring_window(capacity, &events);
            assert_eq!(window, events[events.len() - capacity..]);
        }
    }
}

#[test]
fn test_binlog_decodes_bit_for_bit() {
    init_logging();
    for seed in SEEDS {
        let events = generate_events(seed, 1_000);
        let bytes = binlog_bytes(&events);
        assert_eq!(decode_all(&bytes).unwrap(), events);

        let streamed: Vec<Event> = TraceReader::new(Cursor::new(bytes))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(streamed, events);
    }
}

#[test]
fn test_binlog_file_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let events = generate_events(11, 5_000);

    let path = dir.path().join("trace.bin");
    let mut log = BinaryLogTracer::create(&path);
    log.init().unwrap();
    replay_all(&mut log, &events);
    log.fini().unwrap();
    let decoded: Vec<Event> = TraceReader::open(&path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(decoded, events);

    let zpath = dir.path().join("trace.bin.zst");
    let mut log = BinaryLogTracer::create_compressed(&zpath, 3);
    log.init().unwrap();
    replay_all(&mut log, &events);
    log.fini().unwrap();
    let decoded: Vec<Event> = TraceReader::open_compressed(&zpath)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(decoded, events);
}

#[test]
fn test_filter_output_is_restriction() {
    init_logging();
    let sets = [
        KindSet::BRANCHES,
        KindSet::MEMORY,
        KindSet::REGISTERS.union(KindSet::CSRS),
        KindSet::EMPTY.with(EventKind::MemWriteHalfword),
        KindSet::ALL,
        KindSet::EMPTY,
    ];
    for seed in SEEDS {
        let events = generate_events(seed, 400);
        for allow in sets {
            let mut filter = FilterTracer::new(RecordingTracer::new(), allow);
            replay_all(&mut filter, &events);
            let expected: Vec<Event> = events
                .iter()
                .filter(|e| allow.contains(e.kind()))
                .copied()
                .collect();
            assert_eq!(filter.absorbed() as usize, events.len() - expected.len());
            assert_eq!(filter.into_inner().events, expected);
        }
    }
}

#[test]
fn test_zero_length_runs() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();

    let mut noop = NoopTracer;
    noop.init().unwrap();
    noop.fini().unwrap();

    assert!(ring_window(16, &[]).is_empty());
    assert!(binlog_bytes(&[]).is_empty());

    let path = dir.path().join("empty.bin");
    let mut log = BinaryLogTracer::create(&path);
    log.init().unwrap();
    log.fini().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(TraceReader::open(&path).unwrap().count(), 0);

    let mut filter = FilterTracer::new(RecordingTracer::new(), KindSet::ALL);
    filter.init().unwrap();
    filter.fini().unwrap();
    let inner = filter.into_inner();
    assert!(inner.events.is_empty());
    assert_eq!((inner.inits, inner.finis), (1, 1));

    let mut stats = StatsTracer::new();
    stats.init().unwrap();
    stats.fini().unwrap();

    let spike_path = dir.path().join("empty.log");
    let mut spike = SpikeTracer::create(&spike_path);
    spike.init().unwrap();
    spike.fini().unwrap();
    assert!(std::fs::read_to_string(&spike_path).unwrap().is_empty());
}

#[test]
fn test_load_scenario() {
    init_logging();
    let events = load_scenario();

    assert_eq!(decode_all(&binlog_bytes(&events)).unwrap(), events);
    assert_eq!(ring_window(2, &events), events[1..]);
    assert_eq!(ring_window(2, &events)[0].kind(), EventKind::MemReadWord);
}

#[test]
fn test_branch_scenario() {
    init_logging();
    let events = branch_scenario();
    let mut filter = FilterTracer::new(RecordingTracer::new(), KindSet::BRANCHES);
    filter.init().unwrap();
    replay_all(&mut filter, &events);
    filter.fini().unwrap();

    let forwarded = filter.into_inner().events;
    assert_eq!(forwarded.len(), 5);
    let kinds: Vec<EventKind> = forwarded.iter().map(Event::kind).collect();
    assert_eq!(
        kinds,
        [
            EventKind::BranchTaken,
            EventKind::BranchNotTaken,
            EventKind::BranchTaken,
            EventKind::BranchNotTaken,
            EventKind::BranchTaken,
        ]
    );
    let expected: Vec<Event> = events
        .into_iter()
        .filter(|e| KindSet::BRANCHES.contains(e.kind()))
        .collect();
    assert_eq!(forwarded, expected);
}

#[test]
fn test_engine_drives_every_backend_identically() {
    init_logging();
    let program = countdown_program(5);

    let mut recorder = MiniEngine::new(RecordingTracer::new());
    recorder.run(&program, 1_000);
    let reference = recorder.into_tracer().events;

    let mut session = TraceSession::start(BinaryLogTracer::new(Vec::<u8>::new())).unwrap();
    MiniEngine::new(&mut *session).run(&program, 1_000);
    let log = session.finish().unwrap();
    assert_eq!(decode_all(log.sink().unwrap()).unwrap(), reference);

    let mut ring = RingBufferTracer::new(8).unwrap();
    ring.init().unwrap();
    MiniEngine::new(&mut ring).run(&program, 1_000);
    ring.fini().unwrap();
    assert_eq!(ring.drain(), reference[reference.len() - 8..]);
    assert_eq!(ring.dropped() as usize, reference.len() - 8);
}

#[test]
fn test_runtime_selected_backend_matches_static() {
    init_logging();
    let events = generate_events(99, 200);
    let mut tracer = TracerConfig::ring(32)
        .with_filter(KindSet::MEMORY)
        .build()
        .unwrap();
    tracer.init().unwrap();
    replay_all(&mut tracer, &events);
    tracer.fini().unwrap();

    let memory: Vec<Event> = events
        .iter()
        .filter(|e| KindSet::MEMORY.contains(e.kind()))
        .copied()
        .collect();
    let start = memory.len().saturating_sub(32);
    assert_eq!(tracer.as_ring_mut().unwrap().drain(), memory[start..]);
}
