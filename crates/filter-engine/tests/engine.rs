//! Cross-module scenarios: the full register-then-evaluate flow and the
//! teardown guarantees under concurrency.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use filter_engine::{
    Comparison, EventData, FilterError, FilterSetIndex, FilterSpec, InterceptorKind, OperationKey,
    OperationPoint, ParameterId, ParamsMask, PredicateSpec, ValueSet, Verdict,
};

struct MapEvent(HashMap<ParameterId, Vec<u8>>);

impl EventData for MapEvent {
    fn query_parameter(&self, id: ParameterId) -> Result<&[u8], FilterError> {
        self.0
            .get(&id)
            .map(|bytes| bytes.as_slice())
            .ok_or(FilterError::ParameterNotFound(id))
    }
}

fn event(path: &str, pid: u32) -> MapEvent {
    MapEvent(HashMap::from([
        (ParameterId::Path, path.as_bytes().to_vec()),
        (ParameterId::ProcessId, pid.to_ne_bytes().to_vec()),
    ]))
}

fn open_file_key() -> OperationKey {
    OperationKey {
        interceptor: InterceptorKind::FileSystem,
        operation: 0x10,
        minor: 0,
        point: OperationPoint::Pre,
    }
}

/// The two-filter policy: deny access to secret.txt, audit any
/// operation from processes whose pid has bit 0x4 set.
fn register_policy(index: &FilterSetIndex) {
    let set = index.get_or_create(open_file_key()).unwrap();

    set.add_filter(FilterSpec {
        group_id: 1,
        verdict: Verdict::DENY,
        owner_pid: 1000,
        request_timeout_ms: 0,
        wish_mask: ParamsMask::from_bits(0x1),
        params: vec![PredicateSpec {
            parameter: ParameterId::Path,
            comparison: Comparison::Equals,
            negated: false,
            values: ValueSet::single(b"secret.txt").unwrap(),
        }],
    })
    .unwrap();

    set.add_filter(FilterSpec {
        group_id: 2,
        verdict: Verdict::AUDIT,
        owner_pid: 1000,
        request_timeout_ms: 0,
        wish_mask: ParamsMask::from_bits(0x2),
        params: vec![PredicateSpec {
            parameter: ParameterId::ProcessId,
            comparison: Comparison::BitwiseAndNonZero,
            negated: false,
            values: ValueSet::from_u32(0x4),
        }],
    })
    .unwrap();
}

#[test]
fn register_and_evaluate() {
    let index = FilterSetIndex::new();
    register_policy(&index);

    let set = index.get(open_file_key()).unwrap();

    let (verdict, mask) = set.get_verdict(&event("secret.txt", 0x4)).unwrap();
    assert_eq!(verdict, Verdict::DENY | Verdict::AUDIT);
    assert_eq!(mask, ParamsMask::from_bits(0x3));

    let (verdict, mask) = set.get_verdict(&event("other.txt", 0x4)).unwrap();
    assert_eq!(verdict, Verdict::AUDIT);
    assert_eq!(mask, ParamsMask::from_bits(0x2));

    let (verdict, mask) = set.get_verdict(&event("other.txt", 0x1)).unwrap();
    assert_eq!(verdict, Verdict::NOT_FILTERED);
    assert!(mask.is_empty());
}

#[test]
fn specs_load_from_configuration_json() {
    // Filter specifications arrive as already-parsed structures from
    // the configuration layer; make sure the passive types actually
    // deserialize the way that layer produces them.
    let spec: PredicateSpec = serde_json::from_str(
        r#"{
            "parameter": "Path",
            "comparison": "Equals",
            "negated": false,
            "values": { "data": [47, 116, 109, 112], "count": 1 }
        }"#,
    )
    .unwrap();
    assert_eq!(spec.parameter, ParameterId::Path);
    assert_eq!(spec.values.width(), 4);

    let key: OperationKey = serde_json::from_str(
        r#"{
            "interceptor": "FileSystem",
            "operation": 16,
            "minor": 0,
            "point": "Pre"
        }"#,
    )
    .unwrap();
    assert_eq!(key, open_file_key());
}

#[test]
fn delete_all_waits_for_in_flight_readers() {
    let _ = env_logger::builder().is_test(true).try_init();

    let index = Arc::new(FilterSetIndex::new());
    register_policy(&index);

    let released = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = mpsc::channel();

    let reader = {
        let index = Arc::clone(&index);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            let set = index.get(open_file_key()).unwrap();
            ready_tx.send(()).unwrap();

            // Keep the reference alive while delete_all runs.
            thread::sleep(Duration::from_millis(100));
            let (verdict, _) = set.get_verdict(&event("secret.txt", 0)).unwrap();
            assert_eq!(verdict, Verdict::DENY);

            released.store(true, Ordering::SeqCst);
            drop(set);
        })
    };

    ready_rx.recv().unwrap();
    index.delete_all();

    // delete_all may only return once the reader released its handle.
    assert!(released.load(Ordering::SeqCst));
    assert!(index.is_empty());
    reader.join().unwrap();
}

#[test]
fn filter_ids_survive_delete_all() {
    let index = FilterSetIndex::new();
    register_policy(&index);
    let before = index.next_filter_id();

    index.delete_all();
    register_policy(&index);

    // The counter is never reset while the index is alive.
    assert!(index.next_filter_id() > before);
}

#[test]
fn concurrent_evaluation_and_registration() {
    let index = Arc::new(FilterSetIndex::new());
    register_policy(&index);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..500 {
                    let set = index.get(open_file_key()).unwrap();
                    let (verdict, _) = set.get_verdict(&event("secret.txt", 0x4)).unwrap();
                    // Registrations racing in only ever add bits.
                    assert!(verdict.contains(Verdict::DENY));
                }
            })
        })
        .collect();

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for round in 0u32..50 {
                let set = index.get_or_create(open_file_key()).unwrap();
                set.add_filter(FilterSpec {
                    group_id: 3,
                    verdict: Verdict::CACHE,
                    owner_pid: 2000 + round,
                    request_timeout_ms: 0,
                    wish_mask: ParamsMask::from_bits(0x4),
                    params: vec![],
                })
                .unwrap();
                set.cleanup_by_process(2000 + round);
            }
        })
    };

    for reader in readers {
        reader.join().unwrap();
    }
    writer.join().unwrap();
}
