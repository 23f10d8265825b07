//! Convergence under contention: many handles in many threads mutating one
//! backing object, then settling. After every handle completes a no-op
//! catch-up, all caches must be identical, and identical to a from-scratch
//! replay of the changelog.

use objmap_core::{
    Batch, MemCluster, MemIoCtx, ObjectStore, OpenOptions, Record, ReplicatedMap, Value,
};

const THREADS: usize = 4;
const KEYS_PER_THREAD: usize = 20;

fn open(cluster: &MemCluster) -> ReplicatedMap<MemIoCtx> {
    let ctx = cluster.ioctx("data").unwrap();
    ReplicatedMap::open(ctx, OpenOptions::new("contended", "c1")).unwrap()
}

fn snapshot(map: &ReplicatedMap<MemIoCtx>) -> Vec<(String, String)> {
    map.iter()
        .map(|(k, v)| (k.to_string(), v.to_text()))
        .collect()
}

#[test]
fn test_all_handles_converge() {
    let cluster = MemCluster::new();
    cluster.create_pool("data");
    // Create the backing object up front so worker opens never race the
    // exclusive create.
    let mut observer = open(&cluster);

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let cluster = cluster.clone();
            std::thread::spawn(move || {
                let mut map = open(&cluster);
                for i in 0..KEYS_PER_THREAD {
                    // Private keys always land; shared keys are contended
                    // and half of them get erased again.
                    map.insert(&format!("t{}-k{}", t, i), Value::Text(format!("v{}", i)))
                        .unwrap();
                    map.insert(&format!("shared-{}", i), Value::Text(format!("from{}", t)))
                        .unwrap();
                    if i % 2 == 0 {
                        map.erase(&format!("shared-{}", i)).unwrap();
                    }
                }
                map
            })
        })
        .collect();

    let mut handles: Vec<ReplicatedMap<MemIoCtx>> =
        workers.into_iter().map(|w| w.join().unwrap()).collect();

    // Settle: a no-op catch-up on every handle.
    observer.sync().unwrap();
    for map in &mut handles {
        map.sync().unwrap();
    }

    let reference = snapshot(&observer);
    for map in &handles {
        assert_eq!(snapshot(map), reference);
        assert_eq!(map.epoch(), observer.epoch());
        assert_eq!(map.changelog_offset(), observer.changelog_offset());
    }

    // Every private key survived; erased shared keys are gone everywhere.
    for t in 0..THREADS {
        for i in 0..KEYS_PER_THREAD {
            assert!(observer.contains(&format!("t{}-k{}", t, i)));
            if i % 2 == 0 {
                assert!(!observer.contains(&format!("shared-{}", i)));
            }
        }
    }

    // Replay equivalence: folding the raw changelog from byte zero yields
    // the same mapping every handle holds.
    let ctx = cluster.ioctx("data").unwrap();
    let mut result = ctx
        .submit(observer.object_id(), Batch::new().read(0, u64::MAX))
        .unwrap()
        .wait();
    let stream = result.reads.pop().unwrap();

    let mut replayed: std::collections::BTreeMap<String, String> = Default::default();
    for (_, rec) in objmap_core::record::decode(&stream, 0).unwrap() {
        match rec {
            Record::Insert { key, value } => {
                replayed.insert(key, value);
            }
            Record::Erase { key } => {
                replayed.remove(&key);
            }
            Record::Unknown { .. } => {}
        }
    }
    let from_replay: Vec<(String, String)> = replayed.into_iter().collect();
    assert_eq!(from_replay, reference);
}

#[test]
fn test_interleaved_erase_insert_of_one_key_stays_consistent() {
    let cluster = MemCluster::new();
    cluster.create_pool("data");
    let mut observer = open(&cluster);

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let cluster = cluster.clone();
            std::thread::spawn(move || {
                let mut map = open(&cluster);
                for _ in 0..10 {
                    map.insert("hot", Value::Text(format!("owner{}", t))).unwrap();
                    map.erase("hot").unwrap();
                }
                map
            })
        })
        .collect();

    let mut handles: Vec<ReplicatedMap<MemIoCtx>> =
        workers.into_iter().map(|w| w.join().unwrap()).collect();

    observer.sync().unwrap();
    for map in &mut handles {
        map.sync().unwrap();
    }

    // The final state of "hot" is whatever the changelog's total order says;
    // every observer must agree on it.
    let reference = snapshot(&observer);
    for map in &handles {
        assert_eq!(snapshot(map), reference);
    }
}
