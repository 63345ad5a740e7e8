//! End-to-end engine behavior over several rotation cycles: the pool is
//! consumed least-recently-used first, and after every committed rotation
//! the record and the pool agree on which domain is in use.

use std::sync::Arc;

use rotor_core::{
    MemoryRotationStore, PortRange, RecordKind, ResourceRecord,
    RotationSettings, RotationStore, Rotator, SharedSettings,
};

const KIND: RecordKind = RecordKind::Vmess;
const OWNER: i32 = 7;
const INTERVAL_HOURS: u32 = 24;

fn engine(store: &MemoryRotationStore) -> Rotator {
    let settings = SharedSettings::new(RotationSettings {
        update_interval_hours: INTERVAL_HOURS,
        port_range: PortRange::new(20_000, 50_000).unwrap(),
    });
    Rotator::new(Arc::new(store.clone()), settings)
}

async fn assert_stores_agree(store: &MemoryRotationStore) {
    let record = store.fetch_record(KIND, OWNER).await.unwrap();
    let pool = store.list_domains(KIND, OWNER).await.unwrap();
    let in_use: Vec<&str> = pool
        .iter()
        .filter(|d| d.in_use)
        .map(|d| d.domain.as_str())
        .collect();
    assert_eq!(in_use, [record.host.as_str()]);
}

#[tokio::test]
async fn domains_cycle_least_recently_used_first() {
    let store = MemoryRotationStore::new();
    store
        .put_record(ResourceRecord {
            kind: KIND,
            id: OWNER,
            name: "node-7".into(),
            port: String::new(),
            numeric_port: 0,
            host: String::new(),
            next_due_time: 0,
            last_status: String::new(),
        })
        .await;
    for domain in ["d1.com", "d2.com", "d3.com"] {
        store.add_domain(KIND, OWNER, domain).await.unwrap();
    }

    let rotator = engine(&store);
    let interval = i64::from(INTERVAL_HOURS) * 3600;
    let start = 1_700_000_000;

    let mut hosts = Vec::new();
    for cycle in 0..6 {
        let now = start + cycle * interval;
        let outcome = rotator.rotate(KIND, OWNER, now, true).await.unwrap();
        assert_eq!(outcome.next_due_time, now + interval);
        hosts.push(outcome.host.clone());
        assert_stores_agree(&store).await;
    }

    // Never-used domains go first in insertion order, then the pool cycles
    // in least-recently-used order indefinitely.
    assert_eq!(
        hosts,
        ["d1.com", "d2.com", "d3.com", "d1.com", "d2.com", "d3.com"]
    );
}

#[tokio::test]
async fn a_two_domain_pool_alternates() {
    let store = MemoryRotationStore::new();
    store
        .put_record(ResourceRecord {
            kind: KIND,
            id: OWNER,
            name: "node-7".into(),
            port: String::new(),
            numeric_port: 0,
            host: String::new(),
            next_due_time: 0,
            last_status: String::new(),
        })
        .await;
    store.add_domain(KIND, OWNER, "a.com").await.unwrap();
    store.add_domain(KIND, OWNER, "b.com").await.unwrap();

    let rotator = engine(&store);
    let interval = i64::from(INTERVAL_HOURS) * 3600;
    let start = 1_700_000_000;

    for cycle in 0..4 {
        let now = start + cycle * interval;
        let outcome = rotator.rotate(KIND, OWNER, now, true).await.unwrap();
        let expected = if cycle % 2 == 0 { "a.com" } else { "b.com" };
        assert_eq!(outcome.host, expected);
    }
}
