//! Property-Based Tests for Store Invariants
//!
//! Properties:
//! - Capacity: after any operation sequence, `len() <= capacity`
//! - Model agreement: reads, deletes and tag invalidations match a simple
//!   creation-ordered reference model
//! - Tag consistency: invalidating a tag removes exactly the keys whose
//!   current entry carries it
//! - TTL: an entry is served before its expiry and never at or after it

use proptest::prelude::*;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tipline_storage::{EntryOptions, Store, TierPolicy};
use tipline_test_utils::generators::{arb_key, arb_store_op, arb_tag, arb_tags, StoreOp};

// ============================================================================
// REFERENCE MODEL
// ============================================================================

/// Creation-ordered map with FIFO overflow, the behaviour a store with
/// `EvictionOrder::CreationOrder` and no expirations must match.
#[derive(Default)]
struct Model {
    capacity: usize,
    entries: VecDeque<(String, u32, BTreeSet<String>)>,
}

impl Model {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _, _)| k == key)
    }

    fn set(&mut self, key: String, value: u32, tags: BTreeSet<String>) {
        if let Some(pos) = self.position(&key) {
            self.entries.remove(pos);
        }
        self.entries.push_back((key, value, tags));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    fn get(&self, key: &str) -> Option<u32> {
        self.position(key).map(|pos| self.entries[pos].1)
    }

    fn delete(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    fn invalidate(&mut self, tags: &[String]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(_, _, entry_tags)| !tags.iter().any(|t| entry_tags.contains(t)));
        before - self.entries.len()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _, _)| k.clone()).collect()
    }
}

fn long_lived_store(capacity: usize) -> Store<u32> {
    Store::new("prop", TierPolicy::new(Duration::from_secs(3600), capacity))
}

fn apply(store: &Store<u32>, model: &mut Model, op: StoreOp) -> Result<(), TestCaseError> {
    match op {
        StoreOp::Set { key, value, tags } => {
            store.set(key.clone(), value, EntryOptions::new().tags(tags.iter().map(String::as_str)));
            model.set(key, value, tags);
        }
        StoreOp::Get { key } => {
            prop_assert_eq!(store.get(&key), model.get(&key));
        }
        StoreOp::Delete { key } => {
            prop_assert_eq!(store.delete(&key), model.delete(&key));
        }
        StoreOp::InvalidateTags { tags } => {
            prop_assert_eq!(store.invalidate_by_tags(&tags), model.invalidate(&tags));
        }
    }
    prop_assert!(store.len() <= model.capacity);
    Ok(())
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_store_matches_model(
        capacity in 1usize..8,
        ops in prop::collection::vec(arb_store_op(), 1..64),
    ) {
        let store = long_lived_store(capacity);
        let mut model = Model::new(capacity);

        for op in ops {
            apply(&store, &mut model, op)?;
        }

        prop_assert_eq!(store.keys(), model.keys());
    }

    #[test]
    fn prop_capacity_never_exceeded(
        capacity in 1usize..6,
        keys in prop::collection::vec(arb_key(), 1..100),
    ) {
        let store = long_lived_store(capacity);
        for (i, key) in keys.into_iter().enumerate() {
            store.set(key, i as u32, EntryOptions::new());
            prop_assert!(store.len() <= capacity);
        }
    }

    #[test]
    fn prop_tag_invalidation_is_exact(
        entries in prop::collection::vec((arb_key(), arb_tags()), 1..40),
        target in arb_tag(),
    ) {
        let store = long_lived_store(1_000);
        let mut model = Model::new(1_000);
        for (i, (key, tags)) in entries.into_iter().enumerate() {
            store.set(key.clone(), i as u32, EntryOptions::new().tags(tags.iter().map(String::as_str)));
            model.set(key, i as u32, tags);
        }

        let tagged: BTreeSet<String> = model
            .entries
            .iter()
            .filter(|(_, _, tags)| tags.contains(&target))
            .map(|(k, _, _)| k.clone())
            .collect();
        let untagged: Vec<String> = model
            .keys()
            .into_iter()
            .filter(|k| !tagged.contains(k))
            .collect();

        prop_assert_eq!(store.invalidate_by_tags([target.as_str()]), tagged.len());
        for key in &tagged {
            prop_assert!(!store.has(key));
        }
        for key in &untagged {
            prop_assert!(store.has(key));
        }
    }

    #[test]
    fn prop_ttl_is_hard_expiry(
        ttl_secs in 1u64..120,
        elapsed_secs in 0u64..240,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let served = rt.block_on(async {
            let store = long_lived_store(10);
            store.set("k", 1, EntryOptions::new().ttl(Duration::from_secs(ttl_secs)));
            tokio::time::advance(Duration::from_secs(elapsed_secs)).await;
            store.get("k").is_some()
        });

        prop_assert_eq!(served, elapsed_secs < ttl_secs);
    }
}

// ============================================================================
// IDEMPOTENCE
// ============================================================================

#[test]
fn delete_is_idempotent() {
    let store = long_lived_store(4);
    store.set("odds:a1", 1, EntryOptions::new().tag("odds"));
    assert!(store.delete("odds:a1"));
    assert!(!store.delete("odds:a1"));
    assert_eq!(store.invalidate_by_tags(["odds"]), 0);
}

#[tokio::test(start_paused = true)]
async fn cleanup_is_idempotent() {
    let store = long_lived_store(16);
    for i in 0..8u32 {
        store.set(format!("odds:{i}"), i, EntryOptions::new().ttl(Duration::from_secs(1 + u64::from(i % 2))));
    }

    tokio::time::advance(Duration::from_millis(1_500)).await;
    assert_eq!(store.cleanup(), 4);
    assert_eq!(store.cleanup(), 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(store.cleanup(), 4);
    assert!(store.is_empty());
}
