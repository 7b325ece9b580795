mod common;

use common::{MultiMap, StoreFlaw, init_tracing, quick_config, store_test};
use rulecheck::{DatabaseKey, DirectoryDatabase, ExampleDatabase, binary};
use rulecheck_stateful::prelude::*;
use rulecheck_stateful::FailureKind;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn set(values: &[&[u8]]) -> BTreeSet<Vec<u8>> {
    values.iter().map(|value| value.to_vec()).collect()
}

#[test]
fn test_multimap_scenario() {
    let mut store = MultiMap::default();
    store.put(b"a", b"1");
    store.put(b"a", b"2");
    assert_eq!(store.fetch(b"a"), set(&[b"1", b"2"]));

    store.discard(b"a", b"1");
    assert_eq!(store.fetch(b"a"), set(&[b"2"]));
    assert!(store.fetch(b"b").is_empty());
}

#[test]
fn test_correct_store_passes() {
    init_tracing();
    let test = store_test("multimap", StoreFlaw::None).config(quick_config(21));
    let summary = test.run().unwrap();

    assert_eq!(summary.examples, 60);
    assert!(summary.unexercised(test.rules()).is_empty());
    // Keys and values are only ever peeked.
    assert_eq!(summary.pool_stats["keys"].consumes, 0);
    assert_eq!(summary.pool_stats["values"].consumes, 0);
}

#[test]
fn test_discard_clearing_the_key_is_found() {
    init_tracing();
    let test = store_test("multimap_discard", StoreFlaw::DiscardClearsKey)
        .config(quick_config(22).with_max_examples(200));
    let report = test.run().unwrap_err().report().cloned().unwrap();

    assert_eq!(report.failure.kind, FailureKind::Assertion);
    let rules: Vec<&str> = report.steps.iter().map(|step| step.rule.as_str()).collect();
    assert!(rules.contains(&"delete"));
    assert_eq!(rules.last(), Some(&"values_agree"));
    assert!(test.replay(&report.choices).is_failure());

    let shrink = report.shrink.unwrap();
    assert!(report.steps.len() <= shrink.original_steps);
}

/// Compares a [`DirectoryDatabase`] in a scratch directory with a map of sets
struct DatabaseComparison {
    scratch: Option<(TempDir, DirectoryDatabase)>,
    model: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    removed: Arc<Mutex<Vec<PathBuf>>>,
}

impl DatabaseComparison {
    fn database(&self) -> Result<&DirectoryDatabase, OperationError> {
        self.scratch
            .as_ref()
            .map(|(_, database)| database)
            .ok_or_else(|| OperationError::assertion("machine was not prepared"))
    }
}

impl StateMachine for DatabaseComparison {
    fn prepare(&mut self) {
        let dir = tempfile::tempdir().expect("scratch directory");
        let database = DirectoryDatabase::open(dir.path()).expect("open database");
        self.scratch = Some((dir, database));
    }

    fn teardown(&mut self) {
        if let Some((dir, _)) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            dir.close().expect("remove scratch directory");
            self.removed.lock().expect("lock").push(path);
        }
    }
}

fn database_error(error: rulecheck::DatabaseError) -> OperationError {
    OperationError::raised("DatabaseError", error.to_string())
}

#[test]
fn test_directory_database_matches_a_model() {
    init_tracing();
    let removed = Arc::new(Mutex::new(Vec::new()));
    let keys: Bundle<Vec<u8>> = Bundle::new("keys");
    let values: Bundle<Vec<u8>> = Bundle::new("values");

    let factory_removed = Arc::clone(&removed);
    let test = StatefulTest::new("directory_database", move || DatabaseComparison {
        scratch: None,
        model: HashMap::new(),
        removed: Arc::clone(&factory_removed),
    })
    .rule(
        Rule::new("add_key")
            .args(draws(binary(0, 3)))
            .run_into(&keys, |_: &mut DatabaseComparison, key: Vec<u8>| Ok(key)),
    )
    .rule(
        Rule::new("add_value")
            .args(draws(binary(0, 3)))
            .run_into(&values, |_: &mut DatabaseComparison, value: Vec<u8>| Ok(value)),
    )
    .rule(
        Rule::new("save")
            .args((keys.peek(), values.peek()))
            .run(|m: &mut DatabaseComparison, (key, value): (Vec<u8>, Vec<u8>)| {
                m.database()?
                    .save(&DatabaseKey::new("kv", &key), &value)
                    .map_err(database_error)?;
                m.model.entry(key).or_default().insert(value);
                Ok(())
            }),
    )
    .rule(
        Rule::new("delete")
            .args((keys.peek(), values.peek()))
            .run(|m: &mut DatabaseComparison, (key, value): (Vec<u8>, Vec<u8>)| {
                m.database()?
                    .delete(&DatabaseKey::new("kv", &key), &value)
                    .map_err(database_error)?;
                if let Some(expected) = m.model.get_mut(&key) {
                    expected.remove(&value);
                }
                Ok(())
            }),
    )
    .rule(
        Rule::new("values_agree")
            .args(keys.peek())
            .run(|m: &mut DatabaseComparison, key: Vec<u8>| {
                let stored: BTreeSet<Vec<u8>> = m
                    .database()?
                    .fetch(&DatabaseKey::new("kv", &key))
                    .map_err(database_error)?
                    .into_iter()
                    .collect();
                let expected = m.model.get(&key).cloned().unwrap_or_default();
                ensure_eq(stored, expected, format_args!("fetch({key:?})"))
            }),
    )
    .config(quick_config(23).with_max_examples(20).with_steps(0, 15));

    let summary = test.run().unwrap();
    assert_eq!(summary.examples, 20);

    // Every sequence got its own scratch directory, removed in teardown.
    let removed = removed.lock().unwrap();
    assert!(removed.len() >= summary.examples);
    assert!(removed.iter().all(|path| !path.exists()));
}
