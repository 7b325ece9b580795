//! Example: a multimap checked against a map of sets
//!
//! Keys and values are generated once and shared through bundles, so saves,
//! deletes and lookups keep hitting the same few keys.

use rulecheck::{TestConfig, binary};
use rulecheck_stateful::prelude::*;
use std::collections::{BTreeSet, HashMap};

type Key = Vec<u8>;
type Value = Vec<u8>;

/// A multimap that loses every value of a key when one is discarded
#[derive(Default)]
struct MultiMap {
    entries: HashMap<Key, BTreeSet<Value>>,
}

impl MultiMap {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.entries.entry(key.to_vec()).or_default().insert(value.to_vec());
    }

    fn discard(&mut self, key: &[u8], _value: &[u8]) {
        self.entries.remove(key);
    }

    fn fetch(&self, key: &[u8]) -> BTreeSet<Value> {
        self.entries.get(key).cloned().unwrap_or_default()
    }
}

#[derive(Default)]
struct StoreMachine {
    system: MultiMap,
    model: HashMap<Key, BTreeSet<Value>>,
}

impl StateMachine for StoreMachine {}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let keys: Bundle<Key> = Bundle::new("keys");
    let values: Bundle<Value> = Bundle::new("values");

    let test = StatefulTest::new("multimap", StoreMachine::default)
        .rule(
            Rule::new("add_key")
                .args(draws(binary(0, 4)))
                .run_into(&keys, |_: &mut StoreMachine, key: Key| Ok(key)),
        )
        .rule(
            Rule::new("add_value")
                .args(draws(binary(0, 4)))
                .run_into(&values, |_: &mut StoreMachine, value: Value| Ok(value)),
        )
        .rule(
            Rule::new("save")
                .args((named("key", keys.peek()), named("value", values.peek())))
                .weight(2)
                .run(|m: &mut StoreMachine, (key, value): (Key, Value)| {
                    m.system.put(&key, &value);
                    m.model.entry(key).or_default().insert(value);
                    Ok(())
                }),
        )
        .rule(
            Rule::new("delete")
                .args((named("key", keys.peek()), named("value", values.peek())))
                .run(|m: &mut StoreMachine, (key, value): (Key, Value)| {
                    m.system.discard(&key, &value);
                    if let Some(expected) = m.model.get_mut(&key) {
                        expected.remove(&value);
                    }
                    Ok(())
                }),
        )
        .rule(
            Rule::new("values_agree")
                .args(named("key", keys.peek()))
                .run(|m: &mut StoreMachine, key: Key| {
                    let expected = m.model.get(&key).cloned().unwrap_or_default();
                    ensure_eq(m.system.fetch(&key), expected, "fetch")
                }),
        )
        .config(
            TestConfig::default()
                .with_seed(7)
                .with_max_examples(500)
                .without_database(),
        );

    println!("Multimap vs. map of sets\n");
    match test.run() {
        Ok(summary) => println!("✓ no difference found in {} sequences", summary.examples),
        Err(RunError::Failed(report)) => {
            println!("{report}\n");
            println!("Minimal script:");
            for line in report.script() {
                println!("    {line}");
            }
        }
        Err(e) => println!("✗ could not run: {e}"),
    }
}
