//! Toy systems under test shared by the integration tests.
#![allow(dead_code)]

use rulecheck::{ChoiceStream, DrawError, Strategy, TestConfig, binary, composite, text, uuids};
use rulecheck_stateful::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic configuration without a database
pub fn quick_config(seed: u64) -> TestConfig {
    TestConfig::default()
        .with_seed(seed)
        .with_max_examples(60)
        .with_steps(0, 20)
        .without_database()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: Uuid,
    pub name: String,
}

/// Users with a fresh uid and a short name
pub fn users() -> impl Strategy<Value = User> + Send + Sync + 'static {
    composite(|stream: &mut ChoiceStream| -> Result<User, DrawError> {
        let uid = stream.draw(&uuids())?;
        let name = stream.draw(&text(0, 8))?;
        Ok(User { uid, name })
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user {0} already exists")]
    AlreadyExists(Uuid),
    #[error("no user {0}")]
    NotFound(Uuid),
}

impl DomainError for DirectoryError {
    fn kind(&self) -> &str {
        match self {
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::NotFound(_) => "NotFound",
        }
    }
}

/// Deliberate bugs the directory can be built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flaw {
    #[default]
    None,
    /// Creating an existing uid silently replaces the user
    OverwriteOnCreate,
    /// Deleting reports success but keeps the user
    DeleteIsNoop,
    /// Deleting an existing user fails with `NotFound`
    DeleteFails,
}

/// In-memory user directory keyed by uid
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<Uuid, User>,
    flaw: Flaw,
}

impl UserDirectory {
    pub fn new(flaw: Flaw) -> Self {
        Self {
            users: HashMap::new(),
            flaw,
        }
    }

    pub fn create_user(&mut self, user: &User) -> Result<(), DirectoryError> {
        if self.users.contains_key(&user.uid) && self.flaw != Flaw::OverwriteOnCreate {
            return Err(DirectoryError::AlreadyExists(user.uid));
        }
        self.users.insert(user.uid, user.clone());
        Ok(())
    }

    pub fn fetch_user(&self, uid: &Uuid) -> Option<User> {
        self.users.get(uid).cloned()
    }

    pub fn delete_user(&mut self, uid: &Uuid) -> Result<(), DirectoryError> {
        match self.flaw {
            Flaw::DeleteIsNoop => Ok(()),
            Flaw::DeleteFails => Err(DirectoryError::NotFound(*uid)),
            _ => self
                .users
                .remove(uid)
                .map(drop)
                .ok_or(DirectoryError::NotFound(*uid)),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}

pub struct DirectoryMachine {
    pub system: UserDirectory,
    pub model: HashMap<Uuid, User>,
    pub deleted: HashSet<Uuid>,
}

impl DirectoryMachine {
    pub fn new(flaw: Flaw) -> Self {
        Self {
            system: UserDirectory::new(flaw),
            model: HashMap::new(),
            deleted: HashSet::new(),
        }
    }
}

impl StateMachine for DirectoryMachine {}

/// Rules exercising [`UserDirectory`] against a map of expected users
pub fn directory_test(name: &str, flaw: Flaw) -> StatefulTest<DirectoryMachine> {
    let created: Bundle<User> = Bundle::new("created_users");

    StatefulTest::new(name, move || DirectoryMachine::new(flaw))
        .rule(
            Rule::new("create_new_user")
                .args(draws(users()))
                .run_into(&created, |m: &mut DirectoryMachine, user: User| {
                    m.system.create_user(&user)?;
                    m.model.insert(user.uid, user.clone());
                    Ok(user)
                }),
        )
        .rule(
            Rule::new("create_existing_user")
                .args(created.peek())
                .expect_failure("AlreadyExists")
                .run(|m: &mut DirectoryMachine, user: User| {
                    m.system.create_user(&user)?;
                    Ok(())
                }),
        )
        .rule(
            Rule::new("get_existing_user")
                .args(created.peek())
                .run(|m: &mut DirectoryMachine, user: User| {
                    ensure(!m.deleted.contains(&user.uid), "deleted user drawn again")?;
                    ensure_eq(
                        m.system.fetch_user(&user.uid),
                        m.model.get(&user.uid).cloned(),
                        format_args!("fetch_user({})", user.uid),
                    )
                }),
        )
        .rule(
            Rule::new("get_non_existing_user")
                .args(draws(users()))
                .run(|m: &mut DirectoryMachine, user: User| {
                    ensure_eq(
                        m.system.fetch_user(&user.uid),
                        None,
                        format_args!("fetch_user({})", user.uid),
                    )
                }),
        )
        .rule(
            Rule::new("delete_user")
                .args(created.consume())
                .run(|m: &mut DirectoryMachine, user: User| {
                    m.system.delete_user(&user.uid)?;
                    m.model.remove(&user.uid);
                    m.deleted.insert(user.uid);
                    ensure_eq(
                        m.system.fetch_user(&user.uid),
                        None,
                        format_args!("fetch_user({}) after delete", user.uid),
                    )
                }),
        )
        .invariant("sizes agree", |m: &DirectoryMachine| {
            m.system.len() == m.model.len()
        })
}

/// Deliberate bugs the multimap can be built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreFlaw {
    #[default]
    None,
    /// Discarding one value drops every value under the key
    DiscardClearsKey,
}

/// Multimap from keys to sets of values
#[derive(Debug, Default)]
pub struct MultiMap {
    entries: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    flaw: StoreFlaw,
}

impl MultiMap {
    pub fn new(flaw: StoreFlaw) -> Self {
        Self {
            entries: HashMap::new(),
            flaw,
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.entries
            .entry(key.to_vec())
            .or_default()
            .insert(value.to_vec());
    }

    pub fn discard(&mut self, key: &[u8], value: &[u8]) {
        if self.flaw == StoreFlaw::DiscardClearsKey {
            self.entries.remove(key);
            return;
        }
        if let Some(values) = self.entries.get_mut(key) {
            values.remove(value);
            if values.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    pub fn fetch(&self, key: &[u8]) -> BTreeSet<Vec<u8>> {
        self.entries.get(key).cloned().unwrap_or_default()
    }
}

pub struct StoreMachine {
    pub system: MultiMap,
    pub model: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
}

impl StoreMachine {
    pub fn new(flaw: StoreFlaw) -> Self {
        Self {
            system: MultiMap::new(flaw),
            model: HashMap::new(),
        }
    }
}

impl StateMachine for StoreMachine {}

/// Rules exercising [`MultiMap`] with keys and values passed through bundles
pub fn store_test(name: &str, flaw: StoreFlaw) -> StatefulTest<StoreMachine> {
    let keys: Bundle<Vec<u8>> = Bundle::new("keys");
    let values: Bundle<Vec<u8>> = Bundle::new("values");

    StatefulTest::new(name, move || StoreMachine::new(flaw))
        .rule(
            Rule::new("add_key")
                .args(draws(binary(0, 3)))
                .run_into(&keys, |_: &mut StoreMachine, key: Vec<u8>| Ok(key)),
        )
        .rule(
            Rule::new("add_value")
                .args(draws(binary(0, 3)))
                .run_into(&values, |_: &mut StoreMachine, value: Vec<u8>| Ok(value)),
        )
        .rule(
            Rule::new("save")
                .args((keys.peek(), values.peek()))
                .run(|m: &mut StoreMachine, (key, value): (Vec<u8>, Vec<u8>)| {
                    m.system.put(&key, &value);
                    m.model.entry(key).or_default().insert(value);
                    Ok(())
                }),
        )
        .rule(
            Rule::new("delete")
                .args((keys.peek(), values.peek()))
                .run(|m: &mut StoreMachine, (key, value): (Vec<u8>, Vec<u8>)| {
                    m.system.discard(&key, &value);
                    if let Some(expected) = m.model.get_mut(&key) {
                        expected.remove(&value);
                    }
                    Ok(())
                }),
        )
        .rule(
            Rule::new("values_agree")
                .args(keys.peek())
                .run(|m: &mut StoreMachine, key: Vec<u8>| {
                    let expected = m.model.get(&key).cloned().unwrap_or_default();
                    ensure_eq(m.system.fetch(&key), expected, format_args!("fetch({key:?})"))
                }),
        )
}
