//! Example: rule-based testing of a user directory
//!
//! Users created by one step are kept in a bundle so later steps can look
//! them up, create them again (which must fail) or delete them. The
//! directory is run twice: once correct, once with a delete that does
//! nothing, to show a shrunk failure report.
//!
//! Run with `RUST_LOG=rulecheck=debug` to see each example.

use rulecheck::{ChoiceStream, DrawError, Strategy, TestConfig, composite, text, uuids};
use rulecheck_stateful::prelude::*;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
struct User {
    uid: Uuid,
    name: String,
}

#[derive(Debug, Error)]
enum DirectoryError {
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

/// The system under test
struct Directory {
    users: HashMap<Uuid, User>,
    forgetful_delete: bool,
}

impl Directory {
    fn create_user(&mut self, user: &User) -> Result<(), DirectoryError> {
        if self.users.contains_key(&user.uid) {
            return Err(DirectoryError::AlreadyExists(user.uid));
        }
        self.users.insert(user.uid, user.clone());
        Ok(())
    }

    fn fetch_user(&self, uid: &Uuid) -> Option<&User> {
        self.users.get(uid)
    }

    fn delete_user(&mut self, uid: &Uuid) -> Result<(), DirectoryError> {
        if self.forgetful_delete {
            return Ok(());
        }
        self.users
            .remove(uid)
            .map(drop)
            .ok_or(DirectoryError::NotFound(*uid))
    }
}

struct DirectoryMachine {
    system: Directory,
    model: HashMap<Uuid, User>,
}

impl StateMachine for DirectoryMachine {}

fn users() -> impl Strategy<Value = User> + Send + Sync + 'static {
    composite(|stream: &mut ChoiceStream| -> Result<User, DrawError> {
        Ok(User {
            uid: stream.draw(&uuids())?,
            name: stream.draw(&text(1, 10))?,
        })
    })
}

fn directory_test(forgetful_delete: bool) -> StatefulTest<DirectoryMachine> {
    let created: Bundle<User> = Bundle::new("created_users");

    StatefulTest::new("user_directory", move || DirectoryMachine {
        system: Directory {
            users: HashMap::new(),
            forgetful_delete,
        },
        model: HashMap::new(),
    })
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
                ensure_eq(m.system.fetch_user(&user.uid), m.model.get(&user.uid), "fetch_user")
            }),
    )
    .rule(
        Rule::new("get_non_existing_user")
            .args(draws(users()))
            .run(|m: &mut DirectoryMachine, user: User| {
                ensure_eq(m.system.fetch_user(&user.uid), None, "fetch_user of a fresh uid")
            }),
    )
    .rule(
        Rule::new("delete_user")
            .args(created.consume())
            .run(|m: &mut DirectoryMachine, user: User| {
                m.system.delete_user(&user.uid)?;
                m.model.remove(&user.uid);
                Ok(())
            }),
    )
    .invariant("sizes agree", |m: &DirectoryMachine| {
        m.system.users.len() == m.model.len()
    })
    .config(TestConfig::default().with_seed(2024).without_database())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Rule-based testing of a user directory\n");

    println!("Correct directory:");
    match directory_test(false).run() {
        Ok(summary) => {
            println!("  ✓ {} sequences, {} steps", summary.examples, summary.steps);
            for (rule, count) in &summary.rule_counts {
                println!("    {rule}: {count}");
            }
        }
        Err(e) => println!("  ✗ {e}"),
    }

    println!("\nDirectory whose delete does nothing:");
    match directory_test(true).run() {
        Ok(_) => println!("  ✗ bug not found"),
        Err(e) => println!("{e}"),
    }
}
