//! # rulecheck-stateful
//!
//! Rule-based stateful testing: describe the operations of a system as
//! rules, keep a model of what the system should do, and let the scheduler
//! search for a sequence of operations where the two disagree. Failing
//! sequences are shrunk to a minimal reproduction script.
//!
//! ## Features
//!
//! - **Rules** with drawn arguments, preconditions, weights and expected failures
//! - **Bundles** passing values produced by one step to later steps
//! - **Invariants** checked after every step
//! - **Shrinking** on the recorded choice stream, so minimal sequences stay valid
//! - **Example database** replaying the last failure before anything new is tried
//!
//! ## Quick Example
//!
//! ```rust
//! use rulecheck::{TestConfig, text};
//! use rulecheck_stateful::prelude::*;
//! use std::collections::HashSet;
//!
//! #[derive(Default)]
//! struct Names {
//!     system: HashSet<String>,
//!     model: Vec<String>,
//! }
//!
//! impl StateMachine for Names {}
//!
//! let names: Bundle<String> = Bundle::new("names");
//!
//! let result = StatefulTest::new("names", Names::default)
//!     .rule(
//!         Rule::new("add")
//!             .args(draws(text(0, 3)))
//!             .run_into(&names, |m: &mut Names, name: String| {
//!                 m.system.insert(name.clone());
//!                 m.model.push(name.clone());
//!                 Ok(name)
//!             }),
//!     )
//!     .invariant("same size", |m: &Names| m.system.len() == m.model.len())
//!     .config(TestConfig::default().with_seed(1).without_database())
//!     .run();
//!
//! // Adding the same name twice breaks the invariant; the reproduction
//! // shrinks down to exactly those two calls.
//! let report = result.unwrap_err().report().cloned().unwrap();
//! assert_eq!(report.steps.len(), 2);
//! assert_eq!(report.steps[0].args, report.steps[1].args);
//! assert!(report.script()[1].starts_with("v1 = add("));
//! ```

pub mod bundle;
pub mod dsl;
pub mod error;
pub mod execution;
pub mod invariants;
pub mod machine;
pub mod report;
pub mod rules;

pub use bundle::{Bundle, Consume, Peek, PoolEffect, PoolStats, Pools, Slot};
pub use dsl::{DEFAULT_DATABASE_DIR, RunSummary, StatefulTest};
pub use error::{
    DomainError, Failure, FailureKind, FailureSignature, OperationError, RunError, Site, ensure,
    ensure_eq,
};
pub use execution::{Outcome, RunRecord, Step};
pub use invariants::{Invariant, InvariantSet, InvariantViolation};
pub use machine::StateMachine;
pub use report::{FailureReport, ShrinkStats};
pub use rules::{Access, Arg, DrawContext, Drawn, Draws, Named, Requirement, Rule, RuleBuilder, draws, named};

#[cfg(feature = "persistence")]
pub use report::ReportRecord;

/// Re-exports for convenient imports
pub mod prelude {
    pub use crate::bundle::Bundle;
    pub use crate::dsl::{RunSummary, StatefulTest};
    pub use crate::error::{DomainError, OperationError, RunError, ensure, ensure_eq};
    pub use crate::machine::StateMachine;
    pub use crate::rules::{Rule, draws, named};
}
