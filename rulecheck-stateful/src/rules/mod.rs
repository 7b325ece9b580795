//! Rules: the operations a sequence is built from.
//!
//! A rule is declared with a builder instead of reflection:
//!
//! ```rust
//! use rulecheck::integers;
//! use rulecheck_stateful::prelude::*;
//!
//! struct Counter {
//!     value: i64,
//! }
//!
//! impl StateMachine for Counter {}
//!
//! let add = Rule::<Counter>::new("add")
//!     .args(draws(integers(-5i64, 5)))
//!     .precondition(|counter| counter.value < 100)
//!     .run(|counter, amount| {
//!         counter.value += amount;
//!         Ok(())
//!     });
//! assert_eq!(add.name(), "add");
//! assert_eq!(add.weight(), 1);
//! ```

mod args;

pub use args::{Access, Arg, DrawContext, Drawn, Draws, Named, Requirement, draws, named};

use crate::bundle::{Bundle, PoolEffect, Pools};
use crate::error::OperationError;
use crate::machine::StateMachine;
use rulecheck::DrawError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Precondition<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;
type Prepare<M> = Box<dyn Fn(&mut DrawContext<'_>) -> Result<Prepared<M>, DrawError> + Send + Sync>;
pub(crate) type Call<M> = Box<dyn FnOnce(&mut M) -> Result<Option<Produce>, OperationError>>;
pub(crate) type Produce = Box<dyn FnOnce(&mut Pools) -> PoolEffect>;

/// A rule whose arguments have been drawn, ready to execute
pub(crate) struct Prepared<M> {
    pub(crate) args: String,
    pub(crate) call: Call<M>,
}

fn prepare_fn<M, F>(f: F) -> Prepare<M>
where
    F: Fn(&mut DrawContext<'_>) -> Result<Prepared<M>, DrawError> + Send + Sync + 'static,
{
    Box::new(f)
}

fn call_fn<M, F>(f: F) -> Call<M>
where
    F: FnOnce(&mut M) -> Result<Option<Produce>, OperationError> + 'static,
{
    Box::new(f)
}

/// One operation of a state machine
pub struct Rule<M> {
    name: String,
    weight: u32,
    initialize: bool,
    expected: Option<String>,
    requirements: Vec<Requirement>,
    target: Option<Requirement>,
    // Values each pool must hold for the arguments to be drawable.
    needs: Vec<(Arc<str>, usize)>,
    precondition: Option<Precondition<M>>,
    prepare: Prepare<M>,
}

impl<M: StateMachine> Rule<M> {
    /// Start declaring a regular rule
    pub fn new(name: impl Into<String>) -> RuleBuilder<M, ()> {
        RuleBuilder::start(name.into(), false)
    }

    /// Start declaring a rule that runs exactly once, before any regular rule
    pub fn initialize(name: impl Into<String>) -> RuleBuilder<M, ()> {
        RuleBuilder::start(name.into(), true)
    }

    pub(crate) fn pools_ready(&self, pools: &Pools) -> bool {
        self.needs
            .iter()
            .all(|(bundle, needed)| pools.len(bundle) >= *needed)
    }

    pub(crate) fn precondition_holds(&self, machine: &M) -> bool {
        self.precondition.as_ref().is_none_or(|check| check(machine))
    }

    pub(crate) fn prepare(&self, ctx: &mut DrawContext<'_>) -> Result<Prepared<M>, DrawError> {
        (self.prepare)(ctx)
    }
}

impl<M> Rule<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_initialize(&self) -> bool {
        self.initialize
    }

    /// Error kind this rule is declared to fail with
    pub fn expected_failure(&self) -> Option<&str> {
        self.expected.as_deref()
    }

    /// Bundles the arguments draw from
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Bundle receiving the rule's return value
    pub fn target(&self) -> Option<&Requirement> {
        self.target.as_ref()
    }
}

impl<M> fmt::Debug for Rule<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("initialize", &self.initialize)
            .field("expected", &self.expected)
            .field("requirements", &self.requirements)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`Rule::new`]
pub struct RuleBuilder<M, A> {
    name: String,
    weight: u32,
    initialize: bool,
    expected: Option<String>,
    precondition: Option<Precondition<M>>,
    args: A,
}

impl<M: StateMachine> RuleBuilder<M, ()> {
    fn start(name: String, initialize: bool) -> Self {
        Self {
            name,
            weight: 1,
            initialize,
            expected: None,
            precondition: None,
            args: (),
        }
    }
}

impl<M: StateMachine, A: Arg> RuleBuilder<M, A> {
    /// Arguments passed to the body; use a tuple for several
    pub fn args<B: Arg>(self, args: B) -> RuleBuilder<M, B> {
        RuleBuilder {
            name: self.name,
            weight: self.weight,
            initialize: self.initialize,
            expected: self.expected,
            precondition: self.precondition,
            args,
        }
    }

    /// Only schedule the rule while `check` holds for the machine
    pub fn precondition<F>(mut self, check: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.precondition = Some(Box::new(check));
        self
    }

    /// Relative scheduling weight; 0 keeps the rule out unless every eligible rule is 0
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Declare that the body must fail with an error of `kind`
    ///
    /// That error is swallowed. Returning normally, or failing with any other
    /// kind, fails the sequence.
    pub fn expect_failure(mut self, kind: impl Into<String>) -> Self {
        self.expected = Some(kind.into());
        self
    }

    /// Finish the rule with a body returning nothing
    pub fn run<F>(self, body: F) -> Rule<M>
    where
        F: Fn(&mut M, A::Value) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        self.finish(None, move |args| {
            let body = Arc::clone(&body);
            call_fn(move |machine: &mut M| {
                body(machine, args)?;
                Ok(None)
            })
        })
    }

    /// Finish the rule with a body whose return value is added to `target`
    pub fn run_into<T, F>(self, target: &Bundle<T>, body: F) -> Rule<M>
    where
        T: 'static,
        F: Fn(&mut M, A::Value) -> Result<T, OperationError> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let bundle = target.clone();
        self.finish(Some(Requirement::new(target, Access::Produce)), move |args| {
            let body = Arc::clone(&body);
            let bundle = bundle.clone();
            call_fn(move |machine: &mut M| {
                let value = body(machine, args)?;
                let produce: Produce = Box::new(move |pools: &mut Pools| {
                    let slot = pools.put(&bundle, value);
                    PoolEffect::Produced {
                        bundle: bundle.name().to_string(),
                        slot,
                    }
                });
                Ok(Some(produce))
            })
        })
    }

    fn finish<B>(self, target: Option<Requirement>, bind: B) -> Rule<M>
    where
        B: Fn(A::Value) -> Call<M> + Send + Sync + 'static,
    {
        let mut requirements = Vec::new();
        self.args.requirements(&mut requirements);
        let needs = pool_needs(&requirements);

        let args = self.args;
        let prepare = prepare_fn(move |ctx| {
            let Drawn { value, shown } = args.draw_arg(ctx)?;
            Ok(Prepared {
                args: shown,
                call: bind(value),
            })
        });

        Rule {
            name: self.name,
            weight: self.weight,
            initialize: self.initialize,
            expected: self.expected,
            requirements,
            target,
            needs,
            precondition: self.precondition,
            prepare,
        }
    }
}

/// One value per consume, plus one shared by any number of peeks
fn pool_needs(requirements: &[Requirement]) -> Vec<(Arc<str>, usize)> {
    let mut per_pool: BTreeMap<Arc<str>, (usize, bool)> = BTreeMap::new();
    for requirement in requirements {
        let entry = per_pool.entry(Arc::clone(&requirement.bundle)).or_default();
        match requirement.access {
            Access::Consume => entry.0 += 1,
            Access::Peek => entry.1 = true,
            Access::Produce => {}
        }
    }
    per_pool
        .into_iter()
        .map(|(bundle, (consumes, peeks))| (bundle, consumes + usize::from(peeks)))
        .filter(|(_, needed)| *needed > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulecheck::{ChoiceStream, integers};

    #[derive(Default)]
    struct Counter {
        value: i64,
        ids: Vec<u32>,
    }

    impl StateMachine for Counter {}

    fn prepare(rule: &Rule<Counter>, pools: &mut Pools, choices: &[u64]) -> Prepared<Counter> {
        let mut stream = ChoiceStream::replay(choices);
        let mut effects = Vec::new();
        let mut ctx = DrawContext::new(&mut stream, pools, &mut effects);
        match rule.prepare(&mut ctx) {
            Ok(prepared) => prepared,
            Err(e) => panic!("draw failed: {e}"),
        }
    }

    #[test]
    fn test_builder_defaults() {
        let rule = Rule::<Counter>::new("noop").run(|_, ()| Ok(()));
        assert_eq!(rule.name(), "noop");
        assert_eq!(rule.weight(), 1);
        assert!(!rule.is_initialize());
        assert!(rule.expected_failure().is_none());
        assert!(rule.requirements().is_empty());
        assert!(rule.target().is_none());
        assert!(rule.pools_ready(&Pools::new()));
        assert!(rule.precondition_holds(&Counter::default()));
    }

    #[test]
    fn test_run_applies_body() {
        let rule = Rule::<Counter>::new("add")
            .args(draws(integers(0i64, 10)))
            .run(|counter, amount| {
                counter.value += amount;
                Ok(())
            });

        let mut pools = Pools::new();
        let prepared = prepare(&rule, &mut pools, &[4]);
        assert_eq!(prepared.args, "4");

        let mut counter = Counter::default();
        let produced = (prepared.call)(&mut counter).unwrap();
        assert!(produced.is_none());
        assert_eq!(counter.value, 4);
    }

    #[test]
    fn test_run_into_produces_a_value() {
        let ids: Bundle<u32> = Bundle::new("ids");
        let rule = Rule::<Counter>::new("new_id")
            .args(draws(integers(1u32, 9)))
            .run_into(&ids, |counter, id| {
                counter.ids.push(id);
                Ok(id)
            });
        assert_eq!(rule.target().map(|t| t.access), Some(Access::Produce));

        let mut pools = Pools::new();
        let prepared = prepare(&rule, &mut pools, &[2]);
        let mut counter = Counter::default();
        let produce = (prepared.call)(&mut counter).unwrap().unwrap();
        let effect = produce(&mut pools);

        assert_eq!(counter.ids, vec![3]);
        assert_eq!(effect.to_string(), "v0 -> ids");
        assert_eq!(pools.len("ids"), 1);
    }

    #[test]
    fn test_pool_needs() {
        let ids: Bundle<u32> = Bundle::new("ids");
        let rule = Rule::<Counter>::new("swap")
            .args((ids.consume(), ids.consume(), ids.peek(), ids.peek()))
            .run(|_, _| Ok(()));

        let mut pools = Pools::new();
        for id in 0..2 {
            pools.put(&ids, id);
            assert!(!rule.pools_ready(&pools));
        }
        pools.put(&ids, 2);
        assert!(rule.pools_ready(&pools));
    }

    #[test]
    fn test_precondition_and_expected_failure() {
        let rule = Rule::<Counter>::new("decrement")
            .precondition(|counter| counter.value > 0)
            .expect_failure("Underflow")
            .weight(3)
            .run(|_, ()| Err(OperationError::raised("Underflow", "below zero")));

        assert!(!rule.precondition_holds(&Counter::default()));
        assert!(rule.precondition_holds(&Counter {
            value: 1,
            ..Counter::default()
        }));
        assert_eq!(rule.expected_failure(), Some("Underflow"));
        assert_eq!(rule.weight(), 3);
    }
}
