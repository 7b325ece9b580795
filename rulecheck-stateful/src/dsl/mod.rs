//! The user-facing stateful test: registration, generation, shrinking and reporting.

use crate::bundle::PoolStats;
use crate::error::{Failure, OperationError, RunError};
use crate::execution::{Outcome, RunRecord, Scheduler};
use crate::invariants::InvariantSet;
use crate::machine::StateMachine;
use crate::report::{FailureReport, ShrinkStats};
use crate::rules::Rule;
use rulecheck::{
    ChoiceStream, DatabaseKey, DirectoryDatabase, ExampleDatabase, RunSeed, ShrinkConfig,
    Shrinker, TestConfig, decode_choices, encode_choices,
};
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Directory used when the database is enabled and none was configured
pub const DEFAULT_DATABASE_DIR: &str = ".rulecheck/examples";

type Factory<M> = Box<dyn Fn() -> M + Send + Sync>;

/// A rule-based stateful test
///
/// ```rust
/// use rulecheck::{TestConfig, integers};
/// use rulecheck_stateful::prelude::*;
///
/// #[derive(Default)]
/// struct Stack {
///     items: Vec<i32>,
///     model_len: usize,
/// }
///
/// impl StateMachine for Stack {}
///
/// let summary = StatefulTest::new("stack", Stack::default)
///     .rule(Rule::new("push").args(draws(integers(0i32, 9))).run(|stack: &mut Stack, item| {
///         stack.items.push(item);
///         stack.model_len += 1;
///         Ok(())
///     }))
///     .rule(
///         Rule::new("pop")
///             .precondition(|stack: &Stack| stack.model_len > 0)
///             .run(|stack: &mut Stack, ()| {
///                 ensure(stack.items.pop().is_some(), "pop on a non-empty stack")?;
///                 stack.model_len -= 1;
///                 Ok(())
///             }),
///     )
///     .invariant("lengths agree", |stack: &Stack| stack.items.len() == stack.model_len)
///     .config(TestConfig::default().with_max_examples(20).without_database())
///     .run()
///     .unwrap();
/// assert_eq!(summary.examples, 20);
/// ```
pub struct StatefulTest<M: StateMachine> {
    name: String,
    factory: Factory<M>,
    rules: Vec<Rule<M>>,
    invariants: InvariantSet<M>,
    config: TestConfig,
    database: Option<Arc<dyn ExampleDatabase>>,
}

impl<M: StateMachine> StatefulTest<M> {
    /// A test named `name` building a fresh machine with `factory` for every sequence
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            rules: Vec::new(),
            invariants: InvariantSet::new(),
            config: TestConfig::new(),
            database: None,
        }
    }

    pub fn rule(mut self, rule: Rule<M>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add a predicate checked after every step
    pub fn invariant<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.invariants.add_fn(name, check);
        self
    }

    /// Add a check, typically built from [`ensure`](crate::ensure), run after every step
    pub fn invariant_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&M) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        self.invariants.add_check(name, check);
        self
    }

    pub fn config(mut self, config: TestConfig) -> Self {
        self.config = config;
        self
    }

    /// Store and replay failures through `database`
    pub fn database(mut self, database: Arc<dyn ExampleDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule<M>] {
        &self.rules
    }

    /// Database key: the test name refined by the registered rules, in order
    pub fn key(&self) -> DatabaseKey {
        let signature: Vec<String> = self
            .rules
            .iter()
            .map(|rule| {
                let phase = if rule.is_initialize() { "init" } else { "rule" };
                format!("{phase}:{}", rule.name())
            })
            .collect();
        DatabaseKey::new(&self.name, signature.join("\n").as_bytes())
    }

    /// Execute the sequence recorded in `choices`
    pub fn replay(&self, choices: &[u64]) -> RunRecord {
        Scheduler::new(&self.rules, &self.invariants, &self.config)
            .run((self.factory)(), ChoiceStream::replay(choices))
    }

    /// Run the test: replay saved failures, generate new sequences, shrink
    /// the first failure and report it
    ///
    /// `RULECHECK_*` environment variables override the configuration.
    pub fn run(&self) -> Result<RunSummary, RunError> {
        let config = self.config.clone().from_env()?;
        self.check_rules()?;

        let seed = RunSeed::from_config(config.seed);
        let span = info_span!("rulecheck", test = %self.name, seed = seed.value());
        let _enter = span.enter();

        let session = Session {
            test: self,
            database: self.resolve_database(&config),
            key: self.key(),
            config,
            seed,
        };
        session.run()
    }

    /// Run the test, panicking with the failure report if it fails
    pub fn check(&self) -> RunSummary {
        match self.run() {
            Ok(summary) => summary,
            Err(RunError::Failed(report)) => panic!("\n{report}"),
            Err(error) => panic!("stateful test `{}` could not run: {error}", self.name),
        }
    }

    fn check_rules(&self) -> Result<(), RunError> {
        if self.rules.is_empty() {
            return Err(RunError::NoRules);
        }

        let mut names = HashSet::new();
        let mut bundle_types: HashMap<&str, (TypeId, &'static str)> = HashMap::new();
        for rule in &self.rules {
            if !names.insert(rule.name()) {
                return Err(RunError::DuplicateRule(rule.name().to_string()));
            }
            for requirement in rule.requirements().iter().chain(rule.target()) {
                let (type_id, type_name) = *bundle_types
                    .entry(requirement.bundle.as_ref())
                    .or_insert((requirement.type_id, requirement.type_name));
                if type_id != requirement.type_id {
                    return Err(RunError::BundleTypeMismatch {
                        bundle: requirement.bundle.to_string(),
                        first: type_name,
                        second: requirement.type_name,
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_database(&self, config: &TestConfig) -> Option<Arc<dyn ExampleDatabase>> {
        if !config.use_database {
            return None;
        }
        if let Some(database) = &self.database {
            return Some(Arc::clone(database));
        }
        match DirectoryDatabase::open(Path::new(DEFAULT_DATABASE_DIR)) {
            Ok(database) => Some(Arc::new(database)),
            Err(error) => {
                warn!(%error, "example database unavailable; failures will not be saved");
                None
            }
        }
    }
}

/// Statistics of a passing run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub seed: u64,
    /// Valid sequences executed
    pub examples: usize,
    /// Sequences discarded because their choices could not be drawn
    pub invalid: usize,
    /// Sequences cut short by the run timeout
    pub aborted: usize,
    /// Sequences that ended because no rule was eligible
    pub starved: usize,
    /// Saved examples replayed from the database
    pub replayed: usize,
    /// Steps executed across valid sequences
    pub steps: usize,
    /// Executions per rule across valid sequences
    pub rule_counts: BTreeMap<String, usize>,
    pub pool_stats: BTreeMap<String, PoolStats>,
    pub duration: Duration,
}

impl RunSummary {
    fn record(&mut self, record: &RunRecord) {
        self.examples += 1;
        self.steps += record.steps.len();
        if record.starved {
            self.starved += 1;
        }
        for step in &record.steps {
            *self.rule_counts.entry(step.rule.clone()).or_default() += 1;
        }
        for (bundle, stats) in &record.pool_stats {
            *self.pool_stats.entry(bundle.clone()).or_default() += *stats;
        }
    }

    /// Rules that never ran in a valid sequence
    pub fn unexercised<'a, M>(&self, rules: &'a [Rule<M>]) -> Vec<&'a str> {
        rules
            .iter()
            .map(|rule| rule.name())
            .filter(|name| !self.rule_counts.contains_key(*name))
            .collect()
    }
}

/// One invocation of [`StatefulTest::run`] with its resolved configuration
struct Session<'t, M: StateMachine> {
    test: &'t StatefulTest<M>,
    config: TestConfig,
    seed: RunSeed,
    key: DatabaseKey,
    database: Option<Arc<dyn ExampleDatabase>>,
}

impl<M: StateMachine> Session<'_, M> {
    fn run(&self) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let mut summary = RunSummary {
            seed: self.seed.value(),
            ..RunSummary::default()
        };

        if let Some((failing, saved)) = self.replay_saved(&mut summary) {
            return Err(self.fail(failing, Some(saved)));
        }

        let deadline = self.config.run_timeout.map(|timeout| started + timeout);
        if let Some(failing) = self.generate(deadline, &mut summary)? {
            return Err(self.fail(failing, None));
        }

        summary.duration = started.elapsed();
        if summary.starved > 0 {
            warn!(
                sequences = summary.starved,
                "sequences ended early because no rule was eligible; check preconditions and bundle producers"
            );
        }
        info!(
            examples = summary.examples,
            invalid = summary.invalid,
            steps = summary.steps,
            elapsed = ?summary.duration,
            "passed"
        );
        Ok(summary)
    }

    fn scheduler(&self) -> Scheduler<'_, M> {
        Scheduler::new(&self.test.rules, &self.test.invariants, &self.config)
    }

    fn replay(&self, choices: &[u64]) -> RunRecord {
        self.scheduler()
            .run((self.test.factory)(), ChoiceStream::replay(choices))
    }

    /// Replay saved examples; the first that still fails is returned with its stored bytes
    fn replay_saved(&self, summary: &mut RunSummary) -> Option<(Failing, Vec<u8>)> {
        let database = self.database.as_ref()?;
        let saved = match database.fetch(&self.key) {
            Ok(saved) => saved,
            Err(error) => {
                warn!(%error, "could not read saved examples");
                return None;
            }
        };

        for bytes in saved {
            summary.replayed += 1;
            let choices = match decode_choices(&bytes) {
                Ok(choices) => choices,
                Err(error) => {
                    warn!(%error, "discarding corrupt saved example");
                    self.forget(&bytes);
                    continue;
                }
            };
            if let Some(failing) = Failing::new(self.replay(&choices)) {
                info!(key = %self.key, choices = choices.len(), "saved example still fails");
                return Some((failing, bytes));
            }
            debug!(key = %self.key, "saved example no longer fails, deleting it");
            self.forget(&bytes);
        }
        None
    }

    fn generate(
        &self,
        deadline: Option<Instant>,
        summary: &mut RunSummary,
    ) -> Result<Option<Failing>, RunError> {
        let batch = if self.config.workers > 1 {
            self.config.workers * 4
        } else {
            1
        };
        let max_invalid = self.config.max_invalid();
        let mut next_example = 0u64;

        loop {
            if summary.examples >= self.config.max_examples {
                return Ok(None);
            }
            if summary.invalid > max_invalid {
                if summary.examples == 0 {
                    warn!(invalid = summary.invalid, "no valid example could be generated");
                    return Err(RunError::Unsatisfiable {
                        valid: summary.examples,
                        invalid: summary.invalid,
                    });
                }
                warn!(
                    invalid = summary.invalid,
                    valid = summary.examples,
                    "stopping generation early, too many invalid examples"
                );
                return Ok(None);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(examples = summary.examples, "run timeout reached");
                return Ok(None);
            }

            let records = self.explore_batch(next_example, batch, deadline);
            next_example += batch as u64;
            for record in records {
                match &record.outcome {
                    Outcome::Failed(failure) => {
                        info!(steps = record.steps.len(), %failure, "found a failing sequence");
                        return Ok(Failing::new(record));
                    }
                    Outcome::Passed => summary.record(&record),
                    Outcome::Invalid(_) => summary.invalid += 1,
                    Outcome::Aborted => summary.aborted += 1,
                }
                if summary.examples >= self.config.max_examples || summary.invalid > max_invalid {
                    break;
                }
            }
        }
    }

    /// Explore examples `first..first + count`, returned in example order
    fn explore_batch(&self, first: u64, count: usize, deadline: Option<Instant>) -> Vec<RunRecord> {
        let workers = self.config.workers.min(count);
        if workers <= 1 {
            return (0..count as u64)
                .map(|offset| self.explore(first + offset, deadline))
                .collect();
        }

        // Worker `w` takes every `workers`-th example starting at `w`.
        let joined = crossbeam::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    scope.spawn(move |_| {
                        (worker..count)
                            .step_by(workers)
                            .map(|offset| {
                                let example = first + offset as u64;
                                (example, self.explore(example, deadline))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut records = Vec::with_capacity(count);
            for handle in handles {
                match handle.join() {
                    Ok(part) => records.extend(part),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
            records
        });

        let mut records = joined.unwrap_or_else(|payload| std::panic::resume_unwind(payload));
        records.sort_by_key(|(example, _)| *example);
        records.into_iter().map(|(_, record)| record).collect()
    }

    fn explore(&self, example: u64, deadline: Option<Instant>) -> RunRecord {
        let stream = ChoiceStream::live(self.seed.example_rng(example), self.config.max_choices);
        let record = self
            .scheduler()
            .with_deadline(deadline)
            .run((self.test.factory)(), stream);
        debug!(
            example,
            steps = record.steps.len(),
            choices = record.choices.len(),
            outcome = ?record.outcome,
            "example finished"
        );
        record
    }

    /// Shrink the failure, save the result and build the report
    fn fail(&self, failing: Failing, saved: Option<Vec<u8>>) -> RunError {
        let (minimal, shrink) = self.shrink(failing);
        let from_database = saved.is_some();

        let encoded = encode_choices(&minimal.record.choices);
        if let Some(database) = &self.database {
            if let Err(error) = database.save(&self.key, &encoded) {
                warn!(%error, "could not save the failing example");
            }
            if let Some(previous) = saved.filter(|previous| *previous != encoded) {
                self.forget(&previous);
            }
        }

        RunError::Failed(Box::new(FailureReport {
            test: self.test.name.clone(),
            seed: self.seed.value(),
            steps: minimal.record.steps,
            failure: minimal.failure,
            choices: minimal.record.choices,
            shrink,
            from_database,
        }))
    }

    fn shrink(&self, failing: Failing) -> (Failing, Option<ShrinkStats>) {
        let scheduler = self.scheduler();
        let test = |choices: &[u64]| {
            scheduler
                .run((self.test.factory)(), ChoiceStream::replay(choices))
                .test_case()
        };
        let initial = failing.record.test_case();
        let Some(shrinker) = Shrinker::new(initial, test, ShrinkConfig::from(&self.config)) else {
            return (failing, None);
        };

        let result = shrinker.shrink();
        let stats = ShrinkStats {
            original_steps: failing.record.steps.len(),
            original_choices: failing.record.choices.len(),
            attempts: result.attempts,
            accepted: result.accepted,
            duration: result.shrink_duration,
            completed: result.completed,
        };
        if !result.improved() {
            return (failing, Some(stats));
        }

        // The shrinker keeps only test cases; replay once more for the full trace.
        match Failing::new(self.replay(&result.minimal.choices)) {
            Some(minimal) => (minimal, Some(stats)),
            None => {
                warn!("minimal example passed on replay, reporting the original failure");
                (failing, Some(stats))
            }
        }
    }

    fn forget(&self, bytes: &[u8]) {
        if let Some(database) = &self.database {
            if let Err(error) = database.delete(&self.key, bytes) {
                warn!(%error, "could not delete saved example");
            }
        }
    }
}

/// A record known to hold a failure
struct Failing {
    record: RunRecord,
    failure: Failure,
}

impl Failing {
    fn new(record: RunRecord) -> Option<Self> {
        let failure = record.failure()?.clone();
        Some(Self { record, failure })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use crate::error::ensure;
    use crate::rules::draws;
    use rulecheck::{InMemoryDatabase, Strategy, integers};

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    impl StateMachine for Counter {}

    fn counter_test() -> StatefulTest<Counter> {
        StatefulTest::new("counter", Counter::default)
            .rule(
                Rule::new("add")
                    .args(draws(integers(0u32, 10)))
                    .run(|counter: &mut Counter, amount| {
                        counter.value += amount;
                        Ok(())
                    }),
            )
            .config(
                TestConfig::default()
                    .with_seed(11)
                    .with_max_examples(30)
                    .without_database(),
            )
    }

    #[test]
    fn test_passing_run_summary() {
        let summary = counter_test().run().unwrap();
        assert_eq!(summary.seed, 11);
        assert_eq!(summary.examples, 30);
        assert_eq!(summary.rule_counts.get("add").copied().unwrap_or(0), summary.steps);
    }

    #[test]
    fn test_failure_is_shrunk() {
        let test = StatefulTest::new("bounded_add", Counter::default)
            .rule(
                Rule::new("add")
                    .args(draws(integers(0u32, 10)))
                    .run(|counter: &mut Counter, amount| {
                        ensure(amount < 7, "amount too large")?;
                        counter.value += amount;
                        Ok(())
                    }),
            )
            .config(TestConfig::default().with_seed(3).without_database());
        let report = match test.run() {
            Err(RunError::Failed(report)) => report,
            other => panic!("expected a failure, got {other:?}"),
        };

        // continue, pick `add`, amount 7
        assert_eq!(report.choices, vec![1, 0, 7]);
        assert_eq!(report.script(), vec!["add(7)"]);
        assert_eq!(report.failure.step, Some(0));
        assert!(test.replay(&report.choices).is_failure());
    }

    #[test]
    fn test_accumulated_failure_is_reported_at_its_last_step() {
        let test = counter_test().invariant("small", |counter: &Counter| counter.value < 15);
        let report = test.run().unwrap_err().report().cloned().unwrap();
        let shrink = report.shrink.clone().unwrap();

        assert!(report.steps.len() >= 2);
        assert!(report.steps.len() <= shrink.original_steps);
        assert_eq!(report.failure.step, Some(report.steps.len() - 1));
        assert!(test.replay(&report.choices).is_failure());
    }

    #[test]
    fn test_rule_validation() {
        let test = StatefulTest::new("empty", Counter::default);
        assert!(matches!(test.run(), Err(RunError::NoRules)));

        let twice = || Rule::new("same").run(|_: &mut Counter, ()| Ok(()));
        let test = StatefulTest::new("dup", Counter::default)
            .rule(twice())
            .rule(twice());
        assert!(matches!(test.run(), Err(RunError::DuplicateRule(name)) if name == "same"));

        let as_int: Bundle<u32> = Bundle::new("shared");
        let as_text: Bundle<String> = Bundle::new("shared");
        let test = StatefulTest::new("types", Counter::default)
            .rule(Rule::new("make").run_into(&as_int, |_: &mut Counter, ()| Ok(1)))
            .rule(
                Rule::new("read")
                    .args(as_text.peek())
                    .run(|_: &mut Counter, _| Ok(())),
            );
        assert!(matches!(
            test.run(),
            Err(RunError::BundleTypeMismatch { bundle, .. }) if bundle == "shared"
        ));
    }

    #[test]
    fn test_key_depends_on_rules() {
        let a = counter_test();
        let b = counter_test().rule(Rule::new("noop").run(|_: &mut Counter, ()| Ok(())));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), counter_test().key());
    }

    #[test]
    fn test_failure_is_saved_and_replayed() {
        let database = Arc::new(InMemoryDatabase::new());
        let config = TestConfig::default().with_seed(5).with_max_examples(50);
        let failing = || {
            counter_test()
                .config(config.clone())
                .invariant("small", |counter: &Counter| counter.value < 15)
                .database(database.clone())
        };

        let first = failing().run().unwrap_err();
        assert_eq!(database.len(), 1);

        let second = failing().run().unwrap_err();
        let (first, second) = (first.report().unwrap(), second.report().unwrap());
        assert_eq!(first.choices, second.choices);
        assert_eq!(database.len(), 1);
        assert!(!first.from_database);
        assert!(second.from_database);
        assert!(second.to_string().contains(&format!("StatefulTest::replay(&{:?})", second.choices)));

        // Once the bug is fixed the saved example is replayed, passes, and is deleted.
        let fixed = counter_test()
            .config(config.clone())
            .database(database.clone())
            .run()
            .unwrap();
        assert_eq!(fixed.replayed, 1);
        assert!(database.is_empty());
    }

    #[test]
    fn test_unsatisfiable_generation() {
        let test = StatefulTest::new("impossible", Counter::default)
            .rule(
                Rule::new("never")
                    .args(draws(integers(0u32, 10).filter(|_| false)))
                    .run(|_: &mut Counter, _| Ok(())),
            )
            .config(
                TestConfig::default()
                    .with_seed(1)
                    .with_max_examples(2)
                    .with_steps(1, 5)
                    .without_database(),
            );
        assert!(matches!(
            test.run(),
            Err(RunError::Unsatisfiable { valid: 0, .. })
        ));
    }

    #[test]
    fn test_parallel_generation_matches_sequential() {
        let failing = |workers| {
            counter_test()
                .invariant("small", |counter: &Counter| counter.value < 25)
                .config(
                    TestConfig::default()
                        .with_seed(99)
                        .with_max_examples(100)
                        .with_workers(workers)
                        .without_database(),
                )
                .run()
        };
        let sequential = failing(1).unwrap_err();
        let parallel = failing(3).unwrap_err();
        assert_eq!(
            sequential.report().unwrap().choices,
            parallel.report().unwrap().choices
        );
    }
}
