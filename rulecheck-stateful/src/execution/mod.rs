//! Executes one sequence of rules against a fresh machine.
//!
//! Every step runs the same cycle: decide whether to continue, pick an
//! eligible rule by weight, draw its arguments, execute the body, apply its
//! pool effects and check every invariant. All decisions are read from the
//! [`ChoiceStream`], so replaying the recorded choices replays the sequence.

mod trace;

pub use trace::Step;

use crate::bundle::{PoolStats, Pools};
use crate::error::{Failure, FailureSignature, catch_panic};
use crate::invariants::InvariantSet;
use crate::machine::{Running, StateMachine};
use crate::rules::{DrawContext, Prepared, Rule};
use rulecheck::{ChoiceStream, DrawError, Span, Status, TestCase, TestConfig};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, trace};

/// How a sequence ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The sequence ran to completion
    Passed,
    /// The run deadline passed before the sequence completed
    Aborted,
    /// The choices did not decode to a sequence
    Invalid(DrawError),
    Failed(Failure),
}

/// Everything observed while executing one sequence
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub outcome: Outcome,
    pub steps: Vec<Step>,
    pub choices: Vec<u64>,
    pub spans: Vec<Span>,
    pub pool_stats: BTreeMap<String, PoolStats>,
    /// The sequence stopped because no rule was eligible
    pub starved: bool,
}

impl RunRecord {
    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure().is_some()
    }

    /// The record as seen by the shrinker
    pub fn test_case(&self) -> TestCase<FailureSignature> {
        let status = match &self.outcome {
            Outcome::Passed => Status::Valid,
            Outcome::Aborted => Status::Invalid,
            Outcome::Invalid(error) if error.is_overrun() => Status::Overrun,
            Outcome::Invalid(_) => Status::Invalid,
            Outcome::Failed(failure) => Status::Interesting(failure.signature()),
        };
        TestCase::new(self.choices.clone(), self.spans.clone(), status, self.steps.len())
    }
}

struct Sequence<M: StateMachine> {
    machine: Running<M>,
    stream: ChoiceStream,
    pools: Pools,
    steps: Vec<Step>,
    starved: bool,
}

/// Drives sequences for one set of rules and invariants
pub(crate) struct Scheduler<'a, M: 'static> {
    rules: &'a [Rule<M>],
    invariants: &'a InvariantSet<M>,
    config: &'a TestConfig,
    deadline: Option<Instant>,
}

impl<'a, M: StateMachine> Scheduler<'a, M> {
    pub(crate) fn new(
        rules: &'a [Rule<M>],
        invariants: &'a InvariantSet<M>,
        config: &'a TestConfig,
    ) -> Self {
        Self {
            rules,
            invariants,
            config,
            deadline: None,
        }
    }

    /// Abort sequences still running at `deadline`
    pub(crate) fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Execute one sequence against `machine`, reading decisions from `stream`
    pub(crate) fn run(&self, machine: M, stream: ChoiceStream) -> RunRecord {
        let machine = match Running::start(machine) {
            Ok(machine) => machine,
            Err(error) => {
                debug!(message = error.message(), "prepare panicked");
                let (choices, spans) = stream.finish();
                return RunRecord {
                    outcome: Outcome::Failed(Failure::prepare(&error)),
                    steps: Vec::new(),
                    choices,
                    spans,
                    pool_stats: BTreeMap::new(),
                    starved: false,
                };
            }
        };
        let mut sequence = Sequence {
            machine,
            stream,
            pools: Pools::new(),
            steps: Vec::new(),
            starved: false,
        };
        let outcome = self.drive(&mut sequence);

        let Sequence {
            machine,
            stream,
            pools,
            steps,
            starved,
        } = sequence;
        drop(machine);

        let (choices, spans) = stream.finish();
        RunRecord {
            outcome,
            steps,
            choices,
            spans,
            pool_stats: pools.all_stats(),
            starved,
        }
    }

    fn drive(&self, sequence: &mut Sequence<M>) -> Outcome {
        for rule in self.rules.iter().filter(|rule| rule.is_initialize()) {
            if self.past_deadline(sequence) {
                return Outcome::Aborted;
            }
            match self.eligible(rule, sequence) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(failure) => return Outcome::Failed(failure),
            }
            sequence.stream.start_span("step");
            let result = self.step(rule, sequence);
            sequence.stream.stop_span();
            if let Err(outcome) = result {
                return outcome;
            }
        }
        if let Err(violation) = self.invariants.check_all(&sequence.machine) {
            return Outcome::Failed(Failure::invariant(
                &violation.name,
                &violation.error,
                sequence.steps.len().checked_sub(1),
            ));
        }

        let regular: Vec<&Rule<M>> = self
            .rules
            .iter()
            .filter(|rule| !rule.is_initialize())
            .collect();
        let p_continue = self.config.continue_probability();
        let mut taken = 0;
        loop {
            if self.past_deadline(sequence) {
                return Outcome::Aborted;
            }
            if taken >= self.config.max_steps {
                return Outcome::Passed;
            }

            sequence.stream.start_span("step");
            let result = self.next_step(&regular, taken, p_continue, sequence);
            sequence.stream.stop_span();
            match result {
                Ok(true) => taken += 1,
                Ok(false) => return Outcome::Passed,
                Err(outcome) => return outcome,
            }
        }
    }

    fn past_deadline(&self, sequence: &Sequence<M>) -> bool {
        let past = self.deadline.is_some_and(|deadline| Instant::now() >= deadline);
        if past {
            debug!(steps = sequence.steps.len(), "run deadline reached mid-sequence");
        }
        past
    }

    /// Take one regular step; `Ok(false)` ends the sequence
    fn next_step(
        &self,
        regular: &[&Rule<M>],
        taken: usize,
        p_continue: f64,
        sequence: &mut Sequence<M>,
    ) -> Result<bool, Outcome> {
        if taken >= self.config.min_steps
            && !sequence
                .stream
                .draw_boolean(p_continue)
                .map_err(Outcome::Invalid)?
        {
            return Ok(false);
        }

        let mut eligible = Vec::with_capacity(regular.len());
        for &rule in regular {
            if self.eligible(rule, sequence).map_err(Outcome::Failed)? {
                eligible.push(rule);
            }
        }
        if eligible.is_empty() {
            debug!(step = taken, "no rule is eligible");
            sequence.starved = true;
            return Ok(false);
        }

        let rule = choose_rule(&eligible, &mut sequence.stream).map_err(Outcome::Invalid)?;
        self.step(rule, sequence)?;
        Ok(true)
    }

    fn eligible(&self, rule: &Rule<M>, sequence: &Sequence<M>) -> Result<bool, Failure> {
        if !rule.pools_ready(&sequence.pools) {
            return Ok(false);
        }
        let machine: &M = &sequence.machine;
        catch_panic(|| rule.precondition_holds(machine))
            .map_err(|error| Failure::precondition(rule.name(), &error, sequence.steps.len()))
    }

    fn step(&self, rule: &Rule<M>, sequence: &mut Sequence<M>) -> Result<(), Outcome> {
        let index = sequence.steps.len();
        let mut effects = Vec::new();
        let Prepared { args, call } = {
            let mut ctx = DrawContext::new(&mut sequence.stream, &mut sequence.pools, &mut effects);
            rule.prepare(&mut ctx).map_err(Outcome::Invalid)?
        };
        trace!(step = index, rule = rule.name(), args = %args, "executing");

        let machine: &mut M = &mut sequence.machine;
        let result = catch_panic(|| call(machine)).and_then(|result| result);

        let failure = match (result, rule.expected_failure()) {
            (Ok(produced), None) => {
                if let Some(produce) = produced {
                    effects.push(produce(&mut sequence.pools));
                }
                None
            }
            (Ok(_), Some(expected)) => Some(Failure::unexpected_success(rule.name(), expected, index)),
            (Err(error), Some(expected)) if error.kind() == expected => None,
            (Err(error), Some(expected)) => {
                Some(Failure::wrong_failure(rule.name(), expected, error, index))
            }
            (Err(error), None) => Some(Failure::operation(rule.name(), error, index)),
        };

        sequence.steps.push(Step {
            rule: rule.name().to_string(),
            args,
            effects,
        });
        if let Some(failure) = failure {
            return Err(Outcome::Failed(failure));
        }

        self.invariants
            .check_all(&sequence.machine)
            .map_err(|violation| {
                Outcome::Failed(Failure::invariant(&violation.name, &violation.error, Some(index)))
            })
    }
}

/// Weighted pick among eligible rules: one draw over the cumulative weight
fn choose_rule<'r, M>(
    eligible: &[&'r Rule<M>],
    stream: &mut ChoiceStream,
) -> Result<&'r Rule<M>, DrawError> {
    let total: u64 = eligible.iter().map(|rule| u64::from(rule.weight())).sum();
    if total == 0 {
        let index = stream.draw_index(eligible.len())?;
        return Ok(eligible[index]);
    }

    let mut roll = stream.draw_integer(0, i128::from(total) - 1)? as u64;
    for &rule in eligible {
        let weight = u64::from(rule.weight());
        if roll < weight {
            return Ok(rule);
        }
        roll -= weight;
    }
    Err(DrawError::InvalidArgument(format!(
        "weighted roll exceeded total weight {total}"
    )))
}
