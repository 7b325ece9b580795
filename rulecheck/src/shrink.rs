//! Shrinking of failing choice streams.
//!
//! The shrinker never looks at generated values. It edits the recorded
//! choices of a failing example, re-runs the test on the edited stream and
//! keeps the edit when the run fails in the same way and the stream got
//! simpler in shortlex order. Spans recorded during the run tell it where
//! the structure is: steps, collection elements, filter attempts.

use crate::choice::{Span, is_simpler};
use crate::config::TestConfig;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, trace};

/// Outcome of running a test on a choice stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status<S> {
    /// The stream ran out before the test finished
    Overrun,
    /// The stream decoded to something the test had to discard
    Invalid,
    /// The test passed
    Valid,
    /// The test failed; `S` classifies the failure
    Interesting(S),
}

impl<S> Status<S> {
    pub fn is_interesting(&self) -> bool {
        matches!(self, Status::Interesting(_))
    }

    /// The failure signature, if the run failed
    pub fn interesting(&self) -> Option<&S> {
        match self {
            Status::Interesting(signature) => Some(signature),
            _ => None,
        }
    }
}

/// One execution of the test on a choice stream
#[derive(Debug, Clone)]
pub struct TestCase<S> {
    /// Choices actually consumed, normalized
    pub choices: Vec<u64>,
    /// Spans recorded while consuming them
    pub spans: Vec<Span>,
    pub status: Status<S>,
    /// Size of the generated structure (for stateful tests, the number of steps)
    pub size: usize,
}

impl<S> TestCase<S> {
    pub fn new(choices: Vec<u64>, spans: Vec<Span>, status: Status<S>, size: usize) -> Self {
        Self {
            choices,
            spans,
            status,
            size,
        }
    }
}

/// Budget for one shrink
#[derive(Debug, Clone)]
pub struct ShrinkConfig {
    /// Maximum number of candidate executions
    pub max_attempts: usize,
    /// Timeout for shrinking process
    pub timeout: Duration,
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2000,
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TestConfig> for ShrinkConfig {
    fn from(config: &TestConfig) -> Self {
        Self {
            max_attempts: config.max_shrinks,
            timeout: config.shrink_timeout,
        }
    }
}

/// Result of a shrinking operation
#[derive(Debug, Clone)]
pub struct ShrinkResult<S> {
    /// Choices of the failure shrinking started from
    pub original: Vec<u64>,
    /// Simplest failing example found
    pub minimal: TestCase<S>,
    /// Candidates executed
    pub attempts: usize,
    /// Candidates that became the new best
    pub accepted: usize,
    /// Time spent shrinking
    pub shrink_duration: Duration,
    /// False when the budget ran out before a fixed point was reached
    pub completed: bool,
}

impl<S> ShrinkResult<S> {
    pub fn improved(&self) -> bool {
        self.accepted > 0
    }
}

/// Greedy multi-pass shrinker over choice streams
pub struct Shrinker<S, F> {
    test: F,
    target: S,
    best: TestCase<S>,
    seen: HashSet<Vec<u64>>,
    config: ShrinkConfig,
    attempts: usize,
    accepted: usize,
    started: Instant,
    exhausted: bool,
}

impl<S, F> Shrinker<S, F>
where
    S: Clone + PartialEq + Debug,
    F: FnMut(&[u64]) -> TestCase<S>,
{
    /// Start from a failing test case. Returns `None` if `initial` did not fail.
    pub fn new(initial: TestCase<S>, test: F, config: ShrinkConfig) -> Option<Self> {
        let target = initial.status.interesting()?.clone();
        let mut seen = HashSet::new();
        seen.insert(initial.choices.clone());
        Some(Self {
            test,
            target,
            best: initial,
            seen,
            config,
            attempts: 0,
            accepted: 0,
            started: Instant::now(),
            exhausted: false,
        })
    }

    /// Current simplest failing case
    pub fn best(&self) -> &TestCase<S> {
        &self.best
    }

    /// Run every pass until none of them makes progress or the budget runs out
    pub fn shrink(mut self) -> ShrinkResult<S> {
        let _span = debug_span!("shrink", choices = self.best.choices.len()).entered();
        let original = self.best.choices.clone();
        self.started = Instant::now();

        loop {
            let before = self.best.choices.clone();
            self.delete_spans();
            self.delete_span_runs();
            self.zero_spans();
            self.minimize_choices();
            self.delete_blocks();
            self.coalesce_duplicates();
            self.reorder_spans();
            if self.exhausted || self.best.choices == before {
                break;
            }
        }

        debug!(
            attempts = self.attempts,
            accepted = self.accepted,
            from = original.len(),
            to = self.best.choices.len(),
            completed = !self.exhausted,
            "shrinking finished"
        );

        ShrinkResult {
            original,
            minimal: self.best,
            attempts: self.attempts,
            accepted: self.accepted,
            shrink_duration: self.started.elapsed(),
            completed: !self.exhausted,
        }
    }

    /// Execute `candidate` and adopt it if it fails the same way and is simpler
    pub fn consider(&mut self, candidate: Vec<u64>) -> bool {
        if self.exhausted || !is_simpler(&candidate, &self.best.choices) {
            return false;
        }
        if self.seen.contains(&candidate) {
            return false;
        }
        if self.attempts >= self.config.max_attempts
            || self.started.elapsed() >= self.config.timeout
        {
            self.exhausted = true;
            return false;
        }

        self.attempts += 1;
        let case = (self.test)(&candidate);
        self.seen.insert(candidate);

        match &case.status {
            Status::Interesting(signature) if *signature == self.target => {}
            Status::Interesting(other) => {
                trace!(?other, "candidate fails differently, rejected");
                return false;
            }
            _ => return false,
        }
        if case.size > self.best.size || !is_simpler(&case.choices, &self.best.choices) {
            return false;
        }

        trace!(
            choices = case.choices.len(),
            size = case.size,
            "accepted shrink"
        );
        self.seen.insert(case.choices.clone());
        self.best = case;
        self.accepted += 1;
        true
    }

    /// Candidates removing `start..end`, alone and with the enclosing span's
    /// leading choice (a length, usually) lowered by `removed`.
    fn removals(&self, start: usize, end: usize, removed: u64, parent: Option<Span>) -> Vec<Vec<u64>> {
        let mut plain = self.best.choices.clone();
        plain.drain(start..end);

        let mut candidates = Vec::with_capacity(2);
        if let Some(parent) = parent.filter(|p| p.start < start) {
            if plain[parent.start] >= removed {
                let mut adjusted = plain.clone();
                adjusted[parent.start] -= removed;
                candidates.push(plain);
                candidates.push(adjusted);
                return candidates;
            }
        }
        candidates.push(plain);
        candidates
    }

    fn delete_spans(&mut self) {
        let mut i = 0;
        while i < self.best.spans.len() && !self.exhausted {
            let span = self.best.spans[i];
            if span.is_empty() || span.end > self.best.choices.len() {
                i += 1;
                continue;
            }
            let parent = parents(&self.best.spans)[i].map(|p| self.best.spans[p]);
            let accepted = self
                .removals(span.start, span.end, 1, parent)
                .into_iter()
                .any(|candidate| self.consider(candidate));
            if !accepted {
                i += 1;
            }
        }
    }

    // ddmin over runs of adjacent sibling spans: whole run, halves, quarters...
    fn delete_span_runs(&mut self) {
        'restart: while !self.exhausted {
            let spans = self.best.spans.clone();
            let parents = parents(&spans);
            for run in sibling_runs(&spans) {
                let n = run.len();
                let mut k = n;
                while k >= 2 {
                    for s in 0..=(n - k) {
                        let start = spans[run[s]].start;
                        let end = spans[run[s + k - 1]].end;
                        let parent = parents[run[s]].map(|p| spans[p]);
                        let accepted = self
                            .removals(start, end, k as u64, parent)
                            .into_iter()
                            .any(|candidate| self.consider(candidate));
                        if accepted {
                            continue 'restart;
                        }
                    }
                    k /= 2;
                }
            }
            break;
        }
    }

    fn zero_spans(&mut self) {
        let mut i = 0;
        while i < self.best.spans.len() && !self.exhausted {
            let span = self.best.spans[i];
            i += 1;
            if span.is_empty() || span.end > self.best.choices.len() {
                continue;
            }
            if self.best.choices[span.start..span.end].iter().all(|&c| c == 0) {
                continue;
            }
            let mut candidate = self.best.choices.clone();
            candidate[span.start..span.end].fill(0);
            self.consider(candidate);
        }
    }

    fn minimize_choices(&mut self) {
        let mut i = 0;
        while i < self.best.choices.len() && !self.exhausted {
            self.lower_together(&[i]);
            i += 1;
        }
    }

    /// Lower the choices at `indices` (all equal) to a common smaller value,
    /// trying zero first and then binary searching.
    fn lower_together(&mut self, indices: &[usize]) {
        let Some(&value) = indices.first().and_then(|&i| self.best.choices.get(i)) else {
            return;
        };
        if value == 0 || !self.holds(indices, value) {
            return;
        }

        let candidate = self.with_choices(indices, 0);
        if self.consider(candidate) {
            return;
        }

        let (mut lo, mut hi) = (0u64, value);
        while lo + 1 < hi && !self.exhausted {
            let mid = lo + (hi - lo) / 2;
            let candidate = self.with_choices(indices, mid);
            if self.consider(candidate) {
                if !self.holds(indices, mid) {
                    return;
                }
                hi = mid;
            } else {
                lo = mid;
            }
        }
    }

    fn holds(&self, indices: &[usize], value: u64) -> bool {
        indices
            .iter()
            .all(|&i| self.best.choices.get(i) == Some(&value))
    }

    fn with_choices(&self, indices: &[usize], value: u64) -> Vec<u64> {
        let mut candidate = self.best.choices.clone();
        for &i in indices {
            candidate[i] = value;
        }
        candidate
    }

    fn delete_blocks(&mut self) {
        for size in [8, 4, 2, 1] {
            let mut i = 0;
            while i + size <= self.best.choices.len() && !self.exhausted {
                let mut candidate = self.best.choices.clone();
                candidate.drain(i..i + size);
                if !self.consider(candidate) {
                    i += 1;
                }
            }
        }
    }

    fn coalesce_duplicates(&mut self) {
        let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, &choice) in self.best.choices.iter().enumerate() {
            if choice > 0 {
                groups.entry(choice).or_default().push(i);
            }
        }
        for (_, indices) in groups.into_iter().rev() {
            if self.exhausted {
                break;
            }
            if indices.len() >= 2 {
                self.lower_together(&indices);
            }
        }
    }

    fn reorder_spans(&mut self) {
        'restart: while !self.exhausted {
            let spans = self.best.spans.clone();
            for run in sibling_runs(&spans) {
                for pair in run.windows(2) {
                    let (a, b) = (spans[pair[0]], spans[pair[1]]);
                    let choices = &self.best.choices;
                    if b.end > choices.len() {
                        continue;
                    }
                    let mut candidate = Vec::with_capacity(choices.len());
                    candidate.extend_from_slice(&choices[..a.start]);
                    candidate.extend_from_slice(&choices[b.start..b.end]);
                    candidate.extend_from_slice(&choices[a.start..a.end]);
                    candidate.extend_from_slice(&choices[b.end..]);
                    if self.consider(candidate) {
                        continue 'restart;
                    }
                }
            }
            break;
        }
    }
}

/// Index of the enclosing span of each span, if any.
fn parents(spans: &[Span]) -> Vec<Option<usize>> {
    let mut open: Vec<usize> = Vec::new();
    spans
        .iter()
        .enumerate()
        .map(|(i, span)| {
            open.truncate(span.depth);
            let parent = span.depth.checked_sub(1).and_then(|d| open.get(d).copied());
            open.push(i);
            parent
        })
        .collect()
}

/// Maximal runs of non-empty, adjacent spans sharing a parent and a label.
fn sibling_runs(spans: &[Span]) -> Vec<Vec<usize>> {
    let parents = parents(spans);
    let mut groups: BTreeMap<(Option<usize>, &'static str), Vec<usize>> = BTreeMap::new();
    for (i, span) in spans.iter().enumerate() {
        if !span.is_empty() {
            groups.entry((parents[i], span.label)).or_default().push(i);
        }
    }

    let mut runs = Vec::new();
    for members in groups.into_values() {
        let mut run: Vec<usize> = Vec::new();
        for index in members {
            match run.last() {
                Some(&last) if spans[last].end == spans[index].start => run.push(index),
                _ => {
                    if run.len() >= 2 {
                        runs.push(std::mem::take(&mut run));
                    }
                    run = vec![index];
                }
            }
        }
        if run.len() >= 2 {
            runs.push(run);
        }
    }
    runs.sort_by_key(|run| spans[run[0]].start);
    runs
}
