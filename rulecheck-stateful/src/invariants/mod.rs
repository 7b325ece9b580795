//! Invariant checking for stateful tests

use crate::error::{OperationError, catch_panic};
use std::fmt;
use std::marker::PhantomData;

/// A property of the machine that must hold after every step
pub trait Invariant<M>: Send + Sync {
    /// Check the invariant, explaining a violation in the error
    fn check(&self, machine: &M) -> Result<(), OperationError>;

    fn name(&self) -> &str;
}

/// Invariant defined by a predicate
pub struct FnInvariant<M, F> {
    name: String,
    check_fn: F,
    _phantom: PhantomData<fn(&M)>,
}

impl<M, F> FnInvariant<M, F>
where
    F: Fn(&M) -> bool,
{
    pub fn new(name: impl Into<String>, check_fn: F) -> Self {
        Self {
            name: name.into(),
            check_fn,
            _phantom: PhantomData,
        }
    }
}

impl<M, F> Invariant<M> for FnInvariant<M, F>
where
    F: Fn(&M) -> bool + Send + Sync,
{
    fn check(&self, machine: &M) -> Result<(), OperationError> {
        if (self.check_fn)(machine) {
            Ok(())
        } else {
            Err(OperationError::assertion(format!("{} does not hold", self.name)))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Invariant whose body reports its own failures, typically with [`ensure`](crate::ensure)
pub struct CheckInvariant<M, F> {
    name: String,
    check_fn: F,
    _phantom: PhantomData<fn(&M)>,
}

impl<M, F> CheckInvariant<M, F>
where
    F: Fn(&M) -> Result<(), OperationError>,
{
    pub fn new(name: impl Into<String>, check_fn: F) -> Self {
        Self {
            name: name.into(),
            check_fn,
            _phantom: PhantomData,
        }
    }
}

impl<M, F> Invariant<M> for CheckInvariant<M, F>
where
    F: Fn(&M) -> Result<(), OperationError> + Send + Sync,
{
    fn check(&self, machine: &M) -> Result<(), OperationError> {
        (self.check_fn)(machine)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Invariants checked in registration order
pub struct InvariantSet<M: 'static> {
    invariants: Vec<Box<dyn Invariant<M>>>,
}

impl<M> InvariantSet<M> {
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    pub fn add<I: Invariant<M> + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    pub fn add_fn<F>(&mut self, name: impl Into<String>, check_fn: F)
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.add(FnInvariant::new(name, check_fn));
    }

    pub fn add_check<F>(&mut self, name: impl Into<String>, check_fn: F)
    where
        F: Fn(&M) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        self.add(CheckInvariant::new(name, check_fn));
    }

    /// Check every invariant, stopping at the first violation
    ///
    /// A panicking invariant counts as violated.
    pub fn check_all(&self, machine: &M) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            let outcome = catch_panic(|| invariant.check(machine)).and_then(|checked| checked);
            if let Err(error) = outcome {
                return Err(InvariantViolation {
                    name: invariant.name().to_string(),
                    error,
                });
            }
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.invariants.iter().map(|invariant| invariant.name())
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

impl<M> Default for InvariantSet<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// An invariant that did not hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub name: String,
    pub error: OperationError,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant '{}' violated: {}", self.name, self.error)
    }
}

impl std::error::Error for InvariantViolation {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ensure;

    struct Counter {
        value: i32,
    }

    #[test]
    fn test_fn_invariant() {
        let inv = FnInvariant::new("non_negative", |counter: &Counter| counter.value >= 0);

        assert!(inv.check(&Counter { value: 5 }).is_ok());
        let err = inv.check(&Counter { value: -1 }).unwrap_err();
        assert_eq!(err.message(), "non_negative does not hold");
    }

    #[test]
    fn test_invariant_set() {
        let mut set = InvariantSet::new();
        set.add_fn("non_negative", |counter: &Counter| counter.value >= 0);
        set.add_check("small", |counter: &Counter| {
            ensure(counter.value < 100, format!("{} is too large", counter.value))
        });

        assert_eq!(set.len(), 2);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["non_negative", "small"]);
        assert!(set.check_all(&Counter { value: 50 }).is_ok());

        let violation = set.check_all(&Counter { value: 150 }).unwrap_err();
        assert_eq!(violation.name, "small");
        assert_eq!(violation.error.message(), "150 is too large");

        let violation = set.check_all(&Counter { value: -1 }).unwrap_err();
        assert_eq!(violation.name, "non_negative");
    }

    #[test]
    fn test_panicking_invariant_is_a_violation() {
        let mut set = InvariantSet::new();
        set.add_fn("explodes", |_: &Counter| panic!("invariant blew up"));

        let violation = set.check_all(&Counter { value: 0 }).unwrap_err();
        assert_eq!(violation.name, "explodes");
        assert_eq!(violation.error.kind(), OperationError::PANIC);
        assert_eq!(violation.error.message(), "invariant blew up");
        assert!(violation.error.site().unwrap().file.contains("invariants"));
    }
}
