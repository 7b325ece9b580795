//! Named pools of values produced by earlier steps.
//!
//! A rule targeting a [`Bundle`] stores its return value in that bundle's
//! pool; later rules draw from the pool by peeking (the value stays) or
//! consuming (the value is removed). Pools belong to one sequence and are
//! dropped with it.

use rulecheck::{ChoiceStream, DrawError};
use std::any::{Any, type_name};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed handle to a named pool
pub struct Bundle<T> {
    name: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Bundle<T> {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Argument reading a value from this bundle without removing it
    pub fn peek(&self) -> Peek<T> {
        Peek(self.clone())
    }

    /// Argument removing a value from this bundle
    pub fn consume(&self) -> Consume<T> {
        Consume(self.clone())
    }
}

impl<T> Clone for Bundle<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Bundle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bundle").field(&self.name).finish()
    }
}

/// Rule argument peeking at a bundle
#[derive(Debug, Clone)]
pub struct Peek<T>(pub(crate) Bundle<T>);

/// Rule argument consuming from a bundle
#[derive(Debug, Clone)]
pub struct Consume<T>(pub(crate) Bundle<T>);

/// Name under which a produced value appears in traces, `v0`, `v1`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub usize);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// What a step did to a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEffect {
    Produced { bundle: String, slot: Slot },
    Peeked { bundle: String, slot: Slot },
    Consumed { bundle: String, slot: Slot },
}

impl PoolEffect {
    pub fn bundle(&self) -> &str {
        match self {
            Self::Produced { bundle, .. }
            | Self::Peeked { bundle, .. }
            | Self::Consumed { bundle, .. } => bundle,
        }
    }

    pub fn slot(&self) -> Slot {
        match self {
            Self::Produced { slot, .. } | Self::Peeked { slot, .. } | Self::Consumed { slot, .. } => {
                *slot
            }
        }
    }
}

impl fmt::Display for PoolEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Produced { bundle, slot } => write!(f, "{slot} -> {bundle}"),
            Self::Peeked { bundle, slot } => write!(f, "{bundle} -> {slot}"),
            Self::Consumed { bundle, slot } => write!(f, "{bundle} -x {slot}"),
        }
    }
}

/// Usage counters of one pool
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub puts: usize,
    pub peeks: usize,
    pub consumes: usize,
}

impl std::ops::AddAssign for PoolStats {
    fn add_assign(&mut self, other: Self) {
        self.puts += other.puts;
        self.peeks += other.peeks;
        self.consumes += other.consumes;
    }
}

struct Entry {
    slot: Slot,
    value: Box<dyn Any>,
}

/// Every pool of one sequence
#[derive(Default)]
pub struct Pools {
    pools: HashMap<Arc<str>, Vec<Entry>>,
    stats: BTreeMap<Arc<str>, PoolStats>,
    next_slot: usize,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` in `bundle`, returning the slot it was filed under
    pub fn put<T: 'static>(&mut self, bundle: &Bundle<T>, value: T) -> Slot {
        let slot = Slot(self.next_slot);
        self.next_slot += 1;
        self.pools.entry(bundle.shared_name()).or_default().push(Entry {
            slot,
            value: Box::new(value),
        });
        self.stats.entry(bundle.shared_name()).or_default().puts += 1;
        slot
    }

    /// Number of values currently held by the named pool
    pub fn len(&self, bundle: &str) -> usize {
        self.pools.get(bundle).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, bundle: &str) -> bool {
        self.len(bundle) == 0
    }

    /// Draw a value from `bundle`, leaving it in place
    pub fn peek<T: Clone + 'static>(
        &mut self,
        bundle: &Bundle<T>,
        stream: &mut ChoiceStream,
    ) -> Result<(Slot, T), DrawError> {
        let position = self.pick(bundle.name(), stream)?;
        let entry = &self.pools[bundle.name()][position];
        let value = downcast::<T>(bundle.name(), entry.value.as_ref())?.clone();
        let slot = entry.slot;
        self.stats.entry(bundle.shared_name()).or_default().peeks += 1;
        Ok((slot, value))
    }

    /// Draw a value from `bundle` and remove it
    pub fn consume<T: 'static>(
        &mut self,
        bundle: &Bundle<T>,
        stream: &mut ChoiceStream,
    ) -> Result<(Slot, T), DrawError> {
        let position = self.pick(bundle.name(), stream)?;
        let entries = self
            .pools
            .get_mut(bundle.name())
            .ok_or_else(|| unavailable(bundle.name()))?;
        downcast::<T>(bundle.name(), entries[position].value.as_ref())?;
        let entry = entries.remove(position);
        let value = entry
            .value
            .downcast::<T>()
            .map_err(|_| mismatch::<T>(bundle.name()))?;
        self.stats.entry(bundle.shared_name()).or_default().consumes += 1;
        Ok((entry.slot, *value))
    }

    pub fn stats(&self, bundle: &str) -> PoolStats {
        self.stats.get(bundle).copied().unwrap_or_default()
    }

    /// Counters of every pool touched so far, by bundle name
    pub fn all_stats(&self) -> BTreeMap<String, PoolStats> {
        self.stats
            .iter()
            .map(|(name, stats)| (name.to_string(), *stats))
            .collect()
    }

    // Index 0 is the most recent value, so shrinking prefers fresh values.
    fn pick(&self, bundle: &str, stream: &mut ChoiceStream) -> Result<usize, DrawError> {
        let len = self.len(bundle);
        if len == 0 {
            return Err(unavailable(bundle));
        }
        let back = stream.draw_index(len)?;
        Ok(len - 1 - back)
    }
}

impl fmt::Debug for Pools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes: BTreeMap<&str, usize> = self
            .pools
            .iter()
            .map(|(name, entries)| (name.as_ref(), entries.len()))
            .collect();
        f.debug_struct("Pools")
            .field("sizes", &sizes)
            .field("next_slot", &self.next_slot)
            .finish()
    }
}

fn downcast<'a, T: 'static>(bundle: &str, value: &'a dyn Any) -> Result<&'a T, DrawError> {
    value.downcast_ref::<T>().ok_or_else(|| mismatch::<T>(bundle))
}

fn unavailable(bundle: &str) -> DrawError {
    DrawError::PoolUnavailable {
        bundle: bundle.to_string(),
    }
}

fn mismatch<T>(bundle: &str) -> DrawError {
    DrawError::InvalidArgument(format!(
        "bundle '{bundle}' does not hold values of type {}",
        type_name::<T>()
    ))
}
