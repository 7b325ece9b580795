//! Strategy-based generation on top of the choice stream.
//!
//! A strategy never sees a random number generator. It only reads choices
//! from a [`ChoiceStream`], so whatever makes the stream simpler also makes
//! the generated value simpler, and shrinking needs no per-type support.

use crate::choice::ChoiceStream;
use crate::error::DrawError;
use std::fmt;
use std::sync::Arc;

/// Number of attempts a [`Filter`] makes before giving up.
pub const MAX_FILTER_ATTEMPTS: usize = 100;

/// A recipe for drawing values of one type from a choice stream.
pub trait Strategy {
    /// The type of values this strategy produces
    type Value;

    /// Draw a value, consuming choices from `stream`
    fn draw(&self, stream: &mut ChoiceStream) -> Result<Self::Value, DrawError>;

    /// Map this strategy to produce values of a different type
    fn map<F, U>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Value) -> U,
    {
        Map {
            strategy: self,
            mapper: f,
        }
    }

    /// Keep only values accepted by `predicate`, retrying a bounded number of times
    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        Self: Sized,
        F: Fn(&Self::Value) -> bool,
    {
        Filter {
            strategy: self,
            predicate,
            max_attempts: MAX_FILTER_ATTEMPTS,
        }
    }

    /// Draw a value, then draw from the strategy it selects
    fn flat_map<F, S>(self, f: F) -> FlatMap<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Value) -> S,
        S: Strategy,
    {
        FlatMap {
            strategy: self,
            binder: f,
        }
    }

    /// Combine this strategy with another to produce tuples
    fn zip<S>(self, other: S) -> Zip<Self, S>
    where
        Self: Sized,
        S: Strategy,
    {
        Zip {
            left: self,
            right: other,
        }
    }

    /// Erase the concrete type behind a shared pointer
    fn boxed(self) -> BoxedStrategy<Self::Value>
    where
        Self: Sized + Send + Sync + 'static,
    {
        BoxedStrategy(Arc::new(self))
    }
}

impl<S: Strategy + ?Sized> Strategy for &S {
    type Value = S::Value;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<Self::Value, DrawError> {
        (**self).draw(stream)
    }
}

/// A type-erased, cheaply cloneable strategy
pub struct BoxedStrategy<T>(Arc<dyn Strategy<Value = T> + Send + Sync>);

impl<T> Clone for BoxedStrategy<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for BoxedStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxedStrategy")
    }
}

impl<T> Strategy for BoxedStrategy<T> {
    type Value = T;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<T, DrawError> {
        self.0.draw(stream)
    }
}

/// A strategy that maps values from one type to another
#[derive(Clone)]
pub struct Map<S, F> {
    strategy: S,
    mapper: F,
}

impl<S, F, U> Strategy for Map<S, F>
where
    S: Strategy,
    F: Fn(S::Value) -> U,
{
    type Value = U;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<U, DrawError> {
        self.strategy.draw(stream).map(&self.mapper)
    }
}

/// A strategy that filters values based on a predicate
///
/// Each attempt is drawn in its own `"filter"` span, so rejected attempts
/// can be deleted by the shrinker.
#[derive(Clone)]
pub struct Filter<S, F> {
    strategy: S,
    predicate: F,
    max_attempts: usize,
}

impl<S, F> Filter<S, F> {
    /// Override the retry budget
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

impl<S, F> Strategy for Filter<S, F>
where
    S: Strategy,
    F: Fn(&S::Value) -> bool,
{
    type Value = S::Value;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<S::Value, DrawError> {
        for _ in 0..self.max_attempts {
            stream.start_span("filter");
            let value = self.strategy.draw(stream);
            stream.stop_span();
            let value = value?;
            if (self.predicate)(&value) {
                return Ok(value);
            }
        }
        Err(DrawError::Unsatisfiable {
            attempts: self.max_attempts,
        })
    }
}

/// A strategy whose second draw depends on the value of the first
#[derive(Clone)]
pub struct FlatMap<S, F> {
    strategy: S,
    binder: F,
}

impl<S, F, T> Strategy for FlatMap<S, F>
where
    S: Strategy,
    F: Fn(S::Value) -> T,
    T: Strategy,
{
    type Value = T::Value;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<T::Value, DrawError> {
        let first = stream.draw(&self.strategy)?;
        let next = (self.binder)(first);
        stream.draw(&next)
    }
}

/// A strategy that combines two strategies to produce tuples
#[derive(Clone)]
pub struct Zip<L, R> {
    left: L,
    right: R,
}

impl<L, R> Strategy for Zip<L, R>
where
    L: Strategy,
    R: Strategy,
{
    type Value = (L::Value, R::Value);

    fn draw(&self, stream: &mut ChoiceStream) -> Result<Self::Value, DrawError> {
        let left = stream.draw(&self.left)?;
        let right = stream.draw(&self.right)?;
        Ok((left, right))
    }
}

/// A strategy that always produces the same value
#[derive(Debug, Clone)]
pub struct Just<T> {
    value: T,
}

impl<T: Clone> Strategy for Just<T> {
    type Value = T;

    fn draw(&self, _stream: &mut ChoiceStream) -> Result<T, DrawError> {
        Ok(self.value.clone())
    }
}

/// A strategy that picks one of a fixed list of values, shrinking towards the first
#[derive(Debug, Clone)]
pub struct SampledFrom<T> {
    values: Vec<T>,
}

impl<T: Clone> Strategy for SampledFrom<T> {
    type Value = T;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<T, DrawError> {
        let index = stream.draw_index(self.values.len())?;
        Ok(self.values[index].clone())
    }
}

/// A strategy that delegates to one of several strategies
#[derive(Debug, Clone)]
pub struct OneOf<T> {
    options: Vec<BoxedStrategy<T>>,
}

impl<T> Strategy for OneOf<T> {
    type Value = T;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<T, DrawError> {
        let index = stream.draw_index(self.options.len())?;
        stream.draw(&self.options[index])
    }
}

/// A strategy defined by a closure over the stream
#[derive(Clone)]
pub struct Composite<F> {
    body: F,
}

impl<F, T> Strategy for Composite<F>
where
    F: Fn(&mut ChoiceStream) -> Result<T, DrawError>,
{
    type Value = T;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<T, DrawError> {
        (self.body)(stream)
    }
}

/// Create a strategy that always produces `value`
pub fn just<T: Clone>(value: T) -> Just<T> {
    Just { value }
}

/// Create a strategy that picks one of `values`
pub fn sampled_from<T: Clone>(values: impl Into<Vec<T>>) -> SampledFrom<T> {
    SampledFrom {
        values: values.into(),
    }
}

/// Create a strategy that draws from one of `options`, shrinking towards the first
pub fn one_of<T>(options: Vec<BoxedStrategy<T>>) -> OneOf<T> {
    OneOf { options }
}

/// Create a strategy from a closure that draws sub-values from the stream
///
/// ```rust
/// use rulecheck::{composite, integers, ChoiceStream, Strategy};
///
/// let ordered_pair = composite(|s: &mut ChoiceStream| {
///     let low = s.draw(&integers(0i32, 100))?;
///     let high = s.draw(&integers(low, 100))?;
///     Ok((low, high))
/// });
///
/// let mut stream = ChoiceStream::replay(&[4, 2]);
/// assert_eq!(ordered_pair.draw(&mut stream).unwrap(), (4, 6));
/// ```
pub fn composite<F, T>(body: F) -> Composite<F>
where
    F: Fn(&mut ChoiceStream) -> Result<T, DrawError>,
{
    Composite { body }
}

macro_rules! tuple_strategy {
    ($($name:ident),+) => {
        #[allow(non_snake_case)]
        impl<$($name: Strategy),+> Strategy for ($($name,)+) {
            type Value = ($($name::Value,)+);

            fn draw(&self, stream: &mut ChoiceStream) -> Result<Self::Value, DrawError> {
                let ($($name,)+) = self;
                Ok(($(stream.draw($name)?,)+))
            }
        }
    };
}

tuple_strategy!(A);
tuple_strategy!(A, B);
tuple_strategy!(A, B, C);
tuple_strategy!(A, B, C, D);
tuple_strategy!(A, B, C, D, E);
