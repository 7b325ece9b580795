//! Rule arguments: values drawn from strategies or taken from bundles.

use crate::bundle::{Bundle, Consume, Peek, PoolEffect, Pools, Slot};
use rulecheck::{ChoiceStream, DrawError, Strategy};
use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;

/// How a rule touches a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Peek,
    Consume,
    Produce,
}

/// A bundle a rule reads from or writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub bundle: Arc<str>,
    pub access: Access,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl Requirement {
    pub(crate) fn new<T: 'static>(bundle: &Bundle<T>, access: Access) -> Self {
        Self {
            bundle: bundle.shared_name(),
            access,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

/// Everything an argument may draw from during one step
pub struct DrawContext<'a> {
    stream: &'a mut ChoiceStream,
    pools: &'a mut Pools,
    effects: &'a mut Vec<PoolEffect>,
}

impl<'a> DrawContext<'a> {
    pub(crate) fn new(
        stream: &'a mut ChoiceStream,
        pools: &'a mut Pools,
        effects: &'a mut Vec<PoolEffect>,
    ) -> Self {
        Self {
            stream,
            pools,
            effects,
        }
    }

    pub fn draw<S: Strategy + ?Sized>(&mut self, strategy: &S) -> Result<S::Value, DrawError> {
        self.stream.draw(strategy)
    }

    pub fn peek<T: Clone + 'static>(&mut self, bundle: &Bundle<T>) -> Result<(Slot, T), DrawError> {
        let (slot, value) = self.pools.peek(bundle, self.stream)?;
        self.effects.push(PoolEffect::Peeked {
            bundle: bundle.name().to_string(),
            slot,
        });
        Ok((slot, value))
    }

    pub fn consume<T: 'static>(&mut self, bundle: &Bundle<T>) -> Result<(Slot, T), DrawError> {
        let (slot, value) = self.pools.consume(bundle, self.stream)?;
        self.effects.push(PoolEffect::Consumed {
            bundle: bundle.name().to_string(),
            slot,
        });
        Ok((slot, value))
    }
}

/// A drawn argument and how it is rendered in traces
#[derive(Debug, Clone, PartialEq)]
pub struct Drawn<V> {
    pub value: V,
    pub shown: String,
}

/// Something a rule takes as input
pub trait Arg: Send + Sync + 'static {
    type Value: 'static;

    /// Bundles this argument draws from
    fn requirements(&self, out: &mut Vec<Requirement>);

    fn draw_arg(&self, ctx: &mut DrawContext<'_>) -> Result<Drawn<Self::Value>, DrawError>;
}

impl Arg for () {
    type Value = ();

    fn requirements(&self, _out: &mut Vec<Requirement>) {}

    fn draw_arg(&self, _ctx: &mut DrawContext<'_>) -> Result<Drawn<()>, DrawError> {
        Ok(Drawn {
            value: (),
            shown: String::new(),
        })
    }
}

impl<T: Clone + 'static> Arg for Peek<T> {
    type Value = T;

    fn requirements(&self, out: &mut Vec<Requirement>) {
        out.push(Requirement::new(&self.0, Access::Peek));
    }

    fn draw_arg(&self, ctx: &mut DrawContext<'_>) -> Result<Drawn<T>, DrawError> {
        let (slot, value) = ctx.peek(&self.0)?;
        Ok(Drawn {
            value,
            shown: slot.to_string(),
        })
    }
}

impl<T: 'static> Arg for Consume<T> {
    type Value = T;

    fn requirements(&self, out: &mut Vec<Requirement>) {
        out.push(Requirement::new(&self.0, Access::Consume));
    }

    fn draw_arg(&self, ctx: &mut DrawContext<'_>) -> Result<Drawn<T>, DrawError> {
        let (slot, value) = ctx.consume(&self.0)?;
        Ok(Drawn {
            value,
            shown: slot.to_string(),
        })
    }
}

/// Argument drawn from a strategy
#[derive(Debug, Clone)]
pub struct Draws<S>(S);

/// Use `strategy` as a rule argument
pub fn draws<S: Strategy>(strategy: S) -> Draws<S> {
    Draws(strategy)
}

impl<S> Arg for Draws<S>
where
    S: Strategy + Send + Sync + 'static,
    S::Value: fmt::Debug + 'static,
{
    type Value = S::Value;

    fn requirements(&self, _out: &mut Vec<Requirement>) {}

    fn draw_arg(&self, ctx: &mut DrawContext<'_>) -> Result<Drawn<S::Value>, DrawError> {
        let value = ctx.draw(&self.0)?;
        let shown = format!("{value:?}");
        Ok(Drawn { value, shown })
    }
}

/// Argument rendered as `name=value` in traces
#[derive(Debug, Clone)]
pub struct Named<A> {
    name: &'static str,
    inner: A,
}

pub fn named<A: Arg>(name: &'static str, inner: A) -> Named<A> {
    Named { name, inner }
}

impl<A: Arg> Arg for Named<A> {
    type Value = A::Value;

    fn requirements(&self, out: &mut Vec<Requirement>) {
        self.inner.requirements(out);
    }

    fn draw_arg(&self, ctx: &mut DrawContext<'_>) -> Result<Drawn<A::Value>, DrawError> {
        let drawn = self.inner.draw_arg(ctx)?;
        Ok(Drawn {
            value: drawn.value,
            shown: format!("{}={}", self.name, drawn.shown),
        })
    }
}

macro_rules! tuple_arg {
    ($($name:ident),+) => {
        impl<$($name: Arg),+> Arg for ($($name,)+) {
            type Value = ($($name::Value,)+);

            fn requirements(&self, out: &mut Vec<Requirement>) {
                #[allow(non_snake_case)]
                let ($($name,)+) = self;
                $($name.requirements(out);)+
            }

            fn draw_arg(&self, ctx: &mut DrawContext<'_>) -> Result<Drawn<Self::Value>, DrawError> {
                #[allow(non_snake_case)]
                let ($($name,)+) = self;
                let mut shown = Vec::new();
                #[allow(non_snake_case)]
                let value = ($({
                    let drawn = $name.draw_arg(ctx)?;
                    shown.push(drawn.shown);
                    drawn.value
                },)+);
                Ok(Drawn {
                    value,
                    shown: shown.join(", "),
                })
            }
        }
    };
}

tuple_arg!(A);
tuple_arg!(A, B);
tuple_arg!(A, B, C);
tuple_arg!(A, B, C, D);
tuple_arg!(A, B, C, D, E);
