//! The system under test together with its model.

use crate::error::{OperationError, catch_panic};
use std::ops::{Deref, DerefMut};
use tracing::error;

/// A machine bundles the system under test with the model it is checked against
///
/// A fresh machine is built for every sequence. `prepare` runs before the
/// first step and `teardown` after the last one, exactly once each, including
/// when a step fails, panics or the run is aborted.
///
/// A panic in `prepare` fails the sequence before any step, and `teardown` is
/// then skipped: only prepared machines are torn down.
pub trait StateMachine: 'static {
    fn prepare(&mut self) {}

    fn teardown(&mut self) {}
}

/// Owns a prepared machine and tears it down when dropped
pub(crate) struct Running<M: StateMachine> {
    machine: M,
}

impl<M: StateMachine> Running<M> {
    /// Prepare `machine`; a panic in `prepare` is returned and the machine dropped
    pub(crate) fn start(mut machine: M) -> Result<Self, OperationError> {
        catch_panic(|| machine.prepare())?;
        Ok(Self { machine })
    }
}

impl<M: StateMachine> Deref for Running<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.machine
    }
}

impl<M: StateMachine> DerefMut for Running<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.machine
    }
}

impl<M: StateMachine> Drop for Running<M> {
    fn drop(&mut self) {
        let machine = &mut self.machine;
        if let Err(error) = catch_panic(|| machine.teardown()) {
            let site = error.site().map(ToString::to_string).unwrap_or_default();
            error!(message = error.message(), %site, "teardown panicked");
        }
    }
}
