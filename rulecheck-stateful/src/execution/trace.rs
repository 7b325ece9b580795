//! Execution trace of one sequence

use crate::bundle::{PoolEffect, Slot};
use std::fmt;

/// One executed rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub rule: String,
    /// Arguments as rendered for the reproduction script
    pub args: String,
    pub effects: Vec<PoolEffect>,
}

impl Step {
    /// Slot the step's return value was stored under
    pub fn produced(&self) -> Option<Slot> {
        self.effects.iter().find_map(|effect| match effect {
            PoolEffect::Produced { slot, .. } => Some(*slot),
            _ => None,
        })
    }

    /// Slots this step removed from their pools
    pub fn consumed(&self) -> impl Iterator<Item = Slot> + '_ {
        self.effects.iter().filter_map(|effect| match effect {
            PoolEffect::Consumed { slot, .. } => Some(*slot),
            _ => None,
        })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(slot) = self.produced() {
            write!(f, "{slot} = ")?;
        }
        write!(f, "{}({})", self.rule, self.args)
    }
}
