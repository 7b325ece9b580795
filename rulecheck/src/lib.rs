//! # rulecheck
//!
//! The generation and shrinking core used by `rulecheck-stateful`.
//!
//! Every value is drawn from a [`ChoiceStream`], a recorded list of primitive
//! choices. Replaying the same choices gives the same values, and editing the
//! choices towards smaller words gives simpler values. The [`Shrinker`] relies
//! on exactly that: it never needs to know what was generated.
//!
//! ## Quick Start
//!
//! ```rust
//! use rulecheck::{integers, vecs, ChoiceStream, Strategy};
//!
//! let lists = vecs(integers(0i32, 100), 0, 5);
//!
//! // A recorded stream: length 2, then the two elements.
//! let mut stream = ChoiceStream::replay(&[2, 10, 20]);
//! assert_eq!(lists.draw(&mut stream).unwrap(), vec![10, 20]);
//! ```

pub mod choice;
pub mod config;
pub mod database;
pub mod error;
pub mod primitives;
pub mod rng;
pub mod shrink;
pub mod strategy;

pub use choice::{
    ChoiceStream, DEFAULT_MAX_CHOICES, Span, decode_choices, encode_choices, is_simpler,
    shortlex_cmp,
};
pub use config::{ConfigError, GlobalConfig, TestConfig, get_global_config, set_global_config};
pub use database::{
    DatabaseKey, DatabaseResult, DirectoryDatabase, ExampleDatabase, InMemoryDatabase,
};
pub use error::{DatabaseError, DecodeError, DrawError};
pub use primitives::*;
pub use rng::{RunSeed, fresh_seed};
pub use shrink::{ShrinkConfig, ShrinkResult, Shrinker, Status, TestCase};
pub use strategy::{
    BoxedStrategy, Composite, Filter, FlatMap, Just, MAX_FILTER_ATTEMPTS, Map, OneOf,
    SampledFrom, Strategy, Zip, composite, just, one_of, sampled_from,
};
