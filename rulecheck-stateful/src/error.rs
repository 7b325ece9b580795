//! Errors raised by rule bodies, and the failures they turn into.

use crate::report::FailureReport;
use rulecheck::ConfigError;
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location, catch_unwind};
use std::sync::Once;
use thiserror::Error;

/// Source location an error was raised from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Site {
    pub file: Cow<'static, str>,
    pub line: u32,
    pub column: u32,
}

impl Site {
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: Cow::Borrowed(location.file()),
            line: location.line(),
            column: location.column(),
        }
    }

    fn of(location: &Location<'_>) -> Self {
        Self {
            file: Cow::Owned(location.file().to_string()),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An error type of the system under test
///
/// `kind` is what expected-failure rules match on. Any `DomainError` can be
/// propagated out of a rule body with `?`.
pub trait DomainError: std::error::Error {
    fn kind(&self) -> &str;
}

/// Why a rule body did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("{kind}: {message}")]
    Raised {
        kind: String,
        message: String,
        site: Site,
    },
    #[error("assertion failed: {message}")]
    Assertion { message: String, site: Site },
    #[error("panicked: {message}")]
    Panicked {
        message: String,
        /// Where the panic was raised, when the panic hook saw it
        site: Option<Site>,
    },
}

impl OperationError {
    pub const ASSERTION: &'static str = "assertion";
    pub const PANIC: &'static str = "panic";

    /// A domain error of the given kind raised at the caller
    #[track_caller]
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            kind: kind.into(),
            message: message.into(),
            site: Site::caller(),
        }
    }

    #[track_caller]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
            site: Site::caller(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Raised { kind, .. } => kind,
            Self::Assertion { .. } => Self::ASSERTION,
            Self::Panicked { .. } => Self::PANIC,
        }
    }

    pub fn site(&self) -> Option<&Site> {
        match self {
            Self::Raised { site, .. } | Self::Assertion { site, .. } => Some(site),
            Self::Panicked { site, .. } => site.as_ref(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Raised { message, .. }
            | Self::Assertion { message, .. }
            | Self::Panicked { message, .. } => message,
        }
    }
}

impl<E: DomainError> From<E> for OperationError {
    #[track_caller]
    fn from(error: E) -> Self {
        Self::Raised {
            kind: error.kind().to_string(),
            message: error.to_string(),
            site: Site::caller(),
        }
    }
}

/// Fail the step with `message` unless `condition` holds
#[track_caller]
pub fn ensure(condition: bool, message: impl fmt::Display) -> Result<(), OperationError> {
    if condition {
        Ok(())
    } else {
        Err(OperationError::assertion(message.to_string()))
    }
}

/// Fail the step unless the system's answer matches the model's
#[track_caller]
pub fn ensure_eq<T: PartialEq + fmt::Debug>(
    actual: T,
    expected: T,
    context: impl fmt::Display,
) -> Result<(), OperationError> {
    if actual == expected {
        Ok(())
    } else {
        Err(OperationError::assertion(format!(
            "{context}: got {actual:?}, model expects {expected:?}"
        )))
    }
}

/// Classification of a failing sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A domain error escaped a rule that did not expect it
    Raised(String),
    Assertion,
    Panic,
    /// A rule declared to fail with `expected` returned normally
    UnexpectedSuccess { expected: String },
    /// A rule declared to fail with `expected` failed with `actual` instead
    WrongFailure { expected: String, actual: String },
    /// The named invariant did not hold after a step
    Invariant(String),
}

impl FailureKind {
    fn tag(&self) -> String {
        match self {
            Self::Raised(kind) => format!("raised:{kind}"),
            Self::Assertion => "assertion".to_string(),
            Self::Panic => "panic".to_string(),
            Self::UnexpectedSuccess { expected } => format!("unexpected-success:{expected}"),
            Self::WrongFailure { expected, actual } => format!("wrong-failure:{expected}:{actual}"),
            Self::Invariant(name) => format!("invariant:{name}"),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(kind) => write!(f, "unexpected {kind} error"),
            Self::Assertion => f.write_str("assertion failure"),
            Self::Panic => f.write_str("panic"),
            Self::UnexpectedSuccess { expected } => {
                write!(f, "expected a {expected} error, but the call succeeded")
            }
            Self::WrongFailure { expected, actual } => {
                write!(f, "expected a {expected} error, got {actual}")
            }
            Self::Invariant(name) => write!(f, "invariant '{name}' violated"),
        }
    }
}

/// Identity of a failure, stable across shrinking
///
/// Two failures are the same bug when kind and site agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureSignature {
    pub kind: String,
    pub site: String,
}

impl fmt::Display for FailureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.site)
    }
}

/// A sequence-ending failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Source location of the error or panic, otherwise the rule, invariant or `prepare`
    pub site: String,
    /// Index of the failing step, `None` when the initial state was already broken
    pub step: Option<usize>,
}

impl Failure {
    /// Failure for an operation error escaping `rule`
    pub(crate) fn operation(rule: &str, error: OperationError, step: usize) -> Self {
        let site = site_or_rule(&error, rule);
        let kind = match &error {
            OperationError::Raised { kind, .. } => FailureKind::Raised(kind.clone()),
            OperationError::Assertion { .. } => FailureKind::Assertion,
            OperationError::Panicked { .. } => FailureKind::Panic,
        };
        Self {
            kind,
            message: error.message().to_string(),
            site,
            step: Some(step),
        }
    }

    pub(crate) fn unexpected_success(rule: &str, expected: &str, step: usize) -> Self {
        Self {
            kind: FailureKind::UnexpectedSuccess {
                expected: expected.to_string(),
            },
            message: format!("{rule} returned normally"),
            site: format!("rule:{rule}"),
            step: Some(step),
        }
    }

    pub(crate) fn wrong_failure(
        rule: &str,
        expected: &str,
        error: OperationError,
        step: usize,
    ) -> Self {
        Self {
            kind: FailureKind::WrongFailure {
                expected: expected.to_string(),
                actual: error.kind().to_string(),
            },
            message: error.message().to_string(),
            site: site_or_rule(&error, rule),
            step: Some(step),
        }
    }

    /// Failure for an invariant that did not hold
    ///
    /// A panicking invariant is told apart by where it panicked.
    pub(crate) fn invariant(name: &str, error: &OperationError, step: Option<usize>) -> Self {
        Self {
            kind: FailureKind::Invariant(name.to_string()),
            message: error.message().to_string(),
            site: panic_site(format!("invariant:{name}"), error),
            step,
        }
    }

    /// Panic raised while checking a precondition
    pub(crate) fn precondition(rule: &str, error: &OperationError, step: usize) -> Self {
        Self {
            kind: FailureKind::Panic,
            message: error.message().to_string(),
            site: panic_site(format!("precondition:{rule}"), error),
            step: Some(step),
        }
    }

    /// Panic raised by `StateMachine::prepare`, before any step
    pub(crate) fn prepare(error: &OperationError) -> Self {
        Self {
            kind: FailureKind::Panic,
            message: error.message().to_string(),
            site: panic_site("prepare".to_string(), error),
            step: None,
        }
    }

    pub fn signature(&self) -> FailureSignature {
        FailureSignature {
            kind: self.kind.tag(),
            site: self.site.clone(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.site)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Why a stateful test run did not pass
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no rules registered")]
    NoRules,
    #[error("rule name '{0}' is registered twice")]
    DuplicateRule(String),
    #[error("bundle '{bundle}' is used with two value types: {first} and {second}")]
    BundleTypeMismatch {
        bundle: String,
        first: &'static str,
        second: &'static str,
    },
    #[error("unable to generate valid examples: {invalid} invalid, {valid} valid")]
    Unsatisfiable { valid: usize, invalid: usize },
    #[error("{0}")]
    Failed(Box<FailureReport>),
}

impl RunError {
    /// The failure report, when the run found a failing sequence
    pub fn report(&self) -> Option<&FailureReport> {
        match self {
            Self::Failed(report) => Some(report),
            _ => None,
        }
    }
}

fn site_or_rule(error: &OperationError, rule: &str) -> String {
    error
        .site()
        .map_or_else(|| format!("rule:{rule}"), ToString::to_string)
}

fn panic_site(base: String, error: &OperationError) -> String {
    match error {
        OperationError::Panicked {
            site: Some(site), ..
        } => format!("{base}@{site}"),
        _ => base,
    }
}

thread_local! {
    /// `Some` while `catch_panic` runs on this thread, holding the last panic location
    static PANIC_SITE: RefCell<Option<Option<Site>>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook that records panic locations for `catch_panic`
///
/// Panics raised outside `catch_panic` still reach the previous hook.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let captured = PANIC_SITE
                .try_with(|slot| match slot.try_borrow_mut() {
                    Ok(mut slot) => match slot.as_mut() {
                        Some(site) => {
                            *site = info.location().map(Site::of);
                            true
                        }
                        None => false,
                    },
                    Err(_) => false,
                })
                .unwrap_or(false);
            if !captured {
                previous(info);
            }
        }));
    });
}

/// Run `f`, turning a panic into [`OperationError::Panicked`] with its location
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, OperationError> {
    install_panic_hook();
    let outer = PANIC_SITE.with(|slot| slot.replace(Some(None)));
    let result = catch_unwind(AssertUnwindSafe(f));
    let site = PANIC_SITE.with(|slot| slot.replace(outer)).flatten();
    result.map_err(|payload| OperationError::Panicked {
        message: panic_message(payload.as_ref()),
        site,
    })
}

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
