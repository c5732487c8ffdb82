//! The suspendable body a generator drives.
//!
//! A body is an explicit state object: every resumption is a transition from
//! its current label and locals plus an injected value or error to the next
//! suspension effect. Nothing here depends on native stack switching.

use crate::core::Value;
use crate::error::GeneratorError;

/// How control re-enters the body at a suspension point.
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    Normal(Value),
    Throw(Value),
    /// Forced return, only delivered at a yield point while a cleanup path is pending.
    Return(Value),
}

impl Completion {
    pub fn value(&self) -> &Value {
        match self {
            Completion::Normal(v) | Completion::Throw(v) | Completion::Return(v) => v,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resume {
    /// First run, with the argument of the first `next`.
    Start(Value),
    /// Re-entry at a `yield` (or `yield*`) point.
    Yield(Completion),
    /// Re-entry at an `await` point with the settled value or rejection.
    Await(Completion),
}

/// Effect produced when the body suspends or finishes.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    Yielded(Value),
    Awaited(Value),
    /// `yield*` over the given iterable.
    Delegated(Value),
    Returned(Value),
    Threw(Value),
}

pub trait Body {
    /// Advance to the next suspension point.
    ///
    /// `Err(GeneratorError::Throw)` is treated like `Ok(Step::Threw)`. Any other
    /// error means the body refused this resumption; only the request that
    /// triggered it is rejected.
    fn resume(&mut self, resume: Resume) -> Result<Step, GeneratorError>;

    /// Whether a `return` delivered at the current yield point has to run
    /// body code (an unwind handler) before the generator can complete.
    fn has_cleanup(&self) -> bool {
        false
    }

    fn start(&mut self, value: Value) -> Result<Step, GeneratorError> {
        self.resume(Resume::Start(value))
    }

    fn resume_at_yield(&mut self, value: Value) -> Result<Step, GeneratorError> {
        self.resume(Resume::Yield(Completion::Normal(value)))
    }

    fn throw_at_yield(&mut self, error: Value) -> Result<Step, GeneratorError> {
        self.resume(Resume::Yield(Completion::Throw(error)))
    }

    fn resume_at_await(&mut self, value: Value) -> Result<Step, GeneratorError> {
        self.resume(Resume::Await(Completion::Normal(value)))
    }

    fn throw_at_await(&mut self, error: Value) -> Result<Step, GeneratorError> {
        self.resume(Resume::Await(Completion::Throw(error)))
    }
}

impl<B: Body + ?Sized> Body for Box<B> {
    fn resume(&mut self, resume: Resume) -> Result<Step, GeneratorError> {
        (**self).resume(resume)
    }

    fn has_cleanup(&self) -> bool {
        (**self).has_cleanup()
    }
}

/// A body backed by a closure over its own program counter and locals.
pub struct FnBody<F> {
    f: F,
    cleanup: bool,
}

pub fn from_fn<F>(f: F) -> FnBody<F>
where
    F: FnMut(Resume) -> Result<Step, GeneratorError>,
{
    FnBody { f, cleanup: false }
}

impl<F> FnBody<F> {
    /// Route `return` requests through the closure as `Completion::Return`.
    pub fn with_cleanup(mut self) -> Self {
        self.cleanup = true;
        self
    }
}

impl<F> Body for FnBody<F>
where
    F: FnMut(Resume) -> Result<Step, GeneratorError>,
{
    fn resume(&mut self, resume: Resume) -> Result<Step, GeneratorError> {
        (self.f)(resume)
    }

    fn has_cleanup(&self) -> bool {
        self.cleanup
    }
}
