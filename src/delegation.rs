//! `yield*` support: the sources a body can delegate to and the driver that
//! forwards requests into them.
//!
//! Optional capabilities are explicit. A source returns `None` from `throw` or
//! `return` when it does not provide that method, and the driver turns that
//! into a `TypeError` at the `yield*` point.

use crate::async_generator::{AsyncGenerator, GeneratorState};
use crate::awaiting::await_value;
use crate::body::{Completion, Resume};
use crate::core::{IterResult, Value};
use crate::error::GeneratorError;
use crate::generator::Generator;
use crate::promise::Promise;
use crate::queue::RequestKind;
use crate::raise_type_error;
use std::cell::RefCell;
use std::rc::Rc;

pub trait SyncSource {
    fn next(&mut self, value: Value) -> Result<IterResult, Value>;

    fn throw(&mut self, _error: Value) -> Option<Result<IterResult, Value>> {
        None
    }

    fn r#return(&mut self, _value: Value) -> Option<Result<IterResult, Value>> {
        None
    }
}

pub trait AsyncSource {
    fn next(&mut self, value: Value) -> Promise;

    fn throw(&mut self, _error: Value) -> Option<Promise> {
        None
    }

    fn r#return(&mut self, _value: Value) -> Option<Promise> {
        None
    }
}

impl<T: SyncSource + ?Sized> SyncSource for Rc<RefCell<T>> {
    fn next(&mut self, value: Value) -> Result<IterResult, Value> {
        self.borrow_mut().next(value)
    }

    fn throw(&mut self, error: Value) -> Option<Result<IterResult, Value>> {
        self.borrow_mut().throw(error)
    }

    fn r#return(&mut self, value: Value) -> Option<Result<IterResult, Value>> {
        self.borrow_mut().r#return(value)
    }
}

impl<T: AsyncSource + ?Sized> AsyncSource for Rc<RefCell<T>> {
    fn next(&mut self, value: Value) -> Promise {
        self.borrow_mut().next(value)
    }

    fn throw(&mut self, error: Value) -> Option<Promise> {
        self.borrow_mut().throw(error)
    }

    fn r#return(&mut self, value: Value) -> Option<Promise> {
        self.borrow_mut().r#return(value)
    }
}

/// Iterates a list of values. Like an array iterator it has only `next`.
pub struct ArraySource {
    items: std::vec::IntoIter<Value>,
}

impl ArraySource {
    pub fn new(items: Vec<Value>) -> Self {
        ArraySource { items: items.into_iter() }
    }
}

impl SyncSource for ArraySource {
    fn next(&mut self, _value: Value) -> Result<IterResult, Value> {
        Ok(match self.items.next() {
            Some(v) => IterResult::yielded(v),
            None => IterResult::done(),
        })
    }
}

pub enum DelegateSource {
    Sync(Box<dyn SyncSource>),
    Async(Box<dyn AsyncSource>),
}

enum InnerResult {
    Ready(Result<IterResult, Value>),
    Pending(Promise),
}

/// Resolve a synchronously iterable value to its source.
pub fn sync_source(value: Value) -> Result<Box<dyn SyncSource>, GeneratorError> {
    match value {
        Value::Array(items) => Ok(Box::new(ArraySource::new(items))),
        Value::String(s) => Ok(Box::new(ArraySource::new(s.chars().map(|c| Value::String(c.to_string())).collect()))),
        Value::Generator(g) => Ok(Box::new(g)),
        Value::Iterator(it) => Ok(Box::new(it)),
        _ => Err(raise_type_error!("Value is not iterable")),
    }
}

impl DelegateSource {
    pub fn from_value(value: Value) -> Result<Self, GeneratorError> {
        match value {
            Value::AsyncGenerator(g) => Ok(DelegateSource::Async(Box::new(g))),
            Value::AsyncIterator(it) => Ok(DelegateSource::Async(Box::new(it))),
            other => sync_source(other).map(DelegateSource::Sync),
        }
    }

    fn call(&mut self, kind: RequestKind, input: Value) -> Option<InnerResult> {
        match self {
            DelegateSource::Sync(source) => {
                let result = match kind {
                    RequestKind::Next => Some(source.next(input)),
                    RequestKind::Throw => source.throw(input),
                    RequestKind::Return => source.r#return(input),
                };
                result.map(InnerResult::Ready)
            }
            DelegateSource::Async(source) => {
                let promise = match kind {
                    RequestKind::Next => Some(source.next(input)),
                    RequestKind::Throw => source.throw(input),
                    RequestKind::Return => source.r#return(input),
                };
                promise.map(InnerResult::Pending)
            }
        }
    }

    /// Give the source a chance to clean up; its result is ignored.
    pub(crate) fn close(&mut self) {
        match self {
            DelegateSource::Sync(source) => {
                let _ = source.r#return(Value::Undefined);
            }
            DelegateSource::Async(source) => {
                if let Some(p) = source.r#return(Value::Undefined) {
                    p.mark_handled();
                }
            }
        }
    }
}

/// Enter delegation over `iterable` and forward the first `next`.
pub(crate) fn begin(generator: &AsyncGenerator, iterable: Value) {
    match DelegateSource::from_value(iterable) {
        Ok(source) => {
            log::debug!("async generator #{} delegating", generator.id());
            generator.set_delegate(Some(source));
            forward(generator, RequestKind::Next, Value::Undefined);
        }
        Err(err) => generator.run(Resume::Yield(Completion::Throw(err.into_value()))),
    }
}

/// Hand the in-flight request to the inner source.
pub(crate) fn forward(generator: &AsyncGenerator, kind: RequestKind, input: Value) {
    let Some(mut source) = generator.take_delegate() else {
        generator.run(Resume::Yield(Completion::Normal(input)));
        return;
    };
    generator.set_state(GeneratorState::Executing);

    match source.call(kind, input) {
        None => {
            log::warn!(
                "async generator #{}: delegate has no '{}' method",
                generator.id(),
                kind.method_name()
            );
            if kind == RequestKind::Throw {
                source.close();
            }
            drop(source);
            let message = format!("The iterator does not provide a '{}' method", kind.method_name());
            generator.run(Resume::Yield(Completion::Throw(Value::type_error(message))));
        }
        Some(InnerResult::Ready(result)) => {
            generator.set_delegate(Some(source));
            on_inner_result(generator, kind, result);
        }
        Some(InnerResult::Pending(promise)) => {
            generator.set_delegate(Some(source));
            generator.set_state(GeneratorState::AwaitingCompletion);
            let this = generator.clone();
            await_value(Value::Promise(promise), move |settled| {
                let result = settled.and_then(|v| IterResult::try_from(v).map_err(GeneratorError::into_value));
                on_inner_result(&this, kind, result);
                this.resume_next();
            });
        }
    }
}

fn on_inner_result(generator: &AsyncGenerator, kind: RequestKind, result: Result<IterResult, Value>) {
    match result {
        Err(reason) => {
            generator.set_delegate(None);
            generator.run(Resume::Yield(Completion::Throw(reason)));
        }
        Ok(IterResult { value, done: false }) => generator.yield_value(value),
        Ok(IterResult { value, done: true }) => {
            log::debug!("async generator #{} delegation finished", generator.id());
            generator.set_delegate(None);
            if kind != RequestKind::Return {
                generator.run(Resume::Yield(Completion::Normal(value)));
            } else if generator.has_cleanup() {
                generator.run(Resume::Yield(Completion::Return(value)));
            } else {
                generator.finish_with_return(value);
            }
        }
    }
}

impl SyncSource for Generator {
    fn next(&mut self, value: Value) -> Result<IterResult, Value> {
        Generator::next(self, value)
    }

    fn throw(&mut self, error: Value) -> Option<Result<IterResult, Value>> {
        Some(Generator::throw(self, error))
    }

    fn r#return(&mut self, value: Value) -> Option<Result<IterResult, Value>> {
        Some(Generator::r#return(self, value))
    }
}

impl AsyncSource for AsyncGenerator {
    fn next(&mut self, value: Value) -> Promise {
        AsyncGenerator::next(self, value)
    }

    fn throw(&mut self, error: Value) -> Option<Promise> {
        Some(AsyncGenerator::throw(self, error))
    }

    fn r#return(&mut self, value: Value) -> Option<Promise> {
        Some(AsyncGenerator::r#return(self, value))
    }
}
