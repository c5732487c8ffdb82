use crate::async_generator::GeneratorState;
use crate::body::{Body, Completion, Resume, Step};
use crate::core::{IterResult, Value, generate_unique_id};
use crate::delegation::{SyncSource, sync_source};
use crate::error::GeneratorError;
use crate::queue::RequestKind;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct SyncGeneratorCell {
    id: usize,
    state: GeneratorState,
    body: Option<Box<dyn Body>>,
    delegate: Option<Box<dyn SyncSource>>,
}

/// A synchronous generator over the same `Body` abstraction. Results are
/// returned directly; there is no request queue, so re-entering a running
/// generator is an error.
#[derive(Clone)]
pub struct Generator {
    inner: Rc<RefCell<SyncGeneratorCell>>,
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.borrow();
        f.debug_struct("Generator").field("id", &cell.id).field("state", &cell.state).finish()
    }
}

impl Generator {
    pub fn new<B: Body + 'static>(body: B) -> Self {
        Generator {
            inner: Rc::new(RefCell::new(SyncGeneratorCell {
                id: generate_unique_id(),
                state: GeneratorState::SuspendedStart,
                body: Some(Box::new(body)),
                delegate: None,
            })),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.borrow().id
    }

    pub fn state(&self) -> GeneratorState {
        self.inner.borrow().state
    }

    pub fn ptr_eq(&self, other: &Generator) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn next(&self, value: Value) -> Result<IterResult, Value> {
        self.resume(RequestKind::Next, value)
    }

    pub fn throw(&self, error: Value) -> Result<IterResult, Value> {
        self.resume(RequestKind::Throw, error)
    }

    pub fn r#return(&self, value: Value) -> Result<IterResult, Value> {
        self.resume(RequestKind::Return, value)
    }

    fn resume(&self, kind: RequestKind, input: Value) -> Result<IterResult, Value> {
        let (state, delegating) = {
            let cell = self.inner.borrow();
            (cell.state, cell.delegate.is_some())
        };
        log::trace!("generator #{}: {} in {state:?}", self.id(), kind.method_name());
        match state {
            GeneratorState::Executing | GeneratorState::AwaitingCompletion => Err(Value::type_error("Generator is already running")),
            GeneratorState::Completed => match kind {
                RequestKind::Next => Ok(IterResult::done()),
                RequestKind::Throw => Err(input),
                RequestKind::Return => Ok(IterResult::new(input, true)),
            },
            GeneratorState::SuspendedStart => match kind {
                RequestKind::Next => self.run(Resume::Start(input)),
                RequestKind::Throw => {
                    self.complete();
                    Err(input)
                }
                RequestKind::Return => {
                    self.complete();
                    Ok(IterResult::new(input, true))
                }
            },
            GeneratorState::SuspendedYield if delegating => self.forward(kind, input),
            GeneratorState::SuspendedYield => match kind {
                RequestKind::Next => self.run(Resume::Yield(Completion::Normal(input))),
                RequestKind::Throw => self.run(Resume::Yield(Completion::Throw(input))),
                RequestKind::Return if self.has_cleanup() => self.run(Resume::Yield(Completion::Return(input))),
                RequestKind::Return => {
                    self.complete();
                    Ok(IterResult::new(input, true))
                }
            },
        }
    }

    fn run(&self, resume: Resume) -> Result<IterResult, Value> {
        let (body, prior) = {
            let mut cell = self.inner.borrow_mut();
            let prior = cell.state;
            cell.state = GeneratorState::Executing;
            (cell.body.take(), prior)
        };
        let Some(mut body) = body else {
            self.complete();
            return Ok(IterResult::done());
        };

        let step = body.resume(resume);
        self.inner.borrow_mut().body = Some(body);

        match step {
            Ok(step) => self.on_step(step),
            Err(GeneratorError::Throw { value }) => {
                self.complete();
                Err(value)
            }
            Err(err) => {
                log::warn!("generator #{}: body refused resumption: {err}", self.id());
                match prior {
                    GeneratorState::SuspendedStart | GeneratorState::SuspendedYield => self.set_state(prior),
                    _ => self.complete(),
                }
                Err(err.into_value())
            }
        }
    }

    fn on_step(&self, step: Step) -> Result<IterResult, Value> {
        match step {
            Step::Yielded(value) => {
                self.set_state(GeneratorState::SuspendedYield);
                Ok(IterResult::yielded(value))
            }
            Step::Returned(value) => {
                self.complete();
                Ok(IterResult::new(value, true))
            }
            Step::Threw(error) => {
                self.complete();
                Err(error)
            }
            Step::Awaited(_) => {
                self.complete();
                Err(Value::type_error("await is only valid in async functions and async generators"))
            }
            Step::Delegated(iterable) => match sync_source(iterable) {
                Ok(source) => {
                    self.inner.borrow_mut().delegate = Some(source);
                    self.forward(RequestKind::Next, Value::Undefined)
                }
                Err(err) => self.run(Resume::Yield(Completion::Throw(err.into_value()))),
            },
        }
    }

    fn forward(&self, kind: RequestKind, input: Value) -> Result<IterResult, Value> {
        let source = {
            let mut cell = self.inner.borrow_mut();
            cell.state = GeneratorState::Executing;
            cell.delegate.take()
        };
        let Some(mut source) = source else {
            return self.run(Resume::Yield(Completion::Normal(input)));
        };

        let result = match kind {
            RequestKind::Next => Some(source.next(input)),
            RequestKind::Throw => source.throw(input),
            RequestKind::Return => source.r#return(input),
        };

        match result {
            None => {
                if kind == RequestKind::Throw {
                    let _ = source.r#return(Value::Undefined);
                }
                let message = format!("The iterator does not provide a '{}' method", kind.method_name());
                self.run(Resume::Yield(Completion::Throw(Value::type_error(message))))
            }
            Some(Err(error)) => self.run(Resume::Yield(Completion::Throw(error))),
            Some(Ok(inner)) if !inner.done => {
                let mut cell = self.inner.borrow_mut();
                cell.delegate = Some(source);
                cell.state = GeneratorState::SuspendedYield;
                Ok(inner)
            }
            Some(Ok(inner)) => {
                if kind != RequestKind::Return {
                    self.run(Resume::Yield(Completion::Normal(inner.value)))
                } else if self.has_cleanup() {
                    self.run(Resume::Yield(Completion::Return(inner.value)))
                } else {
                    self.complete();
                    Ok(IterResult::new(inner.value, true))
                }
            }
        }
    }

    fn complete(&self) {
        let released = {
            let mut cell = self.inner.borrow_mut();
            cell.state = GeneratorState::Completed;
            (cell.body.take(), cell.delegate.take())
        };
        drop(released);
    }

    fn has_cleanup(&self) -> bool {
        self.inner.borrow().body.as_ref().is_some_and(|body| body.has_cleanup())
    }

    fn set_state(&self, state: GeneratorState) {
        self.inner.borrow_mut().state = state;
    }
}
