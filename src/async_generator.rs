//! Async generator objects.
//!
//! Every `next`/`throw`/`return` call appends a request to the generator's
//! queue and gets its outcome promise back immediately. Requests are
//! dispatched strictly one at a time: the head request stays in flight through
//! any number of internal awaits and only leaves the queue when its outcome is
//! settled by a yield, a return or an uncaught throw.

use crate::awaiting::await_value;
use crate::body::{Body, Completion, Resume, Step};
use crate::core::{IterResult, Value, generate_unique_id};
use crate::delegation::{self, DelegateSource};
use crate::error::GeneratorError;
use crate::promise::Promise;
use crate::queue::{self, RequestKind, RequestQueue};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorState {
    SuspendedStart,
    SuspendedYield,
    Executing,
    AwaitingCompletion,
    Completed,
}

struct GeneratorCell {
    id: usize,
    state: GeneratorState,
    body: Option<Box<dyn Body>>,
    queue: RequestQueue,
    delegate: Option<DelegateSource>,
}

#[derive(Clone)]
pub struct AsyncGenerator {
    inner: Rc<RefCell<GeneratorCell>>,
}

impl fmt::Debug for AsyncGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.borrow();
        f.debug_struct("AsyncGenerator")
            .field("id", &cell.id)
            .field("state", &cell.state)
            .field("queued", &cell.queue.len())
            .field("delegating", &cell.delegate.is_some())
            .finish()
    }
}

impl AsyncGenerator {
    pub fn new<B: Body + 'static>(body: B) -> Self {
        let id = generate_unique_id();
        log::trace!("async generator #{id} created");
        AsyncGenerator {
            inner: Rc::new(RefCell::new(GeneratorCell {
                id,
                state: GeneratorState::SuspendedStart,
                body: Some(Box::new(body)),
                queue: RequestQueue::new(),
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

    /// Requests not yet settled, including the one in flight.
    pub fn queue_len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_delegating(&self) -> bool {
        self.inner.borrow().delegate.is_some()
    }

    pub fn ptr_eq(&self, other: &AsyncGenerator) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn next(&self, value: Value) -> Promise {
        self.enqueue(RequestKind::Next, value)
    }

    pub fn throw(&self, error: Value) -> Promise {
        self.enqueue(RequestKind::Throw, error)
    }

    pub fn r#return(&self, value: Value) -> Promise {
        self.enqueue(RequestKind::Return, value)
    }

    /// Enqueue by method name. An unknown name yields a rejected promise and
    /// leaves the queue alone.
    pub fn invoke(&self, method: &str, input: Value) -> Promise {
        match RequestKind::from_method(method) {
            Ok(kind) => self.enqueue(kind, input),
            Err(err) => {
                log::warn!("async generator #{}: rejected call to '{method}': {err}", self.id());
                Promise::rejected(err.into_value())
            }
        }
    }

    pub fn enqueue(&self, kind: RequestKind, input: Value) -> Promise {
        let (outcome, idle) = {
            let mut cell = self.inner.borrow_mut();
            let outcome = cell.queue.push(kind, input);
            log::debug!(
                "async generator #{}: enqueued {} (promise #{}, queue_len={}, state={:?})",
                cell.id,
                kind.method_name(),
                outcome.id(),
                cell.queue.len(),
                cell.state
            );
            (outcome, !cell.queue.is_in_flight())
        };
        if idle {
            self.resume_next();
        }
        outcome
    }

    /// Dispatch queued requests until one is left in flight or the queue is empty.
    pub(crate) fn resume_next(&self) {
        loop {
            let (kind, input, state, delegating) = {
                let mut cell = self.inner.borrow_mut();
                let Some((kind, input)) = cell.queue.begin_dispatch() else {
                    return;
                };
                (kind, input, cell.state, cell.delegate.is_some())
            };
            log::trace!("async generator #{}: dispatch {} in {state:?}", self.id(), kind.method_name());
            self.dispatch(kind, input, state, delegating);
        }
    }

    fn dispatch(&self, kind: RequestKind, input: Value, state: GeneratorState, delegating: bool) {
        match state {
            GeneratorState::Executing | GeneratorState::AwaitingCompletion => {
                log::error!("async generator #{}: dispatched while {state:?}", self.id());
                self.settle_head(Err(Value::type_error("Async generator already running")));
            }
            GeneratorState::Completed => match kind {
                RequestKind::Next => self.settle_head(Ok(IterResult::done())),
                RequestKind::Throw => self.settle_head(Err(input)),
                RequestKind::Return => self.finish_with_return(input),
            },
            GeneratorState::SuspendedStart => match kind {
                RequestKind::Next => self.run(Resume::Start(input)),
                RequestKind::Throw => {
                    self.complete();
                    self.settle_head(Err(input));
                }
                RequestKind::Return => self.finish_with_return(input),
            },
            GeneratorState::SuspendedYield if delegating => delegation::forward(self, kind, input),
            GeneratorState::SuspendedYield => match kind {
                RequestKind::Next => self.run(Resume::Yield(Completion::Normal(input))),
                RequestKind::Throw => self.run(Resume::Yield(Completion::Throw(input))),
                RequestKind::Return if self.has_cleanup() => self.run(Resume::Yield(Completion::Return(input))),
                RequestKind::Return => self.finish_with_return(input),
            },
        }
    }

    /// Run the body once. No borrow of the generator is held while body code runs.
    pub(crate) fn run(&self, resume: Resume) {
        let (body, prior) = {
            let mut cell = self.inner.borrow_mut();
            let prior = cell.state;
            cell.state = GeneratorState::Executing;
            (cell.body.take(), prior)
        };
        let Some(mut body) = body else {
            self.complete();
            self.settle_head(Err(Value::type_error("Async generator body is no longer available")));
            return;
        };

        let step = body.resume(resume);
        self.inner.borrow_mut().body = Some(body);

        match step {
            Ok(step) => self.on_step(step),
            Err(GeneratorError::Throw { value }) => self.on_step(Step::Threw(value)),
            Err(err) => {
                log::warn!("async generator #{}: body refused resumption: {err}", self.id());
                match prior {
                    GeneratorState::SuspendedStart | GeneratorState::SuspendedYield => self.set_state(prior),
                    _ => self.complete(),
                }
                self.settle_head(Err(err.into_value()));
            }
        }
    }

    fn on_step(&self, step: Step) {
        log::trace!("async generator #{}: step {step:?}", self.id());
        match step {
            Step::Yielded(value) => self.yield_value(value),
            Step::Awaited(value) => self.await_and_resume(value),
            Step::Delegated(iterable) => delegation::begin(self, iterable),
            Step::Returned(value) => self.finish_with_return(value),
            Step::Threw(error) => {
                self.complete();
                self.settle_head(Err(error));
            }
        }
    }

    /// Deliver a yielded value. A promise operand is awaited first; its
    /// rejection is thrown back in at the yield point.
    pub(crate) fn yield_value(&self, value: Value) {
        let Value::Promise(promise) = value else {
            self.settle_yield(value);
            return;
        };
        self.set_state(GeneratorState::AwaitingCompletion);
        let this = self.clone();
        await_value(Value::Promise(promise), move |settled| {
            match settled {
                Ok(v) => this.settle_yield(v),
                Err(reason) => {
                    // a sync delegate is closed before the rejection is thrown in
                    if let Some(mut source @ DelegateSource::Sync(_)) = this.take_delegate() {
                        source.close();
                    }
                    this.run(Resume::Yield(Completion::Throw(reason)));
                }
            }
            this.resume_next();
        });
    }

    fn settle_yield(&self, value: Value) {
        self.set_state(GeneratorState::SuspendedYield);
        self.settle_head(Ok(IterResult::yielded(value)));
    }

    fn await_and_resume(&self, value: Value) {
        self.set_state(GeneratorState::AwaitingCompletion);
        let this = self.clone();
        await_value(value, move |settled| {
            let completion = match settled {
                Ok(v) => Completion::Normal(v),
                Err(reason) => Completion::Throw(reason),
            };
            this.run(Resume::Await(completion));
            this.resume_next();
        });
    }

    /// Settle the in-flight request with `{ value, done: true }` and complete.
    /// A promise value is awaited first and a rejection rejects the request.
    pub(crate) fn finish_with_return(&self, value: Value) {
        let Value::Promise(promise) = value else {
            self.complete();
            self.settle_head(Ok(IterResult::new(value, true)));
            return;
        };
        if self.state() != GeneratorState::Completed {
            self.set_state(GeneratorState::AwaitingCompletion);
        }
        let this = self.clone();
        await_value(Value::Promise(promise), move |settled| {
            this.complete();
            match settled {
                Ok(v) => this.settle_head(Ok(IterResult::new(v, true))),
                Err(reason) => this.settle_head(Err(reason)),
            }
            this.resume_next();
        });
    }

    fn settle_head(&self, outcome: Result<IterResult, Value>) {
        let request = self.inner.borrow_mut().queue.take_settled();
        match request {
            Some(request) => queue::settle(request, outcome),
            None => log::error!("async generator #{}: no request in flight to settle", self.id()),
        }
    }

    /// Enter `Completed` and release the body and any delegate.
    fn complete(&self) {
        let released = {
            let mut cell = self.inner.borrow_mut();
            cell.state = GeneratorState::Completed;
            (cell.body.take(), cell.delegate.take())
        };
        log::trace!("async generator #{}: completed", self.id());
        drop(released);
    }

    pub(crate) fn has_cleanup(&self) -> bool {
        self.inner.borrow().body.as_ref().is_some_and(|body| body.has_cleanup())
    }

    pub(crate) fn set_state(&self, state: GeneratorState) {
        let mut cell = self.inner.borrow_mut();
        log::trace!("async generator #{}: {:?} -> {state:?}", cell.id, cell.state);
        cell.state = state;
    }

    pub(crate) fn take_delegate(&self) -> Option<DelegateSource> {
        self.inner.borrow_mut().delegate.take()
    }

    pub(crate) fn set_delegate(&self, delegate: Option<DelegateSource>) {
        let previous = std::mem::replace(&mut self.inner.borrow_mut().delegate, delegate);
        drop(previous);
    }
}
