//! # Promise Runtime
//!
//! The completion primitive the generators settle their requests through,
//! together with the job queue that runs promise reactions.
//!
//! ## Components
//!
//! 1. **Promise**: single-assignment completion (`Pending` -> `Fulfilled` | `Rejected`)
//!    with resolve-once semantics and adoption of promise values.
//! 2. **Task queue**: a thread-local FIFO of reaction jobs, microtasks and
//!    expired timers. Reactions never run synchronously from `resolve`,
//!    `reject` or `then`.
//! 3. **Timers**: `set_timeout` and friends. Long timers are tracked by a
//!    background thread so the loop can block on a channel instead of spinning.
//! 4. **Unhandled rejections**: rejected promises with no reaction attached are
//!    recorded until a handler shows up or the host drains them.

use crate::core::{Value, generate_unique_id};
use crate::error::GeneratorError;
use crate::timer_thread::{TimerCommand, spawn_timer_thread};
use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A reaction callback. `Err` rejects the derived promise.
pub type Handler = Box<dyn FnOnce(Value) -> Result<Value, Value>>;

#[derive(Clone, Debug, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

struct Reaction {
    handler: Option<Handler>,
    result: Option<Promise>,
}

pub struct PromiseData {
    id: usize,
    state: PromiseState,
    on_fulfilled: Vec<Reaction>,
    on_rejected: Vec<Reaction>,
    handled: bool,
    already_resolved: bool,
}

#[derive(Clone)]
pub struct Promise(Rc<RefCell<PromiseData>>);

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        write!(f, "Promise(#{}, {:?})", data.id, data.state)
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl Promise {
    pub fn new() -> Self {
        let id = generate_unique_id();
        log::trace!("promise #{id} created");
        Promise(Rc::new(RefCell::new(PromiseData {
            id,
            state: PromiseState::Pending,
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            handled: false,
            already_resolved: false,
        })))
    }

    /// `Promise.resolve(value)`: a promise argument is returned as is.
    pub fn resolved(value: Value) -> Self {
        if let Value::Promise(p) = value {
            return p;
        }
        let p = Promise::new();
        resolve_promise(&p, value);
        p
    }

    pub fn rejected(reason: Value) -> Self {
        let p = Promise::new();
        reject_promise(&p, reason);
        p
    }

    pub fn id(&self) -> usize {
        self.0.borrow().id
    }

    pub fn state(&self) -> PromiseState {
        self.0.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.0.borrow().state, PromiseState::Pending)
    }

    pub fn is_handled(&self) -> bool {
        self.0.borrow().handled
    }

    /// `None` while pending, otherwise the fulfilment value or rejection reason.
    pub fn outcome(&self) -> Option<Result<Value, Value>> {
        match &self.0.borrow().state {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(v) => Some(Ok(v.clone())),
            PromiseState::Rejected(r) => Some(Err(r.clone())),
        }
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn then<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), None)
    }

    pub fn catch<F>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then_with(None, Some(Box::new(on_rejected)))
    }

    pub fn then_with(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Promise {
        let result = Promise::new();
        perform_promise_then(self, on_fulfilled, on_rejected, Some(result.clone()));
        result
    }

    /// Mark the rejection as observed without attaching a reaction.
    pub fn mark_handled(&self) {
        let id = {
            let mut data = self.0.borrow_mut();
            data.handled = true;
            data.id
        };
        remove_unhandled(id);
    }
}

/// Attach reactions to `promise`. An already settled promise queues its job
/// right away; a pending one keeps the reactions until it settles.
pub fn perform_promise_then(promise: &Promise, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>, result: Option<Promise>) {
    let fulfilled = Reaction {
        handler: on_fulfilled,
        result: result.clone(),
    };
    let rejected = Reaction {
        handler: on_rejected,
        result,
    };

    let (id, state) = {
        let mut guard = promise.0.borrow_mut();
        let data = &mut *guard;
        data.handled = true;
        match &data.state {
            PromiseState::Pending => {
                data.on_fulfilled.push(fulfilled);
                data.on_rejected.push(rejected);
                return;
            }
            state => (data.id, state.clone()),
        }
    };

    match state {
        PromiseState::Fulfilled(value) => queue_task(Task::Resolution {
            promise_id: id,
            value,
            reactions: vec![fulfilled],
        }),
        PromiseState::Rejected(reason) => {
            remove_unhandled(id);
            queue_task(Task::Rejection {
                promise_id: id,
                reason,
                reactions: vec![rejected],
            });
        }
        PromiseState::Pending => {}
    }
}

/// Resolve `promise` with `value`. Only the first resolve or reject counts;
/// a promise value is adopted on a later job.
pub fn resolve_promise(promise: &Promise, value: Value) {
    {
        let mut data = promise.0.borrow_mut();
        if data.already_resolved {
            log::trace!("promise #{} already resolved, ignoring resolve", data.id);
            return;
        }
        data.already_resolved = true;
    }

    match value {
        Value::Promise(inner) if inner.ptr_eq(promise) => {
            settle_rejected(promise, Value::type_error("Chaining cycle detected for promise"));
        }
        Value::Promise(inner) => {
            let outer = promise.clone();
            queue_microtask("ResolveThenableJob", move || {
                let on_reject = outer.clone();
                perform_promise_then(
                    &inner,
                    Some(Box::new(move |v| {
                        fulfill_promise(&outer, v);
                        Ok(Value::Undefined)
                    })),
                    Some(Box::new(move |r| {
                        settle_rejected(&on_reject, r);
                        Ok(Value::Undefined)
                    })),
                    None,
                );
            });
        }
        value => fulfill_promise(promise, value),
    }
}

pub fn reject_promise(promise: &Promise, reason: Value) {
    {
        let mut data = promise.0.borrow_mut();
        if data.already_resolved {
            log::trace!("promise #{} already resolved, ignoring reject", data.id);
            return;
        }
        data.already_resolved = true;
    }
    settle_rejected(promise, reason);
}

fn fulfill_promise(promise: &Promise, value: Value) {
    let (id, reactions) = {
        let mut data = promise.0.borrow_mut();
        if !matches!(data.state, PromiseState::Pending) {
            return;
        }
        data.state = PromiseState::Fulfilled(value.clone());
        data.on_rejected.clear();
        (data.id, std::mem::take(&mut data.on_fulfilled))
    };
    log::trace!("promise #{id} fulfilled with {value:?}");
    if !reactions.is_empty() {
        queue_task(Task::Resolution {
            promise_id: id,
            value,
            reactions,
        });
    }
}

fn settle_rejected(promise: &Promise, reason: Value) {
    let (id, reactions, handled) = {
        let mut data = promise.0.borrow_mut();
        if !matches!(data.state, PromiseState::Pending) {
            return;
        }
        data.state = PromiseState::Rejected(reason.clone());
        data.on_fulfilled.clear();
        (data.id, std::mem::take(&mut data.on_rejected), data.handled)
    };
    log::trace!("promise #{id} rejected with {reason:?}");
    if !handled {
        PENDING_UNHANDLED.with(|p| p.borrow_mut().insert(id, reason.clone()));
    }
    if !reactions.is_empty() {
        queue_task(Task::Rejection {
            promise_id: id,
            reason,
            reactions,
        });
    }
}

fn run_reactions(reactions: Vec<Reaction>, argument: Value, rejected: bool) {
    for reaction in reactions {
        let outcome = match reaction.handler {
            Some(handler) => handler(argument.clone()),
            None if rejected => Err(argument.clone()),
            None => Ok(argument.clone()),
        };
        if let Some(result) = reaction.result {
            match outcome {
                Ok(v) => resolve_promise(&result, v),
                Err(r) => reject_promise(&result, r),
            }
        }
    }
}

enum Task {
    Resolution {
        promise_id: usize,
        value: Value,
        reactions: Vec<Reaction>,
    },
    Rejection {
        promise_id: usize,
        reason: Value,
        reactions: Vec<Reaction>,
    },
    Microtask {
        label: &'static str,
        job: Box<dyn FnOnce()>,
    },
    Timeout {
        id: usize,
        callback: Box<dyn FnOnce()>,
    },
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Resolution { promise_id, reactions, .. } => {
                write!(f, "Resolution promise=#{promise_id} reactions={}", reactions.len())
            }
            Task::Rejection { promise_id, reactions, .. } => {
                write!(f, "Rejection promise=#{promise_id} reactions={}", reactions.len())
            }
            Task::Microtask { label, .. } => write!(f, "Microtask {label}"),
            Task::Timeout { id, .. } => write!(f, "Timeout id={id}"),
        }
    }
}

struct TimerEntry {
    when: Instant,
    callback: Box<dyn FnOnce()>,
    on_thread: bool,
}

struct TimerThreadHandle {
    cmd_tx: Sender<TimerCommand>,
    expired_rx: Receiver<usize>,
}

thread_local! {
    /// Pending jobs for this thread, each tagged with its task id.
    static GLOBAL_TASK_QUEUE: RefCell<VecDeque<(usize, Task)>> = const { RefCell::new(VecDeque::new()) };

    static NEXT_TIMEOUT_ID: Cell<usize> = const { Cell::new(1) };

    static TIMER_REGISTRY: RefCell<HashMap<usize, TimerEntry>> = RefCell::new(HashMap::new());

    static TIMER_THREAD_HANDLE: RefCell<Option<TimerThreadHandle>> = const { RefCell::new(None) };

    /// Rejected promises nobody has reacted to yet, in rejection order.
    static PENDING_UNHANDLED: RefCell<IndexMap<usize, Value>> = RefCell::new(IndexMap::new());
}

/// Monotonic task id counter, used to correlate queue/process logs.
static TASK_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Threshold (ms) under which timers are "short": they stay on the loop
/// thread and `run_event_loop` sleeps for them instead of returning.
static SHORT_TIMER_WAIT_MS: AtomicU64 = AtomicU64::new(20);

// If true, `run_event_loop` keeps blocking while long timers are registered.
static WAIT_FOR_ACTIVE_HANDLES: AtomicBool = AtomicBool::new(false);

static MAX_LOOP_ITERATIONS: AtomicUsize = AtomicUsize::new(1_000_000);

pub fn set_short_timer_threshold_ms(ms: u64) {
    SHORT_TIMER_WAIT_MS.store(ms, Ordering::SeqCst);
}

pub fn short_timer_threshold_ms() -> u64 {
    SHORT_TIMER_WAIT_MS.load(Ordering::SeqCst)
}

pub fn set_wait_for_active_handles(enabled: bool) {
    WAIT_FOR_ACTIVE_HANDLES.store(enabled, Ordering::SeqCst);
}

pub fn wait_for_active_handles() -> bool {
    WAIT_FOR_ACTIVE_HANDLES.load(Ordering::SeqCst)
}

/// Upper bound on tasks executed by a single `run_event_loop` or
/// `run_until_settled` call before it gives up with `InfiniteLoopError`.
pub fn set_max_loop_iterations(limit: usize) {
    MAX_LOOP_ITERATIONS.store(limit, Ordering::SeqCst);
}

pub fn max_loop_iterations() -> usize {
    MAX_LOOP_ITERATIONS.load(Ordering::SeqCst)
}

fn queue_task(task: Task) {
    let task_id = TASK_COUNTER.fetch_add(1, Ordering::SeqCst);
    log::trace!("queue_task: id={task_id} {task:?}");
    GLOBAL_TASK_QUEUE.with(|q| q.borrow_mut().push_back((task_id, task)));
}

/// Queue an arbitrary job behind everything already queued.
pub fn queue_microtask<F: FnOnce() + 'static>(label: &'static str, job: F) {
    queue_task(Task::Microtask { label, job: Box::new(job) });
}

fn process_task(task_id: usize, task: Task) {
    log::trace!("process_task: id={task_id} {task:?}");
    match task {
        Task::Resolution { value, reactions, .. } => run_reactions(reactions, value, false),
        Task::Rejection { reason, reactions, .. } => run_reactions(reactions, reason, true),
        Task::Microtask { job, .. } => job(),
        Task::Timeout { callback, .. } => callback(),
    }
}

fn ensure_timer_thread() -> Result<Sender<TimerCommand>, GeneratorError> {
    TIMER_THREAD_HANDLE.with(|slot| -> Result<Sender<TimerCommand>, GeneratorError> {
        let mut slot = slot.borrow_mut();
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.cmd_tx.clone());
        }
        let (cmd_tx, expired_rx) = spawn_timer_thread()?;
        *slot = Some(TimerThreadHandle {
            cmd_tx: cmd_tx.clone(),
            expired_rx,
        });
        Ok(cmd_tx)
    })
}

/// Run `callback` as a macrotask once `delay` has elapsed. Returns the timer id.
pub fn set_timeout<F: FnOnce() + 'static>(delay: Duration, callback: F) -> Result<usize, GeneratorError> {
    let id = NEXT_TIMEOUT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    });
    let when = Instant::now() + delay;
    let on_thread = delay > Duration::from_millis(short_timer_threshold_ms());
    if on_thread {
        let cmd_tx = ensure_timer_thread()?;
        cmd_tx
            .send(TimerCommand::Schedule { id, when })
            .map_err(|e| std::io::Error::other(format!("timer thread disconnected: {e}")))?;
    }
    log::debug!("set_timeout: id={id} delay={delay:?} on_thread={on_thread}");
    TIMER_REGISTRY.with(|reg| {
        reg.borrow_mut().insert(
            id,
            TimerEntry {
                when,
                callback: Box::new(callback),
                on_thread,
            },
        )
    });
    Ok(id)
}

/// Cancel a timer that has not fired yet. Returns whether one was removed.
pub fn clear_timeout(id: usize) -> bool {
    let Some(entry) = TIMER_REGISTRY.with(|reg| reg.borrow_mut().remove(&id)) else {
        return false;
    };
    if entry.on_thread {
        TIMER_THREAD_HANDLE.with(|slot| {
            if let Some(handle) = slot.borrow().as_ref() {
                let _ = handle.cmd_tx.send(TimerCommand::Cancel(id));
            }
        });
    }
    log::debug!("clear_timeout: id={id}");
    true
}

/// A promise the timer source fulfils with `value` after `delay`.
pub fn resolve_after(delay: Duration, value: Value) -> Result<Promise, GeneratorError> {
    let promise = Promise::new();
    let target = promise.clone();
    set_timeout(delay, move || resolve_promise(&target, value))?;
    Ok(promise)
}

pub fn reject_after(delay: Duration, reason: Value) -> Result<Promise, GeneratorError> {
    let promise = Promise::new();
    let target = promise.clone();
    set_timeout(delay, move || reject_promise(&target, reason))?;
    Ok(promise)
}

pub fn has_active_timers() -> bool {
    TIMER_REGISTRY.with(|reg| !reg.borrow().is_empty())
}

fn next_timer_deadline() -> Option<(Instant, bool)> {
    TIMER_REGISTRY.with(|reg| reg.borrow().values().map(|e| (e.when, e.on_thread)).min_by_key(|(when, _)| *when))
}

// Move every due timer into the task queue in deadline order.
fn enqueue_expired_timers(now: Instant) {
    TIMER_THREAD_HANDLE.with(|slot| {
        if let Some(handle) = slot.borrow().as_ref() {
            // the thread only wakes us; deadlines are checked below
            while handle.expired_rx.try_recv().is_ok() {}
        }
    });
    let due = TIMER_REGISTRY.with(|reg| {
        let mut reg = reg.borrow_mut();
        let mut ids: Vec<(Instant, usize)> = reg.iter().filter(|(_, e)| e.when <= now).map(|(id, e)| (e.when, *id)).collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|(_, id)| reg.remove(&id).map(|e| (id, e.callback)))
            .collect::<Vec<_>>()
    });
    for (id, callback) in due {
        queue_task(Task::Timeout { id, callback });
    }
}

fn block_for_timers(wait: Duration) {
    let nearest_on_thread = next_timer_deadline().is_some_and(|(_, on_thread)| on_thread);
    let woke = TIMER_THREAD_HANDLE.with(|slot| match slot.borrow().as_ref() {
        Some(handle) if nearest_on_thread => {
            let _ = handle.expired_rx.recv_timeout(wait);
            true
        }
        _ => false,
    });
    if !woke {
        std::thread::sleep(wait);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Executed,
    Wait(Duration),
    Empty,
}

/// Run at most one task. Timers only join the queue once it has drained, so
/// every pending microtask runs before the next timer callback.
pub fn poll_event_loop() -> PollResult {
    let queue_empty = GLOBAL_TASK_QUEUE.with(|q| q.borrow().is_empty());
    if queue_empty {
        enqueue_expired_timers(Instant::now());
    }

    if let Some((task_id, task)) = GLOBAL_TASK_QUEUE.with(|q| q.borrow_mut().pop_front()) {
        process_task(task_id, task);
        return PollResult::Executed;
    }

    match next_timer_deadline() {
        Some((when, _)) => PollResult::Wait(when.saturating_duration_since(Instant::now())),
        None => PollResult::Empty,
    }
}

/// Drain the queue until it is idle. Short timers are waited for; long ones
/// only when `wait_for_active_handles` is set, otherwise the pending wait is
/// returned to the caller.
pub fn run_event_loop() -> Result<PollResult, GeneratorError> {
    let limit = max_loop_iterations();
    let mut executed = 0usize;
    loop {
        match poll_event_loop() {
            PollResult::Executed => {
                executed += 1;
                if executed > limit {
                    return Err(GeneratorError::InfiniteLoopError { iterations: executed });
                }
            }
            PollResult::Wait(wait) => {
                if wait <= Duration::from_millis(short_timer_threshold_ms()) || wait_for_active_handles() {
                    block_for_timers(wait);
                } else {
                    log::debug!("run_event_loop: returning with a timer pending in {wait:?}");
                    return Ok(PollResult::Wait(wait));
                }
            }
            PollResult::Empty => {
                log::trace!("run_event_loop: idle after {executed} tasks");
                return Ok(PollResult::Empty);
            }
        }
    }
}

/// Drive the loop until `promise` settles, waiting on timers as needed.
/// A rejection comes back as `GeneratorError::Throw` carrying the reason.
pub fn run_until_settled(promise: &Promise) -> Result<Value, GeneratorError> {
    let limit = max_loop_iterations();
    let mut executed = 0usize;
    while promise.is_pending() {
        match poll_event_loop() {
            PollResult::Executed => {
                executed += 1;
                if executed > limit {
                    return Err(GeneratorError::InfiniteLoopError { iterations: executed });
                }
            }
            PollResult::Wait(wait) => block_for_timers(wait),
            PollResult::Empty => {
                return Err(GeneratorError::EventLoopStalled {
                    promise_id: promise.id(),
                });
            }
        }
    }
    promise.mark_handled();
    match promise.state() {
        PromiseState::Fulfilled(value) => Ok(value),
        PromiseState::Rejected(value) => Err(GeneratorError::Throw { value }),
        PromiseState::Pending => Err(GeneratorError::EventLoopStalled {
            promise_id: promise.id(),
        }),
    }
}

fn remove_unhandled(promise_id: usize) {
    PENDING_UNHANDLED.with(|p| p.borrow_mut().shift_remove(&promise_id));
}

/// Drain the rejections no handler was ever attached to, oldest first.
pub fn take_unhandled_rejections() -> Vec<(usize, Value)> {
    let drained: Vec<(usize, Value)> = PENDING_UNHANDLED.with(|p| p.borrow_mut().drain(..).collect());
    for (id, reason) in &drained {
        log::warn!("unhandled rejection: promise #{id} rejected with {reason}");
    }
    drained
}

pub fn pending_unhandled_count() -> usize {
    PENDING_UNHANDLED.with(|p| p.borrow().len())
}

/// Reset this thread's runtime state (queue, timers, unhandled list) so each
/// test starts from a clean slate.
pub fn reset_global_state() {
    GLOBAL_TASK_QUEUE.with(|q| q.borrow_mut().clear());
    let ids: Vec<usize> = TIMER_REGISTRY.with(|reg| reg.borrow().keys().copied().collect());
    for id in ids {
        clear_timeout(id);
    }
    PENDING_UNHANDLED.with(|p| p.borrow_mut().clear());
    NEXT_TIMEOUT_ID.with(|id| id.set(1));
}
