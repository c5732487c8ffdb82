pub mod async_function;
pub(crate) mod async_generator;
pub(crate) mod awaiting;
pub(crate) mod body;
pub(crate) mod core;
pub(crate) mod delegation;
pub(crate) mod error;
pub(crate) mod generator;
pub(crate) mod promise;
pub(crate) mod queue;
pub(crate) mod timer_thread;

pub use async_generator::{AsyncGenerator, GeneratorState};
pub use awaiting::{Settled, await_value};
pub use body::{Body, Completion, FnBody, Resume, Step, from_fn};
pub use crate::core::{ErrorValue, IterResult, Value};
pub use delegation::{ArraySource, AsyncSource, DelegateSource, SyncSource};
pub use error::GeneratorError;
pub use generator::Generator;
pub use promise::{
    Handler, PollResult, Promise, PromiseState, clear_timeout, has_active_timers, max_loop_iterations, pending_unhandled_count,
    perform_promise_then, poll_event_loop, queue_microtask, reject_after, reject_promise, reset_global_state, resolve_after,
    resolve_promise, run_event_loop, run_until_settled, set_max_loop_iterations, set_short_timer_threshold_ms, set_timeout,
    set_wait_for_active_handles, short_timer_threshold_ms, take_unhandled_rejections, wait_for_active_handles,
};
pub use queue::RequestKind;
