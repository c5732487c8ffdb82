use crate::core::Value;
use crate::promise::{Promise, perform_promise_then};
use std::cell::RefCell;
use std::rc::Rc;

pub type Settled = Result<Value, Value>;

type SettleCallback = Box<dyn FnOnce(Settled)>;

/// Wrap `value` in a completion and call `on_settled` once it settles.
///
/// The callback always runs from the job queue, never synchronously, even
/// when `value` is not a promise or is already settled.
pub fn await_value<F>(value: Value, on_settled: F)
where
    F: FnOnce(Settled) + 'static,
{
    let promise = match value {
        Value::Promise(p) => p,
        other => Promise::resolved(other),
    };
    log::trace!("await_value: waiting on promise #{}", promise.id());

    // only one of the two reactions ever runs; both share the callback
    let slot: Rc<RefCell<Option<SettleCallback>>> = Rc::new(RefCell::new(Some(Box::new(on_settled))));
    let on_reject = slot.clone();

    perform_promise_then(
        &promise,
        Some(Box::new(move |v| {
            let callback = slot.borrow_mut().take();
            if let Some(callback) = callback {
                callback(Ok(v));
            }
            Ok(Value::Undefined)
        })),
        Some(Box::new(move |reason| {
            let callback = on_reject.borrow_mut().take();
            if let Some(callback) = callback {
                callback(Err(reason));
            }
            Ok(Value::Undefined)
        })),
        None,
    );
}
