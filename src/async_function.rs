use crate::awaiting::await_value;
use crate::body::{Body, Completion, Resume, Step};
use crate::core::Value;
use crate::error::GeneratorError;
use crate::promise::{Promise, reject_promise, resolve_promise};

/// Start an async function. The body runs synchronously up to its first
/// await; the returned promise settles with its return value or uncaught throw.
pub fn spawn<B: Body + 'static>(body: B) -> Promise {
    let promise = Promise::new();
    log::debug!("async function started (promise #{})", promise.id());
    drive(Box::new(body), Resume::Start(Value::Undefined), promise.clone());
    promise
}

fn drive(mut body: Box<dyn Body>, resume: Resume, promise: Promise) {
    match body.resume(resume) {
        Ok(Step::Awaited(value)) => await_value(value, move |settled| {
            let completion = match settled {
                Ok(v) => Completion::Normal(v),
                Err(reason) => Completion::Throw(reason),
            };
            drive(body, Resume::Await(completion), promise);
        }),
        Ok(Step::Returned(value)) => resolve_promise(&promise, value),
        Ok(Step::Threw(error)) | Err(GeneratorError::Throw { value: error }) => reject_promise(&promise, error),
        Ok(Step::Yielded(_) | Step::Delegated(_)) => {
            reject_promise(&promise, Value::type_error("yield is only valid in generator functions"));
        }
        Err(err) => {
            log::warn!("async function (promise #{}) failed: {err}", promise.id());
            reject_promise(&promise, err.into_value());
        }
    }
}
