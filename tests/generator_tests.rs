use asyncgen::{Completion, Generator, GeneratorState, IterResult, Resume, Step, Value, from_fn};
use std::cell::RefCell;
use std::rc::Rc;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

fn abrupt(completion: Completion) -> Step {
    match completion {
        Completion::Throw(e) => Step::Threw(e),
        Completion::Normal(v) | Completion::Return(v) => Step::Returned(v),
    }
}

/// function* count(n) { for (let i = 0; i < n; ++i) yield i; return n; }
fn count(n: i32) -> Generator {
    let mut i = 0;
    Generator::new(from_fn(move |resume| {
        match resume {
            Resume::Start(_) => {}
            Resume::Yield(Completion::Normal(_)) => i += 1,
            Resume::Yield(other) | Resume::Await(other) => return Ok(abrupt(other)),
        }
        if i < n {
            Ok(Step::Yielded(Value::from(i)))
        } else {
            Ok(Step::Returned(Value::from(n)))
        }
    }))
}

#[cfg(test)]
mod generator_tests {
    use super::*;

    #[test]
    fn test_generator_runs_to_completion() {
        let generator = count(2);
        assert_eq!(generator.state(), GeneratorState::SuspendedStart);
        assert_eq!(generator.next(Value::Undefined), Ok(IterResult::new(0, false)));
        assert_eq!(generator.state(), GeneratorState::SuspendedYield);
        assert_eq!(generator.next(Value::Undefined), Ok(IterResult::new(1, false)));
        assert_eq!(generator.next(Value::Undefined), Ok(IterResult::new(2, true)));
        assert_eq!(generator.next(Value::Undefined), Ok(IterResult::done()));
        assert_eq!(generator.state(), GeneratorState::Completed);
    }

    #[test]
    fn test_completed_row() {
        let generator = count(0);
        assert_eq!(generator.next(Value::Undefined), Ok(IterResult::new(0, true)));
        assert_eq!(generator.throw(Value::from("e")), Err(Value::from("e")));
        assert_eq!(generator.r#return(Value::from(3)), Ok(IterResult::new(3, true)));
        assert_eq!(generator.next(Value::Undefined), Ok(IterResult::done()));
    }

    #[test]
    fn test_throw_and_return_on_fresh_generator() {
        let generator = count(5);
        assert_eq!(generator.throw(Value::from("early")), Err(Value::from("early")));
        assert_eq!(generator.state(), GeneratorState::Completed);

        let generator = count(5);
        assert_eq!(generator.r#return(Value::from("bye")), Ok(IterResult::new("bye", true)));
        assert_eq!(generator.next(Value::Undefined), Ok(IterResult::done()));
    }

    #[test]
    fn test_reentry_is_rejected() {
        let slot: Rc<RefCell<Option<Generator>>> = Rc::new(RefCell::new(None));
        let inner_slot = slot.clone();
        let generator = Generator::new(from_fn(move |resume| match resume {
            Resume::Start(_) => {
                let this = inner_slot.borrow().clone();
                match this.map(|g| g.next(Value::Undefined)) {
                    Some(Err(e)) => Ok(Step::Yielded(e)),
                    other => Ok(Step::Yielded(Value::from(format!("unexpected {other:?}")))),
                }
            }
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        }));
        *slot.borrow_mut() = Some(generator.clone());

        assert_eq!(
            generator.next(Value::Undefined),
            Ok(IterResult::yielded(Value::type_error("Generator is already running")))
        );
        // break the cycle
        slot.borrow_mut().take();
    }

    #[test]
    fn test_await_step_is_rejected() {
        let generator = Generator::new(from_fn(|_resume| Ok(Step::Awaited(Value::from(1)))));
        match generator.next(Value::Undefined) {
            Err(Value::Error(e)) => assert_eq!(e.name, "TypeError"),
            other => panic!("expected a TypeError, got {other:?}"),
        }
        assert_eq!(generator.state(), GeneratorState::Completed);
    }

    #[test]
    fn test_yield_star_over_generator_forwards_return() {
        let inner = count(3);
        let mut iterable = Some(Value::from(inner.clone()));
        let outer = Generator::new(from_fn(move |resume| match resume {
            Resume::Start(_) => Ok(Step::Delegated(iterable.take().unwrap_or(Value::Undefined))),
            Resume::Yield(Completion::Normal(v)) => Ok(Step::Returned(v)),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        }));

        assert_eq!(outer.next(Value::Undefined), Ok(IterResult::new(0, false)));
        assert_eq!(outer.next(Value::Undefined), Ok(IterResult::new(1, false)));
        assert_eq!(outer.r#return(Value::from("done early")), Ok(IterResult::new("done early", true)));
        assert_eq!(inner.state(), GeneratorState::Completed);
        assert_eq!(outer.state(), GeneratorState::Completed);
    }

    #[test]
    fn test_yield_star_result_resumes_body() {
        let mut iterable = Some(Value::from(count(1)));
        let outer = Generator::new(from_fn(move |resume| match resume {
            Resume::Start(_) => Ok(Step::Delegated(iterable.take().unwrap_or(Value::Undefined))),
            Resume::Yield(Completion::Normal(v)) => Ok(Step::Returned(Value::from(format!("inner returned {v}")))),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        }));

        assert_eq!(outer.next(Value::Undefined), Ok(IterResult::new(0, false)));
        assert_eq!(outer.next(Value::Undefined), Ok(IterResult::new("inner returned 1", true)));
    }

    #[test]
    fn test_yield_star_over_async_source_is_not_iterable() {
        let async_inner = asyncgen::AsyncGenerator::new(from_fn(|_resume| Ok(Step::Returned(Value::Undefined))));
        let mut iterable = Some(Value::from(async_inner));
        let outer = Generator::new(from_fn(move |resume| match resume {
            Resume::Start(_) => Ok(Step::Delegated(iterable.take().unwrap_or(Value::Undefined))),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        }));
        assert_eq!(outer.next(Value::Undefined), Err(Value::type_error("Value is not iterable")));
    }
}
