use asyncgen::{
    AsyncGenerator, Body, Completion, GeneratorError, GeneratorState, IterResult, Promise, RequestKind, Resume, Step, Value, from_fn,
    run_event_loop, run_until_settled,
};
use std::cell::RefCell;
use std::rc::Rc;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

/// Unwind a resumption that did not arrive with a normal value.
fn abrupt(completion: Completion) -> Step {
    match completion {
        Completion::Throw(e) => Step::Threw(e),
        Completion::Normal(v) | Completion::Return(v) => Step::Returned(v),
    }
}

/// for (let i = 0; i < 3; ++i) { yield a + i; } return a;
fn simple_yield(a: f64) -> impl Body {
    let mut i = 0.0;
    from_fn(move |resume| {
        match resume {
            Resume::Start(_) => {}
            Resume::Yield(Completion::Normal(_)) => i += 1.0,
            Resume::Yield(other) | Resume::Await(other) => return Ok(abrupt(other)),
        }
        if i < 3.0 {
            Ok(Step::Yielded(Value::from(a + i)))
        } else {
            Ok(Step::Returned(Value::from(a)))
        }
    })
}

fn empty_body() -> impl Body {
    from_fn(|resume| match resume {
        Resume::Start(_) => Ok(Step::Returned(Value::Undefined)),
        _ => Err(asyncgen::protocol_error_here!("empty body resumed")),
    })
}

fn settled(promise: &Promise) -> Result<IterResult, Value> {
    match promise.outcome().expect("promise still pending") {
        Ok(v) => Ok(IterResult::try_from(v).expect("fulfilled with an iterator result")),
        Err(reason) => Err(reason),
    }
}

fn record_order(promises: &[Promise]) -> Rc<RefCell<Vec<usize>>> {
    let order = Rc::new(RefCell::new(Vec::new()));
    for (i, p) in promises.iter().enumerate() {
        let on_ok = order.clone();
        let on_err = order.clone();
        p.then_with(
            Some(Box::new(move |v| {
                on_ok.borrow_mut().push(i);
                Ok(v)
            })),
            Some(Box::new(move |r| {
                on_err.borrow_mut().push(i);
                Err(r)
            })),
        )
        .mark_handled();
    }
    order
}

#[cfg(test)]
mod async_generator_tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        let generator = AsyncGenerator::new(empty_body());
        let throw_start = generator.throw(Value::from("test value"));
        assert_eq!(generator.state(), GeneratorState::Completed);
        let throw_completed = generator.throw(Value::from("test value"));
        let next_completed = generator.next(Value::from("test value"));

        let generator = AsyncGenerator::new(empty_body());
        let next_start = generator.next(Value::from("test value"));
        let throw_after = generator.throw(Value::from("test value"));
        let next_after = generator.next(Value::from("test value"));

        run_event_loop().unwrap();

        assert_eq!(settled(&throw_start), Err(Value::from("test value")));
        assert_eq!(settled(&throw_completed), Err(Value::from("test value")));
        assert_eq!(settled(&next_completed), Ok(IterResult::done()));
        assert_eq!(settled(&next_start), Ok(IterResult::done()));
        assert_eq!(settled(&throw_after), Err(Value::from("test value")));
        assert_eq!(settled(&next_after), Ok(IterResult::done()));
    }

    #[test]
    fn test_simple_yield() {
        let generator = AsyncGenerator::new(simple_yield(2.0));
        let results: Vec<Promise> = (0..4).map(|_| generator.next(Value::Undefined)).collect();
        run_event_loop().unwrap();

        assert_eq!(settled(&results[0]), Ok(IterResult::new(2.0, false)));
        assert_eq!(settled(&results[1]), Ok(IterResult::new(3.0, false)));
        assert_eq!(settled(&results[2]), Ok(IterResult::new(4.0, false)));
        assert_eq!(settled(&results[3]), Ok(IterResult::new(2.0, true)));
    }

    #[test]
    fn test_return_while_suspended_at_yield() {
        let generator = AsyncGenerator::new(simple_yield(3.0));
        let first = generator.next(Value::Undefined);
        let ret = generator.r#return(Value::Undefined);
        let after = generator.next(Value::Undefined);
        run_event_loop().unwrap();

        assert_eq!(settled(&first), Ok(IterResult::new(3.0, false)));
        assert_eq!(settled(&ret), Ok(IterResult::done()));
        assert_eq!(settled(&after), Ok(IterResult::done()));
        assert_eq!(generator.state(), GeneratorState::Completed);
    }

    #[test]
    fn test_return_value_is_delivered() {
        let generator = AsyncGenerator::new(simple_yield(3.0));
        let _ = generator.next(Value::Undefined);
        let ret = generator.r#return(Value::from(42.0));
        let again = generator.r#return(Value::from("again"));
        run_event_loop().unwrap();

        assert_eq!(settled(&ret), Ok(IterResult::new(42.0, true)));
        assert_eq!(settled(&again), Ok(IterResult::new("again", true)));
    }

    #[test]
    fn test_yield_and_early_return() {
        // for (...) { yield a; return i; }
        let body = from_fn(|resume| match resume {
            Resume::Start(_) => Ok(Step::Yielded(Value::from(2))),
            Resume::Yield(Completion::Normal(_)) => Ok(Step::Returned(Value::from(0))),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        });
        let generator = AsyncGenerator::new(body);
        let results: Vec<Promise> = (0..4).map(|_| generator.next(Value::Undefined)).collect();
        run_event_loop().unwrap();

        assert_eq!(settled(&results[0]), Ok(IterResult::new(2, false)));
        assert_eq!(settled(&results[1]), Ok(IterResult::new(0, true)));
        assert_eq!(settled(&results[2]), Ok(IterResult::done()));
        assert_eq!(settled(&results[3]), Ok(IterResult::done()));
    }

    #[test]
    fn test_outcomes_are_not_settled_synchronously() {
        let generator = AsyncGenerator::new(simple_yield(1.0));
        let first = generator.next(Value::Undefined);
        // the yield settles the outcome, but reactions only run from the loop
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        first.then(move |v| {
            *sink.borrow_mut() = Some(v.clone());
            Ok(v)
        });
        assert!(seen.borrow().is_none());
        run_event_loop().unwrap();
        assert_eq!(*seen.borrow(), Some(Value::from(IterResult::new(1.0, false))));
    }

    #[test]
    fn test_next_value_reaches_the_body() {
        // const x = yield "ready"; return x * 2;
        let body = from_fn(|resume| match resume {
            Resume::Start(_) => Ok(Step::Yielded(Value::from("ready"))),
            Resume::Yield(Completion::Normal(v)) => Ok(Step::Returned(Value::from(v.as_number().unwrap_or(f64::NAN) * 2.0))),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        });
        let generator = AsyncGenerator::new(body);
        let _ = generator.next(Value::from("ignored"));
        let result = generator.next(Value::from(21));
        assert_eq!(run_until_settled(&result).unwrap(), Value::from(IterResult::new(42, true)));
    }

    #[test]
    fn test_throw_caught_inside_body() {
        // try { yield 1; } catch (e) { yield "caught " + e; }
        let mut caught = false;
        let body = from_fn(move |resume| match resume {
            Resume::Start(_) => Ok(Step::Yielded(Value::from(1))),
            Resume::Yield(Completion::Throw(e)) if !caught => {
                caught = true;
                Ok(Step::Yielded(Value::from(format!("caught {e}"))))
            }
            Resume::Yield(Completion::Normal(_)) => Ok(Step::Returned(Value::Undefined)),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        });
        let generator = AsyncGenerator::new(body);
        let first = generator.next(Value::Undefined);
        let thrown = generator.throw(Value::from("boom"));
        let last = generator.next(Value::Undefined);
        run_event_loop().unwrap();

        assert_eq!(settled(&first), Ok(IterResult::new(1, false)));
        assert_eq!(settled(&thrown), Ok(IterResult::new("caught boom", false)));
        assert_eq!(settled(&last), Ok(IterResult::done()));
    }

    #[test]
    fn test_uncaught_throw_completes_generator() {
        let generator = AsyncGenerator::new(simple_yield(0.0));
        let _ = generator.next(Value::Undefined);
        let thrown = generator.throw(Value::from("fatal"));
        let after = generator.next(Value::Undefined);
        run_event_loop().unwrap();

        assert_eq!(settled(&thrown), Err(Value::from("fatal")));
        assert_eq!(settled(&after), Ok(IterResult::done()));
        assert_eq!(generator.state(), GeneratorState::Completed);
    }

    #[test]
    fn test_body_error_value_rejects() {
        let body = from_fn(|_resume| {
            Err(GeneratorError::Throw {
                value: Value::from("from body"),
            })
        });
        let generator = AsyncGenerator::new(body);
        let result = generator.next(Value::Undefined);
        let after = generator.next(Value::Undefined);
        run_event_loop().unwrap();

        assert_eq!(settled(&result), Err(Value::from("from body")));
        assert_eq!(settled(&after), Ok(IterResult::done()));
    }

    #[test]
    fn test_settlement_follows_enqueue_order() {
        let generator = AsyncGenerator::new(simple_yield(0.0));
        let promises = vec![
            generator.next(Value::Undefined),
            generator.throw(Value::from("stop")),
            generator.next(Value::Undefined),
            generator.r#return(Value::from(7)),
            generator.next(Value::Undefined),
        ];
        let order = record_order(&promises);
        run_event_loop().unwrap();

        assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
        assert_eq!(settled(&promises[1]), Err(Value::from("stop")));
        assert_eq!(settled(&promises[3]), Ok(IterResult::new(7, true)));
    }

    #[test]
    fn test_invoke_rejects_unknown_method() {
        let generator = AsyncGenerator::new(simple_yield(5.0));
        let bad = generator.invoke("resume", Value::Undefined);
        assert_eq!(generator.queue_len(), 0);
        assert_eq!(generator.state(), GeneratorState::SuspendedStart);

        let good = generator.invoke("next", Value::Undefined);
        run_event_loop().unwrap();

        match settled(&bad) {
            Err(Value::Error(e)) => assert_eq!(e.name, "TypeError"),
            other => panic!("expected a TypeError rejection, got {other:?}"),
        }
        assert_eq!(settled(&good), Ok(IterResult::new(5.0, false)));
    }

    #[test]
    fn test_enqueue_by_kind() {
        let generator = AsyncGenerator::new(simple_yield(1.0));
        let first = generator.enqueue(RequestKind::Next, Value::Undefined);
        let second = generator.enqueue(RequestKind::Return, Value::from("bye"));
        run_event_loop().unwrap();
        assert_eq!(settled(&first), Ok(IterResult::new(1.0, false)));
        assert_eq!(settled(&second), Ok(IterResult::new("bye", true)));
    }

    #[test]
    fn test_refused_resumption_rejects_only_that_request() {
        let body = from_fn(|resume| match resume {
            Resume::Start(_) => Ok(Step::Yielded(Value::from(1))),
            Resume::Yield(Completion::Normal(Value::String(s))) if s == "bad" => {
                Err(asyncgen::protocol_error_here!("cannot resume with 'bad'"))
            }
            Resume::Yield(Completion::Normal(_)) => Ok(Step::Yielded(Value::from(2))),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        });
        let generator = AsyncGenerator::new(body);
        let first = generator.next(Value::Undefined);
        let refused = generator.next(Value::from("bad"));
        let after = generator.next(Value::Undefined);
        run_event_loop().unwrap();

        assert_eq!(settled(&first), Ok(IterResult::new(1, false)));
        match settled(&refused) {
            Err(Value::Error(e)) => {
                assert_eq!(e.name, "TypeError");
                assert_eq!(e.message, "cannot resume with 'bad'");
            }
            other => panic!("expected a TypeError rejection, got {other:?}"),
        }
        assert_eq!(settled(&after), Ok(IterResult::new(2, false)));
        assert_eq!(generator.state(), GeneratorState::SuspendedYield);
    }

    #[test]
    fn test_return_runs_cleanup_and_delivers_its_yield() {
        // try { yield 1; } finally { yield "cleanup"; }
        let mut pending_return: Option<Value> = None;
        let body = from_fn(move |resume| match resume {
            Resume::Start(_) => Ok(Step::Yielded(Value::from(1))),
            Resume::Yield(Completion::Return(v)) => {
                pending_return = Some(v);
                Ok(Step::Yielded(Value::from("cleanup")))
            }
            Resume::Yield(Completion::Normal(_)) => Ok(Step::Returned(pending_return.take().unwrap_or(Value::Undefined))),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        })
        .with_cleanup();
        let generator = AsyncGenerator::new(body);
        let first = generator.next(Value::Undefined);
        let ret = generator.r#return(Value::from(9));
        let resumed = generator.next(Value::Undefined);
        let after = generator.next(Value::Undefined);
        run_event_loop().unwrap();

        assert_eq!(settled(&first), Ok(IterResult::new(1, false)));
        assert_eq!(settled(&ret), Ok(IterResult::new("cleanup", false)));
        assert_eq!(settled(&resumed), Ok(IterResult::new(9, true)));
        assert_eq!(settled(&after), Ok(IterResult::done()));
    }

    #[test]
    fn test_return_rejects_when_cleanup_throws() {
        let body = from_fn(|resume| match resume {
            Resume::Start(_) => Ok(Step::Yielded(Value::from(1))),
            Resume::Yield(Completion::Return(_)) => Ok(Step::Threw(Value::from("cleanup failed"))),
            Resume::Yield(other) | Resume::Await(other) => Ok(abrupt(other)),
        })
        .with_cleanup();
        let generator = AsyncGenerator::new(body);
        let _ = generator.next(Value::Undefined);
        let ret = generator.r#return(Value::from(9));
        run_event_loop().unwrap();

        assert_eq!(settled(&ret), Err(Value::from("cleanup failed")));
        assert_eq!(generator.state(), GeneratorState::Completed);
    }

    #[test]
    fn test_return_on_fresh_generator_skips_body() {
        let started = Rc::new(RefCell::new(false));
        let flag = started.clone();
        let body = from_fn(move |_resume| {
            *flag.borrow_mut() = true;
            Ok(Step::Returned(Value::Undefined))
        });
        let generator = AsyncGenerator::new(body);
        let ret = generator.r#return(Value::from("early"));
        run_event_loop().unwrap();

        assert!(!*started.borrow());
        assert_eq!(settled(&ret), Ok(IterResult::new("early", true)));
    }
}
