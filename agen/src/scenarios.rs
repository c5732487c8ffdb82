use asyncgen::{
    AsyncGenerator, Body, Completion, GeneratorError, IterResult, Promise, Resume, Step, Value, resolve_after, run_until_settled,
};
use std::time::Duration;

pub enum Expected {
    Fulfilled(IterResult),
    Rejected(Value),
}

pub struct Check {
    pub scenario: &'static str,
    pub message: &'static str,
    pub outcome: Promise,
    pub expected: Expected,
}

impl Check {
    fn new(scenario: &'static str, message: &'static str, outcome: Promise, expected: Expected) -> Self {
        Check {
            scenario,
            message,
            outcome,
            expected,
        }
    }

    /// Drive the loop, waiting on timers, until the outcome settles. A stalled
    /// loop leaves it pending for `verify` to report.
    pub fn settle(&self) -> Result<(), GeneratorError> {
        match run_until_settled(&self.outcome) {
            Ok(_) | Err(GeneratorError::Throw { .. }) | Err(GeneratorError::EventLoopStalled { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn verify(&self) -> Result<(), String> {
        self.outcome.mark_handled();
        let failed = |detail: String| Err(format!("Test {} failed - {}{detail}", self.scenario, self.message));
        match (&self.expected, self.outcome.outcome()) {
            (_, None) => failed(" - still pending".to_string()),
            (Expected::Fulfilled(expected), Some(Ok(actual))) => match IterResult::try_from(actual) {
                Ok(actual) if actual == *expected => Ok(()),
                Ok(actual) => failed(format!(" - {actual} should equal {expected}")),
                Err(e) => failed(format!(" - {e}")),
            },
            (Expected::Rejected(expected), Some(Err(actual))) if actual == *expected => Ok(()),
            (Expected::Rejected(expected), Some(Err(actual))) => failed(format!(" - {actual} should equal {expected}")),
            (_, Some(_)) => failed(String::new()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let outcome = match self.outcome.outcome() {
            None => serde_json::json!("pending"),
            Some(Ok(v)) => serde_json::json!({ "fulfilled": v.to_json() }),
            Some(Err(r)) => serde_json::json!({ "rejected": r.to_json() }),
        };
        serde_json::json!({
            "scenario": self.scenario,
            "check": self.message,
            "outcome": outcome,
        })
    }
}

pub struct Scenario {
    pub name: &'static str,
    pub run: fn() -> Result<Vec<Check>, GeneratorError>,
}

pub fn all() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "Basic functionality",
            run: basic_functionality,
        },
        Scenario {
            name: "Simple yield",
            run: simple_yield,
        },
        Scenario {
            name: "Yield and await",
            run: yield_and_await,
        },
        Scenario {
            name: "Yield and timer await",
            run: yield_and_timer_await,
        },
        Scenario {
            name: "Yield and early return",
            run: yield_and_early_return,
        },
        Scenario {
            name: "Yield*",
            run: yield_star,
        },
    ]
}

fn unwind(completion: Completion) -> Step {
    match completion {
        Completion::Throw(e) => Step::Threw(e),
        Completion::Normal(v) | Completion::Return(v) => Step::Returned(v),
    }
}

/// async function* agf() {}
struct Empty;

impl Body for Empty {
    fn resume(&mut self, _resume: Resume) -> Result<Step, GeneratorError> {
        Ok(Step::Returned(Value::Undefined))
    }
}

/// for (let i = 0; i < 3; ++i) { yield a + i; } return a;
struct CountFrom {
    a: f64,
    i: f64,
}

impl Body for CountFrom {
    fn resume(&mut self, resume: Resume) -> Result<Step, GeneratorError> {
        match resume {
            Resume::Start(_) => self.i = 0.0,
            Resume::Yield(Completion::Normal(_)) => self.i += 1.0,
            Resume::Yield(c) | Resume::Await(c) => return Ok(unwind(c)),
        }
        if self.i < 3.0 {
            Ok(Step::Yielded(Value::from(self.a + self.i)))
        } else {
            Ok(Step::Returned(Value::from(self.a)))
        }
    }
}

/// for (let i = 0; i < 3; ++i) { yield a + await i; } return a;
/// With a delay, `i` comes from a timer instead of a plain value.
struct AwaitThenYield {
    a: f64,
    i: f64,
    delay: Option<Duration>,
}

impl AwaitThenYield {
    fn await_index(&self) -> Result<Step, GeneratorError> {
        let operand = match self.delay {
            Some(delay) => Value::Promise(resolve_after(delay, Value::from(self.i))?),
            None => Value::from(self.i),
        };
        Ok(Step::Awaited(operand))
    }
}

impl Body for AwaitThenYield {
    fn resume(&mut self, resume: Resume) -> Result<Step, GeneratorError> {
        match resume {
            Resume::Start(_) => self.await_index(),
            Resume::Await(Completion::Normal(v)) => Ok(Step::Yielded(Value::from(self.a + v.as_number().unwrap_or(f64::NAN)))),
            Resume::Yield(Completion::Normal(_)) => {
                self.i += 1.0;
                if self.i < 3.0 {
                    self.await_index()
                } else {
                    Ok(Step::Returned(Value::from(self.a)))
                }
            }
            Resume::Yield(c) | Resume::Await(c) => Ok(unwind(c)),
        }
    }
}

/// for (let i = 0; i < 3; ++i) { yield a; return i; }
struct EarlyReturn {
    a: f64,
}

impl Body for EarlyReturn {
    fn resume(&mut self, resume: Resume) -> Result<Step, GeneratorError> {
        match resume {
            Resume::Start(_) => Ok(Step::Yielded(Value::from(self.a))),
            Resume::Yield(Completion::Normal(_)) => Ok(Step::Returned(Value::from(0))),
            Resume::Yield(c) | Resume::Await(c) => Ok(unwind(c)),
        }
    }
}

/// async function* agf(a) { yield* a; }
struct DelegateAll {
    source: Option<Value>,
}

impl Body for DelegateAll {
    fn resume(&mut self, resume: Resume) -> Result<Step, GeneratorError> {
        match resume {
            Resume::Start(_) => Ok(Step::Delegated(self.source.take().unwrap_or(Value::Undefined))),
            Resume::Yield(Completion::Normal(_)) => Ok(Step::Returned(Value::Undefined)),
            Resume::Yield(c) | Resume::Await(c) => Ok(unwind(c)),
        }
    }
}

fn fulfilled(value: impl Into<Value>, done: bool) -> Expected {
    Expected::Fulfilled(IterResult::new(value, done))
}

fn done() -> Expected {
    Expected::Fulfilled(IterResult::done())
}

fn basic_functionality() -> Result<Vec<Check>, GeneratorError> {
    const NAME: &str = "Basic functionality";
    let test_value = || Value::from("test value");
    let rejected = || Expected::Rejected(Value::from("test value"));

    let generator = AsyncGenerator::new(Empty);
    let mut checks = vec![
        Check::new(NAME, "throw method on SuspendedStart", generator.throw(test_value()), rejected()),
        Check::new(NAME, "throw method on completed", generator.throw(test_value()), rejected()),
        Check::new(NAME, "next method on completed", generator.next(test_value()), done()),
    ];
    let generator = AsyncGenerator::new(Empty);
    checks.extend([
        Check::new(NAME, "next method on SuspendedStart", generator.next(test_value()), done()),
        Check::new(NAME, "throw method on completed", generator.throw(test_value()), rejected()),
        Check::new(NAME, "next method on completed", generator.next(test_value()), done()),
    ]);
    Ok(checks)
}

fn simple_yield() -> Result<Vec<Check>, GeneratorError> {
    const NAME: &str = "Simple yield";
    let generator = AsyncGenerator::new(CountFrom { a: 2.0, i: 0.0 });
    let mut checks = vec![
        Check::new(NAME, "yielded values 1", generator.next(Value::Undefined), fulfilled(2, false)),
        Check::new(NAME, "yielded values 2", generator.next(Value::Undefined), fulfilled(3, false)),
        Check::new(NAME, "yielded values 3", generator.next(Value::Undefined), fulfilled(4, false)),
        Check::new(NAME, "yielded values 4", generator.next(Value::Undefined), fulfilled(2, true)),
    ];
    let generator = AsyncGenerator::new(CountFrom { a: 3.0, i: 0.0 });
    checks.extend([
        Check::new(NAME, "yielded values 5", generator.next(Value::Undefined), fulfilled(3, false)),
        Check::new(NAME, "yielded value with return", generator.r#return(Value::Undefined), done()),
        Check::new(NAME, "next after .return() call", generator.next(Value::Undefined), done()),
    ]);
    Ok(checks)
}

fn await_scenario(name: &'static str, delay: Option<Duration>) -> Vec<Check> {
    let generator = AsyncGenerator::new(AwaitThenYield { a: 2.0, i: 0.0, delay });
    vec![
        Check::new(name, "yielded values with await 1", generator.next(Value::Undefined), fulfilled(2, false)),
        Check::new(name, "yielded values with await 2", generator.next(Value::Undefined), fulfilled(3, false)),
        Check::new(name, "yielded values with await 3", generator.next(Value::Undefined), fulfilled(4, false)),
        Check::new(name, "yielded values with await 4", generator.next(Value::Undefined), fulfilled(2, true)),
    ]
}

fn yield_and_await() -> Result<Vec<Check>, GeneratorError> {
    Ok(await_scenario("Yield and await", None))
}

fn yield_and_timer_await() -> Result<Vec<Check>, GeneratorError> {
    Ok(await_scenario("Yield and timer await", Some(Duration::from_millis(5))))
}

fn yield_and_early_return() -> Result<Vec<Check>, GeneratorError> {
    const NAME: &str = "Yield and early return";
    let generator = AsyncGenerator::new(EarlyReturn { a: 2.0 });
    Ok(vec![
        Check::new(NAME, "yielded value before return", generator.next(Value::Undefined), fulfilled(2, false)),
        Check::new(NAME, "returned value", generator.next(Value::Undefined), fulfilled(0, true)),
        Check::new(NAME, "value after return", generator.next(Value::Undefined), done()),
        Check::new(NAME, "value after return", generator.next(Value::Undefined), done()),
    ])
}

fn yield_star() -> Result<Vec<Check>, GeneratorError> {
    const NAME: &str = "Yield*";
    let source = Value::from(vec![Value::from(3), Value::from(2), Value::from(1), Value::from(5)]);
    let generator = AsyncGenerator::new(DelegateAll { source: Some(source) });
    Ok(vec![
        Check::new(NAME, "yield* from array 1", generator.next(Value::Undefined), fulfilled(3, false)),
        Check::new(NAME, "yield* from array 2", generator.next(Value::Undefined), fulfilled(2, false)),
        Check::new(NAME, "yield* from array 3", generator.next(Value::Undefined), fulfilled(1, false)),
        Check::new(NAME, "yield* from array 4", generator.next(Value::Undefined), fulfilled(5, false)),
        Check::new(NAME, "yield* from array 5", generator.next(Value::Undefined), done()),
    ])
}
