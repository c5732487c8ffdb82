use crate::core::{IterResult, Value};
use crate::error::GeneratorError;
use crate::promise::{Promise, reject_promise, resolve_promise};
use crate::raise_type_error;
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Next,
    Throw,
    Return,
}

impl RequestKind {
    pub fn method_name(self) -> &'static str {
        match self {
            RequestKind::Next => "next",
            RequestKind::Throw => "throw",
            RequestKind::Return => "return",
        }
    }

    pub fn from_method(name: &str) -> Result<Self, GeneratorError> {
        match name {
            "next" => Ok(RequestKind::Next),
            "throw" => Ok(RequestKind::Throw),
            "return" => Ok(RequestKind::Return),
            other => Err(raise_type_error!("'{other}' is not a generator resumption method")),
        }
    }
}

pub struct Request {
    pub kind: RequestKind,
    pub input: Value,
    pub outcome: Promise,
}

/// FIFO of pending requests plus the single in-flight flag.
///
/// The head request is in flight from `begin_dispatch` until `take_settled`;
/// nothing behind it is dispatched in between.
#[derive(Default)]
pub struct RequestQueue {
    pending: VecDeque<Request>,
    in_flight: bool,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: RequestKind, input: Value) -> Promise {
        let outcome = Promise::new();
        self.pending.push_back(Request {
            kind,
            input,
            outcome: outcome.clone(),
        });
        outcome
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn begin_dispatch(&mut self) -> Option<(RequestKind, Value)> {
        if self.in_flight {
            return None;
        }
        let head = self.pending.front()?;
        self.in_flight = true;
        Some((head.kind, head.input.clone()))
    }

    pub fn take_settled(&mut self) -> Option<Request> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        self.pending.pop_front()
    }
}

pub fn settle(request: Request, outcome: Result<IterResult, Value>) {
    log::debug!(
        "settle {} request (promise #{}): {:?}",
        request.kind.method_name(),
        request.outcome.id(),
        outcome
    );
    match outcome {
        Ok(result) => resolve_promise(&request.outcome, result.into()),
        Err(reason) => reject_promise(&request.outcome, reason),
    }
}
