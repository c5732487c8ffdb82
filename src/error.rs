use crate::core::{ErrorValue, Value};

#[derive(thiserror::Error, Debug)]
pub enum GeneratorError {
    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Protocol error at {method} {file}:{line}: {message}")]
    ProtocolError {
        message: String,
        file: String,
        line: usize,
        method: String,
    },

    #[error("Infinite loop detected (executed {iterations} iterations)")]
    InfiniteLoopError { iterations: usize },

    #[error("Event loop went idle before promise #{promise_id} settled")]
    EventLoopStalled { promise_id: usize },

    #[error("Thrown value: {value}")]
    Throw { value: Value },

    #[error("std::io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GeneratorError {
    pub fn type_error(message: impl Into<String>) -> Self {
        GeneratorError::TypeError { message: message.into() }
    }

    /// Convert the failure into the value used to reject a completion.
    /// A `Throw` hands back the thrown value unchanged.
    pub fn into_value(self) -> Value {
        match self {
            GeneratorError::Throw { value } => value,
            GeneratorError::TypeError { message } => Value::Error(ErrorValue::new("TypeError", message)),
            GeneratorError::ProtocolError { message, .. } => Value::Error(ErrorValue::new("TypeError", message)),
            GeneratorError::InfiniteLoopError { .. } => Value::Error(ErrorValue::new("RangeError", self.to_string())),
            other => Value::Error(ErrorValue::new("InternalError", other.to_string())),
        }
    }
}

impl From<GeneratorError> for std::io::Error {
    fn from(err: GeneratorError) -> std::io::Error {
        match err {
            GeneratorError::IoError(io_err) => io_err,
            _ => std::io::Error::other(err.to_string()),
        }
    }
}

// Builds a ProtocolError at the invocation site. A macro keeps `file!()`
// and `line!()` pointing at the caller.
#[macro_export]
macro_rules! protocol_error_here {
    ($msg:expr) => {
        $crate::GeneratorError::ProtocolError {
            message: $msg.to_string(),
            file: file!().to_string(),
            line: line!() as usize,
            method: $crate::function_name!().to_string(),
        }
    };
}

#[macro_export]
macro_rules! raise_type_error {
    ($($arg:tt)*) => {
        $crate::GeneratorError::TypeError { message: format!($($arg)*) }
    };
}

#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        // remove the trailing "::f"
        &name[..name.len() - 3]
    }};
}
