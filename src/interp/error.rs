//! Runtime errors for the interpreter

use super::Value;
use std::fmt;

/// Runtime error during interpretation
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Kinds of runtime errors
#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// Identifier, selector, or method not found
    Undefined,
    /// Operation on an incompatible value
    TypeError,
    /// Index or slice bounds violation
    Bounds,
    /// Send on closed channel, double close, non-channel operand
    ChannelError,
    /// Integer `%` with zero divisor
    DivisionByZero,
    /// Error returned by a host-injected native function
    NativeError,
    /// Malformed program setup (bad package clause, missing main)
    Setup,
    /// Call depth limit exceeded
    StackOverflow,
    /// Construct outside the supported subset
    Unsupported,
    /// Panic unwinding, carrying the panic value
    Panic(Box<Value>),
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        // Panic carries a payload; kinds compare by discriminant only
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl RuntimeError {
    pub fn undefined(name: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::Undefined,
            message: format!("undefined: {name}"),
        }
    }

    pub fn undefined_member(owner: &str, member: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::Undefined,
            message: format!("unknown package member: {owner}.{member}"),
        }
    }

    pub fn method_not_found(type_name: &str, method: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::Undefined,
            message: format!("method not found: {type_name}.{method}"),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        RuntimeError {
            kind: ErrorKind::TypeError,
            message: message.into(),
        }
    }

    pub fn no_such_field(name: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::TypeError,
            message: format!("no such field: {name}"),
        }
    }

    pub fn index_out_of_range() -> Self {
        RuntimeError {
            kind: ErrorKind::Bounds,
            message: "index out of range".to_string(),
        }
    }

    pub fn invalid_slice_indices() -> Self {
        RuntimeError {
            kind: ErrorKind::Bounds,
            message: "invalid slice indices".to_string(),
        }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        RuntimeError {
            kind: ErrorKind::ChannelError,
            message: message.into(),
        }
    }

    pub fn division_by_zero() -> Self {
        RuntimeError {
            kind: ErrorKind::DivisionByZero,
            message: "integer divide by zero".to_string(),
        }
    }

    pub fn native(message: impl Into<String>) -> Self {
        RuntimeError {
            kind: ErrorKind::NativeError,
            message: message.into(),
        }
    }

    pub fn setup(message: impl Into<String>) -> Self {
        RuntimeError {
            kind: ErrorKind::Setup,
            message: message.into(),
        }
    }

    pub fn no_main() -> Self {
        Self::setup("no main() function found")
    }

    pub fn stack_overflow() -> Self {
        RuntimeError {
            kind: ErrorKind::StackOverflow,
            message: "stack overflow: too deep recursion".to_string(),
        }
    }

    pub fn unsupported(what: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::Unsupported,
            message: format!("unsupported: {what}"),
        }
    }

    /// Raise a panic carrying `value`; unwinds through defers
    pub fn panic_with(value: Value) -> Self {
        let message = format!("panic: {value}");
        RuntimeError {
            kind: ErrorKind::Panic(Box::new(value)),
            message,
        }
    }

    /// Whether this error is a panic unwind
    pub fn is_panic(&self) -> bool {
        matches!(self.kind, ErrorKind::Panic(_))
    }

    /// The panic payload, when this error is a panic
    pub fn panic_value(&self) -> Option<&Value> {
        match &self.kind {
            ErrorKind::Panic(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Result type for interpreter operations
pub type InterpResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined() {
        let err = RuntimeError::undefined("foo");
        assert_eq!(err.kind, ErrorKind::Undefined);
        assert_eq!(err.message, "undefined: foo");
    }

    #[test]
    fn test_undefined_member() {
        let err = RuntimeError::undefined_member("fmt", "Scan");
        assert_eq!(err.kind, ErrorKind::Undefined);
        assert!(err.message.contains("fmt.Scan"));
    }

    #[test]
    fn test_method_not_found() {
        let err = RuntimeError::method_not_found("Point", "Area");
        assert!(err.message.contains("Point.Area"));
    }

    #[test]
    fn test_no_such_field() {
        let err = RuntimeError::no_such_field("w");
        assert_eq!(err.message, "no such field: w");
    }

    #[test]
    fn test_bounds_errors() {
        assert_eq!(
            RuntimeError::index_out_of_range().message,
            "index out of range"
        );
        assert_eq!(
            RuntimeError::invalid_slice_indices().message,
            "invalid slice indices"
        );
    }

    #[test]
    fn test_channel_error() {
        let err = RuntimeError::channel("send on closed channel");
        assert_eq!(err.kind, ErrorKind::ChannelError);
        assert_eq!(err.message, "send on closed channel");
    }

    #[test]
    fn test_panic_carries_value() {
        let err = RuntimeError::panic_with(Value::Str("boom".into()));
        assert!(err.is_panic());
        assert!(err.message.contains("boom"));
        assert!(matches!(err.panic_value(), Some(Value::Str(s)) if s == "boom"));
    }

    #[test]
    fn test_panic_display() {
        let err = RuntimeError::panic_with(Value::Int(7));
        assert_eq!(format!("{err}"), "panic: 7");
    }

    #[test]
    fn test_kind_eq_by_discriminant() {
        let a = ErrorKind::Panic(Box::new(Value::Int(1)));
        let b = ErrorKind::Panic(Box::new(Value::Int(2)));
        assert_eq!(a, b);
        assert_ne!(ErrorKind::Undefined, ErrorKind::TypeError);
    }

    #[test]
    fn test_is_std_error() {
        let err = RuntimeError::division_by_zero();
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn test_no_main_message() {
        assert_eq!(RuntimeError::no_main().message, "no main() function found");
    }
}
