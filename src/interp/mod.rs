//! Tree-walking interpreter: values, scopes, channels, evaluator, packages

mod builtins;
mod channel;
mod env;
mod error;
mod eval;
mod packages;
mod value;

pub use builtins::{builtin_append, builtin_cap, builtin_copy, builtin_len, zero_value};
pub use channel::{Channel, ChannelRef};
pub use env::{child_env, env_declare, env_get, env_set, Env, EnvRef, Frame, Ref, Task};
pub use error::{ErrorKind, InterpResult, RuntimeError};
pub use eval::{Flow, Interpreter, ParserFn};
pub use packages::{register_builtin_packages, sprintf};
pub use value::{
    hash_key, to_bool, to_float, to_int, to_string, values_equal, Function, HandleRef, MapRef,
    NativeFn, Package, SliceRef, StructRef, TypeDef, Value,
};
