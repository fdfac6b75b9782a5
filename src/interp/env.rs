//! Environment for variable bindings
//!
//! Scopes chain to a parent environment. Goroutines share scopes across
//! threads, so references are `Arc<Mutex<_>>`; lookups lock one level at a
//! time, inner to outer.

use super::error::{InterpResult, RuntimeError};
use super::value::{Function, MapRef, SliceRef, StructRef, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared reference to an environment
pub type EnvRef = Arc<Mutex<Env>>;

/// Environment holding variable bindings
pub struct Env {
    /// Variable bindings in this scope
    vars: HashMap<String, Value>,
    /// Parent environment for lexical scoping
    parent: Option<EnvRef>,
}

impl Env {
    /// Create a new global environment
    pub fn new() -> Self {
        Env {
            vars: HashMap::new(),
            parent: None,
        }
    }

    /// Create a new environment with a parent
    pub fn with_parent(parent: EnvRef) -> Self {
        Env {
            vars: HashMap::new(),
            parent: Some(parent),
        }
    }

    /// Wrap in Arc<Mutex<>>
    pub fn into_ref(self) -> EnvRef {
        Arc::new(Mutex::new(self))
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a child environment from a parent reference
pub fn child_env(parent: &EnvRef) -> EnvRef {
    Env::with_parent(Arc::clone(parent)).into_ref()
}

/// Declare a variable in the innermost scope
pub fn env_declare(env: &EnvRef, name: &str, value: Value) {
    env.lock().vars.insert(name.to_string(), value);
}

/// Look up a variable in the scope chain
pub fn env_get(env: &EnvRef, name: &str) -> Option<Value> {
    let mut current = Arc::clone(env);
    loop {
        let parent = {
            let guard = current.lock();
            if let Some(v) = guard.vars.get(name) {
                return Some(v.clone());
            }
            guard.parent.clone()
        };
        match parent {
            Some(p) => current = p,
            None => return None,
        }
    }
}

/// Set a variable: the first existing binding walking outward is mutated;
/// an unbound name is created in the innermost scope
pub fn env_set(env: &EnvRef, name: &str, value: Value) {
    let mut current = Arc::clone(env);
    loop {
        let parent = {
            let mut guard = current.lock();
            if guard.vars.contains_key(name) {
                guard.vars.insert(name.to_string(), value);
                return;
            }
            guard.parent.clone()
        };
        match parent {
            Some(p) => current = p,
            None => {
                env.lock().vars.insert(name.to_string(), value);
                return;
            }
        }
    }
}

/// Check if a variable exists in the scope chain
pub fn env_contains(env: &EnvRef, name: &str) -> bool {
    env_get(env, name).is_some()
}

// --------------- Lvalue references for assignments ---------------

/// A resolved assignment target
pub enum Ref {
    /// Named variable in a scope chain
    Var { env: EnvRef, name: String },
    /// Slice element; index already bounds-checked at resolution
    SliceIndex { slice: SliceRef, index: usize },
    /// Map entry under a key
    MapIndex { map: MapRef, key: Value },
    /// Struct field
    Field { strct: StructRef, name: String },
}

impl Ref {
    /// Current value of the target; an unbound variable reads as Null
    pub fn get(&self) -> InterpResult<Value> {
        match self {
            Ref::Var { env, name } => Ok(env_get(env, name).unwrap_or(Value::Null)),
            Ref::SliceIndex { slice, index } => slice
                .get(*index)
                .ok_or_else(RuntimeError::index_out_of_range),
            Ref::MapIndex { map, key } => Ok(map.get(key).unwrap_or(Value::Null)),
            Ref::Field { strct, name } => strct
                .get_field(name)
                .ok_or_else(|| RuntimeError::no_such_field(name)),
        }
    }

    /// Store a value through the target
    pub fn set(&self, value: Value) -> InterpResult<()> {
        match self {
            Ref::Var { env, name } => {
                env_set(env, name, value);
                Ok(())
            }
            Ref::SliceIndex { slice, index } => {
                if slice.set(*index, value) {
                    Ok(())
                } else {
                    Err(RuntimeError::index_out_of_range())
                }
            }
            Ref::MapIndex { map, key } => {
                map.insert(key.clone(), value);
                Ok(())
            }
            Ref::Field { strct, name } => {
                if strct.has_field(name) {
                    strct.set_field(name, value);
                    Ok(())
                } else {
                    Err(RuntimeError::no_such_field(name))
                }
            }
        }
    }
}

// ------------------- Call frames for defer/panic ------------------

/// A call captured by `defer` or `go`: callee plus snapshotted arguments
pub struct DeferredCall {
    pub func: Arc<Function>,
    pub recv: Option<Value>,
    pub args: Vec<Value>,
}

/// Per-call record holding pending deferred invocations
#[derive(Default)]
pub struct Frame {
    pub defers: Vec<DeferredCall>,
}

/// One logical task: the main task or a goroutine, owning its frame stack
#[derive(Default)]
pub struct Task {
    frames: Vec<Frame>,
}

impl Task {
    pub fn new() -> Self {
        Task { frames: Vec::new() }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Take the pending defers of the current frame, leaving it empty
    pub fn take_defers(&mut self) -> Vec<DeferredCall> {
        match self.frames.last_mut() {
            Some(frame) => std::mem::take(&mut frame.defers),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_get() {
        let env = Env::new().into_ref();
        env_declare(&env, "x", Value::Int(42));
        assert_eq!(env_get(&env, "x"), Some(Value::Int(42)));
        assert_eq!(env_get(&env, "y"), None);
    }

    #[test]
    fn test_scope_chain() {
        let parent = Env::new().into_ref();
        env_declare(&parent, "x", Value::Int(1));

        let child = child_env(&parent);
        env_declare(&child, "y", Value::Int(2));

        // Child sees parent bindings; parent does not see child's
        assert_eq!(env_get(&child, "x"), Some(Value::Int(1)));
        assert_eq!(env_get(&child, "y"), Some(Value::Int(2)));
        assert_eq!(env_get(&parent, "y"), None);
    }

    #[test]
    fn test_shadowing() {
        let parent = Env::new().into_ref();
        env_declare(&parent, "x", Value::Int(1));
        let child = child_env(&parent);
        env_declare(&child, "x", Value::Int(2));

        assert_eq!(env_get(&child, "x"), Some(Value::Int(2)));
        assert_eq!(env_get(&parent, "x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_set_walks_outward() {
        let parent = Env::new().into_ref();
        env_declare(&parent, "x", Value::Int(1));
        let child = child_env(&parent);

        env_set(&child, "x", Value::Int(99));
        assert_eq!(env_get(&parent, "x"), Some(Value::Int(99)));
    }

    #[test]
    fn test_set_creates_in_innermost_when_unbound() {
        let parent = Env::new().into_ref();
        let child = child_env(&parent);

        env_set(&child, "fresh", Value::Int(5));
        assert_eq!(env_get(&child, "fresh"), Some(Value::Int(5)));
        assert_eq!(env_get(&parent, "fresh"), None);
    }

    #[test]
    fn test_set_updates_nearest_definition() {
        let grandparent = Env::new().into_ref();
        env_declare(&grandparent, "x", Value::Int(1));
        let parent = child_env(&grandparent);
        env_declare(&parent, "x", Value::Int(10));
        let child = child_env(&parent);

        env_set(&child, "x", Value::Int(99));
        assert_eq!(env_get(&parent, "x"), Some(Value::Int(99)));
        assert_eq!(env_get(&grandparent, "x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_environment_opacity() {
        // Reads of a name not declared in a child are identical to parent reads
        let parent = Env::new().into_ref();
        env_declare(&parent, "n", Value::Str("v".into()));
        let child = child_env(&parent);
        assert_eq!(env_get(&child, "n"), env_get(&parent, "n"));
    }

    #[test]
    fn test_contains() {
        let parent = Env::new().into_ref();
        env_declare(&parent, "x", Value::Int(1));
        let child = child_env(&parent);
        assert!(env_contains(&child, "x"));
        assert!(!env_contains(&child, "y"));
    }

    #[test]
    fn test_var_ref() {
        let env = Env::new().into_ref();
        env_declare(&env, "x", Value::Int(1));
        let r = Ref::Var {
            env: env.clone(),
            name: "x".to_string(),
        };
        assert_eq!(r.get().unwrap(), Value::Int(1));
        r.set(Value::Int(2)).unwrap();
        assert_eq!(env_get(&env, "x"), Some(Value::Int(2)));
    }

    #[test]
    fn test_slice_index_ref() {
        let s = SliceRef::new("int", vec![Value::Int(1), Value::Int(2)]);
        let r = Ref::SliceIndex {
            slice: s.clone(),
            index: 1,
        };
        assert_eq!(r.get().unwrap(), Value::Int(2));
        r.set(Value::Int(9)).unwrap();
        assert_eq!(s.get(1), Some(Value::Int(9)));

        let out = Ref::SliceIndex { slice: s, index: 5 };
        assert!(out.set(Value::Int(0)).is_err());
    }

    #[test]
    fn test_map_index_ref_stores_null() {
        let m = MapRef::new("string", "int");
        let r = Ref::MapIndex {
            map: m.clone(),
            key: Value::Str("k".into()),
        };
        r.set(Value::Int(1)).unwrap();
        assert_eq!(m.get(&Value::Str("k".into())), Some(Value::Int(1)));

        // Storing Null keeps the entry; delete() is the only deletion path
        r.set(Value::Null).unwrap();
        assert_eq!(m.get(&Value::Str("k".into())), Some(Value::Null));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_field_ref_unknown_field() {
        let s = StructRef::new("P", HashMap::new());
        let r = Ref::Field {
            strct: s,
            name: "missing".to_string(),
        };
        assert!(r.get().is_err());
        assert!(r.set(Value::Int(1)).is_err());
    }

    #[test]
    fn test_task_frames() {
        let mut task = Task::new();
        assert_eq!(task.depth(), 0);
        task.push_frame();
        task.push_frame();
        assert_eq!(task.depth(), 2);
        assert!(task.pop_frame().is_some());
        assert_eq!(task.depth(), 1);
    }

    #[test]
    fn test_take_defers_empties_frame() {
        let mut task = Task::new();
        task.push_frame();
        task.current_frame_mut().unwrap().defers.push(DeferredCall {
            func: Arc::new(Function::native("d", Arc::new(|_| Ok(Value::Null)))),
            recv: None,
            args: vec![],
        });
        assert_eq!(task.take_defers().len(), 1);
        assert_eq!(task.take_defers().len(), 0);
    }
}
