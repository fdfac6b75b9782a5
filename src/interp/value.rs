//! Runtime values for the interpreter
//!
//! Values are tagged; containers are shared by reference and internally
//! locked because goroutines run on real threads.

use super::channel::ChannelRef;
use super::env::EnvRef;
use super::error::{InterpResult, RuntimeError};
use crate::ast::Block;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Native function signature: values in, value or error out
pub type NativeFn = Arc<dyn Fn(&[Value]) -> InterpResult<Value> + Send + Sync>;

/// Opaque host payload hidden inside struct fields (latches, compiled regexes)
pub type HandleRef = Arc<dyn Any + Send + Sync>;

/// Runtime value
#[derive(Clone)]
pub enum Value {
    /// 64-bit integer (also carries runes and bytes)
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Immutable string
    Str(String),
    /// Absent value / nil
    Null,
    /// Slice view over shared backing storage
    Slice(SliceRef),
    /// Hash map with insertion-agnostic iteration
    Map(MapRef),
    /// Struct instance
    Struct(StructRef),
    /// Channel
    Chan(ChannelRef),
    /// User-defined or native function
    Func(Arc<Function>),
    /// Package namespace object
    Package(Arc<Package>),
    /// Builtin type name in conversion position
    TypeRef(String),
    /// Native payload; never constructible from interpreted code
    Handle(HandleRef),
}

/// Slice: a (offset, len) view over reference-counted backing storage.
/// Reslicing shares the backing; `append` may extend it in place or
/// reallocate, so callers must re-bind the result.
#[derive(Clone)]
pub struct SliceRef {
    pub elem_type: String,
    backing: Arc<Mutex<Vec<Value>>>,
    offset: usize,
    len: usize,
}

impl SliceRef {
    pub fn new(elem_type: impl Into<String>, data: Vec<Value>) -> Self {
        let len = data.len();
        SliceRef {
            elem_type: elem_type.into(),
            backing: Arc::new(Mutex::new(data)),
            offset: 0,
            len,
        }
    }

    /// Backing storage sized for `make([]T, len, cap)`
    pub fn with_capacity(elem_type: impl Into<String>, len: usize, cap: usize, zero: Value) -> Self {
        let cap = cap.max(len);
        let mut data = Vec::with_capacity(cap);
        data.resize(len, zero);
        SliceRef {
            elem_type: elem_type.into(),
            backing: Arc::new(Mutex::new(data)),
            offset: 0,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cap(&self) -> usize {
        let backing = self.backing.lock();
        backing.capacity().saturating_sub(self.offset).max(self.len)
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        if index >= self.len {
            return None;
        }
        Some(self.backing.lock()[self.offset + index].clone())
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        if index >= self.len {
            return false;
        }
        self.backing.lock()[self.offset + index] = value;
        true
    }

    /// `s[lo:hi]` sharing the backing storage; requires 0 <= lo <= hi <= len
    pub fn reslice(&self, lo: usize, hi: usize) -> Option<SliceRef> {
        if lo > hi || hi > self.len {
            return None;
        }
        Some(SliceRef {
            elem_type: self.elem_type.clone(),
            backing: self.backing.clone(),
            offset: self.offset + lo,
            len: hi - lo,
        })
    }

    /// Append elements, returning the new view. Extends in place when this
    /// view ends at the backing's end, otherwise copies out to fresh storage.
    pub fn append(&self, elems: Vec<Value>) -> SliceRef {
        let mut backing = self.backing.lock();
        let added = elems.len();
        if self.offset + self.len == backing.len() {
            backing.extend(elems);
            return SliceRef {
                elem_type: self.elem_type.clone(),
                backing: self.backing.clone(),
                offset: self.offset,
                len: self.len + added,
            };
        }
        let mut data: Vec<Value> = backing[self.offset..self.offset + self.len].to_vec();
        drop(backing);
        data.extend(elems);
        SliceRef::new(self.elem_type.clone(), data)
    }

    /// Snapshot of the visible elements
    pub fn to_vec(&self) -> Vec<Value> {
        let backing = self.backing.lock();
        backing[self.offset..self.offset + self.len].to_vec()
    }

    /// Run `f` over the visible elements in place (sort, copy)
    pub fn with_elems_mut<R>(&self, f: impl FnOnce(&mut [Value]) -> R) -> R {
        let mut backing = self.backing.lock();
        let range = self.offset..self.offset + self.len;
        f(&mut backing[range])
    }

    pub fn same_backing(&self, other: &SliceRef) -> bool {
        Arc::ptr_eq(&self.backing, &other.backing)
    }

    fn backing_ptr(&self) -> *const () {
        Arc::as_ptr(&self.backing).cast()
    }
}

/// Map contents: hashed-key-string -> (original key, value)
pub struct MapData {
    pub key_type: String,
    pub elem_type: String,
    entries: HashMap<String, (Value, Value)>,
}

/// Shared map handle
#[derive(Clone)]
pub struct MapRef(Arc<Mutex<MapData>>);

impl MapRef {
    pub fn new(key_type: impl Into<String>, elem_type: impl Into<String>) -> Self {
        MapRef(Arc::new(Mutex::new(MapData {
            key_type: key_type.into(),
            elem_type: elem_type.into(),
            entries: HashMap::new(),
        })))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let data = self.0.lock();
        data.entries.get(&hash_key(key)).map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: Value, value: Value) {
        let hashed = hash_key(&key);
        self.0.lock().entries.insert(hashed, (key, value));
    }

    pub fn remove(&self, key: &Value) {
        self.0.lock().entries.remove(&hash_key(key));
    }

    pub fn len(&self) -> usize {
        self.0.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn elem_type(&self) -> String {
        self.0.lock().elem_type.clone()
    }

    /// Snapshot of (key, value) pairs; iteration order is unspecified
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.0.lock().entries.values().cloned().collect()
    }

    pub fn ptr_eq(&self, other: &MapRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

/// Struct contents
pub struct StructData {
    pub type_name: String,
    pub fields: HashMap<String, Value>,
}

/// Shared struct handle
#[derive(Clone)]
pub struct StructRef(Arc<Mutex<StructData>>);

impl StructRef {
    pub fn new(type_name: impl Into<String>, fields: HashMap<String, Value>) -> Self {
        StructRef(Arc::new(Mutex::new(StructData {
            type_name: type_name.into(),
            fields,
        })))
    }

    pub fn type_name(&self) -> String {
        self.0.lock().type_name.clone()
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.0.lock().fields.get(name).cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.0.lock().fields.insert(name.to_string(), value);
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.0.lock().fields.contains_key(name)
    }

    /// Snapshot of (name, value) pairs sorted by field name
    pub fn sorted_fields(&self) -> Vec<(String, Value)> {
        let data = self.0.lock();
        let mut out: Vec<(String, Value)> = data
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn ptr_eq(&self, other: &StructRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// User-defined or native function
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub variadic: bool,
    /// Element tag for the packed rest-slice of a variadic function
    pub variadic_elem: String,
    /// Body for user functions
    pub body: Option<Block>,
    /// Captured environment for user functions
    pub env: Option<EnvRef>,
    /// Host callable for native functions
    pub native: Option<NativeFn>,
    pub recv_name: Option<String>,
    pub recv_type: Option<String>,
}

impl Function {
    /// Wrap a host callable as a function value
    pub fn native(name: impl Into<String>, f: NativeFn) -> Self {
        Function {
            name: name.into(),
            params: Vec::new(),
            variadic: false,
            variadic_elem: "any".to_string(),
            body: None,
            env: None,
            native: Some(f),
            recv_name: None,
            recv_type: None,
        }
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("native", &self.native.is_some())
            .finish()
    }
}

/// Field of a struct type definition
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub type_tag: String,
}

/// Named type definition: struct fields in declaration order plus methods
#[derive(Debug, Clone, Default)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub methods: HashMap<String, Arc<Function>>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        TypeDef {
            name: name.into(),
            fields: Vec::new(),
            methods: HashMap::new(),
        }
    }
}

/// Package namespace object binding functions, types, and variables
#[derive(Debug, Default)]
pub struct Package {
    pub name: String,
    pub funcs: HashMap<String, Arc<Function>>,
    pub types: HashMap<String, TypeDef>,
    pub vars: HashMap<String, Value>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            ..Package::default()
        }
    }

    /// Resolve a member: functions first, then types, then variables
    pub fn member(&self, name: &str) -> Option<Value> {
        if let Some(f) = self.funcs.get(name) {
            return Some(Value::Func(f.clone()));
        }
        if let Some(t) = self.types.get(name) {
            return Some(Value::TypeRef(t.name.clone()));
        }
        self.vars.get(name).cloned()
    }
}

impl Value {
    /// Type tag used for method lookup and error messages
    pub fn type_name(&self) -> String {
        match self {
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float64".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Str(_) => "string".to_string(),
            Value::Null => "nil".to_string(),
            Value::Slice(s) => format!("[]{}", s.elem_type),
            Value::Map(_) => "map".to_string(),
            Value::Struct(s) => s.type_name(),
            Value::Chan(c) => format!("chan {}", c.elem_type()),
            Value::Func(_) => "func".to_string(),
            Value::Package(p) => format!("package {}", p.name),
            Value::TypeRef(n) => n.clone(),
            Value::Handle(_) => "native".to_string(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Handle(_) => write!(f, "Handle(<native>)"),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Null => write!(f, "<nil>"),
            Value::Slice(s) => {
                write!(f, "[")?;
                for (i, v) in s.to_vec().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                let mut pairs: Vec<(String, String)> = m
                    .pairs()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                pairs.sort();
                write!(f, "map[")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "]")
            }
            Value::Struct(s) => {
                write!(f, "{}{{", s.type_name())?;
                for (i, (name, value)) in s.sorted_fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{name}:{value}")?;
                }
                write!(f, "}}")
            }
            Value::Chan(c) => write!(f, "<chan {}>", c.elem_type()),
            Value::Func(func) => write!(f, "<func {}>", func.name),
            Value::Package(p) => write!(f, "<package {}>", p.name),
            Value::TypeRef(n) => write!(f, "{n}"),
            Value::Handle(_) => write!(f, "<native>"),
        }
    }
}

/// Tests compare values; containers and functions compare by identity here,
/// interpreted `==` goes through [`values_equal`] instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Slice(a), Value::Slice(b)) => a.same_backing(b) && a.offset == b.offset && a.len == b.len,
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Struct(a), Value::Struct(b)) => a.ptr_eq(b),
            (Value::Chan(a), Value::Chan(b)) => Arc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::TypeRef(a), Value::TypeRef(b)) => a == b,
            _ => false,
        }
    }
}

// --------------- Coercions (total, never panic) ---------------

/// Coerce to integer: truncating, permissive, zero on mismatch
pub fn to_int(v: &Value) -> i64 {
    match v {
        Value::Int(n) => *n,
        Value::Float(x) => *x as i64,
        Value::Bool(b) => i64::from(*b),
        Value::Str(s) => {
            let bytes = s.as_bytes();
            let mut i = 0;
            let mut sign = 1i64;
            if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                if bytes[i] == b'-' {
                    sign = -1;
                }
                i += 1;
            }
            let mut n = 0i64;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                n = n.wrapping_mul(10).wrapping_add(i64::from(bytes[i] - b'0'));
                i += 1;
            }
            sign.wrapping_mul(n)
        }
        _ => 0,
    }
}

/// Coerce to float; strings parse an optional sign then "d.d"
pub fn to_float(v: &Value) -> f64 {
    match v {
        Value::Float(x) => *x,
        Value::Int(n) => *n as f64,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Str(s) => {
            let bytes = s.as_bytes();
            let mut i = 0;
            let mut sign = 1.0;
            if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                if bytes[i] == b'-' {
                    sign = -1.0;
                }
                i += 1;
            }
            let mut int_part = 0.0;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                int_part = int_part * 10.0 + f64::from(bytes[i] - b'0');
                i += 1;
            }
            let mut frac = 0.0;
            let mut base = 1.0;
            if i < bytes.len() && bytes[i] == b'.' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    frac = frac * 10.0 + f64::from(bytes[i] - b'0');
                    base *= 10.0;
                    i += 1;
                }
            }
            sign * (int_part + frac / base)
        }
        _ => 0.0,
    }
}

/// Coerce to bool; empty/"0"/"false" strings and Null are false,
/// functions and containers are true
pub fn to_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(x) => *x != 0.0,
        Value::Str(s) => !s.is_empty() && s != "0" && s != "false",
        Value::Null => false,
        _ => true,
    }
}

/// Coerce to string; a byte-element slice rebuilds the byte sequence
pub fn to_string(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Slice(s) if s.elem_type == "byte" => {
            let bytes: Vec<u8> = s.to_vec().iter().map(|e| (to_int(e) & 0xFF) as u8).collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
        other => other.to_string(),
    }
}

/// Stable hash string for map keys; identity-based for reference values
pub fn hash_key(v: &Value) -> String {
    match v {
        Value::Int(n) => format!("i:{n}"),
        Value::Float(x) => format!("f:{x}"),
        Value::Bool(b) => format!("b:{}", u8::from(*b)),
        Value::Str(s) => format!("s:{s}"),
        Value::Null => "nil".to_string(),
        Value::Struct(s) => {
            let mut out = format!("struct:{}:", s.type_name());
            for (name, value) in s.sorted_fields() {
                out.push_str(&name);
                out.push('=');
                out.push_str(&hash_key(&value));
                out.push(';');
            }
            out
        }
        Value::Slice(s) => format!("p:{:p}+{}", s.backing_ptr(), s.offset),
        Value::Map(m) => format!("p:{:p}", m.as_ptr()),
        Value::Chan(c) => format!("p:{:p}", Arc::as_ptr(c)),
        Value::Func(f) => format!("p:{:p}", Arc::as_ptr(f)),
        Value::Package(p) => format!("pkg:{}", p.name),
        Value::TypeRef(n) => format!("t:{n}"),
        Value::Handle(h) => format!("p:{:p}", Arc::as_ptr(h).cast::<()>()),
    }
}

/// Equality for `==`, switch cases, and map semantics.
///
/// Same-tag scalars compare by value (Int/Float promote), structs compare
/// structurally field by field, functions and channels by identity.
/// Slices and maps are never compared and raise a type error.
pub fn values_equal(a: &Value, b: &Value) -> InterpResult<bool> {
    match (a, b) {
        (Value::Slice(_), _) | (_, Value::Slice(_)) => {
            Err(RuntimeError::type_error("slice can only be compared to nil"))
        }
        (Value::Map(_), _) | (_, Value::Map(_)) => {
            Err(RuntimeError::type_error("map can only be compared to nil"))
        }
        (Value::Int(x), Value::Int(y)) => Ok(x == y),
        (Value::Float(_), Value::Int(_))
        | (Value::Int(_), Value::Float(_))
        | (Value::Float(_), Value::Float(_)) => Ok(to_float(a) == to_float(b)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::Null, Value::Null) => Ok(true),
        (Value::Struct(x), Value::Struct(y)) => {
            if x.ptr_eq(y) {
                return Ok(true);
            }
            if x.type_name() != y.type_name() {
                return Ok(false);
            }
            let xf = x.sorted_fields();
            let yf = y.sorted_fields();
            if xf.len() != yf.len() {
                return Ok(false);
            }
            for ((xn, xv), (yn, yv)) in xf.iter().zip(yf.iter()) {
                if xn != yn || !values_equal(xv, yv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Chan(x), Value::Chan(y)) => Ok(Arc::ptr_eq(x, y)),
        (Value::Func(x), Value::Func(y)) => Ok(Arc::ptr_eq(x, y)),
        (Value::Handle(x), Value::Handle(y)) => {
            Ok(std::ptr::eq(Arc::as_ptr(x).cast::<()>(), Arc::as_ptr(y).cast::<()>()))
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_int() {
        assert_eq!(to_int(&Value::Int(42)), 42);
        assert_eq!(to_int(&Value::Float(3.9)), 3);
        assert_eq!(to_int(&Value::Float(-3.9)), -3);
        assert_eq!(to_int(&Value::Bool(true)), 1);
        assert_eq!(to_int(&Value::Bool(false)), 0);
        assert_eq!(to_int(&Value::Str("123".into())), 123);
        assert_eq!(to_int(&Value::Str("-7x".into())), -7);
        assert_eq!(to_int(&Value::Str("+9".into())), 9);
        assert_eq!(to_int(&Value::Str("abc".into())), 0);
        assert_eq!(to_int(&Value::Null), 0);
    }

    #[test]
    fn test_to_float() {
        assert_eq!(to_float(&Value::Float(2.5)), 2.5);
        assert_eq!(to_float(&Value::Int(4)), 4.0);
        assert_eq!(to_float(&Value::Str("3.25".into())), 3.25);
        assert_eq!(to_float(&Value::Str("-1.5".into())), -1.5);
        assert_eq!(to_float(&Value::Str("junk".into())), 0.0);
        assert_eq!(to_float(&Value::Bool(true)), 1.0);
    }

    #[test]
    fn test_to_bool() {
        assert!(to_bool(&Value::Bool(true)));
        assert!(!to_bool(&Value::Int(0)));
        assert!(to_bool(&Value::Int(-1)));
        assert!(!to_bool(&Value::Float(0.0)));
        assert!(!to_bool(&Value::Str("".into())));
        assert!(!to_bool(&Value::Str("0".into())));
        assert!(!to_bool(&Value::Str("false".into())));
        assert!(to_bool(&Value::Str("yes".into())));
        assert!(!to_bool(&Value::Null));
        assert!(to_bool(&Value::Slice(SliceRef::new("int", vec![]))));
    }

    #[test]
    fn test_to_string_scalars() {
        assert_eq!(to_string(&Value::Int(13)), "13");
        assert_eq!(to_string(&Value::Float(5.14)), "5.14");
        assert_eq!(to_string(&Value::Float(5.0)), "5");
        assert_eq!(to_string(&Value::Bool(true)), "true");
        assert_eq!(to_string(&Value::Str("hi".into())), "hi");
    }

    #[test]
    fn test_to_string_byte_slice() {
        let bytes = SliceRef::new(
            "byte",
            vec![Value::Int(104), Value::Int(105)],
        );
        assert_eq!(to_string(&Value::Slice(bytes)), "hi");
    }

    #[test]
    fn test_round_trip_decimal() {
        for n in [-17i64, 0, 42, 99999] {
            let text = to_string(&Value::Int(n));
            assert_eq!(to_int(&Value::Str(text)), n);
        }
    }

    #[test]
    fn test_slice_view_and_append() {
        let s1 = SliceRef::new("int", vec![Value::Int(1), Value::Int(2)]);
        let s2 = s1.append(vec![Value::Int(3)]);
        assert_eq!(s1.len(), 2);
        assert_eq!(s2.len(), 3);
        assert_eq!(s2.get(2), Some(Value::Int(3)));
        assert_eq!(s2.get(0), Some(Value::Int(1)));
    }

    #[test]
    fn test_reslice_shares_backing() {
        let s = SliceRef::new(
            "int",
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)],
        );
        let sub = s.reslice(1, 3).unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.get(0), Some(Value::Int(2)));
        sub.set(0, Value::Int(99));
        assert_eq!(s.get(1), Some(Value::Int(99)));
    }

    #[test]
    fn test_reslice_bounds() {
        let s = SliceRef::new("int", vec![Value::Int(1), Value::Int(2)]);
        assert!(s.reslice(0, 2).is_some());
        assert!(s.reslice(2, 2).is_some());
        assert!(s.reslice(1, 0).is_none());
        assert!(s.reslice(0, 3).is_none());
    }

    #[test]
    fn test_slice_cap_at_least_len() {
        let s = SliceRef::with_capacity("int", 2, 8, Value::Int(0));
        assert_eq!(s.len(), 2);
        assert!(s.cap() >= 8);
    }

    #[test]
    fn test_map_insert_get_remove() {
        let m = MapRef::new("string", "int");
        m.insert(Value::Str("a".into()), Value::Int(1));
        assert_eq!(m.get(&Value::Str("a".into())), Some(Value::Int(1)));
        assert_eq!(m.len(), 1);
        m.remove(&Value::Str("a".into()));
        assert_eq!(m.get(&Value::Str("a".into())), None);
        m.remove(&Value::Str("missing".into()));
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn test_map_uniqueness_after_delete() {
        let m = MapRef::new("string", "int");
        m.insert(Value::Str("k".into()), Value::Int(1));
        m.remove(&Value::Str("k".into()));
        assert_eq!(m.get(&Value::Str("k".into())), None);
    }

    #[test]
    fn test_struct_fields() {
        let mut fields = HashMap::new();
        fields.insert("x".to_string(), Value::Int(3));
        let s = StructRef::new("Point", fields);
        assert_eq!(s.get_field("x"), Some(Value::Int(3)));
        s.set_field("x", Value::Int(4));
        assert_eq!(s.get_field("x"), Some(Value::Int(4)));
        assert_eq!(s.get_field("y"), None);
    }

    #[test]
    fn test_structural_struct_equality() {
        let mut f1 = HashMap::new();
        f1.insert("x".to_string(), Value::Int(1));
        f1.insert("y".to_string(), Value::Int(2));
        let mut f2 = HashMap::new();
        f2.insert("y".to_string(), Value::Int(2));
        f2.insert("x".to_string(), Value::Int(1));
        let a = Value::Struct(StructRef::new("P", f1));
        let b = Value::Struct(StructRef::new("P", f2));
        assert!(values_equal(&a, &b).unwrap());

        let mut f3 = HashMap::new();
        f3.insert("x".to_string(), Value::Int(9));
        f3.insert("y".to_string(), Value::Int(2));
        let c = Value::Struct(StructRef::new("P", f3));
        assert!(!values_equal(&a, &c).unwrap());
    }

    #[test]
    fn test_numeric_equality_promotes() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)).unwrap());
        assert!(!values_equal(&Value::Int(2), &Value::Float(2.5)).unwrap());
    }

    #[test]
    fn test_slice_comparison_errors() {
        let s = Value::Slice(SliceRef::new("int", vec![]));
        assert!(values_equal(&s, &Value::Null).is_err());
        let m = Value::Map(MapRef::new("string", "int"));
        assert!(values_equal(&m, &m.clone()).is_err());
    }

    #[test]
    fn test_cross_tag_equality_false() {
        assert!(!values_equal(&Value::Int(1), &Value::Str("1".into())).unwrap());
        assert!(!values_equal(&Value::Bool(true), &Value::Int(1)).unwrap());
    }

    #[test]
    fn test_package_member_order() {
        let mut pkg = Package::new("demo");
        pkg.funcs.insert(
            "F".to_string(),
            Arc::new(Function::native("F", Arc::new(|_| Ok(Value::Null)))),
        );
        pkg.vars.insert("V".to_string(), Value::Int(7));
        pkg.types.insert("T".to_string(), TypeDef::new("T"));
        assert!(matches!(pkg.member("F"), Some(Value::Func(_))));
        assert!(matches!(pkg.member("T"), Some(Value::TypeRef(_))));
        assert_eq!(pkg.member("V"), Some(Value::Int(7)));
        assert!(pkg.member("missing").is_none());
    }

    #[test]
    fn test_display_forms() {
        let s = Value::Slice(SliceRef::new(
            "int",
            vec![Value::Int(1), Value::Int(2)],
        ));
        assert_eq!(s.to_string(), "[1 2]");
        assert_eq!(Value::Null.to_string(), "<nil>");
    }

    #[test]
    fn test_hash_key_scalars() {
        assert_eq!(hash_key(&Value::Int(5)), "i:5");
        assert_eq!(hash_key(&Value::Str("a".into())), "s:a");
        assert_eq!(hash_key(&Value::Bool(true)), "b:1");
        assert_ne!(hash_key(&Value::Int(1)), hash_key(&Value::Str("1".into())));
    }
}
