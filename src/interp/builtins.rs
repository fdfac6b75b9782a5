//! Built-in functions and type-tag helpers

use super::channel::Channel;
use super::error::{InterpResult, RuntimeError};
use super::value::{to_int, to_string, MapRef, SliceRef, Value};

/// Split "map[Key]Val" into key and value type tags
pub fn parse_map_type(tag: &str) -> (String, String) {
    let tag = tag.trim();
    let Some(rest) = tag.strip_prefix("map[") else {
        return (String::new(), String::new());
    };
    let mut depth = 1usize;
    for (i, c) in rest.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    let key = rest[..i].trim().to_string();
                    let val = rest[i + 1..].trim().to_string();
                    return (key, val);
                }
            }
            _ => {}
        }
    }
    (String::new(), String::new())
}

/// Zero value for a type tag. Named struct types resolve through the
/// evaluator (which owns the type registry); here they become Null.
pub fn zero_value(tag: &str) -> Value {
    match tag {
        "int" | "byte" => Value::Int(0),
        "float64" => Value::Float(0.0),
        "bool" => Value::Bool(false),
        "string" => Value::Str(String::new()),
        "" | "nil" | "any" | "struct{}" => Value::Null,
        _ => {
            if tag.starts_with('*') {
                return Value::Null;
            }
            if let Some(elem) = tag.strip_prefix("[]") {
                return Value::Slice(SliceRef::new(elem, Vec::new()));
            }
            if tag.starts_with("map[") {
                let (k, v) = parse_map_type(tag);
                return Value::Map(MapRef::new(k, v));
            }
            if let Some(elem) = tag.strip_prefix("chan ") {
                return Value::Chan(Channel::new(elem.trim(), 0));
            }
            Value::Null
        }
    }
}

/// Whether a name is a builtin scalar type usable as a conversion
pub fn is_builtin_type(name: &str) -> bool {
    matches!(name, "int" | "float64" | "bool" | "string" | "byte")
}

/// Conversion calls: `int(x)`, `string(bs)`, ...; `byte` masks to 8 bits
pub fn convert(tag: &str, v: &Value) -> Value {
    match tag {
        "int" => Value::Int(to_int(v)),
        "float64" => Value::Float(super::value::to_float(v)),
        "bool" => Value::Bool(super::value::to_bool(v)),
        "string" => Value::Str(to_string(v)),
        "byte" => Value::Int(to_int(v) & 0xFF),
        _ => v.clone(),
    }
}

/// `make(T, ...)` for slices, maps, and channels
pub fn builtin_make(tag: &str, args: &[Value]) -> Value {
    if let Some(elem) = tag.strip_prefix("[]") {
        let length = args.first().map(to_int).unwrap_or(0).max(0) as usize;
        let capacity = args.get(1).map(to_int).unwrap_or(0).max(0) as usize;
        return Value::Slice(SliceRef::with_capacity(
            elem,
            length,
            capacity,
            zero_value(elem),
        ));
    }
    if tag.starts_with("map[") {
        let (k, v) = parse_map_type(tag);
        return Value::Map(MapRef::new(k, v));
    }
    if let Some(elem) = tag.strip_prefix("chan ") {
        let capacity = args.first().map(to_int).unwrap_or(0).max(0) as usize;
        return Value::Chan(Channel::new(elem.trim(), capacity));
    }
    Value::Null
}

/// `len`: string bytes, slice, map; 0 otherwise
pub fn builtin_len(v: &Value) -> i64 {
    match v {
        Value::Str(s) => s.len() as i64,
        Value::Slice(s) => s.len() as i64,
        Value::Map(m) => m.len() as i64,
        _ => 0,
    }
}

/// `cap`: slice only; 0 otherwise
pub fn builtin_cap(v: &Value) -> i64 {
    match v {
        Value::Slice(s) => s.cap() as i64,
        _ => 0,
    }
}

/// `append`: byte-element slices mask appended values to 8 bits.
/// Callers must re-bind the result.
pub fn builtin_append(slice: &Value, elems: Vec<Value>) -> Value {
    let Value::Slice(s) = slice else {
        return slice.clone();
    };
    let elems = if s.elem_type == "byte" {
        elems
            .into_iter()
            .map(|e| Value::Int(to_int(&e) & 0xFF))
            .collect()
    } else {
        elems
    };
    Value::Slice(s.append(elems))
}

/// `copy(dst, src)`: element-wise, returns min(len(dst), len(src))
pub fn builtin_copy(dst: &Value, src: &Value) -> i64 {
    let (Value::Slice(d), Value::Slice(s)) = (dst, src) else {
        return 0;
    };
    let from = s.to_vec();
    d.with_elems_mut(|elems| {
        let n = from.len().min(elems.len());
        elems[..n].clone_from_slice(&from[..n]);
        n as i64
    })
}

/// `close(ch)`
pub fn builtin_close(v: &Value) -> InterpResult<Value> {
    match v {
        Value::Chan(ch) => {
            ch.close()?;
            Ok(Value::Null)
        }
        _ => Err(RuntimeError::channel("close of non-channel")),
    }
}
