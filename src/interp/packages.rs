//! Curated standard-library packages
//!
//! Every package is a namespace of native functions built over the host
//! capability registry. Output goes through the `ConsoleLog` capability,
//! formatting through `__hostSprintf`; a host that registers neither gets
//! silent prints and failing Printf. Optional capabilities used here:
//! `HTTPGetText`, `HostReadFile`, `LocalStorageSetItem`/`LocalStorageGetItem`,
//! and the DOM/canvas natives the `browser` package passes through to.

use super::error::{InterpResult, RuntimeError};
use super::eval::Interpreter;
use super::value::{
    to_bool, to_float, to_int, to_string, Function, MapRef, Package, SliceRef, StructRef, TypeDef,
    Value,
};
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn native_func(
    name: &str,
    f: impl Fn(&[Value]) -> InterpResult<Value> + Send + Sync + 'static,
) -> Arc<Function> {
    Arc::new(Function::native(name, Arc::new(f)))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

/// Minimal Go-style verb formatter backing `fmt.Printf`/`Sprintf`.
/// Supported verbs: %v %s %d %t %f %g %%, plus %.Nf precision.
pub fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut next = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => {
                // Optional ".N" precision before the verb
                let mut precision: Option<usize> = None;
                if chars.peek() == Some(&'.') {
                    chars.next();
                    let mut digits = String::new();
                    while let Some(d) = chars.peek() {
                        if d.is_ascii_digit() {
                            digits.push(*d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    precision = digits.parse().ok();
                }
                let verb = chars.next().unwrap_or('v');
                let value = args.get(next).cloned().unwrap_or(Value::Null);
                next += 1;
                match verb {
                    'v' | 's' => out.push_str(&to_string(&value)),
                    'd' => out.push_str(&to_int(&value).to_string()),
                    't' => out.push_str(if to_bool(&value) { "true" } else { "false" }),
                    'f' => {
                        let p = precision.unwrap_or(6);
                        out.push_str(&format!("{:.*}", p, to_float(&value)));
                    }
                    'g' => out.push_str(&to_float(&value).to_string()),
                    other => {
                        // Unknown verb: echo it, keep the argument consumed
                        out.push('%');
                        out.push(other);
                    }
                }
            }
        }
    }
    out
}

/// Join arguments with spaces and write a line through `ConsoleLog`
fn console_out(vm: &Interpreter, text: &str) {
    if let Some(log) = vm.native_fn("ConsoleLog") {
        let _ = log(&[Value::Str(text.to_string())]);
    }
}

fn host_sprintf(vm: &Interpreter, args: &[Value]) -> InterpResult<String> {
    let sp = vm
        .native_fn("__hostSprintf")
        .ok_or_else(|| RuntimeError::native("host sprintf not available"))?;
    Ok(to_string(&sp(args)?))
}

// ---------------- fmt ----------------

fn fmt_package(vm: &Interpreter) -> Package {
    let mut pkg = Package::new("fmt");

    let vm1 = vm.clone();
    pkg.funcs.insert(
        "Println".to_string(),
        native_func("Println", move |args| {
            let line = args
                .iter()
                .map(to_string)
                .collect::<Vec<_>>()
                .join(" ");
            console_out(&vm1, &line);
            Ok(Value::Int(line.len() as i64))
        }),
    );

    let vm2 = vm.clone();
    pkg.funcs.insert(
        "Printf".to_string(),
        native_func("Printf", move |args| {
            if args.is_empty() {
                return Ok(Value::Int(0));
            }
            let text = host_sprintf(&vm2, args)?;
            console_out(&vm2, &text);
            Ok(Value::Int(text.len() as i64))
        }),
    );

    let vm3 = vm.clone();
    pkg.funcs.insert(
        "Sprintf".to_string(),
        native_func("Sprintf", move |args| {
            if args.is_empty() {
                return Ok(Value::Str(String::new()));
            }
            Ok(Value::Str(host_sprintf(&vm3, args)?))
        }),
    );

    pkg
}

// ---------------- time ----------------

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn time_package() -> Package {
    let mut pkg = Package::new("time");
    pkg.funcs.insert(
        "Now".to_string(),
        native_func("Now", |_| Ok(Value::Int(now_ms()))),
    );
    pkg.funcs.insert(
        "Sleep".to_string(),
        native_func("Sleep", |args| {
            let ms = to_int(&arg(args, 0)).max(0);
            std::thread::sleep(Duration::from_millis(ms as u64));
            Ok(Value::Null)
        }),
    );
    pkg.funcs.insert(
        "Since".to_string(),
        native_func("Since", |args| {
            let start = to_int(&arg(args, 0));
            Ok(Value::Int(now_ms() - start))
        }),
    );
    pkg
}

// ---------------- math ----------------

fn math_package() -> Package {
    let mut pkg = Package::new("math");
    let unary: [(&str, fn(f64) -> f64); 8] = [
        ("Sqrt", f64::sqrt),
        ("Sin", f64::sin),
        ("Cos", f64::cos),
        ("Abs", f64::abs),
        ("Floor", f64::floor),
        ("Ceil", f64::ceil),
        ("Round", f64::round),
        ("Trunc", f64::trunc),
    ];
    for (name, f) in unary {
        pkg.funcs.insert(
            name.to_string(),
            native_func(name, move |args| Ok(Value::Float(f(to_float(&arg(args, 0)))))),
        );
    }
    pkg.funcs.insert(
        "Pow".to_string(),
        native_func("Pow", |args| {
            Ok(Value::Float(
                to_float(&arg(args, 0)).powf(to_float(&arg(args, 1))),
            ))
        }),
    );
    pkg.funcs.insert(
        "Max".to_string(),
        native_func("Max", |args| {
            Ok(Value::Float(to_float(&arg(args, 0)).max(to_float(&arg(args, 1)))))
        }),
    );
    pkg.funcs.insert(
        "Min".to_string(),
        native_func("Min", |args| {
            Ok(Value::Float(to_float(&arg(args, 0)).min(to_float(&arg(args, 1)))))
        }),
    );
    pkg.vars
        .insert("Pi".to_string(), Value::Float(std::f64::consts::PI));
    pkg
}

// ---------------- math/rand ----------------

fn rand_package() -> Package {
    let mut pkg = Package::new("math/rand");
    let rng = Arc::new(Mutex::new(StdRng::from_entropy()));

    let r1 = rng.clone();
    pkg.funcs.insert(
        "Intn".to_string(),
        native_func("Intn", move |args| {
            let n = to_int(&arg(args, 0));
            if n <= 0 {
                return Ok(Value::Int(0));
            }
            Ok(Value::Int(r1.lock().gen_range(0..n)))
        }),
    );

    let r2 = rng.clone();
    pkg.funcs.insert(
        "Seed".to_string(),
        native_func("Seed", move |args| {
            *r2.lock() = StdRng::seed_from_u64(to_int(&arg(args, 0)) as u64);
            Ok(Value::Null)
        }),
    );

    let r3 = rng;
    pkg.funcs.insert(
        "Float64".to_string(),
        native_func("Float64", move |_| Ok(Value::Float(r3.lock().gen::<f64>()))),
    );

    pkg
}

// ---------------- encoding/json ----------------

/// Convert a runtime value to a JSON tree; hidden `__`-prefixed struct
/// fields are skipped, functions and channels are unsupported
fn value_to_json(v: &Value) -> InterpResult<serde_json::Value> {
    use serde_json::Value as Json;
    Ok(match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::Number((*n).into()),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::Slice(s) => {
            let mut arr = Vec::with_capacity(s.len());
            for e in s.to_vec() {
                arr.push(value_to_json(&e)?);
            }
            Json::Array(arr)
        }
        Value::Map(m) => {
            let mut obj = serde_json::Map::new();
            for (k, val) in m.pairs() {
                obj.insert(to_string(&k), value_to_json(&val)?);
            }
            Json::Object(obj)
        }
        Value::Struct(s) => {
            let mut obj = serde_json::Map::new();
            for (name, val) in s.sorted_fields() {
                if name.starts_with("__") {
                    continue;
                }
                obj.insert(name, value_to_json(&val)?);
            }
            Json::Object(obj)
        }
        other => {
            return Err(RuntimeError::native(format!(
                "json: unsupported type: {}",
                other.type_name()
            )))
        }
    })
}

/// Decode a JSON tree to a dynamic runtime value: objects become
/// string-keyed maps, arrays become `any` slices, integral numbers Int
fn json_to_value(j: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match j {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => {
            let data = items.iter().map(json_to_value).collect();
            Value::Slice(SliceRef::new("any", data))
        }
        Json::Object(obj) => {
            let map = MapRef::new("string", "any");
            for (k, v) in obj {
                map.insert(Value::Str(k.clone()), json_to_value(v));
            }
            Value::Map(map)
        }
    }
}

fn json_package() -> Package {
    let mut pkg = Package::new("encoding/json");
    // Marshal returns the JSON text directly; Unmarshal returns a dynamic
    // value instead of filling a pointer
    pkg.funcs.insert(
        "Marshal".to_string(),
        native_func("Marshal", |args| {
            if args.is_empty() {
                return Ok(Value::Str("null".to_string()));
            }
            let tree = value_to_json(&args[0])?;
            serde_json::to_string(&tree)
                .map(Value::Str)
                .map_err(|e| RuntimeError::native(format!("json: {e}")))
        }),
    );
    pkg.funcs.insert(
        "Unmarshal".to_string(),
        native_func("Unmarshal", |args| {
            if args.is_empty() {
                return Ok(Value::Null);
            }
            let text = to_string(&arg(args, 0));
            let tree: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| RuntimeError::native(format!("json: {e}")))?;
            Ok(json_to_value(&tree))
        }),
    );
    pkg
}

// ---------------- strings ----------------

fn strings_package() -> Package {
    let mut pkg = Package::new("strings");
    let mut add =
        |name: &str, f: Box<dyn Fn(&[Value]) -> InterpResult<Value> + Send + Sync>| {
            pkg.funcs
                .insert(name.to_string(), Arc::new(Function::native(name, Arc::from(f))));
        };

    add(
        "Contains",
        Box::new(|args| {
            Ok(Value::Bool(
                to_string(&arg(args, 0)).contains(&to_string(&arg(args, 1))),
            ))
        }),
    );
    add(
        "Split",
        Box::new(|args| {
            let s = to_string(&arg(args, 0));
            let sep = to_string(&arg(args, 1));
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(&sep).map(|p| Value::Str(p.to_string())).collect()
            };
            Ok(Value::Slice(SliceRef::new("string", parts)))
        }),
    );
    add(
        "Join",
        Box::new(|args| {
            let sep = to_string(&arg(args, 1));
            let joined = match &arg(args, 0) {
                Value::Slice(s) => s
                    .to_vec()
                    .iter()
                    .map(to_string)
                    .collect::<Vec<_>>()
                    .join(&sep),
                _ => String::new(),
            };
            Ok(Value::Str(joined))
        }),
    );
    add(
        "ReplaceAll",
        Box::new(|args| {
            Ok(Value::Str(to_string(&arg(args, 0)).replace(
                &to_string(&arg(args, 1)),
                &to_string(&arg(args, 2)),
            )))
        }),
    );
    add(
        "ToUpper",
        Box::new(|args| Ok(Value::Str(to_string(&arg(args, 0)).to_uppercase()))),
    );
    add(
        "ToLower",
        Box::new(|args| Ok(Value::Str(to_string(&arg(args, 0)).to_lowercase()))),
    );
    add(
        "TrimSpace",
        Box::new(|args| Ok(Value::Str(to_string(&arg(args, 0)).trim().to_string()))),
    );
    add(
        "HasPrefix",
        Box::new(|args| {
            Ok(Value::Bool(
                to_string(&arg(args, 0)).starts_with(&to_string(&arg(args, 1))),
            ))
        }),
    );
    add(
        "HasSuffix",
        Box::new(|args| {
            Ok(Value::Bool(
                to_string(&arg(args, 0)).ends_with(&to_string(&arg(args, 1))),
            ))
        }),
    );
    add(
        "TrimPrefix",
        Box::new(|args| {
            let s = to_string(&arg(args, 0));
            let prefix = to_string(&arg(args, 1));
            Ok(Value::Str(
                s.strip_prefix(&prefix).unwrap_or(&s).to_string(),
            ))
        }),
    );
    add(
        "TrimSuffix",
        Box::new(|args| {
            let s = to_string(&arg(args, 0));
            let suffix = to_string(&arg(args, 1));
            Ok(Value::Str(
                s.strip_suffix(&suffix).unwrap_or(&s).to_string(),
            ))
        }),
    );
    add(
        "Count",
        Box::new(|args| {
            let s = to_string(&arg(args, 0));
            let sub = to_string(&arg(args, 1));
            let n = if sub.is_empty() {
                s.chars().count() as i64 + 1
            } else {
                s.matches(&sub).count() as i64
            };
            Ok(Value::Int(n))
        }),
    );
    add(
        "Index",
        Box::new(|args| {
            let s = to_string(&arg(args, 0));
            let sub = to_string(&arg(args, 1));
            Ok(Value::Int(
                s.find(&sub).map(|i| i as i64).unwrap_or(-1),
            ))
        }),
    );
    add(
        "Repeat",
        Box::new(|args| {
            let s = to_string(&arg(args, 0));
            let n = to_int(&arg(args, 1)).max(0) as usize;
            Ok(Value::Str(s.repeat(n)))
        }),
    );
    pkg
}

// ---------------- sort ----------------

fn sort_package() -> Package {
    let mut pkg = Package::new("sort");
    pkg.funcs.insert(
        "Ints".to_string(),
        native_func("Ints", |args| {
            if let Value::Slice(s) = &arg(args, 0) {
                s.with_elems_mut(|elems| elems.sort_by_key(to_int));
            }
            Ok(Value::Null)
        }),
    );
    pkg.funcs.insert(
        "Strings".to_string(),
        native_func("Strings", |args| {
            if let Value::Slice(s) = &arg(args, 0) {
                s.with_elems_mut(|elems| elems.sort_by_key(to_string));
            }
            Ok(Value::Null)
        }),
    );
    pkg
}

// ---------------- strconv ----------------

fn strconv_package() -> Package {
    let mut pkg = Package::new("strconv");
    pkg.funcs.insert(
        "Itoa".to_string(),
        native_func("Itoa", |args| {
            Ok(Value::Str(to_int(&arg(args, 0)).to_string()))
        }),
    );
    pkg.funcs.insert(
        "Atoi".to_string(),
        native_func("Atoi", |args| {
            let s = to_string(&arg(args, 0));
            s.parse::<i64>().map(Value::Int).map_err(|_| {
                RuntimeError::native(format!("strconv.Atoi: parsing {s:?}: invalid syntax"))
            })
        }),
    );
    pkg.funcs.insert(
        "FormatBool".to_string(),
        native_func("FormatBool", |args| {
            Ok(Value::Str(to_bool(&arg(args, 0)).to_string()))
        }),
    );
    pkg.funcs.insert(
        "ParseBool".to_string(),
        native_func("ParseBool", |args| {
            let s = to_string(&arg(args, 0));
            match s.as_str() {
                "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
                "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
                _ => Err(RuntimeError::native(format!(
                    "strconv.ParseBool: parsing {s:?}: invalid syntax"
                ))),
            }
        }),
    );
    pkg
}

// ---------------- sync ----------------

/// Native counting latch backing `sync.WaitGroup`
pub struct Latch {
    count: Mutex<i64>,
    cv: Condvar,
}

impl Latch {
    fn new() -> Self {
        Latch {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn add(&self, delta: i64) {
        let mut count = self.count.lock();
        *count += delta;
        if *count <= 0 {
            self.cv.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cv.wait(&mut count);
        }
    }
}

/// The latch hidden in a WaitGroup's `__native` field, installed on first use
fn ensure_latch(recv: &Value) -> InterpResult<Arc<Latch>> {
    let Value::Struct(s) = recv else {
        return Err(RuntimeError::type_error(
            "WaitGroup method on non-struct receiver",
        ));
    };
    if let Some(Value::Handle(h)) = s.get_field("__native") {
        if let Ok(latch) = h.downcast::<Latch>() {
            return Ok(latch);
        }
    }
    let latch = Arc::new(Latch::new());
    s.set_field("__native", Value::Handle(latch.clone()));
    Ok(latch)
}

fn sync_package(vm: &Interpreter) -> Package {
    let mut wg = TypeDef::new("WaitGroup");
    wg.methods.insert(
        "Add".to_string(),
        native_func("Add", |args| {
            let latch = ensure_latch(&arg(args, 0))?;
            latch.add(to_int(&arg(args, 1)));
            Ok(Value::Null)
        }),
    );
    wg.methods.insert(
        "Done".to_string(),
        native_func("Done", |args| {
            let latch = ensure_latch(&arg(args, 0))?;
            latch.add(-1);
            Ok(Value::Null)
        }),
    );
    wg.methods.insert(
        "Wait".to_string(),
        native_func("Wait", |args| {
            let latch = ensure_latch(&arg(args, 0))?;
            latch.wait();
            Ok(Value::Null)
        }),
    );
    vm.register_type(wg.clone());

    let mut pkg = Package::new("sync");
    pkg.types.insert("WaitGroup".to_string(), wg);
    pkg
}

// ---------------- regexp ----------------

/// The compiled program behind a Regexp value; a receiver without one is a
/// type error rather than a silent match-nothing fallback
fn ensure_regexp(recv: &Value) -> InterpResult<Arc<Regex>> {
    if let Value::Struct(s) = recv {
        if let Some(Value::Handle(h)) = s.get_field("__native") {
            if let Ok(re) = h.downcast::<Regex>() {
                return Ok(re);
            }
        }
    }
    Err(RuntimeError::type_error(
        "Regexp is not initialised; construct it with regexp.Compile",
    ))
}

fn regexp_package(vm: &Interpreter) -> Package {
    let mut re_type = TypeDef::new("Regexp");
    re_type.methods.insert(
        "MatchString".to_string(),
        native_func("MatchString", |args| {
            let re = ensure_regexp(&arg(args, 0))?;
            Ok(Value::Bool(re.is_match(&to_string(&arg(args, 1)))))
        }),
    );
    re_type.methods.insert(
        "FindStringSubmatch".to_string(),
        native_func("FindStringSubmatch", |args| {
            let re = ensure_regexp(&arg(args, 0))?;
            let text = to_string(&arg(args, 1));
            let groups: Vec<Value> = match re.captures(&text) {
                Some(caps) => caps
                    .iter()
                    .map(|m| Value::Str(m.map(|m| m.as_str().to_string()).unwrap_or_default()))
                    .collect(),
                None => Vec::new(),
            };
            Ok(Value::Slice(SliceRef::new("string", groups)))
        }),
    );
    vm.register_type(re_type.clone());

    let mut pkg = Package::new("regexp");
    pkg.types.insert("Regexp".to_string(), re_type);
    pkg.funcs.insert(
        "Compile".to_string(),
        native_func("Compile", |args| {
            let pattern = to_string(&arg(args, 0));
            let re = Regex::new(&pattern)
                .map_err(|e| RuntimeError::native(format!("invalid regular expression: {e}")))?;
            let mut fields = HashMap::new();
            fields.insert("__native".to_string(), Value::Handle(Arc::new(re)));
            Ok(Value::Struct(StructRef::new("Regexp", fields)))
        }),
    );
    pkg
}

// ---------------- text/template ----------------

/// Walk a dotted path through a JSON tree
fn json_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut cur = root;
    for seg in path.split('.') {
        cur = match cur {
            serde_json::Value::Object(obj) => obj.get(seg)?,
            serde_json::Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn json_scalar_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render `{{field.path}}` placeholders against converted runtime data;
/// unknown paths render empty
fn render_template(template: &str, data: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim().trim_start_matches('.');
                if !path.is_empty() {
                    if let Some(v) = json_path(data, path) {
                        out.push_str(&json_scalar_text(v));
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn template_package() -> Package {
    let mut pkg = Package::new("text/template");
    pkg.funcs.insert(
        "RenderString".to_string(),
        native_func("RenderString", |args| {
            if args.is_empty() {
                return Ok(Value::Str(String::new()));
            }
            let template = to_string(&arg(args, 0));
            // Runtime containers become plain mappings/sequences first
            let data = match args.get(1) {
                Some(v) => value_to_json(v)?,
                None => serde_json::Value::Null,
            };
            Ok(Value::Str(render_template(&template, &data)))
        }),
    );
    pkg
}

// ---------------- capability pass-throughs ----------------

/// Call a host capability when present, else return a fallback
fn capability_call(
    vm: &Interpreter,
    native: &str,
    args: &[Value],
    fallback: Value,
) -> InterpResult<Value> {
    match vm.native_fn(native) {
        Some(f) => f(args),
        None => Ok(fallback),
    }
}

fn http_package(vm: &Interpreter) -> Package {
    let mut pkg = Package::new("http");
    let vm = vm.clone();
    pkg.funcs.insert(
        "GetText".to_string(),
        native_func("GetText", move |args| {
            capability_call(
                &vm,
                "HTTPGetText",
                &[Value::Str(to_string(&arg(args, 0)))],
                Value::Str(String::new()),
            )
        }),
    );
    pkg
}

fn storage_package(vm: &Interpreter) -> Package {
    let mut pkg = Package::new("storage");
    let vm1 = vm.clone();
    pkg.funcs.insert(
        "SetItem".to_string(),
        native_func("SetItem", move |args| {
            capability_call(
                &vm1,
                "LocalStorageSetItem",
                &[
                    Value::Str(to_string(&arg(args, 0))),
                    Value::Str(to_string(&arg(args, 1))),
                ],
                Value::Null,
            )
        }),
    );
    let vm2 = vm.clone();
    pkg.funcs.insert(
        "GetItem".to_string(),
        native_func("GetItem", move |args| {
            capability_call(
                &vm2,
                "LocalStorageGetItem",
                &[Value::Str(to_string(&arg(args, 0)))],
                Value::Str(String::new()),
            )
        }),
    );
    pkg
}

fn fs_package(vm: &Interpreter) -> Package {
    let mut pkg = Package::new("fs");
    let vm = vm.clone();
    pkg.funcs.insert(
        "ReadFile".to_string(),
        native_func("ReadFile", move |args| {
            capability_call(
                &vm,
                "HostReadFile",
                &[Value::Str(to_string(&arg(args, 0)))],
                Value::Str(String::new()),
            )
        }),
    );
    pkg
}

/// Selector stored by `$` in a JQ value's hidden field
fn jq_stored_sel(recv: &Value) -> String {
    if let Value::Struct(s) = recv {
        if let Some(v) = s.get_field("__sel") {
            return to_string(&v);
        }
    }
    String::new()
}

/// jQuery-style convenience type: methods wrap the same DOM natives the
/// `browser` package exposes. An explicit selector argument wins over the
/// one stored by `$`.
fn jq_type(vm: &Interpreter) -> TypeDef {
    let mut jq = TypeDef::new("JQ");

    let vm_text = vm.clone();
    jq.methods.insert(
        "Text".to_string(),
        native_func("Text", move |args| {
            let sel = if args.len() >= 2 {
                to_string(&args[1])
            } else {
                jq_stored_sel(&arg(args, 0))
            };
            if sel.is_empty() {
                return Ok(Value::Str(String::new()));
            }
            capability_call(
                &vm_text,
                "GetInnerHTML",
                &[Value::Str(sel)],
                Value::Str(String::new()),
            )
        }),
    );

    // Html/Set/AddClass/RemoveClass all take (selector, payload)
    let setters: [(&str, &str); 4] = [
        ("Html", "SetInnerHTML"),
        ("Set", "SetValue"),
        ("AddClass", "AddClass"),
        ("RemoveClass", "RemoveClass"),
    ];
    for (name, native) in setters {
        let vm = vm.clone();
        jq.methods.insert(
            name.to_string(),
            native_func(name, move |args| {
                let (sel, payload) = if args.len() >= 3 {
                    (to_string(&args[1]), to_string(&args[2]))
                } else {
                    (jq_stored_sel(&arg(args, 0)), String::new())
                };
                if !sel.is_empty() {
                    capability_call(
                        &vm,
                        native,
                        &[Value::Str(sel), Value::Str(payload)],
                        Value::Null,
                    )?;
                }
                Ok(Value::Null)
            }),
        );
    }

    // Event hooks cannot be registered from inside the sandbox; On is a no-op
    jq.methods
        .insert("On".to_string(), native_func("On", |_| Ok(Value::Null)));

    jq
}

fn browser_package(vm: &Interpreter) -> Package {
    let mut pkg = Package::new("browser");

    // Console helpers join their arguments like Println
    for name in ["ConsoleLog", "ConsoleWarn", "ConsoleError"] {
        let vm = vm.clone();
        pkg.funcs.insert(
            name.to_string(),
            native_func(name, move |args| {
                let line = args
                    .iter()
                    .map(to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                capability_call(&vm, name, &[Value::Str(line)], Value::Null)
            }),
        );
    }

    // DOM helpers delegate to same-shaped host natives
    let dom: [(&str, &str, usize); 8] = [
        ("SetHTML", "SetInnerHTML", 2),
        ("GetHTML", "GetInnerHTML", 1),
        ("SetValue", "SetValue", 2),
        ("GetValue", "GetValue", 1),
        ("AddClass", "AddClass", 2),
        ("RemoveClass", "RemoveClass", 2),
        ("Open", "OpenWindow", 1),
        ("Alert", "Alert", 1),
    ];
    for (name, native, arity) in dom {
        let vm = vm.clone();
        pkg.funcs.insert(
            name.to_string(),
            native_func(name, move |args| {
                let forwarded: Vec<Value> = (0..arity)
                    .map(|i| Value::Str(to_string(&arg(args, i))))
                    .collect();
                capability_call(&vm, native, &forwarded, Value::Str(String::new()))
            }),
        );
    }

    // Canvas passthrough keeps arguments untouched
    for name in ["CanvasSize", "CanvasSet", "CanvasFlush"] {
        let vm = vm.clone();
        pkg.funcs.insert(
            name.to_string(),
            native_func(name, move |args| {
                capability_call(&vm, name, args, Value::Null)
            }),
        );
    }

    // $(sel) returns a JQ value carrying the selector in a hidden field
    let jq = jq_type(vm);
    vm.register_type(jq.clone());
    pkg.types.insert("JQ".to_string(), jq);
    pkg.funcs.insert(
        "$".to_string(),
        native_func("$", |args| {
            let sel = args.first().map(to_string).unwrap_or_default();
            let mut fields = HashMap::new();
            fields.insert("__sel".to_string(), Value::Str(sel));
            Ok(Value::Struct(StructRef::new("JQ", fields)))
        }),
    );

    pkg
}

/// Install the curated package set under their import paths.
/// `fmt` is also immediately usable without an import, as are the other
/// aliases bound here.
pub fn register_builtin_packages(vm: &Interpreter) {
    vm.register_package("fmt", fmt_package(vm));
    vm.register_package("time", time_package());
    vm.register_package("math", math_package());
    vm.register_package("math/rand", rand_package());
    let json = json_package();
    vm.register_package("encoding/json", json);
    vm.register_package("json", json_package());
    vm.register_package("strings", strings_package());
    vm.register_package("sort", sort_package());
    vm.register_package("strconv", strconv_package());
    vm.register_package("sync", sync_package(vm));
    vm.register_package("regexp", regexp_package(vm));
    vm.register_package("text/template", template_package());
    vm.register_package("http", http_package(vm));
    vm.register_package("storage", storage_package(vm));
    vm.register_package("fs", fs_package(vm));
    vm.register_package("browser", browser_package(vm));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprintf_verbs() {
        assert_eq!(
            sprintf("x=%d y=%d", &[Value::Int(10), Value::Int(20)]),
            "x=10 y=20"
        );
        assert_eq!(sprintf("%s!", &[Value::Str("hi".into())]), "hi!");
        assert_eq!(sprintf("%v", &[Value::Bool(true)]), "true");
        assert_eq!(sprintf("%t", &[Value::Int(0)]), "false");
        assert_eq!(sprintf("100%%", &[]), "100%");
        assert_eq!(sprintf("%.2f", &[Value::Float(1.005)]), "1.00");
        assert_eq!(sprintf("%g", &[Value::Float(2.5)]), "2.5");
    }

    #[test]
    fn test_sprintf_missing_args() {
        assert_eq!(sprintf("%d %d", &[Value::Int(1)]), "1 0");
    }

    #[test]
    fn test_json_round_trip() {
        let m = MapRef::new("string", "any");
        m.insert(Value::Str("n".into()), Value::Int(3));
        m.insert(
            Value::Str("items".into()),
            Value::Slice(SliceRef::new(
                "any",
                vec![Value::Int(1), Value::Str("two".into()), Value::Bool(true)],
            )),
        );
        let v = Value::Map(m);
        let tree = value_to_json(&v).unwrap();
        let text = serde_json::to_string(&tree).unwrap();
        let back = json_to_value(&serde_json::from_str(&text).unwrap());

        let Value::Map(back) = back else { panic!("not a map") };
        assert_eq!(back.get(&Value::Str("n".into())), Some(Value::Int(3)));
        let Some(Value::Slice(items)) = back.get(&Value::Str("items".into())) else {
            panic!("items missing")
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items.get(1), Some(Value::Str("two".into())));
    }

    #[test]
    fn test_json_integral_numbers_decode_to_int() {
        let v = json_to_value(&serde_json::from_str("[1, 2.5]").unwrap());
        let Value::Slice(s) = v else { panic!("not a slice") };
        assert_eq!(s.get(0), Some(Value::Int(1)));
        assert_eq!(s.get(1), Some(Value::Float(2.5)));
    }

    #[test]
    fn test_json_unsupported_type() {
        let f = Value::Func(Arc::new(Function::native("f", Arc::new(|_| Ok(Value::Null)))));
        assert!(value_to_json(&f).is_err());
    }

    #[test]
    fn test_json_skips_hidden_fields() {
        let mut fields = HashMap::new();
        fields.insert("x".to_string(), Value::Int(1));
        fields.insert(
            "__native".to_string(),
            Value::Handle(Arc::new(Latch::new())),
        );
        let v = Value::Struct(StructRef::new("T", fields));
        let tree = value_to_json(&v).unwrap();
        assert_eq!(tree, serde_json::json!({"x": 1}));
    }

    #[test]
    fn test_render_template() {
        let data = serde_json::json!({"name": "Ada", "job": {"title": "engineer"}});
        assert_eq!(render_template("hi {{name}}", &data), "hi Ada");
        assert_eq!(
            render_template("{{job.title}} at work", &data),
            "engineer at work"
        );
        assert_eq!(render_template("{{missing}}", &data), "");
        assert_eq!(render_template("no placeholders", &data), "no placeholders");
        assert_eq!(render_template("broken {{name", &data), "broken {{name");
    }

    #[test]
    fn test_latch() {
        let latch = Arc::new(Latch::new());
        latch.add(2);
        let l2 = latch.clone();
        let t = std::thread::spawn(move || {
            l2.add(-1);
            l2.add(-1);
        });
        latch.wait();
        t.join().unwrap();
    }

    #[test]
    fn test_ensure_latch_requires_struct() {
        assert!(ensure_latch(&Value::Int(1)).is_err());
        let wg = Value::Struct(StructRef::new("WaitGroup", HashMap::new()));
        let first = ensure_latch(&wg).unwrap();
        let second = ensure_latch(&wg).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_ensure_regexp_requires_handle() {
        let bare = Value::Struct(StructRef::new("Regexp", HashMap::new()));
        assert!(ensure_regexp(&bare).is_err());

        let mut fields = HashMap::new();
        fields.insert(
            "__native".to_string(),
            Value::Handle(Arc::new(Regex::new("a+").unwrap())),
        );
        let ok = Value::Struct(StructRef::new("Regexp", fields));
        let re = ensure_regexp(&ok).unwrap();
        assert!(re.is_match("aaa"));
    }

    #[test]
    fn test_jq_stored_selector() {
        let mut fields = HashMap::new();
        fields.insert("__sel".to_string(), Value::Str("#out".into()));
        let jq = Value::Struct(StructRef::new("JQ", fields));
        assert_eq!(jq_stored_sel(&jq), "#out");
        assert_eq!(jq_stored_sel(&Value::Int(1)), "");
        assert_eq!(
            jq_stored_sel(&Value::Struct(StructRef::new("JQ", HashMap::new()))),
            ""
        );
    }

    #[test]
    fn test_jq_dollar_builds_selector_value() {
        let vm = Interpreter::new();
        register_builtin_packages(&vm);
        let Some(Value::Package(browser)) =
            super::super::env::env_get(&vm.globals(), "browser")
        else {
            panic!("browser package not bound")
        };
        let Some(Value::Func(dollar)) = browser.member("$") else {
            panic!("$ not registered")
        };
        let native = dollar.native.as_ref().unwrap();
        let jq = native(&[Value::Str("#app".into())]).unwrap();
        assert_eq!(jq_stored_sel(&jq), "#app");
    }

    #[test]
    fn test_registered_packages() {
        let vm = Interpreter::new();
        register_builtin_packages(&vm);
        for alias in [
            "fmt",
            "time",
            "math",
            "math/rand",
            "encoding/json",
            "json",
            "strings",
            "sort",
            "strconv",
            "sync",
            "regexp",
            "text/template",
            "http",
            "storage",
            "fs",
            "browser",
        ] {
            assert!(
                matches!(
                    super::super::env::env_get(&vm.globals(), alias),
                    Some(Value::Package(_))
                ),
                "package {alias} not bound"
            );
        }
    }
}
