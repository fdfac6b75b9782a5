//! The tree-walking evaluator
//!
//! A single [`Interpreter`] holds the shared tables (globals, types,
//! top-level functions, natives, packages). Each logical task (the main
//! task and every goroutine) carries its own frame stack in a [`Task`].

use super::builtins;
use super::env::{child_env, env_declare, env_get, DeferredCall, Env, EnvRef, Ref, Task};
use super::error::{ErrorKind, InterpResult, RuntimeError};
use super::value::{
    to_bool, to_float, to_int, to_string, values_equal, FieldDef, Function, MapRef, NativeFn,
    Package, SliceRef, StructRef, TypeDef, Value,
};
use crate::ast::{
    AssignOp, BinaryOp, Block, CallExpr, CommOp, Decl, Expr, File, SelectCase, Stmt, SwitchCase,
    TypeExpr, UnaryOp, VarDecl,
};
use crate::error::RunError;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum call depth per task
const MAX_CALL_DEPTH: usize = 10_000;

/// Stack growth parameters for deep evaluation recursion
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Park interval while a select with no ready case and no default re-probes
const SELECT_PARK: Duration = Duration::from_millis(1);

/// Parser callback installed by the host; errors are surfaced verbatim
pub type ParserFn = Arc<dyn Fn(&str) -> Result<File, String> + Send + Sync>;

/// Control-flow signal produced by statement evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    None,
    Return(Value),
    Break,
    Continue,
}

struct State {
    globals: EnvRef,
    types: Mutex<HashMap<String, TypeDef>>,
    funcs: Mutex<HashMap<String, Arc<Function>>>,
    natives: Mutex<HashMap<String, NativeFn>>,
    packages: Mutex<HashMap<String, Arc<Package>>>,
    parser: Mutex<Option<ParserFn>>,
}

/// The interpreter. Cheap to clone; goroutines share all tables.
#[derive(Clone)]
pub struct Interpreter {
    state: Arc<State>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create a new interpreter with empty tables
    pub fn new() -> Self {
        Interpreter {
            state: Arc::new(State {
                globals: Env::new().into_ref(),
                types: Mutex::new(HashMap::new()),
                funcs: Mutex::new(HashMap::new()),
                natives: Mutex::new(HashMap::new()),
                packages: Mutex::new(HashMap::new()),
                parser: Mutex::new(None),
            }),
        }
    }

    /// The global environment
    pub fn globals(&self) -> EnvRef {
        self.state.globals.clone()
    }

    /// Install the host parser used by [`Interpreter::run`]
    pub fn set_parser(&self, parser: ParserFn) {
        *self.state.parser.lock() = Some(parser);
    }

    /// Register a host capability under `name`, callable by bare name
    pub fn register_native<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> InterpResult<Value> + Send + Sync + 'static,
    {
        let native: NativeFn = Arc::new(f);
        self.state
            .natives
            .lock()
            .insert(name.to_string(), native.clone());
        env_declare(
            &self.state.globals,
            name,
            Value::Func(Arc::new(Function::native(name, native))),
        );
    }

    /// Look up a registered native capability
    pub fn native_fn(&self, name: &str) -> Option<NativeFn> {
        self.state.natives.lock().get(name).cloned()
    }

    /// Bind a package object under an alias in the global scope
    pub fn register_package(&self, alias: &str, pkg: Package) {
        let pkg = Arc::new(pkg);
        self.state
            .packages
            .lock()
            .insert(alias.to_string(), pkg.clone());
        env_declare(&self.state.globals, alias, Value::Package(pkg));
    }

    /// Merge a type definition into the registry, keeping existing methods
    pub fn register_type(&self, td: TypeDef) {
        let mut types = self.state.types.lock();
        match types.get_mut(&td.name) {
            Some(existing) => {
                if existing.fields.is_empty() {
                    existing.fields = td.fields;
                }
                existing.methods.extend(td.methods);
            }
            None => {
                types.insert(td.name.clone(), td);
            }
        }
    }

    /// Attach a method to a named type, creating the type if needed
    pub fn register_method(&self, type_name: &str, method: Arc<Function>) {
        let mut types = self.state.types.lock();
        let td = types
            .entry(type_name.to_string())
            .or_insert_with(|| TypeDef::new(type_name));
        td.methods.insert(method.name.clone(), method);
    }

    fn lookup_type(&self, name: &str) -> Option<TypeDef> {
        self.state.types.lock().get(name).cloned()
    }

    fn lookup_method(&self, type_name: &str, method: &str) -> Option<Arc<Function>> {
        self.state
            .types
            .lock()
            .get(type_name)
            .and_then(|td| td.methods.get(method).cloned())
    }

    // ---------------- Program execution ----------------------------

    /// Parse (via the registered parser) and run one translation unit
    pub fn run(&self, source: &str) -> Result<(), RunError> {
        let parser = self
            .state
            .parser
            .lock()
            .clone()
            .ok_or(RunError::NoParser)?;
        let file = parser(source).map_err(RunError::Parse)?;
        self.run_file(&file)
    }

    /// Run an already-parsed translation unit: resolve imports, collect
    /// top-level declarations into the shared tables, then call main().
    /// May be called repeatedly; declarations accumulate.
    pub fn run_file(&self, file: &File) -> Result<(), RunError> {
        if file.package != "main" {
            return Err(RunError::Runtime(RuntimeError::setup(
                r#"only "package main" is supported"#,
            )));
        }

        for import in &file.imports {
            self.install_import(import.bound_name(), &import.path);
        }

        let mut task = Task::new();
        self.collect_decls(file, &mut task)?;

        let main = self
            .state
            .funcs
            .lock()
            .get("main")
            .cloned()
            .ok_or_else(RuntimeError::no_main)?;
        self.call_function(&main, None, Vec::new(), &mut task)?;
        Ok(())
    }

    /// Bind a whitelisted package under `alias`; unknown paths are accepted
    /// without creating a binding
    fn install_import(&self, alias: &str, path: &str) {
        let pkg = self.state.packages.lock().get(path).cloned();
        match pkg {
            Some(pkg) => env_declare(&self.state.globals, alias, Value::Package(pkg)),
            None => warn!(path, "ignoring unknown import"),
        }
    }

    fn collect_decls(&self, file: &File, task: &mut Task) -> InterpResult<()> {
        for decl in &file.decls {
            match decl {
                Decl::Type(td) => {
                    let fields = td
                        .fields
                        .iter()
                        .map(|f| FieldDef {
                            name: f.name.clone(),
                            type_tag: f.ty.tag(),
                        })
                        .collect();
                    self.register_type(TypeDef {
                        name: td.name.clone(),
                        fields,
                        methods: HashMap::new(),
                    });
                }
                Decl::Var(vd) => {
                    self.declare_vars(vd, &self.state.globals, task)?;
                }
                Decl::Func(fd) => {
                    let variadic_elem = fd
                        .params
                        .last()
                        .and_then(|p| p.ty.as_ref())
                        .map(|t| t.tag())
                        .unwrap_or_else(|| "any".to_string());
                    let mut func = Function {
                        name: fd.name.clone(),
                        params: fd.params.iter().map(|p| p.name.clone()).collect(),
                        variadic: fd.variadic,
                        variadic_elem,
                        body: Some(fd.body.clone()),
                        env: Some(self.state.globals.clone()),
                        native: None,
                        recv_name: None,
                        recv_type: None,
                    };
                    match &fd.recv {
                        Some(recv) => {
                            let type_name = recv.type_name.trim_start_matches('*').to_string();
                            func.recv_name = Some(recv.name.clone());
                            func.recv_type = Some(type_name.clone());
                            self.register_method(&type_name, Arc::new(func));
                        }
                        None => {
                            let func = Arc::new(func);
                            self.state
                                .funcs
                                .lock()
                                .insert(fd.name.clone(), func.clone());
                            env_declare(&self.state.globals, &fd.name, Value::Func(func));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluate a var/const declaration into `env`
    fn declare_vars(&self, vd: &VarDecl, env: &EnvRef, task: &mut Task) -> InterpResult<()> {
        for (i, name) in vd.names.iter().enumerate() {
            if name == "_" {
                if let Some(value) = vd.values.get(i) {
                    self.eval_expr(value, env, task)?;
                }
                continue;
            }
            let value = match vd.values.get(i) {
                Some(expr) => self.eval_expr(expr, env, task)?,
                None => self.zero_for_tag(&vd.ty.as_ref().map(TypeExpr::tag).unwrap_or_default()),
            };
            env_declare(env, name, value);
        }
        Ok(())
    }

    /// Zero value for a tag; named struct types resolve through the registry
    fn zero_for_tag(&self, tag: &str) -> Value {
        if !tag.is_empty()
            && !builtins::is_builtin_type(tag)
            && !tag.starts_with('*')
            && !tag.starts_with("[]")
            && !tag.starts_with("map[")
            && !tag.starts_with("chan ")
        {
            if let Some(td) = self.lookup_type(tag) {
                return Value::Struct(self.instantiate_struct(&td));
            }
        }
        builtins::zero_value(tag)
    }

    /// Fresh struct instance with every declared field at its zero value
    fn instantiate_struct(&self, td: &TypeDef) -> StructRef {
        let mut fields = HashMap::new();
        for f in &td.fields {
            fields.insert(f.name.clone(), self.zero_for_tag(&f.type_tag));
        }
        StructRef::new(td.name.clone(), fields)
    }

    // ---------------- Expression evaluation ---------------------------

    /// Evaluate an expression with automatic stack growth for deep recursion
    pub fn eval_expr(&self, e: &Expr, env: &EnvRef, task: &mut Task) -> InterpResult<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.eval_expr_inner(e, env, task)
        })
    }

    fn eval_expr_inner(&self, e: &Expr, env: &EnvRef, task: &mut Task) -> InterpResult<Value> {
        match e {
            Expr::IntLit(n) => Ok(Value::Int(*n)),
            Expr::FloatLit(x) => Ok(Value::Float(*x)),
            Expr::StringLit(s) => Ok(Value::Str(s.clone())),
            Expr::CharLit(c) => Ok(Value::Int(*c as i64)),
            Expr::Type(t) => Ok(Value::TypeRef(t.tag())),

            Expr::Ident(name) => self.eval_ident(name, env),

            Expr::Unary { op, expr } => match op {
                UnaryOp::Recv => {
                    let v = self.eval_expr(expr, env, task)?;
                    match v {
                        Value::Chan(ch) => Ok(ch.recv().0),
                        _ => Err(RuntimeError::channel("receive on non-channel")),
                    }
                }
                _ => {
                    let v = self.eval_expr(expr, env, task)?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!to_bool(&v))),
                        UnaryOp::Neg => match v {
                            Value::Float(x) => Ok(Value::Float(-x)),
                            other => Ok(Value::Int(-to_int(&other))),
                        },
                        UnaryOp::Pos => match v {
                            Value::Float(x) => Ok(Value::Float(x)),
                            other => Ok(Value::Int(to_int(&other))),
                        },
                        UnaryOp::BitNot => Ok(Value::Int(!to_int(&v))),
                        // Containers are already reference-like
                        UnaryOp::Addr => Ok(v),
                        UnaryOp::Recv => unreachable!("handled above"),
                    }
                }
            },

            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let l = self.eval_expr(lhs, env, task)?;
                    if !to_bool(&l) {
                        return Ok(Value::Bool(false));
                    }
                    let r = self.eval_expr(rhs, env, task)?;
                    Ok(Value::Bool(to_bool(&r)))
                }
                BinaryOp::Or => {
                    let l = self.eval_expr(lhs, env, task)?;
                    if to_bool(&l) {
                        return Ok(Value::Bool(true));
                    }
                    let r = self.eval_expr(rhs, env, task)?;
                    Ok(Value::Bool(to_bool(&r)))
                }
                _ => {
                    let l = self.eval_expr(lhs, env, task)?;
                    let r = self.eval_expr(rhs, env, task)?;
                    apply_binary(*op, &l, &r)
                }
            },

            Expr::Call(call) => self.eval_call_expr(call, env, task),

            Expr::Index { expr, index } => {
                let container = self.eval_expr(expr, env, task)?;
                let key = self.eval_expr(index, env, task)?;
                match container {
                    Value::Slice(s) => {
                        let i = to_int(&key);
                        if i < 0 || i as usize >= s.len() {
                            return Err(RuntimeError::index_out_of_range());
                        }
                        Ok(s.get(i as usize).unwrap_or(Value::Null))
                    }
                    Value::Map(m) => Ok(m
                        .get(&key)
                        .unwrap_or_else(|| self.zero_for_tag(&m.elem_type()))),
                    Value::Str(s) => {
                        let i = to_int(&key);
                        if i < 0 || i as usize >= s.len() {
                            return Err(RuntimeError::index_out_of_range());
                        }
                        Ok(Value::Int(i64::from(s.as_bytes()[i as usize])))
                    }
                    other => Err(RuntimeError::type_error(format!(
                        "cannot index {}",
                        other.type_name()
                    ))),
                }
            }

            Expr::Slice { expr, low, high } => {
                let container = self.eval_expr(expr, env, task)?;
                let lo = match low {
                    Some(e) => to_int(&self.eval_expr(e, env, task)?),
                    None => 0,
                };
                let hi = match high {
                    Some(e) => Some(to_int(&self.eval_expr(e, env, task)?)),
                    None => None,
                };
                match container {
                    Value::Slice(s) => {
                        let hi = hi.unwrap_or(s.len() as i64);
                        if lo < 0 || hi < 0 {
                            return Err(RuntimeError::invalid_slice_indices());
                        }
                        s.reslice(lo as usize, hi as usize)
                            .map(Value::Slice)
                            .ok_or_else(RuntimeError::invalid_slice_indices)
                    }
                    Value::Str(s) => {
                        let hi = hi.unwrap_or(s.len() as i64);
                        if lo < 0 || hi < lo || hi as usize > s.len() {
                            return Err(RuntimeError::invalid_slice_indices());
                        }
                        let bytes = &s.as_bytes()[lo as usize..hi as usize];
                        Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
                    }
                    other => Err(RuntimeError::type_error(format!(
                        "cannot slice {}",
                        other.type_name()
                    ))),
                }
            }

            Expr::Selector { expr, field } => {
                let target = self.eval_expr(expr, env, task)?;
                match target {
                    Value::Package(pkg) => pkg
                        .member(field)
                        .ok_or_else(|| RuntimeError::undefined_member(&pkg.name, field)),
                    Value::Struct(s) => s
                        .get_field(field)
                        .ok_or_else(|| RuntimeError::no_such_field(field)),
                    other => Err(RuntimeError::type_error(format!(
                        "selector on non-struct value ({})",
                        other.type_name()
                    ))),
                }
            }

            Expr::Composite { ty, elems } => self.eval_composite(ty, elems, env, task),

            Expr::FuncLit {
                params,
                variadic,
                body,
            } => {
                let variadic_elem = params
                    .last()
                    .and_then(|p| p.ty.as_ref())
                    .map(TypeExpr::tag)
                    .unwrap_or_else(|| "any".to_string());
                Ok(Value::Func(Arc::new(Function {
                    name: String::new(),
                    params: params.iter().map(|p| p.name.clone()).collect(),
                    variadic: *variadic,
                    variadic_elem,
                    body: Some(body.clone()),
                    env: Some(env.clone()),
                    native: None,
                    recv_name: None,
                    recv_type: None,
                })))
            }
        }
    }

    fn eval_ident(&self, name: &str, env: &EnvRef) -> InterpResult<Value> {
        if builtins::is_builtin_type(name) {
            return Ok(Value::TypeRef(name.to_string()));
        }
        if let Some(v) = env_get(env, name) {
            return Ok(v);
        }
        // Predeclared identifiers, shadowable like any other binding
        match name {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "nil" => return Ok(Value::Null),
            _ => {}
        }
        if let Some(f) = self.state.funcs.lock().get(name) {
            return Ok(Value::Func(f.clone()));
        }
        if let Some(n) = self.state.natives.lock().get(name) {
            return Ok(Value::Func(Arc::new(Function::native(name, n.clone()))));
        }
        if self.state.types.lock().contains_key(name) {
            return Ok(Value::TypeRef(name.to_string()));
        }
        Err(RuntimeError::undefined(name))
    }

    fn eval_composite(
        &self,
        ty: &TypeExpr,
        elems: &[crate::ast::CompositeElem],
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Value> {
        match ty {
            TypeExpr::Slice(elem) => {
                let mut data = Vec::with_capacity(elems.len());
                for el in elems {
                    data.push(self.eval_expr(&el.value, env, task)?);
                }
                Ok(Value::Slice(SliceRef::new(elem.tag(), data)))
            }
            TypeExpr::Map(k, v) => {
                let map = MapRef::new(k.tag(), v.tag());
                for el in elems {
                    let key = match &el.key {
                        Some(key) => self.eval_expr(key, env, task)?,
                        None => {
                            return Err(RuntimeError::type_error(
                                "map literal requires key: value pairs",
                            ))
                        }
                    };
                    let value = self.eval_expr(&el.value, env, task)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            TypeExpr::Pointer(inner) => self.eval_composite(inner, elems, env, task),
            TypeExpr::Named(name) => {
                let td = self
                    .lookup_type(name)
                    .ok_or_else(|| RuntimeError::type_error(format!("unknown struct type: {name}")))?;
                let obj = self.instantiate_struct(&td);
                for el in elems {
                    let field = match &el.key {
                        Some(Expr::Ident(f)) => f.clone(),
                        _ => {
                            return Err(RuntimeError::type_error(
                                "struct literal requires field: value pairs",
                            ))
                        }
                    };
                    if !obj.has_field(&field) {
                        return Err(RuntimeError::no_such_field(&field));
                    }
                    let value = self.eval_expr(&el.value, env, task)?;
                    obj.set_field(&field, value);
                }
                Ok(Value::Struct(obj))
            }
            TypeExpr::Chan(_) => Err(RuntimeError::unsupported("channel composite literal")),
        }
    }

    // ---------------- Calls ----------------------------------------

    fn eval_call_expr(
        &self,
        call: &CallExpr,
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Value> {
        // Universal builtins dispatch on the bare callee name
        if let Expr::Ident(name) = &*call.func {
            match name.as_str() {
                "make" => {
                    let tag = call
                        .args
                        .first()
                        .and_then(type_tag_of_expr)
                        .ok_or_else(|| RuntimeError::type_error("make: missing type argument"))?;
                    let mut args = Vec::new();
                    for a in &call.args[1..] {
                        args.push(self.eval_expr(a, env, task)?);
                    }
                    return Ok(builtins::builtin_make(&tag, &args));
                }
                "len" => {
                    if call.args.len() != 1 {
                        return Ok(Value::Int(0));
                    }
                    let v = self.eval_expr(&call.args[0], env, task)?;
                    return Ok(Value::Int(builtins::builtin_len(&v)));
                }
                "cap" => {
                    if call.args.len() != 1 {
                        return Ok(Value::Int(0));
                    }
                    let v = self.eval_expr(&call.args[0], env, task)?;
                    return Ok(Value::Int(builtins::builtin_cap(&v)));
                }
                "append" => {
                    let base = call
                        .args
                        .first()
                        .ok_or_else(|| RuntimeError::type_error("append: missing arguments"))?;
                    let base = self.eval_expr(base, env, task)?;
                    let elems = self.eval_args(&call.args[1..], call.spread, env, task)?;
                    return Ok(builtins::builtin_append(&base, elems));
                }
                "copy" => {
                    if call.args.len() != 2 {
                        return Ok(Value::Int(0));
                    }
                    let dst = self.eval_expr(&call.args[0], env, task)?;
                    let src = self.eval_expr(&call.args[1], env, task)?;
                    return Ok(Value::Int(builtins::builtin_copy(&dst, &src)));
                }
                "close" => {
                    let arg = call
                        .args
                        .first()
                        .ok_or_else(|| RuntimeError::channel("close: missing channel"))?;
                    let v = self.eval_expr(arg, env, task)?;
                    return builtins::builtin_close(&v);
                }
                "delete" => {
                    if call.args.len() != 2 {
                        return Ok(Value::Null);
                    }
                    let m = self.eval_expr(&call.args[0], env, task)?;
                    let k = self.eval_expr(&call.args[1], env, task)?;
                    if let Value::Map(m) = m {
                        m.remove(&k);
                    }
                    return Ok(Value::Null);
                }
                "panic" => {
                    let v = match call.args.first() {
                        Some(a) => self.eval_expr(a, env, task)?,
                        None => Value::Str("panic".to_string()),
                    };
                    return Err(RuntimeError::panic_with(v));
                }
                _ => {}
            }
        }

        let (func, recv, args) = self.resolve_call(call, env, task)?;
        match func {
            Callee::Function(f) => self.call_function(&f, recv, args, task),
            Callee::Conversion(tag) => Ok(match args.first() {
                Some(v) => builtins::convert(&tag, v),
                None => self.zero_for_tag(&tag),
            }),
        }
    }

    /// Evaluate a call's arguments, expanding a trailing `expr...` slice
    fn eval_args(
        &self,
        args: &[Expr],
        spread: bool,
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            let v = self.eval_expr(a, env, task)?;
            if spread && i == args.len() - 1 {
                match v {
                    Value::Slice(s) => out.extend(s.to_vec()),
                    other => out.push(other),
                }
            } else {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Resolve a call expression to its callee, receiver, and arguments
    /// without invoking it (shared by calls, defer, and go)
    fn resolve_call(
        &self,
        call: &CallExpr,
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<(Callee, Option<Value>, Vec<Value>)> {
        if let Expr::Selector { expr, field } = &*call.func {
            let target = self.eval_expr(expr, env, task)?;
            if let Value::Package(pkg) = &target {
                let member = pkg
                    .member(field)
                    .ok_or_else(|| RuntimeError::undefined_member(&pkg.name, field))?;
                let args = self.eval_args(&call.args, call.spread, env, task)?;
                return match member {
                    Value::Func(f) => Ok((Callee::Function(f), None, args)),
                    Value::TypeRef(t) => Ok((Callee::Conversion(t), None, args)),
                    _ => Err(RuntimeError::type_error(format!(
                        "package member {}.{} is not a function",
                        pkg.name, field
                    ))),
                };
            }
            // Field holding a function value takes priority over methods
            if let Value::Struct(s) = &target {
                if let Some(Value::Func(f)) = s.get_field(field) {
                    let args = self.eval_args(&call.args, call.spread, env, task)?;
                    return Ok((Callee::Function(f), None, args));
                }
            }
            let type_name = target.type_name();
            let method = self
                .lookup_method(&type_name, field)
                .ok_or_else(|| RuntimeError::method_not_found(&type_name, field))?;
            let args = self.eval_args(&call.args, call.spread, env, task)?;
            return Ok((Callee::Function(method), Some(target), args));
        }

        let callee = self.eval_expr(&call.func, env, task)?;
        let args = self.eval_args(&call.args, call.spread, env, task)?;
        match callee {
            Value::Func(f) => Ok((Callee::Function(f), None, args)),
            Value::TypeRef(t) => Ok((Callee::Conversion(t), None, args)),
            other => Err(RuntimeError::type_error(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    /// Resolve a deferred or spawned call, snapshotting its arguments now
    fn prepare_call(
        &self,
        call: &CallExpr,
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<DeferredCall> {
        // `defer close(ch)` / `defer panic(v)` capture the builtin as a native
        if let Expr::Ident(name) = &*call.func {
            match name.as_str() {
                "close" => {
                    let args = self.eval_args(&call.args, call.spread, env, task)?;
                    let f = Arc::new(Function::native(
                        "close",
                        Arc::new(|args: &[Value]| match args.first() {
                            Some(v) => builtins::builtin_close(v),
                            None => Err(RuntimeError::channel("close: missing channel")),
                        }),
                    ));
                    return Ok(DeferredCall {
                        func: f,
                        recv: None,
                        args,
                    });
                }
                "panic" => {
                    let args = self.eval_args(&call.args, call.spread, env, task)?;
                    let f = Arc::new(Function::native(
                        "panic",
                        Arc::new(|args: &[Value]| {
                            let v = args
                                .first()
                                .cloned()
                                .unwrap_or_else(|| Value::Str("panic".to_string()));
                            Err(RuntimeError::panic_with(v))
                        }),
                    ));
                    return Ok(DeferredCall {
                        func: f,
                        recv: None,
                        args,
                    });
                }
                _ => {}
            }
        }
        let (callee, recv, args) = self.resolve_call(call, env, task)?;
        match callee {
            Callee::Function(func) => Ok(DeferredCall { func, recv, args }),
            Callee::Conversion(t) => Err(RuntimeError::type_error(format!(
                "{t} is not a function"
            ))),
        }
    }

    /// Invoke a function: push a frame, bind parameters, evaluate the body,
    /// run defers in LIFO order, and translate the outcome
    pub fn call_function(
        &self,
        func: &Arc<Function>,
        recv: Option<Value>,
        args: Vec<Value>,
        task: &mut Task,
    ) -> InterpResult<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.call_function_inner(func, recv, args, task)
        })
    }

    fn call_function_inner(
        &self,
        func: &Arc<Function>,
        recv: Option<Value>,
        args: Vec<Value>,
        task: &mut Task,
    ) -> InterpResult<Value> {
        if task.depth() >= MAX_CALL_DEPTH {
            return Err(RuntimeError::stack_overflow());
        }
        task.push_frame();

        let mut outcome = if let Some(native) = &func.native {
            let mut call_args = Vec::with_capacity(args.len() + 1);
            if let Some(r) = recv.clone() {
                call_args.push(r);
            }
            call_args.extend(args);
            native(&call_args)
        } else {
            self.eval_user_body(func, recv, args, task)
        };

        // Defers run in reverse registration order; a panicking defer
        // replaces the surviving panic, later defers still run
        let defers = task.take_defers();
        for d in defers.into_iter().rev() {
            if let Err(err) = self.call_function(&d.func, d.recv, d.args, task) {
                if err.is_panic() {
                    outcome = Err(err);
                }
            }
        }
        task.pop_frame();
        outcome
    }

    fn eval_user_body(
        &self,
        func: &Arc<Function>,
        recv: Option<Value>,
        args: Vec<Value>,
        task: &mut Task,
    ) -> InterpResult<Value> {
        let captured = func.env.as_ref().unwrap_or(&self.state.globals);
        let local = child_env(captured);

        if let (Some(name), Some(value)) = (&func.recv_name, recv) {
            env_declare(&local, name, value);
        }

        let mut args = args.into_iter();
        if func.variadic && !func.params.is_empty() {
            for param in &func.params[..func.params.len() - 1] {
                env_declare(&local, param, args.next().unwrap_or(Value::Null));
            }
            let rest: Vec<Value> = args.collect();
            env_declare(
                &local,
                &func.params[func.params.len() - 1],
                Value::Slice(SliceRef::new(func.variadic_elem.clone(), rest)),
            );
        } else {
            for param in &func.params {
                env_declare(&local, param, args.next().unwrap_or(Value::Null));
            }
        }

        let body = func
            .body
            .as_ref()
            .ok_or_else(|| RuntimeError::type_error("function has no body"))?;
        for stmt in &body.stmts {
            match self.eval_stmt(stmt, &local, task)? {
                Flow::None => {}
                Flow::Return(v) => return Ok(v),
                Flow::Break | Flow::Continue => {
                    return Err(RuntimeError::unsupported("break/continue outside loop"))
                }
            }
        }
        Ok(Value::Null)
    }

    // ---------------- Statement evaluation ----------------------------

    pub fn eval_stmt(&self, s: &Stmt, env: &EnvRef, task: &mut Task) -> InterpResult<Flow> {
        match s {
            Stmt::Expr(e) => {
                self.eval_expr(e, env, task)?;
                Ok(Flow::None)
            }

            Stmt::Send { chan, value } => {
                let ch = self.eval_expr(chan, env, task)?;
                let v = self.eval_expr(value, env, task)?;
                match ch {
                    Value::Chan(ch) => {
                        ch.send(v)?;
                        Ok(Flow::None)
                    }
                    _ => Err(RuntimeError::channel("send on non-channel")),
                }
            }

            Stmt::Assign { op, lhs, rhs } => self.eval_assign(*op, lhs, rhs, env, task),

            Stmt::IncDec { target, inc } => {
                let r = self.resolve_ref(target, env, task)?;
                let cur = to_int(&r.get()?);
                r.set(Value::Int(if *inc { cur + 1 } else { cur - 1 }))?;
                Ok(Flow::None)
            }

            Stmt::Var(vd) => {
                self.declare_vars(vd, env, task)?;
                Ok(Flow::None)
            }

            Stmt::Block(b) => self.eval_block(b, env, task),

            Stmt::If {
                init,
                cond,
                then,
                els,
            } => {
                if let Some(init) = init {
                    self.eval_stmt(init, env, task)?;
                }
                let c = self.eval_expr(cond, env, task)?;
                if to_bool(&c) {
                    self.eval_block(then, env, task)
                } else if let Some(els) = els {
                    self.eval_stmt(els, env, task)
                } else {
                    Ok(Flow::None)
                }
            }

            Stmt::For {
                init,
                cond,
                post,
                body,
            } => {
                let local = child_env(env);
                if let Some(init) = init {
                    self.eval_stmt(init, &local, task)?;
                }
                loop {
                    if let Some(cond) = cond {
                        let c = self.eval_expr(cond, &local, task)?;
                        if !to_bool(&c) {
                            break;
                        }
                    }
                    match self.eval_block(body, &local, task)? {
                        Flow::Break => return Ok(Flow::None),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::None | Flow::Continue => {}
                    }
                    if let Some(post) = post {
                        self.eval_stmt(post, &local, task)?;
                    }
                }
                Ok(Flow::None)
            }

            Stmt::Range {
                key,
                value,
                expr,
                body,
            } => self.eval_range(key.as_deref(), value.as_deref(), expr, body, env, task),

            Stmt::Switch { init, tag, cases } => self.eval_switch(init, tag, cases, env, task),

            Stmt::Select { cases, default } => self.eval_select(cases, default.as_ref(), env, task),

            Stmt::Defer(call) => {
                let deferred = self.prepare_call(call, env, task)?;
                match task.current_frame_mut() {
                    Some(frame) => {
                        frame.defers.push(deferred);
                        Ok(Flow::None)
                    }
                    None => Err(RuntimeError::unsupported("defer outside of function")),
                }
            }

            Stmt::Go(call) => {
                let deferred = self.prepare_call(call, env, task)?;
                self.spawn_goroutine(deferred);
                Ok(Flow::None)
            }

            Stmt::Return(expr) => {
                let v = match expr {
                    Some(e) => self.eval_expr(e, env, task)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }

            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    /// Evaluate a block in a fresh child scope
    pub fn eval_block(&self, b: &Block, env: &EnvRef, task: &mut Task) -> InterpResult<Flow> {
        let local = child_env(env);
        for stmt in &b.stmts {
            let flow = self.eval_stmt(stmt, &local, task)?;
            if flow != Flow::None {
                return Ok(flow);
            }
        }
        Ok(Flow::None)
    }

    fn eval_assign(
        &self,
        op: AssignOp,
        lhs: &[Expr],
        rhs: &[Expr],
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Flow> {
        // Two-value special forms: v, ok := m[k]  /  v, ok := <-ch  /  v, err := f()
        let values: Vec<Value> = if lhs.len() == 2 && rhs.len() == 1 {
            match self.eval_two_value(&rhs[0], env, task)? {
                Some(pair) => pair,
                None => vec![self.eval_expr(&rhs[0], env, task)?],
            }
        } else {
            let mut out = Vec::with_capacity(rhs.len());
            for r in rhs {
                out.push(self.eval_expr(r, env, task)?);
            }
            out
        };

        match op {
            AssignOp::Define => {
                if values.len() != lhs.len() {
                    return Err(RuntimeError::type_error(format!(
                        "assignment mismatch: {} variables but {} values",
                        lhs.len(),
                        values.len()
                    )));
                }
                for (target, value) in lhs.iter().zip(values) {
                    match target {
                        Expr::Ident(name) if name == "_" => {}
                        Expr::Ident(name) => env_declare(env, name, value),
                        _ => return Err(RuntimeError::type_error("invalid := target")),
                    }
                }
                Ok(Flow::None)
            }
            AssignOp::Assign => {
                if values.len() != lhs.len() {
                    return Err(RuntimeError::type_error(format!(
                        "assignment mismatch: {} variables but {} values",
                        lhs.len(),
                        values.len()
                    )));
                }
                // All RHS values are computed; resolve every target before storing
                let mut refs = Vec::with_capacity(lhs.len());
                for target in lhs {
                    if matches!(target, Expr::Ident(n) if n == "_") {
                        refs.push(None);
                    } else {
                        refs.push(Some(self.resolve_ref(target, env, task)?));
                    }
                }
                for (r, value) in refs.iter().zip(values) {
                    if let Some(r) = r {
                        r.set(value)?;
                    }
                }
                Ok(Flow::None)
            }
            compound => {
                let bin = compound
                    .binary_op()
                    .ok_or_else(|| RuntimeError::unsupported("assignment operator"))?;
                if lhs.len() != 1 || values.len() != 1 {
                    return Err(RuntimeError::type_error(
                        "compound assignment expects one target and one value",
                    ));
                }
                let r = self.resolve_ref(&lhs[0], env, task)?;
                let cur = r.get()?;
                let next = apply_binary(bin, &cur, &values[0])?;
                r.set(next)?;
                Ok(Flow::None)
            }
        }
    }

    /// Recognise the two-value RHS forms; returns the bound pair when the
    /// expression is one of them
    fn eval_two_value(
        &self,
        rhs: &Expr,
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Option<Vec<Value>>> {
        match rhs {
            Expr::Index { expr, index } => {
                let container = self.eval_expr(expr, env, task)?;
                if let Value::Map(m) = container {
                    let key = self.eval_expr(index, env, task)?;
                    let (v, ok) = match m.get(&key) {
                        Some(v) => (v, true),
                        None => (self.zero_for_tag(&m.elem_type()), false),
                    };
                    return Ok(Some(vec![v, Value::Bool(ok)]));
                }
                Ok(None)
            }
            Expr::Unary {
                op: UnaryOp::Recv,
                expr,
            } => {
                let ch = self.eval_expr(expr, env, task)?;
                match ch {
                    Value::Chan(ch) => {
                        let (v, ok) = ch.recv();
                        Ok(Some(vec![v, Value::Bool(ok)]))
                    }
                    _ => Err(RuntimeError::channel("receive on non-channel")),
                }
            }
            Expr::Call(call) => match self.eval_call_expr(call, env, task) {
                Ok(v) => Ok(Some(vec![v, Value::Null])),
                Err(err) if err.kind == ErrorKind::NativeError => {
                    Ok(Some(vec![Value::Null, Value::Str(err.message)]))
                }
                Err(err) => Err(err),
            },
            _ => Ok(None),
        }
    }

    /// Resolve an assignment target to an lvalue reference
    fn resolve_ref(&self, e: &Expr, env: &EnvRef, task: &mut Task) -> InterpResult<Ref> {
        match e {
            Expr::Ident(name) => Ok(Ref::Var {
                env: env.clone(),
                name: name.clone(),
            }),
            Expr::Index { expr, index } => {
                let container = self.eval_expr(expr, env, task)?;
                let key = self.eval_expr(index, env, task)?;
                match container {
                    Value::Slice(s) => {
                        let i = to_int(&key);
                        if i < 0 || i as usize >= s.len() {
                            return Err(RuntimeError::index_out_of_range());
                        }
                        Ok(Ref::SliceIndex {
                            slice: s,
                            index: i as usize,
                        })
                    }
                    Value::Map(m) => Ok(Ref::MapIndex { map: m, key }),
                    other => Err(RuntimeError::type_error(format!(
                        "cannot assign into {}",
                        other.type_name()
                    ))),
                }
            }
            Expr::Selector { expr, field } => {
                let target = self.eval_expr(expr, env, task)?;
                match target {
                    Value::Struct(s) => Ok(Ref::Field {
                        strct: s,
                        name: field.clone(),
                    }),
                    other => Err(RuntimeError::type_error(format!(
                        "selector assignment on non-struct value ({})",
                        other.type_name()
                    ))),
                }
            }
            _ => Err(RuntimeError::type_error("invalid assignment target")),
        }
    }

    fn eval_range(
        &self,
        key: Option<&str>,
        value: Option<&str>,
        expr: &Expr,
        body: &Block,
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Flow> {
        let local = child_env(env);
        let subject = self.eval_expr(expr, &local, task)?;

        let mut step = |k: Value, v: Value, this: &Self, task: &mut Task| -> InterpResult<Flow> {
            if let Some(name) = key {
                env_declare(&local, name, k);
            }
            if let Some(name) = value {
                env_declare(&local, name, v);
            }
            this.eval_block(body, &local, task)
        };

        match subject {
            Value::Slice(s) => {
                let len = s.len();
                for i in 0..len {
                    let v = s.get(i).unwrap_or(Value::Null);
                    match step(Value::Int(i as i64), v, self, task)? {
                        Flow::Break => return Ok(Flow::None),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::None | Flow::Continue => {}
                    }
                }
            }
            Value::Map(m) => {
                for (k, v) in m.pairs() {
                    match step(k, v, self, task)? {
                        Flow::Break => return Ok(Flow::None),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::None | Flow::Continue => {}
                    }
                }
            }
            Value::Str(s) => {
                for (i, c) in s.char_indices() {
                    match step(Value::Int(i as i64), Value::Int(c as i64), self, task)? {
                        Flow::Break => return Ok(Flow::None),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::None | Flow::Continue => {}
                    }
                }
            }
            Value::Chan(ch) => loop {
                let (v, ok) = ch.recv();
                if !ok {
                    break;
                }
                match step(v, Value::Null, self, task)? {
                    Flow::Break => return Ok(Flow::None),
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::None | Flow::Continue => {}
                }
            },
            other => {
                return Err(RuntimeError::type_error(format!(
                    "cannot range over {}",
                    other.type_name()
                )))
            }
        }
        Ok(Flow::None)
    }

    fn eval_switch(
        &self,
        init: &Option<Box<Stmt>>,
        tag: &Option<Expr>,
        cases: &[SwitchCase],
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Flow> {
        let local = child_env(env);
        if let Some(init) = init {
            self.eval_stmt(init, &local, task)?;
        }
        let tag_value = match tag {
            Some(t) => Some(self.eval_expr(t, &local, task)?),
            None => None,
        };

        let mut default_body: Option<&Block> = None;
        for case in cases {
            if case.exprs.is_empty() {
                default_body = Some(&case.body);
                continue;
            }
            for ce in &case.exprs {
                let v = self.eval_expr(ce, &local, task)?;
                let matched = match &tag_value {
                    Some(tag) => values_equal(tag, &v)?,
                    None => to_bool(&v),
                };
                if matched {
                    return Ok(consume_break(self.eval_block(&case.body, &local, task)?));
                }
            }
        }
        if let Some(body) = default_body {
            return Ok(consume_break(self.eval_block(body, &local, task)?));
        }
        Ok(Flow::None)
    }

    /// Select over channel operations: pick uniformly at random among ready
    /// cases, fall back to default, otherwise park and re-probe
    fn eval_select(
        &self,
        cases: &[SelectCase],
        default: Option<&Block>,
        env: &EnvRef,
        task: &mut Task,
    ) -> InterpResult<Flow> {
        // Channel expressions and send values are evaluated once, up front
        enum Prepared<'a> {
            Send {
                chan: super::channel::ChannelRef,
                value: Value,
                body: &'a Block,
            },
            Recv {
                chan: super::channel::ChannelRef,
                value: Option<&'a str>,
                ok: Option<&'a str>,
                body: &'a Block,
            },
        }

        let mut prepared = Vec::with_capacity(cases.len());
        for case in cases {
            match &case.comm {
                CommOp::Send { chan, value } => {
                    let ch = match self.eval_expr(chan, env, task)? {
                        Value::Chan(c) => c,
                        _ => return Err(RuntimeError::channel("send on non-channel")),
                    };
                    let v = self.eval_expr(value, env, task)?;
                    prepared.push(Prepared::Send {
                        chan: ch,
                        value: v,
                        body: &case.body,
                    });
                }
                CommOp::Recv { value, ok, chan } => {
                    let ch = match self.eval_expr(chan, env, task)? {
                        Value::Chan(c) => c,
                        _ => return Err(RuntimeError::channel("receive on non-channel")),
                    };
                    prepared.push(Prepared::Recv {
                        chan: ch,
                        value: value.as_deref(),
                        ok: ok.as_deref(),
                        body: &case.body,
                    });
                }
            }
        }

        let mut order: Vec<usize> = (0..prepared.len()).collect();
        let mut rng = rand::thread_rng();
        loop {
            order.shuffle(&mut rng);
            for &i in &order {
                match &prepared[i] {
                    Prepared::Send { chan, value, body } => {
                        if chan.try_send(value.clone())? {
                            return self.eval_block(body, env, task);
                        }
                    }
                    Prepared::Recv {
                        chan,
                        value,
                        ok,
                        body,
                    } => {
                        if let Some((v, received)) = chan.try_recv() {
                            let local = child_env(env);
                            if let Some(name) = value {
                                env_declare(&local, name, v);
                            }
                            if let Some(name) = ok {
                                env_declare(&local, name, Value::Bool(received));
                            }
                            return self.eval_block(body, &local, task);
                        }
                    }
                }
            }
            if let Some(body) = default {
                return self.eval_block(body, env, task);
            }
            thread::sleep(SELECT_PARK);
        }
    }

    /// Spawn a goroutine running the prepared call on its own thread.
    /// A panic escaping the goroutine is reported through the
    /// `__goroutinePanic` capability when registered, else logged.
    fn spawn_goroutine(&self, call: DeferredCall) {
        let vm = self.clone();
        debug!(func = %call.func.name, "spawning goroutine");
        let _detached = thread::spawn(move || {
            let mut task = Task::new();
            if let Err(err) = vm.call_function(&call.func, call.recv, call.args, &mut task) {
                match vm.native_fn("__goroutinePanic") {
                    Some(hook) => {
                        let _ = hook(&[Value::Str(err.to_string())]);
                    }
                    None => warn!(error = %err, "goroutine terminated with error"),
                }
            }
        });
    }
}

/// Resolved callee: a function to invoke or a type conversion to apply
enum Callee {
    Function(Arc<Function>),
    Conversion(String),
}

/// A `break` stops the surrounding switch; return and continue pass through
fn consume_break(flow: Flow) -> Flow {
    match flow {
        Flow::Break => Flow::None,
        other => other,
    }
}

/// The type tag of an expression in type position (`make`'s first argument)
fn type_tag_of_expr(e: &Expr) -> Option<String> {
    match e {
        Expr::Type(t) => Some(t.tag()),
        Expr::Ident(n) => Some(n.clone()),
        _ => None,
    }
}

/// Apply a binary operator to evaluated operands.
/// `&&`/`||` are short-circuited by the expression evaluator; the entries
/// here serve compound contexts only.
fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> InterpResult<Value> {
    let float_op = matches!(l, Value::Float(_)) || matches!(r, Value::Float(_));
    match op {
        BinaryOp::Add => {
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                return Ok(Value::Str(format!("{}{}", to_string(l), to_string(r))));
            }
            if float_op {
                Ok(Value::Float(to_float(l) + to_float(r)))
            } else {
                Ok(Value::Int(to_int(l).wrapping_add(to_int(r))))
            }
        }
        BinaryOp::Sub => {
            if float_op {
                Ok(Value::Float(to_float(l) - to_float(r)))
            } else {
                Ok(Value::Int(to_int(l).wrapping_sub(to_int(r))))
            }
        }
        BinaryOp::Mul => {
            if float_op {
                Ok(Value::Float(to_float(l) * to_float(r)))
            } else {
                Ok(Value::Int(to_int(l).wrapping_mul(to_int(r))))
            }
        }
        // Division always produces a float
        BinaryOp::Div => Ok(Value::Float(to_float(l) / to_float(r))),
        BinaryOp::Rem => {
            let divisor = to_int(r);
            if divisor == 0 {
                return Err(RuntimeError::division_by_zero());
            }
            Ok(Value::Int(to_int(l).wrapping_rem(divisor)))
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            let shift = to_int(r);
            if shift < 0 {
                return Err(RuntimeError::type_error("negative shift amount"));
            }
            let n = to_int(l);
            let out = if shift >= 64 {
                match op {
                    BinaryOp::Shr if n < 0 => -1,
                    _ => 0,
                }
            } else if op == BinaryOp::Shl {
                n << shift
            } else {
                n >> shift
            };
            Ok(Value::Int(out))
        }
        BinaryOp::BitAnd => Ok(Value::Int(to_int(l) & to_int(r))),
        BinaryOp::BitOr => Ok(Value::Int(to_int(l) | to_int(r))),
        BinaryOp::BitXor => Ok(Value::Int(to_int(l) ^ to_int(r))),
        BinaryOp::AndNot => Ok(Value::Int(to_int(l) & !to_int(r))),
        BinaryOp::And => Ok(Value::Bool(to_bool(l) && to_bool(r))),
        BinaryOp::Or => Ok(Value::Bool(to_bool(l) || to_bool(r))),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r)?)),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r)?)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = if let (Value::Str(a), Value::Str(b)) = (l, r) {
                a.cmp(b)
            } else if float_op {
                to_float(l)
                    .partial_cmp(&to_float(r))
                    .unwrap_or(std::cmp::Ordering::Equal)
            } else {
                to_int(l).cmp(&to_int(r))
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_binary_add() {
        assert_eq!(
            apply_binary(BinaryOp::Add, &Value::Int(2), &Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            apply_binary(BinaryOp::Add, &Value::Int(2), &Value::Float(0.5)).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            apply_binary(BinaryOp::Add, &Value::Str("a".into()), &Value::Int(1)).unwrap(),
            Value::Str("a1".into())
        );
    }

    #[test]
    fn test_apply_binary_div_always_float() {
        assert_eq!(
            apply_binary(BinaryOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_apply_binary_rem_zero() {
        let err = apply_binary(BinaryOp::Rem, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
    }

    #[test]
    fn test_apply_binary_shifts() {
        assert_eq!(
            apply_binary(BinaryOp::Shl, &Value::Int(1), &Value::Int(4)).unwrap(),
            Value::Int(16)
        );
        assert_eq!(
            apply_binary(BinaryOp::Shl, &Value::Int(1), &Value::Int(64)).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            apply_binary(BinaryOp::Shr, &Value::Int(-8), &Value::Int(1)).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            apply_binary(BinaryOp::Shr, &Value::Int(-8), &Value::Int(70)).unwrap(),
            Value::Int(-1)
        );
        assert!(apply_binary(BinaryOp::Shl, &Value::Int(1), &Value::Int(-1)).is_err());
    }

    #[test]
    fn test_apply_binary_and_not() {
        assert_eq!(
            apply_binary(BinaryOp::AndNot, &Value::Int(0b1110), &Value::Int(0b0110)).unwrap(),
            Value::Int(0b1000)
        );
    }

    #[test]
    fn test_apply_binary_string_ordering() {
        assert_eq!(
            apply_binary(
                BinaryOp::Lt,
                &Value::Str("abc".into()),
                &Value::Str("abd".into())
            )
            .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(
                BinaryOp::Ge,
                &Value::Str("b".into()),
                &Value::Str("a".into())
            )
            .unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_type_tag_of_expr() {
        assert_eq!(
            type_tag_of_expr(&Expr::Type(TypeExpr::Slice(Box::new(TypeExpr::Named(
                "int".into()
            ))))),
            Some("[]int".to_string())
        );
        assert_eq!(
            type_tag_of_expr(&Expr::Ident("Point".into())),
            Some("Point".to_string())
        );
        assert_eq!(type_tag_of_expr(&Expr::IntLit(1)), None);
    }

    #[test]
    fn test_consume_break() {
        assert_eq!(consume_break(Flow::Break), Flow::None);
        assert_eq!(
            consume_break(Flow::Return(Value::Int(1))),
            Flow::Return(Value::Int(1))
        );
        assert_eq!(consume_break(Flow::Continue), Flow::Continue);
    }

    fn empty_main() -> File {
        File {
            package: "main".to_string(),
            imports: vec![],
            decls: vec![Decl::Func(crate::ast::FuncDecl {
                name: "main".to_string(),
                recv: None,
                params: vec![],
                variadic: false,
                body: Block { stmts: vec![] },
            })],
        }
    }

    #[test]
    fn test_run_without_parser() {
        let vm = Interpreter::new();
        assert!(matches!(vm.run("package main"), Err(RunError::NoParser)));
    }

    #[test]
    fn test_run_through_registered_parser() {
        let vm = Interpreter::new();
        vm.set_parser(Arc::new(|src: &str| {
            if src == "ok" {
                Ok(empty_main())
            } else {
                Err("unexpected token".to_string())
            }
        }));
        assert!(vm.run("ok").is_ok());
        let err = vm.run("bad").unwrap_err();
        assert!(matches!(err, RunError::Parse(_)));
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_run_file_rejects_non_main_package() {
        let vm = Interpreter::new();
        let file = File {
            package: "lib".to_string(),
            imports: vec![],
            decls: vec![],
        };
        let err = vm.run_file(&file).unwrap_err();
        assert!(err.to_string().contains("package main"));
    }

    #[test]
    fn test_zero_for_tag_named_struct() {
        let vm = Interpreter::new();
        vm.register_type(TypeDef {
            name: "Point".to_string(),
            fields: vec![
                FieldDef {
                    name: "x".to_string(),
                    type_tag: "int".to_string(),
                },
                FieldDef {
                    name: "y".to_string(),
                    type_tag: "int".to_string(),
                },
            ],
            methods: HashMap::new(),
        });
        let v = vm.zero_for_tag("Point");
        let Value::Struct(s) = v else { panic!("not a struct") };
        assert_eq!(s.get_field("x"), Some(Value::Int(0)));
        assert_eq!(s.get_field("y"), Some(Value::Int(0)));
    }

    #[test]
    fn test_register_native_binds_global() {
        let vm = Interpreter::new();
        vm.register_native("Answer", |_| Ok(Value::Int(42)));
        assert!(vm.native_fn("Answer").is_some());
        assert!(matches!(
            env_get(&vm.globals(), "Answer"),
            Some(Value::Func(_))
        ));
    }
}
