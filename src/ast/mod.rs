//! Abstract Syntax Tree definitions
//!
//! The evaluator consumes this tree; producing it is the job of an external
//! frontend. Every node derives serde traits so a frontend can hand finished
//! programs to the CLI (or any other host) as JSON.

use serde::{Deserialize, Serialize};

/// One translation unit: package clause, imports, top-level declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    /// Package name from the package clause (only "main" is accepted)
    pub package: String,
    pub imports: Vec<Import>,
    pub decls: Vec<Decl>,
}

/// A single import spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    /// Import path, e.g. "encoding/json"
    pub path: String,
    /// Explicit alias; defaults to the last path segment
    pub alias: Option<String>,
}

impl Import {
    /// The name this import binds in the global scope
    pub fn bound_name(&self) -> &str {
        match &self.alias {
            Some(a) => a,
            None => self.path.rsplit('/').next().unwrap_or(&self.path),
        }
    }
}

/// Top-level declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decl {
    Func(FuncDecl),
    Var(VarDecl),
    Type(TypeDecl),
}

/// Function or method declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    /// Method receiver, when declared as `func (r T) Name(...)`
    pub recv: Option<Receiver>,
    pub params: Vec<Param>,
    /// Whether the last parameter is a `...T` rest parameter
    pub variadic: bool,
    pub body: Block,
}

/// Method receiver binding; `*T` and `T` receivers are equivalent here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub type_name: String,
}

/// Function parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
}

/// Var or const declaration; names without initializers take zero values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDecl {
    pub names: Vec<String>,
    pub ty: Option<TypeExpr>,
    pub values: Vec<Expr>,
}

/// Struct type declaration with fields in source order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

/// One field of a struct declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
}

/// Type syntax as it appears in declarations, `make`, and composite literals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeExpr {
    /// Named type: `int`, `string`, `Point`, ...
    Named(String),
    /// Pointer type `*T`; runtime containers are already reference-like
    Pointer(Box<TypeExpr>),
    /// Slice type `[]T`
    Slice(Box<TypeExpr>),
    /// Map type `map[K]V`
    Map(Box<TypeExpr>, Box<TypeExpr>),
    /// Channel type `chan T`; direction is erased
    Chan(Box<TypeExpr>),
}

impl TypeExpr {
    /// Canonical textual tag used by the runtime ("[]int", "map[string]int", ...)
    pub fn tag(&self) -> String {
        match self {
            TypeExpr::Named(n) => n.clone(),
            TypeExpr::Pointer(t) => format!("*{}", t.tag()),
            TypeExpr::Slice(t) => format!("[]{}", t.tag()),
            TypeExpr::Map(k, v) => format!("map[{}]{}", k.tag(), v.tag()),
            TypeExpr::Chan(t) => format!("chan {}", t.tag()),
        }
    }
}

/// Statement block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// Statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// Expression evaluated for effect
    Expr(Expr),
    /// Channel send: `ch <- v`
    Send { chan: Expr, value: Expr },
    /// Assignment, including `:=` and compound forms
    Assign {
        op: AssignOp,
        lhs: Vec<Expr>,
        rhs: Vec<Expr>,
    },
    /// `x++` / `x--`
    IncDec { target: Expr, inc: bool },
    /// Local var/const declaration
    Var(VarDecl),
    Block(Block),
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        then: Block,
        /// Either a Block (else) or another If (else-if chain)
        els: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
    /// `for k, v := range x`; None names mean the blank identifier
    Range {
        key: Option<String>,
        value: Option<String>,
        expr: Expr,
        body: Block,
    },
    Switch {
        init: Option<Box<Stmt>>,
        tag: Option<Expr>,
        cases: Vec<SwitchCase>,
    },
    Select {
        cases: Vec<SelectCase>,
        default: Option<Block>,
    },
    Defer(CallExpr),
    Go(CallExpr),
    Return(Option<Expr>),
    Break,
    Continue,
}

/// A switch case; an empty expression list is the default clause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub exprs: Vec<Expr>,
    pub body: Block,
}

/// A select case: one communication operation plus its body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectCase {
    pub comm: CommOp,
    pub body: Block,
}

/// Communication operation heading a select case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommOp {
    Send {
        chan: Expr,
        value: Expr,
    },
    /// `v, ok := <-ch`; either binding may be omitted
    Recv {
        value: Option<String>,
        ok: Option<String>,
        chan: Expr,
    },
}

/// Expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),
    /// Character literal; evaluates to the rune as an integer
    CharLit(char),
    Ident(String),
    /// Type syntax in expression position (first argument of `make`)
    Type(TypeExpr),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call(CallExpr),
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
    },
    /// `x[lo:hi]`; bounds default to 0 and len
    Slice {
        expr: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
    },
    Selector {
        expr: Box<Expr>,
        field: String,
    },
    /// Composite literal for slice/map/struct types
    Composite {
        ty: TypeExpr,
        elems: Vec<CompositeElem>,
    },
    /// Function literal; captures the environment where it is evaluated
    FuncLit {
        params: Vec<Param>,
        variadic: bool,
        body: Block,
    },
}

/// Call with optional `...` expansion of the final argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallExpr {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    pub spread: bool,
}

/// One element of a composite literal; `key` is a field name for structs
/// and a key expression for maps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeElem {
    pub key: Option<Expr>,
    pub value: Expr,
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
    /// `+`
    Pos,
    /// `^` (bitwise complement)
    BitNot,
    /// `<-` (channel receive)
    Recv,
    /// `&`; containers are already reference-like, so this is identity
    Addr,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    /// `&^`
    AndNot,
    Shl,
    Shr,
    /// `&&` (short-circuit)
    And,
    /// `||` (short-circuit)
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Assignment operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    /// `:=`
    Define,
    /// `=`
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    AndNot,
}

impl AssignOp {
    /// The binary operator a compound assignment applies, if any
    pub fn binary_op(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Define | AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
            AssignOp::BitAnd => Some(BinaryOp::BitAnd),
            AssignOp::BitOr => Some(BinaryOp::BitOr),
            AssignOp::BitXor => Some(BinaryOp::BitXor),
            AssignOp::Shl => Some(BinaryOp::Shl),
            AssignOp::Shr => Some(BinaryOp::Shr),
            AssignOp::AndNot => Some(BinaryOp::AndNot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_expr_tags() {
        assert_eq!(TypeExpr::Named("int".into()).tag(), "int");
        assert_eq!(
            TypeExpr::Slice(Box::new(TypeExpr::Named("byte".into()))).tag(),
            "[]byte"
        );
        assert_eq!(
            TypeExpr::Map(
                Box::new(TypeExpr::Named("string".into())),
                Box::new(TypeExpr::Named("int".into()))
            )
            .tag(),
            "map[string]int"
        );
        assert_eq!(
            TypeExpr::Chan(Box::new(TypeExpr::Named("int".into()))).tag(),
            "chan int"
        );
        assert_eq!(
            TypeExpr::Pointer(Box::new(TypeExpr::Named("Point".into()))).tag(),
            "*Point"
        );
    }

    #[test]
    fn test_import_bound_name() {
        let plain = Import {
            path: "fmt".into(),
            alias: None,
        };
        assert_eq!(plain.bound_name(), "fmt");

        let nested = Import {
            path: "math/rand".into(),
            alias: None,
        };
        assert_eq!(nested.bound_name(), "rand");

        let aliased = Import {
            path: "encoding/json".into(),
            alias: Some("j".into()),
        };
        assert_eq!(aliased.bound_name(), "j");
    }

    #[test]
    fn test_assign_op_binary() {
        assert_eq!(AssignOp::Add.binary_op(), Some(BinaryOp::Add));
        assert_eq!(AssignOp::AndNot.binary_op(), Some(BinaryOp::AndNot));
        assert_eq!(AssignOp::Define.binary_op(), None);
        assert_eq!(AssignOp::Assign.binary_op(), None);
    }

    #[test]
    fn test_ast_json_round_trip() {
        let file = File {
            package: "main".into(),
            imports: vec![Import {
                path: "fmt".into(),
                alias: None,
            }],
            decls: vec![Decl::Func(FuncDecl {
                name: "main".into(),
                recv: None,
                params: vec![],
                variadic: false,
                body: Block {
                    stmts: vec![Stmt::Return(Some(Expr::IntLit(0)))],
                },
            })],
        };
        let text = serde_json::to_string(&file).unwrap();
        let back: File = serde_json::from_str(&text).unwrap();
        assert_eq!(back.package, "main");
        assert_eq!(back.imports.len(), 1);
        assert_eq!(back.decls.len(), 1);
    }
}
