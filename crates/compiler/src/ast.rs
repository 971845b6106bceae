//! The AST input contract.
//!
//! The lexer and parser live outside this crate; a frontend hands the
//! compiler one [`ModuleAst`] per module, either constructed in Rust or
//! deserialized from the JSON interchange form (`<module>.tsn.json`). Every
//! node carries an optional source location the compiler threads through to
//! IR and diagnostics.

use serde::{Deserialize, Serialize};

/// Line/column pair from the frontend. Zero means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcLoc {
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub col: u32,
}

impl SrcLoc {
    pub fn new(line: u32, col: u32) -> Self {
        SrcLoc { line, col }
    }
}

/// A reference to a type as written in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeRef {
    /// `i32`, `string`, `C`, `mod::C`
    Named { name: String },
    /// `Pair<f32>`
    Template { name: String, args: Vec<TypeRef> },
    /// `(a: i32, b: i32) => i32`, a callable value
    Function { params: Vec<TypeRef>, ret: Box<TypeRef> },
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named { name: name.into() }
    }
}

/// One module as delivered by the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleAst {
    pub name: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub decls: Vec<Decl>,
}

/// Top-level declarations, compiled in source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decl {
    Function(FunctionDecl),
    Class(ClassDecl),
    TemplateClass {
        params: Vec<String>,
        decl: ClassDecl,
    },
    TemplateFunction {
        params: Vec<String>,
        decl: FunctionDecl,
    },
    /// `type index = u64;`
    Alias {
        name: String,
        target: TypeRef,
        #[serde(default)]
        loc: SrcLoc,
    },
    /// Module-level variable; lives in the module data segment.
    Global {
        name: String,
        ty: TypeRef,
        #[serde(default)]
        init: Option<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Omitted means `void`.
    #[serde(default)]
    pub ret: Option<TypeRef>,
    #[serde(default)]
    pub is_static: bool,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub loc: SrcLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropDecl {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub loc: SrcLoc,
}

/// Constructor: parameters, property initializer list, body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtorDecl {
    #[serde(default)]
    pub params: Vec<Param>,
    /// `(property name, initializer expression)`, applied in property
    /// declaration order regardless of list order.
    #[serde(default)]
    pub inits: Vec<(String, Expr)>,
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub loc: SrcLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub props: Vec<PropDecl>,
    #[serde(default)]
    pub ctor: Option<CtorDecl>,
    /// Destructor body, if declared.
    #[serde(default)]
    pub dtor: Option<Vec<Stmt>>,
    #[serde(default)]
    pub methods: Vec<FunctionDecl>,
    #[serde(default)]
    pub loc: SrcLoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LogicAnd,
    LogicOr,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
}

impl BinaryOp {
    pub fn is_compare(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Eq | BinaryOp::Neq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicAnd | BinaryOp::LogicOr)
    }

    /// The `operator X` method name a user type may implement.
    pub fn method_name(self) -> &'static str {
        match self {
            BinaryOp::Add => "operator+",
            BinaryOp::Sub => "operator-",
            BinaryOp::Mul => "operator*",
            BinaryOp::Div => "operator/",
            BinaryOp::Mod => "operator%",
            BinaryOp::Shl => "operator<<",
            BinaryOp::Shr => "operator>>",
            BinaryOp::BitAnd => "operator&",
            BinaryOp::BitOr => "operator|",
            BinaryOp::BitXor => "operator^",
            BinaryOp::LogicAnd => "operator&&",
            BinaryOp::LogicOr => "operator||",
            BinaryOp::Lt => "operator<",
            BinaryOp::Lte => "operator<=",
            BinaryOp::Gt => "operator>",
            BinaryOp::Gte => "operator>=",
            BinaryOp::Eq => "operator==",
            BinaryOp::Neq => "operator!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    IntLit {
        value: i64,
        #[serde(default)]
        loc: SrcLoc,
    },
    UintLit {
        value: u64,
        #[serde(default)]
        loc: SrcLoc,
    },
    FloatLit {
        value: f64,
        /// `1.5f` vs `1.5`
        #[serde(default)]
        is_f32: bool,
        #[serde(default)]
        loc: SrcLoc,
    },
    BoolLit {
        value: bool,
        #[serde(default)]
        loc: SrcLoc,
    },
    StrLit {
        value: String,
        #[serde(default)]
        loc: SrcLoc,
    },
    /// `{ a: 1, b: 2 }`; creates an anonymous structural type.
    ObjectLit {
        fields: Vec<(String, Expr)>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Ident {
        name: String,
        #[serde(default)]
        loc: SrcLoc,
    },
    Member {
        obj: Box<Expr>,
        name: String,
        #[serde(default)]
        loc: SrcLoc,
    },
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Call {
        callee: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
        /// Explicit template arguments: `f<i32>(x)`.
        #[serde(default)]
        type_args: Vec<TypeRef>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
    /// `target = value` or `target op= value`.
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        #[serde(default)]
        op: Option<BinaryOp>,
        #[serde(default)]
        loc: SrcLoc,
    },
    /// `cond ? then : else`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Lambda {
        #[serde(default)]
        params: Vec<Param>,
        #[serde(default)]
        ret: Option<TypeRef>,
        body: Vec<Stmt>,
        #[serde(default)]
        loc: SrcLoc,
    },
    New {
        ty: TypeRef,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Cast {
        expr: Box<Expr>,
        ty: TypeRef,
        #[serde(default)]
        loc: SrcLoc,
    },
}

impl Expr {
    pub fn loc(&self) -> SrcLoc {
        match self {
            Expr::IntLit { loc, .. }
            | Expr::UintLit { loc, .. }
            | Expr::FloatLit { loc, .. }
            | Expr::BoolLit { loc, .. }
            | Expr::StrLit { loc, .. }
            | Expr::ObjectLit { loc, .. }
            | Expr::Ident { loc, .. }
            | Expr::Member { loc, .. }
            | Expr::Index { loc, .. }
            | Expr::Call { loc, .. }
            | Expr::Binary { loc, .. }
            | Expr::Unary { loc, .. }
            | Expr::Assign { loc, .. }
            | Expr::Conditional { loc, .. }
            | Expr::Lambda { loc, .. }
            | Expr::New { loc, .. }
            | Expr::Cast { loc, .. } => *loc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    Expr {
        expr: Expr,
    },
    Let {
        name: String,
        #[serde(default)]
        ty: Option<TypeRef>,
        #[serde(default)]
        init: Option<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        loc: SrcLoc,
    },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        #[serde(default)]
        els: Option<Vec<Stmt>>,
        #[serde(default)]
        loc: SrcLoc,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        #[serde(default)]
        loc: SrcLoc,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
        #[serde(default)]
        loc: SrcLoc,
    },
    For {
        #[serde(default)]
        init: Option<Box<Stmt>>,
        #[serde(default)]
        cond: Option<Expr>,
        #[serde(default)]
        step: Option<Expr>,
        body: Vec<Stmt>,
        #[serde(default)]
        loc: SrcLoc,
    },
    Break {
        #[serde(default)]
        loc: SrcLoc,
    },
    Continue {
        #[serde(default)]
        loc: SrcLoc,
    },
    Block {
        body: Vec<Stmt>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_roundtrips_through_json() {
        let module = ModuleAst {
            name: "demo".into(),
            imports: vec!["math".into()],
            decls: vec![Decl::Function(FunctionDecl {
                name: "main".into(),
                params: vec![],
                ret: Some(TypeRef::named("i32")),
                is_static: false,
                body: vec![Stmt::Return {
                    value: Some(Expr::Binary {
                        op: BinaryOp::Add,
                        lhs: Box::new(Expr::IntLit {
                            value: 2,
                            loc: SrcLoc::default(),
                        }),
                        rhs: Box::new(Expr::IntLit {
                            value: 3,
                            loc: SrcLoc::default(),
                        }),
                        loc: SrcLoc::default(),
                    }),
                    loc: SrcLoc::default(),
                }],
                loc: SrcLoc::new(1, 1),
            })],
        };

        let json = serde_json::to_string(&module).unwrap();
        let back: ModuleAst = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "demo");
        assert_eq!(back.imports, vec!["math"]);
        assert_eq!(back.decls.len(), 1);
    }

    #[test]
    fn test_sparse_json_uses_defaults() {
        let json = r#"{
            "name": "m",
            "decls": [{
                "kind": "function",
                "name": "f",
                "body": [{"kind": "return"}]
            }]
        }"#;
        let m: ModuleAst = serde_json::from_str(json).unwrap();
        match &m.decls[0] {
            Decl::Function(f) => {
                assert!(f.ret.is_none());
                assert!(f.params.is_empty());
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_template_typeref() {
        let json = r#"{"kind":"template","name":"Pair","args":[{"kind":"named","name":"f32"}]}"#;
        let t: TypeRef = serde_json::from_str(json).unwrap();
        assert_eq!(
            t,
            TypeRef::Template {
                name: "Pair".into(),
                args: vec![TypeRef::named("f32")]
            }
        );
    }
}
