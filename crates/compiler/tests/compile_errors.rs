//! Semantic-error behavior: coded diagnostics, best-effort recovery, and
//! the error-value sentinel keeping one mistake from cascading.

use tsn_core::MessageCode;
use tsnc_lib::{
    BinaryOp, ClassDecl, CtorDecl, Decl, Expr, FunctionDecl, MemoryLoader, ModuleAst, Param,
    Pipeline, PropDecl, SrcLoc, Stmt, TypeRef,
};

fn loc() -> SrcLoc {
    SrcLoc::new(1, 1)
}

fn compile(ast: ModuleAst) -> Pipeline {
    let name = ast.name.clone();
    let mut loader = MemoryLoader::new();
    loader.insert(ast);
    let mut pipeline = Pipeline::new(Box::new(loader));
    let _ = pipeline.compile(&name);
    pipeline
}

fn has_code(pipeline: &Pipeline, code: MessageCode) -> bool {
    pipeline.ctx.log.entries().iter().any(|e| e.code == code)
}

fn main_fn(body: Vec<Stmt>) -> Decl {
    Decl::Function(FunctionDecl {
        name: "main".into(),
        params: vec![],
        ret: Some(TypeRef::named("i32")),
        is_static: false,
        body,
        loc: loc(),
    })
}

#[test]
fn test_no_valid_conversion_is_reported() {
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![main_fn(vec![
            Stmt::Let {
                name: "x".into(),
                ty: Some(TypeRef::named("i32")),
                init: Some(Expr::StrLit {
                    value: "nope".into(),
                    loc: loc(),
                }),
                loc: loc(),
            },
            Stmt::Return {
                value: Some(Expr::IntLit { value: 0, loc: loc() }),
                loc: loc(),
            },
        ])],
    };
    let p = compile(ast);
    assert!(has_code(&p, MessageCode::CNoValidConversion));
}

#[test]
fn test_undefined_identifier_does_not_cascade() {
    // one undefined name, used several times: exactly one diagnostic kind
    // fires and compilation of the declaration continues
    let bad = Expr::Ident {
        name: "ghost".into(),
        loc: loc(),
    };
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![main_fn(vec![
            Stmt::Expr {
                expr: Expr::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(bad.clone()),
                    rhs: Box::new(Expr::IntLit { value: 1, loc: loc() }),
                    loc: loc(),
                },
            },
            Stmt::Return {
                value: Some(Expr::IntLit { value: 0, loc: loc() }),
                loc: loc(),
            },
        ])],
    };
    let p = compile(ast);
    assert!(has_code(&p, MessageCode::CUndefinedIdentifier));
    // the binary operator over the sentinel produced no second diagnostic
    let count = p
        .ctx
        .log
        .entries()
        .iter()
        .filter(|e| e.code == MessageCode::CInvalidOperands)
        .count();
    assert_eq!(count, 0);
}

#[test]
fn test_ambiguous_overload_is_an_error() {
    let pick = |ty: &str| {
        Decl::Function(FunctionDecl {
            name: "pick".into(),
            params: vec![Param {
                name: "v".into(),
                ty: TypeRef::named(ty),
            }],
            ret: Some(TypeRef::named("i32")),
            is_static: false,
            body: vec![Stmt::Return {
                value: Some(Expr::IntLit { value: 0, loc: loc() }),
                loc: loc(),
            }],
            loc: loc(),
        })
    };
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![
            pick("i32"),
            pick("i64"),
            main_fn(vec![
                Stmt::Let {
                    name: "small".into(),
                    ty: Some(TypeRef::named("i8")),
                    init: Some(Expr::IntLit { value: 1, loc: loc() }),
                    loc: loc(),
                },
                Stmt::Return {
                    value: Some(Expr::Call {
                        callee: Box::new(Expr::Ident {
                            name: "pick".into(),
                            loc: loc(),
                        }),
                        args: vec![Expr::Ident {
                            name: "small".into(),
                            loc: loc(),
                        }],
                        type_args: vec![],
                        loc: loc(),
                    }),
                    loc: loc(),
                },
            ]),
        ],
    };
    let p = compile(ast);
    assert!(has_code(&p, MessageCode::CAmbiguousCall));
}

#[test]
fn test_property_without_default_constructor() {
    // class Inner has only a one-argument constructor; Outer's constructor
    // does not initialize its Inner property
    let inner = Decl::Class(ClassDecl {
        name: "Inner".into(),
        props: vec![PropDecl {
            name: "v".into(),
            ty: TypeRef::named("i32"),
            loc: loc(),
        }],
        ctor: Some(CtorDecl {
            params: vec![Param {
                name: "v".into(),
                ty: TypeRef::named("i32"),
            }],
            inits: vec![("v".into(), Expr::Ident { name: "v".into(), loc: loc() })],
            body: vec![],
            loc: loc(),
        }),
        dtor: None,
        methods: vec![],
        loc: loc(),
    });
    let outer = Decl::Class(ClassDecl {
        name: "Outer".into(),
        props: vec![PropDecl {
            name: "inner".into(),
            ty: TypeRef::named("Inner"),
            loc: loc(),
        }],
        ctor: Some(CtorDecl {
            params: vec![],
            inits: vec![],
            body: vec![],
            loc: loc(),
        }),
        dtor: None,
        methods: vec![],
        loc: loc(),
    });
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![
            inner,
            outer,
            main_fn(vec![Stmt::Return {
                value: Some(Expr::IntLit { value: 0, loc: loc() }),
                loc: loc(),
            }]),
        ],
    };
    let p = compile(ast);
    assert!(has_code(&p, MessageCode::CPropertyHasNoDefaultConstructor));
}

#[test]
fn test_sibling_declarations_survive_a_bad_one() {
    let bad = Decl::Function(FunctionDecl {
        name: "broken".into(),
        params: vec![],
        ret: Some(TypeRef::named("NoSuchType")),
        is_static: false,
        body: vec![],
        loc: loc(),
    });
    let good = Decl::Function(FunctionDecl {
        name: "fine".into(),
        params: vec![],
        ret: Some(TypeRef::named("i32")),
        is_static: false,
        body: vec![Stmt::Return {
            value: Some(Expr::IntLit { value: 1, loc: loc() }),
            loc: loc(),
        }],
        loc: loc(),
    });
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![bad, good],
    };
    let p = compile(ast);
    assert!(has_code(&p, MessageCode::CNoSuchType));
    // the sibling still produced a registry entry
    assert!(p.ctx.funcs.iter().any(|f| f.name == "fine"));
}

#[test]
fn test_break_outside_loop() {
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![main_fn(vec![
            Stmt::Break { loc: loc() },
            Stmt::Return {
                value: Some(Expr::IntLit { value: 0, loc: loc() }),
                loc: loc(),
            },
        ])],
    };
    let p = compile(ast);
    assert!(has_code(&p, MessageCode::CBreakOutsideLoop));
}

#[test]
fn test_missing_return_value() {
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![Decl::Function(FunctionDecl {
            name: "main".into(),
            params: vec![],
            ret: Some(TypeRef::named("i32")),
            is_static: false,
            body: vec![],
            loc: loc(),
        })],
    };
    let p = compile(ast);
    assert!(has_code(&p, MessageCode::CMissingReturnValue));
}

#[test]
fn test_diagnostics_carry_source_ranges() {
    let ast = ModuleAst {
        name: "app".into(),
        imports: vec![],
        decls: vec![main_fn(vec![
            Stmt::Expr {
                expr: Expr::Ident {
                    name: "ghost".into(),
                    loc: SrcLoc::new(42, 7),
                },
            },
            Stmt::Return {
                value: Some(Expr::IntLit { value: 0, loc: loc() }),
                loc: loc(),
            },
        ])],
    };
    let p = compile(ast);
    let entry = p
        .ctx
        .log
        .entries()
        .iter()
        .find(|e| e.code == MessageCode::CUndefinedIdentifier)
        .expect("missing diagnostic");
    assert_eq!(entry.range.line, 42);
    assert_eq!(entry.range.col, 7);
    assert!(entry.code.code().starts_with('C'));
}
