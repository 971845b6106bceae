//! End-to-end tests: build module ASTs, compile through the full pipeline
//! (optimizer and VM backend included), and execute under the VM.

use tsn_core::Opcode;
use tsn_vm::VmConfig;
use tsnc_lib::{
    BinaryOp, ClassDecl, CtorDecl, Decl, Expr, FunctionDecl, MemoryLoader, ModuleAst, Param,
    Pipeline, PropDecl, SrcLoc, Stmt, TypeRef, UnaryOp,
};

fn loc() -> SrcLoc {
    SrcLoc::default()
}

fn int(v: i64) -> Expr {
    Expr::IntLit { value: v, loc: loc() }
}

fn float(v: f64) -> Expr {
    Expr::FloatLit {
        value: v,
        is_f32: false,
        loc: loc(),
    }
}

fn boolean(v: bool) -> Expr {
    Expr::BoolLit { value: v, loc: loc() }
}

fn string(v: &str) -> Expr {
    Expr::StrLit {
        value: v.into(),
        loc: loc(),
    }
}

fn ident(name: &str) -> Expr {
    Expr::Ident {
        name: name.into(),
        loc: loc(),
    }
}

fn member(obj: Expr, name: &str) -> Expr {
    Expr::Member {
        obj: Box::new(obj),
        name: name.into(),
        loc: loc(),
    }
}

fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        loc: loc(),
    }
}

fn assign(target: Expr, value: Expr) -> Expr {
    Expr::Assign {
        target: Box::new(target),
        value: Box::new(value),
        op: None,
        loc: loc(),
    }
}

fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(callee),
        args,
        type_args: vec![],
        loc: loc(),
    }
}

fn ret(value: Option<Expr>) -> Stmt {
    Stmt::Return { value, loc: loc() }
}

fn let_typed(name: &str, ty: &str, init: Expr) -> Stmt {
    Stmt::Let {
        name: name.into(),
        ty: Some(TypeRef::named(ty)),
        init: Some(init),
        loc: loc(),
    }
}

fn let_infer(name: &str, init: Expr) -> Stmt {
    Stmt::Let {
        name: name.into(),
        ty: None,
        init: Some(init),
        loc: loc(),
    }
}

fn func(name: &str, params: Vec<(&str, &str)>, ret_ty: Option<&str>, body: Vec<Stmt>) -> Decl {
    Decl::Function(FunctionDecl {
        name: name.into(),
        params: params
            .into_iter()
            .map(|(n, t)| Param {
                name: n.into(),
                ty: TypeRef::named(t),
            })
            .collect(),
        ret: ret_ty.map(TypeRef::named),
        is_static: false,
        body,
        loc: loc(),
    })
}

fn module(name: &str, decls: Vec<Decl>) -> ModuleAst {
    ModuleAst {
        name: name.into(),
        imports: vec![],
        decls,
    }
}

fn compile(ast: ModuleAst) -> (Pipeline, tsn_core::ModuleId) {
    let name = ast.name.clone();
    let mut loader = MemoryLoader::new();
    loader.insert(ast);
    let mut pipeline = Pipeline::new(Box::new(loader));
    let id = pipeline.compile(&name).expect("pipeline failed");
    let log: Vec<String> = pipeline
        .ctx
        .log
        .entries()
        .iter()
        .map(|e| e.to_string())
        .collect();
    assert!(
        !pipeline.ctx.log.has_errors(),
        "compile errors: {log:?}"
    );
    (pipeline, id)
}

fn run(ast: ModuleAst) -> u64 {
    let (pipeline, id) = compile(ast);
    tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).expect("vm failed")
}

fn main_ir<'p>(pipeline: &'p Pipeline, id: tsn_core::ModuleId) -> &'p tsn_core::CodeHolder {
    let entry = pipeline.entry_function(id).unwrap();
    pipeline
        .holders
        .iter()
        .find(|ch| ch.owner == entry)
        .expect("no IR for main")
}

// --- the canonical scenarios -------------------------------------------

#[test]
fn test_constant_expression_folds_to_single_assign() {
    // let x: i32 = 2 + 3 * 4; return x;
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_typed(
                    "x",
                    "i32",
                    bin(
                        BinaryOp::Add,
                        int(2),
                        bin(BinaryOp::Mul, int(3), int(4)),
                    ),
                ),
                ret(Some(ident("x"))),
            ],
        )],
    );
    let (pipeline, id) = compile(ast);

    let ir = main_ir(&pipeline, id);
    assert!(
        ir.code.iter().all(|i| !i.op.is_foldable_binary()),
        "arithmetic survived folding: {:?}",
        ir.code.iter().map(|i| i.op).collect::<Vec<_>>()
    );

    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result as i64, 14);
}

#[test]
fn test_object_literal_store_load_collapses() {
    // let p = { a: 1, b: 2 }; p.a = 5; return p.a;
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_infer(
                    "p",
                    Expr::ObjectLit {
                        fields: vec![("a".into(), int(1)), ("b".into(), int(2))],
                        loc: loc(),
                    },
                ),
                Stmt::Expr {
                    expr: assign(member(ident("p"), "a"), int(5)),
                },
                ret(Some(member(ident("p"), "a"))),
            ],
        )],
    );
    let (pipeline, id) = compile(ast);

    // the read of p.a collapses onto the stored constant
    let ir = main_ir(&pipeline, id);
    assert!(
        ir.code.iter().all(|i| i.op != Opcode::Load),
        "a load survived memory reduction"
    );

    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result as i64, 5);
}

#[test]
fn test_class_construction_and_destruction() {
    // class C { x: i32; constructor(v: i32) { this.x = v; } destructor {} }
    // let c = new C(7); return c.x;
    let class = Decl::Class(ClassDecl {
        name: "C".into(),
        props: vec![PropDecl {
            name: "x".into(),
            ty: TypeRef::named("i32"),
            loc: loc(),
        }],
        ctor: Some(CtorDecl {
            params: vec![Param {
                name: "v".into(),
                ty: TypeRef::named("i32"),
            }],
            inits: vec![],
            body: vec![Stmt::Expr {
                expr: assign(member(ident("this"), "x"), ident("v")),
            }],
            loc: loc(),
        }),
        dtor: Some(vec![]),
        methods: vec![],
        loc: loc(),
    });
    let ast = module(
        "app",
        vec![
            class,
            func(
                "main",
                vec![],
                Some("i32"),
                vec![
                    let_infer(
                        "c",
                        Expr::New {
                            ty: TypeRef::named("C"),
                            args: vec![int(7)],
                            loc: loc(),
                        },
                    ),
                    ret(Some(member(ident("c"), "x"))),
                ],
            ),
        ],
    );
    let (pipeline, id) = compile(ast);

    // stack lifetime markers are balanced on the exit path
    let ir = main_ir(&pipeline, id);
    let allocs = ir.code.iter().filter(|i| i.op == Opcode::StackAlloc).count();
    let frees = ir.code.iter().filter(|i| i.op == Opcode::StackFree).count();
    assert_eq!(allocs, frees);
    assert!(ir.code.iter().any(|i| i.op == Opcode::Call));

    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result as i64, 7);
}

#[test]
fn test_lambda_lowering_and_indirect_call() {
    // let f = (a: i32, b: i32) => a + b; return f(3, 4);
    let lambda = Expr::Lambda {
        params: vec![
            Param {
                name: "a".into(),
                ty: TypeRef::named("i32"),
            },
            Param {
                name: "b".into(),
                ty: TypeRef::named("i32"),
            },
        ],
        ret: Some(TypeRef::named("i32")),
        body: vec![ret(Some(bin(BinaryOp::Add, ident("a"), ident("b"))))],
        loc: loc(),
    };
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_infer("f", lambda),
                ret(Some(call(ident("f"), vec![int(3), int(4)]))),
            ],
        )],
    );
    let result = run(ast);
    assert_eq!(result as i64, 7);
}

#[test]
fn test_template_interning_and_float_roundtrip() {
    // class Pair<T> { a: T; b: T; }
    // let p = new Pair<f32>(); p.a = 1.5; return p.a;
    let pair = Decl::TemplateClass {
        params: vec!["T".into()],
        decl: ClassDecl {
            name: "Pair".into(),
            props: vec![
                PropDecl {
                    name: "a".into(),
                    ty: TypeRef::named("T"),
                    loc: loc(),
                },
                PropDecl {
                    name: "b".into(),
                    ty: TypeRef::named("T"),
                    loc: loc(),
                },
            ],
            ctor: None,
            dtor: None,
            methods: vec![],
            loc: loc(),
        },
    };
    let pair_f32 = TypeRef::Template {
        name: "Pair".into(),
        args: vec![TypeRef::named("f32")],
    };
    let ast = module(
        "app",
        vec![
            pair,
            func(
                "main",
                vec![],
                Some("f32"),
                vec![
                    let_infer(
                        "p",
                        Expr::New {
                            ty: pair_f32.clone(),
                            args: vec![],
                            loc: loc(),
                        },
                    ),
                    let_infer(
                        "q",
                        Expr::New {
                            ty: pair_f32,
                            args: vec![],
                            loc: loc(),
                        },
                    ),
                    Stmt::Expr {
                        expr: assign(
                            member(ident("p"), "a"),
                            Expr::FloatLit {
                                value: 1.5,
                                is_f32: true,
                                loc: loc(),
                            },
                        ),
                    },
                    ret(Some(member(ident("p"), "a"))),
                ],
            ),
        ],
    );
    let (pipeline, id) = compile(ast);

    // both references interned to the same instantiation
    let instances = pipeline
        .ctx
        .types
        .iter()
        .filter(|t| t.name == "Pair<f32>")
        .count();
    assert_eq!(instances, 1);

    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(f32::from_bits(result as u32), 1.5);
}

#[test]
fn test_for_loop_with_break() {
    // for (let i: i32 = 0; i < 10; i++) { if (i == 5) break; } return i;
    let body = vec![Stmt::If {
        cond: bin(BinaryOp::Eq, ident("i"), int(5)),
        then: vec![Stmt::Break { loc: loc() }],
        els: None,
        loc: loc(),
    }];
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                Stmt::For {
                    init: Some(Box::new(let_typed("i", "i32", int(0)))),
                    cond: Some(bin(BinaryOp::Lt, ident("i"), int(10))),
                    step: Some(Expr::Unary {
                        op: UnaryOp::PostInc,
                        expr: Box::new(ident("i")),
                        loc: loc(),
                    }),
                    body,
                    loc: loc(),
                },
                ret(Some(ident("i"))),
            ],
        )],
    );
    let (pipeline, id) = compile(ast);

    // structured markers survive for backends that rebuild control flow
    let ir = main_ir(&pipeline, id);
    assert!(ir.code.iter().any(|i| i.op == Opcode::MetaForLoop));
    assert!(ir.code.iter().any(|i| i.op == Opcode::MetaIfBranch));

    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result as i64, 5);
}

// --- further behavior ---------------------------------------------------

#[test]
fn test_while_loop_accumulates() {
    // let s = 0; let i = 0; while (i < 5) { s += i; i++; } return s;
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_typed("s", "i32", int(0)),
                let_typed("i", "i32", int(0)),
                Stmt::While {
                    cond: bin(BinaryOp::Lt, ident("i"), int(5)),
                    body: vec![
                        Stmt::Expr {
                            expr: Expr::Assign {
                                target: Box::new(ident("s")),
                                value: Box::new(ident("i")),
                                op: Some(BinaryOp::Add),
                                loc: loc(),
                            },
                        },
                        Stmt::Expr {
                            expr: Expr::Unary {
                                op: UnaryOp::PostInc,
                                expr: Box::new(ident("i")),
                                loc: loc(),
                            },
                        },
                    ],
                    loc: loc(),
                },
                ret(Some(ident("s"))),
            ],
        )],
    );
    assert_eq!(run(ast) as i64, 10);
}

#[test]
fn test_do_while_runs_at_least_once() {
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_typed("n", "i32", int(0)),
                Stmt::DoWhile {
                    body: vec![Stmt::Expr {
                        expr: Expr::Unary {
                            op: UnaryOp::PostInc,
                            expr: Box::new(ident("n")),
                            loc: loc(),
                        },
                    }],
                    cond: boolean(false),
                    loc: loc(),
                },
                ret(Some(ident("n"))),
            ],
        )],
    );
    assert_eq!(run(ast) as i64, 1);
}

#[test]
fn test_ternary_produces_value() {
    // let n = 3; return (n < 4) ? 10 : 20;
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_typed("n", "i32", int(3)),
                ret(Some(Expr::Conditional {
                    cond: Box::new(bin(BinaryOp::Lt, ident("n"), int(4))),
                    then: Box::new(int(10)),
                    els: Box::new(int(20)),
                    loc: loc(),
                })),
            ],
        )],
    );
    assert_eq!(run(ast) as i64, 10);
}

#[test]
fn test_short_circuit_skips_rhs() {
    // let called = 0 (global effect via print); false && f() must not call f
    let f = func(
        "noisy",
        vec![],
        Some("bool"),
        vec![
            Stmt::Expr {
                expr: call(ident("print"), vec![string("called")]),
            },
            ret(Some(boolean(true))),
        ],
    );
    let ast = module(
        "app",
        vec![
            f,
            func(
                "main",
                vec![],
                Some("bool"),
                vec![
                    let_infer(
                        "and_result",
                        bin(BinaryOp::LogicAnd, boolean(false), call(ident("noisy"), vec![])),
                    ),
                    let_infer(
                        "or_result",
                        bin(BinaryOp::LogicOr, boolean(true), call(ident("noisy"), vec![])),
                    ),
                    ret(Some(bin(
                        BinaryOp::LogicOr,
                        ident("and_result"),
                        bin(BinaryOp::Eq, ident("or_result"), boolean(false)),
                    ))),
                ],
            ),
        ],
    );
    let (pipeline, id) = compile(ast);
    let (result, vm) =
        tsnc_lib::run_main_with_vm(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result, 0, "short-circuit result should be false");
    assert!(vm.output.is_empty(), "rhs was evaluated: {:?}", vm.output);
}

#[test]
fn test_closure_captures_by_value() {
    // let base = 10; let f = (x: i32) => x + base; return f(5);
    let lambda = Expr::Lambda {
        params: vec![Param {
            name: "x".into(),
            ty: TypeRef::named("i32"),
        }],
        ret: Some(TypeRef::named("i32")),
        body: vec![ret(Some(bin(BinaryOp::Add, ident("x"), ident("base"))))],
        loc: loc(),
    };
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_typed("base", "i32", int(10)),
                let_infer("f", lambda),
                ret(Some(call(ident("f"), vec![int(5)]))),
            ],
        )],
    );
    assert_eq!(run(ast) as i64, 15);
}

#[test]
fn test_function_calls_with_overloads() {
    let ast = module(
        "app",
        vec![
            func(
                "pick",
                vec![("v", "i32")],
                Some("i32"),
                vec![ret(Some(int(1)))],
            ),
            func(
                "pick",
                vec![("v", "f64")],
                Some("i32"),
                vec![ret(Some(int(2)))],
            ),
            func(
                "main",
                vec![],
                Some("i32"),
                vec![ret(Some(bin(
                    BinaryOp::Add,
                    call(ident("pick"), vec![int(7)]),
                    call(ident("pick"), vec![float(1.0)]),
                )))],
            ),
        ],
    );
    assert_eq!(run(ast) as i64, 3);
}

#[test]
fn test_imported_module_functions() {
    let math = ModuleAst {
        name: "math".into(),
        imports: vec![],
        decls: vec![func(
            "add",
            vec![("a", "i32"), ("b", "i32")],
            Some("i32"),
            vec![ret(Some(bin(BinaryOp::Add, ident("a"), ident("b"))))],
        )],
    };
    let app = ModuleAst {
        name: "app".into(),
        imports: vec!["math".into()],
        decls: vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![ret(Some(call(member(ident("math"), "add"), vec![int(3), int(4)])))],
        )],
    };
    let mut loader = MemoryLoader::new();
    loader.insert(math);
    loader.insert(app);
    let mut pipeline = Pipeline::new(Box::new(loader));
    let id = pipeline.compile("app").unwrap();
    assert!(!pipeline.ctx.log.has_errors());
    let result = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(result as i64, 7);
}

#[test]
fn test_print_reaches_host_output() {
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            None,
            vec![
                Stmt::Expr {
                    expr: call(ident("print"), vec![string("hello")]),
                },
                Stmt::Expr {
                    expr: call(ident("print"), vec![string("world")]),
                },
                ret(None),
            ],
        )],
    );
    let (pipeline, id) = compile(ast);
    let (_, vm) = tsnc_lib::run_main_with_vm(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(vm.output, vec!["hello", "world"]);
}

#[test]
fn test_destructors_run_in_reverse_construction_order() {
    let noisy_class = |name: &str, text: &str| {
        Decl::Class(ClassDecl {
            name: name.into(),
            props: vec![PropDecl {
                name: "tag".into(),
                ty: TypeRef::named("i32"),
                loc: loc(),
            }],
            ctor: None,
            dtor: Some(vec![Stmt::Expr {
                expr: call(ident("print"), vec![string(text)]),
            }]),
            methods: vec![],
            loc: loc(),
        })
    };
    let ast = module(
        "app",
        vec![
            noisy_class("First", "first"),
            noisy_class("Second", "second"),
            func(
                "main",
                vec![],
                None,
                vec![
                    let_infer(
                        "a",
                        Expr::New {
                            ty: TypeRef::named("First"),
                            args: vec![],
                            loc: loc(),
                        },
                    ),
                    let_infer(
                        "b",
                        Expr::New {
                            ty: TypeRef::named("Second"),
                            args: vec![],
                            loc: loc(),
                        },
                    ),
                    ret(None),
                ],
            ),
        ],
    );
    let (pipeline, id) = compile(ast);
    let (_, vm) = tsnc_lib::run_main_with_vm(&pipeline, id, &VmConfig::default()).unwrap();
    assert_eq!(vm.output, vec!["second", "first"]);
}

#[test]
fn test_calling_uninitialized_callback_is_a_tagged_error() {
    let fn_ty = TypeRef::Function {
        params: vec![TypeRef::named("i32")],
        ret: Box::new(TypeRef::named("i32")),
    };
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                Stmt::Let {
                    name: "f".into(),
                    ty: Some(fn_ty),
                    init: None,
                    loc: loc(),
                },
                ret(Some(call(ident("f"), vec![int(1)]))),
            ],
        )],
    );
    let (pipeline, id) = compile(ast);
    let err = tsnc_lib::run_main(&pipeline, id, &VmConfig::default()).unwrap_err();
    // the call site's offset-chain walk hits the null pointer first; a torn
    // callback reached by jalr reports InvalidCallback
    assert!(matches!(
        err,
        tsn_vm::VmError::InvalidMemoryAccess { .. } | tsn_vm::VmError::InvalidCallback
    ));
}

#[test]
fn test_methods_and_compound_property_updates() {
    // class Counter { n: i32; constructor() { this.n = 0; }
    //   bump(by: i32): i32 { this.n += by; return this.n; } }
    let class = Decl::Class(ClassDecl {
        name: "Counter".into(),
        props: vec![PropDecl {
            name: "n".into(),
            ty: TypeRef::named("i32"),
            loc: loc(),
        }],
        ctor: Some(CtorDecl {
            params: vec![],
            inits: vec![("n".into(), int(0))],
            body: vec![],
            loc: loc(),
        }),
        dtor: None,
        methods: vec![FunctionDecl {
            name: "bump".into(),
            params: vec![Param {
                name: "by".into(),
                ty: TypeRef::named("i32"),
            }],
            ret: Some(TypeRef::named("i32")),
            is_static: false,
            body: vec![
                Stmt::Expr {
                    expr: Expr::Assign {
                        target: Box::new(member(ident("this"), "n")),
                        value: Box::new(ident("by")),
                        op: Some(BinaryOp::Add),
                        loc: loc(),
                    },
                },
                ret(Some(member(ident("this"), "n"))),
            ],
            loc: loc(),
        }],
        loc: loc(),
    });
    let ast = module(
        "app",
        vec![
            class,
            func(
                "main",
                vec![],
                Some("i32"),
                vec![
                    let_infer(
                        "c",
                        Expr::New {
                            ty: TypeRef::named("Counter"),
                            args: vec![],
                            loc: loc(),
                        },
                    ),
                    Stmt::Expr {
                        expr: call(member(ident("c"), "bump"), vec![int(3)]),
                    },
                    ret(Some(call(member(ident("c"), "bump"), vec![int(4)]))),
                ],
            ),
        ],
    );
    assert_eq!(run(ast) as i64, 7);
}

#[test]
fn test_call_with_arguments_past_the_register_file() {
    // eighteen i32 parameters: the first sixteen travel in a0..a15, the
    // last two spill to the callee's frame
    let names: Vec<String> = (1..=18).map(|i| format!("p{i}")).collect();
    let sum = names
        .iter()
        .skip(1)
        .fold(ident(&names[0]), |acc, n| bin(BinaryOp::Add, acc, ident(n)));
    let sum_all = Decl::Function(FunctionDecl {
        name: "sum_all".into(),
        params: names
            .iter()
            .map(|n| Param {
                name: n.clone(),
                ty: TypeRef::named("i32"),
            })
            .collect(),
        ret: Some(TypeRef::named("i32")),
        is_static: false,
        body: vec![ret(Some(sum))],
        loc: loc(),
    });
    let ast = module(
        "app",
        vec![
            sum_all,
            func(
                "main",
                vec![],
                Some("i32"),
                vec![ret(Some(call(
                    ident("sum_all"),
                    (1..=18).map(int).collect(),
                )))],
            ),
        ],
    );
    // 1 + 2 + ... + 18; wrong handling of the stack-passed pair would drop
    // 17 and 18 from the total
    assert_eq!(run(ast) as i64, (1..=18).sum::<i64>());
}

#[test]
fn test_numeric_conversions_round_trip() {
    // let a: i32 = 41; let d: f64 = a; let back: i32 = d; return back + 1;
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_typed("a", "i32", int(41)),
                let_typed("d", "f64", ident("a")),
                let_typed("back", "i32", ident("d")),
                ret(Some(bin(BinaryOp::Add, ident("back"), int(1)))),
            ],
        )],
    );
    assert_eq!(run(ast) as i64, 42);
}

#[test]
fn test_signed_modulo_negative_operands() {
    // let a: i32 = -7; return a % 3;  (truncated division: -1)
    let ast = module(
        "app",
        vec![func(
            "main",
            vec![],
            Some("i32"),
            vec![
                let_typed(
                    "a",
                    "i32",
                    Expr::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(int(7)),
                        loc: loc(),
                    },
                ),
                ret(Some(bin(BinaryOp::Mod, ident("a"), int(3)))),
            ],
        )],
    );
    assert_eq!(run(ast) as i64, -1);
}
