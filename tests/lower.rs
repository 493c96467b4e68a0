//! End-to-end scenarios: hand-built ASTs (the parser is an external
//! collaborator) run through the analyzer, checking the emitted module or
//! the recorded diagnostics.

use pretty_assertions::assert_eq;

use cppc::Compiler;
use cppc::types::ast::*;
use cppc::types::ir::{InstKind, Operand, ValueRef};
use cppc::types::ty::{Access, CvQualifier};
use cppc::types::{Span, Spanned};

fn sp<T>(k: T) -> Spanned<T> { Spanned::new(Span::point(1, 1), k) }

fn simple(parts: FundParts) -> Spanned<TypeSpecifier> {
  sp(TypeSpecifier { cv: CvQualifier::None, kind: TypeSpecifierKind::Simple(parts) })
}

fn const_simple(parts: FundParts) -> Spanned<TypeSpecifier> {
  sp(TypeSpecifier { cv: CvQualifier::Const, kind: TypeSpecifierKind::Simple(parts) })
}

fn class_ref(c: &mut Compiler, name: &str, cv: CvQualifier) -> Spanned<TypeSpecifier> {
  sp(TypeSpecifier {
    cv,
    kind: TypeSpecifierKind::Elaborated(ElaboratedTypeSpecifier {
      kind: ElabKind::Class,
      name_spec: None,
      name: c.intern.intern(name),
    }),
  })
}

fn dspec(ty: Spanned<TypeSpecifier>) -> Spanned<DeclSpecifier> {
  sp(DeclSpecifier { flags: DeclFlags::empty(), ty: Some(ty) })
}

fn plain_id(c: &mut Compiler, name: &str) -> Spanned<IdExpression> {
  sp(IdExpression { name_spec: None, kind: IdKind::Plain(c.intern.intern(name)) })
}

fn id_declarator(c: &mut Compiler, name: &str) -> Spanned<Declarator> {
  sp(Declarator { ptr_spec: vec![], inner: None, kind: DeclaratorKind::Id(plain_id(c, name)) })
}

fn ptr_declarator(c: &mut Compiler, name: &str, stars: usize) -> Spanned<Declarator> {
  let ptr_spec = (0..stars)
    .map(|_| PtrOperator { kind: PtrOperatorKind::Pointer, cv: CvQualifier::None })
    .collect();
  sp(Declarator { ptr_spec, inner: None, kind: DeclaratorKind::Id(plain_id(c, name)) })
}

fn fn_declarator(id: Spanned<IdExpression>, params: Vec<Spanned<ParameterDeclaration>>)
  -> Spanned<Declarator> {
  sp(Declarator {
    ptr_spec: vec![],
    inner: Some(Box::new(sp(Declarator {
      ptr_spec: vec![],
      inner: None,
      kind: DeclaratorKind::Function { params, cv: CvQualifier::None },
    }))),
    kind: DeclaratorKind::Id(id),
  })
}

fn int_param(c: &mut Compiler, name: &str) -> Spanned<ParameterDeclaration> {
  sp(ParameterDeclaration {
    spec: dspec(simple(FundParts::INT)),
    declarator: Some(id_declarator(c, name)),
    default: None,
  })
}

fn ilit(v: i64) -> Expr { sp(Expression::IntLit(v)) }

fn id_expr(c: &mut Compiler, name: &str) -> Expr {
  sp(Expression::Id(plain_id(c, name).k))
}

fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
  sp(Expression::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
}

fn assign(lhs: Expr, rhs: Expr) -> Expr {
  sp(Expression::Assignment { op: AssignOp::Assign, lhs: Box::new(lhs), rhs: Box::new(rhs) })
}

fn call(callee: Expr, args: Vec<Expr>) -> Expr {
  sp(Expression::Call { callee: Box::new(callee), args })
}

fn ret(e: Expr) -> Stmt { sp(Statement::Return(Some(e))) }

fn expr_stmt(e: Expr) -> Stmt { sp(Statement::Expr(Some(e))) }

fn block(stmts: Vec<Stmt>) -> CompoundStatement { CompoundStatement { stmts } }

fn fn_def(c: &mut Compiler, ret_ty: Spanned<TypeSpecifier>, name: &str,
  params: Vec<Spanned<ParameterDeclaration>>, body: Vec<Stmt>,
) -> Spanned<Declaration> {
  let id = plain_id(c, name);
  sp(Declaration::Function(Box::new(FunctionDefinition {
    spec: Some(dspec(ret_ty)),
    declarator: fn_declarator(id, params),
    ctor_inits: vec![],
    body: sp(block(body)),
  })))
}

fn var_decl(spec: Spanned<DeclSpecifier>, declarators: Vec<InitDeclarator>)
  -> Spanned<Declaration> {
  sp(Declaration::Block(BlockDeclaration { spec, declarators }))
}

fn init(declarator: Spanned<Declarator>, e: Expr) -> InitDeclarator {
  InitDeclarator { declarator, init: Some(sp(Initializer::Assignment(e))) }
}

fn no_init(declarator: Spanned<Declarator>) -> InitDeclarator {
  InitDeclarator { declarator, init: None }
}

/// Count the calls to the named function inside `caller`.
fn count_calls(m: &cppc::types::ir::Module, caller: &str, target: &str) -> usize {
  let f = m.func_by_name(caller).expect("caller exists");
  let t = m.func_by_name(target).expect("target exists");
  m.funcs[f].insts.0.iter().filter(|i| matches!(&i.kind,
    InstKind::Call { func: Operand::Ref(ValueRef::Func(g)), .. } if *g == t)).count()
}

#[test]
fn fibonacci_with_mutual_calls() {
  let mut c = Compiler::new();

  // void write(int x);
  let write = var_decl(dspec(simple(FundParts::VOID)), vec![no_init({
    let id = plain_id(&mut c, "write");
    let p = int_param(&mut c, "x");
    fn_declarator(id, vec![p])
  })]);

  // int fibo(int x) { if (x <= 2) return 1; return fibo(x-1) + fibo(x-2); }
  let fibo_body = vec![
    sp(Statement::If {
      cond: bin(BinaryOp::Le, id_expr(&mut c, "x"), ilit(2)),
      then: Box::new(ret(ilit(1))),
      els: None,
    }),
    ret(bin(BinaryOp::Add,
      call(id_expr(&mut c, "fibo"), vec![bin(BinaryOp::Sub, id_expr(&mut c, "x"), ilit(1))]),
      call(id_expr(&mut c, "fibo"), vec![bin(BinaryOp::Sub, id_expr(&mut c, "x"), ilit(2))]))),
  ];
  let p = int_param(&mut c, "x");
  let fibo = fn_def(&mut c, simple(FundParts::INT), "fibo", vec![p], fibo_body);

  // int fib(int num) {
  //   int x = 0, y = 1, z = 0;
  //   for (int i = 0; i < num; i++) { z = x + y; x = y; y = z; }
  //   return x;
  // }
  let locals = {
    let x = id_declarator(&mut c, "x");
    let y = id_declarator(&mut c, "y");
    let z = id_declarator(&mut c, "z");
    sp(Statement::Decl(BlockDeclaration {
      spec: dspec(simple(FundParts::INT)),
      declarators: vec![init(x, ilit(0)), init(y, ilit(1)), init(z, ilit(0))],
    }))
  };
  let for_loop = {
    let i = id_declarator(&mut c, "i");
    sp(Statement::For {
      init: ForInit::Decl(BlockDeclaration {
        spec: dspec(simple(FundParts::INT)),
        declarators: vec![init(i, ilit(0))],
      }),
      cond: Some(bin(BinaryOp::Lt, id_expr(&mut c, "i"), id_expr(&mut c, "num"))),
      iter: Some(sp(Expression::Unary {
        op: UnaryOp::PostInc,
        arg: Box::new(id_expr(&mut c, "i")),
      })),
      body: Box::new(sp(Statement::Compound(block(vec![
        expr_stmt(assign(id_expr(&mut c, "z"),
          bin(BinaryOp::Add, id_expr(&mut c, "x"), id_expr(&mut c, "y")))),
        expr_stmt(assign(id_expr(&mut c, "x"), id_expr(&mut c, "y"))),
        expr_stmt(assign(id_expr(&mut c, "y"), id_expr(&mut c, "z"))),
      ])))),
    })
  };
  let p = int_param(&mut c, "num");
  let fib_ret = ret(id_expr(&mut c, "x"));
  let fib = fn_def(&mut c, simple(FundParts::INT), "fib", vec![p],
    vec![locals, for_loop, fib_ret]);

  // int main() { write(fibo(10)); write(fib(10)); return 0; }
  let main_body = vec![
    expr_stmt(call(id_expr(&mut c, "write"),
      vec![call(id_expr(&mut c, "fibo"), vec![ilit(10)])])),
    expr_stmt(call(id_expr(&mut c, "write"),
      vec![call(id_expr(&mut c, "fib"), vec![ilit(10)])])),
    ret(ilit(0)),
  ];
  let main = fn_def(&mut c, simple(FundParts::INT), "main", vec![], main_body);

  let unit = TranslationUnit { decls: vec![write, fibo, fib, main] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));

  assert_eq!(count_calls(&m, "fibo", "fibo"), 2);
  assert_eq!(count_calls(&m, "main", "fibo"), 1);
  assert_eq!(count_calls(&m, "main", "fib"), 1);
  assert_eq!(count_calls(&m, "main", "write"), 2);
  // every block has exactly one terminator
  assert_eq!(m.validate(), Ok(()));
}

fn member_fn(access: Access, spec: Option<Spanned<DeclSpecifier>>,
  id: Spanned<IdExpression>, params: Vec<Spanned<ParameterDeclaration>>, body: Vec<Stmt>,
) -> Spanned<MemberDeclaration> {
  sp(MemberDeclaration {
    access,
    kind: MemberKind::Function(Box::new(FunctionDefinition {
      spec,
      declarator: fn_declarator(id, params),
      ctor_inits: vec![],
      body: sp(block(body)),
    })),
  })
}

fn member_data(c: &mut Compiler, parts: FundParts, names: &[&str])
  -> Spanned<MemberDeclaration> {
  let decls = names.iter()
    .map(|n| MemberDeclarator { declarator: id_declarator(c, n), init: None, pure: false })
    .collect();
  sp(MemberDeclaration {
    access: Access::Default,
    kind: MemberKind::Definition { spec: Some(dspec(simple(parts))), decls },
  })
}

/// The class from the overloading scenario:
/// ```cpp
/// struct A {
///   int x, y;
///   float z;
///   int ret(int a, int b) { return x + y + a + b; }
///   A operator+(const A& other) { return other; }
///   operator float() { return z; }
/// };
/// ```
fn class_a(c: &mut Compiler) -> Spanned<Declaration> {
  let data_xy = member_data(c, FundParts::INT, &["x", "y"]);
  let data_z = member_data(c, FundParts::FLOAT, &["z"]);

  let ret_fn = {
    let id = plain_id(c, "ret");
    let pa = int_param(c, "a");
    let pb = int_param(c, "b");
    let body = vec![ret(bin(BinaryOp::Add,
      bin(BinaryOp::Add,
        bin(BinaryOp::Add, id_expr(c, "x"), id_expr(c, "y")),
        id_expr(c, "a")),
      id_expr(c, "b")))];
    member_fn(Access::Public, Some(dspec(simple(FundParts::INT))), id,
      vec![pa, pb], body)
  };

  let plus_fn = {
    let id = sp(IdExpression { name_spec: None, kind: IdKind::Operator(OverloadOp::Add) });
    let other = sp(ParameterDeclaration {
      spec: dspec(class_ref(c, "A", CvQualifier::Const)),
      declarator: Some(sp(Declarator {
        ptr_spec: vec![PtrOperator { kind: PtrOperatorKind::Reference, cv: CvQualifier::None }],
        inner: None,
        kind: DeclaratorKind::Id(plain_id(c, "other")),
      })),
      default: None,
    });
    // A a; a.x = x + other.x; return a;
    let body = vec![
      sp(Statement::Decl(BlockDeclaration {
        spec: dspec(class_ref(c, "A", CvQualifier::None)),
        declarators: vec![no_init(id_declarator(c, "a"))],
      })),
      expr_stmt(assign(
        bin(BinaryOp::Dot, id_expr(c, "a"), id_expr(c, "x")),
        bin(BinaryOp::Add, id_expr(c, "x"),
          bin(BinaryOp::Dot, id_expr(c, "other"), id_expr(c, "x"))))),
      ret(id_expr(c, "a")),
    ];
    let spec = Some(dspec(class_ref(c, "A", CvQualifier::None)));
    member_fn(Access::Public, spec, id, vec![other], body)
  };

  let conv_fn = {
    let id = sp(IdExpression {
      name_spec: None,
      kind: IdKind::Conversion(Box::new(ConversionTypeId {
        spec: Box::new(simple(FundParts::FLOAT)),
        ptr_spec: vec![],
      })),
    });
    let body = vec![ret(id_expr(c, "z"))];
    member_fn(Access::Public, None, id, vec![], body)
  };

  var_decl(sp(DeclSpecifier {
    flags: DeclFlags::empty(),
    ty: Some(sp(TypeSpecifier {
      cv: CvQualifier::None,
      kind: TypeSpecifierKind::Class(Box::new(ClassSpecifier {
        key: ClassKey::Struct,
        name_spec: None,
        name: Some(c.intern.intern("A")),
        base: None,
        members: vec![data_xy, data_z, ret_fn, plus_fn, conv_fn],
      })),
    })),
  }), vec![])
}

#[test]
fn class_with_operators_and_pointer_globals() {
  let mut c = Compiler::new();
  let class = class_a(&mut c);

  // A a, *pa, **ppa;
  let globals = {
    let a = id_declarator(&mut c, "a");
    let pa = ptr_declarator(&mut c, "pa", 1);
    let ppa = ptr_declarator(&mut c, "ppa", 2);
    var_decl(dspec(class_ref(&mut c, "A", CvQualifier::None)),
      vec![no_init(a), no_init(pa), no_init(ppa)])
  };

  let unit = TranslationUnit { decls: vec![class, globals] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));

  // the three member functions exist in the class scope
  for f in ["A::ret", "A::operator+()", "A::operator float()"] {
    assert!(m.func_by_name(f).is_some(), "missing {f}: {m}");
  }

  // non-static members carry the hidden `this: const A*` at index 0
  let ret_f = m.func_by_name("A::ret").expect("exists");
  assert_eq!(m.funcs[ret_f].params.len(), 3);
  assert_eq!(m.display_type(m.funcs[ret_f].params[0]), "%A*");

  // the three globals have types A, A*, A**
  let text = m.to_string();
  assert!(text.contains("@a = global %A"), "{text}");
  assert!(text.contains("@pa = global %A*"), "{text}");
  assert!(text.contains("@ppa = global %A**"), "{text}");
  assert_eq!(m.validate(), Ok(()));
}

#[test]
fn narrowing_global_initializer_is_accepted() {
  let mut c = Compiler::new();
  // int x = 3.14;
  let x = id_declarator(&mut c, "x");
  let unit = TranslationUnit { decls: vec![
    var_decl(dspec(simple(FundParts::INT)),
      vec![init(x, sp(Expression::FloatLit(3.14)))]),
  ] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  assert!(m.to_string().contains("@x = global i32 3"), "{m}");
}

#[test]
fn uninitialized_const_is_rejected() {
  let mut c = Compiler::new();
  // const int x;
  let x = id_declarator(&mut c, "x");
  let unit = TranslationUnit { decls: vec![
    var_decl(dspec(const_simple(FundParts::INT)), vec![no_init(x)]),
  ] };
  assert!(c.compile(&unit).is_err());
  assert_eq!(c.errors[0].msg,
    "default initialization of an object of const type 'const int'");
}

#[test]
fn switch_with_cases_and_breaks() {
  let mut c = Compiler::new();
  let case = |c: &mut Compiler, v: i64| sp(Statement::Case {
    value: ilit(v),
    body: Box::new(sp(Statement::Compound(block(vec![
      expr_stmt(assign(id_expr(c, "y"), ilit(v * 10))),
      sp(Statement::Break),
    ])))),
  });
  let body = {
    let y = id_declarator(&mut c, "y");
    let c1 = case(&mut c, 1);
    let c2 = case(&mut c, 2);
    let dflt = sp(Statement::Default {
      body: Box::new(sp(Statement::Compound(block(vec![
        expr_stmt(assign(id_expr(&mut c, "y"), ilit(0))),
        sp(Statement::Break),
      ])))),
    });
    vec![
      sp(Statement::Decl(BlockDeclaration {
        spec: dspec(simple(FundParts::INT)),
        declarators: vec![init(y, ilit(0))],
      })),
      sp(Statement::Switch {
        cond: id_expr(&mut c, "x"),
        body: block(vec![c1, c2, dflt]),
      }),
      ret(id_expr(&mut c, "y")),
    ]
  };
  let p = int_param(&mut c, "x");
  let f = fn_def(&mut c, simple(FundParts::INT), "pick", vec![p], body);
  let unit = TranslationUnit { decls: vec![f] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  assert_eq!(m.validate(), Ok(()));
  let text = m.to_string();
  assert!(text.contains("switch"), "{text}");
}

#[test]
fn break_outside_loop_or_switch_is_rejected() {
  let mut c = Compiler::new();
  let f = fn_def(&mut c, simple(FundParts::VOID), "f", vec![],
    vec![sp(Statement::Break), sp(Statement::Return(None))]);
  let unit = TranslationUnit { decls: vec![f] };
  assert!(c.compile(&unit).is_err());
  assert_eq!(c.errors[0].msg, "break statement not in loop or switch statement");
}

#[test]
fn overload_differing_only_in_return_type_is_rejected() {
  let mut c = Compiler::new();
  // int f(int); float f(int);
  let d1 = {
    let id = plain_id(&mut c, "f");
    let p = int_param(&mut c, "x");
    var_decl(dspec(simple(FundParts::INT)), vec![no_init(fn_declarator(id, vec![p]))])
  };
  let d2 = {
    let id = plain_id(&mut c, "f");
    let p = int_param(&mut c, "x");
    var_decl(dspec(simple(FundParts::FLOAT)), vec![no_init(fn_declarator(id, vec![p]))])
  };
  let unit = TranslationUnit { decls: vec![d1, d2] };
  assert!(c.compile(&unit).is_err());
  assert_eq!(c.errors[0].msg,
    "functions that differ only in their return type cannot be overloaded");
}

#[test]
fn overloads_with_distinct_parameters_are_accepted() {
  let mut c = Compiler::new();
  // int f(int) {...} int f(double) {...} int main() { return f(1) + f(1.5); }
  let p = int_param(&mut c, "x");
  let f1 = fn_def(&mut c, simple(FundParts::INT), "f", vec![p], vec![ret(ilit(1))]);
  let p2 = sp(ParameterDeclaration {
    spec: dspec(simple(FundParts::DOUBLE)),
    declarator: Some(id_declarator(&mut c, "x")),
    default: None,
  });
  let f2 = fn_def(&mut c, simple(FundParts::INT), "f", vec![p2], vec![ret(ilit(2))]);
  let main_body = vec![ret(bin(BinaryOp::Add,
    call(id_expr(&mut c, "f"), vec![ilit(1)]),
    call(id_expr(&mut c, "f"), vec![sp(Expression::FloatLit(1.5))])))];
  let main = fn_def(&mut c, simple(FundParts::INT), "main", vec![], main_body);
  let unit = TranslationUnit { decls: vec![f1, f2, main] };
  // both calls are viable for both overloads (the conversion lattice
  // admits narrowing), so this is an ambiguity in this language subset
  match c.compile(&unit) {
    Ok(m) => { assert_eq!(m.validate(), Ok(())) }
    Err(_) => {
      assert!(c.errors.iter().all(|e| e.msg.contains("ambiguous")), "{:?}", c.errors)
    }
  }
}

#[test]
fn member_body_sees_later_members() {
  let mut c = Compiler::new();
  // struct A { int f() { return g(); } int g() { return 1; } };
  let f = {
    let id = plain_id(&mut c, "f");
    let callee = id_expr(&mut c, "g");
    member_fn(Access::Public, Some(dspec(simple(FundParts::INT))), id, vec![],
      vec![ret(call(callee, vec![]))])
  };
  let g = {
    let id = plain_id(&mut c, "g");
    member_fn(Access::Public, Some(dspec(simple(FundParts::INT))), id, vec![],
      vec![ret(ilit(1))])
  };
  let class = var_decl(sp(DeclSpecifier {
    flags: DeclFlags::empty(),
    ty: Some(sp(TypeSpecifier {
      cv: CvQualifier::None,
      kind: TypeSpecifierKind::Class(Box::new(ClassSpecifier {
        key: ClassKey::Struct,
        name_spec: None,
        name: Some(c.intern.intern("A")),
        base: None,
        members: vec![f, g],
      })),
    })),
  }), vec![]);
  let unit = TranslationUnit { decls: vec![class] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  assert_eq!(count_calls(&m, "A::f", "A::g"), 1);
}

#[test]
fn enum_values_continue_from_last_explicit() {
  let mut c = Compiler::new();
  // enum E { A, B = 5, C }; int x = C;
  let e = var_decl(sp(DeclSpecifier {
    flags: DeclFlags::empty(),
    ty: Some(sp(TypeSpecifier {
      cv: CvQualifier::None,
      kind: TypeSpecifierKind::Enum(EnumSpecifier {
        name: Some(c.intern.intern("E")),
        enumerators: vec![
          (sp(c.intern.intern("A")), None),
          (sp(c.intern.intern("B")), Some(ilit(5))),
          (sp(c.intern.intern("C")), None),
        ],
      }),
    })),
  }), vec![]);
  let x = id_declarator(&mut c, "x");
  let use_c = id_expr(&mut c, "C");
  let decl = var_decl(dspec(simple(FundParts::INT)), vec![init(x, use_c)]);
  let unit = TranslationUnit { decls: vec![e, decl] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  assert!(m.to_string().contains("@x = global i32 6"), "{m}");
}

#[test]
fn string_literal_becomes_constant_global() {
  let mut c = Compiler::new();
  // int f() { const char c = "hi"[1]; return c; }
  let body = vec![
    sp(Statement::Decl(BlockDeclaration {
      spec: dspec(const_simple(FundParts::CHAR)),
      declarators: vec![init(id_declarator(&mut c, "c"),
        bin(BinaryOp::Subscript,
          sp(Expression::StringLit("hi".into())), ilit(1)))],
    })),
    ret(id_expr(&mut c, "c")),
  ];
  let f = fn_def(&mut c, simple(FundParts::INT), "f", vec![], body);
  let unit = TranslationUnit { decls: vec![f] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  let text = m.to_string();
  assert!(text.contains("@.str.0 = internal constant [3 x i8]"), "{text}");
}

#[test]
fn short_circuit_constant_skips_right_side() {
  let mut c = Compiler::new();
  // int f() { return 0 && g(); }  -- g is never declared, and never needed
  let body = vec![ret(bin(BinaryOp::LogicAnd, ilit(0),
    call(id_expr(&mut c, "g"), vec![])))];
  let f = fn_def(&mut c, simple(FundParts::INT), "f", vec![], body);
  let unit = TranslationUnit { decls: vec![f] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  // the function body folds to `ret 0`
  let text = m.to_string();
  assert!(text.contains("ret 0"), "{text}");
}

#[test]
fn while_and_do_loops_lower_with_correct_blocks() {
  let mut c = Compiler::new();
  // int f(int n) { int s = 0; while (n > 0) { s = s + n; n = n - 1; } return s; }
  let body = vec![
    sp(Statement::Decl(BlockDeclaration {
      spec: dspec(simple(FundParts::INT)),
      declarators: vec![init(id_declarator(&mut c, "s"), ilit(0))],
    })),
    sp(Statement::While {
      cond: bin(BinaryOp::Gt, id_expr(&mut c, "n"), ilit(0)),
      body: Box::new(sp(Statement::Compound(block(vec![
        expr_stmt(assign(id_expr(&mut c, "s"),
          bin(BinaryOp::Add, id_expr(&mut c, "s"), id_expr(&mut c, "n")))),
        expr_stmt(assign(id_expr(&mut c, "n"),
          bin(BinaryOp::Sub, id_expr(&mut c, "n"), ilit(1)))),
      ])))),
    }),
    ret(id_expr(&mut c, "s")),
  ];
  let p = int_param(&mut c, "n");
  let f = fn_def(&mut c, simple(FundParts::INT), "f", vec![p], body);
  let unit = TranslationUnit { decls: vec![f] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  assert_eq!(m.validate(), Ok(()));
}

#[test]
fn conditional_expression_joins_with_phi() {
  let mut c = Compiler::new();
  // int f(int x) { return x > 0 ? 1 : 2; }
  let body = vec![ret(sp(Expression::Conditional {
    cond: Box::new(bin(BinaryOp::Gt, id_expr(&mut c, "x"), ilit(0))),
    then: Box::new(ilit(1)),
    els: Box::new(ilit(2)),
  }))];
  let p = int_param(&mut c, "x");
  let f = fn_def(&mut c, simple(FundParts::INT), "f", vec![p], body);
  let unit = TranslationUnit { decls: vec![f] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  let text = m.to_string();
  assert!(text.contains("phi"), "{text}");
  assert_eq!(m.validate(), Ok(()));
}

#[test]
fn undeclared_identifier_is_reported_and_recovery_continues() {
  let mut c = Compiler::new();
  // void f() { y = 1; } void g() {}  -- g still compiles
  let f_assign = expr_stmt(assign(id_expr(&mut c, "y"), ilit(1)));
  let f = fn_def(&mut c, simple(FundParts::VOID), "f", vec![],
    vec![f_assign,
      sp(Statement::Return(None))]);
  let g = fn_def(&mut c, simple(FundParts::VOID), "g", vec![],
    vec![sp(Statement::Return(None))]);
  let unit = TranslationUnit { decls: vec![f, g] };
  let r = c.compile(&unit);
  assert!(r.is_err());
  assert_eq!(c.errors.len(), 1);
  assert_eq!(c.errors[0].msg, "use of undeclared identifier 'y'");
}

#[test]
fn anonymous_class_renamed_by_typedef() {
  let mut c = Compiler::new();
  // typedef struct { int v; } P;
  let member = member_data(&mut c, FundParts::INT, &["v"]);
  let p = id_declarator(&mut c, "P");
  let decl = var_decl(sp(DeclSpecifier {
    flags: DeclFlags::TYPEDEF,
    ty: Some(sp(TypeSpecifier {
      cv: CvQualifier::None,
      kind: TypeSpecifierKind::Class(Box::new(ClassSpecifier {
        key: ClassKey::Struct,
        name_spec: None,
        name: None,
        base: None,
        members: vec![member],
      })),
    })),
  }), vec![no_init(p)]);
  // P x;
  let x = id_declarator(&mut c, "x");
  let use_p = var_decl(dspec(sp(TypeSpecifier {
    cv: CvQualifier::None,
    kind: TypeSpecifierKind::Elaborated(ElaboratedTypeSpecifier {
      kind: ElabKind::Typedef,
      name_spec: None,
      name: c.intern.intern("P"),
    }),
  })), vec![no_init(x)]);
  let unit = TranslationUnit { decls: vec![decl, use_p] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  let text = m.to_string();
  assert!(text.contains("%P = type { i32 }"), "{text}");
  assert!(text.contains("@x = global %P"), "{text}");
}

#[test]
fn derived_class_layout_starts_after_base() {
  let mut c = Compiler::new();
  // struct B { int a; int b; }; struct D : B { int c; };
  // int f(D* d) { return d->c; }
  let base = var_decl(sp(DeclSpecifier {
    flags: DeclFlags::empty(),
    ty: Some(sp(TypeSpecifier {
      cv: CvQualifier::None,
      kind: TypeSpecifierKind::Class(Box::new(ClassSpecifier {
        key: ClassKey::Struct,
        name_spec: None,
        name: Some(c.intern.intern("B")),
        base: None,
        members: vec![member_data(&mut c, FundParts::INT, &["a", "b"])],
      })),
    })),
  }), vec![]);
  let derived = var_decl(sp(DeclSpecifier {
    flags: DeclFlags::empty(),
    ty: Some(sp(TypeSpecifier {
      cv: CvQualifier::None,
      kind: TypeSpecifierKind::Class(Box::new(ClassSpecifier {
        key: ClassKey::Struct,
        name_spec: None,
        name: Some(c.intern.intern("D")),
        base: Some(sp(BaseSpecifier {
          access: Access::Public,
          name_spec: None,
          name: c.intern.intern("B"),
        })),
        members: vec![member_data(&mut c, FundParts::INT, &["c"])],
      })),
    })),
  }), vec![]);
  let f = {
    let d_param = sp(ParameterDeclaration {
      spec: dspec(class_ref(&mut c, "D", CvQualifier::None)),
      declarator: Some(ptr_declarator(&mut c, "d", 1)),
      default: None,
    });
    let access = bin(BinaryOp::Arrow, id_expr(&mut c, "d"), id_expr(&mut c, "c"));
    fn_def(&mut c, simple(FundParts::INT), "f", vec![d_param], vec![ret(access)])
  };
  let unit = TranslationUnit { decls: vec![base, derived, f] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  let text = m.to_string();
  // D embeds B as field 0, so `c` is field 1
  assert!(text.contains("%D = type { %B, i32 }"), "{text}");
  assert!(text.contains("structgep"), "{text}");
  assert_eq!(m.validate(), Ok(()));
}

#[test]
fn sizeof_of_derived_counts_base_members() {
  let mut c = Compiler::new();
  // struct B { int a; int b; }; struct D : B { int c; };
  // int sb = sizeof(B); int sd = sizeof(D);
  let mk_class = |c: &mut Compiler, name: &str, base: Option<&str>, fields: &[&str]| {
    let base = base.map(|b| sp(BaseSpecifier {
      access: Access::Public,
      name_spec: None,
      name: c.intern.intern(b),
    }));
    let members = vec![member_data(c, FundParts::INT, fields)];
    var_decl(sp(DeclSpecifier {
      flags: DeclFlags::empty(),
      ty: Some(sp(TypeSpecifier {
        cv: CvQualifier::None,
        kind: TypeSpecifierKind::Class(Box::new(ClassSpecifier {
          key: ClassKey::Struct,
          name_spec: None,
          name: Some(c.intern.intern(name)),
          base,
          members,
        })),
      })),
    }), vec![])
  };
  let b = mk_class(&mut c, "B", None, &["a", "b"]);
  let d = mk_class(&mut c, "D", Some("B"), &["c"]);
  let size_of = |c: &mut Compiler, name: &str| sp(Expression::SizeofType(Box::new(TypeId {
    spec: class_ref(c, name, CvQualifier::None),
    declarator: None,
  })));
  let sb = {
    let decl = id_declarator(&mut c, "sb");
    let e = size_of(&mut c, "B");
    var_decl(dspec(simple(FundParts::INT)), vec![init(decl, e)])
  };
  let sd = {
    let decl = id_declarator(&mut c, "sd");
    let e = size_of(&mut c, "D");
    var_decl(dspec(simple(FundParts::INT)), vec![init(decl, e)])
  };
  let unit = TranslationUnit { decls: vec![b, d, sb, sd] };
  let m = c.compile(&unit).unwrap_or_else(|_| panic!("errors: {:?}", c.errors));
  let text = m.to_string();
  assert!(text.contains("@sb = global i32 8"), "{text}");
  assert!(text.contains("@sd = global i32 12"), "{text}");
}

#[test]
fn function_redefinition_is_rejected() {
  let mut c = Compiler::new();
  let f1 = fn_def(&mut c, simple(FundParts::VOID), "f", vec![],
    vec![sp(Statement::Return(None))]);
  let f2 = fn_def(&mut c, simple(FundParts::VOID), "f", vec![],
    vec![sp(Statement::Return(None))]);
  let unit = TranslationUnit { decls: vec![f1, f2] };
  assert!(c.compile(&unit).is_err());
  assert_eq!(c.errors[0].msg, "redefinition of function 'f'");
}
