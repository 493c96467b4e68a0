//! Expression analysis and emission.
//!
//! Each expression leaves its result in the walk context: the type (with a
//! trailing reference descriptor marking lvalue-ness), the value (constant
//! or register), and the resolved symbol set when the expression names one.

use crate::constant::Constant;
use crate::scope::{SymAttr, SymbolSet};
use crate::types::Span;
use crate::types::ast::{self, AssignOp, BinaryOp, Expression, IdExpression, IdKind, UnaryOp};
use crate::types::ir::{Binop, ConstValue, FloatCC, InstKind, IntCC, Operand, ValueRef};
use crate::types::ty::{CvQualifier, FundType, PtrDescriptor, Type};
use crate::Sem;

use super::{err, Build, Cx, ExprVal};

/// The instruction family implementing an arithmetic/comparison operator
/// at a given fundamental type.
enum ArithInst {
  Bin(Binop),
  ICmp(IntCC),
  FCmp(FloatCC),
}

/// Choose the opcode for `op` at type `ft`, distinguishing signed,
/// unsigned and floating variants. `None` for float-invalid operators.
fn arith_inst(op: BinaryOp, ft: FundType) -> Option<ArithInst> {
  use ArithInst::*;
  let signed = ft.is_signed();
  if ft.is_floating() {
    return Some(match op {
      BinaryOp::Mul => Bin(Binop::FMul),
      BinaryOp::Div => Bin(Binop::FDiv),
      BinaryOp::Add => Bin(Binop::FAdd),
      BinaryOp::Sub => Bin(Binop::FSub),
      BinaryOp::Gt => FCmp(FloatCC::Ugt),
      BinaryOp::Lt => FCmp(FloatCC::Ult),
      BinaryOp::Le => FCmp(FloatCC::Ule),
      BinaryOp::Ge => FCmp(FloatCC::Uge),
      BinaryOp::Eq => FCmp(FloatCC::Ueq),
      BinaryOp::Ne => FCmp(FloatCC::Une),
      _ => return None,
    })
  }
  Some(match op {
    BinaryOp::Mul => Bin(Binop::Mul),
    BinaryOp::Div => Bin(if signed { Binop::SDiv } else { Binop::UDiv }),
    BinaryOp::Mod => Bin(if signed { Binop::SRem } else { Binop::URem }),
    BinaryOp::Add => Bin(Binop::Add),
    BinaryOp::Sub => Bin(Binop::Sub),
    BinaryOp::Shl => Bin(Binop::Shl),
    BinaryOp::Shr => Bin(if signed { Binop::AShr } else { Binop::LShr }),
    BinaryOp::And => Bin(Binop::And),
    BinaryOp::Xor => Bin(Binop::Xor),
    BinaryOp::Or => Bin(Binop::Or),
    BinaryOp::Gt => ICmp(if signed { IntCC::Sgt } else { IntCC::Ugt }),
    BinaryOp::Lt => ICmp(if signed { IntCC::Slt } else { IntCC::Ult }),
    BinaryOp::Le => ICmp(if signed { IntCC::Sle } else { IntCC::Ule }),
    BinaryOp::Ge => ICmp(if signed { IntCC::Sge } else { IntCC::Uge }),
    BinaryOp::Eq => ICmp(IntCC::Eq),
    BinaryOp::Ne => ICmp(IntCC::Ne),
    _ => return None,
  })
}

fn is_comparison(op: BinaryOp) -> bool {
  matches!(op, BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Ge
    | BinaryOp::Eq | BinaryOp::Ne)
}

fn is_integral_only(op: BinaryOp) -> bool {
  matches!(op, BinaryOp::Mod | BinaryOp::Shl | BinaryOp::Shr
    | BinaryOp::And | BinaryOp::Xor | BinaryOp::Or)
}

impl Build<'_> {
  /// Analyze one expression, leaving its result in `cx`.
  pub(crate) fn expr(&mut self, cx: &mut Cx, e: &ast::Expr) -> Sem<()> {
    let span = e.span;
    match &e.k {
      Expression::IntLit(v) => {
        cx.ty = FundType::Int.into();
        cx.expr = ExprVal::Const(Constant::Int(*v));
        cx.symbols = SymbolSet::default();
      }
      Expression::FloatLit(v) => {
        cx.ty = FundType::Double.into();
        cx.expr = ExprVal::Const(Constant::Float(*v));
        cx.symbols = SymbolSet::default();
      }
      Expression::CharLit(v) => {
        cx.ty = FundType::Char.into();
        cx.expr = ExprVal::Const(Constant::Char(*v));
        cx.symbols = SymbolSet::default();
      }
      Expression::BoolLit(v) => {
        cx.ty = FundType::Bool.into();
        cx.expr = ExprVal::Const(Constant::Bool(*v));
        cx.symbols = SymbolSet::default();
      }
      Expression::StringLit(s) => {
        let mut ty = Type::fund(FundType::Char, CvQualifier::Const);
        let n = u32::try_from(s.len()).expect("overflow") + 1;
        ty.arrays.push(crate::types::ty::ArrayDescriptor { size: n, ptrs: Default::default() });
        let g = self.string_global(s);
        cx.ty = ty;
        cx.expr = ExprVal::Reg(ValueRef::Global(g).into());
        cx.symbols = SymbolSet::default();
      }
      Expression::Id(id) => self.id_expression(cx, id, span)?,
      Expression::This =>
        return Err(err(span, "materializing 'this' as a value is not supported")),
      Expression::Unary { op, arg } => self.unary_expr(cx, *op, arg, span)?,
      Expression::Binary { op, lhs, rhs } => self.binary_expr(cx, *op, lhs, rhs, span)?,
      Expression::Assignment { op, lhs, rhs } => self.assignment(cx, *op, lhs, rhs, span)?,
      Expression::Conditional { cond, then, els } =>
        self.conditional(cx, cond, then, els, span)?,
      Expression::Cast { ty, arg } => self.cast_expr(cx, ty, arg, span)?,
      Expression::SizeofType(ty) => {
        let t = self.type_id(cx, ty)?;
        if !t.is_complete() {
          return Err(err(span,
            format!("apply sizeof to incomplete type '{}'", t.display())))
        }
        cx.expr = ExprVal::Const(Constant::Int(t.size(&self.comp.scopes).into()));
        cx.ty = FundType::Int.into();
        cx.symbols = SymbolSet::default();
      }
      Expression::Call { callee, args } => self.call_expr(cx, callee, args, span)?,
      Expression::Construct { ty, args } => self.construct_expr(cx, ty, args, span)?,
      Expression::New { .. } =>
        return Err(err(span, "'new' expressions are not supported")),
      Expression::Delete { .. } =>
        return Err(err(span, "'delete' expressions are not supported")),
    }
    Ok(())
  }

  /// Check convertibility to `bool` and materialize the condition value.
  pub(crate) fn bool_operand(&mut self, cx: &mut Cx, span: Span) -> Sem<Operand> {
    let bool_t = FundType::Bool.into();
    if !cx.ty.is_convertible_to(&bool_t, cx.expr.constant()) {
      return Err(err(span, format!("{} is not convertible to bool", cx.ty.display())))
    }
    self.create_value(&cx.ty.clone(), &bool_t, &cx.expr.clone(), span)
  }

  /// Resolve an id expression. In declaration states this records the new
  /// symbol (or typedef); in `NoDecl` it resolves and materializes the
  /// named value.
  pub(crate) fn id_expression(&mut self, cx: &mut Cx, id: &IdExpression, span: Span) -> Sem<()> {
    let (scope, qualified) = self.lookup_scope(cx, id.name_spec.as_ref())?;
    let composed = self.composed_id(cx, id, span)?;

    if cx.decl.is_typedef {
      let was_anonymous = cx.ty.as_class()
        .is_some_and(|d| d.name.borrow().starts_with('<'));
      if !self.comp.scopes.add_typedef(scope, composed, cx.ty.clone()) {
        return Err(err(span, format!("redeclaration of type alias '{}'",
          self.comp.intern.name(composed))))
      }
      // a typedef of an anonymous class names the class and its backend
      // struct type
      if was_anonymous {
        let desc = cx.ty.as_class().expect("checked").clone();
        let name = self.comp.intern.name(composed).to_owned();
        *desc.name.borrow_mut() = name.clone();
        let ty = self.class_type(&desc);
        self.module.rename_struct(ty, name);
      }
      cx.symbols = SymbolSet::default();
      return Ok(())
    }

    if cx.decl.state != super::DeclState::NoDecl {
      if qualified {
        // out-of-class definition of a previously declared member
        let set = self.comp.scopes.query_symbol(scope, composed, true);
        let Some(first) = set.first() else {
          return Err(err(span, format!("no member named '{}' in '{}'",
            self.comp.intern.name(composed),
            self.comp.scopes.scope_name(scope, &self.comp.intern))))
        };
        cx.ty = self.comp.scopes.symbol(first).ty.clone();
        cx.symbols = set;
      } else {
        cx.new_symbol = Some(crate::scope::Symbol::new(
          composed, cx.ty.clone(), cx.decl.access));
        cx.symbols = SymbolSet::default();
      }
      return Ok(())
    }

    // expression position: resolve the name
    let set = self.comp.scopes.query_symbol(scope, composed, qualified);
    let Some(first) = set.first() else {
      return Err(if qualified {
        err(span, format!("no member named '{}' in '{}'",
          self.comp.intern.name(composed),
          self.comp.scopes.scope_name(scope, &self.comp.intern)))
      } else {
        err(span, format!("use of undeclared identifier '{}'",
          self.comp.intern.name(composed)))
      })
    };
    let sym = self.comp.scopes.symbol(first).clone();
    cx.ty = sym.ty.clone();
    cx.symbols = set.clone();

    if sym.attr.contains(SymAttr::CONSTANT) {
      cx.expr = ExprVal::Const(Constant::Int(sym.constant));
      return Ok(())
    }

    // a non-static member referenced inside a non-static member function
    // is addressed through the hidden `this` parameter
    let found_class = self.comp.scopes.enclosing_class(set.scope);
    let cur_func = self.comp.scopes.enclosing_function(cx.scope);
    if_chain::if_chain! {
      if let (Some(class), Some(func)) = (found_class, cur_func);
      if !sym.attr.contains(SymAttr::STATIC);
      if func.is_non_static_member(&self.comp.scopes);
      if class.members.get() == Some(set.scope);
      then {
        let this = func.params.borrow().first()
          .and_then(|p| self.comp.scopes.symbol(p.sym).value)
          .expect("member function has a hidden this parameter");
        let member_ptr = {
          let mut t = sym.ty.clone();
          t = t.add_ptr(PtrDescriptor::REF);
          self.make_type(&t)
        };
        let v = self.emit(member_ptr,
          InstKind::StructGep { ptr: this.into(), field: sym.index });
        cx.expr = ExprVal::Reg(v);
      } else {
        match sym.value {
          Some(v) => cx.expr = ExprVal::Reg(v.into()),
          None => return Err(err(span, format!(
            "'{}' cannot be referenced in this context",
            self.comp.intern.name(sym.id)))),
        }
      }
    }

    // an id expression is an lvalue, except for functions and constants
    if cx.ty.is_ref() {
      let inner = cx.ty.clone().remove_ref();
      if inner.as_function().is_some() || inner.is_array() {
        cx.ty = inner
      } else if let ExprVal::Reg(v) = cx.expr.clone() {
        // a reference variable's slot holds the referent address
        let v = self.load(&cx.ty.clone(), v);
        cx.expr = ExprVal::Reg(v);
      }
    } else if cx.ty.as_function().is_none() {
      cx.ty = cx.ty.clone().add_ptr(PtrDescriptor::REF)
    }
    Ok(())
  }

  /// Build the composed identifier of an id expression: `x`, `~T()`,
  /// `T()`, `operator+()`, `operator int()`. A conversion-function id also
  /// establishes the conversion target as the current type.
  pub(crate) fn composed_id(&mut self, cx: &mut Cx, id: &IdExpression, span: Span)
    -> Sem<crate::symbol::Ident> {
    Ok(match &id.kind {
      IdKind::Plain(name) => *name,
      IdKind::Destructor(name) => {
        let s = format!("~{}()", self.comp.intern.name(*name));
        self.comp.intern.intern(&s)
      }
      IdKind::Constructor(name) => {
        let s = format!("{}()", self.comp.intern.name(*name));
        self.comp.intern.intern(&s)
      }
      IdKind::Operator(op) => {
        let s = format!("operator{}()", op.spelling());
        self.comp.intern.intern(&s)
      }
      IdKind::Conversion(conv) => {
        let ty = self.conversion_target(cx, conv, span)?;
        let s = format!("operator {}()", ty.display());
        self.comp.intern.intern(&s)
      }
    })
  }

  /// Resolve the target type of a conversion-function id without
  /// disturbing the current context.
  pub(crate) fn conversion_target(&mut self, cx: &Cx, conv: &ast::ConversionTypeId,
    span: Span) -> Sem<Type> {
    let mut tcx = cx.clone();
    let mut ty = self.type_specifier(&mut tcx, &conv.spec)?;
    if !conv.ptr_spec.is_empty() {
      ty.ptrs = self.ptr_specifier(&mut tcx, &conv.ptr_spec, span)?;
    }
    Ok(ty)
  }

  fn unary_expr(&mut self, cx: &mut Cx, op: UnaryOp, arg: &ast::Expr, span: Span) -> Sem<()> {
    self.expr(cx, arg)?;
    let expr_ty = cx.ty.clone();

    match op {
      UnaryOp::Deref => {
        let decayed = expr_ty.clone().decay();
        if !decayed.is_ptr() {
          return Err(err(span, format!(
            "indirection type '{}' is not pointer operand", decayed.display())))
        }
        let v = self.create_value(&expr_ty, &decayed, &cx.expr.clone(), span)?;
        cx.expr = ExprVal::Reg(v);
        cx.ty = decayed.remove_ptr().add_ptr(PtrDescriptor::REF);
        cx.symbols = SymbolSet::default();
      }

      UnaryOp::AddrOf => {
        if expr_ty.as_function().is_some() || expr_ty.is_array() {
          cx.ty = expr_ty.add_ptr(PtrDescriptor::PTR);
          return Ok(())
        }
        if !expr_ty.is_ref() {
          return Err(err(span, format!(
            "cannot take the address of an rvalue of type '{}'", expr_ty.display())))
        }
        let inner = expr_ty.remove_ref();
        // the address of a non-static class member is a member pointer,
        // whose value this compiler cannot materialize
        if self.comp.scopes.scope_class(cx.symbols.scope).is_some() {
          return Err(err(span, "taking the value of a member pointer is not supported"))
        }
        cx.ty = inner.add_ptr(PtrDescriptor::PTR);
        // the lvalue address is already the pointer value
      }

      UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
        let post = matches!(op, UnaryOp::PostInc | UnaryOp::PostDec);
        let inc = matches!(op, UnaryOp::PreInc | UnaryOp::PostInc);
        if !expr_ty.is_ref() {
          return Err(err(span, "expression is not assignable"))
        }
        let value_ty = expr_ty.clone().remove_ref();
        if value_ty.is_const_init() {
          let name = cx.symbols.first()
            .map_or_else(String::new, |r| self.comp.intern.name(self.comp.scopes.symbol(r).id).to_owned());
          return Err(err(span, format!(
            "cannot assign to variable '{name}' with const-qualified type '{}'",
            value_ty.display())))
        }
        let lvalue = match &cx.expr {
          ExprVal::Reg(v) => v.clone(),
          _ => return Err(err(span, "expression is not assignable")),
        };
        let old = self.convert_type(&expr_ty, &value_ty, lvalue.clone());
        let new = if let Some(ft) = value_ty.as_fund() {
          let one = self.const_value(&value_ty, Constant::Int(1), span)?;
          let ty = self.fund_type(ft);
          let binop = if ft.is_floating() {
            if inc { Binop::FAdd } else { Binop::FSub }
          } else if inc { Binop::Add } else { Binop::Sub };
          self.emit(ty, InstKind::Binop { op: binop, lhs: old.clone(), rhs: one.into() })
        } else if value_ty.is_ptr() {
          let step = ConstValue::Int { bits: 32, value: if inc { 1 } else { -1 } };
          let ty = self.make_type(&value_ty);
          self.emit(ty, InstKind::Gep { ptr: old.clone(), indices: vec![step.into()] })
        } else if value_ty.as_enum().is_some() {
          return Err(err(span, format!("cannot {} expression of enum '{}'",
            if inc { "increment" } else { "decrement" }, value_ty.display())))
        } else {
          return Err(err(span, format!("cannot {} value of type '{}'",
            if inc { "increment" } else { "decrement" }, value_ty.display())))
        };
        self.store(&value_ty, new, lvalue);
        if post {
          cx.expr = ExprVal::Reg(old);
          cx.ty = value_ty;
          cx.symbols = SymbolSet::default();
        }
        // pre-increment yields the lvalue itself, unchanged in cx
      }

      UnaryOp::Sizeof => {
        let t = expr_ty.remove_ref();
        if !t.is_complete() {
          return Err(err(span,
            format!("apply sizeof to incomplete type '{}'", t.display())))
        }
        cx.expr = ExprVal::Const(Constant::Int(t.size(&self.comp.scopes).into()));
        cx.ty = FundType::Int.into();
        cx.symbols = SymbolSet::default();
      }

      UnaryOp::LogicNot => {
        let bool_t: Type = FundType::Bool.into();
        if !expr_ty.is_convertible_to(&bool_t, cx.expr.constant()) {
          return Err(err(span, format!(
            "invalid argument type '{}' to unary expression", expr_ty.display())))
        }
        match cx.expr.clone() {
          ExprVal::Const(c) => {
            cx.expr = ExprVal::Const(c.unary(FundType::Bool, UnaryOp::LogicNot))
          }
          e => {
            let v = self.create_value(&expr_ty, &bool_t, &e, span)?;
            let i1 = self.ty_bool();
            let v = self.emit(i1, InstKind::Unop { op: crate::types::ir::Unop::Not, arg: v });
            cx.expr = ExprVal::Reg(v);
          }
        }
        cx.ty = bool_t;
        cx.symbols = SymbolSet::default();
      }

      UnaryOp::Not | UnaryOp::Neg | UnaryOp::Plus => {
        let decayed = expr_ty.clone().decay();
        if op == UnaryOp::Not
          && decayed.as_fund().is_some_and(FundType::is_floating) {
          return Err(err(span, format!(
            "invalid argument type '{}' to unary expression", decayed.display())))
        }
        let arith = decayed.arithmetic_convert(&FundType::Int.into());
        if !expr_ty.is_convertible_to(&arith, cx.expr.constant()) {
          return Err(err(span, format!(
            "invalid argument type '{}' to unary expression", expr_ty.display())))
        }
        let ft = arith.as_fund().expect("arithmetic type");
        match cx.expr.clone() {
          ExprVal::Const(c) => cx.expr = ExprVal::Const(c.convert(ft).unary(ft, op)),
          e => {
            let v = self.create_value(&expr_ty, &arith, &e, span)?;
            let ty = self.fund_type(ft);
            let v = match op {
              UnaryOp::Not =>
                self.emit(ty, InstKind::Unop { op: crate::types::ir::Unop::Not, arg: v }),
              UnaryOp::Neg => {
                let unop = if ft.is_floating() { crate::types::ir::Unop::FNeg }
                  else { crate::types::ir::Unop::Neg };
                self.emit(ty, InstKind::Unop { op: unop, arg: v })
              }
              _ => v,
            };
            cx.expr = ExprVal::Reg(v);
          }
        }
        cx.ty = arith;
        cx.symbols = SymbolSet::default();
      }
    }
    Ok(())
  }

  fn binary_expr(&mut self, cx: &mut Cx, op: BinaryOp, lhs: &ast::Expr, rhs: &ast::Expr,
    span: Span) -> Sem<()> {
    // member access does not evaluate the right side as an expression
    if matches!(op, BinaryOp::Dot | BinaryOp::Arrow) {
      return self.member_expr(cx, op, lhs, rhs, span)
    }
    if matches!(op, BinaryOp::DotStar | BinaryOp::ArrowStar) {
      return Err(err(span, "member pointer dereference is not supported"))
    }

    self.expr(cx, lhs)?;
    let mut left_ty = cx.ty.clone();
    let mut rcx = cx.clone();
    rcx.this_arg = None;
    let mut left_bb = None;
    let mut end_bb = None;

    match op {
      BinaryOp::Subscript => {
        left_ty = left_ty.remove_ref();
        if !left_ty.is_ptr() && !left_ty.is_array() {
          return Err(err(span, "subscripted value is not array or pointer"))
        }
        let v = self.create_value(&cx.ty.clone(), &left_ty, &cx.expr.clone(), span)?;
        cx.expr = ExprVal::Reg(v);
      }

      BinaryOp::LogicAnd | BinaryOp::LogicOr => {
        let bool_t: Type = FundType::Bool.into();
        if !left_ty.is_convertible_to(&bool_t, cx.expr.constant()) {
          return Err(err(span, format!(
            "invalid operand type '{}' to binary expression", left_ty.display())))
        }
        // a constant left operand that decides the result skips the right
        // side entirely
        if let Some(c) = cx.expr.constant() {
          let decides = if op == BinaryOp::LogicAnd { !c.as_bool() } else { c.as_bool() };
          if decides {
            cx.ty = bool_t;
            cx.expr = ExprVal::Const(Constant::Bool(c.as_bool()));
            cx.symbols = SymbolSet::default();
            return Ok(())
          }
        }
        let v = self.create_value(&left_ty, &bool_t, &cx.expr.clone(), span)?;
        cx.expr = ExprVal::Reg(v.clone());
        left_bb = Some(self.cur_block());
        let rhs_block = self.new_block();
        let end = self.new_block();
        if op == BinaryOp::LogicAnd {
          self.cond_br(v, rhs_block, end);
        } else {
          self.cond_br(v, end, rhs_block);
        }
        self.set_insert(rhs_block);
        end_bb = Some(end);
        cx.ty = bool_t;
      }

      _ => {
        if left_ty.clone().remove_ref().as_class().is_some() {
          return Err(err(span, "overloaded operators are not supported"))
        }
        left_ty = left_ty.decay();
        if let ExprVal::Reg(v) = cx.expr.clone() {
          let v = self.convert_type(&cx.ty.clone(), &left_ty, v);
          cx.expr = ExprVal::Reg(v);
        }
      }
    }

    self.expr(&mut rcx, rhs)?;

    match op {
      BinaryOp::Subscript => {
        let int_t: Type = FundType::Int.into();
        let r_decayed = rcx.ty.clone().decay();
        if !rcx.ty.is_convertible_to(&int_t, rcx.expr.constant())
          || r_decayed.as_fund().is_some_and(FundType::is_floating) {
          return Err(err(span, "array subscript is not an integer"))
        }
        let idx = self.create_value(&rcx.ty, &int_t, &rcx.expr, span)?;
        let base = match &cx.expr {
          ExprVal::Reg(v) => v.clone(),
          _ => return Err(err(span, "subscripted value is not array or pointer")),
        };
        let elem = left_ty.clone().element_type().add_ptr(PtrDescriptor::REF);
        let ty = self.make_type(&elem);
        let v = if left_ty.is_array() {
          let zero: Operand = ConstValue::Int { bits: 32, value: 0 }.into();
          self.emit(ty, InstKind::Gep { ptr: base, indices: vec![zero, idx] })
        } else {
          self.emit(ty, InstKind::Gep { ptr: base, indices: vec![idx] })
        };
        cx.ty = elem;
        cx.expr = ExprVal::Reg(v);
        cx.symbols = SymbolSet::default();
      }

      BinaryOp::Comma => {
        if cx.expr.is_const() && rcx.expr.is_const() {
          cx.expr = rcx.expr;
        } else {
          let v = self.create_value(&rcx.ty.clone(), &rcx.ty.clone(), &rcx.expr, span)?;
          cx.expr = ExprVal::Reg(v);
        }
        cx.ty = rcx.ty;
        cx.symbols = rcx.symbols;
      }

      BinaryOp::LogicAnd | BinaryOp::LogicOr => {
        let bool_t: Type = FundType::Bool.into();
        if !rcx.ty.is_convertible_to(&bool_t, rcx.expr.constant()) {
          return Err(err(span, format!(
            "invalid operand type '{}' to binary expression", rcx.ty.display())))
        }
        match (cx.expr.constant().copied(), rcx.expr.constant().copied()) {
          (Some(a), Some(b)) => {
            let folded = if op == BinaryOp::LogicAnd { a.as_bool() && b.as_bool() }
              else { a.as_bool() || b.as_bool() };
            cx.expr = ExprVal::Const(Constant::Bool(folded));
          }
          _ => {
            let rv = self.create_value(&rcx.ty, &bool_t, &rcx.expr, span)?;
            let rhs_end = self.cur_block();
            let end = end_bb.expect("short-circuit blocks exist");
            self.br(end);
            self.set_insert(end);
            let lv = match &cx.expr {
              ExprVal::Reg(v) => v.clone(),
              ExprVal::Const(c) => {
                let c = self.const_value(&bool_t, *c, span)?;
                c.into()
              }
              ExprVal::None => return Err(err(span, "expected a value")),
            };
            let i1 = self.ty_bool();
            let v = self.emit(i1, InstKind::Phi { incoming: vec![
              (lv, left_bb.expect("left block recorded")),
              (rv, rhs_end),
            ] });
            cx.expr = ExprVal::Reg(v);
          }
        }
        cx.ty = bool_t;
        cx.symbols = SymbolSet::default();
      }

      _ => {
        let right_ty = rcx.ty.clone().decay();
        if is_integral_only(op) {
          for t in [&left_ty, &right_ty] {
            if t.as_fund().is_some_and(FundType::is_floating) {
              return Err(err(span, format!(
                "invalid argument type '{}' to binary expression", t.display())))
            }
          }
        }
        if let ExprVal::Reg(v) = rcx.expr.clone() {
          let v = self.convert_type(&rcx.ty.clone(), &right_ty, v);
          rcx.expr = ExprVal::Reg(v);
        }
        let common = left_ty.arithmetic_convert(&right_ty);
        if !left_ty.is_convertible_to(&common, cx.expr.constant())
          || !right_ty.is_convertible_to(&common, rcx.expr.constant()) {
          return Err(err(span, format!(
            "invalid operand types '{}' and '{}' to binary expression",
            left_ty.display(), right_ty.display())))
        }
        let ft = common.as_fund().expect("arithmetic type");
        match (cx.expr.constant().copied(), rcx.expr.constant().copied()) {
          (Some(a), Some(b)) => {
            let folded = a.convert(ft).binary(ft, op, b.convert(ft));
            cx.expr = ExprVal::Const(folded);
          }
          _ => {
            let lv = self.create_value(&left_ty, &common, &cx.expr.clone(), span)?;
            let rv = self.create_value(&right_ty, &common, &rcx.expr, span)?;
            let inst = arith_inst(op, ft).ok_or_else(|| err(span, format!(
              "invalid operand types '{}' and '{}' to binary expression",
              left_ty.display(), right_ty.display())))?;
            let v = match inst {
              ArithInst::Bin(b) => {
                let ty = self.fund_type(ft);
                self.emit(ty, InstKind::Binop { op: b, lhs: lv, rhs: rv })
              }
              ArithInst::ICmp(cc) => {
                let i1 = self.ty_bool();
                self.emit(i1, InstKind::Icmp { cc, lhs: lv, rhs: rv })
              }
              ArithInst::FCmp(cc) => {
                let i1 = self.ty_bool();
                self.emit(i1, InstKind::Fcmp { cc, lhs: lv, rhs: rv })
              }
            };
            cx.expr = ExprVal::Reg(v);
          }
        }
        cx.ty = if is_comparison(op) { FundType::Bool.into() } else { common };
        cx.symbols = SymbolSet::default();
      }
    }
    Ok(())
  }

  /// Member access, `a.m` and `p->m`. The right side must be a member
  /// name, resolved in the class's member scope rather than evaluated.
  fn member_expr(&mut self, cx: &mut Cx, op: BinaryOp, lhs: &ast::Expr, rhs: &ast::Expr,
    span: Span) -> Sem<()> {
    self.expr(cx, lhs)?;
    let left_ty = cx.ty.clone();

    let class;
    let object_addr;
    let object_is_lvalue;
    if op == BinaryOp::Dot {
      if left_ty.is_ptr() && left_ty.clone().remove_ptr().as_class().is_some() {
        return Err(err(span, format!(
          "member reference type '{}' is a pointer; note: use '->' instead",
          left_ty.display())))
      }
      let object = left_ty.clone().remove_ref();
      let Some(desc) = object.as_class() else {
        return Err(err(span, format!(
          "member reference base type '{}' is not a class or struct", left_ty.display())))
      };
      class = desc.clone();
      object_is_lvalue = left_ty.is_ref();
      object_addr = if object_is_lvalue {
        match &cx.expr {
          ExprVal::Reg(v) => v.clone(),
          _ => return Err(err(span, "expected a class object")),
        }
      } else {
        // an rvalue object is spilled to a temporary for member addressing
        let slot = self.alloca(&object);
        if let ExprVal::Reg(v) = &cx.expr {
          self.store(&object, v.clone(), slot.clone());
        }
        slot
      };
    } else {
      let ptr = left_ty.clone().decay();
      if !ptr.is_ptr() {
        return Err(err(span, if left_ty.clone().remove_ref().as_class().is_some() {
          format!("member reference type '{}' is not a pointer; note: use '.' instead",
            left_ty.display())
        } else {
          format!("member reference type '{}' is not a pointer", left_ty.display())
        }))
      }
      let pointee = ptr.clone().remove_ptr();
      let Some(desc) = pointee.as_class() else {
        return Err(err(span, format!(
          "member reference base type '{}' is not a class or struct", left_ty.display())))
      };
      class = desc.clone();
      object_is_lvalue = true;
      let v = match &cx.expr {
        ExprVal::Reg(v) => v.clone(),
        _ => return Err(err(span, "expected a class pointer")),
      };
      object_addr = self.convert_type(&left_ty, &ptr, v);
    }

    let Some(member_scope) = class.members.get() else {
      return Err(err(span, format!(
        "member access into incomplete type '{}'", class.name.borrow())))
    };

    let Expression::Id(id) = &rhs.k else {
      return Err(err(rhs.span, "expected a member name"))
    };
    let mut mcx = cx.clone();
    mcx.qualified = Some(member_scope);
    let composed = self.composed_id(&mut mcx, id, rhs.span)?;
    let set = self.comp.scopes.query_symbol(member_scope, composed, true);
    let Some(first) = set.first() else {
      return Err(err(rhs.span, format!("no member named '{}' in '{}'",
        self.comp.intern.name(composed),
        self.comp.scopes.scope_name(member_scope, &self.comp.intern))))
    };
    let sym = self.comp.scopes.symbol(first).clone();

    if sym.ty.as_function().is_some() {
      // a member function reference: remember the object for the call
      cx.ty = sym.ty.clone();
      cx.symbols = set;
      cx.this_arg = Some(object_addr);
      cx.expr = match sym.value {
        Some(v) => ExprVal::Reg(v.into()),
        None => ExprVal::None,
      };
      return Ok(())
    }
    if sym.attr.contains(SymAttr::CONSTANT) {
      cx.ty = sym.ty.clone();
      cx.expr = ExprVal::Const(Constant::Int(sym.constant));
      cx.symbols = SymbolSet::default();
      return Ok(())
    }
    if sym.attr.contains(SymAttr::STATIC) {
      return Err(err(rhs.span, format!(
        "static data member '{}' has no storage", self.comp.intern.name(sym.id))))
    }

    let member_ref = sym.ty.clone().add_ptr(PtrDescriptor::REF);
    let ty = self.make_type(&member_ref);
    let addr = self.emit(ty, InstKind::StructGep { ptr: object_addr, field: sym.index });
    if object_is_lvalue {
      cx.ty = member_ref;
      cx.expr = ExprVal::Reg(addr);
    } else {
      // an rvalue object yields an rvalue member
      let v = self.load(&sym.ty, addr);
      cx.ty = sym.ty.clone();
      cx.expr = ExprVal::Reg(v);
    }
    cx.symbols = SymbolSet::default();
    Ok(())
  }

  fn assignment(&mut self, cx: &mut Cx, op: AssignOp, lhs: &ast::Expr, rhs: &ast::Expr,
    span: Span) -> Sem<()> {
    self.expr(cx, lhs)?;
    let left_ty = cx.ty.clone();
    let value_ty = left_ty.clone().remove_ref();
    let var_symbols = cx.symbols.clone();

    if !left_ty.is_ref() || value_ty.as_function().is_some() || cx.expr.is_const() {
      return Err(err(span, "left of expression is not assignable"))
    }
    if value_ty.is_const_init() {
      return Err(match var_symbols.first() {
        Some(r) => {
          let name = self.comp.intern.name(self.comp.scopes.symbol(r).id).to_owned();
          err(span, format!(
            "cannot assign to variable '{name}' with const-qualified type '{}'",
            value_ty.display()))
        }
        None => err(span, "left of expression is not assignable"),
      })
    }
    let lvalue = match &cx.expr {
      ExprVal::Reg(v) => v.clone(),
      _ => return Err(err(span, "left of expression is not assignable")),
    };

    let compound = op.binary_op();
    let old = if compound.is_some() {
      let Some(ft) = value_ty.as_fund() else {
        return Err(err(span, format!(
          "invalid argument type '{}' to assign expression", value_ty.display())))
      };
      if op.integral_only() && ft.is_floating() {
        return Err(err(span, format!(
          "invalid argument type '{}' to assign expression", value_ty.display())))
      }
      Some(self.convert_type(&left_ty, &value_ty, lvalue.clone()))
    } else {
      None
    };

    let mut rcx = cx.clone();
    rcx.this_arg = None;
    self.expr(&mut rcx, rhs)?;
    if !rcx.ty.is_convertible_to(&value_ty, rcx.expr.constant()) {
      return Err(err(span, format!(
        "assigning to '{}' from incompatible type '{}'",
        value_ty.display(), rcx.ty.display())))
    }
    let mut val = self.create_value(&rcx.ty, &value_ty, &rcx.expr, span)?;

    if let Some(bop) = compound {
      let ft = value_ty.as_fund().expect("checked above");
      let inst = arith_inst(bop, ft).ok_or_else(|| err(span, format!(
        "invalid argument type '{}' to assign expression", value_ty.display())))?;
      let old = old.expect("loaded");
      val = match inst {
        ArithInst::Bin(b) => {
          let ty = self.fund_type(ft);
          self.emit(ty, InstKind::Binop { op: b, lhs: old, rhs: val })
        }
        // comparisons cannot appear in compound assignment
        _ => return Err(err(span, "invalid compound assignment")),
      };
    }

    self.store(&value_ty, val, lvalue.clone());
    cx.ty = left_ty;
    cx.symbols = var_symbols;
    cx.expr = ExprVal::Reg(lvalue);
    Ok(())
  }

  fn conditional(&mut self, cx: &mut Cx, cond: &ast::Expr, then: &ast::Expr, els: &ast::Expr,
    span: Span) -> Sem<()> {
    self.expr(cx, cond)?;
    let v = self.bool_operand(cx, span)?;

    let then_bb = self.new_block();
    let else_bb = self.new_block();
    let merge_bb = self.new_block();
    self.cond_br(v, then_bb, else_bb);

    self.set_insert(then_bb);
    let mut tcx = cx.clone();
    self.expr(&mut tcx, then)?;
    let t_end = self.cur_block();

    self.set_insert(else_bb);
    let mut fcx = cx.clone();
    self.expr(&mut fcx, els)?;
    let f_end = self.cur_block();

    let result = if tcx.ty == fcx.ty {
      tcx.ty.clone()
    } else {
      let dt = tcx.ty.clone().decay();
      let df = fcx.ty.clone().decay();
      if dt == df {
        dt
      } else {
        let common = dt.arithmetic_convert(&df);
        if !tcx.ty.is_convertible_to(&common, tcx.expr.constant())
          || !fcx.ty.is_convertible_to(&common, fcx.expr.constant()) {
          return Err(err(span, format!("incompatible operand types ('{}' and '{}')",
            tcx.ty.display(), fcx.ty.display())))
        }
        common
      }
    };

    self.set_insert(t_end);
    let tv = self.create_value(&tcx.ty, &result, &tcx.expr, span)?;
    self.br(merge_bb);
    self.set_insert(f_end);
    let fv = self.create_value(&fcx.ty, &result, &fcx.expr, span)?;
    self.br(merge_bb);

    self.set_insert(merge_bb);
    let ty = self.make_type(&result);
    let v = self.emit(ty, InstKind::Phi {
      incoming: vec![(tv, t_end), (fv, f_end)],
    });
    cx.ty = result;
    cx.expr = ExprVal::Reg(v);
    cx.symbols = SymbolSet::default();
    Ok(())
  }

  fn cast_expr(&mut self, cx: &mut Cx, ty: &ast::TypeId, arg: &ast::Expr, span: Span)
    -> Sem<()> {
    let cast_ty = self.type_id(cx, ty)?;
    self.expr(cx, arg)?;
    let from = cx.ty.clone();

    if from.is_convertible_to(&cast_ty, cx.expr.constant()) {
      match (&cx.expr, cast_ty.as_fund()) {
        (ExprVal::Const(c), Some(ft)) if ft != FundType::Void =>
          cx.expr = ExprVal::Const(c.convert(ft)),
        (ExprVal::Reg(v), _) => {
          let v = self.convert_type(&from, &cast_ty, v.clone());
          cx.expr = ExprVal::Reg(v);
        }
        _ => {}
      }
      cx.ty = cast_ty;
      cx.symbols = SymbolSet::default();
      return Ok(())
    }

    // reinterpreting one reference as another keeps the address
    if from.is_ref() && cast_ty.is_ref() {
      if cast_ty.clone().remove_ref().cv != CvQualifier::Const
        && from.clone().remove_ref().cv == CvQualifier::Const {
        return Err(err(span, format!("cast from '{}' to '{}' drops const qualifier",
          from.display(), cast_ty.display())))
      }
      if let ExprVal::Reg(v) = cx.expr.clone() {
        let target = self.make_type(&cast_ty);
        let v = self.emit(target,
          InstKind::Cast { kind: crate::types::ir::CastKind::PtrCast, arg: v });
        cx.expr = ExprVal::Reg(v);
      }
      cx.ty = cast_ty;
      cx.symbols = SymbolSet::default();
      return Ok(())
    }

    // a cast never silently drops constness from the referenced type
    if (from.is_ptr() && cast_ty.is_ptr() || from.is_ref() && cast_ty.is_ref())
      && from.clone().remove_ptr().cv == CvQualifier::Const
      && cast_ty.clone().remove_ptr().cv != CvQualifier::Const {
      return Err(err(span, format!("cast from '{}' to '{}' drops const qualifier",
        from.display(), cast_ty.display())))
    }

    // best-effort explicit conversions
    let decayed = from.clone().decay();
    let v = match &cx.expr {
      ExprVal::Const(c) => {
        if let Some(ft) = cast_ty.as_fund() {
          cx.expr = ExprVal::Const(c.convert(ft));
          cx.ty = cast_ty;
          cx.symbols = SymbolSet::default();
          return Ok(())
        }
        let c = *c;
        self.create_value(&from, &decayed, &ExprVal::Const(c), span)?
      }
      ExprVal::Reg(v) => self.convert_type(&from, &decayed, v.clone()),
      ExprVal::None => return Err(err(span, "expected a value")),
    };
    let target = self.make_type(&cast_ty);
    let kind = match (decayed.is_ptr(), cast_ty.is_ptr() || cast_ty.is_ref()) {
      (true, true) => crate::types::ir::CastKind::PtrCast,
      (true, false) => crate::types::ir::CastKind::PtrToInt,
      (false, true) => crate::types::ir::CastKind::IntToPtr,
      (false, false) => {
        // enums are bit-compatible with int for explicit casts
        let ff = decayed.as_fund()
          .or_else(|| decayed.as_enum().map(|_| FundType::Int));
        let tf = cast_ty.as_fund()
          .or_else(|| cast_ty.as_enum().map(|_| FundType::Int));
        match (ff, tf) {
          (Some(ff), Some(tf)) => {
            let v = self.convert_fund(ff, tf, v);
            cx.ty = cast_ty;
            cx.expr = ExprVal::Reg(v);
            cx.symbols = SymbolSet::default();
            return Ok(())
          }
          _ => return Err(err(span, format!("cannot cast '{}' to '{}'",
            from.display(), cast_ty.display()))),
        }
      }
    };
    let v = self.emit(target, InstKind::Cast { kind, arg: v });
    cx.ty = cast_ty;
    cx.expr = ExprVal::Reg(v);
    cx.symbols = SymbolSet::default();
    Ok(())
  }

  fn call_expr(&mut self, cx: &mut Cx, callee: &ast::Expr, args: &[ast::Expr], span: Span)
    -> Sem<()> {
    self.expr(cx, callee)?;
    let this_arg = cx.this_arg.take();
    let callee_ty = cx.ty.clone();
    let callee_val = cx.expr.clone();
    let candidates = cx.symbols.clone();

    let fn_ty = callee_ty.clone().remove_ref().remove_ptr();
    if fn_ty.as_function().is_none() {
      return Err(err(span, format!(
        "called object type '{}' is not a function or function pointer",
        callee_ty.clone().remove_ref().display())))
    }

    // evaluate the arguments once, before overload selection
    let mut arg_vals = Vec::with_capacity(args.len());
    for a in args {
      let mut acx = cx.clone();
      acx.symbols = SymbolSet::default();
      self.expr(&mut acx, a)?;
      arg_vals.push((acx.ty, acx.expr, a.span));
    }

    // collect the overload set: the resolved symbols, or the single
    // descriptor from a function-pointer callee
    let mut overloads = vec![];
    if candidates.is_empty() {
      overloads.push((None, fn_ty.as_function().expect("checked").clone()));
    } else {
      for r in candidates.iter() {
        if let Some(desc) = self.comp.scopes.symbol(r).ty.as_function() {
          overloads.push((Some(r), desc.clone()));
        }
      }
    }

    let name = candidates.first()
      .map_or_else(|| "<indirect>".to_owned(),
        |r| self.comp.intern.name(self.comp.scopes.symbol(r).id).to_owned());

    let mut viable = vec![];
    'cand: for (r, desc) in &overloads {
      let start = usize::from(desc.is_non_static_member(&self.comp.scopes));
      let params = desc.params.borrow();
      if arg_vals.len() + start > params.len() { continue }
      for (p, (ty, e, _)) in params[start..].iter().zip(&arg_vals) {
        let pty = self.comp.scopes.symbol(p.sym).ty.clone();
        if !ty.is_convertible_to(&pty, e.constant()) { continue 'cand }
      }
      // unprovided trailing parameters must all have defaults
      if !params[start + arg_vals.len()..].iter().all(|p| p.has_default) { continue }
      viable.push((*r, desc.clone()));
    }

    let (chosen_sym, desc) = match viable.len() {
      0 => return Err(err(span, format!("no matching function for call to '{name}'"))),
      1 => viable.pop().expect("one candidate"),
      _ => return Err(err(span, format!("call to '{name}' is ambiguous"))),
    };

    // the callee value: the chosen symbol's function, or the pointer value
    let func_val = match chosen_sym {
      Some(r) => match self.comp.scopes.symbol(r).value {
        Some(v) => Operand::Ref(v),
        None => return Err(err(span, format!("function '{name}' has no definition"))),
      },
      None => self.create_value(&callee_ty.clone(), &callee_ty.clone().decay(),
        &callee_val, span)?,
    };

    let start = usize::from(desc.is_non_static_member(&self.comp.scopes));
    let mut ir_args = Vec::with_capacity(start + arg_vals.len());
    if start == 1 {
      let this = match this_arg {
        Some(v) => v,
        None => {
          // an unqualified member call inside another member function
          // passes the current hidden `this` along
          let cur = self.comp.scopes.enclosing_function(cx.scope)
            .filter(|f| f.is_non_static_member(&self.comp.scopes));
          let Some(cur) = cur else {
            return Err(err(span, format!(
              "cannot call member function '{name}' without an object")))
          };
          let p0 = cur.params.borrow().first().map(|p| p.sym)
            .expect("member function has a hidden this");
          Operand::Ref(self.comp.scopes.symbol(p0).value.expect("this is bound"))
        }
      };
      ir_args.push(this);
    }
    {
      let params = desc.params.borrow();
      for (p, (ty, e, aspan)) in params[start..].iter().zip(&arg_vals) {
        let pty = self.comp.scopes.symbol(p.sym).ty.clone();
        let v = self.create_value(ty, &pty, e, *aspan)?;
        ir_args.push(v);
      }
      // materialize constant defaults for missing trailing arguments
      for p in &params[start + arg_vals.len()..] {
        let pty = self.comp.scopes.symbol(p.sym).ty.clone();
        let Some(c) = p.default else {
          return Err(err(span, format!(
            "non-constant default argument in call to '{name}' is not supported")))
        };
        let v = self.const_value(&pty, c, span)?;
        ir_args.push(v.into());
      }
    }

    let ret = desc.ret.clone();
    let ret_ty = self.make_type(&ret);
    let v = self.emit(ret_ty, InstKind::Call { func: func_val, args: ir_args });
    cx.ty = ret;
    cx.expr = ExprVal::Reg(v);
    cx.symbols = SymbolSet::default();
    Ok(())
  }

  fn construct_expr(&mut self, cx: &mut Cx, spec: &ast::ElaboratedTypeSpecifier,
    args: &[ast::Expr], span: Span) -> Sem<()> {
    let ty = self.elaborated_type(cx, spec, CvQualifier::None, span)?;
    if ty.as_class().is_some() {
      return Err(err(span, "constructing a class value with arguments is not supported"))
    }
    match args {
      [] => {
        cx.ty = ty;
        cx.expr = ExprVal::Const(Constant::Int(0));
      }
      [arg] => {
        let mut acx = cx.clone();
        self.expr(&mut acx, arg)?;
        if !acx.ty.is_convertible_to(&ty, acx.expr.constant()) {
          return Err(err(span, format!("cannot initialize '{}' with '{}'",
            ty.display(), acx.ty.display())))
        }
        match (&acx.expr, ty.as_fund()) {
          (ExprVal::Const(c), Some(ft)) if ft != FundType::Void =>
            cx.expr = ExprVal::Const(c.convert(ft)),
          _ => {
            let v = self.create_value(&acx.ty, &ty, &acx.expr, span)?;
            cx.expr = ExprVal::Reg(v);
          }
        }
        cx.ty = ty;
      }
      _ => return Err(err(span, "excess elements in scalar initializer")),
    }
    cx.symbols = SymbolSet::default();
    Ok(())
  }
}
