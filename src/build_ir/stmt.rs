//! Statement lowering: compound blocks, control flow, and jumps.
//!
//! Control-flow statements create their blocks in source order and rely on
//! the terminator discipline in the emit layer: a `return` inside a branch
//! terminates the block, and the loop/if epilogue branches quietly become
//! no-ops instead of producing a second terminator.

use crate::types::Span;
use crate::types::ast::{self, ForInit, Statement};
use crate::types::ir::Terminator;
use crate::types::ty::FundType;
use crate::Sem;

use super::{err, Build, Cx, DeclCx, DeclState};

impl Build<'_> {
  /// Lower one statement.
  pub(crate) fn statement(&mut self, cx: &mut Cx, s: &ast::Stmt) -> Sem<()> {
    let span = s.span;
    match &s.k {
      Statement::Expr(e) => {
        if let Some(e) = e {
          cx.decl.state = DeclState::NoDecl;
          self.expr(cx, e)?
        }
        Ok(())
      }
      Statement::Compound(c) => self.compound(cx, c, span),
      Statement::If { cond, then, els } => self.if_stmt(cx, cond, then, els.as_deref(), span),
      Statement::Switch { cond, body } => self.switch_stmt(cx, cond, body, span),
      Statement::While { cond, body } => self.while_stmt(cx, cond, body, span),
      Statement::DoWhile { body, cond } => self.do_stmt(cx, body, cond, span),
      Statement::For { init, cond, iter, body } =>
        self.for_stmt(cx, init, cond.as_ref(), iter.as_ref(), body, span),
      Statement::Case { value, body } => self.case_stmt(cx, value, body, span),
      Statement::Default { body } => self.default_stmt(cx, body, span),
      Statement::Break => {
        if !cx.stmt.in_loop && !cx.stmt.in_switch {
          return Err(err(span, "break statement not in loop or switch statement"))
        }
        self.br(cx.stmt.break_bb.expect("break target"));
        Ok(())
      }
      Statement::Continue => {
        if !cx.stmt.in_loop {
          return Err(err(span, "continue statement not in loop"))
        }
        self.br(cx.stmt.continue_bb.expect("continue target"));
        Ok(())
      }
      Statement::Return(e) => self.return_stmt(cx, e.as_ref(), span),
      Statement::Decl(d) => {
        cx.decl = DeclCx::reset(DeclState::Local);
        self.block_declaration(cx, d, span)
      }
    }
  }

  /// A compound statement: enters a new scope unless the enclosing
  /// construct (function body, `for` header) already made one. Each
  /// contained statement is an error-recovery boundary.
  pub(crate) fn compound(&mut self, cx: &mut Cx, c: &ast::CompoundStatement, _span: Span)
    -> Sem<()> {
    let mut ncx = cx.clone();
    if !cx.stmt.keep_scope {
      ncx.scope = self.comp.scopes.new_scope(cx.scope, None, None);
    }
    for stmt in &c.stmts {
      // restore point: statements recover independently
      ncx.decl = DeclCx::reset(DeclState::NoDecl);
      ncx.stmt = cx.stmt;
      ncx.stmt.keep_scope = false;
      if let Err(e) = self.statement(&mut ncx, stmt) {
        self.comp.report(e)
      }
    }
    Ok(())
  }

  fn if_stmt(&mut self, cx: &mut Cx, cond: &ast::Expr, then: &ast::Stmt,
    els: Option<&ast::Stmt>, span: Span) -> Sem<()> {
    let mut ncx = cx.clone();
    ncx.stmt.keep_scope = false;
    ncx.stmt.switch_level = false;

    ncx.decl.state = DeclState::NoDecl;
    self.expr(&mut ncx, cond)?;
    let v = self.bool_operand(&mut ncx, span)?;

    let then_bb = self.new_block();
    let else_bb = self.new_block();
    let merge_bb = self.new_block();
    self.cond_br(v, then_bb, else_bb);

    self.set_insert(then_bb);
    self.statement(&mut ncx.clone(), then)?;
    self.br(merge_bb);

    self.set_insert(else_bb);
    if let Some(els) = els {
      self.statement(&mut ncx.clone(), els)?;
    }
    self.br(merge_bb);

    self.set_insert(merge_bb);
    Ok(())
  }

  fn switch_stmt(&mut self, cx: &mut Cx, cond: &ast::Expr, body: &ast::CompoundStatement,
    span: Span) -> Sem<()> {
    let mut ncx = cx.clone();
    ncx.stmt.keep_scope = false;
    ncx.stmt.in_switch = true;
    ncx.stmt.switch_level = true;

    ncx.decl.state = DeclState::NoDecl;
    self.expr(&mut ncx, cond)?;
    let int_t = FundType::Int.into();
    if !ncx.ty.is_convertible_to(&int_t, ncx.expr.constant()) {
      return Err(err(span,
        format!("{} is not convertible to integral", ncx.ty.display())))
    }
    let v = self.create_value(&ncx.ty.clone(), &int_t, &ncx.expr.clone(), span)?;

    let default_bb = self.new_block();
    let end_bb = self.new_block();
    let switch_block = self.cur_block();
    self.terminate(Terminator::Switch { arg: v, cases: vec![], default: default_bb });

    ncx.stmt.switch_block = Some(switch_block);
    ncx.stmt.break_bb = Some(end_bb);
    self.compound(&mut ncx, body, span)?;

    // the last case chain falls through to the end
    if !self.is_terminated() { self.br(end_bb) }

    // an unused (or fallen-through) default block continues to the end
    let cur = self.cur.expect("inside a function");
    if self.module.funcs[cur.func].blocks[default_bb].term.is_none() {
      self.set_insert(default_bb);
      self.br(end_bb);
    }
    self.set_insert(end_bb);
    Ok(())
  }

  fn case_stmt(&mut self, cx: &mut Cx, value: &ast::Expr, body: &ast::Stmt, span: Span)
    -> Sem<()> {
    if !cx.stmt.switch_level {
      return Err(err(span, "case statement is not in switch statement"))
    }
    let mut vcx = cx.clone();
    vcx.decl.state = DeclState::NoDecl;
    self.expr(&mut vcx, value)?;
    let Some(&c) = vcx.expr.constant() else {
      return Err(err(span, "case expression is not an integral constant expression"))
    };
    let int_t = FundType::Int.into();
    if !vcx.ty.is_convertible_to(&int_t, Some(&c)) {
      return Err(err(span,
        format!("{} is not convertible to integral", vcx.ty.display())))
    }
    let case_value = c.convert(FundType::Int).as_int();

    let case_bb = self.new_block();
    let cur = self.cur.expect("inside a function");
    let sb = cx.stmt.switch_block.expect("switch terminator recorded");
    if let Some(Terminator::Switch { cases, .. }) =
      &mut self.module.funcs[cur.func].blocks[sb].term {
      cases.push((case_value, case_bb))
    }
    // fall through from the previous case chain
    if !self.is_terminated() { self.br(case_bb) }
    self.set_insert(case_bb);
    self.statement(cx, body)
  }

  fn default_stmt(&mut self, cx: &mut Cx, body: &ast::Stmt, span: Span) -> Sem<()> {
    if !cx.stmt.switch_level {
      return Err(err(span, "default statement is not in switch statement"))
    }
    let cur = self.cur.expect("inside a function");
    let sb = cx.stmt.switch_block.expect("switch terminator recorded");
    let Some(Terminator::Switch { default, .. }) =
      &self.module.funcs[cur.func].blocks[sb].term else {
      return Err(err(span, "default statement is not in switch statement"))
    };
    let default_bb = *default;
    if !self.is_terminated() { self.br(default_bb) }
    self.set_insert(default_bb);
    self.statement(cx, body)
  }

  fn while_stmt(&mut self, cx: &mut Cx, cond: &ast::Expr, body: &ast::Stmt, span: Span)
    -> Sem<()> {
    let cond_bb = self.new_block();
    let loop_bb = self.new_block();
    let end_bb = self.new_block();

    let mut ncx = cx.clone();
    ncx.stmt.keep_scope = false;
    ncx.stmt.switch_level = false;
    ncx.stmt.in_loop = true;
    ncx.stmt.break_bb = Some(end_bb);
    ncx.stmt.continue_bb = Some(cond_bb);

    self.br(cond_bb);
    self.set_insert(cond_bb);
    ncx.decl.state = DeclState::NoDecl;
    self.expr(&mut ncx, cond)?;
    let v = self.bool_operand(&mut ncx, span)?;
    self.cond_br(v, loop_bb, end_bb);

    self.set_insert(loop_bb);
    self.statement(&mut ncx, body)?;
    self.br(cond_bb);

    self.set_insert(end_bb);
    Ok(())
  }

  fn do_stmt(&mut self, cx: &mut Cx, body: &ast::Stmt, cond: &ast::Expr, span: Span)
    -> Sem<()> {
    let loop_bb = self.new_block();
    let cond_bb = self.new_block();
    let end_bb = self.new_block();

    let mut ncx = cx.clone();
    ncx.stmt.keep_scope = false;
    ncx.stmt.switch_level = false;
    ncx.stmt.in_loop = true;
    ncx.stmt.break_bb = Some(end_bb);
    ncx.stmt.continue_bb = Some(cond_bb);

    self.br(loop_bb);
    self.set_insert(loop_bb);
    self.statement(&mut ncx, body)?;
    self.br(cond_bb);

    self.set_insert(cond_bb);
    ncx.decl.state = DeclState::NoDecl;
    self.expr(&mut ncx, cond)?;
    let v = self.bool_operand(&mut ncx, span)?;
    self.cond_br(v, loop_bb, end_bb);

    self.set_insert(end_bb);
    Ok(())
  }

  fn for_stmt(&mut self, cx: &mut Cx, init: &ForInit, cond: Option<&ast::Expr>,
    iter: Option<&ast::Expr>, body: &ast::Stmt, span: Span) -> Sem<()> {
    // the for header owns a scope that encloses the condition, the
    // iteration expression, and the body
    let mut ncx = cx.clone();
    ncx.scope = self.comp.scopes.new_scope(cx.scope, None, None);
    ncx.stmt.keep_scope = true;
    ncx.stmt.switch_level = false;
    ncx.stmt.in_loop = true;

    match init {
      ForInit::Expr(Some(e)) => {
        ncx.decl.state = DeclState::NoDecl;
        self.expr(&mut ncx, e)?
      }
      ForInit::Expr(None) => {}
      ForInit::Decl(d) => {
        ncx.decl = DeclCx::reset(DeclState::Min);
        self.block_declaration(&mut ncx, d, span)?;
        ncx.decl.state = DeclState::NoDecl;
      }
    }

    let cond_bb = self.new_block();
    let iter_bb = self.new_block();
    let loop_bb = self.new_block();
    let end_bb = self.new_block();
    ncx.stmt.break_bb = Some(end_bb);
    ncx.stmt.continue_bb = Some(iter_bb);

    self.br(cond_bb);
    self.set_insert(cond_bb);
    if let Some(cond) = cond {
      ncx.decl.state = DeclState::NoDecl;
      self.expr(&mut ncx, cond)?;
      let v = self.bool_operand(&mut ncx, span)?;
      self.cond_br(v, loop_bb, end_bb);
    } else {
      self.br(loop_bb);
    }

    self.set_insert(iter_bb);
    if let Some(iter) = iter {
      ncx.decl.state = DeclState::NoDecl;
      self.expr(&mut ncx, iter)?;
    }
    self.br(cond_bb);

    self.set_insert(loop_bb);
    self.statement(&mut ncx, body)?;
    self.br(iter_bb);

    self.set_insert(end_bb);
    Ok(())
  }

  fn return_stmt(&mut self, cx: &mut Cx, e: Option<&ast::Expr>, span: Span) -> Sem<()> {
    let func = self.comp.scopes.enclosing_function(cx.scope)
      .ok_or_else(|| err(span, "return statement outside of a function"))?;
    let ret = func.ret.clone();
    match e {
      Some(e) => {
        if ret.is_fund(FundType::Void) {
          return Err(err(span, "void function should not return a value"))
        }
        let mut ncx = cx.clone();
        ncx.decl.state = DeclState::NoDecl;
        self.expr(&mut ncx, e)?;
        if !ncx.ty.is_convertible_to(&ret, ncx.expr.constant()) {
          return Err(err(span, format!(
            "cannot convert type '{}' to function return type '{}'",
            ncx.ty.display(), ret.display())))
        }
        let v = self.create_value(&ncx.ty, &ret, &ncx.expr, span)?;
        self.terminate(Terminator::Ret(Some(v)));
      }
      None => {
        if !ret.is_fund(FundType::Void) {
          return Err(err(span, "non-void function should return a value"))
        }
        self.terminate(Terminator::Ret(None));
      }
    }
    Ok(())
  }

  /// Synthesize the terminator of a function body that falls off the end:
  /// `ret void` for void functions, a zero return otherwise.
  pub(crate) fn synthesize_return(&mut self, ret: &crate::types::ty::Type, span: Span)
    -> Sem<()> {
    if self.is_terminated() { return Ok(()) }
    if ret.is_fund(FundType::Void) {
      self.terminate(Terminator::Ret(None));
    } else {
      let zero = self.zero_value(ret, span).unwrap_or_else(|_| {
        crate::types::ir::ConstValue::Zero(self.make_type(ret))
      });
      self.terminate(Terminator::Ret(Some(zero.into())));
    }
    Ok(())
  }
}
