//! Build the typed IR module from the AST.
//!
//! This is the combined semantic analyzer and code generator: a single
//! recursive walk over the tree that resolves names, checks and converts
//! types, folds constants, and emits IR as it goes. Class bodies are the
//! one exception to the single pass: member-function bodies are deferred
//! to a second pass so they see the complete class layout.
//!
//! The walk state lives in two places. [`Build`] holds the session-wide
//! pieces: the compiler session, the module under construction, the
//! backend struct-type memo, and the current function cursor. [`Cx`] is
//! the per-node context threaded through the tree: the scope, the type
//! and value most recently produced, and the declaration/statement
//! sub-states. `Cx` is cheap to clone, which is how sub-walks (the right
//! operand of a binary expression, a class body, a deferred member
//! function) get their own view.

mod class;
mod decl;
mod declarator;
mod emit;
mod expr;
mod stmt;

use hashbrown::HashMap;
use std::collections::VecDeque;

use crate::constant::Constant;
use crate::scope::{ScopeId, Symbol, SymbolSet, SymAttr};
use crate::types::ir::{self, BlockId, FuncId, GlobalId, Operand, TyId};
use crate::types::ty::{ClassDesc, Type};
use crate::types::{Span, ast};
use crate::{Compiler, Sem, SemanticError};

/// Construct a [`SemanticError`] at a span.
pub(crate) fn err(span: Span, msg: impl Into<String>) -> SemanticError {
  SemanticError::new(msg, span)
}

/// The declaration phase: what kinds of declaration the current position
/// admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum DeclState {
  /// Only symbol references are allowed (expression position).
  #[default] NoDecl,
  /// A parameter declaration: no class/enum definitions, incomplete types
  /// allowed.
  Param,
  /// A new symbol, but no class or enum definitions (type-id position).
  Min,
  /// A local declaration: no static data members.
  Local,
  /// An unrestricted declaration.
  Full,
}

/// The declaration sub-state of the walk context.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DeclCx {
  /// The phase.
  pub(crate) state: DeclState,
  /// Inside a `friend` declaration.
  pub(crate) is_friend: bool,
  /// Inside a `typedef` declaration.
  pub(crate) is_typedef: bool,
  /// Incomplete parameter types are disallowed (function definitions).
  pub(crate) must_complete: bool,
  /// Inside the first pass over a class body.
  pub(crate) member_first_pass: bool,
  /// The attribute a newly declared symbol would receive.
  pub(crate) access: SymAttr,
}

impl DeclCx {
  /// Reset to a fresh state of the given phase, as each declaration
  /// boundary does.
  pub(crate) fn reset(state: DeclState) -> Self { Self { state, ..Self::default() } }
}

/// The statement sub-state of the walk context.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StmtCx {
  /// Do not open a new scope for the next compound statement (function
  /// bodies and `for` loops, which own their scope).
  pub(crate) keep_scope: bool,
  /// Directly inside a switch body, where `case`/`default` labels are
  /// valid.
  pub(crate) switch_level: bool,
  /// Anywhere inside a switch (for `break`).
  pub(crate) in_switch: bool,
  /// Anywhere inside a loop (for `break`/`continue`).
  pub(crate) in_loop: bool,
  /// Branch target of `break`.
  pub(crate) break_bb: Option<BlockId>,
  /// Branch target of `continue`.
  pub(crate) continue_bb: Option<BlockId>,
  /// The block whose terminator is the enclosing `switch`, for `case`
  /// registration.
  pub(crate) switch_block: Option<BlockId>,
}

/// The value produced by an expression: nothing yet, a folded constant, or
/// an IR operand.
#[derive(Debug, Clone, Default)]
pub(crate) enum ExprVal {
  /// No value (statement position, or an error path).
  #[default] None,
  /// A compile-time constant.
  Const(Constant),
  /// A runtime value.
  Reg(Operand),
}

impl ExprVal {
  /// The folded constant, if this is one.
  pub(crate) fn constant(&self) -> Option<&Constant> {
    match self { Self::Const(c) => Some(c), _ => None }
  }

  /// Is this a compile-time constant?
  pub(crate) fn is_const(&self) -> bool { matches!(self, Self::Const(_)) }
}

/// The per-node walk context.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cx {
  /// The current scope.
  pub(crate) scope: ScopeId,
  /// A pending qualified scope, set by a name specifier and consumed by
  /// the next lookup.
  pub(crate) qualified: Option<ScopeId>,
  /// The type most recently produced (by a specifier or expression).
  pub(crate) ty: Type,
  /// The symbols most recently resolved (an overload set for functions).
  pub(crate) symbols: SymbolSet,
  /// A pending new symbol, produced by an id-declarator before insertion.
  pub(crate) new_symbol: Option<Symbol>,
  /// The value most recently produced.
  pub(crate) expr: ExprVal,
  /// The object address for a pending member-function call.
  pub(crate) this_arg: Option<Operand>,
  /// Statement state.
  pub(crate) stmt: StmtCx,
  /// Declaration state.
  pub(crate) decl: DeclCx,
}

/// A deferred member-function body: the context snapshot taken at the end
/// of its first-pass signature processing.
pub(crate) type SecondPassQueue = VecDeque<Cx>;

/// The current function being emitted into.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FnCursor {
  /// The function.
  pub(crate) func: FuncId,
  /// The insertion block.
  pub(crate) block: BlockId,
}

/// The IR builder and walk driver.
pub(crate) struct Build<'a> {
  /// The compiler session.
  pub(crate) comp: &'a mut Compiler,
  /// The module under construction.
  pub(crate) module: ir::Module,
  /// Backend struct types, memoized per class descriptor.
  pub(crate) struct_memo: HashMap<*const ClassDesc, TyId>,
  /// Interned string-literal globals.
  pub(crate) string_memo: HashMap<String, GlobalId>,
  /// The function currently being emitted, if any.
  pub(crate) cur: Option<FnCursor>,
}

/// Analyze a translation unit, recording errors on the session and
/// returning the (possibly partial) module.
pub(crate) fn lower_unit(comp: &mut Compiler, unit: &ast::TranslationUnit) -> ir::Module {
  let mut build = Build {
    comp,
    module: ir::Module::default(),
    struct_memo: HashMap::new(),
    string_memo: HashMap::new(),
    cur: None,
  };
  let mut cx = Cx::default();
  for decl in &unit.decls {
    // restore point: each top-level declaration starts fresh and catches
    // its own errors
    cx.decl = DeclCx::reset(DeclState::Full);
    log::debug!("lowering declaration at {}", decl.span);
    if let Err(e) = build.declaration(&mut cx, decl) {
      build.comp.report(e)
    }
  }
  build.module
}

impl Build<'_> {
  /// Process one top-level declaration.
  fn declaration(&mut self, cx: &mut Cx, decl: &crate::types::Spanned<ast::Declaration>)
    -> Sem<()> {
    match &decl.k {
      ast::Declaration::Block(b) => self.block_declaration(cx, b, decl.span),
      ast::Declaration::Function(f) => self.function_definition(cx, f, decl.span, None),
    }
  }

  /// Resolve a qualified-name prefix to the scope it denotes, leaving it
  /// in `cx.qualified`.
  fn name_specifier(&mut self, cx: &mut Cx, spec: &crate::types::Spanned<ast::NameSpecifier>)
    -> Sem<()> {
    let mut scope = if spec.k.global { ScopeId::ROOT } else { cx.scope };
    for &part in &spec.k.path {
      let Some(desc) = self.comp.scopes.query_class(scope, part, false) else {
        return Err(err(spec.span, format!("no class named '{}' in '{}'",
          self.comp.intern.name(part), self.comp.scopes.scope_name(scope, &self.comp.intern))))
      };
      let Some(members) = desc.members.get() else {
        return Err(err(spec.span, format!(
          "incomplete class '{}' named in nested name specifier", desc.name.borrow())))
      };
      scope = members
    }
    cx.qualified = Some(scope);
    Ok(())
  }

  /// Resolve an optional name specifier, returning the scope to search and
  /// whether the search is qualified. Consumes any pending qualified scope.
  fn lookup_scope(&mut self, cx: &mut Cx,
    spec: Option<&crate::types::Spanned<ast::NameSpecifier>>,
  ) -> Sem<(ScopeId, bool)> {
    if let Some(spec) = spec {
      self.name_specifier(cx, spec)?;
      return Ok((cx.qualified.take().expect("name specifier sets scope"), true))
    }
    match cx.qualified.take() {
      Some(scope) => Ok((scope, true)),
      None => Ok((cx.scope, false)),
    }
  }
}
