//! Semantic analyzer and typed-IR code generator for a statically-typed,
//! object-oriented systems language: a C++ subset with classes, single
//! inheritance, virtual dispatch, operator and function overloading,
//! references, pointers, arrays, enums and typedefs (no templates).
//!
//! The crate consumes a parsed [`TranslationUnit`](types::ast::TranslationUnit)
//! and produces a typed [`Module`](types::ir::Module) of SSA-style
//! instructions in basic blocks, suitable for a backend code generator.
//! Lexing, parsing and machine-code emission are external collaborators.
//!
//! The pipeline is a single recursive walk over the AST (class bodies use a
//! two-pass protocol so member-function bodies see the complete class
//! layout), driven from [`Compiler::compile`]. Semantic errors are caught
//! at every top-level declaration and at every statement of a compound
//! statement, recorded, and the walk continues; the compilation succeeds
//! iff no error was recorded.

// rust lints we want
#![warn(
  elided_lifetimes_in_paths,
  missing_copy_implementations,
  missing_debug_implementations,
  missing_docs,
  unreachable_pub,
  unused,
  variant_size_differences
)]
// lints we want after clippy
#![warn(clippy::pedantic)]
#![allow(
  clippy::enum_glob_use,
  clippy::match_same_arms,
  clippy::missing_errors_doc,
  clippy::missing_panics_doc,
  clippy::module_name_repetitions,
  clippy::must_use_candidate,
  clippy::similar_names,
  clippy::too_many_lines,
  clippy::wildcard_imports
)]

pub mod build_ir;
pub mod constant;
pub mod scope;
pub mod symbol;
pub mod types;

use thiserror::Error;

use crate::scope::ScopeTree;
use crate::symbol::Interner;
use crate::types::Span;
use crate::types::{ast, ir};

/// A semantic error: a message and the source location it applies to.
/// These propagate up the walk and are recorded at the statement and
/// top-level-declaration boundaries.
#[derive(Debug, Clone, Error)]
#[error("error {span}: {msg}")]
pub struct SemanticError {
  /// The diagnostic text.
  pub msg: String,
  /// Where it happened.
  pub span: Span,
}

impl SemanticError {
  /// Construct an error at a location.
  #[must_use] pub fn new(msg: impl Into<String>, span: Span) -> Self {
    Self { msg: msg.into(), span }
  }
}

/// The result type of every analysis step.
pub type Sem<T> = Result<T, SemanticError>;

/// The error type of a whole compilation.
#[derive(Debug, Clone, Copy, Error)]
pub enum CompileError {
  /// Semantic analysis recorded this many errors; the diagnostics
  /// themselves are in [`Compiler::errors`].
  #[error("semantic check failed, {0} errors generated")]
  Semantic(usize),
}

/// The compilation session: the identifier table, the scope tree, and the
/// recorded diagnostics. One session handles one translation unit; the
/// driver passes it explicitly (there is no global state).
#[derive(Debug, Default)]
pub struct Compiler {
  /// The identifier interner (the session string table).
  pub intern: Interner,
  /// The scope arena, rooted at the global scope.
  pub scopes: ScopeTree,
  /// Diagnostics recorded so far.
  pub errors: Vec<SemanticError>,
}

impl Compiler {
  /// Create a fresh session.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Analyze a translation unit and emit its IR module.
  ///
  /// On failure the partial module is discarded and the error count is
  /// returned; the individual diagnostics remain in [`errors`](Self::errors).
  pub fn compile(&mut self, unit: &ast::TranslationUnit) -> Result<ir::Module, CompileError> {
    self.errors.clear();
    let module = build_ir::lower_unit(self, unit);
    if self.errors.is_empty() {
      Ok(module)
    } else {
      Err(CompileError::Semantic(self.errors.len()))
    }
  }

  /// Record a diagnostic.
  pub(crate) fn report(&mut self, e: SemanticError) {
    log::debug!("reported: {e}");
    self.errors.push(e)
  }
}
