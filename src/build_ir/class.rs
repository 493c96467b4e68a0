//! Class definitions: the two-pass member protocol, base classes, layout
//! finalization, and member declarators.
//!
//! The first pass over a class body collects every member symbol and
//! nested type; member-function bodies are not entered, only their outer
//! signatures, and a snapshot of the context is queued. The aggregate
//! layout is then finalized from the collected data members, and the
//! second pass drains the queue to analyze the bodies against the complete
//! class. This is what makes a method body able to call a member declared
//! after it.

use crate::scope::{SymAttr, SymbolSet};
use crate::types::ast::{self, Access, ClassKey, MemberKind};
use crate::types::ty::{BaseClass, ClassDesc, Type};
use crate::types::{Span, Spanned};
use crate::Sem;

use super::{err, Build, Cx, DeclCx, DeclState, SecondPassQueue};

impl Build<'_> {
  /// Process a class definition, leaving the class type in `cx.ty`.
  pub(crate) fn class_specifier(&mut self, cx: &mut Cx, cs: &ast::ClassSpecifier, span: Span)
    -> Sem<()> {
    let (scope, qualified) = self.lookup_scope(cx, cs.name_spec.as_ref())?;

    let existing = cs.name.and_then(|n| self.comp.scopes.query_class(scope, n, qualified));
    let desc = match existing {
      Some(desc) => desc,
      None => {
        if qualified {
          let n = cs.name.map_or("", |n| self.comp.intern.name(n)).to_owned();
          return Err(err(span, format!("no class named '{n}' in '{}'",
            self.comp.scopes.scope_name(scope, &self.comp.intern))))
        }
        let name = match cs.name {
          Some(n) => self.comp.intern.name(n).to_owned(),
          None if cs.key == ClassKey::Class => "<anonymous class>".to_owned(),
          None => "<anonymous struct>".to_owned(),
        };
        let desc = ClassDesc::new(name);
        if let Some(n) = cs.name {
          self.comp.scopes.add_class(scope, n, desc.clone());
        }
        desc
      }
    };

    if desc.members.get().is_some() {
      return Err(err(span, format!("redefinition of '{}'", desc.name.borrow())))
    }
    let member_scope = self.comp.scopes.new_scope(cx.scope, Some(desc.clone()), None);
    desc.members.set(Some(member_scope));

    let mut ccx = cx.clone();
    ccx.scope = member_scope;
    if let Some(base) = &cs.base {
      self.base_specifier(&mut ccx, base)?;
    }
    self.member_list(&mut ccx, &cs.members)?;

    cx.ty = Type::class(desc);
    Ok(())
  }

  /// Process a base-class specifier: a single base; the derived class's
  /// offset cursor starts at the base's size.
  fn base_specifier(&mut self, ccx: &mut Cx, base: &Spanned<ast::BaseSpecifier>) -> Sem<()> {
    let class = self.comp.scopes.scope_class(ccx.scope).expect("class scope");
    let (scope, qualified) = self.lookup_scope(ccx, base.k.name_spec.as_ref())?;
    let desc = self.comp.scopes.query_class(scope, base.k.name, qualified)
      .filter(|d| d.members.get().is_some())
      .ok_or_else(|| err(base.span, format!("base class '{}' has incomplete type",
        self.comp.intern.name(base.k.name))))?;
    let base_scope = desc.members.get().expect("checked");
    let base_size = self.comp.scopes.scope_size(base_scope);
    *class.base.borrow_mut() = Some(BaseClass { desc, access: base.k.access });
    self.comp.scopes.set_start_offset(ccx.scope, base_size);
    Ok(())
  }

  /// The two passes over the member list, with layout finalization in
  /// between.
  fn member_list(&mut self, ccx: &mut Cx, members: &[Spanned<ast::MemberDeclaration>])
    -> Sem<()> {
    let saved_decl = ccx.decl;
    let mut queue = SecondPassQueue::new();

    // first pass: member declarations (function bodies deferred)
    for m in members {
      ccx.decl = DeclCx::reset(saved_decl.state);
      ccx.decl.member_first_pass = true;
      if let Err(e) = self.member_declaration(ccx, m, &mut queue) {
        self.comp.report(e)
      }
    }

    // finalize the aggregate layout: base (if any) in field 0, then data
    // members in declaration order
    let class = self.comp.scopes.scope_class(ccx.scope).expect("class scope");
    let has_base = class.base.borrow().is_some();
    self.comp.scopes.assign_member_indices(ccx.scope, u32::from(has_base));
    let ty = self.class_type(&class);
    let fields = self.class_fields(&class);
    self.module.set_struct_body(ty, fields);
    log::debug!("laid out class {} ({} bytes)",
      class.name.borrow(), self.comp.scopes.scope_size(ccx.scope));

    // second pass: member function bodies, against the complete layout
    for m in members {
      let MemberKind::Function(f) = &m.k.kind else { continue };
      ccx.decl = DeclCx::reset(saved_decl.state);
      self.member_access(ccx, m.k.access);
      if let Err(e) = self.function_definition(ccx, f, m.span, Some(&mut queue)) {
        self.comp.report(e)
      }
    }

    ccx.decl = saved_decl;
    Ok(())
  }

  fn member_access(&mut self, ccx: &mut Cx, access: Access) {
    let attr = match access {
      Access::Private => SymAttr::PRIVATE,
      Access::Protected => SymAttr::PROTECTED,
      _ => SymAttr::PUBLIC,
    };
    ccx.decl.access = (ccx.decl.access - SymAttr::ACCESS_MASK) | attr;
  }

  fn member_declaration(&mut self, ccx: &mut Cx, m: &Spanned<ast::MemberDeclaration>,
    queue: &mut SecondPassQueue) -> Sem<()> {
    match &m.k.kind {
      MemberKind::Definition { spec, decls } => {
        match spec {
          Some(s) => self.decl_specifier(ccx, s)?,
          None => ccx.ty = Type::void(),
        }
        if ccx.decl.state == DeclState::Local
          && ccx.decl.access.contains(SymAttr::STATIC) {
          return Err(err(m.span, format!(
            "static data member not allowed in local class '{}'",
            self.comp.scopes.scope_name(ccx.scope, &self.comp.intern))))
        }
        if !ccx.decl.is_typedef {
          self.member_access(ccx, m.k.access);
        }
        let base_ty = ccx.ty.clone();
        let saved_decl = ccx.decl;
        for d in decls {
          self.member_declarator(ccx, d, m.span)?;
          ccx.ty = base_ty.clone();
          ccx.decl = saved_decl;
        }
        Ok(())
      }
      MemberKind::Function(f) => {
        self.member_access(ccx, m.k.access);
        self.function_definition(ccx, f, m.span, Some(queue))
      }
    }
  }

  fn member_declarator(&mut self, ccx: &mut Cx, d: &ast::MemberDeclarator, span: Span)
    -> Sem<()> {
    self.declarator(ccx, &d.declarator)?;

    if d.pure {
      let Some(sym) = ccx.symbols.first() else {
        return Err(err(span, "only virtual function can be declared pure"))
      };
      let attr = self.comp.scopes.symbol(sym).attr;
      if !attr.contains(SymAttr::VIRTUAL) {
        return Err(err(span, "only virtual function can be declared pure"))
      }
      let s = self.comp.scopes.symbol_mut(sym);
      s.attr.remove(SymAttr::VIRTUAL);
      s.attr.insert(SymAttr::PURE_VIRTUAL);
      return Ok(())
    }

    if let Some(init) = &d.init {
      // in-class initializers are restricted to static members of const
      // type, and must fold to a constant
      let Some(sym) = ccx.symbols.first() else {
        return Err(err(span, "in-class initialization of data member must be static"))
      };
      let (ty, attr) = {
        let s = self.comp.scopes.symbol(sym);
        (s.ty.clone(), s.attr)
      };
      if !attr.contains(SymAttr::STATIC) {
        return Err(err(span, "in-class initialization of data member must be static"))
      }
      if !ty.is_const_init() {
        return Err(err(span, "non-const static data member must be initialized out of line"))
      }
      let mut icx = ccx.clone();
      icx.decl = DeclCx::reset(DeclState::NoDecl);
      icx.symbols = SymbolSet::default();
      self.expr(&mut icx, init)?;
      let Some(&c) = icx.expr.constant() else {
        return Err(err(init.span, "initialize expression is not constant"))
      };
      if !icx.ty.is_convertible_to(&ty, Some(&c)) {
        return Err(err(init.span, format!("cannot initialize '{}' with '{}'",
          ty.display(), icx.ty.display())))
      }
      // the member becomes a compile-time constant
      let s = self.comp.scopes.symbol_mut(sym);
      s.attr.insert(SymAttr::CONSTANT);
      s.constant = c.as_int();
    }
    Ok(())
  }
}
