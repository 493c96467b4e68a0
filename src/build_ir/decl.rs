//! Declaration processing: block declarations, declaration and type
//! specifiers, enum definitions, and variable initializers.

use std::rc::Rc;

use crate::scope::{ScopeId, SymAttr, Symbol, SymbolRef, SymbolSet};
use crate::types::ir::{ConstValue, Global, InstKind, Linkage, Operand};
use crate::types::ty::{CvQualifier, EnumDesc, FundType, PtrDescriptor, Type};
use crate::types::{Span, Spanned, ast};
use crate::Sem;

use super::{err, Build, Cx, DeclState};

impl Build<'_> {
  /// Process a block declaration: specifiers, then each init-declarator
  /// under its own error-recovery boundary.
  pub(crate) fn block_declaration(&mut self, cx: &mut Cx, d: &ast::BlockDeclaration,
    span: Span) -> Sem<()> {
    if cx.decl.is_friend && !d.declarators.is_empty() {
      return Err(err(span, "friends can only be classes or functions"))
    }
    self.decl_specifier(cx, &d.spec)?;

    let saved_decl = cx.decl;
    let base_ty = cx.ty.clone();
    for init in &d.declarators {
      if let Err(e) = self.init_declarator(cx, init, span) {
        self.comp.report(e)
      }
      cx.decl = saved_decl;
      cx.ty = base_ty.clone();
    }
    Ok(())
  }

  fn init_declarator(&mut self, cx: &mut Cx, d: &ast::InitDeclarator, span: Span) -> Sem<()> {
    self.declarator(cx, &d.declarator)?;
    if cx.decl.is_typedef { return Ok(()) }

    let Some(var) = cx.symbols.first() else {
      return Err(err(d.declarator.span, "declaration declares nothing"))
    };
    let ty = self.comp.scopes.symbol(var).ty.clone();
    let is_global = cx.scope == ScopeId::ROOT;

    if ty.as_function().is_some() {
      // function forward declaration: no storage, no initializer
      return Ok(())
    }

    if self.comp.scopes.symbol(var).value.is_none() {
      if is_global {
        let backend_ty = self.make_type(&ty);
        let name = self.backend_name(var);
        let linkage = if self.comp.scopes.symbol(var).attr.contains(SymAttr::STATIC) {
          Linkage::Internal
        } else {
          Linkage::External
        };
        let align = ty.alignment(&self.comp.scopes).max(1);
        let g = self.module.add_global(Global {
          name, ty: backend_ty, init: None, linkage, align,
          is_const: ty.is_const_init(),
        });
        self.comp.scopes.symbol_mut(var).value =
          Some(crate::types::ir::ValueRef::Global(g));
      } else {
        let slot = self.alloca(&ty);
        let Operand::Ref(slot) = slot else { unreachable!("alloca yields a ref") };
        self.comp.scopes.symbol_mut(var).value = Some(slot);
      }
    }

    if let Some(init) = &d.init {
      cx.decl.state = DeclState::NoDecl;
      self.initializer(cx, var, init)
    } else if ty.is_const_init() {
      Err(err(span, format!(
        "default initialization of an object of const type '{}'", ty.display())))
    } else if is_global {
      // globals are zero initialized by default
      self.gen_zero_init(var, span)
    } else {
      Ok(())
    }
  }

  /// Process declaration specifiers: flags first (so `friend` is visible
  /// to the type specifier), then the type.
  pub(crate) fn decl_specifier(&mut self, cx: &mut Cx, spec: &Spanned<ast::DeclSpecifier>)
    -> Sem<()> {
    let flags = spec.k.flags;
    if flags.contains(ast::DeclFlags::STATIC) { cx.decl.access |= SymAttr::STATIC }
    if flags.contains(ast::DeclFlags::VIRTUAL) { cx.decl.access |= SymAttr::VIRTUAL }
    if flags.contains(ast::DeclFlags::FRIEND) {
      if self.comp.scopes.enclosing_class(cx.scope).is_none() {
        return Err(err(spec.span, "'friend' used outside of class"))
      }
      cx.decl.is_friend = true;
    }
    if flags.contains(ast::DeclFlags::TYPEDEF) { cx.decl.is_typedef = true }

    match &spec.k.ty {
      Some(ts) => { self.type_specifier(cx, ts)?; }
      None => cx.ty = Type::void(),
    }
    Ok(())
  }

  /// Process a type specifier, leaving the type in `cx.ty`.
  pub(crate) fn type_specifier(&mut self, cx: &mut Cx, ts: &Spanned<ast::TypeSpecifier>)
    -> Sem<Type> {
    let span = ts.span;
    let cv = ts.k.cv;
    match &ts.k.kind {
      ast::TypeSpecifierKind::Simple(parts) => {
        if cx.decl.is_friend {
          return Err(err(span, "friends can only be classes or functions"))
        }
        cx.ty = Type::fund(parts.fund_type(), cv);
      }
      ast::TypeSpecifierKind::Elaborated(e) => {
        self.elaborated_type(cx, e, cv, span)?;
      }
      ast::TypeSpecifierKind::Class(cs) => {
        if !matches!(cx.decl.state, DeclState::Full | DeclState::Local) {
          return Err(err(span, "cannot define class type here"))
        }
        if cx.decl.is_friend {
          return Err(err(span, "cannot define a type in a friend declaration"))
        }
        self.class_specifier(cx, cs, span)?;
        cx.ty.cv = cv;
      }
      ast::TypeSpecifierKind::Enum(es) => {
        if !matches!(cx.decl.state, DeclState::Full | DeclState::Local) {
          return Err(err(span, "cannot define enum type here"))
        }
        if cx.decl.is_friend {
          return Err(err(span, "cannot define a type in a friend declaration"))
        }
        self.enum_specifier(cx, es, span)?;
        cx.ty.cv = cv;
      }
    }
    Ok(cx.ty.clone())
  }

  /// Resolve a named (elaborated) type: a class (possibly forward
  /// declaring it), an enum, or a typedef alias.
  pub(crate) fn elaborated_type(&mut self, cx: &mut Cx, e: &ast::ElaboratedTypeSpecifier,
    cv: CvQualifier, span: Span) -> Sem<Type> {
    let (scope, qualified) = self.lookup_scope(cx, e.name_spec.as_ref())?;
    match e.kind {
      ast::ElabKind::Class => {
        let desc = match self.comp.scopes.query_class(scope, e.name, qualified) {
          Some(desc) => desc,
          None => {
            if qualified {
              return Err(err(span, format!("no class named '{}' in '{}'",
                self.comp.intern.name(e.name),
                self.comp.scopes.scope_name(scope, &self.comp.intern))))
            }
            // forward declaration of a class
            let desc = crate::types::ty::ClassDesc::new(
              self.comp.intern.name(e.name).to_owned());
            self.comp.scopes.add_class(scope, e.name, desc.clone());
            desc
          }
        };
        if cx.decl.is_friend {
          if let Some(cur) = self.comp.scopes.enclosing_class(cx.scope) {
            desc.friend_to.borrow_mut().push(cur)
          }
        }
        cx.ty = Type::class(desc);
        cx.ty.cv = cv;
      }
      ast::ElabKind::Enum => {
        if cx.decl.is_friend {
          return Err(err(span, "friends can only be classes or functions"))
        }
        let Some(desc) = self.comp.scopes.query_enum(scope, e.name, qualified) else {
          return Err(if qualified {
            err(span, format!("no enum named '{}' in '{}'",
              self.comp.intern.name(e.name),
              self.comp.scopes.scope_name(scope, &self.comp.intern)))
          } else {
            err(span, "forward declaration of enum is forbidden")
          })
        };
        cx.ty = Type::enumeration(desc);
        cx.ty.cv = cv;
      }
      ast::ElabKind::Typedef => {
        if cx.decl.is_friend {
          return Err(err(span, "friends can only be classes or functions"))
        }
        let Some(t) = self.comp.scopes.query_typedef(scope, e.name, qualified) else {
          return Err(err(span, format!("unknown typedef name '{}'",
            self.comp.intern.name(e.name))))
        };
        cx.ty = t;
        cx.ty.cv = cv;
      }
    }
    Ok(cx.ty.clone())
  }

  /// Process an enum definition: each enumerator folds to a constant; an
  /// enumerator without a value takes the previous one plus one.
  pub(crate) fn enum_specifier(&mut self, cx: &mut Cx, es: &ast::EnumSpecifier, span: Span)
    -> Sem<()> {
    let name = match es.name {
      Some(n) => self.comp.intern.name(n).to_owned(),
      None => "<anonymous enum>".to_owned(),
    };
    let desc = Rc::new(EnumDesc { name });
    let enum_ty = Type::enumeration(desc.clone());

    let mut next = 0i64;
    for (id, value) in &es.enumerators {
      let mut val = next;
      if let Some(e) = value {
        let saved = cx.decl;
        cx.decl.state = DeclState::NoDecl;
        let r = self.expr(cx, e);
        cx.decl = saved;
        if let Err(e) = r {
          self.comp.report(e);
          continue
        }
        let Some(&c) = cx.expr.constant() else {
          return Err(err(e.span, "enum expression is not integral constant"))
        };
        if !cx.ty.is_convertible_to(&FundType::Int.into(), Some(&c)) {
          return Err(err(e.span,
            format!("{} is not convertible to integral", cx.ty.display())))
        }
        val = c.convert(FundType::Int).as_int();
      }
      if self.comp.scopes
        .add_symbol(cx.scope, Symbol::constant(id.k, enum_ty.clone(), val))
        .is_none() {
        return Err(err(id.span,
          format!("redefinition of '{}'", self.comp.intern.name(id.k))))
      }
      next = val + 1;
    }

    if let Some(n) = es.name {
      if !self.comp.scopes.add_enum(cx.scope, n, desc) {
        return Err(err(span,
          format!("redefinition of '{}'", self.comp.intern.name(n))))
      }
    }
    cx.ty = enum_ty;
    Ok(())
  }

  /// Process a variable initializer.
  pub(crate) fn initializer(&mut self, cx: &mut Cx, var: SymbolRef,
    init: &Spanned<ast::Initializer>) -> Sem<()> {
    let span = init.span;
    let ty = self.comp.scopes.symbol(var).ty.clone();
    match &init.k {
      ast::Initializer::Assignment(e) => {
        let mut icx = cx.clone();
        icx.symbols = SymbolSet::default();
        self.expr(&mut icx, e)?;
        if !icx.ty.is_convertible_to(&ty, icx.expr.constant()) {
          return Err(err(span, format!("cannot initialize '{}' with '{}'",
            ty.display(), icx.ty.display())))
        }
        self.gen_assign_init(var, &icx.ty, &icx.expr, span)
      }

      ast::Initializer::List(items) => {
        if cx.scope == ScopeId::ROOT {
          let init = self.const_list_init(cx, &ty, items, span)?;
          if let Some(crate::types::ir::ValueRef::Global(g)) =
            self.comp.scopes.symbol(var).value {
            self.module.globals[g].init = Some(init)
          }
          return Ok(())
        }
        let addr = Operand::Ref(self.comp.scopes.symbol(var).value
          .expect("local storage"));
        self.list_init_into(cx, &ty, addr, items, span)
      }

      ast::Initializer::Paren(args) => {
        if ty.as_class().is_some() {
          return Err(err(span,
            "constructing a class object with arguments is not supported"))
        }
        match &args[..] {
          [] => self.gen_zero_init(var, span),
          [e] => {
            let mut icx = cx.clone();
            icx.symbols = SymbolSet::default();
            self.expr(&mut icx, e)?;
            if !icx.ty.is_convertible_to(&ty, icx.expr.constant()) {
              return Err(err(span, format!("cannot initialize '{}' with '{}'",
                ty.display(), icx.ty.display())))
            }
            self.gen_assign_init(var, &icx.ty, &icx.expr, span)
          }
          _ => Err(err(span, "excess elements in scalar initializer")),
        }
      }
    }
  }

  /// Lower a list initializer by storing into the target address:
  /// per-element stores for arrays, a single converted store (or zero
  /// fill) for scalars.
  fn list_init_into(&mut self, cx: &mut Cx, ty: &Type, addr: Operand,
    items: &[Spanned<ast::Initializer>], span: Span) -> Sem<()> {
    if ty.is_array() {
      let n = ty.array_size();
      if items.len() > n as usize {
        return Err(err(span, "excess elements in array initializer"))
      }
      let elem = ty.clone().element_type();
      let elem_ptr = {
        let t = elem.clone().add_ptr(PtrDescriptor::REF);
        self.make_type(&t)
      };
      for (i, item) in items.iter().enumerate() {
        let idx = ConstValue::Int { bits: 32, value: i64::try_from(i).expect("overflow") };
        let zero = ConstValue::Int { bits: 32, value: 0 };
        let slot = self.emit(elem_ptr, InstKind::Gep {
          ptr: addr.clone(), indices: vec![zero.into(), idx.into()] });
        self.list_init_element(cx, &elem, slot, item)?;
      }
      return Ok(())
    }
    if ty.as_class().is_some() {
      return Err(err(span, "aggregate initialization of a class is not supported"))
    }
    match items {
      [] => {
        let zero = self.zero_value(ty, span)?;
        self.store(ty, zero.into(), addr);
        Ok(())
      }
      [item] => self.list_init_element(cx, ty, addr, item),
      _ => Err(err(span, "excess elements in scalar initializer")),
    }
  }

  fn list_init_element(&mut self, cx: &mut Cx, ty: &Type, addr: Operand,
    item: &Spanned<ast::Initializer>) -> Sem<()> {
    match &item.k {
      ast::Initializer::Assignment(e) => {
        let mut icx = cx.clone();
        icx.symbols = SymbolSet::default();
        self.expr(&mut icx, e)?;
        if !icx.ty.is_convertible_to(ty, icx.expr.constant()) {
          return Err(err(item.span, format!("cannot initialize '{}' with '{}'",
            ty.display(), icx.ty.display())))
        }
        let v = self.create_value(&icx.ty, ty, &icx.expr, item.span)?;
        self.store(ty, v, addr);
        Ok(())
      }
      ast::Initializer::List(items) => self.list_init_into(cx, ty, addr, items, item.span),
      ast::Initializer::Paren(_) =>
        Err(err(item.span, "parenthesized initializer in initializer list")),
    }
  }

  /// Fold a list initializer into a constant aggregate for a global.
  fn const_list_init(&mut self, cx: &mut Cx, ty: &Type,
    items: &[Spanned<ast::Initializer>], span: Span) -> Sem<ConstValue> {
    if ty.is_array() {
      let n = ty.array_size();
      if items.len() > n as usize {
        return Err(err(span, "excess elements in array initializer"))
      }
      let elem = ty.clone().element_type();
      let mut out = Vec::with_capacity(n as usize);
      for item in items {
        out.push(self.const_list_element(cx, &elem, item)?)
      }
      // unwritten trailing elements are zero
      for _ in items.len()..n as usize {
        out.push(self.zero_value(&elem, span)?)
      }
      return Ok(ConstValue::Array(out))
    }
    if ty.as_class().is_some() {
      return Err(err(span, "aggregate initialization of a class is not supported"))
    }
    match items {
      [] => self.zero_value(ty, span),
      [item] => self.const_list_element(cx, ty, item),
      _ => Err(err(span, "excess elements in scalar initializer")),
    }
  }

  fn const_list_element(&mut self, cx: &mut Cx, ty: &Type,
    item: &Spanned<ast::Initializer>) -> Sem<ConstValue> {
    match &item.k {
      ast::Initializer::Assignment(e) => {
        let mut icx = cx.clone();
        icx.symbols = SymbolSet::default();
        self.expr(&mut icx, e)?;
        let Some(&c) = icx.expr.constant() else {
          return Err(err(item.span, "global initializer must be a constant expression"))
        };
        if !icx.ty.is_convertible_to(ty, Some(&c)) {
          return Err(err(item.span, format!("cannot initialize '{}' with '{}'",
            ty.display(), icx.ty.display())))
        }
        let c = match ty.as_fund() {
          Some(ft) if ft != FundType::Void => c.convert(ft),
          _ => c,
        };
        self.const_value(ty, c, item.span)
      }
      ast::Initializer::List(items) => self.const_list_init(cx, ty, items, item.span),
      ast::Initializer::Paren(_) =>
        Err(err(item.span, "parenthesized initializer in initializer list")),
    }
  }
}
