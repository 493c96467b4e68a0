//! Declarator processing: pointer specifiers, the declarator layers
//! (function, array, id), parameter declarations, and function
//! definitions with their two-pass member protocol.
//!
//! Declarator layers are walked inner-first; each enclosing layer
//! augments the type built so far, and the id layer (outermost in the
//! tree, innermost in the source syntax) records the declared symbol and
//! inserts it.

use smallvec::SmallVec;
use std::rc::Rc;

use crate::scope::{ScopeId, SymAttr, Symbol, SymbolSet};
use crate::symbol::Ident;
use crate::types::ir::{Linkage, Operand, ValueRef};
use crate::types::ty::{
  ArrayDescriptor, CvQualifier, FuncDesc, FundType, Param, PtrDescriptor, PtrKind, Type,
};
use crate::types::{Span, Spanned, ast};
use crate::Sem;

use super::{err, Build, Cx, DeclCx, DeclState, FnCursor, SecondPassQueue};

impl Build<'_> {
  /// Resolve a pointer-specifier list into pointer descriptors, checking
  /// the reference placement rules.
  pub(crate) fn ptr_specifier(&mut self, cx: &mut Cx, ops: &[ast::PtrOperator], span: Span)
    -> Sem<SmallVec<[PtrDescriptor; 2]>> {
    let mut out = SmallVec::new();
    let mut has_reference = false;
    for p in ops {
      if has_reference {
        return Err(if matches!(p.kind, ast::PtrOperatorKind::Reference) {
          err(span, "reference to reference is forbidden")
        } else {
          err(span, "pointer to reference is forbidden")
        })
      }
      let kind = match &p.kind {
        ast::PtrOperatorKind::Pointer => PtrKind::Plain,
        ast::PtrOperatorKind::Reference => {
          has_reference = true;
          PtrKind::Reference
        }
        ast::PtrOperatorKind::Member(spec) => {
          self.name_specifier(cx, spec)?;
          let scope = cx.qualified.take().expect("name specifier sets scope");
          let class = self.comp.scopes.scope_class(scope)
            .ok_or_else(|| err(spec.span, "member pointer requires a class name"))?;
          PtrKind::Member(class)
        }
      };
      out.push(PtrDescriptor { kind, cv: p.cv });
    }
    Ok(out)
  }

  /// Process one declarator layer (and its inner layers first).
  pub(crate) fn declarator(&mut self, cx: &mut Cx, d: &Spanned<ast::Declarator>) -> Sem<()> {
    let span = d.span;
    match &d.k.kind {
      ast::DeclaratorKind::Abstract => {
        if let Some(inner) = &d.k.inner { self.declarator(cx, inner)? }
        if !d.k.ptr_spec.is_empty() {
          cx.ty.ptrs = self.ptr_specifier(cx, &d.k.ptr_spec, span)?;
        }
        // abstract declarators bind no symbol
        cx.symbols = SymbolSet::default();
        Ok(())
      }
      ast::DeclaratorKind::Function { params, cv } =>
        self.function_declarator(cx, d, params, *cv, span),
      ast::DeclaratorKind::Array { size } =>
        self.array_declarator(cx, d, size.as_ref(), span),
      ast::DeclaratorKind::Id(id) => self.id_declarator(cx, d, id, span),
    }
  }

  fn function_declarator(&mut self, cx: &mut Cx, d: &Spanned<ast::Declarator>,
    params: &[Spanned<ast::ParameterDeclaration>], cv: CvQualifier, span: Span) -> Sem<()> {
    if let Some(inner) = &d.k.inner { self.declarator(cx, inner)? }
    if !d.k.ptr_spec.is_empty() {
      cx.ty.ptrs = self.ptr_specifier(cx, &d.k.ptr_spec, span)?;
    }

    if cx.ty.is_array() {
      return Err(err(span,
        format!("function cannot return array type '{}'", cx.ty.display())))
    }
    if cx.ty.as_function().is_some() {
      return Err(err(span,
        format!("function cannot return function type '{}'", cx.ty.display())))
    }

    // the type built so far is the return type
    let scope = self.comp.scopes.new_scope(cx.scope, None, None);
    let desc = FuncDesc::new(cx.ty.clone(), scope);
    self.comp.scopes.set_scope_function(scope, desc.clone());
    if cx.decl.is_friend {
      *desc.friend_of.borrow_mut() = self.comp.scopes.enclosing_class(cx.scope);
    }

    let mut pcx = cx.clone();
    pcx.scope = scope;
    for p in params {
      pcx.decl = DeclCx::reset(DeclState::Param);
      pcx.decl.must_complete = cx.decl.must_complete;
      self.parameter_declaration(&mut pcx, p)?;
    }

    cx.ty = Type::function(desc, cv);
    Ok(())
  }

  fn array_declarator(&mut self, cx: &mut Cx, d: &Spanned<ast::Declarator>,
    size: Option<&ast::Expr>, span: Span) -> Sem<()> {
    if let Some(inner) = &d.k.inner { self.declarator(cx, inner)? }

    let mut count = 0u32;
    if let Some(size) = size {
      let array_ty = cx.ty.clone();
      let saved_decl = cx.decl;
      cx.decl.state = DeclState::NoDecl;
      self.expr(cx, size)?;
      let Some(&c) = cx.expr.constant() else {
        return Err(err(span, "array size is not an integral constant expression"))
      };
      if !cx.ty.is_convertible_to(&FundType::Int.into(), Some(&c)) {
        return Err(err(span,
          format!("'{}' is not convertible to integral", cx.ty.display())))
      }
      let n = c.as_int();
      if n <= 0 {
        return Err(err(span, "array declared with non positive size"))
      }
      count = u32::try_from(n).map_err(|_| err(span, "array size is too large"))?;
      cx.decl = saved_decl;
      cx.ty = array_ty;
    }

    let mut desc = ArrayDescriptor { size: count, ptrs: SmallVec::new() };
    if !d.k.ptr_spec.is_empty() {
      desc.ptrs = self.ptr_specifier(cx, &d.k.ptr_spec, span)?
        .into_iter().collect();
    }

    if matches!(desc.ptrs.last(), Some(PtrDescriptor { kind: PtrKind::Reference, .. })) {
      return Err(err(span,
        format!("array declared with reference to type '{}'", cx.ty.display())))
    }
    if (cx.decl.state != DeclState::Param || cx.decl.must_complete)
      && !cx.ty.is_complete() && desc.ptrs.is_empty() {
      return Err(err(span,
        format!("array declared with incomplete element type '{}'", cx.ty.display())))
    }
    if cx.ty.as_function().is_some() && desc.ptrs.is_empty() {
      return Err(err(span,
        format!("array declared as functions of type '{}'", cx.ty.display())))
    }

    if count == 0 {
      // arrays of unknown bound decay to pointers
      cx.ty.ptrs = desc.ptrs.into_iter().collect();
      cx.ty = cx.ty.clone().add_ptr(PtrDescriptor::PTR);
    } else {
      cx.ty.arrays.push(desc);
    }
    Ok(())
  }

  fn id_declarator(&mut self, cx: &mut Cx, d: &Spanned<ast::Declarator>,
    id: &Spanned<ast::IdExpression>, span: Span) -> Sem<()> {
    let mut insert_scope = cx.scope;
    if cx.decl.is_friend {
      // friend declarations land in the enclosing (non-class) scope and
      // carry no member access
      insert_scope = self.comp.scopes.parent(cx.scope);
      cx.decl.access = cx.decl.access.storage();
    }

    // a conversion function's target type is its return type, which the
    // inner function layer picks up from the current type
    if let ast::IdKind::Conversion(conv) = &id.k.kind {
      cx.ty = self.conversion_target(cx, conv, id.span)?;
    }

    if let Some(inner) = &d.k.inner { self.declarator(cx, inner)? }
    if !d.k.ptr_spec.is_empty() {
      cx.ty.ptrs = self.ptr_specifier(cx, &d.k.ptr_spec, span)?;
    }

    if (cx.decl.state != DeclState::Param || cx.decl.must_complete)
      && !cx.ty.is_complete() {
      return Err(err(span,
        format!("variable has incomplete type '{}'", cx.ty.display())))
    }

    // parameter types decay (array to pointer, function to pointer)
    if cx.decl.state == DeclState::Param {
      cx.ty = cx.ty.clone().param_decay()
    }

    self.id_expression(cx, &id.k, id.span)?;

    if cx.decl.is_typedef || !cx.symbols.is_empty() {
      // a typedef records an alias; a qualified id matched an existing
      // (previously declared) member
      return Ok(())
    }

    let new_sym = cx.new_symbol.take().expect("id declarator records a symbol");
    let origin_attr = new_sym.attr.storage();
    let new_desc = cx.ty.as_function().cloned();

    // a non-static member function gets a hidden `this: const Class*`
    if let Some(desc) = &new_desc {
      if new_sym.attr.is_member() && !new_sym.attr.contains(SymAttr::STATIC) {
        let class = self.comp.scopes.enclosing_class(cx.scope)
          .expect("member declaration in class scope");
        let mut this_ty = Type::class(class);
        this_ty.cv = cx.ty.cv;
        let this_ty = this_ty.add_ptr(PtrDescriptor {
          kind: PtrKind::Plain, cv: CvQualifier::Const });
        let this_sym = self.comp.scopes
          .add_symbol(desc.scope, Symbol::new(Ident::ANON, this_ty, SymAttr::empty()))
          .expect("fresh parameter scope");
        desc.params.borrow_mut().insert(0,
          Param { sym: this_sym, has_default: false, default: None });
      }
    }

    let name = new_sym.id;
    let Some(inserted) = self.comp.scopes.add_symbol(insert_scope, new_sym) else {
      return Err(err(span,
        format!("redefinition of '{}'", self.comp.intern.name(name))))
    };
    cx.symbols = SymbolSet { scope: insert_scope, indices: [inserted.index].into_iter().collect() };

    let Some(new_desc) = new_desc else { return Ok(()) };
    let existing = self.comp.scopes.symbol(inserted).ty.as_function()
      .expect("function symbol").clone();
    if !Rc::ptr_eq(&existing, &new_desc) {
      // merged with a previous declaration of the same signature
      if existing.ret != new_desc.ret {
        return Err(err(span,
          "functions that differ only in their return type cannot be overloaded"))
      }
      if !origin_attr.is_empty()
        && self.comp.scopes.symbol(inserted).attr.storage() != origin_attr {
        return Err(err(span, format!(
          "function '{}' overrides a virtual function in base class",
          self.comp.intern.name(name))))
      }
      cx.ty = self.comp.scopes.symbol(inserted).ty.clone();
    }

    // each descriptor links to exactly one symbol
    let desc = cx.ty.as_function().expect("function type").clone();
    if desc.def_symbol.get().is_none() {
      desc.def_symbol.set(Some(inserted));
    }

    if self.comp.scopes.symbol(inserted).value.is_none() {
      let mut linkage = Linkage::External;
      if insert_scope == ScopeId::ROOT && !desc.is_member(&self.comp.scopes)
        && self.comp.scopes.symbol(inserted).attr.contains(SymAttr::STATIC) {
        linkage = Linkage::Internal
      }
      let fname = self.backend_name(inserted);
      let f = self.create_function(fname, linkage, &desc);
      self.comp.scopes.symbol_mut(inserted).value = Some(ValueRef::Func(f));
    }
    Ok(())
  }

  /// The backend name of a symbol: its composed id, qualified with the
  /// class path when it is a member.
  pub(crate) fn backend_name(&self, sym: crate::scope::SymbolRef) -> String {
    let s = self.comp.scopes.symbol(sym);
    let id = self.comp.intern.name(s.id);
    if sym.scope == ScopeId::ROOT {
      id.to_owned()
    } else if let Some(class) = self.comp.scopes.scope_class(sym.scope) {
      format!("{}::{id}", class.name.borrow())
    } else {
      id.to_owned()
    }
  }

  /// Process a parameter declaration, registering the parameter on the
  /// enclosing function descriptor.
  fn parameter_declaration(&mut self, cx: &mut Cx, p: &Spanned<ast::ParameterDeclaration>)
    -> Sem<()> {
    self.decl_specifier(cx, &p.k.spec)?;

    let mut param_sym = None;
    if let Some(d) = &p.k.declarator {
      cx.symbols = SymbolSet::default();
      self.declarator(cx, d)?;
      param_sym = cx.symbols.first();
    }

    // unnamed parameters are inserted directly
    let param_sym = match param_sym {
      Some(r) => r,
      None => {
        cx.ty = cx.ty.clone().param_decay();
        self.comp.scopes.add_symbol(cx.scope,
          Symbol::new(Ident::ANON, cx.ty.clone(), SymAttr::empty()))
          .expect("anonymous parameters always insert")
      }
    };

    let mut default = None;
    if let Some(e) = &p.k.default {
      let param_ty = self.comp.scopes.symbol(param_sym).ty.clone();
      let mut dcx = cx.clone();
      dcx.decl.state = DeclState::NoDecl;
      self.expr(&mut dcx, e)?;
      if !dcx.ty.is_convertible_to(&param_ty, dcx.expr.constant()) {
        return Err(err(p.span, format!("cannot initialize '{}' with '{}'",
          param_ty.display(), dcx.ty.display())))
      }
      default = dcx.expr.constant().map(|c| match param_ty.as_fund() {
        Some(ft) if ft != FundType::Void => c.convert(ft),
        _ => *c,
      });
    }

    self.comp.scopes.enclosing_function(cx.scope)
      .expect("parameter scope has a function")
      .params.borrow_mut()
      .push(Param { sym: param_sym, has_default: p.k.default.is_some(), default });
    Ok(())
  }

  /// Resolve a type-id (cast targets, `sizeof`).
  pub(crate) fn type_id(&mut self, cx: &mut Cx, t: &ast::TypeId) -> Sem<Type> {
    let saved = cx.decl;
    cx.decl = DeclCx::reset(DeclState::Min);
    let r = (|| {
      self.type_specifier(cx, &t.spec)?;
      if let Some(d) = &t.declarator { self.declarator(cx, d)? }
      Ok(cx.ty.clone())
    })();
    cx.decl = saved;
    r
  }

  /// Process a function definition. Inside a class's first pass only the
  /// signature is established and the context is queued; the second pass
  /// (and every definition outside a class body) analyzes the body.
  pub(crate) fn function_definition(&mut self, cx: &mut Cx, f: &ast::FunctionDefinition,
    span: Span, mut queue: Option<&mut SecondPassQueue>) -> Sem<()> {
    if cx.decl.member_first_pass || queue.is_none() {
      match &f.spec {
        Some(s) => self.decl_specifier(cx, s)?,
        // constructors, destructors and conversion functions have no
        // declaration specifier
        None => cx.ty = Type::void(),
      }
      cx.decl.must_complete = true;
      self.declarator(cx, &f.declarator)?;

      let Some(desc) = cx.ty.as_function() else {
        return Err(err(span, "function definition is not a function"))
      };
      if desc.has_body.get() {
        let name = cx.symbols.first()
          .map_or_else(String::new,
            |r| self.comp.intern.name(self.comp.scopes.symbol(r).id).to_owned());
        return Err(err(span, format!("redefinition of function '{name}'")))
      }

      if cx.decl.member_first_pass {
        // defer the body to the class's second pass
        queue.as_mut().expect("member pass has a queue").push_back(cx.clone());
        return Ok(())
      }
    }

    let body_cx = match queue {
      // a missing entry means the first pass of this member failed and
      // was already reported
      Some(q) => match q.pop_front() {
        Some(cx) => cx,
        None => return Ok(()),
      },
      None => cx.clone(),
    };
    self.function_body(body_cx, f, span)
  }

  fn function_body(&mut self, cx: Cx, f: &ast::FunctionDefinition, span: Span) -> Sem<()> {
    let desc = cx.ty.as_function().expect("function type").clone();
    let fid = match desc.def_symbol.get()
      .and_then(|r| self.comp.scopes.symbol(r).value) {
      Some(ValueRef::Func(f)) => f,
      _ => return Err(err(span, "function definition is not a function")),
    };
    log::debug!("lowering body of @{}", self.module.funcs[fid].name);

    let saved_cur = self.cur.take();
    let entry = self.module.funcs[fid].blocks
      .push(crate::types::ir::Block::default());
    self.cur = Some(FnCursor { func: fid, block: entry });

    let r = self.function_body_inner(cx, &desc, f, span);
    self.cur = saved_cur;
    if r.is_ok() { desc.has_body.set(true) }
    r
  }

  fn function_body_inner(&mut self, cx: Cx, desc: &Rc<FuncDesc>,
    f: &ast::FunctionDefinition, span: Span) -> Sem<()> {
    let mut ncx = cx;
    ncx.decl = DeclCx::reset(DeclState::NoDecl);
    ncx.scope = desc.scope;

    // copy the named arguments into stack slots so they are addressable;
    // anonymous parameters (including `this`) stay as raw arguments
    let params = desc.params.borrow().clone();
    for p in &params {
      let sym = self.comp.scopes.symbol(p.sym);
      if sym.id.is_anon() { continue }
      let ty = sym.ty.clone();
      let arg = Operand::Ref(sym.value.expect("argument is bound"));
      let slot = self.alloca(&ty);
      self.store(&ty, arg, slot.clone());
      let Operand::Ref(slot) = slot else { unreachable!("alloca yields a ref") };
      self.comp.scopes.symbol_mut(p.sym).value = Some(slot);
    }

    for init in &f.ctor_inits {
      self.ctor_initializer(&mut ncx, init)?;
    }

    ncx.stmt = super::StmtCx { keep_scope: true, ..Default::default() };
    self.compound(&mut ncx, &f.body.k, f.body.span)?;
    self.synthesize_return(&desc.ret.clone(), span)
  }

  /// Process one constructor member initializer: a member store through
  /// `this`, or a base-class check.
  fn ctor_initializer(&mut self, cx: &mut Cx, init: &Spanned<ast::CtorInitializer>)
    -> Sem<()> {
    let span = init.span;
    if init.k.is_base {
      let (scope, qualified) = self.lookup_scope(cx, init.k.name_spec.as_ref())?;
      let Some(base) = self.comp.scopes.query_class(scope, init.k.name, qualified) else {
        return Err(err(span, format!("no class named '{}' in '{}'",
          self.comp.intern.name(init.k.name),
          self.comp.scopes.scope_name(scope, &self.comp.intern))))
      };
      let class = self.comp.scopes.enclosing_class(cx.scope)
        .ok_or_else(|| err(span, "constructor initializer outside of a class"))?;
      if Rc::ptr_eq(&class, &base)
        || !crate::types::ty::derives_from(&class, &base) {
        return Err(err(span, format!("'{}' is not base of '{}'",
          base.name.borrow(), class.name.borrow())))
      }
      if !init.k.args.is_empty() {
        return Err(err(span, "base-class constructor arguments are not supported"))
      }
      return Ok(())
    }

    // member by name: resolved in the class scope enclosing the
    // constructor's parameter scope
    let class_scope = self.comp.scopes.parent(cx.scope);
    let set = self.comp.scopes.query_symbol(class_scope, init.k.name, true);
    let Some(first) = set.first() else {
      return Err(err(span, format!("use of undeclared identifier '{}'",
        self.comp.intern.name(init.k.name))))
    };
    let sym = self.comp.scopes.symbol(first).clone();
    if sym.ty.as_function().is_some()
      || sym.attr.intersects(SymAttr::STATIC | SymAttr::CONSTANT) {
      return Err(err(span, format!("'{}' is not a data member",
        self.comp.intern.name(init.k.name))))
    }

    let func = self.comp.scopes.enclosing_function(cx.scope)
      .ok_or_else(|| err(span, "constructor initializer outside of a function"))?;
    let this = func.params.borrow().first()
      .and_then(|p| self.comp.scopes.symbol(p.sym).value)
      .ok_or_else(|| err(span, "constructor has no object parameter"))?;
    let addr_ty = {
      let t = sym.ty.clone().add_ptr(PtrDescriptor::REF);
      self.make_type(&t)
    };
    let addr = self.emit(addr_ty,
      crate::types::ir::InstKind::StructGep { ptr: this.into(), field: sym.index });

    match &init.k.args[..] {
      [] => {
        let zero = self.zero_value(&sym.ty, span)?;
        self.store(&sym.ty, zero.into(), addr);
      }
      [e] => {
        let mut ecx = cx.clone();
        ecx.decl.state = DeclState::NoDecl;
        self.expr(&mut ecx, e)?;
        if !ecx.ty.is_convertible_to(&sym.ty, ecx.expr.constant()) {
          return Err(err(span, format!("cannot initialize '{}' with '{}'",
            sym.ty.display(), ecx.ty.display())))
        }
        let v = self.create_value(&ecx.ty, &sym.ty, &ecx.expr, span)?;
        self.store(&sym.ty, v, addr);
      }
      _ => return Err(err(span, "excess elements in member initializer")),
    }
    Ok(())
  }
}
