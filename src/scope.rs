//! The symbol table: a tree of lexical scopes holding symbols (with
//! function overloading), class and enum descriptors, and typedef aliases.
//!
//! Scopes live in an arena ([`ScopeTree`]) and refer to each other by
//! [`ScopeId`]; parent links are plain indices, never owning, and the root
//! is its own parent so upward walks terminate. Class member scopes and
//! function parameter scopes are created here and attached to their
//! descriptors; local scopes for compound statements are created and simply
//! abandoned when the block ends.

use hashbrown::HashMap;
use smallvec::SmallVec;
use std::rc::Rc;

use crate::symbol::{Ident, Interner};
use crate::types::IdxVec;
use crate::types::ir::ValueRef;
use crate::types::ty::{ClassDesc, EnumDesc, FuncDesc, Type};

crate::mk_id! {
  /// An index into the scope arena.
  ScopeId("s"),
}

impl ScopeId {
  /// The root (global) scope.
  pub const ROOT: Self = Self(0);
}

bitflags::bitflags! {
  /// Symbol attributes: a storage class crossed with a member access level.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct SymAttr: u8 {
    /// `static` storage.
    const STATIC = 1;
    /// A virtual member function.
    const VIRTUAL = 2;
    /// A pure virtual member function (`= 0`).
    const PURE_VIRTUAL = 4;
    /// A compile-time constant (enumerators).
    const CONSTANT = 8;
    /// Public member access.
    const PUBLIC = 1 << 4;
    /// Protected member access.
    const PROTECTED = 1 << 5;
    /// Private member access.
    const PRIVATE = 1 << 6;
  }
}

impl SymAttr {
  /// The access-level bits.
  pub const ACCESS_MASK: Self = Self::PUBLIC.union(Self::PROTECTED).union(Self::PRIVATE);

  /// The storage/constness part of the attribute.
  #[must_use] pub fn storage(self) -> Self { self.difference(Self::ACCESS_MASK) }

  /// The access part of the attribute.
  #[must_use] pub fn access(self) -> Self { self.intersection(Self::ACCESS_MASK) }

  /// Is any access bit set (i.e. is this a class member)?
  #[must_use] pub fn is_member(self) -> bool { !self.access().is_empty() }
}

/// A symbol table entry.
#[derive(Debug, Clone)]
pub struct Symbol {
  /// The (composed) identifier.
  pub id: Ident,
  /// The symbol's type.
  pub ty: Type,
  /// Storage class and access.
  pub attr: SymAttr,
  /// The integer value, for `CONSTANT` symbols (enumerators).
  pub constant: i64,
  /// Byte offset within the owning scope, for data symbols.
  pub offset: u32,
  /// Field index in the backend aggregate, for class data members.
  pub index: u32,
  /// The backend value handle, once codegen has materialized storage.
  pub value: Option<ValueRef>,
}

impl Symbol {
  /// A plain symbol with the given name, type and attributes.
  #[must_use] pub fn new(id: Ident, ty: Type, attr: SymAttr) -> Self {
    Self { id, ty, attr, constant: 0, offset: 0, index: 0, value: None }
  }

  /// An enumerator constant.
  #[must_use] pub fn constant(id: Ident, ty: Type, value: i64) -> Self {
    Self { constant: value, ..Self::new(id, ty, SymAttr::CONSTANT) }
  }
}

/// A non-owning reference to a symbol in some scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRef {
  /// The scope holding the symbol.
  pub scope: ScopeId,
  /// The index of the symbol within the scope.
  pub index: u32,
}

/// The result of a symbol lookup: zero or more symbols (more than one only
/// for function overload sets), together with the scope they were found in.
#[derive(Debug, Clone, Default)]
pub struct SymbolSet {
  /// The scope the symbols were found in.
  pub scope: ScopeId,
  /// Indices of the matching symbols in that scope.
  pub indices: SmallVec<[u32; 2]>,
}

impl SymbolSet {
  /// Is the set empty (lookup failed)?
  #[must_use] pub fn is_empty(&self) -> bool { self.indices.is_empty() }

  /// The number of symbols found.
  #[must_use] pub fn len(&self) -> usize { self.indices.len() }

  /// A reference to the first symbol. Most expression paths only care
  /// about this one; overload sets are resolved at call sites.
  #[must_use] pub fn first(&self) -> Option<SymbolRef> {
    self.indices.first().map(|&index| SymbolRef { scope: self.scope, index })
  }

  /// The single symbol, when the set is known not to be an overload set.
  #[must_use] pub fn single(&self) -> Option<SymbolRef> {
    if self.indices.len() == 1 { self.first() } else { None }
  }

  /// Iterate over the symbol references in the set.
  pub fn iter(&self) -> impl Iterator<Item = SymbolRef> + '_ {
    let scope = self.scope;
    self.indices.iter().map(move |&index| SymbolRef { scope, index })
  }
}

/// One lexical scope.
#[derive(Debug, Default)]
pub struct Scope {
  parent: ScopeId,
  class: Option<Rc<ClassDesc>>,
  func: Option<Rc<FuncDesc>>,
  symbols: Vec<Symbol>,
  by_name: HashMap<Ident, SmallVec<[u32; 1]>>,
  classes: HashMap<Ident, Rc<ClassDesc>>,
  enums: HashMap<Ident, Rc<EnumDesc>>,
  typedefs: HashMap<Ident, Type>,
  offset: u32,
}

/// The scope arena. Index 0 is the root scope, which is its own parent.
#[derive(Debug)]
pub struct ScopeTree {
  scopes: IdxVec<ScopeId, Scope>,
}

impl Default for ScopeTree {
  fn default() -> Self {
    let mut scopes = IdxVec::new();
    scopes.push(Scope::default());
    Self { scopes }
  }
}

impl ScopeTree {
  /// Create a child scope. `class` marks a class member scope, `func` a
  /// function parameter scope.
  pub fn new_scope(&mut self, parent: ScopeId,
    class: Option<Rc<ClassDesc>>, func: Option<Rc<FuncDesc>>,
  ) -> ScopeId {
    self.scopes.push(Scope { parent, class, func, ..Scope::default() })
  }

  /// Attach a function descriptor to its parameter scope (the descriptor
  /// and scope are created mutually, so this is a backpatch).
  pub fn set_scope_function(&mut self, id: ScopeId, func: Rc<FuncDesc>) {
    self.scopes[id].func = Some(func)
  }

  /// The parent of a scope. The root is its own parent.
  #[must_use] pub fn parent(&self, id: ScopeId) -> ScopeId { self.scopes[id].parent }

  /// The nearest enclosing class descriptor, if any.
  #[must_use] pub fn enclosing_class(&self, mut id: ScopeId) -> Option<Rc<ClassDesc>> {
    loop {
      if let Some(c) = &self.scopes[id].class { return Some(c.clone()) }
      let up = self.scopes[id].parent;
      if up == id { return None }
      id = up
    }
  }

  /// The class descriptor of this exact scope, if it is a class scope.
  #[must_use] pub fn scope_class(&self, id: ScopeId) -> Option<Rc<ClassDesc>> {
    self.scopes[id].class.clone()
  }

  /// The nearest enclosing function descriptor, if any.
  #[must_use] pub fn enclosing_function(&self, mut id: ScopeId) -> Option<Rc<FuncDesc>> {
    loop {
      if let Some(f) = &self.scopes[id].func { return Some(f.clone()) }
      let up = self.scopes[id].parent;
      if up == id { return None }
      id = up
    }
  }

  /// Resolve a symbol reference.
  #[must_use] pub fn symbol(&self, r: SymbolRef) -> &Symbol {
    &self.scopes[r.scope].symbols[r.index as usize]
  }

  /// Mutable variant of [`symbol`](Self::symbol).
  pub fn symbol_mut(&mut self, r: SymbolRef) -> &mut Symbol {
    &mut self.scopes[r.scope].symbols[r.index as usize]
  }

  /// Set the initial member-offset cursor (used when a base class exists,
  /// so derived members are laid out after the base).
  pub fn set_start_offset(&mut self, id: ScopeId, offset: u32) {
    self.scopes[id].offset = offset
  }

  /// The total size in bytes of the data symbols in this scope.
  #[must_use] pub fn scope_size(&self, id: ScopeId) -> u32 { self.scopes[id].offset }

  /// Insert a symbol. Returns `None` when a conflicting (non-function)
  /// symbol already exists. If a function with an identical parameter
  /// signature exists, the existing entry is returned so a declaration can
  /// merge with a prior one; the caller is responsible for checking that
  /// the return types agree.
  pub fn add_symbol(&mut self, id: ScopeId, mut sym: Symbol) -> Option<SymbolRef> {
    if !sym.id.is_anon() && let Some(indices) = self.scopes[id].by_name.get(&sym.id) {
      let new_func = sym.ty.as_function().cloned();
      match new_func {
        None => return None,
        Some(f) => {
          for &index in indices {
            let old = &self.scopes[id].symbols[index as usize];
            let Some(g) = old.ty.as_function() else { return None };
            if f.same_signature(g, self) {
              return Some(SymbolRef { scope: id, index })
            }
          }
        }
      }
    }
    // data symbols claim the next slot in the layout
    if sym.ty.as_function().is_none()
      && !sym.attr.intersects(SymAttr::CONSTANT | SymAttr::STATIC) {
      let size = sym.ty.size(self);
      let scope = &mut self.scopes[id];
      sym.offset = scope.offset;
      scope.offset += size;
    }
    let scope = &mut self.scopes[id];
    let index = u32::try_from(scope.symbols.len()).expect("overflow");
    let name = sym.id;
    scope.symbols.push(sym);
    // unnamed symbols (anonymous parameters, the hidden `this`) are not
    // findable by name and may repeat
    if !name.is_anon() {
      scope.by_name.entry(name).or_default().push(index);
    }
    Some(SymbolRef { scope: id, index })
  }

  /// Register a class name. Fails on a conflicting redefinition.
  pub fn add_class(&mut self, id: ScopeId, name: Ident, desc: Rc<ClassDesc>) -> bool {
    match self.scopes[id].classes.entry(name) {
      hashbrown::hash_map::Entry::Occupied(_) => false,
      hashbrown::hash_map::Entry::Vacant(e) => { e.insert(desc); true }
    }
  }

  /// Register an enum name. Fails on a conflicting redefinition.
  pub fn add_enum(&mut self, id: ScopeId, name: Ident, desc: Rc<EnumDesc>) -> bool {
    match self.scopes[id].enums.entry(name) {
      hashbrown::hash_map::Entry::Occupied(_) => false,
      hashbrown::hash_map::Entry::Vacant(e) => { e.insert(desc); true }
    }
  }

  /// Register a typedef alias. Fails on a conflicting redefinition.
  pub fn add_typedef(&mut self, id: ScopeId, name: Ident, ty: Type) -> bool {
    match self.scopes[id].typedefs.entry(name) {
      hashbrown::hash_map::Entry::Occupied(_) => false,
      hashbrown::hash_map::Entry::Vacant(e) => { e.insert(ty); true }
    }
  }

  /// Look up a symbol. Unqualified lookups ascend the parent chain until a
  /// match is found or the root has been searched.
  #[must_use] pub fn query_symbol(&self, mut id: ScopeId, name: Ident, qualified: bool) -> SymbolSet {
    loop {
      if let Some(indices) = self.scopes[id].by_name.get(&name) {
        return SymbolSet { scope: id, indices: indices.iter().copied().collect() }
      }
      let up = self.scopes[id].parent;
      if qualified || up == id { return SymbolSet::default() }
      id = up
    }
  }

  /// Look up a class by name, with the same ascent rule.
  #[must_use] pub fn query_class(&self, mut id: ScopeId, name: Ident, qualified: bool)
    -> Option<Rc<ClassDesc>> {
    loop {
      if let Some(c) = self.scopes[id].classes.get(&name) { return Some(c.clone()) }
      let up = self.scopes[id].parent;
      if qualified || up == id { return None }
      id = up
    }
  }

  /// Look up an enum by name, with the same ascent rule.
  #[must_use] pub fn query_enum(&self, mut id: ScopeId, name: Ident, qualified: bool)
    -> Option<Rc<EnumDesc>> {
    loop {
      if let Some(e) = self.scopes[id].enums.get(&name) { return Some(e.clone()) }
      let up = self.scopes[id].parent;
      if qualified || up == id { return None }
      id = up
    }
  }

  /// Look up a typedef by name, with the same ascent rule.
  #[must_use] pub fn query_typedef(&self, mut id: ScopeId, name: Ident, qualified: bool)
    -> Option<Type> {
    loop {
      if let Some(t) = self.scopes[id].typedefs.get(&name) { return Some(t.clone()) }
      let up = self.scopes[id].parent;
      if qualified || up == id { return None }
      id = up
    }
  }

  /// The fully qualified dotted name of the scope, for diagnostics.
  #[must_use] pub fn scope_name(&self, id: ScopeId, intern: &Interner) -> String {
    let mut parts = vec![];
    let mut cur = id;
    loop {
      let scope = &self.scopes[cur];
      if let Some(c) = &scope.class {
        parts.push(c.name.borrow().clone())
      } else if let Some(f) = &scope.func {
        if let Some(sym) = f.def_symbol.get() {
          parts.push(intern.name(self.symbol(sym).id).to_owned())
        }
      }
      let up = scope.parent;
      if up == cur { break }
      cur = up
    }
    if parts.is_empty() { return "<global>".into() }
    parts.reverse();
    parts.join(".")
  }

  /// The data-member symbols of a scope in declared (offset) order, for
  /// aggregate layout. Functions, constants and statics do not occupy
  /// storage and are excluded.
  #[must_use] pub fn sorted_symbols(&self, id: ScopeId) -> Vec<SymbolRef> {
    let mut v = self.scopes[id].symbols.iter().enumerate()
      .filter(|(_, s)| s.ty.as_function().is_none()
        && !s.attr.intersects(SymAttr::CONSTANT | SymAttr::STATIC))
      .map(|(index, s)| (s.offset, SymbolRef { scope: id, index: index as u32 }))
      .collect::<Vec<_>>();
    v.sort_by_key(|&(offset, _)| offset);
    v.into_iter().map(|(_, r)| r).collect()
  }

  /// Assign backend field indices to the data members of a class scope,
  /// starting from `start` (1 when a base-class field occupies slot 0).
  pub fn assign_member_indices(&mut self, id: ScopeId, start: u32) {
    for (i, r) in self.sorted_symbols(id).into_iter().enumerate() {
      self.symbol_mut(r).index = start + u32::try_from(i).expect("overflow");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty::{CvQualifier, FundType, PtrDescriptor};

  fn int() -> Type { FundType::Int.into() }

  #[test]
  fn lookup_ascends_to_root() {
    let mut st = ScopeTree::default();
    let mut intern = Interner::default();
    let x = intern.intern("x");
    st.add_symbol(ScopeId::ROOT, Symbol::new(x, int(), SymAttr::empty())).expect("insert");
    let inner = st.new_scope(ScopeId::ROOT, None, None);
    assert_eq!(st.query_symbol(inner, x, false).len(), 1);
    assert!(st.query_symbol(inner, x, true).is_empty());
    // root is its own parent, so a missing name terminates
    let y = intern.intern("y");
    assert!(st.query_symbol(inner, y, false).is_empty());
  }

  #[test]
  fn lookup_is_stable() {
    // restarting a successful unqualified search at the same scope with
    // the returned symbol's identifier returns the same result set
    let mut st = ScopeTree::default();
    let mut intern = Interner::default();
    let f = intern.intern("f");
    let scope = st.new_scope(ScopeId::ROOT, None, None);
    st.add_symbol(scope, Symbol::new(f, int(), SymAttr::empty())).expect("insert");
    let first = st.query_symbol(scope, f, false);
    let sym = st.symbol(first.first().expect("found"));
    let again = st.query_symbol(scope, sym.id, false);
    assert_eq!(first.scope, again.scope);
    assert_eq!(first.indices, again.indices);
  }

  #[test]
  fn duplicate_nonfunction_rejected() {
    let mut st = ScopeTree::default();
    let mut intern = Interner::default();
    let x = intern.intern("x");
    assert!(st.add_symbol(ScopeId::ROOT, Symbol::new(x, int(), SymAttr::empty())).is_some());
    assert!(st.add_symbol(ScopeId::ROOT, Symbol::new(x, int(), SymAttr::empty())).is_none());
  }

  #[test]
  fn offsets_in_declaration_order() {
    let mut st = ScopeTree::default();
    let mut intern = Interner::default();
    let scope = st.new_scope(ScopeId::ROOT, None, None);
    st.set_start_offset(scope, 12);
    let a = st.add_symbol(scope, Symbol::new(intern.intern("a"), int(), SymAttr::empty()))
      .expect("insert");
    let b = st.add_symbol(scope,
      Symbol::new(intern.intern("b"), FundType::Double.into(), SymAttr::empty()))
      .expect("insert");
    assert_eq!(st.symbol(a).offset, 12);
    assert_eq!(st.symbol(b).offset, 16);
    assert_eq!(st.scope_size(scope), 24);
    assert_eq!(st.sorted_symbols(scope), vec![a, b]);
  }

  #[test]
  fn statics_and_constants_take_no_storage() {
    let mut st = ScopeTree::default();
    let mut intern = Interner::default();
    let scope = st.new_scope(ScopeId::ROOT, None, None);
    st.add_symbol(scope, Symbol::constant(intern.intern("RED"), int(), 0)).expect("insert");
    st.add_symbol(scope,
      Symbol::new(intern.intern("count"), int(), SymAttr::STATIC)).expect("insert");
    assert_eq!(st.scope_size(scope), 0);
    assert!(st.sorted_symbols(scope).is_empty());
  }

  fn mk_func(st: &mut ScopeTree, intern: &mut Interner, ret: Type, params: &[Type])
    -> Rc<FuncDesc> {
    let scope = st.new_scope(ScopeId::ROOT, None, None);
    let desc = FuncDesc::new(ret, scope);
    for (i, ty) in params.iter().enumerate() {
      let name = intern.intern(&format!("p{i}"));
      let sym = st.add_symbol(scope, Symbol::new(name, ty.clone(), SymAttr::empty()))
        .expect("param");
      desc.params.borrow_mut().push(crate::types::ty::Param {
        sym, has_default: false, default: None,
      });
    }
    desc
  }

  #[test]
  fn overloads_with_distinct_signatures() {
    let mut st = ScopeTree::default();
    let mut intern = Interner::default();
    let f = intern.intern("f");

    // int f(int)
    let d1 = mk_func(&mut st, &mut intern, int(), &[int()]);
    let r1 = st.add_symbol(ScopeId::ROOT,
      Symbol::new(f, Type::function(d1, CvQualifier::None), SymAttr::empty()));
    assert!(r1.is_some());

    // int f(int*): distinct signature, inserted as an overload
    let d2 = mk_func(&mut st, &mut intern, int(), &[int().add_ptr(PtrDescriptor::PTR)]);
    let r2 = st.add_symbol(ScopeId::ROOT,
      Symbol::new(f, Type::function(d2, CvQualifier::None), SymAttr::empty()));
    assert!(r2.is_some());
    assert_ne!(r1, r2);
    assert_eq!(st.query_symbol(ScopeId::ROOT, f, false).len(), 2);

    // float f(int): same signature as the first, returns the merged entry
    let d3 = mk_func(&mut st, &mut intern, FundType::Float.into(), &[int()]);
    let r3 = st.add_symbol(ScopeId::ROOT,
      Symbol::new(f, Type::function(d3, CvQualifier::None), SymAttr::empty()));
    assert_eq!(r3, r1);
  }
}
