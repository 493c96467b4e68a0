//! The semantic type system: fundamental types, cv qualification, pointer /
//! reference / array modifiers, and the reference-counted class, enum and
//! function descriptors that types can mention.
//!
//! A [`Type`] is the record described by the data model: a kind, a cv
//! qualifier, an ordered pointer-descriptor list (outermost last, so a
//! reference can only be the final entry) and an ordered array-descriptor
//! list. Class/enum/function descriptors are shared `Rc` handles because
//! types from any scope may reference them; the scope tree itself holds no
//! owning references back (see [`crate::scope`]).

use std::cell::{Cell, RefCell};
use std::fmt::{self, Display};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::constant::Constant;
use crate::scope::{ScopeId, ScopeTree, SymbolRef};

/// Size of a pointer (and reference) in bytes.
pub const POINTER_SIZE: u32 = 8;

/// The fundamental (built-in) types. The discriminant order doubles as the
/// conversion rank used by the usual arithmetic conversions.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone)]
pub enum FundType {
  /// `void`
  Void,
  /// `bool`
  Bool,
  /// `char`
  Char,
  /// `unsigned char`
  UChar,
  /// `short`
  Short,
  /// `unsigned short`
  UShort,
  /// `int`
  Int,
  /// `unsigned int`
  UInt,
  /// `long`
  Long,
  /// `unsigned long`
  ULong,
  /// `float`
  Float,
  /// `double`
  Double,
}

const FUND_TYPE_SIZE: [u32; 12] = [0, 1, 1, 1, 2, 2, 4, 4, 8, 8, 4, 8];

impl FundType {
  /// The size of a value of this type in bytes.
  #[must_use] pub fn size(self) -> u32 { FUND_TYPE_SIZE[self as usize] }

  /// Is this `float` or `double`?
  #[must_use] pub fn is_floating(self) -> bool { matches!(self, Self::Float | Self::Double) }

  /// Is this an integral type (including `bool` and the chars)?
  #[must_use] pub fn is_integral(self) -> bool {
    !matches!(self, Self::Void | Self::Float | Self::Double)
  }

  /// Is this a signed type, for the purpose of choosing signed or unsigned
  /// division, shift and comparison opcodes?
  #[must_use] pub fn is_signed(self) -> bool {
    matches!(self, Self::Bool | Self::Char | Self::Short | Self::Int | Self::Long)
  }

  /// The integer-promoted kind: everything below `int` promotes to `int`.
  #[must_use] pub fn promote(self) -> Self { if self < Self::Int { Self::Int } else { self } }

  /// The name of the type, as it appears in diagnostics.
  #[must_use] pub fn name(self) -> &'static str {
    match self {
      Self::Void => "void",
      Self::Bool => "bool",
      Self::Char => "char",
      Self::UChar => "unsigned char",
      Self::Short => "short",
      Self::UShort => "unsigned short",
      Self::Int => "int",
      Self::UInt => "unsigned int",
      Self::Long => "long",
      Self::ULong => "unsigned long",
      Self::Float => "float",
      Self::Double => "double",
    }
  }
}

/// The cv qualification of a type. Only `const` is supported.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum CvQualifier {
  /// Unqualified.
  #[default] None,
  /// `const`-qualified.
  Const,
}

/// Member access levels. `Default` resolves to public in a `struct` and
/// private in a `class` before analysis sees it.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum Access {
  /// No explicit access specifier.
  #[default] Default,
  /// `public`
  Public,
  /// `protected`
  Protected,
  /// `private`
  Private,
}

/// One pointer-like modifier layer on a type.
#[derive(Debug, Clone)]
pub enum PtrKind {
  /// A plain pointer, `T *`.
  Plain,
  /// A reference, `T &`. Only valid as the outermost descriptor, and this
  /// is also how lvalue-ness is encoded on expression results.
  Reference,
  /// A pointer to member of the given class, `T C::*`.
  Member(Rc<ClassDesc>),
}

impl PartialEq for PtrKind {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Plain, Self::Plain) | (Self::Reference, Self::Reference) => true,
      (Self::Member(a), Self::Member(b)) => Rc::ptr_eq(a, b),
      _ => false,
    }
  }
}

/// A pointer descriptor: the kind of indirection plus the constness of the
/// pointer itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PtrDescriptor {
  /// Pointer, reference or member pointer.
  pub kind: PtrKind,
  /// Constness of the pointer (not the pointee).
  pub cv: CvQualifier,
}

impl PtrDescriptor {
  /// A plain unqualified pointer.
  pub const PTR: Self = Self { kind: PtrKind::Plain, cv: CvQualifier::None };
  /// A reference.
  pub const REF: Self = Self { kind: PtrKind::Reference, cv: CvQualifier::None };
}

/// An array descriptor: the element count, plus pointer descriptors that
/// apply to the element after indexing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayDescriptor {
  /// The number of elements. Zero-sized arrays decay to pointers before a
  /// descriptor is ever recorded, so this is positive in practice.
  pub size: u32,
  /// Trailing pointer descriptors applied after indexing.
  pub ptrs: SmallVec<[PtrDescriptor; 1]>,
}

/// The base kind of a [`Type`], before pointer/array modifiers.
#[derive(Debug, Clone)]
pub enum TypeKind {
  /// A fundamental type.
  Fund(FundType),
  /// An enumeration type. Enum values decay to `int` in arithmetic.
  Enum(Rc<EnumDesc>),
  /// A class type.
  Class(Rc<ClassDesc>),
  /// A function type.
  Func(Rc<FuncDesc>),
}

impl PartialEq for TypeKind {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Fund(a), Self::Fund(b)) => a == b,
      (Self::Enum(a), Self::Enum(b)) => Rc::ptr_eq(a, b),
      (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
      (Self::Func(a), Self::Func(b)) => Rc::ptr_eq(a, b),
      _ => false,
    }
  }
}

/// A semantic type.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
  /// The underlying kind.
  pub kind: TypeKind,
  /// The cv qualifier of the innermost (pointee) type.
  pub cv: CvQualifier,
  /// Pointer descriptors, outermost last.
  pub ptrs: SmallVec<[PtrDescriptor; 2]>,
  /// Array descriptors, in source order (`a[2][3]` stores 2 then 3).
  pub arrays: SmallVec<[ArrayDescriptor; 1]>,
}

impl From<FundType> for Type {
  fn from(ft: FundType) -> Self {
    Self { kind: TypeKind::Fund(ft), cv: CvQualifier::None, ptrs: SmallVec::new(), arrays: SmallVec::new() }
  }
}

impl Default for Type {
  fn default() -> Self { Self::void() }
}

impl Type {
  /// The `void` type.
  #[must_use] pub fn void() -> Self { FundType::Void.into() }

  /// A fundamental type with a cv qualifier.
  #[must_use] pub fn fund(ft: FundType, cv: CvQualifier) -> Self {
    Self { cv, ..ft.into() }
  }

  /// A simple class type.
  #[must_use] pub fn class(desc: Rc<ClassDesc>) -> Self {
    Self { kind: TypeKind::Class(desc), cv: CvQualifier::None, ptrs: SmallVec::new(), arrays: SmallVec::new() }
  }

  /// A simple enum type.
  #[must_use] pub fn enumeration(desc: Rc<EnumDesc>) -> Self {
    Self { kind: TypeKind::Enum(desc), cv: CvQualifier::None, ptrs: SmallVec::new(), arrays: SmallVec::new() }
  }

  /// A function type. The cv qualifier records member-function constness.
  #[must_use] pub fn function(desc: Rc<FuncDesc>, cv: CvQualifier) -> Self {
    Self { kind: TypeKind::Func(desc), cv, ptrs: SmallVec::new(), arrays: SmallVec::new() }
  }

  /// Is this exactly a fundamental type, with no modifiers?
  #[must_use] pub fn as_fund(&self) -> Option<FundType> {
    if self.ptrs.is_empty() && self.arrays.is_empty() {
      if let TypeKind::Fund(ft) = self.kind { return Some(ft) }
    }
    None
  }

  /// Is this exactly the given fundamental type?
  #[must_use] pub fn is_fund(&self, ft: FundType) -> bool { self.as_fund() == Some(ft) }

  /// Is this a simple (unmodified) class type? Returns the descriptor.
  #[must_use] pub fn as_class(&self) -> Option<&Rc<ClassDesc>> {
    if self.ptrs.is_empty() && self.arrays.is_empty() {
      if let TypeKind::Class(desc) = &self.kind { return Some(desc) }
    }
    None
  }

  /// Is this a simple (unmodified) enum type? Returns the descriptor.
  #[must_use] pub fn as_enum(&self) -> Option<&Rc<EnumDesc>> {
    if self.ptrs.is_empty() && self.arrays.is_empty() {
      if let TypeKind::Enum(desc) = &self.kind { return Some(desc) }
    }
    None
  }

  /// Is this a simple (unmodified) function type? Returns the descriptor.
  #[must_use] pub fn as_function(&self) -> Option<&Rc<FuncDesc>> {
    if self.ptrs.is_empty() && self.arrays.is_empty() {
      if let TypeKind::Func(desc) = &self.kind { return Some(desc) }
    }
    None
  }

  /// Is this a scalar (fundamental non-void or enum) with no modifiers?
  #[must_use] pub fn is_scalar(&self) -> bool {
    self.as_enum().is_some() || self.as_fund().is_some_and(|ft| ft != FundType::Void)
  }

  /// Is the outermost descriptor a reference? This is the lvalue marker on
  /// expression results.
  #[must_use] pub fn is_ref(&self) -> bool {
    matches!(self.ptrs.last(), Some(PtrDescriptor { kind: PtrKind::Reference, .. }))
  }

  /// Remove an outermost reference, if present.
  #[must_use] pub fn remove_ref(mut self) -> Self {
    if self.is_ref() { self.ptrs.pop(); }
    self
  }

  /// Is this a (non-reference) array type?
  #[must_use] pub fn is_array(&self) -> bool { !self.arrays.is_empty() && !self.is_ref() }

  /// Is this a plain pointer (not reference, not member pointer, not array)?
  #[must_use] pub fn is_ptr(&self) -> bool {
    self.arrays.is_empty()
      && matches!(self.ptrs.last(), Some(PtrDescriptor { kind: PtrKind::Plain, .. }))
  }

  /// Is this a member pointer?
  #[must_use] pub fn is_member_ptr(&self) -> bool {
    self.arrays.is_empty()
      && matches!(self.ptrs.last(), Some(PtrDescriptor { kind: PtrKind::Member(_), .. }))
  }

  /// The class a member pointer belongs to.
  #[must_use] pub fn member_ptr_class(&self) -> Option<Rc<ClassDesc>> {
    match self.ptrs.last() {
      Some(PtrDescriptor { kind: PtrKind::Member(c), .. }) if self.arrays.is_empty() =>
        Some(c.clone()),
      _ => None,
    }
  }

  /// Remove the outermost pointer or member pointer descriptor.
  #[must_use] pub fn remove_ptr(mut self) -> Self {
    if self.arrays.is_empty() { self.ptrs.pop(); }
    self
  }

  /// Push a pointer descriptor as the new outermost layer.
  #[must_use] pub fn add_ptr(mut self, desc: PtrDescriptor) -> Self {
    self.ptrs.push(desc);
    self
  }

  /// The element type after one subscript. The first array descriptor is
  /// consumed; its trailing pointer descriptors transfer to the element.
  #[must_use] pub fn element_type(mut self) -> Self {
    if self.arrays.is_empty() { return self.remove_ptr() }
    let desc = self.arrays.remove(0);
    self.ptrs.extend(desc.ptrs);
    self
  }

  /// The element count of the first array dimension.
  #[must_use] pub fn array_size(&self) -> u32 { self.arrays.first().map_or(0, |a| a.size) }

  /// Decay: remove a single outermost reference, then array to pointer and
  /// function to pointer.
  #[must_use] pub fn decay(self) -> Self {
    self.remove_ref().param_decay()
  }

  /// The declared-type part of decay: array to pointer and function to
  /// pointer, references untouched. This is the adjustment applied to
  /// parameter types.
  #[must_use] pub fn param_decay(self) -> Self {
    if self.is_array() {
      self.element_type().add_ptr(PtrDescriptor::PTR)
    } else if self.as_function().is_some() {
      self.add_ptr(PtrDescriptor::PTR)
    } else {
      self
    }
  }

  /// Is the type complete, i.e. usable as a value? Only a forward-declared
  /// class used without indirection is incomplete.
  #[must_use] pub fn is_complete(&self) -> bool {
    if !self.ptrs.is_empty() { return true }
    match &self.kind {
      TypeKind::Class(desc) => desc.members.get().is_some(),
      _ => true,
    }
  }

  /// Does a const-qualified initialization apply, i.e. must this variable
  /// be initialized at its declaration?
  #[must_use] pub fn is_const_init(&self) -> bool {
    match self.ptrs.last() {
      Some(p) => p.cv == CvQualifier::Const,
      None => self.cv == CvQualifier::Const,
    }
  }

  /// The size of a value of this type in bytes.
  #[must_use] pub fn size(&self, st: &ScopeTree) -> u32 {
    let mut size = if self.ptrs.is_empty() {
      match &self.kind {
        TypeKind::Fund(ft) => ft.size(),
        TypeKind::Enum(_) => FundType::Int.size(),
        TypeKind::Class(desc) => desc.members.get().map_or(0, |sc| st.scope_size(sc)),
        TypeKind::Func(_) => 0,
      }
    } else {
      POINTER_SIZE
    };
    for a in self.arrays.iter().rev() {
      if !a.ptrs.is_empty() { size = POINTER_SIZE }
      size *= a.size;
    }
    size
  }

  /// The alignment of a value of this type in bytes.
  #[must_use] pub fn alignment(&self, st: &ScopeTree) -> u32 {
    if !self.ptrs.is_empty() || self.arrays.iter().any(|a| !a.ptrs.is_empty()) {
      return POINTER_SIZE
    }
    match &self.kind {
      TypeKind::Fund(ft) => ft.size().max(1),
      TypeKind::Enum(_) => FundType::Int.size(),
      TypeKind::Class(desc) => desc.members.get().map_or(1, |sc| {
        st.sorted_symbols(sc).iter()
          .map(|&r| st.symbol(r).ty.alignment(st))
          .max().unwrap_or(1)
      }),
      TypeKind::Func(_) => 1,
    }
  }

  /// The usual arithmetic conversions applied to a pair of scalar types:
  /// enums and small integers promote to `int`, then the higher-ranked
  /// type wins, with floating types dominating.
  #[must_use] pub fn arithmetic_convert(&self, other: &Self) -> Self {
    let pa = self.promoted_fund();
    let pb = other.promoted_fund();
    pa.max(pb).into()
  }

  fn promoted_fund(&self) -> FundType {
    match self.as_fund() {
      Some(ft) => ft.promote(),
      // enums participate as int; non-scalars never reach here meaningfully
      None => FundType::Int,
    }
  }

  /// Whether an implicit conversion from `self` to `dst` is legal. `konst`
  /// supplies the folded value of the source expression when there is one,
  /// which enables the literal-zero-to-pointer conversions.
  #[must_use] pub fn is_convertible_to(&self, dst: &Self, konst: Option<&Constant>) -> bool {
    if self == dst { return true }

    let mut src = self.clone();

    // Reference-to-reference binding: underlying types must agree and
    // constness may only be added, never dropped.
    if src.is_ref() && dst.is_ref() {
      let (s, d) = (src.clone().remove_ref(), dst.clone().remove_ref());
      if s.cv == CvQualifier::Const && d.cv != CvQualifier::Const { return false }
      let mut s2 = s;
      s2.cv = d.cv;
      return s2 == d
    }

    // Lvalue to rvalue: load the referenced value. Functions and arrays
    // are excluded (they convert to pointers instead).
    if src.is_ref() && !dst.is_ref() {
      let inner = src.clone().remove_ref();
      if !(inner.as_function().is_some() || inner.is_array()) {
        src = inner;
        if src.as_class().is_none() { src.cv = CvQualifier::None }
        if src == *dst { return true }
      } else {
        src = inner
      }
    }

    // Array-to-pointer decay.
    if src.is_array() && dst.is_ptr() {
      let decayed = src.clone().element_type().add_ptr(PtrDescriptor::PTR);
      return pointee_compatible(&decayed, dst)
    }

    // Function to pointer (or member pointer for non-static members).
    if let Some(desc) = src.as_function() {
      if dst.is_ptr() || dst.is_member_ptr() {
        let elem = dst.clone().remove_ptr();
        return elem.as_function().is_some_and(|d| Rc::ptr_eq(desc, d))
      }
      return false
    }

    // Rvalue to const lvalue: materialize a temporary of the exact type.
    if !src.is_ref() && dst.is_ref() {
      if dst.clone().remove_ref().cv != CvQualifier::Const { return false }
      if src.as_function().is_some() { return false }
      let mut s2 = src;
      s2.cv = CvQualifier::Const;
      return s2.add_ptr(dst.ptrs.last().expect("reference").clone()) == *dst
    }

    // Pointer conversions.
    if dst.is_ptr() {
      if src.as_fund().is_some_and(FundType::is_integral)
        && konst.is_some_and(|c| c.is_zero()) {
        return true
      }
      if src.is_ptr() {
        let (se, de) = (src.clone().remove_ptr(), dst.clone().remove_ptr());
        if de.is_fund(FundType::Void) { return cv_le(se.cv, de.cv) }
        if_chain::if_chain! {
          if let Some(sc) = se.as_class();
          if let Some(dc) = de.as_class();
          if derives_from(sc, dc);
          then { return cv_le(se.cv, de.cv) }
        }
        return pointee_compatible(&src, dst)
      }
      return false
    }

    // Member pointer conversions: literal zero, and base-member-pointer to
    // derived-member-pointer.
    if dst.is_member_ptr() {
      if src.as_fund().is_some_and(FundType::is_integral)
        && konst.is_some_and(|c| c.is_zero()) {
        return true
      }
      if_chain::if_chain! {
        if let Some(sc) = src.member_ptr_class();
        if let Some(dc) = dst.member_ptr_class();
        if src.clone().remove_ptr() == dst.clone().remove_ptr();
        if derives_from(&dc, &sc);
        then { return true }
      }
      return false
    }

    // Bool conversion accepts any scalar, including pointers.
    if dst.is_fund(FundType::Bool) && (src.is_ptr() || src.is_scalar()) { return true }

    // Numeric conversions (widening and narrowing); enums participate as
    // int. Enum targets accept only their own enum.
    match dst.as_fund() {
      Some(FundType::Void) | None => {}
      Some(_) => {
        if src.as_fund().is_some_and(|ft| ft != FundType::Void) { return true }
        if src.as_enum().is_some() { return true }
      }
    }
    if_chain::if_chain! {
      if let Some(sd) = src.as_enum();
      if let Some(dd) = dst.as_enum();
      then { return Rc::ptr_eq(sd, dd) }
    }

    false
  }

  /// A displayable rendering of the type, in C++ surface syntax.
  #[must_use] pub fn display(&self) -> TypeName<'_> { TypeName(self) }
}

fn cv_le(a: CvQualifier, b: CvQualifier) -> bool {
  !(a == CvQualifier::Const && b == CvQualifier::None)
}

/// Compare two pointer types, allowing `dst` to add (but not drop) const
/// on the pointee.
fn pointee_compatible(src: &Type, dst: &Type) -> bool {
  let (se, de) = (src.clone().remove_ptr(), dst.clone().remove_ptr());
  if !cv_le(se.cv, de.cv) { return false }
  let mut s2 = se;
  s2.cv = de.cv;
  s2 == de
}

/// Does `derived` have `base` on its (transitive) base-class chain?
#[must_use] pub fn derives_from(derived: &Rc<ClassDesc>, base: &Rc<ClassDesc>) -> bool {
  if Rc::ptr_eq(derived, base) { return true }
  let mut cur = derived.clone();
  loop {
    let next = match &*cur.base.borrow() {
      Some(b) => b.desc.clone(),
      None => return false,
    };
    if Rc::ptr_eq(&next, base) { return true }
    cur = next;
  }
}

/// An enumeration descriptor.
#[derive(Debug)]
pub struct EnumDesc {
  /// The enum's name, or `<anonymous enum>`.
  pub name: String,
}

/// The base class of a class, with its inheritance access level.
#[derive(Debug, Clone)]
pub struct BaseClass {
  /// The base class descriptor.
  pub desc: Rc<ClassDesc>,
  /// The access level of the inheritance.
  pub access: Access,
}

/// A class descriptor. Forward declarations have no member scope; the
/// scope is attached when the class body is analyzed.
#[derive(Debug, Default)]
pub struct ClassDesc {
  /// The class's name. Anonymous classes get `<anonymous class>` or
  /// `<anonymous struct>`, and are renamed by a later typedef.
  pub name: RefCell<String>,
  /// The member scope, present once the class is defined.
  pub members: Cell<Option<ScopeId>>,
  /// The single base class, if any.
  pub base: RefCell<Option<BaseClass>>,
  /// Classes that this class has been declared a friend of.
  pub friend_to: RefCell<Vec<Rc<ClassDesc>>>,
}

impl ClassDesc {
  /// Create a named (or anonymous-named) forward declaration.
  #[must_use] pub fn new(name: String) -> Rc<Self> {
    Rc::new(Self { name: RefCell::new(name), ..Self::default() })
  }
}

/// A parameter of a function descriptor.
#[derive(Debug, Clone)]
pub struct Param {
  /// The parameter symbol, in the function's parameter scope.
  pub sym: SymbolRef,
  /// Whether a default argument was declared.
  pub has_default: bool,
  /// The folded default argument, when it was a constant expression.
  pub default: Option<Constant>,
}

/// A function descriptor: the signature and identity of one function.
/// Each descriptor links to exactly one symbol in a symbol table once the
/// declaration has been entered.
#[derive(Debug)]
pub struct FuncDesc {
  /// The return type.
  pub ret: Type,
  /// The parameter scope, enclosing the function body.
  pub scope: ScopeId,
  /// The parameters in declaration order. For a non-static member function
  /// the hidden `this` parameter is at index 0.
  pub params: RefCell<Vec<Param>>,
  /// Whether a body has been attached (definitions vs. declarations).
  pub has_body: Cell<bool>,
  /// The class this function is a friend of, if declared `friend`.
  pub friend_of: RefCell<Option<Rc<ClassDesc>>>,
  /// The symbol this descriptor defines, set at declaration time.
  pub def_symbol: Cell<Option<SymbolRef>>,
}

impl FuncDesc {
  /// Create a descriptor with the given return type and parameter scope.
  #[must_use] pub fn new(ret: Type, scope: ScopeId) -> Rc<Self> {
    Rc::new(Self {
      ret, scope,
      params: RefCell::new(vec![]),
      has_body: Cell::new(false),
      friend_of: RefCell::new(None),
      def_symbol: Cell::new(None),
    })
  }

  /// Is this a class member (its scope is nested in a class scope)?
  #[must_use] pub fn is_member(&self, st: &ScopeTree) -> bool {
    st.enclosing_class(st.parent(self.scope)).is_some()
  }

  /// Is this a non-static class member (so it has a hidden `this`)?
  #[must_use] pub fn is_non_static_member(&self, st: &ScopeTree) -> bool {
    self.is_member(st) && self.def_symbol.get()
      .is_none_or(|r| !st.symbol(r).attr.contains(crate::scope::SymAttr::STATIC))
  }

  /// Do two descriptors have the same parameter type sequence? Used for
  /// overload identity.
  #[must_use] pub fn same_signature(&self, other: &Self, st: &ScopeTree) -> bool {
    let (pa, pb) = (self.params.borrow(), other.params.borrow());
    pa.len() == pb.len()
      && itertools::zip_eq(&*pa, &*pb).all(|(a, b)| st.symbol(a.sym).ty == st.symbol(b.sym).ty)
  }
}

/// Rendering of a [`Type`] in C++ surface syntax, for diagnostics.
pub struct TypeName<'a>(&'a Type);

impl Display for TypeName<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let t = self.0;
    if t.cv == CvQualifier::Const { write!(f, "const ")? }
    match &t.kind {
      TypeKind::Fund(ft) => write!(f, "{}", ft.name())?,
      TypeKind::Enum(desc) => write!(f, "{}", desc.name)?,
      TypeKind::Class(desc) => write!(f, "{}", desc.name.borrow())?,
      TypeKind::Func(_) => write!(f, "<function>")?,
    }
    for p in &t.ptrs {
      match &p.kind {
        PtrKind::Plain => write!(f, " *")?,
        PtrKind::Reference => write!(f, " &")?,
        PtrKind::Member(c) => write!(f, " {}::*", c.name.borrow())?,
      }
      if p.cv == CvQualifier::Const { write!(f, " const")? }
    }
    for a in &t.arrays {
      write!(f, " [{}]", a.size)?
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn int() -> Type { FundType::Int.into() }
  fn double() -> Type { FundType::Double.into() }

  #[test]
  fn equals_is_an_equivalence() {
    let a: Type = int();
    let b = int();
    let c = int();
    // reflexive, symmetric, transitive on representative samples
    assert_eq!(a, a);
    assert_eq!(a == b, b == a);
    assert!(a == b && b == c && a == c);
    let p = int().add_ptr(PtrDescriptor::PTR);
    assert_ne!(a, p);
    let d1 = ClassDesc::new("A".into());
    let d2 = ClassDesc::new("A".into());
    // same name, distinct descriptors: not equal
    assert_ne!(Type::class(d1.clone()), Type::class(d2));
    assert_eq!(Type::class(d1.clone()), Type::class(d1));
  }

  #[test]
  fn numeric_conversions_allow_narrowing() {
    assert!(double().is_convertible_to(&int(), None));
    assert!(int().is_convertible_to(&double(), None));
    assert!(int().is_convertible_to(&FundType::Bool.into(), None));
    assert!(!Type::void().is_convertible_to(&int(), None));
  }

  #[test]
  fn lvalue_to_rvalue() {
    let iref = int().add_ptr(PtrDescriptor::REF);
    assert!(iref.is_convertible_to(&int(), None));
    // const int& -> int is a copy, allowed
    let mut ciref = Type::fund(FundType::Int, CvQualifier::Const);
    ciref = ciref.add_ptr(PtrDescriptor::REF);
    assert!(ciref.is_convertible_to(&int(), None));
    // const int& -> int& drops const, rejected
    assert!(!ciref.is_convertible_to(&int().add_ptr(PtrDescriptor::REF), None));
  }

  #[test]
  fn rvalue_to_const_ref() {
    let mut cref = Type::fund(FundType::Int, CvQualifier::Const);
    cref = cref.add_ptr(PtrDescriptor::REF);
    assert!(int().is_convertible_to(&cref, None));
    assert!(!int().is_convertible_to(&int().add_ptr(PtrDescriptor::REF), None));
  }

  #[test]
  fn array_decays_to_pointer() {
    let mut arr = int();
    arr.arrays.push(ArrayDescriptor { size: 5, ptrs: SmallVec::new() });
    let ptr = int().add_ptr(PtrDescriptor::PTR);
    assert!(arr.is_convertible_to(&ptr, None));
    assert_eq!(arr.decay(), ptr);
  }

  #[test]
  fn pointer_conversions() {
    let ip = int().add_ptr(PtrDescriptor::PTR);
    let vp = Type::void().add_ptr(PtrDescriptor::PTR);
    assert!(ip.is_convertible_to(&vp, None));
    assert!(!vp.is_convertible_to(&ip, None));
    // literal 0 to pointer
    assert!(int().is_convertible_to(&ip, Some(&Constant::Int(0))));
    assert!(!int().is_convertible_to(&ip, Some(&Constant::Int(1))));
    assert!(!int().is_convertible_to(&ip, None));
    // pointer to bool
    assert!(ip.is_convertible_to(&FundType::Bool.into(), None));
  }

  #[test]
  fn derived_to_base_pointer() {
    let base = ClassDesc::new("B".into());
    let derived = ClassDesc::new("D".into());
    *derived.base.borrow_mut() = Some(BaseClass { desc: base.clone(), access: Access::Public });
    let dp = Type::class(derived).add_ptr(PtrDescriptor::PTR);
    let bp = Type::class(base).add_ptr(PtrDescriptor::PTR);
    assert!(dp.is_convertible_to(&bp, None));
    assert!(!bp.is_convertible_to(&dp, None));
  }

  #[test]
  fn decayed_types_stay_convertible() {
    // property: for convertible (S, D), decay(S) converts to decay(D)
    let samples = [
      (int().add_ptr(PtrDescriptor::REF), int()),
      (double(), int()),
      (int(), double()),
    ];
    for (s, d) in samples {
      assert!(s.is_convertible_to(&d, None));
      assert!(s.clone().decay().is_convertible_to(&d.decay(), None), "{s:?}");
    }
  }

  #[test]
  fn arithmetic_conversions() {
    assert_eq!(int().arithmetic_convert(&double()), double());
    assert_eq!(Type::from(FundType::Char).arithmetic_convert(&int()), int());
    assert_eq!(Type::from(FundType::UInt).arithmetic_convert(&int()),
      Type::from(FundType::UInt));
    assert_eq!(Type::from(FundType::Long).arithmetic_convert(&Type::from(FundType::UInt)),
      Type::from(FundType::Long));
  }

  #[test]
  fn display_renders_cpp_syntax() {
    assert_eq!(int().display().to_string(), "int");
    assert_eq!(Type::fund(FundType::Int, CvQualifier::Const).display().to_string(), "const int");
    assert_eq!(int().add_ptr(PtrDescriptor::PTR).add_ptr(PtrDescriptor::PTR)
      .display().to_string(), "int * *");
    let mut arr = Type::fund(FundType::Char, CvQualifier::Const);
    arr.arrays.push(ArrayDescriptor { size: 6, ptrs: SmallVec::new() });
    assert_eq!(arr.display().to_string(), "const char [6]");
  }
}
