//! The identifier interner. Every name that flows through the analyzer is
//! represented as an [`Ident`], a small copyable key into the session's
//! string table. The interner is owned by the [`Compiler`](crate::Compiler)
//! session; there is no process-global state.

use hashbrown::HashMap;
use std::fmt;

crate::mk_id! {
  /// An interned identifier. Use [`Interner::name`] to get the string back.
  Ident("i"),
}

/// The session string table. Maps identifier strings to [`Ident`] keys and
/// back; interning the same string twice returns the same key.
#[derive(Debug)]
pub struct Interner {
  names: Vec<Box<str>>,
  map: HashMap<Box<str>, Ident>,
}

impl Default for Interner {
  fn default() -> Self {
    let mut i = Self { names: vec![], map: HashMap::new() };
    // Ident(0) is always the empty name, used for anonymous parameters.
    let anon = i.intern("");
    debug_assert!(anon == Ident::ANON);
    i
  }
}

impl Ident {
  /// The empty identifier, used for unnamed parameters (including the
  /// hidden `this` parameter of member functions).
  pub const ANON: Self = Self(0);

  /// Is this the anonymous identifier?
  #[must_use] pub fn is_anon(self) -> bool { self == Self::ANON }
}

impl Interner {
  /// Intern a string, returning its key.
  pub fn intern(&mut self, s: &str) -> Ident {
    if let Some(&id) = self.map.get(s) { return id }
    let id = Ident(self.names.len().try_into().expect("overflow"));
    self.names.push(s.into());
    self.map.insert(s.into(), id);
    id
  }

  /// Get the string for a previously interned key.
  #[must_use] pub fn name(&self, id: Ident) -> &str { &self.names[id.0 as usize] }

  /// A displayable wrapper for an identifier.
  #[must_use] pub fn display(&self, id: Ident) -> impl fmt::Display + '_ { self.name(id) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intern_roundtrip() {
    let mut i = Interner::default();
    let a = i.intern("fibo");
    let b = i.intern("main");
    assert_ne!(a, b);
    assert_eq!(i.intern("fibo"), a);
    assert_eq!(i.name(a), "fibo");
    assert_eq!(i.name(b), "main");
  }

  #[test]
  fn anon_is_preinterned() {
    let mut i = Interner::default();
    assert_eq!(i.intern(""), Ident::ANON);
    assert!(Ident::ANON.is_anon());
  }
}
