//! The typed IR module produced by the analyzer.
//!
//! This is the external interface to the backend: a list of globals and
//! functions, where each function body is a set of basic blocks in emission
//! order, each ending in exactly one terminator. Instructions are held in a
//! per-function arena and referenced by [`InstId`]; operands are either
//! instruction results, arguments, globals, functions, or typed constants.
//!
//! The [`Display`] impl renders the module in an LLVM-flavored text syntax,
//! which the tests use to check emitted shapes.

use hashbrown::HashMap;
use std::fmt::{self, Display};

use crate::types::IdxVec;

crate::mk_id! {
  /// An index into the module's backend type arena.
  TyId("T"),
  /// An index into the module's global list.
  GlobalId("g"),
  /// An index into the module's function list.
  FuncId("f"),
  /// An index into a function's basic-block list.
  BlockId("bb"),
  /// An index into a function's instruction arena.
  InstId("%"),
}

/// A backend type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TyKind {
  /// The void type (function returns only).
  Void,
  /// An integer type of the given bit width (bool is `i1`).
  Int(u8),
  /// A 32-bit float.
  Float,
  /// A 64-bit float.
  Double,
  /// A pointer to the given type.
  Ptr(TyId),
  /// An array of `N` elements.
  Array(TyId, u32),
  /// A named struct type. The body is filled in after the class's first
  /// pass completes.
  Struct {
    /// The struct's name (the class's qualified name).
    name: String,
    /// The field types.
    fields: Vec<TyId>,
  },
  /// A function type.
  Func {
    /// The return type.
    ret: TyId,
    /// The parameter types.
    params: Vec<TyId>,
  },
}

/// Linkage of a global or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Linkage {
  /// Visible outside the translation unit.
  #[default] External,
  /// Local to the translation unit (`static`).
  Internal,
}

/// A typed constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
  /// An integer constant of the given bit width.
  Int {
    /// The bit width (1 for bool).
    bits: u8,
    /// The value, sign-extended to 64 bits.
    value: i64,
  },
  /// A floating constant.
  Float {
    /// False for `float`, true for `double`.
    is_double: bool,
    /// The value.
    value: f64,
  },
  /// The null pointer of the given pointer type.
  Null(TyId),
  /// The zero initializer of the given (aggregate) type.
  Zero(TyId),
  /// A byte-array constant (string literals, NUL terminator included).
  Bytes(Box<[u8]>),
  /// A constant array aggregate (global array initializers).
  Array(Vec<ConstValue>),
}

/// A reference to a non-constant value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRef {
  /// The result of an instruction in the current function.
  Inst(InstId),
  /// A function argument, by position.
  Arg(u32),
  /// The address of a global.
  Global(GlobalId),
  /// A function address.
  Func(FuncId),
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
  /// A constant.
  Const(ConstValue),
  /// A value reference.
  Ref(ValueRef),
}

impl From<ValueRef> for Operand {
  fn from(r: ValueRef) -> Self { Self::Ref(r) }
}

impl From<ConstValue> for Operand {
  fn from(c: ConstValue) -> Self { Self::Const(c) }
}

impl From<InstId> for Operand {
  fn from(i: InstId) -> Self { Self::Ref(ValueRef::Inst(i)) }
}

/// Integer binary opcodes, with signed and unsigned variants where the
/// distinction matters, plus the float opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Binop {
  Add, Sub, Mul, SDiv, UDiv, SRem, URem,
  Shl, AShr, LShr, And, Or, Xor,
  FAdd, FSub, FMul, FDiv,
}

/// Unary opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Unop {
  Neg, FNeg, Not,
}

/// Integer comparison conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum IntCC {
  Eq, Ne, Slt, Sle, Sgt, Sge, Ult, Ule, Ugt, Uge,
}

/// Floating comparison conditions (all unordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FloatCC {
  Ueq, Une, Ult, Ule, Ugt, Uge,
}

/// Conversion opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CastKind {
  Trunc, Sext, Zext, FpToSi, FpToUi, SiToFp, UiToFp, FpCast,
  PtrCast, PtrToInt, IntToPtr,
}

/// An instruction. The `ty` is the result type (`Void` for stores).
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
  /// The result type.
  pub ty: TyId,
  /// The operation.
  pub kind: InstKind,
}

/// The instruction operations.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
  /// Allocate a stack slot of the given type; yields a pointer.
  Alloca {
    /// The allocated type.
    ty: TyId,
    /// The slot alignment.
    align: u32,
  },
  /// Load from a pointer.
  Load {
    /// The pointer operand.
    ptr: Operand,
    /// The access alignment.
    align: u32,
  },
  /// Store a value through a pointer.
  Store {
    /// The stored value.
    val: Operand,
    /// The pointer operand.
    ptr: Operand,
    /// The access alignment.
    align: u32,
  },
  /// Pointer arithmetic: index through arrays/pointers.
  Gep {
    /// The base pointer.
    ptr: Operand,
    /// The index list (two indices for arrays, one for pointers).
    indices: Vec<Operand>,
  },
  /// Address of a struct field by index.
  StructGep {
    /// The base pointer.
    ptr: Operand,
    /// The field index.
    field: u32,
  },
  /// A binary operation.
  Binop {
    /// The opcode.
    op: Binop,
    /// Left operand.
    lhs: Operand,
    /// Right operand.
    rhs: Operand,
  },
  /// A unary operation.
  Unop {
    /// The opcode.
    op: Unop,
    /// The operand.
    arg: Operand,
  },
  /// An integer comparison; yields `i1`.
  Icmp {
    /// The condition.
    cc: IntCC,
    /// Left operand.
    lhs: Operand,
    /// Right operand.
    rhs: Operand,
  },
  /// A floating comparison; yields `i1`.
  Fcmp {
    /// The condition.
    cc: FloatCC,
    /// Left operand.
    lhs: Operand,
    /// Right operand.
    rhs: Operand,
  },
  /// A conversion.
  Cast {
    /// The conversion opcode.
    kind: CastKind,
    /// The operand.
    arg: Operand,
  },
  /// Choose between two values by a condition.
  Select {
    /// The `i1` condition.
    cond: Operand,
    /// Value when true.
    then: Operand,
    /// Value when false.
    els: Operand,
  },
  /// A φ-node: selects a value by predecessor block.
  Phi {
    /// The incoming (value, predecessor) pairs.
    incoming: Vec<(Operand, BlockId)>,
  },
  /// A function call.
  Call {
    /// The callee.
    func: Operand,
    /// The arguments.
    args: Vec<Operand>,
  },
}

/// A block terminator. Every emitted block ends with exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
  /// Unconditional branch.
  Br(BlockId),
  /// Conditional branch.
  CondBr {
    /// The `i1` condition.
    cond: Operand,
    /// Target when true.
    then: BlockId,
    /// Target when false.
    els: BlockId,
  },
  /// A multi-way switch on an `i32`.
  Switch {
    /// The scrutinee.
    arg: Operand,
    /// The `(value, target)` cases.
    cases: Vec<(i64, BlockId)>,
    /// The default target.
    default: BlockId,
  },
  /// Return, with a value unless the function is void.
  Ret(Option<Operand>),
}

/// A basic block: instructions in emission order plus a terminator.
#[derive(Debug, Clone, Default)]
pub struct Block {
  /// The instructions, in order.
  pub insts: Vec<InstId>,
  /// The terminator; `None` only while the block is still being built.
  pub term: Option<Terminator>,
}

/// A function. Declarations have an empty block list until a body is
/// attached.
#[derive(Debug)]
pub struct Function {
  /// The function's (mangled composed) name.
  pub name: String,
  /// Linkage.
  pub linkage: Linkage,
  /// Return type.
  pub ret: TyId,
  /// Parameter types.
  pub params: Vec<TyId>,
  /// The basic blocks, in emission order. Block 0 is the entry.
  pub blocks: IdxVec<BlockId, Block>,
  /// The instruction arena.
  pub insts: IdxVec<InstId, Inst>,
}

/// A global variable.
#[derive(Debug)]
pub struct Global {
  /// The global's name.
  pub name: String,
  /// The value type.
  pub ty: TyId,
  /// The initializer; `None` is a zero-initialized declaration.
  pub init: Option<ConstValue>,
  /// Linkage.
  pub linkage: Linkage,
  /// Alignment in bytes.
  pub align: u32,
  /// Whether the global is immutable.
  pub is_const: bool,
}

/// A complete IR module.
#[derive(Debug, Default)]
pub struct Module {
  /// The backend type arena.
  pub types: IdxVec<TyId, TyKind>,
  /// The globals.
  pub globals: IdxVec<GlobalId, Global>,
  /// The functions.
  pub funcs: IdxVec<FuncId, Function>,
  type_memo: HashMap<TyKind, TyId>,
}

impl Module {
  /// Intern a backend type. Struct types are nominal and always get a
  /// fresh id; everything else is deduplicated.
  pub fn intern_type(&mut self, k: TyKind) -> TyId {
    if matches!(k, TyKind::Struct { .. }) { return self.types.push(k) }
    if let Some(&id) = self.type_memo.get(&k) { return id }
    let id = self.types.push(k.clone());
    self.type_memo.insert(k, id);
    id
  }

  /// Fill in (or replace) the field list of a struct type.
  pub fn set_struct_body(&mut self, id: TyId, fields: Vec<TyId>) {
    if let TyKind::Struct { fields: f, .. } = &mut self.types[id] { *f = fields }
  }

  /// Rename a struct type (used when a typedef names an anonymous class).
  pub fn rename_struct(&mut self, id: TyId, name: String) {
    if let TyKind::Struct { name: n, .. } = &mut self.types[id] { *n = name }
  }

  /// Create a function with no body.
  pub fn declare_function(&mut self, name: String, linkage: Linkage,
    ret: TyId, params: Vec<TyId>,
  ) -> FuncId {
    self.funcs.push(Function {
      name, linkage, ret, params,
      blocks: IdxVec::new(),
      insts: IdxVec::new(),
    })
  }

  /// Create a global variable.
  pub fn add_global(&mut self, g: Global) -> GlobalId { self.globals.push(g) }

  /// Look up a global by name.
  #[must_use] pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
    self.globals.enum_iter().find(|(_, g)| g.name == name).map(|(id, _)| id)
  }

  /// Look up a function by name.
  #[must_use] pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
    self.funcs.enum_iter().find(|(_, f)| f.name == name).map(|(id, _)| id)
  }

  /// Check the structural invariants: every block of every function with a
  /// body ends in exactly one terminator. Returns the offending function
  /// and block on failure.
  pub fn validate(&self) -> Result<(), (FuncId, BlockId)> {
    for (fid, f) in self.funcs.enum_iter() {
      for (bid, b) in f.blocks.enum_iter() {
        if b.term.is_none() { return Err((fid, bid)) }
      }
    }
    Ok(())
  }

  /// Render a type.
  #[must_use] pub fn display_type(&self, id: TyId) -> String {
    match &self.types[id] {
      TyKind::Void => "void".into(),
      TyKind::Int(bits) => format!("i{bits}"),
      TyKind::Float => "float".into(),
      TyKind::Double => "double".into(),
      TyKind::Ptr(t) => format!("{}*", self.display_type(*t)),
      TyKind::Array(t, n) => format!("[{n} x {}]", self.display_type(*t)),
      TyKind::Struct { name, .. } => format!("%{name}"),
      TyKind::Func { ret, params } => {
        let params = params.iter().map(|&p| self.display_type(p))
          .collect::<Vec<_>>().join(", ");
        format!("{} ({params})", self.display_type(*ret))
      }
    }
  }

  fn display_const(&self, c: &ConstValue) -> String {
    match c {
      ConstValue::Int { value, .. } => format!("{value}"),
      ConstValue::Float { value, .. } => format!("{value:?}"),
      ConstValue::Null(_) => "null".into(),
      ConstValue::Zero(_) => "zeroinitializer".into(),
      ConstValue::Bytes(b) => format!("c{:?}", String::from_utf8_lossy(b)),
      ConstValue::Array(elems) => {
        let elems = elems.iter().map(|e| self.display_const(e))
          .collect::<Vec<_>>().join(", ");
        format!("[{elems}]")
      }
    }
  }

  fn display_operand(&self, o: &Operand) -> String {
    match o {
      Operand::Const(c) => self.display_const(c),
      Operand::Ref(ValueRef::Inst(i)) => format!("{i:?}"),
      Operand::Ref(ValueRef::Arg(n)) => format!("%arg{n}"),
      Operand::Ref(ValueRef::Global(g)) => format!("@{}", self.globals[*g].name),
      Operand::Ref(ValueRef::Func(f)) => format!("@{}", self.funcs[*f].name),
    }
  }
}

impl Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (_, ty) in self.types.enum_iter() {
      if let TyKind::Struct { name, fields } = ty {
        let fields = fields.iter().map(|&t| self.display_type(t))
          .collect::<Vec<_>>().join(", ");
        writeln!(f, "%{name} = type {{ {fields} }}")?
      }
    }
    for (_, g) in self.globals.enum_iter() {
      let linkage = if g.linkage == Linkage::Internal { "internal " } else { "" };
      let kind = if g.is_const { "constant" } else { "global" };
      let init = match &g.init {
        Some(c) => format!(" {}", self.display_const(c)),
        None => " zeroinitializer".into(),
      };
      writeln!(f, "@{} = {linkage}{kind} {}{init}, align {}",
        g.name, self.display_type(g.ty), g.align)?
    }
    for (_, func) in self.funcs.enum_iter() {
      let linkage = if func.linkage == Linkage::Internal { "internal " } else { "" };
      let params = func.params.iter().enumerate()
        .map(|(i, &p)| format!("{} %arg{i}", self.display_type(p)))
        .collect::<Vec<_>>().join(", ");
      if func.blocks.is_empty() {
        writeln!(f, "declare {linkage}{} @{}({params})",
          self.display_type(func.ret), func.name)?;
        continue
      }
      writeln!(f, "define {linkage}{} @{}({params}) {{",
        self.display_type(func.ret), func.name)?;
      for (bid, block) in func.blocks.enum_iter() {
        writeln!(f, "{bid:?}:")?;
        for &i in &block.insts {
          self.fmt_inst(f, func, i)?
        }
        match &block.term {
          None => writeln!(f, "  <unterminated>")?,
          Some(Terminator::Br(b)) => writeln!(f, "  br {b:?}")?,
          Some(Terminator::CondBr { cond, then, els }) =>
            writeln!(f, "  br {}, {then:?}, {els:?}", self.display_operand(cond))?,
          Some(Terminator::Switch { arg, cases, default }) => {
            write!(f, "  switch {}, {default:?} [", self.display_operand(arg))?;
            for (v, b) in cases { write!(f, "{v}: {b:?} ")? }
            writeln!(f, "]")?
          }
          Some(Terminator::Ret(None)) => writeln!(f, "  ret void")?,
          Some(Terminator::Ret(Some(v))) =>
            writeln!(f, "  ret {}", self.display_operand(v))?,
        }
      }
      writeln!(f, "}}")?
    }
    Ok(())
  }
}

impl Module {
  fn fmt_inst(&self, f: &mut fmt::Formatter<'_>, func: &Function, id: InstId) -> fmt::Result {
    let inst = &func.insts[id];
    let op = |o: &Operand| self.display_operand(o);
    match &inst.kind {
      InstKind::Alloca { ty, align } =>
        writeln!(f, "  {id:?} = alloca {}, align {align}", self.display_type(*ty)),
      InstKind::Load { ptr, align } =>
        writeln!(f, "  {id:?} = load {}, {}, align {align}",
          self.display_type(inst.ty), op(ptr)),
      InstKind::Store { val, ptr, align } =>
        writeln!(f, "  store {}, {}, align {align}", op(val), op(ptr)),
      InstKind::Gep { ptr, indices } => {
        let idx = indices.iter().map(op).collect::<Vec<_>>().join(", ");
        writeln!(f, "  {id:?} = getelementptr {}, {idx}", op(ptr))
      }
      InstKind::StructGep { ptr, field } =>
        writeln!(f, "  {id:?} = structgep {}, {field}", op(ptr)),
      InstKind::Binop { op: o, lhs, rhs } =>
        writeln!(f, "  {id:?} = {} {}, {}",
          format!("{o:?}").to_lowercase(), op(lhs), op(rhs)),
      InstKind::Unop { op: o, arg } =>
        writeln!(f, "  {id:?} = {} {}", format!("{o:?}").to_lowercase(), op(arg)),
      InstKind::Icmp { cc, lhs, rhs } =>
        writeln!(f, "  {id:?} = icmp {} {}, {}",
          format!("{cc:?}").to_lowercase(), op(lhs), op(rhs)),
      InstKind::Fcmp { cc, lhs, rhs } =>
        writeln!(f, "  {id:?} = fcmp {} {}, {}",
          format!("{cc:?}").to_lowercase(), op(lhs), op(rhs)),
      InstKind::Cast { kind, arg } =>
        writeln!(f, "  {id:?} = {} {} to {}",
          format!("{kind:?}").to_lowercase(), op(arg), self.display_type(inst.ty)),
      InstKind::Select { cond, then, els } =>
        writeln!(f, "  {id:?} = select {}, {}, {}", op(cond), op(then), op(els)),
      InstKind::Phi { incoming } => {
        let inc = incoming.iter().map(|(v, b)| format!("[{}, {b:?}]", op(v)))
          .collect::<Vec<_>>().join(", ");
        writeln!(f, "  {id:?} = phi {} {inc}", self.display_type(inst.ty))
      }
      InstKind::Call { func: callee, args } => {
        let args = args.iter().map(op).collect::<Vec<_>>().join(", ");
        writeln!(f, "  {id:?} = call {}({args})", op(callee))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_interning_dedupes() {
    let mut m = Module::default();
    let i32a = m.intern_type(TyKind::Int(32));
    let i32b = m.intern_type(TyKind::Int(32));
    assert_eq!(i32a, i32b);
    let p = m.intern_type(TyKind::Ptr(i32a));
    assert_eq!(p, m.intern_type(TyKind::Ptr(i32a)));
    assert_ne!(p, i32a);
    // structs are nominal
    let s1 = m.intern_type(TyKind::Struct { name: "A".into(), fields: vec![] });
    let s2 = m.intern_type(TyKind::Struct { name: "A".into(), fields: vec![] });
    assert_ne!(s1, s2);
  }

  #[test]
  fn struct_body_and_rename() {
    let mut m = Module::default();
    let i32t = m.intern_type(TyKind::Int(32));
    let s = m.intern_type(TyKind::Struct { name: "<anonymous class>".into(), fields: vec![] });
    m.set_struct_body(s, vec![i32t, i32t]);
    m.rename_struct(s, "Point".into());
    assert_eq!(m.display_type(s), "%Point");
    match &m.types[s] {
      TyKind::Struct { fields, .. } => assert_eq!(fields.len(), 2),
      _ => panic!("expected struct"),
    }
  }

  #[test]
  fn validate_catches_unterminated_blocks() {
    let mut m = Module::default();
    let i32t = m.intern_type(TyKind::Int(32));
    let f = m.declare_function("f".into(), Linkage::External, i32t, vec![]);
    assert_eq!(m.validate(), Ok(()));
    let bb = m.funcs[f].blocks.push(Block::default());
    assert_eq!(m.validate(), Err((f, bb)));
    m.funcs[f].blocks[bb].term = Some(Terminator::Ret(Some(
      ConstValue::Int { bits: 32, value: 0 }.into())));
    assert_eq!(m.validate(), Ok(()));
  }

  #[test]
  fn display_smoke() {
    let mut m = Module::default();
    let i32t = m.intern_type(TyKind::Int(32));
    m.add_global(Global {
      name: "x".into(), ty: i32t, init: Some(ConstValue::Int { bits: 32, value: 3 }),
      linkage: Linkage::External, align: 4, is_const: false,
    });
    let f = m.declare_function("main".into(), Linkage::External, i32t, vec![]);
    let bb = m.funcs[f].blocks.push(Block::default());
    m.funcs[f].blocks[bb].term = Some(Terminator::Ret(Some(
      ConstValue::Int { bits: 32, value: 0 }.into())));
    let text = m.to_string();
    assert!(text.contains("@x = global i32 3, align 4"), "{text}");
    assert!(text.contains("define i32 @main()"), "{text}");
    assert!(text.contains("ret 0"), "{text}");
  }
}
