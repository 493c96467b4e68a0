//! The IR construction layer: backend type materialization, constant and
//! conversion emission, block and terminator discipline.
//!
//! The central guarantee lives in [`Build::emit`] and [`Build::terminate`]:
//! a basic block receives its terminator exactly once, and anything emitted
//! into a terminated block is created but not appended, so dead code after
//! a `return`/`break` never reaches the output module.

use std::rc::Rc;

use crate::constant::Constant;
use crate::scope::{ScopeId, SymbolRef};
use crate::types::Span;
use crate::types::ir::{
  Block, BlockId, CastKind, ConstValue, FuncId, GlobalId, Inst, InstKind, IntCC, FloatCC,
  Linkage, Operand, Terminator, TyId, TyKind, ValueRef,
};
use crate::types::ty::{ClassDesc, CvQualifier, FuncDesc, FundType, PtrDescriptor, PtrKind, Type};
use crate::Sem;

use super::{err, Build, ExprVal, FnCursor};

impl Build<'_> {
  /// Append a fresh block to the current function. Outside a function
  /// (an error path in a global initializer) this is inert.
  pub(crate) fn new_block(&mut self) -> BlockId {
    match self.cur {
      Some(cur) => self.module.funcs[cur.func].blocks.push(Block::default()),
      None => BlockId(0),
    }
  }

  /// Move the insertion point.
  pub(crate) fn set_insert(&mut self, block: BlockId) {
    if let Some(cur) = &mut self.cur { cur.block = block }
  }

  /// The current insertion block.
  pub(crate) fn cur_block(&self) -> BlockId {
    self.cur.map_or(BlockId(0), |c| c.block)
  }

  /// Is the current block already terminated (so emission is dead)?
  pub(crate) fn is_terminated(&self) -> bool {
    let Some(FnCursor { func, block }) = self.cur else { return true };
    self.module.funcs[func].blocks[block].term.is_some()
  }

  /// Emit an instruction into the current block and return its result.
  /// In a terminated block the instruction is created but not appended;
  /// emission without a current function yields a dummy zero (the caller
  /// is on an error path that will be reported at the enclosing boundary).
  pub(crate) fn emit(&mut self, ty: TyId, kind: InstKind) -> Operand {
    let Some(FnCursor { func, block }) = self.cur else {
      return ConstValue::Int { bits: 32, value: 0 }.into()
    };
    let f = &mut self.module.funcs[func];
    let id = f.insts.push(Inst { ty, kind });
    let b = &mut f.blocks[block];
    if b.term.is_none() { b.insts.push(id) }
    id.into()
  }

  /// Set the current block's terminator. A no-op if it already has one.
  pub(crate) fn terminate(&mut self, term: Terminator) {
    let Some(FnCursor { func, block }) = self.cur else { return };
    let b = &mut self.module.funcs[func].blocks[block];
    if b.term.is_none() { b.term = Some(term) }
  }

  /// Emit an unconditional branch.
  pub(crate) fn br(&mut self, target: BlockId) { self.terminate(Terminator::Br(target)) }

  /// Emit a conditional branch.
  pub(crate) fn cond_br(&mut self, cond: Operand, then: BlockId, els: BlockId) {
    self.terminate(Terminator::CondBr { cond, then, els })
  }

  /// The `i1` type.
  pub(crate) fn ty_bool(&mut self) -> TyId { self.module.intern_type(TyKind::Int(1)) }

  /// The backend type of a fundamental type.
  pub(crate) fn fund_type(&mut self, ft: FundType) -> TyId {
    let k = match ft {
      FundType::Void => TyKind::Void,
      FundType::Bool => TyKind::Int(1),
      FundType::Char | FundType::UChar => TyKind::Int(8),
      FundType::Short | FundType::UShort => TyKind::Int(16),
      FundType::Int | FundType::UInt => TyKind::Int(32),
      FundType::Long | FundType::ULong => TyKind::Int(64),
      FundType::Float => TyKind::Float,
      FundType::Double => TyKind::Double,
    };
    self.module.intern_type(k)
  }

  /// The backend struct type for a class, memoized per descriptor. The
  /// body is attached on creation when the class is already defined;
  /// otherwise the class's first pass fills it in later.
  pub(crate) fn class_type(&mut self, desc: &Rc<ClassDesc>) -> TyId {
    let key = Rc::as_ptr(desc);
    if let Some(&id) = self.struct_memo.get(&key) { return id }
    let name = desc.name.borrow().clone();
    let id = self.module.intern_type(TyKind::Struct { name, fields: vec![] });
    self.struct_memo.insert(key, id);
    if desc.members.get().is_some() {
      let fields = self.class_fields(desc);
      self.module.set_struct_body(id, fields);
    }
    id
  }

  /// The field types of a class: the base class (when present) in slot 0,
  /// then the data members in offset order.
  pub(crate) fn class_fields(&mut self, desc: &Rc<ClassDesc>) -> Vec<TyId> {
    let mut fields = vec![];
    let base = desc.base.borrow().as_ref().map(|b| b.desc.clone());
    if let Some(base) = base { fields.push(self.class_type(&base)) }
    if let Some(scope) = desc.members.get() {
      for r in self.comp.scopes.sorted_symbols(scope) {
        let ty = self.comp.scopes.symbol(r).ty.clone();
        fields.push(self.make_type(&ty));
      }
    }
    fields
  }

  /// The backend function type pieces (return, params) of a descriptor.
  pub(crate) fn func_sig(&mut self, desc: &Rc<FuncDesc>) -> (TyId, Vec<TyId>) {
    let ret = self.make_type(&desc.ret.clone());
    let param_tys = desc.params.borrow().iter()
      .map(|p| self.comp.scopes.symbol(p.sym).ty.clone())
      .collect::<Vec<_>>();
    let params = param_tys.iter().map(|t| self.make_type(t)).collect();
    (ret, params)
  }

  /// Build the backend type for a semantic type.
  pub(crate) fn make_type(&mut self, t: &Type) -> TyId {
    if t.is_ref() {
      let elem = self.make_type(&t.clone().remove_ref());
      return self.module.intern_type(TyKind::Ptr(elem))
    }
    if t.is_array() {
      let n = t.array_size();
      let elem = self.make_type(&t.clone().element_type());
      return self.module.intern_type(TyKind::Array(elem, n))
    }
    if t.is_ptr() || t.is_member_ptr() {
      let elem = t.clone().remove_ptr();
      // void* is a byte pointer
      let elem = if elem.is_fund(FundType::Void) {
        self.module.intern_type(TyKind::Int(8))
      } else {
        self.make_type(&elem)
      };
      return self.module.intern_type(TyKind::Ptr(elem))
    }
    match &t.kind {
      crate::types::ty::TypeKind::Fund(ft) => self.fund_type(*ft),
      crate::types::ty::TypeKind::Enum(_) => self.fund_type(FundType::Int),
      crate::types::ty::TypeKind::Class(desc) => self.class_type(&desc.clone()),
      crate::types::ty::TypeKind::Func(desc) => {
        let (ret, params) = self.func_sig(&desc.clone());
        self.module.intern_type(TyKind::Func { ret, params })
      }
    }
  }

  /// Materialize a constant of the given semantic type.
  pub(crate) fn const_value(&mut self, t: &Type, c: Constant, span: Span) -> Sem<ConstValue> {
    if let Some(ft) = t.as_fund() {
      return Ok(match ft {
        FundType::Bool => ConstValue::Int { bits: 1, value: c.as_bool().into() },
        FundType::Char | FundType::UChar =>
          ConstValue::Int { bits: 8, value: (c.as_int() as i8).into() },
        FundType::Short | FundType::UShort =>
          ConstValue::Int { bits: 16, value: (c.as_int() as i16).into() },
        FundType::Int | FundType::UInt =>
          ConstValue::Int { bits: 32, value: (c.as_int() as i32).into() },
        FundType::Long | FundType::ULong => ConstValue::Int { bits: 64, value: c.as_int() },
        FundType::Float => ConstValue::Float { is_double: false, value: c.as_float() },
        FundType::Double => ConstValue::Float { is_double: true, value: c.as_float() },
        FundType::Void =>
          return Err(err(span, "cannot materialize a constant of type 'void'")),
      })
    }
    if t.as_enum().is_some() {
      return Ok(ConstValue::Int { bits: 32, value: c.as_int() })
    }
    if t.is_ptr() || t.is_member_ptr() {
      if c.is_zero() {
        let ty = self.make_type(t);
        return Ok(ConstValue::Null(ty))
      }
      return Err(err(span, format!(
        "cannot materialize non-null constant of pointer type '{}'", t.display())))
    }
    Err(err(span, format!("cannot materialize constant of type '{}'", t.display())))
  }

  /// The zero/default value of a type: aggregate zero for arrays and
  /// classes, null for pointers, zero for scalars.
  pub(crate) fn zero_value(&mut self, t: &Type, span: Span) -> Sem<ConstValue> {
    if t.is_array() || t.as_class().is_some() {
      let ty = self.make_type(t);
      return Ok(ConstValue::Zero(ty))
    }
    self.const_value(t, Constant::default(), span)
  }

  /// Emit a load through `ptr` yielding a value of semantic type `t`.
  pub(crate) fn load(&mut self, t: &Type, ptr: Operand) -> Operand {
    let align = t.alignment(&self.comp.scopes);
    let ty = self.make_type(t);
    self.emit(ty, InstKind::Load { ptr, align })
  }

  /// Emit a store of `val` (of semantic type `t`) through `ptr`.
  pub(crate) fn store(&mut self, t: &Type, val: Operand, ptr: Operand) {
    let align = t.alignment(&self.comp.scopes);
    let void = self.module.intern_type(TyKind::Void);
    self.emit(void, InstKind::Store { val, ptr, align });
  }

  /// Emit a stack slot for a value of semantic type `t`.
  pub(crate) fn alloca(&mut self, t: &Type) -> Operand {
    let align = t.alignment(&self.comp.scopes).max(1);
    let ty = self.make_type(t);
    let ptr = self.module.intern_type(TyKind::Ptr(ty));
    self.emit(ptr, InstKind::Alloca { ty, align })
  }

  /// Convert a value between fundamental kinds, emitting the matching
  /// widening/truncation/int-float instruction sequence.
  pub(crate) fn convert_fund(&mut self, from: FundType, to: FundType, v: Operand) -> Operand {
    if from == to { return v }
    let to_ty = self.fund_type(to);
    // any scalar to bool is a compare against zero
    if to == FundType::Bool {
      let i1 = self.ty_bool();
      if from.is_floating() {
        let zero = ConstValue::Float { is_double: from == FundType::Double, value: 0.0 };
        return self.emit(i1, InstKind::Fcmp { cc: FloatCC::Une, lhs: v, rhs: zero.into() })
      }
      let zero = ConstValue::Int { bits: fund_bits(from), value: 0 };
      return self.emit(i1, InstKind::Icmp { cc: IntCC::Ne, lhs: v, rhs: zero.into() })
    }
    match (from.is_floating(), to.is_floating()) {
      (false, false) => {
        let (fb, tb) = (fund_bits(from), fund_bits(to));
        if fb == tb { return v }
        let kind = if fb > tb {
          CastKind::Trunc
        } else if from == FundType::Bool || !from.is_signed() {
          CastKind::Zext
        } else {
          CastKind::Sext
        };
        self.emit(to_ty, InstKind::Cast { kind, arg: v })
      }
      (false, true) => {
        let kind = if from.is_signed() { CastKind::SiToFp } else { CastKind::UiToFp };
        self.emit(to_ty, InstKind::Cast { kind, arg: v })
      }
      (true, false) => {
        let kind = if to.is_signed() { CastKind::FpToSi } else { CastKind::FpToUi };
        self.emit(to_ty, InstKind::Cast { kind, arg: v })
      }
      (true, true) => self.emit(to_ty, InstKind::Cast { kind: CastKind::FpCast, arg: v }),
    }
  }

  /// Emit the instruction sequence for an implicit conversion whose
  /// legality has already been established by `is_convertible_to`.
  pub(crate) fn convert_type(&mut self, from: &Type, to: &Type, v: Operand) -> Operand {
    let mut from = from.clone();
    let mut v = v;
    if from == *to { return v }

    // lvalue to rvalue: load the referenced value (functions and arrays
    // excluded)
    if from.is_ref() && !to.is_ref() {
      let inner = from.clone().remove_ref();
      if !(inner.as_function().is_some() || inner.is_array()) {
        v = self.load(&inner, v);
        from = inner;
        if from.as_class().is_none() { from.cv = CvQualifier::None }
      } else {
        from = inner
      }
    }

    if from.is_array() {
      if to.is_ptr() {
        // array to pointer: address of the first element
        let elem_ptr = from.clone().element_type().add_ptr(PtrDescriptor::PTR);
        let ty = self.make_type(&elem_ptr);
        let zero: Operand = ConstValue::Int { bits: 32, value: 0 }.into();
        v = self.emit(ty, InstKind::Gep { ptr: v, indices: vec![zero.clone(), zero] });
        from = elem_ptr;
      }
    } else if from.as_function().is_some() {
      // function to pointer / member pointer / function reference: the
      // value (the function address) is unchanged
      if to.is_ref() {
        from = from.add_ptr(PtrDescriptor::REF)
      } else if to.is_member_ptr() {
        if let Some(c) = to.member_ptr_class() {
          from = from.add_ptr(PtrDescriptor {
            kind: PtrKind::Member(c), cv: CvQualifier::None });
        }
      } else if to.is_ptr() {
        from = from.add_ptr(PtrDescriptor::PTR)
      }
    } else if !from.is_ref() && to.is_ref()
      && to.clone().remove_ref().cv == CvQualifier::Const {
      // rvalue to const lvalue: materialize a temporary
      let slot = self.alloca(&from);
      self.store(&from, v, slot.clone());
      v = slot;
      from.cv = CvQualifier::Const;
      from = from.add_ptr(PtrDescriptor::REF);
    }
    if from == *to { return v }

    let to_ty = self.make_type(to);
    match (from.as_fund(), to.as_fund()) {
      (Some(ff), Some(tf)) => return self.convert_fund(ff, tf, v),
      (None, Some(tf)) if from.as_enum().is_some() =>
        return self.convert_fund(FundType::Int, tf, v),
      (None, Some(FundType::Bool)) if from.is_ptr() => {
        // pointer to bool: compare against null
        let null = ConstValue::Null(self.make_type(&from));
        let i1 = self.ty_bool();
        return self.emit(i1, InstKind::Icmp { cc: IntCC::Ne, lhs: v, rhs: null.into() })
      }
      _ => {}
    }
    if (to.is_ptr() && from.is_ptr()) || (to.is_member_ptr() && from.is_member_ptr()) {
      // object pointer to void pointer, derived to base, member-pointer
      // widening: a pointer cast
      return self.emit(to_ty, InstKind::Cast { kind: CastKind::PtrCast, arg: v })
    }
    v
  }

  /// Materialize an expression value (constant or register) at type `to`,
  /// converting from `from`.
  pub(crate) fn create_value(&mut self, from: &Type, to: &Type, e: &ExprVal, span: Span)
    -> Sem<Operand> {
    match e {
      ExprVal::Const(c) => {
        // refine the constant to the target kind on numeric conversions
        let c = match to.as_fund() {
          Some(ft) if ft != FundType::Void && from != to => c.convert(ft),
          _ => *c,
        };
        let target = if to.is_ref() { to.clone().remove_ref() } else { to.clone() };
        let cv = self.const_value(&target, c, span)?;
        if to.is_ref() {
          // rvalue constant bound to a const reference: spill to a slot
          let slot = self.alloca(&target);
          self.store(&target, cv.into(), slot.clone());
          return Ok(slot)
        }
        Ok(cv.into())
      }
      ExprVal::Reg(v) => Ok(self.convert_type(from, to, v.clone())),
      ExprVal::None => Err(err(span, "expected a value")),
    }
  }

  /// Intern a string literal as an internal constant global holding the
  /// NUL-terminated bytes.
  pub(crate) fn string_global(&mut self, s: &str) -> GlobalId {
    if let Some(&g) = self.string_memo.get(s) { return g }
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    let i8t = self.module.intern_type(TyKind::Int(8));
    let n = u32::try_from(bytes.len()).expect("overflow");
    let ty = self.module.intern_type(TyKind::Array(i8t, n));
    let name = format!(".str.{}", self.string_memo.len());
    let g = self.module.add_global(crate::types::ir::Global {
      name, ty, init: Some(ConstValue::Bytes(bytes.into())),
      linkage: Linkage::Internal, align: 1, is_const: true,
    });
    self.string_memo.insert(s.to_owned(), g);
    g
  }

  /// Zero-initialize a variable: a store for locals, an initializer for
  /// globals.
  pub(crate) fn gen_zero_init(&mut self, var: SymbolRef, span: Span) -> Sem<()> {
    let (ty, value) = {
      let sym = self.comp.scopes.symbol(var);
      (sym.ty.clone(), sym.value)
    };
    let zero = self.zero_value(&ty, span)?;
    if var.scope == ScopeId::ROOT {
      if let Some(ValueRef::Global(g)) = value {
        self.module.globals[g].init = Some(zero)
      }
    } else {
      let ptr = Operand::Ref(value.expect("local storage"));
      self.store(&ty, zero.into(), ptr);
    }
    Ok(())
  }

  /// Initialize a variable from an expression value: a converting store
  /// for locals; for globals the expression must be a constant.
  pub(crate) fn gen_assign_init(&mut self, var: SymbolRef, from: &Type, e: &ExprVal, span: Span)
    -> Sem<()> {
    let (ty, value) = {
      let sym = self.comp.scopes.symbol(var);
      (sym.ty.clone(), sym.value)
    };
    if var.scope == ScopeId::ROOT {
      let ExprVal::Const(c) = e else {
        return Err(err(span, "global initializer must be a constant expression"))
      };
      let c = match ty.as_fund() {
        Some(ft) if ft != FundType::Void => c.convert(ft),
        _ => *c,
      };
      let init = self.const_value(&ty, c, span)?;
      if let Some(ValueRef::Global(g)) = value {
        self.module.globals[g].init = Some(init)
      }
    } else {
      let val = self.create_value(from, &ty, e, span)?;
      let ptr = Operand::Ref(value.expect("local storage"));
      self.store(&ty, val, ptr);
    }
    Ok(())
  }

  /// Create the backend function for a just-declared function symbol and
  /// bind the parameter symbols to the argument values.
  pub(crate) fn create_function(&mut self, name: String, linkage: Linkage,
    desc: &Rc<FuncDesc>,
  ) -> FuncId {
    let (ret, params) = self.func_sig(desc);
    let f = self.module.declare_function(name, linkage, ret, params);
    for (i, p) in desc.params.borrow().iter().enumerate() {
      self.comp.scopes.symbol_mut(p.sym).value =
        Some(ValueRef::Arg(u32::try_from(i).expect("overflow")));
    }
    f
  }
}

/// The bit width of an integral fundamental type.
pub(crate) fn fund_bits(ft: FundType) -> u8 {
  match ft {
    FundType::Bool => 1,
    FundType::Char | FundType::UChar => 8,
    FundType::Short | FundType::UShort => 16,
    FundType::Int | FundType::UInt => 32,
    _ => 64,
  }
}
