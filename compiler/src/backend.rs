// backend.rs — Instruction emitter, compiled program and execution machine
//
// This module is the assembler service the rest of the compiler targets.
// The code generator drives the `Emitter` API; the instruction encoding
// itself (`Instr`) is private to this module and never leaks. Compiled
// programs expose callable entry points as `NativeFunction` handles that
// are `Send + Sync` and safe to invoke from a render thread.
//
// Function-pointer splicing is confined to `ArgSplice`: the only API that
// turns a raw function handle into a callable argument.
//
// Preconditions: the register lowering pass ran; the emitter re-checks the
//   read-before-write obligation on `finish`.
// Postconditions: executing a finished program never reads an unwritten
//   register or calls an unresolved function.
// Failure modes: verification failures surface as E06xx diagnostics at
//   emission time, never at render time.
// Side effects: none outside the built program and the instance memory it
//   is invoked on.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{BinaryOp, UnaryOp};
use crate::diag::{codes, Diagnostic};
use crate::eval;
use crate::lexer::Span;
use crate::regalloc::Reg;
use crate::types::{ConstValue, Type};

// ── Handles and runtime values ───────────────────────────────────────────

/// Index of a compiled function inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncIndex(pub u32);

/// Index of a registered native library function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

/// An opaque callable handle, usable as a spliced argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncHandle {
    Prog(FuncIndex),
    Native(NativeId),
}

/// Where a sample block's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    /// External buffer passed into the entry-point call, by position.
    Ext(u8),
    /// A run of slots inside instance memory (embedded table data).
    Mem(usize),
}

/// A view over sample storage: source plus a sub-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub source: BlockSource,
    pub start: usize,
    pub len: usize,
}

impl BlockRef {
    pub fn empty() -> Self {
        BlockRef {
            source: BlockSource::Mem(0),
            start: 0,
            len: 0,
        }
    }
}

/// An event routed to `handleEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Event {
    pub kind: i64,
    pub channel: i64,
    pub number: i64,
    pub value: f64,
}

/// A runtime value: one slot of instance memory, one register, or one
/// argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Int(i64),
    Float(f32),
    Double(f64),
    Block(BlockRef),
    Event(Event),
    Func(FuncHandle),
}

impl Value {
    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::Int(v) => v,
            Value::Float(v) => v as i64,
            Value::Double(v) => v as i64,
            _ => 0,
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            Value::Int(v) => v as f32,
            Value::Float(v) => v,
            Value::Double(v) => v as f32,
            _ => 0.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v as f64,
            Value::Double(v) => v,
            _ => 0.0,
        }
    }

    fn to_const(&self) -> Option<ConstValue> {
        match *self {
            Value::Int(v) => Some(ConstValue::Int(v)),
            Value::Float(v) => Some(ConstValue::Float(v)),
            Value::Double(v) => Some(ConstValue::Double(v)),
            _ => None,
        }
    }

    fn from_const(c: ConstValue) -> Value {
        match c {
            ConstValue::Int(v) => Value::Int(v),
            ConstValue::Float(v) => Value::Float(v),
            ConstValue::Double(v) => Value::Double(v),
        }
    }
}

/// A routine whose body is produced directly against the emitter instead of
/// being lowered from a syntax tree (channel-router externals and similar
/// compiler-synthesized plumbing).
pub type EmitFn = Arc<dyn Fn(&mut Emitter) -> Result<(), Diagnostic> + Send + Sync>;

/// A native library function callable from compiled code.
#[derive(Clone, Copy)]
pub struct NativeImpl {
    pub name: &'static str,
    pub f: fn(&[Value]) -> Value,
}

impl std::fmt::Debug for NativeImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeImpl({})", self.name)
    }
}

// ── Instance memory ──────────────────────────────────────────────────────

/// Slot allocator for global/instance memory, producing the initial memory
/// image materialized for every new instance.
#[derive(Debug, Default)]
pub struct LayoutBuilder {
    init: Vec<Value>,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a run of slots with the given initial values, returning the
    /// slot offset.
    pub fn alloc(&mut self, values: Vec<Value>) -> usize {
        let offset = self.init.len();
        self.init.extend(values);
        offset
    }

    pub fn size(&self) -> usize {
        self.init.len()
    }

    pub fn set(&mut self, slot: usize, v: Value) {
        self.init[slot] = v;
    }

    pub fn finish(self) -> InstanceLayout {
        InstanceLayout { init: self.init }
    }
}

/// The initial memory image of a compiled object.
#[derive(Debug, Clone, Default)]
pub struct InstanceLayout {
    init: Vec<Value>,
}

/// Per-voice instance state: one slot vector, cloned from the layout.
#[derive(Debug, Clone)]
pub struct Instance {
    mem: Vec<Value>,
}

impl Instance {
    pub fn get(&self, slot: usize) -> &Value {
        &self.mem[slot]
    }

    pub fn set(&mut self, slot: usize, v: Value) {
        self.mem[slot] = v;
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }
}

// ── Instruction encoding (private) ───────────────────────────────────────

#[derive(Debug, Clone)]
enum Instr {
    Imm { dst: Reg, v: Value },
    Mov { dst: Reg, src: Reg },
    LoadArg { dst: Reg, index: u16 },
    LoadLocal { dst: Reg, slot: u16 },
    StoreLocal { slot: u16, src: Reg },
    AddrGlobal { dst: Reg, offset: usize },
    AddrOffset { dst: Reg, base: Reg, offset: usize },
    AddrIndex { dst: Reg, base: Reg, index: Reg, scale: usize },
    LoadMem { dst: Reg, addr: Reg },
    StoreMem { addr: Reg, src: Reg },
    Binary { dst: Reg, op: BinaryOp, lhs: Reg, rhs: Reg },
    Unary { dst: Reg, op: UnaryOp, src: Reg },
    Cast { dst: Reg, src: Reg, to: Type },
    Jz { cond: Reg, target: usize },
    Jmp { target: usize },
    Call { dst: Option<Reg>, func: FuncIndex, args: Vec<Reg> },
    CallNative { dst: Reg, native: NativeId, args: Vec<Reg> },
    CallPtr { dst: Option<Reg>, handle: Reg, args: Vec<Reg> },
    BlockGet { dst: Reg, block: Reg, index: Reg },
    BlockSet { block: Reg, index: Reg, value: Reg },
    BlockLen { dst: Reg, block: Reg },
    BlockSub { dst: Reg, block: Reg, start: Reg, len: Reg },
    ReferBlock { ed_addr: Reg, dst_addr: Reg },
    Ret { src: Option<Reg> },
}

/// One compiled function.
#[derive(Debug, Clone)]
pub struct FunctionCode {
    pub name: String,
    pub ret: Type,
    pub arg_types: Vec<Type>,
    num_regs: u16,
    num_locals: u16,
    instrs: Vec<Instr>,
}

// ── Emitter ──────────────────────────────────────────────────────────────

/// A forward-patchable jump site.
#[derive(Debug, Clone, Copy)]
pub struct PatchPoint(usize);

/// Builds the instruction stream for one function and verifies the
/// read-before-write register obligation as it goes.
pub struct Emitter {
    name: String,
    ret: Type,
    arg_types: Vec<Type>,
    num_regs: u16,
    num_locals: u16,
    instrs: Vec<Instr>,
    written: Vec<bool>,
    bad_read: Option<Reg>,
}

impl Emitter {
    pub fn new(
        name: impl Into<String>,
        ret: Type,
        arg_types: Vec<Type>,
        num_regs: u16,
        num_locals: u16,
    ) -> Self {
        Self {
            name: name.into(),
            ret,
            arg_types,
            num_regs,
            num_locals,
            instrs: Vec::new(),
            written: vec![false; num_regs as usize],
            bad_read: None,
        }
    }

    /// Claim a scratch register beyond the lowering pass allocation.
    pub fn alloc_scratch(&mut self) -> Reg {
        let r = Reg(self.num_regs);
        self.num_regs += 1;
        self.written.push(false);
        r
    }

    pub fn num_args(&self) -> usize {
        self.arg_types.len()
    }

    fn write(&mut self, r: Reg) {
        if let Some(w) = self.written.get_mut(r.0 as usize) {
            *w = true;
        }
    }

    fn read(&mut self, r: Reg) {
        let ok = self.written.get(r.0 as usize).copied().unwrap_or(false);
        if !ok && self.bad_read.is_none() {
            self.bad_read = Some(r);
        }
    }

    pub fn imm(&mut self, dst: Reg, v: Value) {
        self.write(dst);
        self.instrs.push(Instr::Imm { dst, v });
    }

    pub fn mov(&mut self, dst: Reg, src: Reg) {
        self.read(src);
        self.write(dst);
        self.instrs.push(Instr::Mov { dst, src });
    }

    pub fn load_arg(&mut self, dst: Reg, index: u16) {
        self.write(dst);
        self.instrs.push(Instr::LoadArg { dst, index });
    }

    pub fn load_local(&mut self, dst: Reg, slot: u16) {
        self.write(dst);
        self.instrs.push(Instr::LoadLocal { dst, slot });
    }

    pub fn store_local(&mut self, slot: u16, src: Reg) {
        self.read(src);
        self.instrs.push(Instr::StoreLocal { slot, src });
    }

    pub fn addr_global(&mut self, dst: Reg, offset: usize) {
        self.write(dst);
        self.instrs.push(Instr::AddrGlobal { dst, offset });
    }

    pub fn addr_offset(&mut self, dst: Reg, base: Reg, offset: usize) {
        self.read(base);
        self.write(dst);
        self.instrs.push(Instr::AddrOffset { dst, base, offset });
    }

    pub fn addr_index(&mut self, dst: Reg, base: Reg, index: Reg, scale: usize) {
        self.read(base);
        self.read(index);
        self.write(dst);
        self.instrs.push(Instr::AddrIndex {
            dst,
            base,
            index,
            scale,
        });
    }

    pub fn load_mem(&mut self, dst: Reg, addr: Reg) {
        self.read(addr);
        self.write(dst);
        self.instrs.push(Instr::LoadMem { dst, addr });
    }

    pub fn store_mem(&mut self, addr: Reg, src: Reg) {
        self.read(addr);
        self.read(src);
        self.instrs.push(Instr::StoreMem { addr, src });
    }

    pub fn binary(&mut self, dst: Reg, op: BinaryOp, lhs: Reg, rhs: Reg) {
        self.read(lhs);
        self.read(rhs);
        self.write(dst);
        self.instrs.push(Instr::Binary { dst, op, lhs, rhs });
    }

    pub fn unary(&mut self, dst: Reg, op: UnaryOp, src: Reg) {
        self.read(src);
        self.write(dst);
        self.instrs.push(Instr::Unary { dst, op, src });
    }

    pub fn cast(&mut self, dst: Reg, src: Reg, to: Type) {
        self.read(src);
        self.write(dst);
        self.instrs.push(Instr::Cast { dst, src, to });
    }

    pub fn jz(&mut self, cond: Reg) -> PatchPoint {
        self.read(cond);
        let at = self.instrs.len();
        self.instrs.push(Instr::Jz {
            cond,
            target: usize::MAX,
        });
        PatchPoint(at)
    }

    pub fn jmp(&mut self) -> PatchPoint {
        let at = self.instrs.len();
        self.instrs.push(Instr::Jmp { target: usize::MAX });
        PatchPoint(at)
    }

    /// Current position, for loop back-edges.
    pub fn pos(&self) -> usize {
        self.instrs.len()
    }

    pub fn jmp_to(&mut self, pos: usize) {
        self.instrs.push(Instr::Jmp { target: pos });
    }

    /// Point a pending jump at the current position.
    pub fn patch_here(&mut self, p: PatchPoint) {
        let target = self.instrs.len();
        match &mut self.instrs[p.0] {
            Instr::Jz { target: t, .. } | Instr::Jmp { target: t } => *t = target,
            _ => {}
        }
    }

    pub fn call(&mut self, dst: Option<Reg>, func: FuncIndex, args: &[Reg]) {
        for &a in args {
            self.read(a);
        }
        if let Some(d) = dst {
            self.write(d);
        }
        self.instrs.push(Instr::Call {
            dst,
            func,
            args: args.to_vec(),
        });
    }

    pub fn call_native(&mut self, dst: Reg, native: NativeId, args: &[Reg]) {
        for &a in args {
            self.read(a);
        }
        self.write(dst);
        self.instrs.push(Instr::CallNative {
            dst,
            native,
            args: args.to_vec(),
        });
    }

    fn call_ptr(&mut self, dst: Option<Reg>, handle: Reg, args: &[Reg]) {
        self.read(handle);
        for &a in args {
            self.read(a);
        }
        if let Some(d) = dst {
            self.write(d);
        }
        self.instrs.push(Instr::CallPtr {
            dst,
            handle,
            args: args.to_vec(),
        });
    }

    pub fn block_get(&mut self, dst: Reg, block: Reg, index: Reg) {
        self.read(block);
        self.read(index);
        self.write(dst);
        self.instrs.push(Instr::BlockGet { dst, block, index });
    }

    pub fn block_set(&mut self, block: Reg, index: Reg, value: Reg) {
        self.read(block);
        self.read(index);
        self.read(value);
        self.instrs.push(Instr::BlockSet {
            block,
            index,
            value,
        });
    }

    pub fn block_len(&mut self, dst: Reg, block: Reg) {
        self.read(block);
        self.write(dst);
        self.instrs.push(Instr::BlockLen { dst, block });
    }

    pub fn block_sub(&mut self, dst: Reg, block: Reg, start: Reg, len: Reg) {
        self.read(block);
        self.read(start);
        self.read(len);
        self.write(dst);
        self.instrs.push(Instr::BlockSub {
            dst,
            block,
            start,
            len,
        });
    }

    pub fn refer_block(&mut self, ed_addr: Reg, dst_addr: Reg) {
        self.read(ed_addr);
        self.read(dst_addr);
        self.instrs.push(Instr::ReferBlock { ed_addr, dst_addr });
    }

    pub fn ret(&mut self, src: Option<Reg>) {
        if let Some(s) = src {
            self.read(s);
        }
        self.instrs.push(Instr::Ret { src });
    }

    /// Close the function. Fails if any instruction read a register with no
    /// prior write in the stream.
    pub fn finish(mut self, span: Span) -> Result<FunctionCode, Diagnostic> {
        if let Some(r) = self.bad_read {
            return Err(Diagnostic::error(
                codes::E0601,
                span,
                format!(
                    "register r{} read before write in `{}`",
                    r.0, self.name
                ),
            ));
        }
        // fall off the end of a void function
        if !matches!(self.instrs.last(), Some(Instr::Ret { .. })) {
            self.instrs.push(Instr::Ret { src: None });
        }
        Ok(FunctionCode {
            name: self.name,
            ret: self.ret,
            arg_types: self.arg_types,
            num_regs: self.num_regs,
            num_locals: self.num_locals,
            instrs: self.instrs,
        })
    }
}

// ── Argument splicing ────────────────────────────────────────────────────

/// The narrow boundary through which assembly-level inliners rewrite a call
/// site. This is the only API that materializes a `FuncHandle` into a
/// callable argument; nothing else in the compiler touches raw handles.
pub struct ArgSplice<'e> {
    em: &'e mut Emitter,
    dst: Option<Reg>,
    args: Vec<Reg>,
}

impl<'e> ArgSplice<'e> {
    pub fn new(em: &'e mut Emitter, dst: Option<Reg>, args: Vec<Reg>) -> Self {
        Self { em, dst, args }
    }

    /// Prepend a function handle as a hidden argument to the call.
    pub fn insert_function_ptr_arg(&mut self, handle: FuncHandle) {
        let r = self.em.alloc_scratch();
        self.em.imm(r, Value::Func(handle));
        self.args.insert(0, r);
    }

    /// Rewrite the call site to invoke through the given handle, consuming
    /// the splice.
    pub fn call_through(self, handle: FuncHandle) {
        let r = self.em.alloc_scratch();
        self.em.imm(r, Value::Func(handle));
        self.em.call_ptr(self.dst, r, &self.args);
    }

    /// Invoke through a handle already materialized in a register, for
    /// routines that receive the handle as a hidden argument.
    pub fn call_through_reg(self, handle: Reg) {
        self.em.call_ptr(self.dst, handle, &self.args);
    }
}

// ── Program ──────────────────────────────────────────────────────────────

/// Collects declared and defined functions into a `CompiledProgram`.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    functions: Vec<Option<FunctionCode>>,
    names: HashMap<String, FuncIndex>,
    natives: Vec<NativeImpl>,
    layout: InstanceLayout,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-declare an entry so call sites can reference functions defined
    /// later.
    pub fn declare(&mut self, name: &str) -> FuncIndex {
        let idx = FuncIndex(self.functions.len() as u32);
        self.functions.push(None);
        self.names.insert(name.to_string(), idx);
        idx
    }

    pub fn define(&mut self, idx: FuncIndex, code: FunctionCode) {
        self.functions[idx.0 as usize] = Some(code);
    }

    pub fn add_native(&mut self, n: NativeImpl) -> NativeId {
        let id = NativeId(self.natives.len() as u32);
        self.natives.push(n);
        id
    }

    pub fn set_layout(&mut self, layout: InstanceLayout) {
        self.layout = layout;
    }

    pub fn finish(self, span: Span) -> Result<CompiledProgram, Diagnostic> {
        let mut functions = Vec::with_capacity(self.functions.len());
        for (i, f) in self.functions.into_iter().enumerate() {
            match f {
                Some(code) => functions.push(code),
                None => {
                    let name = self
                        .names
                        .iter()
                        .find(|(_, idx)| idx.0 as usize == i)
                        .map(|(n, _)| n.clone())
                        .unwrap_or_default();
                    return Err(Diagnostic::error(
                        codes::E0600,
                        span,
                        format!("function `{name}` declared but never emitted"),
                    ));
                }
            }
        }
        Ok(CompiledProgram {
            functions,
            names: self.names,
            natives: self.natives,
            layout: self.layout,
        })
    }
}

/// An immutable compiled program: function code, native bindings and the
/// instance memory layout.
#[derive(Debug)]
pub struct CompiledProgram {
    functions: Vec<FunctionCode>,
    names: HashMap<String, FuncIndex>,
    natives: Vec<NativeImpl>,
    layout: InstanceLayout,
}

impl CompiledProgram {
    pub fn func_index(&self, name: &str) -> Option<FuncIndex> {
        self.names.get(name).copied()
    }

    pub fn signature(&self, idx: FuncIndex) -> (&Type, &[Type]) {
        let f = &self.functions[idx.0 as usize];
        (&f.ret, &f.arg_types)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(|s| s.as_str())
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    /// Materialize a fresh instance from the layout's initial image.
    pub fn new_instance(&self) -> Instance {
        Instance {
            mem: self.layout.init.clone(),
        }
    }
}

// ── Entry-point handles ──────────────────────────────────────────────────

/// An argument passed across the entry-point boundary. Blocks are borrowed
/// mutable sample buffers owned by the caller.
pub enum ExtArg<'a> {
    Int(i64),
    Float(f32),
    Double(f64),
    Block(&'a mut [f32]),
    Event(Event),
}

/// A callable handle to one compiled entry point. Cheap to clone; holds the
/// program alive.
#[derive(Clone)]
pub struct NativeFunction {
    program: Arc<CompiledProgram>,
    func: FuncIndex,
    pub name: String,
    pub ret: Type,
    pub arg_types: Vec<Type>,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

impl NativeFunction {
    /// Bind a named entry point out of a compiled program.
    pub fn bind(program: &Arc<CompiledProgram>, name: &str) -> Option<NativeFunction> {
        let func = program.func_index(name)?;
        let (ret, args) = program.signature(func);
        Some(NativeFunction {
            program: Arc::clone(program),
            func,
            name: name.to_string(),
            ret: *ret,
            arg_types: args.to_vec(),
        })
    }

    /// Invoke the entry point against an instance.
    pub fn call(&self, instance: &mut Instance, args: &mut [ExtArg<'_>]) -> Value {
        let mut ext: Vec<&mut [f32]> = Vec::new();
        let mut vals = Vec::with_capacity(args.len());
        for a in args.iter_mut() {
            match a {
                ExtArg::Int(v) => vals.push(Value::Int(*v)),
                ExtArg::Float(v) => vals.push(Value::Float(*v)),
                ExtArg::Double(v) => vals.push(Value::Double(*v)),
                ExtArg::Event(e) => vals.push(Value::Event(*e)),
                ExtArg::Block(b) => {
                    let len = b.len();
                    vals.push(Value::Block(BlockRef {
                        source: BlockSource::Ext(ext.len() as u8),
                        start: 0,
                        len,
                    }));
                    ext.push(&mut **b);
                }
            }
        }
        let mut machine = Machine {
            program: &self.program,
            mem: instance,
            ext,
        };
        machine.run(self.func, vals)
    }
}

// ── Machine (private) ────────────────────────────────────────────────────

struct Machine<'a> {
    program: &'a CompiledProgram,
    mem: &'a mut Instance,
    ext: Vec<&'a mut [f32]>,
}

impl Machine<'_> {
    fn run(&mut self, f: FuncIndex, args: Vec<Value>) -> Value {
        let program = self.program;
        let code = &program.functions[f.0 as usize];
        let mut regs = vec![Value::Void; code.num_regs as usize];
        let mut locals = vec![Value::Void; code.num_locals as usize];
        let mut pc = 0usize;

        loop {
            match &code.instrs[pc] {
                Instr::Imm { dst, v } => regs[dst.0 as usize] = v.clone(),
                Instr::Mov { dst, src } => regs[dst.0 as usize] = regs[src.0 as usize].clone(),
                Instr::LoadArg { dst, index } => {
                    regs[dst.0 as usize] = args[*index as usize].clone()
                }
                Instr::LoadLocal { dst, slot } => {
                    regs[dst.0 as usize] = locals[*slot as usize].clone()
                }
                Instr::StoreLocal { slot, src } => {
                    locals[*slot as usize] = regs[src.0 as usize].clone()
                }
                Instr::AddrGlobal { dst, offset } => {
                    regs[dst.0 as usize] = Value::Int(*offset as i64)
                }
                Instr::AddrOffset { dst, base, offset } => {
                    let b = regs[base.0 as usize].as_i64();
                    regs[dst.0 as usize] = Value::Int(b + *offset as i64);
                }
                Instr::AddrIndex {
                    dst,
                    base,
                    index,
                    scale,
                } => {
                    let b = regs[base.0 as usize].as_i64();
                    let i = regs[index.0 as usize].as_i64();
                    regs[dst.0 as usize] = Value::Int(b + i * *scale as i64);
                }
                Instr::LoadMem { dst, addr } => {
                    let a = regs[addr.0 as usize].as_i64();
                    // out-of-range addresses read as zero, matching blocks
                    regs[dst.0 as usize] = match usize::try_from(a) {
                        Ok(a) if a < self.mem.len() => self.mem.get(a).clone(),
                        _ => Value::Int(0),
                    };
                }
                Instr::StoreMem { addr, src } => {
                    let a = regs[addr.0 as usize].as_i64();
                    if let Ok(a) = usize::try_from(a) {
                        if a < self.mem.len() {
                            self.mem.set(a, regs[src.0 as usize].clone());
                        }
                    }
                }
                Instr::Binary { dst, op, lhs, rhs } => {
                    let a = regs[lhs.0 as usize].to_const();
                    let b = regs[rhs.0 as usize].to_const();
                    let r = match (a, b) {
                        (Some(a), Some(b)) => match eval::binary(*op, a, b) {
                            Some(c) => Value::from_const(c),
                            // int division by zero yields zero at runtime
                            None => Value::Int(0),
                        },
                        _ => Value::Void,
                    };
                    regs[dst.0 as usize] = r;
                }
                Instr::Unary { dst, op, src } => {
                    let r = regs[src.0 as usize]
                        .to_const()
                        .and_then(|c| eval::unary(*op, c))
                        .map(Value::from_const)
                        .unwrap_or(Value::Void);
                    regs[dst.0 as usize] = r;
                }
                Instr::Cast { dst, src, to } => {
                    let r = regs[src.0 as usize]
                        .to_const()
                        .and_then(|c| eval::cast(c, *to))
                        .map(Value::from_const)
                        .unwrap_or(Value::Void);
                    regs[dst.0 as usize] = r;
                }
                Instr::Jz { cond, target } => {
                    if regs[cond.0 as usize].as_i64() == 0 {
                        pc = *target;
                        continue;
                    }
                }
                Instr::Jmp { target } => {
                    pc = *target;
                    continue;
                }
                Instr::Call { dst, func, args: a } => {
                    let vals: Vec<Value> =
                        a.iter().map(|r| regs[r.0 as usize].clone()).collect();
                    let result = self.run(*func, vals);
                    if let Some(d) = dst {
                        regs[d.0 as usize] = result;
                    }
                }
                Instr::CallNative {
                    dst,
                    native,
                    args: a,
                } => {
                    let vals: Vec<Value> =
                        a.iter().map(|r| regs[r.0 as usize].clone()).collect();
                    let n = &program.natives[native.0 as usize];
                    regs[dst.0 as usize] = (n.f)(&vals);
                }
                Instr::CallPtr {
                    dst,
                    handle,
                    args: a,
                } => {
                    let vals: Vec<Value> =
                        a.iter().map(|r| regs[r.0 as usize].clone()).collect();
                    let result = match regs[handle.0 as usize] {
                        Value::Func(FuncHandle::Prog(idx)) => self.run(idx, vals),
                        Value::Func(FuncHandle::Native(id)) => {
                            (program.natives[id.0 as usize].f)(&vals)
                        }
                        _ => Value::Void,
                    };
                    if let Some(d) = dst {
                        regs[d.0 as usize] = result;
                    }
                }
                Instr::BlockGet { dst, block, index } => {
                    let b = self.block_of(&regs[block.0 as usize]);
                    let i = regs[index.0 as usize].as_i64() as usize;
                    regs[dst.0 as usize] = Value::Float(self.block_read(b, i));
                }
                Instr::BlockSet {
                    block,
                    index,
                    value,
                } => {
                    let b = self.block_of(&regs[block.0 as usize]);
                    let i = regs[index.0 as usize].as_i64() as usize;
                    let v = regs[value.0 as usize].as_f32();
                    self.block_write(b, i, v);
                }
                Instr::BlockLen { dst, block } => {
                    let b = self.block_of(&regs[block.0 as usize]);
                    regs[dst.0 as usize] = Value::Int(b.len as i64);
                }
                Instr::BlockSub {
                    dst,
                    block,
                    start,
                    len,
                } => {
                    let b = self.block_of(&regs[block.0 as usize]);
                    let s = (regs[start.0 as usize].as_i64() as usize).min(b.len);
                    let l = (regs[len.0 as usize].as_i64() as usize).min(b.len - s);
                    regs[dst.0 as usize] = Value::Block(BlockRef {
                        source: b.source,
                        start: b.start + s,
                        len: l,
                    });
                }
                Instr::ReferBlock { ed_addr, dst_addr } => {
                    // descriptor layout: [kind, size, offset]; the offset is
                    // relative to the descriptor's own address, so forwarding
                    // the descriptor between objects never invalidates it
                    let ed = regs[ed_addr.0 as usize].as_i64() as usize;
                    let size = self.mem.get(ed + 1).as_i64() as usize;
                    let offset = self.mem.get(ed + 2).as_i64();
                    let dst = regs[dst_addr.0 as usize].as_i64() as usize;
                    let table = (ed as i64 + offset) as usize;
                    self.mem.set(
                        dst,
                        Value::Block(BlockRef {
                            source: BlockSource::Mem(table),
                            start: 0,
                            len: size,
                        }),
                    );
                }
                Instr::Ret { src } => {
                    return match src {
                        Some(r) => regs[r.0 as usize].clone(),
                        None => Value::Void,
                    };
                }
            }
            pc += 1;
        }
    }

    fn block_of(&self, v: &Value) -> BlockRef {
        match v {
            Value::Block(b) => *b,
            _ => BlockRef::empty(),
        }
    }

    fn block_read(&self, b: BlockRef, i: usize) -> f32 {
        if i >= b.len {
            return 0.0;
        }
        match b.source {
            BlockSource::Ext(k) => self.ext[k as usize][b.start + i],
            BlockSource::Mem(off) => {
                let a = off + b.start + i;
                if a < self.mem.len() {
                    self.mem.get(a).as_f32()
                } else {
                    0.0
                }
            }
        }
    }

    fn block_write(&mut self, b: BlockRef, i: usize, v: f32) {
        if i >= b.len {
            return;
        }
        match b.source {
            BlockSource::Ext(k) => self.ext[k as usize][b.start + i] = v,
            BlockSource::Mem(off) => {
                let a = off + b.start + i;
                if a < self.mem.len() {
                    self.mem.set(a, Value::Float(v));
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Span {
        Span { start: 0, end: 0 }
    }

    fn build_add_seven() -> Arc<CompiledProgram> {
        // int main(int input) { return input + 7; }
        let mut pb = ProgramBuilder::new();
        let idx = pb.declare("main");
        let mut em = Emitter::new("main", Type::Int, vec![Type::Int], 2, 0);
        em.load_arg(Reg(0), 0);
        em.imm(Reg(1), Value::Int(7));
        em.binary(Reg(0), BinaryOp::Add, Reg(0), Reg(1));
        em.ret(Some(Reg(0)));
        pb.define(idx, em.finish(sp()).unwrap());
        Arc::new(pb.finish(sp()).unwrap())
    }

    #[test]
    fn add_seven() {
        let program = build_add_seven();
        let f = NativeFunction::bind(&program, "main").unwrap();
        let mut inst = program.new_instance();
        let r = f.call(&mut inst, &mut [ExtArg::Int(12)]);
        assert_eq!(r, Value::Int(19));
    }

    #[test]
    fn read_before_write_is_rejected() {
        let mut em = Emitter::new("bad", Type::Int, vec![], 2, 0);
        em.mov(Reg(0), Reg(1)); // r1 never written
        em.ret(Some(Reg(0)));
        let err = em.finish(sp()).unwrap_err();
        assert_eq!(err.code, Some(codes::E0601));
    }

    #[test]
    fn undefined_function_fails_program() {
        let mut pb = ProgramBuilder::new();
        pb.declare("ghost");
        let err = pb.finish(sp()).unwrap_err();
        assert_eq!(err.code, Some(codes::E0600));
    }

    #[test]
    fn loop_with_jumps() {
        // int count() { int i = 0; while (i < 5) i += 1; return i; }
        let mut pb = ProgramBuilder::new();
        let idx = pb.declare("count");
        let mut em = Emitter::new("count", Type::Int, vec![], 3, 1);
        em.imm(Reg(0), Value::Int(0));
        em.store_local(0, Reg(0));
        let top = em.pos();
        em.load_local(Reg(0), 0);
        em.imm(Reg(1), Value::Int(5));
        em.binary(Reg(2), BinaryOp::Lt, Reg(0), Reg(1));
        let out = em.jz(Reg(2));
        em.load_local(Reg(0), 0);
        em.imm(Reg(1), Value::Int(1));
        em.binary(Reg(0), BinaryOp::Add, Reg(0), Reg(1));
        em.store_local(0, Reg(0));
        em.jmp_to(top);
        em.patch_here(out);
        em.load_local(Reg(0), 0);
        em.ret(Some(Reg(0)));
        pb.define(idx, em.finish(sp()).unwrap());
        let program = Arc::new(pb.finish(sp()).unwrap());
        let f = NativeFunction::bind(&program, "count").unwrap();
        let mut inst = program.new_instance();
        assert_eq!(f.call(&mut inst, &mut []), Value::Int(5));
    }

    #[test]
    fn external_block_mutation() {
        // void gain(block b) { b[0] = b[0] * 0.5f } unrolled for index 0
        let mut pb = ProgramBuilder::new();
        let idx = pb.declare("gain");
        let mut em = Emitter::new("gain", Type::Void, vec![Type::Block], 4, 0);
        em.load_arg(Reg(0), 0);
        em.imm(Reg(1), Value::Int(0));
        em.block_get(Reg(2), Reg(0), Reg(1));
        em.imm(Reg(3), Value::Float(0.5));
        em.binary(Reg(2), BinaryOp::Mul, Reg(2), Reg(3));
        em.block_set(Reg(0), Reg(1), Reg(2));
        em.ret(None);
        pb.define(idx, em.finish(sp()).unwrap());
        let program = Arc::new(pb.finish(sp()).unwrap());
        let f = NativeFunction::bind(&program, "gain").unwrap();
        let mut inst = program.new_instance();
        let mut buf = [8.0f32, 1.0];
        f.call(&mut inst, &mut [ExtArg::Block(&mut buf)]);
        assert_eq!(buf, [4.0, 1.0]);
    }

    #[test]
    fn refer_block_to_instance_memory() {
        // layout: [ed.kind, ed.size, ed.offset, target block, d0, d1, d2];
        // the descriptor offset is relative to the descriptor itself
        let mut lb = LayoutBuilder::new();
        let ed = lb.alloc(vec![Value::Int(1), Value::Int(3), Value::Int(4)]);
        let target = lb.alloc(vec![Value::Block(BlockRef::empty())]);
        lb.alloc(vec![
            Value::Float(1.0),
            Value::Float(2.0),
            Value::Float(3.0),
        ]);

        let mut pb = ProgramBuilder::new();
        pb.set_layout(lb.finish());
        let idx = pb.declare("link");
        let mut em = Emitter::new("link", Type::Int, vec![], 3, 0);
        em.addr_global(Reg(0), ed);
        em.addr_global(Reg(1), target);
        em.refer_block(Reg(0), Reg(1));
        // return target.size()
        em.load_mem(Reg(2), Reg(1));
        em.block_len(Reg(0), Reg(2));
        em.ret(Some(Reg(0)));
        pb.define(idx, em.finish(sp()).unwrap());
        let program = Arc::new(pb.finish(sp()).unwrap());
        let f = NativeFunction::bind(&program, "link").unwrap();
        let mut inst = program.new_instance();
        assert_eq!(f.call(&mut inst, &mut []), Value::Int(3));
    }

    #[test]
    fn splice_calls_through_handle() {
        // inner(x) = x * 2; outer calls it through a spliced pointer arg
        let mut pb = ProgramBuilder::new();
        let inner = pb.declare("inner");
        let outer = pb.declare("outer");

        let mut em = Emitter::new("inner", Type::Int, vec![Type::Int], 2, 0);
        em.load_arg(Reg(0), 0);
        em.imm(Reg(1), Value::Int(2));
        em.binary(Reg(0), BinaryOp::Mul, Reg(0), Reg(1));
        em.ret(Some(Reg(0)));
        pb.define(inner, em.finish(sp()).unwrap());

        // router(fn, x) -> fn(x)
        let router = pb.declare("router");
        let mut em = Emitter::new("router", Type::Int, vec![Type::Int, Type::Int], 3, 0);
        em.load_arg(Reg(0), 0);
        em.load_arg(Reg(1), 1);
        em.call_ptr(Some(Reg(2)), Reg(0), &[Reg(1)]);
        em.ret(Some(Reg(2)));
        pb.define(router, em.finish(sp()).unwrap());

        let mut em = Emitter::new("outer", Type::Int, vec![Type::Int], 2, 0);
        em.load_arg(Reg(0), 0);
        let mut splice = ArgSplice::new(&mut em, Some(Reg(1)), vec![Reg(0)]);
        splice.insert_function_ptr_arg(FuncHandle::Prog(inner));
        splice.call_through(FuncHandle::Prog(router));
        em.ret(Some(Reg(1)));
        pb.define(outer, em.finish(sp()).unwrap());

        let program = Arc::new(pb.finish(sp()).unwrap());
        let f = NativeFunction::bind(&program, "outer").unwrap();
        let mut inst = program.new_instance();
        assert_eq!(f.call(&mut inst, &mut [ExtArg::Int(21)]), Value::Int(42));
    }
}
