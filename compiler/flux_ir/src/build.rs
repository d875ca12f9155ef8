//! Programmatic construction of functions.
//!
//! Front ends and tests assemble IR through [`FunctionBuilder`], which
//! hands out fresh block ids, declares variables in the block currently
//! being built, and nests continuation bodies through closures:
//!
//! ```text
//! let mut f = FunctionBuilder::new(&mut program, "main");
//! let x = f.input("x", Type::Future(PrimType::Int));
//! let y = f.future("y");
//! f.wait(vec![x], |f| f.async_op(BuiltinOp::PlusInt, y, vec![x.into(), Arg::int(1)]));
//! f.finish();
//! ```

use crate::{
    Arg, Block, BlockId, BuiltinOp, Continuation, Declaration, Function, HoldCounts, Instruction,
    LoopRefcounts, Mapped, Name, OpMode, PrimType, Program, Statement, Storage, Type, VarId,
    Variable,
};

/// Builder for one function of a [`Program`].
pub struct FunctionBuilder<'p> {
    program: &'p mut Program,
    name: Name,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    /// Blocks under construction; the last one receives new statements.
    stack: Vec<Block>,
    next_block: u32,
}

impl<'p> FunctionBuilder<'p> {
    pub fn new(program: &'p mut Program, name: &str) -> Self {
        let name = program.names.intern(name);
        FunctionBuilder {
            program,
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            stack: vec![Block::new(BlockId::new(0))],
            next_block: 1,
        }
    }

    /// Access the program being built (for signatures and globals).
    pub fn program(&mut self) -> &mut Program {
        self.program
    }

    fn new_var(&mut self, name: &str, ty: Type, storage: Storage) -> VarId {
        let name = self.program.names.intern(name);
        self.program.vars.push(Variable {
            name,
            ty,
            storage,
            mapped: Mapped::No,
        })
    }

    fn current(&mut self) -> &mut Block {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    /// Id of the block currently receiving statements.
    pub fn current_block(&self) -> BlockId {
        self.stack[self.stack.len() - 1].id
    }

    // ── Variables ───────────────────────────────────────────

    /// Add a caller-owned input parameter.
    pub fn input(&mut self, name: &str, ty: Type) -> VarId {
        let storage = if ty.is_refcounted() {
            Storage::Stack
        } else {
            Storage::Local
        };
        let v = self.new_var(name, ty, storage);
        self.inputs.push(v);
        v
    }

    /// Add a caller-owned output parameter.
    pub fn output(&mut self, name: &str, ty: Type) -> VarId {
        let v = self.new_var(name, ty, Storage::Stack);
        self.outputs.push(v);
        v
    }

    /// Declare a variable in the current block with its base holds.
    pub fn declare(&mut self, name: &str, ty: Type, storage: Storage) -> VarId {
        let v = self.new_var(name, ty, storage);
        self.declare_here(v);
        v
    }

    /// Declare an already allocated variable in the current block.
    fn declare_here(&mut self, var: VarId) {
        let init = self.program.vars.get(var).base_holds();
        self.current().variables.push(Declaration { var, init });
    }

    /// Declare an integer future.
    pub fn future(&mut self, name: &str) -> VarId {
        self.declare(name, Type::Future(PrimType::Int), Storage::Stack)
    }

    /// Declare a local value.
    pub fn value(&mut self, name: &str, prim: PrimType) -> VarId {
        self.declare(name, Type::Value(prim), Storage::Local)
    }

    /// Declare an alias variable.
    pub fn alias(&mut self, name: &str, ty: Type) -> VarId {
        self.declare(name, ty, Storage::Alias)
    }

    /// Add a global constant variable for `value`.
    pub fn global_const(&mut self, name: &str, value: crate::Constant) -> VarId {
        let ty = Type::Future(value.prim_type());
        let v = self.new_var(name, ty, Storage::GlobalConst);
        self.program.globals.insert(value, v);
        v
    }

    /// Override what is known about a file variable's mapping.
    pub fn set_mapped(&mut self, var: VarId, mapped: Mapped) {
        self.program.vars.get_mut(var).mapped = mapped;
    }

    // ── Instructions ────────────────────────────────────────

    pub fn push(&mut self, instr: Instruction) {
        self.current().statements.push(Statement::Instr(instr));
    }

    pub fn async_op(&mut self, op: BuiltinOp, dst: VarId, args: Vec<Arg>) {
        self.push(Instruction::Builtin {
            op,
            mode: OpMode::Async,
            dst,
            args,
        });
    }

    pub fn local_op(&mut self, op: BuiltinOp, dst: VarId, args: Vec<Arg>) {
        self.push(Instruction::Builtin {
            op,
            mode: OpMode::Local,
            dst,
            args,
        });
    }

    pub fn store(&mut self, dst: VarId, src: Arg) {
        self.push(Instruction::Store {
            dst,
            src,
            write_decr: 0,
        });
    }

    pub fn retrieve(&mut self, dst: VarId, src: VarId) {
        self.push(Instruction::Retrieve {
            dst,
            src,
            read_decr: 0,
        });
    }

    pub fn copy(&mut self, dst: VarId, src: VarId) {
        self.push(Instruction::Copy { dst, src });
    }

    pub fn load_ref(&mut self, dst: VarId, src: VarId, acquire: HoldCounts) {
        self.push(Instruction::LoadRef { dst, src, acquire });
    }

    pub fn struct_alias(&mut self, dst: VarId, src: VarId, field: &str) {
        let field = self.program.names.intern(field);
        self.push(Instruction::StructAlias { dst, src, field });
    }

    pub fn array_alias(&mut self, dst: VarId, array: VarId, index: Arg) {
        self.push(Instruction::ArrayAlias { dst, array, index });
    }

    pub fn array_insert(&mut self, array: VarId, index: Arg, member: VarId) {
        self.push(Instruction::ArrayInsert {
            array,
            index,
            member,
        });
    }

    pub fn call(&mut self, func: &str, mode: OpMode, outputs: Vec<VarId>, inputs: Vec<Arg>) {
        let func = self.program.names.intern(func);
        self.push(Instruction::Call {
            func,
            mode,
            outputs,
            inputs,
        });
    }

    // ── Continuations ───────────────────────────────────────

    fn child(&mut self, f: impl FnOnce(&mut Self)) -> Block {
        let id = BlockId::new(self.next_block);
        self.next_block += 1;
        self.stack.push(Block::new(id));
        f(self);
        // The pushed block is still on top: `f` can only nest balanced children.
        self.stack.pop().unwrap_or_else(|| Block::new(id))
    }

    fn push_cont(&mut self, cont: Continuation) {
        self.current().statements.push(Statement::Cont(cont));
    }

    pub fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        let block = self.child(f);
        self.push_cont(Continuation::Nested { block });
    }

    pub fn wait(&mut self, wait_for: Vec<VarId>, f: impl FnOnce(&mut Self)) {
        let block = self.child(f);
        self.push_cont(Continuation::Wait { wait_for, block });
    }

    pub fn if_else(
        &mut self,
        cond: VarId,
        then_f: impl FnOnce(&mut Self),
        else_f: impl FnOnce(&mut Self),
    ) {
        let then_block = self.child(then_f);
        let else_block = self.child(else_f);
        self.push_cont(Continuation::If {
            cond,
            then_block,
            else_block,
        });
    }

    /// Switch with one case per entry of `cases`; `f` is called with the
    /// case index, or `cases.len()` for the default arm.
    pub fn switch(
        &mut self,
        on: VarId,
        cases: &[i64],
        with_default: bool,
        mut f: impl FnMut(&mut Self, usize),
    ) {
        let mut arms = Vec::with_capacity(cases.len());
        for (i, value) in cases.iter().enumerate() {
            let block = self.child(|b| f(b, i));
            arms.push((*value, block));
        }
        let default = with_default.then(|| self.child(|b| f(b, cases.len())));
        self.push_cont(Continuation::Switch {
            on,
            cases: arms,
            default,
        });
    }

    /// Inclusive range loop; `f` receives the loop variable.
    pub fn range_loop(
        &mut self,
        start: Arg,
        end: Arg,
        step: Arg,
        spawn: bool,
        f: impl FnOnce(&mut Self, VarId),
    ) {
        let var = self.new_var("i", Type::Value(PrimType::Int), Storage::Local);
        let block = self.child(|b| {
            b.declare_here(var);
            f(b, var);
        });
        self.push_cont(Continuation::RangeLoop {
            var,
            start,
            end,
            step,
            spawn,
            block,
            rc: LoopRefcounts::default(),
        });
    }

    /// Loop over `container`; `f` receives the member alias.
    pub fn foreach(&mut self, container: VarId, spawn: bool, f: impl FnOnce(&mut Self, VarId)) {
        let elem = self
            .program
            .vars
            .ty(container)
            .element()
            .cloned()
            .unwrap_or(Type::Future(PrimType::Int));
        let member = self.new_var("member", elem, Storage::Alias);
        let block = self.child(|b| {
            b.declare_here(member);
            f(b, member);
        });
        self.push_cont(Continuation::Foreach {
            container,
            member,
            spawn,
            block,
            rc: LoopRefcounts::default(),
        });
    }

    /// Add the function to the program, returning its index.
    pub fn finish(mut self) -> usize {
        let body = self
            .stack
            .pop()
            .unwrap_or_else(|| Block::new(BlockId::new(0)));
        debug_assert!(self.stack.is_empty(), "unbalanced block nesting");
        self.program.functions.push(Function {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            body,
        });
        self.program.functions.len() - 1
    }
}
