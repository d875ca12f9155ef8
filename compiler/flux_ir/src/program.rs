//! Functions, programs and the program-level tables the optimizer consults.

use rustc_hash::FxHashMap;

use crate::{Block, BuiltinOp, Constant, Name, StringInterner, VarId, VarTable};

/// A compiled function: formal parameters plus a body block.
///
/// Parameters are owned by the caller; the body borrows their holds and
/// must leave their counts unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    pub name: Name,
    pub inputs: Vec<VarId>,
    pub outputs: Vec<VarId>,
    pub body: Block,
}

impl Function {
    pub fn params(&self) -> impl Iterator<Item = VarId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }

    /// Next unused block id, for passes that add blocks.
    pub fn next_block_id(&self) -> u32 {
        let mut max = 0;
        self.body.walk(&mut |b| max = max.max(b.id.raw() + 1));
        max
    }
}

/// What the optimizer may assume about a callee.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionSig {
    /// No side effects; equal inputs give equal outputs.
    pub pure: bool,
    /// Primitive operator computing the same result, enabling folding.
    pub builtin_equiv: Option<BuiltinOp>,
}

/// Function-signature table shared by every function of a program.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionSigs {
    sigs: FxHashMap<Name, FunctionSig>,
}

impl FunctionSigs {
    pub fn insert(&mut self, name: Name, sig: FunctionSig) {
        self.sigs.insert(name, sig);
    }

    pub fn get(&self, name: Name) -> Option<&FunctionSig> {
        self.sigs.get(&name)
    }

    pub fn is_pure(&self, name: Name) -> bool {
        self.get(name).is_some_and(|s| s.pure)
    }
}

/// Compiler-owned global constants, one variable per distinct value.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalConstants {
    by_value: FxHashMap<Constant, VarId>,
}

impl GlobalConstants {
    pub fn insert(&mut self, value: Constant, var: VarId) {
        self.by_value.insert(value, var);
    }

    pub fn get(&self, value: &Constant) -> Option<VarId> {
        self.by_value.get(value).copied()
    }

    pub fn contains_var(&self, var: VarId) -> bool {
        self.by_value.values().any(|v| *v == var)
    }

    /// The constant held by global-constant variable `var`.
    pub fn value_of(&self, var: VarId) -> Option<&Constant> {
        self.by_value
            .iter()
            .find_map(|(c, v)| (*v == var).then_some(c))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Constant, VarId)> {
        self.by_value.iter().map(|(c, v)| (c, *v))
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }
}

/// A whole program as handed over by the front end.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    pub vars: VarTable,
    pub functions: Vec<Function>,
    pub sigs: FunctionSigs,
    pub globals: GlobalConstants,
    pub names: StringInterner,
}
