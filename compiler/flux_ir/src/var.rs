//! Variable identities and the program-wide variable arena.

use std::fmt;

use crate::{HoldCounts, Mapped, Name, Storage, Type};

/// Index of a variable in the [`VarTable`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct VarId(u32);

impl VarId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        VarId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A named, typed storage location.
///
/// Created by the front end. The optimizer reads variables and only ever
/// adds new ones (synthesized aliases), never renames or retypes them.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variable {
    pub name: Name,
    pub ty: Type,
    pub storage: Storage,
    pub mapped: Mapped,
}

impl Variable {
    /// Whether holds on this variable are tracked at all.
    #[inline]
    pub fn is_refcounted(&self) -> bool {
        self.ty.is_refcounted() && matches!(self.storage, Storage::Stack | Storage::Alias)
    }

    /// Holds the variable starts with when its declaring block is entered.
    #[inline]
    pub fn base_holds(&self) -> HoldCounts {
        if self.is_refcounted() && self.storage == Storage::Stack {
            HoldCounts { read: 1, write: 1 }
        } else {
            HoldCounts::ZERO
        }
    }

    /// Whether the variable must be initialized by an instruction before use.
    #[inline]
    pub fn needs_init(&self) -> bool {
        matches!(self.storage, Storage::Alias | Storage::Local)
    }
}

/// Arena of every variable in a program.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarTable {
    vars: Vec<Variable>,
}

impl VarTable {
    pub fn new() -> Self {
        VarTable { vars: Vec::new() }
    }

    /// Allocate a new variable.
    ///
    /// # Panics
    /// Panics if the table already holds `u32::MAX` variables.
    pub fn push(&mut self, var: Variable) -> VarId {
        let id = VarId(
            u32::try_from(self.vars.len())
                .unwrap_or_else(|_| panic!("too many variables: {}", self.vars.len())),
        );
        self.vars.push(var);
        id
    }

    /// Look up a variable.
    ///
    /// # Panics
    /// Panics if `id` was not allocated by this table.
    #[inline]
    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    /// Mutable access for front ends refining what they know about a
    /// variable (for example its mapping).
    pub fn get_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    #[inline]
    pub fn ty(&self, id: VarId) -> &Type {
        &self.get(id).ty
    }

    #[inline]
    pub fn storage(&self, id: VarId) -> Storage {
        self.get(id).storage
    }

    #[inline]
    pub fn is_refcounted(&self, id: VarId) -> bool {
        self.get(id).is_refcounted()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }
}
