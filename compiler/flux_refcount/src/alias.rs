//! Canonical storage locations.
//!
//! An [`AliasKey`] names a storage location as a root variable plus a path
//! of projections (struct fields, constant array indices). The
//! [`AliasModel`] learns `parent.elem == child` facts as aliasing
//! instructions are visited and maps any variable to the key of the
//! outermost container it is known to live in.
//!
//! Knowledge only grows. A key computed early may stop being canonical
//! once a container for its root is discovered, which is why ledgers
//! re-canonicalize before placement.
//!
//! Struct fields are stored inline, so holds on a field are holds on the
//! struct: [`AliasModel::refcount_key`] strips trailing field projections.
//! Array members are separate storage and keep their index.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use flux_ir::{
    Arg, Block, Declaration, Function, HoldCounts, Instruction, Mapped, Name, Storage,
    StringInterner, Type, VarId, VarTable, Variable,
};

use crate::RefcountError;

/// One projection step.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathElem {
    Field(Name),
    Index(i64),
}

impl fmt::Debug for PathElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElem::Field(name) => write!(f, ".f{}", name.raw()),
            PathElem::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Canonical path to a storage location.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AliasKey {
    pub root: VarId,
    pub path: SmallVec<[PathElem; 2]>,
}

impl AliasKey {
    /// Key of a variable with no known container.
    pub fn var(root: VarId) -> Self {
        AliasKey {
            root,
            path: SmallVec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    fn child(&self, elem: PathElem) -> Self {
        let mut path = self.path.clone();
        path.push(elem);
        AliasKey {
            root: self.root,
            path,
        }
    }
}

impl fmt::Debug for AliasKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.root)?;
        for elem in &self.path {
            write!(f, "{elem:?}")?;
        }
        Ok(())
    }
}

/// A variable produced by [`AliasModel::resolve_or_synthesize`].
#[derive(Debug)]
pub struct Resolved {
    pub var: VarId,
    /// Instructions materializing synthesized aliases, in execution order.
    pub materialize: Vec<Instruction>,
}

/// Monotone knowledge base of aliasing facts for one function.
#[derive(Clone, Debug, Default)]
pub struct AliasModel {
    parent_of: FxHashMap<VarId, (VarId, PathElem)>,
    /// Inhabitants of `parent.elem`, in discovery order.
    children: FxHashMap<(VarId, PathElem), Vec<VarId>>,
}

impl AliasModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model holding every aliasing fact in `func`.
    pub fn from_function(func: &Function) -> Self {
        let mut model = AliasModel::new();
        func.body.walk(&mut |block| {
            for instr in block.instructions() {
                model.update(instr);
            }
        });
        model
    }

    /// Record `parent.elem == child`.
    ///
    /// A variable lives in at most one container; later conflicting facts
    /// are ignored and the variable keeps its first known path.
    pub fn record_alias(&mut self, parent: VarId, elem: PathElem, child: VarId) {
        if parent == child || self.is_ancestor(child, parent) {
            return;
        }
        match self.parent_of.get(&child) {
            Some(existing) if *existing == (parent, elem) => {}
            Some(existing) => {
                tracing::trace!(
                    ?child,
                    ?existing,
                    new_parent = ?parent,
                    "ignoring second container for variable"
                );
            }
            None => {
                self.parent_of.insert(child, (parent, elem));
                self.children.entry((parent, elem)).or_default().push(child);
            }
        }
    }

    fn is_ancestor(&self, candidate: VarId, of: VarId) -> bool {
        let mut seen = FxHashSet::default();
        let mut cur = of;
        while let Some(&(parent, _)) = self.parent_of.get(&cur) {
            if parent == candidate {
                return true;
            }
            if !seen.insert(parent) {
                return false;
            }
            cur = parent;
        }
        false
    }

    /// Learn whatever aliasing fact `instr` establishes.
    pub fn update(&mut self, instr: &Instruction) {
        match instr {
            Instruction::StructAlias { dst, src, field } => {
                self.record_alias(*src, PathElem::Field(*field), *dst);
            }
            Instruction::ArrayAlias { dst, array, index } => {
                if let Some(i) = index.as_int() {
                    self.record_alias(*array, PathElem::Index(i), *dst);
                }
            }
            Instruction::ArrayInsert {
                array,
                index,
                member,
            } => {
                if let Some(i) = index.as_int() {
                    self.record_alias(*array, PathElem::Index(i), *member);
                }
            }
            _ => {}
        }
    }

    /// Shortest known path to `v`, rooted at its outermost container.
    pub fn canonical_key(&self, v: VarId) -> AliasKey {
        let mut elems: SmallVec<[PathElem; 2]> = SmallVec::new();
        let mut cur = v;
        while let Some(&(parent, elem)) = self.parent_of.get(&cur) {
            elems.push(elem);
            cur = parent;
        }
        elems.reverse();
        AliasKey {
            root: cur,
            path: elems,
        }
    }

    /// Key whose count is adjusted by refcount operations on `v`.
    pub fn refcount_key(&self, v: VarId) -> AliasKey {
        let mut key = self.canonical_key(v);
        while matches!(key.path.last(), Some(PathElem::Field(_))) {
            key.path.pop();
        }
        key
    }

    /// Re-canonicalize a key built from older knowledge.
    pub fn canonicalize(&self, key: &AliasKey) -> AliasKey {
        let mut out = self.canonical_key(key.root);
        out.path.extend(key.path.iter().copied());
        while matches!(out.path.last(), Some(PathElem::Field(_))) {
            out.path.pop();
        }
        out
    }

    /// Every known variable inhabiting `key`, in discovery order.
    pub fn inhabitants(&self, key: &AliasKey) -> Vec<VarId> {
        let mut current = vec![key.root];
        for elem in &key.path {
            current = current
                .iter()
                .filter_map(|v| self.children.get(&(*v, *elem)))
                .flatten()
                .copied()
                .collect();
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// A variable satisfying `accessible` that denotes `key`.
    pub fn resolve(&self, key: &AliasKey, accessible: impl Fn(VarId) -> bool) -> Option<VarId> {
        self.inhabitants(key).into_iter().find(|v| accessible(*v))
    }

    /// Like [`resolve`](Self::resolve), but when no accessible variable
    /// denotes `key`, synthesize alias variables for the missing suffix of
    /// the path, declare them in `block` and return the instructions that
    /// materialize them.
    pub fn resolve_or_synthesize(
        &mut self,
        key: &AliasKey,
        block: &mut Block,
        vars: &mut VarTable,
        names: &mut StringInterner,
        accessible: impl Fn(VarId) -> bool,
    ) -> Result<Resolved, RefcountError> {
        if let Some(var) = self.resolve(key, &accessible) {
            return Ok(Resolved {
                var,
                materialize: Vec::new(),
            });
        }

        // Deepest prefix with an accessible inhabitant.
        let mut base = None;
        for len in (0..key.path.len()).rev() {
            let prefix = AliasKey {
                root: key.root,
                path: key.path[..len].iter().copied().collect(),
            };
            if let Some(v) = self.resolve(&prefix, &accessible) {
                base = Some((len, prefix, v));
                break;
            }
        }
        let Some((start, mut prefix, mut cur)) = base else {
            return Err(RefcountError::UnresolvedKey {
                key: key.clone(),
                block: block.id,
            });
        };

        let mut materialize = Vec::new();
        for elem in &key.path[start..] {
            let target = prefix.child(*elem);
            let ty = self
                .projected_type(&target, cur, *elem, vars)
                .ok_or_else(|| RefcountError::UnresolvedKey {
                    key: key.clone(),
                    block: block.id,
                })?;
            let name = names.intern(&format!("__alias{}", vars.len()));
            let tmp = vars.push(Variable {
                name,
                ty,
                storage: Storage::Alias,
                mapped: Mapped::No,
            });
            block.variables.push(Declaration {
                var: tmp,
                init: HoldCounts::ZERO,
            });
            materialize.push(match *elem {
                PathElem::Field(field) => Instruction::StructAlias {
                    dst: tmp,
                    src: cur,
                    field,
                },
                PathElem::Index(i) => Instruction::ArrayAlias {
                    dst: tmp,
                    array: cur,
                    index: Arg::int(i),
                },
            });
            self.record_alias(cur, *elem, tmp);
            tracing::trace!(?target, var = ?tmp, block = ?block.id, "synthesized alias");
            prefix = target;
            cur = tmp;
        }
        Ok(Resolved {
            var: cur,
            materialize,
        })
    }

    /// Type of the location `target` (= `parent.elem`).
    fn projected_type(
        &self,
        target: &AliasKey,
        parent: VarId,
        elem: PathElem,
        vars: &VarTable,
    ) -> Option<Type> {
        if let Some(existing) = self.inhabitants(target).first() {
            return Some(vars.ty(*existing).clone());
        }
        match elem {
            PathElem::Index(_) => vars.ty(parent).element().cloned(),
            PathElem::Field(_) => None,
        }
    }
}

#[cfg(test)]
mod tests;
