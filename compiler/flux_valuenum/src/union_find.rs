//! Union-find with one layer per lexical scope.
//!
//! Lookups fall through from the innermost layer to the outermost; unions
//! only ever write the innermost layer. Popping a layer therefore rolls
//! back every union made since it was pushed, while the enclosing scopes'
//! facts stay untouched.
//!
//! # Representation
//!
//! Each layer maps every member of a class it changed directly to the
//! class representative, and the representative to the full member list.
//! `find` is one hash lookup per layer with no path compression, and a
//! union copies the loser's members into the innermost layer.
//!
//! Which side of a union becomes the representative is the caller's
//! choice: the first argument to [`ScopedUnionFind::union`] wins.

use std::hash::Hash;

use rustc_hash::FxHashMap;

struct Layer<T> {
    /// Member to representative, for classes changed in this scope.
    canonical: FxHashMap<T, T>,
    /// Representative to all members, for classes changed in this scope.
    members: FxHashMap<T, Vec<T>>,
    /// `(winner, loser)` representatives of every union in this scope.
    unions: Vec<(T, T)>,
}

impl<T> Default for Layer<T> {
    fn default() -> Self {
        Layer {
            canonical: FxHashMap::default(),
            members: FxHashMap::default(),
            unions: Vec::new(),
        }
    }
}

/// Scoped union-find over `T`.
pub struct ScopedUnionFind<T> {
    layers: Vec<Layer<T>>,
}

impl<T: Clone + Eq + Hash> ScopedUnionFind<T> {
    pub fn new() -> Self {
        ScopedUnionFind {
            layers: vec![Layer::default()],
        }
    }

    /// Number of live scopes, the root included.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn push_scope(&mut self) {
        self.layers.push(Layer::default());
    }

    /// Discard the innermost scope, returning its unions in order.
    ///
    /// The root scope is never popped.
    pub fn pop_scope(&mut self) -> Vec<(T, T)> {
        debug_assert!(self.layers.len() > 1, "popping the root scope");
        if self.layers.len() <= 1 {
            return Vec::new();
        }
        self.layers.pop().map(|l| l.unions).unwrap_or_default()
    }

    /// Representative of `x`, if `x` was ever added to a class.
    pub fn get(&self, x: &T) -> Option<&T> {
        self.layers.iter().rev().find_map(|l| l.canonical.get(x))
    }

    /// Representative of `x`; an unseen `x` is its own singleton class.
    pub fn find(&self, x: &T) -> T {
        self.get(x).cloned().unwrap_or_else(|| x.clone())
    }

    pub fn contains(&self, x: &T) -> bool {
        self.get(x).is_some()
    }

    /// Every member of `x`'s class, representative first.
    pub fn members(&self, x: &T) -> Vec<T> {
        let rep = self.find(x);
        self.members_of_rep(&rep)
    }

    fn members_of_rep(&self, rep: &T) -> Vec<T> {
        self.layers
            .iter()
            .rev()
            .find_map(|l| l.members.get(rep))
            .cloned()
            .unwrap_or_else(|| vec![rep.clone()])
    }

    /// Join the classes of `winner` and `loser` in the innermost scope.
    ///
    /// The representative of `winner`'s class represents the union.
    /// Returns `false` when both were already in one class.
    pub fn union(&mut self, winner: T, loser: T) -> bool {
        let winner = self.find(&winner);
        let loser = self.find(&loser);
        if winner == loser {
            return false;
        }
        let mut merged = self.members_of_rep(&winner);
        let losing = self.members_of_rep(&loser);

        let Some(top) = self.layers.last_mut() else {
            return false;
        };
        top.canonical.insert(winner.clone(), winner.clone());
        for m in &losing {
            top.canonical.insert(m.clone(), winner.clone());
        }
        merged.extend(losing);
        top.members.insert(winner.clone(), merged);
        top.unions.push((winner, loser));
        true
    }

    /// Unions made in the innermost scope so far.
    pub fn unions_this_scope(&self) -> &[(T, T)] {
        self.layers.last().map_or(&[], |l| l.unions.as_slice())
    }
}

impl<T: Clone + Eq + Hash> Default for ScopedUnionFind<T> {
    fn default() -> Self {
        Self::new()
    }
}
