//! Pending refcount changes per canonical location.
//!
//! The ledger keeps four buckets per location: read/write holds, each
//! split into pending increments (always `>= 0`) and pending decrements
//! (always `<= 0`). The directions are never summed into one number:
//! piggybacking asks how much *decrease* can still be absorbed by an
//! instruction independently of how much increase is pending, and
//! cancellation is an explicit, checked step.

use rustc_hash::FxHashMap;

use flux_ir::{BlockId, RcDir, RcKind, VarId};

use crate::{AliasKey, AliasModel, RefcountError};

#[inline]
fn bucket(kind: RcKind, dir: RcDir) -> usize {
    match (kind, dir) {
        (RcKind::Read, RcDir::Incr) => 0,
        (RcKind::Read, RcDir::Decr) => 1,
        (RcKind::Write, RcDir::Incr) => 2,
        (RcKind::Write, RcDir::Decr) => 3,
    }
}

const BUCKETS: [(RcKind, RcDir); 4] = [
    (RcKind::Read, RcDir::Incr),
    (RcKind::Read, RcDir::Decr),
    (RcKind::Write, RcDir::Incr),
    (RcKind::Write, RcDir::Decr),
];

/// One flattened ledger entry. `amount` carries the direction as its sign.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LedgerEntry {
    pub key: AliasKey,
    pub kind: RcKind,
    pub amount: i64,
}

/// Pending refcount changes of one scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefcountLedger {
    buckets: [FxHashMap<AliasKey, i64>; 4],
}

impl RefcountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the bucket its sign selects. Zero is a no-op.
    pub fn adjust(&mut self, key: AliasKey, kind: RcKind, amount: i64) {
        let Some(dir) = RcDir::of(amount) else {
            return;
        };
        *self.buckets[bucket(kind, dir)].entry(key).or_insert(0) += amount;
    }

    /// Unwind `amount` (signed like the entry it unwinds) from a pending
    /// entry. Unwinding more than is pending is an internal error.
    pub fn cancel(&mut self, key: &AliasKey, kind: RcKind, amount: i64) -> Result<(), RefcountError> {
        let Some(dir) = RcDir::of(amount) else {
            return Ok(());
        };
        let map = &mut self.buckets[bucket(kind, dir)];
        let pending = map.get(key).copied().unwrap_or(0);
        if amount.abs() > pending.abs() {
            return Err(RefcountError::Overshoot {
                key: key.clone(),
                kind,
                amount,
                pending,
            });
        }
        let rest = pending - amount;
        if rest == 0 {
            map.remove(key);
        } else if let Some(slot) = map.get_mut(key) {
            *slot = rest;
        }
        Ok(())
    }

    /// Pending amount in one bucket (signed).
    pub fn get(&self, key: &AliasKey, kind: RcKind, dir: RcDir) -> i64 {
        self.buckets[bucket(kind, dir)]
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Increments plus decrements for `key`.
    pub fn net(&self, key: &AliasKey, kind: RcKind) -> i64 {
        self.get(key, kind, RcDir::Incr) + self.get(key, kind, RcDir::Decr)
    }

    /// Re-key entries whose key is no longer canonical, merging duplicates
    /// by summation. Returns the number of entries re-keyed.
    pub fn canonicalize(&mut self, model: &AliasModel) -> usize {
        let mut rekeyed = 0;
        loop {
            let mut changed = 0;
            for map in &mut self.buckets {
                let stale: Vec<AliasKey> = map
                    .keys()
                    .filter(|k| model.canonicalize(k) != **k)
                    .cloned()
                    .collect();
                for key in stale {
                    if let Some(amount) = map.remove(&key) {
                        *map.entry(model.canonicalize(&key)).or_insert(0) += amount;
                        changed += 1;
                    }
                }
            }
            if changed == 0 {
                return rekeyed;
            }
            rekeyed += changed;
        }
    }

    /// Pending amounts of one bucket, materialized against variables.
    ///
    /// Keys `resolve` cannot map to a variable are left out.
    pub fn candidates(
        &self,
        kind: RcKind,
        dir: RcDir,
        mut resolve: impl FnMut(&AliasKey) -> Option<VarId>,
    ) -> FxHashMap<VarId, i64> {
        let mut out = FxHashMap::default();
        for (key, amount) in &self.buckets[bucket(kind, dir)] {
            if let Some(var) = resolve(key) {
                *out.entry(var).or_insert(0) += *amount;
            }
        }
        out
    }

    /// Every non-zero entry, sorted by key, kind and direction.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut out: Vec<LedgerEntry> = BUCKETS
            .iter()
            .flat_map(|&(kind, dir)| {
                self.buckets[bucket(kind, dir)]
                    .iter()
                    .filter(|(_, amount)| **amount != 0)
                    .map(move |(key, amount)| LedgerEntry {
                        key: key.clone(),
                        kind,
                        amount: *amount,
                    })
            })
            .collect();
        out.sort();
        out
    }

    /// Add every entry of `other` into this ledger.
    pub fn absorb(&mut self, other: RefcountLedger) {
        for (i, map) in other.buckets.into_iter().enumerate() {
            for (key, amount) in map {
                *self.buckets[i].entry(key).or_insert(0) += amount;
            }
        }
    }

    /// Every entry multiplied by `factor`.
    pub fn scaled(&self, factor: u64) -> Result<RefcountLedger, RefcountError> {
        let mut out = RefcountLedger::new();
        for entry in self.entries() {
            let scaled = i64::try_from(factor)
                .ok()
                .and_then(|f| entry.amount.checked_mul(f))
                .ok_or_else(|| RefcountError::CountOverflow {
                    key: entry.key.clone(),
                    amount: entry.amount,
                    factor,
                })?;
            out.adjust(entry.key, entry.kind, scaled);
        }
        Ok(out)
    }

    /// Move the entries `pred` selects into a new ledger.
    pub fn split_off(&mut self, mut pred: impl FnMut(&AliasKey, RcDir) -> bool) -> RefcountLedger {
        let mut out = RefcountLedger::new();
        for (i, &(_, dir)) in BUCKETS.iter().enumerate() {
            let taken: Vec<AliasKey> = self.buckets[i]
                .keys()
                .filter(|k| pred(k, dir))
                .cloned()
                .collect();
            for key in taken {
                if let Some(amount) = self.buckets[i].remove(&key) {
                    out.buckets[i].insert(key, amount);
                }
            }
        }
        out
    }

    /// Check the sign invariant of every bucket.
    pub fn validate(&self, block: BlockId) -> Result<(), RefcountError> {
        for &(kind, dir) in &BUCKETS {
            for (key, amount) in &self.buckets[bucket(kind, dir)] {
                let wrong_sign = match dir {
                    RcDir::Incr => *amount < 0,
                    RcDir::Decr => *amount > 0,
                };
                if wrong_sign {
                    return Err(RefcountError::NegativeResidual {
                        key: key.clone(),
                        kind,
                        dir,
                        amount: *amount,
                        block,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.buckets
            .iter()
            .all(|m| m.values().all(|amount| *amount == 0))
    }

    /// Drop every entry, once placed.
    pub fn reset(&mut self) {
        for map in &mut self.buckets {
            map.clear();
        }
    }
}
