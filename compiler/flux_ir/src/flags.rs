//! Optimization knobs.
//!
//! Every optimization decision point checks one of these flags. With all
//! of them cleared the optimizer emits every refcount operation explicitly
//! at its point of need and performs no substitution; that configuration
//! is the baseline the optimized output is tested against.
//!
//! # Environment
//!
//! [`OptFlags::from_env`] starts from `FLUX_OPT` (a comma-separated list
//! of knob names, default `all`) and clears anything named in
//! `FLUX_OPT_DISABLE`.
//!
//! Example: `FLUX_OPT_DISABLE=piggyback,hoist`

use bitflags::bitflags;

bitflags! {
    /// Independently togglable optimizer features.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct OptFlags: u32 {
        // === Refcount placement ===

        /// Absorb refcount changes into declarations and existing instructions.
        const PIGGYBACK = 1 << 0;
        /// Float changes out of run-once sync blocks and exhaustive branches.
        const HOIST = 1 << 1;
        /// Multiply per-iteration changes out of loops.
        const BATCH = 1 << 2;
        /// Cancel increments against decrements of the same location.
        const CANCEL = 1 << 3;

        // === Value numbering ===

        /// Substitute congruent variables and eliminate recomputation.
        const MERGE = 1 << 8;
        /// Normalize `x + c` chains.
        const ALGEBRA = 1 << 9;
        /// Evaluate operations over constants.
        const CONST_FOLD = 1 << 10;
        /// Use program-wide constant variables as representatives.
        const SHARED_CONSTANTS = 1 << 11;

        const REFCOUNT = Self::PIGGYBACK.bits() | Self::HOIST.bits()
            | Self::BATCH.bits() | Self::CANCEL.bits();
        const VALUE_NUMBERING = Self::MERGE.bits() | Self::ALGEBRA.bits()
            | Self::CONST_FOLD.bits() | Self::SHARED_CONSTANTS.bits();
    }
}

impl OptFlags {
    /// Knob names accepted by [`OptFlags::parse`].
    pub const NAMES: [(&'static str, OptFlags); 8] = [
        ("piggyback", OptFlags::PIGGYBACK),
        ("hoist", OptFlags::HOIST),
        ("batch", OptFlags::BATCH),
        ("cancel", OptFlags::CANCEL),
        ("merge", OptFlags::MERGE),
        ("algebra", OptFlags::ALGEBRA),
        ("const_fold", OptFlags::CONST_FOLD),
        ("shared_constants", OptFlags::SHARED_CONSTANTS),
    ];

    /// Parse a comma-separated list of knob names.
    ///
    /// `all`, `none`, `refcount` and `value_numbering` are accepted as
    /// groups. Unknown names are ignored.
    pub fn parse(s: &str) -> Self {
        let mut flags = OptFlags::empty();
        for part in s.split(',') {
            let part = part.trim().to_lowercase().replace('-', "_");
            match part.as_str() {
                "all" => flags |= OptFlags::all(),
                "none" | "" => {}
                "refcount" => flags |= OptFlags::REFCOUNT,
                "value_numbering" | "vn" => flags |= OptFlags::VALUE_NUMBERING,
                other => {
                    if let Some((_, flag)) = Self::NAMES.iter().find(|(n, _)| *n == other) {
                        flags |= *flag;
                    }
                }
            }
        }
        flags
    }

    /// Read `FLUX_OPT` / `FLUX_OPT_DISABLE`.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("FLUX_OPT").ok().as_deref(),
            std::env::var("FLUX_OPT_DISABLE").ok().as_deref(),
        )
    }

    /// Combine an enable list (default all) with a disable list.
    pub fn from_vars(enable: Option<&str>, disable: Option<&str>) -> Self {
        let enabled = enable.map_or(OptFlags::all(), OptFlags::parse);
        let disabled = disable.map_or(OptFlags::empty(), OptFlags::parse);
        enabled - disabled
    }
}

impl Default for OptFlags {
    fn default() -> Self {
        OptFlags::all()
    }
}
