//! The Flux middle-end optimizer.
//!
//! Runs the two analyses over every function of a [`Program`], in order:
//!
//! 1. **Value numbering** ([`flux_valuenum`]) substitutes congruent
//!    operands, folds constants and turns recomputations into copies. It
//!    runs only when a value-numbering knob is set.
//! 2. **Refcount placement** ([`flux_refcount`]) makes every hold change
//!    explicit. It always runs; its knobs only decide how cleverly.
//!
//! Value numbering goes first so that eliminated computations never
//! reach refcount counting.
//!
//! # Usage
//!
//! ```text
//! flux_opt::init_tracing();
//! let report = flux_opt::optimize(&mut program, OptFlags::from_env())?;
//! ```
//!
//! Enable logs with `RUST_LOG=flux_opt=debug` or
//! `RUST_LOG=flux_valuenum=trace,flux_refcount=trace`.

use std::sync::Once;

use flux_ir::{
    Function, FunctionSigs, GlobalConstants, OptFlags, Program, StringInterner, VarTable,
};
use flux_refcount::{place_refcounts, PlacementStats, RefcountError};
use flux_valuenum::{number_values, VnError, VnStats};

/// An internal-consistency failure in one of the passes.
///
/// Neither variant describes a problem with the input program; both mean
/// compilation must stop rather than emit an unsafe refcount program.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OptError {
    #[error("value numbering failed: {0}")]
    ValueNumbering(#[from] VnError),
    #[error("refcount placement failed: {0}")]
    Refcount(#[from] RefcountError),
}

/// What the optimizer did to one function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionReport {
    pub name: String,
    /// `None` when value numbering was disabled.
    pub value_numbering: Option<VnStats>,
    pub placement: PlacementStats,
}

/// Per-function reports, in program order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptReport {
    pub functions: Vec<FunctionReport>,
}

impl OptReport {
    /// Explicit `RefCount` instructions emitted across the program.
    pub fn emitted(&self) -> usize {
        self.functions.iter().map(|f| f.placement.emitted).sum()
    }
}

/// Optimize every function of `program` in place.
pub fn optimize(program: &mut Program, flags: OptFlags) -> Result<OptReport, OptError> {
    let Program {
        vars,
        functions,
        sigs,
        globals,
        names,
    } = program;

    let mut report = OptReport::default();
    for func in functions.iter_mut() {
        report
            .functions
            .push(optimize_function(func, vars, sigs, globals, names, flags)?);
    }
    tracing::debug!(
        functions = report.functions.len(),
        emitted = report.emitted(),
        ?flags,
        "optimized program"
    );
    Ok(report)
}

/// Optimize one function. Synthesized variables are added to `vars`.
pub fn optimize_function(
    func: &mut Function,
    vars: &mut VarTable,
    sigs: &FunctionSigs,
    globals: &GlobalConstants,
    names: &mut StringInterner,
    flags: OptFlags,
) -> Result<FunctionReport, OptError> {
    let name = names.lookup(func.name).to_owned();
    let _span = tracing::debug_span!("optimize", function = %name).entered();

    let value_numbering = if flags.intersects(OptFlags::VALUE_NUMBERING) {
        Some(number_values(func, vars, sigs, globals, names, flags)?)
    } else {
        None
    };
    let placement = place_refcounts(func, vars, names, flags)?;

    Ok(FunctionReport {
        name,
        value_numbering,
        placement,
    })
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call more than once. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}
