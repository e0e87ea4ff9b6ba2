use std::collections::BTreeSet;
use std::path::PathBuf;

use log::warn;
use thiserror::Error as ThisError;

use crate::syscalls::{self, MAX_SYSCALL};

/// Knobs for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Maximum number of instructions inspected backwards from a syscall
    /// instruction to find its id.
    pub max_backtrack_insns: usize,
    /// Keep decoding past unparseable bytes instead of halting the
    /// sub-stream. May misclassify data as code.
    pub skip_data: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_backtrack_insns: 20,
            skip_data: false,
        }
    }
}

/// A recoverable analysis defect. Each one means the result set may be
/// missing something it would otherwise contain; none of them abort the
/// run.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    #[error("{}: syscall id at {address:#x} could not be resolved", binary.display())]
    UnresolvedSyscallNumber { binary: PathBuf, address: u64 },

    #[error("no function could be attributed to the .plt slot at {address:#x}")]
    UnresolvedPltTarget { address: u64 },

    #[error("{candidates} library functions match {symbol}; all of them are analysed")]
    AmbiguousPltTarget { symbol: String, candidates: usize },

    #[error("no library function was found for {symbol}")]
    MissingLibraryFunction { symbol: String },

    #[error("library {name} was not found and is excluded from the analysis")]
    LibraryNotFound { name: String },

    #[error("{}: function {name} lies outside .text and was not analysed", library.display())]
    FunctionOutsideText { library: PathBuf, name: String },

    #[error("{}: unparseable bytes in code at {address:#x}", binary.display())]
    DataInCode { binary: PathBuf, address: u64 },
}

/// Record a warning: logged where it happens, kept for the caller.
pub fn emit(warnings: &mut Vec<Warning>, warning: Warning) {
    warn!("{warning}");
    warnings.push(warning);
}

/// One row of the per-syscall usage report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallUsage {
    pub number: u32,
    pub name: &'static str,
    pub used: bool,
}

/// Outcome of analysing one binary and its library closure.
#[derive(Debug)]
pub struct AnalysisResult {
    /// Resolved syscall numbers, each in 0..MAX_SYSCALL.
    pub syscalls: BTreeSet<u32>,
    /// Defects encountered along the way, in discovery order.
    pub warnings: Vec<Warning>,
}

impl AnalysisResult {
    /// One record per syscall number of the target ABI, tagged used or
    /// not. This is the shape consumed by the reporting layer.
    pub fn usage(&self) -> Vec<SyscallUsage> {
        (0..MAX_SYSCALL)
            .map(|number| SyscallUsage {
                number,
                name: syscalls::name(number).unwrap_or(""),
                used: self.syscalls.contains(&number),
            })
            .collect()
    }
}
