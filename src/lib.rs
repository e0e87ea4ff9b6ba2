//! Static syscall-footprint analysis for x86-64 ELF binaries.
//!
//! Determines, without executing anything, which kernel syscalls a
//! binary and the shared libraries it links against can reach: direct
//! trap instructions are backtracked to their syscall id, library calls
//! are resolved through the PLT/GOT and followed recursively across the
//! whole dependency closure.

pub mod backtrack;
pub mod elf;
pub mod error;
pub mod insn;
pub mod libs;
pub mod plt;
pub mod syscalls;
pub mod types;
pub mod walker;

use std::path::Path;

use log::info;

pub use error::{Error, Result};
pub use types::{AnalysisConfig, AnalysisResult, SyscallUsage, Warning};

use elf::Image;
use libs::LibraryRegistry;
use syscalls::SyscallTable;
use walker::AnalysisContext;

/// Analyse the binary at `path` and return the set of statically
/// reachable syscalls together with the warnings accumulated on the way.
///
/// Fatal only for a main binary that is not valid 64-bit x86-64 ELF or
/// that declares library dependencies without any PLT mechanism; every
/// other defect degrades the result set and is reported as a warning.
pub fn analyze_binary(path: &Path, config: &AnalysisConfig) -> Result<AnalysisResult> {
    info!("analysing {}", path.display());

    let table = SyscallTable::new();
    let image = Image::load(path)?;

    let mut warnings = Vec::new();
    let registry = LibraryRegistry::new(image, &mut warnings);
    let ctx = AnalysisContext::new(&table, config, registry, warnings);

    let result = ctx.run();
    info!(
        "{}: {} syscalls, {} warnings",
        path.display(),
        result.syscalls.len(),
        result.warnings.len()
    );
    Ok(result)
}
