//! Resolution of call targets that land in the PLT.
//!
//! A call into `.plt`/`.plt.sec` reaches its real destination through an
//! indirect jump over a GOT slot; the relocation attached to that slot
//! names the destination. JUMP_SLOT relocations lead to library exports
//! (searched version-aliased libraries first), IRELATIVE relocations to
//! an anonymous function inside the same image.

use log::debug;

use crate::elf::{Image, RelocKind, Section};
use crate::insn::disassemble;
use crate::libs::{LibFunction, LibraryId, LibraryRegistry};
use crate::types::{Warning, emit};

// A PLT stub is a handful of instructions; the GOT jump is at the front.
const STUB_WINDOW_BYTES: usize = 32;
const STUB_WINDOW_INSNS: usize = 4;

/// True iff `addr` lands in `.plt.sec` when present, else in `.plt`.
pub fn is_plt_target(image: &Image, addr: u64) -> bool {
    match (&image.plt_sec, &image.plt) {
        (Some(plt_sec), _) => plt_sec.contains(addr),
        (None, Some(plt)) => plt.contains(addr),
        (None, None) => false,
    }
}

/// Resolve a call/jump to `addr` inside the PLT into the function(s) it
/// binds to. More than one entry means the binding is ambiguous and all
/// candidates are analysed; an empty result means the target could not
/// be attributed and has been reported.
pub fn resolve_plt_call(
    image_id: LibraryId,
    registry: &mut LibraryRegistry,
    addr: u64,
    warnings: &mut Vec<Warning>,
) -> Vec<LibFunction> {
    let image = registry.image(image_id);

    let Some(got_addr) = got_slot_address(&image, addr) else {
        emit(warnings, Warning::UnresolvedPltTarget { address: addr });
        return Vec::new();
    };

    let Some(reloc) = image.plt_relocs.get(&got_addr) else {
        emit(warnings, Warning::UnresolvedPltTarget { address: addr });
        return Vec::new();
    };

    match reloc.kind {
        RelocKind::JumpSlot => find_function_with_name(
            &image,
            registry,
            &reloc.symbol,
            reloc.version.as_deref(),
            warnings,
        ),
        RelocKind::IRelative if reloc.addend != 0 => {
            // A function of this very image, selected at load time. Left
            // anonymous here; the walker puts a name on it through the
            // image's function table.
            vec![LibFunction {
                name: String::new(),
                lib: image_id,
                start: reloc.addend as u64,
                end: reloc.addend as u64,
            }]
        }
        RelocKind::IRelative | RelocKind::Other(_) => {
            emit(warnings, Warning::UnresolvedPltTarget { address: addr });
            Vec::new()
        }
    }
}

/// Absolute address of the GOT slot a PLT stub at `addr` jumps through.
///
/// The stub's indirect jump is RIP-relative, so the slot address is the
/// jump's displacement plus the address of the following instruction.
/// For `.plt.sec` the stub starts with an instruction before the jump
/// (the call target is the endbr landing pad), so decoding starts one
/// instruction later.
fn got_slot_address(image: &Image, addr: u64) -> Option<u64> {
    let (section, skip) = stub_section(image, addr)?;
    let offset = (addr - section.vaddr) as usize;
    let end = usize::min(offset + STUB_WINDOW_BYTES, section.bytes.len());
    let (insns, _) = disassemble(&section.bytes[offset..end], addr, false);

    for insn in insns.iter().skip(skip).take(STUB_WINDOW_INSNS) {
        if insn.is_branch() && insn.inner.is_ip_rel_memory_operand() {
            return Some(insn.inner.ip_rel_memory_address());
        }
    }
    debug!("no GOT-indirect jump found in the stub at {addr:#x}");
    None
}

fn stub_section(image: &Image, addr: u64) -> Option<(&Section, usize)> {
    if let Some(plt_sec) = &image.plt_sec {
        if plt_sec.contains(addr) {
            return Some((plt_sec, 1));
        }
    }
    if let Some(plt) = &image.plt {
        if plt.contains(addr) {
            return Some((plt, 0));
        }
    }
    None
}

/// All libraries of `image` exporting `symbol` with real boundaries.
///
/// When the symbol reference carries a version, the libraries aliased to
/// that version are searched first and the unaliased set is only a
/// fallback. Degenerate boundaries (start >= end) are skipped: such an
/// export has no code of its own to analyse.
fn find_function_with_name(
    image: &Image,
    registry: &mut LibraryRegistry,
    symbol: &str,
    version: Option<&str>,
    warnings: &mut Vec<Warning>,
) -> Vec<LibFunction> {
    let candidates: Vec<String> = match version.and_then(|v| image.version_aliases.get(v)) {
        Some(aliased) => aliased.clone(),
        None => library_search_set(image),
    };

    let mut functions: Vec<LibFunction> = Vec::new();
    for lib_name in &candidates {
        let Some(id) = registry.resolve(lib_name, warnings) else {
            continue;
        };
        let lib = registry.image(id);
        let Some(&(start, end)) = lib.exports.get(symbol) else {
            continue;
        };
        if start >= end {
            continue;
        }
        let found = LibFunction {
            name: symbol.to_string(),
            lib: id,
            start,
            end,
        };
        // Several version aliases may map to the same library.
        if !functions.contains(&found) {
            functions.push(found);
        }
    }

    if functions.is_empty() {
        if version.is_some() {
            return find_function_with_name(image, registry, symbol, None, warnings);
        }
        emit(
            warnings,
            Warning::MissingLibraryFunction {
                symbol: symbol.to_string(),
            },
        );
    } else if functions.len() > 1 {
        emit(
            warnings,
            Warning::AmbiguousPltTarget {
                symbol: symbol.to_string(),
                candidates: functions.len(),
            },
        );
    }

    functions
}

/// Libraries to search for an unversioned symbol: everything the image
/// declares, plus the image itself (a binary sometimes routes calls to
/// its own exports through the PLT).
fn library_search_set(image: &Image) -> Vec<String> {
    let mut names = image.libraries.clone();
    let own = image.file_name();
    if !own.is_empty() && !names.contains(&own) {
        names.push(own);
    }
    names
}
