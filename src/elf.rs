//! ELF loading and validation.
//!
//! `Image::load` parses one binary or shared object with goblin, checks
//! it is 64-bit x86-64 code, and pulls everything the analysis needs
//! into an owned, immutable structure: executable sections, PLT
//! relocations, declared libraries, symbol-version aliases, exported
//! function boundaries and the local function table.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use goblin::elf::header::EM_X86_64;
use goblin::elf::reloc::{R_X86_64_IRELATIVE, R_X86_64_JUMP_SLOT};
use goblin::elf::sym::STT_FUNC;

use crate::error::{Error, Result};
use crate::syscalls::SyscallTable;

pub const TEXT_SECTION: &str = ".text";
pub const PLT_SECTION: &str = ".plt";
pub const PLT_SEC_SECTION: &str = ".plt.sec";

// High bit of a versym entry marks the symbol hidden; the rest is the
// version index.
const VERSYM_VERSION_MASK: u16 = 0x7fff;

/// A named executable section, copied out of the file.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub vaddr: u64,
    pub bytes: Vec<u8>,
}

impl Section {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.vaddr && addr < self.vaddr + self.size()
    }
}

/// Relocation kinds the PLT resolver distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    JumpSlot,
    IRelative,
    Other(u32),
}

/// One entry of the PLT relocation table, keyed by its GOT slot address.
#[derive(Debug, Clone)]
pub struct PltReloc {
    pub kind: RelocKind,
    /// Symbol the slot binds to; empty for IRELATIVE entries.
    pub symbol: String,
    /// Version-requirement name (e.g. GLIBC_2.2.5) if the symbol
    /// reference is versioned.
    pub version: Option<String>,
    pub addend: i64,
}

/// A function known from the symbol tables, with its address range.
#[derive(Debug, Clone)]
pub struct FuncSym {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

/// One fully-parsed ELF image. Immutable after load.
#[derive(Debug)]
pub struct Image {
    pub path: PathBuf,
    pub text: Section,
    pub plt: Option<Section>,
    pub plt_sec: Option<Section>,
    /// GOT slot address -> relocation.
    pub plt_relocs: HashMap<u64, PltReloc>,
    /// DT_NEEDED entries, in declaration order.
    pub libraries: Vec<String>,
    /// Version name -> libraries that provide that version.
    pub version_aliases: HashMap<String, Vec<String>>,
    /// Exported dynamic symbols -> (start, end). No function filtering:
    /// the symbol-type flag is unreliable for some exports.
    pub exports: HashMap<String, (u64, u64)>,
    /// Local function table from both symbol tables, keyed by start
    /// address. Used to put a name on direct and IRELATIVE call targets.
    pub functions: HashMap<u64, FuncSym>,
    /// All symbol names, static and dynamic.
    pub symbols: Vec<String>,
}

impl Image {
    /// Parse and validate the ELF file at `path`.
    ///
    /// Fails on anything that is not a 64-bit x86-64 ELF, and on a
    /// binary that declares shared-library dependencies but carries
    /// neither a `.plt`/`.plt.sec` section nor PLT relocations.
    pub fn load(path: &Path) -> Result<Image> {
        let buffer = fs::read(path)?;
        let elf = Elf::parse(&buffer)?;

        if !elf.is_64 || elf.header.e_machine != EM_X86_64 {
            return Err(Error::InvalidBinary(path.to_path_buf()));
        }

        let text = section_by_name(&elf, &buffer, TEXT_SECTION)?.ok_or_else(|| {
            Error::MissingSection {
                path: path.to_path_buf(),
                section: TEXT_SECTION.into(),
            }
        })?;
        let plt = section_by_name(&elf, &buffer, PLT_SECTION)?;
        let plt_sec = section_by_name(&elf, &buffer, PLT_SEC_SECTION)?;

        let libraries: Vec<String> = elf.libraries.iter().map(|l| l.to_string()).collect();
        let plt_relocs = plt_relocations(&elf);

        if !libraries.is_empty() && plt.is_none() && plt_sec.is_none() && plt_relocs.is_empty() {
            return Err(Error::MissingSection {
                path: path.to_path_buf(),
                section: format!("{PLT_SECTION}/{PLT_SEC_SECTION}"),
            });
        }

        let mut exports = HashMap::new();
        let mut functions = HashMap::new();
        let mut symbols = Vec::new();

        for sym in elf.dynsyms.iter() {
            let Some(name) = elf.dynstrtab.get_at(sym.st_name) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            symbols.push(name.to_string());
            exports.insert(name.to_string(), (sym.st_value, sym.st_value + sym.st_size));
            if sym.st_type() == STT_FUNC && sym.st_value != 0 {
                functions.insert(
                    sym.st_value,
                    FuncSym {
                        name: name.to_string(),
                        start: sym.st_value,
                        end: sym.st_value + sym.st_size,
                    },
                );
            }
        }
        for sym in elf.syms.iter() {
            let Some(name) = elf.strtab.get_at(sym.st_name) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            symbols.push(name.to_string());
            if sym.st_type() == STT_FUNC && sym.st_value != 0 {
                functions.entry(sym.st_value).or_insert_with(|| FuncSym {
                    name: name.to_string(),
                    start: sym.st_value,
                    end: sym.st_value + sym.st_size,
                });
            }
        }

        Ok(Image {
            path: path.to_path_buf(),
            text,
            plt,
            plt_sec,
            plt_relocs,
            libraries,
            version_aliases: version_aliases(&elf),
            exports,
            functions,
            symbols,
        })
    }

    pub fn has_dyn_libraries(&self) -> bool {
        !self.libraries.is_empty()
    }

    /// File name component of the image path (how DT_NEEDED refers to it).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Syscalls detectable from symbolic information alone: a symbol
    /// named like a syscall wrapper (directly or through the alias
    /// table) marks that syscall used.
    pub fn syscalls_from_symbols(&self, table: &SyscallTable, out: &mut BTreeSet<u32>) {
        for name in &self.symbols {
            if let Some(number) = table.resolve_symbol(name) {
                out.insert(number);
            }
        }
    }
}

fn section_by_name(elf: &Elf, buffer: &[u8], wanted: &str) -> Result<Option<Section>> {
    for sh in &elf.section_headers {
        let Some(name) = elf.shdr_strtab.get_at(sh.sh_name) else {
            continue;
        };
        if name != wanted {
            continue;
        }
        let Some(range) = sh.file_range() else {
            return Ok(None);
        };
        let bytes = buffer
            .get(range)
            .ok_or_else(|| goblin::error::Error::Malformed(format!(
                "section {wanted} extends past the end of the file"
            )))?
            .to_vec();
        return Ok(Some(Section {
            name: wanted.to_string(),
            vaddr: sh.sh_addr,
            bytes,
        }));
    }
    Ok(None)
}

fn plt_relocations(elf: &Elf) -> HashMap<u64, PltReloc> {
    // Version index -> version name, from the version-requirement table.
    let mut version_names: HashMap<u16, String> = HashMap::new();
    if let Some(verneed) = &elf.verneed {
        for need in verneed.iter() {
            for aux in need.iter() {
                if let Some(name) = elf.dynstrtab.get_at(aux.vna_name) {
                    version_names.insert(aux.vna_other, name.to_string());
                }
            }
        }
    }

    let mut relocs = HashMap::new();
    for rel in elf.pltrelocs.iter() {
        let kind = match rel.r_type {
            R_X86_64_JUMP_SLOT => RelocKind::JumpSlot,
            R_X86_64_IRELATIVE => RelocKind::IRelative,
            other => RelocKind::Other(other),
        };
        let symbol = elf
            .dynsyms
            .get(rel.r_sym)
            .and_then(|sym| elf.dynstrtab.get_at(sym.st_name))
            .unwrap_or("")
            .to_string();
        let version = elf
            .versym
            .as_ref()
            .and_then(|versym| versym.get_at(rel.r_sym))
            .map(|v| v.vs_val & VERSYM_VERSION_MASK)
            // 0 and 1 are the unversioned local/global indices.
            .filter(|&idx| idx > 1)
            .and_then(|idx| version_names.get(&idx).cloned());
        relocs.insert(
            rel.r_offset,
            PltReloc {
                kind,
                symbol,
                version,
                addend: rel.r_addend.unwrap_or(0),
            },
        );
    }
    relocs
}

fn version_aliases(elf: &Elf) -> HashMap<String, Vec<String>> {
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(verneed) = &elf.verneed {
        for need in verneed.iter() {
            let Some(file) = elf.dynstrtab.get_at(need.vn_file) else {
                continue;
            };
            for aux in need.iter() {
                if let Some(version) = elf.dynstrtab.get_at(aux.vna_name) {
                    aliases
                        .entry(version.to_string())
                        .or_default()
                        .push(file.to_string());
                }
            }
        }
    }
    aliases
}
