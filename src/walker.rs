//! Recursive call-graph traversal.
//!
//! Starting from the main binary's `.text`, every syscall-trapping
//! instruction is backtracked to its id and every resolvable call edge
//! is followed: PLT targets into library exports, direct calls into the
//! owning image's function table. Each function is disassembled at most
//! once per run; the memo set is what makes the traversal terminate on
//! the cyclic call graphs shared libraries routinely have.

use std::collections::{BTreeSet, HashSet};

use log::debug;

use crate::backtrack::resolve_syscall_number;
use crate::elf::Image;
use crate::insn::{Insn, disassemble};
use crate::libs::{LibFunction, LibraryId, LibraryRegistry};
use crate::plt::{is_plt_target, resolve_plt_call};
use crate::syscalls::{self, MAX_SYSCALL, SyscallTable};
use crate::types::{AnalysisConfig, AnalysisResult, Warning, emit};

/// All state of one analysis run, threaded through the traversal.
pub struct AnalysisContext<'a> {
    table: &'a SyscallTable,
    config: &'a AnalysisConfig,
    registry: LibraryRegistry,
    /// Functions already disassembled and scanned, by stable identity.
    visited: HashSet<(LibraryId, u64)>,
    syscalls: BTreeSet<u32>,
    warnings: Vec<Warning>,
    depth: usize,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(
        table: &'a SyscallTable,
        config: &'a AnalysisConfig,
        registry: LibraryRegistry,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            table,
            config,
            registry,
            visited: HashSet::new(),
            syscalls: BTreeSet::new(),
            warnings,
            depth: 0,
        }
    }

    /// Analyse the main binary: symbol-table scan, then the full `.text`
    /// walk with recursion into every resolved library call.
    pub fn run(mut self) -> AnalysisResult {
        let main = self.registry.image(self.registry.main_id());
        main.syscalls_from_symbols(self.table, &mut self.syscalls);

        let insns = self.decode(&main, main.text.vaddr, main.text.size());
        // Direct local calls are not followed here: the whole of the
        // main `.text` is being scanned anyway.
        let called = self.scan_instructions(self.registry.main_id(), &main, &insns, false);
        self.visit_functions(called);

        AnalysisResult {
            syscalls: self.syscalls,
            warnings: self.warnings,
        }
    }

    /// Depth-first visit of newly-discovered functions. Re-discovered
    /// functions are memo-skipped, which also terminates recursion
    /// cycles.
    fn visit_functions(&mut self, functions: Vec<LibFunction>) {
        self.depth += 1;
        for function in functions {
            let identity = (function.lib, function.start);
            let image = self.registry.image(function.lib);
            if !self.visited.insert(identity) {
                debug!(
                    "D-{}: {}@{} at {:#x} - done",
                    self.depth,
                    function.name,
                    image.file_name(),
                    function.start
                );
                continue;
            }
            debug!(
                "D-{}: {}@{} at {:#x}",
                self.depth,
                function.name,
                image.file_name(),
                function.start
            );

            let text = &image.text;
            if function.start < text.vaddr
                || function.end > text.vaddr + text.size()
                || function.start >= function.end
            {
                emit(
                    &mut self.warnings,
                    Warning::FunctionOutsideText {
                        library: image.path.clone(),
                        name: function.name.clone(),
                    },
                );
                continue;
            }

            let insns = self.decode(&image, function.start, function.end - function.start);
            let called = self.scan_instructions(function.lib, &image, &insns, true);
            self.visit_functions(called);
        }
        self.depth -= 1;
    }

    /// Scan one decoded instruction range: resolve syscall ids on trap
    /// instructions, resolve call/jump edges, and return the functions
    /// those edges lead into.
    fn scan_instructions(
        &mut self,
        id: LibraryId,
        image: &Image,
        insns: &[Insn],
        follow_local_calls: bool,
    ) -> Vec<LibFunction> {
        let mut called: Vec<LibFunction> = Vec::new();

        for (index, insn) in insns.iter().enumerate() {
            if insn.is_invalid() {
                continue;
            }

            if insn.is_syscall_trap() {
                self.resolve_trap(image, insns, index);
            } else if insn.is_branch() {
                let Some(target) = insn.branch_target() else {
                    // Computed control flow; out of reach for this tool.
                    debug!(
                        "indirect branch at {:#x} in {}: {}",
                        insn.address(),
                        image.file_name(),
                        insn.display()
                    );
                    continue;
                };

                if image.has_dyn_libraries() && is_plt_target(image, target) {
                    let functions =
                        resolve_plt_call(id, &mut self.registry, target, &mut self.warnings);
                    for function in self.redirect_local_targets(image, functions) {
                        if !called.contains(&function) {
                            called.push(function);
                        }
                    }
                } else if follow_local_calls && insn.is_call() {
                    if let Some(sym) = image.functions.get(&target) {
                        let function = LibFunction {
                            name: sym.name.clone(),
                            lib: id,
                            start: sym.start,
                            end: sym.end,
                        };
                        if !called.contains(&function) {
                            called.push(function);
                        }
                    } else {
                        debug!(
                            "call to {target:#x} in {} has no function-table entry",
                            image.file_name()
                        );
                    }
                }
            }
        }

        called
    }

    fn resolve_trap(&mut self, image: &Image, insns: &[Insn], index: usize) {
        debug!(
            "syscall instruction at {:#x} in {}",
            insns[index].address(),
            image.file_name()
        );
        match resolve_syscall_number(insns, index, self.config.max_backtrack_insns) {
            Some(number) if number < u64::from(MAX_SYSCALL) => {
                let number = number as u32;
                debug!(
                    "found: {}: {number}",
                    syscalls::name(number).unwrap_or("?")
                );
                self.syscalls.insert(number);
            }
            _ => {
                emit(
                    &mut self.warnings,
                    Warning::UnresolvedSyscallNumber {
                        binary: image.path.clone(),
                        address: insns[index].address(),
                    },
                );
            }
        }
    }

    /// Anonymous (IRELATIVE) targets point at an address in their own
    /// image; give them their function-table identity before analysing.
    /// Targets that stay anonymous are dropped; there is nothing to
    /// bound their disassembly with.
    fn redirect_local_targets(
        &mut self,
        image: &Image,
        functions: Vec<LibFunction>,
    ) -> Vec<LibFunction> {
        let mut redirected = Vec::new();
        for function in functions {
            if !function.name.is_empty() {
                redirected.push(function);
                continue;
            }
            match image.functions.get(&function.start) {
                Some(sym) => redirected.push(LibFunction {
                    name: sym.name.clone(),
                    lib: function.lib,
                    start: sym.start,
                    end: sym.end,
                }),
                None => emit(
                    &mut self.warnings,
                    Warning::UnresolvedPltTarget {
                        address: function.start,
                    },
                ),
            }
        }
        redirected
    }

    fn decode(&mut self, image: &Image, start: u64, len: u64) -> Vec<Insn> {
        let offset = (start - image.text.vaddr) as usize;
        let bytes = &image.text.bytes[offset..offset + len as usize];
        let (insns, invalid) = disassemble(bytes, start, self.config.skip_data);
        if let Some(address) = invalid {
            emit(
                &mut self.warnings,
                Warning::DataInCode {
                    binary: image.path.clone(),
                    address,
                },
            );
        }
        insns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{FuncSym, Section};
    use std::collections::HashMap;
    use std::path::PathBuf;

    // Two mutually-recursive functions in one image, each containing a
    // resolvable syscall.
    //
    //   a (0x1000): call b; mov eax, 0x27; syscall; ret
    //   b (0x1010): call a; xor eax, eax;  syscall; ret
    fn cyclic_image() -> Image {
        let mut text = Vec::new();
        text.extend_from_slice(&[0xe8, 0x0b, 0x00, 0x00, 0x00]); // call 0x1010
        text.extend_from_slice(&[0xb8, 0x27, 0x00, 0x00, 0x00]); // mov eax, 0x27
        text.extend_from_slice(&[0x0f, 0x05, 0xc3]); // syscall; ret
        text.extend_from_slice(&[0x90, 0x90, 0x90]); // pad to 0x1010
        text.extend_from_slice(&[0xe8, 0xeb, 0xff, 0xff, 0xff]); // call 0x1000
        text.extend_from_slice(&[0x31, 0xc0]); // xor eax, eax
        text.extend_from_slice(&[0x0f, 0x05, 0xc3]); // syscall; ret

        let mut functions = HashMap::new();
        functions.insert(
            0x1000,
            FuncSym {
                name: "a".into(),
                start: 0x1000,
                end: 0x100d,
            },
        );
        functions.insert(
            0x1010,
            FuncSym {
                name: "b".into(),
                start: 0x1010,
                end: 0x101a,
            },
        );

        Image {
            path: PathBuf::from("/tmp/libcycle.so"),
            text: Section {
                name: ".text".into(),
                vaddr: 0x1000,
                bytes: text,
            },
            plt: None,
            plt_sec: None,
            plt_relocs: HashMap::new(),
            libraries: Vec::new(),
            version_aliases: HashMap::new(),
            exports: HashMap::new(),
            functions,
            symbols: Vec::new(),
        }
    }

    #[test]
    fn cyclic_call_graph_terminates_with_each_function_visited_once() {
        let table = SyscallTable::new();
        let config = AnalysisConfig::default();
        let mut warnings = Vec::new();
        let registry = LibraryRegistry::new(cyclic_image(), &mut warnings);
        let main = registry.main_id();
        let mut ctx = AnalysisContext::new(&table, &config, registry, warnings);

        let entry = LibFunction {
            name: "a".into(),
            lib: main,
            start: 0x1000,
            end: 0x100d,
        };
        ctx.visit_functions(vec![entry]);

        assert_eq!(ctx.visited.len(), 2);
        assert_eq!(
            ctx.syscalls.iter().copied().collect::<Vec<_>>(),
            vec![0, 0x27]
        );
        assert!(ctx.warnings.is_empty());
    }

    #[test]
    fn function_outside_text_is_skipped_with_a_warning() {
        let table = SyscallTable::new();
        let config = AnalysisConfig::default();
        let mut warnings = Vec::new();
        let registry = LibraryRegistry::new(cyclic_image(), &mut warnings);
        let main = registry.main_id();
        let mut ctx = AnalysisContext::new(&table, &config, registry, warnings);

        let stray = LibFunction {
            name: "stray".into(),
            lib: main,
            start: 0x9000,
            end: 0x9040,
        };
        ctx.visit_functions(vec![stray]);

        assert!(ctx.syscalls.is_empty());
        assert!(matches!(
            ctx.warnings.as_slice(),
            [Warning::FunctionOutsideText { name, .. }] if name.as_str() == "stray"
        ));
    }
}
