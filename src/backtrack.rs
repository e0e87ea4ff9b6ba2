//! Backward resolution of the value loaded into the syscall-id register.

use iced_x86::{InstructionInfoFactory, Mnemonic, OpAccess, OpKind, Register};
use log::debug;

use crate::insn::Insn;

/// Canonical register class of a general-purpose register: every width
/// of the same register (rax/eax/ax/al) maps to its 64-bit form. The
/// high-byte forms (ah..dh) are left out; storing a syscall id through
/// one of them is not a pattern worth chasing.
fn reg_class(reg: Register) -> Option<Register> {
    if matches!(
        reg,
        Register::AH | Register::BH | Register::CH | Register::DH
    ) {
        return None;
    }
    let full = reg.full_register();
    matches!(
        full,
        Register::RAX
            | Register::RBX
            | Register::RCX
            | Register::RDX
            | Register::RSI
            | Register::RDI
            | Register::RBP
            | Register::RSP
            | Register::R8
            | Register::R9
            | Register::R10
            | Register::R11
            | Register::R12
            | Register::R13
            | Register::R14
            | Register::R15
    )
    .then_some(full)
}

fn writes_class(factory: &mut InstructionInfoFactory, insn: &Insn, class: Register) -> bool {
    factory.info(&insn.inner).used_registers().iter().any(|r| {
        matches!(
            r.access(),
            OpAccess::Write | OpAccess::CondWrite | OpAccess::ReadWrite | OpAccess::ReadCondWrite
        ) && reg_class(r.register()) == Some(class)
    })
}

fn mov_immediate(insn: &Insn) -> Option<u64> {
    match insn.inner.op1_kind() {
        OpKind::Immediate8 => Some(u64::from(insn.inner.immediate8())),
        OpKind::Immediate16 => Some(u64::from(insn.inner.immediate16())),
        OpKind::Immediate32 => Some(u64::from(insn.inner.immediate32())),
        OpKind::Immediate64 => Some(insn.inner.immediate64()),
        OpKind::Immediate8to16 => Some(insn.inner.immediate8to16() as u64),
        OpKind::Immediate8to32 => Some(insn.inner.immediate8to32() as u64),
        OpKind::Immediate8to64 => Some(insn.inner.immediate8to64() as u64),
        OpKind::Immediate32to64 => Some(insn.inner.immediate32to64() as u64),
        _ => None,
    }
}

/// Walk backwards from the instruction before `syscall_idx`, following
/// the register that ends up in the syscall-id position.
///
/// Supported definitions: `mov reg, imm` (resolved), `mov reg, reg2`
/// (focus shifts to `reg2` and the walk continues), `xor reg, reg`
/// (resolved to 0). Any other instruction writing the focused register
/// ends the walk unresolved; so does exhausting the window. Deliberately
/// conservative: a miss here is an under-approximation, never a wrong id.
pub fn resolve_syscall_number(insns: &[Insn], syscall_idx: usize, max_window: usize) -> Option<u64> {
    let mut focus = Register::RAX;
    let mut factory = InstructionInfoFactory::new();
    let lowest = syscall_idx.saturating_sub(max_window);

    for insn in insns[lowest..syscall_idx].iter().rev() {
        if insn.is_invalid() {
            continue;
        }
        debug!("-> {:#x}: {}", insn.address(), insn.display());

        if !writes_class(&mut factory, insn, focus) {
            continue;
        }

        match insn.inner.mnemonic() {
            Mnemonic::Mov => {
                if let Some(imm) = mov_immediate(insn) {
                    return Some(imm);
                }
                if insn.inner.op1_kind() == OpKind::Register {
                    match reg_class(insn.inner.op1_register()) {
                        Some(source) => {
                            debug!("[shifting focus to {source:?}]");
                            focus = source;
                            continue;
                        }
                        None => return None,
                    }
                }
                // A load from memory; past the supported pattern set.
                debug!("[operation not supported]");
                return None;
            }
            Mnemonic::Xor
                if insn.inner.op0_kind() == OpKind::Register
                    && insn.inner.op1_kind() == OpKind::Register
                    && insn.inner.op0_register() == insn.inner.op1_register() =>
            {
                return Some(0);
            }
            _ => {
                debug!("[operation not supported]");
                return None;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::disassemble;

    fn decode(code: &[u8]) -> Vec<Insn> {
        let (insns, invalid) = disassemble(code, 0x1000, false);
        assert!(invalid.is_none());
        insns
    }

    fn syscall_index(insns: &[Insn]) -> usize {
        insns
            .iter()
            .position(|i| i.is_syscall_trap())
            .expect("no syscall instruction in fixture")
    }

    #[test]
    fn resolves_mov_immediate() {
        // mov eax, 0x27; syscall
        let insns = decode(&[0xb8, 0x27, 0x00, 0x00, 0x00, 0x0f, 0x05]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 20), Some(0x27));
    }

    #[test]
    fn resolves_xor_self_to_zero() {
        // xor eax, eax; syscall
        let insns = decode(&[0x31, 0xc0, 0x0f, 0x05]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 20), Some(0));
    }

    #[test]
    fn follows_register_chain() {
        // mov ebx, 5; mov eax, ebx; syscall
        let insns = decode(&[0xbb, 0x05, 0x00, 0x00, 0x00, 0x89, 0xd8, 0x0f, 0x05]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 20), Some(5));
    }

    #[test]
    fn unsupported_write_stops_resolution() {
        // mov eax, 7; add eax, 1; syscall -- the add clobbers the chain.
        let insns = decode(&[
            0xb8, 0x07, 0x00, 0x00, 0x00, // mov eax, 7
            0x83, 0xc0, 0x01, // add eax, 1
            0x0f, 0x05, // syscall
        ]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 20), None);
    }

    #[test]
    fn ignores_writes_to_other_registers() {
        // mov eax, 1; mov edi, 0x2a; syscall -- edi is argument setup.
        let insns = decode(&[
            0xb8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
            0xbf, 0x2a, 0x00, 0x00, 0x00, // mov edi, 0x2a
            0x0f, 0x05, // syscall
        ]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 20), Some(1));
    }

    #[test]
    fn load_from_memory_is_unresolved() {
        // mov eax, [rdi]; syscall
        let insns = decode(&[0x8b, 0x07, 0x0f, 0x05]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 20), None);
    }

    #[test]
    fn window_limits_the_walk() {
        // mov eax, 3; nop; nop; nop; syscall with a window of 2 never
        // reaches the mov.
        let insns = decode(&[0xb8, 0x03, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90, 0x0f, 0x05]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 2), None);
        assert_eq!(resolve_syscall_number(&insns, idx, 4), Some(3));
    }

    #[test]
    fn sixty_four_bit_mov_resolves() {
        // mov rax, 60; syscall
        let insns = decode(&[0x48, 0xc7, 0xc0, 0x3c, 0x00, 0x00, 0x00, 0x0f, 0x05]);
        let idx = syscall_index(&insns);
        assert_eq!(resolve_syscall_number(&insns, idx, 20), Some(60));
    }
}
