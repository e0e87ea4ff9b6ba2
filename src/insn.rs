//! Instruction decoding over raw section bytes.

use iced_x86::{
    Decoder, DecoderOptions, FlowControl, Formatter, Instruction, IntelFormatter, OpKind,
};

/// One decoded instruction together with its raw bytes.
#[derive(Debug, Clone)]
pub struct Insn {
    pub inner: Instruction,
    pub bytes: Vec<u8>,
}

impl Insn {
    pub fn address(&self) -> u64 {
        self.inner.ip()
    }

    pub fn is_invalid(&self) -> bool {
        self.inner.is_invalid()
    }

    /// Syscall-trapping instructions are recognised by their leading
    /// opcode bytes, independent of any operand decoding:
    /// 0F 05 (syscall), 0F 34 (sysenter), CD 80 (int 0x80).
    pub fn is_syscall_trap(&self) -> bool {
        matches!(
            self.bytes.as_slice(),
            [0x0f, 0x05, ..] | [0x0f, 0x34, ..] | [0xcd, 0x80, ..]
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self.inner.flow_control(),
            FlowControl::Call | FlowControl::IndirectCall
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.inner.flow_control(),
            FlowControl::Call
                | FlowControl::IndirectCall
                | FlowControl::UnconditionalBranch
                | FlowControl::IndirectBranch
                | FlowControl::ConditionalBranch
        )
    }

    /// Target address of a direct near call/jump. Indirect targets
    /// (register or memory operands) are not resolvable statically.
    pub fn branch_target(&self) -> Option<u64> {
        match self.inner.op0_kind() {
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                Some(self.inner.near_branch_target())
            }
            _ => None,
        }
    }

    /// Intel-syntax rendering, for diagnostics.
    pub fn display(&self) -> String {
        let mut out = String::new();
        let mut formatter = IntelFormatter::new();
        formatter.format(&self.inner, &mut out);
        out
    }
}

/// Decode `bytes` as 64-bit code starting at virtual address `base`.
///
/// On unparseable bytes: with `skip_data` the invalid instruction is kept
/// in the stream (so indices stay aligned) and decoding continues after
/// it; without it the sub-stream halts there. Either way the first such
/// address is returned so the caller can report the misclassification
/// risk.
pub fn disassemble(bytes: &[u8], base: u64, skip_data: bool) -> (Vec<Insn>, Option<u64>) {
    let mut decoder = Decoder::with_ip(64, bytes, base, DecoderOptions::NONE);
    let mut insns = Vec::new();
    let mut first_invalid = None;

    while decoder.can_decode() {
        let start = decoder.position();
        let inner = decoder.decode();
        let end = decoder.position();
        let insn = Insn {
            inner,
            bytes: bytes[start..end].to_vec(),
        };

        if insn.is_invalid() {
            if first_invalid.is_none() {
                first_invalid = Some(insn.address());
            }
            if !skip_data {
                break;
            }
        }
        insns.push(insn);
    }

    (insns, first_invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_syscall_traps_by_opcode_bytes() {
        // syscall; sysenter; int 0x80; ret
        let code = [0x0f, 0x05, 0x0f, 0x34, 0xcd, 0x80, 0xc3];
        let (insns, invalid) = disassemble(&code, 0x1000, false);
        assert!(invalid.is_none());
        assert_eq!(insns.len(), 4);
        assert!(insns[0].is_syscall_trap());
        assert!(insns[1].is_syscall_trap());
        assert!(insns[2].is_syscall_trap());
        assert!(!insns[3].is_syscall_trap());
    }

    #[test]
    fn resolves_direct_near_call_targets() {
        // call +0x10; jmp -0x20; call rax
        let code = [
            0xe8, 0x10, 0x00, 0x00, 0x00, // call 0x1015
            0xe9, 0xe0, 0xff, 0xff, 0xff, // jmp 0xfea
            0xff, 0xd0, // call rax
        ];
        let (insns, _) = disassemble(&code, 0x1000, false);
        assert_eq!(insns.len(), 3);
        assert!(insns[0].is_call() && insns[0].is_branch());
        assert_eq!(insns[0].branch_target(), Some(0x1015));
        assert_eq!(insns[1].branch_target(), Some(0xfea));
        assert!(insns[2].is_call());
        assert_eq!(insns[2].branch_target(), None);
    }

    #[test]
    fn halts_on_unparseable_bytes_by_default() {
        // A lone 0x06 is not a valid 64-bit instruction.
        let code = [0x90, 0x06, 0x90, 0x90];
        let (insns, invalid) = disassemble(&code, 0, false);
        assert_eq!(invalid, Some(1));
        assert_eq!(insns.len(), 1);

        let (insns, invalid) = disassemble(&code, 0, true);
        assert_eq!(invalid, Some(1));
        // The invalid byte stays in the stream and decoding resumes.
        assert!(insns.len() >= 3);
        assert!(insns[1].is_invalid());
        assert!(insns.last().is_some_and(|i| !i.is_invalid()));
    }
}
