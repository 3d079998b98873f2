//! Classic BPF programs and the kernel descriptor that points at them.
//!
//! A [`FilterProgram`] owns its instructions in a boxed slice, so the buffer
//! can never grow or move once built. The only way to obtain a [`SockFprog`]
//! is [`FilterProgram::descriptor`], which borrows the program: the borrow
//! checker keeps the instructions alive and unmodified for as long as the
//! descriptor (and therefore the pointer handed to the kernel) exists.

use std::marker::PhantomData;

use crate::error::ProbeError;

// ---------------------------------------------------------------------------
// FFI types
// ---------------------------------------------------------------------------

/// A single classic BPF instruction, matching the kernel `struct sock_filter`.
///
/// - `code` (u16): opcode composed of class | size | mode
/// - `jt`   (u8):  jump-true offset
/// - `jf`   (u8):  jump-false offset
/// - `k`    (u32): generic operand
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

const _: () = assert!(std::mem::size_of::<SockFilter>() == 8);

/// Kernel `struct sock_fprog` borrowing a [`FilterProgram`].
///
/// Only valid while the program it was taken from is borrowed; it is meant
/// to be built right before the attach call and dropped right after.
#[repr(C)]
#[derive(Debug)]
pub struct SockFprog<'a> {
    len: u16,
    filter: *const SockFilter,
    _program: PhantomData<&'a [SockFilter]>,
}

impl SockFprog<'_> {
    /// Instruction count as seen by the kernel.
    pub fn len(&self) -> u16 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first instruction.
    pub fn as_ptr(&self) -> *const SockFilter {
        self.filter
    }
}

/// Largest instruction count representable in `sock_fprog.len`.
///
/// Linux itself caps classic programs at `BPF_MAXINSNS` (4096); longer
/// programs that still fit 16 bits are rejected by the kernel, not here.
pub const MAX_PROGRAM_LEN: usize = u16::MAX as usize;

// ---------------------------------------------------------------------------
// Classic BPF opcode constants
// ---------------------------------------------------------------------------

// Instruction classes
pub const BPF_LD: u16 = 0x00;
pub const BPF_LDX: u16 = 0x01;
pub const BPF_ST: u16 = 0x02;
pub const BPF_STX: u16 = 0x03;
pub const BPF_ALU: u16 = 0x04;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;
pub const BPF_MISC: u16 = 0x07;

// LD/LDX sizes
pub const BPF_W: u16 = 0x00;
pub const BPF_H: u16 = 0x08;
pub const BPF_B: u16 = 0x10;

// LD/LDX modes
pub const BPF_IMM: u16 = 0x00;
pub const BPF_ABS: u16 = 0x20;
pub const BPF_IND: u16 = 0x40;
pub const BPF_MEM: u16 = 0x60;
pub const BPF_MSH: u16 = 0xa0; // 4*(data[k] & 0xf)

// JMP operations
pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JGT: u16 = 0x20;
pub const BPF_JGE: u16 = 0x30;
pub const BPF_JSET: u16 = 0x40;

// Operand source
pub const BPF_K: u16 = 0x00;
pub const BPF_X: u16 = 0x08;

/// Snap length returned by the canned accept program.
pub const ACCEPT_SNAPLEN: u32 = 0xFFFF;

/// Construct a single instruction.
pub const fn insn(code: u16, jt: u8, jf: u8, k: u32) -> SockFilter {
    SockFilter { code, jt, jf, k }
}

// ---------------------------------------------------------------------------
// FilterProgram
// ---------------------------------------------------------------------------

/// A non-empty, pre-assembled classic BPF program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterProgram {
    insns: Box<[SockFilter]>,
}

impl FilterProgram {
    /// Take ownership of already-assembled instructions.
    ///
    /// Opcodes are not validated; the kernel does that on attach.
    pub fn new(insns: Vec<SockFilter>) -> Result<Self, ProbeError> {
        if insns.is_empty() {
            return Err(ProbeError::FilterEmpty);
        }
        Ok(Self {
            insns: insns.into_boxed_slice(),
        })
    }

    /// Build from a fixed-size array; emptiness is rejected at compile time.
    pub fn from_array<const N: usize>(insns: [SockFilter; N]) -> Self {
        const { assert!(N > 0, "filter program must not be empty") };
        Self {
            insns: Box::new(insns),
        }
    }

    /// `ret #65535`: deliver every packet.
    pub fn accept_all() -> Self {
        Self::from_array([insn(BPF_RET | BPF_K, 0, 0, ACCEPT_SNAPLEN)])
    }

    /// `ret #0`: deliver nothing.
    pub fn drop_all() -> Self {
        Self::from_array([insn(BPF_RET | BPF_K, 0, 0, 0)])
    }

    /// Parse the decimal bytecode emitted by `tcpdump -ddd`.
    ///
    /// The first entry is the instruction count, every following entry is
    /// `code jt jf k`. Entries may be separated by newlines or commas, so the
    /// single-line form accepted by `iptables -m bpf --bytecode` also parses.
    pub fn parse_ddd(text: &str) -> Result<Self, ProbeError> {
        let mut entries = text
            .split(['\n', ','])
            .enumerate()
            .map(|(i, s)| (i + 1, s.trim()))
            .filter(|(_, s)| !s.is_empty());

        let (line, count) = entries.next().ok_or(ProbeError::FilterEmpty)?;
        let count: usize = count.parse().map_err(|_| ProbeError::FilterParse {
            line,
            detail: format!("'{count}' is not an instruction count"),
        })?;

        let mut insns = Vec::with_capacity(count.min(MAX_PROGRAM_LEN));
        for (line, entry) in entries {
            insns.push(parse_ddd_insn(line, entry)?);
        }

        if insns.len() != count {
            return Err(ProbeError::FilterParse {
                line: 1,
                detail: format!(
                    "header declares {count} instructions, found {}",
                    insns.len()
                ),
            });
        }

        Self::new(insns)
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn instructions(&self) -> &[SockFilter] {
        &self.insns
    }

    /// Borrow the program as a kernel descriptor.
    ///
    /// Fails with [`ProbeError::FilterTooLarge`] when the instruction count
    /// does not fit the 16-bit `len` field.
    pub fn descriptor(&self) -> Result<SockFprog<'_>, ProbeError> {
        let len = u16::try_from(self.insns.len()).map_err(|_| ProbeError::FilterTooLarge {
            len: self.insns.len(),
            max: MAX_PROGRAM_LEN,
        })?;
        Ok(SockFprog {
            len,
            filter: self.insns.as_ptr(),
            _program: PhantomData,
        })
    }
}

fn parse_ddd_insn(line: usize, entry: &str) -> Result<SockFilter, ProbeError> {
    let fields: Vec<&str> = entry.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(ProbeError::FilterParse {
            line,
            detail: format!("expected 4 fields, found {}", fields.len()),
        });
    }

    fn field<T: std::str::FromStr>(line: usize, name: &str, s: &str) -> Result<T, ProbeError> {
        s.parse().map_err(|_| ProbeError::FilterParse {
            line,
            detail: format!("{name} '{s}' out of range"),
        })
    }

    Ok(SockFilter {
        code: field(line, "code", fields[0])?,
        jt: field(line, "jt", fields[1])?,
        jf: field(line, "jf", fields[2])?,
        k: field(line, "k", fields[3])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_empty_program_rejected() {
        let err = FilterProgram::new(Vec::new()).unwrap_err();
        assert!(matches!(err, ProbeError::FilterEmpty));
    }

    #[test]
    fn ut_single_instruction_descriptor() {
        let prog = FilterProgram::accept_all();
        let fprog = prog.descriptor().unwrap();
        assert_eq!(fprog.len(), 1);
        assert_eq!(fprog.as_ptr(), prog.instructions().as_ptr());
        assert_eq!(
            prog.instructions()[0],
            insn(BPF_RET | BPF_K, 0, 0, ACCEPT_SNAPLEN)
        );
    }

    #[test]
    fn ut_descriptor_at_u16_limit() {
        let prog =
            FilterProgram::new(vec![insn(BPF_RET | BPF_K, 0, 0, 0); MAX_PROGRAM_LEN]).unwrap();
        assert_eq!(prog.descriptor().unwrap().len(), u16::MAX);
    }

    #[test]
    fn ut_descriptor_too_large() {
        let prog =
            FilterProgram::new(vec![insn(BPF_RET | BPF_K, 0, 0, 0); MAX_PROGRAM_LEN + 1]).unwrap();
        match prog.descriptor() {
            Err(ProbeError::FilterTooLarge { len, max }) => {
                assert_eq!(len, 65_536);
                assert_eq!(max, 65_535);
            }
            other => panic!("expected FilterTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn ut_descriptor_layout_matches_kernel() {
        // struct sock_fprog { unsigned short len; struct sock_filter *filter; }
        assert_eq!(
            std::mem::size_of::<SockFprog<'_>>(),
            2 * std::mem::size_of::<usize>()
        );
        assert_eq!(
            std::mem::align_of::<SockFprog<'_>>(),
            std::mem::align_of::<usize>()
        );
    }

    #[test]
    fn ut_drop_all_returns_zero() {
        let prog = FilterProgram::drop_all();
        assert_eq!(prog.len(), 1);
        assert_eq!(prog.instructions()[0].code, BPF_RET | BPF_K);
        assert_eq!(prog.instructions()[0].k, 0);
    }

    #[test]
    fn ut_parse_ddd_tcpdump_output() {
        // tcpdump -ddd ip
        let text = "4\n40 0 0 12\n21 0 1 2048\n6 0 0 262144\n6 0 0 0\n";
        let prog = FilterProgram::parse_ddd(text).unwrap();
        assert_eq!(prog.len(), 4);
        assert_eq!(prog.instructions()[0], insn(BPF_LD | BPF_H | BPF_ABS, 0, 0, 12));
        assert_eq!(prog.instructions()[1], insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, 0x0800));
        assert_eq!(prog.instructions()[2].k, 262_144);
    }

    #[test]
    fn ut_parse_ddd_comma_separated() {
        let prog = FilterProgram::parse_ddd("1,6 0 0 65535").unwrap();
        assert_eq!(prog, FilterProgram::accept_all());
    }

    #[test]
    fn ut_parse_ddd_count_mismatch() {
        let err = FilterProgram::parse_ddd("2\n6 0 0 0\n").unwrap_err();
        assert!(matches!(err, ProbeError::FilterParse { line: 1, .. }));
    }

    #[test]
    fn ut_parse_ddd_bad_field() {
        let err = FilterProgram::parse_ddd("1\n6 0 300 0\n").unwrap_err();
        match err {
            ProbeError::FilterParse { line, detail } => {
                assert_eq!(line, 2);
                assert!(detail.contains("jf"));
            }
            other => panic!("expected FilterParse, got {other:?}"),
        }
    }

    #[test]
    fn ut_parse_ddd_wrong_arity() {
        let err = FilterProgram::parse_ddd("1\n6 0 0\n").unwrap_err();
        assert!(matches!(err, ProbeError::FilterParse { line: 2, .. }));
    }

    #[test]
    fn ut_parse_ddd_empty_input() {
        assert!(matches!(
            FilterProgram::parse_ddd("  \n"),
            Err(ProbeError::FilterEmpty)
        ));
        assert!(matches!(
            FilterProgram::parse_ddd("0\n"),
            Err(ProbeError::FilterEmpty)
        ));
    }
}
