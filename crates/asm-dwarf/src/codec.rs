//! Line/address delta encoding for the DWARF line-number program.
//!
//! A pair `(line_delta, addr_delta)` is turned into the shortest opcode
//! sequence from the DWARF 2 opcode set, preferring in order:
//!
//! 1. a single special opcode,
//! 2. `DW_LNS_const_add_pc` followed by a special opcode,
//! 3. `DW_LNS_advance_pc` followed by `DW_LNS_copy` or a special opcode.
//!
//! Line deltas outside the special-opcode window are emitted first with
//! `DW_LNS_advance_line`.  [`END_SEQUENCE`] as the line delta closes the
//! sequence instead of adding a row.
//!
//! Both [`DeltaCodec::size_of`] and [`DeltaCodec::emit`] are driven by the
//! same [`DeltaCodec::plan`], so the size reported before layout is final
//! always equals the number of bytes written afterwards.

use alloc::vec::Vec;

use crate::error::DwarfError;
use crate::leb128::{sleb128_len, uleb128_len, write_sleb128, write_uleb128};

// ─── Format constants ──────────────────────────────────────

/// First special opcode.
pub const OPCODE_BASE: u8 = 10;
/// Smallest line increment a special opcode can express.
pub const LINE_BASE: i8 = -5;
/// Number of distinct line increments per address step.
pub const LINE_RANGE: u8 = 14;
/// Largest address step (in instruction units) reachable with one special opcode.
pub const MAX_SPECIAL_ADDR_DELTA: u64 = (255 - OPCODE_BASE as u64) / LINE_RANGE as u64;
/// Line delta that closes the sequence with `DW_LNE_end_sequence`.
pub const END_SEQUENCE: i32 = i32::MAX;

/// Argument counts of standard opcodes `1..OPCODE_BASE`.
pub const STANDARD_OPCODE_LENGTHS: [u8; OPCODE_BASE as usize - 1] = [0, 1, 1, 1, 1, 0, 0, 0, 1];

/// `DW_LNS_*` standard opcodes.
pub mod lns {
    /// Append a row.
    pub const COPY: u8 = 1;
    /// Advance the address by a ULEB128 operand.
    pub const ADVANCE_PC: u8 = 2;
    /// Advance the line by an SLEB128 operand.
    pub const ADVANCE_LINE: u8 = 3;
    /// Set the file register.
    pub const SET_FILE: u8 = 4;
    /// Set the column register.
    pub const SET_COLUMN: u8 = 5;
    /// Toggle `is_stmt`.
    pub const NEGATE_STMT: u8 = 6;
    /// Mark the next row as starting a basic block.
    pub const SET_BASIC_BLOCK: u8 = 7;
    /// Advance the address by the address step of special opcode 255.
    pub const CONST_ADD_PC: u8 = 8;
    /// Advance the address by an unscaled `u16` operand.
    pub const FIXED_ADVANCE_PC: u8 = 9;
}

/// `DW_LNE_*` extended opcodes (introduced by a `0` byte and a ULEB128 length).
pub mod lne {
    /// Close the sequence.
    pub const END_SEQUENCE: u8 = 1;
    /// Set the address register to an absolute value.
    pub const SET_ADDRESS: u8 = 2;
    /// Define a file inline.
    pub const DEFINE_FILE: u8 = 3;
}

/// Bytes of the `DW_LNE_end_sequence` extended opcode.
pub const END_SEQUENCE_BYTES: [u8; 3] = [0, 1, lne::END_SEQUENCE];

// ─── Plan ──────────────────────────────────────────────────

/// One opcode of an encoded delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `DW_LNS_advance_line` with its signed operand.
    AdvanceLine(i64),
    /// `DW_LNS_advance_pc` with its (already scaled) operand.
    AdvancePc(u64),
    /// `DW_LNS_const_add_pc`.
    ConstAddPc,
    /// `DW_LNS_copy`.
    Copy,
    /// A special opcode byte.
    Special(u8),
    /// `DW_LNE_end_sequence`.
    EndSequence,
}

impl Step {
    /// Encoded size of this step in bytes.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            Step::AdvanceLine(d) => 1 + sleb128_len(d),
            Step::AdvancePc(n) => 1 + uleb128_len(n),
            Step::ConstAddPc | Step::Copy | Step::Special(_) => 1,
            Step::EndSequence => END_SEQUENCE_BYTES.len(),
        }
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            Step::AdvanceLine(d) => {
                out.push(lns::ADVANCE_LINE);
                write_sleb128(out, d);
            }
            Step::AdvancePc(n) => {
                out.push(lns::ADVANCE_PC);
                write_uleb128(out, n);
            }
            Step::ConstAddPc => out.push(lns::CONST_ADD_PC),
            Step::Copy => out.push(lns::COPY),
            Step::Special(op) => out.push(op),
            Step::EndSequence => out.extend_from_slice(&END_SEQUENCE_BYTES),
        }
    }
}

/// The opcode sequence chosen for one delta pair (at most three steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    steps: [Step; 3],
    len: u8,
}

impl Plan {
    fn new() -> Self {
        Self {
            steps: [Step::Copy; 3],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, step: Step) {
        self.steps[self.len as usize] = step;
        self.len += 1;
    }

    /// The chosen steps in emission order.
    pub fn steps(&self) -> &[Step] {
        &self.steps[..self.len as usize]
    }

    /// Total encoded size.
    pub fn size(&self) -> usize {
        self.steps().iter().map(|s| s.size()).sum()
    }

    /// Append the encoded bytes to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        for step in self.steps() {
            step.write(out);
        }
    }
}

// ─── Codec ─────────────────────────────────────────────────

/// Delta encoder parameterized by the target's minimum instruction length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaCodec {
    min_insn_length: u8,
}

impl Default for DeltaCodec {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DeltaCodec {
    /// Create a codec. A `min_insn_length` of 0 is treated as 1.
    pub const fn new(min_insn_length: u8) -> Self {
        Self {
            min_insn_length: if min_insn_length == 0 {
                1
            } else {
                min_insn_length
            },
        }
    }

    /// Minimum instruction length written to the header.
    pub fn min_insn_length(&self) -> u8 {
        self.min_insn_length
    }

    /// Reject an address advance the line program cannot express.
    ///
    /// Advances are encoded in units of the minimum instruction length, so
    /// `addr_delta` must be a multiple of it.
    pub fn check_advance(&self, addr_delta: u64) -> Result<(), DwarfError> {
        if addr_delta % u64::from(self.min_insn_length) == 0 {
            Ok(())
        } else {
            Err(DwarfError::UnalignedAdvance {
                delta: addr_delta,
                min_insn_length: self.min_insn_length,
            })
        }
    }

    /// Choose the opcode sequence for `(line_delta, addr_delta)`.
    ///
    /// `addr_delta` is in bytes and is divided by the minimum instruction
    /// length before encoding; callers validate it with
    /// [`DeltaCodec::check_advance`] first.
    pub fn plan(&self, line_delta: i32, addr_delta: u64) -> Plan {
        let mut plan = Plan::new();
        let addr_delta = addr_delta / u64::from(self.min_insn_length);

        // The end_sequence row must carry the final address, so special
        // opcodes (which append their own row) are never used here.
        if line_delta == END_SEQUENCE {
            if addr_delta == MAX_SPECIAL_ADDR_DELTA {
                plan.push(Step::ConstAddPc);
            } else if addr_delta != 0 {
                plan.push(Step::AdvancePc(addr_delta));
            }
            plan.push(Step::EndSequence);
            return plan;
        }

        let mut line_delta = i64::from(line_delta);
        let mut bias = line_delta - i64::from(LINE_BASE);
        let mut need_copy = false;

        if !(0..i64::from(LINE_RANGE)).contains(&bias) {
            plan.push(Step::AdvanceLine(line_delta));
            line_delta = 0;
            bias = -i64::from(LINE_BASE);
            need_copy = true;
        }

        // DW_LNS_copy reads better than a "line +0, addr +0" special opcode.
        if line_delta == 0 && addr_delta == 0 {
            plan.push(Step::Copy);
            return plan;
        }

        let base = bias as u64 + u64::from(OPCODE_BASE);

        // Bounded so the multiplication below cannot overflow.
        if addr_delta < 256 + MAX_SPECIAL_ADDR_DELTA {
            let opcode = base + addr_delta * u64::from(LINE_RANGE);
            if opcode <= 255 {
                plan.push(Step::Special(opcode as u8));
                return plan;
            }

            if addr_delta >= MAX_SPECIAL_ADDR_DELTA {
                let opcode =
                    base + (addr_delta - MAX_SPECIAL_ADDR_DELTA) * u64::from(LINE_RANGE);
                if opcode <= 255 {
                    plan.push(Step::ConstAddPc);
                    plan.push(Step::Special(opcode as u8));
                    return plan;
                }
            }
        }

        plan.push(Step::AdvancePc(addr_delta));
        if need_copy {
            plan.push(Step::Copy);
        } else {
            plan.push(Step::Special(base as u8));
        }
        plan
    }

    /// Number of bytes [`DeltaCodec::emit`] writes for this pair.
    #[inline]
    pub fn size_of(&self, line_delta: i32, addr_delta: u64) -> usize {
        self.plan(line_delta, addr_delta).size()
    }

    /// Append the encoding of `(line_delta, addr_delta)` to `out`, returning
    /// the number of bytes written.
    pub fn emit(&self, line_delta: i32, addr_delta: u64, out: &mut Vec<u8>) -> usize {
        let plan = self.plan(line_delta, addr_delta);
        let start = out.len();
        plan.write(out);
        let written = out.len() - start;
        debug_assert_eq!(written, plan.size());
        written
    }

    /// Upper bound on the encoded size for `line_delta` over every address delta.
    pub fn max_size_of(&self, line_delta: i32) -> usize {
        self.size_of(line_delta, u64::MAX)
    }
}
