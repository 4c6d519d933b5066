//! Deferred line-program deltas that span unresolved layout.
//!
//! When two consecutive rows live in different fragments the address
//! distance between them is not known until layout converges.  The emitter
//! then hands a [`LineDelta`] to the layout engine instead of bytes; the
//! engine sizes it with [`Relax::estimate`] / [`Relax::relax`] and finally
//! asks it to [`Relax::finalize`].

use alloc::vec::Vec;

use crate::codec::DeltaCodec;
use crate::error::DwarfError;
use crate::layout::{Position, Relax, Resolve};

/// A line/address advance between two positions in different fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDelta {
    codec: DeltaCodec,
    line_delta: i32,
    /// Address of the running row.
    from: Position,
    /// Address of the new row.
    to: Position,
    /// Encoded size for the largest possible address delta.
    max_len: usize,
    /// Working size from the last estimate.
    size: usize,
}

impl LineDelta {
    /// Create a record. Its working size starts at the worst case.
    pub fn new(codec: DeltaCodec, line_delta: i32, from: Position, to: Position) -> Self {
        let max_len = codec.max_size_of(line_delta);
        Self {
            codec,
            line_delta,
            from,
            to,
            max_len,
            size: max_len,
        }
    }

    /// The line delta this record encodes.
    pub fn line_delta(&self) -> i32 {
        self.line_delta
    }

    /// Upper bound on the encoded size.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn guessed_addr_delta(&self, layout: &dyn Resolve) -> Option<u64> {
        let from = layout.guess(self.from)?;
        let to = layout.guess(self.to)?;
        Some(to.saturating_sub(from))
    }
}

impl Relax for LineDelta {
    fn estimate(&mut self, layout: &dyn Resolve) -> usize {
        // Unknown positions keep the worst case so the working size stays an
        // upper bound until finalize reports them.
        self.size = match self.guessed_addr_delta(layout) {
            Some(addr_delta) => self.codec.size_of(self.line_delta, addr_delta),
            None => self.max_len,
        };
        self.size
    }

    fn relax(&mut self, layout: &dyn Resolve) -> isize {
        let old = self.size;
        self.estimate(layout) as isize - old as isize
    }

    fn finalize(&mut self, layout: &dyn Resolve, out: &mut Vec<u8>) -> Result<(), DwarfError> {
        let from = layout
            .resolve(self.from)
            .ok_or(DwarfError::UnresolvedPosition {
                position: self.from,
            })?;
        let to = layout
            .resolve(self.to)
            .ok_or(DwarfError::UnresolvedPosition { position: self.to })?;
        if to < from {
            return Err(DwarfError::BackwardAddress { from, to });
        }
        self.codec.check_advance(to - from)?;

        let written = self.codec.emit(self.line_delta, to - from, out);
        if written != self.size {
            return Err(DwarfError::RelaxationMismatch {
                expected: self.size,
                actual: written,
            });
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{lns, END_SEQUENCE};
    use crate::layout::SectionId;
    use alloc::vec;

    /// Fixed address table keyed by fragment index of section 0.
    struct Table {
        addrs: Vec<u64>,
        converged: bool,
    }

    impl Resolve for Table {
        fn guess(&self, pos: Position) -> Option<u64> {
            self.addrs.get(pos.fragment).map(|a| a + pos.offset)
        }

        fn resolve(&self, pos: Position) -> Option<u64> {
            if self.converged {
                self.guess(pos)
            } else {
                None
            }
        }
    }

    fn pos(fragment: usize, offset: u64) -> Position {
        Position::new(SectionId(0), fragment, offset)
    }

    #[test]
    fn starts_at_worst_case() {
        let rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(1, 0));
        assert_eq!(rec.size(), rec.max_len());
        assert_eq!(rec.line_delta(), 1);
    }

    #[test]
    fn estimate_is_stable() {
        let table = Table {
            addrs: vec![0, 4],
            converged: false,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(1, 0));
        assert_eq!(rec.estimate(&table), 1);
        assert_eq!(rec.relax(&table), 0);
        assert_eq!(rec.estimate(&table), 1);
    }

    #[test]
    fn relax_reports_growth() {
        let mut table = Table {
            addrs: vec![0, 4],
            converged: false,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(1, 0));
        rec.estimate(&table);
        table.addrs[1] = 1000;
        // advance_pc uleb(1000) (3 bytes) + special
        assert_eq!(rec.relax(&table), 3);
        assert_eq!(rec.size(), 4);
    }

    #[test]
    fn finalize_writes_estimated_bytes() {
        let mut table = Table {
            addrs: vec![0, 4],
            converged: false,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(1, 0));
        rec.estimate(&table);
        table.converged = true;
        let mut out = Vec::new();
        rec.finalize(&table, &mut out).unwrap();
        assert_eq!(out, vec![72]);
    }

    #[test]
    fn finalize_before_convergence_fails() {
        let table = Table {
            addrs: vec![0, 4],
            converged: false,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(1, 0));
        rec.estimate(&table);
        let mut out = Vec::new();
        let err = rec.finalize(&table, &mut out).unwrap_err();
        assert!(matches!(err, DwarfError::UnresolvedPosition { .. }));
    }

    #[test]
    fn finalize_detects_stale_estimate() {
        let mut table = Table {
            addrs: vec![0, 4],
            converged: false,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(1, 0));
        rec.estimate(&table);
        table.addrs[1] = 100_000;
        table.converged = true;
        let mut out = Vec::new();
        let err = rec.finalize(&table, &mut out).unwrap_err();
        assert_eq!(
            err,
            DwarfError::RelaxationMismatch {
                expected: 1,
                actual: 5
            }
        );
    }

    #[test]
    fn finalize_rejects_backward_addresses() {
        let table = Table {
            addrs: vec![8, 4],
            converged: true,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(1, 0));
        rec.estimate(&table);
        let mut out = Vec::new();
        let err = rec.finalize(&table, &mut out).unwrap_err();
        assert_eq!(err, DwarfError::BackwardAddress { from: 8, to: 4 });
    }

    #[test]
    fn end_sequence_record() {
        let table = Table {
            addrs: vec![0, 40],
            converged: true,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), END_SEQUENCE, pos(0, 0), pos(1, 0));
        assert_eq!(rec.estimate(&table), 5);
        let mut out = Vec::new();
        rec.finalize(&table, &mut out).unwrap();
        assert_eq!(out, vec![lns::ADVANCE_PC, 40, 0, 1, 1]);
    }

    #[test]
    fn unknown_position_keeps_worst_case() {
        let table = Table {
            addrs: vec![0],
            converged: false,
        };
        let mut rec = LineDelta::new(DeltaCodec::default(), 1, pos(0, 0), pos(5, 0));
        assert_eq!(rec.estimate(&table), rec.max_len());
        assert_eq!(rec.relax(&table), 0);
    }

    #[test]
    fn finalize_rejects_partial_instruction_advance() {
        let table = Table {
            addrs: vec![0, 3],
            converged: true,
        };
        let mut rec = LineDelta::new(DeltaCodec::new(2), 1, pos(0, 0), pos(1, 0));
        rec.estimate(&table);
        let mut out = Vec::new();
        let err = rec.finalize(&table, &mut out).unwrap_err();
        assert_eq!(
            err,
            DwarfError::UnalignedAdvance {
                delta: 3,
                min_insn_length: 2
            }
        );
        assert!(out.is_empty());
    }
}
