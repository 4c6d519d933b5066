//! `.debug_line` emission: header, file table and one sequence per unit.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::codec::{
    lne, lns, DeltaCodec, END_SEQUENCE, LINE_BASE, LINE_RANGE, OPCODE_BASE,
    STANDARD_OPCODE_LENGTHS,
};
use crate::config::LineConfig;
use crate::error::DwarfError;
use crate::files::{FileIndex, FileTable};
use crate::layout::{Layout, Position, RelocTarget, Relocation, SectionId, SectionKind};
use crate::leb128::write_uleb128;
use crate::relax::LineDelta;
use crate::samples::{LocationSample, StmtFlags};

/// Name of the line-number program section.
pub const DEBUG_LINE: &str = ".debug_line";

/// Address range covered by one emitted sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRange {
    /// The code section the sequence describes.
    pub section: SectionId,
    /// Start of the section.
    pub start: Position,
    /// End of the section at emission time.
    pub end: Position,
}

/// Row registers carried between samples of one sequence.
#[derive(Debug, Clone, Copy)]
struct Registers {
    file: FileIndex,
    line: u32,
    column: u32,
    is_stmt: bool,
}

impl Registers {
    fn new(default_is_stmt: bool) -> Self {
        Self {
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
        }
    }
}

/// Fixed bytes not yet handed to the layout.
#[derive(Debug, Default)]
struct Pending {
    bytes: Vec<u8>,
    relocations: Vec<Relocation>,
}

impl Pending {
    fn flush(&mut self, layout: &mut Layout, id: SectionId) {
        if !self.bytes.is_empty() {
            layout.append_with_relocations(id, &self.bytes, &self.relocations);
        }
        self.bytes.clear();
        self.relocations.clear();
    }
}

/// Writes the line-number program for every unit into `.debug_line`.
pub(crate) struct LineProgramWriter<'a> {
    layout: &'a mut Layout,
    config: &'a LineConfig,
    codec: DeltaCodec,
    section: SectionId,
    pending: Pending,
}

impl<'a> LineProgramWriter<'a> {
    pub(crate) fn new(layout: &'a mut Layout, config: &'a LineConfig) -> Self {
        let section = layout.add_section(DEBUG_LINE, SectionKind::Debug);
        Self {
            layout,
            config,
            codec: DeltaCodec::new(config.min_insn_length()),
            section,
            pending: Pending::default(),
        }
    }

    /// Emit the header, file table and one sequence per unit.
    ///
    /// Returns the `.debug_line` section, its start, and the covered ranges.
    pub(crate) fn emit(
        mut self,
        files: &FileTable,
        units: Vec<(SectionId, Vec<LocationSample>)>,
        diagnostics: &mut Vec<DwarfError>,
    ) -> Result<(SectionId, Position, Vec<UnitRange>), DwarfError> {
        let mut header = Vec::with_capacity(32);
        header.extend_from_slice(&0u32.to_le_bytes()); // unit_length, patched
        header.extend_from_slice(&2u16.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // header_length, patched
        header.push(self.codec.min_insn_length());
        header.push(u8::from(self.config.is_stmt_default()));
        header.push(LINE_BASE as u8);
        header.push(LINE_RANGE);
        header.push(OPCODE_BASE);
        header.extend_from_slice(&STANDARD_OPCODE_LENGTHS);
        files.emit(&mut header, diagnostics);

        let start = self.layout.append(self.section, &header);
        let after_length = Position {
            offset: start.offset + 4,
            ..start
        };
        let header_length_at = Position {
            offset: start.offset + 6,
            ..start
        };
        let after_header_length = Position {
            offset: start.offset + 10,
            ..start
        };
        let program = self.layout.here(self.section);

        let mut ranges = Vec::with_capacity(units.len());
        for (unit, samples) in units {
            let samples = known_files(files, samples, diagnostics);
            if let Some(range) = self.emit_sequence(unit, &samples)? {
                ranges.push(range);
            }
        }
        self.pending.flush(self.layout, self.section);

        let end = self.layout.end_of(self.section);
        self.layout.relocate(
            start,
            4,
            RelocTarget::Distance {
                from: after_length,
                to: end,
            },
        )?;
        self.layout.relocate(
            header_length_at,
            4,
            RelocTarget::Distance {
                from: after_header_length,
                to: program,
            },
        )?;
        Ok((self.section, start, ranges))
    }

    /// One sequence for the samples of `unit`; `None` when there are none.
    fn emit_sequence(
        &mut self,
        unit: SectionId,
        samples: &[LocationSample],
    ) -> Result<Option<UnitRange>, DwarfError> {
        if samples.is_empty() {
            return Ok(None);
        }

        let mut regs = Registers::new(self.config.is_stmt_default());
        let mut running: Option<Position> = None;

        for sample in samples {
            self.emit_register_changes(&mut regs, sample);

            let line_delta = line_delta(regs.line, sample.line)?;
            regs.line = sample.line;

            match running {
                None => {
                    self.set_address(sample.position);
                    self.codec.emit(line_delta, 0, &mut self.pending.bytes);
                }
                Some(prev) => self.advance(line_delta, prev, sample.position)?,
            }
            running = Some(sample.position);
        }

        let end = self.layout.end_of(unit);
        if let Some(prev) = running {
            self.advance(END_SEQUENCE, prev, end)?;
        }

        tracing::debug!(
            unit = self.layout.section_name(unit),
            rows = samples.len(),
            "line sequence emitted"
        );
        Ok(Some(UnitRange {
            section: unit,
            start: self.layout.start_of(unit),
            end,
        }))
    }

    /// `set_file`, `set_column`, `negate_stmt` and `set_basic_block` ahead of
    /// the row-producing opcode.
    fn emit_register_changes(&mut self, regs: &mut Registers, sample: &LocationSample) {
        let out = &mut self.pending.bytes;
        if sample.file != regs.file {
            out.push(lns::SET_FILE);
            write_uleb128(out, u64::from(sample.file));
            regs.file = sample.file;
        }
        if sample.column != regs.column {
            out.push(lns::SET_COLUMN);
            write_uleb128(out, u64::from(sample.column));
            regs.column = sample.column;
        }
        let is_stmt = sample.flags.contains(StmtFlags::IS_STMT);
        if is_stmt != regs.is_stmt {
            out.push(lns::NEGATE_STMT);
            regs.is_stmt = is_stmt;
        }
        if sample.flags.contains(StmtFlags::BASIC_BLOCK) {
            out.push(lns::SET_BASIC_BLOCK);
        }
    }

    /// `DW_LNE_set_address` with an absolute relocation to `pos`.
    fn set_address(&mut self, pos: Position) {
        let size = self.config.address_size();
        let out = &mut self.pending.bytes;
        out.push(0);
        write_uleb128(out, 1 + u64::from(size));
        out.push(lne::SET_ADDRESS);
        let field = out.len();
        out.resize(field + usize::from(size), 0);
        self.pending
            .relocations
            .push(Relocation::address(field, size, pos));
    }

    /// Encode a delta from `from` to `to`: directly when both lie in one
    /// fragment, otherwise as a deferred record.
    fn advance(&mut self, line_delta: i32, from: Position, to: Position) -> Result<(), DwarfError> {
        if from.same_fragment(&to) {
            if to.offset < from.offset {
                return Err(DwarfError::BackwardAddress {
                    from: from.offset,
                    to: to.offset,
                });
            }
            let addr_delta = to.offset - from.offset;
            self.codec.check_advance(addr_delta)?;
            self.codec
                .emit(line_delta, addr_delta, &mut self.pending.bytes);
        } else {
            self.pending.flush(self.layout, self.section);
            let record = LineDelta::new(self.codec, line_delta, from, to);
            self.layout.add_variant(self.section, Box::new(record));
        }
        Ok(())
    }
}

/// Drop samples whose file number has no entry, reporting each missing
/// number once.
fn known_files(
    files: &FileTable,
    samples: Vec<LocationSample>,
    diagnostics: &mut Vec<DwarfError>,
) -> Vec<LocationSample> {
    samples
        .into_iter()
        .filter(|sample| {
            if files.get(sample.file).is_some() {
                return true;
            }
            let err = DwarfError::UnassignedFileNumber { index: sample.file };
            if !diagnostics.contains(&err) {
                tracing::warn!(index = sample.file, "location uses unassigned file number");
                diagnostics.push(err);
            }
            false
        })
        .collect()
}

fn line_delta(from: u32, to: u32) -> Result<i32, DwarfError> {
    let delta = i64::from(to) - i64::from(from);
    i32::try_from(delta)
        .ok()
        .filter(|d| *d != END_SEQUENCE)
        .ok_or_else(|| DwarfError::invalid(alloc::format!("line delta {delta} out of range")))
}
