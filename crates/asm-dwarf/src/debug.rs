//! The debug-line context: collects files and location samples during the
//! forward pass and emits the debug sections into a [`Layout`] at the end.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{LineConfig, SampleMode};
use crate::error::DwarfError;
use crate::files::{FileIndex, FileTable};
use crate::layout::{Layout, Position, SectionId};
use crate::line::{LineProgramWriter, UnitRange, DEBUG_LINE};
use crate::samples::{LocationSample, SampleLog, StmtFlags};
use crate::sections::{emit_companions, DEBUG_ABBREV, DEBUG_ARANGES, DEBUG_INFO};

/// The location applied to the next instruction, as set by `.loc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Loc {
    /// File-table index.
    pub file: FileIndex,
    /// 1-based source line.
    pub line: u32,
    /// Column, 0 when unknown.
    pub column: u32,
    /// Row flags.
    pub flags: StmtFlags,
}

/// Collects line information for one output file.
///
/// # Examples
///
/// ```
/// use asm_dwarf::{Arch, DebugLines, Layout, LineConfig, SectionKind, StmtFlags};
///
/// let mut layout = Layout::new();
/// let text = layout.add_section(".text", SectionKind::Code);
/// let mut lines = DebugLines::new(LineConfig::new(Arch::X86_64));
/// let file = lines.register_file(None, "boot.s")?;
///
/// let at = layout.append(text, &[0x90]);
/// lines.record_location(at, file, 3, 0, StmtFlags::IS_STMT)?;
///
/// let sections = lines.finish(&mut layout)?;
/// assert!(sections.diagnostics().is_empty());
/// let image = layout.resolve()?;
/// assert!(!image.bytes(".debug_line").is_empty());
/// # Ok::<(), asm_dwarf::DwarfError>(())
/// ```
#[derive(Debug)]
pub struct DebugLines {
    config: LineConfig,
    files: FileTable,
    samples: SampleLog,
    loc: Option<Loc>,
    /// A `.loc` arrived and no instruction has consumed it yet.
    loc_pending: bool,
    diagnostics: Vec<DwarfError>,
}

impl DebugLines {
    /// Create an empty context.
    pub fn new(config: LineConfig) -> Self {
        let limits = *config.resource_limits();
        Self {
            files: FileTable::with_limit(limits.max_files),
            samples: SampleLog::new(config.sample_mode(), limits.max_samples),
            config,
            loc: None,
            loc_pending: false,
            diagnostics: Vec::new(),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    /// The file table built so far.
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    /// Register a source file, at `index` when given (`.file N "name"`).
    ///
    /// A [`DwarfError::DuplicateFile`] is both returned and kept as a
    /// diagnostic.
    pub fn register_file(
        &mut self,
        index: Option<FileIndex>,
        name: &str,
    ) -> Result<FileIndex, DwarfError> {
        match index {
            None => self.files.register(name),
            Some(index) => match self.files.register_explicit(index, name) {
                Ok(()) => Ok(index),
                Err(err) => {
                    if matches!(err, DwarfError::DuplicateFile { .. }) {
                        tracing::warn!(index, name, "file number reused");
                        self.diagnostics.push(err.clone());
                    }
                    Err(err)
                }
            },
        }
    }

    /// Record that the instruction at `position` came from `file:line:column`.
    ///
    /// Returns whether a sample was kept; incomplete locations and sparse-mode
    /// repeats are dropped.
    pub fn record_location(
        &mut self,
        position: Position,
        file: FileIndex,
        line: u32,
        column: u32,
        flags: StmtFlags,
    ) -> Result<bool, DwarfError> {
        self.samples.record(LocationSample {
            position,
            file,
            line,
            column,
            flags,
        })
    }

    /// Set the location for the following instructions (`.loc`).
    pub fn set_loc(&mut self, loc: Loc) {
        self.loc = Some(loc);
        self.loc_pending = true;
    }

    /// The current `.loc` state.
    pub fn loc(&self) -> Option<&Loc> {
        self.loc.as_ref()
    }

    /// Note an instruction emitted at `position`.
    ///
    /// In dense mode only the first instruction after each [`set_loc`] gets a
    /// row; in sparse mode every instruction is sampled and repeats collapse.
    /// One-shot flags are cleared once a row has used them.
    ///
    /// [`set_loc`]: DebugLines::set_loc
    pub fn emit_insn(&mut self, position: Position) -> Result<bool, DwarfError> {
        let Some(loc) = self.loc else {
            return Ok(false);
        };
        if self.config.sample_mode() == SampleMode::Dense && !self.loc_pending {
            return Ok(false);
        }
        self.loc_pending = false;

        let recorded = self.record_location(position, loc.file, loc.line, loc.column, loc.flags)?;
        if let Some(current) = self.loc.as_mut() {
            current.flags = current.flags.without(StmtFlags::BASIC_BLOCK);
        }
        Ok(recorded)
    }

    /// Number of samples kept so far.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Emit `.debug_line` and its companion sections into `layout`.
    ///
    /// Nothing is emitted when no location was recorded.  The layout's
    /// relaxation pass limit is set from the configured resource limits.
    #[tracing::instrument(level = "debug", skip_all, fields(samples = self.samples.len()))]
    pub fn finish(self, layout: &mut Layout) -> Result<DebugSections, DwarfError> {
        let Self {
            config,
            files,
            samples,
            mut diagnostics,
            ..
        } = self;

        if samples.is_empty() {
            tracing::debug!("no line information recorded");
            return Ok(DebugSections {
                diagnostics,
                ..DebugSections::default()
            });
        }
        layout.set_max_passes(config.resource_limits().max_relaxation_passes);

        let units: Vec<_> = samples.into_units().collect();
        let (line, line_start, ranges) =
            LineProgramWriter::new(layout, &config).emit(&files, units, &mut diagnostics)?;

        let name = if config.unit_name().is_empty() {
            files.get(1).map_or("", |f| f.name.as_str())
        } else {
            config.unit_name()
        };
        let companions = emit_companions(layout, &config, name, line_start, &ranges)?;

        Ok(DebugSections {
            line: Some(line),
            abbrev: Some(companions.abbrev),
            info: Some(companions.info),
            aranges: Some(companions.aranges),
            units: ranges,
            diagnostics,
        })
    }
}

/// Sections produced by [`DebugLines::finish`] and the problems found.
#[derive(Debug, Clone, Default)]
pub struct DebugSections {
    line: Option<SectionId>,
    abbrev: Option<SectionId>,
    info: Option<SectionId>,
    aranges: Option<SectionId>,
    units: Vec<UnitRange>,
    diagnostics: Vec<DwarfError>,
}

impl DebugSections {
    /// `.debug_line`, if emitted.
    pub fn line(&self) -> Option<SectionId> {
        self.line
    }

    /// `.debug_abbrev`, if emitted.
    pub fn abbrev(&self) -> Option<SectionId> {
        self.abbrev
    }

    /// `.debug_info`, if emitted.
    pub fn info(&self) -> Option<SectionId> {
        self.info
    }

    /// `.debug_aranges`, if emitted.
    pub fn aranges(&self) -> Option<SectionId> {
        self.aranges
    }

    /// Look up an emitted section by name.
    pub fn section(&self, name: &str) -> Option<SectionId> {
        match name {
            DEBUG_LINE => self.line,
            DEBUG_ABBREV => self.abbrev,
            DEBUG_INFO => self.info,
            DEBUG_ARANGES => self.aranges,
            _ => None,
        }
    }

    /// Code ranges that received a line sequence, in emission order.
    pub fn units(&self) -> &[UnitRange] {
        &self.units
    }

    /// Whether nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.line.is_none()
    }

    /// Non-fatal problems (file-table gaps, reused file numbers).
    pub fn diagnostics(&self) -> &[DwarfError] {
        &self.diagnostics
    }

    /// The diagnostics folded into one error, or `None` when clean.
    pub fn diagnostics_error(&self) -> Option<DwarfError> {
        match self.diagnostics.as_slice() {
            [] => None,
            [one] => Some(one.clone()),
            many => Some(DwarfError::Multiple {
                errors: many.to_vec(),
            }),
        }
    }

    /// Names of the emitted sections.
    pub fn names(&self) -> Vec<String> {
        [
            (self.line, DEBUG_LINE),
            (self.abbrev, DEBUG_ABBREV),
            (self.info, DEBUG_INFO),
            (self.aranges, DEBUG_ARANGES),
        ]
        .iter()
        .filter(|(id, _)| id.is_some())
        .map(|(_, name)| String::from(*name))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Arch;
    use crate::layout::SectionKind;
    use crate::replay::decode_rows;

    fn loc(line: u32) -> Loc {
        Loc {
            file: 1,
            line,
            column: 0,
            flags: StmtFlags::IS_STMT,
        }
    }

    #[test]
    fn nothing_recorded_emits_nothing() {
        let mut layout = Layout::new();
        let lines = DebugLines::new(LineConfig::default());
        let sections = lines.finish(&mut layout).unwrap();
        assert!(sections.is_empty());
        assert!(sections.names().is_empty());
        assert_eq!(layout.section_ids().count(), 0);
    }

    #[test]
    fn duplicate_file_is_returned_and_kept() {
        let mut layout = Layout::new();
        let text = layout.add_section(".text", SectionKind::Code);
        let mut lines = DebugLines::new(LineConfig::default());
        assert_eq!(lines.register_file(Some(1), "a.s").unwrap(), 1);
        assert!(lines.register_file(Some(1), "b.s").is_err());
        let at = layout.append(text, &[0x90]);
        lines.record_location(at, 1, 1, 0, StmtFlags::IS_STMT).unwrap();
        let sections = lines.finish(&mut layout).unwrap();
        assert_eq!(sections.diagnostics().len(), 1);
        assert!(sections.diagnostics_error().unwrap().is_recoverable());
    }

    #[test]
    fn dense_loc_marks_only_next_insn() {
        let mut layout = Layout::new();
        let text = layout.add_section(".text", SectionKind::Code);
        let config = LineConfig::new(Arch::X86_64).mode(SampleMode::Dense);
        let mut lines = DebugLines::new(config);
        lines.register_file(None, "a.s").unwrap();

        let a = layout.append(text, &[0x90]);
        assert!(!lines.emit_insn(a).unwrap());
        lines.set_loc(loc(5));
        let b = layout.append(text, &[0x90]);
        assert!(lines.emit_insn(b).unwrap());
        let c = layout.append(text, &[0x90]);
        assert!(!lines.emit_insn(c).unwrap());
        lines.set_loc(loc(5));
        let d = layout.append(text, &[0x90]);
        assert!(lines.emit_insn(d).unwrap());
        assert_eq!(lines.sample_count(), 2);
    }

    #[test]
    fn sparse_loc_samples_every_insn() {
        let mut layout = Layout::new();
        let text = layout.add_section(".text", SectionKind::Code);
        let mut lines = DebugLines::new(LineConfig::new(Arch::X86_64));
        lines.register_file(None, "a.s").unwrap();
        lines.set_loc(loc(1));
        let a = layout.append(text, &[0x90]);
        assert!(lines.emit_insn(a).unwrap());
        let b = layout.append(text, &[0x90]);
        assert!(!lines.emit_insn(b).unwrap());
        lines.set_loc(loc(2));
        let c = layout.append(text, &[0x90]);
        assert!(lines.emit_insn(c).unwrap());
    }

    #[test]
    fn basic_block_flag_is_one_shot() {
        let mut layout = Layout::new();
        let text = layout.add_section(".text", SectionKind::Code);
        let config = LineConfig::new(Arch::X86_64).mode(SampleMode::Dense);
        let mut lines = DebugLines::new(config);
        lines.register_file(None, "a.s").unwrap();
        lines.set_loc(Loc {
            flags: StmtFlags::IS_STMT | StmtFlags::BASIC_BLOCK,
            ..loc(1)
        });
        let a = layout.append(text, &[0x90]);
        lines.emit_insn(a).unwrap();
        assert_eq!(lines.loc().unwrap().flags, StmtFlags::IS_STMT);

        lines.finish(&mut layout).unwrap();
        let image = layout.resolve().unwrap();
        let rows = decode_rows(image.bytes(DEBUG_LINE)).unwrap();
        assert!(rows[0].basic_block);
        assert!(rows[1].end_sequence);
    }

    #[test]
    fn section_lookup_by_name() {
        let mut layout = Layout::new();
        let text = layout.add_section(".text", SectionKind::Code);
        let mut lines = DebugLines::new(LineConfig::default());
        let file = lines.register_file(None, "a.s").unwrap();
        let at = layout.append(text, &[0x90]);
        lines.record_location(at, file, 1, 0, StmtFlags::IS_STMT).unwrap();
        let sections = lines.finish(&mut layout).unwrap();

        assert_eq!(sections.section(DEBUG_LINE), layout.section_by_name(DEBUG_LINE));
        assert_eq!(sections.section(DEBUG_INFO), sections.info());
        assert_eq!(sections.section(".debug_str"), None);
        assert_eq!(sections.names().len(), 4);
        assert_eq!(sections.units().len(), 1);
        assert_eq!(sections.units()[0].section, text);
    }
}
