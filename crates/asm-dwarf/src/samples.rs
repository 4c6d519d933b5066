//! Per-unit log of source location samples.

use alloc::string::String;
use alloc::vec::Vec;
use core::ops::{BitOr, BitOrAssign};

use crate::config::SampleMode;
use crate::error::DwarfError;
use crate::files::FileIndex;
use crate::layout::{Position, SectionId};

/// Per-row flags of a location sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StmtFlags(u8);

impl StmtFlags {
    /// No flags: not a statement boundary.
    pub const NONE: Self = Self(0);
    /// The row is a recommended breakpoint location.
    pub const IS_STMT: Self = Self(1);
    /// The row starts a basic block.
    pub const BASIC_BLOCK: Self = Self(2);

    /// Raw bits.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every flag in `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `self` without the flags in `other`.
    #[must_use]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for StmtFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StmtFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One `(position, file, line, column, flags)` sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocationSample {
    /// Where the instruction starts.
    pub position: Position,
    /// File-table index.
    pub file: FileIndex,
    /// 1-based source line.
    pub line: u32,
    /// 1-based column, 0 when unknown.
    pub column: u32,
    /// Row flags.
    pub flags: StmtFlags,
}

#[derive(Debug)]
struct UnitLog {
    section: SectionId,
    samples: Vec<LocationSample>,
    /// `(file, line)` of the most recent sample, for sparse mode.
    last: Option<(FileIndex, u32)>,
}

/// Ordered location samples, grouped by output unit (section).
///
/// Units appear in the order their first sample was recorded; samples keep
/// insertion order and are never reordered.
#[derive(Debug)]
pub struct SampleLog {
    units: Vec<UnitLog>,
    mode: SampleMode,
    count: usize,
    max_samples: usize,
}

impl SampleLog {
    /// Create an empty log.
    pub fn new(mode: SampleMode, max_samples: usize) -> Self {
        Self {
            units: Vec::new(),
            mode,
            count: 0,
            max_samples,
        }
    }

    /// Record a sample against the unit owning its position.
    ///
    /// Returns `Ok(false)` when the sample was skipped: incomplete location
    /// (`file == 0` or `line == 0`), or a sparse-mode repeat of the previous
    /// `(file, line)` in the same unit.
    pub fn record(&mut self, sample: LocationSample) -> Result<bool, DwarfError> {
        if sample.file == 0 || sample.line == 0 {
            return Ok(false);
        }

        let section = sample.position.section;
        let index = match self.units.iter().position(|u| u.section == section) {
            Some(i) => i,
            None => {
                self.units.push(UnitLog {
                    section,
                    samples: Vec::new(),
                    last: None,
                });
                self.units.len() - 1
            }
        };
        let unit = &mut self.units[index];

        let key = (sample.file, sample.line);
        if self.mode == SampleMode::Sparse && unit.last == Some(key) {
            return Ok(false);
        }
        if self.count >= self.max_samples {
            return Err(DwarfError::ResourceLimitExceeded {
                resource: String::from("samples"),
                limit: self.max_samples,
            });
        }

        unit.last = Some(key);
        unit.samples.push(sample);
        self.count += 1;
        Ok(true)
    }

    /// Total recorded samples.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of units with at least one sample.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Consume the log, yielding each unit with its samples in emission order.
    pub fn into_units(self) -> impl Iterator<Item = (SectionId, Vec<LocationSample>)> {
        self.units.into_iter().map(|unit| (unit.section, unit.samples))
    }
}
