//! Error types for line-table construction and layout.

#[allow(unused_imports)]
use alloc::format;
use alloc::string::String;
#[allow(unused_imports)]
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::layout::Position;

/// Error raised while building debug sections or laying them out.
///
/// Variants fall into three groups:
///
/// - configuration problems reported by the front end
///   ([`DwarfError::DuplicateFile`], [`DwarfError::UnassignedFileNumber`],
///   [`DwarfError::InvalidParameter`]),
/// - layout failures ([`DwarfError::RelaxationLimit`],
///   [`DwarfError::OrgBehind`], [`DwarfError::RelocationOverflow`], ...),
/// - internal invariant violations ([`DwarfError::RelaxationMismatch`]),
///   which are never recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DwarfError {
    /// An argument was rejected (empty file name, file number 0, ...).
    InvalidParameter {
        /// Why the parameter was rejected.
        detail: String,
    },

    /// A file number was reused with a different name.
    DuplicateFile {
        /// The explicit file number.
        index: u32,
        /// Name already registered in that slot.
        existing: String,
        /// Name the caller tried to register.
        name: String,
    },

    /// A file number was left empty below the highest assigned one, or a
    /// location referenced a number that was never assigned.
    UnassignedFileNumber {
        /// The empty slot.
        index: u32,
    },

    /// A position could not be mapped to an address.
    UnresolvedPosition {
        /// The position that failed to resolve.
        position: Position,
    },

    /// A line-table sequence would move the address backwards.
    BackwardAddress {
        /// Address of the running row.
        from: u64,
        /// Address of the next row.
        to: u64,
    },

    /// An address advance is not a multiple of the minimum instruction
    /// length, so the line program cannot represent it.
    UnalignedAdvance {
        /// Distance between the two rows in bytes.
        delta: u64,
        /// Minimum instruction length of the target.
        min_insn_length: u8,
    },

    /// A deferred record produced a different byte count at finalization
    /// than its last size estimate.
    ///
    /// This means the size-only and byte-emitting code paths diverged; the
    /// partially written section is unusable.
    RelaxationMismatch {
        /// Working size recorded by the last estimate.
        expected: usize,
        /// Bytes actually written.
        actual: usize,
    },

    /// Layout relaxation did not converge within the allowed number of passes.
    RelaxationLimit {
        /// Maximum number of relaxation passes allowed.
        max: usize,
    },

    /// `.org` target lies behind the current location counter.
    OrgBehind {
        /// Requested absolute address.
        target: u64,
        /// Location counter at the directive.
        current: u64,
    },

    /// A resolved value does not fit its relocation field.
    RelocationOverflow {
        /// The value being written.
        value: u64,
        /// Field width in bytes.
        size: u8,
    },

    /// A section being decoded is truncated or contains an unknown opcode.
    Malformed {
        /// Byte offset where decoding stopped.
        offset: usize,
        /// What was wrong.
        detail: String,
    },

    /// A configurable resource limit was exceeded.
    ResourceLimitExceeded {
        /// Human-readable name of the resource (e.g. "files", "samples").
        resource: String,
        /// The configured limit that was exceeded.
        limit: usize,
    },

    /// Multiple errors collected while emitting.
    Multiple {
        /// The collected errors.
        errors: Vec<DwarfError>,
    },
}

impl DwarfError {
    /// Shorthand for [`DwarfError::InvalidParameter`].
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        DwarfError::InvalidParameter {
            detail: detail.into(),
        }
    }

    /// Whether this error is a diagnostic the caller may choose to ignore.
    ///
    /// File-table problems only drop a single row; everything else leaves the
    /// output incomplete or wrong.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            DwarfError::DuplicateFile { .. } | DwarfError::UnassignedFileNumber { .. } => true,
            DwarfError::Multiple { errors } => errors.iter().all(DwarfError::is_recoverable),
            _ => false,
        }
    }
}

impl fmt::Display for DwarfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DwarfError::InvalidParameter { detail } => {
                write!(f, "invalid parameter: {}", detail)
            }
            DwarfError::DuplicateFile {
                index,
                existing,
                name,
            } => {
                write!(
                    f,
                    "file number {} already allocated to '{}', cannot reuse for '{}'",
                    index, existing, name
                )
            }
            DwarfError::UnassignedFileNumber { index } => {
                write!(f, "unassigned file number {}", index)
            }
            DwarfError::UnresolvedPosition { position } => {
                write!(f, "cannot resolve address of {}", position)
            }
            DwarfError::BackwardAddress { from, to } => {
                write!(
                    f,
                    "line table address moves backwards (0x{:X} -> 0x{:X})",
                    from, to
                )
            }
            DwarfError::UnalignedAdvance {
                delta,
                min_insn_length,
            } => {
                write!(
                    f,
                    "unaligned opcodes detected: advance of {} bytes is not a multiple of {}",
                    delta, min_insn_length
                )
            }
            DwarfError::RelaxationMismatch { expected, actual } => {
                write!(
                    f,
                    "internal: deferred record wrote {} bytes, estimated {}",
                    actual, expected
                )
            }
            DwarfError::RelaxationLimit { max } => {
                write!(
                    f,
                    "layout exceeded maximum of {} relaxation passes (possible oscillation)",
                    max
                )
            }
            DwarfError::OrgBehind { target, current } => {
                write!(
                    f,
                    ".org target 0x{:X} is behind current position 0x{:X}",
                    target, current
                )
            }
            DwarfError::RelocationOverflow { value, size } => {
                write!(
                    f,
                    "value 0x{:X} exceeds {}-byte relocation field",
                    value, size
                )
            }
            DwarfError::Malformed { offset, detail } => {
                write!(f, "malformed section at offset {}: {}", offset, detail)
            }
            DwarfError::ResourceLimitExceeded { resource, limit } => {
                write!(
                    f,
                    "resource limit exceeded: {} (limit: {})",
                    resource, limit
                )
            }
            DwarfError::Multiple { errors } => {
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DwarfError {}
