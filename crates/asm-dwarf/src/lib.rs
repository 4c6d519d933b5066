//! # asm-dwarf: DWARF line tables for an assembler back end
//!
//! `asm-dwarf` turns `(file, line, column)` samples attached to positions in
//! emitted code into a DWARF 2 line-number program, before the final
//! addresses of those positions are known.  Address gaps that span
//! unresolved layout become deferred records that the fragment layout engine
//! sizes through its relaxation loop and writes once addresses settle.
//!
//! ## Quick Start
//!
//! ```rust
//! use asm_dwarf::{decode_rows, Arch, DebugLines, Layout, LineConfig, SectionKind, StmtFlags};
//!
//! let mut layout = Layout::new();
//! let text = layout.add_section(".text", SectionKind::Code);
//! let mut lines = DebugLines::new(LineConfig::new(Arch::X86_64).name("hello.s"));
//! let file = lines.register_file(None, "hello.s").unwrap();
//!
//! let first = layout.append(text, &[0x55]);
//! lines.record_location(first, file, 1, 0, StmtFlags::IS_STMT).unwrap();
//! let second = layout.append(text, &[0x48, 0x89, 0xE5]);
//! lines.record_location(second, file, 2, 0, StmtFlags::IS_STMT).unwrap();
//!
//! lines.finish(&mut layout).unwrap();
//! let image = layout.resolve().unwrap();
//! let rows = decode_rows(image.bytes(".debug_line")).unwrap();
//! assert_eq!(rows.len(), 3);
//! assert_eq!((rows[1].address, rows[1].line), (1, 2));
//! ```
//!
//! ## Features
//!
//! - **Minimal encoding**: special opcodes first, then `const_add_pc`, then
//!   `advance_pc`; size and bytes come from one decision routine.
//! - **Deferred layout**: cross-fragment deltas relax together with
//!   alignment and `.org` padding.
//! - **Companion sections**: `.debug_abbrev`, `.debug_info` and
//!   `.debug_aranges` pointing at the line program.
//! - **`no_std` + `alloc`**: usable inside embedded assemblers.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
// ── Pedantic lint policy ─────────────────────────────────────────────────
// Encoding code narrows between integer widths constantly (u64→u8 opcodes,
// i64→i32 line deltas) and uses dense hex literals for DWARF constants.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::redundant_closure_for_method_calls,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::manual_let_else,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

extern crate alloc;

/// Line/address delta codec and DWARF line-program constants.
pub mod codec;
/// Target and emission configuration.
pub mod config;
/// Debug-line context: file registration, location samples, emission.
pub mod debug;
/// Error types.
pub mod error;
/// Source file table.
pub mod files;
/// LEB128 variable-length integers.
pub mod leb128;
/// Fragment layout engine with relaxation and relocation patching.
pub mod layout;
/// `.debug_line` program emitter.
pub mod line;
/// Deferred line deltas driven by layout relaxation.
pub mod relax;
/// Line-table decoder.
pub mod replay;
/// Per-unit location sample log.
pub mod samples;
/// `.debug_abbrev`, `.debug_info` and `.debug_aranges` emission.
pub mod sections;

// Re-exports
pub use codec::{DeltaCodec, END_SEQUENCE};
pub use config::{Arch, LineConfig, ResourceLimits, SampleMode};
pub use debug::{DebugLines, DebugSections, Loc};
pub use error::DwarfError;
pub use files::{FileEntry, FileIndex, FileTable};
pub use layout::{
    Image, Layout, Position, Relax, RelocTarget, Relocation, Resolve, SectionId, SectionImage,
    SectionKind,
};
pub use line::UnitRange;
pub use relax::LineDelta;
pub use replay::{decode_line_section, decode_rows, LineHeader, LineProgram, LineRow};
pub use samples::{LocationSample, StmtFlags};

use alloc::vec::Vec;

/// Encode one `(line_delta, addr_delta)` pair with a minimum instruction
/// length of 1.
///
/// # Examples
///
/// ```rust
/// use asm_dwarf::encode_delta;
///
/// // one special opcode: line +1, address +4
/// assert_eq!(encode_delta(1, 4), vec![72]);
/// ```
pub fn encode_delta(line_delta: i32, addr_delta: u64) -> Vec<u8> {
    let mut out = Vec::new();
    DeltaCodec::default().emit(line_delta, addr_delta, &mut out);
    out
}
