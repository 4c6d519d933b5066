//! Serde round-trip tests for `asm_dwarf` public types.
//!
//! Validates that configuration, samples, diagnostics and decoded rows
//! serialize to JSON and deserialize back to identical values.

#![cfg(feature = "serde")]

use asm_dwarf::{
    decode_line_section, Arch, DebugLines, DwarfError, FileEntry, Layout, LineConfig, Loc,
    LocationSample, Position, ResourceLimits, SampleMode, SectionId, SectionKind, StmtFlags,
};

/// Helper: serialize to JSON, deserialize back, assert equality.
fn round_trip<T>(val: &T)
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + core::fmt::Debug,
{
    let json = serde_json::to_string(val).expect("serialize");
    let back: T = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(val, &back, "round-trip mismatch for JSON: {json}");
}

// ─── Config ─────────────────────────────────────────────────────────────────

#[test]
fn serde_arch() {
    for arch in [
        Arch::X86,
        Arch::X86_64,
        Arch::Arm,
        Arch::Thumb,
        Arch::Aarch64,
        Arch::Rv32,
        Arch::Rv64,
    ] {
        round_trip(&arch);
    }
}

#[test]
fn serde_line_config() {
    round_trip(&LineConfig::default());
    round_trip(
        &LineConfig::new(Arch::Rv64)
            .mode(SampleMode::Dense)
            .default_is_stmt(false)
            .name("start.S")
            .comp_dir("/work")
            .producer("custom")
            .limits(ResourceLimits {
                max_files: 8,
                max_samples: 64,
                max_relaxation_passes: 3,
            }),
    );
}

// ─── Samples ────────────────────────────────────────────────────────────────

#[test]
fn serde_samples() {
    let position = Position::new(SectionId(2), 5, 17);
    round_trip(&position);
    round_trip(&StmtFlags::IS_STMT);
    round_trip(&(StmtFlags::IS_STMT | StmtFlags::BASIC_BLOCK));
    round_trip(&LocationSample {
        position,
        file: 1,
        line: 42,
        column: 7,
        flags: StmtFlags::NONE,
    });
    round_trip(&Loc {
        file: 3,
        line: 9,
        column: 0,
        flags: StmtFlags::BASIC_BLOCK,
    });
    round_trip(&FileEntry {
        name: "boot.s".into(),
        dir: 0,
    });
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[test]
fn serde_errors() {
    let errors = vec![
        DwarfError::InvalidParameter {
            detail: "empty file name".into(),
        },
        DwarfError::DuplicateFile {
            index: 1,
            existing: "a.s".into(),
            name: "b.s".into(),
        },
        DwarfError::UnassignedFileNumber { index: 4 },
        DwarfError::UnresolvedPosition {
            position: Position::new(SectionId(0), 1, 2),
        },
        DwarfError::BackwardAddress { from: 8, to: 4 },
        DwarfError::UnalignedAdvance {
            delta: 3,
            min_insn_length: 2,
        },
        DwarfError::RelaxationMismatch {
            expected: 1,
            actual: 2,
        },
        DwarfError::RelaxationLimit { max: 100 },
        DwarfError::OrgBehind {
            target: 0x10,
            current: 0x20,
        },
        DwarfError::RelocationOverflow {
            value: 0x1_0000,
            size: 2,
        },
        DwarfError::Malformed {
            offset: 3,
            detail: "bad ULEB128".into(),
        },
        DwarfError::ResourceLimitExceeded {
            resource: "files".into(),
            limit: 8,
        },
    ];
    for err in &errors {
        round_trip(err);
    }
    round_trip(&DwarfError::Multiple { errors });
}

// ─── Output ─────────────────────────────────────────────────────────────────

#[test]
fn serde_image_and_decoded_program() {
    let mut layout = Layout::new();
    let text = layout.add_section(".text", SectionKind::Code);
    let mut lines = DebugLines::new(LineConfig::new(Arch::X86_64));
    let file = lines.register_file(None, "a.s").unwrap();
    let at = layout.append(text, &[0x90, 0xC3]);
    lines.record_location(at, file, 12, 4, StmtFlags::IS_STMT).unwrap();
    lines.finish(&mut layout).unwrap();
    let image = layout.resolve().unwrap();

    round_trip(&image);
    for program in decode_line_section(image.bytes(".debug_line")).unwrap() {
        round_trip(&program);
    }
}
