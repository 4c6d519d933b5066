//! Cross-validation against gimli.
//!
//! The emitted sections are parsed with gimli as an independent DWARF reader;
//! its view of the line table, compile unit and address ranges must match
//! what was recorded.

use asm_dwarf::{Arch, DebugLines, Image, Layout, LineConfig, SampleMode, SectionKind, StmtFlags};
use gimli::{
    AttributeValue, ColumnType, DebugAbbrev, DebugAranges, DebugInfo, DebugLine,
    DebugLineOffset, EndianSlice, LittleEndian,
};

type Slice<'a> = EndianSlice<'a, LittleEndian>;

fn slice<'a>(image: &'a Image, name: &str) -> Slice<'a> {
    EndianSlice::new(image.bytes(name), LittleEndian)
}

/// `(address, line, column, file, is_stmt, end_sequence)` rows as gimli sees them.
fn gimli_rows(image: &Image, address_size: u8) -> Vec<(u64, u64, u64, u64, bool, bool)> {
    let debug_line = DebugLine::from(slice(image, ".debug_line"));
    let program = debug_line
        .program(DebugLineOffset(0), address_size, None, None)
        .expect("line program header");
    let mut rows = program.rows();
    let mut out = Vec::new();
    while let Some((_, row)) = rows.next_row().expect("row") {
        let line = row.line().map_or(0, |l| l.get());
        let column = match row.column() {
            ColumnType::LeftEdge => 0,
            ColumnType::Column(c) => c.get(),
        };
        out.push((
            row.address(),
            line,
            column,
            row.file_index(),
            row.is_stmt(),
            row.end_sequence(),
        ));
    }
    out
}

/// A small two-fragment program with a file switch and a column.
fn build(arch: Arch, base: u64) -> Image {
    let mut layout = Layout::new();
    layout.set_base_address(base);
    let text = layout.add_section(".text", SectionKind::Code);
    let mut lines = DebugLines::new(
        LineConfig::new(arch)
            .mode(SampleMode::Dense)
            .name("main.s")
            .comp_dir("/build")
            .producer("asm-dwarf tests"),
    );
    let main = lines.register_file(None, "main.s").unwrap();
    let inc = lines.register_file(None, "macros.inc").unwrap();

    let p0 = layout.append(text, &[0; 4]);
    lines.record_location(p0, main, 1, 0, StmtFlags::IS_STMT).unwrap();
    let p1 = layout.append(text, &[0; 4]);
    lines.record_location(p1, inc, 30, 5, StmtFlags::IS_STMT).unwrap();
    layout.add_alignment(text, 64, 0, None);
    let p2 = layout.append(text, &[0; 8]);
    lines.record_location(p2, main, 2, 0, StmtFlags::NONE).unwrap();

    lines.finish(&mut layout).unwrap();
    layout.resolve().unwrap()
}

#[test]
fn line_table_matches_samples_x86_64() {
    let image = build(Arch::X86_64, 0x40_1000);
    let rows = gimli_rows(&image, 8);
    assert_eq!(
        rows,
        vec![
            (0x40_1000, 1, 0, 1, true, false),
            (0x40_1004, 30, 5, 2, true, false),
            (0x40_1040, 2, 0, 1, false, false),
            (0x40_1048, 2, 0, 1, false, true),
        ]
    );
}

#[test]
fn line_table_matches_samples_aarch64() {
    let image = build(Arch::Aarch64, 0x8_0000);
    let rows = gimli_rows(&image, 8);
    let addrs: Vec<u64> = rows.iter().map(|r| r.0).collect();
    assert_eq!(addrs, vec![0x8_0000, 0x8_0004, 0x8_0040, 0x8_0048]);
}

#[test]
fn line_header_fields() {
    let image = build(Arch::X86, 0);
    let debug_line = DebugLine::from(slice(&image, ".debug_line"));
    let program = debug_line
        .program(DebugLineOffset(0), 4, None, None)
        .unwrap();
    let header = program.header();
    assert_eq!(header.version(), 2);
    assert_eq!(header.line_base(), -5);
    assert_eq!(header.line_range(), 14);
    assert_eq!(header.opcode_base(), 10);
    assert_eq!(header.minimum_instruction_length(), 1);
    assert!(header.default_is_stmt());
    assert_eq!(header.file_names().len(), 2);
    assert!(header.include_directories().is_empty());
}

#[test]
fn compile_unit_points_at_line_program() {
    let image = build(Arch::X86_64, 0x40_1000);
    let debug_info = DebugInfo::from(slice(&image, ".debug_info"));
    let debug_abbrev = DebugAbbrev::from(slice(&image, ".debug_abbrev"));

    let mut units = debug_info.units();
    let unit = units.next().unwrap().expect("one compile unit");
    assert_eq!(unit.version(), 2);
    assert_eq!(unit.address_size(), 8);

    let abbrevs = unit.abbreviations(&debug_abbrev).unwrap();
    let mut entries = unit.entries(&abbrevs);
    let (_, entry) = entries.next_dfs().unwrap().unwrap();
    assert_eq!(entry.tag(), gimli::DW_TAG_compile_unit);

    assert_eq!(
        entry.attr_value(gimli::DW_AT_stmt_list).unwrap(),
        Some(AttributeValue::DebugLineRef(DebugLineOffset(0)))
    );
    assert_eq!(
        entry.attr_value(gimli::DW_AT_low_pc).unwrap(),
        Some(AttributeValue::Addr(0x40_1000))
    );
    assert_eq!(
        entry.attr_value(gimli::DW_AT_high_pc).unwrap(),
        Some(AttributeValue::Addr(0x40_1048))
    );
    assert_eq!(
        entry.attr_value(gimli::DW_AT_language).unwrap(),
        Some(AttributeValue::Language(gimli::DW_LANG_Mips_Assembler))
    );
    match entry.attr_value(gimli::DW_AT_name).unwrap() {
        Some(AttributeValue::String(s)) => assert_eq!(s.slice(), b"main.s"),
        other => panic!("unexpected name attribute {other:?}"),
    }
    match entry.attr_value(gimli::DW_AT_comp_dir).unwrap() {
        Some(AttributeValue::String(s)) => assert_eq!(s.slice(), b"/build"),
        other => panic!("unexpected comp_dir attribute {other:?}"),
    }

    assert!(units.next().unwrap().is_none());
}

#[test]
fn aranges_cover_the_text_section() {
    let image = build(Arch::X86, 0x1000);
    let aranges = DebugAranges::from(slice(&image, ".debug_aranges"));
    let mut headers = aranges.headers();
    let header = headers.next().unwrap().expect("one arange set");
    assert_eq!(header.debug_info_offset(), gimli::DebugInfoOffset(0));
    assert_eq!(header.encoding().address_size, 4);

    let mut entries = header.entries();
    let entry = entries.next().unwrap().expect("one range");
    assert_eq!(entry.address(), 0x1000);
    assert_eq!(entry.length(), 0x48);
    assert!(entries.next().unwrap().is_none());
    assert!(headers.next().unwrap().is_none());
}
