//! Companion sections that make the line program discoverable:
//! `.debug_abbrev`, `.debug_info` and `.debug_aranges`.

use alloc::vec::Vec;

use crate::config::LineConfig;
use crate::error::DwarfError;
use crate::layout::{Layout, Position, Relocation, SectionId, SectionKind};
use crate::leb128::write_uleb128;
use crate::line::UnitRange;

/// Abbreviation table section name.
pub const DEBUG_ABBREV: &str = ".debug_abbrev";
/// Compile-unit section name.
pub const DEBUG_INFO: &str = ".debug_info";
/// Address-range lookup section name.
pub const DEBUG_ARANGES: &str = ".debug_aranges";

/// `DW_LANG_Mips_Assembler`, the language code assemblers use.
pub const DW_LANG_MIPS_ASSEMBLER: u16 = 0x8001;

const DW_TAG_COMPILE_UNIT: u8 = 0x11;
const DW_CHILDREN_NO: u8 = 0;
const ABBREV_CODE: u8 = 1;

mod at {
    pub const NAME: u8 = 0x03;
    pub const STMT_LIST: u8 = 0x10;
    pub const LOW_PC: u8 = 0x11;
    pub const HIGH_PC: u8 = 0x12;
    pub const LANGUAGE: u8 = 0x13;
    pub const COMP_DIR: u8 = 0x1b;
    pub const PRODUCER: u8 = 0x25;
}

mod form {
    pub const ADDR: u8 = 0x01;
    pub const DATA2: u8 = 0x05;
    pub const DATA4: u8 = 0x06;
    pub const STRING: u8 = 0x08;
}

/// Handles of the emitted companion sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Companions {
    pub abbrev: SectionId,
    pub info: SectionId,
    pub aranges: SectionId,
}

/// Emit all three companion sections.
///
/// `line_start` is the start of the line program; `name` is the
/// compile-unit name already resolved by the caller.
pub(crate) fn emit_companions(
    layout: &mut Layout,
    config: &LineConfig,
    name: &str,
    line_start: Position,
    units: &[UnitRange],
) -> Result<Companions, DwarfError> {
    // low_pc/high_pc only make sense for one contiguous range.
    let single = units.len() == 1;

    let abbrev = layout.add_section(DEBUG_ABBREV, SectionKind::Debug);
    let abbrev_start = layout.append(abbrev, &abbrev_table(single));

    let info = layout.add_section(DEBUG_INFO, SectionKind::Debug);
    let (bytes, relocs) = compile_unit(config, name, line_start, abbrev_start, units);
    let info_start = layout.append_with_relocations(info, &bytes, &relocs);

    let aranges = layout.add_section(DEBUG_ARANGES, SectionKind::Debug);
    let (bytes, relocs) = address_ranges(config.address_size(), info_start, units)?;
    layout.append_with_relocations(aranges, &bytes, &relocs);

    tracing::debug!(units = units.len(), "companion sections emitted");
    Ok(Companions {
        abbrev,
        info,
        aranges,
    })
}

fn abbrev_table(single: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(24);
    out.extend_from_slice(&[ABBREV_CODE, DW_TAG_COMPILE_UNIT, DW_CHILDREN_NO]);
    out.extend_from_slice(&[at::STMT_LIST, form::DATA4]);
    if single {
        out.extend_from_slice(&[at::LOW_PC, form::ADDR]);
        out.extend_from_slice(&[at::HIGH_PC, form::ADDR]);
    }
    out.extend_from_slice(&[at::NAME, form::STRING]);
    out.extend_from_slice(&[at::COMP_DIR, form::STRING]);
    out.extend_from_slice(&[at::PRODUCER, form::STRING]);
    out.extend_from_slice(&[at::LANGUAGE, form::DATA2]);
    out.extend_from_slice(&[0, 0]);
    // end of abbreviations
    out.push(0);
    out
}

fn compile_unit(
    config: &LineConfig,
    name: &str,
    line_start: Position,
    abbrev_start: Position,
    units: &[UnitRange],
) -> (Vec<u8>, Vec<Relocation>) {
    let address_size = config.address_size();
    let mut out = Vec::with_capacity(64);
    let mut relocs = Vec::new();

    out.extend_from_slice(&0u32.to_le_bytes()); // unit_length
    out.extend_from_slice(&2u16.to_le_bytes());
    relocs.push(Relocation::address(out.len(), 4, abbrev_start));
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(address_size);

    write_uleb128(&mut out, u64::from(ABBREV_CODE));
    relocs.push(Relocation::address(out.len(), 4, line_start));
    out.extend_from_slice(&0u32.to_le_bytes());
    if let [unit] = units {
        relocs.push(Relocation::address(out.len(), address_size, unit.start));
        out.resize(out.len() + usize::from(address_size), 0);
        relocs.push(Relocation::address(out.len(), address_size, unit.end));
        out.resize(out.len() + usize::from(address_size), 0);
    }
    push_str(&mut out, name);
    push_str(&mut out, config.unit_comp_dir());
    push_str(&mut out, config.unit_producer());
    out.extend_from_slice(&DW_LANG_MIPS_ASSEMBLER.to_le_bytes());
    out.push(0);

    let unit_length = (out.len() - 4) as u32;
    out[..4].copy_from_slice(&unit_length.to_le_bytes());
    (out, relocs)
}

fn address_ranges(
    address_size: u8,
    info_start: Position,
    units: &[UnitRange],
) -> Result<(Vec<u8>, Vec<Relocation>), DwarfError> {
    let size = usize::from(address_size);
    let tuple = 2 * size;
    let mut out = Vec::with_capacity(16 + tuple * (units.len() + 1));
    let mut relocs = Vec::new();

    out.extend_from_slice(&0u32.to_le_bytes()); // unit_length
    out.extend_from_slice(&2u16.to_le_bytes());
    relocs.push(Relocation::address(out.len(), 4, info_start));
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(address_size);
    out.push(0); // segment_size

    let padding = (tuple - out.len() % tuple) % tuple;
    out.resize(out.len() + padding, 0);

    for unit in units {
        relocs.push(Relocation::address(out.len(), address_size, unit.start));
        out.resize(out.len() + size, 0);
        relocs.push(Relocation::distance(out.len(), address_size, unit.start, unit.end));
        out.resize(out.len() + size, 0);
    }
    out.resize(out.len() + tuple, 0);

    let unit_length = u32::try_from(out.len() - 4)
        .map_err(|_| DwarfError::invalid("address range table exceeds 4 GiB"))?;
    out[..4].copy_from_slice(&unit_length.to_le_bytes());
    Ok((out, relocs))
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Arch;
    use alloc::vec;

    fn text_unit(layout: &mut Layout, name: &str, len: usize) -> UnitRange {
        let id = layout.add_section(name, SectionKind::Code);
        layout.append(id, &vec![0x90; len]);
        UnitRange {
            section: id,
            start: layout.start_of(id),
            end: layout.end_of(id),
        }
    }

    #[test]
    fn abbrev_single_unit_carries_pc_range() {
        assert_eq!(
            abbrev_table(true),
            vec![
                1, 0x11, 0, 0x10, 0x06, 0x11, 0x01, 0x12, 0x01, 0x03, 0x08, 0x1b, 0x08, 0x25,
                0x08, 0x13, 0x05, 0, 0, 0
            ]
        );
        let multi = abbrev_table(false);
        assert_eq!(multi.len(), 16);
        assert!(!multi.windows(2).any(|w| w == [0x11, 0x01]));
    }

    #[test]
    fn info_and_aranges_for_one_unit() {
        let config = LineConfig::new(Arch::X86).comp_dir("/src").producer("as");
        let mut layout = Layout::new();
        layout.set_base_address(0x8000);
        let unit = text_unit(&mut layout, ".text", 0x20);
        let line = layout.add_section(".debug_line", SectionKind::Debug);
        let line_start = layout.append(line, &[0; 4]);

        emit_companions(&mut layout, &config, "boot.s", line_start, &[unit]).unwrap();
        let image = layout.resolve().unwrap();

        let info = image.bytes(DEBUG_INFO);
        let len = u32::from_le_bytes([info[0], info[1], info[2], info[3]]) as usize;
        assert_eq!(len, info.len() - 4);
        assert_eq!(&info[4..11], &[2, 0, 0, 0, 0, 0, 4]);
        assert_eq!(info[11], 1); // abbrev code
        assert_eq!(&info[12..16], &[0, 0, 0, 0]); // stmt_list
        assert_eq!(&info[16..20], &0x8000u32.to_le_bytes());
        assert_eq!(&info[20..24], &0x8020u32.to_le_bytes());
        assert_eq!(&info[24..31], b"boot.s\0");
        assert_eq!(&info[31..36], b"/src\0");
        assert_eq!(&info[36..39], b"as\0");
        assert_eq!(&info[39..41], &[0x01, 0x80]);
        assert_eq!(info[41], 0);

        let aranges = image.bytes(DEBUG_ARANGES);
        // 12-byte header padded to 16, one tuple, terminator
        assert_eq!(aranges.len(), 32);
        assert_eq!(&aranges[..4], &28u32.to_le_bytes());
        assert_eq!(&aranges[10..12], &[4, 0]);
        assert_eq!(&aranges[16..20], &0x8000u32.to_le_bytes());
        assert_eq!(&aranges[20..24], &0x20u32.to_le_bytes());
        assert_eq!(&aranges[24..], &[0; 8]);
    }

    #[test]
    fn multiple_units_omit_pc_range() {
        let config = LineConfig::new(Arch::X86_64);
        let mut layout = Layout::new();
        let a = text_unit(&mut layout, ".text", 4);
        let b = text_unit(&mut layout, ".init", 2);
        let line = layout.add_section(".debug_line", SectionKind::Debug);
        let line_start = layout.append(line, &[0; 4]);

        emit_companions(&mut layout, &config, "a.s", line_start, &[a, b]).unwrap();
        let image = layout.resolve().unwrap();

        let info = image.bytes(DEBUG_INFO);
        // header, abbrev code, stmt_list, then the name
        assert_eq!(&info[16..20], b"a.s\0");

        let aranges = image.bytes(DEBUG_ARANGES);
        // 12-byte header padded to 16, two tuples, terminator
        assert_eq!(aranges.len(), 16 + 3 * 16);
        assert_eq!(&aranges[16..24], &0u64.to_le_bytes());
        assert_eq!(&aranges[24..32], &4u64.to_le_bytes());
        assert_eq!(&aranges[32..40], &4u64.to_le_bytes());
        assert_eq!(&aranges[40..48], &2u64.to_le_bytes());
    }
}
