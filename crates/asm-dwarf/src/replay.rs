//! Line-table replay.
//!
//! Runs the DWARF line-number state machine over a finished `.debug_line`
//! section and returns the rows it produces.  Used to check emitted programs
//! and to inspect them when debugging; it accepts any version-2-style table,
//! not just the ones this crate writes.

use alloc::string::String;
use alloc::vec::Vec;

use crate::codec::{lne, lns};
use crate::error::DwarfError;
use crate::leb128::{read_sleb128, read_uleb128};

/// One row of the line-number matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineRow {
    /// Machine address.
    pub address: u64,
    /// File-table index.
    pub file: u64,
    /// Source line.
    pub line: u64,
    /// Source column (0 = unknown).
    pub column: u64,
    /// Recommended breakpoint location.
    pub is_stmt: bool,
    /// Start of a basic block.
    pub basic_block: bool,
    /// First address past the end of a sequence.
    pub end_sequence: bool,
}

/// Header fields of one line-number program.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineHeader {
    /// Format version.
    pub version: u16,
    /// Address advance unit.
    pub min_insn_length: u8,
    /// Initial `is_stmt`.
    pub default_is_stmt: bool,
    /// Smallest special-opcode line advance.
    pub line_base: i8,
    /// Line advances per special-opcode address step.
    pub line_range: u8,
    /// First special opcode.
    pub opcode_base: u8,
    /// Operand counts of the standard opcodes.
    pub standard_opcode_lengths: Vec<u8>,
    /// Include directories.
    pub include_directories: Vec<String>,
    /// File names in file-number order (file 1 first).
    pub file_names: Vec<String>,
}

/// A decoded line-number program.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineProgram {
    /// Parsed header.
    pub header: LineHeader,
    /// Rows in program order.
    pub rows: Vec<LineRow>,
}

/// Decode every line-number program in a `.debug_line` section.
///
/// # Errors
///
/// [`DwarfError::Malformed`] on truncation, a 64-bit DWARF length, a zero
/// `line_range`, or a header length pointing past the unit.
pub fn decode_line_section(bytes: &[u8]) -> Result<Vec<LineProgram>, DwarfError> {
    let mut programs = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (program, next) = decode_unit(bytes, offset)?;
        programs.push(program);
        offset = next;
    }
    Ok(programs)
}

/// Rows of every program in a `.debug_line` section, concatenated.
///
/// # Errors
///
/// See [`decode_line_section`].
pub fn decode_rows(bytes: &[u8]) -> Result<Vec<LineRow>, DwarfError> {
    Ok(decode_line_section(bytes)?
        .into_iter()
        .flat_map(|p| p.rows)
        .collect())
}

// ─── Reader ────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    fn malformed(&self, detail: &str) -> DwarfError {
        DwarfError::Malformed {
            offset: self.pos,
            detail: String::from(detail),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.end
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DwarfError> {
        let stop = self
            .pos
            .checked_add(n)
            .filter(|s| *s <= self.end)
            .ok_or_else(|| self.malformed("unexpected end of data"))?;
        let slice = &self.bytes[self.pos..stop];
        self.pos = stop;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DwarfError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DwarfError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DwarfError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Little-endian unsigned value of 1 to 8 bytes.
    fn address(&mut self, size: usize) -> Result<u64, DwarfError> {
        if size == 0 || size > 8 {
            return Err(self.malformed("unsupported address size"));
        }
        let b = self.take(size)?;
        Ok(b.iter().rev().fold(0u64, |acc, &x| (acc << 8) | u64::from(x)))
    }

    fn uleb(&mut self) -> Result<u64, DwarfError> {
        let mut pos = self.pos;
        let v = read_uleb128(&self.bytes[..self.end], &mut pos)
            .ok_or_else(|| self.malformed("bad ULEB128"))?;
        self.pos = pos;
        Ok(v)
    }

    fn sleb(&mut self) -> Result<i64, DwarfError> {
        let mut pos = self.pos;
        let v = read_sleb128(&self.bytes[..self.end], &mut pos)
            .ok_or_else(|| self.malformed("bad SLEB128"))?;
        self.pos = pos;
        Ok(v)
    }

    fn cstr(&mut self) -> Result<String, DwarfError> {
        let rest = &self.bytes[self.pos..self.end];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.malformed("unterminated string"))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }
}

// ─── State machine ─────────────────────────────────────────

struct Machine<'h> {
    header: &'h LineHeader,
    row: LineRow,
    rows: Vec<LineRow>,
}

impl<'h> Machine<'h> {
    fn new(header: &'h LineHeader) -> Self {
        let mut m = Self {
            header,
            row: LineRow::default(),
            rows: Vec::new(),
        };
        m.reset();
        m
    }

    fn reset(&mut self) {
        self.row = LineRow {
            address: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: self.header.default_is_stmt,
            basic_block: false,
            end_sequence: false,
        };
    }

    fn push_row(&mut self) {
        self.rows.push(self.row);
        self.row.basic_block = false;
    }

    fn advance_address(&mut self, operation_advance: u64) {
        let step = operation_advance.wrapping_mul(u64::from(self.header.min_insn_length));
        self.row.address = self.row.address.wrapping_add(step);
    }

    fn special(&mut self, opcode: u8) {
        let adjusted = opcode - self.header.opcode_base;
        let range = self.header.line_range;
        self.advance_address(u64::from(adjusted / range));
        let line_step = i64::from(self.header.line_base) + i64::from(adjusted % range);
        self.row.line = self.row.line.wrapping_add_signed(line_step);
        self.push_row();
    }
}

fn decode_unit(bytes: &[u8], offset: usize) -> Result<(LineProgram, usize), DwarfError> {
    let mut r = Reader {
        bytes,
        pos: offset,
        end: bytes.len(),
    };
    let unit_length = r.u32()?;
    if unit_length >= 0xFFFF_FFF0 {
        return Err(r.malformed("64-bit DWARF is not supported"));
    }
    let unit_end = r
        .pos
        .checked_add(unit_length as usize)
        .filter(|e| *e <= bytes.len())
        .ok_or_else(|| r.malformed("unit length past end of section"))?;
    r.end = unit_end;

    let version = r.u16()?;
    let header_length = r.u32()? as usize;
    let program_start = r
        .pos
        .checked_add(header_length)
        .filter(|p| *p <= unit_end)
        .ok_or_else(|| r.malformed("header length past end of unit"))?;

    let min_insn_length = r.u8()?;
    let default_is_stmt = r.u8()? != 0;
    let line_base = r.u8()? as i8;
    let line_range = r.u8()?;
    if line_range == 0 {
        return Err(r.malformed("line_range is zero"));
    }
    let opcode_base = r.u8()?;
    if opcode_base == 0 {
        return Err(r.malformed("opcode_base is zero"));
    }
    let standard_opcode_lengths = r.take(usize::from(opcode_base - 1))?.to_vec();

    let mut include_directories = Vec::new();
    loop {
        let dir = r.cstr()?;
        if dir.is_empty() {
            break;
        }
        include_directories.push(dir);
    }
    let mut file_names = Vec::new();
    loop {
        let name = r.cstr()?;
        if name.is_empty() {
            break;
        }
        r.uleb()?; // directory
        r.uleb()?; // mtime
        r.uleb()?; // length
        file_names.push(name);
    }

    let header = LineHeader {
        version,
        min_insn_length,
        default_is_stmt,
        line_base,
        line_range,
        opcode_base,
        standard_opcode_lengths,
        include_directories,
        file_names,
    };

    r.pos = program_start;
    let rows = run_program(&mut r, &header)?;
    Ok((LineProgram { header, rows }, unit_end))
}

fn run_program(r: &mut Reader<'_>, header: &LineHeader) -> Result<Vec<LineRow>, DwarfError> {
    let mut m = Machine::new(header);

    while !r.at_end() {
        let opcode = r.u8()?;
        if opcode >= header.opcode_base {
            m.special(opcode);
            continue;
        }
        match opcode {
            0 => {
                let len = r.uleb()?;
                let len = usize::try_from(len).map_err(|_| r.malformed("extended opcode too long"))?;
                if len == 0 {
                    return Err(r.malformed("empty extended opcode"));
                }
                let body = r.pos;
                let sub = r.u8()?;
                match sub {
                    lne::END_SEQUENCE => {
                        m.row.end_sequence = true;
                        m.push_row();
                        m.reset();
                    }
                    lne::SET_ADDRESS => m.row.address = r.address(len - 1)?,
                    _ => {
                        // DW_LNE_define_file and vendor extensions carry no row state.
                    }
                }
                let next = body
                    .checked_add(len)
                    .filter(|n| *n <= r.end)
                    .ok_or_else(|| r.malformed("extended opcode past end of unit"))?;
                r.pos = next;
            }
            lns::COPY => m.push_row(),
            lns::ADVANCE_PC => {
                let n = r.uleb()?;
                m.advance_address(n);
            }
            lns::ADVANCE_LINE => {
                let n = r.sleb()?;
                m.row.line = m.row.line.wrapping_add_signed(n);
            }
            lns::SET_FILE => m.row.file = r.uleb()?,
            lns::SET_COLUMN => m.row.column = r.uleb()?,
            lns::NEGATE_STMT => m.row.is_stmt = !m.row.is_stmt,
            lns::SET_BASIC_BLOCK => m.row.basic_block = true,
            lns::CONST_ADD_PC => {
                let adjusted = 255 - header.opcode_base;
                m.advance_address(u64::from(adjusted / header.line_range));
            }
            lns::FIXED_ADVANCE_PC => {
                let n = r.u16()?;
                m.row.address = m.row.address.wrapping_add(u64::from(n));
            }
            _ => {
                // Unknown standard opcode: skip its ULEB128 operands.
                let args = header
                    .standard_opcode_lengths
                    .get(usize::from(opcode) - 1)
                    .copied()
                    .unwrap_or(0);
                for _ in 0..args {
                    r.uleb()?;
                }
            }
        }
    }

    Ok(m.rows)
}
