//! Line table example: records `.loc`-style locations against a small code
//! section, lays it out, and prints the decoded rows.
//!
//! Run with: `cargo run --example line_table`

use asm_dwarf::{
    decode_line_section, Arch, DebugLines, Layout, LineConfig, Loc, SampleMode, SectionKind,
    StmtFlags,
};

fn main() {
    println!("=== asm_dwarf line table example ===\n");

    let mut layout = Layout::new();
    layout.set_base_address(0x40_1000);
    let text = layout.add_section(".text", SectionKind::Code);

    let mut lines = DebugLines::new(
        LineConfig::new(Arch::X86_64)
            .mode(SampleMode::Dense)
            .comp_dir("/src"),
    );
    let main = lines.register_file(Some(1), "main.s").unwrap();

    // push rbp; mov rbp, rsp
    lines.set_loc(Loc {
        file: main,
        line: 3,
        column: 0,
        flags: StmtFlags::IS_STMT,
    });
    let at = layout.append(text, &[0x55]);
    lines.emit_insn(at).unwrap();
    let at = layout.append(text, &[0x48, 0x89, 0xE5]);
    lines.emit_insn(at).unwrap();

    // Padding between the prologue and the body forces a deferred record.
    layout.add_alignment(text, 16, 0x90, None);

    // xor eax, eax; pop rbp; ret
    lines.set_loc(Loc {
        file: main,
        line: 7,
        column: 4,
        flags: StmtFlags::IS_STMT,
    });
    let at = layout.append(text, &[0x31, 0xC0, 0x5D, 0xC3]);
    lines.emit_insn(at).unwrap();

    let sections = lines.finish(&mut layout).unwrap();
    println!("Emitted sections: {}", sections.names().join(", "));

    let image = layout.resolve().unwrap();
    println!("\n.text:");
    print_hex("   ", image.bytes(".text"));
    println!("\n.debug_line:");
    print_hex("   ", image.bytes(".debug_line"));

    println!("\nRows:");
    for program in decode_line_section(image.bytes(".debug_line")).unwrap() {
        for row in &program.rows {
            println!(
                "   0x{:08X}  file {}  line {:>3}  col {:>2}{}{}",
                row.address,
                row.file,
                row.line,
                row.column,
                if row.is_stmt { "  is_stmt" } else { "" },
                if row.end_sequence { "  end_sequence" } else { "" },
            );
        }
    }
}

fn print_hex(prefix: &str, bytes: &[u8]) {
    for chunk in bytes.chunks(16) {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        println!("{prefix}{}", hex.join(" "));
    }
}
