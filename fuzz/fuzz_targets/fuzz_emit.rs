#![no_main]
use libfuzzer_sys::fuzz_target;

use asm_dwarf::{Arch, DebugLines, Layout, LineConfig, SampleMode, SectionKind, StmtFlags};

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one instruction: size, line step, flags, layout op.
    let mut layout = Layout::new();
    let text = layout.add_section(".text", SectionKind::Code);
    let mut lines = DebugLines::new(LineConfig::new(Arch::X86_64).mode(SampleMode::Dense));
    let Ok(file) = lines.register_file(None, "fuzz.s") else {
        return;
    };

    let mut line = 1u32;
    let mut samples = 0usize;
    for chunk in data.chunks_exact(4) {
        match chunk[3] % 4 {
            1 => layout.new_fragment(text),
            2 => layout.add_alignment(text, 1 << (chunk[3] % 8), 0, None),
            _ => {}
        }
        let at = layout.append(text, &vec![0x90; usize::from(chunk[0] % 32)]);
        line = line.saturating_add(u32::from(chunk[1])).max(1);
        let flags = if chunk[2] & 1 == 0 {
            StmtFlags::IS_STMT
        } else {
            StmtFlags::NONE
        };
        if lines.record_location(at, file, line, 0, flags).unwrap_or(false) {
            samples += 1;
        }
    }

    if lines.finish(&mut layout).is_err() {
        return;
    }
    let image = layout.resolve().expect("forward-only samples always lay out");
    let rows = asm_dwarf::decode_rows(image.bytes(".debug_line")).expect("own output decodes");
    if samples > 0 {
        assert_eq!(rows.len(), samples + 1);
    }
});
