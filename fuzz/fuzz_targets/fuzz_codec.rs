#![no_main]
use libfuzzer_sys::fuzz_target;

use asm_dwarf::DeltaCodec;

fuzz_target!(|data: &[u8]| {
    if data.len() < 13 {
        return;
    }
    let line = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let addr = u64::from_le_bytes([
        data[4], data[5], data[6], data[7], data[8], data[9], data[10], data[11],
    ]);
    let codec = DeltaCodec::new(data[12]);

    // The size estimate and the written bytes must never diverge.
    let mut out = Vec::new();
    let written = codec.emit(line, addr, &mut out);
    assert_eq!(written, out.len());
    assert_eq!(codec.size_of(line, addr), written);
    assert!(written <= codec.max_size_of(line));
});
