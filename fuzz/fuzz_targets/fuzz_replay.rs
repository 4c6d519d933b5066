#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, only return Ok/Err.
    let _ = asm_dwarf::decode_line_section(data);
});
