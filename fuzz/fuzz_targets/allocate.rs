//! Checks that the output of the memory allocator passes the checker.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tensoralloc::{MemoryAllocator, debug_utils};
use tensoralloc_fuzz::TestCase;

fuzz_target!(|t: TestCase| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(t.graph(), &t.target, &t.options)
        .unwrap();
    debug_utils::check_output(&output).unwrap();
});
