//! Checks that re-using `MemoryAllocator` for multiple graphs works.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tensoralloc::{MemoryAllocator, debug_utils};
use tensoralloc_fuzz::TestCase;

fuzz_target!(|ts: [TestCase; 4]| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    let mut memalloc = MemoryAllocator::new();
    for t in ts {
        let output = memalloc
            .allocate_memory(t.graph(), &t.target, &t.options)
            .unwrap();
        debug_utils::check_output(&output).unwrap();
    }
});
