//! Checks that `GenericGraph::arbitrary_with_config` produces graphs that
//! pass validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tensoralloc::debug_utils;
use tensoralloc_fuzz::TestCase;

fuzz_target!(|t: TestCase| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    debug_utils::validate_graph(t.graph(), &t.target).unwrap();
});
