//! Checks that dumping a graph and then re-parsing it is lossless.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tensoralloc::debug_utils::{self, GenericGraph};
use tensoralloc_fuzz::TestCase;

fuzz_target!(|t: TestCase| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    let dumped = debug_utils::DisplayGraph(t.graph()).to_string();
    let parsed = GenericGraph::parse(&dumped).unwrap();
    let dumped2 = debug_utils::DisplayGraph(&parsed).to_string();
    assert_eq!(dumped, dumped2);
});
