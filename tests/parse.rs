#![cfg(feature = "parse")]

use tensoralloc::debug_utils::{self, GenericGraph, GenericTarget};
use tensoralloc::graph::{ElemType, Graph, Node, Value};
use tensoralloc::{MemoryAllocator, Options};

const LENET: &str = include_str!("../example_graph/lenet.graph");
const RESNET_BLOCK: &str = include_str!("../example_graph/resnet_block.graph");

#[test]
fn parse_simple() {
    let graph = GenericGraph::parse(
        r#"
; A single addition.
%0 = f32[2, 3] name("lhs")
%1 = f32[2, 3] resident
%2 = i8[] output name("sum")

node0: add(%0, %1) -> (%2)
"#,
    )
    .unwrap();

    assert_eq!(graph.num_values(), 3);
    assert_eq!(graph.num_nodes(), 1);
    let (v0, v1, v2) = (Value::from_u32(0), Value::from_u32(1), Value::from_u32(2));
    let n0 = Node::from_u32(0);
    assert_eq!(graph.value_name(v0), "lhs");
    assert_eq!(graph.value_name(v1), "%1");
    assert_eq!(graph.value_type(v2), ElemType::I8);
    assert_eq!(graph.value_shape(v0), &[2, 3]);
    assert!(graph.value_shape(v2).is_empty());
    assert!(graph.value_is_resident(v1));
    assert!(graph.value_is_output(v2));
    assert_eq!(graph.node_kind(n0), "add");
    assert_eq!(graph.node_inputs(n0), &[v0, v1]);
    assert_eq!(graph.node_outputs(n0), &[v2]);
    assert_eq!(graph.value_def(v2), Some(n0));
    assert_eq!(graph.value_users(v0), &[n0]);
}

#[test]
fn parse_errors() {
    let cases = [
        // Values must be declared in order.
        "%1 = f32[1]\n",
        // Unknown element type.
        "%0 = f128[1]\n",
        // Attributes may only be given once.
        "%0 = f32[1] output output\n",
        // Reference to an undeclared value.
        "%0 = f32[1]\nnode0: relu(%0) -> (%1)\n",
        // Nodes must be declared in order.
        "%0 = f32[1]\n%1 = f32[1]\nnode1: relu(%0) -> (%1)\n",
        // A value can only have one definition.
        "%0 = f32[1]\n%1 = f32[1]\nnode0: relu(%0) -> (%1)\nnode1: relu(%0) -> (%1)\n",
        // Syntax error.
        "%0 = f32[1,]\n",
    ];
    for case in cases {
        assert!(GenericGraph::parse(case).is_err(), "{case:?} should not parse");
    }
}

#[test]
fn example_graphs_round_trip() {
    for text in [LENET, RESNET_BLOCK] {
        let graph = GenericGraph::parse(text).unwrap();
        debug_utils::validate_graph(&graph, &GenericTarget::new(u64::MAX)).unwrap();
        let dumped = graph.to_string();
        let reparsed = GenericGraph::parse(&dumped).unwrap();
        assert_eq!(reparsed.to_string(), dumped);
    }
}

#[test]
fn allocate_lenet() {
    let graph = GenericGraph::parse(LENET).unwrap();
    let mut memalloc = MemoryAllocator::new();

    // Everything fits without any changes.
    let target = GenericTarget::new(1 << 16);
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    debug_utils::check_output(&output).unwrap();
    assert_eq!(output.num_subgraphs(), 1);
    let sg = output.subgraphs().next().unwrap();
    assert_eq!(output.subgraph_shrinks(sg), 0);

    // The two largest activations no longer fit side by side, but halving
    // every tile once is enough.
    let target = GenericTarget::new(1 << 14);
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    debug_utils::check_output(&output).unwrap();
    output.ensure_complete().unwrap();
    assert_eq!(output.num_subgraphs(), 1);
    let sg = output.subgraphs().next().unwrap();
    assert_eq!(output.subgraph_shrinks(sg), 1);
}

#[test]
fn allocate_resnet_block() {
    let graph = GenericGraph::parse(RESNET_BLOCK).unwrap();
    let mut memalloc = MemoryAllocator::new();
    for budget in [1 << 12, 1 << 16, 1 << 20, 1 << 24] {
        let target = GenericTarget::new(budget).with_alignment(64);
        let output = memalloc
            .allocate_memory(&graph, &target, &Options::default())
            .unwrap();
        debug_utils::check_output(&output).unwrap();
        output.ensure_complete().unwrap();
    }
}
