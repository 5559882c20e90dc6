use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensoralloc::debug_utils::{self, GenericGraph, GenericTarget};
use tensoralloc::graph::{ElemType, Graph, Node};
use tensoralloc::output::{AllocFailure, MemRegion, SubgraphStatus};
use tensoralloc::{MemAllocError, MemoryAllocator, Options, ShrinkStrategy};

fn no_shrinking() -> Options {
    Options {
        shrink_strategy: ShrinkStrategy::None,
        ..Options::default()
    }
}

/// in -> t0 -> t1 -> t2 -> t3 with every value 256 bytes. `t0` and `t1` are
/// graph outputs so they stay live until the end of their subgraph.
fn escaping_chain() -> (GenericGraph, [Node; 4]) {
    let mut graph = GenericGraph::new();
    let mut prev = graph.add_value("in", ElemType::F32, &[64]);
    let mut nodes = vec![];
    for i in 0..4 {
        let out = graph.add_value(format!("t{i}"), ElemType::F32, &[64]);
        nodes.push(graph.add_node("relu", &[prev], &[out]));
        if i != 2 {
            graph.set_output(out);
        }
        prev = out;
    }
    (graph, nodes.try_into().unwrap())
}

#[test]
fn shrink_before_split() {
    let mut graph = GenericGraph::new();
    let y = graph.add_value("y", ElemType::U8, &[100]);
    graph.add_node("const", &[], &[y]);
    graph.set_output(y);

    let target = GenericTarget::new(50);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    debug_utils::check_output(&output).unwrap();

    assert_eq!(output.num_subgraphs(), 1);
    let sg = output.subgraphs().next().unwrap();
    assert_eq!(output.subgraph_status(sg), SubgraphStatus::Allocated { peak: 25 });
    assert_eq!(output.subgraph_shrinks(sg), 2);
    assert_eq!(output.value_tile_shape(sg, y), Some(&[25][..]));
    assert_eq!(output.value_region(sg, y), Some(MemRegion::new(0, 25)));
}

#[test]
fn unsplittable_subgraph_fails_alone() {
    let mut graph = GenericGraph::new();
    let a = graph.add_value("a", ElemType::U8, &[4]);
    let b = graph.add_value("b", ElemType::U8, &[4]);
    let c = graph.add_value("c", ElemType::U8, &[1000]);
    let n0 = graph.add_node("neg", &[a], &[b]);
    let n1 = graph.add_node("expand", &[b], &[c]);
    graph.set_output(c);

    let target = GenericTarget::new(100);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &no_shrinking())
        .unwrap();
    debug_utils::check_output(&output).unwrap();

    assert_eq!(output.num_subgraphs(), 2);
    let head = output.node_subgraph(n0).unwrap();
    let tail = output.node_subgraph(n1).unwrap();
    assert_ne!(head, tail);
    assert_eq!(output.subgraph_status(head), SubgraphStatus::Allocated { peak: 8 });
    assert_eq!(
        output.subgraph_status(tail),
        SubgraphStatus::Failed(AllocFailure::Unsplittable { peak: 1004 })
    );
    assert!(output.subgraph_allocations(tail).is_empty());
    assert!(!output.is_complete());
    assert!(matches!(
        output.ensure_complete(),
        Err(MemAllocError::UnallocatableSubgraphs { count: 1 })
    ));
}

#[test]
fn split_when_shrinking_is_disabled() {
    let (graph, [n0, n1, n2, n3]) = escaping_chain();
    let target = GenericTarget::new(600);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &no_shrinking())
        .unwrap();
    debug_utils::check_output(&output).unwrap();
    output.ensure_complete().unwrap();

    assert_eq!(output.num_subgraphs(), 2);
    let mut subgraphs = output.subgraphs();
    let (sg0, sg1) = (subgraphs.next().unwrap(), subgraphs.next().unwrap());
    assert_eq!(output.subgraph_nodes(sg0), &[n0, n1]);
    assert_eq!(output.subgraph_nodes(sg1), &[n2, n3]);
    assert_eq!(output.subgraph_status(sg0), SubgraphStatus::Allocated { peak: 512 });
    assert_eq!(output.subgraph_status(sg1), SubgraphStatus::Allocated { peak: 512 });
}

#[test]
fn shrinking_avoids_split() {
    let (graph, _) = escaping_chain();
    let target = GenericTarget::new(600);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    debug_utils::check_output(&output).unwrap();

    assert_eq!(output.num_subgraphs(), 1);
    let sg = output.subgraphs().next().unwrap();
    assert_eq!(output.subgraph_status(sg), SubgraphStatus::Allocated { peak: 512 });
    assert_eq!(output.subgraph_shrinks(sg), 1);
}

#[test]
fn shrink_at_exact_threshold_keeps_shrinking() {
    // Only the output can shrink, so each step removes 10 then 5 bytes of a
    // 100 byte peak. The first step improves the peak by exactly 10%.
    let mut graph = GenericGraph::new();
    let inputs: Vec<_> = (0..10)
        .map(|i| graph.add_value(format!("in{i}"), ElemType::I64, &[1]))
        .collect();
    let out = graph.add_value("out", ElemType::U8, &[20]);
    graph.add_node("concat", &inputs, &[out]);
    graph.set_output(out);

    let target = GenericTarget::new(86);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    debug_utils::check_output(&output).unwrap();

    assert_eq!(output.num_subgraphs(), 1);
    let sg = output.subgraphs().next().unwrap();
    assert_eq!(output.subgraph_status(sg), SubgraphStatus::Allocated { peak: 85 });
    assert_eq!(output.subgraph_shrinks(sg), 2);
    assert_eq!(output.value_tile_shape(sg, out), Some(&[5][..]));
}

#[test]
fn alignment_rounds_up_sizes() {
    let mut graph = GenericGraph::new();
    let x = graph.add_value("x", ElemType::U8, &[10]);
    let y = graph.add_value("y", ElemType::U8, &[10]);
    graph.add_node("neg", &[x], &[y]);
    graph.set_output(y);

    let target = GenericTarget::new(1024).with_alignment(16);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    debug_utils::check_output(&output).unwrap();

    let sg = output.subgraphs().next().unwrap();
    assert_eq!(output.value_region(sg, x), Some(MemRegion::new(0, 16)));
    assert_eq!(output.value_region(sg, y), Some(MemRegion::new(16, 16)));
}

#[test]
fn resident_values_are_not_allocated() {
    let mut graph = GenericGraph::new();
    let x = graph.add_value("x", ElemType::F32, &[16]);
    let w = graph.add_value("w", ElemType::I8, &[1 << 20]);
    let y = graph.add_value("y", ElemType::F32, &[16]);
    graph.set_resident(w);
    graph.add_node("matmul", &[x, w], &[y]);
    graph.set_output(y);

    let target = GenericTarget::new(1024);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    debug_utils::check_output(&output).unwrap();

    let sg = output.subgraphs().next().unwrap();
    assert_eq!(output.subgraph_status(sg), SubgraphStatus::Allocated { peak: 128 });
    assert_eq!(output.value_region(sg, w), None);
}

#[test]
fn missing_budget() {
    let graph = GenericGraph::new();
    let mut memalloc = MemoryAllocator::new();
    for budget in [None, Some(0)] {
        let target = GenericTarget {
            budget,
            ..GenericTarget::new(0)
        };
        assert!(matches!(
            memalloc.allocate_memory(&graph, &target, &Options::default()),
            Err(MemAllocError::MissingBudget)
        ));
    }
}

#[test]
fn invalid_threshold() {
    let graph = GenericGraph::new();
    let target = GenericTarget::new(1024);
    let mut memalloc = MemoryAllocator::new();
    for shrink_threshold in [0.0, 1.0, 1.5, f32::NAN] {
        let options = Options {
            shrink_threshold,
            ..Options::default()
        };
        assert!(matches!(
            memalloc.allocate_memory(&graph, &target, &options),
            Err(MemAllocError::InvalidOptions)
        ));
    }
}

#[test]
fn cyclic_graph() {
    let mut graph = GenericGraph::new();
    let a = graph.add_value("a", ElemType::F32, &[4]);
    let b = graph.add_value("b", ElemType::F32, &[4]);
    graph.add_node("add", &[b], &[a]);
    graph.add_node("add", &[a], &[b]);

    let target = GenericTarget::new(1024);
    let mut memalloc = MemoryAllocator::new();
    assert!(matches!(
        memalloc.allocate_memory(&graph, &target, &Options::default()),
        Err(MemAllocError::CyclicGraph)
    ));
}

#[test]
fn empty_graph() {
    let graph = GenericGraph::new();
    let target = GenericTarget::new(1024);
    let mut memalloc = MemoryAllocator::new();
    let output = memalloc
        .allocate_memory(&graph, &target, &Options::default())
        .unwrap();
    assert_eq!(output.num_subgraphs(), 0);
    assert!(output.is_complete());
    debug_utils::check_output(&output).unwrap();
}

/// Builds a random DAG with nodes in a random order.
fn random_graph(rng: &mut StdRng) -> GenericGraph {
    let mut graph = GenericGraph::new();
    let mut available = vec![];
    for i in 0..rng.random_range(1..4) {
        let value = graph.add_value(format!("in{i}"), ElemType::F32, &[rng.random_range(1..64)]);
        if rng.random_bool(0.25) {
            graph.set_resident(value);
        }
        available.push(value);
    }
    let mut nodes = vec![];
    for i in 0..rng.random_range(1..24) {
        let mut inputs = vec![];
        for _ in 0..rng.random_range(1..=3) {
            let value = available[rng.random_range(0..available.len())];
            if !inputs.contains(&value) {
                inputs.push(value);
            }
        }
        let shape = [rng.random_range(1..8), rng.random_range(1..32)];
        let out = graph.add_value(format!("t{i}"), ElemType::F16, &shape);
        available.push(out);
        nodes.push((inputs, out));
    }
    // Insert the nodes in reverse so that the allocator has to schedule them.
    let mut shuffled = GenericGraph::new();
    for value in graph.values() {
        let new = shuffled.add_value(
            graph.value_name(value),
            graph.value_type(value),
            graph.value_shape(value),
        );
        if graph.value_is_resident(value) {
            shuffled.set_resident(new);
        }
    }
    for (inputs, out) in nodes.iter().rev() {
        shuffled.add_node("op", inputs, &[*out]);
    }
    for value in shuffled.values() {
        if shuffled.value_def(value).is_some() && shuffled.value_users(value).is_empty() {
            shuffled.set_output(value);
        }
    }
    shuffled
}

#[test]
fn random_graphs_pass_checker() {
    let mut rng = StdRng::seed_from_u64(0x7e45);
    let mut memalloc = MemoryAllocator::new();
    let strategies = [
        ShrinkStrategy::HalveOuterDim,
        ShrinkStrategy::HalveLargestDim,
        ShrinkStrategy::None,
    ];
    for _ in 0..100 {
        let graph = random_graph(&mut rng);
        let target = GenericTarget::new(rng.random_range(1..2048))
            .with_alignment(1 << rng.random_range(0..4u32));
        debug_utils::validate_graph(&graph, &target).unwrap();
        let options = Options {
            shrink_threshold: [0.5, 0.9, 0.99][rng.random_range(0..3)],
            shrink_strategy: strategies[rng.random_range(0..3)],
        };

        let first = {
            let output = memalloc.allocate_memory(&graph, &target, &options).unwrap();
            debug_utils::check_output(&output).unwrap();
            output.to_string()
        };

        // Allocation is deterministic, even when the allocator is reused.
        let output = memalloc.allocate_memory(&graph, &target, &options).unwrap();
        assert_eq!(output.to_string(), first);
    }
}
