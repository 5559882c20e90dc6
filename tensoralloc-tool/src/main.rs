use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arbitrary::Unstructured;
use clap::Parser;
use example_graph::Network;
use rand::RngCore;
use tensoralloc::debug_utils::{self, ArbitraryGraphConfig, GenericGraph, GenericTarget};
use tensoralloc::{MemoryAllocator, Options};

mod example_graph;

#[derive(Parser)]
/// Tool for testing tensoralloc.
enum Args {
    /// Run memory allocation on a given graph.
    Allocate {
        /// Print the input graph before the result of memory allocation.
        #[clap(short = 'v')]
        verbose: bool,

        /// File containing the graph to allocate.
        graph: PathBuf,

        /// Size of the local memory in bytes.
        #[clap(long)]
        budget: u64,

        /// Alignment of allocations in local memory.
        #[clap(long, default_value_t = 1)]
        alignment: u64,

        /// Memory allocator options.
        #[clap(flatten)]
        options: Options,
    },

    /// Generate a random graph.
    GenGraph {
        /// Number of graph inputs.
        #[clap(long, default_value_t = 4)]
        inputs: usize,

        /// Number of nodes.
        #[clap(long, default_value_t = 30)]
        nodes: usize,

        /// Number of values read by each node.
        #[clap(long, default_value_t = 3)]
        inputs_per_node: usize,

        /// Number of values written by each node.
        #[clap(long, default_value_t = 2)]
        outputs_per_node: usize,

        /// Number of dimensions of each value.
        #[clap(long, default_value_t = 4)]
        rank: usize,

        /// Size of each dimension.
        #[clap(long, default_value_t = 64)]
        dim: u64,
    },

    /// Parses the given graph and re-dumps it with proper formatting.
    ///
    /// Note that this will strip all comments.
    FmtGraph {
        /// File containing the graph definition.
        graph: PathBuf,
    },

    /// Generate the graph of a well-known network.
    ExampleGraph {
        /// Batch size.
        #[clap(short = 'b', default_value_t = 1)]
        batch: u64,

        /// Network to generate the graph for.
        network: Network,
    },
}

fn load_graph(path: &Path, target: &GenericTarget) -> Result<GenericGraph> {
    let graph = fs::read(path).context("could not read graph input file")?;
    let graph = String::from_utf8(graph).context("graph input is not UTF-8")?;
    let graph = GenericGraph::parse(&graph).context("could not parse graph input file")?;
    debug_utils::validate_graph(&graph, target).context("graph validation failed")?;
    Ok(graph)
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    match args {
        Args::Allocate {
            verbose,
            ref graph,
            budget,
            alignment,
            ref options,
        } => {
            let target = GenericTarget::new(budget).with_alignment(alignment);
            let graph = load_graph(graph, &target)?;

            if verbose {
                println!(
                    "================ Input graph ================\n{}",
                    debug_utils::DisplayGraph(&graph)
                );
            }

            let mut memalloc = MemoryAllocator::new();
            let output = memalloc
                .allocate_memory(&graph, &target, options)
                .context("memory allocation failed")?;

            println!("================ Output ================\n{output}");

            println!("{}", output.stats());

            debug_utils::check_output(&output)
                .context("memory allocation result failed checker")?;
            output.ensure_complete()?;
        }
        Args::GenGraph {
            inputs,
            nodes,
            inputs_per_node,
            outputs_per_node,
            rank,
            dim,
        } => {
            let config = ArbitraryGraphConfig {
                inputs: 1..=inputs.max(1),
                nodes: 0..=nodes,
                inputs_per_node: 1..=inputs_per_node.max(1),
                outputs_per_node: 1..=outputs_per_node.max(1),
                rank: 0..=rank,
                dim: 1..=dim.max(1),
            };
            let mut bytes = [0; 4096];
            rand::rng().fill_bytes(&mut bytes);
            let graph = GenericGraph::arbitrary_with_config(
                &GenericTarget::new(u64::MAX),
                &mut Unstructured::new(&bytes),
                config,
            )
            .context("failed to generate arbitrary graph")?;

            println!("{}", debug_utils::DisplayGraph(&graph));
        }
        Args::FmtGraph { ref graph } => {
            let graph = load_graph(graph, &GenericTarget::new(u64::MAX))?;

            println!("{}", debug_utils::DisplayGraph(&graph));
        }
        Args::ExampleGraph { batch, network } => {
            let graph = network.gen_graph(batch);
            let graph_text = graph.to_string();

            // Sanity-check
            let graph =
                GenericGraph::parse(&graph_text).context("could not parse generated graph")?;
            debug_utils::validate_graph(&graph, &GenericTarget::new(u64::MAX))
                .context("generated graph validation failed")?;

            print!("{graph_text}");
        }
    }
    Ok(())
}
