use std::fmt;
use std::sync::OnceLock;

use arbitrary::{Arbitrary, Result, Unstructured};
use tensoralloc::Options;
use tensoralloc::debug_utils::{self, GenericGraph, GenericTarget};

/// Example graphs that are parsed and validated once.
static EXAMPLE_GRAPHS: OnceLock<Vec<(&'static str, GenericGraph)>> = OnceLock::new();

enum TestCaseGraph {
    Example {
        path: &'static str,
        graph: &'static GenericGraph,
    },
    Arbitrary {
        graph: GenericGraph,
    },
}

impl TestCaseGraph {
    pub fn get(&self) -> &GenericGraph {
        match *self {
            TestCaseGraph::Example { path: _, graph } => graph,
            TestCaseGraph::Arbitrary { ref graph } => graph,
        }
    }
}

/// Common implementation of a test case used by all fuzz targets.
pub struct TestCase {
    graph: TestCaseGraph,
    pub target: GenericTarget,
    pub options: Options,
}

impl TestCase {
    pub fn graph(&self) -> &GenericGraph {
        self.graph.get()
    }
}

impl Arbitrary<'_> for TestCase {
    fn arbitrary(u: &mut Unstructured) -> Result<Self> {
        // Ensure the logger is initialized.
        let _ = pretty_env_logger::try_init();

        let target: GenericTarget = u.arbitrary()?;
        let options = u.arbitrary()?;
        let example_graphs = EXAMPLE_GRAPHS.get_or_init(|| {
            let lenet =
                GenericGraph::parse(include_str!("../../example_graph/lenet.graph")).unwrap();
            let resnet_block =
                GenericGraph::parse(include_str!("../../example_graph/resnet_block.graph"))
                    .unwrap();
            vec![
                ("example_graph/lenet.graph", lenet),
                ("example_graph/resnet_block.graph", resnet_block),
            ]
        });
        let graph = if u.arbitrary()? {
            let (path, graph) = u.choose(example_graphs)?;
            debug_utils::validate_graph(graph, &target).unwrap();
            log::trace!("Using example graph: {path}");
            TestCaseGraph::Example { path, graph }
        } else {
            let graph = GenericGraph::arbitrary_with_config(&target, u, Default::default())?;
            log::trace!("Using arbitrary graph:\n{graph}");
            TestCaseGraph::Arbitrary { graph }
        };
        Ok(TestCase {
            graph,
            target,
            options,
        })
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?}", self.target)?;
        writeln!(f, "{:?}", self.options)?;
        match &self.graph {
            TestCaseGraph::Example { path, graph: _ } => {
                writeln!(f, "Using example graph: {path}")
            }
            TestCaseGraph::Arbitrary { graph } => writeln!(f, "{graph}"),
        }
    }
}
