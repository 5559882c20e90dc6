//! Support for displaying human-readable representations of types implementing
//! [`Graph`].

use core::cell::Cell;
use core::fmt;

use crate::graph::Graph;

/// Helper type to display a separated list of displayable values.
pub(crate) struct DisplayIter<T> {
    iter: Cell<Option<T>>,
    separator: &'static str,
}
impl<T: IntoIterator> fmt::Display for DisplayIter<T>
where
    T::Item: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(iter) = self.iter.take() else {
            return Ok(());
        };
        for (i, val) in iter.into_iter().enumerate() {
            if i == 0 {
                write!(f, "{val}")?;
            } else {
                write!(f, "{} {val}", self.separator)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn display_iter<I: IntoIterator<Item = impl fmt::Display>>(
    iter: I,
    separator: &'static str,
) -> DisplayIter<I> {
    DisplayIter {
        iter: Cell::new(Some(iter)),
        separator,
    }
}

/// Wrapper around a type implementing [`Graph`] that provides a [`Display`]
/// implementation which dumps the graph in a format that is both
/// human-readable and machine-parseable.
///
/// The returned string can be re-parsed into a graph by using
/// [`GenericGraph::parse`] (requires the `parse` cargo feature).
///
/// [`GenericGraph::parse`]: crate::debug_utils::GenericGraph::parse
/// [`Display`]: core::fmt::Display
pub struct DisplayGraph<'a, G: Graph>(pub &'a G);

impl<G: Graph> fmt::Debug for DisplayGraph<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<G: Graph> fmt::Display for DisplayGraph<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Value declarations
        for value in self.0.values() {
            write!(
                f,
                "{value} = {}[{}] name(\"{}\")",
                self.0.value_type(value),
                display_iter(self.0.value_shape(value), ","),
                self.0.value_name(value),
            )?;
            if self.0.value_is_resident(value) {
                write!(f, " resident")?;
            }
            if self.0.value_is_output(value) {
                write!(f, " output")?;
            }
            writeln!(f)?;
        }

        // Nodes
        if self.0.num_nodes() != 0 {
            writeln!(f)?;
        }
        for node in self.0.nodes() {
            writeln!(
                f,
                "{node}: {}({}) -> ({})",
                self.0.node_kind(node),
                display_iter(self.0.node_inputs(node), ","),
                display_iter(self.0.node_outputs(node), ","),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;

    use crate::debug_utils::GenericGraph;
    use crate::graph::ElemType;

    #[test]
    fn dump_format() {
        let mut graph = GenericGraph::new();
        let x = graph.add_value("input", ElemType::F32, &[1, 8, 8]);
        let w = graph.add_value("conv.weight", ElemType::I8, &[8, 8, 3, 3]);
        let y = graph.add_value("conv", ElemType::F32, &[1, 8, 8]);
        let s = graph.add_value("flag", ElemType::Bool, &[]);
        graph.set_resident(w);
        graph.set_output(y);
        graph.add_node("conv", &[x, w], &[y, s]);

        assert_eq!(
            format!("{graph}"),
            "%0 = f32[1, 8, 8] name(\"input\")\n\
             %1 = i8[8, 8, 3, 3] name(\"conv.weight\") resident\n\
             %2 = f32[1, 8, 8] name(\"conv\") output\n\
             %3 = bool[] name(\"flag\")\n\
             \n\
             node0: conv(%0, %1) -> (%2, %3)\n"
        );
    }
}
