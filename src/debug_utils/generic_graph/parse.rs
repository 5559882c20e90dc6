use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::str::FromStr;

use anyhow::Result;
use cranelift_entity::{EntityRef, PrimaryMap};
use pest::error::{Error, ErrorVariant};
use pest::iterators::Pair;
use pest::{Parser, Span};
use pest_derive::Parser;
use smallvec::SmallVec;

use super::{GenericGraph, NodeData, ValueData};
use crate::graph::{ElemType, Node, Value};

#[derive(Parser)]
#[grammar = "debug_utils/generic_graph/grammar.pest"]
struct GraphParser;

/// Helper function to extract N sub-pairs when the layout of a rule is fixed.
fn extract<const N: usize>(pair: Pair<'_, Rule>, expected_rules: [Rule; N]) -> [Pair<'_, Rule>; N] {
    let mut out = [(); N].map(|()| pair.clone());
    let mut i = 0;
    for pair in pair.into_inner() {
        assert_eq!(pair.as_rule(), expected_rules[i]);
        out[i] = pair;
        i += 1;
    }
    assert_eq!(i, N);
    out
}

/// Helper function to emit a custom error at the given span.
fn custom_error(span: Span<'_>, msg: &str) -> Error<Rule> {
    Error::new_from_span(
        ErrorVariant::<Rule>::CustomError {
            message: msg.into(),
        },
        span,
    )
}

fn parse_number<T: FromStr>(pair: Pair<'_, Rule>) -> Result<T> {
    Ok(pair.as_str().parse().map_err(|_| {
        // The rule only allows digits so this can only be an overflow.
        custom_error(pair.as_span(), "integer overflow")
    })?)
}

fn parse_entity<T: EntityRef>(pair: Pair<'_, Rule>) -> Result<T> {
    let [number] = extract(pair, [Rule::number]);
    let index = parse_number(number)?;
    Ok(T::new(index))
}

fn parse_value_list(pair: Pair<'_, Rule>, values: &PrimaryMap<Value, ValueData>) -> Result<Vec<Value>> {
    let mut out = vec![];
    for pair in pair.into_inner() {
        let span = pair.as_span();
        let value: Value = parse_entity(pair)?;
        if !values.is_valid(value) {
            Err(custom_error(span, "use of undeclared value"))?;
        }
        out.push(value);
    }
    Ok(out)
}

fn parse_value_declaration(
    pair: Pair<'_, Rule>,
    values: &mut PrimaryMap<Value, ValueData>,
) -> Result<()> {
    let mut pairs = pair.into_inner();
    let (Some(value), Some(ty), Some(shape)) = (pairs.next(), pairs.next(), pairs.next()) else {
        unreachable!();
    };

    let span = value.as_span();
    if parse_entity::<Value>(value)? != values.next_key() {
        Err(custom_error(span, "must be declared in order and with no gaps"))?;
    }
    let Some(ty) = ElemType::from_name(ty.as_str()) else {
        Err(custom_error(ty.as_span(), "unknown element type"))?
    };
    let shape: SmallVec<[u64; 4]> = shape
        .into_inner()
        .map(parse_number)
        .collect::<Result<_>>()?;

    let mut name: Option<String> = None;
    let mut is_resident = false;
    let mut is_output = false;
    for pair in pairs {
        let duplicate = match pair.as_rule() {
            Rule::value_name => {
                let [string] = extract(pair.clone(), [Rule::string]);
                let [inner] = extract(string, [Rule::string_inner]);
                name.replace(inner.as_str().into()).is_some()
            }
            Rule::resident_attr => core::mem::replace(&mut is_resident, true),
            Rule::output_attr => core::mem::replace(&mut is_output, true),
            _ => unreachable!(),
        };
        if duplicate {
            Err(custom_error(pair.as_span(), "duplicate attribute"))?;
        }
    }

    let next = values.next_key();
    values.push(ValueData {
        name: name.unwrap_or_else(|| alloc::format!("{next}")),
        ty,
        shape,
        def: Default::default(),
        users: vec![],
        is_resident,
        is_output,
    });
    Ok(())
}

fn parse_node_declaration(
    pair: Pair<'_, Rule>,
    nodes: &mut PrimaryMap<Node, NodeData>,
    values: &mut PrimaryMap<Value, ValueData>,
) -> Result<()> {
    let [node, kind, inputs, outputs] = extract(
        pair,
        [Rule::node, Rule::ident, Rule::value_list, Rule::value_list],
    );

    let span = node.as_span();
    let node: Node = parse_entity(node)?;
    if node != nodes.next_key() {
        Err(custom_error(span, "must be declared in order and with no gaps"))?;
    }
    let outputs_span = outputs.as_span();
    let inputs = parse_value_list(inputs, values)?;
    let outputs = parse_value_list(outputs, values)?;

    for &value in &inputs {
        let users = &mut values[value].users;
        if !users.contains(&node) {
            users.push(node);
        }
    }
    for &value in &outputs {
        if values[value].def.is_some() {
            Err(custom_error(outputs_span, "value defined by multiple nodes"))?;
        }
        values[value].def = node.into();
    }
    nodes.push(NodeData {
        kind: kind.as_str().into(),
        inputs,
        outputs,
    });
    Ok(())
}

impl GenericGraph {
    /// Parses a textual graph description into a [`GenericGraph`].
    ///
    /// All values must be declared before the nodes referencing them.
    pub fn parse(input: &str) -> Result<Self> {
        let parse_result = GraphParser::parse(Rule::graph, input)?;

        let mut nodes = PrimaryMap::new();
        let mut values = PrimaryMap::new();
        for pair in parse_result {
            match pair.as_rule() {
                Rule::value_declaration => parse_value_declaration(pair, &mut values)?,
                Rule::node_declaration => parse_node_declaration(pair, &mut nodes, &mut values)?,
                Rule::EOI => {}
                _ => unreachable!("{:?}", pair.as_rule()),
            }
        }

        Ok(Self { nodes, values })
    }
}
