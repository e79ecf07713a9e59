use super::proto::{DataType, ModelProto};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Operators the exporter emits, with the first opset that defines them.
const OPERATORS: &[(&str, i64)] = &[
    ("Add", 7),
    ("Concat", 4),
    ("Conv", 1),
    ("Identity", 1),
    ("MatMul", 1),
    ("MaxPool", 8),
    ("Mul", 7),
    ("Reshape", 5),
    ("Resize", 11),
    ("Sigmoid", 6),
    ("Softmax", 1),
    ("Split", 2),
    ("Sub", 7),
    ("Transpose", 1),
];

fn invalid(msg: impl Into<String>) -> Error {
    Error::Conversion(format!("invalid graph: {}", msg.into()))
}

fn element_size(data_type: i32) -> usize {
    if data_type == DataType::Int64 as i32 || data_type == DataType::Double as i32 {
        8
    } else {
        4
    }
}

/// Structural validation of an exported model.
///
/// Checks that the default operator set is declared, operators exist at
/// that opset, initializer and value names are unique, nodes are in
/// topological order and every declared output is produced.
pub fn check_model(model: &ModelProto) -> Result<()> {
    let opset = model
        .default_opset()
        .ok_or_else(|| invalid("no default-domain opset imported"))?;
    let graph = model
        .graph
        .as_ref()
        .ok_or_else(|| invalid("model has no graph"))?;

    if graph.input.is_empty() || graph.output.is_empty() {
        return Err(invalid("graph must declare inputs and outputs"));
    }

    let mut defined: HashSet<&str> = HashSet::new();
    for name in graph
        .input
        .iter()
        .map(|v| v.name.as_str())
        .chain(graph.initializer.iter().map(|t| t.name.as_str()))
    {
        if name.is_empty() || !defined.insert(name) {
            return Err(invalid(format!("duplicate or empty graph value '{name}'")));
        }
    }

    for tensor in &graph.initializer {
        let payload = if tensor.raw_data.is_empty() {
            tensor.float_data.len() + tensor.int64_data.len() + tensor.int32_data.len()
        } else {
            tensor.raw_data.len() / element_size(tensor.data_type)
        };
        let expected = tensor.element_count();
        if payload != expected {
            return Err(invalid(format!(
                "initializer '{}' holds {payload} values for shape {:?}",
                tensor.name, tensor.dims
            )));
        }
    }

    for node in &graph.node {
        match OPERATORS.iter().find(|(op, _)| *op == node.op_type) {
            Some((_, since)) if *since <= opset => {}
            Some((op, since)) => {
                return Err(invalid(format!("{op} requires opset {since}, model declares {opset}")))
            }
            None if node.domain.is_empty() => {
                return Err(invalid(format!("unsupported operator '{}'", node.op_type)))
            }
            None => {}
        }

        for input in node.input.iter().filter(|i| !i.is_empty()) {
            if !defined.contains(input.as_str()) {
                return Err(invalid(format!(
                    "node '{}' reads '{}' before it is defined",
                    node.name, input
                )));
            }
        }
        for output in &node.output {
            if !defined.insert(output.as_str()) {
                return Err(invalid(format!("value '{output}' is assigned twice")));
            }
        }
    }

    for output in &graph.output {
        if !defined.contains(output.name.as_str()) {
            return Err(invalid(format!("output '{}' is never produced", output.name)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::builder::GraphBuilder;
    use crate::onnx::proto::{NodeProto, OperatorSetIdProto};

    fn model(opset: i64, build: impl FnOnce(&mut GraphBuilder)) -> ModelProto {
        let mut b = GraphBuilder::new(opset);
        build(&mut b);
        ModelProto {
            ir_version: 6,
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: opset,
            }],
            graph: Some(b.finish("g")),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_model_passes() {
        let m = model(11, |b| {
            let x = b.input("images", &[1, 2, 4, 4]);
            let up = b.upsample("up", &x, 2.0);
            let y = b.reshape("r", &up, &[1, 2, 64]);
            b.output(&y, "output0", &[1, 2, 64]);
        });
        check_model(&m).unwrap();
    }

    #[test]
    fn test_missing_opset_rejected() {
        let mut m = model(11, |b| {
            let x = b.input("images", &[1]);
            b.output(&x, "output0", &[1]);
        });
        m.opset_import.clear();
        assert!(matches!(check_model(&m), Err(Error::Conversion(_))));
    }

    #[test]
    fn test_out_of_order_node_rejected() {
        let mut m = model(11, |b| {
            let x = b.input("images", &[1]);
            let y = b.sigmoid("a", &x);
            let z = b.sigmoid("b", &y);
            b.output(&z, "output0", &[1]);
        });
        m.graph.as_mut().unwrap().node.swap(0, 1);
        let err = check_model(&m).unwrap_err();
        assert!(err.to_string().contains("before it is defined"));
    }

    #[test]
    fn test_operator_newer_than_opset_rejected() {
        let mut m = model(11, |b| {
            let x = b.input("images", &[1, 1, 2, 2]);
            let y = b.upsample("up", &x, 2.0);
            b.output(&y, "output0", &[1, 1, 4, 4]);
        });
        m.opset_import[0].version = 10;
        let err = check_model(&m).unwrap_err();
        assert!(err.to_string().contains("Resize requires opset 11"));
    }

    #[test]
    fn test_unproduced_output_rejected() {
        let mut m = model(11, |b| {
            let x = b.input("images", &[1]);
            b.output(&x, "output0", &[1]);
        });
        let graph = m.graph.as_mut().unwrap();
        graph.node[0] = NodeProto {
            op_type: "Identity".to_string(),
            input: vec!["images".to_string()],
            output: vec!["other".to_string()],
            ..Default::default()
        };
        let err = check_model(&m).unwrap_err();
        assert!(err.to_string().contains("never produced"));
    }
}
