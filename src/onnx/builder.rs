use super::proto::{AttributeProto, DataType, GraphProto, NodeProto, TensorProto, ValueInfoProto};
use candle_core::Tensor;

/// Incrementally assembles an inference graph in topological order.
///
/// Every helper appends one node and returns the name of the value it
/// produces, so graph construction reads like the forward pass it mirrors.
/// Constants are emitted as fresh initializers at every call site.
#[derive(Debug)]
pub struct GraphBuilder {
    opset: i64,
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    counter: usize,
}

impl GraphBuilder {
    pub fn new(opset: i64) -> Self {
        Self {
            opset,
            nodes: Vec::new(),
            initializers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            counter: 0,
        }
    }

    pub fn input(&mut self, name: &str, shape: &[i64]) -> String {
        self.inputs
            .push(ValueInfoProto::tensor(name, DataType::Float, shape));
        name.to_string()
    }

    /// Declares `value` as a graph output named `name` through an `Identity` node.
    pub fn output(&mut self, value: &str, name: &str, shape: &[i64]) {
        self.push_node("Identity", &format!("{name}/Identity"), &[value], &[name], Vec::new());
        self.outputs
            .push(ValueInfoProto::tensor(name, DataType::Float, shape));
    }

    fn fresh(&mut self, scope: &str, op: &str) -> String {
        self.counter += 1;
        format!("/{scope}/{op}_{}", self.counter)
    }

    pub fn tensor(&mut self, name: &str, tensor: &Tensor) -> candle_core::Result<String> {
        let dims: Vec<i64> = tensor.dims().iter().map(|&d| d as i64).collect();
        let values = tensor.flatten_all()?.to_vec1::<f32>()?;
        self.initializers
            .push(TensorProto::from_f32(name, &dims, &values));
        Ok(name.to_string())
    }

    pub fn const_f32(&mut self, scope: &str, dims: &[i64], values: &[f32]) -> String {
        let name = self.fresh(scope, "Constant");
        self.initializers
            .push(TensorProto::from_f32(&name, dims, values));
        name
    }

    pub fn const_i64(&mut self, scope: &str, values: &[i64]) -> String {
        let name = self.fresh(scope, "Constant");
        self.initializers
            .push(TensorProto::from_i64(&name, &[values.len() as i64], values));
        name
    }

    fn push_node(
        &mut self,
        op_type: &str,
        name: &str,
        inputs: &[&str],
        outputs: &[&str],
        attribute: Vec<AttributeProto>,
    ) {
        self.nodes.push(NodeProto {
            name: name.to_string(),
            op_type: op_type.to_string(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: outputs.iter().map(|s| s.to_string()).collect(),
            attribute,
            ..Default::default()
        });
    }

    pub fn node(
        &mut self,
        scope: &str,
        op_type: &str,
        inputs: &[&str],
        attribute: Vec<AttributeProto>,
    ) -> String {
        let name = self.fresh(scope, op_type);
        let output = format!("{name}_output_0");
        self.push_node(op_type, &name, inputs, &[output.as_str()], attribute);
        output
    }

    fn node_multi(
        &mut self,
        scope: &str,
        op_type: &str,
        inputs: &[&str],
        num_outputs: usize,
        attribute: Vec<AttributeProto>,
    ) -> Vec<String> {
        let name = self.fresh(scope, op_type);
        let outputs: Vec<String> = (0..num_outputs)
            .map(|i| format!("{name}_output_{i}"))
            .collect();
        let output_refs: Vec<&str> = outputs.iter().map(String::as_str).collect();
        self.push_node(op_type, &name, inputs, &output_refs, attribute);
        outputs
    }

    #[allow(clippy::too_many_arguments)]
    pub fn conv(
        &mut self,
        scope: &str,
        x: &str,
        weight: &str,
        bias: &str,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> String {
        let (k, s, p) = (kernel as i64, stride as i64, padding as i64);
        self.node(
            scope,
            "Conv",
            &[x, weight, bias],
            vec![
                AttributeProto::ints("dilations", &[1, 1]),
                AttributeProto::int("group", 1),
                AttributeProto::ints("kernel_shape", &[k, k]),
                AttributeProto::ints("pads", &[p, p, p, p]),
                AttributeProto::ints("strides", &[s, s]),
            ],
        )
    }

    pub fn sigmoid(&mut self, scope: &str, x: &str) -> String {
        self.node(scope, "Sigmoid", &[x], Vec::new())
    }

    pub fn add(&mut self, scope: &str, a: &str, b: &str) -> String {
        self.node(scope, "Add", &[a, b], Vec::new())
    }

    pub fn sub(&mut self, scope: &str, a: &str, b: &str) -> String {
        self.node(scope, "Sub", &[a, b], Vec::new())
    }

    pub fn mul(&mut self, scope: &str, a: &str, b: &str) -> String {
        self.node(scope, "Mul", &[a, b], Vec::new())
    }

    pub fn matmul(&mut self, scope: &str, a: &str, b: &str) -> String {
        self.node(scope, "MatMul", &[a, b], Vec::new())
    }

    pub fn concat(&mut self, scope: &str, xs: &[&str], axis: i64) -> String {
        self.node(scope, "Concat", xs, vec![AttributeProto::int("axis", axis)])
    }

    /// Splits `x` along `axis`. The sizes move from an attribute to an
    /// input at opset 13.
    pub fn split(&mut self, scope: &str, x: &str, axis: i64, sizes: &[i64]) -> Vec<String> {
        let axis_attr = AttributeProto::int("axis", axis);
        if self.opset >= 13 {
            let split = self.const_i64(scope, sizes);
            self.node_multi(scope, "Split", &[x, split.as_str()], sizes.len(), vec![axis_attr])
        } else {
            self.node_multi(
                scope,
                "Split",
                &[x],
                sizes.len(),
                vec![axis_attr, AttributeProto::ints("split", sizes)],
            )
        }
    }

    pub fn reshape(&mut self, scope: &str, x: &str, shape: &[i64]) -> String {
        let shape = self.const_i64(scope, shape);
        self.node(scope, "Reshape", &[x, shape.as_str()], Vec::new())
    }

    pub fn transpose(&mut self, scope: &str, x: &str, perm: &[i64]) -> String {
        self.node(scope, "Transpose", &[x], vec![AttributeProto::ints("perm", perm)])
    }

    /// Softmax over the last axis; the 2-D coercion of opsets below 13
    /// agrees with the per-axis definition only there.
    pub fn softmax_last(&mut self, scope: &str, x: &str) -> String {
        self.node(scope, "Softmax", &[x], vec![AttributeProto::int("axis", -1)])
    }

    pub fn max_pool(&mut self, scope: &str, x: &str, kernel: usize) -> String {
        let k = kernel as i64;
        let p = k / 2;
        self.node(
            scope,
            "MaxPool",
            &[x],
            vec![
                AttributeProto::int("ceil_mode", 0),
                AttributeProto::ints("kernel_shape", &[k, k]),
                AttributeProto::ints("pads", &[p, p, p, p]),
                AttributeProto::ints("strides", &[1, 1]),
            ],
        )
    }

    /// Nearest-neighbour upsampling of the spatial axes by `factor`.
    pub fn upsample(&mut self, scope: &str, x: &str, factor: f32) -> String {
        let scales = self.const_f32(scope, &[4], &[1.0, 1.0, factor, factor]);
        let roi = if self.opset >= 13 {
            String::new()
        } else {
            self.const_f32(scope, &[0], &[])
        };
        self.node(
            scope,
            "Resize",
            &[x, roi.as_str(), scales.as_str()],
            vec![
                AttributeProto::string("coordinate_transformation_mode", "asymmetric"),
                AttributeProto::string("mode", "nearest"),
                AttributeProto::string("nearest_mode", "floor"),
            ],
        )
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn finish(self, name: &str) -> GraphProto {
        GraphProto {
            name: name.to_string(),
            node: self.nodes,
            initializer: self.initializers,
            input: self.inputs,
            output: self.outputs,
            ..Default::default()
        }
    }
}
