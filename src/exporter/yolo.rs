//! Lowers YOLOv8 detection weights into an ONNX inference graph.
//!
//! Weight names follow the layout of the published safetensors checkpoints:
//! `net.*` for the backbone, `fpn.*` for the neck and `head.*` for the
//! detect head. Batch norms are folded into the preceding convolutions.

use crate::model::catalog::{CatalogEntry, Multiples};
use crate::onnx::proto::GraphProto;
use crate::onnx::GraphBuilder;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

const BN_EPS: f64 = 1e-3;
const DFL_BINS: usize = 16;

/// Downsampling factor of each detection level.
pub const STRIDES: [usize; 3] = [8, 16, 32];
pub const MAX_STRIDE: usize = 32;

pub const INPUT_NAME: &str = "images";
pub const OUTPUT_NAME: &str = "output0";

/// Folds an inference-mode batch norm into the convolution it follows.
pub(crate) fn fold_batch_norm(
    weight: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    mean: &Tensor,
    var: &Tensor,
    eps: f64,
) -> Result<(Tensor, Tensor)> {
    let scale = gamma.div(&var.affine(1.0, eps)?.sqrt()?)?;
    let c_out = scale.dim(0)?;
    let weight = weight.broadcast_mul(&scale.reshape((c_out, 1, 1, 1))?)?;
    let bias = beta.sub(&mean.mul(&scale)?)?;
    Ok((weight, bias))
}

/// Anchor centres laid out as `[x..., y...]` and the stride of each anchor.
pub(crate) fn make_anchors(imgsz: usize) -> (Vec<f32>, Vec<f32>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut strides = Vec::new();
    for stride in STRIDES {
        let side = imgsz / stride;
        for y in 0..side {
            for x in 0..side {
                xs.push(x as f32 + 0.5);
                ys.push(y as f32 + 0.5);
                strides.push(stride as f32);
            }
        }
    }
    xs.extend(ys);
    (xs, strides)
}

pub fn num_anchors(imgsz: usize) -> usize {
    STRIDES.iter().map(|s| (imgsz / s) * (imgsz / s)).sum()
}

fn silu(b: &mut GraphBuilder, scope: &str, x: &str) -> String {
    let gate = b.sigmoid(scope, x);
    b.mul(scope, x, &gate)
}

#[allow(clippy::too_many_arguments)]
fn conv_block(
    b: &mut GraphBuilder,
    vb: VarBuilder,
    x: &str,
    c1: usize,
    c2: usize,
    k: usize,
    stride: usize,
    padding: Option<usize>,
) -> Result<String> {
    let scope = vb.prefix();
    let padding = padding.unwrap_or(k / 2);

    let weight = vb.pp("conv").get((c2, c1, k, k), "weight")?;
    let bn = vb.pp("bn");
    let (weight, bias) = fold_batch_norm(
        &weight,
        &bn.get(c2, "weight")?,
        &bn.get(c2, "bias")?,
        &bn.get(c2, "running_mean")?,
        &bn.get(c2, "running_var")?,
        BN_EPS,
    )?;

    let weight = b.tensor(&format!("{scope}.conv.weight"), &weight)?;
    let bias = b.tensor(&format!("{scope}.conv.bias"), &bias)?;
    let y = b.conv(&scope, x, &weight, &bias, k, stride, padding);
    Ok(silu(b, &scope, &y))
}

/// Plain 1x1 convolution with bias, used for the prediction layers.
fn conv_1x1(b: &mut GraphBuilder, vb: VarBuilder, x: &str, c1: usize, c2: usize) -> Result<String> {
    let scope = vb.prefix();
    let weight = b.tensor(&format!("{scope}.weight"), &vb.get((c2, c1, 1, 1), "weight")?)?;
    let bias = b.tensor(&format!("{scope}.bias"), &vb.get(c2, "bias")?)?;
    Ok(b.conv(&scope, x, &weight, &bias, 1, 1, 0))
}

fn bottleneck(
    b: &mut GraphBuilder,
    vb: VarBuilder,
    x: &str,
    c1: usize,
    c2: usize,
    shortcut: bool,
) -> Result<String> {
    let y = conv_block(b, vb.pp("cv1"), x, c1, c2, 3, 1, None)?;
    let y = conv_block(b, vb.pp("cv2"), &y, c2, c2, 3, 1, None)?;
    if shortcut && c1 == c2 {
        Ok(b.add(&vb.prefix(), x, &y))
    } else {
        Ok(y)
    }
}

fn c2f(
    b: &mut GraphBuilder,
    vb: VarBuilder,
    x: &str,
    c1: usize,
    c2: usize,
    n: usize,
    shortcut: bool,
) -> Result<String> {
    let scope = vb.prefix();
    let c = (c2 as f64 * 0.5) as usize;

    let y = conv_block(b, vb.pp("cv1"), x, c1, 2 * c, 1, 1, None)?;
    let mut ys = b.split(&scope, &y, 1, &[c as i64, c as i64]);
    for idx in 0..n {
        let last = ys[ys.len() - 1].clone();
        let next = bottleneck(b, vb.pp(format!("bottleneck.{idx}")), &last, c, c, shortcut)?;
        ys.push(next);
    }

    let refs: Vec<&str> = ys.iter().map(String::as_str).collect();
    let cat = b.concat(&scope, &refs, 1);
    conv_block(b, vb.pp("cv2"), &cat, (2 + n) * c, c2, 1, 1, None)
}

fn sppf(b: &mut GraphBuilder, vb: VarBuilder, x: &str, c1: usize, c2: usize, k: usize) -> Result<String> {
    let scope = vb.prefix();
    let c_ = c1 / 2;

    let x = conv_block(b, vb.pp("cv1"), x, c1, c_, 1, 1, None)?;
    let y1 = b.max_pool(&scope, &x, k);
    let y2 = b.max_pool(&scope, &y1, k);
    let y3 = b.max_pool(&scope, &y2, k);
    let cat = b.concat(&scope, &[x.as_str(), y1.as_str(), y2.as_str(), y3.as_str()], 1);
    conv_block(b, vb.pp("cv2"), &cat, c_ * 4, c2, 1, 1, None)
}

fn repeats(n: f64, depth: f64) -> usize {
    (n * depth).round() as usize
}

/// Backbone; returns the stride 8, 16 and 32 feature maps.
fn darknet(b: &mut GraphBuilder, vb: VarBuilder, x: &str, m: Multiples) -> Result<(String, String, String)> {
    let (w, r, d) = (m.width, m.ratio, m.depth);
    let ch = |c: f64| (c * w) as usize;

    let x = conv_block(b, vb.pp("b1.0"), x, 3, ch(64.), 3, 2, Some(1))?;
    let x = conv_block(b, vb.pp("b1.1"), &x, ch(64.), ch(128.), 3, 2, Some(1))?;
    let x = c2f(b, vb.pp("b2.0"), &x, ch(128.), ch(128.), repeats(3., d), true)?;
    let x = conv_block(b, vb.pp("b2.1"), &x, ch(128.), ch(256.), 3, 2, Some(1))?;
    let p3 = c2f(b, vb.pp("b2.2"), &x, ch(256.), ch(256.), repeats(6., d), true)?;
    let x = conv_block(b, vb.pp("b3.0"), &p3, ch(256.), ch(512.), 3, 2, Some(1))?;
    let p4 = c2f(b, vb.pp("b3.1"), &x, ch(512.), ch(512.), repeats(6., d), true)?;
    let x = conv_block(b, vb.pp("b4.0"), &p4, ch(512.), ch(512. * r), 3, 2, Some(1))?;
    let x = c2f(b, vb.pp("b4.1"), &x, ch(512. * r), ch(512. * r), repeats(3., d), true)?;
    let p5 = sppf(b, vb.pp("b5.0"), &x, ch(512. * r), ch(512. * r), 5)?;
    Ok((p3, p4, p5))
}

fn neck(
    b: &mut GraphBuilder,
    vb: VarBuilder,
    (p3, p4, p5): (&str, &str, &str),
    m: Multiples,
) -> Result<(String, String, String)> {
    let (w, r, d) = (m.width, m.ratio, m.depth);
    let ch = |c: f64| (c * w) as usize;
    let n = repeats(3., d);
    let scope = vb.prefix();

    let up = b.upsample(&scope, p5, 2.0);
    let cat = b.concat(&scope, &[up.as_str(), p4], 1);
    let x = c2f(b, vb.pp("n1"), &cat, ch(512. * (1. + r)), ch(512.), n, false)?;

    let up = b.upsample(&scope, &x, 2.0);
    let cat = b.concat(&scope, &[up.as_str(), p3], 1);
    let head_1 = c2f(b, vb.pp("n2"), &cat, ch(768.), ch(256.), n, false)?;

    let y = conv_block(b, vb.pp("n3"), &head_1, ch(256.), ch(256.), 3, 2, Some(1))?;
    let cat = b.concat(&scope, &[y.as_str(), x.as_str()], 1);
    let head_2 = c2f(b, vb.pp("n4"), &cat, ch(768.), ch(512.), n, false)?;

    let y = conv_block(b, vb.pp("n5"), &head_2, ch(512.), ch(512.), 3, 2, Some(1))?;
    let cat = b.concat(&scope, &[y.as_str(), p5], 1);
    let head_3 = c2f(b, vb.pp("n6"), &cat, ch(512. * (1. + r)), ch(512. * r), n, false)?;

    Ok((head_1, head_2, head_3))
}

/// Detect head with DFL box decoding; output is `[1, 4 + nc, anchors]`
/// holding `cx, cy, w, h` in input pixels followed by class scores.
fn detect(
    b: &mut GraphBuilder,
    vb: VarBuilder,
    levels: [&str; 3],
    filters: (usize, usize, usize),
    nc: usize,
    imgsz: usize,
) -> Result<String> {
    let scope = vb.prefix();
    let c1 = usize::max(filters.0, nc);
    let c2 = usize::max(filters.0 / 4, DFL_BINS * 4);
    let no = (nc + DFL_BINS * 4) as i64;
    let anchors = num_anchors(imgsz) as i64;

    let mut outs = Vec::with_capacity(3);
    for (i, (x, f)) in levels
        .iter()
        .zip([filters.0, filters.1, filters.2])
        .enumerate()
    {
        let vb_box = vb.pp(format!("cv2.{i}"));
        let y = conv_block(b, vb_box.pp("0"), x, f, c2, 3, 1, None)?;
        let y = conv_block(b, vb_box.pp("1"), &y, c2, c2, 3, 1, None)?;
        let boxes = conv_1x1(b, vb_box.pp("2"), &y, c2, 4 * DFL_BINS)?;

        let vb_cls = vb.pp(format!("cv3.{i}"));
        let y = conv_block(b, vb_cls.pp("0"), x, f, c1, 3, 1, None)?;
        let y = conv_block(b, vb_cls.pp("1"), &y, c1, c1, 3, 1, None)?;
        let classes = conv_1x1(b, vb_cls.pp("2"), &y, c1, nc)?;

        let side = (imgsz / STRIDES[i]) as i64;
        let cat = b.concat(&scope, &[boxes.as_str(), classes.as_str()], 1);
        outs.push(b.reshape(&scope, &cat, &[1, no, side * side]));
    }
    let refs: Vec<&str> = outs.iter().map(String::as_str).collect();
    let x_cat = b.concat(&scope, &refs, 2);

    let parts = b.split(&scope, &x_cat, 1, &[4 * DFL_BINS as i64, nc as i64]);
    let (boxes, classes) = (&parts[0], &parts[1]);

    // DFL: expectation over 16 distance bins per box side.
    let dfl_scope = format!("{scope}.dfl");
    let bins = b.reshape(&dfl_scope, boxes, &[1, 4, DFL_BINS as i64, anchors]);
    let bins = b.transpose(&dfl_scope, &bins, &[0, 1, 3, 2]);
    let probs = b.softmax_last(&dfl_scope, &bins);
    let dfl_weight = vb
        .pp("dfl.conv")
        .get((1, DFL_BINS, 1, 1), "weight")?
        .reshape((DFL_BINS, 1))?;
    let dfl_weight = b.tensor(&format!("{dfl_scope}.conv.weight"), &dfl_weight)?;
    let dist = b.matmul(&dfl_scope, &probs, &dfl_weight);
    let dist = b.reshape(&dfl_scope, &dist, &[1, 4, anchors]);

    // dist2bbox
    let (anchor_points, stride_values) = make_anchors(imgsz);
    let anchor_points = b.const_f32(&scope, &[1, 2, anchors], &anchor_points);
    let sides = b.split(&scope, &dist, 1, &[2, 2]);
    let x1y1 = b.sub(&scope, &anchor_points, &sides[0]);
    let x2y2 = b.add(&scope, &anchor_points, &sides[1]);
    let sum = b.add(&scope, &x1y1, &x2y2);
    let half = b.const_f32(&scope, &[1], &[0.5]);
    let c_xy = b.mul(&scope, &sum, &half);
    let wh = b.sub(&scope, &x2y2, &x1y1);
    let dbox = b.concat(&scope, &[c_xy.as_str(), wh.as_str()], 1);
    let strides = b.const_f32(&scope, &[1, 1, anchors], &stride_values);
    let dbox = b.mul(&scope, &dbox, &strides);

    let scores = b.sigmoid(&scope, classes);
    Ok(b.concat(&scope, &[dbox.as_str(), scores.as_str()], 1))
}

/// Builds the full detector graph for a `imgsz x imgsz` input at the given opset.
pub fn build_graph(
    model: &CatalogEntry,
    vb: VarBuilder,
    imgsz: usize,
    opset: i64,
) -> Result<GraphProto> {
    let m = model.variant.multiples();
    let nc = model.num_classes;
    let mut b = GraphBuilder::new(opset);

    tracing::debug!(model = model.id, imgsz, opset, "Lowering detector graph");

    let x = b.input(INPUT_NAME, &[1, 3, imgsz as i64, imgsz as i64]);
    let (p3, p4, p5) = darknet(&mut b, vb.pp("net"), &x, m)?;
    let (h1, h2, h3) = neck(&mut b, vb.pp("fpn"), (p3.as_str(), p4.as_str(), p5.as_str()), m)?;
    let y = detect(&mut b, vb.pp("head"), [h1.as_str(), h2.as_str(), h3.as_str()], m.filters(), nc, imgsz)?;

    let shape = [1, (4 + nc) as i64, num_anchors(imgsz) as i64];
    b.output(&y, OUTPUT_NAME, &shape);

    tracing::debug!("Graph has {} nodes", b.node_count());
    Ok(b.finish(model.id))
}
