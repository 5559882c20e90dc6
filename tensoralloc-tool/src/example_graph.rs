use clap::ValueEnum;
use tensoralloc::debug_utils::GenericGraph;
use tensoralloc::graph::{ElemType, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Network {
    /// Small convolutional network for 28x28 grayscale images.
    Lenet,
    /// Two 3x3 convolutions with a residual connection.
    ResnetBlock,
    /// Single-head self-attention followed by a feed-forward layer.
    Transformer,
    /// Stack of fully connected layers.
    Mlp,
}

impl Network {
    pub fn gen_graph(self, batch: u64) -> GenericGraph {
        let mut b = Builder {
            graph: GenericGraph::new(),
        };
        match self {
            Network::Lenet => lenet(&mut b, batch),
            Network::ResnetBlock => resnet_block(&mut b, batch),
            Network::Transformer => transformer(&mut b, batch),
            Network::Mlp => mlp(&mut b, batch),
        }
        b.graph
    }
}

struct Builder {
    graph: GenericGraph,
}

impl Builder {
    /// Graph input that has to be loaded into local memory.
    fn input(&mut self, name: &str, shape: &[u64]) -> Value {
        self.graph.add_value(name, ElemType::F32, shape)
    }

    /// Quantized weights streamed from global memory.
    fn weight(&mut self, name: &str, shape: &[u64]) -> Value {
        let value = self.graph.add_value(name, ElemType::I8, shape);
        self.graph.set_resident(value);
        value
    }

    fn op(&mut self, kind: &str, name: &str, inputs: &[Value], shape: &[u64]) -> Value {
        let out = self.graph.add_value(name, ElemType::F32, shape);
        self.graph.add_node(kind, inputs, &[out]);
        out
    }

    fn output(&mut self, value: Value) {
        self.graph.set_output(value);
    }
}

fn lenet(b: &mut Builder, n: u64) {
    let x = b.input("image", &[n, 1, 28, 28]);
    let w1 = b.weight("conv1.weight", &[6, 1, 5, 5]);
    let c1 = b.op("conv", "conv1", &[x, w1], &[n, 6, 24, 24]);
    let r1 = b.op("relu", "relu1", &[c1], &[n, 6, 24, 24]);
    let p1 = b.op("maxpool", "pool1", &[r1], &[n, 6, 12, 12]);
    let w2 = b.weight("conv2.weight", &[16, 6, 5, 5]);
    let c2 = b.op("conv", "conv2", &[p1, w2], &[n, 16, 8, 8]);
    let r2 = b.op("relu", "relu2", &[c2], &[n, 16, 8, 8]);
    let p2 = b.op("maxpool", "pool2", &[r2], &[n, 16, 4, 4]);
    let f = b.op("flatten", "flatten", &[p2], &[n, 256]);
    let w3 = b.weight("fc1.weight", &[256, 120]);
    let f1 = b.op("gemm", "fc1", &[f, w3], &[n, 120]);
    let r3 = b.op("relu", "relu3", &[f1], &[n, 120]);
    let w4 = b.weight("fc2.weight", &[120, 84]);
    let f2 = b.op("gemm", "fc2", &[r3, w4], &[n, 84]);
    let r4 = b.op("relu", "relu4", &[f2], &[n, 84]);
    let w5 = b.weight("fc3.weight", &[84, 10]);
    let logits = b.op("gemm", "fc3", &[r4, w5], &[n, 10]);
    b.output(logits);
}

fn resnet_block(b: &mut Builder, n: u64) {
    let shape = [n, 64, 56, 56];
    let x = b.input("input", &shape);
    let w1 = b.weight("conv1.weight", &[64, 64, 3, 3]);
    let c1 = b.op("conv", "conv1", &[x, w1], &shape);
    let s1 = b.weight("bn1.scale", &[64]);
    let n1 = b.op("batchnorm", "bn1", &[c1, s1], &shape);
    let r1 = b.op("relu", "relu1", &[n1], &shape);
    let w2 = b.weight("conv2.weight", &[64, 64, 3, 3]);
    let c2 = b.op("conv", "conv2", &[r1, w2], &shape);
    let s2 = b.weight("bn2.scale", &[64]);
    let n2 = b.op("batchnorm", "bn2", &[c2, s2], &shape);
    let sum = b.op("add", "residual", &[n2, x], &shape);
    let out = b.op("relu", "relu2", &[sum], &shape);
    b.output(out);
}

fn transformer(b: &mut Builder, n: u64) {
    const SEQ: u64 = 128;
    const DIM: u64 = 256;
    const HIDDEN: u64 = 1024;
    let x = b.input("tokens", &[n, SEQ, DIM]);
    let wq = b.weight("attn.q.weight", &[DIM, DIM]);
    let wk = b.weight("attn.k.weight", &[DIM, DIM]);
    let wv = b.weight("attn.v.weight", &[DIM, DIM]);
    let q = b.op("matmul", "q", &[x, wq], &[n, SEQ, DIM]);
    let k = b.op("matmul", "k", &[x, wk], &[n, SEQ, DIM]);
    let v = b.op("matmul", "v", &[x, wv], &[n, SEQ, DIM]);
    let kt = b.op("transpose", "k_t", &[k], &[n, DIM, SEQ]);
    let scores = b.op("matmul", "scores", &[q, kt], &[n, SEQ, SEQ]);
    let probs = b.op("softmax", "probs", &[scores], &[n, SEQ, SEQ]);
    let ctx = b.op("matmul", "context", &[probs, v], &[n, SEQ, DIM]);
    let wo = b.weight("attn.out.weight", &[DIM, DIM]);
    let proj = b.op("matmul", "attn_out", &[ctx, wo], &[n, SEQ, DIM]);
    let res1 = b.op("add", "residual1", &[proj, x], &[n, SEQ, DIM]);
    let ln = b.op("layernorm", "ln", &[res1], &[n, SEQ, DIM]);
    let w1 = b.weight("ffn.up.weight", &[DIM, HIDDEN]);
    let up = b.op("matmul", "ffn_up", &[ln, w1], &[n, SEQ, HIDDEN]);
    let act = b.op("gelu", "ffn_act", &[up], &[n, SEQ, HIDDEN]);
    let w2 = b.weight("ffn.down.weight", &[HIDDEN, DIM]);
    let down = b.op("matmul", "ffn_down", &[act, w2], &[n, SEQ, DIM]);
    let out = b.op("add", "residual2", &[down, res1], &[n, SEQ, DIM]);
    b.output(out);
}

fn mlp(b: &mut Builder, n: u64) {
    const WIDTHS: [u64; 6] = [784, 1024, 1024, 512, 256, 10];
    let mut x = b.input("input", &[n, WIDTHS[0]]);
    for (i, pair) in WIDTHS.windows(2).enumerate() {
        let w = b.weight(&format!("fc{i}.weight"), &[pair[0], pair[1]]);
        x = b.op("gemm", &format!("fc{i}"), &[x, w], &[n, pair[1]]);
        if i + 2 < WIDTHS.len() {
            x = b.op("relu", &format!("relu{i}"), &[x], &[n, pair[1]]);
        }
    }
    b.output(x);
}
