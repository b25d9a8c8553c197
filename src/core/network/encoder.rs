//! Post-norm transformer encoder with PyTorch's packed attention projection.
//!
//! `burn::nn::transformer` uses separate query/key/value projections and a
//! GELU feed-forward block, so the layers are assembled here from burn's
//! `Linear` and `LayerNorm` to match `nn.TransformerEncoderLayer` defaults
//! (ReLU, `norm_first = false`).

use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Multi-head self-attention whose query, key and value projections share one
/// `[3 * d_model, d_model]` weight.
#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    in_proj: Linear<B>,
    out_proj: Linear<B>,
    n_heads: usize,
    d_k: usize,
}

impl<B: Backend> SelfAttention<B> {
    pub fn new(d_model: usize, n_heads: usize, device: &B::Device) -> Self {
        Self {
            in_proj: LinearConfig::new(d_model, 3 * d_model).init(device),
            out_proj: LinearConfig::new(d_model, d_model).init(device),
            n_heads,
            d_k: d_model / n_heads,
        }
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, seq_length, d_model]`
    /// - output: `[batch_size, seq_length, d_model]`
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch_size, seq_length, d_model] = input.dims();

        let packed = self.in_proj.forward(input);
        let query = self.split_heads(packed.clone().narrow(2, 0, d_model));
        let key = self.split_heads(packed.clone().narrow(2, d_model, d_model));
        let value = self.split_heads(packed.narrow(2, 2 * d_model, d_model));

        let scores = query
            .matmul(key.transpose())
            .div_scalar((self.d_k as f32).sqrt());
        let weights = softmax(scores, 3);

        let context = weights
            .matmul(value)
            .swap_dims(1, 2)
            .reshape([batch_size, seq_length, d_model]);
        self.out_proj.forward(context)
    }

    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch_size, seq_length, _d_model] = x.dims();
        x.reshape([batch_size, seq_length, self.n_heads, self.d_k])
            .swap_dims(1, 2)
    }
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    self_attn: SelfAttention<B>,
    linear1: Linear<B>,
    linear2: Linear<B>,
    norm1: LayerNorm<B>,
    norm2: LayerNorm<B>,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn new(
        d_model: usize,
        n_heads: usize,
        d_ff: usize,
        epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let norm = || LayerNormConfig::new(d_model).with_epsilon(epsilon).init::<B>(device);
        Self {
            self_attn: SelfAttention::new(d_model, n_heads, device),
            linear1: LinearConfig::new(d_model, d_ff).init(device),
            linear2: LinearConfig::new(d_ff, d_model).init(device),
            norm1: norm(),
            norm2: norm(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self
            .norm1
            .forward(input.clone() + self.self_attn.forward(input));
        let feed_forward = self.linear2.forward(relu(self.linear1.forward(x.clone())));
        self.norm2.forward(x + feed_forward)
    }
}

/// A stack of identical encoder layers, stored under `layers.{i}`.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    layers: Vec<EncoderLayer<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn new(
        n_layers: usize,
        d_model: usize,
        n_heads: usize,
        d_ff: usize,
        epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|_| EncoderLayer::<B>::new(d_model, n_heads, d_ff, epsilon, device))
            .collect();
        Self { layers }
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        self.layers
            .iter()
            .fold(input, |x, layer| layer.forward(x))
    }
}
