//! The CNN + transformer digit classifier.
//!
//! ```text
//! [1, 28, 28] -conv1+relu-> [32, 28, 28] -conv2+relu-> [64, 28, 28] -maxpool-> [64, 14, 14]
//!   -> 64 tokens x 196 -linear_in-> [64, 128] -encoder x2-> [64, 128] -> 8192 -fc-> 10 scores
//! ```
//!
//! Module paths follow the PyTorch `state_dict` of the exported model, so
//! weights load by name (see [`crate::core::weights`]).

pub mod encoder;

use crate::core::preprocess::{InputTensor, IMAGE_SIZE};
use crate::domain::model::{Digit, NUM_CLASSES};
use crate::domain::ports::Classifier;
use crate::utils::error::{Result, ServeError};
use burn::backend::NdArray;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use encoder::Encoder;
use std::sync::Mutex;

/// CPU backend the server runs inference on.
pub type InferenceBackend = NdArray<f32>;

const CONV1_CHANNELS: usize = 32;
const CONV2_CHANNELS: usize = 64;
const KERNEL_SIZE: usize = 3;
const PADDING: usize = 1;
const POOLED_SIZE: usize = IMAGE_SIZE / 2;
const D_MODEL: usize = 128;
const NUM_HEADS: usize = 8;
const FF_DIM: usize = 2048;
const NUM_LAYERS: usize = 2;
const LAYER_NORM_EPS: f64 = 1e-5;

#[derive(Module, Debug)]
pub struct DigitNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    linear_in: Linear<B>,
    transformer: Encoder<B>,
    fc: Linear<B>,
}

impl<B: Backend> DigitNet<B> {
    /// A randomly initialised network; load weights into it before use.
    pub fn new(device: &B::Device) -> Self {
        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [KERNEL_SIZE, KERNEL_SIZE])
                .with_padding(PaddingConfig2d::Explicit(PADDING, PADDING))
                .init::<B>(device)
        };

        Self {
            conv1: conv([1, CONV1_CHANNELS]),
            conv2: conv([CONV1_CHANNELS, CONV2_CHANNELS]),
            pool: MaxPool2dConfig::new([2, 2]).init(),
            linear_in: LinearConfig::new(POOLED_SIZE * POOLED_SIZE, D_MODEL).init(device),
            transformer: Encoder::new(NUM_LAYERS, D_MODEL, NUM_HEADS, FF_DIM, LAYER_NORM_EPS, device),
            fc: LinearConfig::new(CONV2_CHANNELS * D_MODEL, NUM_CLASSES).init(device),
        }
    }

    /// # Shapes
    ///
    /// - images: `[batch_size, 1, 28, 28]`
    /// - output: `[batch_size, 10]` raw class scores (logits)
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = relu(self.conv1.forward(images));
        let x = relu(self.conv2.forward(x));
        let x = self.pool.forward(x);

        // 每個 channel 當作一個 token
        let tokens = x.reshape([batch_size, CONV2_CHANNELS, POOLED_SIZE * POOLED_SIZE]);
        let x = self.linear_in.forward(tokens);
        let x = self.transformer.forward(x);

        self.fc
            .forward(x.reshape([batch_size, CONV2_CHANNELS * D_MODEL]))
    }

    /// Raw class scores for one preprocessed image.
    pub fn scores(&self, input: &InputTensor, device: &B::Device) -> Result<Vec<f32>> {
        if input.dim() != (IMAGE_SIZE, IMAGE_SIZE) {
            return Err(ServeError::Inference {
                message: format!(
                    "input has shape {:?}, expected [{IMAGE_SIZE}, {IMAGE_SIZE}]",
                    input.shape()
                ),
            });
        }

        let pixels: Vec<f32> = input.iter().copied().collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [1, 1, IMAGE_SIZE, IMAGE_SIZE]),
            device,
        );

        self.forward(images)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ServeError::Inference {
                message: format!("cannot read scores: {:?}", e),
            })
    }
}

/// A loaded network shared across requests.
///
/// burn modules are `Send` but not `Sync`; each call takes a cheap clone of
/// the module (parameters are reference counted) and runs on that.
#[derive(Debug)]
pub struct DigitModel<B: Backend> {
    net: Mutex<DigitNet<B>>,
    device: B::Device,
}

impl<B: Backend> DigitModel<B> {
    pub fn new(net: DigitNet<B>, device: B::Device) -> Self {
        Self {
            net: Mutex::new(net),
            device,
        }
    }

    pub fn scores(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let net = self
            .net
            .lock()
            .map_err(|_| ServeError::Inference {
                message: "model lock poisoned".to_string(),
            })?
            .clone();
        net.scores(input, &self.device)
    }
}

impl<B: Backend> Classifier for DigitModel<B> {
    fn classify(&self, input: &InputTensor) -> Result<Digit> {
        argmax(&self.scores(input)?)
    }
}

/// Index of the highest score; the first one wins on ties.
pub fn argmax(scores: &[f32]) -> Result<Digit> {
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(ServeError::Inference {
            message: format!("model produced a non-finite score ({})", bad),
        });
    }

    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i as Digit)
        .ok_or_else(|| ServeError::Inference {
            message: "model produced no scores".to_string(),
        })
}

/// Every tensor of the PyTorch `state_dict` the network reads, with its shape.
pub fn state_dict_shapes() -> Vec<(String, Vec<usize>)> {
    let mut shapes = vec![
        ("conv1.weight".to_string(), vec![CONV1_CHANNELS, 1, KERNEL_SIZE, KERNEL_SIZE]),
        ("conv1.bias".to_string(), vec![CONV1_CHANNELS]),
        (
            "conv2.weight".to_string(),
            vec![CONV2_CHANNELS, CONV1_CHANNELS, KERNEL_SIZE, KERNEL_SIZE],
        ),
        ("conv2.bias".to_string(), vec![CONV2_CHANNELS]),
        ("linear_in.weight".to_string(), vec![D_MODEL, POOLED_SIZE * POOLED_SIZE]),
        ("linear_in.bias".to_string(), vec![D_MODEL]),
    ];
    for i in 0..NUM_LAYERS {
        let prefix = format!("transformer.layers.{i}");
        shapes.extend([
            (format!("{prefix}.self_attn.in_proj_weight"), vec![3 * D_MODEL, D_MODEL]),
            (format!("{prefix}.self_attn.in_proj_bias"), vec![3 * D_MODEL]),
            (format!("{prefix}.self_attn.out_proj.weight"), vec![D_MODEL, D_MODEL]),
            (format!("{prefix}.self_attn.out_proj.bias"), vec![D_MODEL]),
            (format!("{prefix}.linear1.weight"), vec![FF_DIM, D_MODEL]),
            (format!("{prefix}.linear1.bias"), vec![FF_DIM]),
            (format!("{prefix}.linear2.weight"), vec![D_MODEL, FF_DIM]),
            (format!("{prefix}.linear2.bias"), vec![D_MODEL]),
            (format!("{prefix}.norm1.weight"), vec![D_MODEL]),
            (format!("{prefix}.norm1.bias"), vec![D_MODEL]),
            (format!("{prefix}.norm2.weight"), vec![D_MODEL]),
            (format!("{prefix}.norm2.bias"), vec![D_MODEL]),
        ]);
    }
    shapes.push(("fc.weight".to_string(), vec![NUM_CLASSES, CONV2_CHANNELS * D_MODEL]));
    shapes.push(("fc.bias".to_string(), vec![NUM_CLASSES]));
    shapes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    type TestBackend = InferenceBackend;

    fn digit_like_input() -> InputTensor {
        Array2::from_shape_fn((IMAGE_SIZE, IMAGE_SIZE), |(y, x)| {
            if (8..20).contains(&y) && (12..16).contains(&x) {
                1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn test_parameter_count_matches_state_dict() {
        let device = Default::default();
        let net = DigitNet::<TestBackend>::new(&device);

        let total: usize = state_dict_shapes()
            .iter()
            .map(|(_, shape)| shape.iter().product::<usize>())
            .sum();

        // conv 320 + 18_496, linear_in 25_216, 2 x 593_024 encoder, fc 81_930
        assert_eq!(total, 1_312_010);
        assert_eq!(net.num_params(), total);
    }

    #[test]
    fn test_forward_produces_ten_finite_scores_per_image() {
        let device = Default::default();
        let net = DigitNet::<TestBackend>::new(&device);

        let scores = net.forward(Tensor::zeros([2, 1, IMAGE_SIZE, IMAGE_SIZE], &device));

        assert_eq!(scores.dims(), [2, NUM_CLASSES]);
        let values = scores.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let device = Default::default();
        let model = DigitModel::new(DigitNet::<TestBackend>::new(&device), device);
        let input = digit_like_input();

        let first = model.classify(&input).unwrap();
        let second = model.classify(&input).unwrap();

        assert!(first < 10);
        assert_eq!(first, second);
        assert_eq!(model.scores(&input).unwrap().len(), NUM_CLASSES);
    }

    #[test]
    fn test_wrong_input_shape_is_rejected() {
        let device = Default::default();
        let model = DigitModel::new(DigitNet::<TestBackend>::new(&device), device);
        assert!(model.classify(&Array2::zeros((14, 14))).is_err());
    }

    #[test]
    fn test_argmax_first_maximum_wins() {
        assert_eq!(argmax(&[0.1, 0.9, 0.3, 0.9]).unwrap(), 1);
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]).unwrap(), 1);
        assert!(argmax(&[0.1, f32::NAN]).is_err());
        assert!(argmax(&[]).is_err());
    }
}
