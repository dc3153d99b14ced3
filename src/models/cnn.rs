//! Convolutional classifier for histopathology images.
//!
//! A candle-based network: four conv/batch-norm/pool blocks followed by a
//! global average pool and a dropout-regularized linear head over the fifteen
//! classes. Global pooling keeps the head independent of the configured
//! input size.

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{
    BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Dropout, Linear, Module, ModuleT,
    VarBuilder, VarMap, batch_norm, conv2d, linear,
};
use serde::{Deserialize, Serialize};

use crate::core::{Backbone, Classifier, PsResult, Tensor2D, Tensor4D};
use crate::domain::NUM_CLASSES;

/// Architecture configuration, persisted with every checkpoint so a model
/// can be rebuilt before its weights are loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnnConfig {
    /// Backbone variant.
    pub backbone: Backbone,
    /// Number of output classes.
    pub num_classes: usize,
    /// Dropout probability in the classification head.
    pub dropout_rate: f32,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            backbone: Backbone::Compact,
            num_classes: NUM_CLASSES,
            dropout_rate: 0.3,
        }
    }
}

#[derive(Debug)]
struct ConvBlock {
    conv: Conv2d,
    bn: BatchNorm,
}

impl ConvBlock {
    fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            conv: conv2d(in_channels, out_channels, 3, conv_cfg, vb.pp("conv"))?,
            bn: batch_norm(out_channels, BatchNormConfig::default(), vb.pp("bn"))?,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = self.bn.forward_t(&xs, train)?;
        xs.relu()?.max_pool2d(2)
    }
}

/// The trainable pathology classifier.
#[derive(Debug)]
pub struct PathologyCnn {
    blocks: Vec<ConvBlock>,
    fc1: Linear,
    fc2: Linear,
    head: Linear,
    dropout: Dropout,
    backbone: Backbone,
    num_classes: usize,
    device: Device,
    num_parameters: usize,
}

impl PathologyCnn {
    /// Builds the network, registering its variables in `varmap`.
    ///
    /// A fresh varmap yields a randomly initialized model; a varmap that is
    /// subsequently loaded from a checkpoint yields the persisted weights.
    pub fn new(config: &CnnConfig, varmap: &VarMap, device: &Device) -> PsResult<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let widths = config.backbone.block_widths();

        let mut blocks = Vec::with_capacity(widths.len());
        let mut in_channels = 3;
        for (i, &out_channels) in widths.iter().enumerate() {
            blocks.push(ConvBlock::new(
                in_channels,
                out_channels,
                vb.pp(format!("block{i}")),
            )?);
            in_channels = out_channels;
        }

        let fc1 = linear(widths[widths.len() - 1], 256, vb.pp("fc1"))?;
        let fc2 = linear(256, 128, vb.pp("fc2"))?;
        let head = linear(128, config.num_classes, vb.pp("head"))?;

        let num_parameters = varmap.all_vars().iter().map(|v| v.elem_count()).sum();

        Ok(Self {
            blocks,
            fc1,
            fc2,
            head,
            dropout: Dropout::new(config.dropout_rate),
            backbone: config.backbone,
            num_classes: config.num_classes,
            device: device.clone(),
            num_parameters,
        })
    }

    /// Forward pass over a (batch, 3, h, w) tensor, returning
    /// (batch, num_classes) logits. `train` switches batch-norm and dropout
    /// behavior; inference with `train = false` is deterministic.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> PsResult<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward_t(&xs, train)?;
        }
        // global average pool to (batch, channels)
        let xs = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        let xs = self.dropout.forward(&xs, train)?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        let xs = self.fc2.forward(&xs)?.relu()?;
        Ok(self.head.forward(&xs)?)
    }

    /// The device the model lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Converts an ndarray batch tensor into a candle tensor on the given device.
pub fn tensor4_to_candle(batch: &Tensor4D, device: &Device) -> PsResult<Tensor> {
    let (n, c, h, w) = batch.dim();
    // Array4 built via from_shape_vec is in standard layout
    let data: Vec<f32> = batch.iter().copied().collect();
    Ok(Tensor::from_vec(data, (n, c, h, w), device)?)
}

impl Classifier for PathologyCnn {
    fn forward_logits(&self, batch: &Tensor4D) -> PsResult<Tensor2D> {
        let xs = tensor4_to_candle(batch, &self.device)?;
        let logits = self.forward_t(&xs, false)?.detach();
        let rows = logits.to_vec2::<f32>()?;
        let n = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Ok(Tensor2D::from_shape_vec((n, self.num_classes), flat)?)
    }

    fn num_parameters(&self) -> usize {
        self.num_parameters
    }

    fn architecture(&self) -> &str {
        self.backbone.name()
    }
}
