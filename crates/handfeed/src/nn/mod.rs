//! Neural network inference on the CPU ([`tract_onnx`]) or GPU ([`wonnx`]).

pub mod asset;

use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::{bail, Context};
use image::RgbImage;
use nalgebra::Point2;
use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TypedFact, TypedOp,
};
use wonnx::utils::{InputTensor, OutputTensor};

pub use asset::ModelAsset;

use crate::{rect::RotatedRect, resolution::Resolution};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Hardware backend that runs inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    /// Run on the CPU using `tract`.
    Cpu,
    /// Run on the GPU using `wonnx`.
    ///
    /// `wonnx` does not support every ONNX operator; loading fails if the network uses one it
    /// lacks.
    Gpu,
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Delegate::Cpu => "CPU",
            Delegate::Gpu => "GPU",
        })
    }
}

/// A dense `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor of the given shape, computing each element from its index.
    ///
    /// Elements are produced in row-major order.
    pub fn from_shape_fn<const N: usize>(
        shape: [usize; N],
        mut f: impl FnMut([usize; N]) -> f32,
    ) -> Self {
        let len = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut index = [0; N];
        for _ in 0..len {
            data.push(f(index));
            for dim in (0..N).rev() {
                index[dim] += 1;
                if index[dim] < shape[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Creates a tensor from its shape and row-major data.
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> anyhow::Result<Self> {
        let len: usize = shape.iter().product();
        if len != data.len() {
            bail!(
                "tensor of shape {:?} needs {} elements, got {}",
                shape,
                len,
                data.len()
            );
        }
        Ok(Self { shape, data })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Samples the region `view` of `image` into an NCHW tensor of `res`, mapping colors to `[0, 1]`.
///
/// The region may be rotated and may extend past the image borders; pixels outside the image are
/// black. If the aspect ratios of `view` and `res` differ, the region is stretched.
pub fn image_to_tensor(image: &RgbImage, view: &RotatedRect, res: Resolution) -> Tensor {
    let (w, h) = (res.width() as usize, res.height() as usize);
    let (iw, ih) = (image.width() as f32, image.height() as f32);
    let sx = view.rect().width() / w as f32;
    let sy = view.rect().height() / h as f32;

    // Source pixel for every output pixel, shared by all 3 channels.
    let sources = (0..h * w)
        .map(|i| {
            let (x, y) = (i % w, i / w);
            let pt = Point2::new((x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy);
            let p = view.transform_out(pt);
            (p.x >= 0.0 && p.y >= 0.0 && p.x < iw && p.y < ih).then(|| (p.x as u32, p.y as u32))
        })
        .collect::<Vec<_>>();

    Tensor::from_shape_fn([1, 3, h, w], |[_, c, y, x]| match sources[y * w + x] {
        Some((px, py)) => f32::from(image.get_pixel(px, py).0[c]) / 255.0,
        None => 0.0,
    })
}

/// Name and shape of a network input or output.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    name: String,
    shape: Vec<usize>,
}

impl NodeInfo {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

/// A loaded neural network.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<NeuralNetworkImpl>);

impl fmt::Debug for NeuralNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeuralNetwork").finish_non_exhaustive()
    }
}

struct NeuralNetworkImpl {
    cpu: Model,
    gpu: Option<wonnx::Session>,
    inputs: Vec<NodeInfo>,
    outputs: Vec<NodeInfo>,
}

impl NeuralNetwork {
    /// Loads and optimizes an ONNX network for the given delegate.
    ///
    /// The network is always loaded into `tract` as well, which provides its input and output
    /// metadata. Returns an error if the data is malformed, the network has symbolic input or
    /// output shapes, or the delegate cannot run it.
    pub fn load(model_data: &[u8], delegate: Delegate) -> anyhow::Result<Self> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*model_data)?
            .into_optimized()?;

        let describe = |outlets: &[tract_onnx::prelude::OutletId]| {
            outlets
                .iter()
                .map(|outlet| -> anyhow::Result<NodeInfo> {
                    let fact = graph.outlet_fact(*outlet)?;
                    let Some(shape) = fact.shape.as_concrete() else {
                        bail!("network has symbolic shape {:?}", fact.shape);
                    };
                    Ok(NodeInfo {
                        name: graph.node(outlet.node).name.clone(),
                        shape: shape.to_vec(),
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()
        };
        let inputs = describe(graph.input_outlets()?)?;
        let outputs = describe(graph.output_outlets()?)?;

        let cpu = SimplePlan::new(graph)?;

        let gpu = match delegate {
            Delegate::Cpu => None,
            Delegate::Gpu => Some(
                pollster::block_on(wonnx::Session::from_bytes(model_data))
                    .context("failed to load network on the GPU")?,
            ),
        };

        log::debug!(
            "loaded network on {delegate}: inputs {:?}, outputs {:?}",
            inputs,
            outputs
        );

        Ok(Self(Arc::new(NeuralNetworkImpl {
            cpu,
            gpu,
            inputs,
            outputs,
        })))
    }

    pub fn inputs(&self) -> &[NodeInfo] {
        &self.0.inputs
    }

    pub fn outputs(&self) -> &[NodeInfo] {
        &self.0.outputs
    }

    /// Returns the delegate that [`NeuralNetwork::estimate`] runs on.
    pub fn delegate(&self) -> Delegate {
        if self.0.gpu.is_some() {
            Delegate::Gpu
        } else {
            Delegate::Cpu
        }
    }

    /// Runs the network on a single input tensor, returning one tensor per network output.
    #[doc(alias = "infer")]
    pub fn estimate(&self, input: &Tensor) -> anyhow::Result<Vec<Tensor>> {
        let [info] = &self.0.inputs[..] else {
            bail!(
                "`estimate` needs a network with exactly 1 input, this one has {}",
                self.0.inputs.len()
            );
        };
        if info.shape() != input.shape() {
            bail!(
                "input tensor shape {:?} does not match network input {:?}",
                input.shape(),
                info.shape()
            );
        }

        match &self.0.gpu {
            Some(gpu) => {
                let mut inputs = HashMap::new();
                inputs.insert(
                    info.name().to_string(),
                    InputTensor::F32(input.as_slice().into()),
                );
                let mut output_map = pollster::block_on(gpu.run(&inputs))?;
                self.0
                    .outputs
                    .iter()
                    .map(|info| match output_map.remove(info.name()) {
                        Some(OutputTensor::F32(data)) => {
                            Tensor::from_vec(info.shape().to_vec(), data)
                        }
                        Some(_) => bail!("network output '{}' is not f32", info.name()),
                        None => bail!("GPU session did not produce output '{}'", info.name()),
                    })
                    .collect()
            }
            None => {
                let tensor =
                    tract_onnx::prelude::Tensor::from_shape(input.shape(), input.as_slice())?;
                let outputs = self.0.cpu.run(tvec![TValue::from_const(Arc::new(tensor))])?;
                outputs
                    .iter()
                    .map(|out| {
                        Tensor::from_vec(out.shape().to_vec(), out.as_slice::<f32>()?.to_vec())
                    })
                    .collect()
            }
        }
    }
}
