use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use clap::{Args, ValueEnum};
use log::info;
use metric_util::common_io::{mkdir, read_lines, read_lines_of_types};
use metric_util::pair_indices::IndicesTuple;
use metric_util::traits::IoOps;

use crate::candle_fastap_loss::{FastAPConfig, FastAPLoss};
use crate::candle_loss_traits::MetricLossT;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn to_device(&self, device_no: usize) -> Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

#[derive(Args, Debug)]
pub struct LossArgs {
    /// Embedding matrix file (sample x dimension), tab-delimited, may be gzipped
    #[arg(required = true)]
    embedding_file: Box<str>,

    /// Label file, one label per line, in the same order as the rows
    #[arg(long, short, required = true)]
    labels: Box<str>,

    /// Number of histogram bins
    #[arg(long, short = 'b', default_value_t = 10)]
    num_bins: usize,

    /// Keep the embeddings as they are; the histogram range then
    /// follows the largest distance in the file
    #[arg(long, default_value_t = false)]
    no_normalize: bool,

    /// Miner triplets, one `anchor positive negative` line each
    #[arg(long, short)]
    triplets: Option<Box<str>>,

    /// Write the gradient d(loss)/d(embedding) to this file
    #[arg(long, short)]
    grad_out: Option<Box<str>>,

    /// Skip a header line in the embedding file
    #[arg(long, default_value_t = false)]
    header: bool,

    /// Compute in double precision
    #[arg(long = "f64", default_value_t = false)]
    double: bool,

    /// Compute device
    #[arg(long, value_enum, default_value = "cpu")]
    device: ComputeDevice,
}

fn load_labels(file: &str) -> Result<Vec<Box<str>>> {
    let mut lines = read_lines(file)?;
    while lines.last().is_some_and(|s| s.trim().is_empty()) {
        lines.pop();
    }

    let labels = lines
        .iter()
        .enumerate()
        .map(|(i, s)| match s.trim() {
            "" => anyhow::bail!("line {} of {}: empty label", i + 1, file),
            s => Ok(s.into()),
        })
        .collect::<Result<Vec<Box<str>>>>()?;
    info!("Loaded {} labels from {}", labels.len(), file);
    Ok(labels)
}

fn load_triplets(file: &str) -> Result<IndicesTuple> {
    let lines = read_lines_of_types::<usize>(file, &[' ', '\t'], -1)?;

    let mut a = Vec::with_capacity(lines.len());
    let mut p = Vec::with_capacity(lines.len());
    let mut n = Vec::with_capacity(lines.len());

    for (i, words) in lines.iter().enumerate() {
        match words.as_slice() {
            &[a_i, p_i, n_i] => {
                a.push(a_i);
                p.push(p_i);
                n.push(n_i);
            }
            _ => anyhow::bail!("line {} of {}: expected 3 indices", i + 1, file),
        }
    }

    info!("Loaded {} triplets from {}", a.len(), file);
    Ok(IndicesTuple::Triplets { a, p, n })
}

pub fn run(args: &LossArgs) -> Result<()> {
    let loss_value = evaluate(args)?;
    info!("FastAP loss: {}", loss_value);
    println!("{}", loss_value);
    Ok(())
}

/// Load the inputs named by `args`, evaluate the loss and write the
/// gradient if asked to
pub fn evaluate(args: &LossArgs) -> Result<f64> {
    let device = args.device.to_device(0)?;
    info!("Using device: {:?}", device);

    let dtype = if args.double { DType::F64 } else { DType::F32 };
    let skip = if args.header { Some(0) } else { None };

    let x_nd = Tensor::from_tsv(&args.embedding_file, skip)?
        .to_dtype(dtype)?
        .to_device(&device)?;
    info!("Embeddings: {:?}", x_nd.dims());

    let labels = load_labels(&args.labels)?;
    if labels.len() != x_nd.dim(0)? {
        anyhow::bail!(
            "{} labels for {} embedding rows",
            labels.len(),
            x_nd.dim(0)?
        );
    }

    let triplets = match args.triplets.as_deref() {
        Some(file) => Some(load_triplets(file)?),
        None => None,
    };

    let loss_fn = FastAPLoss::new(
        FastAPConfig::new(args.num_bins).with_normalize(!args.no_normalize),
    )?;

    let x_var = Var::from_tensor(&x_nd)?;
    let loss = loss_fn.forward(x_var.as_tensor(), &labels, triplets.as_ref())?;

    let loss_value = loss
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .to_scalar::<f64>()?;

    if let Some(grad_file) = args.grad_out.as_deref() {
        let grads = loss.backward()?;
        let grad_nd = match grads.get(x_var.as_tensor()) {
            Some(g) => g.clone(),
            None => x_nd.zeros_like()?,
        };
        mkdir(grad_file)?;
        grad_nd.to_tsv(grad_file)?;
        info!("Saved gradient to {}", grad_file);
    }

    Ok(loss_value)
}
