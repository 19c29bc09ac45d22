pub mod loss;

use clap::{Parser, Subcommand};

pub use loss::{ComputeDevice, LossArgs};

#[derive(Parser)]
#[command(name = "fastap")]
#[command(about = "Evaluate the FastAP ranking loss on labelled embeddings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// verbosity
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Compute the FastAP loss (and its gradient) of an embedding matrix",
        long_about = "Compute the FastAP loss of an embedding matrix.\n\
		      Each row of the embedding file is one sample and\n\
		      each line of the label file names its class.\n\
		      Optionally write d(loss)/d(embedding) to a file.\n"
    )]
    Loss(LossArgs),
}
