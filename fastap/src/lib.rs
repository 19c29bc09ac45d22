pub mod candle_fastap_loss;
pub mod candle_loss_traits;
pub mod cli;

pub use candle_core;
pub use candle_fastap_loss::{pulse, FastAPConfig, FastAPLoss, SoftHistograms};
pub use candle_loss_traits::{zero_loss, MetricLossT};
pub use metric_util::pair_indices::IndicesTuple;
