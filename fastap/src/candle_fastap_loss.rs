use candle_core::{DType, Device, Result, Tensor};
use log::debug;
use metric_util::pair_indices::{convert_to_weights, get_all_pairs_indices, IndicesTuple};
use metric_util::tensor_util::{dense_indicator, dist_mat, host_to_tensor};

use crate::candle_loss_traits::{zero_loss, MetricLossT};

/// Largest squared distance between two unit vectors
const UNIT_SPHERE_MAX_SQ_DIST: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct FastAPConfig {
    /// Number of histogram bins; `num_bins + 1` edges
    pub num_bins: usize,
    /// L2-normalize embeddings in `forward` and fix the range to [0, 4]
    pub normalize_embeddings: bool,
}

impl Default for FastAPConfig {
    fn default() -> Self {
        Self {
            num_bins: 10,
            normalize_embeddings: true,
        }
    }
}

impl FastAPConfig {
    pub fn new(num_bins: usize) -> Self {
        Self {
            num_bins,
            ..Default::default()
        }
    }

    pub fn with_normalize(mut self, normalize_embeddings: bool) -> Self {
        self.normalize_embeddings = normalize_embeddings;
        self
    }
}

/// FastAP: a listwise ranking loss that approximates average
/// precision of each anchor with soft histograms of its distances to
/// positive and negative partners.
///
/// loss = 1 - mean_i FastAP(i)
///
/// Memory is dominated by the n x n distance and indicator matrices;
/// the histograms take n x (num_bins + 1).
#[derive(Debug, Clone)]
pub struct FastAPLoss {
    num_bins: usize,
    num_edges: usize,
    normalize_embeddings: bool,
}

/// Soft counts of positive and negative partners near each bin edge
///
/// * `pos_hist` - anchor x edge
/// * `neg_hist` - anchor x edge
pub struct SoftHistograms {
    pub pos_hist: Tensor,
    pub neg_hist: Tensor,
}

impl SoftHistograms {
    /// cumulative positives up to each edge
    pub fn total_pos_hist(&self) -> Result<Tensor> {
        self.pos_hist.cumsum(1)
    }

    /// cumulative positives and negatives up to each edge
    pub fn total_hist(&self) -> Result<Tensor> {
        (&self.pos_hist + &self.neg_hist)?.cumsum(1)
    }
}

/// Triangular kernel centred at `mid_point` with half-width `delta`
///
/// pulse(d) = max(0, 1 - |d - mid_point| / delta)
///
pub fn pulse(dist: &Tensor, mid_point: f64, delta: f64) -> Result<Tensor> {
    dist.affine(1., -mid_point)?
        .abs()?
        .affine(-1. / delta, 1.)?
        .relu()
}

impl FastAPLoss {
    pub fn new(config: FastAPConfig) -> Result<Self> {
        if config.num_bins == 0 {
            candle_core::bail!("FastAP needs at least one histogram bin");
        }
        Ok(Self {
            num_bins: config.num_bins,
            num_edges: config.num_bins + 1,
            normalize_embeddings: config.normalize_embeddings,
        })
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// Upper end of the histogram.
    ///
    /// Fixed at 4 for normalized embeddings. Otherwise it follows the
    /// largest distance of the current batch, so bin edges move from
    /// batch to batch. The range is a constant; no gradient flows
    /// through it.
    ///
    /// `None` when the embeddings are not normalized and every pairwise
    /// distance is zero: the bins would have zero width.
    pub fn histogram_range(&self, dist_nn: &Tensor) -> Result<Option<f64>> {
        if self.normalize_embeddings {
            return Ok(Some(UNIT_SPHERE_MAX_SQ_DIST));
        }

        let max_dist = dist_nn
            .flatten_all()?
            .max(0)?
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F64)?
            .to_scalar::<f64>()?;

        Ok((max_dist > 0.).then_some(max_dist))
    }

    /// Bin the distances of each anchor into `num_edges` soft counts
    ///
    /// * `dist_nn` - squared distances (n x n)
    /// * `i_pos_nn` - positive partner indicator (n x n)
    /// * `i_neg_nn` - negative partner indicator (n x n)
    /// * `histogram_max` - position of the last edge
    ///
    pub fn soft_histograms(
        &self,
        dist_nn: &Tensor,
        i_pos_nn: &Tensor,
        i_neg_nn: &Tensor,
        histogram_max: f64,
    ) -> Result<SoftHistograms> {
        let delta = histogram_max / self.num_bins as f64;

        let mut pos_cols = Vec::with_capacity(self.num_edges);
        let mut neg_cols = Vec::with_capacity(self.num_edges);

        // one n x n pulse at a time keeps memory at O(n^2)
        for k in 0..self.num_edges {
            let pulse_nn = pulse(dist_nn, k as f64 * delta, delta)?;
            pos_cols.push(pulse_nn.mul(i_pos_nn)?.sum(1)?);
            neg_cols.push(pulse_nn.mul(i_neg_nn)?.sum(1)?);
        }

        Ok(SoftHistograms {
            pos_hist: Tensor::stack(&pos_cols, 1)?,
            neg_hist: Tensor::stack(&neg_cols, 1)?,
        })
    }
}

impl MetricLossT for FastAPLoss {
    fn normalize_embeddings(&self) -> bool {
        self.normalize_embeddings
    }

    fn compute_loss<L>(
        &self,
        embeddings_nd: &Tensor,
        labels: &[L],
        indices_tuple: Option<&IndicesTuple>,
    ) -> Result<Tensor>
    where
        L: PartialEq,
    {
        let (n, _) = embeddings_nd.dims2()?;
        if labels.len() != n {
            candle_core::bail!("{} labels for {} embeddings", labels.len(), n);
        }

        let miner_weights = convert_to_weights(indices_tuple, n)?;

        if n < 2 {
            return zero_loss(embeddings_nd);
        }

        let dtype = embeddings_nd.dtype();
        let device = embeddings_nd.device();

        let pairs = get_all_pairs_indices(labels);
        let i_pos = dense_indicator(n, n, &pairs.a1, &pairs.p)?;
        let i_neg = dense_indicator(n, n, &pairs.a2, &pairs.n)?;

        let n_pos: Vec<f32> = i_pos.chunks(n).map(|row| row.iter().sum()).collect();

        // anchors without positives have no average precision
        let keep: Vec<u32> = (0..n).filter(|&i| n_pos[i] > 0.).map(|i| i as u32).collect();

        if keep.is_empty() {
            debug!("no anchor has a positive partner among {} samples", n);
            return zero_loss(embeddings_nd);
        }

        let i_pos_nn = host_to_tensor(i_pos, (n, n), dtype, device)?;
        let i_neg_nn = host_to_tensor(i_neg, (n, n), dtype, device)?;

        let dist_nn = dist_mat(embeddings_nd, true)?;
        let histogram_max = match self.histogram_range(&dist_nn)? {
            Some(histogram_max) => histogram_max,
            None => {
                debug!("all {} points coincide; empty histogram range", n);
                return zero_loss(embeddings_nd);
            }
        };
        debug!(
            "histogram over [0, {}] with {} bins",
            histogram_max, self.num_bins
        );

        let hist = self.soft_histograms(&dist_nn, &i_pos_nn, &i_neg_nn, histogram_max)?;
        let total_pos_hist = hist.total_pos_hist()?;
        let total_hist = hist.total_hist()?;

        let h_pos_product = hist.pos_hist.mul(&total_pos_hist)?;
        let safe_h = h_pos_product.gt(0.)?.mul(&total_hist.gt(0.)?)?;

        let num_safe = safe_h.to_dtype(DType::F32)?.sum_all()?.to_scalar::<f32>()?;
        if num_safe <= 0. {
            debug!("no bin holds a positive partner");
            return zero_loss(embeddings_nd);
        }

        // replace the denominator before dividing: masked entries must
        // carry a zero gradient, not 0/0
        let denom = safe_h.where_cond(&total_hist, &total_hist.ones_like()?)?;
        let fast_ap_n = safe_h
            .where_cond(&h_pos_product.div(&denom)?, &total_hist.zeros_like()?)?
            .sum(1)?;

        // FastAP(i) / N_pos(i) * w(i)
        let scale: Vec<f32> = keep
            .iter()
            .map(|&i| miner_weights[i as usize] / n_pos[i as usize])
            .collect();
        let num_keep = keep.len();
        let scale_k = host_to_tensor(scale, num_keep, dtype, device)?;
        let keep_k = Tensor::new(keep.as_slice(), device)?;

        debug!("{} out of {} anchors contribute", num_keep, n);

        fast_ap_n
            .index_select(&keep_k, 0)?
            .mul(&scale_k)?
            .mean_all()?
            .affine(-1., 1.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_loss(num_bins: usize, normalize: bool) -> FastAPLoss {
        FastAPLoss::new(FastAPConfig::new(num_bins).with_normalize(normalize)).unwrap()
    }

    #[test]
    fn zero_bins_rejected() {
        assert!(FastAPLoss::new(FastAPConfig::new(0)).is_err());
    }

    #[test]
    fn config_defaults() {
        let loss = FastAPLoss::new(FastAPConfig::default()).unwrap();
        assert_eq!(loss.num_bins(), 10);
        assert_eq!(loss.num_edges(), 11);
        assert!(loss.normalize_embeddings());
    }

    #[test]
    fn pulse_is_a_triangle() -> Result<()> {
        let d = Tensor::new(&[0_f64, 0.25, 0.5, 1.0, 1.5], &Device::Cpu)?;
        let p = pulse(&d, 0.5, 0.5)?.to_vec1::<f64>()?;
        assert_eq!(p, vec![0., 0.5, 1., 0., 0.]);
        Ok(())
    }

    #[test]
    fn normalized_range_is_fixed() -> Result<()> {
        let d = Tensor::new(&[[0_f32, 9.], [9., 0.]], &Device::Cpu)?;
        assert_eq!(make_loss(10, true).histogram_range(&d)?, Some(4.));
        assert_eq!(make_loss(10, false).histogram_range(&d)?, Some(9.));
        Ok(())
    }

    #[test]
    fn coincident_points_have_no_range() -> Result<()> {
        let d = Tensor::zeros((3, 3), DType::F32, &Device::Cpu)?;
        assert_eq!(make_loss(10, false).histogram_range(&d)?, None);
        assert_eq!(make_loss(10, true).histogram_range(&d)?, Some(4.));
        Ok(())
    }

    #[test]
    fn histograms_count_every_partner_once() -> Result<()> {
        // each partner's pulse weights sum to one across the edges
        let dev = Device::Cpu;
        let x = Tensor::new(&[[0_f64, 0.], [0.3, 0.1], [1., 1.], [0.9, 1.2]], &dev)?;
        let labels = [0, 0, 1, 1];

        let loss = make_loss(8, false);
        let pairs = get_all_pairs_indices(&labels);
        let i_pos = host_to_tensor(
            dense_indicator(4, 4, &pairs.a1, &pairs.p)?,
            (4, 4),
            DType::F64,
            &dev,
        )?;
        let i_neg = host_to_tensor(
            dense_indicator(4, 4, &pairs.a2, &pairs.n)?,
            (4, 4),
            DType::F64,
            &dev,
        )?;
        let dist = dist_mat(&x, true)?;
        let range = loss.histogram_range(&dist)?.expect("distinct points");
        let hist = loss.soft_histograms(&dist, &i_pos, &i_neg, range)?;

        assert_eq!(hist.pos_hist.dims(), &[4, 9]);
        let pos = hist.pos_hist.sum(1)?.to_vec1::<f64>()?;
        let neg = hist.neg_hist.sum(1)?.to_vec1::<f64>()?;
        for i in 0..4 {
            assert!((pos[i] - 1.).abs() < 1e-9);
            assert!((neg[i] - 2.).abs() < 1e-9);
        }
        Ok(())
    }
}
