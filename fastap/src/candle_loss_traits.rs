use candle_core::{Result, Tensor};
use metric_util::pair_indices::IndicesTuple;
use metric_util::tensor_util::l2_normalize;

pub trait MetricLossT {
    /// Whether `forward` projects each embedding onto the unit sphere
    fn normalize_embeddings(&self) -> bool;

    /// A scalar loss, differentiable with respect to `embeddings_nd`
    ///
    /// # Arguments
    /// * `embeddings_nd` - embedding vectors (n x d)
    /// * `labels` - class identity of each row (n), compared by equality only
    /// * `indices_tuple` - optional miner selection used to reweight anchors
    fn compute_loss<L>(
        &self,
        embeddings_nd: &Tensor,
        labels: &[L],
        indices_tuple: Option<&IndicesTuple>,
    ) -> Result<Tensor>
    where
        L: PartialEq;

    /// Normalize the embeddings if asked to, then `compute_loss`
    fn forward<L>(
        &self,
        embeddings_nd: &Tensor,
        labels: &[L],
        indices_tuple: Option<&IndicesTuple>,
    ) -> Result<Tensor>
    where
        L: PartialEq,
    {
        if self.normalize_embeddings() && embeddings_nd.elem_count() > 0 {
            self.compute_loss(&l2_normalize(embeddings_nd)?, labels, indices_tuple)
        } else {
            self.compute_loss(embeddings_nd, labels, indices_tuple)
        }
    }
}

/// Scalar zero that stays on the graph of `embeddings_nd`, so
/// `backward` yields an all-zero gradient instead of none at all.
pub fn zero_loss(embeddings_nd: &Tensor) -> Result<Tensor> {
    if embeddings_nd.elem_count() == 0 {
        return Tensor::zeros((), embeddings_nd.dtype(), embeddings_nd.device());
    }
    embeddings_nd.affine(0., 0.)?.sum_all()
}
