use candle_core::{DType, Device, Result, Shape, Tensor};

/// Row-major `nrow x ncol` 0/1 buffer with ones at `(rows[k], cols[k])`.
///
/// Duplicated coordinates overwrite each other; they never accumulate.
///
pub fn dense_indicator(
    nrow: usize,
    ncol: usize,
    rows: &[usize],
    cols: &[usize],
) -> Result<Vec<f32>> {
    if rows.len() != cols.len() {
        candle_core::bail!(
            "row and column index lengths differ ({} vs {})",
            rows.len(),
            cols.len()
        );
    }
    let mut data = vec![0_f32; nrow * ncol];
    for (&ii, &jj) in rows.iter().zip(cols.iter()) {
        if ii >= nrow || jj >= ncol {
            candle_core::bail!("index ({}, {}) out of range for {} x {}", ii, jj, nrow, ncol);
        }
        data[ii * ncol + jj] = 1.;
    }
    Ok(data)
}

/// Move a host buffer onto `device` as a `dtype` tensor
pub fn host_to_tensor<S>(data: Vec<f32>, shape: S, dtype: DType, device: &Device) -> Result<Tensor>
where
    S: Into<Shape>,
{
    // build on CPU first; some devices can't cast from f64
    Tensor::from_vec(data, shape, &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)
}

/// `1 - I`, a mask zeroing out the diagonal
pub fn off_diagonal_mask(n: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let data = (0..(n * n))
        .map(|k| if k / n == k % n { 0_f32 } else { 1_f32 })
        .collect();
    host_to_tensor(data, (n, n), dtype, device)
}

/// Pairwise Euclidean distances between rows
///
/// d(i,j)^2 = |x(i)|^2 + |x(j)|^2 - 2 x(i)'x(j)
///
/// * `x_nd` - data (n x d)
/// * `squared` - skip the square root
///
pub fn dist_mat(x_nd: &Tensor, squared: bool) -> Result<Tensor> {
    let (n, _) = x_nd.dims2()?;
    let norm_n1 = x_nd.sqr()?.sum_keepdim(1)?;
    let gram_nn = x_nd.matmul(&x_nd.t()?)?;

    let dist_nn = norm_n1
        .broadcast_add(&norm_n1.t()?)?
        .sub(&(gram_nn * 2.0)?)?
        .clamp(0.0, f64::INFINITY)?
        .mul(&off_diagonal_mask(n, x_nd.dtype(), x_nd.device())?)?;

    if squared {
        return Ok(dist_nn);
    }

    // sqrt has an infinite slope at 0
    let eps = 1e-16;
    let zero_nn = dist_nn.eq(0.0)?.to_dtype(dist_nn.dtype())?;
    (dist_nn + (&zero_nn * eps)?)?
        .sqrt()?
        .mul(&zero_nn.affine(-1.0, 1.0)?)
}

/// Scale every row to unit L2 norm: x / max(|x|, 1e-12)
pub fn l2_normalize(x_nd: &Tensor) -> Result<Tensor> {
    let eps = 1e-12;
    let norm_n1 = x_nd.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(eps, f64::INFINITY)?;
    x_nd.broadcast_div(&norm_n1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_overwrites_duplicates() -> Result<()> {
        let data = dense_indicator(2, 3, &[0, 0, 1], &[2, 2, 0])?;
        assert_eq!(data, vec![0., 0., 1., 1., 0., 0.]);
        Ok(())
    }

    #[test]
    fn indicator_rejects_out_of_range() {
        assert!(dense_indicator(2, 2, &[0, 2], &[1, 0]).is_err());
        assert!(dense_indicator(2, 2, &[0], &[1, 0]).is_err());
    }

    #[test]
    fn off_diagonal_mask_values() -> Result<()> {
        let mask = off_diagonal_mask(3, DType::F32, &Device::Cpu)?;
        assert_eq!(
            mask.to_vec2::<f32>()?,
            vec![
                vec![0., 1., 1.],
                vec![1., 0., 1.],
                vec![1., 1., 0.]
            ]
        );
        Ok(())
    }
}
