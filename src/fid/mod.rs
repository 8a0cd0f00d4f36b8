//! Fréchet Inception Distance evaluation
//!
//! Batched feature extraction over generated samples, Gaussian statistics,
//! and the Fréchet distance against precomputed real-data statistics.

use anyhow::{Context, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2};
use tch::{CModule, Kind, Tensor};

/// Maps image batches to feature rows. Implementations must be pure with
/// respect to their weights; the evaluator never mutates them.
pub trait FeatureExtractor {
    /// Extract features for a batch of images, shape (n, feature_dim).
    /// Input images are float tensors in [0, 255], shape (n, c, h, w).
    fn features(&self, images: &Tensor) -> Result<Tensor>;
}

/// TorchScript-backed feature extractor (an exported Inception network).
pub struct TorchScriptExtractor {
    module: CModule,
}

impl TorchScriptExtractor {
    pub fn load(path: &str) -> Result<Self> {
        let module = CModule::load(path)
            .with_context(|| format!("cannot load feature extractor from {path}"))?;
        Ok(Self { module })
    }
}

impl FeatureExtractor for TorchScriptExtractor {
    fn features(&self, images: &Tensor) -> Result<Tensor> {
        let features = self.module.forward_ts(&[images])?;
        Ok(features.to_kind(Kind::Double))
    }
}

/// Precomputed real-data activation statistics.
pub struct RealStats {
    pub mu: Array1<f64>,
    pub sigma: Array2<f64>,
}

impl RealStats {
    /// Load named arrays `mu` and `sigma` from an `.npz` file.
    pub fn load(path: &str) -> Result<Self> {
        let arrays = Tensor::read_npz(path)
            .with_context(|| format!("cannot read FID statistics from {path}"))?;

        let mut mu = None;
        let mut sigma = None;
        for (name, tensor) in arrays {
            match name.as_str() {
                "mu" => mu = Some(tensor),
                "sigma" => sigma = Some(tensor),
                _ => {}
            }
        }
        let mu = mu.ok_or_else(|| anyhow::anyhow!("statistics file is missing 'mu'"))?;
        let sigma = sigma.ok_or_else(|| anyhow::anyhow!("statistics file is missing 'sigma'"))?;

        let dim = mu.size()[0] as usize;
        let mu_vec: Vec<f64> = mu.to_kind(Kind::Double).flatten(0, -1).try_into()?;
        let sigma_vec: Vec<f64> = sigma.to_kind(Kind::Double).flatten(0, -1).try_into()?;

        Ok(Self {
            mu: Array1::from_vec(mu_vec),
            sigma: Array2::from_shape_vec((dim, dim), sigma_vec)?,
        })
    }
}

/// Compute the activation mean and covariance of `samples` by running the
/// extractor in sub-batches of at most `batch_size` images.
pub fn activation_statistics(
    samples: &Tensor,
    extractor: &dyn FeatureExtractor,
    batch_size: i64,
    verbose: bool,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = samples.size()[0];
    let n_batches = (n + batch_size - 1) / batch_size;

    let mut feature_rows = Vec::with_capacity(n_batches as usize);
    for batch_idx in 0..n_batches {
        let lo = batch_idx * batch_size;
        let len = batch_size.min(n - lo);
        let batch = samples.narrow(0, lo, len);
        feature_rows.push(extractor.features(&batch)?);
        if verbose {
            tracing::info!("feature extraction batch {}/{}", batch_idx + 1, n_batches);
        }
    }
    let features = Tensor::cat(&feature_rows, 0);
    let dim = features.size()[1] as usize;
    let flat: Vec<f64> = features.to_kind(Kind::Double).flatten(0, -1).try_into()?;
    let features = Array2::from_shape_vec((n as usize, dim), flat)?;

    let mu = features
        .mean_axis(ndarray::Axis(0))
        .ok_or_else(|| anyhow::anyhow!("no samples for activation statistics"))?;

    // Unbiased sample covariance.
    let centered = &features - &mu.clone().insert_axis(ndarray::Axis(0));
    let sigma = centered.t().dot(&centered) / (n as f64 - 1.0);

    Ok((mu, sigma))
}

/// Fréchet distance between two Gaussians:
/// `||mu1 - mu2||^2 + tr(s1) + tr(s2) - 2 tr((s1 s2)^(1/2))`.
///
/// The covariance-product square root is computed as the eigenvalues of
/// `sqrt(s1) * s2 * sqrt(s1)`, which shares its spectrum with `s1 * s2` but
/// stays symmetric. A non-finite result is an error; the caller decides on a
/// fallback value.
pub fn frechet_distance(
    mu1: &Array1<f64>,
    sigma1: &Array2<f64>,
    mu2: &Array1<f64>,
    sigma2: &Array2<f64>,
) -> Result<f64> {
    let dim = mu1.len();
    if mu2.len() != dim || sigma1.dim() != (dim, dim) || sigma2.dim() != (dim, dim) {
        anyhow::bail!("mismatched statistics dimensions");
    }

    let s1 = DMatrix::from_fn(dim, dim, |i, j| sigma1[(i, j)]);
    let s2 = DMatrix::from_fn(dim, dim, |i, j| sigma2[(i, j)]);

    let sqrt_s1 = symmetric_sqrt(&s1);
    let inner = &sqrt_s1 * &s2 * &sqrt_s1;
    // Symmetrize against accumulated round-off before the eigensolve.
    let inner = (&inner + inner.transpose()) * 0.5;
    let eigenvalues = SymmetricEigen::new(inner).eigenvalues;
    let trace_sqrt: f64 = eigenvalues.iter().map(|&v| v.max(0.0).sqrt()).sum();

    let mean_diff: f64 = mu1
        .iter()
        .zip(mu2.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    let trace1: f64 = (0..dim).map(|i| s1[(i, i)]).sum();
    let trace2: f64 = (0..dim).map(|i| s2[(i, i)]).sum();

    let fid = mean_diff + trace1 + trace2 - 2.0 * trace_sqrt;
    if !fid.is_finite() {
        anyhow::bail!("Fréchet distance is not finite");
    }
    Ok(fid)
}

fn symmetric_sqrt(m: &DMatrix<f64>) -> DMatrix<f64> {
    let sym = (m + m.transpose()) * 0.5;
    let eigen = SymmetricEigen::new(sym);
    let sqrt_vals = eigen.eigenvalues.map(|v| v.max(0.0).sqrt());
    let d = DMatrix::from_diagonal(&sqrt_vals);
    &eigen.eigenvectors * d * eigen.eigenvectors.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    struct MeanPoolExtractor;

    impl FeatureExtractor for MeanPoolExtractor {
        fn features(&self, images: &Tensor) -> Result<Tensor> {
            // (n, c, h, w) -> per-channel spatial mean, (n, c)
            Ok(images
                .to_kind(Kind::Double)
                .mean_dim([2, 3].as_slice(), false, Kind::Double))
        }
    }

    #[test]
    fn test_identical_gaussians_have_zero_distance() {
        let mu = arr1(&[1.0, -2.0, 0.5]);
        let sigma = Array2::from_shape_vec(
            (3, 3),
            vec![2.0, 0.1, 0.0, 0.1, 1.5, 0.2, 0.0, 0.2, 1.0],
        )
        .unwrap();

        let fid = frechet_distance(&mu, &sigma, &mu, &sigma).unwrap();
        assert!(fid.abs() < 1e-8);
    }

    #[test]
    fn test_mean_shift_dominates_distance() {
        let sigma = Array2::eye(2);
        let mu1 = arr1(&[0.0, 0.0]);
        let mu2 = arr1(&[3.0, 4.0]);

        let fid = frechet_distance(&mu1, &sigma, &mu2, &sigma).unwrap();
        // Identical covariances: distance reduces to ||mu1 - mu2||^2 = 25.
        assert!((fid - 25.0).abs() < 1e-8);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let sigma2 = Array2::eye(2);
        let sigma3 = Array2::eye(3);
        let mu2 = arr1(&[0.0, 0.0]);
        let mu3 = arr1(&[0.0, 0.0, 0.0]);

        assert!(frechet_distance(&mu2, &sigma2, &mu3, &sigma3).is_err());
    }

    #[test]
    fn test_activation_statistics_shapes() {
        let samples = Tensor::rand([10, 3, 8, 8], (Kind::Float, tch::Device::Cpu)) * 255.0;
        let (mu, sigma) =
            activation_statistics(&samples, &MeanPoolExtractor, 4, false).unwrap();

        assert_eq!(mu.len(), 3);
        assert_eq!(sigma.dim(), (3, 3));
        // Covariance must be symmetric.
        for i in 0..3 {
            for j in 0..3 {
                assert!((sigma[(i, j)] - sigma[(j, i)]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_statistics_roundtrip_small_distance() {
        let samples = Tensor::rand([64, 3, 8, 8], (Kind::Float, tch::Device::Cpu)) * 255.0;
        let (mu, sigma) =
            activation_statistics(&samples, &MeanPoolExtractor, 16, false).unwrap();
        let fid = frechet_distance(&mu, &sigma, &mu, &sigma).unwrap();
        assert!(fid.abs() < 1e-6);
    }
}
