//! Loss and penalty computation for GAN training
//!
//! Implements the three interchangeable loss regimes: vanilla minimax GAN,
//! improved Wasserstein GAN with gradient penalty, and penalized Wasserstein
//! GAN with a Lipschitz penalty and analytically derived per-sample target
//! gradient slopes.

use tch::{Kind, Reduction, Tensor};

use crate::model::Dcgan;
use crate::utils::GanMethod;

/// Small-distance guard: interpolates closer than this to the real sample
/// contribute zero to the Lipschitz penalty.
const DIST_GUARD: f64 = 1e-8;

/// Additive epsilon on norms before negative powers in the slope target.
const NORM_EPS: f64 = 1e-6;

/// The gradient penalty differentiates discriminator logits with respect to
/// the interpolate. On discriminator passes the generated batch arrives
/// detached, which would leave the interpolate outside the autograd graph;
/// promote it to a grad-requiring leaf in that case. On generator passes it
/// already carries gradient through the generator.
fn grad_enabled(interpolates: Tensor) -> Tensor {
    if interpolates.requires_grad() {
        interpolates
    } else {
        interpolates.set_requires_grad(true)
    }
}

/// Per-sample L2 norm over the channel and spatial axes.
fn l2norm(x: &Tensor) -> Tensor {
    x.square()
        .sum_dim_intlist([1, 2, 3].as_slice(), false, Kind::Float)
        .sqrt()
}

/// All scalars produced by one loss evaluation.
///
/// The four penalty-related tensors are exact zero scalars for loss regimes
/// that do not use them, so diagnostics can read all of them uniformly.
pub struct StepLosses {
    /// Combined discriminator loss (both branches plus penalties)
    pub d_loss: Tensor,
    /// Generator loss (without the optional penalty terms)
    pub g_loss: Tensor,
    /// Real-branch discriminator loss
    pub d_loss_real: Tensor,
    /// Fake/interpolate-branch discriminator loss
    pub d_loss_fake: Tensor,
    /// Weighted Lipschitz penalty term
    pub lipschitz_penalty: Tensor,
    /// Weighted gradient penalty term
    pub gradient_penalty: Tensor,
    /// Mean of the per-sample target slopes (diagnostics)
    pub slope_target_mean: Tensor,
    /// Mean observed Lipschitz quotient (diagnostics, not part of any loss)
    pub lipschitz_estimate: Tensor,
}

/// Loss/penalty engine, fixed over one [`GanMethod`] at construction.
pub struct LossEngine {
    method: GanMethod,
    lipschitz_weight: f64,
    gradient_weight: f64,
    optimize_penalty: bool,
    calculate_slope: bool,
}

impl LossEngine {
    pub fn new(
        method: GanMethod,
        lipschitz_weight: f64,
        gradient_weight: f64,
        optimize_penalty: bool,
        calculate_slope: bool,
    ) -> Self {
        Self {
            method,
            lipschitz_weight,
            gradient_weight,
            optimize_penalty,
            calculate_slope,
        }
    }

    pub fn from_config(config: &crate::utils::ModelConfig) -> Self {
        Self::new(
            config.gan_method,
            config.lipschitz_penalty,
            config.gradient_penalty,
            config.optimize_penalty,
            config.calculate_slope,
        )
    }

    pub fn method(&self) -> GanMethod {
        self.method
    }

    /// Evaluate all losses for one batch.
    ///
    /// `fake` should be detached by the caller for discriminator updates and
    /// left attached for generator updates; the engine itself never detaches
    /// the generated batch.
    pub fn compute(&self, model: &Dcgan, real: &Tensor, fake: &Tensor) -> StepLosses {
        match self.method {
            GanMethod::RegularGan => self.compute_regular(model, real, fake),
            GanMethod::ImprovedWgan => self.compute_improved(model, real, fake),
            GanMethod::PenalizedWgan => self.compute_penalized(model, real, fake),
        }
    }

    /// The objective minimized by the generator optimizer.
    ///
    /// With `optimize_penalty` the generator jointly reduces the
    /// discriminator's penalty surface.
    pub fn generator_objective(&self, losses: &StepLosses) -> Tensor {
        if self.optimize_penalty {
            &losses.g_loss - &losses.lipschitz_penalty - &losses.gradient_penalty
        } else {
            losses.g_loss.shallow_clone()
        }
    }

    fn zero(&self, model: &Dcgan) -> Tensor {
        Tensor::zeros([], (Kind::Float, model.device))
    }

    fn compute_regular(&self, model: &Dcgan, real: &Tensor, fake: &Tensor) -> StepLosses {
        let (_, logits_real) = model.discriminator.forward_t(real, true);
        let (_, logits_fake) = model.discriminator.forward_t(fake, true);

        let d_loss_real = logits_real.binary_cross_entropy_with_logits::<Tensor>(
            &Tensor::ones_like(&logits_real),
            None,
            None,
            Reduction::Mean,
        );
        let d_loss_fake = logits_fake.binary_cross_entropy_with_logits::<Tensor>(
            &Tensor::zeros_like(&logits_fake),
            None,
            None,
            Reduction::Mean,
        );
        let g_loss = logits_fake.binary_cross_entropy_with_logits::<Tensor>(
            &Tensor::ones_like(&logits_fake),
            None,
            None,
            Reduction::Mean,
        );

        let lipschitz_penalty = self.zero(model);
        let gradient_penalty = self.zero(model);
        let d_loss = &d_loss_real + &d_loss_fake + &lipschitz_penalty + &gradient_penalty;

        StepLosses {
            d_loss,
            g_loss,
            d_loss_real,
            d_loss_fake,
            lipschitz_penalty,
            gradient_penalty,
            slope_target_mean: self.zero(model),
            lipschitz_estimate: self.zero(model),
        }
    }

    fn compute_improved(&self, model: &Dcgan, real: &Tensor, fake: &Tensor) -> StepLosses {
        let (_, logits_real) = model.discriminator.forward_t(real, true);
        let (_, logits_fake) = model.discriminator.forward_t(fake, true);

        let d_loss_real = -logits_real.mean(Kind::Float);
        let d_loss_fake = logits_fake.mean(Kind::Float);
        let g_loss = -logits_fake.mean(Kind::Float);

        // One interpolation coefficient per sample, broadcast over all
        // pixels and channels.
        let batch_size = real.size()[0];
        let alpha = Tensor::rand([batch_size, 1, 1, 1], (Kind::Float, model.device));
        let interpolates = grad_enabled(fake + alpha * (real - fake));
        let (_, logits_interp) = model.discriminator.forward_t(&interpolates, true);

        let grads = Tensor::run_backward(
            &[logits_interp.sum(Kind::Float)],
            &[&interpolates],
            true,
            true,
        );
        let slopes = l2norm(&grads[0]);
        let gradient_penalty = self.gradient_weight * (slopes - 1.0).square().mean(Kind::Float);

        let lipschitz_penalty = self.zero(model);
        let d_loss = &d_loss_real + &d_loss_fake + &lipschitz_penalty + &gradient_penalty;

        StepLosses {
            d_loss,
            g_loss,
            d_loss_real,
            d_loss_fake,
            lipschitz_penalty,
            gradient_penalty,
            slope_target_mean: self.zero(model),
            lipschitz_estimate: self.zero(model),
        }
    }

    fn compute_penalized(&self, model: &Dcgan, real: &Tensor, fake: &Tensor) -> StepLosses {
        let (_, logits_real) = model.discriminator.forward_t(real, true);

        // Small interpolation range: the interpolate stays close to the
        // generated sample, unlike improved_wgan's full-range mix.
        let batch_size = real.size()[0];
        let alpha = Tensor::rand([batch_size, 1, 1, 1], (Kind::Float, model.device)) * 0.01;
        let interpolates = grad_enabled(fake + alpha * (real - fake));
        let (_, logits_interp) = model.discriminator.forward_t(&interpolates, true);

        let d_loss_real = -logits_real.mean(Kind::Float);
        let d_loss_fake = logits_interp.mean(Kind::Float);
        let g_loss = -logits_interp.mean(Kind::Float);

        let top = (&logits_real - &logits_interp).squeeze_dim(1);
        let bot = l2norm(&(real - &interpolates));
        let (penalty_terms, estimate_terms) = lipschitz_terms(&top, &bot);
        let lipschitz_penalty = self.lipschitz_weight * penalty_terms.mean(Kind::Float);
        let lipschitz_estimate = estimate_terms.mean(Kind::Float);

        let grads = Tensor::run_backward(
            &[logits_interp.sum(Kind::Float)],
            &[&interpolates],
            true,
            true,
        );
        let slopes = l2norm(&grads[0]);

        let target = if self.calculate_slope {
            tch::no_grad(|| {
                analytic_slope_targets(
                    real,
                    &interpolates.detach(),
                    &logits_real.detach().squeeze_dim(1),
                    &logits_interp.detach().squeeze_dim(1),
                )
            })
        } else {
            Tensor::full(
                [],
                1.0 / (2.0 * self.lipschitz_weight),
                (Kind::Float, model.device),
            )
        };

        let gradient_penalty =
            self.gradient_weight * (slopes - &target).square().mean(Kind::Float);
        let slope_target_mean = target.mean(Kind::Float);

        let d_loss = &d_loss_real + &d_loss_fake + &lipschitz_penalty + &gradient_penalty;

        StepLosses {
            d_loss,
            g_loss,
            d_loss_real,
            d_loss_fake,
            lipschitz_penalty,
            gradient_penalty,
            slope_target_mean,
            lipschitz_estimate,
        }
    }
}

/// Per-sample Lipschitz penalty terms `diff^2 / dist` and diagnostic
/// quotients `diff / dist`, both forced to zero where `dist` underflows the
/// guard so near-zero-distance interpolates cannot blow up the loss.
fn lipschitz_terms(top: &Tensor, bot: &Tensor) -> (Tensor, Tensor) {
    let mask = bot.ge(DIST_GUARD).to_kind(Kind::Float);
    let bot_safe = bot.clamp_min(DIST_GUARD);
    let penalty = top.square() / &bot_safe * &mask;
    let estimate = top / &bot_safe * &mask;
    (penalty, estimate)
}

/// Analytic per-sample target slope for the gradient penalty.
///
/// For each sample, the rest of the batch serves as an empirical
/// expectation over the real distribution:
///
/// ```text
/// target_j = max(0, || mean_i[(real_i - interp_j) * (f(real_i) - f(interp_j)) / ||real_i - interp_j||^3] ||
///                   / mean_i[1 / ||real_i - interp_j||])
/// ```
///
/// All inputs are treated as constants; no gradient flows through this
/// computation.
fn analytic_slope_targets(
    real: &Tensor,
    interpolates: &Tensor,
    logits_real: &Tensor,
    logits_interp: &Tensor,
) -> Tensor {
    let batch_size = real.size()[0];
    let mut targets = Vec::with_capacity(batch_size as usize);

    for j in 0..batch_size {
        let diff = real - interpolates.get(j).unsqueeze(0);
        let norm = l2norm(&diff) + NORM_EPS;
        let bot = norm.pow_tensor_scalar(-3);
        let top = logits_real - logits_interp.double_value(&[j]);

        let weighted = &diff * (top * bot).view([-1, 1, 1, 1]);
        let numerator = weighted.mean_dim([0].as_slice(), false, Kind::Float).norm();
        let denominator = norm.pow_tensor_scalar(-1).mean(Kind::Float);

        targets.push((numerator / denominator).clamp_min(0.0));
    }

    Tensor::stack(&targets, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscriminatorConfig, GeneratorConfig};
    use tch::Device;

    fn small_model() -> Dcgan {
        Dcgan::new(
            GeneratorConfig {
                output_height: 32,
                output_width: 32,
                gf_dim: 4,
                z_dim: 8,
                ..Default::default()
            },
            DiscriminatorConfig {
                input_height: 32,
                input_width: 32,
                df_dim: 4,
                ..Default::default()
            },
            Device::Cpu,
        )
    }

    fn engine(method: GanMethod) -> LossEngine {
        LossEngine::new(method, 0.1, 0.1, false, true)
    }

    fn batch(model: &Dcgan) -> (Tensor, Tensor) {
        let real = Tensor::rand([2, 3, 32, 32], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let fake = model.generator.forward_t(&model.latent_batch(2), true);
        (real, fake)
    }

    #[test]
    fn test_regular_gan_penalties_are_zero() {
        let model = small_model();
        let (real, fake) = batch(&model);
        let losses = engine(GanMethod::RegularGan).compute(&model, &real, &fake.detach());

        assert_eq!(losses.lipschitz_penalty.double_value(&[]), 0.0);
        assert_eq!(losses.gradient_penalty.double_value(&[]), 0.0);
        assert_eq!(losses.slope_target_mean.double_value(&[]), 0.0);
        assert_eq!(losses.lipschitz_estimate.double_value(&[]), 0.0);
        assert!(losses.d_loss.double_value(&[]).is_finite());
        assert!(losses.g_loss.double_value(&[]).is_finite());
    }

    #[test]
    fn test_improved_wgan_lipschitz_scalars_zero() {
        let model = small_model();
        let (real, fake) = batch(&model);
        let losses = engine(GanMethod::ImprovedWgan).compute(&model, &real, &fake.detach());

        assert_eq!(losses.lipschitz_penalty.double_value(&[]), 0.0);
        assert_eq!(losses.slope_target_mean.double_value(&[]), 0.0);
        assert_eq!(losses.lipschitz_estimate.double_value(&[]), 0.0);
        assert!(losses.gradient_penalty.double_value(&[]) >= 0.0);
    }

    #[test]
    fn test_penalized_wgan_all_scalars_finite() {
        let model = small_model();
        let (real, fake) = batch(&model);
        let losses = engine(GanMethod::PenalizedWgan).compute(&model, &real, &fake.detach());

        assert!(losses.d_loss.double_value(&[]).is_finite());
        assert!(losses.g_loss.double_value(&[]).is_finite());
        assert!(losses.lipschitz_penalty.double_value(&[]) >= 0.0);
        assert!(losses.gradient_penalty.double_value(&[]) >= 0.0);
        assert!(losses.slope_target_mean.double_value(&[]) >= 0.0);
    }

    #[test]
    fn test_lipschitz_guard_zeroes_small_distances() {
        let top = Tensor::from_slice(&[3.0f32, -2.0, 0.5]);
        let bot = Tensor::from_slice(&[1e-12f32, 2.0, 1e-9]);
        let (penalty, estimate) = lipschitz_terms(&top, &bot);

        // Samples under the guard contribute exactly zero, whatever diff is.
        assert_eq!(penalty.double_value(&[0]), 0.0);
        assert_eq!(penalty.double_value(&[2]), 0.0);
        assert_eq!(estimate.double_value(&[0]), 0.0);
        assert!((penalty.double_value(&[1]) - 2.0).abs() < 1e-6);
        assert!((estimate.double_value(&[1]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_analytic_slope_targets_never_negative() {
        let real = Tensor::randn([4, 3, 8, 8], (Kind::Float, Device::Cpu));
        let interp = Tensor::randn([4, 3, 8, 8], (Kind::Float, Device::Cpu));
        let logits_real = Tensor::randn([4], (Kind::Float, Device::Cpu)) * 10.0;
        let logits_interp = Tensor::randn([4], (Kind::Float, Device::Cpu)) * 10.0;

        let targets = analytic_slope_targets(&real, &interp, &logits_real, &logits_interp);
        assert_eq!(targets.size(), vec![4]);
        let min: f64 = targets.min().double_value(&[]);
        assert!(min >= 0.0);
    }

    #[test]
    fn test_constant_slope_target_when_disabled() {
        let model = small_model();
        let (real, fake) = batch(&model);
        let engine = LossEngine::new(GanMethod::PenalizedWgan, 0.1, 0.1, false, false);
        let losses = engine.compute(&model, &real, &fake.detach());

        // 1 / (2 * 0.1) = 5.0
        assert!((losses.slope_target_mean.double_value(&[]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_generator_objective_with_penalty_optimization() {
        let model = small_model();
        let (real, fake) = batch(&model);
        let engine = LossEngine::new(GanMethod::PenalizedWgan, 0.1, 0.1, true, false);
        let losses = engine.compute(&model, &real, &fake);

        let expected = losses.g_loss.double_value(&[])
            - losses.lipschitz_penalty.double_value(&[])
            - losses.gradient_penalty.double_value(&[]);
        let objective = engine.generator_objective(&losses).double_value(&[]);
        assert!((objective - expected).abs() < 1e-5);
    }
}
