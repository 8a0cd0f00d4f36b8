//! Training loop implementation
//!
//! Alternating discriminator/generator updates with periodic summaries,
//! sample grids, FID evaluations and checkpoints. An interrupt flag lets a
//! signal handler request a final checkpoint and a clean shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tch::{nn, Device, Tensor};
use tracing::{info, warn};

use crate::data::{BatchFeeder, ImageFolder};
use crate::fid::{
    activation_statistics, frechet_distance, FeatureExtractor, RealStats, TorchScriptExtractor,
};
use crate::model::Dcgan;
use crate::utils::{save_image_grid, CheckpointStore, Config};

use super::losses::LossEngine;
use super::summary::{DiagnosticsWindow, LossSnapshot, SummaryWriter};

/// Console report interval, in steps.
const LOG_WINDOW: i64 = 100;

/// FID value reported when an evaluation fails; far above any score a
/// working generator produces, so failures are visible in the series
/// without aborting the run.
const FID_FAILURE_SENTINEL: f64 = 500.0;

/// Number of whole batches consumed per epoch.
pub fn batches_per_epoch(num_files: usize, train_size: usize, batch_size: i64) -> i64 {
    (num_files.min(train_size) as i64) / batch_size
}

/// Feature extractor plus the real-data statistics it is compared against.
pub struct FidContext {
    extractor: Box<dyn FeatureExtractor>,
    stats: RealStats,
}

impl FidContext {
    pub fn new(extractor: Box<dyn FeatureExtractor>, stats: RealStats) -> Self {
        Self { extractor, stats }
    }

    fn load(config: &Config) -> Result<Self> {
        let extractor = TorchScriptExtractor::load(&config.fid.extractor_path)?;
        let stats = RealStats::load(&config.data.stats_path)?;
        Ok(Self::new(Box::new(extractor), stats))
    }
}

/// DCGAN trainer
pub struct Trainer {
    config: Config,
    device: Device,
    engine: LossEngine,
    interrupt: Arc<AtomicBool>,
    fid_ctx: Option<FidContext>,
}

impl Trainer {
    pub fn new(config: Config, device: Device) -> Self {
        let engine = LossEngine::from_config(&config.model);
        Self {
            config,
            device,
            engine,
            interrupt: Arc::new(AtomicBool::new(false)),
            fid_ctx: None,
        }
    }

    /// Supply an already-built FID context instead of loading the
    /// TorchScript extractor and statistics from the configured paths.
    pub fn with_fid_context(mut self, ctx: FidContext) -> Self {
        self.fid_ctx = Some(ctx);
        self
    }

    /// Shared flag a signal handler can set to request checkpoint-and-exit.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// One outer optimization step: `num_discriminator_updates` discriminator
    /// updates, then at most one generator update. Every update draws its
    /// own real batch from the feeder. Returns the first discriminator
    /// update's diagnostics and the two optimizer application counts.
    pub fn train_step(
        &self,
        model: &Dcgan,
        feeder: &BatchFeeder,
        disc_opt: &mut nn::Optimizer,
        gen_opt: &mut nn::Optimizer,
    ) -> Result<(LossSnapshot, usize, usize)> {
        // Diagnostics come from the first update so the logged losses
        // always describe the same relative point in the update cycle.
        let mut first_snapshot = None;
        let mut disc_updates = 0;
        for _ in 0..self.config.training.num_discriminator_updates {
            let real = feeder.next_batch()?.to_device(self.device);
            let z = model.latent_batch(self.config.model.batch_size);
            let fake = model.generator.forward_t(&z, true).detach();
            let losses = self.engine.compute(model, &real, &fake);
            disc_opt.backward_step(&losses.d_loss);
            disc_updates += 1;

            if first_snapshot.is_none() {
                first_snapshot = Some(LossSnapshot::from_losses(&losses));
            }
        }
        let mut snapshot = first_snapshot.unwrap_or_default();

        // Zero generator learning rate trains the discriminator alone
        // against a frozen generator.
        let mut gen_updates = 0;
        if self.config.training.learning_rate_g != 0.0 {
            let real = feeder.next_batch()?.to_device(self.device);
            let z = model.latent_batch(self.config.model.batch_size);
            let fake = model.generator.forward_t(&z, true);
            let losses = self.engine.compute(model, &real, &fake);
            let objective = self.engine.generator_objective(&losses);
            gen_opt.backward_step(&objective);
            gen_updates += 1;
            snapshot.g_loss = losses.g_loss.double_value(&[]);
        }

        Ok((snapshot, disc_updates, gen_updates))
    }

    /// Run the full training loop. Returns the final step counter.
    pub fn train(&mut self, model: &mut Dcgan, folder: Arc<ImageFolder>) -> Result<i64> {
        let training = &self.config.training;
        std::fs::create_dir_all(&training.sample_dir)
            .with_context(|| format!("cannot create sample directory {}", training.sample_dir))?;

        let mut summary = SummaryWriter::create(&training.log_dir)?;
        let store = CheckpointStore::new(&self.config);

        let mut disc_opt = model.disc_optimizer(training.learning_rate_d, training.beta1)?;
        let mut gen_opt = model.gen_optimizer(training.learning_rate_g, training.beta1)?;

        let mut counter = training.counter_start;
        if training.load_checkpoint {
            if let Some(restored) = store.restore(model)? {
                counter = restored;
            }
        }

        // A broken statistics file or extractor is a configuration error;
        // only individual evaluations are allowed to fail once training runs.
        let fid_ctx = match self.fid_ctx.take() {
            Some(ctx) => ctx,
            None => FidContext::load(&self.config)?,
        };

        let num_batches = batches_per_epoch(
            folder.len(),
            training.train_size,
            self.config.model.batch_size,
        );
        if num_batches == 0 {
            anyhow::bail!(
                "dataset of {} files yields no whole batch of size {}",
                folder.len(),
                self.config.model.batch_size
            );
        }

        // Fixed latent batch so consecutive sample grids show the same
        // points of the latent space evolving.
        let sample_z = model.latent_batch(self.config.model.sample_num);

        let mut feeder = BatchFeeder::spawn(
            folder,
            self.config.model.batch_size,
            self.config.data.loader_threads,
            self.config.data.queue_depth,
        );

        info!(
            "training {} for {} epochs, {} batches per epoch, starting at step {}",
            self.engine.method(),
            training.epochs,
            num_batches,
            counter
        );

        let mut window = DiagnosticsWindow::new();
        let mut interrupted = false;

        'epochs: for epoch in 0..training.epochs {
            // Reapplied every epoch so a learning-rate schedule only needs
            // to touch the config between epochs.
            disc_opt.set_lr(self.config.training.learning_rate_d);
            gen_opt.set_lr(self.config.training.learning_rate_g);

            let pb = ProgressBar::new(num_batches as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                    .progress_chars("##-"),
            );

            for batch_idx in 0..num_batches {
                if self.interrupt.load(Ordering::SeqCst) {
                    interrupted = true;
                    break 'epochs;
                }

                let (snapshot, _, _) =
                    self.train_step(model, &feeder, &mut disc_opt, &mut gen_opt)?;

                summary.record(counter, &snapshot)?;
                window.push(&snapshot);

                if counter % LOG_WINDOW == 0 && !window.is_empty() {
                    info!(
                        "epoch {} step {}: d_loss={:.4} g_loss={:.4} penalty={:.4}",
                        epoch,
                        counter,
                        window.mean_d_loss(),
                        window.mean_g_loss(),
                        window.mean_penalty()
                    );
                    window.reset();
                }

                // Cadences fire on the pre-increment counter, so a run
                // starting at step 0 produces a baseline sample grid and
                // FID score before any weights have moved far.
                if counter % self.config.fid.eval_steps == 0 {
                    self.save_sample_grid(model, &sample_z, epoch, batch_idx);
                    let fid = self.evaluate_fid(model, &fid_ctx);
                    info!("step {}: FID = {:.2}", counter, fid);
                    summary.record_fid(counter, fid)?;
                }

                if counter % self.config.training.checkpoint_every == 0 && counter != 0 {
                    store.save(model, counter)?;
                }

                counter += 1;

                pb.set_message(format!(
                    "D: {:.4}, G: {:.4}",
                    snapshot.d_loss, snapshot.g_loss
                ));
                pb.inc(1);
            }

            pb.finish_with_message("done");
        }

        if interrupted {
            info!("interrupt received, saving checkpoint at step {}", counter);
        }
        store.save(model, counter)?;
        summary.flush()?;
        feeder.shutdown();

        Ok(counter)
    }

    /// Write the current sample grid; a failed write is logged, never fatal.
    fn save_sample_grid(&self, model: &Dcgan, sample_z: &Tensor, epoch: usize, batch_idx: i64) {
        let samples = tch::no_grad(|| model.generator.sample(sample_z));
        let path = format!(
            "{}/train_{:02}_{:04}.png",
            self.config.training.sample_dir, epoch, batch_idx
        );
        if let Err(err) = save_image_grid(&samples, &path) {
            warn!("could not save sample grid: {err:#}");
        }
    }

    fn evaluate_fid(&self, model: &Dcgan, ctx: &FidContext) -> f64 {
        match self.try_evaluate_fid(model, ctx) {
            Ok(fid) => fid,
            Err(err) => {
                warn!("FID evaluation failed: {err:#}");
                FID_FAILURE_SENTINEL
            }
        }
    }

    fn try_evaluate_fid(&self, model: &Dcgan, ctx: &FidContext) -> Result<f64> {
        let fid = &self.config.fid;

        // n_samples is normalized to a multiple of sample_batchsize up
        // front, so the buffer fills in whole sub-batches.
        let samples = tch::no_grad(|| {
            let mut chunks = Vec::new();
            let mut remaining = fid.n_samples;
            while remaining > 0 {
                let n = remaining.min(fid.sample_batchsize);
                let z = model.latent_batch(n);
                // [-1, 1] -> [0, 255] for the feature extractor
                chunks.push((model.generator.sample(&z) + 1.0) * 127.5);
                remaining -= n;
            }
            Tensor::cat(&chunks, 0)
        });

        let (mu, sigma) =
            activation_statistics(&samples, ctx.extractor.as_ref(), fid.batch_size, fid.verbose)?;
        frechet_distance(&mu, &sigma, &ctx.stats.mu, &ctx.stats.sigma)
    }
}
