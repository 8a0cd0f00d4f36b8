//! DCGAN Image Generator
//!
//! Main entry point providing CLI interface for:
//! - Initializing a configuration file
//! - Training the DCGAN model with periodic FID evaluation
//! - Generating sample grids from a trained generator

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dcgan_fid::{
    data::ImageFolder,
    model::Dcgan,
    training::Trainer,
    utils::{ensure_config_exists, save_image_grid, CheckpointStore, Config, GanMethod},
};

/// DCGAN trainer with FID evaluation
#[derive(Parser)]
#[command(name = "dcgan_fid")]
#[command(version = "0.1.0")]
#[command(about = "Train a DCGAN image generator and track its FID score")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Train the DCGAN model
    Train {
        /// Override the number of epochs from the config
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Override the adversarial loss regime
        /// (regular_gan, improved_wgan, penalized_wgan)
        #[arg(short, long)]
        gan_method: Option<GanMethod>,

        /// Resume from the run's checkpoint
        #[arg(long)]
        resume: bool,
    },

    /// Generate a sample grid from a trained generator
    Generate {
        /// Number of samples in the grid
        #[arg(short, long, default_value = "64")]
        num_samples: i64,

        /// Output image path
        #[arg(short, long, default_value = "generated.png")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { output } => init_config(&output),
        Commands::Train {
            epochs,
            gan_method,
            resume,
        } => train(&cli.config, epochs, gan_method, resume),
        Commands::Generate {
            num_samples,
            output,
        } => generate(&cli.config, num_samples, &output),
    }
}

fn load_config(path: &str) -> Result<Config> {
    let config = if std::path::Path::new(path).exists() {
        if path.ends_with(".toml") {
            Config::from_toml(path)?
        } else {
            Config::from_json(path)?
        }
    } else {
        info!("config file not found, using defaults");
        Config::default()
    };
    Ok(config)
}

fn init_config(output: &str) -> Result<()> {
    ensure_config_exists(output)?;
    info!("configuration available at {}", output);
    Ok(())
}

fn train(
    config_path: &str,
    epochs: Option<usize>,
    gan_method: Option<GanMethod>,
    resume: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(epochs) = epochs {
        config.training.epochs = epochs;
    }
    if let Some(method) = gan_method {
        config.model.gan_method = method;
    }
    if resume {
        config.training.load_checkpoint = true;
    }
    config.validate()?;
    config.normalize();

    let device = config.get_device();
    info!("using device: {:?}", device);

    let folder = Arc::new(ImageFolder::scan(
        &config.data.data_path,
        &config.data.dataset_name,
        &config.data.input_fname_pattern,
        config.model.output_height,
        config.model.output_width,
    )?);
    info!(
        "dataset '{}' with {} images",
        folder.dataset_name(),
        folder.len()
    );

    let mut model = Dcgan::from_config(&config.model, device);
    let mut trainer = Trainer::new(config, device);

    // Ctrl-C requests a checkpoint and a clean shutdown instead of killing
    // the run mid-step.
    let interrupt = trainer.interrupt_flag();
    ctrlc::set_handler(move || {
        interrupt.store(true, Ordering::SeqCst);
    })?;

    let counter = trainer.train(&mut model, folder)?;
    info!("training finished at step {}", counter);
    Ok(())
}

fn generate(config_path: &str, num_samples: i64, output: &str) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let device = config.get_device();
    let mut model = Dcgan::from_config(&config.model, device);

    let store = CheckpointStore::new(&config);
    match store.restore(&mut model)? {
        Some(counter) => info!("loaded generator trained for {} steps", counter),
        None => anyhow::bail!(
            "no checkpoint found in {}; train a model first",
            store.dir().display()
        ),
    }

    let z = model.latent_batch(num_samples);
    let samples = tch::no_grad(|| model.generator.sample(&z));
    save_image_grid(&samples, output)?;
    info!("saved {} generated samples to {}", num_samples, output);
    Ok(())
}
