//! Model module containing GAN architecture components
//!
//! This module provides:
//! - Generator network with a weight-sharing inference sampler
//! - Discriminator network returning probability and logit
//! - DCGAN wrapper owning one parameter store per network

mod dcgan;
mod discriminator;
mod generator;

pub use dcgan::Dcgan;
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{conv_out_size_same, Generator, GeneratorConfig};
