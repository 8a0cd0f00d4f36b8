//! Sample-grid rendering
//!
//! Tiles a batch of generated images into a single grid image and writes it
//! to disk for visual inspection during training.

use anyhow::{Context, Result};
use tch::{vision::image as tch_image, Kind, Tensor};

/// Grid layout: `ceil(sqrt(n))` columns, enough rows to hold every image.
pub fn grid_shape(n: i64) -> (i64, i64) {
    let cols = (n as f64).sqrt().ceil() as i64;
    let rows = (n + cols - 1) / cols;
    (rows, cols)
}

/// Tile a `(n, c, h, w)` batch in `[-1, 1]` into one `(c, rows*h, cols*w)`
/// uint8 image. Missing cells in the last row are filled with black.
pub fn tile_images(images: &Tensor) -> Result<Tensor> {
    let size = images.size();
    if size.len() != 4 {
        anyhow::bail!("expected a (n, c, h, w) batch, got shape {size:?}");
    }
    let (n, c, h, w) = (size[0], size[1], size[2], size[3]);
    let (rows, cols) = grid_shape(n);

    let mut batch = images.shallow_clone();
    let padding = rows * cols - n;
    if padding > 0 {
        let filler = Tensor::full([padding, c, h, w], -1.0, (Kind::Float, images.device()));
        batch = Tensor::cat(&[batch, filler], 0);
    }

    let grid = batch
        .view([rows, cols, c, h, w])
        .permute([2, 0, 3, 1, 4])
        .reshape([c, rows * h, cols * w]);

    // [-1, 1] -> [0, 255]
    Ok(((grid + 1.0) * 127.5).clamp(0.0, 255.0).to_kind(Kind::Uint8))
}

/// Render a batch as a grid image file.
pub fn save_image_grid(images: &Tensor, path: &str) -> Result<()> {
    let grid = tile_images(images)?;
    tch_image::save(&grid, path).with_context(|| format!("cannot write sample grid to {path}"))?;
    Ok(())
}
