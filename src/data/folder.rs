//! Training-image discovery and loading
//!
//! Scans a dataset directory for files matching the configured filename
//! pattern and loads them as normalized image batches.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use tch::{vision::image as tch_image, Kind, Tensor};

/// A scanned set of training-image paths.
pub struct ImageFolder {
    dataset_name: String,
    files: Vec<PathBuf>,
    output_height: i64,
    output_width: i64,
}

impl ImageFolder {
    /// Scan `data_path/dataset_name` for files matching `pattern`.
    ///
    /// Fails if no file matches: training with an empty dataset is a
    /// configuration error, not something to discover mid-epoch.
    pub fn scan(
        data_path: &str,
        dataset_name: &str,
        pattern: &str,
        output_height: i64,
        output_width: i64,
    ) -> Result<Self> {
        let dir = Path::new(data_path).join(dataset_name);
        let suffix = pattern.trim_start_matches('*').to_lowercase();

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("cannot read dataset directory {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.to_lowercase().ends_with(&suffix))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            anyhow::bail!(
                "no files matching '{}' found in {}",
                pattern,
                dir.display()
            );
        }

        Ok(Self {
            dataset_name: dataset_name.to_string(),
            files,
            output_height,
            output_width,
        })
    }

    /// Number of training images
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Dataset name
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    /// All matched file paths
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Load one image as a (c, h, w) float tensor in [-1, 1].
    pub fn load_image(&self, path: &Path) -> Result<Tensor> {
        let image = tch_image::load(path)
            .with_context(|| format!("cannot load image {}", path.display()))?;
        let image = tch_image::resize(&image, self.output_width, self.output_height)
            .with_context(|| format!("cannot resize image {}", path.display()))?;
        Ok(image.to_kind(Kind::Float) / 127.5 - 1.0)
    }

    /// Draw a random batch of images, shape (batch_size, c, h, w).
    ///
    /// Unreadable files are skipped and redrawn so one corrupt image cannot
    /// stall the feeding pipeline.
    pub fn sample_batch(&self, rng: &mut impl Rng, batch_size: i64) -> Result<Tensor> {
        let mut images = Vec::with_capacity(batch_size as usize);
        let mut failures = 0usize;

        while images.len() < batch_size as usize {
            let idx = rng.gen_range(0..self.files.len());
            match self.load_image(&self.files[idx]) {
                Ok(image) => images.push(image),
                Err(err) => {
                    failures += 1;
                    tracing::warn!("skipping unreadable image: {err:#}");
                    if failures > 10 * batch_size as usize {
                        anyhow::bail!("too many unreadable images in dataset");
                    }
                }
            }
        }

        Ok(Tensor::stack(&images, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tch::Device;

    fn write_test_images(dir: &Path, count: usize) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            let image = (Tensor::rand([3, 16, 16], (Kind::Float, Device::Cpu)) * 255.0)
                .to_kind(Kind::Uint8);
            tch_image::save(&image, dir.join(format!("img_{i}.png"))).unwrap();
        }
    }

    #[test]
    fn test_scan_fails_on_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let result = ImageFolder::scan(
            tmp.path().to_str().unwrap(),
            "empty",
            "*.jpg",
            64,
            64,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_scan_and_sample_batch() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_images(&tmp.path().join("faces"), 3);

        let folder = ImageFolder::scan(
            tmp.path().to_str().unwrap(),
            "faces",
            "*.png",
            32,
            32,
        )
        .unwrap();
        assert_eq!(folder.len(), 3);

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let batch = folder.sample_batch(&mut rng, 4).unwrap();
        assert_eq!(batch.size(), vec![4, 3, 32, 32]);

        let min: f64 = batch.min().double_value(&[]);
        let max: f64 = batch.max().double_value(&[]);
        assert!(min >= -1.0 && max <= 1.0);
    }

    #[test]
    fn test_pattern_filters_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("mixed");
        write_test_images(&dir, 2);
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let folder = ImageFolder::scan(
            tmp.path().to_str().unwrap(),
            "mixed",
            "*.png",
            32,
            32,
        )
        .unwrap();
        assert_eq!(folder.len(), 2);
    }
}
