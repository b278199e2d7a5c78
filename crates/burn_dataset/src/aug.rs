//! Image transform pipeline: resize, random horizontal flip, to-tensor, normalise.

use crate::types::{BurnDatasetError, DatasetResult, DatasetSample, SampleIndex};
use image::imageops::FilterType;
use rand::{Rng, SeedableRng};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Resize all images to this (width, height). If None, images must already share shape.
    pub target_size: Option<(u32, u32)>,
    /// Probability of applying a horizontal flip augmentation.
    pub flip_horizontal_prob: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Shuffle samples before each epoch.
    pub shuffle: bool,
    /// Seed for reproducible shuffling and flips.
    pub seed: Option<u64>,
    /// Drop the last partial batch.
    pub drop_last: bool,
    /// Skip unreadable images instead of failing the batch.
    pub permissive_errors: bool,
    /// Optional transform pipeline override; if None, built from other fields.
    pub transform: Option<TransformPipeline>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            target_size: Some((224, 224)),
            flip_horizontal_prob: 0.5,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            shuffle: true,
            seed: None,
            drop_last: false,
            permissive_errors: false,
            transform: None,
        }
    }
}

impl DatasetConfig {
    /// Same geometry and normalisation, without augmentation or shuffling.
    pub fn for_validation(&self) -> Self {
        Self {
            flip_horizontal_prob: 0.0,
            shuffle: false,
            drop_last: false,
            transform: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub target_size: Option<(u32, u32)>,
    pub flip_horizontal_prob: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub seed: Option<u64>,
}

impl TransformPipeline {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            target_size: cfg.target_size,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            mean: cfg.mean,
            std: cfg.std,
            seed: cfg.seed,
        }
    }

    pub fn describe(&self) -> String {
        let ts = self
            .target_size
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "target_size={} flip_p={:.2} mean={:?} std={:?} seed={}",
            ts,
            self.flip_horizontal_prob,
            self.mean,
            self.std,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Decodes `idx.image_path` and applies the pipeline.
    ///
    /// `salt` varies the flip decision between epochs when a seed is set.
    pub fn load(&self, idx: &SampleIndex, salt: u64) -> DatasetResult<DatasetSample> {
        let img = image::open(&idx.image_path)
            .map_err(|source| BurnDatasetError::Image {
                path: idx.image_path.clone(),
                source,
            })?
            .to_rgb8();
        Ok(self.apply(img, idx, salt))
    }

    pub fn apply(&self, img: image::RgbImage, idx: &SampleIndex, salt: u64) -> DatasetSample {
        // Seeded if provided (per-sample deterministic), else thread-local.
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(seed ^ salt);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let mut img = match self.target_size {
            Some((w, h)) if img.dimensions() != (w, h) => {
                image::imageops::resize(&img, w, h, FilterType::Triangle)
            }
            _ => img,
        };
        maybe_hflip(&mut img, self.flip_horizontal_prob, rng);

        let (width, height) = img.dimensions();
        DatasetSample {
            image_name: idx.image_name.clone(),
            image_chw: to_chw_normalized(&img, self.mean, self.std),
            width,
            height,
            target: idx.target.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline::from_config(&DatasetConfig::default()),
        }
    }
    pub fn target_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.inner.target_size = size;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn normalize(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.inner.mean = mean;
        self.inner.std = std;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

pub(crate) fn maybe_hflip(img: &mut image::RgbImage, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
    }
}

fn to_chw_normalized(img: &image::RgbImage, mean: [f32; 3], std: [f32; 3]) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut chw = vec![0.0f32; 3 * plane];
    for (i, px) in img.pixels().enumerate() {
        for c in 0..3 {
            let v = px[c] as f32 / 255.0;
            chw[c * plane + i] = (v - mean[c]) / std[c];
        }
    }
    chw
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn index() -> SampleIndex {
        SampleIndex {
            image_name: "sample".to_string(),
            image_path: PathBuf::from("sample.png"),
            target: vec![1.0, 0.0],
        }
    }

    #[test]
    fn hflip_mirrors_columns() {
        let mut img = image::RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        maybe_hflip(&mut img, 1.0, &mut rng);
        assert_eq!(img.get_pixel(1, 0), &image::Rgb([255, 0, 0]));
        assert_eq!(img.get_pixel(0, 0), &image::Rgb([0, 0, 0]));
    }

    #[test]
    fn normalisation_is_channel_major() {
        let pipeline = TransformPipelineBuilder::new()
            .target_size(None)
            .flip_horizontal_prob(0.0)
            .normalize([0.0; 3], [1.0; 3])
            .build();
        let mut img = image::RgbImage::new(2, 2);
        for px in img.pixels_mut() {
            *px = image::Rgb([255, 0, 51]);
        }
        let sample = pipeline.apply(img, &index(), 0);
        assert_eq!(sample.image_chw.len(), 12);
        assert!(sample.image_chw[..4].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(sample.image_chw[4..8].iter().all(|v| v.abs() < 1e-6));
        assert!(sample.image_chw[8..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
        assert_eq!(sample.target, vec![1.0, 0.0]);
    }

    #[test]
    fn resizes_to_target() {
        let pipeline = TransformPipelineBuilder::new()
            .target_size(Some((8, 6)))
            .build();
        let sample = pipeline.apply(image::RgbImage::new(20, 10), &index(), 0);
        assert_eq!((sample.width, sample.height), (8, 6));
        assert_eq!(sample.image_chw.len(), 3 * 8 * 6);
    }

    #[test]
    fn validation_config_disables_augmentation() {
        let cfg = DatasetConfig {
            seed: Some(7),
            ..Default::default()
        }
        .for_validation();
        assert_eq!(cfg.flip_horizontal_prob, 0.0);
        assert!(!cfg.shuffle);
        assert_eq!(cfg.seed, Some(7));
    }
}
