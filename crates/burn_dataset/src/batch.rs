//! Batch iteration for training and validation.

use crate::aug::{DatasetConfig, TransformPipeline};
use crate::types::{BurnDatasetError, DatasetResult, DatasetSample, SampleIndex};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

pub struct MultiLabelBatch<B: Backend> {
    /// `[N, 3, H, W]`, normalised.
    pub images: Tensor<B, 4>,
    /// `[N, C]` multi-hot targets.
    pub targets: Tensor<B, 2>,
    pub names: Vec<String>,
}

impl<B: Backend> MultiLabelBatch<B> {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Owns the sample list; hands out one `BatchIter` per epoch.
#[derive(Debug, Clone)]
pub struct MultiLabelLoader {
    indices: Vec<SampleIndex>,
    cfg: DatasetConfig,
    pipeline: TransformPipeline,
    num_classes: usize,
    log_every_samples: Option<usize>,
}

impl MultiLabelLoader {
    pub fn new(
        indices: Vec<SampleIndex>,
        num_classes: usize,
        cfg: DatasetConfig,
    ) -> DatasetResult<Self> {
        if let Some(bad) = indices
            .iter()
            .find(|idx| !idx.target.is_empty() && idx.target.len() != num_classes)
        {
            return Err(BurnDatasetError::Other(format!(
                "sample {} has {} targets, expected {}",
                bad.image_name,
                bad.target.len(),
                num_classes
            )));
        }
        let pipeline = cfg
            .transform
            .clone()
            .unwrap_or_else(|| TransformPipeline::from_config(&cfg));
        Ok(Self {
            indices,
            cfg,
            pipeline,
            num_classes,
            log_every_samples: log_every_from_env(),
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.cfg
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        if self.cfg.drop_last {
            self.indices.len() / batch_size
        } else {
            self.indices.len().div_ceil(batch_size)
        }
    }

    /// Iterator over one epoch. Shuffles when the config asks for it.
    pub fn iter(&self, epoch: usize) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.indices.len()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        let now = Instant::now();
        BatchIter {
            loader: self,
            order,
            cursor: 0,
            epoch,
            processed_samples: 0,
            processed_batches: 0,
            skipped_errors: 0,
            started: now,
            total_load_time: Duration::ZERO,
            last_logged_samples: 0,
            images_buf: Vec::new(),
            targets_buf: Vec::new(),
        }
    }
}

fn log_every_from_env() -> Option<usize> {
    match std::env::var("BURN_DATASET_LOG_EVERY") {
        Ok(val) => {
            if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                None
            } else {
                val.trim().parse::<usize>().ok().filter(|v| *v > 0)
            }
        }
        Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
    }
}

pub struct BatchIter<'a> {
    loader: &'a MultiLabelLoader,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    processed_samples: usize,
    processed_batches: usize,
    skipped_errors: usize,
    started: Instant,
    total_load_time: Duration,
    last_logged_samples: usize,
    images_buf: Vec<f32>,
    targets_buf: Vec<f32>,
}

impl BatchIter<'_> {
    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    pub fn skipped_errors(&self) -> usize {
        self.skipped_errors
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<MultiLabelBatch<B>>> {
        let batch_size = batch_size.max(1);
        let loader = self.loader;
        loop {
            if self.cursor >= self.order.len() {
                return Ok(None);
            }
            let end = (self.cursor + batch_size).min(self.order.len());
            if loader.cfg.drop_last && end - self.cursor < batch_size {
                self.cursor = self.order.len();
                return Ok(None);
            }
            let slice = &self.order[self.cursor..end];
            self.cursor = end;

            let salt_base = (self.epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let t_load = Instant::now();
            let loaded: Vec<(usize, DatasetResult<DatasetSample>)> = slice
                .par_iter()
                .map(|&i| {
                    let idx = &loader.indices[i];
                    (i, loader.pipeline.load(idx, salt_base ^ i as u64))
                })
                .collect();
            self.total_load_time += t_load.elapsed();

            self.images_buf.clear();
            self.targets_buf.clear();
            let mut names = Vec::with_capacity(loaded.len());
            let mut expected_size: Option<(u32, u32)> = None;

            for (i, res) in loaded {
                let sample = match res {
                    Ok(s) => s,
                    Err(e) if loader.cfg.permissive_errors => {
                        log::warn!(
                            "skipping {}: {e}",
                            loader.indices[i].image_path.display()
                        );
                        self.skipped_errors += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let size = (sample.width, sample.height);
                match expected_size {
                    None => expected_size = Some(size),
                    Some(sz) if sz != size => {
                        return Err(BurnDatasetError::Other(format!(
                            "batch contains varying image sizes ({}x{} vs {}x{} at {}); set a target_size to force consistency",
                            sz.0, sz.1, size.0, size.1, sample.image_name
                        )));
                    }
                    _ => {}
                }

                self.images_buf.extend_from_slice(&sample.image_chw);
                if sample.target.is_empty() {
                    self.targets_buf
                        .extend(std::iter::repeat_n(0.0, loader.num_classes));
                } else {
                    self.targets_buf.extend_from_slice(&sample.target);
                }
                names.push(sample.image_name);
            }

            let Some((width, height)) = expected_size else {
                // Every sample in this slice was skipped.
                continue;
            };
            let batch_len = names.len();
            let images = Tensor::<B, 1>::from_floats(self.images_buf.as_slice(), device)
                .reshape([batch_len, 3, height as usize, width as usize]);
            let targets = Tensor::<B, 1>::from_floats(self.targets_buf.as_slice(), device)
                .reshape([batch_len, loader.num_classes]);

            self.processed_samples += batch_len;
            self.processed_batches += 1;
            self.maybe_log_progress();

            return Ok(Some(MultiLabelBatch {
                images,
                targets,
                names,
            }));
        }
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.loader.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < threshold {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms =
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches.max(1) as f64;
        log::info!(
            "[dataset] epoch={} batches={} samples={}/{} skipped_errors={} elapsed={:.1}s rate={:.1} img/s avg_load_ms={:.2}",
            self.epoch,
            self.processed_batches,
            self.processed_samples,
            self.order.len(),
            self.skipped_errors,
            secs,
            self.processed_samples as f32 / secs,
            avg_load_ms
        );
        self.last_logged_samples = self.processed_samples;
    }
}
