//! Plateau learning-rate schedule.
//!
//! The rate is multiplied by `factor` once the monitored metric has failed to
//! improve for more than `patience` consecutive epochs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("factor should be in (0, 1), got {0}")]
    Factor(f64),
    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("initial learning rate must be positive, got {0}")]
    LearningRate(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateauMode {
    #[default]
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    #[default]
    Rel,
    Abs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlateauConfig {
    pub mode: PlateauMode,
    pub factor: f64,
    pub patience: usize,
    pub threshold: f64,
    pub threshold_mode: ThresholdMode,
    pub cooldown: usize,
    pub min_lr: f64,
    /// Reductions smaller than this are skipped.
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            mode: PlateauMode::Min,
            factor: 0.1,
            patience: 3,
            threshold: 1e-4,
            threshold_mode: ThresholdMode::Rel,
            cooldown: 0,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

impl PlateauConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !(self.factor > 0.0 && self.factor < 1.0) {
            return Err(SchedulerError::Factor(self.factor));
        }
        for (name, value) in [
            ("threshold", self.threshold),
            ("min_lr", self.min_lr),
            ("eps", self.eps),
        ] {
            if value < 0.0 || value.is_nan() {
                return Err(SchedulerError::Negative { name, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    lr: f64,
    /// None until the first metric arrives.
    best: Option<f64>,
    num_bad_epochs: usize,
    cooldown_counter: usize,
    last_epoch: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(config: PlateauConfig, initial_lr: f64) -> Result<Self, SchedulerError> {
        config.validate()?;
        if initial_lr.is_nan() || initial_lr <= 0.0 {
            return Err(SchedulerError::LearningRate(initial_lr));
        }
        Ok(Self {
            config,
            lr: initial_lr,
            best: None,
            num_bad_epochs: 0,
            cooldown_counter: 0,
            last_epoch: 0,
        })
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }

    pub fn in_cooldown(&self) -> bool {
        self.cooldown_counter > 0
    }

    pub fn config(&self) -> &PlateauConfig {
        &self.config
    }

    /// Records one epoch's metric and returns the learning rate to use next.
    pub fn step(&mut self, metric: f64) -> f64 {
        self.last_epoch += 1;
        if self.is_better(metric) {
            self.best = Some(metric);
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.in_cooldown() {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.config.patience {
            self.reduce_lr();
            self.cooldown_counter = self.config.cooldown;
            self.num_bad_epochs = 0;
        }
        self.lr
    }

    fn reduce_lr(&mut self) {
        let new_lr = (self.lr * self.config.factor).max(self.config.min_lr);
        if self.lr - new_lr > self.config.eps {
            log::info!(
                "epoch {}: reducing learning rate from {:.4e} to {:.4e}",
                self.last_epoch,
                self.lr,
                new_lr
            );
            self.lr = new_lr;
        }
    }

    // NaN never compares as better.
    fn is_better(&self, metric: f64) -> bool {
        if metric.is_nan() {
            return false;
        }
        let Some(best) = self.best else {
            return true;
        };
        let t = self.config.threshold;
        match (self.config.mode, self.config.threshold_mode) {
            (PlateauMode::Min, ThresholdMode::Rel) => metric < best * (1.0 - t),
            (PlateauMode::Min, ThresholdMode::Abs) => metric < best - t,
            (PlateauMode::Max, ThresholdMode::Rel) => metric > best * (1.0 + t),
            (PlateauMode::Max, ThresholdMode::Abs) => metric > best + t,
        }
    }
}
