// Training boundary
//
// The network and optimiser live outside this crate. A `Classifier` takes a
// batch and reports loss plus correct predictions; `Trainer` runs epochs,
// logs progress and keeps the best test accuracy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::TRAIN_LOG_EVERY;
use crate::error::Result;
use crate::loader::{Batch, DataLoader, SampleSource};

/// Outcome of one forward (and, when training, backward) pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepResult {
    /// Mean loss over the batch
    pub loss: f64,
    pub correct: usize,
    pub total: usize,
}

pub trait Classifier {
    fn train_step(&mut self, batch: &Batch) -> Result<StepResult>;

    fn eval_step(&mut self, batch: &Batch) -> Result<StepResult>;

    /// Persist weights; called when test accuracy improves.
    fn save_checkpoint(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochMetrics {
    pub epoch: u64,
    /// Mean of per-batch losses
    pub loss: f64,
    /// Percent of correct predictions
    pub accuracy: f64,
    pub samples: usize,
    pub placeholders: usize,
}

#[derive(Default)]
struct Accumulator {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    total: usize,
    placeholders: usize,
}

impl Accumulator {
    fn add(&mut self, step: &StepResult, batch: &Batch) {
        self.loss_sum += step.loss;
        self.batches += 1;
        self.correct += step.correct;
        self.total += step.total;
        self.placeholders += batch.placeholders;
    }

    fn finish(self, epoch: u64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            loss: if self.batches == 0 { 0.0 } else { self.loss_sum / self.batches as f64 },
            accuracy: if self.total == 0 { 0.0 } else { 100.0 * self.correct as f64 / self.total as f64 },
            samples: self.total,
            placeholders: self.placeholders,
        }
    }
}

pub struct Trainer<C: Classifier> {
    model: C,
    log_every: usize,
    checkpoint_path: Option<PathBuf>,
    best_accuracy: f64,
    history: Vec<(EpochMetrics, EpochMetrics)>,
}

impl<C: Classifier> Trainer<C> {
    pub fn new(model: C) -> Self {
        Self {
            model,
            log_every: TRAIN_LOG_EVERY,
            checkpoint_path: None,
            best_accuracy: 0.0,
            history: Vec::new(),
        }
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_log_every(mut self, batches: usize) -> Self {
        self.log_every = batches.max(1);
        self
    }

    pub fn model(&self) -> &C {
        &self.model
    }

    pub fn into_model(self) -> C {
        self.model
    }

    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy
    }

    /// (train, test) metrics of every completed `fit` epoch.
    pub fn history(&self) -> &[(EpochMetrics, EpochMetrics)] {
        &self.history
    }

    pub fn train_epoch<S: SampleSource>(&mut self, loader: &DataLoader<'_, S>, epoch: u64) -> Result<EpochMetrics> {
        let mut acc = Accumulator::default();
        for (i, batch) in loader.epoch(epoch).enumerate() {
            let batch = batch?;
            let step = self.model.train_step(&batch)?;
            acc.add(&step, &batch);
            if (i + 1) % self.log_every == 0 {
                log::info!("Epoch {}, Batch {}, Loss: {:.4}", epoch + 1, i + 1, step.loss);
            }
        }
        let metrics = acc.finish(epoch);
        log::info!(
            "Epoch {}: train loss {:.4}, train accuracy {:.2}%",
            epoch + 1,
            metrics.loss,
            metrics.accuracy
        );
        Ok(metrics)
    }

    pub fn evaluate<S: SampleSource>(&mut self, loader: &DataLoader<'_, S>, epoch: u64) -> Result<EpochMetrics> {
        let mut acc = Accumulator::default();
        for batch in loader.epoch(epoch) {
            let batch = batch?;
            let step = self.model.eval_step(&batch)?;
            acc.add(&step, &batch);
        }
        let metrics = acc.finish(epoch);
        log::info!(
            "Epoch {}: test loss {:.4}, test accuracy {:.2}%",
            epoch + 1,
            metrics.loss,
            metrics.accuracy
        );
        Ok(metrics)
    }

    /// Train for `epochs`, evaluating after each and checkpointing on a new
    /// best test accuracy. Returns the best accuracy.
    pub fn fit<S: SampleSource, T: SampleSource>(
        &mut self,
        train: &DataLoader<'_, S>,
        test: &DataLoader<'_, T>,
        epochs: u64,
    ) -> Result<f64> {
        for epoch in 0..epochs {
            let train_metrics = self.train_epoch(train, epoch)?;
            let test_metrics = self.evaluate(test, epoch)?;

            if test_metrics.accuracy > self.best_accuracy {
                self.best_accuracy = test_metrics.accuracy;
                if let Some(path) = &self.checkpoint_path {
                    self.model.save_checkpoint(path)?;
                    log::info!(
                        "Saved new best model with accuracy: {:.2}% to {}",
                        self.best_accuracy,
                        path.display()
                    );
                }
            }
            self.history.push((train_metrics, test_metrics));
        }
        log::info!("Training complete! Best accuracy: {:.2}%", self.best_accuracy);
        Ok(self.best_accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Label, ManifestEntry};
    use crate::loader::{FaceDataset, MatchMode, TransformPipeline};
    use std::cell::Cell;
    use tempfile::TempDir;

    /// Always predicts "real"; counts steps.
    struct AlwaysReal {
        train_steps: usize,
        saves: Cell<usize>,
    }

    impl AlwaysReal {
        fn step(batch: &Batch) -> StepResult {
            let correct = batch.labels.iter().filter(|&&l| l == 0).count();
            StepResult { loss: 0.5, correct, total: batch.len() }
        }
    }

    impl Classifier for AlwaysReal {
        fn train_step(&mut self, batch: &Batch) -> Result<StepResult> {
            self.train_steps += 1;
            assert_eq!(batch.images.shape()[1..], [3, 224, 224]);
            Ok(Self::step(batch))
        }

        fn eval_step(&mut self, batch: &Batch) -> Result<StepResult> {
            Ok(Self::step(batch))
        }

        fn save_checkpoint(&self, path: &Path) -> Result<()> {
            self.saves.set(self.saves.get() + 1);
            std::fs::write(path, b"weights")?;
            Ok(())
        }
    }

    fn dataset(tmp: &TempDir, reals: usize, fakes: usize) -> FaceDataset {
        let mut entries = Vec::new();
        for i in 0..reals {
            entries.push(ManifestEntry::new(tmp.path().join(format!("original/{}.mp4", i)), Label::Real));
        }
        for i in 0..fakes {
            entries.push(ManifestEntry::new(tmp.path().join(format!("Deepfakes/{}.mp4", i)), Label::Fake));
        }
        FaceDataset::new(entries, tmp.path(), TransformPipeline::eval_default(), MatchMode::Substring).unwrap()
    }

    #[test]
    fn test_fit_tracks_best_and_checkpoints_once() {
        let tmp = TempDir::new().unwrap();
        let train_ds = dataset(&tmp, 5, 3);
        let test_ds = dataset(&tmp, 2, 2);
        let train = DataLoader::new(&train_ds, 3).unwrap().shuffled(1);
        let test = DataLoader::new(&test_ds, 3).unwrap();
        let ckpt = tmp.path().join("best_model.bin");

        let mut trainer = Trainer::new(AlwaysReal { train_steps: 0, saves: Cell::new(0) })
            .with_checkpoint(&ckpt)
            .with_log_every(1);
        let best = trainer.fit(&train, &test, 2).unwrap();

        assert!((best - 50.0).abs() < 1e-9);
        assert_eq!(trainer.history().len(), 2);
        assert_eq!(trainer.history()[0].0.samples, 8);
        assert!((trainer.history()[0].0.accuracy - 62.5).abs() < 1e-9);
        assert_eq!(trainer.history()[0].1.placeholders, 4);
        assert!(ckpt.exists());

        let model = trainer.into_model();
        assert_eq!(model.train_steps, 6);
        assert_eq!(model.saves.get(), 1);
    }
}
