use std::{
    fmt::Display,
    time::{Duration, Instant},
};

#[cfg(feature = "serde")]
use std::{fs::File, io::Write, path::Path};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ndarray::{Array1, Array4};
use rand::seq::SliceRandom;
use rand::thread_rng;
use rayon::prelude::*;

use crate::model::NN_UNITS;
use crate::znn::cost::{softmax_cross_entropy_grad, sparse_cross_entropy};
use crate::znn::{Adam, Network};

// ============================================================
// Fit
// ============================================================

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of the samples held out for validation.
    pub validation_split: f32,
    /// Epochs without a training-loss improvement before stopping.
    pub patience: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 2 * NN_UNITS,
            validation_split: 0.15,
            patience: 5,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default)]
pub struct TrainingHistory {
    pub train_loss: Vec<f32>,
    pub train_accuracy: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub val_accuracy: Vec<f32>,
    /// Epoch index that triggered early stopping, if it fired.
    pub stopped_epoch: Option<usize>,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub elapsed: Duration,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.train_loss.len()
    }
}

#[cfg(feature = "serde")]
impl TrainingHistory {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), anyhow::Error> {
        let mut file = File::create(path.as_ref())?;
        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

struct EarlyStopping {
    best_loss: f32,
    wait: usize,
    patience: usize,
}

impl EarlyStopping {
    fn new(patience: usize) -> Self {
        Self {
            best_loss: f32::INFINITY,
            wait: 0,
            patience,
        }
    }

    /// Feed one epoch's monitored loss; true means stop now.
    fn update(&mut self, loss: f32) -> bool {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Splits `num_samples` the way the trainer does: the trailing
/// `split` fraction validates, the leading remainder trains.
fn validation_partition(num_samples: usize, split: f32) -> (usize, usize) {
    let num_train = (num_samples as f32 * (1.0 - split)) as usize;
    (num_train, num_samples - num_train)
}

/// Copies the sample-major tensor into one flat buffer of
/// `sample_len`-sized rows.
fn flatten_samples(x: &Array4<f32>) -> (Vec<f32>, usize) {
    let shape = x.shape();
    let sample_len = shape[1] * shape[2] * shape[3];
    (x.iter().copied().collect(), sample_len)
}

fn eval_indices(
    nn: &Network,
    inputs: &[f32],
    sample_len: usize,
    labels: &Array1<u8>,
    start: usize,
    end: usize,
) -> (f64, usize) {
    (start..end)
        .into_par_iter()
        .map(|i| {
            let sample = &inputs[i * sample_len..(i + 1) * sample_len];
            let probs = nn.forward(sample);
            let label = labels[i] as usize;
            let loss = sparse_cross_entropy(&probs, label) as f64;
            (loss, (argmax(&probs) == label) as usize)
        })
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
}

/// Mini-batch gradient descent with Adam over the leading
/// training fraction of `x`/`y`, validating on the trailing
/// fraction after every epoch. Early stopping watches the
/// training loss. Prints the total wall-clock time when done.
pub fn fit(nn: &mut Network, x: &Array4<f32>, y: &Array1<u8>, config: &FitConfig) -> TrainingHistory {
    let num_samples = x.shape()[0];
    assert_eq!(num_samples, y.len(), "image/label count mismatch");
    assert!(config.epochs > 0, "epochs must be > 0");
    assert!(config.batch_size > 0, "batch_size must be > 0");
    assert!(
        (0.0..1.0).contains(&config.validation_split),
        "validation_split must be in [0, 1)"
    );

    let (inputs, sample_len) = flatten_samples(x);
    assert_eq!(
        sample_len, nn.num_inputs,
        "network expects {} inputs, samples have {}",
        nn.num_inputs, sample_len
    );

    let (num_train, num_val) = validation_partition(num_samples, config.validation_split);
    assert!(num_train > 0, "no samples left to train on");
    log::info!(
        "fit: {} training samples, {} validation samples, batch size {}",
        num_train,
        num_val,
        config.batch_size
    );

    let mut optimizer = Adam::default();
    let mut stopper = EarlyStopping::new(config.patience);
    let mut history = TrainingHistory::default();
    let mut order: Vec<usize> = (0..num_train).collect();
    let start = Instant::now();

    for epoch in 0..config.epochs {
        order.shuffle(&mut thread_rng());

        let mut loss_sum = 0.0f64;
        let mut num_correct = 0usize;
        for batch in order.chunks(config.batch_size) {
            for &i in batch {
                let sample = &inputs[i * sample_len..(i + 1) * sample_len];
                let label = y[i] as usize;
                let probs = nn.forward_train(sample);
                loss_sum += sparse_cross_entropy(&probs, label) as f64;
                if argmax(&probs) == label {
                    num_correct += 1;
                }
                nn.backward(softmax_cross_entropy_grad(&probs, label));
            }
            nn.scale_gradients(1.0 / batch.len() as f32);
            optimizer.step(nn.parameters_mut());
            nn.zero_gradients();
        }

        let train_loss = (loss_sum / num_train as f64) as f32;
        let train_accuracy = num_correct as f32 / num_train as f32;
        history.train_loss.push(train_loss);
        history.train_accuracy.push(train_accuracy);

        if num_val > 0 {
            let (val_loss_sum, val_correct) =
                eval_indices(nn, &inputs, sample_len, y, num_train, num_samples);
            let val_loss = (val_loss_sum / num_val as f64) as f32;
            let val_accuracy = val_correct as f32 / num_val as f32;
            history.val_loss.push(val_loss);
            history.val_accuracy.push(val_accuracy);
            log::info!(
                "epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                epoch + 1,
                config.epochs,
                train_loss,
                train_accuracy,
                val_loss,
                val_accuracy
            );
        } else {
            log::info!(
                "epoch {}/{} - loss: {:.4} - accuracy: {:.4}",
                epoch + 1,
                config.epochs,
                train_loss,
                train_accuracy
            );
        }

        if stopper.update(train_loss) {
            log::info!(
                "early stopping: no training loss improvement in {} epochs",
                stopper.wait
            );
            history.stopped_epoch = Some(epoch);
            break;
        }
    }

    history.elapsed = start.elapsed();
    println!(
        "Time for {} epochs: {:.2}ms",
        config.epochs,
        history.elapsed.as_secs_f64() * 1000.0
    );
    history
}

// ============================================================
// Evaluate
// ============================================================

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug)]
pub struct EvalReport {
    pub loss: f32,
    pub accuracy: f32,
    pub num_correct: usize,
    pub num_samples: usize,
}

impl Display for EvalReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} samples - loss: {:.4} - accuracy: {:.4}",
            self.num_samples, self.loss, self.accuracy
        )
    }
}

/// Inference pass over a whole split, in parallel. Prints the
/// summary line and returns it.
pub fn evaluate(nn: &Network, x: &Array4<f32>, y: &Array1<u8>) -> EvalReport {
    let num_samples = x.shape()[0];
    assert_eq!(num_samples, y.len(), "image/label count mismatch");
    assert!(num_samples > 0, "evaluate needs at least one sample");

    let (inputs, sample_len) = flatten_samples(x);
    assert_eq!(
        sample_len, nn.num_inputs,
        "network expects {} inputs, samples have {}",
        nn.num_inputs, sample_len
    );

    let (loss_sum, num_correct) = eval_indices(nn, &inputs, sample_len, y, 0, num_samples);
    let report = EvalReport {
        loss: (loss_sum / num_samples as f64) as f32,
        accuracy: num_correct as f32 / num_samples as f32,
        num_correct,
        num_samples,
    };
    println!("{}", report);
    report
}
