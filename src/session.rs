//! Session controller: the single owner of every persistent array.
//!
//! Frames and control commands both mutate the session, and only through
//! the methods here. Nothing else holds the weights, the carried reservoir
//! state or the running statistics.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EsnConfig;
use crate::error::{LinkError, Result};
use crate::matrix::Matrix;
use crate::parse::{self, Parsed};
use crate::reservoir;
use crate::rls::RlsTrainer;
use crate::tag::FrameTag;
use crate::Frame;

bitflags::bitflags! {
    /// Items installed so far.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ready: u8 {
        const W_IN = 1 << 0;
        const W_X = 1 << 1;
        const W_OUT = 1 << 2;
        const DATA_OUT = 1 << 3;
    }
}

/// Running error statistics, cleared only by a reset.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// Sum of per-sample mean squared errors.
    pub cumulative_squared_error: f64,
    /// Samples that had a target.
    pub cumulative_sample_count: usize,
    /// Samples run since the last reset; index of the next sample.
    pub total_samples_processed: usize,
}

impl SessionStats {
    pub fn mse(&self) -> Option<f64> {
        (self.cumulative_sample_count > 0)
            .then(|| self.cumulative_squared_error / self.cumulative_sample_count as f64)
    }

    pub fn mse_db(&self) -> Option<f64> {
        self.mse().map(to_db)
    }
}

/// Outcome of one `run`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub samples: usize,
    /// Samples that had a target and were scored.
    pub compared: usize,
    pub batch_mse: Option<f64>,
    pub batch_mse_db: Option<f64>,
    /// Training updates skipped for numerical instability.
    pub unstable_updates: usize,
    /// Readout for every sample, `samples x outputs`, row-major.
    pub outputs: Vec<f32>,
    pub cumulative: SessionStats,
}

/// What a frame did to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    /// A weight matrix was replaced.
    Installed(FrameTag),
    /// Targets were replaced with this many rows.
    Targets { samples: usize },
    /// Input rows were queued for a later `run`.
    Queued { samples: usize },
    Ran(RunReport),
}

fn to_db(mse: f64) -> f64 {
    10.0 * mse.log10()
}

pub struct Session {
    config: EsnConfig,
    w_in: Matrix,
    w_x: Matrix,
    trainer: RlsTrainer,
    ready: Ready,
    /// Carried reservoir state.
    state: Vec<f32>,
    /// Ground truth, `rows x outputs`, indexed by absolute sample index.
    targets: Vec<f32>,
    /// Input rows waiting for `run_pending`.
    pending: Vec<f32>,
    stats: SessionStats,
}

impl Session {
    pub fn new(config: EsnConfig) -> Result<Self> {
        config.validate()?;
        let mut trainer =
            RlsTrainer::new(config.outputs, config.extended(), config.forgetting_factor);
        if config.training {
            trainer.enable();
        }
        Ok(Self {
            w_in: Matrix::zeros(config.neurons, config.inputs),
            w_x: Matrix::zeros(config.neurons, config.neurons),
            trainer,
            ready: Ready::empty(),
            state: vec![0.0; config.neurons],
            targets: Vec::new(),
            pending: Vec::new(),
            stats: SessionStats::default(),
            config,
        })
    }

    /// Parse a reassembled frame and apply it.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<Applied> {
        let Some(tag) = frame.kind() else {
            let text = frame.header.tag_text();
            warn!(tag = %text, size = frame.payload.len(), "unrecognized frame discarded");
            return Err(LinkError::UnrecognizedTag(text));
        };
        let parsed = parse::parse(&frame.payload, self.capacity(tag));
        debug!(tag = tag.name(), parsed = parsed.count(), "payload parsed");
        self.install(tag, &parsed)
    }

    /// Most values a frame of `tag` may carry.
    pub fn capacity(&self, tag: FrameTag) -> usize {
        let (rows, cols) = self.shape(tag);
        rows * cols
    }

    /// Apply parsed values for `tag`.
    ///
    /// Matrices are replaced only when exactly the expected number of values
    /// was parsed; otherwise the previous contents stay and
    /// `ParseCountMismatch` asks for a re-send. Sample frames must hold a
    /// whole, non-zero number of rows.
    pub fn install(&mut self, tag: FrameTag, parsed: &Parsed) -> Result<Applied> {
        match tag {
            FrameTag::WeightsIn | FrameTag::WeightsRes | FrameTag::WeightsOut => {
                let (rows, cols) = self.shape(tag);
                let matrix = Matrix::from_vec(rows, cols, self.exact(tag, parsed, rows * cols)?)
                    .ok_or_else(|| mismatch(tag, rows * cols, parsed.count()))?;
                match tag {
                    FrameTag::WeightsIn => {
                        self.w_in = matrix;
                        self.ready |= Ready::W_IN;
                    }
                    FrameTag::WeightsRes => {
                        self.w_x = matrix;
                        self.ready |= Ready::W_X;
                    }
                    _ => {
                        self.trainer.set_weights(matrix);
                        self.ready |= Ready::W_OUT;
                    }
                }
                info!(tag = tag.name(), rows, cols, "matrix installed");
                Ok(Applied::Installed(tag))
            }

            FrameTag::DataOut => {
                let values = self.rows_of(tag, parsed, self.config.outputs)?;
                let samples = values.len() / self.config.outputs;
                self.targets = values;
                self.ready |= Ready::DATA_OUT;
                info!(samples, "targets installed");
                Ok(Applied::Targets { samples })
            }

            FrameTag::DataIn => {
                let values = self.rows_of(tag, parsed, self.config.inputs)?;
                let capacity = self.config.max_input_samples;
                let queued = (self.pending.len() + values.len()) / self.config.inputs;
                if queued > capacity {
                    warn!(queued, capacity, "pending input buffer full, frame dropped");
                    return Err(LinkError::PendingOverflow { queued, capacity });
                }
                // samples left over from a refused run go first
                self.pending.extend_from_slice(&values);
                if self.config.run_on_data {
                    return self.run_pending().map(Applied::Ran);
                }
                let samples = self.pending_samples();
                debug!(samples, "input samples queued");
                Ok(Applied::Queued { samples })
            }
        }
    }

    /// Matrix shape for a weight tag; sample tags give their row bound.
    fn shape(&self, tag: FrameTag) -> (usize, usize) {
        let c = &self.config;
        match tag {
            FrameTag::WeightsIn => (c.neurons, c.inputs),
            FrameTag::WeightsRes => (c.neurons, c.neurons),
            FrameTag::WeightsOut => (c.outputs, c.extended()),
            FrameTag::DataIn => (c.max_input_samples, c.inputs),
            FrameTag::DataOut => (c.max_target_samples, c.outputs),
        }
    }

    // A truncated parse is reported as one value over capacity.
    fn exact(&self, tag: FrameTag, parsed: &Parsed, expected: usize) -> Result<Vec<f32>> {
        if parsed.truncated {
            return Err(mismatch(tag, expected, parsed.count() + 1));
        }
        if parsed.count() != expected {
            return Err(mismatch(tag, expected, parsed.count()));
        }
        Ok(parsed.values.clone())
    }

    fn rows_of(&self, tag: FrameTag, parsed: &Parsed, width: usize) -> Result<Vec<f32>> {
        let count = parsed.count();
        if parsed.truncated {
            return Err(mismatch(tag, count, count + 1));
        }
        if count == 0 || count % width != 0 {
            return Err(mismatch(tag, count.div_ceil(width).max(1) * width, count));
        }
        Ok(parsed.values.clone())
    }

    /// Items `run` still needs.
    ///
    /// `W_out` is only required while training is off; with training on the
    /// readout is learned from zero.
    pub fn missing(&self) -> Ready {
        let mut required = Ready::W_IN | Ready::W_X;
        if !self.trainer.is_enabled() {
            required |= Ready::W_OUT;
        }
        required.difference(self.ready)
    }

    /// Run `samples` (`N x inputs`, row-major) through the network in order.
    ///
    /// Each sample advances the carried reservoir state. Samples whose
    /// absolute index has a target are scored and, when training is on,
    /// fed to the RLS trainer.
    pub fn run(&mut self, samples: &[f32]) -> Result<RunReport> {
        let missing = self.missing();
        if !missing.is_empty() {
            warn!(?missing, "run refused, prerequisites missing");
            return Err(LinkError::MissingPrerequisite(missing));
        }
        let inputs = self.config.inputs;
        let outs = self.config.outputs;
        if samples.len() % inputs != 0 {
            let expected = samples.len().div_ceil(inputs) * inputs;
            return Err(mismatch(FrameTag::DataIn, expected, samples.len()));
        }

        let mut outputs = Vec::with_capacity(samples.len() / inputs * outs);
        let mut batch_error = 0.0f64;
        let mut compared = 0;
        let mut unstable_updates = 0;

        for input in samples.chunks_exact(inputs) {
            self.state = reservoir::update_state(&self.w_in, input, &self.w_x, &self.state);
            let z = reservoir::extend(input, &self.state);
            let y = reservoir::readout(self.trainer.weights(), &z);

            let index = self.stats.total_samples_processed;
            if let Some(target) = self.targets.get(index * outs..(index + 1) * outs) {
                let mse = sample_mse(&y, target);
                batch_error += mse;
                compared += 1;
                self.stats.cumulative_squared_error += mse;
                self.stats.cumulative_sample_count += 1;

                if let Err(e) = self.trainer.update(&z, target) {
                    debug!(sample = index, error = %e, "training update skipped");
                    unstable_updates += 1;
                }
            }

            outputs.extend_from_slice(&y);
            self.stats.total_samples_processed += 1;
        }

        let batch_mse = (compared > 0).then(|| batch_error / compared as f64);
        let report = RunReport {
            samples: samples.len() / inputs,
            compared,
            batch_mse,
            batch_mse_db: batch_mse.map(to_db),
            unstable_updates,
            outputs,
            cumulative: self.stats.clone(),
        };
        info!(
            samples = report.samples,
            compared,
            batch_mse = ?report.batch_mse,
            overall_mse = ?self.stats.mse(),
            total = self.stats.total_samples_processed,
            "batch processed"
        );
        Ok(report)
    }

    /// Run and drain the pending input buffer. On error the buffer is kept.
    pub fn run_pending(&mut self) -> Result<RunReport> {
        let samples = std::mem::take(&mut self.pending);
        match self.run(&samples) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.pending = samples;
                Err(e)
            }
        }
    }

    /// Zero every matrix, restore Ψ = I, clear state, targets, pending
    /// inputs, statistics and readiness, and disable training.
    pub fn reset_all(&mut self) {
        self.w_in.fill(0.0);
        self.w_x.fill(0.0);
        self.trainer.reset();
        self.ready = Ready::empty();
        self.state.fill(0.0);
        self.targets.clear();
        self.pending.clear();
        self.stats = SessionStats::default();
        info!("session reset");
    }

    /// Start a fresh input sequence, keeping installed matrices and targets.
    pub fn reset_inputs_only(&mut self) {
        self.pending.clear();
        self.state.fill(0.0);
        self.stats = SessionStats::default();
        info!("input sequence reset");
    }

    pub fn enable_training(&mut self) {
        self.trainer.enable();
        info!("training enabled");
    }

    pub fn disable_training(&mut self) {
        self.trainer.disable();
        info!("training disabled");
    }

    pub fn training_enabled(&self) -> bool {
        self.trainer.is_enabled()
    }

    pub fn config(&self) -> &EsnConfig {
        &self.config
    }

    pub fn ready(&self) -> Ready {
        self.ready
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn state(&self) -> &[f32] {
        &self.state
    }

    pub fn w_in(&self) -> &Matrix {
        &self.w_in
    }

    pub fn w_x(&self) -> &Matrix {
        &self.w_x
    }

    pub fn w_out(&self) -> &Matrix {
        self.trainer.weights()
    }

    pub fn psi(&self) -> &Matrix {
        self.trainer.psi()
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len() / self.config.inputs
    }

    pub fn target_samples(&self) -> usize {
        self.targets.len() / self.config.outputs
    }
}

fn mismatch(tag: FrameTag, expected: usize, parsed: usize) -> LinkError {
    warn!(tag = tag.name(), expected, parsed, "parse count mismatch, re-send required");
    LinkError::ParseCountMismatch {
        tag: tag.name(),
        expected,
        parsed,
    }
}

fn sample_mse(output: &[f32], target: &[f32]) -> f64 {
    let sum: f64 = output
        .iter()
        .zip(target)
        .map(|(y, t)| f64::from(t - y).powi(2))
        .sum();
    sum / output.len() as f64
}
