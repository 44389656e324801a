use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LinkError, Result};
use crate::{HEADER_SIZE, MAX_FRAME_SIZE};

/// Network dimensions and protocol knobs.
///
/// Defaults match the board build: 40 inputs, 8 neurons, 4 outputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsnConfig {
    pub inputs: usize,
    pub neurons: usize,
    pub outputs: usize,
    /// RLS forgetting factor, in (0, 1].
    pub forgetting_factor: f32,
    /// Receive buffer capacity in bytes, header included.
    pub max_frame_size: usize,
    /// Byte-stream framing: every frame is closed by `<EOF>`.
    pub trailer: bool,
    pub max_target_samples: usize,
    pub max_input_samples: usize,
    /// Run `DATAIN__` samples as soon as their frame completes.
    pub run_on_data: bool,
    /// Training enabled when the session is created.
    pub training: bool,
}

impl Default for EsnConfig {
    fn default() -> Self {
        Self {
            inputs: 40,
            neurons: 8,
            outputs: 4,
            forgetting_factor: 0.999,
            max_frame_size: MAX_FRAME_SIZE,
            trailer: false,
            max_target_samples: 140,
            max_input_samples: 4096,
            run_on_data: true,
            training: false,
        }
    }
}

impl EsnConfig {
    pub fn new(inputs: usize, neurons: usize, outputs: usize) -> Self {
        Self {
            inputs,
            neurons,
            outputs,
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EsnConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs == 0 || self.neurons == 0 || self.outputs == 0 {
            return Err(LinkError::InvalidConfig(format!(
                "dimensions must be non-zero (inputs={}, neurons={}, outputs={})",
                self.inputs, self.neurons, self.outputs
            )));
        }
        if !(self.forgetting_factor > 0.0 && self.forgetting_factor <= 1.0) {
            return Err(LinkError::InvalidConfig(format!(
                "forgetting factor {} outside (0, 1]",
                self.forgetting_factor
            )));
        }
        if self.max_frame_size <= HEADER_SIZE {
            return Err(LinkError::InvalidConfig(format!(
                "frame size {} leaves no room for a payload",
                self.max_frame_size
            )));
        }
        Ok(())
    }

    /// Length of the extended vector `[state; input]`.
    pub fn extended(&self) -> usize {
        self.neurons + self.inputs
    }
}
