//! Keyword control channel.

use tracing::{info, warn};

use crate::error::Result;
use crate::session::{RunReport, Session};

/// Commands reachable from the control channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `RUN` or `ESN`: run the pending input samples.
    Run,
    /// `RESET`: clear everything.
    Reset,
    /// `RDI`: reset the input sequence only.
    ResetInputs,
    /// `TRN_ON`
    TrainingOn,
    /// `TRN_OFF`
    TrainingOff,
}

impl Command {
    /// Parse the first word of a control message. Keywords are
    /// case-sensitive.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        match word.trim_matches('\0') {
            "RUN" | "ESN" => Some(Command::Run),
            "RESET" => Some(Command::Reset),
            "RDI" => Some(Command::ResetInputs),
            "TRN_ON" => Some(Command::TrainingOn),
            "TRN_OFF" => Some(Command::TrainingOff),
            _ => None,
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        Self::parse(&String::from_utf8_lossy(raw))
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Command::Run => "RUN",
            Command::Reset => "RESET",
            Command::ResetInputs => "RDI",
            Command::TrainingOn => "TRN_ON",
            Command::TrainingOff => "TRN_OFF",
        }
    }
}

impl Session {
    /// Apply a control command. Only `Run` produces a report.
    pub fn execute(&mut self, command: Command) -> Result<Option<RunReport>> {
        info!(command = command.keyword(), "control command");
        match command {
            Command::Run => {
                if self.pending_samples() == 0 {
                    warn!("run requested with no pending input samples");
                }
                self.run_pending().map(Some)
            }
            Command::Reset => {
                self.reset_all();
                Ok(None)
            }
            Command::ResetInputs => {
                self.reset_inputs_only();
                Ok(None)
            }
            Command::TrainingOn => {
                self.enable_training();
                Ok(None)
            }
            Command::TrainingOff => {
                self.disable_training();
                Ok(None)
            }
        }
    }
}
