//! Per-request pipeline state machine.
//!
//! ```text
//! Received ─▶ Converted ─▶ PresentedForSigning ─▶ Composited ─▶ Persisted ─▶ Delivered
//!     └──────────┴───────────────┴────────────────────┴────────────┴──▶ Failed(stage, reason)
//! ```
//!
//! Presentation and signing arrive as two separate requests, so a signing
//! request starts its own machine at `PresentedForSigning` after re-resolving
//! the converted artifact from storage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Setup,
    Upload,
    Convert,
    Present,
    Compose,
    Persist,
    Deliver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Setup => "setup",
            Stage::Upload => "upload",
            Stage::Convert => "convert",
            Stage::Present => "present",
            Stage::Compose => "compose",
            Stage::Persist => "persist",
            Stage::Deliver => "deliver",
        };
        f.write_str(s)
    }
}

/// State of one request travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Converted,
    PresentedForSigning,
    Composited,
    Persisted,
    Delivered,
    Failed { stage: Stage, reason: String },
}

impl PipelineState {
    /// `Delivered` and `Failed` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Delivered | PipelineState::Failed { .. })
    }

    /// The only state that may follow this one on the success path.
    pub fn successor(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Received => Some(PipelineState::Converted),
            PipelineState::Converted => Some(PipelineState::PresentedForSigning),
            PipelineState::PresentedForSigning => Some(PipelineState::Composited),
            PipelineState::Composited => Some(PipelineState::Persisted),
            PipelineState::Persisted => Some(PipelineState::Delivered),
            PipelineState::Delivered | PipelineState::Failed { .. } => None,
        }
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_advance_to(&self, next: &PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PipelineState::Failed { .. } => true,
            other => self.successor().as_ref() == Some(other),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Received => f.write_str("received"),
            PipelineState::Converted => f.write_str("converted"),
            PipelineState::PresentedForSigning => f.write_str("presented-for-signing"),
            PipelineState::Composited => f.write_str("composited"),
            PipelineState::Persisted => f.write_str("persisted"),
            PipelineState::Delivered => f.write_str("delivered"),
            PipelineState::Failed { stage, reason } => write!(f, "failed({stage}: {reason})"),
        }
    }
}
