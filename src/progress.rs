//! Observer trait for pipeline state transitions.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::observer`] to follow each request
//! through its stages. The CLI drives a terminal spinner with it; a web host
//! could push the same events to a socket.
//!
//! # Example
//!
//! ```rust
//! use docsign::{PipelineConfig, PipelineObserver, PipelineState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     transitions: AtomicUsize,
//! }
//!
//! impl PipelineObserver for CountingObserver {
//!     fn on_transition(&self, _subject: &str, _from: &PipelineState, _to: &PipelineState) {
//!         self.transitions.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { transitions: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .observer(observer as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::state::{PipelineState, Stage};
use std::sync::Arc;

/// Called by the orchestrator as requests move through the pipeline.
///
/// Requests are independent and may run concurrently, so methods can be
/// called from several tasks at once. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// A stage is about to start work on `subject` (a document or artifact id).
    fn on_stage_start(&self, subject: &str, stage: Stage) {
        let _ = (subject, stage);
    }

    /// `subject` moved from `from` to `to`. Failures arrive here as
    /// transitions into [`PipelineState::Failed`].
    fn on_transition(&self, subject: &str, from: &PipelineState, to: &PipelineState) {
        let _ = (subject, from, to);
    }

    /// Delivery of a persisted document failed. The state stays `Persisted`.
    fn on_delivery_failed(&self, subject: &str, error: &str) {
        let _ = (subject, error);
    }
}

/// Observer that ignores everything. Used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type Observer = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl PipelineObserver for Recording {
        fn on_transition(&self, subject: &str, from: &PipelineState, to: &PipelineState) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{subject}: {from} -> {to}"));
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let obs: Observer = Arc::new(NoopObserver);
        obs.on_stage_start("a.docx", Stage::Convert);
        obs.on_transition("a.docx", &PipelineState::Received, &PipelineState::Converted);
        obs.on_delivery_failed("signed_a.docx.pdf", "relay down");
    }

    #[test]
    fn only_overridden_methods_fire() {
        let rec = Recording::default();
        rec.on_stage_start("a.docx", Stage::Convert);
        rec.on_transition("a.docx", &PipelineState::Received, &PipelineState::Converted);
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("a.docx: "));
    }
}
