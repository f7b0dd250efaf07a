//! Format converter abstraction and strategy selection.
//!
//! Three interchangeable strategies turn an uploaded word-processor document
//! into something a signature can be placed on:
//!
//! | Strategy | Implementation | Result |
//! |----------|----------------|--------|
//! | [`ConverterStrategy::NativeEngine`] | [`NativeEngineConverter`] | PDF, full fidelity |
//! | [`ConverterStrategy::TextReflow`] | [`TextReflowConverter`] | PDF, text only |
//! | [`ConverterStrategy::NativeRoundTrip`] | [`RoundTripConverter`] | the original DOCX |
//!
//! The strategy is picked once from configuration; the orchestrator only ever
//! sees `Arc<dyn FormatConverter>`.

use crate::config::{ConverterStrategy, PipelineConfig};
use crate::document::{ConversionResult, Fidelity, SourceDocument};
use crate::error::ConversionError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use crate::pipeline::engine::NativeEngineConverter;
pub use crate::pipeline::reflow::TextReflowConverter;
pub use crate::pipeline::roundtrip::RoundTripConverter;

/// Turns a [`SourceDocument`] into a signable [`ConversionResult`].
///
/// Implementations must be safe to share across concurrent requests.
pub trait FormatConverter: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// The fidelity this converter produces on success.
    fn fidelity(&self) -> Fidelity;

    /// Convert one document.
    ///
    /// On success a page-oriented result has at least one page and non-empty
    /// bytes. On failure nothing has been written anywhere.
    fn convert<'a>(
        &'a self,
        source: &'a SourceDocument,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>>;
}

/// Build the converter for `config`.
///
/// A pre-built converter in `config.converter` takes precedence over
/// `config.strategy`.
pub fn resolve_converter(config: &PipelineConfig) -> Arc<dyn FormatConverter> {
    if let Some(ref converter) = config.converter {
        debug!("Using pre-built converter '{}'", converter.name());
        return Arc::clone(converter);
    }

    match config.strategy {
        ConverterStrategy::NativeEngine => Arc::new(NativeEngineConverter::new(
            config.engine.clone(),
            Duration::from_secs(config.engine_timeout_secs),
        )),
        ConverterStrategy::TextReflow => Arc::new(TextReflowConverter::new(config.page_layout)),
        ConverterStrategy::NativeRoundTrip => Arc::new(RoundTripConverter),
    }
}

/// Reject results that break the converter contract.
///
/// Applied to every converter's output, including injected ones, before
/// anything is persisted.
pub fn check_result(result: ConversionResult) -> Result<ConversionResult, ConversionError> {
    if result.bytes().is_empty() {
        return Err(ConversionError::EmptyOutput);
    }
    if result.page_count() == Some(0) {
        return Err(ConversionError::ZeroPages);
    }
    Ok(result)
}
