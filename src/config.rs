//! Configuration for the document signing pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built once at
//! process start via [`PipelineConfigBuilder`] and passed by reference to the
//! orchestrator and the converter factory. Nothing in the algorithmic code
//! reads the environment; the CLI maps env vars onto the builder.

use crate::converter::FormatConverter;
use crate::error::PipelineError;
use crate::pipeline::deliver::DeliveryAgent;
use crate::pipeline::encode::SignatureLimits;
use crate::progress::Observer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the signing pipeline.
///
/// # Example
/// ```rust
/// use docsign::{ConverterStrategy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .storage_dir("/var/lib/docsign")
///     .strategy(ConverterStrategy::TextReflow)
///     .engine_timeout_secs(60)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root of the flat artifact store. Default: `./uploads`.
    pub storage_dir: PathBuf,

    /// URL prefix under which the static file collaborator serves the store.
    /// Default: `/uploads`.
    pub public_base_url: String,

    /// Which converter strategy to build. Default: [`ConverterStrategy::NativeEngine`].
    pub strategy: ConverterStrategy,

    /// Pre-constructed converter. Takes precedence over `strategy`.
    pub converter: Option<Arc<dyn FormatConverter>>,

    /// Office engine invocation for the native strategy.
    pub engine: EngineCommand,

    /// Wall-clock limit for one engine run, in seconds. Default: 120.
    ///
    /// LibreOffice cold starts take several seconds and large documents with
    /// many images can take a minute. The process is killed when this expires.
    pub engine_timeout_secs: u64,

    /// Page geometry for the text-reflow strategy.
    pub page_layout: PageLayout,

    /// Where the signature lands on the target page.
    pub placement: SignaturePlacement,

    /// Largest accepted upload, in bytes. Default: 10 MiB.
    pub max_upload_bytes: usize,

    /// Largest accepted signature payload (encoded), in bytes. Default: 10 MiB.
    pub max_signature_bytes: usize,

    /// Largest accepted signature width or height once decoded, in pixels.
    /// Default: 4096.
    ///
    /// A few kilobytes of PNG can declare a canvas of hundreds of megabytes;
    /// images over this bound are refused before their pixels are allocated.
    pub max_signature_dimension: u32,

    /// Envelope fields for the delivery collaborator.
    pub delivery: DeliveryConfig,

    /// Pre-constructed delivery agent. Without one, signed documents are
    /// persisted but not delivered.
    pub delivery_agent: Option<Arc<dyn DeliveryAgent>>,

    /// Receives state transitions. Default: None.
    pub observer: Option<Observer>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("uploads"),
            public_base_url: "/uploads".to_string(),
            strategy: ConverterStrategy::default(),
            converter: None,
            engine: EngineCommand::default(),
            engine_timeout_secs: 120,
            page_layout: PageLayout::default(),
            placement: SignaturePlacement::default(),
            max_upload_bytes: 10 * 1024 * 1024,
            max_signature_bytes: 10 * 1024 * 1024,
            max_signature_dimension: 4096,
            delivery: DeliveryConfig::default(),
            delivery_agent: None,
            observer: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("storage_dir", &self.storage_dir)
            .field("public_base_url", &self.public_base_url)
            .field("strategy", &self.strategy)
            .field("converter", &self.converter.as_ref().map(|c| c.name()))
            .field("engine", &self.engine)
            .field("engine_timeout_secs", &self.engine_timeout_secs)
            .field("page_layout", &self.page_layout)
            .field("placement", &self.placement)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("max_signature_bytes", &self.max_signature_bytes)
            .field("max_signature_dimension", &self.max_signature_dimension)
            .field("delivery", &self.delivery)
            .field(
                "delivery_agent",
                &self.delivery_agent.as_ref().map(|_| "<dyn DeliveryAgent>"),
            )
            .field(
                "observer",
                &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Bounds applied to every incoming signature payload.
    pub fn signature_limits(&self) -> SignatureLimits {
        SignatureLimits {
            max_payload_bytes: self.max_signature_bytes,
            max_dimension: self.max_signature_dimension,
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.config.public_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn strategy(mut self, strategy: ConverterStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn FormatConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn engine(mut self, engine: EngineCommand) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout_secs = secs;
        self
    }

    pub fn page_layout(mut self, layout: PageLayout) -> Self {
        self.config.page_layout = layout;
        self
    }

    pub fn placement(mut self, placement: SignaturePlacement) -> Self {
        self.config.placement = placement;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn max_signature_bytes(mut self, n: usize) -> Self {
        self.config.max_signature_bytes = n;
        self
    }

    pub fn max_signature_dimension(mut self, pixels: u32) -> Self {
        self.config.max_signature_dimension = pixels;
        self
    }

    pub fn delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.config.delivery = delivery;
        self
    }

    pub fn delivery_agent(mut self, agent: Arc<dyn DeliveryAgent>) -> Self {
        self.config.delivery_agent = Some(agent);
        self
    }

    pub fn observer(mut self, observer: Observer) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.engine_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Engine timeout must be ≥ 1 second".into(),
            ));
        }
        if c.engine.program.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Engine program must not be empty".into(),
            ));
        }
        c.page_layout.validate()?;
        c.placement.validate()?;
        if c.max_upload_bytes == 0 || c.max_signature_bytes == 0 || c.max_signature_dimension == 0 {
            return Err(PipelineError::InvalidConfig(
                "Size limits must be positive".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────

/// Conversion strategy, chosen per deployment.
///
/// | Strategy | Output | Fidelity |
/// |----------|--------|----------|
/// | `NativeEngine` | PDF rendered by LibreOffice | full |
/// | `TextReflow` | PDF re-typeset from extracted text | text only |
/// | `NativeRoundTrip` | the original DOCX, signed in place | full |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConverterStrategy {
    #[default]
    NativeEngine,
    TextReflow,
    NativeRoundTrip,
}

/// How to launch the office engine.
///
/// `leading_args` go before the conversion flags, which allows wrappers such
/// as `flatpak run org.libreoffice.LibreOffice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self {
            program: "soffice".to_string(),
            leading_args: Vec::new(),
        }
    }
}

impl EngineCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

// ── Geometry ─────────────────────────────────────────────────────────────

/// Page geometry for the text-reflow converter, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
    pub font_size: f32,
    pub line_height: f32,
}

impl Default for PageLayout {
    /// US Letter, one-inch margins, 12pt Helvetica at 1.2 leading.
    fn default() -> Self {
        Self {
            width: 612.0,
            height: 792.0,
            margin: 72.0,
            font_size: 12.0,
            line_height: 14.4,
        }
    }
}

impl PageLayout {
    pub fn text_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    pub fn text_height(&self) -> f32 {
        self.height - 2.0 * self.margin
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.font_size <= 0.0 || self.line_height <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "Font size and line height must be positive".into(),
            ));
        }
        if self.text_width() < self.font_size || self.text_height() < self.line_height {
            return Err(PipelineError::InvalidConfig(format!(
                "Page {}x{} with margin {} leaves no room for text",
                self.width, self.height, self.margin
            )));
        }
        Ok(())
    }
}

/// Signature bounding box and its anchor, in document units.
///
/// The box is anchored to the bottom-right of the target page: its left edge
/// sits `right_offset` units from the right edge and its bottom edge
/// `bottom_offset` units above the bottom edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignaturePlacement {
    pub box_width: f32,
    pub box_height: f32,
    pub right_offset: f32,
    pub bottom_offset: f32,
}

impl Default for SignaturePlacement {
    fn default() -> Self {
        Self {
            box_width: 150.0,
            box_height: 75.0,
            right_offset: 220.0,
            bottom_offset: 50.0,
        }
    }
}

impl SignaturePlacement {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.box_width <= 0.0 || self.box_height <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "Signature box must have positive size".into(),
            ));
        }
        if self.right_offset < 0.0 || self.bottom_offset < 0.0 {
            return Err(PipelineError::InvalidConfig(
                "Signature offsets must not be negative".into(),
            ));
        }
        Ok(())
    }
}

// ── Delivery ─────────────────────────────────────────────────────────────

/// Envelope fields for signed-document delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Sender address; also the display account of the service.
    pub sender: String,
    /// Recipient address. Empty means "send to the sender".
    pub recipient: String,
}

impl DeliveryConfig {
    pub fn effective_recipient(&self) -> &str {
        if self.recipient.is_empty() {
            &self.sender
        } else {
            &self.recipient
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.strategy, ConverterStrategy::NativeEngine);
        assert_eq!(config.placement.box_width, 150.0);
        assert_eq!(config.placement.right_offset, 220.0);
        assert_eq!(config.engine.program, "soffice");
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = PipelineConfig::builder().engine_timeout_secs(0).build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn cramped_layout_rejected() {
        let layout = PageLayout {
            width: 100.0,
            height: 100.0,
            margin: 50.0,
            ..PageLayout::default()
        };
        assert!(PipelineConfig::builder().page_layout(layout).build().is_err());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let config = PipelineConfig::builder()
            .public_base_url("https://sign.example.com/files/")
            .build()
            .unwrap();
        assert_eq!(config.public_base_url, "https://sign.example.com/files");
    }

    #[test]
    fn zero_signature_dimension_rejected() {
        let err = PipelineConfig::builder().max_signature_dimension(0).build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn signature_limits_follow_config() {
        let config = PipelineConfig::builder()
            .max_signature_bytes(2048)
            .max_signature_dimension(512)
            .build()
            .unwrap();
        assert_eq!(
            config.signature_limits(),
            SignatureLimits {
                max_payload_bytes: 2048,
                max_dimension: 512,
            }
        );
    }

    #[test]
    fn debug_lists_limits_and_observer() {
        let config = PipelineConfig::builder()
            .observer(Arc::new(crate::progress::NoopObserver))
            .build()
            .unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("max_signature_bytes: 10485760"), "{debug}");
        assert!(debug.contains("max_signature_dimension: 4096"), "{debug}");
        assert!(debug.contains("observer: Some(\"<dyn PipelineObserver>\")"), "{debug}");
    }

    #[test]
    fn recipient_falls_back_to_sender() {
        let d = DeliveryConfig {
            sender: "office@example.com".into(),
            recipient: String::new(),
        };
        assert_eq!(d.effective_recipient(), "office@example.com");
    }
}
