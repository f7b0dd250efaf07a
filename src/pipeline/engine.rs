//! Native engine converter: render DOC/DOCX to PDF with a headless office
//! suite (LibreOffice `soffice` by default).
//!
//! Every run gets a private scratch directory holding the input copy, the
//! output directory and a throwaway user profile. A private profile lets
//! several conversions run at once; LibreOffice refuses to start a second
//! instance on a profile that is already locked.
//!
//! The child is killed when the timeout fires, and the scratch directory is
//! removed when the run ends either way.

use crate::config::EngineCommand;
use crate::converter::FormatConverter;
use crate::document::{ConversionResult, ConvertedDocument, Fidelity, SourceDocument};
use crate::error::ConversionError;
use crate::pipeline::pdf::PdfDocument;
use futures::future::BoxFuture;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Keep at most this much of the engine's stderr in error messages.
const STDERR_TAIL_CHARS: usize = 2_000;

/// Stem of the input copy; the engine names its output `<stem>.pdf`.
const INPUT_STEM: &str = "source";

pub struct NativeEngineConverter {
    command: EngineCommand,
    timeout: Duration,
}

impl NativeEngineConverter {
    pub fn new(command: EngineCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    async fn run(&self, source: &SourceDocument) -> Result<ConversionResult, ConversionError> {
        let start = Instant::now();

        // ── Step 1: Stage input in a private scratch dir ─────────────────
        let scratch = tempfile::Builder::new().prefix("docsign-").tempdir()?;
        let input = scratch
            .path()
            .join(format!("{INPUT_STEM}.{}", source.format.extension()));
        let outdir = scratch.path().join("out");
        let profile = scratch.path().join("profile");
        tokio::fs::write(&input, &source.bytes).await?;
        tokio::fs::create_dir_all(&outdir).await?;

        // ── Step 2: Run the engine under a deadline ──────────────────────
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.leading_args)
            .arg("--headless")
            .arg("--norestore")
            .arg(format!("-env:UserInstallation={}", file_url(&profile)))
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&outdir)
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Running {} on {} ({} bytes)",
            self.command.program,
            source.id,
            source.bytes.len()
        );

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                warn!(
                    "Engine timed out after {}s on {}; process killed",
                    self.timeout.as_secs(),
                    source.id
                );
                return Err(ConversionError::EngineTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                return Err(ConversionError::EngineUnavailable {
                    program: self.command.program.clone(),
                    detail: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(ConversionError::EngineFailed {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        // ── Step 3: Collect and verify the output ────────────────────────
        let produced = outdir.join(format!("{INPUT_STEM}.pdf"));
        let bytes = match tokio::fs::read(&produced).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Engine stderr: {}", stderr_tail(&output.stderr));
                return Err(ConversionError::EmptyOutput);
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Err(ConversionError::EmptyOutput);
        }

        let (bytes, pages) = tokio::task::spawn_blocking(move || {
            let pages = PdfDocument::load(&bytes).map(|pdf| pdf.pages());
            (bytes, pages)
        })
        .await
        .map_err(|e| ConversionError::Task(format!("PDF inspection panicked: {e}")))?;
        let pages = pages.map_err(|detail| ConversionError::InvalidOutput { detail })?;
        if pages.is_empty() {
            return Err(ConversionError::ZeroPages);
        }

        info!(
            "Engine converted {} -> {} page(s) in {}ms",
            source.id,
            pages.len(),
            start.elapsed().as_millis()
        );
        Ok(ConversionResult::PageOriented(ConvertedDocument {
            bytes,
            pages,
            fidelity: Fidelity::Full,
        }))
    }
}

impl FormatConverter for NativeEngineConverter {
    fn name(&self) -> &'static str {
        "native-engine"
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Full
    }

    fn convert<'a>(
        &'a self,
        source: &'a SourceDocument,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        Box::pin(self.run(source))
    }
}

fn file_url(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{s}")
    } else {
        format!("file:///{s}")
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        text.to_string()
    } else {
        let tail: String = text.chars().skip(count - STDERR_TAIL_CHARS).collect();
        format!("…{tail}")
    }
}
