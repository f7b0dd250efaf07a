//! Pipeline stages for document signing.
//!
//! Each submodule implements one transformation step or one format backend.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ engine | reflow | roundtrip ──▶ encode ──▶ composite ──▶ deliver
//! (check)   (DOC/DOCX → signable doc)       (data URL)  (pdf | docx)   (relay/outbox)
//! ```
//!
//! 1. [`input`]: allow-list check of an upload (extension, media type, magic bytes)
//! 2. [`engine`], [`reflow`], [`roundtrip`]: the three converter strategies;
//!    CPU-bound parsing runs in `spawn_blocking`
//! 3. [`encode`]: decode the signature data URL into RGBA pixels
//! 4. [`composite`]: place the signature on the last page, via [`pdf`] or [`docx`]
//! 5. [`deliver`]: hand the signed document to the mail collaborator

pub mod composite;
pub mod deliver;
pub mod docx;
pub mod encode;
pub mod engine;
pub mod input;
pub mod pdf;
pub mod reflow;
pub mod roundtrip;
