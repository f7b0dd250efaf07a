//! Signature payload codec: `data:<media>;base64,<data>` ⇄ [`SignatureImage`].
//!
//! Canvas capture widgets emit their drawing as a data URL. The declared media
//! type is checked against the bytes actually decoded so a JPEG sent as
//! `image/png` (or a text blob with an image prefix) is refused instead of
//! being embedded as garbage. Decoding runs under [`SignatureLimits`], so an
//! image whose header declares an oversized canvas fails before its pixel
//! buffer is allocated.

use crate::document::SignatureImage;
use crate::error::CompositingError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageError, ImageFormat, ImageReader, Limits};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use tracing::debug;

static RE_DATA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^data:(image/[A-Za-z0-9.+-]+);base64,(.*)$").expect("static regex")
});

/// Floor for the decoder allocation cap; zlib and row buffers need this much
/// even for tiny images.
const MIN_DECODER_ALLOC: u64 = 8 * 1024 * 1024;

/// Media types accepted for signatures.
pub const ACCEPTED_MEDIA_TYPES: [&str; 2] = ["image/png", "image/jpeg"];

/// Bounds on an incoming signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureLimits {
    /// Longest accepted payload, in bytes of data-URL text.
    pub max_payload_bytes: usize,
    /// Largest accepted width or height once decoded, in pixels.
    pub max_dimension: u32,
}

impl SignatureLimits {
    /// Decoder limits for these bounds. The allocation cap covers one RGBA8
    /// frame at the largest size plus the same again for decoder scratch, and
    /// never drops below [`MIN_DECODER_ALLOC`].
    fn decoder_limits(&self) -> Limits {
        let frame = u64::from(self.max_dimension).pow(2).saturating_mul(8);
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(frame.max(MIN_DECODER_ALLOC));
        limits
    }
}

fn invalid(detail: impl Into<String>) -> CompositingError {
    CompositingError::InvalidImage {
        detail: detail.into(),
    }
}

/// Decode a signature payload into RGBA pixels.
pub fn decode_signature(
    payload: &str,
    limits: &SignatureLimits,
) -> Result<SignatureImage, CompositingError> {
    let payload = payload.trim();
    if payload.len() > limits.max_payload_bytes {
        return Err(invalid(format!(
            "payload is {} bytes, limit is {} bytes",
            payload.len(),
            limits.max_payload_bytes
        )));
    }

    let caps = RE_DATA_URL
        .captures(payload)
        .ok_or_else(|| invalid("missing 'data:image/<type>;base64,' prefix"))?;
    let media_type = caps[1].to_ascii_lowercase();
    let declared = match media_type.as_str() {
        "image/png" => ImageFormat::Png,
        "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
        other => {
            return Err(invalid(format!(
                "media type '{other}' not accepted, expected one of {ACCEPTED_MEDIA_TYPES:?}"
            )))
        }
    };

    // Form encoding can turn '+' into ' ' and wrap long lines.
    let body: String = caps[2]
        .chars()
        .filter(|c| !c.is_ascii_whitespace() || *c == ' ')
        .map(|c| if c == ' ' { '+' } else { c })
        .collect();
    let bytes = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| invalid(format!("base64 decoding failed: {e}")))?;

    let actual = image::guess_format(&bytes)
        .map_err(|_| invalid("payload is not a recognisable image"))?;
    if actual != declared {
        return Err(invalid(format!(
            "declared {media_type} but payload is {actual:?}"
        )));
    }

    let mut reader = ImageReader::with_format(Cursor::new(&bytes), declared);
    reader.limits(limits.decoder_limits());
    let img = reader.decode().map_err(|e| match e {
        ImageError::Limits(e) => invalid(format!(
            "image exceeds {0}x{0} pixels: {e}",
            limits.max_dimension
        )),
        e => invalid(format!("image decoding failed: {e}")),
    })?;
    if img.width() == 0 || img.height() == 0 {
        return Err(invalid("image has no pixels"));
    }

    let rgba = img.to_rgba8();
    debug!(
        "Decoded signature {}x{} from {} bytes",
        rgba.width(),
        rgba.height(),
        bytes.len()
    );
    Ok(SignatureImage {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

/// Encode raw image file bytes as a signature payload (used by the CLI and tests).
pub fn encode_payload(image_bytes: &[u8]) -> Result<String, CompositingError> {
    let media_type = match image::guess_format(image_bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(other) => return Err(invalid(format!("unsupported signature format {other:?}"))),
        Err(_) => return Err(invalid("not a recognisable image")),
    };
    Ok(format!("data:{};base64,{}", media_type, STANDARD.encode(image_bytes)))
}

/// PNG-encode a signature (used when the target format embeds files).
pub fn signature_png(sig: &SignatureImage) -> Result<Vec<u8>, CompositingError> {
    let img = image::RgbaImage::from_raw(sig.width, sig.height, sig.rgba.clone())
        .ok_or_else(|| invalid("pixel buffer does not match dimensions"))?;
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| invalid(format!("PNG encoding failed: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    const UNBOUNDED: SignatureLimits = SignatureLimits {
        max_payload_bytes: usize::MAX,
        max_dimension: 8192,
    };

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decodes_png_payload() {
        let payload = encode_payload(&png_bytes(600, 200)).unwrap();
        assert!(payload.starts_with("data:image/png;base64,"));
        let sig = decode_signature(&payload, &UNBOUNDED).unwrap();
        assert_eq!((sig.width, sig.height), (600, 200));
        assert_eq!(sig.rgba.len(), 600 * 200 * 4);
    }

    #[test]
    fn missing_prefix_is_invalid() {
        let raw = STANDARD.encode(png_bytes(4, 4));
        let err = decode_signature(&raw, &UNBOUNDED).unwrap_err();
        assert!(matches!(err, CompositingError::InvalidImage { .. }));
    }

    #[test]
    fn mismatched_type_is_invalid() {
        let payload = format!("data:image/jpeg;base64,{}", STANDARD.encode(png_bytes(4, 4)));
        let err = decode_signature(&payload, &UNBOUNDED).unwrap_err();
        assert!(err.to_string().contains("declared image/jpeg"), "got {err}");
    }

    #[test]
    fn unaccepted_type_is_invalid() {
        let payload = format!("data:image/gif;base64,{}", STANDARD.encode(b"GIF89a"));
        assert!(decode_signature(&payload, &UNBOUNDED).is_err());
    }

    #[test]
    fn garbage_base64_is_invalid() {
        assert!(decode_signature("data:image/png;base64,!!!not-base64!!!", &UNBOUNDED).is_err());
    }

    #[test]
    fn form_mangled_plus_signs_recovered() {
        let payload = encode_payload(&png_bytes(8, 8)).unwrap().replace('+', " ");
        assert!(decode_signature(&payload, &UNBOUNDED).is_ok());
    }

    #[test]
    fn oversize_payload_rejected() {
        let payload = encode_payload(&png_bytes(8, 8)).unwrap();
        let limits = SignatureLimits {
            max_payload_bytes: 10,
            ..UNBOUNDED
        };
        assert!(decode_signature(&payload, &limits).is_err());
    }

    #[test]
    fn oversize_canvas_rejected_before_decoding() {
        let payload = encode_payload(&png_bytes(64, 8)).unwrap();
        let tight = SignatureLimits {
            max_dimension: 32,
            ..UNBOUNDED
        };
        let err = decode_signature(&payload, &tight).unwrap_err();
        assert!(matches!(err, CompositingError::InvalidImage { .. }));
        assert!(err.to_string().contains("32x32"), "got {err}");

        let exact = SignatureLimits {
            max_dimension: 64,
            ..UNBOUNDED
        };
        let sig = decode_signature(&payload, &exact).unwrap();
        assert_eq!((sig.width, sig.height), (64, 8));
    }

    #[test]
    fn tall_canvas_rejected() {
        let payload = encode_payload(&png_bytes(4, 100)).unwrap();
        let limits = SignatureLimits {
            max_dimension: 50,
            ..UNBOUNDED
        };
        assert!(matches!(
            decode_signature(&payload, &limits),
            Err(CompositingError::InvalidImage { .. })
        ));
    }

    #[test]
    fn png_round_trip() {
        let sig = decode_signature(&encode_payload(&png_bytes(3, 2)).unwrap(), &UNBOUNDED).unwrap();
        let png = signature_png(&sig).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
    }
}
