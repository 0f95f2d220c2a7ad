//! Validation of base64 image payloads from multimodal user content.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;

/// Decoded image payloads above this size are dropped.
pub(crate) const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_FORMATS: [&str; 4] = ["image/png", "image/jpeg", "image/gif", "image/webp"];

/// A validated image ready to ride upstream as a `media_message`.
/// `data` stays base64-encoded; only validation decodes it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImagePayload {
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Error)]
pub(crate) enum ImageError {
    #[error("not a base64 image data URL")]
    NotADataUrl,

    #[error("unsupported image format '{0}'")]
    UnsupportedFormat(String),

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("decoded image is {0} bytes, above the {MAX_IMAGE_BYTES} byte limit")]
    TooLarge(usize),
}

/// Splits an `image_url` entry of the form
/// `data:<media-type>;base64,<payload>` into its media type and payload.
/// Anything else (http URLs included) is rejected; the gateway never fetches
/// remote images.
pub(crate) fn parse_data_url(url: &str) -> Result<(&str, &str), ImageError> {
    let rest = url.strip_prefix("data:").ok_or(ImageError::NotADataUrl)?;
    let (media_type, payload) = rest.split_once(";base64,").ok_or(ImageError::NotADataUrl)?;

    Ok((media_type, payload))
}

/// Checks format and decoded size of a base64 image payload.
pub(crate) fn validate_image(media_type: &str, payload: &str) -> Result<ImagePayload, ImageError> {
    if !ALLOWED_FORMATS.contains(&media_type) {
        return Err(ImageError::UnsupportedFormat(media_type.to_string()));
    }

    let payload = payload.trim();
    let decoded = STANDARD.decode(payload)?;

    if decoded.len() > MAX_IMAGE_BYTES {
        return Err(ImageError::TooLarge(decoded.len()));
    }

    Ok(ImagePayload {
        media_type: media_type.to_string(),
        data: payload.to_string(),
    })
}

/// Validates a full data URL in one step.
pub(crate) fn validate_data_url(url: &str) -> Result<ImagePayload, ImageError> {
    let (media_type, payload) = parse_data_url(url)?;
    validate_image(media_type, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn parse_well_formed_data_url() {
        let (media_type, payload) = parse_data_url("data:image/png;base64,AAAA").unwrap();
        assert_eq!(media_type, "image/png");
        assert_eq!(payload, "AAAA");
    }

    #[test]
    fn reject_remote_urls() {
        assert!(matches!(
            parse_data_url("https://example.com/cat.png"),
            Err(ImageError::NotADataUrl)
        ));
        assert!(matches!(
            parse_data_url("data:image/png,plain"),
            Err(ImageError::NotADataUrl)
        ));
    }

    #[test]
    fn accept_small_png() {
        let payload = encode(&[0x89, b'P', b'N', b'G', 0, 0, 0, 0]);
        let image = validate_image("image/png", &payload).unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.data, payload);
    }

    #[test]
    fn reject_unsupported_format() {
        let payload = encode(b"BM....");
        assert!(matches!(
            validate_image("image/bmp", &payload),
            Err(ImageError::UnsupportedFormat(format)) if format == "image/bmp"
        ));
    }

    #[test]
    fn reject_oversized_image() {
        let payload = encode(&vec![0u8; MAX_IMAGE_BYTES + 1]);
        assert!(matches!(
            validate_image("image/png", &payload),
            Err(ImageError::TooLarge(len)) if len == MAX_IMAGE_BYTES + 1
        ));
    }

    #[test]
    fn accept_image_at_exact_limit() {
        let payload = encode(&vec![0u8; MAX_IMAGE_BYTES]);
        assert!(validate_image("image/webp", &payload).is_ok());
    }

    #[test]
    fn reject_invalid_base64() {
        assert!(matches!(
            validate_image("image/png", "not base64!!!"),
            Err(ImageError::InvalidBase64(_))
        ));
    }
}
