//! Content sniffing: the payload's magic bytes are the only authority for
//! its content type. Client-declared types are never consulted here.

use crate::models::asset::ImageType;

/// Types the pipeline accepts at all. WebP is recognised by `infer` but is
/// deliberately left off.
pub const ALLOWED_IMAGE_TYPES: &[ImageType] = &[ImageType::Jpeg, ImageType::Png];

/// Return the raw MIME type recognised from magic bytes, allowed or not.
pub fn detect(bytes: &[u8]) -> Option<&'static str> {
    if bytes.is_empty() {
        return None;
    }
    infer::get(bytes).map(|kind| kind.mime_type())
}

/// Sniff `bytes` and map the result onto the allow-list.
///
/// Returns `None` for empty input, unrecognisable content, and recognised
/// but disallowed types.
pub fn sniff(bytes: &[u8]) -> Option<ImageType> {
    let detected = match detect(bytes)? {
        "image/jpeg" => ImageType::Jpeg,
        "image/png" => ImageType::Png,
        _ => return None,
    };
    ALLOWED_IMAGE_TYPES
        .contains(&detected)
        .then_some(detected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{jpeg_bytes, png_bytes, webp_bytes};

    #[test]
    fn recognises_png_and_jpeg() {
        assert_eq!(sniff(&png_bytes(10 * 1024)), Some(ImageType::Png));
        assert_eq!(sniff(&jpeg_bytes(2048)), Some(ImageType::Jpeg));
    }

    #[test]
    fn rejects_empty_and_zeroed_payloads() {
        assert_eq!(sniff(&[]), None);
        assert_eq!(sniff(&[0u8; 50]), None);
    }

    #[test]
    fn webp_is_detected_but_not_allowed() {
        let webp = webp_bytes(256);
        assert_eq!(detect(&webp), Some("image/webp"));
        assert_eq!(sniff(&webp), None);
    }

    #[test]
    fn text_disguised_as_image_is_rejected() {
        assert_eq!(sniff(b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>"), None);
    }
}
