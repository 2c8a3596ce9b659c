use base64::prelude::*;
use qrcode::render::svg;
use qrcode::QrCode;

const QR_MIN_DIMENSION: u32 = 200;

/// Renders `text` as an SVG QR code and wraps it in a data URI suitable for
/// an `<img src>`. Returns `None` when the payload cannot be encoded.
pub fn qr_data_uri(text: &str) -> Option<String> {
    let code = match QrCode::new(text.as_bytes()) {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode QR code");
            return None;
        }
    };

    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();

    Some(format!(
        "data:image/svg+xml;base64,{}",
        BASE64_STANDARD.encode(image)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_number_renders_as_svg_data_uri() {
        let uri = qr_data_uri("A1B2C3").unwrap();
        let payload = uri.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(BASE64_STANDARD.decode(payload).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_oversized_payload_has_no_code() {
        // Version 40 tops out below 3 KB of binary data.
        assert!(qr_data_uri(&"x".repeat(4000)).is_none());
    }
}
