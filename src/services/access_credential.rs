use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::appointment::Appointment;
use crate::services::signature;

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("JSON serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Malformed credential")]
    Malformed,

    #[error("Invalid credential signature")]
    InvalidSignature,
}

/// Payload carried by an access QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredentialPayload {
    pub appointment_id: Uuid,
    pub user_id: Uuid,
    pub pet_id: Uuid,
    pub location_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub issued_at: DateTime<Utc>,
}

impl AccessCredentialPayload {
    pub fn for_appointment(appointment: &Appointment, issued_at: DateTime<Utc>) -> Self {
        Self {
            appointment_id: appointment.id,
            user_id: appointment.user_id,
            pet_id: appointment.pet_id,
            location_id: appointment.location_id,
            date: appointment.appointment_date,
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            issued_at,
        }
    }

    /// Encodes and signs the payload.
    ///
    /// Format: `base64url(json).hex(hmac_sha256(base64url(json)))`
    pub fn encode(&self, signing_key: &[u8]) -> Result<String, CredentialError> {
        let json = serde_json::to_vec(self)?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let tag = signature::sign(&body, signing_key);

        Ok(format!("{}.{}", body, tag))
    }

    /// Verifies the signature of a token and decodes its payload
    pub fn decode(token: &str, signing_key: &[u8]) -> Result<Self, CredentialError> {
        let (body, tag) = token
            .trim()
            .split_once('.')
            .ok_or(CredentialError::Malformed)?;

        if !signature::verify(body, tag, signing_key) {
            return Err(CredentialError::InvalidSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| CredentialError::Malformed)?;

        Ok(serde_json::from_slice(&json)?)
    }
}

/// Renders an access token as an SVG QR code
pub fn generate_qr_svg(token: &str) -> Result<String, CredentialError> {
    let code = QrCode::new(token.as_bytes())?;

    let svg = code.render::<svg::Color>().min_dimensions(240, 240).build();

    Ok(svg)
}

/// Renders an access token as a PNG QR code
pub fn generate_qr_png(token: &str) -> Result<Vec<u8>, CredentialError> {
    use image::{ImageBuffer, Luma};

    let code = QrCode::new(token.as_bytes())?;

    let module_size = 8u32; // pixels per module
    let quiet_zone = 4u32; // modules of white border
    let width = code.width() as u32;
    let img_size = (width + 2 * quiet_zone) * module_size;

    let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_fn(img_size, img_size, |x, y| {
        let module_x = (x / module_size) as i64 - quiet_zone as i64;
        let module_y = (y / module_size) as i64 - quiet_zone as i64;
        let inside = (0..width as i64).contains(&module_x) && (0..width as i64).contains(&module_y);

        if inside && code[(module_x as usize, module_y as usize)] == qrcode::types::Color::Dark {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn payload() -> AccessCredentialPayload {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        AccessCredentialPayload {
            appointment_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            pet_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            date: start.date(),
            start_time: start,
            end_time: start + Duration::minutes(30),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_encode_then_decode() {
        let key = signature::derive_key("test-credential-key");
        let payload = payload();

        let token = payload.encode(&key).unwrap();
        let decoded = AccessCredentialPayload::decode(&token, &key).unwrap();

        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let key = signature::derive_key("test-credential-key");
        let token = payload().encode(&key).unwrap();

        // Re-sign with the wrong key
        let other = signature::derive_key("other-key");
        assert!(matches!(
            AccessCredentialPayload::decode(&token, &other),
            Err(CredentialError::InvalidSignature)
        ));

        // Swap the body for another payload keeping the old tag
        let (_, tag) = token.split_once('.').unwrap();
        let other_body = payload().encode(&key).unwrap();
        let (body, _) = other_body.split_once('.').unwrap();
        let forged = format!("{}.{}", body, tag);
        assert!(AccessCredentialPayload::decode(&forged, &key).is_err());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let key = signature::derive_key("test-credential-key");

        assert!(matches!(
            AccessCredentialPayload::decode("no-dot-here", &key),
            Err(CredentialError::Malformed)
        ));
        assert!(AccessCredentialPayload::decode("", &key).is_err());
        assert!(AccessCredentialPayload::decode("{\"appointment_id\":1}", &key).is_err());
    }

    #[test]
    fn test_signed_garbage_body_is_malformed() {
        let key = signature::derive_key("test-credential-key");
        let body = URL_SAFE_NO_PAD.encode(b"not json");
        let token = format!("{}.{}", body, signature::sign(&body, &key));

        assert!(matches!(
            AccessCredentialPayload::decode(&token, &key),
            Err(CredentialError::SerializationError(_))
        ));
    }

    #[test]
    fn test_qr_svg_generation() {
        let key = signature::derive_key("test-credential-key");
        let token = payload().encode(&key).unwrap();

        let svg = generate_qr_svg(&token).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_qr_png_generation() {
        let key = signature::derive_key("test-credential-key");
        let token = payload().encode(&key).unwrap();

        let png = generate_qr_png(&token).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
