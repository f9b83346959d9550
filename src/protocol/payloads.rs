//! JSON payload envelopes for device events and commands
//!
//! Every message on the wire is an object whose `d` member carries the
//! event-specific fields, e.g. `{"d":{"text":"hello"}}`.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire envelope: `{"d": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub d: T,
}

impl<T> Envelope<T> {
    pub fn new(d: T) -> Self {
        Self { d }
    }
}

/// Payload parse errors
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a raw payload into the `d` member of its envelope
pub fn parse_envelope<T: DeserializeOwned>(payload: &[u8]) -> Result<T, PayloadError> {
    let envelope: Envelope<T> = serde_json::from_slice(payload)?;
    Ok(envelope.d)
}

/// Serialize event fields wrapped in an envelope
pub fn encode_envelope<T: Serialize>(d: T) -> Result<String, PayloadError> {
    Ok(serde_json::to_string(&Envelope::new(d))?)
}

/// Text event/command: `{"d":{"text":"..."}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPayload {
    pub text: String,
}

/// Touch-move event published while drawing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TouchPayload {
    pub screen_x: f64,
    pub screen_y: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    /// Present (as `1`) only on the final message of a touch
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ended: Option<u8>,
}

impl TouchPayload {
    pub fn new(screen_x: f64, screen_y: f64, delta_x: f64, delta_y: f64, ended: bool) -> Self {
        Self {
            screen_x,
            screen_y,
            delta_x,
            delta_y,
            ended: ended.then_some(1),
        }
    }
}

/// Accelerometer/orientation/location sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccelPayload {
    #[serde(rename = "myName")]
    pub my_name: String,
    pub acceleration_x: f32,
    pub acceleration_y: f32,
    pub acceleration_z: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub lon: f64,
    pub lat: f64,
}

/// Outbound events a consumer can ask the session to publish
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Text(TextPayload),
    Touch(TouchPayload),
    Accel(AccelPayload),
}

impl OutboundEvent {
    pub fn kind(&self) -> super::topics::EventKind {
        use super::topics::EventKind;
        match self {
            OutboundEvent::Text(_) => EventKind::Text,
            OutboundEvent::Touch(_) => EventKind::Touch,
            OutboundEvent::Accel(_) => EventKind::Accel,
        }
    }

    /// Encode into `(topic, json)`
    pub fn encode(&self) -> Result<(String, String), PayloadError> {
        let topic = super::topics::event_topic(self.kind());
        let body = match self {
            OutboundEvent::Text(p) => encode_envelope(p)?,
            OutboundEvent::Touch(p) => encode_envelope(p)?,
            OutboundEvent::Accel(p) => encode_envelope(p)?,
        };
        Ok((topic, body))
    }
}

/// Color command: integer channels plus a fractional alpha.
///
/// Channels accept JSON numbers or numeric strings (`"150"`); fractional
/// channel values are truncated toward zero.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ColorPayload {
    #[serde(deserialize_with = "lenient_i64")]
    pub r: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub g: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub b: i64,
    #[serde(deserialize_with = "lenient_f64")]
    pub alpha: f64,
}

impl ColorPayload {
    /// Convert to an ARGB color, or `None` if any channel falls outside
    /// `[0, 255]` after scaling alpha by 255 and rounding.
    pub fn to_argb(&self) -> Option<Argb> {
        let alpha = alpha_channel(self.alpha)?;
        Some(Argb {
            a: alpha,
            r: channel(self.r)?,
            g: channel(self.g)?,
            b: channel(self.b)?,
        })
    }
}

/// `round(alpha * 255)` if it lands in `[0, 255]`
pub fn alpha_channel(alpha: f64) -> Option<u8> {
    let scaled = (alpha * 255.0).round();
    if scaled.is_nan() || !(0.0..=255.0).contains(&scaled) {
        return None;
    }
    Some(scaled as u8)
}

fn channel(value: i64) -> Option<u8> {
    u8::try_from(value).ok()
}

/// 32-bit ARGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argb {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Argb {
    pub const WHITE: Argb = Argb {
        a: 255,
        r: 255,
        g: 255,
        b: 255,
    };

    /// Packed `0xAARRGGBB`
    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes([self.a, self.r, self.g, self.b])
    }
}

impl Default for Argb {
    fn default() -> Self {
        Self::WHITE
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match LenientNumber::deserialize(deserializer)? {
        LenientNumber::Int(v) => Ok(v),
        LenientNumber::Float(v) => float_to_i64(v).ok_or_else(|| de::Error::custom("number out of range")),
        LenientNumber::Text(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Ok(v);
            }
            s.parse::<f64>()
                .ok()
                .and_then(float_to_i64)
                .ok_or_else(|| de::Error::custom(format!("expected integer, got \"{s}\"")))
        }
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match LenientNumber::deserialize(deserializer)? {
        LenientNumber::Int(v) => Ok(v as f64),
        LenientNumber::Float(v) => Ok(v),
        LenientNumber::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("expected number, got \"{s}\""))),
    }
}

fn float_to_i64(v: f64) -> Option<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    #[test]
    fn test_parse_text_envelope() {
        let text: TextPayload = parse_envelope(br#"{"d":{"text":"hello"}}"#).unwrap();
        assert_eq!(text.text, "hello");
    }

    #[test]
    fn test_parse_rejects_missing_d() {
        let result = parse_envelope::<TextPayload>(br#"{"text":"hello"}"#);
        assert!(result.is_err());

        let result = parse_envelope::<TextPayload>(b"not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_text_encoding_escapes_quotes() {
        let (topic, body) = OutboundEvent::Text(TextPayload {
            text: "say \"hi\"".to_string(),
        })
        .encode()
        .unwrap();

        assert_eq!(topic, "iot-2/evt/text/fmt/json");
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value, json!({"d": {"text": "say \"hi\""}}));
    }

    #[test]
    fn test_touch_encoding_ended_flag() {
        let (_, moving) = OutboundEvent::Touch(TouchPayload::new(0.5, 0.25, 0.1, -0.1, false))
            .encode()
            .unwrap();
        let moving: Value = serde_json::from_str(&moving).unwrap();
        assert!(moving["d"].get("ended").is_none());
        assert_eq!(moving["d"]["screenX"], json!(0.5));
        assert_eq!(moving["d"]["deltaY"], json!(-0.1));

        let (_, ended) = OutboundEvent::Touch(TouchPayload::new(0.5, 0.25, 0.0, 0.0, true))
            .encode()
            .unwrap();
        let ended: Value = serde_json::from_str(&ended).unwrap();
        assert_eq!(ended["d"]["ended"], json!(1));
    }

    #[test]
    fn test_accel_encoding_field_names() {
        let accel = AccelPayload {
            my_name: "Android Accelerometer".to_string(),
            acceleration_x: 0.5,
            acceleration_y: 1.0,
            acceleration_z: 9.75,
            roll: 0.0,
            pitch: 0.5,
            yaw: 1.5,
            lon: -73.5,
            lat: 45.5,
        };
        let (topic, body) = OutboundEvent::Accel(accel).encode().unwrap();
        assert_eq!(topic, "iot-2/evt/accel/fmt/json");

        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["d"]["myName"], json!("Android Accelerometer"));
        assert_eq!(value["d"]["acceleration_z"], json!(9.75));
        assert_eq!(value["d"]["lat"], json!(45.5));
    }

    #[test]
    fn test_color_accepts_numeric_strings() {
        let color: ColorPayload =
            parse_envelope(br#"{"d":{"r":"150","g":"50","b":"10","alpha":"0.5"}}"#).unwrap();
        assert_eq!(color.r, 150);
        assert_eq!(color.g, 50);
        assert_eq!(color.b, 10);
        assert_eq!(color.alpha, 0.5);

        let argb = color.to_argb().unwrap();
        assert_eq!(argb, Argb { a: 128, r: 150, g: 50, b: 10 });
    }

    #[test]
    fn test_color_rejects_non_numeric() {
        let result =
            parse_envelope::<ColorPayload>(br#"{"d":{"r":"red","g":0,"b":0,"alpha":1.0}}"#);
        assert!(result.is_err());

        let result = parse_envelope::<ColorPayload>(br#"{"d":{"r":1,"g":0,"b":0}}"#);
        assert!(result.is_err(), "alpha is required");
    }

    #[test]
    fn test_color_out_of_range() {
        let over = ColorPayload { r: 256, g: 0, b: 0, alpha: 1.0 };
        assert_eq!(over.to_argb(), None);

        let negative = ColorPayload { r: 0, g: -1, b: 0, alpha: 1.0 };
        assert_eq!(negative.to_argb(), None);

        let alpha_over = ColorPayload { r: 0, g: 0, b: 0, alpha: 1.01 };
        assert_eq!(alpha_over.to_argb(), None);

        let alpha_nan = ColorPayload { r: 0, g: 0, b: 0, alpha: f64::NAN };
        assert_eq!(alpha_nan.to_argb(), None);
    }

    #[test]
    fn test_argb_packing() {
        assert_eq!(Argb::WHITE.to_u32(), 0xFFFF_FFFF);
        assert_eq!(Argb { a: 0x80, r: 0x10, g: 0x20, b: 0x30 }.to_u32(), 0x8010_2030);
        assert_eq!(Argb::default(), Argb::WHITE);
    }

    proptest! {
        #[test]
        fn valid_colors_convert_exactly(
            r in 0i64..=255,
            g in 0i64..=255,
            b in 0i64..=255,
            alpha in 0.0f64..=1.0,
        ) {
            let argb = ColorPayload { r, g, b, alpha }.to_argb();
            prop_assert!(argb.is_some());
            let argb = argb.unwrap();
            prop_assert_eq!(argb.r as i64, r);
            prop_assert_eq!(argb.g as i64, g);
            prop_assert_eq!(argb.b as i64, b);
            prop_assert_eq!(argb.a as f64, (alpha * 255.0).round());
        }

        #[test]
        fn out_of_range_channels_are_rejected(
            bad in prop_oneof![-1000i64..0, 256i64..1000],
            slot in 0usize..3,
        ) {
            let mut channels = [10i64, 20, 30];
            channels[slot] = bad;
            let payload = ColorPayload { r: channels[0], g: channels[1], b: channels[2], alpha: 0.5 };
            prop_assert!(payload.to_argb().is_none());
        }

        #[test]
        fn out_of_range_alpha_is_rejected(
            alpha in prop_oneof![-10.0f64..-0.002, 1.002f64..10.0],
        ) {
            let payload = ColorPayload { r: 1, g: 2, b: 3, alpha };
            prop_assert!(payload.to_argb().is_none());
        }
    }
}
