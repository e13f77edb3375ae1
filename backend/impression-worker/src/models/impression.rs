use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;

/// One ad impression as published to the impressions topic.
///
/// Expected format:
/// ```json
/// {
///   "id": "5f0c6a1e-...",
///   "ts": 1678901234567,
///   "userId": "u-123",
///   "adId": "a-456"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    /// Producer-assigned identifier
    pub id: String,

    /// Occurrence time (milliseconds since epoch)
    pub ts: i64,

    pub user_id: String,

    pub ad_id: String,
}

impl Impression {
    pub fn new(
        id: impl Into<String>,
        ts: i64,
        user_id: impl Into<String>,
        ad_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ts,
            user_id: user_id.into(),
            ad_id: ad_id.into(),
        }
    }

    /// Identity used for deduplication.
    ///
    /// All four fields take part, so the same user/ad pair reported with a
    /// different timestamp is a different impression.
    pub fn identity_key(&self) -> String {
        format!("{} {} {} {}", self.id, self.ts, self.ad_id, self.user_id)
    }

    /// Parse a raw record value into an impression.
    ///
    /// JSON syntax errors and schema violations (missing fields, wrong
    /// types) are reported separately so the drop reason is visible in logs.
    pub fn from_payload(payload: Option<&[u8]>) -> Result<Self, RecordError> {
        let payload = payload.ok_or(RecordError::EmptyPayload)?;
        let text = std::str::from_utf8(payload)?;
        let value: Value = serde_json::from_str(text).map_err(RecordError::InvalidJson)?;
        serde_json::from_value(value).map_err(RecordError::Schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_payload() {
        let payload = br#"{"id":"x","ts":100,"userId":"u1","adId":"a1"}"#;
        let impression = Impression::from_payload(Some(payload)).unwrap();

        assert_eq!(impression, Impression::new("x", 100, "u1", "a1"));
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let payload = br#"{"id":"x","ts":100,"userId":"u1","adId":"a1","campaign":"c9"}"#;
        assert!(Impression::from_payload(Some(payload)).is_ok());
    }

    #[test]
    fn test_parse_rejects_empty_payload() {
        assert!(matches!(
            Impression::from_payload(None),
            Err(RecordError::EmptyPayload)
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let result = Impression::from_payload(Some(b"{not json"));
        assert!(matches!(result, Err(RecordError::InvalidJson(_))));
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        let result = Impression::from_payload(Some(&[0xff, 0xfe, 0x00]));
        assert!(matches!(result, Err(RecordError::InvalidUtf8(_))));
    }

    #[test]
    fn test_parse_rejects_schema_violations() {
        let missing_ad = br#"{"id":"x","ts":100,"userId":"u1"}"#;
        assert!(matches!(
            Impression::from_payload(Some(missing_ad)),
            Err(RecordError::Schema(_))
        ));

        let string_ts = br#"{"id":"x","ts":"100","userId":"u1","adId":"a1"}"#;
        assert!(matches!(
            Impression::from_payload(Some(string_ts)),
            Err(RecordError::Schema(_))
        ));

        let numeric_id = br#"{"id":7,"ts":100,"userId":"u1","adId":"a1"}"#;
        assert!(matches!(
            Impression::from_payload(Some(numeric_id)),
            Err(RecordError::Schema(_))
        ));

        let not_object = br#"[1,2,3]"#;
        assert!(matches!(
            Impression::from_payload(Some(not_object)),
            Err(RecordError::Schema(_))
        ));
    }

    #[test]
    fn test_identity_key_uses_all_fields() {
        let a = Impression::new("x", 100, "u1", "a1");
        let later = Impression::new("x", 101, "u1", "a1");
        let other_user = Impression::new("x", 100, "u2", "a1");

        assert_eq!(a.identity_key(), "x 100 a1 u1");
        assert_ne!(a.identity_key(), later.identity_key());
        assert_ne!(a.identity_key(), other_user.identity_key());
    }
}
