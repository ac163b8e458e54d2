use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::protocol::{
    FIELD_CODE, FIELD_DATA, FIELD_MSG, FIELD_QRDATA, FIELD_STATUS, FIELD_TIMESTAMP,
};

/// Receipt timestamps are local time at minute precision, e.g. "2024-05-01 09:41"
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Message carried by the error record when `qrdata` is missing
pub const MISSING_QRDATA_MSG: &str = "missing qrdata field";

pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Server-assigned outcome of an ingestion request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Received,
    Error,
}

impl RecordStatus {
    /// The `code` value that always accompanies this status
    pub fn code(self) -> u16 {
        match self {
            RecordStatus::Received => 200,
            RecordStatus::Error => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Received => "received",
            RecordStatus::Error => "error",
        }
    }
}

/// A normalized scan record.
///
/// Wraps the JSON object that is both returned to the client and pushed to
/// the local observer. Client fields are kept as sent; the server fields
/// `status`, `code` and `timestamp` are always present and always agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanRecord(Map<String, Value>);

impl ScanRecord {
    /// Normalize a payload, choosing the success or error shape depending on
    /// whether it carries `qrdata`.
    pub fn normalize(payload: Map<String, Value>, at: DateTime<Local>) -> Self {
        if payload.contains_key(FIELD_QRDATA) {
            Self::received(payload, at)
        } else {
            Self::rejected(payload, at)
        }
    }

    /// Success shape: every client field plus server fields, server fields win
    pub fn received(payload: Map<String, Value>, at: DateTime<Local>) -> Self {
        let mut fields = payload;
        stamp(&mut fields, RecordStatus::Received, at);
        Self(fields)
    }

    /// Error shape: the original payload is preserved under `data`
    pub fn rejected(payload: Map<String, Value>, at: DateTime<Local>) -> Self {
        let mut fields = Map::new();
        fields.insert(FIELD_MSG.to_string(), Value::from(MISSING_QRDATA_MSG));
        fields.insert(FIELD_DATA.to_string(), Value::Object(payload));
        stamp(&mut fields, RecordStatus::Error, at);
        Self(fields)
    }

    /// Liveness reply: only the server fields
    pub fn heartbeat(at: DateTime<Local>) -> Self {
        let mut fields = Map::new();
        stamp(&mut fields, RecordStatus::Received, at);
        Self(fields)
    }

    pub fn status(&self) -> Option<RecordStatus> {
        match self.0.get(FIELD_STATUS)?.as_str()? {
            "received" => Some(RecordStatus::Received),
            "error" => Some(RecordStatus::Error),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<u16> {
        self.0
            .get(FIELD_CODE)?
            .as_u64()
            .and_then(|c| u16::try_from(c).ok())
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.0.get(FIELD_TIMESTAMP)?.as_str()
    }

    pub fn qrdata(&self) -> Option<&Value> {
        self.0.get(FIELD_QRDATA)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

fn stamp(fields: &mut Map<String, Value>, status: RecordStatus, at: DateTime<Local>) {
    fields.insert(FIELD_STATUS.to_string(), Value::from(status.as_str()));
    fields.insert(FIELD_CODE.to_string(), Value::from(status.code()));
    fields.insert(FIELD_TIMESTAMP.to_string(), Value::from(format_timestamp(at)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 9, 41, 37).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_received_keeps_extra_fields() {
        let payload = object(json!({"qrdata": "ABC-123", "template": "inbound", "index": 4}));
        let record = ScanRecord::normalize(payload, at());

        assert_eq!(record.status(), Some(RecordStatus::Received));
        assert_eq!(record.code(), Some(200));
        assert_eq!(record.timestamp(), Some("2024-05-01 09:41"));
        assert_eq!(record.qrdata(), Some(&json!("ABC-123")));
        assert_eq!(record.get("template"), Some(&json!("inbound")));
        assert_eq!(record.get("index"), Some(&json!(4)));
    }

    #[test]
    fn test_server_fields_override_client_fields() {
        let payload = object(json!({"qrdata": "x", "status": "bogus", "code": 7, "timestamp": "yesterday"}));
        let record = ScanRecord::normalize(payload, at());

        assert_eq!(record.status(), Some(RecordStatus::Received));
        assert_eq!(record.code(), Some(200));
        assert_eq!(record.timestamp(), Some("2024-05-01 09:41"));
    }

    #[test]
    fn test_missing_qrdata_is_rejected_with_payload_echoed() {
        let payload = object(json!({"code": "ABC", "note": "wrong key"}));
        let record = ScanRecord::normalize(payload, at());

        assert_eq!(record.status(), Some(RecordStatus::Error));
        assert_eq!(record.code(), Some(500));
        assert_eq!(record.get("msg"), Some(&json!(MISSING_QRDATA_MSG)));
        assert_eq!(record.get("data"), Some(&json!({"code": "ABC", "note": "wrong key"})));
        assert!(record.get("note").is_none(), "error record must not lift client fields");
    }

    #[test]
    fn test_heartbeat_shape() {
        let record = ScanRecord::heartbeat(at());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"status": "received", "code": 200, "timestamp": "2024-05-01 09:41"})
        );
    }
}
