use super::errors::ConsumerError;
use crate::storage::Alert;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Message read from the alert topic, detached from the client buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Alert as produced by the scoring engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertEvent {
    pub ts: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: String,
    pub score: f64,
    #[serde(default)]
    pub features: HashMap<String, f64>,
}

impl AlertEvent {
    pub fn decode(payload: Option<&[u8]>) -> Result<AlertEvent, ConsumerError> {
        let payload = payload.ok_or(ConsumerError::EmptyPayload)?;
        let event: AlertEvent = serde_json::from_slice(payload)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), ConsumerError> {
        if !self.score.is_finite() || !(0.0..=1.0).contains(&self.score) {
            return Err(ConsumerError::Invalid(format!(
                "score {} is outside of [0, 1]",
                self.score
            )));
        }
        if self.src_ip.is_empty() || self.dst_ip.is_empty() {
            return Err(ConsumerError::Invalid("missing address".to_owned()));
        }
        Ok(())
    }

    /// RFC 3339 timestamp of the event, the current time when it does not parse.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match DateTime::parse_from_rfc3339(&self.ts) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                debug!("alert timestamp {:?} is not rfc3339 ({}), using now", self.ts, e);
                Utc::now()
            }
        }
    }

    pub fn into_alert(self) -> Alert {
        let timestamp = self.timestamp();
        let features = serde_json::to_string(&self.features).unwrap_or_else(|_| "{}".to_owned());

        Alert {
            id: Uuid::new_v4(),
            timestamp,
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            protocol: self.proto,
            score: self.score,
            features,
            created_at: Utc::now(),
        }
    }
}

/// Observer facing summary of a persisted alert.
pub fn notification(alert: &Alert) -> serde_json::Value {
    json!({
        "id": alert.id.to_string(),
        "ts": alert.timestamp.timestamp_millis(),
        "src_ip": alert.src_ip,
        "dst_ip": alert.dst_ip,
        "src_port": alert.src_port,
        "dst_port": alert.dst_port,
        "protocol": alert.protocol,
        "score": alert.score,
    })
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    pub const ALERT: &str = r#"{
        "ts": "2024-03-01T12:00:00Z",
        "src_ip": "10.0.0.1",
        "dst_ip": "10.0.0.2",
        "src_port": 443,
        "dst_port": 51000,
        "proto": "TCP",
        "score": 0.92,
        "features": {"entropy": 7.9, "payload_len": 1200.0}
    }"#;

    #[test]
    fn test_decode_alert() {
        let event = AlertEvent::decode(Some(ALERT.as_bytes())).expect("alert should decode");

        assert_eq!(event.src_ip, "10.0.0.1");
        assert_eq!(event.dst_port, 51000);
        assert_eq!(event.score, 0.92);
        assert_eq!(event.features.get("entropy"), Some(&7.9));
        assert_eq!(
            event.timestamp(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_features_are_optional() {
        let payload = r#"{"ts": "2024-03-01T12:00:00Z", "src_ip": "a", "dst_ip": "b",
            "src_port": 1, "dst_port": 2, "proto": "UDP", "score": 0.1}"#;
        let event = AlertEvent::decode(Some(payload.as_bytes())).expect("alert should decode");

        assert!(event.features.is_empty());
        assert_eq!(event.into_alert().features, "{}");
    }

    #[test_case(None ; "missing payload")]
    #[test_case(Some("not json") ; "not json")]
    #[test_case(Some(r#"{"src_ip": "10.0.0.1"}"#) ; "missing fields")]
    #[test_case(Some(r#"{"ts": "", "src_ip": "a", "dst_ip": "b", "src_port": 1, "dst_port": 2, "proto": "TCP", "score": 1.5}"#) ; "score above one")]
    #[test_case(Some(r#"{"ts": "", "src_ip": "a", "dst_ip": "b", "src_port": 1, "dst_port": 2, "proto": "TCP", "score": -0.1}"#) ; "negative score")]
    #[test_case(Some(r#"{"ts": "", "src_ip": "", "dst_ip": "b", "src_port": 1, "dst_port": 2, "proto": "TCP", "score": 0.5}"#) ; "empty source address")]
    fn test_rejected_payloads(payload: Option<&str>) {
        assert!(AlertEvent::decode(payload.map(str::as_bytes)).is_err());
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_now() {
        let payload = r#"{"ts": "yesterday", "src_ip": "a", "dst_ip": "b",
            "src_port": 1, "dst_port": 2, "proto": "TCP", "score": 0.5}"#;
        let before = Utc::now();
        let alert = AlertEvent::decode(Some(payload.as_bytes()))
            .expect("alert should decode")
            .into_alert();

        assert!(alert.timestamp >= before);
        assert!(alert.timestamp <= Utc::now());
    }

    #[test]
    fn test_notification_fields() {
        let alert = AlertEvent::decode(Some(ALERT.as_bytes()))
            .expect("alert should decode")
            .into_alert();
        let note = notification(&alert);

        assert_eq!(note["id"], alert.id.to_string());
        assert_eq!(note["ts"], 1_709_294_400_000i64);
        assert_eq!(note["src_port"], 443);
        assert_eq!(note["protocol"], "TCP");
        assert_eq!(note["score"], 0.92);
        assert!(note.get("features").is_none());
    }
}
