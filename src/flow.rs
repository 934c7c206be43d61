use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per packet record published to the flow topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlowMetadata {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    #[serde(rename = "proto")]
    pub protocol: String,
    pub payload_len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_flags: Option<String>,
    pub entropy: f64,
}

impl FlowMetadata {
    pub fn five_tuple(&self) -> FiveTuple<'_> {
        FiveTuple {
            src_ip: &self.src_ip,
            src_port: self.src_port,
            dst_ip: &self.dst_ip,
            dst_port: self.dst_port,
            protocol: &self.protocol,
        }
    }

    /// Key used for log partitioning, `srcIP:srcPort-dstIP:dstPort-proto`.
    pub fn partition_key(&self) -> String {
        self.five_tuple().to_string()
    }
}

/// Borrowed view of the fields identifying a single flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple<'a> {
    pub src_ip: &'a str,
    pub src_port: u16,
    pub dst_ip: &'a str,
    pub dst_port: u16,
    pub protocol: &'a str,
}

impl fmt::Display for FiveTuple<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}-{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub fn flow(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16, entropy: f64) -> FlowMetadata {
        FlowMetadata {
            timestamp: Utc::now(),
            src_ip: src_ip.to_owned(),
            dst_ip: dst_ip.to_owned(),
            src_port,
            dst_port,
            protocol: "TCP".to_owned(),
            payload_len: 128,
            tcp_flags: Some("PA".to_owned()),
            entropy,
        }
    }

    #[test]
    fn test_partition_key_format() {
        let f = flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9);

        assert_eq!(f.partition_key(), "10.0.0.1:443-10.0.0.2:51000-TCP");
    }

    #[test]
    fn test_same_flow_same_key() {
        let first = flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9);
        let mut second = flow("10.0.0.1", 443, "10.0.0.2", 51000, 1.2);
        second.payload_len = 4;
        second.tcp_flags = None;

        assert_eq!(first.partition_key(), second.partition_key());
    }

    #[test]
    fn test_reverse_direction_is_a_different_flow() {
        let forward = flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9);
        let reverse = flow("10.0.0.2", 51000, "10.0.0.1", 443, 7.9);

        assert!(forward.partition_key() != reverse.partition_key());
    }

    #[test]
    fn test_json_field_names() {
        let mut f = flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9);
        f.tcp_flags = None;
        let value = serde_json::to_value(&f).expect("flow should serialize");

        assert_eq!(value["proto"], "TCP");
        assert_eq!(value["src_port"], 443);
        assert_eq!(value["payload_len"], 128);
        assert!(value.get("ts").is_some());
        assert!(value.get("tcp_flags").is_none());
    }
}
