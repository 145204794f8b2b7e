//! Core data models for the gateway

use crate::decode::{parse_count, parse_mem_usage, parse_percent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of `docker stats --format "{{json .}}"`
///
/// Field names follow the Docker CLI template keys. Keys this struct does
/// not know about are carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Container", default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    #[serde(rename = "CPUPerc", default)]
    pub cpu_perc: String,
    #[serde(rename = "MemUsage", default)]
    pub mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    pub mem_perc: String,
    #[serde(rename = "NetIO", default)]
    pub net_io: String,
    #[serde(rename = "BlockIO", default)]
    pub block_io: String,
    #[serde(rename = "PIDs", default)]
    pub pids: String,
    /// Anomaly flag attached after scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerRecord {
    /// Name if Docker reported one, otherwise the container ID
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Numeric feature tuple sent to the scoring process
///
/// Memory figures are always MiB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub cpu_perc: f64,
    pub mem_usage: f64,
    pub mem_limit: f64,
    pub mem_perc: f64,
    pub pids: u64,
}

impl PredictionInput {
    /// Derive the feature tuple from a stats record
    ///
    /// Fields Docker could not report (`--`, empty) become zero.
    pub fn from_record(record: &ContainerRecord) -> Self {
        let (mem_usage, mem_limit) = parse_mem_usage(&record.mem_usage);
        Self {
            cpu_perc: parse_percent(&record.cpu_perc).unwrap_or(0.0),
            mem_usage: mem_usage.unwrap_or(0.0),
            mem_limit: mem_limit.unwrap_or(0.0),
            mem_perc: parse_percent(&record.mem_perc).unwrap_or(0.0),
            pids: parse_count(&record.pids).unwrap_or(0),
        }
    }
}

/// One line of `docker images --format "{{json .}}"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Repository", default)]
    pub repository: String,
    #[serde(rename = "Tag", default)]
    pub tag: String,
    #[serde(rename = "Size", default)]
    pub size: String,
    #[serde(rename = "CreatedSince", default)]
    pub created_since: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One line of `docker volume ls --format "{{json .}}"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Driver", default)]
    pub driver: String,
    #[serde(rename = "Mountpoint", default)]
    pub mountpoint: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Bytes captured from a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandResult {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS_LINE: &str = r#"{"BlockIO":"8.19kB / 0B","CPUPerc":"12.50%","Container":"4f1c","ID":"4f1c2d3e","MemPerc":"25.00%","MemUsage":"512MiB / 2GiB","Name":"web","NetIO":"1.2kB / 648B","PIDs":"7"}"#;

    #[test]
    fn test_container_record_parses_stats_line() {
        let record: ContainerRecord = serde_json::from_str(STATS_LINE).unwrap();
        assert_eq!(record.id, "4f1c2d3e");
        assert_eq!(record.display_name(), "web");
        assert_eq!(record.mem_usage, "512MiB / 2GiB");
        assert!(record.warning.is_none());
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_container_record_keeps_unknown_fields() {
        let record: ContainerRecord =
            serde_json::from_str(r#"{"ID":"abc","Name":"db","Labels":"tier=data"}"#).unwrap();
        assert_eq!(record.extra["Labels"], "tier=data");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["Labels"], "tier=data");
        assert!(json.get("warning").is_none());
    }

    #[test]
    fn test_container_record_requires_id() {
        assert!(serde_json::from_str::<ContainerRecord>(r#"{"Name":"orphan"}"#).is_err());
    }

    #[test]
    fn test_prediction_input_from_record() {
        let record: ContainerRecord = serde_json::from_str(STATS_LINE).unwrap();
        let input = PredictionInput::from_record(&record);

        assert_eq!(input.cpu_perc, 12.5);
        assert_eq!(input.mem_usage, 512.0);
        assert_eq!(input.mem_limit, 2048.0);
        assert_eq!(input.mem_perc, 25.0);
        assert_eq!(input.pids, 7);
    }

    #[test]
    fn test_prediction_input_defaults_missing_fields_to_zero() {
        let record: ContainerRecord = serde_json::from_str(
            r#"{"ID":"dead","CPUPerc":"--","MemUsage":"-- / --","MemPerc":"--","PIDs":"--"}"#,
        )
        .unwrap();
        let input = PredictionInput::from_record(&record);

        assert_eq!(input.cpu_perc, 0.0);
        assert_eq!(input.mem_usage, 0.0);
        assert_eq!(input.mem_limit, 0.0);
        assert_eq!(input.pids, 0);
    }

    #[test]
    fn test_prediction_input_wire_format() {
        let input = PredictionInput {
            cpu_perc: 1.5,
            mem_usage: 200.0,
            mem_limit: 1024.0,
            mem_perc: 19.53,
            pids: 4,
        };
        let json = serde_json::to_value(input).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "cpu_perc": 1.5,
                "mem_usage": 200.0,
                "mem_limit": 1024.0,
                "mem_perc": 19.53,
                "pids": 4
            })
        );
    }
}
