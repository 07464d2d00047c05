//! Export contracts - BulkTransferSession input/output
//!
//! Wire shape of the negotiation request and reply, plus the reassembled payload.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Export file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
        }
    }
}

/// Export request
///
/// Serialized as `{asset, channels[], start, end, format, download_name?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(rename = "asset")]
    pub asset_id: u32,

    #[serde(rename = "channels")]
    pub channel_ids: BTreeSet<u32>,

    /// Range start (RFC 3339)
    pub start: String,

    /// Range end (RFC 3339)
    pub end: String,

    #[serde(default)]
    pub format: ExportFormat,

    #[serde(
        rename = "download_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub requested_filename: Option<String>,
}

impl ExportRequest {
    /// Build and validate a CSV export request
    ///
    /// # Errors
    /// `InvalidRequest` on a zero asset, no channels, unparsable range or `end < start`
    pub fn new(
        asset_id: u32,
        channel_ids: impl IntoIterator<Item = u32>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Result<Self, TransferError> {
        let request = Self {
            asset_id,
            channel_ids: channel_ids.into_iter().collect(),
            start: start.into(),
            end: end.into(),
            format: ExportFormat::Csv,
            requested_filename: None,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.requested_filename = Some(name.into());
        self
    }

    /// Check the request; responders call this on deserialized input too
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.asset_id == 0 {
            return Err(TransferError::invalid_request("asset must be > 0"));
        }
        if self.channel_ids.is_empty() {
            return Err(TransferError::invalid_request("no channels requested"));
        }
        let (start, end) = self.range()?;
        if end < start {
            return Err(TransferError::invalid_request("end must be after start"));
        }
        Ok(())
    }

    /// Parsed `(start, end)` in UTC
    pub fn range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), TransferError> {
        let parse = |label: &str, raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| TransferError::invalid_request(format!("invalid {label} timestamp: {e}")))
        };
        Ok((parse("start", &self.start)?, parse("end", &self.end)?))
    }

    /// Requested name, or `asset001_<start>_<end>.csv`
    pub fn file_name(&self) -> String {
        if let Some(name) = &self.requested_filename {
            return name.clone();
        }
        match self.range() {
            Ok((start, end)) => format!(
                "asset{:03}_{}_{}.{}",
                self.asset_id,
                start.format("%Y%m%dT%H%M%S"),
                end.format("%Y%m%dT%H%M%S"),
                self.format.extension()
            ),
            Err(_) => format!("asset{:03}_export.{}", self.asset_id, self.format.extension()),
        }
    }
}

/// Negotiation outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationStatus {
    Ok,
    Error,
}

/// Negotiation result produced by the responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportNegotiationResult {
    pub status: NegotiationStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size_bytes: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    pub missing_channel_ids: BTreeSet<u32>,

    /// Human-readable rejection reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Lenient reply shape: responders may send `{"error": "..."}` alone
#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    status: Option<NegotiationStatus>,
    #[serde(default, alias = "error")]
    reason: Option<String>,
    #[serde(default)]
    control_channel: Option<String>,
    #[serde(default)]
    data_channel: Option<String>,
    #[serde(default)]
    expected_size_bytes: Option<u64>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    missing_channel_ids: BTreeSet<u32>,
}

impl ExportNegotiationResult {
    pub fn accepted(control_channel: impl Into<String>, data_channel: impl Into<String>) -> Self {
        Self {
            status: NegotiationStatus::Ok,
            control_channel: Some(control_channel.into()),
            data_channel: Some(data_channel.into()),
            expected_size_bytes: None,
            content_type: None,
            missing_channel_ids: BTreeSet::new(),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: NegotiationStatus::Error,
            control_channel: None,
            data_channel: None,
            expected_size_bytes: None,
            content_type: None,
            missing_channel_ids: BTreeSet::new(),
            reason: Some(reason.into()),
        }
    }

    /// Parse a reply payload
    ///
    /// A reply without `status` is an error when it carries `error`/`reason`.
    pub fn from_reply(payload: &[u8]) -> Result<Self, TransferError> {
        let raw: RawReply = serde_json::from_slice(payload)
            .map_err(|e| TransferError::malformed(format!("invalid negotiation reply: {e}")))?;

        let status = raw.status.unwrap_or(if raw.reason.is_some() {
            NegotiationStatus::Error
        } else {
            NegotiationStatus::Ok
        });

        Ok(Self {
            status,
            control_channel: raw.control_channel,
            data_channel: raw.data_channel,
            expected_size_bytes: raw.expected_size_bytes,
            content_type: raw.content_type,
            missing_channel_ids: raw.missing_channel_ids,
            reason: raw.reason,
        })
    }

    pub fn to_reply(&self) -> Bytes {
        // Serializing plain strings/ints cannot fail
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// `(control, data)` channels of an accepted negotiation
    ///
    /// # Errors
    /// `Rejected` for an error status, `MalformedFrame` when a channel is missing
    pub fn channels(&self) -> Result<(&str, &str), TransferError> {
        if self.status == NegotiationStatus::Error {
            return Err(TransferError::Rejected {
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "export rejected without reason".to_string()),
            });
        }
        match (self.control_channel.as_deref(), self.data_channel.as_deref()) {
            (Some(control), Some(data)) if !control.is_empty() && !data.is_empty() => {
                Ok((control, data))
            }
            _ => Err(TransferError::malformed(
                "negotiation accepted without control/data channel",
            )),
        }
    }
}

/// Reassembled export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPayload {
    /// Concatenation of all chunks in arrival order
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: String,
    /// Authoritative byte count
    pub size: u64,
    /// Requested channels that had no data
    pub missing_channel_ids: Vec<u32>,
}

/// Transfer session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Negotiating,
    Streaming,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_names() {
        let req = ExportRequest::new(1, [3, 1], "2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z")
            .unwrap()
            .with_filename("run.csv");
        let json: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(json["asset"], 1);
        assert_eq!(json["channels"], serde_json::json!([1, 3]));
        assert_eq!(json["format"], "csv");
        assert_eq!(json["download_name"], "run.csv");
    }

    #[test]
    fn test_request_validation() {
        assert!(ExportRequest::new(0, [1], "2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z").is_err());
        assert!(ExportRequest::new(1, [], "2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z").is_err());
        let err = ExportRequest::new(1, [1], "2024-01-01T02:00:00Z", "2024-01-01T01:00:00Z")
            .unwrap_err();
        assert_eq!(err, TransferError::invalid_request("end must be after start"));
        assert!(ExportRequest::new(1, [1], "yesterday", "2024-01-01T01:00:00Z").is_err());
    }

    #[test]
    fn test_default_file_name() {
        let req =
            ExportRequest::new(7, [1], "2024-03-05T10:00:00Z", "2024-03-05T11:30:00Z").unwrap();
        assert_eq!(req.file_name(), "asset007_20240305T100000_20240305T113000.csv");
    }

    #[test]
    fn test_reply_error_only_payload_is_rejection() {
        let result = ExportNegotiationResult::from_reply(br#"{"error":"no data for asset"}"#).unwrap();
        assert_eq!(result.status, NegotiationStatus::Error);
        assert_eq!(
            result.channels().unwrap_err(),
            TransferError::Rejected {
                reason: "no data for asset".into()
            }
        );
    }

    #[test]
    fn test_reply_round_trip_accepted() {
        let mut accepted = ExportNegotiationResult::accepted("export.ctl.1", "export.data.1");
        accepted.expected_size_bytes = Some(42);
        accepted.missing_channel_ids.insert(4);
        let parsed = ExportNegotiationResult::from_reply(&accepted.to_reply()).unwrap();
        assert_eq!(parsed, accepted);
        assert_eq!(parsed.channels().unwrap(), ("export.ctl.1", "export.data.1"));
    }

    #[test]
    fn test_reply_without_channels_is_malformed() {
        let parsed = ExportNegotiationResult::from_reply(br#"{"status":"ok"}"#).unwrap();
        assert!(matches!(
            parsed.channels(),
            Err(TransferError::MalformedFrame { .. })
        ));
        assert!(ExportNegotiationResult::from_reply(b"not json").is_err());
    }
}
