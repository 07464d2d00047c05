//! Transfer frames carried on an export data channel
//!
//! Bus variant: the `event` header selects the kind, body is raw bytes or JSON.
//! Socket variant: JSON text frames tagged by `type`, binary frames are chunks.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Declared export metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Authoritative totals sent just before `complete`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<u64>,
    #[serde(default)]
    pub missing_channels: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

/// One frame of an export stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFrame {
    Meta(MetaFrame),
    Chunk(Bytes),
    Summary(SummaryFrame),
    Complete,
    Error { message: String },
    /// Unrecognised kind, ignored by consumers
    Unknown(String),
}

impl TransferFrame {
    /// Decode a bus data-channel message from its `event` tag and body
    pub fn from_event(event: Option<&str>, body: Bytes) -> Result<Self, TransferError> {
        match event {
            None | Some("chunk") => Ok(Self::Chunk(body)),
            Some("meta") => Ok(Self::Meta(parse_json_body("meta", &body)?)),
            Some("summary") => Ok(Self::Summary(parse_json_body("summary", &body)?)),
            Some("complete") => Ok(Self::Complete),
            Some("error") => Ok(Self::Error {
                message: error_message(&body),
            }),
            Some(other) => Ok(Self::Unknown(other.to_string())),
        }
    }

    /// Decode a socket JSON text frame `{type: ..., ...}`
    pub fn from_json_text(text: &str) -> Result<Self, TransferError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| TransferError::malformed(format!("invalid JSON frame: {e}")))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let frame = match kind.as_str() {
            "meta" => Self::Meta(from_value("meta", value)?),
            "summary" => Self::Summary(from_value("summary", value)?),
            "complete" => Self::Complete,
            "error" => {
                let body: ErrorBody = from_value("error", value)?;
                Self::Error {
                    message: body.message,
                }
            }
            _ => Self::Unknown(kind),
        };
        Ok(frame)
    }

    /// `event` tag used on the bus
    pub fn event(&self) -> &str {
        match self {
            Self::Meta(_) => "meta",
            Self::Chunk(_) => "chunk",
            Self::Summary(_) => "summary",
            Self::Complete => "complete",
            Self::Error { .. } => "error",
            Self::Unknown(kind) => kind,
        }
    }

    /// Body bytes used on the bus
    pub fn body(&self) -> Bytes {
        match self {
            Self::Chunk(bytes) => bytes.clone(),
            Self::Meta(meta) => json_bytes(meta),
            Self::Summary(summary) => json_bytes(summary),
            Self::Error { message } => json_bytes(&ErrorBody {
                message: message.clone(),
            }),
            Self::Complete | Self::Unknown(_) => Bytes::new(),
        }
    }

    /// JSON text form for the socket variant; `None` for binary chunks
    pub fn to_json_text(&self) -> Option<String> {
        let mut value = match self {
            Self::Chunk(_) => return None,
            Self::Meta(meta) => serde_json::to_value(meta).ok()?,
            Self::Summary(summary) => serde_json::to_value(summary).ok()?,
            Self::Error { message } => serde_json::json!({ "message": message }),
            Self::Complete | Self::Unknown(_) => serde_json::json!({}),
        };
        value
            .as_object_mut()?
            .insert("type".into(), serde_json::Value::String(self.event().to_string()));
        Some(value.to_string())
    }
}

fn parse_json_body<T>(kind: &str, body: &[u8]) -> Result<T, TransferError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| TransferError::malformed(format!("invalid {kind} body: {e}")))
}

fn from_value<T>(kind: &str, value: serde_json::Value) -> Result<T, TransferError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(value)
        .map_err(|e| TransferError::malformed(format!("invalid {kind} frame: {e}")))
}

fn error_message(body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        return parsed.message;
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        "remote export error".to_string()
    } else {
        text
    }
}

fn json_bytes<T: Serialize>(value: &T) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_message_is_chunk() {
        let frame = TransferFrame::from_event(None, Bytes::from_static(b"a,b\n")).unwrap();
        assert_eq!(frame, TransferFrame::Chunk(Bytes::from_static(b"a,b\n")));
    }

    #[test]
    fn test_meta_body_uses_camel_case() {
        let frame = TransferFrame::from_event(
            Some("meta"),
            Bytes::from_static(br#"{"fileName":"x.csv","contentType":"text/csv","size":12}"#),
        )
        .unwrap();
        let TransferFrame::Meta(meta) = frame else {
            panic!("expected meta");
        };
        assert_eq!(meta.file_name.as_deref(), Some("x.csv"));
        assert_eq!(meta.size, Some(12));
    }

    #[test]
    fn test_error_body_plain_text_fallback() {
        let json = TransferFrame::from_event(Some("error"), Bytes::from_static(br#"{"message":"disk"}"#))
            .unwrap();
        assert_eq!(json, TransferFrame::Error { message: "disk".into() });

        let text = TransferFrame::from_event(Some("error"), Bytes::from_static(b"parquet missing"))
            .unwrap();
        assert_eq!(
            text,
            TransferFrame::Error {
                message: "parquet missing".into()
            }
        );
    }

    #[test]
    fn test_unknown_event_kept_for_skipping() {
        let frame = TransferFrame::from_event(Some("progress"), Bytes::new()).unwrap();
        assert_eq!(frame, TransferFrame::Unknown("progress".into()));
    }

    #[test]
    fn test_socket_text_frames() {
        let summary =
            TransferFrame::from_json_text(r#"{"type":"summary","bytesSent":10,"missingChannels":[2]}"#)
                .unwrap();
        assert_eq!(
            summary,
            TransferFrame::Summary(SummaryFrame {
                bytes_sent: Some(10),
                missing_channels: vec![2]
            })
        );
        assert_eq!(
            TransferFrame::from_json_text(r#"{"type":"complete"}"#).unwrap(),
            TransferFrame::Complete
        );
        assert!(TransferFrame::from_json_text("{oops").is_err());
    }

    #[test]
    fn test_text_encoding_matches_decoder() {
        let meta = TransferFrame::Meta(MetaFrame {
            file_name: Some("a.csv".into()),
            content_type: None,
            size: None,
        });
        let text = meta.to_json_text().unwrap();
        assert_eq!(TransferFrame::from_json_text(&text).unwrap(), meta);
        assert!(TransferFrame::Chunk(Bytes::new()).to_json_text().is_none());
    }
}
