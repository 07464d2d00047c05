//! Scan table codec
//!
//! Frames are FlatBuffers `Scan` tables (`schema/scan.fbs`):
//!
//! ```text
//! table Scan { timestamp: string; values: [double]; }
//! ```
//!
//! Every buffer goes through the FlatBuffers verifier before a field is read,
//! so bounds, alignment and UTF-8 violations surface as `Malformed`.

use bytes::Bytes;
use contracts::{DecodeError, ScanFrame};
use flatbuffers::FlatBufferBuilder;

use crate::scan_generated::{Scan, ScanArgs};

/// Decode one scan frame
///
/// # Errors
/// - `MissingTimestamp`: timestamp absent or empty
/// - `EmptyValues`: values absent or zero length
/// - `Malformed`: the verifier rejected the buffer
pub fn decode(buf: &[u8]) -> Result<ScanFrame, DecodeError> {
    let scan = flatbuffers::root::<Scan>(buf).map_err(|e| DecodeError::malformed(e.to_string()))?;

    let batch_timestamp = match scan.timestamp() {
        Some(ts) if !ts.is_empty() => ts,
        _ => return Err(DecodeError::MissingTimestamp),
    };

    let values: Vec<f64> = match scan.values() {
        Some(values) if !values.is_empty() => values.iter().collect(),
        _ => return Err(DecodeError::EmptyValues),
    };

    Ok(ScanFrame {
        batch_timestamp: batch_timestamp.to_string(),
        values,
    })
}

/// Encode a scan frame
pub fn encode(frame: &ScanFrame) -> Bytes {
    let mut builder =
        FlatBufferBuilder::with_capacity(64 + frame.batch_timestamp.len() + frame.values.len() * 8);
    let values = builder.create_vector(&frame.values);
    let timestamp = builder.create_string(&frame.batch_timestamp);
    let scan = Scan::create(
        &mut builder,
        &ScanArgs {
            timestamp: Some(timestamp),
            values: Some(values),
        },
    );
    builder.finish(scan, None);
    Bytes::copy_from_slice(builder.finished_data())
}
