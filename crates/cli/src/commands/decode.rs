//! `decode` command implementation.

use anyhow::{Context, Result};
use contracts::{ClockConfig, ReconstructOutcome, ScanFrame, TimedSample};
use frame_codec::FrameDecoder;
use sample_clock::SampleClockReconstructor;
use serde::Serialize;
use tracing::info;

use crate::cli::DecodeArgs;

#[derive(Serialize)]
struct DecodeOutput {
    batch_timestamp: String,
    sample_count: usize,
    values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    samples: Vec<TimedSample>,
}

/// Execute the `decode` command
pub fn run_decode(args: &DecodeArgs) -> Result<()> {
    let payload = read_payload(args)?;
    info!(bytes = payload.len(), "Decoding scan frame");

    let frame = FrameDecoder::new("cli")
        .decode(&payload)
        .context("Failed to decode scan frame")?;

    let reconstructed = match args.rate {
        Some(rate) => Some(reconstruct(&frame, rate)?),
        None => None,
    };

    if args.json {
        let output = DecodeOutput {
            batch_timestamp: frame.batch_timestamp.clone(),
            sample_count: frame.len(),
            values: frame.values.clone(),
            source: reconstructed
                .as_ref()
                .and_then(|(_, outcome)| outcome.map(|o| o.source.as_str())),
            samples: reconstructed.map(|(samples, _)| samples).unwrap_or_default(),
        };
        let json = serde_json::to_string_pretty(&output).context("Failed to serialize frame")?;
        println!("{}", json);
    } else {
        println!("Batch timestamp: {}", frame.batch_timestamp);
        println!("Samples: {}", frame.len());
        match reconstructed {
            Some((samples, outcome)) => {
                if let Some(outcome) = outcome {
                    println!("Timing: {}", outcome.source.as_str());
                }
                for sample in samples {
                    println!("  {:.3}  {}", sample.timestamp_ms, sample.value);
                }
            }
            None => {
                for value in &frame.values {
                    println!("  {}", value);
                }
            }
        }
    }

    Ok(())
}

fn read_payload(args: &DecodeArgs) -> Result<Vec<u8>> {
    if let Some(hex) = &args.hex {
        let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
        return hex::decode(cleaned).context("Invalid hex payload");
    }
    let path = args
        .file
        .as_ref()
        .context("either a file or --hex is required")?;
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Treat the frame as the first batch of a fresh channel
fn reconstruct(
    frame: &ScanFrame,
    rate: f64,
) -> Result<(Vec<TimedSample>, Option<ReconstructOutcome>)> {
    let mut clock = SampleClockReconstructor::new("cli", rate, ClockConfig::default());
    let samples = clock.push(frame).context("Failed to reconstruct timestamps")?;
    Ok((samples, clock.last_outcome()))
}
