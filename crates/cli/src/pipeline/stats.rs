//! Live feed statistics.

use std::time::Duration;

use observability::ClockMetricsAggregator;

/// Statistics from a live run
#[derive(Debug, Clone, Default)]
pub struct LiveStats {
    /// Frames decoded and reconstructed
    pub frames: u64,

    pub samples: u64,

    /// Payloads dropped by the fan-in queue
    pub queue_dropped: u64,

    pub duration: Duration,

    pub active_channels: usize,

    pub clock_metrics: ClockMetricsAggregator,
}

impl LiveStats {
    /// Reconstructed samples per second
    pub fn sample_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.samples as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Live Run ===");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Channels: {}", self.active_channels);
        println!("Frames: {}", self.frames);
        println!("Samples: {} ({:.1}/s)", self.samples, self.sample_rate());
        println!("Queue drops: {}", self.queue_dropped);
        println!();
        print!("{}", self.clock_metrics.summary());
        println!();
    }
}
