// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::Serialize;
use std::time::Instant;

/// Performance metrics collected during a simulated session
#[derive(Debug, Clone, Serialize)]
pub struct FrameMetrics {
    /// Total number of frames delivered on the output port
    pub frames_processed: u64,
    /// Total bytes delivered
    pub bytes_processed: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average bandwidth in megabits per second
    pub bandwidth_mbps: f64,
    /// Minimum submit-to-output latency in microseconds
    pub latency_min_us: u64,
    /// Maximum latency in microseconds
    pub latency_max_us: u64,
    /// Average latency in microseconds
    pub latency_avg_us: u64,
    /// 50th percentile (median) latency in microseconds
    pub latency_p50_us: u64,
    /// 95th percentile latency in microseconds
    pub latency_p95_us: u64,
    /// 99th percentile latency in microseconds
    pub latency_p99_us: u64,
    /// Frames delivered with a timestamp before the previous frame's
    pub reordered_frames: u64,
}

/// Metrics collector for tracking frame processing performance
pub struct MetricsCollector {
    start_time: Instant,
    latencies_us: Vec<u64>,
    bytes: u64,
    prev_timestamp: Option<i64>,
    reordered_frames: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            latencies_us: Vec::new(),
            bytes: 0,
            prev_timestamp: None,
            reordered_frames: 0,
        }
    }

    /// Record a frame's latency in microseconds
    pub fn record_latency_us(&mut self, latency_us: u64) {
        self.latencies_us.push(latency_us);
    }

    /// Record bytes processed
    pub fn record_bytes(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    /// Track output timestamps to detect display reordering
    /// Returns true if `timestamp` went backwards
    pub fn track_timestamp(&mut self, timestamp: i64) -> bool {
        let reordered = self.prev_timestamp.map_or(false, |prev| timestamp < prev);
        if reordered {
            log::debug!(
                "Output timestamp decreased: {:?} -> {}",
                self.prev_timestamp,
                timestamp
            );
            self.reordered_frames += 1;
        }
        self.prev_timestamp = Some(timestamp);
        reordered
    }

    /// Finalize and calculate all metrics
    pub fn finalize(&mut self) -> FrameMetrics {
        let duration = self.start_time.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let duration_secs = duration.as_secs_f64();

        let frames_processed = self.latencies_us.len() as u64;

        let throughput_fps = if duration_secs > 0.0 {
            frames_processed as f64 / duration_secs
        } else {
            0.0
        };

        let bandwidth_mbps = if duration_secs > 0.0 {
            (self.bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        self.latencies_us.sort_unstable();
        let (min_us, max_us, avg_us) = match (self.latencies_us.first(), self.latencies_us.last()) {
            (Some(&min), Some(&max)) => {
                let sum: u64 = self.latencies_us.iter().sum();
                (min, max, sum / self.latencies_us.len() as u64)
            }
            _ => (0, 0, 0),
        };

        FrameMetrics {
            frames_processed,
            bytes_processed: self.bytes,
            duration_ms,
            throughput_fps,
            bandwidth_mbps,
            latency_min_us: min_us,
            latency_max_us: max_us,
            latency_avg_us: avg_us,
            latency_p50_us: self.percentile(50.0),
            latency_p95_us: self.percentile(95.0),
            latency_p99_us: self.percentile(99.0),
            reordered_frames: self.reordered_frames,
        }
    }

    /// Calculate percentile from sorted latency data
    /// Assumes self.latencies_us is already sorted
    fn percentile(&self, p: f64) -> u64 {
        if self.latencies_us.is_empty() {
            return 0;
        }

        let len = self.latencies_us.len();
        let idx = ((p / 100.0) * (len - 1) as f64).round() as usize;
        self.latencies_us[idx.min(len - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Print metrics in human-readable format
pub fn print_text(metrics: &FrameMetrics) {
    println!("\n=== Performance Metrics ===");
    println!("Frames processed:  {}", metrics.frames_processed);
    println!(
        "Bytes processed:   {} ({:.2} MB)",
        metrics.bytes_processed,
        metrics.bytes_processed as f64 / 1_048_576.0
    );
    println!(
        "Duration:          {:.2} s",
        metrics.duration_ms as f64 / 1000.0
    );
    println!("Throughput:        {:.2} fps", metrics.throughput_fps);
    println!("Bandwidth:         {:.2} Mbps", metrics.bandwidth_mbps);
    println!("Reordered frames:  {}", metrics.reordered_frames);

    if metrics.frames_processed > 0 {
        println!("\nLatency Statistics (us):");
        println!("  Min:    {}", metrics.latency_min_us);
        println!("  Max:    {}", metrics.latency_max_us);
        println!("  Avg:    {}", metrics.latency_avg_us);
        println!("  P50:    {}", metrics.latency_p50_us);
        println!("  P95:    {}", metrics.latency_p95_us);
        println!("  P99:    {}", metrics.latency_p99_us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_calculation() {
        let mut collector = MetricsCollector::new();

        // 0, 10, 20, ..., 100 (11 values)
        for i in 0..=10 {
            collector.record_latency_us(i * 10);
        }

        let metrics = collector.finalize();
        assert_eq!(metrics.latency_p50_us, 50);
        assert_eq!(metrics.latency_p95_us, 100);
        assert_eq!(metrics.latency_min_us, 0);
        assert_eq!(metrics.latency_max_us, 100);
        assert_eq!(metrics.latency_avg_us, 50);
    }

    #[test]
    fn test_reorder_detection() {
        let mut collector = MetricsCollector::new();

        // swapped pairs: 1, 0, 3, 2
        assert!(!collector.track_timestamp(1));
        assert!(collector.track_timestamp(0));
        assert!(!collector.track_timestamp(3));
        assert!(collector.track_timestamp(2));
        assert!(!collector.track_timestamp(4));

        assert_eq!(collector.finalize().reordered_frames, 2);
    }

    #[test]
    fn test_throughput_calculation() {
        let mut collector = MetricsCollector::new();

        for _ in 0..30 {
            collector.record_latency_us(1000);
            collector.record_bytes(100_000);
        }

        std::thread::sleep(std::time::Duration::from_millis(100));

        let metrics = collector.finalize();
        assert_eq!(metrics.frames_processed, 30);
        assert_eq!(metrics.bytes_processed, 3_000_000);

        // Roughly 300 fps (30 frames / 0.1 sec)
        assert!(metrics.throughput_fps > 100.0 && metrics.throughput_fps < 400.0);
    }

    #[test]
    fn test_empty_metrics() {
        let mut collector = MetricsCollector::new();
        let metrics = collector.finalize();

        assert_eq!(metrics.frames_processed, 0);
        assert_eq!(metrics.bytes_processed, 0);
        assert_eq!(metrics.latency_min_us, 0);
        assert_eq!(metrics.latency_p99_us, 0);
    }
}
