#[cfg(feature = "encoder_metrics")]
use std::collections::VecDeque;
#[cfg(feature = "encoder_metrics")]
use std::time::{Duration, Instant};

/// Work recorded into a single command buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandBufferStats {
    pub encoders: u32,
    pub draws: u32,
    pub dispatches: u32,
    pub blits: u32,
    /// Bytes bound through `set_bytes` that went into the transient ring,
    /// including alignment padding.
    pub transient_bytes: u64,
    /// Bytes bound through `set_bytes` that the device took inline.
    pub inline_bytes: u64,
    /// Buffer, texture and sampler binds skipped because the slot already
    /// held the same binding.
    pub redundant_binds: u32,
}

impl CommandBufferStats {
    /// Merge another buffer's counts into this accumulator.
    pub fn accumulate(&mut self, other: &Self) {
        self.encoders += other.encoders;
        self.draws += other.draws;
        self.dispatches += other.dispatches;
        self.blits += other.blits;
        self.transient_bytes += other.transient_bytes;
        self.inline_bytes += other.inline_bytes;
        self.redundant_binds += other.redundant_binds;
    }
}

#[cfg(feature = "encoder_metrics")]
const ROLLING_WINDOW_DURATION: Duration = Duration::from_secs(1);
#[cfg(feature = "encoder_metrics")]
const MAX_ROLLING_WINDOW_SAMPLE_COUNT: usize = 16_384;

#[cfg(feature = "encoder_metrics")]
#[derive(Debug, Clone, Copy)]
struct LatencySample {
    completed_at: Instant,
    latency: Duration,
}

/// Commit-to-completion latency, cumulative and over a rolling one second window.
#[cfg(feature = "encoder_metrics")]
#[derive(Debug)]
pub(crate) struct SubmissionMetricsTracker {
    total_completed_count: u64,
    total_latency: Duration,
    rolling_window_samples: VecDeque<LatencySample>,
    rolling_window_total_latency: Duration,
    totals: CommandBufferStats,
}

#[cfg(feature = "encoder_metrics")]
impl Default for SubmissionMetricsTracker {
    fn default() -> Self {
        Self {
            total_completed_count: 0,
            total_latency: Duration::ZERO,
            rolling_window_samples: VecDeque::with_capacity(MAX_ROLLING_WINDOW_SAMPLE_COUNT),
            rolling_window_total_latency: Duration::ZERO,
            totals: CommandBufferStats::default(),
        }
    }
}

#[cfg(feature = "encoder_metrics")]
impl SubmissionMetricsTracker {
    fn remove_oldest_rolling_sample(&mut self) {
        if let Some(oldest_sample) = self.rolling_window_samples.pop_front() {
            self.rolling_window_total_latency = self
                .rolling_window_total_latency
                .saturating_sub(oldest_sample.latency);
        }
    }

    fn prune_rolling_window(&mut self, now: Instant) {
        while let Some(oldest_sample) = self.rolling_window_samples.front() {
            let sample_age = now.saturating_duration_since(oldest_sample.completed_at);
            if sample_age <= ROLLING_WINDOW_DURATION {
                break;
            }

            self.remove_oldest_rolling_sample();
        }
    }

    pub(crate) fn record_completion(
        &mut self,
        committed_at: Instant,
        completed_at: Instant,
        stats: &CommandBufferStats,
    ) {
        let latency = completed_at.saturating_duration_since(committed_at);

        self.total_completed_count += 1;
        self.total_latency += latency;
        self.totals.accumulate(stats);

        if self.rolling_window_samples.len() == MAX_ROLLING_WINDOW_SAMPLE_COUNT {
            self.remove_oldest_rolling_sample();
        }
        self.rolling_window_samples.push_back(LatencySample {
            completed_at,
            latency,
        });
        self.rolling_window_total_latency += latency;
        self.prune_rolling_window(completed_at);
    }

    pub(crate) fn snapshot(&self) -> SubmissionMetrics {
        let average = |total: Duration, count: usize| {
            if count == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(total.as_secs_f64() / count as f64)
            }
        };
        SubmissionMetrics {
            completed_command_buffers: self.total_completed_count,
            cumulative_average_latency: average(
                self.total_latency,
                self.total_completed_count as usize,
            ),
            rolling_one_second_completions: self.rolling_window_samples.len(),
            rolling_one_second_average_latency: average(
                self.rolling_window_total_latency,
                self.rolling_window_samples.len(),
            ),
            totals: self.totals,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Latency and workload figures for completed command buffers.
#[cfg(feature = "encoder_metrics")]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubmissionMetrics {
    pub completed_command_buffers: u64,
    pub cumulative_average_latency: Duration,
    pub rolling_one_second_completions: usize,
    pub rolling_one_second_average_latency: Duration,
    /// Sum of the per-buffer counters of every completed buffer.
    pub totals: CommandBufferStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate_field_by_field() {
        let mut total = CommandBufferStats::default();
        let frame = CommandBufferStats {
            encoders: 2,
            draws: 5,
            dispatches: 1,
            blits: 1,
            transient_bytes: 512,
            inline_bytes: 64,
            redundant_binds: 3,
        };
        total.accumulate(&frame);
        total.accumulate(&frame);
        assert_eq!(total.draws, 10);
        assert_eq!(total.transient_bytes, 1024);
        assert_eq!(total.redundant_binds, 6);
    }

    #[cfg(feature = "encoder_metrics")]
    #[test]
    fn rolling_window_drops_samples_older_than_one_second() {
        let mut tracker = SubmissionMetricsTracker::default();
        let start = Instant::now();
        let stats = CommandBufferStats::default();

        tracker.record_completion(start, start + Duration::from_millis(4), &stats);
        tracker.record_completion(
            start + Duration::from_millis(1500),
            start + Duration::from_millis(1502),
            &stats,
        );

        let metrics = tracker.snapshot();
        assert_eq!(metrics.completed_command_buffers, 2);
        assert_eq!(metrics.rolling_one_second_completions, 1);
        assert_eq!(
            metrics.rolling_one_second_average_latency,
            Duration::from_millis(2)
        );
        assert_eq!(metrics.cumulative_average_latency, Duration::from_millis(3));
    }
}
