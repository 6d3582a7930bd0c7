use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Why a pass produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The mask provider failed.
    Segmentation,
    /// An image operation could not be built or ran on unusable input.
    Filter,
    /// The frame belongs to a camera generation that is no longer current.
    Stale,
}

/// Counters shared by the pipeline worker and whoever wants to observe it.
#[derive(Debug, Default)]
pub struct PipelineStats {
    processed: AtomicU64,
    published: AtomicU64,
    passthrough: AtomicU64,
    dropped_segmentation: AtomicU64,
    dropped_filter: AtomicU64,
    dropped_stale: AtomicU64,
    fallback_backgrounds: AtomicU64,
    capture_errors: AtomicU64,
    segment_us: AtomicU64,
    background_us: AtomicU64,
    composite_us: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub published: u64,
    pub passthrough: u64,
    pub dropped_segmentation: u64,
    pub dropped_filter: u64,
    pub dropped_stale: u64,
    pub fallback_backgrounds: u64,
    pub capture_errors: u64,
    pub segment_us: u64,
    pub background_us: u64,
    pub composite_us: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Segment,
    Background,
    Composite,
}

impl PipelineStats {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_backgrounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Segmentation => &self.dropped_segmentation,
            DropReason::Filter => &self.dropped_filter,
            DropReason::Stale => &self.dropped_stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timing(&self, stage: Stage, elapsed: Duration) {
        let counter = match stage {
            Stage::Segment => &self.segment_us,
            Stage::Background => &self.background_us,
            Stage::Composite => &self.composite_us,
        };
        counter.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            dropped_segmentation: self.dropped_segmentation.load(Ordering::Relaxed),
            dropped_filter: self.dropped_filter.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            fallback_backgrounds: self.fallback_backgrounds.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            segment_us: self.segment_us.load(Ordering::Relaxed),
            background_us: self.background_us.load(Ordering::Relaxed),
            composite_us: self.composite_us.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_segmentation + self.dropped_filter + self.dropped_stale
    }

    /// Frames that went through segmentation and compositing.
    pub fn composited(&self) -> u64 {
        self.processed.saturating_sub(self.passthrough)
    }

    /// Average milliseconds per composited frame spent in `stage`.
    pub fn average_ms(&self, stage: Stage) -> f64 {
        let total = match stage {
            Stage::Segment => self.segment_us,
            Stage::Background => self.background_us,
            Stage::Composite => self.composite_us,
        };
        match self.composited() {
            0 => 0.0,
            n => total as f64 / 1000.0 / n as f64,
        }
    }
}
