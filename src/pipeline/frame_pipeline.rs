use super::mode::ModeSlot;
use super::stats::{DropReason, PipelineStats, Stage};
use crate::background::{synthesize, Background, BackgroundMode};
use crate::composite::composite;
use crate::error::FrameError;
use crate::frame::{mask_to_rgba, RgbaFrame};
use crate::orientation::OrientationState;
use crate::resample::resample;
use crate::segmentation::{MaskProvider, SegmentationQuality};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Result of one pipeline pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// A finished frame, ready to publish.
    Output(RgbaFrame),
    /// Nothing to publish for this frame.
    Dropped(DropReason),
}

impl PassOutcome {
    pub fn into_frame(self) -> Option<RgbaFrame> {
        match self {
            Self::Output(frame) => Some(frame),
            Self::Dropped(_) => None,
        }
    }
}

/// Segment, resample, synthesize, composite and orient one frame at a time.
///
/// A pass is synchronous and self-contained: every intermediate buffer is
/// owned by the pass and released when it returns. Failures inside a pass
/// become [`PassOutcome::Dropped`] and never reach the caller as errors.
///
/// Passes never overlap, even when called from several threads: each one
/// holds the pipeline's pass lock from the mode read to the hand-off.
pub struct FramePipeline {
    pass: Mutex<()>,
    provider: Mutex<Box<dyn MaskProvider>>,
    mode: ModeSlot,
    orientation: OrientationState,
    stats: Arc<PipelineStats>,
    matte_preview: bool,
}

impl FramePipeline {
    pub fn new(
        provider: impl MaskProvider + 'static,
        mode: ModeSlot,
        orientation: OrientationState,
    ) -> Self {
        Self {
            pass: Mutex::new(()),
            provider: Mutex::new(Box::new(provider)),
            mode,
            orientation,
            stats: Arc::new(PipelineStats::default()),
            matte_preview: false,
        }
    }

    /// Emit the resampled mask as a grayscale frame instead of compositing.
    pub fn with_matte_preview(mut self, enabled: bool) -> Self {
        self.set_matte_preview(enabled);
        self
    }

    pub fn set_matte_preview(&mut self, enabled: bool) {
        self.matte_preview = enabled;
    }

    pub fn mode(&self) -> &ModeSlot {
        &self.mode
    }

    pub fn orientation(&self) -> &OrientationState {
        &self.orientation
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn set_quality(&self, quality: SegmentationQuality) {
        self.provider().set_quality(quality);
    }

    fn provider(&self) -> MutexGuard<'_, Box<dyn MaskProvider>> {
        self.provider.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one pass over `raw`.
    ///
    /// The background mode is read once, up front; a concurrent
    /// `ModeSlot::set` only affects later passes.
    pub fn process(&self, raw: RgbaFrame) -> PassOutcome {
        self.process_then(raw, |outcome| outcome)
    }

    /// Run one pass and hand its outcome to `finish` before the next pass may
    /// start. Publishing from `finish` keeps results in capture order.
    pub fn process_then<R>(&self, raw: RgbaFrame, finish: impl FnOnce(PassOutcome) -> R) -> R {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        finish(self.run(raw))
    }

    fn run(&self, raw: RgbaFrame) -> PassOutcome {
        let mode = self.mode.get();
        self.stats.record_processed();

        if mode.is_passthrough() && !self.matte_preview {
            self.stats.record_passthrough();
            return PassOutcome::Output(self.orientation.get().apply(raw));
        }

        match self.composite_pass(&mode, &raw) {
            Ok(frame) => PassOutcome::Output(self.orientation.get().apply(frame)),
            Err(e) => {
                let reason = match e {
                    FrameError::Segmentation(_) => DropReason::Segmentation,
                    _ => DropReason::Filter,
                };
                tracing::debug!("Dropping frame: {}", e);
                self.stats.record_drop(reason);
                PassOutcome::Dropped(reason)
            }
        }
    }

    fn composite_pass(&self, mode: &BackgroundMode, raw: &RgbaFrame) -> Result<RgbaFrame, FrameError> {
        let (width, height) = raw.dimensions();

        let start = Instant::now();
        let mask = {
            let _span = tracing::debug_span!("segment").entered();
            let mut provider = self.provider();
            provider
                .segment(raw)
                .map_err(|e| FrameError::Segmentation(format!("{}: {e:#}", provider.name())))?
        };
        let mask = resample(&mask, width, height)?;
        self.stats.record_timing(Stage::Segment, start.elapsed());

        if self.matte_preview {
            return Ok(mask_to_rgba(&mask));
        }

        let start = Instant::now();
        let background = synthesize(mode, width, height, raw)?;
        self.stats.record_timing(Stage::Background, start.elapsed());

        let background = match background {
            Background::Passthrough => return Ok(raw.clone()),
            Background::Layer(frame) => frame,
            Background::Fallback(frame) => {
                self.stats.record_fallback();
                frame
            }
        };

        let start = Instant::now();
        let output = composite(raw, &background, &mask)?;
        self.stats.record_timing(Stage::Composite, start.elapsed());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{BackdropImage, Color, FALLBACK_COLOR};
    use crate::frame::{uniform_mask, Mask};
    use crate::orientation::{Orientation, Rotation};
    use anyhow::{bail, Result};
    use image::Rgba;
    use crossbeam_channel::{Receiver, Sender};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const SUBJECT: Rgba<u8> = Rgba([200, 100, 50, 255]);

    fn raw(width: u32, height: u32) -> RgbaFrame {
        RgbaFrame::from_pixel(width, height, SUBJECT)
    }

    /// Returns a fixed-value mask at a fixed resolution and counts calls.
    struct FixedMask {
        value: f32,
        size: (u32, u32),
        calls: Arc<AtomicUsize>,
    }

    impl FixedMask {
        fn new(value: f32, size: (u32, u32)) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    value,
                    size,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl MaskProvider for FixedMask {
        fn segment(&mut self, _frame: &RgbaFrame) -> Result<Mask> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(uniform_mask(self.size.0, self.size.1, self.value))
        }
    }

    /// Fails on the listed call numbers (1-based).
    struct FlakyMask {
        fail_on: Vec<usize>,
        calls: usize,
    }

    impl MaskProvider for FlakyMask {
        fn segment(&mut self, frame: &RgbaFrame) -> Result<Mask> {
            self.calls += 1;
            if self.fail_on.contains(&self.calls) {
                bail!("transient failure on call {}", self.calls);
            }
            Ok(uniform_mask(frame.width(), frame.height(), 0.0))
        }
    }

    /// Changes the background mode while the pass is running.
    struct SwitchingMask {
        slot: ModeSlot,
        next: BackgroundMode,
    }

    impl MaskProvider for SwitchingMask {
        fn segment(&mut self, frame: &RgbaFrame) -> Result<Mask> {
            self.slot.set(self.next.clone());
            Ok(uniform_mask(frame.width(), frame.height(), 0.0))
        }
    }

    /// Holds its first call until released; on the second call records
    /// whether the first pass had already been handed off.
    struct HoldFirst {
        entered: Sender<()>,
        release: Receiver<()>,
        handed_off: Arc<AtomicBool>,
        seen: Arc<Mutex<Option<bool>>>,
        calls: usize,
    }

    impl MaskProvider for HoldFirst {
        fn segment(&mut self, frame: &RgbaFrame) -> Result<Mask> {
            self.calls += 1;
            if self.calls == 1 {
                let _ = self.entered.send(());
                let _ = self.release.recv();
            } else {
                let done = self.handed_off.load(Ordering::SeqCst);
                self.seen.lock().unwrap().get_or_insert(done);
            }
            Ok(uniform_mask(frame.width(), frame.height(), 1.0))
        }
    }

    fn pipeline(provider: impl MaskProvider + 'static, mode: BackgroundMode) -> FramePipeline {
        FramePipeline::new(provider, ModeSlot::new(mode), OrientationState::default())
    }

    #[test]
    fn test_none_mode_passes_raw_through_untouched() {
        let (provider, calls) = FixedMask::new(0.0, (4, 4));
        let pipeline = pipeline(provider, BackgroundMode::None);
        let frame = RgbaFrame::from_fn(5, 3, |x, y| Rgba([x as u8, y as u8, 7, 9]));

        let out = pipeline.process(frame.clone()).into_frame().unwrap();
        assert_eq!(out, frame);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.stats().snapshot().passthrough, 1);
    }

    #[test]
    fn test_none_mode_still_applies_orientation() {
        let (provider, _) = FixedMask::new(0.0, (4, 4));
        let pipeline = pipeline(provider, BackgroundMode::None);
        pipeline.orientation().set(Orientation {
            rotation: Rotation::Deg90,
            mirrored: false,
        });
        let out = pipeline.process(raw(6, 2)).into_frame().unwrap();
        assert_eq!(out.dimensions(), (2, 6));
    }

    #[test]
    fn test_background_only_mask_yields_color() {
        let (provider, _) = FixedMask::new(0.0, (16, 16));
        let pipeline = pipeline(provider, BackgroundMode::Color(Color::rgb(0, 255, 0)));
        let out = pipeline.process(raw(32, 18)).into_frame().unwrap();
        assert_eq!(out.dimensions(), (32, 18));
        assert!(out.pixels().all(|p| p.0 == [0, 255, 0, 255]));
    }

    #[test]
    fn test_foreground_mask_at_other_resolution_keeps_subject() {
        // Mask aspect differs from the frame: non-uniform stretch, no crash.
        let (provider, calls) = FixedMask::new(1.0, (7, 13));
        let pipeline = pipeline(provider, BackgroundMode::Color(Color::rgb(0, 0, 0)));
        let out = pipeline.process(raw(40, 10)).into_frame().unwrap();
        assert_eq!(out.dimensions(), (40, 10));
        assert!(out.pixels().all(|p| *p == SUBJECT));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_segmentation_failure_drops_only_that_frame() {
        let provider = FlakyMask {
            fail_on: vec![2],
            calls: 0,
        };
        let pipeline = pipeline(provider, BackgroundMode::Color(Color::rgb(1, 1, 1)));

        assert!(matches!(pipeline.process(raw(4, 4)), PassOutcome::Output(_)));
        assert!(matches!(
            pipeline.process(raw(4, 4)),
            PassOutcome::Dropped(DropReason::Segmentation)
        ));
        assert!(matches!(pipeline.process(raw(4, 4)), PassOutcome::Output(_)));

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.dropped_segmentation, 1);
    }

    #[test]
    fn test_invalid_blur_is_a_filter_drop() {
        let (provider, _) = FixedMask::new(0.5, (4, 4));
        let pipeline = pipeline(provider, BackgroundMode::blur(f32::NAN));
        assert!(matches!(
            pipeline.process(raw(4, 4)),
            PassOutcome::Dropped(DropReason::Filter)
        ));
        assert_eq!(pipeline.stats().snapshot().dropped_filter, 1);
    }

    #[test]
    fn test_empty_mask_is_a_filter_drop() {
        let (provider, _) = FixedMask::new(0.5, (0, 0));
        let pipeline = pipeline(provider, BackgroundMode::blur(2.0));
        assert!(matches!(
            pipeline.process(raw(4, 4)),
            PassOutcome::Dropped(DropReason::Filter)
        ));
    }

    #[test]
    fn test_undecodable_image_composites_over_fallback() {
        let (provider, _) = FixedMask::new(0.0, (4, 4));
        let mode = BackgroundMode::image(BackdropImage::from_encoded(vec![0xde, 0xad]));
        let pipeline = pipeline(provider, mode);

        let out = pipeline.process(raw(8, 8)).into_frame().unwrap();
        assert!(out.pixels().all(|p| *p == FALLBACK_COLOR.to_pixel()));
        assert_eq!(pipeline.stats().snapshot().fallback_backgrounds, 1);
    }

    #[test]
    fn test_blur_background_is_composited() {
        let (provider, _) = FixedMask::new(0.0, (4, 4));
        let pipeline = pipeline(provider, BackgroundMode::blur(2.0));
        let frame = RgbaFrame::from_fn(12, 12, |x, _| {
            if x < 6 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let out = pipeline.process(frame).into_frame().unwrap();
        // The hard edge is softened.
        let edge = out.get_pixel(6, 6)[0];
        assert!(edge > 0 && edge < 255);
    }

    #[test]
    fn test_mode_change_during_pass_applies_next_frame() {
        let slot = ModeSlot::new(BackgroundMode::Color(Color::rgb(255, 0, 0)));
        let provider = SwitchingMask {
            slot: slot.clone(),
            next: BackgroundMode::Color(Color::rgb(0, 0, 255)),
        };
        let pipeline = FramePipeline::new(provider, slot, OrientationState::default());

        let first = pipeline.process(raw(4, 4)).into_frame().unwrap();
        assert!(first.pixels().all(|p| p.0 == [255, 0, 0, 255]));

        let second = pipeline.process(raw(4, 4)).into_frame().unwrap();
        assert!(second.pixels().all(|p| p.0 == [0, 0, 255, 255]));
    }

    #[test]
    fn test_switch_to_none_mid_pass_finishes_composite() {
        let slot = ModeSlot::new(BackgroundMode::Color(Color::rgb(9, 9, 9)));
        let provider = SwitchingMask {
            slot: slot.clone(),
            next: BackgroundMode::None,
        };
        let pipeline = FramePipeline::new(provider, slot, OrientationState::default());

        let out = pipeline.process(raw(3, 3)).into_frame().unwrap();
        assert!(out.pixels().all(|p| p.0 == [9, 9, 9, 255]));
        let next = pipeline.process(raw(3, 3)).into_frame().unwrap();
        assert_eq!(next, raw(3, 3));
    }

    #[test]
    fn test_frames_are_independent() {
        // Same input twice gives the same output: nothing carries over.
        let (provider, _) = FixedMask::new(0.5, (3, 3));
        let pipeline = pipeline(provider, BackgroundMode::blur(1.5));
        let frame = RgbaFrame::from_fn(9, 9, |x, y| Rgba([(x * 20) as u8, (y * 20) as u8, 0, 255]));
        let a = pipeline.process(frame.clone()).into_frame().unwrap();
        let _ = pipeline.process(raw(9, 9));
        let b = pipeline.process(frame).into_frame().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_matte_preview_outputs_mask() {
        let (provider, _) = FixedMask::new(1.0, (2, 2));
        let pipeline = pipeline(provider, BackgroundMode::None).with_matte_preview(true);
        let out = pipeline.process(raw(4, 4)).into_frame().unwrap();
        assert!(out.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }

    #[test]
    fn test_output_is_mirrored_when_requested() {
        let (provider, _) = FixedMask::new(1.0, (2, 2));
        let pipeline = pipeline(provider, BackgroundMode::Color(Color::rgb(0, 0, 0)));
        pipeline.orientation().set_mirrored(true);
        let frame = RgbaFrame::from_fn(2, 1, |x, _| Rgba([x as u8 * 100, 0, 0, 255]));
        let out = pipeline.process(frame).into_frame().unwrap();
        assert_eq!(out.get_pixel(0, 0)[0], 100);
        assert_eq!(out.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn test_huge_blur_radius_still_outputs() {
        let (provider, _) = FixedMask::new(0.0, (8, 8));
        let pipeline = pipeline(provider, BackgroundMode::blur(1e30));
        let out = pipeline.process(raw(64, 48)).into_frame().unwrap();
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(pipeline.stats().snapshot().dropped(), 0);
    }

    #[test]
    fn test_concurrent_passes_run_one_at_a_time() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let handed_off = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(None));
        let provider = HoldFirst {
            entered: entered_tx,
            release: release_rx,
            handed_off: handed_off.clone(),
            seen: seen.clone(),
            calls: 0,
        };
        let pipeline = Arc::new(pipeline(provider, BackgroundMode::Color(Color::rgb(0, 0, 0))));

        let first = {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || {
                pipeline.process_then(raw(4, 4), |outcome| {
                    handed_off.store(true, Ordering::SeqCst);
                    outcome
                })
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || pipeline.process(raw(4, 4)))
        };
        std::thread::sleep(Duration::from_millis(20));
        release_tx.send(()).unwrap();

        assert!(matches!(first.join().unwrap(), PassOutcome::Output(_)));
        assert!(matches!(second.join().unwrap(), PassOutcome::Output(_)));
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }
}
