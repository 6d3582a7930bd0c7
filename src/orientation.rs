//! Display orientation of output frames.
//!
//! Rotation comes from device-rotation notifications, mirroring from the
//! camera position. Compositing stages never write this state; only the
//! final step of a pipeline pass reads it.

use crate::frame::RgbaFrame;
use image::imageops;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Clockwise right-angle rotation applied to output frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Snap an arbitrary angle to the nearest right angle.
    pub fn from_degrees(degrees: i32) -> Self {
        let normalized = degrees.rem_euclid(360);
        match ((normalized + 45) / 90) % 4 {
            0 => Self::Deg0,
            1 => Self::Deg90,
            2 => Self::Deg180,
            _ => Self::Deg270,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 1,
            Self::Deg180 => 2,
            Self::Deg270 => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & ROTATION_MASK {
            0 => Self::Deg0,
            1 => Self::Deg90,
            2 => Self::Deg180,
            _ => Self::Deg270,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Orientation {
    pub rotation: Rotation,
    /// Flip horizontally (front-facing camera).
    pub mirrored: bool,
}

impl Orientation {
    pub fn is_identity(&self) -> bool {
        self.rotation == Rotation::Deg0 && !self.mirrored
    }

    /// Mirror first (in sensor space), then rotate for display.
    pub fn apply(&self, frame: RgbaFrame) -> RgbaFrame {
        if self.is_identity() {
            return frame;
        }
        let _span = tracing::debug_span!("orient").entered();

        let frame = if self.mirrored {
            imageops::flip_horizontal(&frame)
        } else {
            frame
        };
        match self.rotation {
            Rotation::Deg0 => frame,
            Rotation::Deg90 => imageops::rotate90(&frame),
            Rotation::Deg180 => imageops::rotate180(&frame),
            Rotation::Deg270 => imageops::rotate270(&frame),
        }
    }
}

const ROTATION_MASK: u8 = 0b011;
const MIRROR_BIT: u8 = 0b100;

/// Orientation shared between the notification side and the pipeline worker.
///
/// Both fields are packed into one atomic so a reader always sees a
/// consistent pair.
#[derive(Debug, Clone, Default)]
pub struct OrientationState {
    bits: Arc<AtomicU8>,
}

impl OrientationState {
    pub fn new(orientation: Orientation) -> Self {
        let state = Self::default();
        state.set(orientation);
        state
    }

    pub fn get(&self) -> Orientation {
        let bits = self.bits.load(Ordering::Acquire);
        Orientation {
            rotation: Rotation::from_bits(bits),
            mirrored: bits & MIRROR_BIT != 0,
        }
    }

    pub fn set(&self, orientation: Orientation) {
        let mirror = if orientation.mirrored { MIRROR_BIT } else { 0 };
        self.bits
            .store(orientation.rotation.bits() | mirror, Ordering::Release);
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        self.update(|bits| (bits & !ROTATION_MASK) | rotation.bits());
    }

    pub fn set_mirrored(&self, mirrored: bool) {
        self.update(|bits| if mirrored { bits | MIRROR_BIT } else { bits & !MIRROR_BIT });
    }

    fn update(&self, f: impl Fn(u8) -> u8) {
        // The closure always returns Some, so this cannot fail.
        let _ = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| Some(f(bits)));
    }
}

/// Source of device-rotation notifications.
///
/// Implementations push rotation changes into the state they are attached to
/// for as long as they stay attached.
pub trait OrientationSource: Send {
    fn attach(&mut self, state: OrientationState);

    fn detach(&mut self) {}
}

/// For platforms without rotation sensors: leaves the rotation untouched.
#[derive(Debug, Default)]
pub struct NoopOrientation;

impl OrientationSource for NoopOrientation {
    fn attach(&mut self, _state: OrientationState) {
        tracing::debug!("No orientation sensor; output rotation stays fixed");
    }
}

/// Applies one fixed rotation when attached (e.g. a camera mounted sideways).
#[derive(Debug)]
pub struct FixedOrientation(pub Rotation);

impl OrientationSource for FixedOrientation {
    fn attach(&mut self, state: OrientationState) {
        tracing::info!("Output rotation fixed at {} degrees", self.0.degrees());
        state.set_rotation(self.0);
    }
}
