pub mod blur;
mod synthesizer;

pub use synthesizer::{synthesize, Background, FALLBACK_COLOR};

use crate::error::BackgroundDecodeError;
use crate::frame::{is_empty, RgbaFrame};
use image::Rgba;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// What to put behind the segmented subject.
///
/// Equality is structural for every variant except `Image`, which compares
/// by identity of the shared bitmap so that checking for a mode change never
/// walks pixel data.
#[derive(Debug, Clone, Default)]
pub enum BackgroundMode {
    /// Leave the frame untouched; no segmentation or compositing runs.
    #[default]
    None,
    /// Blurred copy of the current frame.
    Blur { radius: f32 },
    /// Solid fill.
    Color(Color),
    /// Still image scaled to cover the frame.
    Image(Arc<BackdropImage>),
}

impl BackgroundMode {
    pub fn blur(radius: f32) -> Self {
        Self::Blur { radius }
    }

    pub fn image(image: BackdropImage) -> Self {
        Self::Image(Arc::new(image))
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Blur { .. } => "blur",
            Self::Color(_) => "color",
            Self::Image(_) => "image",
        }
    }
}

impl PartialEq for BackgroundMode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Blur { radius: a }, Self::Blur { radius: b }) => a == b,
            (Self::Color(a), Self::Color(b)) => a == b,
            (Self::Image(a), Self::Image(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// 8-bit RGBA fill color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Build from channels in `[0, 1]`; out-of-range values are clamped.
    pub fn from_normalized(r: f32, g: f32, b: f32, a: f32) -> Self {
        let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::rgba(to_byte(r), to_byte(g), to_byte(b), to_byte(a))
    }

    pub fn to_pixel(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }
}

/// A user supplied still image, decoded on first use.
///
/// Decoding happens once; a failed decode is remembered so the synthesizer
/// substitutes the fallback color without retrying every frame.
pub struct BackdropImage {
    source: ImageSource,
    decoded: OnceLock<Option<RgbaFrame>>,
}

enum ImageSource {
    Path(PathBuf),
    Encoded(Vec<u8>),
    Frame,
}

impl BackdropImage {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source: ImageSource::Path(path.as_ref().to_path_buf()),
            decoded: OnceLock::new(),
        }
    }

    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        Self {
            source: ImageSource::Encoded(bytes),
            decoded: OnceLock::new(),
        }
    }

    pub fn from_frame(frame: RgbaFrame) -> Self {
        let decoded = OnceLock::new();
        let frame = (!is_empty(frame.width(), frame.height())).then_some(frame);
        let _ = decoded.set(frame);
        Self {
            source: ImageSource::Frame,
            decoded,
        }
    }

    /// The decoded bitmap, or `None` when it cannot be read.
    pub fn bitmap(&self) -> Option<&RgbaFrame> {
        self.decoded
            .get_or_init(|| match self.decode() {
                Ok(frame) => {
                    tracing::debug!(
                        "Decoded background image {}x{}",
                        frame.width(),
                        frame.height()
                    );
                    Some(frame)
                }
                Err(e) => {
                    tracing::warn!("Background image unusable, using fallback color: {}", e);
                    None
                }
            })
            .as_ref()
    }

    fn decode(&self) -> Result<RgbaFrame, BackgroundDecodeError> {
        let frame = match &self.source {
            ImageSource::Path(path) => image::open(path)
                .map_err(|source| BackgroundDecodeError::Read {
                    path: path.display().to_string(),
                    source,
                })?
                .to_rgba8(),
            ImageSource::Encoded(bytes) => image::load_from_memory(bytes)
                .map_err(BackgroundDecodeError::Decode)?
                .to_rgba8(),
            ImageSource::Frame => return Err(BackgroundDecodeError::Empty),
        };

        if is_empty(frame.width(), frame.height()) {
            return Err(BackgroundDecodeError::Empty);
        }
        Ok(frame)
    }
}

impl fmt::Debug for BackdropImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            ImageSource::Path(path) => format!("path {}", path.display()),
            ImageSource::Encoded(bytes) => format!("{} encoded bytes", bytes.len()),
            ImageSource::Frame => "frame".to_string(),
        };
        f.debug_struct("BackdropImage")
            .field("source", &source)
            .field("decoded", &self.decoded.get().map(Option::is_some))
            .finish()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseBackgroundError {
    #[error("unknown background '{0}' (expected none, blur:<radius>, color:#rrggbb[aa] or image:<path>)")]
    Unknown(String),

    #[error("blur radius must be a positive number, got '{0}'")]
    Radius(String),

    #[error("invalid color '{0}'")]
    Color(String),

    #[error("image background needs a path")]
    MissingPath,
}

impl FromStr for BackgroundMode {
    type Err = ParseBackgroundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };

        match (kind.to_ascii_lowercase().as_str(), arg) {
            ("none", None) => Ok(Self::None),
            ("blur", arg) => {
                let raw = arg.unwrap_or("10");
                let radius: f32 = raw
                    .parse()
                    .map_err(|_| ParseBackgroundError::Radius(raw.to_string()))?;
                if !radius.is_finite() || radius <= 0.0 {
                    return Err(ParseBackgroundError::Radius(raw.to_string()));
                }
                Ok(Self::blur(radius))
            }
            ("color", Some(hex)) => parse_hex_color(hex).map(Self::Color),
            ("image", Some(path)) if !path.is_empty() => {
                Ok(Self::image(BackdropImage::from_path(path)))
            }
            ("image", _) => Err(ParseBackgroundError::MissingPath),
            _ => Err(ParseBackgroundError::Unknown(s.to_string())),
        }
    }
}

fn parse_hex_color(hex: &str) -> Result<Color, ParseBackgroundError> {
    let digits = hex.trim_start_matches('#');
    let invalid = || ParseBackgroundError::Color(hex.to_string());
    if !matches!(digits.len(), 6 | 8) || !digits.is_ascii() {
        return Err(invalid());
    }

    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid());
    let alpha = if digits.len() == 8 { channel(6)? } else { 255 };
    Ok(Color::rgba(channel(0)?, channel(2)?, channel(4)?, alpha))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_structural_equality() {
        assert_eq!(BackgroundMode::None, BackgroundMode::None);
        assert_eq!(BackgroundMode::blur(4.0), BackgroundMode::blur(4.0));
        assert_ne!(BackgroundMode::blur(4.0), BackgroundMode::blur(5.0));
        assert_eq!(
            BackgroundMode::Color(Color::rgb(1, 2, 3)),
            BackgroundMode::Color(Color::rgb(1, 2, 3))
        );
        assert_ne!(BackgroundMode::None, BackgroundMode::blur(1.0));
    }

    #[test]
    fn test_image_equality_is_identity() {
        let shared = Arc::new(BackdropImage::from_frame(RgbaFrame::new(2, 2)));
        let a = BackgroundMode::Image(shared.clone());
        let b = BackgroundMode::Image(shared);
        let c = BackgroundMode::image(BackdropImage::from_frame(RgbaFrame::new(2, 2)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_color_from_normalized() {
        assert_eq!(
            Color::from_normalized(1.0, 0.0, 0.5, 2.0),
            Color::rgba(255, 0, 128, 255)
        );
    }

    #[test]
    fn test_undecodable_bytes_yield_no_bitmap() {
        let image = BackdropImage::from_encoded(vec![1, 2, 3, 4]);
        assert!(image.bitmap().is_none());
        // Failure is remembered.
        assert!(image.bitmap().is_none());
    }

    #[test]
    fn test_missing_file_yields_no_bitmap() {
        let image = BackdropImage::from_path("/nonexistent/backdrop.png");
        assert!(image.bitmap().is_none());
    }

    #[test]
    fn test_empty_frame_yields_no_bitmap() {
        let image = BackdropImage::from_frame(RgbaFrame::new(0, 5));
        assert!(image.bitmap().is_none());
    }

    #[test]
    fn test_encoded_png_decodes() {
        let frame = RgbaFrame::from_pixel(3, 2, Rgba([9, 8, 7, 255]));
        let mut bytes = Vec::new();
        frame
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let image = BackdropImage::from_encoded(bytes);
        let bitmap = image.bitmap().unwrap();
        assert_eq!(bitmap.dimensions(), (3, 2));
        assert_eq!(bitmap.get_pixel(1, 1).0, [9, 8, 7, 255]);
    }

    #[rstest]
    #[case("none", BackgroundMode::None)]
    #[case("blur:12.5", BackgroundMode::blur(12.5))]
    #[case("blur", BackgroundMode::blur(10.0))]
    #[case("color:#00ff00", BackgroundMode::Color(Color::rgb(0, 255, 0)))]
    #[case("color:102030ff", BackgroundMode::Color(Color::rgba(16, 32, 48, 255)))]
    #[case("COLOR:#01020304", BackgroundMode::Color(Color::rgba(1, 2, 3, 4)))]
    fn test_parse_background(#[case] input: &str, #[case] expected: BackgroundMode) {
        assert_eq!(input.parse::<BackgroundMode>().unwrap(), expected);
    }

    #[test]
    fn test_parse_image_background() {
        let mode: BackgroundMode = "image:/tmp/beach.jpg".parse().unwrap();
        assert_eq!(mode.kind(), "image");
    }

    #[rstest]
    #[case("blur:-3")]
    #[case("blur:0")]
    #[case("blur:abc")]
    #[case("color:#12")]
    #[case("color:#zzzzzz")]
    #[case("image:")]
    #[case("sepia")]
    fn test_parse_background_rejects(#[case] input: &str) {
        assert!(input.parse::<BackgroundMode>().is_err());
    }
}
