//! Two-pass bounded-memory decode.
//!
//! - Probe pass: read only the intrinsic dimensions of the resource
//! - Compute an integer sampling ratio from the source and target sizes
//! - Full pass: decode pixels and reduce them by the sampling ratio
//!
//! Decoded images are stored as RGBA8 and shared by reference between the cache and
//! destinations.

pub mod size;
pub mod source;

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageReader, Limits, RgbaImage};
use tracing::{debug, trace};

use crate::error::{LoadError, LoadResult};

pub use size::{SizeHints, TargetSize, DEFAULT_DISPLAY};
pub use source::{FsSource, ResourceSource};

/// Bytes per pixel of a decoded RGBA8 buffer.
pub const BYTES_PER_PIXEL: usize = 4;

/// A decoded, immutable pixel buffer.
///
/// Cloning is cheap; all clones share one buffer.
#[derive(Clone)]
pub struct DecodedImage {
    pixels: Arc<RgbaImage>,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width() as usize * BYTES_PER_PIXEL
    }

    /// Memory footprint used for cache accounting.
    pub fn byte_size(&self) -> usize {
        self.bytes_per_row() * self.height() as usize
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// True if both handles refer to the same buffer.
    pub fn same_buffer(&self, other: &DecodedImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Decodes a resource into a pixel buffer sized for a target.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, id: &str, target: TargetSize) -> LoadResult<DecodedImage>;
}

/// Integer downsample factor for a source decoded into `target`.
///
/// Only sources larger than the target in both dimensions are reduced.
pub fn sample_ratio(src_width: u32, src_height: u32, target: TargetSize) -> u32 {
    if src_width <= target.width || src_height <= target.height {
        return 1;
    }
    let width_ratio = (src_width as f64 / target.width as f64).round() as u32;
    let height_ratio = (src_height as f64 / target.height as f64).round() as u32;
    width_ratio.max(height_ratio).max(1)
}

/// Dimensions of a source after applying a sampling ratio.
pub fn sampled_dimensions(src_width: u32, src_height: u32, ratio: u32) -> (u32, u32) {
    let ratio = ratio.max(1);
    ((src_width / ratio).max(1), (src_height / ratio).max(1))
}

/// Default ceiling on allocations made by a single full-pass decode.
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

/// Decoder backed by the `image` crate reading bytes from a [`ResourceSource`].
///
/// The full pass decodes at source resolution before reducing, so it runs under
/// [`image::Limits`]. Sources whose decode would allocate more than `max_alloc` bytes fail
/// with [`LoadError::Decode`] instead of exhausting memory.
pub struct SampledDecoder<S> {
    source: S,
    max_alloc: u64,
}

impl<S: ResourceSource> SampledDecoder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            max_alloc: DEFAULT_MAX_DECODE_BYTES,
        }
    }

    /// Cap the bytes a single full-pass decode may allocate.
    pub fn with_max_alloc(mut self, bytes: u64) -> Self {
        self.max_alloc = bytes.max(1);
        self
    }

    pub fn max_alloc(&self) -> u64 {
        self.max_alloc
    }

    /// Probe pass: intrinsic dimensions without allocating a pixel buffer.
    fn probe(id: &str, bytes: &[u8]) -> LoadResult<(u32, u32)> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|source| LoadError::Read {
                id: id.to_string(),
                source,
            })?;
        reader.into_dimensions().map_err(|source| LoadError::Decode {
            id: id.to_string(),
            source,
        })
    }

    /// Full pass: decode all pixels within the allocation limit.
    fn decode_full(&self, id: &str, bytes: &[u8]) -> LoadResult<DynamicImage> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|source| LoadError::Read {
                id: id.to_string(),
                source,
            })?;
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc);
        reader.limits(limits);
        reader.decode().map_err(|source| LoadError::Decode {
            id: id.to_string(),
            source,
        })
    }
}

impl<S: ResourceSource> ImageDecoder for SampledDecoder<S> {
    fn decode(&self, id: &str, target: TargetSize) -> LoadResult<DecodedImage> {
        let bytes = self.source.read(id).map_err(|source| LoadError::Read {
            id: id.to_string(),
            source,
        })?;

        let (src_width, src_height) = Self::probe(id, &bytes)?;
        if src_width == 0 || src_height == 0 {
            return Err(LoadError::EmptyImage {
                id: id.to_string(),
                width: src_width,
                height: src_height,
            });
        }

        let ratio = sample_ratio(src_width, src_height, target);
        let (width, height) = sampled_dimensions(src_width, src_height, ratio);
        debug!(
            id,
            src_width,
            src_height,
            target_width = target.width,
            target_height = target.height,
            ratio,
            "Decoding resource"
        );

        let full = self.decode_full(id, &bytes)?;
        drop(bytes);

        let sampled = if ratio > 1 {
            full.thumbnail_exact(width, height)
        } else {
            full
        };

        trace!(id, width = sampled.width(), height = sampled.height(), "Decoded resource");
        Ok(DecodedImage::new(sampled.into_rgba8()))
    }
}
