//! Target size resolution.
//!
//! Destinations report a `(width, height)` hint where any non-positive dimension means
//! "unknown". Each unknown dimension falls back to the display extent so a decode is never
//! requested at a zero or negative size.

use tracing::debug;

/// Default display extent used when none is configured.
pub const DEFAULT_DISPLAY: TargetSize = TargetSize {
    width: 1920,
    height: 1080,
};

/// A resolved, strictly positive decode target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    /// Create a target size. Zero dimensions are raised to 1.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Resolve a raw destination hint against the display extent.
    pub fn resolve(hint: (i32, i32), display: TargetSize) -> Self {
        let (w, h) = hint;
        let width = positive(w).unwrap_or(display.width);
        let height = positive(h).unwrap_or(display.height);
        if w <= 0 || h <= 0 {
            debug!(
                hint_width = w,
                hint_height = h,
                width,
                height,
                "Target size unresolved, using display extent"
            );
        }
        Self::new(width, height)
    }
}

/// Layered size hints for destinations that know more than one source of size information.
///
/// Each dimension resolves independently: explicit size, then the layout-declared size, then
/// the capped maximum. Whatever remains unknown is left non-positive for
/// [`TargetSize::resolve`] to fill from the display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeHints {
    /// Actual measured size of the slot.
    pub explicit: (i32, i32),
    /// Size declared by the layout. Wrap-content layouts report non-positive values.
    pub layout: (i32, i32),
    /// Upper bound configured on the slot. `i32::MAX` means unbounded.
    pub max: (i32, i32),
}

impl SizeHints {
    pub fn explicit(width: i32, height: i32) -> Self {
        Self {
            explicit: (width, height),
            ..Self::default()
        }
    }

    pub fn with_max(mut self, width: i32, height: i32) -> Self {
        self.max = (width, height);
        self
    }

    /// Collapse the fallback chain into a single hint.
    pub fn hint(&self) -> (i32, i32) {
        let width = first_positive(&[self.explicit.0, self.layout.0, capped(self.max.0)]);
        let height = first_positive(&[self.explicit.1, self.layout.1, capped(self.max.1)]);
        (width, height)
    }
}

fn positive(value: i32) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v > 0)
}

fn capped(value: i32) -> i32 {
    if value == i32::MAX {
        0
    } else {
        value
    }
}

fn first_positive(candidates: &[i32]) -> i32 {
    candidates.iter().copied().find(|v| *v > 0).unwrap_or(0)
}
