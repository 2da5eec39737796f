//! Texture capability probing and capability-aware size adjustment.

use opal_core::geometry::Size;

use crate::context::GraphicsContext;
use crate::error::RenderError;

/// Slack added to each axis of a declared render size before adjustment, so
/// that small growth does not force a reallocation every frame.
pub const TEXTURE_SIZE_PADDING: u32 = 128;

/// Texture constraints probed once from the adapter at startup.
///
/// The fields drive [`adjusted_size`](TextureCaps::adjusted_size); probing
/// them once keeps per-allocation decisions branch-cheap and deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCaps {
    /// Whether non-power-of-two texture dimensions are supported.
    pub supports_npot: bool,
    /// Whether textures must be square.
    pub must_be_square: bool,
    /// Maximum dimension of a 2D texture on this device.
    pub max_size: u32,
}

impl TextureCaps {
    pub fn probe(context: &GraphicsContext) -> Self {
        TextureCaps {
            supports_npot: context.supports_npot_textures(),
            must_be_square: false,
            max_size: context.max_texture_dimension(),
        }
    }

    /// Constrain a requested size to what the device can allocate.
    ///
    /// Dimensions are rounded up to powers of two when required, then
    /// squared up when required, then checked against the device maximum.
    /// Applying this to its own output changes nothing.
    pub fn adjusted_size(&self, requested: Size<u32>) -> Result<Size<u32>, RenderError> {
        let mut width = requested.width.max(1);
        let mut height = requested.height.max(1);

        if !self.supports_npot {
            width = next_pot(width);
            height = next_pot(height);
        }
        if self.must_be_square {
            let side = width.max(height);
            width = side;
            height = side;
        }

        if width > self.max_size || height > self.max_size {
            return Err(RenderError::TextureSizeExceeded {
                requested,
                max: self.max_size,
            });
        }
        Ok(Size::new(width, height))
    }

    /// Size actually allocated for a declared render-target size: the
    /// request plus per-axis padding, pushed through [`adjusted_size`].
    pub fn padded_target_size(&self, requested: Size<u32>) -> Result<Size<u32>, RenderError> {
        self.adjusted_size(Size::new(
            requested.width + TEXTURE_SIZE_PADDING,
            requested.height + TEXTURE_SIZE_PADDING,
        ))
    }
}

/// Smallest power of two that is `>= n`. Powers of two map to themselves.
pub fn next_pot(n: u32) -> u32 {
    n.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pot_caps(max_size: u32) -> TextureCaps {
        TextureCaps {
            supports_npot: false,
            must_be_square: false,
            max_size,
        }
    }

    #[test]
    fn next_pot_rounds_up_and_fixes_powers() {
        assert_eq!(next_pot(0), 1);
        assert_eq!(next_pot(1), 1);
        assert_eq!(next_pot(100), 128);
        assert_eq!(next_pot(128), 128);
        assert_eq!(next_pot(129), 256);
    }

    #[test]
    fn adjusted_size_is_idempotent() {
        let caps = pot_caps(2048);
        let once = caps.adjusted_size(Size::new(100, 300)).unwrap();
        let twice = caps.adjusted_size(once).unwrap();
        assert_eq!(once, twice);

        let square = TextureCaps {
            must_be_square: true,
            ..caps
        };
        let once = square.adjusted_size(Size::new(100, 300)).unwrap();
        assert_eq!(once, Size::square(512));
        assert_eq!(square.adjusted_size(once).unwrap(), once);
    }

    #[test]
    fn padded_target_size_covers_request_plus_padding() {
        let caps = pot_caps(2048);
        let out = caps.padded_target_size(Size::new(100, 100)).unwrap();
        // 100 + 128 = 228, rounded to the next power of two.
        assert_eq!(out, Size::square(256));
        assert!(out.covers(Size::new(228, 228)));
    }

    #[test]
    fn npot_devices_keep_padded_dimensions_exact() {
        let caps = TextureCaps {
            supports_npot: true,
            must_be_square: false,
            max_size: 4096,
        };
        let out = caps.padded_target_size(Size::new(100, 50)).unwrap();
        assert_eq!(out, Size::new(228, 178));
    }

    #[test]
    fn oversized_requests_fail() {
        let caps = pot_caps(2048);
        let err = caps.adjusted_size(Size::new(5000, 5000)).unwrap_err();
        match err {
            RenderError::TextureSizeExceeded { requested, max } => {
                assert_eq!(requested, Size::new(5000, 5000));
                assert_eq!(max, 2048);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
