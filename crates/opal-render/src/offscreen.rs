//! Offscreen rendering backends and the one-time selection between them.

use bitflags::bitflags;
use opal_core::geometry::Size;
use opal_test_utils::RenderDevice;
use tracing::{info, warn};

use crate::capability::TextureCaps;
use crate::context::GraphicsContext;
use crate::error::RenderError;
use crate::target::TextureTarget;

bitflags! {
    /// Offscreen mechanisms the device can express, probed at startup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OffscreenSupport: u32 {
        /// Render passes can target a texture that is also bindable for
        /// sampling.
        const DIRECT_BIND = 1 << 0;
        /// Renderable scratch textures can be copied into bindable ones.
        const COPY_BACK = 1 << 1;
        /// Renderable scratch textures can be blitted (sampled draw) into
        /// bindable ones.
        const BLIT_BACK = 1 << 2;
    }
}

impl OffscreenSupport {
    pub fn probe(context: &GraphicsContext) -> Self {
        use wgpu::TextureUsages as U;
        let format = crate::texture::TEXTURE_FORMAT;

        let mut support = OffscreenSupport::empty();
        // Blit-back renders into a bindable scratch and samples it. In
        // wgpu usage terms that is the same requirement as direct bind
        // (renderable + bindable), so the two tiers share one probe and
        // differ only in selection priority. The flags stay separate so
        // callers can express one without the other.
        if context.format_supports(format, U::RENDER_ATTACHMENT | U::TEXTURE_BINDING) {
            support |= OffscreenSupport::DIRECT_BIND | OffscreenSupport::BLIT_BACK;
        }
        if context.format_supports(format, U::RENDER_ATTACHMENT | U::COPY_SRC | U::COPY_DST) {
            support |= OffscreenSupport::COPY_BACK;
        }
        support
    }
}

/// How content rendered offscreen reaches a sampleable texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffscreenBackend {
    /// Render straight into the target texture.
    DirectBind,
    /// Render into a scratch texture, then GPU-copy into the target.
    CopyBack,
    /// Render into a scratch texture, then blit into the target with a
    /// sampled draw.
    BlitBack,
    /// No offscreen mechanism available; texture targets cannot be created
    /// and callers fall back to drawing everything into the viewport.
    Disabled,
}

impl std::fmt::Display for OffscreenBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OffscreenBackend::DirectBind => "direct-bind",
            OffscreenBackend::CopyBack => "copy-back",
            OffscreenBackend::BlitBack => "blit-back",
            OffscreenBackend::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

impl OffscreenBackend {
    /// Pick the best available backend, in fixed preference order.
    pub fn select(support: OffscreenSupport) -> Self {
        if support.contains(OffscreenSupport::DIRECT_BIND) {
            OffscreenBackend::DirectBind
        } else if support.contains(OffscreenSupport::COPY_BACK) {
            OffscreenBackend::CopyBack
        } else if support.contains(OffscreenSupport::BLIT_BACK) {
            OffscreenBackend::BlitBack
        } else {
            OffscreenBackend::Disabled
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, OffscreenBackend::Disabled)
    }

    /// Whether rendering goes through a scratch texture that must be
    /// resolved into the target afterwards.
    pub fn uses_scratch(&self) -> bool {
        matches!(self, OffscreenBackend::CopyBack | OffscreenBackend::BlitBack)
    }
}

/// Default edge length of a fresh texture target before any size is
/// declared.
pub const DEFAULT_TARGET_SIZE: u32 = 128;

/// Creates texture targets using the backend chosen at startup.
///
/// The choice is made exactly once; targets created later never re-probe.
pub struct TextureTargetFactory {
    backend: OffscreenBackend,
    caps: TextureCaps,
}

impl TextureTargetFactory {
    pub fn new(support: OffscreenSupport, caps: TextureCaps) -> Self {
        let backend = OffscreenBackend::select(support);
        match backend {
            OffscreenBackend::Disabled => {
                warn!("no offscreen rendering mechanism available, texture targets disabled")
            }
            _ => info!(%backend, "selected offscreen rendering backend"),
        }
        TextureTargetFactory { backend, caps }
    }

    pub fn backend(&self) -> OffscreenBackend {
        self.backend
    }

    pub fn caps(&self) -> &TextureCaps {
        &self.caps
    }

    /// Create a texture target, or `None` when offscreen rendering is
    /// disabled on this device.
    pub fn create_target(
        &self,
        device: &dyn RenderDevice,
    ) -> Result<Option<TextureTarget>, RenderError> {
        if !self.backend.is_available() {
            return Ok(None);
        }
        let target = TextureTarget::new(
            device,
            &self.caps,
            self.backend,
            Size::square(DEFAULT_TARGET_SIZE),
        )?;
        Ok(Some(target))
    }
}
