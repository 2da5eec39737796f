//! GPU resource wrappers that can be real or mock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "mock")]
use parking_lot::Mutex;

/// Source of unique texture identities, shared by real and mock textures.
///
/// The id is what the batching engine compares when deciding whether a
/// texture switch (and therefore a buffer flush) is needed.
static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

fn next_texture_id() -> u64 {
    NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Wrapper around a GPU texture that can be real or mock.
///
/// Users hold owned `GpuTexture` values; cloning is cheap (Arc inside).
/// The wrapper assigns its own stable [`id`](Self::id) at construction so
/// identity comparison never needs to reach into wgpu.
#[derive(Clone, Debug)]
pub struct GpuTexture {
    id: u64,
    inner: Arc<GpuTextureInner>,
}

#[derive(Debug)]
enum GpuTextureInner {
    Real {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
    #[cfg(feature = "mock")]
    Mock {
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        /// CPU pixel store standing in for GPU texture memory.
        pixels: Mutex<Option<Vec<u8>>>,
    },
}

impl GpuTexture {
    /// Wrap a real wgpu texture, caching a default view.
    pub fn from_wgpu(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            id: next_texture_id(),
            inner: Arc::new(GpuTextureInner::Real { texture, view }),
        }
    }

    /// Create a mock texture (for testing).
    #[cfg(feature = "mock")]
    pub fn mock(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            id: next_texture_id(),
            inner: Arc::new(GpuTextureInner::Mock {
                width,
                height,
                format,
                pixels: Mutex::new(None),
            }),
        }
    }

    /// Stable identity of this texture, unique per wrapper construction.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        match &*self.inner {
            GpuTextureInner::Real { texture, .. } => texture.width(),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match &*self.inner {
            GpuTextureInner::Real { texture, .. } => texture.height(),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { height, .. } => *height,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        match &*self.inner {
            GpuTextureInner::Real { texture, .. } => texture.format(),
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { format, .. } => *format,
        }
    }

    /// Get the underlying wgpu texture.
    ///
    /// # Panics
    /// Panics if this is a mock texture (test code must not reach real GPU
    /// paths).
    pub fn as_wgpu(&self) -> &wgpu::Texture {
        match &*self.inner {
            GpuTextureInner::Real { texture, .. } => texture,
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { .. } => {
                panic!("Attempted to get wgpu::Texture from a mock texture")
            }
        }
    }

    /// Get the cached default view of the underlying wgpu texture.
    ///
    /// # Panics
    /// Panics if this is a mock texture.
    pub fn view(&self) -> &wgpu::TextureView {
        match &*self.inner {
            GpuTextureInner::Real { view, .. } => view,
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock { .. } => {
                panic!("Attempted to get wgpu::TextureView from a mock texture")
            }
        }
    }

    /// Check if this is a mock texture.
    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(&*self.inner, GpuTextureInner::Mock { .. })
    }

    /// Read the mock pixel store, synthesizing transparent pixels when the
    /// texture has never been written.
    #[cfg(feature = "mock")]
    pub fn mock_pixels(&self) -> Vec<u8> {
        match &*self.inner {
            GpuTextureInner::Mock {
                width,
                height,
                pixels,
                ..
            } => pixels
                .lock()
                .clone()
                .unwrap_or_else(|| vec![0u8; (*width * *height * 4) as usize]),
            _ => panic!("mock_pixels() called on a real texture"),
        }
    }

    /// Replace the mock pixel store contents.
    #[cfg(feature = "mock")]
    pub fn mock_store_pixels(&self, data: Vec<u8>) {
        match &*self.inner {
            GpuTextureInner::Mock { pixels, .. } => *pixels.lock() = Some(data),
            _ => panic!("mock_store_pixels() called on a real texture"),
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;

    #[test]
    fn mock_textures_have_distinct_ids() {
        let a = GpuTexture::mock(4, 4, wgpu::TextureFormat::Rgba8Unorm);
        let b = GpuTexture::mock(4, 4, wgpu::TextureFormat::Rgba8Unorm);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn mock_pixel_store_round_trip() {
        let tex = GpuTexture::mock(2, 1, wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(tex.mock_pixels(), vec![0u8; 8]);
        tex.mock_store_pixels(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(tex.mock_pixels(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
