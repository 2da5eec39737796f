//! Texture handles: named GPU allocations with CPU grab/restore support.

use opal_core::geometry::Size;
use opal_test_utils::{GpuTexture, RenderDevice};
use tracing::debug;

use crate::capability::TextureCaps;
use crate::error::RenderError;

pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Where a texture's contents currently live.
enum TextureState {
    /// No storage allocated yet; the handle exists by name only.
    Empty,
    /// Contents live on the GPU.
    Ready(GpuTexture),
    /// Contents were read back to the CPU ahead of a context teardown; the
    /// GPU resource has been released.
    Grabbed(Vec<u8>),
}

/// A named texture owned by the renderer.
///
/// The handle tracks two sizes: the logical size of the image data the
/// caller supplied, and the possibly larger allocated size after
/// capability adjustment. Consumers compute texel coordinates against the
/// allocated size.
pub struct TextureHandle {
    name: String,
    logical: Size<u32>,
    allocated: Size<u32>,
    state: TextureState,
}

impl TextureHandle {
    /// Create a handle with no storage. Storage appears on the first call
    /// to [`load_pixels`](Self::load_pixels) or [`resize`](Self::resize).
    pub fn empty(name: impl Into<String>) -> Self {
        TextureHandle {
            name: name.into(),
            logical: Size::new(0, 0),
            allocated: Size::new(0, 0),
            state: TextureState::Empty,
        }
    }

    /// Create a handle backed by a cleared allocation covering `size`.
    pub fn with_size(
        device: &dyn RenderDevice,
        caps: &TextureCaps,
        name: impl Into<String>,
        size: Size<u32>,
    ) -> Result<Self, RenderError> {
        let mut handle = Self::empty(name);
        handle.resize(device, caps, size)?;
        Ok(handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the image data the caller supplied.
    pub fn size(&self) -> Size<u32> {
        self.logical
    }

    /// Size of the backing GPU allocation; at least [`size`](Self::size).
    pub fn allocated_size(&self) -> Size<u32> {
        self.allocated
    }

    pub fn is_grabbed(&self) -> bool {
        matches!(self.state, TextureState::Grabbed(_))
    }

    /// The GPU texture, if contents are currently resident.
    ///
    /// Using a handle whose contents are grabbed (or never loaded) is a
    /// state violation the caller must handle; in debug builds it is loud.
    pub fn gpu(&self) -> Result<&GpuTexture, RenderError> {
        match &self.state {
            TextureState::Ready(texture) => Ok(texture),
            TextureState::Grabbed(_) => {
                tracing::error!(name = %self.name, "texture used while grabbed");
                Err(RenderError::ResourceState(format!(
                    "texture '{}' used while its contents are grabbed",
                    self.name
                )))
            }
            TextureState::Empty => Err(RenderError::ResourceState(format!(
                "texture '{}' has no storage",
                self.name
            ))),
        }
    }

    /// Replace the contents with `data`, a tightly packed RGBA image of
    /// `size`. Reallocates when the current allocation does not cover it.
    pub fn load_pixels(
        &mut self,
        device: &dyn RenderDevice,
        caps: &TextureCaps,
        size: Size<u32>,
        data: &[u8],
    ) -> Result<(), RenderError> {
        if !self.allocated.covers(size) || !matches!(self.state, TextureState::Ready(_)) {
            self.allocate(device, caps, size)?;
        }
        self.logical = size;
        let texture = self.gpu()?;
        if size == self.allocated {
            device.write_texture(texture, data);
        } else {
            device.write_texture_region(texture, 0, 0, size.width, size.height, data);
        }
        Ok(())
    }

    /// Grow the allocation to cover `size`, discarding current contents.
    /// A no-op when the allocation already covers the request.
    pub fn resize(
        &mut self,
        device: &dyn RenderDevice,
        caps: &TextureCaps,
        size: Size<u32>,
    ) -> Result<(), RenderError> {
        if matches!(self.state, TextureState::Ready(_)) && self.allocated.covers(size) {
            self.logical = size;
            return Ok(());
        }
        self.allocate(device, caps, size)?;
        self.logical = size;
        if let TextureState::Ready(texture) = &self.state {
            device.clear_texture(texture, wgpu::Color::TRANSPARENT);
        }
        Ok(())
    }

    /// Read the contents back to CPU memory and release the GPU resource.
    /// Grabbing an already grabbed or empty handle is a no-op.
    pub fn grab(&mut self, device: &dyn RenderDevice) -> Result<(), RenderError> {
        if let TextureState::Ready(texture) = &self.state {
            let pixels = device.read_texture(texture)?;
            debug!(name = %self.name, bytes = pixels.len(), "grabbed texture to CPU");
            self.state = TextureState::Grabbed(pixels);
        }
        Ok(())
    }

    /// Re-create the GPU resource and upload the grabbed contents.
    /// A no-op unless the handle is grabbed.
    pub fn restore(&mut self, device: &dyn RenderDevice) -> Result<(), RenderError> {
        let TextureState::Grabbed(pixels) = &mut self.state else {
            return Ok(());
        };
        let pixels = std::mem::take(pixels);
        let texture = create_gpu_texture(device, &self.name, self.allocated);
        device.write_texture(&texture, &pixels);
        debug!(name = %self.name, "restored texture from CPU copy");
        self.state = TextureState::Ready(texture);
        Ok(())
    }

    /// Save the texture contents as a PNG, cropped to the logical size.
    #[cfg(feature = "image")]
    pub fn save_png(
        &self,
        device: &dyn RenderDevice,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), RenderError> {
        let pixels = match &self.state {
            TextureState::Grabbed(pixels) => pixels.clone(),
            _ => device.read_texture(self.gpu()?)?,
        };
        // Drop the row padding the allocation added beyond the image data.
        let stride = self.allocated.width as usize * 4;
        let row_bytes = self.logical.width as usize * 4;
        let mut cropped = Vec::with_capacity(self.logical.height as usize * row_bytes);
        for row in 0..self.logical.height as usize {
            cropped.extend_from_slice(&pixels[row * stride..row * stride + row_bytes]);
        }
        let img = image::RgbaImage::from_raw(self.logical.width, self.logical.height, cropped)
            .ok_or_else(|| {
                RenderError::ResourceState(format!(
                    "texture '{}' pixel data does not match its size",
                    self.name
                ))
            })?;
        img.save(path)
            .map_err(|e| RenderError::ResourceLoad(format!("png export failed: {e}")))
    }

    fn allocate(
        &mut self,
        device: &dyn RenderDevice,
        caps: &TextureCaps,
        size: Size<u32>,
    ) -> Result<(), RenderError> {
        let adjusted = caps.adjusted_size(size)?;
        let texture = create_gpu_texture(device, &self.name, adjusted);
        self.allocated = adjusted;
        self.state = TextureState::Ready(texture);
        Ok(())
    }
}

pub(crate) fn create_gpu_texture(
    device: &dyn RenderDevice,
    label: &str,
    size: Size<u32>,
) -> GpuTexture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

#[cfg(test)]
mod tests {
    use opal_test_utils::MockDevice;

    use super::*;

    fn caps() -> TextureCaps {
        TextureCaps {
            supports_npot: false,
            must_be_square: false,
            max_size: 2048,
        }
    }

    #[test]
    fn load_allocates_adjusted_and_reports_both_sizes() {
        let device = MockDevice::new();
        let mut handle = TextureHandle::empty("widget-atlas");
        let data = vec![7u8; 100 * 60 * 4];
        handle
            .load_pixels(&device, &caps(), Size::new(100, 60), &data)
            .unwrap();

        assert_eq!(handle.size(), Size::new(100, 60));
        assert_eq!(handle.allocated_size(), Size::new(128, 64));
        assert_eq!(device.count_texture_creates(), 1);
    }

    #[test]
    fn grab_then_restore_round_trips_contents() {
        let device = MockDevice::new();
        let mut handle = TextureHandle::empty("icon");
        let data: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        handle
            .load_pixels(&device, &caps(), Size::new(4, 4), &data)
            .unwrap();

        handle.grab(&device).unwrap();
        assert!(handle.is_grabbed());
        assert!(handle.gpu().is_err());

        handle.restore(&device).unwrap();
        assert!(!handle.is_grabbed());
        let restored = device.read_texture(handle.gpu().unwrap()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn resize_within_allocation_is_a_no_op() {
        let device = MockDevice::new();
        let mut handle =
            TextureHandle::with_size(&device, &caps(), "scratch", Size::new(100, 100)).unwrap();
        assert_eq!(handle.allocated_size(), Size::square(128));

        handle.resize(&device, &caps(), Size::new(120, 90)).unwrap();
        assert_eq!(handle.size(), Size::new(120, 90));
        // Still the original allocation.
        assert_eq!(device.count_texture_creates(), 1);
    }

    #[test]
    fn oversized_load_is_rejected() {
        let device = MockDevice::new();
        let mut handle = TextureHandle::empty("huge");
        let err = handle
            .load_pixels(&device, &caps(), Size::new(5000, 5000), &[])
            .unwrap_err();
        assert!(matches!(err, RenderError::TextureSizeExceeded { .. }));
        assert_eq!(device.count_texture_creates(), 0);
    }

    #[test]
    fn double_grab_and_restore_are_no_ops() {
        let device = MockDevice::new();
        let mut handle =
            TextureHandle::with_size(&device, &caps(), "t", Size::new(8, 8)).unwrap();
        handle.grab(&device).unwrap();
        handle.grab(&device).unwrap();
        handle.restore(&device).unwrap();
        handle.restore(&device).unwrap();
        assert!(handle.gpu().is_ok());
    }
}
