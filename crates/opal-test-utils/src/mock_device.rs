//! Recording mock implementation of [`RenderDevice`] for testing.
//!
//! The mock never touches a GPU: textures are CPU pixel stores, passes are
//! bookkeeping, and every operation is appended to a call log that tests
//! inspect to assert on bind/draw/pass counts.

use parking_lot::Mutex;

use crate::device::{BlendMode, DeviceError, RenderDevice};
use crate::gpu_types::GpuTexture;

/// One recorded device operation.
#[derive(Debug, Clone)]
pub enum DeviceCall {
    CreateTexture {
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    },
    WriteTexture {
        texture: u64,
        bytes: usize,
    },
    WriteTextureRegion {
        texture: u64,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    ReadTexture {
        texture: u64,
    },
    CopyTexture {
        src: u64,
        dst: u64,
    },
    BlitTexture {
        src: u64,
        dst: u64,
    },
    ClearTexture {
        texture: u64,
    },
    BeginPass {
        target: u64,
        cleared: bool,
    },
    SetScissor {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    SetBlendMode {
        mode: BlendMode,
    },
    BindTexture {
        texture: u64,
    },
    Draw {
        vertex_count: u32,
    },
    EndPass,
}

/// Mock [`RenderDevice`] that records calls instead of issuing GPU work.
///
/// # Example
///
/// ```
/// use opal_test_utils::{DeviceCall, MockDevice, RenderDevice};
///
/// let device = MockDevice::new();
/// let tex = device.create_texture(&wgpu::TextureDescriptor {
///     label: None,
///     size: wgpu::Extent3d { width: 8, height: 8, depth_or_array_layers: 1 },
///     mip_level_count: 1,
///     sample_count: 1,
///     dimension: wgpu::TextureDimension::D2,
///     format: wgpu::TextureFormat::Rgba8Unorm,
///     usage: wgpu::TextureUsages::TEXTURE_BINDING,
///     view_formats: &[],
/// });
/// assert!(tex.is_mock());
/// assert_eq!(device.count_texture_creates(), 1);
/// ```
pub struct MockDevice {
    calls: Mutex<Vec<DeviceCall>>,
    /// When set, the next `begin_pass` fails once (context-switch failure).
    fail_next_pass: Mutex<bool>,
    /// Depth of currently open passes (the renderer should keep this at 0/1).
    open_passes: Mutex<u32>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_next_pass: Mutex::new(false),
            open_passes: Mutex::new(0),
        }
    }

    /// Arrange for the next `begin_pass` to fail, simulating a lost or
    /// unswitchable rendering context.
    pub fn fail_next_pass(&self) {
        *self.fail_next_pass.lock() = true;
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn count_texture_creates(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::CreateTexture { .. }))
    }

    pub fn count_texture_binds(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::BindTexture { .. }))
    }

    pub fn count_draws(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::Draw { .. }))
    }

    pub fn count_passes(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::BeginPass { .. }))
    }

    pub fn count_copies(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::CopyTexture { .. }))
    }

    pub fn count_blits(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::BlitTexture { .. }))
    }

    /// The most recently set blend mode, if any was set.
    pub fn last_blend_mode(&self) -> Option<BlendMode> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            DeviceCall::SetBlendMode { mode } => Some(*mode),
            _ => None,
        })
    }

    /// The most recently recorded scissor rectangle, if any was set.
    pub fn last_scissor(&self) -> Option<(u32, u32, u32, u32)> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            DeviceCall::SetScissor {
                x,
                y,
                width,
                height,
            } => Some((*x, *y, *width, *height)),
            _ => None,
        })
    }

    /// Total vertices across all recorded draws.
    pub fn total_vertices_drawn(&self) -> u32 {
        self.calls
            .lock()
            .iter()
            .map(|c| match c {
                DeviceCall::Draw { vertex_count } => *vertex_count,
                _ => 0,
            })
            .sum()
    }

    /// True when every `begin_pass` has a matching `end_pass`.
    pub fn passes_balanced(&self) -> bool {
        *self.open_passes.lock() == 0
    }

    fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().push(call);
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for MockDevice {
    fn create_texture(&self, desc: &wgpu::TextureDescriptor) -> GpuTexture {
        self.record(DeviceCall::CreateTexture {
            width: desc.size.width,
            height: desc.size.height,
            format: desc.format,
        });
        GpuTexture::mock(desc.size.width, desc.size.height, desc.format)
    }

    fn write_texture(&self, texture: &GpuTexture, data: &[u8]) {
        self.record(DeviceCall::WriteTexture {
            texture: texture.id(),
            bytes: data.len(),
        });
        texture.mock_store_pixels(data.to_vec());
    }

    fn write_texture_region(
        &self,
        texture: &GpuTexture,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        self.record(DeviceCall::WriteTextureRegion {
            texture: texture.id(),
            x,
            y,
            width,
            height,
        });
        let mut store = texture.mock_pixels();
        let dst_stride = (texture.width() * 4) as usize;
        let src_stride = (width * 4) as usize;
        for row in 0..height as usize {
            let dst_off = (y as usize + row) * dst_stride + (x * 4) as usize;
            let src_off = row * src_stride;
            store[dst_off..dst_off + src_stride]
                .copy_from_slice(&data[src_off..src_off + src_stride]);
        }
        texture.mock_store_pixels(store);
    }

    fn read_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>, DeviceError> {
        self.record(DeviceCall::ReadTexture {
            texture: texture.id(),
        });
        Ok(texture.mock_pixels())
    }

    fn copy_texture(&self, src: &GpuTexture, dst: &GpuTexture) -> Result<(), DeviceError> {
        if src.format() != dst.format() {
            return Err(DeviceError::CopyMismatch);
        }
        self.record(DeviceCall::CopyTexture {
            src: src.id(),
            dst: dst.id(),
        });
        dst.mock_store_pixels(src.mock_pixels());
        Ok(())
    }

    fn blit_texture(&self, src: &GpuTexture, dst: &GpuTexture) -> Result<(), DeviceError> {
        self.record(DeviceCall::BlitTexture {
            src: src.id(),
            dst: dst.id(),
        });
        // The mock approximates a sampled blit by copying the overlapping
        // rows; format conversion is not modelled.
        let pixels = src.mock_pixels();
        let rows = src.height().min(dst.height());
        let row_bytes = (src.width().min(dst.width()) * 4) as usize;
        let src_stride = (src.width() * 4) as usize;
        let mut store = dst.mock_pixels();
        let dst_stride = (dst.width() * 4) as usize;
        for row in 0..rows as usize {
            store[row * dst_stride..row * dst_stride + row_bytes]
                .copy_from_slice(&pixels[row * src_stride..row * src_stride + row_bytes]);
        }
        dst.mock_store_pixels(store);
        Ok(())
    }

    fn clear_texture(&self, texture: &GpuTexture, _color: wgpu::Color) {
        self.record(DeviceCall::ClearTexture {
            texture: texture.id(),
        });
        let len = (texture.width() * texture.height() * 4) as usize;
        texture.mock_store_pixels(vec![0u8; len]);
    }

    fn begin_pass(
        &self,
        target: &GpuTexture,
        clear: Option<wgpu::Color>,
    ) -> Result<(), DeviceError> {
        let mut fail = self.fail_next_pass.lock();
        if *fail {
            *fail = false;
            return Err(DeviceError::PassUnavailable(
                "simulated context switch failure".into(),
            ));
        }
        self.record(DeviceCall::BeginPass {
            target: target.id(),
            cleared: clear.is_some(),
        });
        *self.open_passes.lock() += 1;
        Ok(())
    }

    fn set_scissor(&self, x: u32, y: u32, width: u32, height: u32) {
        self.record(DeviceCall::SetScissor {
            x,
            y,
            width,
            height,
        });
    }

    fn set_blend_mode(&self, mode: BlendMode) {
        self.record(DeviceCall::SetBlendMode { mode });
    }

    fn bind_texture(&self, texture: &GpuTexture) {
        self.record(DeviceCall::BindTexture {
            texture: texture.id(),
        });
    }

    fn draw(&self, _vertex_bytes: &[u8], vertex_count: u32) {
        self.record(DeviceCall::Draw { vertex_count });
    }

    fn end_pass(&self) {
        self.record(DeviceCall::EndPass);
        let mut open = self.open_passes.lock();
        *open = open.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(width: u32, height: u32) -> wgpu::TextureDescriptor<'static> {
        wgpu::TextureDescriptor {
            label: None,
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        }
    }

    #[test]
    fn records_pass_bracket() {
        let device = MockDevice::new();
        let target = device.create_texture(&desc(16, 16));

        device.begin_pass(&target, None).unwrap();
        device.draw(&[], 6);
        device.end_pass();

        assert_eq!(device.count_passes(), 1);
        assert_eq!(device.count_draws(), 1);
        assert!(device.passes_balanced());
    }

    #[test]
    fn simulated_pass_failure_fires_once() {
        let device = MockDevice::new();
        let target = device.create_texture(&desc(4, 4));

        device.fail_next_pass();
        assert!(device.begin_pass(&target, None).is_err());
        assert!(device.begin_pass(&target, None).is_ok());
        device.end_pass();
    }

    #[test]
    fn copy_requires_matching_format() {
        let device = MockDevice::new();
        let a = device.create_texture(&desc(4, 4));
        let b = GpuTexture::mock(4, 4, wgpu::TextureFormat::Bgra8Unorm);

        assert_eq!(
            device.copy_texture(&a, &b),
            Err(DeviceError::CopyMismatch)
        );
    }

    #[test]
    fn region_write_lands_at_offset() {
        let device = MockDevice::new();
        let tex = device.create_texture(&desc(4, 2));
        device.write_texture_region(&tex, 1, 1, 2, 1, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let pixels = device.read_texture(&tex).unwrap();
        // Row 1, pixels 1..3 carry the data, everything else stays zero.
        assert_eq!(&pixels[20..28], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(pixels[..20].iter().all(|b| *b == 0));
        assert!(pixels[28..].iter().all(|b| *b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let device = MockDevice::new();
        let tex = device.create_texture(&desc(2, 1));
        device.write_texture(&tex, &[9, 8, 7, 6, 5, 4, 3, 2]);
        assert_eq!(device.read_texture(&tex).unwrap(), vec![9, 8, 7, 6, 5, 4, 3, 2]);
    }
}
