//! Render targets: the shared queueing core, the viewport target, and
//! offscreen texture targets with backend-specific resolve.

use opal_core::geometry::{Rect, Size};
use opal_core::profiling::profile_scope;
use opal_test_utils::{GpuTexture, RenderDevice};
use tracing::warn;

use crate::capability::TextureCaps;
use crate::error::RenderError;
use crate::geometry::Quad;
use crate::offscreen::OffscreenBackend;
use crate::queue::{ExecuteStats, QuadQueue};
use crate::texture::{TextureHandle, create_gpu_texture};

/// Shared state of every render target: the drawable area, the quad queue,
/// and the queueing flag.
pub struct RenderTarget {
    area: Rect<f32>,
    queue: QuadQueue,
    queuing_enabled: bool,
}

impl RenderTarget {
    pub fn new(area: Rect<f32>) -> Self {
        RenderTarget {
            area,
            queue: QuadQueue::new(),
            queuing_enabled: true,
        }
    }

    pub fn area(&self) -> Rect<f32> {
        self.area
    }

    pub fn set_area(&mut self, area: Rect<f32>) {
        self.area = area;
    }

    /// When queueing is disabled, added quads draw immediately instead of
    /// entering the queue. Immediate drawing is only valid while a pass is
    /// active on this target.
    pub fn set_queuing_enabled(&mut self, enabled: bool) {
        self.queuing_enabled = enabled;
    }

    pub fn queuing_enabled(&self) -> bool {
        self.queuing_enabled
    }

    /// Queue a quad, or draw it immediately when queueing is disabled.
    pub fn add_quad(&mut self, device: &dyn RenderDevice, quad: Quad) -> ExecuteStats {
        if self.queuing_enabled {
            self.queue.push(quad);
            ExecuteStats::default()
        } else {
            QuadQueue::render_immediate(device, &quad, self.area.position())
        }
    }

    /// Discard all queued quads.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn queued_quads(&self) -> usize {
        self.queue.len()
    }

    fn execute(&mut self, device: &dyn RenderDevice) -> ExecuteStats {
        let origin = self.area.position();
        self.queue.execute(device, origin)
    }

    /// Scissor to the target area, narrowed by the frame's clip override
    /// when one is set.
    fn apply_scissor(&self, device: &dyn RenderDevice, clip: Option<Rect<f32>>) {
        let rect = match clip {
            Some(clip) => {
                let x = clip.x.max(self.area.x);
                let y = clip.y.max(self.area.y);
                let right = clip.right().min(self.area.right());
                let bottom = clip.bottom().min(self.area.bottom());
                Rect::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
            }
            None => self.area,
        };
        device.set_scissor(
            rect.x.max(0.0) as u32,
            rect.y.max(0.0) as u32,
            rect.width.max(0.0) as u32,
            rect.height.max(0.0) as u32,
        );
    }
}

/// The on-screen target: draws its queue into the frame texture supplied by
/// the host each frame.
pub struct ViewportTarget {
    base: RenderTarget,
}

impl ViewportTarget {
    pub fn new(size: Size<u32>) -> Self {
        ViewportTarget {
            base: RenderTarget::new(Rect::new(0.0, 0.0, size.width as f32, size.height as f32)),
        }
    }

    pub fn base(&self) -> &RenderTarget {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut RenderTarget {
        &mut self.base
    }

    pub fn set_size(&mut self, size: Size<u32>) {
        self.base
            .set_area(Rect::new(0.0, 0.0, size.width as f32, size.height as f32));
    }

    /// Run one pass over the frame texture and draw the queued quads.
    ///
    /// A pass failure is logged and the frame's drawing skipped; the queue
    /// survives for the next attempt.
    pub fn draw(
        &mut self,
        device: &dyn RenderDevice,
        frame: &GpuTexture,
        clip: Option<Rect<f32>>,
    ) -> ExecuteStats {
        profile_scope!("viewport_draw");
        if let Err(err) = device.begin_pass(frame, None) {
            warn!(%err, "viewport pass unavailable, skipping frame draw");
            return ExecuteStats::default();
        }
        self.base.apply_scissor(device, clip);
        let stats = self.base.execute(device);
        device.end_pass();
        stats
    }
}

/// An offscreen target rendering into its own texture.
///
/// Depending on the backend chosen at startup the pass either renders
/// straight into the texture or into a scratch allocation that is resolved
/// (copied or blitted) into the texture on deactivation.
pub struct TextureTarget {
    base: RenderTarget,
    backend: OffscreenBackend,
    handle: TextureHandle,
    scratch: Option<GpuTexture>,
    active: bool,
}

impl TextureTarget {
    pub(crate) fn new(
        device: &dyn RenderDevice,
        caps: &TextureCaps,
        backend: OffscreenBackend,
        initial: Size<u32>,
    ) -> Result<Self, RenderError> {
        debug_assert!(backend.is_available());
        let handle = TextureHandle::with_size(device, caps, "texture-target", initial)?;
        let scratch = if backend.uses_scratch() {
            Some(create_gpu_texture(
                device,
                "texture-target-scratch",
                handle.allocated_size(),
            ))
        } else {
            None
        };
        Ok(TextureTarget {
            base: RenderTarget::new(Rect::new(
                0.0,
                0.0,
                initial.width as f32,
                initial.height as f32,
            )),
            backend,
            handle,
            scratch,
            active: false,
        })
    }

    pub fn base(&self) -> &RenderTarget {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut RenderTarget {
        &mut self.base
    }

    pub fn backend(&self) -> OffscreenBackend {
        self.backend
    }

    /// The texture this target renders into.
    pub fn texture(&self) -> &TextureHandle {
        &self.handle
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begin a pass on this target.
    ///
    /// A pass failure (the analog of a failed context switch) is logged and
    /// leaves the target inactive; callers keep going and the content is
    /// simply stale for a frame.
    pub fn activate(&mut self, device: &dyn RenderDevice, clip: Option<Rect<f32>>) {
        debug_assert!(!self.active, "texture target activated twice");
        let pass_target = match self.pass_target() {
            Ok(texture) => texture.clone(),
            Err(err) => {
                warn!(%err, "texture target unusable, skipping activation");
                return;
            }
        };
        if let Err(err) = device.begin_pass(&pass_target, None) {
            warn!(%err, backend = %self.backend, "offscreen pass unavailable");
            return;
        }
        self.base.apply_scissor(device, clip);
        self.active = true;
    }

    /// End the pass and, for scratch-based backends, resolve the scratch
    /// contents into the target texture.
    pub fn deactivate(&mut self, device: &dyn RenderDevice) {
        if !self.active {
            return;
        }
        device.end_pass();
        self.active = false;

        if !self.backend.uses_scratch() {
            return;
        }
        let (Some(scratch), Ok(texture)) = (&self.scratch, self.handle.gpu()) else {
            return;
        };
        let resolve = match self.backend {
            OffscreenBackend::CopyBack => device.copy_texture(scratch, texture),
            OffscreenBackend::BlitBack => device.blit_texture(scratch, texture),
            _ => Ok(()),
        };
        if let Err(err) = resolve {
            warn!(%err, backend = %self.backend, "offscreen resolve failed");
        }
    }

    /// Activate, draw the queued quads, deactivate. The usual per-frame
    /// path for offscreen surfaces.
    pub fn render(&mut self, device: &dyn RenderDevice, clip: Option<Rect<f32>>) -> ExecuteStats {
        profile_scope!("texture_target_render");
        self.activate(device, clip);
        if !self.active {
            return ExecuteStats::default();
        }
        let stats = self.base.execute(device);
        self.deactivate(device);
        stats
    }

    /// Declare the size content will be rendered at.
    ///
    /// Growth-only: when the current allocation already covers the request
    /// this is a no-op. Otherwise the texture is reallocated with padding
    /// (and capability adjustment) and cleared, so callers must re-render.
    /// The drawable area always reports the real allocation, never the raw
    /// request.
    pub fn declare_render_size(
        &mut self,
        device: &dyn RenderDevice,
        caps: &TextureCaps,
        requested: Size<u32>,
    ) -> Result<(), RenderError> {
        if self.handle.allocated_size().covers(requested) && !self.handle.is_grabbed() {
            return Ok(());
        }
        let padded = caps.padded_target_size(requested)?;
        self.handle.resize(device, caps, padded)?;
        if self.backend.uses_scratch() {
            self.scratch = Some(create_gpu_texture(
                device,
                "texture-target-scratch",
                self.handle.allocated_size(),
            ));
        }
        let allocated = self.handle.allocated_size();
        self.base.set_area(Rect::new(
            0.0,
            0.0,
            allocated.width as f32,
            allocated.height as f32,
        ));
        Ok(())
    }

    /// Clear both the queued quads and the texture contents.
    pub fn clear(&mut self, device: &dyn RenderDevice) {
        self.base.clear_queue();
        if let Ok(texture) = self.handle.gpu() {
            device.clear_texture(texture, wgpu::Color::TRANSPARENT);
        }
    }

    pub(crate) fn grab(&mut self, device: &dyn RenderDevice) -> Result<(), RenderError> {
        self.scratch = None;
        self.handle.grab(device)
    }

    pub(crate) fn restore(&mut self, device: &dyn RenderDevice) -> Result<(), RenderError> {
        self.handle.restore(device)?;
        if self.backend.uses_scratch() && self.scratch.is_none() {
            self.scratch = Some(create_gpu_texture(
                device,
                "texture-target-scratch",
                self.handle.allocated_size(),
            ));
        }
        Ok(())
    }

    fn pass_target(&self) -> Result<&GpuTexture, RenderError> {
        if self.backend.uses_scratch() {
            self.scratch.as_ref().ok_or_else(|| {
                RenderError::ResourceState("texture target scratch missing".into())
            })
        } else {
            self.handle.gpu()
        }
    }
}

#[cfg(test)]
mod tests {
    use opal_test_utils::{DeviceCall, MockDevice};

    use super::*;
    use crate::geometry::{ColorRect, SplitMode};

    fn caps() -> TextureCaps {
        TextureCaps {
            supports_npot: false,
            must_be_square: false,
            max_size: 2048,
        }
    }

    fn quad(texture: &GpuTexture) -> Quad {
        Quad {
            texture: texture.clone(),
            dest: Rect::new(0.0, 0.0, 10.0, 10.0),
            z: 0.0,
            tex_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            colors: ColorRect::default(),
            split: SplitMode::TopLeftToBottomRight,
        }
    }

    fn target(device: &MockDevice, backend: OffscreenBackend) -> TextureTarget {
        TextureTarget::new(device, &caps(), backend, Size::square(64)).unwrap()
    }

    #[test]
    fn viewport_draw_brackets_one_pass() {
        let device = MockDevice::new();
        let frame = GpuTexture::mock(640, 480, wgpu::TextureFormat::Bgra8Unorm);
        let sampled = GpuTexture::mock(16, 16, wgpu::TextureFormat::Rgba8Unorm);

        let mut viewport = ViewportTarget::new(Size::new(640, 480));
        viewport.base_mut().add_quad(&device, quad(&sampled));
        let stats = viewport.draw(&device, &frame, None);

        assert_eq!(stats.draw_calls, 1);
        assert_eq!(device.count_passes(), 1);
        assert!(device.passes_balanced());
    }

    #[test]
    fn viewport_pass_failure_is_swallowed_and_queue_survives() {
        let device = MockDevice::new();
        let frame = GpuTexture::mock(640, 480, wgpu::TextureFormat::Bgra8Unorm);
        let sampled = GpuTexture::mock(16, 16, wgpu::TextureFormat::Rgba8Unorm);

        let mut viewport = ViewportTarget::new(Size::new(640, 480));
        viewport.base_mut().add_quad(&device, quad(&sampled));

        device.fail_next_pass();
        let stats = viewport.draw(&device, &frame, None);
        assert_eq!(stats, ExecuteStats::default());
        assert_eq!(viewport.base().queued_quads(), 1);

        // Next frame works again.
        let stats = viewport.draw(&device, &frame, None);
        assert_eq!(stats.draw_calls, 1);
    }

    #[test]
    fn clip_override_narrows_the_scissor() {
        let device = MockDevice::new();
        let frame = GpuTexture::mock(640, 480, wgpu::TextureFormat::Bgra8Unorm);
        let mut viewport = ViewportTarget::new(Size::new(640, 480));

        viewport.draw(&device, &frame, Some(Rect::new(10.0, 20.0, 1000.0, 30.0)));
        assert_eq!(device.last_scissor(), Some((10, 20, 630, 30)));

        viewport.draw(&device, &frame, None);
        assert_eq!(device.last_scissor(), Some((0, 0, 640, 480)));
    }

    #[test]
    fn direct_bind_renders_into_the_texture_without_copies() {
        let device = MockDevice::new();
        let sampled = GpuTexture::mock(16, 16, wgpu::TextureFormat::Rgba8Unorm);
        let mut target = target(&device, OffscreenBackend::DirectBind);
        target.base_mut().add_quad(&device, quad(&sampled));

        let stats = target.render(&device, None);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(device.count_copies(), 0);
        assert_eq!(device.count_blits(), 0);

        let target_id = target.texture().gpu().unwrap().id();
        assert!(device.calls().iter().any(|c| matches!(
            c,
            DeviceCall::BeginPass { target, .. } if *target == target_id
        )));
    }

    #[test]
    fn copy_back_resolves_scratch_into_texture() {
        let device = MockDevice::new();
        let sampled = GpuTexture::mock(16, 16, wgpu::TextureFormat::Rgba8Unorm);
        let mut target = target(&device, OffscreenBackend::CopyBack);
        target.base_mut().add_quad(&device, quad(&sampled));

        target.render(&device, None);
        assert_eq!(device.count_copies(), 1);
        let target_id = target.texture().gpu().unwrap().id();
        // The pass ran on the scratch texture, not the bindable one.
        assert!(device.calls().iter().all(|c| !matches!(
            c,
            DeviceCall::BeginPass { target, .. } if *target == target_id
        )));
    }

    #[test]
    fn blit_back_resolves_with_a_blit() {
        let device = MockDevice::new();
        let mut target = target(&device, OffscreenBackend::BlitBack);
        target.render(&device, None);
        assert_eq!(device.count_blits(), 1);
        assert_eq!(device.count_copies(), 0);
    }

    #[test]
    fn failed_activation_skips_the_frame() {
        let device = MockDevice::new();
        let mut target = target(&device, OffscreenBackend::DirectBind);
        device.fail_next_pass();

        let stats = target.render(&device, None);
        assert_eq!(stats, ExecuteStats::default());
        assert!(!target.is_active());
        assert!(device.passes_balanced());
    }

    #[test]
    fn declare_render_size_grows_monotonically() {
        let device = MockDevice::new();
        let mut target = target(&device, OffscreenBackend::DirectBind);
        let creates_before = device.count_texture_creates();

        // Covered by the current 64x64 allocation: a complete no-op.
        let area_before = target.base().area();
        target
            .declare_render_size(&device, &caps(), Size::new(40, 40))
            .unwrap();
        assert_eq!(device.count_texture_creates(), creates_before);
        assert_eq!(target.base().area(), area_before);

        // Growth: 100+128=228 rounded up to 256.
        target
            .declare_render_size(&device, &caps(), Size::new(100, 100))
            .unwrap();
        assert_eq!(target.texture().allocated_size(), Size::square(256));

        // Shrinking request keeps the allocation and the area.
        let creates = device.count_texture_creates();
        target
            .declare_render_size(&device, &caps(), Size::new(30, 30))
            .unwrap();
        assert_eq!(device.count_texture_creates(), creates);
        assert_eq!(target.texture().allocated_size(), Size::square(256));
        assert_eq!(target.base().area(), Rect::new(0.0, 0.0, 256.0, 256.0));
    }

    #[test]
    fn declared_area_reports_the_padded_allocation() {
        let device = MockDevice::new();
        let mut target = target(&device, OffscreenBackend::DirectBind);
        target
            .declare_render_size(&device, &caps(), Size::new(100, 100))
            .unwrap();
        assert_eq!(target.texture().allocated_size(), Size::square(256));
        assert_eq!(target.base().area(), Rect::new(0.0, 0.0, 256.0, 256.0));
    }

    #[test]
    fn oversized_declaration_fails_cleanly() {
        let device = MockDevice::new();
        let mut target = target(&device, OffscreenBackend::DirectBind);
        let err = target
            .declare_render_size(&device, &caps(), Size::new(5000, 5000))
            .unwrap_err();
        assert!(matches!(err, RenderError::TextureSizeExceeded { .. }));
        // The old allocation is still usable.
        assert!(target.texture().gpu().is_ok());
    }

    #[test]
    fn immediate_mode_draws_without_queueing() {
        let device = MockDevice::new();
        let sampled = GpuTexture::mock(16, 16, wgpu::TextureFormat::Rgba8Unorm);
        let mut target = target(&device, OffscreenBackend::DirectBind);

        target.activate(&device, None);
        target.base_mut().set_queuing_enabled(false);
        let stats = target.base_mut().add_quad(&device, quad(&sampled));
        target.deactivate(&device);

        assert_eq!(stats.draw_calls, 1);
        assert_eq!(target.base().queued_quads(), 0);
    }

    #[test]
    fn grab_restore_round_trip_recreates_scratch() {
        let device = MockDevice::new();
        let mut target = target(&device, OffscreenBackend::CopyBack);
        target.grab(&device).unwrap();
        assert!(target.texture().is_grabbed());

        target.restore(&device).unwrap();
        assert!(!target.texture().is_grabbed());
        // Rendering works again after restore.
        let _ = target.render(&device, None);
        assert!(device.passes_balanced());
    }
}
