//! The renderer facade: resource ownership, frame orchestration, and the
//! embedding-facing API.

use std::sync::Arc;

use opal_core::geometry::{Rect, Size};
use opal_core::profiling::profile_function;
use opal_test_utils::{GpuTexture, RenderDevice};
use tracing::{debug, info};

use crate::capability::TextureCaps;
use crate::codec::{CodecRegistry, FileResourceProvider, ImageCodec, ResourceProvider};
use crate::context::GraphicsContext;
use crate::device::WgpuDevice;
use crate::error::RenderError;
use crate::geometry::GeometryBuffer;
use crate::handle::{Handle, HandleTable};
use crate::offscreen::{OffscreenBackend, OffscreenSupport, TextureTargetFactory};
use crate::queue::ExecuteStats;
use crate::state::{BlendMode, FrameTracker, RenderState, StateGuard};
use crate::target::{TextureTarget, ViewportTarget};
use crate::texture::TextureHandle;

pub type TextureId = Handle<TextureHandle>;
pub type GeometryId = Handle<GeometryBuffer>;
pub type TargetId = Handle<TextureTarget>;

/// Counters for one frame, reset by `begin_rendering`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub passes: u32,
    pub texture_binds: u32,
    pub draw_calls: u32,
    pub vertices: u32,
}

impl FrameStats {
    fn add_execute(&mut self, stats: ExecuteStats) {
        self.texture_binds += stats.texture_binds;
        self.draw_calls += stats.draw_calls;
        self.vertices += stats.vertices;
    }
}

/// The GUI renderer.
///
/// Owns every texture, geometry buffer and offscreen target, hands out
/// generation-checked handles for them, and drives the per-frame
/// begin/draw/end cycle over a frame texture supplied by the host.
pub struct Renderer {
    device: Arc<dyn RenderDevice>,
    caps: TextureCaps,
    factory: TextureTargetFactory,
    viewport: ViewportTarget,
    display_size: Size<u32>,
    size_listeners: Vec<Box<dyn Fn(Size<u32>) + Send + Sync>>,
    textures: HandleTable<TextureHandle>,
    geometry: HandleTable<GeometryBuffer>,
    targets: HandleTable<TextureTarget>,
    codecs: CodecRegistry,
    resources: Box<dyn ResourceProvider>,
    state: RenderState,
    guard: StateGuard,
    frames: FrameTracker,
    frame_texture: Option<GpuTexture>,
    stats: FrameStats,
    info: String,
}

impl Renderer {
    /// Create a renderer over a real GPU context.
    pub fn new(context: Arc<GraphicsContext>, display_size: Size<u32>) -> Result<Self, RenderError> {
        let caps = TextureCaps::probe(&context);
        let support = OffscreenSupport::probe(&context);
        let device: Arc<dyn RenderDevice> = Arc::new(WgpuDevice::new(context));
        Ok(Self::with_device(device, caps, support, display_size))
    }

    /// Create a renderer over any device implementation.
    ///
    /// This is the seam tests and unusual embeddings go through; `new` is a
    /// thin wrapper that probes a wgpu context and calls this.
    pub fn with_device(
        device: Arc<dyn RenderDevice>,
        caps: TextureCaps,
        support: OffscreenSupport,
        display_size: Size<u32>,
    ) -> Self {
        let factory = TextureTargetFactory::new(support, caps);
        let info = format!(
            "opal renderer (offscreen: {}, max texture size: {}, npot: {})",
            factory.backend(),
            caps.max_size,
            caps.supports_npot,
        );
        info!(%info, "renderer created");
        Renderer {
            device,
            caps,
            factory,
            viewport: ViewportTarget::new(display_size),
            display_size,
            size_listeners: Vec::new(),
            textures: HandleTable::new(),
            geometry: HandleTable::new(),
            targets: HandleTable::new(),
            codecs: CodecRegistry::new(),
            resources: Box::new(FileResourceProvider::new(".")),
            state: RenderState::default(),
            guard: StateGuard::new(),
            frames: FrameTracker::new(),
            frame_texture: None,
            stats: FrameStats::default(),
            info,
        }
    }

    /// One-line description of the renderer and its capabilities.
    pub fn info_string(&self) -> &str {
        &self.info
    }

    pub fn caps(&self) -> &TextureCaps {
        &self.caps
    }

    pub fn offscreen_backend(&self) -> OffscreenBackend {
        self.factory.backend()
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    // ---- display size ----

    pub fn display_size(&self) -> Size<u32> {
        self.display_size
    }

    /// Update the display size and notify registered listeners.
    pub fn set_display_size(&mut self, size: Size<u32>) {
        if size == self.display_size {
            return;
        }
        debug!(%size, "display size changed");
        self.display_size = size;
        self.viewport.set_size(size);
        for listener in &self.size_listeners {
            listener(size);
        }
    }

    pub fn add_display_size_listener(
        &mut self,
        listener: impl Fn(Size<u32>) + Send + Sync + 'static,
    ) {
        self.size_listeners.push(Box::new(listener));
    }

    // ---- textures ----

    /// Create a named texture with no storage yet.
    pub fn create_texture(&mut self, name: impl Into<String>) -> TextureId {
        self.textures.insert(TextureHandle::empty(name))
    }

    /// Create a texture backed by a cleared allocation covering `size`.
    pub fn create_texture_with_size(
        &mut self,
        name: impl Into<String>,
        size: Size<u32>,
    ) -> Result<TextureId, RenderError> {
        let handle = TextureHandle::with_size(self.device.as_ref(), &self.caps, name, size)?;
        Ok(self.textures.insert(handle))
    }

    /// Create a texture from tightly packed RGBA pixels.
    pub fn create_texture_from_pixels(
        &mut self,
        name: impl Into<String>,
        size: Size<u32>,
        data: &[u8],
    ) -> Result<TextureId, RenderError> {
        let mut handle = TextureHandle::empty(name);
        handle.load_pixels(self.device.as_ref(), &self.caps, size, data)?;
        Ok(self.textures.insert(handle))
    }

    /// Create a texture by decoding in-memory image data with a named
    /// codec.
    pub fn create_texture_from_memory(
        &mut self,
        name: impl Into<String>,
        encoded: &[u8],
        codec_name: &str,
    ) -> Result<TextureId, RenderError> {
        let decoded = self.codecs.get(codec_name)?.decode(encoded)?;
        self.create_texture_from_pixels(name, decoded.size, &decoded.data)
    }

    /// Create a texture by loading a resource and decoding it.
    pub fn create_texture_from_resource(
        &mut self,
        name: impl Into<String>,
        resource: &str,
        codec_name: &str,
    ) -> Result<TextureId, RenderError> {
        let raw = self.resources.load_raw_data(resource)?;
        self.create_texture_from_memory(name, &raw, codec_name)
    }

    pub fn texture(&self, id: TextureId) -> Result<&TextureHandle, RenderError> {
        self.textures.get(id)
    }

    pub fn texture_mut(&mut self, id: TextureId) -> Result<&mut TextureHandle, RenderError> {
        self.textures.get_mut(id)
    }

    pub fn destroy_texture(&mut self, id: TextureId) -> Result<(), RenderError> {
        self.textures.remove(id).map(drop)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    // ---- geometry buffers ----

    pub fn create_geometry_buffer(&mut self) -> GeometryId {
        self.geometry.insert(GeometryBuffer::new())
    }

    pub fn geometry_buffer(&self, id: GeometryId) -> Result<&GeometryBuffer, RenderError> {
        self.geometry.get(id)
    }

    pub fn geometry_buffer_mut(
        &mut self,
        id: GeometryId,
    ) -> Result<&mut GeometryBuffer, RenderError> {
        self.geometry.get_mut(id)
    }

    pub fn destroy_geometry_buffer(&mut self, id: GeometryId) -> Result<(), RenderError> {
        self.geometry.remove(id).map(drop)
    }

    /// Replay a geometry buffer into the viewport's quad queue.
    pub fn draw_geometry_buffer(&mut self, id: GeometryId) -> Result<(), RenderError> {
        let buffer = self.geometry.get(id)?;
        let quads: Vec<_> = buffer.translated_quads().collect();
        for quad in quads {
            let stats = self.viewport.base_mut().add_quad(self.device.as_ref(), quad);
            self.stats.add_execute(stats);
        }
        Ok(())
    }

    // ---- texture targets ----

    /// Create an offscreen target, or `None` when the device supports no
    /// offscreen mechanism.
    pub fn create_texture_target(&mut self) -> Result<Option<TargetId>, RenderError> {
        match self.factory.create_target(self.device.as_ref())? {
            Some(target) => Ok(Some(self.targets.insert(target))),
            None => Ok(None),
        }
    }

    pub fn texture_target(&self, id: TargetId) -> Result<&TextureTarget, RenderError> {
        self.targets.get(id)
    }

    pub fn texture_target_mut(&mut self, id: TargetId) -> Result<&mut TextureTarget, RenderError> {
        self.targets.get_mut(id)
    }

    pub fn destroy_texture_target(&mut self, id: TargetId) -> Result<(), RenderError> {
        self.targets.remove(id).map(drop)
    }

    /// Render one offscreen target's queued quads into its texture.
    pub fn render_texture_target(&mut self, id: TargetId) -> Result<(), RenderError> {
        let device = self.device.clone();
        let clip = self.state.scissor;
        let target = self.targets.get_mut(id)?;
        let stats = target.render(device.as_ref(), clip);
        self.stats.passes += 1;
        self.stats.add_execute(stats);
        Ok(())
    }

    pub fn declare_target_render_size(
        &mut self,
        id: TargetId,
        size: Size<u32>,
    ) -> Result<(), RenderError> {
        let device = self.device.clone();
        let caps = self.caps;
        self.targets
            .get_mut(id)?
            .declare_render_size(device.as_ref(), &caps, size)
    }

    // ---- frame cycle ----

    /// Start a frame: reset counters, apply the state baseline, and adopt
    /// the host's frame texture as the viewport's drawing surface.
    pub fn begin_rendering(&mut self, frame: GpuTexture) {
        profile_function!();
        self.stats = FrameStats::default();
        let saved = self.guard.begin(&mut self.state);
        self.device.set_blend_mode(self.state.blend);
        self.frames.frame_started(saved);
        self.frame_texture = Some(frame);
    }

    /// Draw the viewport's queued quads into the frame texture.
    pub fn do_render(&mut self) {
        profile_function!();
        let Some(frame) = self.frame_texture.clone() else {
            tracing::warn!("do_render called outside begin/end_rendering");
            return;
        };
        let stats = self
            .viewport
            .draw(self.device.as_ref(), &frame, self.state.scissor);
        self.stats.passes += 1;
        self.stats.add_execute(stats);
    }

    /// Finish the frame, restoring the state saved by `begin_rendering`.
    pub fn end_rendering(&mut self) {
        if let Some(saved) = self.frames.frame_ended() {
            self.guard.end(&mut self.state, saved);
            self.device.set_blend_mode(self.state.blend);
        }
        self.frame_texture = None;
    }

    /// Discard everything queued on the viewport.
    pub fn clear_render_list(&mut self) {
        self.viewport.base_mut().clear_queue();
    }

    pub fn viewport(&self) -> &ViewportTarget {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportTarget {
        &mut self.viewport
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    // ---- state ----

    pub fn render_state(&self) -> &RenderState {
        &self.state
    }

    /// Set the blend mode for subsequent draws and push it to the device.
    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.state.blend = mode;
        self.device.set_blend_mode(mode);
    }

    /// Set or clear the scissor override applied on every pass.
    pub fn set_scissor(&mut self, rect: Option<Rect<f32>>) {
        self.state.scissor = rect;
    }

    /// Force the full set of state defaults at every frame start; see
    /// [`StateGuard::set_extra_state_reset`].
    pub fn set_extra_state_reset(&mut self, enabled: bool) {
        self.guard.set_extra_state_reset(enabled);
    }

    // ---- codecs and resources ----

    pub fn register_codec(&mut self, codec: Box<dyn ImageCodec>) {
        self.codecs.register(codec);
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn set_resource_provider(&mut self, provider: Box<dyn ResourceProvider>) {
        self.resources = provider;
    }

    // ---- context loss ----

    /// Read every texture (including target textures) back to CPU memory
    /// ahead of a context teardown.
    pub fn grab_textures(&mut self) -> Result<(), RenderError> {
        profile_function!();
        info!(
            textures = self.textures.len(),
            targets = self.targets.len(),
            "grabbing textures to CPU"
        );
        for handle in self.textures.iter_mut() {
            handle.grab(self.device.as_ref())?;
        }
        for target in self.targets.iter_mut() {
            target.grab(self.device.as_ref())?;
        }
        Ok(())
    }

    /// Recreate GPU resources from the grabbed CPU copies.
    pub fn restore_textures(&mut self) -> Result<(), RenderError> {
        profile_function!();
        info!(
            textures = self.textures.len(),
            targets = self.targets.len(),
            "restoring textures from CPU"
        );
        for handle in self.textures.iter_mut() {
            handle.restore(self.device.as_ref())?;
        }
        for target in self.targets.iter_mut() {
            target.restore(self.device.as_ref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use opal_core::geometry::Rect;
    use opal_test_utils::MockDevice;

    use super::*;
    use crate::geometry::{ColorRect, Quad, SplitMode};

    fn renderer(device: &Arc<MockDevice>) -> Renderer {
        let caps = TextureCaps {
            supports_npot: false,
            must_be_square: false,
            max_size: 2048,
        };
        Renderer::with_device(
            device.clone(),
            caps,
            OffscreenSupport::DIRECT_BIND,
            Size::new(640, 480),
        )
    }

    fn quad(texture: &GpuTexture, z: f32) -> Quad {
        Quad {
            texture: texture.clone(),
            dest: Rect::new(0.0, 0.0, 10.0, 10.0),
            z,
            tex_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            colors: ColorRect::default(),
            split: SplitMode::TopLeftToBottomRight,
        }
    }

    fn frame() -> GpuTexture {
        GpuTexture::mock(640, 480, wgpu::TextureFormat::Bgra8Unorm)
    }

    #[test]
    fn frame_cycle_draws_queued_geometry() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);
        let sampled = GpuTexture::mock(8, 8, wgpu::TextureFormat::Rgba8Unorm);

        let buffer = renderer.create_geometry_buffer();
        for z in [1.0, 3.0, 2.0] {
            renderer.geometry_buffer_mut(buffer).unwrap().append_quad(quad(&sampled, z));
        }

        renderer.begin_rendering(frame());
        renderer.draw_geometry_buffer(buffer).unwrap();
        renderer.do_render();
        renderer.end_rendering();

        let stats = renderer.frame_stats();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.texture_binds, 1);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 18);
        assert!(device.passes_balanced());
    }

    #[test]
    fn cleared_render_list_draws_nothing() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);
        let sampled = GpuTexture::mock(8, 8, wgpu::TextureFormat::Rgba8Unorm);

        let buffer = renderer.create_geometry_buffer();
        renderer.geometry_buffer_mut(buffer).unwrap().append_quad(quad(&sampled, 0.0));

        renderer.begin_rendering(frame());
        renderer.draw_geometry_buffer(buffer).unwrap();
        renderer.clear_render_list();
        renderer.do_render();
        renderer.end_rendering();

        assert_eq!(renderer.frame_stats().draw_calls, 0);
        assert_eq!(device.count_draws(), 0);
    }

    #[test]
    fn blend_mode_reaches_the_device() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);
        renderer.set_blend_mode(BlendMode::Premultiplied);
        assert_eq!(device.last_blend_mode(), Some(BlendMode::Premultiplied));

        renderer.set_extra_state_reset(true);
        renderer.begin_rendering(frame());
        assert_eq!(device.last_blend_mode(), Some(BlendMode::Normal));
        renderer.do_render();
        renderer.end_rendering();

        // End restores the pre-frame mode, on the device too.
        assert_eq!(renderer.render_state().blend, BlendMode::Premultiplied);
        assert_eq!(device.last_blend_mode(), Some(BlendMode::Premultiplied));
    }

    #[test]
    fn scissor_override_clips_the_frame_pass() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);

        renderer.begin_rendering(frame());
        renderer.set_scissor(Some(Rect::new(5.0, 5.0, 50.0, 40.0)));
        renderer.do_render();
        renderer.end_rendering();

        assert_eq!(device.last_scissor(), Some((5, 5, 50, 40)));
        // The override does not survive past the frame.
        assert_eq!(renderer.render_state().scissor, None);
    }

    #[test]
    fn destroyed_handles_go_stale() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);

        let id = renderer.create_texture("temp");
        renderer.destroy_texture(id).unwrap();
        assert!(matches!(renderer.texture(id), Err(RenderError::StaleHandle)));

        // A new texture reusing the slot is not reachable via the old id.
        let fresh = renderer.create_texture("fresh");
        assert!(renderer.texture(id).is_err());
        assert_eq!(renderer.texture(fresh).unwrap().name(), "fresh");
    }

    #[test]
    fn unknown_codec_is_reported() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);
        let err = renderer
            .create_texture_from_memory("img", &[0; 16], "tga")
            .unwrap_err();
        assert!(matches!(err, RenderError::CodecUnavailable(_)));
        assert_eq!(renderer.texture_count(), 0);
    }

    #[test]
    fn raw_codec_texture_creation_works_end_to_end() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);

        let mut encoded = Vec::new();
        encoded.extend_from_slice(&4u32.to_le_bytes());
        encoded.extend_from_slice(&2u32.to_le_bytes());
        encoded.extend(std::iter::repeat_n(0x7Fu8, 4 * 2 * 4));

        let id = renderer
            .create_texture_from_memory("img", &encoded, crate::codec::RAW_RGBA_CODEC_NAME)
            .unwrap();
        assert_eq!(renderer.texture(id).unwrap().size(), Size::new(4, 2));
    }

    #[test]
    fn grab_and_restore_cover_targets_too() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);

        let tex = renderer
            .create_texture_with_size("atlas", Size::new(32, 32))
            .unwrap();
        let target = renderer.create_texture_target().unwrap().unwrap();

        renderer.grab_textures().unwrap();
        assert!(renderer.texture(tex).unwrap().is_grabbed());
        assert!(renderer.texture_target(target).unwrap().texture().is_grabbed());

        renderer.restore_textures().unwrap();
        assert!(!renderer.texture(tex).unwrap().is_grabbed());
        assert!(renderer.texture_target(target).unwrap().texture().gpu().is_ok());
    }

    #[test]
    fn display_size_listeners_fire_on_change_only() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = seen.clone();
        renderer.add_display_size_listener(move |size| sink.lock().push(size));

        renderer.set_display_size(Size::new(640, 480)); // unchanged
        renderer.set_display_size(Size::new(800, 600));
        assert_eq!(*seen.lock(), vec![Size::new(800, 600)]);
        assert_eq!(renderer.viewport().base().area().width, 800.0);
    }

    #[test]
    fn disabled_offscreen_yields_no_targets() {
        let device = Arc::new(MockDevice::new());
        let caps = TextureCaps {
            supports_npot: true,
            must_be_square: false,
            max_size: 2048,
        };
        let mut renderer = Renderer::with_device(
            device,
            caps,
            OffscreenSupport::empty(),
            Size::new(320, 240),
        );
        assert_eq!(renderer.offscreen_backend(), OffscreenBackend::Disabled);
        assert!(renderer.create_texture_target().unwrap().is_none());
    }
}
