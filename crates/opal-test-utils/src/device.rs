//! Trait abstracting the GPU operations the renderer needs.

use crate::gpu_types::GpuTexture;

/// Blend behavior for quad drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Straight-alpha blending, the GUI default.
    #[default]
    Normal,
    /// Source colors already multiplied by alpha, used when compositing
    /// pre-rendered surfaces.
    Premultiplied,
}

/// Errors surfaced by device-level plumbing (pass acquisition, readback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// A render pass could not be started on the requested target.
    PassUnavailable(String),
    /// Reading texture contents back to the CPU failed.
    Readback(String),
    /// The texture format has no CPU-addressable layout we support.
    UnsupportedFormat(wgpu::TextureFormat),
    /// Source and destination are not copy-compatible.
    CopyMismatch,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PassUnavailable(msg) => write!(f, "render pass unavailable: {}", msg),
            Self::Readback(msg) => write!(f, "texture readback failed: {}", msg),
            Self::UnsupportedFormat(format) => {
                write!(f, "unsupported texture format for readback: {:?}", format)
            }
            Self::CopyMismatch => write!(f, "textures are not copy-compatible"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Object-safe abstraction over the GPU operations used by the quad engine
/// and the texture targets.
///
/// Methods take `&self` and return owned wrapper types; implementations use
/// interior mutability for per-pass state. This keeps the trait object-safe
/// (`Arc<dyn RenderDevice>`) and lets the mock record calls without a GPU.
///
/// # Pass protocol
///
/// `begin_pass` / `end_pass` bracket one render pass into one target texture.
/// Between them, `bind_texture` selects the sampled texture for subsequent
/// `draw` calls. Calls outside a pass are implementation-defined no-ops; the
/// renderer never issues them.
pub trait RenderDevice: Send + Sync {
    /// Create a texture.
    fn create_texture(&self, desc: &wgpu::TextureDescriptor) -> GpuTexture;

    /// Upload tightly packed pixel data covering the whole texture.
    fn write_texture(&self, texture: &GpuTexture, data: &[u8]);

    /// Upload tightly packed pixel data into a sub-rectangle of the texture.
    ///
    /// Used when the allocation is larger than the image data, e.g. after
    /// power-of-two size adjustment.
    fn write_texture_region(
        &self,
        texture: &GpuTexture,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    );

    /// Read the whole texture back as tightly packed pixel rows.
    fn read_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>, DeviceError>;

    /// GPU-side copy of the full extent of `src` into `dst`.
    ///
    /// Requires identical formats and `dst` at least as large as `src`.
    fn copy_texture(&self, src: &GpuTexture, dst: &GpuTexture) -> Result<(), DeviceError>;

    /// Sampled full-extent blit of `src` into `dst` via a draw.
    ///
    /// Unlike [`copy_texture`](Self::copy_texture) this works across formats
    /// and only needs `src` to be bindable and `dst` to be renderable. It
    /// must not be called while a pass is open.
    fn blit_texture(&self, src: &GpuTexture, dst: &GpuTexture) -> Result<(), DeviceError>;

    /// Fill a texture with a constant color (its own single-clear pass).
    fn clear_texture(&self, texture: &GpuTexture, color: wgpu::Color);

    /// Begin a render pass targeting `target`, optionally clearing it first.
    fn begin_pass(&self, target: &GpuTexture, clear: Option<wgpu::Color>)
    -> Result<(), DeviceError>;

    /// Restrict rendering to the given pixel rectangle of the current target.
    fn set_scissor(&self, x: u32, y: u32, width: u32, height: u32);

    /// Select the blend mode for subsequent draws.
    ///
    /// Takes effect immediately when a pass is open and sticks across
    /// passes until changed again.
    fn set_blend_mode(&self, mode: BlendMode);

    /// Select the sampled texture for subsequent draws in the current pass.
    fn bind_texture(&self, texture: &GpuTexture);

    /// Draw `vertex_count` vertices from tightly packed vertex bytes.
    fn draw(&self, vertex_bytes: &[u8], vertex_count: u32);

    /// Finish the current pass and submit its work.
    fn end_pass(&self);
}
