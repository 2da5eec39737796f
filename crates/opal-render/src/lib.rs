//! Opal Render
//!
//! The 2D rendering backend of the opal GUI stack. Widgets record quads
//! into geometry buffers; the renderer depth-sorts them, batches runs that
//! share a texture, and draws them into the host's frame texture or into
//! offscreen texture targets with automatic backend degradation.
//!
//! All GPU work goes through the [`RenderDevice`] trait from
//! `opal-test-utils`, so everything above the device layer is testable
//! against the recording mock without a GPU.

pub mod capability;
pub mod codec;
pub mod context;
pub mod device;
pub mod error;
pub mod geometry;
pub mod handle;
pub mod offscreen;
pub mod queue;
pub mod renderer;
pub mod state;
pub mod target;
pub mod texture;

pub use capability::{TEXTURE_SIZE_PADDING, TextureCaps, next_pot};
pub use codec::{CodecRegistry, FileResourceProvider, ImageCodec, PixelBuffer, ResourceProvider};
pub use context::{GraphicsContext, GraphicsContextDescriptor};
pub use device::WgpuDevice;
pub use error::RenderError;
pub use geometry::{Color, ColorRect, GeometryBuffer, Quad, SplitMode, Vertex};
pub use handle::{Handle, HandleTable};
pub use offscreen::{OffscreenBackend, OffscreenSupport, TextureTargetFactory};
pub use opal_test_utils::{DeviceError, GpuTexture, RenderDevice};
pub use queue::{ExecuteStats, QuadQueue, VERTEX_CAPACITY};
pub use renderer::{FrameStats, GeometryId, Renderer, TargetId, TextureId};
pub use state::{BlendMode, RenderState, SavedState, StateGuard};
pub use target::{RenderTarget, TextureTarget, ViewportTarget};
pub use texture::TextureHandle;
