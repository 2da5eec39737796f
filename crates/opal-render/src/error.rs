use opal_core::geometry::Size;
use opal_test_utils::DeviceError;

/// Errors produced by the rendering backend.
///
/// Only `Initialization` is fatal to the caller; everything else is
/// recoverable and reported so the widget layer can degrade (skip a
/// texture, fall back to unbatched drawing, and so on).
#[derive(Debug)]
pub enum RenderError {
    /// The GPU context or a required pipeline could not be created.
    Initialization(String),
    /// A requested texture allocation exceeds the device limit even
    /// after capability-aware adjustment.
    TextureSizeExceeded { requested: Size<u32>, max: u32 },
    /// No codec registered under the requested name.
    CodecUnavailable(String),
    /// A resource was used in a state that forbids the operation,
    /// e.g. sampling a texture whose contents are grabbed to CPU.
    ResourceState(String),
    /// A handle referred to a slot that was destroyed or reused.
    StaleHandle,
    /// A resource file could not be loaded.
    ResourceLoad(String),
    /// Image data could not be decoded.
    Decode(String),
    /// Error surfaced by the GPU device abstraction.
    Device(DeviceError),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Initialization(msg) => {
                write!(f, "renderer initialization failed: {}", msg)
            }
            RenderError::TextureSizeExceeded { requested, max } => {
                write!(
                    f,
                    "requested texture size {} exceeds device maximum {}x{}",
                    requested, max, max
                )
            }
            RenderError::CodecUnavailable(name) => {
                write!(f, "no image codec registered under name '{}'", name)
            }
            RenderError::ResourceState(msg) => {
                write!(f, "resource state violation: {}", msg)
            }
            RenderError::StaleHandle => write!(f, "stale resource handle"),
            RenderError::ResourceLoad(msg) => write!(f, "resource load failed: {}", msg),
            RenderError::Decode(msg) => write!(f, "image decode failed: {}", msg),
            RenderError::Device(err) => write!(f, "device error: {}", err),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DeviceError> for RenderError {
    fn from(err: DeviceError) -> Self {
        RenderError::Device(err)
    }
}
