//! Image codecs and raw-resource loading.
//!
//! Codecs turn encoded bytes into RGBA pixel buffers; the registry looks
//! them up by name so embedders can plug in their own decoders without the
//! renderer knowing any formats beyond its built-in raw one.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use opal_core::geometry::Size;
use tracing::debug;

use crate::error::RenderError;

/// Decoded image data: tightly packed RGBA8 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub size: Size<u32>,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(size: Size<u32>, data: Vec<u8>) -> Result<Self, RenderError> {
        let expected = size.width as usize * size.height as usize * 4;
        if data.len() != expected {
            return Err(RenderError::Decode(format!(
                "pixel buffer of {} bytes does not match {} ({} expected)",
                data.len(),
                size,
                expected
            )));
        }
        Ok(PixelBuffer { size, data })
    }
}

/// A named image decoder.
pub trait ImageCodec: Send + Sync {
    fn name(&self) -> &str;
    fn decode(&self, raw: &[u8]) -> Result<PixelBuffer, RenderError>;
}

/// The built-in codec: a 8-byte little-endian header (width, height)
/// followed by raw RGBA8 rows.
pub struct RawRgbaCodec;

pub const RAW_RGBA_CODEC_NAME: &str = "raw-rgba";

impl ImageCodec for RawRgbaCodec {
    fn name(&self) -> &str {
        RAW_RGBA_CODEC_NAME
    }

    fn decode(&self, raw: &[u8]) -> Result<PixelBuffer, RenderError> {
        if raw.len() < 8 {
            return Err(RenderError::Decode(
                "raw rgba data shorter than its header".into(),
            ));
        }
        let width = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(raw[4..8].try_into().unwrap());
        PixelBuffer::new(Size::new(width, height), raw[8..].to_vec())
    }
}

/// Name-keyed codec registry.
///
/// The built-in raw codec is always present; registering a codec under an
/// existing name replaces it.
pub struct CodecRegistry {
    codecs: AHashMap<String, Box<dyn ImageCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let mut registry = CodecRegistry {
            codecs: AHashMap::new(),
        };
        registry.register(Box::new(RawRgbaCodec));
        registry
    }

    pub fn register(&mut self, codec: Box<dyn ImageCodec>) {
        debug!(name = codec.name(), "registered image codec");
        self.codecs.insert(codec.name().to_owned(), codec);
    }

    /// Look up a codec; unknown names are an error the caller reports,
    /// never a crash.
    pub fn get(&self, name: &str) -> Result<&dyn ImageCodec, RenderError> {
        self.codecs
            .get(name)
            .map(|c| c.as_ref())
            .ok_or_else(|| RenderError::CodecUnavailable(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of raw resource bytes, abstracted so embedders can serve assets
/// from archives or memory instead of the filesystem.
pub trait ResourceProvider: Send + Sync {
    fn load_raw_data(&self, name: &str) -> Result<Vec<u8>, RenderError>;
}

/// Default provider reading files relative to a base directory.
pub struct FileResourceProvider {
    base: PathBuf,
}

impl FileResourceProvider {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileResourceProvider { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ResourceProvider for FileResourceProvider {
    fn load_raw_data(&self, name: &str) -> Result<Vec<u8>, RenderError> {
        let path = self.base.join(name);
        std::fs::read(&path)
            .map_err(|e| RenderError::ResourceLoad(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_image(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend(std::iter::repeat_n(0xABu8, (width * height * 4) as usize));
        data
    }

    #[test]
    fn raw_codec_round_trips_header_and_pixels() {
        let registry = CodecRegistry::new();
        let codec = registry.get(RAW_RGBA_CODEC_NAME).unwrap();
        let decoded = codec.decode(&raw_image(3, 2)).unwrap();
        assert_eq!(decoded.size, Size::new(3, 2));
        assert_eq!(decoded.data.len(), 24);
    }

    #[test]
    fn truncated_raw_data_is_an_error() {
        let codec = RawRgbaCodec;
        assert!(codec.decode(&[1, 2, 3]).is_err());
        // Header claims more pixels than present.
        let mut data = raw_image(4, 4);
        data.truncate(20);
        assert!(codec.decode(&data).is_err());
    }

    #[test]
    fn unknown_codec_is_reported_not_fatal() {
        let registry = CodecRegistry::new();
        let err = registry.get("webp").map(|_| ()).unwrap_err();
        assert!(matches!(err, RenderError::CodecUnavailable(name) if name == "webp"));
    }

    #[test]
    fn file_provider_reads_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("icon.bin"), [1, 2, 3]).unwrap();

        let provider = FileResourceProvider::new(dir.path());
        assert_eq!(provider.load_raw_data("icon.bin").unwrap(), vec![1, 2, 3]);
        assert!(provider.load_raw_data("missing.bin").is_err());
    }
}
