//! Quad geometry: colors, vertices and the buffers widgets record into.

use bytemuck::{Pod, Zeroable};
use opal_core::geometry::{Pos, Rect};
use opal_test_utils::GpuTexture;
use static_assertions::const_assert_eq;

/// Straight-alpha RGBA color with float channels in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color { r, g, b, a }
    }

    /// Pack into `0xAABBGGRR`, the byte order `unpack4x8unorm` expects on
    /// little-endian vertex data.
    pub fn packed(&self) -> u32 {
        let to_byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        to_byte(self.r) | (to_byte(self.g) << 8) | (to_byte(self.b) << 16) | (to_byte(self.a) << 24)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Per-corner colors of a quad, interpolated across its surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRect {
    pub top_left: Color,
    pub top_right: Color,
    pub bottom_left: Color,
    pub bottom_right: Color,
}

impl ColorRect {
    pub const fn solid(color: Color) -> Self {
        ColorRect {
            top_left: color,
            top_right: color,
            bottom_left: color,
            bottom_right: color,
        }
    }
}

impl Default for ColorRect {
    fn default() -> Self {
        ColorRect::solid(Color::WHITE)
    }
}

/// Which diagonal splits a quad into its two triangles.
///
/// The choice matters when corner colors differ: interpolation runs along
/// the split, so gradients render differently per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    #[default]
    TopLeftToBottomRight,
    BottomLeftToTopRight,
}

/// One vertex as uploaded to the GPU: position, packed color, uv.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    /// `0xAABBGGRR` packed color, unpacked in the vertex shader.
    pub color: u32,
    pub tex: [f32; 2],
}

const_assert_eq!(std::mem::size_of::<Vertex>(), 24);

pub const VERTICES_PER_QUAD: usize = 6;

/// One textured, depth-sorted rectangle.
///
/// The texture reference is an owned clone of the shared wrapper, so a
/// queued quad keeps its texture alive until the queue is executed or
/// cleared.
#[derive(Debug, Clone)]
pub struct Quad {
    pub texture: GpuTexture,
    /// Destination rectangle in target pixel coordinates.
    pub dest: Rect<f32>,
    /// Depth used for back-to-front ordering; larger is further back.
    pub z: f32,
    /// Source rectangle in normalized texture coordinates.
    pub tex_rect: Rect<f32>,
    pub colors: ColorRect,
    pub split: SplitMode,
}

impl Quad {
    /// Expand into six vertices (two triangles), translated by `offset`.
    pub fn vertices(&self, offset: Pos<f32>) -> [Vertex; VERTICES_PER_QUAD] {
        let d = self.dest.offset(offset.x, offset.y);
        let uv = &self.tex_rect;

        let tl = Vertex {
            position: [d.x, d.y, self.z],
            color: self.colors.top_left.packed(),
            tex: [uv.x, uv.y],
        };
        let tr = Vertex {
            position: [d.right(), d.y, self.z],
            color: self.colors.top_right.packed(),
            tex: [uv.right(), uv.y],
        };
        let bl = Vertex {
            position: [d.x, d.bottom(), self.z],
            color: self.colors.bottom_left.packed(),
            tex: [uv.x, uv.bottom()],
        };
        let br = Vertex {
            position: [d.right(), d.bottom(), self.z],
            color: self.colors.bottom_right.packed(),
            tex: [uv.right(), uv.bottom()],
        };

        match self.split {
            SplitMode::TopLeftToBottomRight => [tl, bl, br, tl, br, tr],
            SplitMode::BottomLeftToTopRight => [tl, bl, tr, tr, bl, br],
        }
    }
}

/// A recorded list of quads owned by one widget.
///
/// Widgets append quads once and replay them into a render target every
/// frame; the translation lets a parent reposition the whole buffer without
/// re-recording.
pub struct GeometryBuffer {
    quads: Vec<Quad>,
    translation: Pos<f32>,
}

impl GeometryBuffer {
    pub fn new() -> Self {
        GeometryBuffer {
            quads: Vec::new(),
            translation: Pos::new(0.0, 0.0),
        }
    }

    pub fn append_quad(&mut self, quad: Quad) {
        self.quads.push(quad);
    }

    pub fn reset(&mut self) {
        self.quads.clear();
    }

    pub fn set_translation(&mut self, translation: Pos<f32>) {
        self.translation = translation;
    }

    pub fn translation(&self) -> Pos<f32> {
        self.translation
    }

    pub fn quad_count(&self) -> usize {
        self.quads.len()
    }

    /// Iterate the recorded quads with the buffer translation applied to
    /// their destination rectangles.
    pub fn translated_quads(&self) -> impl Iterator<Item = Quad> + '_ {
        self.quads.iter().map(|q| {
            let mut quad = q.clone();
            quad.dest = quad.dest.offset(self.translation.x, self.translation.y);
            quad
        })
    }
}

impl Default for GeometryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tex() -> GpuTexture {
        GpuTexture::mock(8, 8, wgpu::TextureFormat::Rgba8Unorm)
    }

    fn quad(dest: Rect<f32>, z: f32) -> Quad {
        Quad {
            texture: tex(),
            dest,
            z,
            tex_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            colors: ColorRect::default(),
            split: SplitMode::TopLeftToBottomRight,
        }
    }

    #[test]
    fn color_packing_is_abgr() {
        let c = Color::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(c.packed(), 0xFF0000FF);
        let c = Color::new(0.0, 1.0, 0.0, 0.5);
        assert_eq!(c.packed(), 0x8000FF00);
    }

    #[test]
    fn quad_expands_to_six_vertices() {
        let q = quad(Rect::new(10.0, 20.0, 30.0, 40.0), 1.5);
        let verts = q.vertices(Pos::new(0.0, 0.0));
        assert_eq!(verts.len(), 6);
        // Corners of the destination rect appear among the vertices.
        assert_eq!(verts[0].position, [10.0, 20.0, 1.5]);
        assert_eq!(verts[2].position, [40.0, 60.0, 1.5]);
    }

    #[test]
    fn split_mode_changes_triangulation() {
        let mut q = quad(Rect::new(0.0, 0.0, 1.0, 1.0), 0.0);
        let a = q.vertices(Pos::new(0.0, 0.0));
        q.split = SplitMode::BottomLeftToTopRight;
        let b = q.vertices(Pos::new(0.0, 0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn buffer_translation_offsets_destinations() {
        let mut buffer = GeometryBuffer::new();
        buffer.append_quad(quad(Rect::new(5.0, 5.0, 10.0, 10.0), 0.0));
        buffer.set_translation(Pos::new(100.0, 200.0));

        let translated: Vec<Quad> = buffer.translated_quads().collect();
        assert_eq!(translated[0].dest.x, 105.0);
        assert_eq!(translated[0].dest.y, 205.0);
        // The recorded quad itself is untouched.
        assert_eq!(buffer.quad_count(), 1);
    }
}
