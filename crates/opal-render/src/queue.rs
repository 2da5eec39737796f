//! Depth-sorted quad queue and the batching walk that turns it into the
//! minimum number of texture binds and draw calls.

use opal_core::geometry::Pos;
use opal_core::profiling::profile_function;
use opal_test_utils::{GpuTexture, RenderDevice};

use crate::geometry::{Quad, VERTICES_PER_QUAD, Vertex};

/// Vertex capacity of one flush; a full accumulation buffer forces a draw
/// even when the texture does not change.
pub const VERTEX_CAPACITY: usize = 4096;

/// Counters produced by one queue execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteStats {
    pub texture_binds: u32,
    pub draw_calls: u32,
    pub vertices: u32,
}

impl ExecuteStats {
    pub fn accumulate(&mut self, other: ExecuteStats) {
        self.texture_binds += other.texture_binds;
        self.draw_calls += other.draw_calls;
        self.vertices += other.vertices;
    }
}

struct QueuedQuad {
    quad: Quad,
    /// Insertion sequence, the tiebreaker among equal depths.
    seq: u64,
}

/// An ordered multiset of quads awaiting execution.
///
/// Ordering is by *descending* z, so quads with larger depth values draw
/// first. With alpha blending enabled this is the back-to-front order that
/// makes translucency composite correctly. Quads with equal z keep their
/// insertion order, which is what widget code relies on when it layers
/// several quads at one depth.
pub struct QuadQueue {
    quads: Vec<QueuedQuad>,
    next_seq: u64,
}

impl QuadQueue {
    pub fn new() -> Self {
        QuadQueue {
            quads: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, quad: Quad) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.quads.push(QueuedQuad { quad, seq });
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    /// Discard all queued quads without drawing them.
    pub fn clear(&mut self) {
        self.quads.clear();
    }

    /// Draw every queued quad into the currently active pass.
    ///
    /// Quads are sorted back-to-front, then consecutive runs sharing a
    /// texture are accumulated and flushed as single draw calls. The queue
    /// keeps its contents so the same list can be replayed next frame.
    pub fn execute(&mut self, device: &dyn RenderDevice, origin: Pos<f32>) -> ExecuteStats {
        profile_function!();

        self.quads.sort_by(|a, b| {
            b.quad
                .z
                .partial_cmp(&a.quad.z)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });

        let mut stats = ExecuteStats::default();
        let mut vertices: Vec<Vertex> = Vec::with_capacity(VERTEX_CAPACITY);
        let mut bound: Option<u64> = None;

        for queued in &self.quads {
            let texture_id = queued.quad.texture.id();
            if bound != Some(texture_id) {
                flush(device, &mut vertices, &mut stats);
                device.bind_texture(&queued.quad.texture);
                stats.texture_binds += 1;
                bound = Some(texture_id);
            } else if vertices.len() + VERTICES_PER_QUAD > VERTEX_CAPACITY {
                flush(device, &mut vertices, &mut stats);
            }
            vertices.extend_from_slice(&queued.quad.vertices(origin));
        }
        flush(device, &mut vertices, &mut stats);
        stats
    }

    /// Draw a single quad immediately, bypassing the queue and its sort.
    ///
    /// Valid only inside an active pass. The queued quads are untouched.
    pub fn render_immediate(
        device: &dyn RenderDevice,
        quad: &Quad,
        origin: Pos<f32>,
    ) -> ExecuteStats {
        let vertices = quad.vertices(origin);
        device.bind_texture(&quad.texture);
        device.draw(
            bytemuck::cast_slice(&vertices),
            VERTICES_PER_QUAD as u32,
        );
        ExecuteStats {
            texture_binds: 1,
            draw_calls: 1,
            vertices: VERTICES_PER_QUAD as u32,
        }
    }

    /// Textures currently referenced by the queue, for keep-alive checks.
    pub fn textures(&self) -> impl Iterator<Item = &GpuTexture> {
        self.quads.iter().map(|q| &q.quad.texture)
    }
}

impl Default for QuadQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn flush(device: &dyn RenderDevice, vertices: &mut Vec<Vertex>, stats: &mut ExecuteStats) {
    if vertices.is_empty() {
        return;
    }
    let count = vertices.len() as u32;
    device.draw(bytemuck::cast_slice(vertices), count);
    stats.draw_calls += 1;
    stats.vertices += count;
    vertices.clear();
}
