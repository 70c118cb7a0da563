// Static geometry and the sample variants that consume it
//
// Each sample is an explicit `SceneDesc` value handed to the renderer at
// construction time: vertex layout, geometry, shader files and where the
// buffers live.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Interleaved position + color, 20 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self {
            pos: Vec2::new(pos[0], pos[1]),
            color: Vec3::new(color[0], color[1], color[2]),
        }
    }
}

pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new([0.0, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 1.0, 0.0]),
    Vertex::new([-0.5, 0.5], [0.0, 0.0, 1.0]),
];

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [0.0, 0.0, 1.0]),
    Vertex::new([0.5, 0.5], [0.0, 1.0, 0.0]),
    Vertex::new([-0.5, 0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, -0.5], [1.0, 1.0, 1.0]),
];

/// Two clockwise triangles covering the quad
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 1, 0, 3];

/// Which sample program to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Sample {
    /// Triangle generated entirely in the vertex shader
    Triangle,
    /// Window only, no rendering
    Window,
    /// Triangle read from a host-visible vertex buffer
    VertexInput,
    /// Quad drawn through a host-visible index buffer
    Indexed,
    /// Quad uploaded into device-local memory through staging buffers
    Staging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInput {
    /// Geometry comes from `gl_VertexIndex`; no buffers bound
    None,
    /// One binding of interleaved `Vertex` data
    PositionColor,
}

/// Where uploaded buffers end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    HostVisible,
    DeviceLocal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneDesc {
    pub input: VertexInput,
    pub vertices: Vec<Vertex>,
    pub indices: Option<Vec<u16>>,
    /// Vertices drawn when there is no vertex buffer
    pub generated_vertex_count: u32,
    pub vertex_shader: &'static str,
    pub fragment_shader: &'static str,
    pub placement: Placement,
}

impl SceneDesc {
    /// Scene for `sample`, or `None` if the sample does not render
    pub fn for_sample(sample: Sample) -> Option<Self> {
        let quad = |placement| SceneDesc {
            input: VertexInput::PositionColor,
            vertices: QUAD_VERTICES.to_vec(),
            indices: Some(QUAD_INDICES.to_vec()),
            generated_vertex_count: 0,
            vertex_shader: "vertex_input.vert.spv",
            fragment_shader: "color.frag.spv",
            placement,
        };

        match sample {
            Sample::Window => None,
            Sample::Triangle => Some(SceneDesc {
                input: VertexInput::None,
                vertices: Vec::new(),
                indices: None,
                generated_vertex_count: 3,
                vertex_shader: "triangle.vert.spv",
                fragment_shader: "color.frag.spv",
                placement: Placement::HostVisible,
            }),
            Sample::VertexInput => Some(SceneDesc {
                input: VertexInput::PositionColor,
                vertices: TRIANGLE_VERTICES.to_vec(),
                indices: None,
                generated_vertex_count: 0,
                vertex_shader: "vertex_input.vert.spv",
                fragment_shader: "color.frag.spv",
                placement: Placement::HostVisible,
            }),
            Sample::Indexed => Some(quad(Placement::HostVisible)),
            Sample::Staging => Some(quad(Placement::DeviceLocal)),
        }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> Option<&[u8]> {
        self.indices
            .as_deref()
            .map(|indices| bytemuck::cast_slice(indices))
    }

    /// Vertex count for non-indexed draws
    pub fn vertex_count(&self) -> u32 {
        match self.input {
            VertexInput::None => self.generated_vertex_count,
            VertexInput::PositionColor => self.vertices.len() as u32,
        }
    }

    pub fn index_count(&self) -> Option<u32> {
        self.indices.as_ref().map(|indices| indices.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_twenty_bytes_with_color_after_position() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(std::mem::offset_of!(Vertex, pos), 0);
        assert_eq!(std::mem::offset_of!(Vertex, color), 8);
    }

    #[test]
    fn quad_uploads_are_eighty_and_twelve_bytes() {
        let scene = SceneDesc::for_sample(Sample::Indexed).unwrap();
        assert_eq!(scene.vertex_bytes().len(), 4 * 20);
        assert_eq!(scene.index_bytes().unwrap().len(), 6 * 2);
        assert_eq!(scene.index_count(), Some(6));
    }

    #[test]
    fn quad_indices_form_two_triangles_over_all_four_vertices() {
        let triangles: Vec<_> = QUAD_INDICES.chunks(3).collect();
        assert_eq!(triangles, vec![&[0u16, 1, 2][..], &[1u16, 0, 3][..]]);

        let mut used: Vec<_> = QUAD_INDICES.to_vec();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used, vec![0u16, 1, 2, 3]);

        // the shared edge 0-1 is the quad's diagonal
        assert_eq!(QUAD_VERTICES[0].pos, Vec2::new(-0.5, -0.5));
        assert_eq!(QUAD_VERTICES[1].pos, Vec2::new(0.5, 0.5));
    }

    #[test]
    fn window_sample_has_no_scene() {
        assert!(SceneDesc::for_sample(Sample::Window).is_none());
    }

    #[test]
    fn generated_triangle_draws_three_without_buffers() {
        let scene = SceneDesc::for_sample(Sample::Triangle).unwrap();
        assert_eq!(scene.input, VertexInput::None);
        assert!(scene.vertex_bytes().is_empty());
        assert_eq!(scene.vertex_count(), 3);
        assert_eq!(scene.index_count(), None);
    }

    #[test]
    fn staging_differs_from_indexed_only_in_placement() {
        let indexed = SceneDesc::for_sample(Sample::Indexed).unwrap();
        let staged = SceneDesc::for_sample(Sample::Staging).unwrap();
        assert_eq!(staged.placement, Placement::DeviceLocal);
        assert_eq!(
            SceneDesc {
                placement: Placement::HostVisible,
                ..staged
            },
            indexed
        );
    }
}
