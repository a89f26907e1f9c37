// The hard-coded triangle and its vertex layout

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of};

/// Interleaved position + color, matching shaders/triangle.vert
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // location 0: in_position
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, position) as u32,
            },
            // location 1: in_color
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
        ]
    }
}

/// Clockwise in Vulkan's y-down clip space
pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
    Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 5 * size_of::<f32>());
        assert_eq!(Vertex::binding_description().stride, 20);
    }

    #[test]
    fn test_attribute_offsets() {
        let [position, color] = Vertex::attribute_descriptions();
        assert_eq!(position.offset, 0);
        assert_eq!(color.offset, 8);
        assert_eq!(color.location, 1);
    }

    #[test]
    fn test_triangle_bytes() {
        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE_VERTICES);
        assert_eq!(bytes.len(), 60);

        let first: &[f32] = bytemuck::cast_slice(&bytes[..20]);
        assert_eq!(first, &[0.0, -0.5, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_triangle_winding_is_clockwise_on_screen() {
        // Positive signed area in y-down space means clockwise as seen on screen
        let [a, b, c] = TRIANGLE_VERTICES.map(|v| v.position);
        let area = (b - a).perp_dot(c - a);
        assert!(area > 0.0);
    }
}
