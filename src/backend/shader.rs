// Shader module loading
//
// Vulkan consumes SPIR-V words. build.rs compiles the GLSL in shaders/ with
// glslc; the resulting .spv files are read at startup.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Parse SPIR-V bytes into words (fixes endianness, rejects misaligned input)
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V bytecode")
}

/// Read and parse a compiled shader from disk
pub fn load_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?} (was it compiled by glslc?)", path))?;
    parse_spirv(&bytes).with_context(|| format!("Failed to load shader {:?}", path))
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// SPIR-V for the triangle's vertex and fragment stages
pub struct TriangleShaders {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl TriangleShaders {
    pub fn load(shader_dir: &Path) -> Result<Self> {
        Ok(Self {
            vertex: load_spirv(shader_dir.join("triangle.vert.spv"))?,
            fragment: load_spirv(shader_dir.join("triangle.frag.spv"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_parse_minimal_header() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(parse_spirv(&bytes).unwrap(), words);
    }

    #[test]
    fn test_misaligned_bytes_rejected() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn test_missing_shader_file_is_error() {
        let err = load_spirv("no/such/dir/triangle.vert.spv").unwrap_err();
        assert!(format!("{:#}", err).contains("triangle.vert.spv"));
    }
}
