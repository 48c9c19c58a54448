//! SPIR-V loading.
//!
//! Bytecode is read from disk, its header checked, and the words handed to
//! the driver. Compilation from GLSL happens outside this crate.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use vkloop_rhi::device::Device;
//! use vkloop_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkloop_rhi::RhiError> {
//! let vertex_shader = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/spirv/triangle.vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?;
//! let _vertex_stage_info = vertex_shader.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Pipeline stage a module is compiled for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        })
    }
}

/// A `VkShaderModule` with the stage and entry point it is used with.
///
/// Only needed until the pipelines using it are built.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Reads and wraps a compiled SPIR-V file.
    ///
    /// # Errors
    ///
    /// `ShaderError` naming `path` if it is unreadable or not SPIR-V,
    /// `VulkanError` if the driver rejects the module.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader {}", stage, path.display());

        let with_path = |msg: String| RhiError::ShaderError(format!("{}: {}", path.display(), msg));

        let bytes = std::fs::read(path).map_err(|e| with_path(e.to_string()))?;

        Self::from_spirv_bytes(device, &bytes, stage, entry_point).map_err(|e| match e {
            RhiError::ShaderError(msg) => with_path(msg),
            other => other,
        })
    }

    /// Wraps SPIR-V already in memory.
    ///
    /// # Errors
    ///
    /// `ShaderError` for malformed code or an entry point containing a nul
    /// byte, `VulkanError` if the driver rejects the module.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let words = parse_spirv(bytes)?;
        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        let module = unsafe {
            device
                .handle()
                .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(&words), None)?
        };

        info!(
            "{} shader module created ({} words, entry '{}')",
            stage,
            words.len(),
            entry_point.to_string_lossy()
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage description for pipeline creation. Borrows the entry point name.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_shader_module(self.module, None) };
        debug!("{} shader module destroyed", self.stage);
    }
}

/// Converts raw bytes to SPIR-V words.
///
/// The length must be a nonzero multiple of 4 and the first word must be the
/// SPIR-V magic number. Byte-swapped modules are converted to host order.
pub fn parse_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RhiError::ShaderError("SPIR-V code is empty".to_string()));
    }
    if bytes.len() % 4 != 0 {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be 4-byte aligned, got {} bytes",
            bytes.len()
        )));
    }

    let mut code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match code[0] {
        SPIRV_MAGIC => {}
        word if word == SPIRV_MAGIC.swap_bytes() => {
            for word in &mut code {
                *word = word.swap_bytes();
            }
        }
        word => {
            return Err(RhiError::ShaderError(format!(
                "Bad SPIR-V magic number {:#010x}",
                word
            )));
        }
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }

    #[test]
    fn test_parse_spirv_accepts_valid_header() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 8, 0]);
        let code = parse_spirv(&bytes).expect("valid module");
        assert_eq!(code.len(), 5);
        assert_eq!(code[0], SPIRV_MAGIC);
        assert_eq!(code[3], 8);
    }

    #[test]
    fn test_parse_spirv_swaps_big_endian_module() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 42];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let code = parse_spirv(&bytes).expect("byte-swapped module");
        assert_eq!(code, words.to_vec());
    }

    #[test]
    fn test_parse_spirv_rejects_misaligned() {
        let mut bytes = module_bytes(&[SPIRV_MAGIC, 0]);
        bytes.push(0);
        assert!(matches!(parse_spirv(&bytes), Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_parse_spirv_rejects_empty_and_bad_magic() {
        assert!(matches!(parse_spirv(&[]), Err(RhiError::ShaderError(_))));

        let bytes = module_bytes(&[0xDEAD_BEEF, 0]);
        match parse_spirv(&bytes) {
            Err(RhiError::ShaderError(msg)) => assert!(msg.contains("0xdeadbeef")),
            other => panic!("expected ShaderError, got {other:?}"),
        }
    }
}
