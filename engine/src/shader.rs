use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use vulkanalia::bytecode::Bytecode;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::Device;

/// Pipeline stage a shader belongs to, inferred from its source extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    RayGeneration,
    Miss,
    ClosestHit,
    AnyHit,
}

impl ShaderStage {
    pub fn from_path(path: &str) -> Result<Self, ShaderError> {
        if path.ends_with("vert") {
            Ok(Self::Vertex)
        } else if path.ends_with("frag") {
            Ok(Self::Fragment)
        } else if path.ends_with("comp") {
            Ok(Self::Compute)
        } else if path.ends_with("rgen") {
            Ok(Self::RayGeneration)
        } else if path.ends_with("rmiss") {
            Ok(Self::Miss)
        } else if path.ends_with("rchit") {
            Ok(Self::ClosestHit)
        } else if path.ends_with("rahit") {
            Ok(Self::AnyHit)
        } else {
            Err(ShaderError::UnknownStage(path.to_string()))
        }
    }
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("unknown shader stage for `{0}`")]
    UnknownStage(String),
    #[error("shader not found: {stage:?}/`{key}`")]
    NotFound { stage: ShaderStage, key: String },
}

/// Shader modules compiled ahead of time (build.rs runs `glslc`), loaded from
/// disk on demand and keyed by (stage, name).
///
/// Owned by the engine and reset at scene transitions so no module outlives
/// the scene that loaded it.
#[derive(Debug, Default)]
pub struct ShaderCache {
    root: PathBuf,
    modules: HashMap<(ShaderStage, String), vk::ShaderModule>,
}

impl ShaderCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            modules: HashMap::new(),
        }
    }

    /// Loads the compiled SPIR-V for `source` (e.g. `sample_3d.vert`) under
    /// `key`. Loading the same (stage, key) twice is a no-op.
    pub unsafe fn load(&mut self, device: &Device, source: &str, key: &str) -> Result<()> {
        let stage = ShaderStage::from_path(source)?;
        if self.modules.contains_key(&(stage, key.to_string())) {
            return Ok(());
        }

        let path = self.root.join(format!("{source}.spv"));
        let bytes = std::fs::read(&path)
            .map_err(|e| anyhow!("failed to read shader `{}`: {}", path.display(), e))?;
        let bytecode = Bytecode::new(&bytes).map_err(|e| anyhow!("invalid SPIR-V: {}", e))?;

        let info = vk::ShaderModuleCreateInfo::builder()
            .code_size(bytecode.code_size())
            .code(bytecode.code());
        let module = device.create_shader_module(&info, None)?;

        debug!("Loaded shader {:?}/`{}` from `{}`.", stage, key, path.display());
        self.modules.insert((stage, key.to_string()), module);
        Ok(())
    }

    pub fn get(&self, stage: ShaderStage, key: &str) -> Result<vk::ShaderModule, ShaderError> {
        self.modules
            .get(&(stage, key.to_string()))
            .copied()
            .ok_or_else(|| ShaderError::NotFound {
                stage,
                key: key.to_string(),
            })
    }

    /// Destroys every cached module. Called at scene boundaries after the
    /// device has gone idle.
    pub unsafe fn reset(&mut self, device: &Device) {
        for module in self.modules.values() {
            device.destroy_shader_module(*module, None);
        }
        self.modules.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_inference_by_extension() {
        assert_eq!(
            ShaderStage::from_path("sample_3d.vert").unwrap(),
            ShaderStage::Vertex
        );
        assert_eq!(
            ShaderStage::from_path("sample_3d.frag").unwrap(),
            ShaderStage::Fragment
        );
        assert_eq!(
            ShaderStage::from_path("particle.comp").unwrap(),
            ShaderStage::Compute
        );
        assert_eq!(
            ShaderStage::from_path("shadow.rgen").unwrap(),
            ShaderStage::RayGeneration
        );
        assert_eq!(
            ShaderStage::from_path("shadow.rchit").unwrap(),
            ShaderStage::ClosestHit
        );
    }

    #[test]
    fn unknown_extension_is_an_error() {
        assert!(matches!(
            ShaderStage::from_path("shader.glsl"),
            Err(ShaderError::UnknownStage(_))
        ));
    }

    #[test]
    fn missing_module_reports_not_found() {
        let cache = ShaderCache::new("shaders");
        assert!(matches!(
            cache.get(ShaderStage::Vertex, "nope"),
            Err(ShaderError::NotFound { .. })
        ));
    }
}
