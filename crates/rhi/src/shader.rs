//! Shader bytecode and the loader that supplies it.
//!
//! Pipelines are built from [`ShaderBytecode`] produced by a
//! [`ShaderLoader`], given a source path, an entry point and a target
//! profile such as `vs_5_0`, `ps_5_0` or `cs_5_0`. The production loader,
//! [`SpirvDirectory`], reads SPIR-V compiled ahead of time with `glslc`:
//! the source `volume.comp` resolves to `<dir>/volume.comp.spv`.
//!
//! A shader that cannot be loaded aborts initialization; there is no fallback.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};

/// Magic number at the start of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Environment variable naming the compiled shader directory.
pub const SHADER_DIR_ENV: &str = lockstep_core::SHADER_DIR_ENV;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Pixel (fragment) shader stage - processes each fragment
    Fragment,
    /// Compute shader stage - general-purpose GPU computation
    Compute,
}

impl ShaderStage {
    /// Stage named by a target profile (`vs_*`, `ps_*`, `cs_*`).
    pub fn from_profile(profile: &str) -> RhiResult<Self> {
        let family = profile.split('_').next().unwrap_or_default();
        match family {
            "vs" => Ok(ShaderStage::Vertex),
            "ps" => Ok(ShaderStage::Fragment),
            "cs" => Ok(ShaderStage::Compute),
            _ => Err(RhiError::ShaderError(format!(
                "Unsupported shader profile '{profile}'"
            ))),
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compiled shader code for one stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderBytecode {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub code: Vec<u32>,
}

impl ShaderBytecode {
    /// Wrap SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte length is not a multiple of 4 or the
    /// module does not start with the SPIR-V magic number.
    pub fn from_spirv_bytes(bytes: &[u8], stage: ShaderStage, entry_point: &str) -> RhiResult<Self> {
        // Validate SPIR-V alignment
        if !bytes.len().is_multiple_of(4) {
            return Err(RhiError::ShaderError(format!(
                "SPIR-V code must be 4-byte aligned, got {} bytes",
                bytes.len()
            )));
        }

        // Convert bytes to u32 code words
        let code: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(RhiError::ShaderError(
                "SPIR-V module is missing its magic number".to_string(),
            ));
        }

        Ok(Self {
            stage,
            entry_point: entry_point.to_string(),
            code,
        })
    }
}

/// The shader compiler collaborator.
pub trait ShaderLoader: Send {
    /// Produce bytecode for `entry_point` in `source`, compiled for `profile`.
    fn compile(&self, source: &Path, entry_point: &str, profile: &str) -> RhiResult<ShaderBytecode>;
}

/// Loads SPIR-V compiled ahead of time from a directory.
#[derive(Clone, Debug)]
pub struct SpirvDirectory {
    root: PathBuf,
}

impl SpirvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Find the compiled shader directory.
    ///
    /// Checks, in order: `override_dir`, `shaders/spirv` beside the
    /// executable, then the workspace's `shaders/spirv`.
    pub fn locate(override_dir: Option<&Path>) -> RhiResult<Self> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = override_dir {
            candidates.push(dir.to_path_buf());
        }
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            candidates.push(dir.join("shaders").join("spirv"));
        }
        candidates.push(
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("../../shaders/spirv"),
        );

        for candidate in &candidates {
            if candidate.is_dir() {
                info!("Loading shaders from {:?}", candidate);
                return Ok(Self::new(candidate.clone()));
            }
        }

        Err(RhiError::ShaderError(format!(
            "No compiled shader directory found (tried {:?}); set {}",
            candidates, SHADER_DIR_ENV
        )))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the compiled module for a source file.
    pub fn resolve(&self, source: &Path) -> RhiResult<PathBuf> {
        let file_name = source.file_name().ok_or_else(|| {
            RhiError::ShaderError(format!("Shader source {:?} has no file name", source))
        })?;
        let mut compiled = file_name.to_os_string();
        compiled.push(".spv");
        Ok(self.root.join(compiled))
    }
}

impl ShaderLoader for SpirvDirectory {
    fn compile(&self, source: &Path, entry_point: &str, profile: &str) -> RhiResult<ShaderBytecode> {
        let stage = ShaderStage::from_profile(profile)?;
        let path = self.resolve(source)?;
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(&path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;

        ShaderBytecode::from_spirv_bytes(&bytes, stage, entry_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_profile_to_stage() {
        assert_eq!(ShaderStage::from_profile("vs_5_0").unwrap(), ShaderStage::Vertex);
        assert_eq!(ShaderStage::from_profile("ps_5_0").unwrap(), ShaderStage::Fragment);
        assert_eq!(ShaderStage::from_profile("cs_5_0").unwrap(), ShaderStage::Compute);
        assert!(ShaderStage::from_profile("gs_5_0").is_err());
        assert!(ShaderStage::from_profile("").is_err());
    }

    #[test]
    fn test_bytecode_requires_alignment() {
        let err = ShaderBytecode::from_spirv_bytes(&[1, 2, 3], ShaderStage::Vertex, "main");
        assert!(matches!(err, Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_bytecode_requires_magic() {
        let bytes = spirv_words(&[0xdead_beef, 0]);
        assert!(ShaderBytecode::from_spirv_bytes(&bytes, ShaderStage::Vertex, "main").is_err());

        let bytes = spirv_words(&[SPIRV_MAGIC, 0x0001_0000]);
        let code = ShaderBytecode::from_spirv_bytes(&bytes, ShaderStage::Compute, "main").unwrap();
        assert_eq!(code.code.len(), 2);
        assert_eq!(code.stage, ShaderStage::Compute);
    }

    #[test]
    fn test_resolve_appends_spv() {
        let dir = SpirvDirectory::new("/tmp/shaders");
        let path = dir.resolve(Path::new("shaders/volume.comp")).unwrap();
        assert_eq!(path, Path::new("/tmp/shaders/volume.comp.spv"));
    }

    #[test]
    fn test_missing_file_is_shader_error() {
        let dir = SpirvDirectory::new("/nonexistent/lockstep");
        let err = dir.compile(Path::new("cube.vert"), "main", "vs_5_0").unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }

    #[test]
    fn test_loads_compiled_module_from_disk() {
        let dir = std::env::temp_dir().join(format!("lockstep-shader-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cube.frag.spv"), spirv_words(&[SPIRV_MAGIC, 7])).unwrap();

        let loader = SpirvDirectory::new(&dir);
        let code = loader.compile(Path::new("cube.frag"), "main", "ps_5_0").unwrap();
        assert_eq!(code.stage, ShaderStage::Fragment);
        assert_eq!(code.code, vec![SPIRV_MAGIC, 7]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
