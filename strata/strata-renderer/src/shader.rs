use std::path::Path;

use crate::error::{RenderError, Result};

/// Read a SPIR-V module from disk. The module must be a non-empty sequence of 32-bit words.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(RenderError::InvalidShader {
            path: path.to_path_buf(),
            len: bytes.len(),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_word_aligned_modules() {
        let path = std::env::temp_dir().join(format!("strata_shader_ok_{}.spv", std::process::id()));
        std::fs::write(&path, [0x03u8, 0x02, 0x23, 0x07, 0, 0, 0, 0]).unwrap();
        assert_eq!(load_spirv(&path).unwrap().len(), 8);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_truncated_modules() {
        let path = std::env::temp_dir().join(format!("strata_shader_bad_{}.spv", std::process::id()));
        std::fs::write(&path, [0x03u8, 0x02, 0x23]).unwrap();
        assert!(matches!(load_spirv(&path), Err(RenderError::InvalidShader { len: 3, .. })));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            load_spirv("/nonexistent/strata/missing.spv"),
            Err(RenderError::ShaderLoad { .. })
        ));
    }
}
