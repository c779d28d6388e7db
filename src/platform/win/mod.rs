//! Windows 平台 Direct3D 11 实现
//!
//! 显示设备绑定 HWND 或 SwapChainPanel 上的交换链，解码设备通过 NT 共享句柄
//! 打开显示设备上的纹理。

pub mod device;
pub mod error;
pub mod shader;
pub mod texture;

pub use device::{D3D11Backend, D3D11Decode, D3D11Display};
pub use error::WinResultExt;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{ShaderSource, QUAD_HLSL};

    /// 只需要 d3dcompiler，不需要 GPU
    #[test]
    fn test_quad_shader_compiles() {
        let source = ShaderSource::quad();
        assert!(shader::compile(QUAD_HLSL, source.vertex_entry, source.vertex_target).is_ok());
        assert!(shader::compile(QUAD_HLSL, source.pixel_entry, source.pixel_target).is_ok());
    }

    #[test]
    fn test_missing_entry_point_reports_diagnostics() {
        match shader::compile(QUAD_HLSL, "Missing", "vs_4_0") {
            Err(crate::error::PresentError::ShaderCompile {
                entry_point,
                diagnostics,
            }) => {
                assert_eq!(entry_point, "Missing");
                assert!(!diagnostics.is_empty());
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
