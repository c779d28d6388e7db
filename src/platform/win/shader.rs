//! 着色器编译
//!
//! 运行时用 D3DCompile 编译内嵌的 HLSL，失败时带回编译器诊断文本。

use crate::common::Vertex;
use crate::error::{PresentError, Result};
use crate::platform::win::error::{required, WinResultExt};
use crate::platform::win::texture::Program;
use crate::shader::ShaderSource;
use log::debug;
use std::ffi::CString;
use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|e| PresentError::InvalidParameter(e.to_string()))
}

/// 编译一个入口点，返回字节码
pub fn compile(source: &str, entry_point: &str, target: &str) -> Result<ID3DBlob> {
    let entry = c_string(entry_point)?;
    let target = c_string(target)?;
    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;

    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            PCSTR::null(),
            None,
            None,
            PCSTR::from_raw(entry.as_ptr() as *const u8),
            PCSTR::from_raw(target.as_ptr() as *const u8),
            0,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Err(e) = result {
        let diagnostics = errors
            .as_ref()
            .map(|blob| String::from_utf8_lossy(blob_bytes(blob)).trim_end_matches('\0').to_string())
            .unwrap_or_else(|| e.to_string());
        return Err(PresentError::ShaderCompile {
            entry_point: entry_point.to_string(),
            diagnostics,
        });
    }
    code.ok_or_else(|| PresentError::ShaderCompile {
        entry_point: entry_point.to_string(),
        diagnostics: "compiler produced no bytecode".to_string(),
    })
}

/// 与 [`Vertex`] 对应的输入布局
fn input_layout_desc() -> [D3D11_INPUT_ELEMENT_DESC; 2] {
    [
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR::from_raw(b"POSITION\0".as_ptr()),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 0,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR::from_raw(b"TEXCOORD\0".as_ptr()),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: std::mem::size_of::<[f32; 3]>() as u32,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
    ]
}

/// 编译顶点/像素着色器并创建输入布局
pub fn create_program(device: &ID3D11Device, source: &ShaderSource) -> Result<Program> {
    let vs_blob = compile(source.source, source.vertex_entry, source.vertex_target)?;
    let ps_blob = compile(source.source, source.pixel_entry, source.pixel_target)?;
    let vs_code = blob_bytes(&vs_blob);
    let ps_code = blob_bytes(&ps_blob);

    unsafe {
        let mut vertex = None;
        device
            .CreateVertexShader(vs_code, None, Some(&mut vertex))
            .gpu("CreateVertexShader")?;
        let mut pixel = None;
        device
            .CreatePixelShader(ps_code, None, Some(&mut pixel))
            .gpu("CreatePixelShader")?;
        let mut layout = None;
        device
            .CreateInputLayout(&input_layout_desc(), vs_code, Some(&mut layout))
            .gpu("CreateInputLayout")?;

        debug!(
            "compiled {}/{} ({} + {} bytes), vertex stride {}",
            source.vertex_entry,
            source.pixel_entry,
            vs_code.len(),
            ps_code.len(),
            std::mem::size_of::<Vertex>()
        );
        Ok(Program {
            vertex: required(vertex, "CreateVertexShader")?,
            pixel: required(pixel, "CreatePixelShader")?,
            layout: required(layout, "CreateInputLayout")?,
        })
    }
}
