//! COM 对象包装
//!
//! windows crate 的接口在 Drop 时自动 Release，但拿不到剩余引用计数。
//! 这里的包装在 `release` 中手动调用 Release 并返回计数，供泄漏检查使用。

use crate::common::{PixelFormat, TextureDesc};
use crate::gpu::{GpuResource, TextureResource};
use windows::core::{IUnknown_Vtbl, Interface};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;

/// 释放一个接口引用，返回剩余引用计数
pub fn release_com<T: Interface>(object: T) -> u32 {
    let raw = object.into_raw();
    unsafe {
        let vtable = *(raw as *const *const IUnknown_Vtbl);
        ((*vtable).Release)(raw)
    }
}

/// 单个 COM 接口的所有权包装
pub struct Com<T: Interface>(pub(crate) T);

impl<T: Interface> Com<T> {
    pub fn new(object: T) -> Self {
        Self(object)
    }

    pub fn get(&self) -> &T {
        &self.0
    }
}

// D3D11 设备对象是自由线程的，上下文在多线程保护下访问
unsafe impl<T: Interface> Send for Com<T> {}

impl<T: Interface> GpuResource for Com<T> {
    fn release(self) -> u32 {
        release_com(self.0)
    }
}

pub type Texture = Com<ID3D11Texture2D>;
pub type ShaderView = Com<ID3D11ShaderResourceView>;
pub type TargetView = Com<ID3D11RenderTargetView>;
pub type Buffer = Com<ID3D11Buffer>;
pub type Sampler = Com<ID3D11SamplerState>;

pub fn pixel_format_of(format: DXGI_FORMAT) -> Option<PixelFormat> {
    match format {
        DXGI_FORMAT_R8G8B8A8_UNORM => Some(PixelFormat::Rgba8Unorm),
        DXGI_FORMAT_B8G8R8A8_UNORM => Some(PixelFormat::Bgra8Unorm),
        _ => None,
    }
}

pub fn dxgi_format_of(format: PixelFormat) -> DXGI_FORMAT {
    DXGI_FORMAT(format.dxgi_format() as i32)
}

/// 获取 D3D11 纹理的宽高与格式
pub fn texture_desc(texture: &ID3D11Texture2D) -> D3D11_TEXTURE2D_DESC {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    desc
}

impl TextureResource for Texture {
    fn desc(&self) -> TextureDesc {
        let desc = texture_desc(&self.0);
        // 未知格式按默认格式报告，调用方比较描述时会发现不一致
        let format = pixel_format_of(desc.Format).unwrap_or_default();
        TextureDesc::new(desc.Width, desc.Height, format)
    }
}

/// 着色器程序：顶点着色器、像素着色器及其输入布局
pub struct Program {
    pub(crate) vertex: ID3D11VertexShader,
    pub(crate) pixel: ID3D11PixelShader,
    pub(crate) layout: ID3D11InputLayout,
}

unsafe impl Send for Program {}

impl GpuResource for Program {
    /// 返回三个对象中最大的剩余引用计数
    fn release(self) -> u32 {
        let Program {
            vertex,
            pixel,
            layout,
        } = self;
        release_com(vertex)
            .max(release_com(pixel))
            .max(release_com(layout))
    }
}

/// 给接口增加一个引用，返回新的引用计数
pub fn add_ref<T: Interface>(object: &T) -> u32 {
    let raw = object.as_raw();
    unsafe {
        let vtable = *(raw as *const *const IUnknown_Vtbl);
        ((*vtable).AddRef)(raw)
    }
}

/// 释放一个由 [`add_ref`] 增加的引用，返回剩余引用计数
///
/// # Safety
/// 调用方必须此前通过 [`add_ref`] 为 `object` 增加过一个尚未归还的引用。
pub unsafe fn release_ref<T: Interface>(object: &T) -> u32 {
    let raw = object.as_raw();
    let vtable = *(raw as *const *const IUnknown_Vtbl);
    ((*vtable).Release)(raw)
}
