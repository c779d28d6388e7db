//! 图形驱动抽象层
//!
//! 显示设备与解码设备是两个互相独立的设备，只通过 [`SharedHandle`] 共享显存。
//! 核心逻辑只依赖这里的 trait，Direct3D 11 实现位于 `platform::win`，
//! 测试使用 `platform::mock`。

use crate::common::{
    ClearColor, ContextHandle, DeviceOptions, SharedHandle, SurfaceHandle, SurfaceSize,
    TextureDesc, Vertex, Viewport,
};
use crate::error::{PresentError, Result};
use crate::shader::ShaderSource;
use log::error;

/// 引用计数的 GPU 对象
pub trait GpuResource: Send {
    /// 释放本对象持有的引用，返回剩余引用计数
    fn release(self) -> u32;
}

/// 能报告自身描述的纹理
pub trait TextureResource {
    fn desc(&self) -> TextureDesc;
}

/// 释放资源并要求引用计数归零
pub fn release_checked<R: GpuResource>(resource: R, name: &'static str) -> Result<()> {
    let remaining = resource.release();
    if remaining != 0 {
        error!("{} leaked: {} references outstanding after release", name, remaining);
        return Err(PresentError::ResourceLeak {
            resource: name,
            remaining,
        });
    }
    Ok(())
}

/// 绑定到呈现表面的显示设备及其立即上下文
pub trait DisplayDevice: Send + Sized + 'static {
    type Swapchain: GpuResource;
    type Texture: GpuResource + TextureResource;
    type ShaderView: GpuResource;
    type TargetView: GpuResource;
    type Program: GpuResource;
    type Buffer: GpuResource;
    type Sampler: GpuResource;

    /// 打开多线程保护，必须先于其他任何设备/上下文调用
    fn enable_multithread_protection(&self) -> Result<()>;

    fn create_swapchain(&self, surface: SurfaceHandle, size: SurfaceSize) -> Result<Self::Swapchain>;
    fn resize_swapchain(&self, swapchain: &mut Self::Swapchain, size: SurfaceSize) -> Result<()>;
    fn back_buffer_view(&self, swapchain: &Self::Swapchain) -> Result<Self::TargetView>;
    fn present(&self, swapchain: &Self::Swapchain, sync_interval: u32) -> Result<()>;

    fn compile_program(&self, source: &ShaderSource) -> Result<Self::Program>;
    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> Result<Self::Buffer>;
    fn create_index_buffer(&self, indices: &[u16]) -> Result<Self::Buffer>;
    fn create_sampler(&self) -> Result<Self::Sampler>;
    fn bind_pipeline(
        &self,
        program: &Self::Program,
        vertices: &Self::Buffer,
        indices: &Self::Buffer,
        sampler: &Self::Sampler,
    );

    /// 创建可跨设备共享的纹理（RT | SRV，SHARED + NT handle）
    fn create_shared_texture(&self, desc: &TextureDesc) -> Result<Self::Texture>;
    fn export_shared_handle(&self, texture: &Self::Texture) -> Result<SharedHandle>;
    fn close_shared_handle(&self, handle: SharedHandle) -> Result<()>;
    fn create_shader_view(&self, texture: &Self::Texture) -> Result<Self::ShaderView>;

    fn bind_shader_view(&self, view: Option<&Self::ShaderView>);
    fn bind_target(&self, view: Option<&Self::TargetView>);
    fn set_viewport(&self, viewport: Viewport);
    fn clear_target(&self, view: &Self::TargetView, color: ClearColor);
    fn draw_indexed(&self, index_count: u32);
    /// 解除上下文上的所有绑定
    fn clear_state(&self);
    fn trim(&self) -> Result<()>;

    /// 先释放上下文，再释放设备
    fn shutdown(self);
}

/// 播放引擎用于解码和绘制的设备
pub trait DecodeDevice: Send + Sized + 'static {
    type Texture: GpuResource + TextureResource;
    type TargetView: GpuResource;

    fn open_shared_handle(&self, handle: SharedHandle) -> Result<Self::Texture>;
    fn create_target_view(&self, texture: &Self::Texture) -> Result<Self::TargetView>;
    fn bind_target(&self, view: Option<&Self::TargetView>);
    fn clear_target(&self, view: &Self::TargetView, color: ClearColor);
    fn flush(&self);

    fn context_handle(&self) -> ContextHandle;
    /// 增加上下文引用，返回新的引用计数
    fn retain_context(&self) -> u32;
    /// 减少上下文引用，返回剩余引用计数
    fn release_context(&self) -> u32;

    /// 先释放上下文，再释放设备
    fn shutdown(self);
}

/// 设备工厂
pub trait GpuBackend: Send + Sync + 'static {
    type Display: DisplayDevice;
    type Decode: DecodeDevice;

    /// 创建显示设备、立即上下文以及绑定到 `surface` 的交换链
    fn create_display_device(
        &self,
        surface: SurfaceHandle,
        size: SurfaceSize,
        options: &DeviceOptions,
    ) -> Result<(Self::Display, <Self::Display as DisplayDevice>::Swapchain)>;

    /// 创建带视频解码能力的解码设备
    fn create_decode_device(&self, options: &DeviceOptions) -> Result<Self::Decode>;
}

pub type DisplayOf<B> = <B as GpuBackend>::Display;
pub type DecodeOf<B> = <B as GpuBackend>::Decode;
pub type SwapchainOf<B> = <<B as GpuBackend>::Display as DisplayDevice>::Swapchain;
