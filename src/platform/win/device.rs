//! D3D11 设备实现
//!
//! 显示设备持有交换链并负责合成，解码设备带视频解码能力，交给播放引擎使用。

use crate::common::{
    ClearColor, ContextHandle, DeviceOptions, SharedHandle, SurfaceHandle, SurfaceSize,
    TextureDesc, Vertex, Viewport,
};
use crate::error::{PresentError, Result};
use crate::gpu::{DecodeDevice, DisplayDevice, GpuBackend};
use crate::platform::win::error::{check_hresult, required, WinResultExt};
use crate::platform::win::shader;
use crate::platform::win::texture::{
    add_ref, dxgi_format_of, release_ref, Buffer, Com, Program, Sampler, ShaderView, TargetView,
    Texture,
};
use crate::shader::ShaderSource;
use log::{debug, info};
use std::ffi::c_void;
use windows::core::{IUnknown, Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HMODULE, HWND};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D10::ID3D10Multithread;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::WinRT::Xaml::ISwapChainPanelNative;

const SWAPCHAIN_BUFFER_COUNT: u32 = 2;

fn creation_flags(options: &DeviceOptions, extra: D3D11_CREATE_DEVICE_FLAG) -> D3D11_CREATE_DEVICE_FLAG {
    let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT.0 | extra.0;
    if options.debug_layer {
        flags |= D3D11_CREATE_DEVICE_DEBUG.0;
    }
    D3D11_CREATE_DEVICE_FLAG(flags)
}

/// 在默认硬件适配器上创建设备，要求特性级别 11_0
fn create_device(flags: D3D11_CREATE_DEVICE_FLAG) -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let feature_levels = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];
    let mut device = None;
    let mut context = None;
    let mut feature_level = D3D_FEATURE_LEVEL(0);

    unsafe {
        D3D11CreateDevice(
            None::<&IDXGIAdapter>,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            flags,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            Some(&mut feature_level),
            Some(&mut context),
        )
        .device_creation("D3D11CreateDevice")?;
    }

    let device = device.ok_or_else(|| PresentError::DeviceCreation("no device returned".to_string()))?;
    let context =
        context.ok_or_else(|| PresentError::DeviceCreation("no immediate context returned".to_string()))?;
    if feature_level.0 < D3D_FEATURE_LEVEL_11_0.0 {
        return Err(PresentError::DeviceCreation(format!(
            "unsupported feature level {:#x}",
            feature_level.0
        )));
    }
    Ok((device, context))
}

fn viewport_of(viewport: Viewport) -> D3D11_VIEWPORT {
    D3D11_VIEWPORT {
        TopLeftX: viewport.x,
        TopLeftY: viewport.y,
        Width: viewport.width,
        Height: viewport.height,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct D3D11Backend;

impl D3D11Backend {
    pub fn new() -> Self {
        Self
    }
}

impl GpuBackend for D3D11Backend {
    type Display = D3D11Display;
    type Decode = D3D11Decode;

    fn create_display_device(
        &self,
        surface: SurfaceHandle,
        size: SurfaceSize,
        options: &DeviceOptions,
    ) -> Result<(D3D11Display, Com<IDXGISwapChain1>)> {
        let (device, context) = create_device(creation_flags(options, D3D11_CREATE_DEVICE_FLAG(0)))?;
        let factory: IDXGIFactory2 = unsafe {
            let dxgi_device: IDXGIDevice = device.cast().device_creation("QueryInterface(IDXGIDevice)")?;
            let adapter = dxgi_device.GetAdapter().device_creation("GetAdapter")?;
            adapter.GetParent().device_creation("GetParent(IDXGIFactory2)")?
        };
        let display = D3D11Display {
            device,
            context,
            factory,
            format: dxgi_format_of(options.format),
        };
        let swapchain = display.create_swapchain(surface, size)?;
        info!("display device created for {:?}", surface);
        Ok((display, swapchain))
    }

    fn create_decode_device(&self, options: &DeviceOptions) -> Result<D3D11Decode> {
        // 硬件解码需要 VIDEO_SUPPORT
        let (device, context) = create_device(creation_flags(options, D3D11_CREATE_DEVICE_VIDEO_SUPPORT))?;
        let device: ID3D11Device1 = device
            .cast()
            .device_creation("QueryInterface(ID3D11Device1)")?;
        info!("decode device created");
        Ok(D3D11Decode { device, context })
    }
}

pub struct D3D11Display {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    factory: IDXGIFactory2,
    format: DXGI_FORMAT,
}

impl D3D11Display {
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    fn swapchain_desc(&self, size: SurfaceSize, alpha: DXGI_ALPHA_MODE) -> DXGI_SWAP_CHAIN_DESC1 {
        DXGI_SWAP_CHAIN_DESC1 {
            Width: size.width.max(1),
            Height: size.height.max(1),
            Format: self.format,
            Stereo: false.into(),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: SWAPCHAIN_BUFFER_COUNT,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
            AlphaMode: alpha,
            Flags: 0,
        }
    }

    fn create_dynamic_buffer(&self, bytes: &[u8], bind: D3D11_BIND_FLAG) -> Result<Buffer> {
        let desc = D3D11_BUFFER_DESC {
            ByteWidth: bytes.len() as u32,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: bind.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            MiscFlags: Default::default(),
            StructureByteStride: 0,
        };

        unsafe {
            let mut buffer = None;
            self.device
                .CreateBuffer(&desc, None, Some(&mut buffer))
                .gpu("CreateBuffer")?;
            let buffer = required(buffer, "CreateBuffer")?;

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(&buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
                .gpu("Map")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.pData as *mut u8, bytes.len());
            self.context.Unmap(&buffer, 0);
            Ok(Com::new(buffer))
        }
    }
}

// D3D11 设备是自由线程的，立即上下文在多线程保护下使用
unsafe impl Send for D3D11Display {}

impl DisplayDevice for D3D11Display {
    type Swapchain = Com<IDXGISwapChain1>;
    type Texture = Texture;
    type ShaderView = ShaderView;
    type TargetView = TargetView;
    type Program = Program;
    type Buffer = Buffer;
    type Sampler = Sampler;

    fn enable_multithread_protection(&self) -> Result<()> {
        unsafe {
            let multithread: ID3D10Multithread = self
                .context
                .cast()
                .gpu("QueryInterface(ID3D10Multithread)")?;
            let _ = multithread.SetMultithreadProtected(true);
        }
        Ok(())
    }

    fn create_swapchain(&self, surface: SurfaceHandle, size: SurfaceSize) -> Result<Com<IDXGISwapChain1>> {
        let swapchain = unsafe {
            match surface {
                SurfaceHandle::Window(hwnd) => {
                    let desc = self.swapchain_desc(size, DXGI_ALPHA_MODE_UNSPECIFIED);
                    self.factory
                        .CreateSwapChainForHwnd(
                            &self.device,
                            HWND(hwnd as *mut c_void),
                            &desc,
                            None,
                            None::<&IDXGIOutput>,
                        )
                        .device_creation("CreateSwapChainForHwnd")?
                }
                SurfaceHandle::SwapChainPanel(panel) => {
                    let desc = self.swapchain_desc(size, DXGI_ALPHA_MODE_IGNORE);
                    let swapchain = self
                        .factory
                        .CreateSwapChainForComposition(&self.device, &desc, None::<&IDXGIOutput>)
                        .device_creation("CreateSwapChainForComposition")?;
                    let raw = panel as *mut c_void;
                    let unknown = IUnknown::from_raw_borrowed(&raw).ok_or_else(|| {
                        PresentError::InvalidParameter("null swapchain panel".to_string())
                    })?;
                    let native: ISwapChainPanelNative = unknown
                        .cast()
                        .gpu("QueryInterface(ISwapChainPanelNative)")?;
                    let base: IDXGISwapChain = swapchain.cast().gpu("QueryInterface(IDXGISwapChain)")?;
                    native.SetSwapChain(&base).gpu("SetSwapChain")?;
                    swapchain
                }
            }
        };
        debug!("swapchain {}x{} created for {:?}", size.width, size.height, surface);
        Ok(Com::new(swapchain))
    }

    fn resize_swapchain(&self, swapchain: &mut Com<IDXGISwapChain1>, size: SurfaceSize) -> Result<()> {
        unsafe {
            swapchain
                .get()
                .ResizeBuffers(0, size.width, size.height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))
                .gpu("ResizeBuffers")
        }
    }

    fn back_buffer_view(&self, swapchain: &Com<IDXGISwapChain1>) -> Result<TargetView> {
        unsafe {
            let back_buffer: ID3D11Texture2D = swapchain.get().GetBuffer(0).gpu("GetBuffer")?;
            let mut view = None;
            self.device
                .CreateRenderTargetView(&back_buffer, None, Some(&mut view))
                .gpu("CreateRenderTargetView")?;
            Ok(Com::new(required(view, "CreateRenderTargetView")?))
        }
    }

    fn present(&self, swapchain: &Com<IDXGISwapChain1>, sync_interval: u32) -> Result<()> {
        let hr = unsafe { swapchain.get().Present(sync_interval, DXGI_PRESENT(0)) };
        check_hresult(hr, "Present")
    }

    fn compile_program(&self, source: &ShaderSource) -> Result<Program> {
        shader::create_program(&self.device, source)
    }

    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> Result<Buffer> {
        let bytes = unsafe {
            std::slice::from_raw_parts(vertices.as_ptr() as *const u8, std::mem::size_of_val(vertices))
        };
        self.create_dynamic_buffer(bytes, D3D11_BIND_VERTEX_BUFFER)
    }

    fn create_index_buffer(&self, indices: &[u16]) -> Result<Buffer> {
        let bytes = unsafe {
            std::slice::from_raw_parts(indices.as_ptr() as *const u8, std::mem::size_of_val(indices))
        };
        self.create_dynamic_buffer(bytes, D3D11_BIND_INDEX_BUFFER)
    }

    fn create_sampler(&self) -> Result<Sampler> {
        let desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_LINEAR_MIP_POINT,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_ALWAYS,
            BorderColor: [0.0f32; 4],
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };
        unsafe {
            let mut sampler = None;
            self.device
                .CreateSamplerState(&desc, Some(&mut sampler))
                .gpu("CreateSamplerState")?;
            Ok(Com::new(required(sampler, "CreateSamplerState")?))
        }
    }

    fn bind_pipeline(&self, program: &Program, vertices: &Buffer, indices: &Buffer, sampler: &Sampler) {
        let strides = [std::mem::size_of::<Vertex>() as u32];
        let offsets = [0u32];
        let buffers = [Some(vertices.get().clone())];
        unsafe {
            self.context
                .IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            self.context.IASetInputLayout(Some(&program.layout));
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(buffers.as_ptr()),
                Some(strides.as_ptr()),
                Some(offsets.as_ptr()),
            );
            self.context
                .IASetIndexBuffer(Some(indices.get()), DXGI_FORMAT_R16_UINT, 0);
            self.context.VSSetShader(Some(&program.vertex), None);
            self.context.PSSetShader(Some(&program.pixel), None);
            self.context
                .PSSetSamplers(0, Some(&[Some(sampler.get().clone())]));
        }
    }

    fn create_shared_texture(&self, desc: &TextureDesc) -> Result<Texture> {
        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format_of(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            CPUAccessFlags: Default::default(),
            MiscFlags: (D3D11_RESOURCE_MISC_SHARED.0 | D3D11_RESOURCE_MISC_SHARED_NTHANDLE.0) as u32,
        };
        unsafe {
            let mut texture = None;
            self.device
                .CreateTexture2D(&texture_desc, None, Some(&mut texture))
                .gpu("CreateTexture2D")?;
            Ok(Com::new(required(texture, "CreateTexture2D")?))
        }
    }

    fn export_shared_handle(&self, texture: &Texture) -> Result<SharedHandle> {
        unsafe {
            let resource: IDXGIResource1 = texture
                .get()
                .cast()
                .gpu("QueryInterface(IDXGIResource1)")?;
            let handle = resource
                .CreateSharedHandle(
                    None,
                    DXGI_SHARED_RESOURCE_READ | DXGI_SHARED_RESOURCE_WRITE,
                    PCWSTR::null(),
                )
                .gpu("CreateSharedHandle")?;
            Ok(SharedHandle(handle.0 as usize))
        }
    }

    fn close_shared_handle(&self, handle: SharedHandle) -> Result<()> {
        unsafe { CloseHandle(HANDLE(handle.0 as *mut c_void)) }.gpu("CloseHandle")
    }

    fn create_shader_view(&self, texture: &Texture) -> Result<ShaderView> {
        unsafe {
            let mut view = None;
            self.device
                .CreateShaderResourceView(texture.get(), None, Some(&mut view))
                .gpu("CreateShaderResourceView")?;
            Ok(Com::new(required(view, "CreateShaderResourceView")?))
        }
    }

    fn bind_shader_view(&self, view: Option<&ShaderView>) {
        let views = [view.map(|v| v.get().clone())];
        unsafe { self.context.PSSetShaderResources(0, Some(&views)) };
    }

    fn bind_target(&self, view: Option<&TargetView>) {
        unsafe {
            match view {
                Some(view) => self
                    .context
                    .OMSetRenderTargets(Some(&[Some(view.get().clone())]), None),
                None => self.context.OMSetRenderTargets(None, None),
            }
        }
    }

    fn set_viewport(&self, viewport: Viewport) {
        unsafe { self.context.RSSetViewports(Some(&[viewport_of(viewport)])) };
    }

    fn clear_target(&self, view: &TargetView, color: ClearColor) {
        unsafe { self.context.ClearRenderTargetView(view.get(), &color.0) };
    }

    fn draw_indexed(&self, index_count: u32) {
        unsafe { self.context.DrawIndexed(index_count, 0, 0) };
    }

    fn clear_state(&self) {
        unsafe {
            self.context.ClearState();
            self.context.Flush();
        }
    }

    fn trim(&self) -> Result<()> {
        unsafe {
            let dxgi_device: IDXGIDevice3 = self.device.cast().gpu("QueryInterface(IDXGIDevice3)")?;
            dxgi_device.Trim();
        }
        Ok(())
    }

    fn shutdown(self) {
        self.clear_state();
        let D3D11Display {
            device, context, ..
        } = self;
        drop(context);
        drop(device);
        debug!("display device released");
    }
}

pub struct D3D11Decode {
    device: ID3D11Device1,
    context: ID3D11DeviceContext,
}

unsafe impl Send for D3D11Decode {}

impl DecodeDevice for D3D11Decode {
    type Texture = Texture;
    type TargetView = TargetView;

    fn open_shared_handle(&self, handle: SharedHandle) -> Result<Texture> {
        let texture: ID3D11Texture2D = unsafe {
            self.device
                .OpenSharedResource1(HANDLE(handle.0 as *mut c_void))
                .handle_import("OpenSharedResource1")?
        };
        Ok(Com::new(texture))
    }

    fn create_target_view(&self, texture: &Texture) -> Result<TargetView> {
        unsafe {
            let mut view = None;
            self.device
                .CreateRenderTargetView(texture.get(), None, Some(&mut view))
                .gpu("CreateRenderTargetView")?;
            Ok(Com::new(required(view, "CreateRenderTargetView")?))
        }
    }

    fn bind_target(&self, view: Option<&TargetView>) {
        unsafe {
            match view {
                Some(view) => self
                    .context
                    .OMSetRenderTargets(Some(&[Some(view.get().clone())]), None),
                None => self.context.OMSetRenderTargets(None, None),
            }
        }
    }

    fn clear_target(&self, view: &TargetView, color: ClearColor) {
        unsafe { self.context.ClearRenderTargetView(view.get(), &color.0) };
    }

    fn flush(&self) {
        unsafe { self.context.Flush() };
    }

    fn context_handle(&self) -> ContextHandle {
        ContextHandle(self.context.as_raw() as usize)
    }

    fn retain_context(&self) -> u32 {
        add_ref(&self.context)
    }

    fn release_context(&self) -> u32 {
        // 只归还 retain_context 增加的引用，本结构体自身的引用保持不变
        unsafe { release_ref(&self.context) }
    }

    fn shutdown(self) {
        unsafe {
            self.context.ClearState();
            self.context.Flush();
        }
        let D3D11Decode { device, context } = self;
        drop(context);
        drop(device);
        debug!("decode device released");
    }
}
