//! 渲染管线状态
//!
//! 设备、管线、渲染目标和加载标志都集中在这一个结构体里，由视图和回调适配器
//! 通过同一把锁共享。

use crate::callbacks::ResizeReporter;
use crate::common::{
    ContextHandle, OutputDescriptor, PresentConfig, SurfaceHandle, SurfaceMetrics, SurfaceSize,
};
use crate::device::DevicePair;
use crate::error::{PresentError, Result};
use crate::gpu::{DecodeDevice, DecodeOf, DisplayDevice, DisplayOf, GpuBackend};
use crate::pipeline::PresentationPipeline;
use crate::render_target::RenderTargets;
use log::{debug, info, warn};

pub struct RenderingPipelineState<B: GpuBackend> {
    config: PresentConfig,
    devices: Option<DevicePair<B>>,
    pipeline: PresentationPipeline<DisplayOf<B>>,
    targets: RenderTargets<DisplayOf<B>, DecodeOf<B>>,
    surface: Option<SurfaceHandle>,
    metrics: SurfaceMetrics,
    loaded: bool,
    /// 每次初始化成功后递增，用来识别上一代设备的上下文引用
    device_epoch: u64,
    context_retains: u32,
    resize_reporter: Option<ResizeReporter>,
}

impl<B: GpuBackend> RenderingPipelineState<B> {
    pub fn new(config: PresentConfig) -> Self {
        Self {
            pipeline: PresentationPipeline::new(config.sync_interval),
            targets: RenderTargets::new(config.format),
            config,
            devices: None,
            surface: None,
            metrics: SurfaceMetrics::default(),
            loaded: false,
            device_epoch: 0,
            context_retains: 0,
            resize_reporter: None,
        }
    }

    pub fn config(&self) -> &PresentConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.surface
    }

    pub fn set_surface(&mut self, surface: Option<SurfaceHandle>) {
        self.surface = surface;
    }

    pub fn metrics(&self) -> SurfaceMetrics {
        self.metrics
    }

    pub fn set_metrics(&mut self, metrics: SurfaceMetrics) {
        self.metrics = metrics;
    }

    pub fn devices(&self) -> Option<&DevicePair<B>> {
        self.devices.as_ref()
    }

    pub fn pipeline(&self) -> &PresentationPipeline<DisplayOf<B>> {
        &self.pipeline
    }

    pub fn targets(&self) -> &RenderTargets<DisplayOf<B>, DecodeOf<B>> {
        &self.targets
    }

    pub fn resize_reporter(&self) -> Option<ResizeReporter> {
        self.resize_reporter.clone()
    }

    pub fn set_resize_reporter(&mut self, reporter: Option<ResizeReporter>) {
        self.resize_reporter = reporter;
    }

    /// 创建设备对与呈现管线；失败时释放已创建的一切并保持未加载
    pub fn initialize(&mut self, backend: &B, size: SurfaceSize) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let surface = self.surface.ok_or(PresentError::NotReady)?;
        if size.is_empty() {
            return Err(PresentError::InvalidParameter(format!(
                "cannot initialize at {}x{}",
                size.width, size.height
            )));
        }

        if let Err(e) = self.build(backend, surface, size) {
            warn!("initialization failed: {}", e);
            if let Err(cleanup) = self.teardown() {
                warn!("cleanup after failed initialization: {}", cleanup);
            }
            return Err(e);
        }
        self.loaded = true;
        self.device_epoch += 1;
        info!("rendering pipeline loaded at {}x{}", size.width, size.height);
        Ok(())
    }

    fn build(&mut self, backend: &B, surface: SurfaceHandle, size: SurfaceSize) -> Result<()> {
        let devices = self.devices.insert(DevicePair::create(
            backend,
            surface,
            size,
            &self.config.device_options(),
        )?);
        let (display, swapchain) = devices.display_and_swapchain();
        let swapchain = swapchain.ok_or(PresentError::NotReady)?;
        self.targets = RenderTargets::new(self.config.format);
        self.pipeline = PresentationPipeline::new(self.config.sync_interval);
        self.pipeline.initialize(display, swapchain, size)
    }

    /// 只改变尺寸时就地调整交换链
    pub fn resize(&mut self, size: SurfaceSize) -> Result<bool> {
        if !self.loaded {
            return Err(PresentError::NotReady);
        }
        let devices = self.devices.as_mut().ok_or(PresentError::NotReady)?;
        let (display, swapchain) = devices.display_and_swapchain();
        let swapchain = swapchain.ok_or(PresentError::NotReady)?;
        self.pipeline.resize(display, swapchain, size)
    }

    /// 表面更换时重建交换链并重新挂接后备缓冲区，设备保持不变
    pub fn replace_surface(&mut self, surface: SurfaceHandle, size: SurfaceSize) -> Result<()> {
        self.surface = Some(surface);
        if !self.loaded {
            return Ok(());
        }
        let devices = self.devices.as_mut().ok_or(PresentError::NotReady)?;
        // 后备缓冲区视图持有旧交换链的引用，必须先放掉
        self.pipeline.detach_swapchain(devices.display())?;
        devices.replace_surface(surface, size)?;
        let (display, swapchain) = devices.display_and_swapchain();
        let swapchain = swapchain.ok_or(PresentError::NotReady)?;
        self.pipeline.attach_swapchain(display, swapchain, size)
    }

    pub fn device_epoch(&self) -> u64 {
        self.device_epoch
    }

    pub fn context_retains(&self) -> u32 {
        self.context_retains
    }

    pub fn context_handle(&self) -> Result<ContextHandle> {
        let devices = self.devices.as_ref().ok_or(PresentError::NotReady)?;
        Ok(devices.decode().context_handle())
    }

    /// 为一个引擎持有一次解码上下文引用，返回句柄和所属设备代次
    pub fn retain_context(&mut self) -> Result<(ContextHandle, u64)> {
        let devices = self.devices.as_ref().ok_or(PresentError::NotReady)?;
        let decode = devices.decode();
        let refs = decode.retain_context();
        self.context_retains += 1;
        debug!("decode context retained, {} references", refs);
        Ok((decode.context_handle(), self.device_epoch))
    }

    /// 归还 `retain_context` 持有的引用；上一代设备的引用已在 teardown 时归还
    pub fn release_context(&mut self, epoch: u64) {
        if epoch != self.device_epoch || self.context_retains == 0 {
            debug!("ignoring context release from device epoch {}", epoch);
            return;
        }
        if let Some(devices) = self.devices.as_ref() {
            self.context_retains -= 1;
            let refs = devices.decode().release_context();
            debug!("decode context released, {} references", refs);
        }
    }

    /// 播放器解除注册：释放当前代次的共享纹理和视图，新播放器必须重新配置输出
    pub fn detach_output(&mut self) -> Result<()> {
        let Some(devices) = self.devices.as_ref() else {
            return Ok(());
        };
        self.pipeline.unbind_source(devices.display());
        self.targets.invalidate(devices.display(), devices.decode())
    }

    pub fn update_output(&mut self, width: u32, height: u32) -> Result<OutputDescriptor> {
        let devices = self.devices.as_ref().ok_or(PresentError::NotReady)?;
        self.pipeline.unbind_source(devices.display());
        self.targets
            .configure(devices.display(), devices.decode(), width, height)?;
        Ok(OutputDescriptor::for_format(self.targets.format()))
    }

    pub fn frame_boundary(&mut self, entering: bool) -> Result<()> {
        let devices = self.devices.as_ref().ok_or(PresentError::NotReady)?;
        if entering {
            let target = self.targets.decode_target().ok_or(PresentError::NotReady)?;
            devices
                .decode()
                .clear_target(target, self.config.decode_clear_color());
            return Ok(());
        }

        let display = devices.display();
        let source = self.targets.frame_source().ok_or(PresentError::NotReady)?;
        self.pipeline.begin_frame(display)?;
        self.pipeline
            .clear_back_buffer(display, self.config.back_buffer_clear_color())?;
        self.pipeline.draw_frame(display, source)
    }

    pub fn present(&mut self) -> Result<()> {
        let devices = self.devices.as_ref().ok_or(PresentError::NotReady)?;
        let swapchain = devices.swapchain().ok_or(PresentError::NotReady)?;
        self.pipeline.present(devices.display(), swapchain)
    }

    pub fn trim(&self) -> Result<()> {
        match self.devices.as_ref() {
            Some(devices) => devices.display().trim(),
            None => Ok(()),
        }
    }

    /// 按依赖逆序释放全部资源，遇到错误继续释放并返回第一个错误
    pub fn teardown(&mut self) -> Result<()> {
        self.loaded = false;
        let Some(devices) = self.devices.take() else {
            self.context_retains = 0;
            return Ok(());
        };

        self.pipeline.unbind_source(devices.display());
        let mut result = self.targets.destroy(devices.display(), devices.decode());
        if let Err(e) = self.pipeline.teardown(devices.display()) {
            result = result.and(Err(e));
        }
        if self.context_retains > 0 {
            warn!(
                "engine did not release {} decode context references before teardown",
                self.context_retains
            );
            for _ in 0..self.context_retains {
                devices.decode().release_context();
            }
            self.context_retains = 0;
        }
        devices.teardown();
        info!("rendering pipeline torn down");
        result
    }
}
