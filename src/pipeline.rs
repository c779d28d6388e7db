//! 呈现管线
//!
//! 持有着色器、静态四边形几何、采样器和交换链后备缓冲区的渲染目标视图，
//! 把共享纹理绘制到后备缓冲区并呈现。

use crate::common::{ClearColor, SurfaceSize, Viewport, QUAD_INDICES, QUAD_VERTICES};
use crate::error::{PresentError, Result};
use crate::gpu::{release_checked, DisplayDevice};
use crate::shader::ShaderSource;
use log::{debug, info, trace, warn};

/// 一次绘制使用的共享纹理着色器资源视图及其分配代次
pub struct FrameSource<'a, D: DisplayDevice> {
    pub view: &'a D::ShaderView,
    pub generation: u64,
}

pub struct PresentationPipeline<D: DisplayDevice> {
    program: Option<D::Program>,
    vertex_buffer: Option<D::Buffer>,
    index_buffer: Option<D::Buffer>,
    sampler: Option<D::Sampler>,
    back_buffer: Option<D::TargetView>,
    size: SurfaceSize,
    index_count: u32,
    sync_interval: u32,
    bound_generation: Option<u64>,
}

impl<D: DisplayDevice> PresentationPipeline<D> {
    pub fn new(sync_interval: u32) -> Self {
        Self {
            program: None,
            vertex_buffer: None,
            index_buffer: None,
            sampler: None,
            back_buffer: None,
            size: SurfaceSize::default(),
            index_count: 0,
            sync_interval,
            bound_generation: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.program.is_some()
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn sync_interval(&self) -> u32 {
        self.sync_interval
    }

    pub fn set_sync_interval(&mut self, sync_interval: u32) {
        self.sync_interval = sync_interval;
    }

    /// 构建全部静态 GPU 资源；任何一步失败都会释放已创建的资源
    pub fn initialize(&mut self, display: &D, swapchain: &D::Swapchain, size: SurfaceSize) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if let Err(e) = self.build(display, swapchain, size) {
            warn!("presentation pipeline initialization failed: {}", e);
            if let Err(cleanup) = self.teardown(display) {
                warn!("cleanup after failed initialization: {}", cleanup);
            }
            return Err(e);
        }
        info!(
            "presentation pipeline initialized at {}x{}",
            size.width, size.height
        );
        Ok(())
    }

    fn build(&mut self, display: &D, swapchain: &D::Swapchain, size: SurfaceSize) -> Result<()> {
        let program = display.compile_program(&ShaderSource::quad())?;
        self.program = Some(program);
        self.vertex_buffer = Some(display.create_vertex_buffer(&QUAD_VERTICES)?);
        self.index_buffer = Some(display.create_index_buffer(&QUAD_INDICES)?);
        self.index_count = QUAD_INDICES.len() as u32;
        self.sampler = Some(display.create_sampler()?);

        if let (Some(program), Some(vb), Some(ib), Some(sampler)) = (
            self.program.as_ref(),
            self.vertex_buffer.as_ref(),
            self.index_buffer.as_ref(),
            self.sampler.as_ref(),
        ) {
            display.bind_pipeline(program, vb, ib, sampler);
        }

        self.attach_swapchain(display, swapchain, size)
    }

    /// 为（重新创建的）交换链重建后备缓冲区视图并更新视口
    pub fn attach_swapchain(&mut self, display: &D, swapchain: &D::Swapchain, size: SurfaceSize) -> Result<()> {
        self.release_back_buffer(display)?;
        let view = display.back_buffer_view(swapchain)?;
        display.bind_target(Some(&view));
        self.back_buffer = Some(view);
        self.size = size;
        display.set_viewport(Viewport::full(size));
        Ok(())
    }

    /// 交换链即将被销毁时释放后备缓冲区视图
    pub fn detach_swapchain(&mut self, display: &D) -> Result<()> {
        self.release_back_buffer(display)
    }

    fn release_back_buffer(&mut self, display: &D) -> Result<()> {
        if let Some(view) = self.back_buffer.take() {
            display.bind_target(None);
            release_checked(view, "back buffer render target")?;
        }
        Ok(())
    }

    /// 尺寸未变或面积为 0 时不做任何事，返回是否实际调整
    pub fn resize(&mut self, display: &D, swapchain: &mut D::Swapchain, size: SurfaceSize) -> Result<bool> {
        if !self.is_initialized() {
            return Err(PresentError::NotReady);
        }
        if size.is_empty() {
            trace!("ignoring zero-area resize to {}x{}", size.width, size.height);
            return Ok(false);
        }
        // 上次调整失败时后备缓冲区视图已释放，即使尺寸相同也要重建
        if size == self.size && self.back_buffer.is_some() {
            return Ok(false);
        }

        self.release_back_buffer(display)?;
        display.resize_swapchain(swapchain, size)?;
        self.attach_swapchain(display, swapchain, size)?;
        debug!("back buffer resized to {}x{}", size.width, size.height);
        Ok(true)
    }

    /// 每帧重新绑定后备缓冲区和视口
    ///
    /// 翻转模型交换链在 Present 之后会把后备缓冲区从输出合并阶段解绑。
    pub fn begin_frame(&self, display: &D) -> Result<()> {
        let view = self.back_buffer.as_ref().ok_or(PresentError::NotReady)?;
        display.bind_target(Some(view));
        display.set_viewport(Viewport::full(self.size));
        Ok(())
    }

    pub fn clear_back_buffer(&self, display: &D, color: ClearColor) -> Result<()> {
        let view = self.back_buffer.as_ref().ok_or(PresentError::NotReady)?;
        display.clear_target(view, color);
        Ok(())
    }

    /// 绑定共享纹理并绘制四边形，不会使用过期代次的视图
    pub fn draw_frame(&mut self, display: &D, source: FrameSource<'_, D>) -> Result<()> {
        if !self.is_initialized() || self.back_buffer.is_none() {
            return Err(PresentError::NotReady);
        }
        if self.bound_generation != Some(source.generation) {
            display.bind_shader_view(Some(source.view));
            self.bound_generation = Some(source.generation);
            trace!("bound shared texture generation {}", source.generation);
        }
        display.draw_indexed(self.index_count);
        Ok(())
    }

    /// 共享纹理即将被释放时调用，解除着色器资源绑定
    pub fn unbind_source(&mut self, display: &D) {
        if self.bound_generation.take().is_some() {
            display.bind_shader_view(None);
        }
    }

    pub fn present(&self, display: &D, swapchain: &D::Swapchain) -> Result<()> {
        if !self.is_initialized() {
            return Err(PresentError::NotReady);
        }
        display.present(swapchain, self.sync_interval)
    }

    /// 幂等：什么都没创建时也可以调用
    pub fn teardown(&mut self, display: &D) -> Result<()> {
        let nothing_created = self.program.is_none()
            && self.vertex_buffer.is_none()
            && self.index_buffer.is_none()
            && self.sampler.is_none()
            && self.back_buffer.is_none();
        if nothing_created {
            return Ok(());
        }

        display.clear_state();
        self.bound_generation = None;

        let mut result = Ok(());
        if let Some(view) = self.back_buffer.take() {
            result = result.and(release_checked(view, "back buffer render target"));
        }
        if let Some(sampler) = self.sampler.take() {
            result = result.and(release_checked(sampler, "sampler"));
        }
        if let Some(buffer) = self.index_buffer.take() {
            result = result.and(release_checked(buffer, "index buffer"));
        }
        if let Some(buffer) = self.vertex_buffer.take() {
            result = result.and(release_checked(buffer, "vertex buffer"));
        }
        if let Some(program) = self.program.take() {
            result = result.and(release_checked(program, "shader program"));
        }
        self.index_count = 0;
        self.size = SurfaceSize::default();
        debug!("presentation pipeline torn down");
        result
    }
}
