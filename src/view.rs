//! 视频视图
//!
//! 接收 UI 层的表面生命周期事件（模板应用、尺寸/缩放变化、卸载、挂起），
//! 并把渲染管线注册到播放器上。调用播放器或引擎的上报函数时从不持有状态锁。

use crate::callbacks::{CallbackAdapter, MediaPlayer, OutputCallbacks};
use crate::common::{PresentConfig, SurfaceHandle, SurfaceMetrics, SurfaceSize};
use crate::error::{PresentError, Result};
use crate::gpu::GpuBackend;
use crate::state::RenderingPipelineState;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type InitializedHandler = Box<dyn Fn() + Send + Sync>;

pub struct VideoView<B: GpuBackend> {
    backend: B,
    state: Arc<Mutex<RenderingPipelineState<B>>>,
    player: Option<Arc<dyn MediaPlayer>>,
    initialized_handler: Option<InitializedHandler>,
}

impl<B: GpuBackend> VideoView<B> {
    pub fn new(backend: B, config: PresentConfig) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(RenderingPipelineState::new(config))),
            player: None,
            initialized_handler: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RenderingPipelineState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_loaded()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 与回调适配器共享的状态
    pub fn state(&self) -> Arc<Mutex<RenderingPipelineState<B>>> {
        self.state.clone()
    }

    /// 每次初始化成功后调用
    pub fn set_initialized_handler<F>(&mut self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.initialized_handler = Some(Box::new(handler));
    }

    /// 模板应用：释放全部资源并记住新的呈现表面
    pub fn apply_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        let mut state = self.lock();
        let result = state.teardown();
        state.set_surface(Some(surface));
        debug!("surface applied: {:?}", surface);
        result
    }

    /// 已加载时把呈现转移到新的表面，只重建交换链
    pub fn retarget_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        let mut state = self.lock();
        let size = state.metrics().pixel_size();
        state.replace_surface(surface, size)
    }

    pub fn on_size_changed(&mut self, metrics: SurfaceMetrics) -> Result<()> {
        let mut state = self.lock();
        state.set_metrics(metrics);
        if state.is_loaded() {
            drop(state);
            return self.resize_loaded();
        }

        let size = metrics.pixel_size();
        if size.is_empty() || state.surface().is_none() {
            debug!(
                "deferring initialization: {}x{}, surface {:?}",
                size.width,
                size.height,
                state.surface()
            );
            return Ok(());
        }

        state.initialize(&self.backend, size)?;
        drop(state);

        info!("video view loaded at {}x{}", size.width, size.height);
        self.attach_player();
        if let Some(handler) = self.initialized_handler.as_ref() {
            handler();
        }
        Ok(())
    }

    /// 只在已加载时生效
    pub fn on_scale_changed(&mut self, scale_x: f32, scale_y: f32) -> Result<()> {
        let mut state = self.lock();
        if !state.is_loaded() {
            return Ok(());
        }
        let metrics = state.metrics().with_scale(scale_x, scale_y);
        state.set_metrics(metrics);
        drop(state);
        self.resize_loaded()
    }

    fn resize_loaded(&self) -> Result<()> {
        let (resized, size, reporter) = {
            let mut state = self.lock();
            let size = state.metrics().pixel_size();
            let resized = state.resize(size)?;
            (resized, size, state.resize_reporter())
        };
        if let (true, Some(report)) = (resized, reporter) {
            report(size.width, size.height);
        }
        Ok(())
    }

    /// 解除播放器注册并释放全部资源
    pub fn on_unloaded(&mut self) -> Result<()> {
        if let Some(player) = self.player.as_ref() {
            player.set_output_callbacks(None);
        }
        self.lock().teardown()
    }

    /// 先解除旧播放器并释放它的共享纹理；新播放器在视图已加载时立即注册，
    /// 否则推迟到初始化完成
    pub fn set_media_player(&mut self, player: Option<Arc<dyn MediaPlayer>>) {
        if let Some(old) = self.player.take() {
            old.set_output_callbacks(None);
            if let Err(e) = self.lock().detach_output() {
                warn!("releasing render targets of the detached player: {}", e);
            }
            debug!("previous media player detached");
        }
        self.player = player;
        if self.is_loaded() {
            self.attach_player();
        }
    }

    fn attach_player(&self) {
        if let Some(player) = self.player.as_ref() {
            let callbacks: Arc<dyn OutputCallbacks> =
                Arc::new(CallbackAdapter::new(self.state.clone()));
            player.set_output_callbacks(Some(callbacks));
            debug!("media player attached");
        }
    }

    /// 预留的扩展点，目前总是空列表
    pub fn swapchain_options(&self) -> Result<Vec<String>> {
        if !self.is_loaded() {
            return Err(PresentError::NotReady);
        }
        Ok(Vec::new())
    }

    /// 应用挂起时释放驱动缓存
    pub fn trim(&self) -> Result<()> {
        self.lock().trim()
    }

    pub fn surface_size(&self) -> SurfaceSize {
        self.lock().metrics().pixel_size()
    }
}

impl<B: GpuBackend> Drop for VideoView<B> {
    fn drop(&mut self) {
        if let Some(player) = self.player.take() {
            player.set_output_callbacks(None);
        }
        if let Err(e) = self.lock().teardown() {
            warn!("teardown on drop: {}", e);
        }
    }
}
