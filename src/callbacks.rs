//! 播放引擎输出回调契约
//!
//! 引擎在自己的线程上调用 [`OutputCallbacks`]；[`CallbackAdapter`] 把每个回调
//! 转发到共享的 [`RenderingPipelineState`]。

use crate::common::{ColorPrimaries, ColorSpace, ContextHandle, OutputDescriptor, TransferFunction};
use crate::error::Result;
use crate::gpu::GpuBackend;
use crate::state::RenderingPipelineState;
use log::{debug, trace};
use serde_derive::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 引擎提供的尺寸上报函数
pub type ResizeReporter = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// 引擎请求的输出配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub bitdepth: u32,
    pub full_range: bool,
    pub color_space: ColorSpace,
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunction,
}

impl RenderConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bitdepth: 8,
            full_range: true,
            color_space: ColorSpace::Bt709,
            primaries: ColorPrimaries::Bt709,
            transfer: TransferFunction::Srgb,
        }
    }
}

/// 引擎调用的输出回调
pub trait OutputCallbacks: Send + Sync {
    /// 交出解码设备上下文，只持有一次引用
    fn setup(&self) -> Result<ContextHandle>;
    /// 归还 `setup` 持有的引用
    fn cleanup(&self);
    fn set_resize_reporter(&self, reporter: Option<ResizeReporter>);
    /// 按引擎请求的尺寸重建共享纹理，返回实际输出格式
    fn update_output(&self, config: &RenderConfig) -> Result<OutputDescriptor>;
    /// `entering == true` 表示引擎即将绘制，`false` 表示一帧已绘制完成
    fn frame_boundary(&self, entering: bool) -> Result<()>;
    fn present(&self) -> Result<()>;
    /// 只支持单一 RGBA 平面
    fn select_plane(&self, plane: usize) -> bool;
}

/// 播放器一侧的注册接口
pub trait MediaPlayer: Send + Sync {
    /// 传入 `None` 表示解除注册
    fn set_output_callbacks(&self, callbacks: Option<Arc<dyn OutputCallbacks>>);
}

pub struct CallbackAdapter<B: GpuBackend> {
    state: Arc<Mutex<RenderingPipelineState<B>>>,
    /// 本适配器持有的上下文引用所属的设备代次
    retained: Mutex<Option<u64>>,
}

impl<B: GpuBackend> CallbackAdapter<B> {
    pub fn new(state: Arc<Mutex<RenderingPipelineState<B>>>) -> Self {
        Self {
            state,
            retained: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RenderingPipelineState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retained(&self) -> MutexGuard<'_, Option<u64>> {
        self.retained.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: GpuBackend> OutputCallbacks for CallbackAdapter<B> {
    fn setup(&self) -> Result<ContextHandle> {
        let mut retained = self.retained();
        let mut state = self.lock();
        if *retained == Some(state.device_epoch()) {
            return state.context_handle();
        }
        let (context, epoch) = state.retain_context()?;
        *retained = Some(epoch);
        debug!("output setup, handing out decode context {:?}", context);
        Ok(context)
    }

    fn cleanup(&self) {
        if let Some(epoch) = self.retained().take() {
            self.lock().release_context(epoch);
            debug!("output cleanup");
        }
    }

    fn set_resize_reporter(&self, reporter: Option<ResizeReporter>) {
        self.lock().set_resize_reporter(reporter);
    }

    fn update_output(&self, config: &RenderConfig) -> Result<OutputDescriptor> {
        debug!("update output {:?}", config);
        if config.bitdepth > 8 {
            debug!(
                "{}-bit output requested, rendering 8-bit",
                config.bitdepth
            );
        }
        self.lock().update_output(config.width, config.height)
    }

    fn frame_boundary(&self, entering: bool) -> Result<()> {
        trace!("frame boundary, entering: {}", entering);
        self.lock().frame_boundary(entering)
    }

    fn present(&self) -> Result<()> {
        self.lock().present()
    }

    fn select_plane(&self, plane: usize) -> bool {
        plane == 0
    }
}
