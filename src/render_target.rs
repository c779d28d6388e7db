//! 渲染目标生命周期
//!
//! 共享纹理及其派生视图（解码侧渲染目标视图、显示侧着色器资源视图）
//! 作为一个整体分配、绑定、失效和销毁。每次分配都会得到新的代次号，
//! 绘制时据此拒绝过期视图。

use crate::common::{PixelFormat, TextureDesc};
use crate::error::{PresentError, Result};
use crate::gpu::{release_checked, DecodeDevice, DisplayDevice, TextureResource};
use crate::pipeline::FrameSource;
use crate::shared_texture::SharedPair;
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Uninitialized,
    Allocated,
    Bound,
    Invalidated,
    Destroyed,
}

pub struct RenderTargets<D: DisplayDevice, E: DecodeDevice> {
    state: TargetState,
    pair: Option<SharedPair<D, E>>,
    decode_target: Option<E::TargetView>,
    shader_view: Option<D::ShaderView>,
    generation: u64,
    format: PixelFormat,
}

impl<D: DisplayDevice, E: DecodeDevice> RenderTargets<D, E> {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            state: TargetState::Uninitialized,
            pair: None,
            decode_target: None,
            shader_view: None,
            generation: 0,
            format,
        }
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// 按新尺寸重建共享纹理和视图
    ///
    /// 旧代次的视图总是先解绑、释放，然后才分配新的共享纹理。
    pub fn configure(&mut self, display: &D, decode: &E, width: u32, height: u32) -> Result<TextureDesc> {
        if width == 0 || height == 0 {
            return Err(PresentError::InvalidParameter(format!(
                "render target size {}x{} has zero area",
                width, height
            )));
        }
        if self.state == TargetState::Destroyed {
            return Err(PresentError::NotReady);
        }

        self.invalidate(display, decode)?;

        let desc = TextureDesc::new(width, height, self.format);
        let pair = SharedPair::allocate(display, decode, desc)?;
        self.pair = Some(pair);
        self.state = TargetState::Allocated;

        if let Err(e) = self.create_views(display, decode) {
            warn!("render target views for {}x{} failed: {}", width, height, e);
            if let Err(cleanup) = self.invalidate(display, decode) {
                warn!("cleanup after failed view creation: {}", cleanup);
            }
            return Err(e);
        }

        self.generation += 1;
        self.state = TargetState::Bound;
        info!(
            "render targets configured at {}x{} {:?}, generation {}",
            width, height, self.format, self.generation
        );
        Ok(desc)
    }

    fn create_views(&mut self, display: &D, decode: &E) -> Result<()> {
        let pair = self.pair.as_ref().ok_or(PresentError::NotReady)?;
        let target = decode.create_target_view(pair.view().texture())?;
        decode.bind_target(Some(&target));
        self.decode_target = Some(target);
        self.shader_view = Some(display.create_shader_view(pair.shared().texture())?);
        Ok(())
    }

    /// 解除两侧绑定并释放当前代次的全部资源
    ///
    /// 显示侧的着色器资源绑定也在这里解除，调用方需同时让管线忘记已绑定的代次。
    pub fn invalidate(&mut self, display: &D, decode: &E) -> Result<()> {
        if self.pair.is_none() && self.decode_target.is_none() && self.shader_view.is_none() {
            if self.state != TargetState::Uninitialized && self.state != TargetState::Destroyed {
                self.state = TargetState::Invalidated;
            }
            return Ok(());
        }

        let mut result = Ok(());
        if let Some(target) = self.decode_target.take() {
            decode.bind_target(None);
            decode.flush();
            result = result.and(release_checked(target, "decode render target"));
        }
        if let Some(view) = self.shader_view.take() {
            display.bind_shader_view(None);
            result = result.and(release_checked(view, "shared texture shader view"));
        }
        if let Some(pair) = self.pair.take() {
            result = result.and(pair.release(display));
        }
        self.state = TargetState::Invalidated;
        debug!("render targets of generation {} invalidated", self.generation);
        result
    }

    /// 释放全部资源，之后不能再配置
    pub fn destroy(&mut self, display: &D, decode: &E) -> Result<()> {
        let result = self.invalidate(display, decode);
        self.state = TargetState::Destroyed;
        result
    }

    /// 仅在 `Bound` 状态下可用于绘制
    pub fn frame_source(&self) -> Option<FrameSource<'_, D>> {
        match (self.state, self.shader_view.as_ref()) {
            (TargetState::Bound, Some(view)) => Some(FrameSource {
                view,
                generation: self.generation,
            }),
            _ => None,
        }
    }

    pub fn decode_target(&self) -> Option<&E::TargetView> {
        match self.state {
            TargetState::Bound => self.decode_target.as_ref(),
            _ => None,
        }
    }

    /// 显示侧与解码侧各自报告的纹理描述
    pub fn dimensions(&self) -> Option<(TextureDesc, TextureDesc)> {
        self.pair
            .as_ref()
            .map(|pair| (pair.shared().texture().desc(), pair.view().texture().desc()))
    }
}
