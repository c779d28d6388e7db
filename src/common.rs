//! 公共类型定义：尺寸、像素格式、颜色标签、输出描述、四边形几何与配置

use crate::error::Result;
use serde_derive::{Deserialize, Serialize};

/// 四边形在 NDC 空间中的边界
pub const BORDER_LEFT: f32 = -0.95;
pub const BORDER_RIGHT: f32 = 0.85;
pub const BORDER_TOP: f32 = 0.95;
pub const BORDER_BOTTOM: f32 = -0.90;

/// 顶点格式：position(3×f32) + texcoord(2×f32)
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex {
        position: [BORDER_LEFT, BORDER_BOTTOM, 0.0],
        texcoord: [0.0, 1.0],
    },
    Vertex {
        position: [BORDER_RIGHT, BORDER_BOTTOM, 0.0],
        texcoord: [1.0, 1.0],
    },
    Vertex {
        position: [BORDER_RIGHT, BORDER_TOP, 0.0],
        texcoord: [1.0, 0.0],
    },
    Vertex {
        position: [BORDER_LEFT, BORDER_TOP, 0.0],
        texcoord: [0.0, 0.0],
    },
];

/// 两个三角形组成的三角形列表
pub const QUAD_INDICES: [u16; 6] = [3, 1, 0, 2, 1, 3];

/// 像素尺寸
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 宽或高为 0 时视口无效
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// UI 层报告的逻辑尺寸与合成缩放
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMetrics {
    pub width: f64,
    pub height: f64,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl SurfaceMetrics {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    pub fn with_scale(mut self, scale_x: f32, scale_y: f32) -> Self {
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self
    }

    /// 逻辑尺寸乘以合成缩放得到后备缓冲区像素尺寸
    pub fn pixel_size(&self) -> SurfaceSize {
        let width = (self.width * self.scale_x as f64).max(0.0) as u32;
        let height = (self.height * self.scale_y as f64).max(0.0) as u32;
        SurfaceSize { width, height }
    }
}

impl Default for SurfaceMetrics {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// 呈现目标句柄，由 UI 层提供
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceHandle {
    /// 顶层窗口 HWND
    Window(usize),
    /// SwapChainPanel 的原生 IInspectable 指针
    SwapChainPanel(usize),
}

/// 跨设备共享使用的操作系统句柄（NT handle），不是 GPU 对象指针
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(pub usize);

/// 交给播放引擎的解码设备上下文句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub usize);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
}

impl PixelFormat {
    /// 对应的 DXGI_FORMAT 数值
    pub fn dxgi_format(&self) -> u32 {
        match self {
            PixelFormat::Rgba8Unorm => 28,
            PixelFormat::Bgra8Unorm => 87,
        }
    }
}

/// 纹理描述
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Bt709,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorPrimaries {
    Bt709,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferFunction {
    Srgb,
}

/// 告诉引擎应如何生成像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub format: PixelFormat,
    pub dxgi_format: u32,
    pub full_range: bool,
    pub color_space: ColorSpace,
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunction,
}

impl OutputDescriptor {
    pub fn for_format(format: PixelFormat) -> Self {
        Self {
            format,
            dxgi_format: format.dxgi_format(),
            full_range: true,
            color_space: ColorSpace::Bt709,
            primaries: ColorPrimaries::Bt709,
            transfer: TransferFunction::Srgb,
        }
    }
}

/// RGBA 清屏颜色
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl ClearColor {
    pub const BLACK: ClearColor = ClearColor([0.0, 0.0, 0.0, 1.0]);
    /// 调试用：引擎未绘制的区域显示为暗绿色
    pub const DIAGNOSTIC_DECODE: ClearColor = ClearColor([0.5, 0.5, 0.0, 1.0]);
    /// 调试用：四边形以外的区域显示为橙色
    pub const DIAGNOSTIC_BACK_BUFFER: ClearColor = ClearColor([1.0, 0.5, 0.0, 1.0]);

    pub fn to_rgba8(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        for (dst, src) in out.iter_mut().zip(self.0.iter()) {
            *dst = (src.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        out
    }
}

/// 视口（像素坐标）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn full(size: SurfaceSize) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: size.width as f32,
            height: size.height as f32,
        }
    }
}

/// 设备创建选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceOptions {
    pub debug_layer: bool,
    pub format: PixelFormat,
}

/// 呈现配置，可从 JSON 读取，所有字段都有默认值
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PresentConfig {
    /// Present 的垂直同步间隔，0 表示立即呈现
    pub sync_interval: u32,
    /// 使用调试清屏颜色
    pub diagnostic_clear: bool,
    /// 创建设备时启用调试层
    pub debug_layer: bool,
    pub format: PixelFormat,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            sync_interval: 0,
            diagnostic_clear: false,
            debug_layer: false,
            format: PixelFormat::Rgba8Unorm,
        }
    }
}

impl PresentConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            debug_layer: self.debug_layer,
            format: self.format,
        }
    }

    pub fn decode_clear_color(&self) -> ClearColor {
        if self.diagnostic_clear {
            ClearColor::DIAGNOSTIC_DECODE
        } else {
            ClearColor::BLACK
        }
    }

    pub fn back_buffer_clear_color(&self) -> ClearColor {
        if self.diagnostic_clear {
            ClearColor::DIAGNOSTIC_BACK_BUFFER
        } else {
            ClearColor::BLACK
        }
    }
}
