//! 硬件加速视频呈现
//!
//! 播放引擎在自己的解码设备上把帧绘制到共享纹理，本库在显示设备上把该纹理
//! 合成到交换链并呈现。两个设备之间只通过操作系统共享句柄交换显存。

pub mod callbacks;
pub mod common;
pub mod device;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod platform;
pub mod render_target;
pub mod shader;
pub mod shared_texture;
pub mod state;
pub mod view;

pub use callbacks::{CallbackAdapter, MediaPlayer, OutputCallbacks, RenderConfig, ResizeReporter};
pub use common::{OutputDescriptor, PresentConfig, SurfaceHandle, SurfaceMetrics, SurfaceSize};
pub use error::{PresentError, Result};
pub use gpu::GpuBackend;
pub use state::RenderingPipelineState;
pub use view::VideoView;
