//! 错误类型定义

use thiserror::Error;

/// 呈现管线错误类型
#[derive(Error, Debug)]
pub enum PresentError {
    /// 没有硬件适配器支持所需特性级别
    #[error("graphics device creation failed: {0}")]
    DeviceCreation(String),

    /// 着色器编译失败，附带编译器诊断文本
    #[error("shader compilation failed for {entry_point}: {diagnostics}")]
    ShaderCompile {
        entry_point: String,
        diagnostics: String,
    },

    /// 解码设备无法导入共享句柄
    #[error("shared handle import failed: {0}")]
    HandleImport(String),

    /// 释放后引用计数未归零，属于编程错误
    #[error("{resource} still has {remaining} references after release")]
    ResourceLeak {
        resource: &'static str,
        remaining: u32,
    },

    /// 视图尚未加载
    #[error("the video view is not loaded yet")]
    NotReady,

    /// 其他驱动调用失败
    #[error("{call} failed: {message}")]
    Gpu { call: &'static str, message: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl PresentError {
    pub fn gpu(call: &'static str, message: impl Into<String>) -> Self {
        PresentError::Gpu {
            call,
            message: message.into(),
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PresentError>;
