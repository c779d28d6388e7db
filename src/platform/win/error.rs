//! Windows 平台错误映射

use crate::error::{PresentError, Result};
use windows::core::HRESULT;

/// 把 windows crate 的错误映射为 [`PresentError`]，附带出错的 API 名称
pub trait WinResultExt<T> {
    fn gpu(self, call: &'static str) -> Result<T>;
    fn device_creation(self, call: &'static str) -> Result<T>;
    fn handle_import(self, call: &'static str) -> Result<T>;
}

impl<T> WinResultExt<T> for windows::core::Result<T> {
    fn gpu(self, call: &'static str) -> Result<T> {
        self.map_err(|e| PresentError::gpu(call, e.to_string()))
    }

    fn device_creation(self, call: &'static str) -> Result<T> {
        self.map_err(|e| PresentError::DeviceCreation(format!("{}: {}", call, e)))
    }

    fn handle_import(self, call: &'static str) -> Result<T> {
        self.map_err(|e| PresentError::HandleImport(format!("{}: {}", call, e)))
    }
}

/// 从 HRESULT 转换为 Result
pub fn check_hresult(hr: HRESULT, call: &'static str) -> Result<()> {
    hr.ok().gpu(call)
}

/// 输出参数为空时视为调用失败
pub fn required<T>(value: Option<T>, call: &'static str) -> Result<T> {
    value.ok_or_else(|| PresentError::gpu(call, "returned a null object"))
}
