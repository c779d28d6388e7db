//! 平台相关的驱动实现

pub mod mock;

#[cfg(windows)]
pub mod win;
