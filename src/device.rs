//! 设备对管理：显示设备（绑定交换链）与解码设备（供播放引擎使用）

use crate::common::{DeviceOptions, SurfaceHandle, SurfaceSize};
use crate::error::Result;
use crate::gpu::{DecodeDevice, DecodeOf, DisplayDevice, DisplayOf, GpuBackend, GpuResource, SwapchainOf};
use log::{debug, info, warn};

/// 两个互不拥有的设备，以及显示设备拥有的交换链
pub struct DevicePair<B: GpuBackend> {
    display: DisplayOf<B>,
    swapchain: Option<SwapchainOf<B>>,
    decode: DecodeOf<B>,
    surface: SurfaceHandle,
}

impl<B: GpuBackend> DevicePair<B> {
    /// 创建显示设备与交换链，立即打开多线程保护，然后创建解码设备
    pub fn create(
        backend: &B,
        surface: SurfaceHandle,
        size: SurfaceSize,
        options: &DeviceOptions,
    ) -> Result<Self> {
        let (display, swapchain) = backend.create_display_device(surface, size, options)?;

        // 解码设备的回调可能与显示侧的绘制/呈现并发执行
        if let Err(e) = display.enable_multithread_protection() {
            swapchain.release();
            display.shutdown();
            return Err(e);
        }

        let decode = match backend.create_decode_device(options) {
            Ok(decode) => decode,
            Err(e) => {
                warn!("decode device creation failed, releasing display device: {}", e);
                swapchain.release();
                display.shutdown();
                return Err(e);
            }
        };

        info!(
            "device pair created for {:?} at {}x{}",
            surface, size.width, size.height
        );
        Ok(Self {
            display,
            swapchain: Some(swapchain),
            decode,
            surface,
        })
    }

    pub fn display(&self) -> &DisplayOf<B> {
        &self.display
    }

    pub fn decode(&self) -> &DecodeOf<B> {
        &self.decode
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn swapchain(&self) -> Option<&SwapchainOf<B>> {
        self.swapchain.as_ref()
    }

    /// 同时借出显示设备与可变交换链
    pub fn display_and_swapchain(&mut self) -> (&DisplayOf<B>, Option<&mut SwapchainOf<B>>) {
        (&self.display, self.swapchain.as_mut())
    }

    /// 表面更换时销毁旧交换链再重新创建，从不就地复用
    pub fn replace_surface(&mut self, surface: SurfaceHandle, size: SurfaceSize) -> Result<()> {
        if let Some(old) = self.swapchain.take() {
            let remaining = old.release();
            if remaining != 0 {
                warn!("old swapchain still has {} references", remaining);
            }
        }
        let swapchain = self.display.create_swapchain(surface, size)?;
        self.swapchain = Some(swapchain);
        self.surface = surface;
        debug!("swapchain recreated for {:?}", surface);
        Ok(())
    }

    /// 交换链先于其所属设备释放；每个设备先释放上下文再释放设备
    pub fn teardown(mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            let remaining = swapchain.release();
            if remaining != 0 {
                warn!("swapchain still has {} references at teardown", remaining);
            }
        }
        self.display.shutdown();
        self.decode.shutdown();
        debug!("device pair released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{Event, FailurePlan, MockBackend, Role};

    fn create(backend: &MockBackend) -> Result<DevicePair<MockBackend>> {
        DevicePair::create(
            backend,
            SurfaceHandle::Window(7),
            SurfaceSize::new(320, 240),
            &DeviceOptions::default(),
        )
    }

    #[test]
    fn test_multithread_protection_precedes_everything() {
        let backend = MockBackend::new();
        let pair = create(&backend).unwrap();
        let events = backend.events();
        assert_eq!(events[0], Event::CreateDevice(Role::Display));
        assert!(matches!(events[1], Event::CreateSwapchain(..)));
        assert_eq!(events[2], Event::EnableMultithread);
        assert_eq!(events[3], Event::CreateDevice(Role::Decode));
        assert!(backend.multithread_protected());
        assert_eq!(backend.unprotected_calls(), 0);
        pair.teardown();
    }

    #[test]
    fn test_teardown_order() {
        let backend = MockBackend::new();
        let pair = create(&backend).unwrap();
        backend.clear_events();
        pair.teardown();
        assert_eq!(
            backend.events(),
            vec![
                Event::ReleaseSwapchain,
                Event::ReleaseContext(Role::Display),
                Event::ReleaseDevice(Role::Display),
                Event::ReleaseContext(Role::Decode),
                Event::ReleaseDevice(Role::Decode),
            ]
        );
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_display_failure_is_device_creation_error() {
        let backend = MockBackend::new();
        backend.set_failures(FailurePlan {
            display_device: true,
            ..Default::default()
        });
        let err = create(&backend).err().unwrap();
        assert!(matches!(err, crate::error::PresentError::DeviceCreation(_)));
    }

    #[test]
    fn test_decode_failure_releases_display_side() {
        let backend = MockBackend::new();
        backend.set_failures(FailurePlan {
            decode_device: true,
            ..Default::default()
        });
        assert!(create(&backend).is_err());
        assert_eq!(backend.outstanding(), 0);
        assert!(backend
            .events()
            .contains(&Event::ReleaseDevice(Role::Display)));
    }

    #[test]
    fn test_replace_surface_recreates_swapchain() {
        let backend = MockBackend::new();
        let mut pair = create(&backend).unwrap();
        backend.clear_events();
        pair.replace_surface(SurfaceHandle::SwapChainPanel(9), SurfaceSize::new(100, 100))
            .unwrap();
        assert_eq!(
            backend.events(),
            vec![
                Event::ReleaseSwapchain,
                Event::CreateSwapchain(SurfaceHandle::SwapChainPanel(9), SurfaceSize::new(100, 100)),
            ]
        );
        assert_eq!(pair.surface(), SurfaceHandle::SwapChainPanel(9));
        pair.teardown();
        assert_eq!(backend.outstanding(), 0);
    }
}
