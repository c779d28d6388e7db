//! Windows 平台功能测试
//!
//! 这些测试需要 Windows 平台和可用的 GPU

#[cfg(windows)]
mod tests {
    use hwpresent::common::{DeviceOptions, PixelFormat, SurfaceHandle, SurfaceSize, TextureDesc};
    use hwpresent::device::DevicePair;
    use hwpresent::gpu::DecodeDevice;
    use hwpresent::platform::win::D3D11Backend;
    use hwpresent::shared_texture::SharedPair;
    use windows::Win32::UI::WindowsAndMessaging::GetDesktopWindow;

    fn desktop() -> SurfaceHandle {
        let hwnd = unsafe { GetDesktopWindow() };
        SurfaceHandle::Window(hwnd.0 as usize)
    }

    /// 测试设备对创建与释放
    #[test]
    #[ignore] // 需要 GPU，默认忽略
    fn test_device_pair_creation() {
        let backend = D3D11Backend::new();
        let pair = DevicePair::create(
            &backend,
            desktop(),
            SurfaceSize::new(256, 256),
            &DeviceOptions::default(),
        );
        match pair {
            Ok(pair) => {
                println!("context handle: {:?}", pair.decode().context_handle());
                pair.teardown();
            }
            Err(e) => println!("Failed to create device pair: {}", e),
        }
    }

    /// 测试共享纹理跨设备打开
    #[test]
    #[ignore] // 需要 GPU，默认忽略
    fn test_shared_texture_round_trip() {
        let backend = D3D11Backend::new();
        let Ok(mut pair) = DevicePair::create(
            &backend,
            desktop(),
            SurfaceSize::new(256, 256),
            &DeviceOptions::default(),
        ) else {
            println!("no hardware device available");
            return;
        };

        let desc = TextureDesc::new(800, 600, PixelFormat::Rgba8Unorm);
        let shared = SharedPair::allocate(pair.display(), pair.decode(), desc).unwrap();
        assert!(shared.is_consistent());
        shared.release(pair.display()).unwrap();

        let (_, swapchain) = pair.display_and_swapchain();
        assert!(swapchain.is_some());
        pair.teardown();
    }

    /// 测试上下文引用计数
    #[test]
    #[ignore] // 需要 GPU，默认忽略
    fn test_context_retain_release() {
        let backend = D3D11Backend::new();
        let Ok(decode) =
            hwpresent::GpuBackend::create_decode_device(&backend, &DeviceOptions::default())
        else {
            return;
        };
        let retained = decode.retain_context();
        assert_eq!(decode.release_context(), retained - 1);
        decode.shutdown();
    }
}
