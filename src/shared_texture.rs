//! 共享纹理桥
//!
//! 纹理创建在显示设备上并导出为操作系统句柄，解码设备通过该句柄打开同一块显存。
//! 两个设备之间只传递句柄，从不传递原生对象指针。

use crate::common::{SharedHandle, TextureDesc};
use crate::error::{PresentError, Result};
use crate::gpu::{release_checked, DecodeDevice, DisplayDevice, GpuResource, TextureResource};
use log::{debug, warn};

/// 显示设备上的规范纹理及其导出的句柄
pub struct SharedTexture<D: DisplayDevice> {
    texture: D::Texture,
    handle: SharedHandle,
    desc: TextureDesc,
}

impl<D: DisplayDevice> SharedTexture<D> {
    pub fn texture(&self) -> &D::Texture {
        &self.texture
    }

    pub fn handle(&self) -> SharedHandle {
        self.handle
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }
}

/// 解码设备通过句柄打开的同一块显存
pub struct SharedTextureView<E: DecodeDevice> {
    texture: E::Texture,
    desc: TextureDesc,
}

impl<E: DecodeDevice> SharedTextureView<E> {
    pub fn texture(&self) -> &E::Texture {
        &self.texture
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }
}

/// 在显示设备上分配共享纹理并导出句柄
pub fn allocate_shared<D: DisplayDevice>(display: &D, desc: TextureDesc) -> Result<SharedTexture<D>> {
    if desc.width == 0 || desc.height == 0 {
        return Err(PresentError::InvalidParameter(format!(
            "shared texture size {}x{} has zero area",
            desc.width, desc.height
        )));
    }
    let texture = display.create_shared_texture(&desc)?;
    let handle = match display.export_shared_handle(&texture) {
        Ok(handle) => handle,
        Err(e) => {
            texture.release();
            return Err(e);
        }
    };
    debug!(
        "shared texture {}x{} {:?} exported as {:?}",
        desc.width, desc.height, desc.format, handle
    );
    Ok(SharedTexture {
        texture,
        handle,
        desc,
    })
}

/// 在解码设备上打开共享句柄，尺寸或格式不一致视为导入失败
pub fn open_on_decode_device<D: DisplayDevice, E: DecodeDevice>(
    decode: &E,
    shared: &SharedTexture<D>,
) -> Result<SharedTextureView<E>> {
    let texture = decode.open_shared_handle(shared.handle)?;
    let desc = texture.desc();
    if desc != shared.desc {
        texture.release();
        return Err(PresentError::HandleImport(format!(
            "imported texture reports {}x{} {:?}, expected {}x{} {:?}",
            desc.width,
            desc.height,
            desc.format,
            shared.desc.width,
            shared.desc.height,
            shared.desc.format
        )));
    }
    Ok(SharedTextureView { texture, desc })
}

/// 同一块显存在两个设备上的两个视图，只能一起分配、一起销毁
pub struct SharedPair<D: DisplayDevice, E: DecodeDevice> {
    shared: SharedTexture<D>,
    view: SharedTextureView<E>,
}

impl<D: DisplayDevice, E: DecodeDevice> SharedPair<D, E> {
    pub fn allocate(display: &D, decode: &E, desc: TextureDesc) -> Result<Self> {
        let shared = allocate_shared(display, desc)?;
        match open_on_decode_device(decode, &shared) {
            Ok(view) => Ok(Self { shared, view }),
            Err(e) => {
                warn!("decode device could not open shared texture: {}", e);
                let SharedTexture {
                    texture, handle, ..
                } = shared;
                texture.release();
                if let Err(close) = display.close_shared_handle(handle) {
                    warn!("failed to close shared handle {:?}: {}", handle, close);
                }
                Err(e)
            }
        }
    }

    pub fn shared(&self) -> &SharedTexture<D> {
        &self.shared
    }

    pub fn view(&self) -> &SharedTextureView<E> {
        &self.view
    }

    pub fn is_consistent(&self) -> bool {
        self.shared.desc == self.view.desc && self.view.texture.desc() == self.shared.texture.desc()
    }

    /// 先释放解码侧视图，再释放显示侧纹理，最后关闭句柄
    pub fn release(self, display: &D) -> Result<()> {
        let SharedPair { shared, view } = self;
        let mut result = release_checked(view.texture, "decode shared texture");
        let handle = shared.handle;
        if let Err(e) = release_checked(shared.texture, "display shared texture") {
            result = result.and(Err(e));
        }
        if let Err(e) = display.close_shared_handle(handle) {
            result = result.and(Err(e));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DeviceOptions, PixelFormat, SurfaceHandle, SurfaceSize};
    use crate::gpu::GpuBackend;
    use crate::platform::mock::{FailurePlan, MockBackend, MockDecode, MockDisplay, ObjectKind};

    fn devices() -> (MockBackend, MockDisplay, MockDecode) {
        let backend = MockBackend::new();
        let (display, swapchain) = backend
            .create_display_device(
                SurfaceHandle::Window(1),
                SurfaceSize::new(16, 16),
                &DeviceOptions::default(),
            )
            .unwrap();
        swapchain.release();
        let decode = backend.create_decode_device(&DeviceOptions::default()).unwrap();
        (backend, display, decode)
    }

    #[test]
    fn test_both_views_share_dimensions() {
        let (backend, display, decode) = devices();
        let desc = TextureDesc::new(800, 600, PixelFormat::Rgba8Unorm);
        let pair = SharedPair::allocate(&display, &decode, desc).unwrap();
        assert_eq!(pair.shared().desc(), desc);
        assert_eq!(pair.view().desc(), desc);
        assert_eq!(pair.view().texture().desc(), pair.shared().texture().desc());
        assert!(pair.is_consistent());
        assert_eq!(backend.open_handles(), 1);

        pair.release(&display).unwrap();
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_import_failure_cleans_up() {
        let (backend, display, decode) = devices();
        backend.set_failures(FailurePlan {
            handle_import: true,
            ..Default::default()
        });
        let desc = TextureDesc::new(64, 64, PixelFormat::Rgba8Unorm);
        let err = SharedPair::allocate(&display, &decode, desc).err().unwrap();
        assert!(matches!(err, PresentError::HandleImport(_)));
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_mismatched_import_is_rejected() {
        let (backend, display, decode) = devices();
        backend.set_failures(FailurePlan {
            mismatched_import: true,
            ..Default::default()
        });
        let desc = TextureDesc::new(64, 64, PixelFormat::Rgba8Unorm);
        let err = SharedPair::allocate(&display, &decode, desc).err().unwrap();
        assert!(matches!(err, PresentError::HandleImport(_)));
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_outstanding_reference_is_reported_as_leak() {
        let (backend, display, decode) = devices();
        let desc = TextureDesc::new(32, 32, PixelFormat::Rgba8Unorm);
        let pair = SharedPair::allocate(&display, &decode, desc).unwrap();
        assert!(backend.hold_extra_reference(ObjectKind::SharedTexture));
        let err = pair.release(&display).err().unwrap();
        assert!(matches!(
            err,
            PresentError::ResourceLeak {
                resource: "display shared texture",
                remaining: 1
            }
        ));
        // 句柄仍然被关闭
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn test_zero_area_rejected() {
        let (_backend, display, _decode) = devices();
        let desc = TextureDesc::new(0, 600, PixelFormat::Rgba8Unorm);
        assert!(matches!(
            allocate_shared(&display, desc),
            Err(PresentError::InvalidParameter(_))
        ));
    }
}
