//! 进程内参考驱动
//!
//! 按 COM 语义维护引用计数（视图持有父资源、上下文绑定持有视图），
//! 通过共享句柄表让解码设备打开显示设备的纹理内存，并用一个简单的
//! 软件光栅化器执行 DrawIndexed，便于在没有 GPU 的环境中验证管线行为。

use crate::common::{
    ClearColor, ContextHandle, DeviceOptions, SharedHandle, SurfaceHandle, SurfaceSize,
    TextureDesc, Vertex, Viewport,
};
use crate::error::{PresentError, Result};
use crate::gpu::{DecodeDevice, DisplayDevice, GpuBackend, GpuResource, TextureResource};
use crate::shader::ShaderSource;
use log::{error, trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Display,
    Decode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Swapchain,
    SharedTexture,
    OpenedTexture,
    ShaderView,
    TargetView,
    Program,
    Buffer,
    Sampler,
}

/// 驱动调用日志
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateDevice(Role),
    EnableMultithread,
    CreateSwapchain(SurfaceHandle, SurfaceSize),
    ResizeSwapchain(SurfaceSize),
    ReleaseSwapchain,
    Present { sync_interval: u32 },
    Clear(Role, [u8; 4]),
    Draw { index_count: u32 },
    CloseHandle(SharedHandle),
    Trim,
    ReleaseContext(Role),
    ReleaseDevice(Role),
    /// 设备关闭时仍有子对象存活
    LiveAtShutdown(Role, usize),
}

/// 故障注入
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePlan {
    pub display_device: bool,
    pub decode_device: bool,
    pub shader_compile: bool,
    pub handle_import: bool,
    /// 打开共享句柄得到的纹理报告错误的高度
    pub mismatched_import: bool,
    pub present: bool,
    pub resize: bool,
}

/// RGBA8 像素缓冲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pixels: Vec<[u8; 4]>,
}

impl Image {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0, 0, 0, 0]; width as usize * height as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    fn fill(&mut self, color: [u8; 4]) {
        self.pixels.iter_mut().for_each(|p| *p = color);
    }

    fn set(&mut self, x: u32, y: u32, color: [u8; 4]) {
        let index = (y * self.width + x) as usize;
        if let Some(p) = self.pixels.get_mut(index) {
            *p = color;
        }
    }

    /// 最近点采样，坐标超出范围时钳制到边缘
    fn sample(&self, u: f32, v: f32) -> [u8; 4] {
        if self.width == 0 || self.height == 0 {
            return [0, 0, 0, 0];
        }
        let x = ((u * self.width as f32) as i64).clamp(0, self.width as i64 - 1) as u32;
        let y = ((v * self.height as f32) as i64).clamp(0, self.height as i64 - 1) as u32;
        self.pixel(x, y).unwrap_or_default()
    }
}

type SharedImage = Arc<Mutex<Image>>;

fn lock_image(image: &SharedImage) -> MutexGuard<'_, Image> {
    image.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Payload {
    Empty,
    Image(SharedImage, TextureDesc),
    Vertices(Vec<Vertex>),
    Indices(Vec<u16>),
}

struct Entry {
    role: Role,
    kind: ObjectKind,
    refs: u32,
    parent: Option<u64>,
    payload: Payload,
}

#[derive(Default)]
struct DisplayBindings {
    target: Option<u64>,
    shader_view: Option<u64>,
    program: Option<u64>,
    vertices: Option<u64>,
    indices: Option<u64>,
    sampler: Option<u64>,
    viewport: Viewport,
}

#[derive(Default)]
struct DriverState {
    next_id: u64,
    objects: HashMap<u64, Entry>,
    handles: HashMap<SharedHandle, (SharedImage, TextureDesc)>,
    events: Vec<Event>,
    failures: FailurePlan,
    allocations: usize,
    multithread_protected: bool,
    unprotected_calls: usize,
    incomplete_draws: usize,
    live_at_shutdown: usize,
    display: DisplayBindings,
    decode_target: Option<u64>,
    context_refs: u32,
    presented: Option<Image>,
}

impl DriverState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create(&mut self, kind: ObjectKind, parent: Option<u64>, payload: Payload) -> u64 {
        self.create_for(Role::Display, kind, parent, payload)
    }

    fn create_for(&mut self, role: Role, kind: ObjectKind, parent: Option<u64>, payload: Payload) -> u64 {
        let id = self.next_id();
        if let Some(parent) = parent {
            self.add_ref(parent);
        }
        self.objects.insert(
            id,
            Entry {
                role,
                kind,
                refs: 1,
                parent,
                payload,
            },
        );
        self.allocations += 1;
        trace!("mock: created {:?} #{}", kind, id);
        id
    }

    fn add_ref(&mut self, id: u64) {
        if let Some(entry) = self.objects.get_mut(&id) {
            entry.refs += 1;
        }
    }

    fn release(&mut self, id: u64) -> u32 {
        let (remaining, parent) = match self.objects.get_mut(&id) {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                (entry.refs, entry.parent)
            }
            None => {
                warn!("mock: release of unknown object #{}", id);
                return 0;
            }
        };
        if remaining == 0 {
            if let Some(entry) = self.objects.remove(&id) {
                trace!("mock: destroyed {:?} #{}", entry.kind, id);
                if entry.kind == ObjectKind::Swapchain {
                    self.events.push(Event::ReleaseSwapchain);
                }
            }
            if let Some(parent) = parent {
                self.release(parent);
            }
        }
        remaining
    }

    /// 替换一个绑定槽位：新对象加引用，旧对象减引用
    fn rebind(&mut self, slot: Option<u64>, new: Option<u64>) -> Option<u64> {
        if let Some(id) = new {
            self.add_ref(id);
        }
        if let Some(old) = slot {
            self.release(old);
        }
        new
    }

    fn image_of(&self, id: u64) -> Option<(SharedImage, TextureDesc)> {
        match self.objects.get(&id).map(|e| &e.payload) {
            Some(Payload::Image(image, desc)) => Some((image.clone(), *desc)),
            _ => None,
        }
    }

    /// 设备关闭时检查该设备创建的对象是否都已释放
    fn check_shutdown(&mut self, role: Role) {
        let live = self.objects.values().filter(|e| e.role == role).count();
        if live > 0 {
            error!("mock: {:?} device shut down with {} live objects", role, live);
            self.live_at_shutdown += live;
            self.events.push(Event::LiveAtShutdown(role, live));
        }
    }

    fn display_call(&mut self) {
        if !self.multithread_protected {
            self.unprotected_calls += 1;
        }
    }

    fn unbind_display(&mut self) {
        let slots = std::mem::take(&mut self.display);
        for id in [
            slots.target,
            slots.shader_view,
            slots.program,
            slots.vertices,
            slots.indices,
            slots.sampler,
        ]
        .into_iter()
        .flatten()
        {
            self.release(id);
        }
    }

    fn draw(&mut self, index_count: u32) {
        let bindings = &self.display;
        let (Some(target), Some(view), Some(vb), Some(ib)) = (
            bindings.target,
            bindings.shader_view,
            bindings.vertices,
            bindings.indices,
        ) else {
            warn!("mock: draw with incomplete pipeline bindings");
            self.incomplete_draws += 1;
            return;
        };
        let viewport = bindings.viewport;
        let vertices = match self.objects.get(&vb).map(|e| &e.payload) {
            Some(Payload::Vertices(v)) => v.clone(),
            _ => return,
        };
        let indices = match self.objects.get(&ib).map(|e| &e.payload) {
            Some(Payload::Indices(i)) => i.clone(),
            _ => return,
        };
        let (Some((dst, _)), Some((src, _))) = (self.image_of(target), self.image_of(view)) else {
            return;
        };
        if Arc::ptr_eq(&dst, &src) {
            warn!("mock: shader view and render target alias the same image");
            return;
        }
        let src = lock_image(&src);
        let mut dst = lock_image(&dst);
        let count = (index_count as usize).min(indices.len());
        for tri in indices[..count].chunks_exact(3) {
            let corners: Option<Vec<Vertex>> =
                tri.iter().map(|&i| vertices.get(i as usize).copied()).collect();
            if let Some(corners) = corners {
                rasterize(&mut dst, &src, &viewport, [corners[0], corners[1], corners[2]]);
            }
        }
    }
}

fn to_screen(v: &Vertex, viewport: &Viewport) -> (f32, f32) {
    (
        viewport.x + (v.position[0] + 1.0) * 0.5 * viewport.width,
        viewport.y + (1.0 - v.position[1]) * 0.5 * viewport.height,
    )
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn rasterize(dst: &mut Image, src: &Image, viewport: &Viewport, tri: [Vertex; 3]) {
    let p = [
        to_screen(&tri[0], viewport),
        to_screen(&tri[1], viewport),
        to_screen(&tri[2], viewport),
    ];
    let area = edge(p[0], p[1], p[2]);
    if area.abs() < f32::EPSILON {
        return;
    }
    let min_x = p.iter().map(|q| q.0).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
    let max_x = p.iter().map(|q| q.0).fold(f32::MIN, f32::max).ceil().max(0.0) as u32;
    let min_y = p.iter().map(|q| q.1).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
    let max_y = p.iter().map(|q| q.1).fold(f32::MIN, f32::max).ceil().max(0.0) as u32;

    for y in min_y..max_y.min(dst.height) {
        for x in min_x..max_x.min(dst.width) {
            let center = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(p[1], p[2], center) / area;
            let w1 = edge(p[2], p[0], center) / area;
            let w2 = edge(p[0], p[1], center) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let u = w0 * tri[0].texcoord[0] + w1 * tri[1].texcoord[0] + w2 * tri[2].texcoord[0];
            let v = w0 * tri[0].texcoord[1] + w1 * tri[1].texcoord[1] + w2 * tri[2].texcoord[1];
            dst.set(x, y, src.sample(u, v));
        }
    }
}

#[derive(Default)]
struct Driver {
    state: Mutex<DriverState>,
}

impl Driver {
    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 参考驱动里的任意 GPU 对象
pub struct MockObject {
    id: u64,
    driver: Arc<Driver>,
}

impl MockObject {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for MockObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockObject").field("id", &self.id).finish()
    }
}

impl GpuResource for MockObject {
    fn release(self) -> u32 {
        self.driver.lock().release(self.id)
    }
}

impl TextureResource for MockObject {
    fn desc(&self) -> TextureDesc {
        self.driver
            .lock()
            .image_of(self.id)
            .map(|(_, desc)| desc)
            .unwrap_or_default()
    }
}

/// 参考驱动的设备工厂，克隆后共享同一份驱动状态
#[derive(Clone, Default)]
pub struct MockBackend {
    driver: Arc<Driver>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failures(&self, failures: FailurePlan) {
        self.driver.lock().failures = failures;
    }

    pub fn events(&self) -> Vec<Event> {
        self.driver.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.driver.lock().events.clear();
    }

    /// 仍然存活的 GPU 对象数
    pub fn outstanding(&self) -> usize {
        self.driver.lock().objects.len()
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.driver
            .lock()
            .objects
            .values()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// 累计创建过的对象数
    pub fn allocations(&self) -> usize {
        self.driver.lock().allocations
    }

    pub fn open_handles(&self) -> usize {
        self.driver.lock().handles.len()
    }

    pub fn context_refs(&self) -> u32 {
        self.driver.lock().context_refs
    }

    pub fn multithread_protected(&self) -> bool {
        self.driver.lock().multithread_protected
    }

    /// 多线程保护打开之前发生的上下文调用次数
    pub fn unprotected_calls(&self) -> usize {
        self.driver.lock().unprotected_calls
    }

    /// 缺少渲染目标或输入绑定而没有产生像素的绘制次数
    pub fn incomplete_draws(&self) -> usize {
        self.driver.lock().incomplete_draws
    }

    /// 设备关闭时仍然存活的对象总数
    pub fn live_at_shutdown(&self) -> usize {
        self.driver.lock().live_at_shutdown
    }

    pub fn last_presented(&self) -> Option<Image> {
        self.driver.lock().presented.clone()
    }

    /// 模拟外部持有者：给第一个指定类型的存活对象多加一个引用
    pub fn hold_extra_reference(&self, kind: ObjectKind) -> bool {
        let mut state = self.driver.lock();
        let id = state
            .objects
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(id, _)| *id)
            .min();
        match id {
            Some(id) => {
                state.add_ref(id);
                true
            }
            None => false,
        }
    }

    fn object(&self, id: u64) -> MockObject {
        MockObject {
            id,
            driver: self.driver.clone(),
        }
    }
}

impl GpuBackend for MockBackend {
    type Display = MockDisplay;
    type Decode = MockDecode;

    fn create_display_device(
        &self,
        surface: SurfaceHandle,
        size: SurfaceSize,
        _options: &DeviceOptions,
    ) -> Result<(MockDisplay, MockObject)> {
        let mut state = self.driver.lock();
        if state.failures.display_device {
            return Err(PresentError::DeviceCreation(
                "no hardware adapter supports feature level 11_0".to_string(),
            ));
        }
        state.multithread_protected = false;
        state.display = DisplayBindings::default();
        state.events.push(Event::CreateDevice(Role::Display));
        let swapchain = create_swapchain(&mut state, surface, size);
        drop(state);
        let display = MockDisplay {
            backend: self.clone(),
        };
        Ok((display, self.object(swapchain)))
    }

    fn create_decode_device(&self, _options: &DeviceOptions) -> Result<MockDecode> {
        let mut state = self.driver.lock();
        if state.failures.decode_device {
            return Err(PresentError::DeviceCreation(
                "video decode capability unavailable".to_string(),
            ));
        }
        state.context_refs = 1;
        state.decode_target = None;
        state.events.push(Event::CreateDevice(Role::Decode));
        let context = state.next_id();
        Ok(MockDecode {
            backend: self.clone(),
            context,
        })
    }
}

fn create_swapchain(state: &mut DriverState, surface: SurfaceHandle, size: SurfaceSize) -> u64 {
    state.events.push(Event::CreateSwapchain(surface, size));
    let desc = TextureDesc::new(size.width, size.height, Default::default());
    let image = Arc::new(Mutex::new(Image::new(size.width, size.height)));
    state.create(ObjectKind::Swapchain, None, Payload::Image(image, desc))
}

pub struct MockDisplay {
    backend: MockBackend,
}

impl DisplayDevice for MockDisplay {
    type Swapchain = MockObject;
    type Texture = MockObject;
    type ShaderView = MockObject;
    type TargetView = MockObject;
    type Program = MockObject;
    type Buffer = MockObject;
    type Sampler = MockObject;

    fn enable_multithread_protection(&self) -> Result<()> {
        let mut state = self.backend.driver.lock();
        state.multithread_protected = true;
        state.events.push(Event::EnableMultithread);
        Ok(())
    }

    fn create_swapchain(&self, surface: SurfaceHandle, size: SurfaceSize) -> Result<MockObject> {
        let id = create_swapchain(&mut self.backend.driver.lock(), surface, size);
        Ok(self.backend.object(id))
    }

    fn resize_swapchain(&self, swapchain: &mut MockObject, size: SurfaceSize) -> Result<()> {
        let mut state = self.backend.driver.lock();
        state.display_call();
        if state.failures.resize {
            return Err(PresentError::gpu("ResizeBuffers", "DXGI_ERROR_INVALID_CALL"));
        }
        let entry = state
            .objects
            .get_mut(&swapchain.id)
            .ok_or_else(|| PresentError::gpu("ResizeBuffers", "unknown swapchain"))?;
        if entry.refs > 1 {
            return Err(PresentError::gpu(
                "ResizeBuffers",
                "back buffer references are still outstanding",
            ));
        }
        let desc = TextureDesc::new(size.width, size.height, Default::default());
        entry.payload = Payload::Image(Arc::new(Mutex::new(Image::new(size.width, size.height))), desc);
        state.events.push(Event::ResizeSwapchain(size));
        Ok(())
    }

    fn back_buffer_view(&self, swapchain: &MockObject) -> Result<MockObject> {
        let mut state = self.backend.driver.lock();
        let (image, desc) = state
            .image_of(swapchain.id)
            .ok_or_else(|| PresentError::gpu("GetBuffer", "unknown swapchain"))?;
        let id = state.create(
            ObjectKind::TargetView,
            Some(swapchain.id),
            Payload::Image(image, desc),
        );
        Ok(self.backend.object(id))
    }

    fn present(&self, swapchain: &MockObject, sync_interval: u32) -> Result<()> {
        let mut state = self.backend.driver.lock();
        state.display_call();
        if state.failures.present {
            return Err(PresentError::gpu("Present", "DXGI_ERROR_DEVICE_REMOVED"));
        }
        let (image, _) = state
            .image_of(swapchain.id)
            .ok_or_else(|| PresentError::gpu("Present", "unknown swapchain"))?;
        let frame = lock_image(&image).clone();
        state.presented = Some(frame);
        state.events.push(Event::Present { sync_interval });
        // 翻转模型：Present 之后后备缓冲区不再绑定在输出合并阶段
        let target = state.display.target.take();
        state.rebind(target, None);
        Ok(())
    }

    fn compile_program(&self, source: &ShaderSource) -> Result<MockObject> {
        let mut state = self.backend.driver.lock();
        for entry in [source.vertex_entry, source.pixel_entry] {
            if state.failures.shader_compile || !source.source.contains(&format!("{}(", entry)) {
                return Err(PresentError::ShaderCompile {
                    entry_point: entry.to_string(),
                    diagnostics: format!("error X3501: '{}': entrypoint not found", entry),
                });
            }
        }
        let id = state.create(ObjectKind::Program, None, Payload::Empty);
        Ok(self.backend.object(id))
    }

    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> Result<MockObject> {
        let id = self.backend.driver.lock().create(
            ObjectKind::Buffer,
            None,
            Payload::Vertices(vertices.to_vec()),
        );
        Ok(self.backend.object(id))
    }

    fn create_index_buffer(&self, indices: &[u16]) -> Result<MockObject> {
        let id = self.backend.driver.lock().create(
            ObjectKind::Buffer,
            None,
            Payload::Indices(indices.to_vec()),
        );
        Ok(self.backend.object(id))
    }

    fn create_sampler(&self) -> Result<MockObject> {
        let id = self
            .backend
            .driver
            .lock()
            .create(ObjectKind::Sampler, None, Payload::Empty);
        Ok(self.backend.object(id))
    }

    fn bind_pipeline(
        &self,
        program: &MockObject,
        vertices: &MockObject,
        indices: &MockObject,
        sampler: &MockObject,
    ) {
        let mut guard = self.backend.driver.lock();
        let state = &mut *guard;
        state.display_call();
        let old = state.display.program;
        state.display.program = state.rebind(old, Some(program.id));
        let old = state.display.vertices;
        state.display.vertices = state.rebind(old, Some(vertices.id));
        let old = state.display.indices;
        state.display.indices = state.rebind(old, Some(indices.id));
        let old = state.display.sampler;
        state.display.sampler = state.rebind(old, Some(sampler.id));
    }

    fn create_shared_texture(&self, desc: &TextureDesc) -> Result<MockObject> {
        let image = Arc::new(Mutex::new(Image::new(desc.width, desc.height)));
        let id = self.backend.driver.lock().create(
            ObjectKind::SharedTexture,
            None,
            Payload::Image(image, *desc),
        );
        Ok(self.backend.object(id))
    }

    fn export_shared_handle(&self, texture: &MockObject) -> Result<SharedHandle> {
        let mut state = self.backend.driver.lock();
        let (image, desc) = state
            .image_of(texture.id)
            .ok_or_else(|| PresentError::gpu("CreateSharedHandle", "unknown texture"))?;
        let handle = SharedHandle(state.next_id() as usize);
        state.handles.insert(handle, (image, desc));
        Ok(handle)
    }

    fn close_shared_handle(&self, handle: SharedHandle) -> Result<()> {
        let mut state = self.backend.driver.lock();
        if state.handles.remove(&handle).is_none() {
            return Err(PresentError::gpu("CloseHandle", "invalid handle"));
        }
        state.events.push(Event::CloseHandle(handle));
        Ok(())
    }

    fn create_shader_view(&self, texture: &MockObject) -> Result<MockObject> {
        let mut state = self.backend.driver.lock();
        let (image, desc) = state
            .image_of(texture.id)
            .ok_or_else(|| PresentError::gpu("CreateShaderResourceView", "unknown texture"))?;
        let id = state.create(
            ObjectKind::ShaderView,
            Some(texture.id),
            Payload::Image(image, desc),
        );
        Ok(self.backend.object(id))
    }

    fn bind_shader_view(&self, view: Option<&MockObject>) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        let old = state.display.shader_view;
        state.display.shader_view = state.rebind(old, view.map(|v| v.id));
    }

    fn bind_target(&self, view: Option<&MockObject>) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        let old = state.display.target;
        state.display.target = state.rebind(old, view.map(|v| v.id));
    }

    fn set_viewport(&self, viewport: Viewport) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        state.display.viewport = viewport;
    }

    fn clear_target(&self, view: &MockObject, color: ClearColor) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        let rgba = color.to_rgba8();
        if let Some((image, _)) = state.image_of(view.id) {
            lock_image(&image).fill(rgba);
        }
        state.events.push(Event::Clear(Role::Display, rgba));
    }

    fn draw_indexed(&self, index_count: u32) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        state.draw(index_count);
        state.events.push(Event::Draw { index_count });
    }

    fn clear_state(&self) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        state.unbind_display();
    }

    fn trim(&self) -> Result<()> {
        self.backend.driver.lock().events.push(Event::Trim);
        Ok(())
    }

    fn shutdown(self) {
        let mut state = self.backend.driver.lock();
        state.unbind_display();
        state.check_shutdown(Role::Display);
        state.multithread_protected = false;
        state.events.push(Event::ReleaseContext(Role::Display));
        state.events.push(Event::ReleaseDevice(Role::Display));
    }
}

pub struct MockDecode {
    backend: MockBackend,
    context: u64,
}

impl DecodeDevice for MockDecode {
    type Texture = MockObject;
    type TargetView = MockObject;

    fn open_shared_handle(&self, handle: SharedHandle) -> Result<MockObject> {
        let mut state = self.backend.driver.lock();
        if state.failures.handle_import {
            return Err(PresentError::HandleImport(
                "OpenSharedResource1: E_INVALIDARG".to_string(),
            ));
        }
        let (image, mut desc) = state
            .handles
            .get(&handle)
            .cloned()
            .ok_or_else(|| PresentError::HandleImport(format!("unknown handle {:?}", handle)))?;
        if state.failures.mismatched_import {
            desc.height /= 2;
        }
        let id = state.create_for(Role::Decode, ObjectKind::OpenedTexture, None, Payload::Image(image, desc));
        Ok(self.backend.object(id))
    }

    fn create_target_view(&self, texture: &MockObject) -> Result<MockObject> {
        let mut state = self.backend.driver.lock();
        let (image, desc) = state
            .image_of(texture.id)
            .ok_or_else(|| PresentError::gpu("CreateRenderTargetView", "unknown texture"))?;
        let id = state.create_for(
            Role::Decode,
            ObjectKind::TargetView,
            Some(texture.id),
            Payload::Image(image, desc),
        );
        Ok(self.backend.object(id))
    }

    fn bind_target(&self, view: Option<&MockObject>) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        let old = state.decode_target;
        state.decode_target = state.rebind(old, view.map(|v| v.id));
    }

    fn clear_target(&self, view: &MockObject, color: ClearColor) {
        let mut state = self.backend.driver.lock();
        state.display_call();
        let rgba = color.to_rgba8();
        if let Some((image, _)) = state.image_of(view.id) {
            lock_image(&image).fill(rgba);
        }
        state.events.push(Event::Clear(Role::Decode, rgba));
    }

    fn flush(&self) {
        self.backend.driver.lock().display_call();
    }

    fn context_handle(&self) -> ContextHandle {
        ContextHandle(self.context as usize)
    }

    fn retain_context(&self) -> u32 {
        let mut state = self.backend.driver.lock();
        state.context_refs += 1;
        state.context_refs
    }

    fn release_context(&self) -> u32 {
        let mut state = self.backend.driver.lock();
        state.context_refs = state.context_refs.saturating_sub(1);
        state.context_refs
    }

    fn shutdown(self) {
        let mut state = self.backend.driver.lock();
        let target = state.decode_target.take();
        state.rebind(target, None);
        state.check_shutdown(Role::Decode);
        if state.context_refs > 1 {
            warn!(
                "mock: decode context still has {} external references at shutdown",
                state.context_refs - 1
            );
        }
        state.context_refs = 0;
        state.events.push(Event::ReleaseContext(Role::Decode));
        state.events.push(Event::ReleaseDevice(Role::Decode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::release_checked;

    fn display() -> (MockBackend, MockDisplay, MockObject) {
        let backend = MockBackend::new();
        let (display, swapchain) = backend
            .create_display_device(
                SurfaceHandle::Window(1),
                SurfaceSize::new(64, 32),
                &DeviceOptions::default(),
            )
            .unwrap();
        display.enable_multithread_protection().unwrap();
        (backend, display, swapchain)
    }

    #[test]
    fn test_view_keeps_parent_alive() {
        let (backend, display, swapchain) = display();
        let desc = TextureDesc::new(8, 8, Default::default());
        let texture = display.create_shared_texture(&desc).unwrap();
        let view = display.create_shader_view(&texture).unwrap();
        assert_eq!(texture.release(), 1);
        assert_eq!(backend.live(ObjectKind::SharedTexture), 1);
        assert_eq!(view.release(), 0);
        assert_eq!(backend.live(ObjectKind::SharedTexture), 0);
        release_checked(swapchain, "swapchain").unwrap();
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_binding_holds_reference() {
        let (_backend, display, swapchain) = display();
        let target = display.back_buffer_view(&swapchain).unwrap();
        display.bind_target(Some(&target));
        let id = target.id();
        assert_eq!(target.release(), 1);
        display.bind_target(None);
        let leftover = MockObject {
            id,
            driver: display.backend.driver.clone(),
        };
        assert_eq!(leftover.release(), 0);
        assert_eq!(swapchain.release(), 0);
    }

    #[test]
    fn test_resize_refused_while_back_buffer_referenced() {
        let (_backend, display, mut swapchain) = display();
        let target = display.back_buffer_view(&swapchain).unwrap();
        assert!(display
            .resize_swapchain(&mut swapchain, SurfaceSize::new(10, 10))
            .is_err());
        target.release();
        display
            .resize_swapchain(&mut swapchain, SurfaceSize::new(10, 10))
            .unwrap();
        assert_eq!(swapchain.desc().size(), SurfaceSize::new(10, 10));
        swapchain.release();
    }

    #[test]
    fn test_shared_handle_aliases_memory() {
        let (backend, display, swapchain) = display();
        let decode = backend.create_decode_device(&DeviceOptions::default()).unwrap();
        let desc = TextureDesc::new(4, 4, Default::default());
        let texture = display.create_shared_texture(&desc).unwrap();
        let handle = display.export_shared_handle(&texture).unwrap();
        let opened = decode.open_shared_handle(handle).unwrap();
        assert_eq!(opened.desc(), desc);

        let target = decode.create_target_view(&opened).unwrap();
        decode.clear_target(&target, ClearColor::DIAGNOSTIC_BACK_BUFFER);
        let (image, _) = backend.driver.lock().image_of(texture.id()).unwrap();
        assert_eq!(lock_image(&image).pixel(3, 3), Some([255, 128, 0, 255]));

        target.release();
        opened.release();
        texture.release();
        display.close_shared_handle(handle).unwrap();
        assert!(display.close_shared_handle(handle).is_err());
        swapchain.release();
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_present_unbinds_back_buffer() {
        let (backend, display, swapchain) = display();
        let target = display.back_buffer_view(&swapchain).unwrap();
        display.bind_target(Some(&target));
        display.present(&swapchain, 0).unwrap();
        // 绑定持有的引用在 Present 后归还
        assert_eq!(target.release(), 0);
        display.draw_indexed(6);
        assert_eq!(backend.incomplete_draws(), 1);
        swapchain.release();
    }

    #[test]
    fn test_shutdown_reports_live_children() {
        let (backend, display, swapchain) = display();
        let sampler = display.create_sampler().unwrap();
        swapchain.release();
        display.shutdown();
        assert_eq!(backend.live_at_shutdown(), 1);
        assert!(backend
            .events()
            .contains(&Event::LiveAtShutdown(Role::Display, 1)));
        sampler.release();
    }

    #[test]
    fn test_rasterizer_fills_full_screen_triangle_pair() {
        let mut dst = Image::new(4, 4);
        let mut src = Image::new(1, 1);
        src.fill([9, 9, 9, 255]);
        let v = |x: f32, y: f32| Vertex {
            position: [x, y, 0.0],
            texcoord: [0.0, 0.0],
        };
        let viewport = Viewport::full(SurfaceSize::new(4, 4));
        rasterize(&mut dst, &src, &viewport, [v(-1.0, -1.0), v(1.0, -1.0), v(1.0, 1.0)]);
        rasterize(&mut dst, &src, &viewport, [v(-1.0, -1.0), v(1.0, 1.0), v(-1.0, 1.0)]);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(dst.pixel(x, y), Some([9, 9, 9, 255]));
            }
        }
    }
}
