//! 端到端呈现流程测试，使用进程内参考驱动

use hwpresent::common::ClearColor;
use hwpresent::platform::mock::{Event, MockBackend, ObjectKind, Role};
use hwpresent::{
    MediaPlayer, OutputCallbacks, PresentConfig, PresentError, RenderConfig, SurfaceHandle,
    SurfaceMetrics, SurfaceSize, VideoView,
};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 模拟播放器：注册时调用 setup，解除注册时调用 cleanup
#[derive(Default)]
struct FakePlayer {
    callbacks: Mutex<Option<Arc<dyn OutputCallbacks>>>,
}

impl FakePlayer {
    fn callbacks(&self) -> Arc<dyn OutputCallbacks> {
        self.callbacks
            .lock()
            .unwrap()
            .clone()
            .expect("player has no output callbacks")
    }

    fn is_attached(&self) -> bool {
        self.callbacks.lock().unwrap().is_some()
    }
}

impl MediaPlayer for FakePlayer {
    fn set_output_callbacks(&self, callbacks: Option<Arc<dyn OutputCallbacks>>) {
        let old = {
            let mut slot = self.callbacks.lock().unwrap();
            std::mem::replace(&mut *slot, callbacks.clone())
        };
        if let Some(old) = old {
            old.cleanup();
        }
        if let Some(new) = callbacks {
            new.setup().unwrap();
        }
    }
}

fn loaded_view(config: PresentConfig, width: f64, height: f64) -> (MockBackend, VideoView<MockBackend>) {
    init_logger();
    let backend = MockBackend::new();
    let mut view = VideoView::new(backend.clone(), config);
    view.apply_surface(SurfaceHandle::SwapChainPanel(0x1000)).unwrap();
    view.on_size_changed(SurfaceMetrics::new(width, height)).unwrap();
    assert!(view.is_loaded());
    (backend, view)
}

#[test]
fn test_composited_frame_matches_quad_bounds() {
    let config = PresentConfig {
        diagnostic_clear: true,
        ..Default::default()
    };
    let (backend, mut view) = loaded_view(config, 1920.0, 1080.0);
    let player = Arc::new(FakePlayer::default());
    view.set_media_player(Some(player.clone()));
    let callbacks = player.callbacks();

    callbacks.update_output(&RenderConfig::new(1920, 1080)).unwrap();
    // 第二帧在前一次 Present 解绑后备缓冲区之后绘制
    for _ in 0..2 {
        callbacks.frame_boundary(true).unwrap();
        callbacks.frame_boundary(false).unwrap();
        callbacks.present().unwrap();
    }
    assert_eq!(backend.incomplete_draws(), 0);

    let frame = backend.last_presented().unwrap();
    assert_eq!((frame.width, frame.height), (1920, 1080));

    let decode = ClearColor::DIAGNOSTIC_DECODE.to_rgba8();
    let back = ClearColor::DIAGNOSTIC_BACK_BUFFER.to_rgba8();

    // NDC x ∈ [-0.95, 0.85] 对应像素 [48, 1776)，y ∈ [-0.90, 0.95] 对应像素 [27, 1026)
    for (x, y) in [(960, 540), (50, 30), (1770, 30), (50, 1020), (1770, 1020)] {
        assert_eq!(frame.pixel(x, y), Some(decode), "inside at ({x}, {y})");
    }
    for (x, y) in [(10, 540), (1900, 540), (960, 10), (960, 1070), (0, 0), (1919, 1079)] {
        assert_eq!(frame.pixel(x, y), Some(back), "outside at ({x}, {y})");
    }

    let events = backend.events();
    assert!(events.contains(&Event::Clear(Role::Decode, decode)));
    assert!(events.contains(&Event::Draw { index_count: 6 }));
    assert!(events.contains(&Event::Present { sync_interval: 0 }));
}

#[test]
fn test_default_clear_color_is_black() {
    let (backend, mut view) = loaded_view(PresentConfig::default(), 64.0, 64.0);
    let player = Arc::new(FakePlayer::default());
    view.set_media_player(Some(player.clone()));
    let callbacks = player.callbacks();
    callbacks.update_output(&RenderConfig::new(32, 32)).unwrap();
    callbacks.frame_boundary(true).unwrap();
    callbacks.frame_boundary(false).unwrap();
    callbacks.present().unwrap();
    let frame = backend.last_presented().unwrap();
    assert_eq!(frame.pixel(0, 0), Some([0, 0, 0, 255]));
    assert_eq!(frame.pixel(32, 32), Some([0, 0, 0, 255]));
}

#[test]
fn test_output_update_sizes_both_views() {
    let (_backend, mut view) = loaded_view(PresentConfig::default(), 640.0, 480.0);
    let player = Arc::new(FakePlayer::default());
    view.set_media_player(Some(player.clone()));
    let output = player
        .callbacks()
        .update_output(&RenderConfig::new(800, 600))
        .unwrap();
    assert!(output.full_range);

    let state = view.state();
    let state = state.lock().unwrap();
    let (shared, opened) = state.targets().dimensions().unwrap();
    assert_eq!(shared.size(), SurfaceSize::new(800, 600));
    assert_eq!(opened.size(), SurfaceSize::new(800, 600));
}

#[test]
fn test_player_swap_leaves_single_context_retain() {
    let (backend, mut view) = loaded_view(PresentConfig::default(), 320.0, 240.0);
    let first = Arc::new(FakePlayer::default());
    view.set_media_player(Some(first.clone()));
    assert_eq!(backend.context_refs(), 2);

    view.set_media_player(None);
    assert!(!first.is_attached());
    assert_eq!(backend.context_refs(), 1);

    let second = Arc::new(FakePlayer::default());
    view.set_media_player(Some(second.clone()));
    assert!(second.is_attached());
    assert_eq!(backend.context_refs(), 2);
}

#[test]
fn test_select_plane_in_every_state() {
    init_logger();
    let backend = MockBackend::new();
    let mut view = VideoView::new(backend.clone(), PresentConfig::default());
    let adapter = hwpresent::CallbackAdapter::new(view.state());
    assert!(adapter.select_plane(0));
    assert!(!adapter.select_plane(1));

    view.apply_surface(SurfaceHandle::Window(1)).unwrap();
    view.on_size_changed(SurfaceMetrics::new(100.0, 100.0)).unwrap();
    assert!(adapter.select_plane(0));
    assert!(!adapter.select_plane(1));

    view.on_unloaded().unwrap();
    assert!(adapter.select_plane(0));
    assert!(!adapter.select_plane(1));
}

#[test]
fn test_repeated_resize_allocates_nothing() {
    let (backend, mut view) = loaded_view(PresentConfig::default(), 320.0, 240.0);
    view.on_size_changed(SurfaceMetrics::new(640.0, 360.0)).unwrap();
    let allocations = backend.allocations();
    view.on_size_changed(SurfaceMetrics::new(640.0, 360.0)).unwrap();
    assert_eq!(backend.allocations(), allocations);
}

#[test]
fn test_frames_before_output_configuration_are_not_ready() {
    let (_backend, mut view) = loaded_view(PresentConfig::default(), 320.0, 240.0);
    let player = Arc::new(FakePlayer::default());
    view.set_media_player(Some(player.clone()));
    let callbacks = player.callbacks();
    assert!(matches!(callbacks.frame_boundary(false), Err(PresentError::NotReady)));
}

#[test]
fn test_unload_releases_every_resource() {
    let (backend, mut view) = loaded_view(PresentConfig::default(), 320.0, 240.0);
    let player = Arc::new(FakePlayer::default());
    view.set_media_player(Some(player.clone()));
    let callbacks = player.callbacks();
    callbacks.update_output(&RenderConfig::new(320, 240)).unwrap();
    callbacks.frame_boundary(true).unwrap();
    callbacks.frame_boundary(false).unwrap();
    callbacks.present().unwrap();

    view.on_unloaded().unwrap();
    assert!(!player.is_attached());
    assert_eq!(backend.outstanding(), 0);
    assert_eq!(backend.open_handles(), 0);
    assert_eq!(backend.live_at_shutdown(), 0);
    assert!(matches!(callbacks.present(), Err(PresentError::NotReady)));

    // 重新加载后播放器再次注册
    view.on_size_changed(SurfaceMetrics::new(320.0, 240.0)).unwrap();
    assert!(view.is_loaded());
    assert!(player.is_attached());
}

#[test]
fn test_config_from_json() {
    let config = PresentConfig::from_json(r#"{ "sync_interval": 1, "format": "Bgra8Unorm" }"#).unwrap();
    assert_eq!(config.sync_interval, 1);
    assert!(!config.diagnostic_clear);

    let (backend, mut view) = loaded_view(config, 64.0, 64.0);
    let player = Arc::new(FakePlayer::default());
    view.set_media_player(Some(player.clone()));
    let output = player.callbacks().update_output(&RenderConfig::new(16, 16)).unwrap();
    assert_eq!(output.dxgi_format, 87);
    player.callbacks().present().unwrap();
    assert!(backend
        .events()
        .contains(&Event::Present { sync_interval: 1 }));
}

#[test]
fn test_detached_player_frame_is_never_composited() {
    let (backend, mut view) = loaded_view(PresentConfig::default(), 320.0, 240.0);
    let first = Arc::new(FakePlayer::default());
    view.set_media_player(Some(first.clone()));
    let callbacks = first.callbacks();
    callbacks.update_output(&RenderConfig::new(320, 240)).unwrap();
    callbacks.frame_boundary(true).unwrap();
    callbacks.frame_boundary(false).unwrap();
    callbacks.present().unwrap();

    view.set_media_player(None);
    assert_eq!(backend.live(ObjectKind::SharedTexture), 0);
    assert_eq!(backend.live(ObjectKind::OpenedTexture), 0);
    assert_eq!(backend.open_handles(), 0);

    let second = Arc::new(FakePlayer::default());
    view.set_media_player(Some(second.clone()));
    let callbacks = second.callbacks();
    assert!(matches!(callbacks.frame_boundary(false), Err(PresentError::NotReady)));

    callbacks.update_output(&RenderConfig::new(160, 120)).unwrap();
    callbacks.frame_boundary(true).unwrap();
    callbacks.frame_boundary(false).unwrap();
    callbacks.present().unwrap();
}

#[test]
fn test_engine_thread_runs_alongside_resize_and_unload() {
    let (backend, mut view) = loaded_view(PresentConfig::default(), 320.0, 240.0);
    let player = Arc::new(FakePlayer::default());
    view.set_media_player(Some(player.clone()));
    let callbacks = player.callbacks();
    let start = Arc::new(Barrier::new(2));

    let engine = {
        let start = start.clone();
        thread::spawn(move || {
            start.wait();
            let mut presented = 0usize;
            for i in 0..200u32 {
                let side = 32 + (i % 4) * 16;
                if callbacks.update_output(&RenderConfig::new(side, side)).is_err() {
                    continue;
                }
                let frame = callbacks
                    .frame_boundary(true)
                    .and_then(|_| callbacks.frame_boundary(false))
                    .and_then(|_| callbacks.present());
                match frame {
                    Ok(()) => presented += 1,
                    Err(PresentError::NotReady) => {}
                    Err(e) => panic!("unexpected engine error: {e}"),
                }
            }
            presented
        })
    };

    start.wait();
    for i in 0..50u32 {
        let width = 160.0 + f64::from(i % 5) * 40.0;
        view.on_size_changed(SurfaceMetrics::new(width, 120.0)).unwrap();
    }
    view.on_unloaded().unwrap();

    let presented = engine.join().expect("engine thread panicked");
    assert!(presented <= 200);
    assert!(!player.is_attached());
    assert_eq!(backend.outstanding(), 0);
    assert_eq!(backend.open_handles(), 0);
    assert_eq!(backend.live_at_shutdown(), 0);
    assert_eq!(backend.context_refs(), 0);
}
