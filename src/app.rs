use std::{
    cell::RefCell,
    path::PathBuf,
    rc::Rc,
    sync::{mpsc::channel, Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::Result;
use log::{error, info};
use slint::{ComponentHandle, Image, Timer, TimerMode};

use crate::{
    camera::Camera,
    config::AppConfig,
    detect::{Detector, ModelSource, SsdDetector},
    permission::{query_camera_permission, PermissionState},
    screen::{ScreenState, TapOutcome, View},
};

slint::slint! {
    import { Button } from "std-widgets.slint";
    export component MainWindow inherits Window {
        title: "Object Detector";
        background: black;
        in property <string> message: "Loading...";
        in property <bool> show-camera: false;
        in property <bool> has-photo: false;
        in property <image> camera-texture;
        in property <image> photo;
        in property <string> object-name;
        callback take-picture();
        callback start-preview();

        if !root.show-camera : Text {
            width: parent.width;
            height: parent.height;
            text: root.message;
            color: white;
            horizontal-alignment: center;
            vertical-alignment: center;
        }

        if root.show-camera : VerticalLayout {
            width: parent.width;
            height: parent.height;
            Rectangle {
                vertical-stretch: 1;
                Image {
                    width: parent.width;
                    height: parent.height;
                    source: root.camera-texture;
                    image-fit: contain;
                }
                Button {
                    text: "Take a Picture!";
                    x: (parent.width - self.width) / 2;
                    y: parent.height - self.height - 30px;
                    clicked => { root.take-picture(); }
                }
            }
            if root.has-photo : VerticalLayout {
                padding-top: 20px;
                spacing: 10px;
                HorizontalLayout {
                    alignment: center;
                    Rectangle {
                        width: 300px;
                        height: 300px;
                        border-radius: 15px;
                        clip: true;
                        Image {
                            width: 300px;
                            height: 300px;
                            source: root.photo;
                            image-fit: cover;
                        }
                    }
                }
                Text {
                    text: root.object-name;
                    font-size: 20px;
                    color: white;
                    horizontal-alignment: center;
                }
            }
        }
    }
}

type SharedDetector = Arc<OnceLock<Box<dyn Detector>>>;

fn render(app: &MainWindow, state: &ScreenState) {
    let view = state.view();
    app.set_message(view.message().unwrap_or_default().into());
    app.set_show_camera(matches!(view, View::Camera { .. }));
    app.set_has_photo(state.photo.is_some());
    app.set_object_name(state.object_name.as_str().into());
}

/// Logs an update a worker could not hand to the UI thread. Returns whether it was posted.
fn report_posted(what: &str, posted: Result<(), slint::EventLoopError>) -> bool {
    match posted {
        Ok(()) => true,
        Err(err) => {
            error!("{what} dropped, event loop gone: {err:?}");
            false
        }
    }
}

fn load_detector(
    config: &AppConfig,
    #[cfg(target_os = "android")] android_app: &slint::android::AndroidApp,
) -> Result<Box<dyn Detector>> {
    let path = &config.detector.model_path;
    #[cfg(target_os = "android")]
    let source = if path.is_absolute() && path.exists() {
        ModelSource::Path(path.clone())
    } else {
        ModelSource::Bytes(read_asset(android_app, path)?)
    };
    #[cfg(not(target_os = "android"))]
    let source = ModelSource::Path(path.clone());
    Ok(Box::new(SsdDetector::load(source, &config.detector)?))
}

#[cfg(target_os = "android")]
fn read_asset(android_app: &slint::android::AndroidApp, name: &std::path::Path) -> Result<Vec<u8>> {
    use std::io::Read;

    use anyhow::anyhow;

    let name = name
        .to_str()
        .ok_or_else(|| anyhow!("asset name is not utf-8: {}", name.display()))?;
    let cname = std::ffi::CString::new(name)?;
    let mut asset = android_app
        .asset_manager()
        .open(&cname)
        .ok_or_else(|| anyhow!("asset not found: {name}"))?;
    let mut bytes = vec![];
    asset.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn capture_dir(
    config: &AppConfig,
    #[cfg(target_os = "android")] android_app: &slint::android::AndroidApp,
) -> Result<PathBuf> {
    if let Some(dir) = &config.camera.capture_dir {
        return Ok(dir.clone());
    }
    #[cfg(target_os = "android")]
    {
        Ok(PathBuf::from(crate::permission::android::cache_dir(android_app)?))
    }
    #[cfg(not(target_os = "android"))]
    {
        Ok(dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("slint_camera_detect"))
    }
}

pub fn run(
    #[cfg(target_os = "android")]
    android_app: slint::android::AndroidApp,
) -> Result<()> {
    let config = AppConfig::from_env()?;
    let capture_dir = capture_dir(
        &config,
        #[cfg(target_os = "android")]
        &android_app,
    )?;
    info!("photos go to {}", capture_dir.display());

    let app = MainWindow::new()?;
    let state = Arc::new(Mutex::new(ScreenState::new()));
    let detector: SharedDetector = Arc::default();

    let (preview_sender, preview_receiver) = channel();
    let camera = Rc::new(RefCell::new(Camera::new(preview_sender)?));

    let app_weak = app.as_weak();
    let timer = Timer::default();
    timer.start(TimerMode::Repeated, Duration::from_millis(10), move || {
        // only the newest frame is worth uploading
        let latest = preview_receiver.try_iter().last();
        if let (Some(buffer), Some(app)) = (latest, app_weak.upgrade()) {
            app.set_camera_texture(Image::from_rgba8(buffer));
        }
    });

    let camera_clone = camera.clone();
    let camera_config = config.camera.clone();
    app.on_start_preview(move || {
        let res = camera_clone.borrow_mut().start_preview(
            camera_config.camera_index,
            camera_config.preview_width,
            camera_config.preview_height,
        );
        if let Err(err) = res {
            error!("camera start failed: {err:?}");
        }
    });

    let app_weak = app.as_weak();
    let camera_clone = camera.clone();
    let state_clone = state.clone();
    let detector_clone = detector.clone();
    app.on_take_picture(move || {
        let Some(app) = app_weak.upgrade() else {
            return;
        };
        let mut screen = match state_clone.lock() {
            Ok(screen) => screen,
            Err(_) => return,
        };
        let outcome = screen.handle_tap(|| camera_clone.borrow().take_picture(&capture_dir));
        let (path, detection) = match outcome {
            TapOutcome::Ignored => return,
            TapOutcome::CaptureFailed => {
                render(&app, &screen);
                return;
            }
            TapOutcome::Captured { path, detection } => (path, detection),
        };
        match Image::load_from_path(&path) {
            Ok(image) => app.set_photo(image),
            Err(err) => error!("photo preview failed: {err:?}"),
        }
        render(&app, &screen);
        drop(screen);

        let Some(detection) = detection else {
            return;
        };
        let state = state_clone.clone();
        let detector = detector_clone.clone();
        let app_weak = app.as_weak();
        std::thread::spawn(move || {
            let result = detection.run(detector.get().map(|d| &**d as &dyn Detector));
            let posted = app_weak.upgrade_in_event_loop(move |app| {
                if let Ok(mut screen) = state.lock() {
                    screen.detection_finished(result);
                    render(&app, &screen);
                }
            });
            report_posted("detection result", posted);
        });
    });

    let app_weak = app.as_weak();
    let state_clone = state.clone();
    std::thread::spawn(move || {
        let permission = query_camera_permission(
            #[cfg(target_os = "android")]
            &android_app,
        )
        .unwrap_or_else(|err| {
            error!("permission query failed: {err:?}");
            PermissionState::Denied
        });

        let state = state_clone.clone();
        let posted = app_weak.upgrade_in_event_loop(move |app| {
            if let Ok(mut screen) = state.lock() {
                screen.set_permission(permission);
                render(&app, &screen);
            }
            if permission.is_granted() {
                app.invoke_start_preview();
            }
        });
        report_posted("permission", posted);

        let loaded = load_detector(
            &config,
            #[cfg(target_os = "android")]
            &android_app,
        );
        let ok = match loaded {
            Ok(model) => detector.set(model).is_ok(),
            Err(err) => {
                error!("model load failed: {err:?}");
                false
            }
        };
        info!("model ready: {ok}");
        let posted = app_weak.upgrade_in_event_loop(move |_| {
            if let Ok(mut screen) = state_clone.lock() {
                screen.model_loaded(ok);
            }
        });
        report_posted("model state", posted);
    });

    app.run()?;
    camera.borrow_mut().stop_preview()?;
    Ok(())
}
