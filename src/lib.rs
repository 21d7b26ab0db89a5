pub mod app;
pub mod camera;
pub mod config;
pub mod detect;
pub mod logging;
pub mod permission;
pub mod photo;
pub mod screen;

#[cfg(target_os = "android")]
#[no_mangle]
fn android_main(app: slint::android::AndroidApp) {
    logging::init_logger();
    if let Err(err) = slint::android::init(app.clone()) {
        log::error!("slint android init failed: {err:?}");
        return;
    }
    if let Err(err) = app::run(app) {
        log::error!("app exited with error: {err:?}");
    }
}
