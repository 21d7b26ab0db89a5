#[cfg(not(target_os = "android"))]
fn main() -> anyhow::Result<()> {
    slint_camera_detect::logging::init_logger();
    slint_camera_detect::app::run()
}

// android starts through `android_main` in the cdylib
#[cfg(target_os = "android")]
fn main() {}
