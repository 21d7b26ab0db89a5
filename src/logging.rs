#[cfg(target_os = "android")]
pub fn init_logger() {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("slint_camera_detect"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logger() {
    // repeated init from tests is harmless
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
