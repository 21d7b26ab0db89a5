use anyhow::Result;

pub const CAMERA_PERMISSION: &str = "android.permission.CAMERA";

/// Camera access as decided by the OS. `Pending` until the startup query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Pending,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn from_granted(granted: bool) -> Self {
        if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }

    pub fn is_granted(self) -> bool {
        self == PermissionState::Granted
    }
}

/// Asks for camera access once and blocks until the user has answered.
/// Must not be called on the UI thread.
pub fn query_camera_permission(
    #[cfg(target_os = "android")] app: &slint::android::AndroidApp,
) -> Result<PermissionState> {
    #[cfg(target_os = "android")]
    {
        android::query_camera_permission(app)
    }
    #[cfg(not(target_os = "android"))]
    {
        // desktop webcams have no runtime grant; a missing device shows up at capture
        Ok(PermissionState::Granted)
    }
}

#[cfg(target_os = "android")]
pub mod android {
    use std::time::{Duration, Instant};

    use anyhow::{anyhow, Result};
    use jni::{
        objects::{JObject, JString, JValueGen},
        sys::{jint, JNIInvokeInterface_, _jobject},
        JavaVM,
    };
    use log::info;

    use super::{PermissionState, CAMERA_PERMISSION};

    const REQUEST_CODE: i32 = 100;
    const ANSWER_TIMEOUT: Duration = Duration::from_secs(60);
    const POLL_INTERVAL: Duration = Duration::from_millis(250);

    fn java_vm(app: &slint::android::AndroidApp) -> Result<JavaVM> {
        Ok(unsafe { JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)? })
    }

    pub fn sdk_version(app: &slint::android::AndroidApp) -> Result<i32> {
        let vm = java_vm(app)?;
        let mut env = vm.attach_current_thread()?;
        Ok(env
            .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
            .i()?)
    }

    pub fn check_self_permission(
        app: &slint::android::AndroidApp,
        permission: &str,
    ) -> Result<bool> {
        let vm = java_vm(app)?;
        let mut env = vm.attach_current_thread()?;
        let granted = env
            .get_static_field(
                "android/content/pm/PackageManager",
                "PERMISSION_GRANTED",
                "I",
            )?
            .i()?;
        let permission = env.new_string(permission)?;
        let activity = unsafe { JObject::from_raw(app.activity_as_ptr() as *mut _jobject) };
        let result = env
            .call_method(
                activity,
                "checkSelfPermission",
                "(Ljava/lang/String;)I",
                &[JValueGen::Object(&JObject::from(permission))],
            )?
            .i()?;
        Ok(result == granted)
    }

    pub fn request_permissions(
        app: &slint::android::AndroidApp,
        permissions: &[&str],
        request_code: i32,
    ) -> Result<()> {
        let vm = java_vm(app)?;
        let mut env = vm.attach_current_thread()?;
        let activity = unsafe { JObject::from_raw(app.activity_as_ptr() as *mut _jobject) };

        let array = env.new_object_array(
            permissions.len() as jint,
            "java/lang/String",
            JObject::null(),
        )?;
        for (index, permission) in permissions.iter().enumerate() {
            let permission = env.new_string(*permission)?;
            env.set_object_array_element(&array, index as jint, permission)?;
        }

        env.call_method(
            activity,
            "requestPermissions",
            "([Ljava/lang/String;I)V",
            &[JValueGen::Object(&JObject::from(array)), request_code.into()],
        )?;
        Ok(())
    }

    /// Runtime grants only exist above API 23; older installs were granted at install time.
    pub fn request_camera_permission(app: &slint::android::AndroidApp) -> Result<()> {
        let sdk_version = sdk_version(app)?;
        info!("sdk version:{sdk_version}");
        if sdk_version > 23 && !check_self_permission(app, CAMERA_PERMISSION)? {
            request_permissions(app, &[CAMERA_PERMISSION], REQUEST_CODE)?;
        }
        Ok(())
    }

    pub fn query_camera_permission(app: &slint::android::AndroidApp) -> Result<PermissionState> {
        if check_self_permission(app, CAMERA_PERMISSION)? {
            return Ok(PermissionState::Granted);
        }
        request_camera_permission(app)?;

        // no result callback reaches native code, so poll until the dialog is answered
        let started = Instant::now();
        while started.elapsed() < ANSWER_TIMEOUT {
            std::thread::sleep(POLL_INTERVAL);
            if check_self_permission(app, CAMERA_PERMISSION)? {
                return Ok(PermissionState::Granted);
            }
        }
        info!("camera permission not granted after {:?}", ANSWER_TIMEOUT);
        Ok(PermissionState::Denied)
    }

    /// Absolute path of the activity's cache directory.
    pub fn cache_dir(app: &slint::android::AndroidApp) -> Result<String> {
        let vm = java_vm(app)?;
        let mut env = vm.attach_current_thread()?;
        let activity = unsafe { JObject::from_raw(app.activity_as_ptr() as *mut _jobject) };

        let file = env.call_method(activity, "getCacheDir", "()Ljava/io/File;", &[])?;
        let JValueGen::Object(file) = file else {
            return Err(anyhow!("getCacheDir did not return a file"));
        };
        let path = env.call_method(file, "getAbsolutePath", "()Ljava/lang/String;", &[])?;
        let JValueGen::Object(path) = path else {
            return Err(anyhow!("getAbsolutePath did not return a string"));
        };
        let path: JString = path.into();
        let path: String = env.get_string(&path)?.into();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_granted() {
        assert_eq!(PermissionState::from_granted(true), PermissionState::Granted);
        assert_eq!(PermissionState::from_granted(false), PermissionState::Denied);
    }

    #[test]
    fn test_default_is_pending() {
        let state = PermissionState::default();
        assert_eq!(state, PermissionState::Pending);
        assert!(!state.is_granted());
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn test_desktop_is_granted() {
        assert_eq!(query_camera_permission().unwrap(), PermissionState::Granted);
    }
}
