use anyhow::{anyhow, Result};
use core::slice;
use image::RgbaImage;
use log::{error, info, warn};
use ndk_sys::{
    acamera_metadata_tag, camera_status_t, media_status_t, ACameraCaptureSession,
    ACameraCaptureSession_close, ACameraCaptureSession_setRepeatingRequest,
    ACameraCaptureSession_stateCallbacks, ACameraCaptureSession_stopRepeating, ACameraDevice,
    ACameraDevice_StateCallbacks, ACameraDevice_close, ACameraDevice_createCaptureRequest,
    ACameraDevice_createCaptureSession, ACameraDevice_getId, ACameraDevice_request_template,
    ACameraIdList, ACameraManager, ACameraManager_create, ACameraManager_delete,
    ACameraManager_deleteCameraIdList, ACameraManager_getCameraCharacteristics,
    ACameraManager_getCameraIdList, ACameraManager_openCamera, ACameraMetadata,
    ACameraMetadata_const_entry, ACameraMetadata_free, ACameraMetadata_getConstEntry,
    ACameraOutputTarget, ACameraOutputTarget_create, ACameraOutputTarget_free, ACaptureRequest,
    ACaptureRequest_addTarget, ACaptureRequest_free, ACaptureSessionOutput,
    ACaptureSessionOutputContainer, ACaptureSessionOutputContainer_add,
    ACaptureSessionOutputContainer_create, ACaptureSessionOutputContainer_free,
    ACaptureSessionOutput_create, ACaptureSessionOutput_free, AImage, AImageReader,
    AImageReader_ImageListener, AImageReader_acquireLatestImage, AImageReader_delete,
    AImageReader_getWindow, AImageReader_new, AImageReader_setImageListener, AImage_delete,
    AImage_getFormat, AImage_getHeight, AImage_getPlaneData, AImage_getPlanePixelStride,
    AImage_getPlaneRowStride, AImage_getWidth, ANativeWindow, AIMAGE_FORMATS,
};
use slint::{Rgba8Pixel, SharedPixelBuffer};
use std::{
    ffi::{c_int, c_void, CStr},
    mem::zeroed,
    ptr::null_mut,
    sync::mpsc::Sender,
    time::Instant,
};

use super::frame::{nv21_to_rgba, pack_nv21, rotate_upright, Frame, FrameSlot};
use super::select_camera;

#[link(name = "camera2ndk")]
extern "C" {}

#[link(name = "mediandk")]
extern "C" {}

const READER_MAX_IMAGES: i32 = 2;

/// Everything the image reader callback touches. Boxed so the pointer handed to the
/// NDK stays valid when the camera struct moves.
struct FrameSink {
    preview_sender: Sender<SharedPixelBuffer<Rgba8Pixel>>,
    slot: FrameSlot,
    sensor_orientation: i32,
    frame_count: u32,
    timer: Instant,
}

impl FrameSink {
    unsafe fn on_image_available(&mut self, reader: *mut AImageReader) -> Result<()> {
        let mut image = null_mut();
        let status = AImageReader_acquireLatestImage(reader, &mut image);
        if status != media_status_t::AMEDIA_OK {
            if status == media_status_t::AMEDIA_IMGREADER_NO_BUFFER_AVAILABLE {
                return Ok(());
            }
            return Err(anyhow!("Failed to acquire latest image: {:?}", status));
        }
        let res = self.consume(image);
        AImage_delete(image);
        res
    }

    unsafe fn consume(&mut self, image: *mut AImage) -> Result<()> {
        let t = Instant::now();
        let mut format = 0;
        let mut width = 0;
        let mut height = 0;
        AImage_getFormat(image, &mut format);
        if format != AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888.0 as i32 {
            return Err(anyhow!("unexpected image format {format}"));
        }
        if AImage_getWidth(image, &mut width) != media_status_t::AMEDIA_OK
            || AImage_getHeight(image, &mut height) != media_status_t::AMEDIA_OK
        {
            return Err(anyhow!("Failed to read image size"));
        }
        let (width, height) = (width as usize, height as usize);

        let (y, y_stride, _) = plane(image, 0)?;
        let (u, uv_stride, uv_pixel_stride) = plane(image, 1)?;
        let (v, _, _) = plane(image, 2)?;
        let nv21 = pack_nv21(y, y_stride, u, v, uv_stride, uv_pixel_stride, width, height)?;
        let rgba = nv21_to_rgba(&nv21, width, height)?;
        let upright = RgbaImage::from_raw(width as u32, height as u32, rgba)
            .map(|img| rotate_upright(img, self.sensor_orientation))
            .ok_or_else(|| anyhow!("frame size mismatch {width}x{height}"))?;

        let buf = SharedPixelBuffer::clone_from_slice(
            upright.as_raw(),
            upright.width(),
            upright.height(),
        );
        self.slot.put(Frame::new(upright));
        self.preview_sender
            .send(buf)
            .map_err(|err| anyhow!("{:?}", err))?;

        self.frame_count += 1;
        if self.timer.elapsed().as_millis() > 1000 {
            info!(
                "preview FPS:{} decode:{}ms",
                self.frame_count,
                t.elapsed().as_millis()
            );
            self.timer = Instant::now();
            self.frame_count = 0;
        }
        Ok(())
    }
}

/// Plane bytes, row stride and pixel stride. The slice borrows the AImage buffer.
unsafe fn plane<'a>(image: *mut AImage, index: c_int) -> Result<(&'a [u8], usize, usize)> {
    let mut data = null_mut();
    let mut len = 0;
    let mut row_stride = 0;
    let mut pixel_stride = 1;
    if AImage_getPlaneData(image, index, &mut data, &mut len) != media_status_t::AMEDIA_OK
        || data.is_null()
    {
        return Err(anyhow!("Failed to read plane {index}"));
    }
    AImage_getPlaneRowStride(image, index, &mut row_stride);
    AImage_getPlanePixelStride(image, index, &mut pixel_stride);
    Ok((
        slice::from_raw_parts(data, len as usize),
        row_stride as usize,
        pixel_stride.max(1) as usize,
    ))
}

/// Releases the manager and its id list on every exit path of `open`.
struct ManagerGuard {
    manager: *mut ACameraManager,
    ids: *mut ACameraIdList,
}

impl Drop for ManagerGuard {
    fn drop(&mut self) {
        unsafe {
            if !self.ids.is_null() {
                ACameraManager_deleteCameraIdList(self.ids);
            }
            ACameraManager_delete(self.manager);
        }
    }
}

struct Callbacks {
    device: ACameraDevice_StateCallbacks,
    session: ACameraCaptureSession_stateCallbacks,
    reader: AImageReader_ImageListener,
}

/// Camera2 NDK preview producing upright RGBA frames.
pub struct AndroidCamera {
    camera_device: *mut ACameraDevice,
    image_reader: *mut AImageReader,
    capture_request: *mut ACaptureRequest,
    output_target: *mut ACameraOutputTarget,
    session_output: *mut ACaptureSessionOutput,
    output_container: *mut ACaptureSessionOutputContainer,
    capture_session: *mut ACameraCaptureSession,
    callbacks: Box<Callbacks>,
    sink: Box<FrameSink>,
    camera_id: Option<String>,
}

impl AndroidCamera {
    pub fn new(preview_sender: Sender<SharedPixelBuffer<Rgba8Pixel>>, slot: FrameSlot) -> Self {
        Self {
            camera_device: null_mut(),
            image_reader: null_mut(),
            capture_request: null_mut(),
            output_target: null_mut(),
            session_output: null_mut(),
            output_container: null_mut(),
            capture_session: null_mut(),
            callbacks: Box::new(Callbacks {
                device: unsafe { zeroed() },
                session: unsafe { zeroed() },
                reader: AImageReader_ImageListener {
                    context: null_mut(),
                    onImageAvailable: None,
                },
            }),
            sink: Box::new(FrameSink {
                preview_sender,
                slot,
                sensor_orientation: 0,
                frame_count: 0,
                timer: Instant::now(),
            }),
            camera_id: None,
        }
    }

    /// Opens the `index`-th camera reported by the camera manager.
    pub fn open(&mut self, index: usize) -> Result<()> {
        unsafe {
            let mut guard = ManagerGuard {
                manager: ACameraManager_create(),
                ids: null_mut(),
            };
            let status = ACameraManager_getCameraIdList(guard.manager, &mut guard.ids);
            if status != camera_status_t::ACAMERA_OK || guard.ids.is_null() {
                return Err(anyhow!("Failed to get camera id list: {:?}", status));
            }
            let id_list = &*guard.ids;
            if id_list.numCameras < 1 {
                return Err(anyhow!("No camera device detected."));
            }
            let ids = slice::from_raw_parts(id_list.cameraIds, id_list.numCameras as usize);
            let mut cameras = Vec::with_capacity(ids.len());
            for (i, id) in ids.iter().enumerate() {
                let mut metadata = null_mut();
                let status =
                    ACameraManager_getCameraCharacteristics(guard.manager, *id, &mut metadata);
                if status != camera_status_t::ACAMERA_OK {
                    return Err(anyhow!("Failed to get characteristics of camera {i}"));
                }
                cameras.push(lens_and_orientation(metadata));
                ACameraMetadata_free(metadata);
            }
            let facings: Vec<u8> = cameras.iter().map(|(facing, _)| *facing).collect();
            let chosen = select_camera(&facings, index)
                .ok_or_else(|| anyhow!("Camera {index} not found, {} available", ids.len()))?;
            let selected = ids[chosen];
            let (lens_facing, sensor_orientation) = cameras[chosen];
            info!("camera {chosen}: lens_facing={lens_facing} sensor_orientation={sensor_orientation}");
            self.sink.sensor_orientation = sensor_orientation;

            unsafe extern "C" fn on_disconnected(_context: *mut c_void, device: *mut ACameraDevice) {
                info!("camera {:?} disconnected", device_id(device));
            }

            unsafe extern "C" fn on_error(
                _context: *mut c_void,
                device: *mut ACameraDevice,
                error: c_int,
            ) {
                error!("camera {:?} error {}", device_id(device), error);
            }

            self.callbacks.device.onDisconnected = Some(on_disconnected);
            self.callbacks.device.onError = Some(on_error);

            let status = ACameraManager_openCamera(
                guard.manager,
                selected,
                &mut self.callbacks.device,
                &mut self.camera_device,
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("Failed to open camera {chosen}: {:?}", status));
            }
            self.camera_id = device_id(self.camera_device).map(str::to_string);
        }
        Ok(())
    }

    pub fn start_preview(&mut self, width: u32, height: u32) -> Result<()> {
        if self.camera_device.is_null() {
            return Err(anyhow!("camera is not open"));
        }
        self.create_image_reader(width, height)?;
        unsafe {
            let status = ACameraDevice_createCaptureRequest(
                self.camera_device,
                ACameraDevice_request_template::TEMPLATE_PREVIEW,
                &mut self.capture_request,
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to create preview request for camera {:?}",
                    self.camera_id
                ));
            }

            let mut window: *mut ANativeWindow = null_mut();
            if AImageReader_getWindow(self.image_reader, &mut window) != media_status_t::AMEDIA_OK {
                return Err(anyhow!("Failed to get image reader window"));
            }

            ACameraOutputTarget_create(window, &mut self.output_target);
            ACaptureRequest_addTarget(self.capture_request, self.output_target);
            ACaptureSessionOutput_create(window, &mut self.session_output);

            let status = ACaptureSessionOutputContainer_create(&mut self.output_container);
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("Failed to create session output container: {:?}", status));
            }
            ACaptureSessionOutputContainer_add(self.output_container, self.session_output);

            unsafe extern "C" fn on_session_ready(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("session ready {:?}", session);
            }

            unsafe extern "C" fn on_session_active(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("session active {:?}", session);
            }

            unsafe extern "C" fn on_session_closed(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("session closed {:?}", session);
            }

            self.callbacks.session.onReady = Some(on_session_ready);
            self.callbacks.session.onActive = Some(on_session_active);
            self.callbacks.session.onClosed = Some(on_session_closed);

            let status = ACameraDevice_createCaptureSession(
                self.camera_device,
                self.output_container,
                &self.callbacks.session,
                &mut self.capture_session,
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("Failed to create capture session: {:?}", status));
            }

            let status = ACameraCaptureSession_setRepeatingRequest(
                self.capture_session,
                null_mut(),
                1,
                &mut self.capture_request,
                null_mut(),
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!("Failed to set repeating request: {:?}", status));
            }
        }
        info!("preview started {width}x{height}");
        Ok(())
    }

    fn create_image_reader(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            let res = AImageReader_new(
                width as i32,
                height as i32,
                AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888.0 as i32,
                READER_MAX_IMAGES,
                &mut self.image_reader,
            );
            if res != media_status_t::AMEDIA_OK {
                return Err(anyhow!("Failed to create image reader: {:?}", res));
            }

            unsafe extern "C" fn on_image_available(
                context: *mut c_void,
                reader: *mut AImageReader,
            ) {
                let sink = &mut *(context as *mut FrameSink);
                if let Err(err) = sink.on_image_available(reader) {
                    warn!("dropped frame: {err}");
                }
            }

            self.callbacks.reader.context = (&mut *self.sink as *mut FrameSink) as *mut c_void;
            self.callbacks.reader.onImageAvailable = Some(on_image_available);

            let res = AImageReader_setImageListener(self.image_reader, &mut self.callbacks.reader);
            if res != media_status_t::AMEDIA_OK {
                return Err(anyhow!("Failed to set image listener: {:?}", res));
            }
        }
        Ok(())
    }

    pub fn close(&mut self) {
        unsafe {
            if !self.capture_session.is_null() {
                ACameraCaptureSession_stopRepeating(self.capture_session);
                ACameraCaptureSession_close(self.capture_session);
                self.capture_session = null_mut();
            }
            if !self.capture_request.is_null() {
                ACaptureRequest_free(self.capture_request);
                self.capture_request = null_mut();
            }
            if !self.output_target.is_null() {
                ACameraOutputTarget_free(self.output_target);
                self.output_target = null_mut();
            }
            if !self.camera_device.is_null() {
                if ACameraDevice_close(self.camera_device) != camera_status_t::ACAMERA_OK {
                    error!("Failed to close camera device");
                }
                self.camera_device = null_mut();
            }
            if !self.session_output.is_null() {
                ACaptureSessionOutput_free(self.session_output);
                self.session_output = null_mut();
            }
            if !self.output_container.is_null() {
                ACaptureSessionOutputContainer_free(self.output_container);
                self.output_container = null_mut();
            }
            if !self.image_reader.is_null() {
                AImageReader_delete(self.image_reader);
                self.image_reader = null_mut();
            }
        }
        info!("camera {:?} closed", self.camera_id.take());
    }
}

impl Drop for AndroidCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// (lens facing, sensor orientation in degrees)
unsafe fn lens_and_orientation(metadata: *mut ACameraMetadata) -> (u8, i32) {
    let mut lens_facing: ACameraMetadata_const_entry = zeroed();
    let mut orientation: ACameraMetadata_const_entry = zeroed();
    ACameraMetadata_getConstEntry(
        metadata,
        acamera_metadata_tag::ACAMERA_LENS_FACING.0,
        &mut lens_facing,
    );
    ACameraMetadata_getConstEntry(
        metadata,
        acamera_metadata_tag::ACAMERA_SENSOR_ORIENTATION.0,
        &mut orientation,
    );
    let facing = if lens_facing.count > 0 {
        *lens_facing.data.u8_
    } else {
        0
    };
    let degrees = if orientation.count > 0 {
        *orientation.data.i32_
    } else {
        0
    };
    (facing, degrees)
}

unsafe fn device_id<'a>(device: *mut ACameraDevice) -> Option<&'a str> {
    if device.is_null() {
        return None;
    }
    let id = ACameraDevice_getId(device);
    if id.is_null() {
        return None;
    }
    CStr::from_ptr(id).to_str().ok()
}
