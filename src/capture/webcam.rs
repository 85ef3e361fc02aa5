//! UVC webcam backend using nokhwa
//!
//! Enabled with the `webcam` feature. Exposure, gain and gamma map onto the
//! matching UVC controls; auto modes, white balance and black level are not
//! exposed and report as unsupported.

use crate::capture::frame::PixelLayout;
use crate::capture::traits::{
    CameraDevice, CameraSystem, DeviceLimits, NodeAccess, ParameterNode, ParameterValue, RawImage,
    Resolution,
};
use crate::utils::error::DeviceError;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, ControlValueSetter, FrameFormat, KnownCameraControl,
    RequestedFormat, RequestedFormatType,
};
use nokhwa::Camera;
use std::time::Duration;

/// Enumerates webcams through the platform's native capture API
#[derive(Default)]
pub struct WebcamSystem;

impl CameraSystem for WebcamSystem {
    fn enumerate(&self) -> Result<Vec<Box<dyn CameraDevice>>, DeviceError> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| DeviceError::NotFound(format!("{e:?}")))?;

        Ok(cameras
            .into_iter()
            .map(|info| {
                Box::new(WebcamDevice::new(
                    info.index().clone(),
                    info.misc(),
                    info.human_name(),
                )) as Box<dyn CameraDevice>
            })
            .collect())
    }
}

/// One webcam opened through nokhwa
pub struct WebcamDevice {
    index: CameraIndex,
    serial: String,
    model: String,
    camera: Option<Camera>,
    streaming: bool,
}

impl WebcamDevice {
    pub fn new(index: CameraIndex, serial: String, model: String) -> Self {
        Self {
            index,
            serial,
            model,
            camera: None,
            streaming: false,
        }
    }

    fn camera(&mut self) -> Result<&mut Camera, DeviceError> {
        self.camera
            .as_mut()
            .ok_or_else(|| DeviceError::Other("webcam not initialized".to_string()))
    }

    fn control_for(node: ParameterNode) -> Option<KnownCameraControl> {
        match node {
            ParameterNode::ExposureTime => Some(KnownCameraControl::Exposure),
            ParameterNode::Gain => Some(KnownCameraControl::Gain),
            ParameterNode::Gamma => Some(KnownCameraControl::Gamma),
            _ => None,
        }
    }
}

impl CameraDevice for WebcamDevice {
    fn describe(&self) -> (String, String) {
        (self.serial.clone(), self.model.clone())
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let camera = Camera::new(self.index.clone(), format)
            .map_err(|e| DeviceError::Init(format!("failed to open camera {:?}: {e:?}", self.index)))?;
        self.camera = Some(camera);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), DeviceError> {
        if self.streaming {
            self.end_acquisition()?;
        }
        self.camera = None;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.camera.is_some()
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_resolution: Resolution::new(3840, 2160),
            min_frame_rate: 1.0,
            max_frame_rate: 60.0,
        }
    }

    fn configure(&mut self, width: u32, height: u32, frame_rate: f64) -> Result<(), DeviceError> {
        let requested = CameraFormat::new(
            nokhwa::utils::Resolution::new(width, height),
            FrameFormat::MJPEG,
            frame_rate.round() as u32,
        );
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(requested));
        self.camera()?
            .set_camera_requset(format)
            .map(|_| ())
            .map_err(|e| DeviceError::Other(format!("failed to apply format: {e:?}")))
    }

    fn begin_acquisition(&mut self) -> Result<(), DeviceError> {
        self.camera()?
            .open_stream()
            .map_err(|e| DeviceError::Acquisition(format!("failed to open stream: {e:?}")))?;
        self.streaming = true;
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DeviceError> {
        self.streaming = false;
        self.camera()?
            .stop_stream()
            .map_err(|e| DeviceError::Acquisition(format!("failed to stop stream: {e:?}")))
    }

    // nokhwa blocks until the camera delivers; the timeout is not enforceable here
    fn next_image(&mut self, _timeout: Duration) -> Result<Option<RawImage>, DeviceError> {
        let buffer = self
            .camera()?
            .frame()
            .map_err(|e| DeviceError::Acquisition(format!("{e:?}")))?;
        let decoded = match buffer.decode_image::<RgbFormat>() {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!("Dropping undecodable webcam frame: {:?}", e);
                return Ok(Some(RawImage {
                    width: 0,
                    height: 0,
                    layout: PixelLayout::Rgb8,
                    data: Vec::new(),
                    incomplete: true,
                }));
            }
        };
        let (width, height) = (decoded.width(), decoded.height());
        Ok(Some(RawImage {
            width,
            height,
            layout: PixelLayout::Rgb8,
            data: decoded.into_raw(),
            incomplete: false,
        }))
    }

    fn node_access(&self, node: ParameterNode) -> NodeAccess {
        match (Self::control_for(node), &self.camera) {
            (Some(control), Some(camera)) if camera.camera_control(control).is_ok() => {
                NodeAccess::READ_WRITE
            }
            _ => NodeAccess::UNSUPPORTED,
        }
    }

    fn read_node(&self, node: ParameterNode) -> Result<ParameterValue, DeviceError> {
        let control = Self::control_for(node)
            .ok_or_else(|| DeviceError::Parameter(format!("{node:?} unsupported")))?;
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| DeviceError::Other("webcam not initialized".to_string()))?;
        let value = camera
            .camera_control(control)
            .map_err(|e| DeviceError::Parameter(format!("{e:?}")))?
            .value();
        match value {
            ControlValueSetter::Integer(v) => Ok(ParameterValue::Float(v as f64)),
            ControlValueSetter::Float(v) => Ok(ParameterValue::Float(v)),
            ControlValueSetter::Boolean(v) => Ok(ParameterValue::Auto(v)),
            other => Err(DeviceError::Parameter(format!("unexpected control value {other:?}"))),
        }
    }

    fn write_node(&mut self, node: ParameterNode, value: ParameterValue) -> Result<(), DeviceError> {
        let control = Self::control_for(node)
            .ok_or_else(|| DeviceError::Parameter(format!("{node:?} unsupported")))?;
        let setter = match value {
            ParameterValue::Float(v) => ControlValueSetter::Integer(v.round() as i64),
            ParameterValue::Auto(v) => ControlValueSetter::Boolean(v),
        };
        self.camera()?
            .set_camera_control(control, setter)
            .map_err(|e| DeviceError::Parameter(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_webcam_device_can_move_to_capture_thread() {
        assert_send::<Camera>();
        assert_send::<WebcamDevice>();
        assert_send::<Box<dyn CameraDevice>>();
    }

    #[test]
    fn test_only_uvc_controls_are_mapped() {
        assert_eq!(
            WebcamDevice::control_for(ParameterNode::Gain),
            Some(KnownCameraControl::Gain)
        );
        assert_eq!(WebcamDevice::control_for(ParameterNode::BlackLevel), None);
    }
}
