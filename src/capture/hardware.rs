//! Host capture devices
//!
//! Video comes from nokhwa on a dedicated camera thread, audio inputs are
//! enumerated with cpal, and encoding is done by an FFmpeg child process that
//! turns raw camera frames into WebM on stdout. The recording carries video
//! only; the audio device is resolved and reported but not muxed.

use super::traits::{
    CapabilityRange, CapturePlatform, ChunkEncoder, ChunkSender, DeviceInfo, EncoderConfig, Frame,
    MediaStream, PlatformError, PlatformErrorKind, Resolution, StreamConstraints,
    TrackCapabilities, TrackSettings,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
};
use nokhwa::{Buffer, Camera, NokhwaError};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Alias for the host's default audio input
const DEFAULT_AUDIO_ID: &str = "default";

/// Capture platform backed by real devices
pub struct HardwarePlatform {
    ffmpeg_available: bool,
}

impl HardwarePlatform {
    pub fn new() -> Result<Self, PlatformError> {
        let ffmpeg_available = Command::new("ffmpeg").arg("-version").output().is_ok();
        if !ffmpeg_available {
            tracing::warn!("FFmpeg not found; recording will be unavailable");
        }
        Ok(Self { ffmpeg_available })
    }
}

fn camera_index(device_id: &str) -> CameraIndex {
    match device_id.parse::<u32>() {
        Ok(idx) => CameraIndex::Index(idx),
        Err(_) => CameraIndex::String(device_id.to_string()),
    }
}

fn video_devices() -> Result<Vec<DeviceInfo>, PlatformError> {
    let cameras = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| PlatformError::other(format!("Failed to enumerate cameras: {}", e)))?;
    Ok(cameras
        .into_iter()
        .map(|info| {
            let id = match info.index() {
                CameraIndex::Index(i) => i.to_string(),
                CameraIndex::String(s) => s.to_string(),
            };
            DeviceInfo::video(id, info.human_name())
        })
        .collect())
}

fn audio_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Some(name) = host.default_input_device().and_then(|d| d.name().ok()) {
        devices.push(DeviceInfo::audio(DEFAULT_AUDIO_ID, format!("Default - {}", name)));
    }

    match host.input_devices() {
        Ok(inputs) => {
            for device in inputs {
                match device.name() {
                    Ok(name) => devices.push(DeviceInfo::audio(name.clone(), name)),
                    Err(e) => tracing::debug!("Skipping unnamed audio input: {}", e),
                }
            }
        }
        Err(e) => tracing::warn!("Failed to enumerate audio inputs: {}", e),
    }
    devices
}

/// Concrete input behind an audio id; resolves the default alias
fn resolve_audio(device_id: &str) -> Option<String> {
    let host = cpal::default_host();
    if device_id == DEFAULT_AUDIO_ID {
        return host.default_input_device().and_then(|d| d.name().ok());
    }
    host.input_devices()
        .ok()?
        .filter_map(|d| d.name().ok())
        .find(|name| name == device_id)
}

/// Kind for a camera that failed to open or start
///
/// OS causes (EBUSY, ENOENT, EACCES) only arrive as text. An open failure
/// with no recognised cause counts as a missing device.
fn camera_error_kind(err: &NokhwaError) -> PlatformErrorKind {
    let text = err.to_string().to_lowercase();
    if text.contains("busy") || text.contains("in use") {
        PlatformErrorKind::Busy
    } else if text.contains("permission") || text.contains("access denied") {
        PlatformErrorKind::PermissionDenied
    } else if text.contains("not found")
        || text.contains("no such")
        || text.contains("does not exist")
    {
        PlatformErrorKind::NotFound
    } else {
        match err {
            NokhwaError::OpenDeviceError(_, _) => PlatformErrorKind::NotFound,
            _ => PlatformErrorKind::Other,
        }
    }
}

fn camera_error(context: &str, err: &NokhwaError) -> PlatformError {
    PlatformError::new(camera_error_kind(err), format!("{}: {}", context, err))
}

async fn join_blocking<T>(
    handle: tokio::task::JoinHandle<Result<T, PlatformError>>,
) -> Result<T, PlatformError> {
    handle
        .await
        .map_err(|e| PlatformError::other(format!("Device task failed: {}", e)))?
}

#[async_trait]
impl CapturePlatform for HardwarePlatform {
    fn name(&self) -> &str {
        "hardware"
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, PlatformError> {
        join_blocking(tokio::task::spawn_blocking(|| -> Result<Vec<DeviceInfo>, PlatformError> {
            let mut devices = video_devices()?;
            devices.extend(audio_devices());
            Ok(devices)
        }))
        .await
    }

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn MediaStream>, PlatformError> {
        let audio = match &constraints.audio {
            Some(audio) => {
                let requested = audio.device_id.clone();
                let resolved = tokio::task::spawn_blocking(move || resolve_audio(&requested))
                    .await
                    .map_err(|e| PlatformError::other(format!("Device task failed: {}", e)))?;
                match resolved {
                    Some(actual) => Some(TrackSettings {
                        device_id: Some(actual),
                        ..Default::default()
                    }),
                    None => {
                        return Err(PlatformError::not_found(format!(
                            "Audio device {} not found",
                            audio.device_id
                        )))
                    }
                }
            }
            None => None,
        };

        let camera = CameraHandle::open(constraints).await?;
        Ok(Box::new(HardwareStream {
            camera,
            audio,
            ffmpeg_available: self.ffmpeg_available,
        }))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.ffmpeg_available && mime_type.starts_with("video/webm")
    }
}

/// What the camera thread reports after opening
struct OpenedCamera {
    format: CameraFormat,
    capabilities: Option<TrackCapabilities>,
}

/// Shared between the camera thread and the stream
#[derive(Default)]
struct CameraShared {
    running: AtomicBool,
    latest: Mutex<Option<Buffer>>,
    encoder_input: Mutex<Option<ChildStdin>>,
}

struct CameraHandle {
    device_id: String,
    format: CameraFormat,
    capabilities: Option<TrackCapabilities>,
    shared: Arc<CameraShared>,
    thread: Option<JoinHandle<()>>,
}

fn ranges(formats: &[CameraFormat]) -> Option<TrackCapabilities> {
    let span = |values: Vec<f64>| {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (!values.is_empty()).then(|| CapabilityRange::new(min, max))
    };
    if formats.is_empty() {
        return None;
    }
    Some(TrackCapabilities {
        width: span(formats.iter().map(|f| f64::from(f.resolution().width())).collect()),
        height: span(formats.iter().map(|f| f64::from(f.resolution().height())).collect()),
        frame_rate: span(formats.iter().map(|f| f64::from(f.frame_rate())).collect()),
    })
}

impl CameraHandle {
    async fn open(constraints: &StreamConstraints) -> Result<Self, PlatformError> {
        let device_id = constraints.video.device_id.clone();
        let video = &constraints.video;
        let requested = match video.ideal_resolution {
            Some(res) => RequestedFormatType::Closest(CameraFormat::new_from(
                res.width,
                res.height,
                FrameFormat::MJPEG,
                video.ideal_frame_rate.unwrap_or(30),
            )),
            None => RequestedFormatType::AbsoluteHighestResolution,
        };

        let shared = Arc::new(CameraShared::default());
        shared.running.store(true, Ordering::SeqCst);
        let (opened_tx, opened_rx) = oneshot::channel();

        let index = camera_index(&device_id);
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::spawn(move || {
            let format = RequestedFormat::new::<RgbFormat>(requested);
            let mut camera = match Camera::new(index.clone(), format) {
                Ok(c) => c,
                Err(e) => {
                    let context = format!("Could not open camera {:?}", index);
                    let _ = opened_tx.send(Err(camera_error(&context, &e)));
                    return;
                }
            };
            let capabilities = camera
                .compatible_camera_formats()
                .ok()
                .and_then(|formats| ranges(&formats));
            if let Err(e) = camera.open_stream() {
                let _ = opened_tx.send(Err(camera_error("Could not start video source", &e)));
                return;
            }

            let _ = opened_tx.send(Ok(OpenedCamera {
                format: camera.camera_format(),
                capabilities,
            }));

            while thread_shared.running.load(Ordering::SeqCst) {
                match camera.frame() {
                    Ok(frame) => {
                        if let Some(stdin) = thread_shared.encoder_input.lock().as_mut() {
                            if let Err(e) = stdin.write_all(frame.buffer()) {
                                tracing::debug!("Encoder input closed: {}", e);
                            }
                        }
                        *thread_shared.latest.lock() = Some(frame);
                    }
                    Err(e) => tracing::debug!("Failed to capture frame: {}", e),
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {}", e);
            }
            tracing::debug!("Camera thread for {:?} stopped", index);
        });

        let opened = opened_rx
            .await
            .map_err(|_| PlatformError::other("Camera thread exited during open"))??;

        tracing::info!(
            "Camera {} opened: {}x{} @ {}fps ({:?})",
            device_id,
            opened.format.resolution().width(),
            opened.format.resolution().height(),
            opened.format.frame_rate(),
            opened.format.format()
        );

        Ok(Self {
            device_id,
            format: opened.format,
            capabilities: opened.capabilities,
            shared,
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.encoder_input.lock().take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct HardwareStream {
    camera: CameraHandle,
    audio: Option<TrackSettings>,
    ffmpeg_available: bool,
}

impl MediaStream for HardwareStream {
    fn video_settings(&self) -> TrackSettings {
        let res = self.camera.format.resolution();
        TrackSettings {
            device_id: Some(self.camera.device_id.clone()),
            width: Some(res.width()),
            height: Some(res.height()),
            frame_rate: Some(f64::from(self.camera.format.frame_rate())),
        }
    }

    fn video_capabilities(&self) -> Option<TrackCapabilities> {
        self.camera.capabilities.clone()
    }

    fn audio_settings(&self) -> Option<TrackSettings> {
        self.audio.clone()
    }

    fn create_encoder(
        &mut self,
        config: &EncoderConfig,
    ) -> Result<Box<dyn ChunkEncoder>, PlatformError> {
        if !self.ffmpeg_available {
            return Err(PlatformError::new(PlatformErrorKind::Unsupported, "FFmpeg not found"));
        }
        let res = self.camera.format.resolution();
        Ok(Box::new(FfmpegEncoder {
            config: config.clone(),
            resolution: Resolution::new(res.width(), res.height()),
            frame_rate: self.camera.format.frame_rate(),
            pixel_format: self.camera.format.format(),
            shared: Arc::clone(&self.camera.shared),
            process: None,
            reader: None,
        }))
    }

    fn grab_frame(&self) -> Result<Frame, PlatformError> {
        let buffer = self
            .camera
            .shared
            .latest
            .lock()
            .clone()
            .ok_or_else(|| PlatformError::other("No frame captured yet"))?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| PlatformError::other(format!("Frame decode error: {}", e)))?;
        Ok(Frame {
            width: image.width(),
            height: image.height(),
            rgb: image.into_raw(),
        })
    }

    fn release(&mut self) {
        self.camera.stop();
    }
}

/// Raw camera frames in, WebM chunks out
struct FfmpegEncoder {
    config: EncoderConfig,
    resolution: Resolution,
    frame_rate: u32,
    pixel_format: FrameFormat,
    shared: Arc<CameraShared>,
    process: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl FfmpegEncoder {
    fn input_args(&self) -> Vec<String> {
        let size = self.resolution.to_string();
        let fps = self.frame_rate.max(1).to_string();
        match self.pixel_format {
            FrameFormat::MJPEG => vec!["-f".into(), "mjpeg".into(), "-framerate".into(), fps],
            other => {
                let pix_fmt = match other {
                    FrameFormat::YUYV => "yuyv422",
                    FrameFormat::NV12 => "nv12",
                    FrameFormat::GRAY => "gray",
                    FrameFormat::RAWRGB => "rgb24",
                    _ => {
                        tracing::warn!("Unknown camera format {:?}, falling back to yuyv422", other);
                        "yuyv422"
                    }
                };
                vec![
                    "-f".into(),
                    "rawvideo".into(),
                    "-pixel_format".into(),
                    pix_fmt.into(),
                    "-video_size".into(),
                    size,
                    "-framerate".into(),
                    fps,
                ]
            }
        }
    }

    fn codec(&self) -> &'static str {
        if self.config.mime_type.contains("vp9") {
            "libvpx-vp9"
        } else {
            "libvpx"
        }
    }
}

/// Forward FFmpeg output, one chunk per timeslice
fn forward_chunks(mut stdout: impl Read, timeslice: Duration, sink: ChunkSender) {
    let mut pending = Vec::new();
    let mut last_flush = Instant::now();
    let mut buf = [0u8; 64 * 1024];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => pending.extend_from_slice(&buf[..n]),
            Err(e) => {
                tracing::warn!("Failed to read encoder output: {}", e);
                break;
            }
        }
        if last_flush.elapsed() >= timeslice && !pending.is_empty() {
            if sink.send(std::mem::take(&mut pending)).is_err() {
                return;
            }
            last_flush = Instant::now();
        }
    }
    if !pending.is_empty() {
        let _ = sink.send(pending);
    }
}

impl ChunkEncoder for FfmpegEncoder {
    fn mime_type(&self) -> &str {
        &self.config.mime_type
    }

    fn start(&mut self, timeslice: Duration, sink: ChunkSender) -> Result<(), PlatformError> {
        let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into()];
        args.extend(self.input_args());
        args.extend([
            "-i".to_string(),
            "-".to_string(),
            "-c:v".to_string(),
            self.codec().to_string(),
            "-b:v".to_string(),
            self.config.video_bits_per_second.to_string(),
            "-deadline".to_string(),
            "realtime".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-f".to_string(),
            "webm".to_string(),
            "pipe:1".to_string(),
        ]);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlatformError::other(format!("Failed to start FFmpeg: {}", e)))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| PlatformError::other("FFmpeg stdout unavailable"))?;
        let stdin = process.stdin.take();

        self.reader = Some(std::thread::spawn(move || {
            forward_chunks(stdout, timeslice, sink)
        }));
        *self.shared.encoder_input.lock() = stdin;
        self.process = Some(process);

        tracing::info!(
            "Started FFmpeg encoder: {} @ {}fps, {} at {} bps",
            self.resolution,
            self.frame_rate,
            self.codec(),
            self.config.video_bits_per_second
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        // closing stdin lets FFmpeg flush the tail of the stream
        self.shared.encoder_input.lock().take();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(mut process) = self.process.take() {
            let status = process
                .wait()
                .map_err(|e| PlatformError::other(format!("FFmpeg did not exit: {}", e)))?;
            if !status.success() {
                tracing::warn!("FFmpeg exited with status {}", status);
            }
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.process.is_some()
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.process.is_some() {
            let _ = ChunkEncoder::stop(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_index_parsing() {
        assert!(matches!(camera_index("0"), CameraIndex::Index(0)));
        assert!(matches!(camera_index("/dev/video2"), CameraIndex::String(_)));
    }

    #[test]
    fn test_camera_errors_carry_kind() {
        let busy = NokhwaError::OpenStreamError("Device or resource busy (os error 16)".to_string());
        assert_eq!(camera_error_kind(&busy), PlatformErrorKind::Busy);

        let missing = NokhwaError::OpenDeviceError(
            "/dev/video9".to_string(),
            "No such file or directory (os error 2)".to_string(),
        );
        assert_eq!(camera_error_kind(&missing), PlatformErrorKind::NotFound);

        let denied = NokhwaError::OpenDeviceError(
            "/dev/video0".to_string(),
            "Permission denied (os error 13)".to_string(),
        );
        assert_eq!(camera_error_kind(&denied), PlatformErrorKind::PermissionDenied);

        let gone = NokhwaError::OpenDeviceError("3".to_string(), "unknown".to_string());
        assert_eq!(camera_error_kind(&gone), PlatformErrorKind::NotFound);

        let stalled = NokhwaError::OpenStreamError("timed out".to_string());
        assert_eq!(camera_error_kind(&stalled), PlatformErrorKind::Other);

        let err = camera_error("Could not start video source", &busy);
        assert!(matches!(
            crate::session::classify_acquisition_error(err),
            crate::utils::error::CaptureError::DeviceInUse(_)
        ));
    }

    #[test]
    fn test_ranges_from_formats() {
        let formats = [
            CameraFormat::new_from(640, 480, FrameFormat::MJPEG, 30),
            CameraFormat::new_from(1920, 1080, FrameFormat::MJPEG, 60),
        ];
        let caps = ranges(&formats).unwrap();
        assert_eq!(caps.width, Some(CapabilityRange::new(640.0, 1920.0)));
        assert_eq!(caps.frame_rate, Some(CapabilityRange::new(30.0, 60.0)));
        assert!(ranges(&[]).is_none());
    }

    #[test]
    fn test_chunks_flushed_at_eof() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forward_chunks(&[1u8, 2, 3][..], Duration::from_secs(60), tx);
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
        assert!(rx.try_recv().is_err());
    }
}
