//! In-process capture platform
//!
//! Deterministic devices, streams and encoders with knobs for every failure
//! the session layer has to handle. Used by the tests and by the console demo
//! when no hardware adapter is compiled in.

use super::traits::{
    CapabilityRange, CapturePlatform, ChunkEncoder, ChunkSender, DeviceInfo, DeviceKind,
    EncoderConfig, Frame, MediaStream, PlatformError, Resolution, StreamConstraints,
    TrackCapabilities, TrackSettings,
};
use crate::recorder::ebml::{live_cluster, live_stream_header};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How a fake video device behaves when acquired
#[derive(Debug, Clone, PartialEq)]
pub struct FakeCamera {
    /// Ranges reported by the track; `None` when the platform hides them
    pub capabilities: Option<TrackCapabilities>,

    /// Delivered when no ideal resolution is requested or it is out of range
    pub negotiated: Option<Resolution>,

    /// Delivered when no ideal framerate is requested or it is out of range
    pub frame_rate: Option<f64>,
}

impl Default for FakeCamera {
    fn default() -> Self {
        Self {
            capabilities: Some(TrackCapabilities {
                width: Some(CapabilityRange::new(640.0, 1920.0)),
                height: Some(CapabilityRange::new(480.0, 1080.0)),
                frame_rate: Some(CapabilityRange::new(1.0, 60.0)),
            }),
            negotiated: Some(Resolution::new(1280, 720)),
            frame_rate: Some(30.0),
        }
    }
}

impl FakeCamera {
    fn negotiate(&self, constraints: &StreamConstraints) -> TrackSettings {
        let caps = self.capabilities.clone().unwrap_or_default();

        let resolution = constraints
            .video
            .ideal_resolution
            .filter(|res| {
                caps.width.is_some_and(|w| w.contains(f64::from(res.width)))
                    && caps.height.is_some_and(|h| h.contains(f64::from(res.height)))
            })
            .or(self.negotiated);

        let frame_rate = constraints
            .video
            .ideal_frame_rate
            .map(f64::from)
            .filter(|fps| caps.frame_rate.is_some_and(|r| r.contains(*fps)))
            .or(self.frame_rate);

        TrackSettings {
            device_id: Some(constraints.video.device_id.clone()),
            width: resolution.map(|r| r.width),
            height: resolution.map(|r| r.height),
            frame_rate,
        }
    }
}

#[derive(Default)]
struct FakeState {
    devices: Vec<DeviceInfo>,
    cameras: HashMap<String, FakeCamera>,
    supported_mime_types: Vec<String>,
    acquire_failures: VecDeque<PlatformError>,
    encoder_failures: VecDeque<PlatformError>,
    /// requested audio id -> id the live track reports
    audio_substitutions: HashMap<String, String>,
    /// Devices held by "another application"
    held_devices: HashSet<String>,
    /// stream id -> video device
    open_streams: HashMap<u64, String>,
    next_stream_id: u64,
    acquisitions: Vec<StreamConstraints>,
    permission_requests: usize,
    chunk_sink: Option<ChunkSender>,
    encoder_timeslice: Option<Duration>,
    final_chunk: Option<Vec<u8>>,
    frame: Option<Frame>,
    auto_emit: bool,
}

/// Scriptable [`CapturePlatform`]; clones share state
#[derive(Clone)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        let state = FakeState {
            devices,
            supported_mime_types: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/webm;codecs=vp8,opus".to_string(),
                "video/webm".to_string(),
            ],
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A capture card, a webcam and their microphones; encoders emit on their own
    pub fn demo() -> Self {
        let platform = Self::new(vec![
            DeviceInfo::video("cam-link-4k", "Cam Link 4K"),
            DeviceInfo::video("facetime-hd", "FaceTime HD Camera"),
            DeviceInfo::audio("default", "Default - MacBook Pro Microphone"),
            DeviceInfo::audio("cam-link-4k-audio", "Cam Link 4K Audio"),
            DeviceInfo::audio("macbook-mic", "MacBook Pro Microphone"),
        ]);
        platform.set_camera(
            "facetime-hd",
            FakeCamera {
                capabilities: Some(TrackCapabilities {
                    width: Some(CapabilityRange::new(640.0, 1280.0)),
                    height: Some(CapabilityRange::new(480.0, 720.0)),
                    frame_rate: Some(CapabilityRange::new(1.0, 30.0)),
                }),
                negotiated: Some(Resolution::new(1280, 720)),
                frame_rate: Some(29.97),
            },
        );
        platform.state.lock().auto_emit = true;
        platform
    }

    pub fn set_camera(&self, device_id: &str, camera: FakeCamera) {
        self.state.lock().cameras.insert(device_id.to_string(), camera);
    }

    pub fn add_device(&self, device: DeviceInfo) {
        self.state.lock().devices.push(device);
    }

    pub fn remove_device(&self, device_id: &str) {
        self.state.lock().devices.retain(|d| d.id != device_id);
    }

    pub fn set_supported_mime_types(&self, mime_types: &[&str]) {
        self.state.lock().supported_mime_types =
            mime_types.iter().map(|m| m.to_string()).collect();
    }

    /// Queue a failure for the next acquisition; queued failures are used in order
    pub fn fail_next_acquire(&self, err: PlatformError) {
        self.state.lock().acquire_failures.push_back(err);
    }

    pub fn fail_next_encoder(&self, err: PlatformError) {
        self.state.lock().encoder_failures.push_back(err);
    }

    /// Live audio tracks for `requested` report `actual` as their device
    pub fn substitute_audio(&self, requested: &str, actual: &str) {
        self.state
            .lock()
            .audio_substitutions
            .insert(requested.to_string(), actual.to_string());
    }

    /// Simulate another application holding the device
    pub fn hold_device(&self, device_id: &str) {
        self.state.lock().held_devices.insert(device_id.to_string());
    }

    pub fn release_device(&self, device_id: &str) {
        self.state.lock().held_devices.remove(device_id);
    }

    /// Streams acquired and not yet released
    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams.len()
    }

    /// Every constraint set passed to `acquire`, failed attempts included
    pub fn acquisitions(&self) -> Vec<StreamConstraints> {
        self.state.lock().acquisitions.clone()
    }

    pub fn permission_requests(&self) -> usize {
        self.state.lock().permission_requests
    }

    /// Timeslice of the running encoder
    pub fn encoder_timeslice(&self) -> Option<Duration> {
        self.state.lock().encoder_timeslice
    }

    /// Push a chunk from the running encoder; `false` when none is running
    pub fn emit_chunk(&self, chunk: Vec<u8>) -> bool {
        match self.state.lock().chunk_sink.as_ref() {
            Some(sink) => sink.send(chunk).is_ok(),
            None => false,
        }
    }

    /// Partial chunk flushed when the encoder stops
    pub fn set_final_chunk(&self, chunk: Vec<u8>) {
        self.state.lock().final_chunk = Some(chunk);
    }

    pub fn set_frame(&self, frame: Frame) {
        self.state.lock().frame = Some(frame);
    }
}

#[async_trait]
impl CapturePlatform for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn request_permission(&self) -> Result<(), PlatformError> {
        self.state.lock().permission_requests += 1;
        Ok(())
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, PlatformError> {
        Ok(self.state.lock().devices.clone())
    }

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn MediaStream>, PlatformError> {
        let mut state = self.state.lock();
        state.acquisitions.push(constraints.clone());

        if let Some(err) = state.acquire_failures.pop_front() {
            return Err(err);
        }

        let video_id = &constraints.video.device_id;
        let has_device = |kind: DeviceKind, id: &str| {
            state.devices.iter().any(|d| d.kind == kind && d.id == id)
        };
        if !has_device(DeviceKind::Video, video_id) {
            return Err(PlatformError::not_found("Requested device not found"));
        }
        if let Some(audio) = &constraints.audio {
            if !has_device(DeviceKind::Audio, &audio.device_id) {
                return Err(PlatformError::not_found("Requested device not found"));
            }
        }
        let in_use = state.held_devices.contains(video_id)
            || state.open_streams.values().any(|id| id == video_id);
        if in_use {
            return Err(PlatformError::busy("Could not start video source"));
        }

        let camera = state.cameras.get(video_id).cloned().unwrap_or_default();
        let video = camera.negotiate(constraints);
        let audio = constraints.audio.as_ref().map(|audio| TrackSettings {
            device_id: Some(
                state
                    .audio_substitutions
                    .get(&audio.device_id)
                    .cloned()
                    .unwrap_or_else(|| audio.device_id.clone()),
            ),
            ..Default::default()
        });

        let id = state.next_stream_id;
        state.next_stream_id += 1;
        state.open_streams.insert(id, video_id.clone());

        Ok(Box::new(FakeStream {
            id,
            state: Arc::clone(&self.state),
            video,
            capabilities: camera.capabilities,
            audio,
            released: false,
        }))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.state
            .lock()
            .supported_mime_types
            .iter()
            .any(|m| m == mime_type)
    }
}

struct FakeStream {
    id: u64,
    state: Arc<Mutex<FakeState>>,
    video: TrackSettings,
    capabilities: Option<TrackCapabilities>,
    audio: Option<TrackSettings>,
    released: bool,
}

impl MediaStream for FakeStream {
    fn video_settings(&self) -> TrackSettings {
        self.video.clone()
    }

    fn video_capabilities(&self) -> Option<TrackCapabilities> {
        self.capabilities.clone()
    }

    fn audio_settings(&self) -> Option<TrackSettings> {
        self.audio.clone()
    }

    fn create_encoder(
        &mut self,
        config: &EncoderConfig,
    ) -> Result<Box<dyn ChunkEncoder>, PlatformError> {
        if let Some(err) = self.state.lock().encoder_failures.pop_front() {
            return Err(err);
        }
        Ok(Box::new(FakeEncoder {
            mime_type: config.mime_type.clone(),
            state: Arc::clone(&self.state),
            recording: false,
            emitter: None,
        }))
    }

    fn grab_frame(&self) -> Result<Frame, PlatformError> {
        if self.released {
            return Err(PlatformError::other("Stream has been released"));
        }
        if let Some(frame) = self.state.lock().frame.clone() {
            return Ok(frame);
        }
        let res = self.video.resolution().unwrap_or(Resolution::new(640, 480));
        Ok(gradient(res))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.state.lock().open_streams.remove(&self.id);
    }
}

fn gradient(res: Resolution) -> Frame {
    let mut rgb = Vec::with_capacity((res.width * res.height * 3) as usize);
    for y in 0..res.height {
        for x in 0..res.width {
            rgb.push((x * 255 / res.width.max(1)) as u8);
            rgb.push((y * 255 / res.height.max(1)) as u8);
            rgb.push(128);
        }
    }
    Frame {
        width: res.width,
        height: res.height,
        rgb,
    }
}

struct FakeEncoder {
    mime_type: String,
    state: Arc<Mutex<FakeState>>,
    recording: bool,
    /// Stop flag of the demo emitter thread
    emitter: Option<Arc<AtomicBool>>,
}

impl FakeEncoder {
    fn spawn_emitter(&mut self, timeslice: Duration, sink: ChunkSender) {
        let running = Arc::new(AtomicBool::new(true));
        self.emitter = Some(Arc::clone(&running));

        thread::spawn(move || {
            if sink.send(live_stream_header("streamcap-fake")).is_err() {
                return;
            }
            let step = timeslice.as_millis() as u64;
            let mut timecode = 0;
            loop {
                thread::sleep(timeslice);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if sink.send(live_cluster(timecode, &[0x81, 0, 0, 0x80])).is_err() {
                    break;
                }
                timecode += step;
            }
        });
    }
}

impl ChunkEncoder for FakeEncoder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn start(&mut self, timeslice: Duration, sink: ChunkSender) -> Result<(), PlatformError> {
        let auto_emit = {
            let mut state = self.state.lock();
            state.encoder_timeslice = Some(timeslice);
            state.chunk_sink = Some(sink.clone());
            state.auto_emit
        };
        if auto_emit {
            self.spawn_emitter(timeslice, sink);
        }
        self.recording = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        if let Some(running) = self.emitter.take() {
            running.store(false, Ordering::SeqCst);
        }
        let mut state = self.state.lock();
        let sink = state.chunk_sink.take();
        if let (Some(sink), Some(chunk)) = (sink, state.final_chunk.take()) {
            let _ = sink.send(chunk);
        }
        state.encoder_timeslice = None;
        self.recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::PlatformErrorKind;
    use tokio::sync::mpsc;

    fn platform() -> FakePlatform {
        FakePlatform::new(vec![
            DeviceInfo::video("v1", "Capture"),
            DeviceInfo::audio("a1", "Capture Audio"),
        ])
    }

    #[tokio::test]
    async fn test_second_acquisition_of_open_device_is_busy() {
        let platform = platform();
        let mut first = platform
            .acquire(&StreamConstraints::minimal("v1", "a1"))
            .await
            .unwrap();

        let err = platform
            .acquire(&StreamConstraints::probe("v1"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, PlatformErrorKind::Busy);

        first.release();
        first.release();
        assert_eq!(platform.open_streams(), 0);
        assert!(platform.acquire(&StreamConstraints::probe("v1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_ideal_values_honoured_only_in_range() {
        let platform = platform();
        let stream = platform
            .acquire(&StreamConstraints::full("v1", "a1", Resolution::new(3840, 2160), 30))
            .await
            .unwrap();
        let settings = stream.video_settings();
        assert_eq!(settings.resolution(), Some(Resolution::new(1280, 720)));
        assert_eq!(settings.rounded_frame_rate(), Some(30));
    }

    #[tokio::test]
    async fn test_encoder_flushes_final_chunk_on_stop() {
        let platform = platform();
        let mut stream = platform
            .acquire(&StreamConstraints::minimal("v1", "a1"))
            .await
            .unwrap();
        let mut encoder = stream
            .create_encoder(&EncoderConfig {
                mime_type: "video/webm".to_string(),
                video_bits_per_second: 1,
            })
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        encoder.start(Duration::from_millis(100), tx).unwrap();
        assert!(platform.emit_chunk(vec![1]));
        platform.set_final_chunk(vec![2]);
        encoder.stop().unwrap();

        assert!(!platform.emit_chunk(vec![3]));
        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gradient_frame_size() {
        let frame = gradient(Resolution::new(4, 2));
        assert_eq!(frame.rgb.len(), 4 * 2 * 3);
    }
}
