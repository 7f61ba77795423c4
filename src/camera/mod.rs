//! Camera frame source
//!
//! Captures frames with nokhwa on a background thread into a triple buffer.
//! The scheduler pulls the newest frame on each tick; a frame is handed out
//! at most once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

use crate::frame::RawFrame;
use crate::scheduler::FrameSource;

type FrameSlot = Arc<Mutex<Option<RawFrame>>>;

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Live camera feeding the frame scheduler
pub struct CameraSource {
    frames: [FrameSlot; 3],
    /// Sequence number of the newest complete frame (0 = none yet)
    latest: Arc<AtomicU64>,
    /// Sequence number last returned by `capture`
    taken: AtomicU64,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    requested: (u32, u32),
}

impl CameraSource {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Open `camera_index` and start capturing near `width` x `height`
    pub fn open(camera_index: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        let frames: [FrameSlot; 3] = Default::default();
        let latest = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let thread_frames = frames.clone();
        let thread_latest = latest.clone();
        let thread_running = running.clone();

        let handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                capture_thread(
                    camera_index,
                    (width, height),
                    thread_frames,
                    thread_latest,
                    thread_running,
                )
            })?;

        Ok(Self {
            frames,
            latest,
            taken: AtomicU64::new(0),
            running,
            thread_handle: Mutex::new(Some(handle)),
            requested: (width, height),
        })
    }

    /// False once stopped or if the camera could not be opened
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn requested_resolution(&self) -> (u32, u32) {
        self.requested
    }

    /// Frames captured so far
    pub fn frame_count(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("Camera capture thread panicked");
            }
        }
    }
}

impl FrameSource for CameraSource {
    fn capture(&self) -> Option<RawFrame> {
        let seq = self.latest.load(Ordering::Acquire);
        if seq == 0 || self.taken.swap(seq, Ordering::AcqRel) == seq {
            return None;
        }
        self.frames[(seq % 3) as usize].lock().clone()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_camera(index: CameraIndex, (width, height): (u32, u32)) -> Option<Camera> {
    let attempts = [
        RequestedFormatType::HighestResolution(Resolution::new(width, height)),
        RequestedFormatType::AbsoluteHighestResolution,
        RequestedFormatType::None,
    ];
    for format in attempts {
        let label = format!("{:?}", format);
        match Camera::new(index.clone(), RequestedFormat::new::<RgbAFormat>(format)) {
            Ok(camera) => return Some(camera),
            Err(e) => tracing::warn!("Failed to open camera with {}: {:?}", label, e),
        }
    }
    None
}

fn capture_thread(
    camera_index: u32,
    requested: (u32, u32),
    frames: [FrameSlot; 3],
    latest: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
) {
    tracing::info!(camera = camera_index, "Starting camera capture thread");

    let Some(mut camera) = open_camera(CameraIndex::Index(camera_index), requested) else {
        tracing::error!(camera = camera_index, "Failed to open camera with all format attempts");
        running.store(false, Ordering::Release);
        return;
    };

    if let Err(e) = camera.open_stream() {
        tracing::error!("Failed to open camera stream: {:?}", e);
        running.store(false, Ordering::Release);
        return;
    }

    tracing::info!(
        "Camera opened: {} ({}x{})",
        camera.info().human_name(),
        camera.resolution().width(),
        camera.resolution().height()
    );

    let mut seq: u64 = 0;
    while running.load(Ordering::Acquire) {
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!("Failed to capture frame: {:?}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        match buffer.decode_image::<RgbAFormat>() {
            Ok(image) => {
                // nokhwa may link a different `image` version; go through raw bytes
                let (width, height) = (image.width(), image.height());
                match RawFrame::new(width, height, image.into_raw()) {
                    Ok(frame) => {
                        seq += 1;
                        *frames[(seq % 3) as usize].lock() = Some(frame);
                        latest.store(seq, Ordering::Release);
                    }
                    Err(e) => tracing::warn!("Dropping camera frame: {}", e),
                }
            }
            Err(e) => tracing::warn!("Failed to decode frame: {:?}", e),
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop camera stream: {:?}", e);
    }
    tracing::info!("Camera capture thread stopped");
}
