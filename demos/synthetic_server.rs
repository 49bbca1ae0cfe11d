//! Serve all four cameras from a synthetic backend.
//!
//! Frames are moving gradients, the "encoder" passes pixels through
//! unchanged and the locator reports a slow yaw rotation. For H.26x
//! profiles each frame is preceded by a small header unit carrying the
//! frame's pose, the way a header-splitting encoder emits them. Useful for
//! exercising clients without a headset.
//!
//! Usage:
//!   cargo run --example synthetic_server
//!   VLCSTREAM_BASE_PORT=4800 VLCSTREAM_QUEUED_OUTPUT=1 cargo run --example synthetic_server

use std::sync::Arc;
use std::time::{Duration, Instant};
use vlcstream::protocol::{VLC_FPS, VLC_HEIGHT, VLC_WIDTH};
use vlcstream::{
    Calibration, CalibrationSource, CaptureDevice, CoordinateFrame, EncodedUnit, EncoderConfig,
    EncoderFactory, EncoderInput, Pose, RawFrame, SensorBackend, SensorId, Server, ServerConfig,
    SpatialLocator, StreamError, UnitSink, VideoEncoder,
};

struct GradientCamera {
    epoch: Instant,
    frame: u64,
}

impl CaptureDevice for GradientCamera {
    fn open_stream(&mut self) -> vlcstream::Result<()> {
        self.epoch = Instant::now();
        self.frame = 0;
        Ok(())
    }

    fn close_stream(&mut self) -> vlcstream::Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> vlcstream::Result<RawFrame> {
        let period = Duration::from_secs(1) / VLC_FPS;
        let due = self.epoch + period * self.frame as u32;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }

        let shift = self.frame as usize;
        let luma = (0..(VLC_WIDTH * VLC_HEIGHT) as usize)
            .map(|i| ((i % VLC_WIDTH as usize) + shift) as u8)
            .collect();
        let host_ticks = self.epoch.elapsed().as_nanos() as u64 / 100;
        self.frame += 1;

        Ok(RawFrame {
            luma,
            host_ticks,
            exposure: 10_000,
        })
    }
}

struct PassthroughEncoders;

struct PassthroughEncoder {
    sink: Box<dyn UnitSink>,
    frame_len: usize,
    split_headers: bool,
}

/// Annex B start code followed by an SPS NAL type.
const FAKE_HEADER: [u8; 5] = [0, 0, 0, 1, 0x67];

impl VideoEncoder for PassthroughEncoder {
    fn submit(&mut self, input: EncoderInput) -> vlcstream::Result<()> {
        if input.buffer.len() != self.frame_len {
            return Err(StreamError::Encoder(format!(
                "expected {} byte frame, got {}",
                self.frame_len,
                input.buffer.len()
            )));
        }
        let data_pose = if self.split_headers {
            self.sink.deliver(EncodedUnit {
                payload: FAKE_HEADER.to_vec(),
                timestamp: input.timestamp,
                pose: input.pose,
            });
            None
        } else {
            input.pose
        };
        self.sink.deliver(EncodedUnit {
            payload: input.buffer,
            timestamp: input.timestamp,
            pose: data_pose,
        });
        Ok(())
    }

    fn flush(&mut self) -> vlcstream::Result<()> {
        Ok(())
    }
}

impl EncoderFactory for PassthroughEncoders {
    fn configure(
        &self,
        config: &EncoderConfig,
        sink: Box<dyn UnitSink>,
    ) -> vlcstream::Result<Box<dyn VideoEncoder>> {
        log::info!(
            "Passthrough encoder: {:?} {}x{} layout={:?} options={:?}",
            config.format.profile,
            config.format.width,
            config.format.height,
            config.layout,
            config.options
        );
        let luma = config.format.luma_size();
        Ok(Box::new(PassthroughEncoder {
            sink,
            frame_len: luma + config.layout.chroma_len(luma),
            split_headers: config.format.profile.splits_headers(),
        }))
    }
}

struct YawLocator;

impl SpatialLocator for YawLocator {
    fn world_frame(&self, _timestamp: u64) -> CoordinateFrame {
        CoordinateFrame(0)
    }

    fn locate(&self, timestamp: u64, _frame: CoordinateFrame) -> Pose {
        let angle = (timestamp as f64 / 1e7 * 0.5) as f32;
        let (s, c) = angle.sin_cos();
        Pose::new([
            [c, 0.0, -s, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [s, 0.0, c, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }
}

struct FlatCalibration;

impl CalibrationSource for FlatCalibration {
    fn intrinsics(&self) -> vlcstream::Result<Calibration> {
        let n = (VLC_WIDTH * VLC_HEIGHT) as usize;
        let xs: Vec<f32> = (0..n).map(|i| (i % VLC_WIDTH as usize) as f32).collect();
        let ys: Vec<f32> = (0..n).map(|i| (i / VLC_WIDTH as usize) as f32).collect();
        Ok(Calibration {
            uv2x: xs.clone(),
            uv2y: ys.clone(),
            mapx: xs,
            mapy: ys,
            ..Default::default()
        })
    }

    fn extrinsics(&self) -> vlcstream::Result<[[f32; 4]; 4]> {
        Ok(Pose::identity().m)
    }
}

struct SyntheticBackend;

impl SensorBackend for SyntheticBackend {
    fn capture_device(&self, _sensor: SensorId) -> vlcstream::Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(GradientCamera {
            epoch: Instant::now(),
            frame: 0,
        }))
    }

    fn encoders(&self) -> &dyn EncoderFactory {
        &PassthroughEncoders
    }

    fn locator(&self) -> Option<&dyn SpatialLocator> {
        Some(&YawLocator)
    }

    fn calibration(&self, _sensor: SensorId) -> &dyn CalibrationSource {
        &FlatCalibration
    }
}

fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    let backend: Arc<dyn SensorBackend> = Arc::new(SyntheticBackend);

    let mut handles = Vec::new();
    for sensor in SensorId::ALL {
        match Server::bind(config.clone(), sensor, backend.clone()).and_then(Server::spawn) {
            Ok(handle) => {
                eprintln!("[{}] listening on {}", sensor.name(), handle.local_addr());
                handles.push(handle);
            }
            Err(e) => {
                eprintln!("[{}] failed to start: {}", sensor.name(), e);
                std::process::exit(1);
            }
        }
    }

    eprintln!("Serving synthetic cameras (Ctrl+C to stop)...");
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
