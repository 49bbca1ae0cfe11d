//! Per-client capture → encode → transmit pipeline.
//!
//! A session moves through `Negotiating → Streaming → Draining → Closed`.
//! The capture loop runs on the caller's thread and blocks on the device;
//! the encoder delivers units to the [`EncoderBridge`] on its own thread.
//! A failed transmit raises the disconnect flag, which the loop checks
//! between frames, so at most one more frame is submitted after the client
//! goes away.

use crate::device::{CaptureDevice, SpatialLocator};
use crate::encoder::{
    EncoderBridge, EncoderConfig, EncoderFactory, QueuedBridge, UnitSink, VideoEncoder,
};
use crate::negotiate::{FormatNegotiator, Negotiated};
use crate::types::{EncoderInput, RawFrame, StreamFormat};
use crate::{Result, StreamError};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Session lifecycle. Every session starts in `Negotiating`; the states it
/// passed through are returned in [`SessionReport::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Streaming,
    Draining,
    Closed,
}

/// Why the capture loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The device failed to deliver a frame.
    DeviceFailure,
    /// A transmit failed and raised the disconnect flag.
    ClientDisconnected,
    /// The encoder rejected a submitted frame.
    EncoderFailure,
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub format: StreamFormat,
    /// Frames pulled from the device.
    pub acquired: u64,
    /// Frames handed to the encoder.
    pub submitted: u64,
    pub exit: ExitReason,
    /// States visited, in order.
    pub states: Vec<SessionState>,
}

/// One client's pipeline.
///
/// Owns the disconnect flag and, through the bridge it hands to the encoder,
/// the pose latch. Nothing here is shared with other sessions.
pub struct Session<'a> {
    device: &'a mut dyn CaptureDevice,
    encoders: &'a dyn EncoderFactory,
    locator: Option<&'a dyn SpatialLocator>,
    negotiator: FormatNegotiator,
    pose_tagging: bool,
    queue_depth: Option<usize>,
    disconnect: Arc<AtomicBool>,
    states: Vec<SessionState>,
}

impl<'a> Session<'a> {
    pub fn new(device: &'a mut dyn CaptureDevice, encoders: &'a dyn EncoderFactory) -> Self {
        Self {
            device,
            encoders,
            locator: None,
            negotiator: FormatNegotiator::default(),
            pose_tagging: false,
            queue_depth: None,
            disconnect: Arc::new(AtomicBool::new(false)),
            states: vec![SessionState::Negotiating],
        }
    }

    /// Tag every transmitted unit with a pose resolved by `locator`.
    pub fn with_pose(mut self, locator: &'a dyn SpatialLocator) -> Self {
        self.locator = Some(locator);
        self.pose_tagging = true;
        self
    }

    /// Transmit from a dedicated thread fed by a bounded queue.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    pub fn with_negotiator(mut self, negotiator: FormatNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    /// Flag that ends the capture loop at the next frame boundary.
    pub fn disconnect_flag(&self) -> Arc<AtomicBool> {
        self.disconnect.clone()
    }

    fn transition(&mut self, next: SessionState) {
        if let Some(prev) = self.states.last() {
            log::debug!("Session {:?} -> {:?}", prev, next);
        }
        self.states.push(next);
    }

    /// Negotiate with the client on `reader`, then stream to `writer` until
    /// the device fails or the client disconnects.
    ///
    /// Negotiation and encoder configuration failures are returned as errors
    /// before the device is opened. Device and transmit failures end the
    /// session normally and are reported in [`SessionReport::exit`].
    pub fn run<R, W>(mut self, reader: &mut R, writer: W) -> Result<SessionReport>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        let negotiated = self.negotiator.negotiate(reader)?;
        let format = negotiated.format;

        let mut encoder = self.configure_encoder(&negotiated, writer)?;
        self.transition(SessionState::Streaming);

        let mut acquired = 0u64;
        let mut submitted = 0u64;
        let exit = match self.device.open_stream() {
            Ok(()) => {
                let exit = self.capture_loop(
                    encoder.as_mut(),
                    &negotiated,
                    &mut acquired,
                    &mut submitted,
                );
                if let Err(e) = self.device.close_stream() {
                    log::warn!("Failed to close device stream: {}", e);
                }
                exit
            }
            Err(e) => {
                log::warn!("Failed to open device stream: {}", e);
                ExitReason::DeviceFailure
            }
        };

        self.transition(SessionState::Draining);
        if let Err(e) = encoder.flush() {
            log::warn!("Encoder flush failed: {}", e);
        }
        drop(encoder);
        self.transition(SessionState::Closed);

        log::info!(
            "Session closed ({:?}): acquired={} submitted={}",
            exit,
            acquired,
            submitted
        );

        Ok(SessionReport {
            format,
            acquired,
            submitted,
            exit,
            states: std::mem::take(&mut self.states),
        })
    }

    fn configure_encoder<W>(
        &self,
        negotiated: &Negotiated,
        writer: W,
    ) -> Result<Box<dyn VideoEncoder>>
    where
        W: Write + Send + 'static,
    {
        if self.pose_tagging && self.locator.is_none() {
            return Err(StreamError::Configuration(
                "pose tagging requires a spatial locator".into(),
            ));
        }

        let format = negotiated.format;
        let config = EncoderConfig {
            format,
            layout: format.profile.layout(),
            options: negotiated.options.clone(),
            pose_tagging: self.pose_tagging,
        };

        let bridge = EncoderBridge::new(
            writer,
            format.profile,
            self.pose_tagging,
            self.disconnect.clone(),
        );
        let sink: Box<dyn UnitSink> = match self.queue_depth {
            Some(depth) => {
                Box::new(QueuedBridge::spawn(bridge, depth, self.disconnect.clone())?)
            }
            None => Box::new(bridge),
        };

        self.encoders.configure(&config, sink)
    }

    fn capture_loop(
        &mut self,
        encoder: &mut dyn VideoEncoder,
        negotiated: &Negotiated,
        acquired: &mut u64,
        submitted: &mut u64,
    ) -> ExitReason {
        let divisor = negotiated.format.divisor as u32;
        let mut counter = 0u32;

        loop {
            let frame = match self.device.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::info!("Device acquisition failed: {}", e);
                    return ExitReason::DeviceFailure;
                }
            };
            *acquired += 1;

            if counter == 0 {
                let input = match self.prepare(frame, negotiated) {
                    Ok(input) => input,
                    Err(e) => {
                        log::warn!("Dropping session on bad frame: {}", e);
                        return ExitReason::DeviceFailure;
                    }
                };
                if let Err(e) = encoder.submit(input) {
                    log::warn!("Encoder rejected frame: {}", e);
                    return ExitReason::EncoderFailure;
                }
                *submitted += 1;
            }

            counter = (counter + 1) % divisor;

            if self.disconnect.load(Ordering::Relaxed) {
                return ExitReason::ClientDisconnected;
            }
        }
    }

    /// Pad to the encoder layout, correct the timestamp and attach the pose.
    /// Exactly `luma_size` bytes of the image are used.
    fn prepare(&self, frame: RawFrame, negotiated: &Negotiated) -> Result<EncoderInput> {
        let format = &negotiated.format;
        let luma_size = format.luma_size();
        let luma = frame.luma.get(..luma_size).ok_or_else(|| {
            StreamError::Device(format!(
                "frame has {} luma bytes, expected {}",
                frame.luma.len(),
                luma_size
            ))
        })?;
        let timestamp = negotiated.corrector.adjust(frame.host_ticks, frame.exposure);
        let pose = match (self.pose_tagging, self.locator) {
            (true, Some(locator)) => Some(locator.locate_in_world(timestamp)),
            _ => None,
        };

        Ok(EncoderInput {
            buffer: format.profile.layout().pad(luma),
            duration: format.frame_duration(),
            timestamp,
            pose,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::CoordinateFrame;
    use crate::protocol::{self, StreamRequest};
    use crate::transmit::tests::SharedSocket;
    use crate::types::{EncodedUnit, Pose, Profile, StreamMode};
    use std::io::{Cursor, IoSlice};
    use std::sync::Mutex;

    /// Device that plays back a fixed list of frames, then fails.
    pub(crate) struct ScriptedDevice {
        pub frames: std::collections::VecDeque<RawFrame>,
        pub opened: bool,
        pub closed: bool,
        pub fail_open: bool,
        /// Keep producing frames forever instead of failing.
        pub endless: bool,
        next_ticks: u64,
    }

    impl ScriptedDevice {
        pub fn new(frames: Vec<RawFrame>) -> Self {
            Self {
                frames: frames.into(),
                opened: false,
                closed: false,
                fail_open: false,
                endless: false,
                next_ticks: 0,
            }
        }

        pub fn endless() -> Self {
            let mut device = Self::new(Vec::new());
            device.endless = true;
            device
        }
    }

    impl CaptureDevice for ScriptedDevice {
        fn open_stream(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(StreamError::Device("sensor busy".into()));
            }
            self.opened = true;
            Ok(())
        }

        fn close_stream(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<RawFrame> {
            if let Some(frame) = self.frames.pop_front() {
                return Ok(frame);
            }
            if self.endless {
                self.next_ticks += 100;
                return Ok(frame(self.next_ticks, 0, 0));
            }
            Err(StreamError::Device("end of script".into()))
        }
    }

    /// Encoder double: one unit per submitted frame, carrying the frame's
    /// pose. Units are delivered before `submit` returns unless `hold` is
    /// set, in which case they wait for `flush`.
    #[derive(Default)]
    pub(crate) struct MockEncoders {
        pub inputs: Arc<Mutex<Vec<EncoderInput>>>,
        pub configs: Arc<Mutex<Vec<EncoderConfig>>>,
        pub flushed: Arc<AtomicBool>,
        pub reject: bool,
        pub hold: bool,
        /// Fail every submit after this many frames were accepted.
        pub fail_after: Option<usize>,
    }

    struct MockEncoder {
        sink: Box<dyn UnitSink>,
        inputs: Arc<Mutex<Vec<EncoderInput>>>,
        flushed: Arc<AtomicBool>,
        hold: bool,
        fail_after: Option<usize>,
        held: Vec<EncodedUnit>,
    }

    impl VideoEncoder for MockEncoder {
        fn submit(&mut self, input: EncoderInput) -> Result<()> {
            let mut inputs = self.inputs.lock().unwrap();
            if self.fail_after.is_some_and(|n| inputs.len() >= n) {
                return Err(StreamError::Encoder("out of buffers".into()));
            }
            let unit = EncodedUnit {
                payload: input.buffer[..input.buffer.len().min(4)].to_vec(),
                timestamp: input.timestamp,
                pose: input.pose,
            };
            inputs.push(input);
            drop(inputs);
            if self.hold {
                self.held.push(unit);
            } else {
                self.sink.deliver(unit);
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            for unit in self.held.drain(..) {
                self.sink.deliver(unit);
            }
            self.flushed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    impl EncoderFactory for MockEncoders {
        fn configure(
            &self,
            config: &EncoderConfig,
            sink: Box<dyn UnitSink>,
        ) -> Result<Box<dyn VideoEncoder>> {
            if self.reject {
                return Err(StreamError::Configuration("layout not supported".into()));
            }
            self.configs.lock().unwrap().push(config.clone());
            Ok(Box::new(MockEncoder {
                sink,
                inputs: self.inputs.clone(),
                flushed: self.flushed.clone(),
                hold: self.hold,
                fail_after: self.fail_after,
                held: Vec::new(),
            }))
        }
    }

    /// Locator whose pose encodes the queried timestamp.
    pub(crate) struct TimestampLocator;

    impl SpatialLocator for TimestampLocator {
        fn world_frame(&self, _timestamp: u64) -> CoordinateFrame {
            CoordinateFrame(1)
        }

        fn locate(&self, timestamp: u64, frame: CoordinateFrame) -> Pose {
            assert_eq!(frame, CoordinateFrame(1));
            Pose::new([[timestamp as f32; 4]; 4])
        }
    }

    /// Writer whose first `ok_units` vectored writes succeed.
    #[derive(Clone)]
    struct BreakAfter {
        ok_units: Arc<Mutex<usize>>,
    }

    impl Write for BreakAfter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_vectored(&[IoSlice::new(buf)])
        }

        fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> std::io::Result<usize> {
            let mut left = self.ok_units.lock().unwrap();
            if *left == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
            }
            *left -= 1;
            Ok(bufs.iter().map(|b| b.len()).sum())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn frame(host_ticks: u64, exposure: u64, marker: u8) -> RawFrame {
        RawFrame {
            luma: vec![marker; 8],
            host_ticks,
            exposure,
        }
    }

    pub(crate) fn handshake(divisor: u8, profile: Profile, ef: f64, cf: i64) -> Cursor<Vec<u8>> {
        let request = StreamRequest {
            mode: StreamMode::Stream,
            divisor,
            profile,
            bitrate: 1_000_000,
            options: vec![(0x10, 0x20)],
        }
        .with_exposure_factor(ef)
        .with_constant_factor(cf);
        Cursor::new(request.to_bytes()[1..].to_vec())
    }

    fn small() -> FormatNegotiator {
        FormatNegotiator::new(4, 2, 30)
    }

    #[test]
    fn test_decimation_and_timestamp_scenario() {
        let mut device = ScriptedDevice::new(vec![
            frame(1000, 100, 0),
            frame(1100, 100, 1),
            frame(1200, 100, 2),
            frame(1300, 100, 3),
        ]);
        let encoders = MockEncoders::default();
        let report = Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(2, Profile::None, 50.0, 5), SharedSocket::default())
            .unwrap();

        assert_eq!(report.acquired, 4);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.exit, ExitReason::DeviceFailure);

        let inputs = encoders.inputs.lock().unwrap();
        let stamps: Vec<u64> = inputs.iter().map(|i| i.timestamp).collect();
        assert_eq!(stamps, vec![1055, 1255]);
        assert_eq!(inputs[0].buffer[0], 0);
        assert_eq!(inputs[1].buffer[0], 2);
        assert_eq!(inputs[0].duration, 333_333);
        assert!(device.opened && device.closed);
        assert!(encoders.flushed.load(Ordering::Relaxed));
        assert_eq!(
            report.states,
            vec![
                SessionState::Negotiating,
                SessionState::Streaming,
                SessionState::Draining,
                SessionState::Closed,
            ]
        );
    }

    #[test]
    fn test_every_dth_frame_submitted() {
        for d in 1u8..=5 {
            let frames = (0..12u8).map(|i| frame(i as u64, 0, i)).collect();
            let mut device = ScriptedDevice::new(frames);
            let encoders = MockEncoders::default();
            let report = Session::new(&mut device, &encoders)
                .with_negotiator(small())
                .run(&mut handshake(d, Profile::None, 0.0, 0), SharedSocket::default())
                .unwrap();

            let markers: Vec<u8> = encoders
                .inputs
                .lock()
                .unwrap()
                .iter()
                .map(|i| i.buffer[0])
                .collect();
            let expected: Vec<u8> = (0..12u8).step_by(d as usize).collect();
            assert_eq!(markers, expected, "divisor {}", d);
            assert_eq!(report.submitted, expected.len() as u64);
            assert_eq!(report.acquired, 12);
        }
    }

    #[test]
    fn test_layout_and_passthrough_options() {
        let mut device = ScriptedDevice::new(vec![frame(0, 0, 7)]);
        let encoders = MockEncoders::default();
        Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(1, Profile::H264Main, 1.0, 1), SharedSocket::default())
            .unwrap();

        let configs = encoders.configs.lock().unwrap();
        assert_eq!(configs[0].layout, crate::types::SubsampleLayout::Nv12);
        assert_eq!(configs[0].options, vec![(0x10, 0x20)]);
        assert!(!configs[0].pose_tagging);
        let inputs = encoders.inputs.lock().unwrap();
        assert_eq!(inputs[0].buffer.len(), 12);
        assert_eq!(&inputs[0].buffer[8..], &[0x80; 4]);
        assert!(inputs[0].pose.is_none());
    }

    fn transmitted_poses(profile: Profile, queued: bool) -> Vec<Pose> {
        let frames = vec![frame(10, 0, 0), frame(20, 0, 1), frame(30, 0, 2)];
        let mut device = ScriptedDevice::new(frames);
        let encoders = MockEncoders::default();
        let socket = SharedSocket::default();
        let mut session = Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .with_pose(&TimestampLocator);
        if queued {
            session = session.with_queue_depth(1);
        }
        session
            .run(&mut handshake(1, profile, 0.0, 0), socket.clone())
            .unwrap();

        let bytes = socket.out.lock().unwrap().clone();
        let mut cursor = Cursor::new(bytes);
        (0..3)
            .map(|_| protocol::read_unit(&mut cursor, true).unwrap().pose.unwrap())
            .collect()
    }

    fn p(v: f32) -> Pose {
        Pose::new([[v; 4]; 4])
    }

    #[test]
    fn test_pose_tagging_without_header_splitting() {
        assert_eq!(
            transmitted_poses(Profile::None, false),
            vec![p(10.0), p(20.0), p(30.0)]
        );
    }

    #[test]
    fn test_pose_tagging_with_header_splitting() {
        assert_eq!(
            transmitted_poses(Profile::H264Base, false),
            vec![Pose::SENTINEL, p(10.0), p(20.0)]
        );
    }

    #[test]
    fn test_queued_bridge_keeps_latch_order() {
        assert_eq!(
            transmitted_poses(Profile::H265Main, true),
            vec![Pose::SENTINEL, p(10.0), p(20.0)]
        );
    }

    #[test]
    fn test_transmit_failure_ends_session() {
        let mut device = ScriptedDevice::endless();
        let encoders = MockEncoders::default();
        let writer = BreakAfter {
            ok_units: Arc::new(Mutex::new(1)),
        };
        let report = Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(1, Profile::None, 0.0, 0), writer)
            .unwrap();

        assert_eq!(report.exit, ExitReason::ClientDisconnected);
        assert_eq!(report.submitted, 2);
        assert!(device.closed);
    }

    #[test]
    fn test_negotiation_failure_touches_nothing() {
        let mut device = ScriptedDevice::endless();
        let encoders = MockEncoders::default();
        let socket = SharedSocket::default();
        let err = Session::new(&mut device, &encoders)
            .run(&mut Cursor::new(vec![2u8, 0xFF]), socket.clone())
            .unwrap_err();

        assert!(matches!(err, StreamError::Negotiation(_)));
        assert!(!device.opened);
        assert!(encoders.configs.lock().unwrap().is_empty());
        assert!(socket.out.lock().unwrap().is_empty());
    }

    #[test]
    fn test_configuration_failure_aborts_before_streaming() {
        let mut device = ScriptedDevice::endless();
        let encoders = MockEncoders {
            reject: true,
            ..Default::default()
        };
        let err = Session::new(&mut device, &encoders)
            .run(&mut handshake(1, Profile::None, 0.0, 0), SharedSocket::default())
            .unwrap_err();

        assert!(matches!(err, StreamError::Configuration(_)));
        assert!(!device.opened);
    }

    #[test]
    fn test_drain_delivers_held_units() {
        let mut device = ScriptedDevice::new(vec![frame(10, 0, 1), frame(20, 0, 2)]);
        let encoders = MockEncoders {
            hold: true,
            ..Default::default()
        };
        let socket = SharedSocket::default();
        let report = Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(1, Profile::None, 0.0, 0), socket.clone())
            .unwrap();

        assert_eq!(report.exit, ExitReason::DeviceFailure);
        let bytes = socket.out.lock().unwrap().clone();
        let mut cursor = Cursor::new(bytes);
        let units: Vec<EncodedUnit> = (0..2)
            .map(|_| protocol::read_unit(&mut cursor, false).unwrap())
            .collect();
        assert_eq!(units[0].timestamp, 10);
        assert_eq!(units[1].timestamp, 20);
        assert_eq!(units[1].payload, vec![2; 4]);
        assert_eq!(cursor.position() as usize, cursor.get_ref().len());
    }

    #[test]
    fn test_open_failure_goes_to_teardown() {
        let mut device = ScriptedDevice::endless();
        device.fail_open = true;
        let encoders = MockEncoders::default();
        let socket = SharedSocket::default();
        let report = Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(1, Profile::None, 0.0, 0), socket.clone())
            .unwrap();

        assert_eq!(report.exit, ExitReason::DeviceFailure);
        assert_eq!(report.acquired, 0);
        assert_eq!(report.submitted, 0);
        assert!(!device.closed);
        assert!(encoders.flushed.load(Ordering::Relaxed));
        assert_eq!(report.states.last(), Some(&SessionState::Closed));
        assert!(socket.out.lock().unwrap().is_empty());
    }

    #[test]
    fn test_encoder_failure_flushes_and_closes() {
        let mut device = ScriptedDevice::endless();
        let encoders = MockEncoders {
            fail_after: Some(2),
            ..Default::default()
        };
        let report = Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(1, Profile::None, 0.0, 0), SharedSocket::default())
            .unwrap();

        assert_eq!(report.exit, ExitReason::EncoderFailure);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.acquired, 3);
        assert!(device.opened && device.closed);
        assert!(encoders.flushed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_oversized_frame_is_clipped() {
        let mut device = ScriptedDevice::new(vec![RawFrame {
            luma: (0..12).collect(),
            host_ticks: 5,
            exposure: 0,
        }]);
        let encoders = MockEncoders::default();
        Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(1, Profile::None, 0.0, 0), SharedSocket::default())
            .unwrap();

        let inputs = encoders.inputs.lock().unwrap();
        assert_eq!(inputs[0].buffer, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_short_frame_ends_session() {
        let mut device = ScriptedDevice::new(vec![RawFrame {
            luma: vec![1; 5],
            host_ticks: 5,
            exposure: 0,
        }]);
        let encoders = MockEncoders::default();
        let report = Session::new(&mut device, &encoders)
            .with_negotiator(small())
            .run(&mut handshake(1, Profile::None, 0.0, 0), SharedSocket::default())
            .unwrap();

        assert_eq!(report.exit, ExitReason::DeviceFailure);
        assert_eq!(report.acquired, 1);
        assert_eq!(report.submitted, 0);
        assert!(device.closed);
    }
}
