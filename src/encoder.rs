use crate::latch::PoseLatch;
use crate::transmit::Transmitter;
use crate::types::{
    EncodedUnit, EncoderInput, EncoderOptions, Profile, StreamFormat, SubsampleLayout,
};
use crate::{Result, StreamError};
use crossbeam_channel::{Receiver, Sender};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Everything the encoder needs to be configured for one session.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub format: StreamFormat,
    pub layout: SubsampleLayout,
    /// Pass-through tuning options, reserved keys already removed.
    pub options: EncoderOptions,
    /// Submitted frames carry a pose that must be attached to their units.
    pub pose_tagging: bool,
}

/// Receives encoded units from the encoder.
///
/// The encoder calls `deliver` once per produced unit, in submission order,
/// never concurrently for the same session.
pub trait UnitSink: Send {
    fn deliver(&mut self, unit: EncodedUnit);
}

/// A configured encoder instance.
pub trait VideoEncoder: Send {
    /// Queue one frame for encoding. Implementations report their own
    /// faults as [`StreamError::Encoder`](crate::StreamError::Encoder).
    fn submit(&mut self, input: EncoderInput) -> Result<()>;

    /// Deliver every buffered unit to the sink before returning.
    fn flush(&mut self) -> Result<()>;
}

/// Creates encoders bound to a unit sink.
pub trait EncoderFactory: Send + Sync {
    /// Configure an encoder for `config`. Fails with
    /// `StreamError::Configuration` when the layout or options are rejected.
    fn configure(
        &self,
        config: &EncoderConfig,
        sink: Box<dyn UnitSink>,
    ) -> Result<Box<dyn VideoEncoder>>;
}

/// Callback surface between the encoder and the client socket.
///
/// Realigns poses through the session's latch, frames each unit and sends
/// it. A failed send raises the session's disconnect flag; the encoder never
/// sees the error. Units delivered after the flag is raised are dropped.
pub struct EncoderBridge<W: Write + Send> {
    transmitter: Transmitter<W>,
    profile: Profile,
    pose_tagging: bool,
    latch: PoseLatch,
    disconnect: Arc<AtomicBool>,
}

impl<W: Write + Send> EncoderBridge<W> {
    pub fn new(
        writer: W,
        profile: Profile,
        pose_tagging: bool,
        disconnect: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transmitter: Transmitter::new(writer),
            profile,
            pose_tagging,
            latch: PoseLatch::new(),
            disconnect,
        }
    }

    pub fn units_sent(&self) -> u64 {
        self.transmitter.units_sent()
    }
}

impl<W: Write + Send> UnitSink for EncoderBridge<W> {
    fn deliver(&mut self, unit: EncodedUnit) {
        if self.disconnect.load(Ordering::Relaxed) {
            log::trace!("Dropping unit ts={} after disconnect", unit.timestamp);
            return;
        }

        let result = if self.pose_tagging {
            let tx = &mut self.transmitter;
            self.latch.realign(self.profile, unit.pose, |pose| {
                tx.send_unit(unit.timestamp, &unit.payload, Some(pose))
            })
        } else {
            self.transmitter.send_unit(unit.timestamp, &unit.payload, None)
        };

        match result {
            Ok(()) => {
                log::trace!("Sent unit ts={} len={}", unit.timestamp, unit.payload.len())
            }
            Err(e) => {
                log::info!("Transmit failed, disconnecting session: {}", e);
                self.disconnect.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// Unit sink that hands units to a dedicated transmit thread over a bounded
/// FIFO channel.
///
/// For encoders whose callbacks must return quickly. Order is preserved by
/// the channel; a full queue blocks the encoder callback. Dropping the
/// bridge drains the queue and joins the thread.
pub struct QueuedBridge {
    sender: Option<Sender<EncodedUnit>>,
    worker: Option<JoinHandle<()>>,
    disconnect: Arc<AtomicBool>,
}

impl QueuedBridge {
    pub fn spawn<S: UnitSink + 'static>(
        sink: S,
        depth: usize,
        disconnect: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(depth.max(1));

        let worker = std::thread::Builder::new()
            .name("vlc-transmit".into())
            .spawn(move || transmit_loop(sink, receiver))
            .map_err(|e| {
                StreamError::Configuration(format!("Failed to spawn transmit thread: {}", e))
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            disconnect,
        })
    }

    fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Transmit thread panicked");
                self.disconnect.store(true, Ordering::Relaxed);
            }
        }
    }
}

impl UnitSink for QueuedBridge {
    fn deliver(&mut self, unit: EncodedUnit) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(unit).is_err() {
            log::warn!("Transmit queue disconnected");
            self.disconnect.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for QueuedBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn transmit_loop<S: UnitSink>(mut sink: S, receiver: Receiver<EncodedUnit>) {
    log::debug!("Transmit thread started");
    for unit in receiver.iter() {
        sink.deliver(unit);
    }
    log::debug!("Transmit thread drained");
}
