//! TCP front end: one listening port per camera.
//!
//! Each port serves one client at a time, since a camera can only feed one
//! pipeline. The first byte a client sends selects the mode: live stream,
//! live stream with poses, or a calibration dump.

use crate::calibration::CalibrationDumper;
use crate::config::ServerConfig;
use crate::device::{CalibrationSource, CaptureDevice, SpatialLocator};
use crate::encoder::EncoderFactory;
use crate::protocol;
use crate::session::Session;
use crate::types::{SensorId, StreamMode};
use crate::{Result, StreamError};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Platform services a server needs for each client.
pub trait SensorBackend: Send + Sync {
    /// A fresh handle to `sensor`'s capture device.
    fn capture_device(&self, sensor: SensorId) -> Result<Box<dyn CaptureDevice>>;

    fn encoders(&self) -> &dyn EncoderFactory;

    /// Spatial locator for pose tagging, if the platform has one.
    fn locator(&self) -> Option<&dyn SpatialLocator>;

    fn calibration(&self, sensor: SensorId) -> &dyn CalibrationSource;
}

/// Listener for one camera.
pub struct Server {
    listener: TcpListener,
    sensor: SensorId,
    backend: Arc<dyn SensorBackend>,
    config: ServerConfig,
    stop_flag: Arc<AtomicBool>,
}

impl Server {
    /// Bind `bind_addr:(base_port + sensor offset)`.
    pub fn bind(
        config: ServerConfig,
        sensor: SensorId,
        backend: Arc<dyn SensorBackend>,
    ) -> Result<Server> {
        let port = config.base_port.wrapping_add(sensor.port_offset());
        let listener = TcpListener::bind((config.bind_addr.as_str(), port))?;
        log::info!(
            "Serving {} camera on {}",
            sensor.name(),
            listener.local_addr()?
        );
        Ok(Server {
            listener,
            sensor,
            backend,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve clients until stopped. A stop request is observed
    /// between clients, not during a session.
    pub fn run(self) -> Result<()> {
        self.listener.set_nonblocking(true)?;

        while !self.stop_flag.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("Client {} connected to {}", addr, self.sensor.name());
                    match self.serve(stream) {
                        Ok(()) => {}
                        Err(StreamError::Negotiation(reason)) => {
                            log::debug!("Client {} failed negotiation: {}", addr, reason)
                        }
                        Err(e) => log::warn!("Client {} session aborted: {}", addr, e),
                    }
                    log::info!("Client {} disconnected from {}", addr, self.sensor.name());
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    log::error!("Error accepting client: {}", e);
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }

        log::info!("Server for {} stopped", self.sensor.name());
        Ok(())
    }

    /// Run the server on a dedicated thread.
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let stop_flag = self.stop_flag.clone();
        let thread = std::thread::Builder::new()
            .name(format!("vlc-{}", self.sensor.name()))
            .spawn(move || self.run())?;
        Ok(ServerHandle {
            addr,
            stop_flag,
            thread: Some(thread),
        })
    }

    fn serve(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;

        let mode_byte = protocol::read_u8(&mut stream, "mode")?;
        let mode = StreamMode::from_wire(mode_byte).ok_or(StreamError::UnknownMode(mode_byte))?;
        log::debug!("{} client requested {:?}", self.sensor.name(), mode);

        match mode {
            StreamMode::Stream | StreamMode::StreamWithPose => {
                let mut device = self.backend.capture_device(self.sensor)?;
                let mut session = Session::new(device.as_mut(), self.backend.encoders());
                if mode == StreamMode::StreamWithPose {
                    let locator = self.backend.locator().ok_or_else(|| {
                        StreamError::Configuration("no spatial locator available".into())
                    })?;
                    session = session.with_pose(locator);
                }
                if let Some(depth) = self.config.queue() {
                    session = session.with_queue_depth(depth);
                }
                let writer = stream.try_clone()?;
                session.run(&mut stream, writer)?;
            }
            StreamMode::Calibration => {
                CalibrationDumper::new(self.backend.calibration(self.sensor)).dump(&mut stream)?;
            }
        }
        Ok(())
    }
}

/// Handle to a server running on its own thread. Dropping it stops the
/// server and waits for the thread.
pub struct ServerHandle {
    addr: SocketAddr,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Stop accepting clients and wait for the current one to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        match thread.join() {
            Ok(result) => result,
            Err(_) => {
                log::error!("Server thread for {} panicked", self.addr);
                Ok(())
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Server thread ended with error: {}", e);
        }
    }
}
