//! Render thread
//!
//! Owns the output device and drives decode → mix → write while the
//! transport is playing (or a chime is sounding). The device is created on
//! this thread and never leaves it.
//!
//! The transport lock is held only while a buffer is rendered. Device writes,
//! which block until the device has room, happen unlocked. Sources are opened
//! on the loader thread and picked up between buffers without waiting.

use crate::bling::Chime;
use crate::config::OutputConfig;
use crate::device::{open_with_fallback, DeviceBackend, DeviceFactory, DeviceFormat};
use crate::error::{DeviceError, EngineError};
use crate::levels::LevelMonitor;
use crate::loader::SourceLoader;
use crate::source::MediaOpener;
use crate::transport::{AdvancePlan, Transport};
use crate::types::OutputState;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Wait between request checks while nothing is rendering
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Reply to an open request: the device format, or why there is no device
pub(crate) type OpenReply = Sender<Result<DeviceFormat, DeviceError>>;

pub(crate) enum RenderRequest {
    /// Make sure a device is open and report the outcome
    Open { reply: OpenReply },
    /// Re-check the transport state
    Wake,
    Bling(Chime),
    Shutdown,
}

/// State shared between the engine handle and the render thread
pub(crate) struct Shared {
    transport: Mutex<Transport>,
    pub(crate) levels: Arc<LevelMonitor>,
}

impl Shared {
    pub(crate) fn new(transport: Transport) -> Self {
        Self {
            transport: Mutex::new(transport),
            levels: Arc::new(LevelMonitor::new()),
        }
    }

    /// Lock the transport, recovering from a poisoned lock
    pub(crate) fn lock(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn spawn(
    shared: Arc<Shared>,
    opener: Arc<dyn MediaOpener>,
    factory: Box<dyn DeviceFactory>,
    config: OutputConfig,
    requests: Receiver<RenderRequest>,
) -> std::io::Result<JoinHandle<()>> {
    let loader = SourceLoader::spawn(opener)?;
    thread::Builder::new()
        .name("cadence-render".into())
        .spawn(move || {
            let buffer = vec![0.0; config.buffer_frames as usize * 2];
            RenderLoop {
                shared,
                loader,
                factory,
                config,
                requests,
                device: None,
                chime: None,
                buffer,
                replies: Vec::new(),
                last_open_error: None,
                was_playing: false,
            }
            .run();
        })
}

struct RenderLoop {
    shared: Arc<Shared>,
    loader: SourceLoader,
    factory: Box<dyn DeviceFactory>,
    config: OutputConfig,
    requests: Receiver<RenderRequest>,
    device: Option<Box<dyn DeviceBackend>>,
    chime: Option<Chime>,
    buffer: Vec<f32>,
    replies: Vec<OpenReply>,
    last_open_error: Option<DeviceError>,
    was_playing: bool,
}

impl RenderLoop {
    fn run(mut self) {
        debug!("Render thread started");
        while self.receive() {
            self.sync_device();
            self.answer_open_requests();
            self.collect_loaded();
            if self.is_busy() {
                self.cycle();
            }
        }
        self.close_device();
        debug!("Render thread stopped");
    }

    fn is_busy(&self) -> bool {
        self.device.is_some()
            && (self.chime.is_some() || self.shared.lock().state() == OutputState::Playing)
    }

    /// Collect pending requests, waiting briefly when idle
    ///
    /// Returns `false` on shutdown.
    fn receive(&mut self) -> bool {
        if !self.is_busy() {
            match self.requests.recv_timeout(IDLE_WAIT) {
                Ok(request) => {
                    if !self.handle(request) {
                        return false;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }

        loop {
            match self.requests.try_recv() {
                Ok(request) => {
                    if !self.handle(request) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle(&mut self, request: RenderRequest) -> bool {
        match request {
            RenderRequest::Open { reply } => self.replies.push(reply),
            RenderRequest::Wake => {}
            RenderRequest::Bling(chime) => self.chime = Some(chime),
            RenderRequest::Shutdown => return false,
        }
        true
    }

    /// Open or close the device to match the transport state
    fn sync_device(&mut self) {
        let (state, format) = {
            let transport = self.shared.lock();
            (transport.state(), transport.preferred_format())
        };

        if state == OutputState::Stopped && self.chime.is_none() {
            self.was_playing = false;
            self.close_device();
            return;
        }

        // Paused, or stopped under a chime: drop what the device still holds
        if state != OutputState::Playing && self.was_playing {
            if let Some(device) = self.device.as_mut() {
                device.flush();
            }
        }
        self.was_playing = state == OutputState::Playing;

        if self.device.is_some() {
            return;
        }

        // A chime on its own only needs a shared device
        let config = if state == OutputState::Stopped {
            self.config.as_standard()
        } else {
            self.config.clone()
        };

        match open_with_fallback(self.factory.as_mut(), &config, format) {
            Ok(device) => {
                self.device = Some(device);
                self.last_open_error = None;
            }
            Err(e) => {
                error!("Could not open audio device: {}", e);
                self.chime = None;
                if state != OutputState::Stopped {
                    self.shared.lock().fail(EngineError::from(e.clone()));
                }
                self.last_open_error = Some(e);
            }
        }
    }

    fn answer_open_requests(&mut self) {
        if self.replies.is_empty() {
            return;
        }
        let result = match self.device.as_ref() {
            Some(device) => Ok(device.format()),
            None => Err(self
                .last_open_error
                .clone()
                .unwrap_or_else(|| DeviceError::Unavailable("output is stopped".into()))),
        };
        for reply in self.replies.drain(..) {
            let _ = reply.send(result.clone());
        }
    }

    /// Render, write and advance one buffer
    fn cycle(&mut self) {
        let Some(sample_rate) = self.device.as_ref().map(|d| d.format().sample_rate) else {
            return;
        };

        let plan = {
            let mut transport = self.shared.lock();
            let buffer = &mut self.buffer;
            match panic::catch_unwind(AssertUnwindSafe(|| transport.render(buffer, sample_rate))) {
                Ok(plan) => plan,
                Err(_) => {
                    error!("Render cycle panicked, stopping playback");
                    self.buffer.fill(0.0);
                    transport.fail(EngineError::Decode("render cycle panicked".into()));
                    AdvancePlan::Idle
                }
            }
        };

        if let Some(chime) = self.chime.as_mut() {
            if !chime.mix_into(&mut self.buffer, sample_rate) {
                trace!("Chime finished");
                self.chime = None;
            }
        }

        self.shared.levels.update(&self.buffer);
        self.write();
        self.advance(plan);
    }

    fn write(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.write(&self.buffer) {
            Ok(()) => {}
            Err(DeviceError::Lost(reason)) => {
                warn!("Audio device lost ({}), reopening", reason);
                self.reopen(reason);
            }
            Err(e) => {
                error!("Audio device write failed: {}", e);
                self.close_device();
                self.chime = None;
                self.shared.lock().fail(EngineError::from(e));
            }
        }
    }

    /// One reopen attempt after a device loss
    fn reopen(&mut self, reason: String) {
        self.close_device();

        let (state, format) = {
            let transport = self.shared.lock();
            (transport.state(), transport.preferred_format())
        };
        let config = if state == OutputState::Stopped {
            self.config.as_standard()
        } else {
            self.config.clone()
        };

        match open_with_fallback(self.factory.as_mut(), &config, format) {
            Ok(mut device) => {
                info!("Audio device reopened");
                if let Err(e) = device.write(&self.buffer) {
                    warn!("Write after reopen failed: {}", e);
                }
                self.device = Some(device);
            }
            Err(e) => {
                error!("Reopen failed: {}", e);
                self.chime = None;
                self.shared.lock().fail(EngineError::DeviceLost(reason));
            }
        }
    }

    /// Hand whatever the transport asked for to the loader
    fn advance(&mut self, mut plan: AdvancePlan) {
        while let AdvancePlan::Open(request) = plan {
            plan = match self.loader.request(request) {
                Ok(()) => AdvancePlan::Idle,
                Err(request) => {
                    let error = EngineError::Decode("source loader is not running".into());
                    self.shared.lock().finish_advance(request, Err(error))
                }
            };
        }
    }

    /// Complete every open the loader has finished
    fn collect_loaded(&mut self) {
        while let Some(loaded) = self.loader.poll_ready() {
            let plan = self.shared.lock().finish_advance(loaded.request, loaded.result);
            self.advance(plan);
        }
    }

    fn close_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.flush();
            device.close();
            info!("Audio device closed");
        }
        self.shared.levels.reset();
    }
}
