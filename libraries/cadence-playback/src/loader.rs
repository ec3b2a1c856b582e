//! Background source loader
//!
//! Opening a source means disk I/O and container probing, which can take far
//! longer than one buffer. The render thread hands advance requests to this
//! thread and polls for the opened sources between buffers.
//!
//! ```text
//! Render thread                 Loader thread
//!      │  request(AdvanceRequest)     │
//!      │─────────────────────────────>│ MediaOpener::open()
//!      │                              │
//!      │  poll_ready() -> Some(Loaded)│
//!      │<─────────────────────────────│
//! ```

use crate::error::Result;
use crate::source::{AudioSource, MediaOpener};
use crate::transport::AdvanceRequest;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

/// An advance request together with the outcome of opening its item
pub(crate) struct Loaded {
    pub request: AdvanceRequest,
    pub result: Result<Box<dyn AudioSource>>,
}

/// Handle to the loader thread
///
/// The thread exits once this handle is dropped and any open in progress
/// has returned.
pub(crate) struct SourceLoader {
    request_tx: Sender<AdvanceRequest>,
    result_rx: Receiver<Loaded>,
    in_flight: usize,
    _thread_handle: JoinHandle<()>,
}

impl SourceLoader {
    pub(crate) fn spawn(opener: Arc<dyn MediaOpener>) -> std::io::Result<Self> {
        let (request_tx, request_rx) = unbounded::<AdvanceRequest>();
        let (result_tx, result_rx) = unbounded::<Loaded>();

        let thread_handle = thread::Builder::new()
            .name("cadence-loader".into())
            .spawn(move || Self::loader_thread(opener, request_rx, result_tx))?;

        Ok(Self {
            request_tx,
            result_rx,
            in_flight: 0,
            _thread_handle: thread_handle,
        })
    }

    /// Queue `request`; hands it back if the loader thread is gone
    pub(crate) fn request(&mut self, request: AdvanceRequest) -> std::result::Result<(), AdvanceRequest> {
        match self.request_tx.send(request) {
            Ok(()) => {
                self.in_flight += 1;
                Ok(())
            }
            Err(e) => {
                warn!("Source loader is not running");
                Err(e.into_inner())
            }
        }
    }

    /// Requests sent but not yet collected
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Next finished open, if any (non-blocking)
    pub(crate) fn poll_ready(&mut self) -> Option<Loaded> {
        if self.in_flight == 0 {
            return None;
        }
        let loaded = self.result_rx.try_recv().ok();
        if loaded.is_some() {
            self.in_flight -= 1;
        }
        loaded
    }

    fn loader_thread(
        opener: Arc<dyn MediaOpener>,
        request_rx: Receiver<AdvanceRequest>,
        result_tx: Sender<Loaded>,
    ) {
        debug!("Source loader started");
        for request in request_rx.iter() {
            let start = Instant::now();
            let result = opener.open(request.item());
            debug!(
                item = request.item().id(),
                ok = result.is_ok(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Source opened"
            );
            if result_tx.send(Loaded { request, result }).is_err() {
                break;
            }
        }
        debug!("Source loader stopped");
    }
}
