//! Bounded receive buffer pool bound to one transport stream.
//!
//! `buffer_count` buffers circulate between two channels:
//!
//! ```text
//!   free ──► fill thread (Stream::fill) ──► ready ──► retrieve_next ──► caller
//!    ▲                                                                   │
//!    └──────────────────────────── release ◄─────────────────────────────┘
//! ```
//!
//! Buffers are allocated once and reused in place, so at most `buffer_count` can be
//! outstanding. `stop()` ends the fill thread; a `retrieve_next` blocked at that moment
//! returns `RetrieveError::Cancelled` once the ready channel disconnects.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{PipelineError, RetrieveError, StreamError};
use crate::frame::FrameBuffer;
use crate::ingest::Stream;

/// Receive buffers per session.
pub const BUFFER_COUNT: usize = 16;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Bytes per buffer, from the device's payload size.
    pub buffer_size: usize,
    pub buffer_count: usize,
}

impl BufferPoolConfig {
    pub fn for_payload(payload_size: usize) -> Self {
        Self {
            buffer_size: payload_size,
            buffer_count: BUFFER_COUNT,
        }
    }
}

type Filled = Result<FrameBuffer, StreamError>;

pub struct BufferPipeline {
    pool_id: u64,
    config: BufferPoolConfig,
    free_tx: Sender<FrameBuffer>,
    free_rx: Receiver<FrameBuffer>,
    ready_rx: Receiver<Filled>,
    /// Held until `start()` moves it into the fill thread.
    ready_tx: Mutex<Option<Sender<Filled>>>,
    /// Present while the fill thread is not running.
    stream: Mutex<Option<Box<dyn Stream>>>,
    filler: Mutex<Option<JoinHandle<Box<dyn Stream>>>>,
    stop: Arc<AtomicBool>,
    outstanding: AtomicUsize,
    fill_poll: Duration,
}

impl BufferPipeline {
    /// Allocate the pool for an opened stream. Filling begins with `start()`.
    pub fn new(stream: Box<dyn Stream>, config: BufferPoolConfig, fill_poll: Duration) -> Self {
        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let (free_tx, free_rx) = bounded(config.buffer_count);
        let (ready_tx, ready_rx) = bounded(config.buffer_count);
        for index in 0..config.buffer_count {
            // Capacity equals buffer_count, so this cannot fail.
            let _ = free_tx.try_send(FrameBuffer::new(pool_id, index, config.buffer_size));
        }
        Self {
            pool_id,
            config,
            free_tx,
            free_rx,
            ready_rx,
            ready_tx: Mutex::new(Some(ready_tx)),
            stream: Mutex::new(Some(stream)),
            filler: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            outstanding: AtomicUsize::new(0),
            fill_poll,
        }
    }

    pub fn config(&self) -> BufferPoolConfig {
        self.config
    }

    /// Buffers retrieved and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.filler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Begin filling buffers from the stream on a background thread.
    pub fn start(&self) -> Result<(), PipelineError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(PipelineError::Stopped);
        }
        let mut filler = self.filler.lock().unwrap_or_else(PoisonError::into_inner);
        if filler.is_some() {
            return Err(PipelineError::AlreadyStarted);
        }
        let ready_tx = self
            .ready_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(PipelineError::AlreadyStarted)?;
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(PipelineError::AlreadyStarted)?;

        let worker = FillWorker {
            free_rx: self.free_rx.clone(),
            free_tx: self.free_tx.clone(),
            ready_tx,
            stop: Arc::clone(&self.stop),
            poll: self.fill_poll,
        };
        let handle = std::thread::Builder::new()
            .name(format!("pipeline-fill-{}", self.pool_id))
            .spawn(move || worker.run(stream))
            .map_err(|err| PipelineError::Spawn(err.to_string()))?;
        *filler = Some(handle);
        Ok(())
    }

    /// Block up to `timeout` for the next filled buffer. Ownership moves to the caller.
    pub fn retrieve_next(&self, timeout: Duration) -> Result<FrameBuffer, RetrieveError> {
        match self.ready_rx.recv_timeout(timeout) {
            Ok(Ok(buffer)) => {
                self.outstanding.fetch_add(1, Ordering::AcqRel);
                Ok(buffer)
            }
            Ok(Err(err)) => Err(RetrieveError::Stream(err)),
            Err(RecvTimeoutError::Timeout) if self.stop.load(Ordering::Acquire) => {
                Err(RetrieveError::Cancelled)
            }
            Err(RecvTimeoutError::Timeout) => Err(RetrieveError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(RetrieveError::Cancelled),
        }
    }

    /// Return a retrieved buffer to the pool. Its memory is reused for the next capture.
    pub fn release(&self, mut buffer: FrameBuffer) -> Result<(), PipelineError> {
        if buffer.pool_id() != self.pool_id {
            return Err(PipelineError::ForeignBuffer);
        }
        buffer.reset();
        match self.free_tx.try_send(buffer) {
            Ok(()) => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                Ok(())
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(PipelineError::PoolFull)
            }
        }
    }

    /// Halt filling and wait for the fill thread. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self
            .filler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(stream) => {
                    *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
                }
                Err(_) => log::error!("pipeline {}: fill thread panicked", self.pool_id),
            }
        }
        // Never started: drop the sender so blocked receivers see a disconnect.
        self.ready_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Hand the stream back once the pipeline is stopped.
    pub fn take_stream(&self) -> Option<Box<dyn Stream>> {
        if self.is_running() {
            return None;
        }
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for BufferPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FillWorker {
    free_rx: Receiver<FrameBuffer>,
    free_tx: Sender<FrameBuffer>,
    ready_tx: Sender<Filled>,
    stop: Arc<AtomicBool>,
    poll: Duration,
}

impl FillWorker {
    fn run(self, mut stream: Box<dyn Stream>) -> Box<dyn Stream> {
        while !self.stop.load(Ordering::Acquire) {
            let mut buffer = match self.free_rx.recv_timeout(self.poll) {
                Ok(buffer) => buffer,
                // Every buffer is outstanding; wait for a release.
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match stream.fill(buffer.memory_mut(), self.poll) {
                Ok(info) => {
                    log::trace!("filled block {} into slot {}", info.block_id, buffer.index());
                    buffer.set_filled(info);
                    if self.ready_tx.send(Ok(buffer)).is_err() {
                        break;
                    }
                }
                Err(StreamError::Timeout(_)) => {
                    let _ = self.free_tx.try_send(buffer);
                }
                Err(err) => {
                    let _ = self.free_tx.try_send(buffer);
                    let _ = self.ready_tx.send(Err(err));
                    break;
                }
            }
        }
        stream
    }
}
