use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    thread::JoinHandle,
};

use crate::{channel::BoundedChannel, codec::Codec, types::Cmd};

/// Message a stage emits to whatever the orchestrator wired behind it.
#[derive(Debug)]
pub enum StageOutput<O> {
    /// Result of one input item, emitted whatever its status.
    Item(anyhow::Result<Vec<O>>),
    /// Emitted once, after the last item.
    Eof,
}

/// Receiving side of a stage. Runs on the stage thread.
pub trait Downstream<O>: Send + 'static {
    fn deliver(&mut self, output: StageOutput<O>);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Constructed = 0,
    /// codec opened and wired, thread not spawned yet
    Initialized = 1,
    Running = 2,
    /// sentinel seen, flushing
    Draining = 3,
    Stopped = 4,
}

impl From<u8> for Lifecycle {
    fn from(value: u8) -> Self {
        match value {
            0 => Lifecycle::Constructed,
            1 => Lifecycle::Initialized,
            2 => Lifecycle::Running,
            3 => Lifecycle::Draining,
            _ => Lifecycle::Stopped,
        }
    }
}

type Worker = Box<dyn FnOnce() + Send + 'static>;

/// One worker thread bound to one input channel and one codec.
pub struct PipelineStage<I> {
    tag: String,
    input: Arc<BoundedChannel<Cmd<I>>>,
    lifecycle: Arc<AtomicU8>,
    worker: Mutex<Option<Worker>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<I: Send + 'static> PipelineStage<I> {
    pub fn new(tag: impl Into<String>, capacity: usize) -> Self {
        Self {
            tag: tag.into(),
            input: Arc::new(BoundedChannel::new(capacity)),
            lifecycle: Arc::new(AtomicU8::new(Lifecycle::Constructed as u8)),
            worker: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.store(lifecycle as u8, Ordering::Release);
    }

    /// Items waiting in the input channel.
    pub fn queued(&self) -> usize {
        self.input.len()
    }

    /// Binds an opened codec and its downstream to this stage.
    pub fn initialize<C, D>(&self, codec: C, downstream: D) -> anyhow::Result<()>
    where
        C: Codec<Input = I>,
        D: Downstream<C::Output>,
    {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.lifecycle() != Lifecycle::Constructed {
            anyhow::bail!("stage {} already initialized", self.tag);
        }

        let tag = self.tag.clone();
        let input = self.input.clone();
        let lifecycle = self.lifecycle.clone();
        *worker = Some(Box::new(move || {
            stage_loop(&tag, &input, &lifecycle, codec, downstream);
        }));
        self.set_lifecycle(Lifecycle::Initialized);
        Ok(())
    }

    /// Spawns the worker thread.
    pub fn start(&self) -> anyhow::Result<()> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow::anyhow!("stage {} is not initialized", self.tag))?;

        self.set_lifecycle(Lifecycle::Running);
        let handle = std::thread::Builder::new()
            .name(self.tag.clone())
            .spawn(worker)
            .map_err(|e| {
                self.set_lifecycle(Lifecycle::Stopped);
                self.input.close();
                anyhow::anyhow!("spawn stage {} thread: {}", self.tag, e)
            })?;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        log::debug!("stage {} started", self.tag);
        Ok(())
    }

    /// Queues one item, blocking while the input channel is full.
    /// Returns false when the stage no longer accepts input.
    pub fn put(&self, item: I) -> bool {
        match self.input.put(Cmd::Data(item)) {
            Ok(()) => true,
            Err(_) => {
                log::debug!("stage {} input closed, item dropped", self.tag);
                false
            }
        }
    }

    /// Queues the end-of-stream sentinel.
    pub fn send_eof(&self) {
        if self.input.put(Cmd::Eof).is_err() {
            log::debug!("stage {} input already closed, sentinel not queued", self.tag);
        }
    }

    /// Waits for the worker to reach its sentinel and exit. Safe to call
    /// more than once, and on a stage that never started.
    pub fn stop(&self) {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    log::error!("stage {} worker panicked", self.tag);
                    self.set_lifecycle(Lifecycle::Stopped);
                }
            }
            None => {
                // initialized but never started: release the codec here
                let pending = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
                if pending.is_some() {
                    log::debug!("stage {} stopped before start", self.tag);
                    self.set_lifecycle(Lifecycle::Stopped);
                }
            }
        }
    }
}

/// Closes the input and marks the stage stopped however the worker exits,
/// so producers blocked on a full channel are released even after a panic.
struct ExitGuard<'a, T> {
    tag: &'a str,
    input: &'a BoundedChannel<Cmd<T>>,
    lifecycle: &'a AtomicU8,
}

impl<T> Drop for ExitGuard<'_, T> {
    fn drop(&mut self) {
        let discarded = self.input.close();
        if !discarded.is_empty() {
            log::warn!(
                "[{}] {} items queued after end of stream were released",
                self.tag,
                discarded.len()
            );
        }
        if std::thread::panicking() {
            log::error!("[{}] worker unwinding, input closed", self.tag);
        }
        self.lifecycle.store(Lifecycle::Stopped as u8, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn stage_loop<C, D>(
    tag: &str,
    input: &BoundedChannel<Cmd<C::Input>>,
    lifecycle: &AtomicU8,
    mut codec: C,
    mut downstream: D,
) where
    C: Codec,
    D: Downstream<C::Output>,
{
    let _guard = ExitGuard {
        tag,
        input,
        lifecycle,
    };

    let mut processed: u64 = 0;
    loop {
        match input.take() {
            Some(Cmd::Data(item)) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| codec.process(item)))
                    .unwrap_or_else(|payload| {
                        Err(anyhow::anyhow!("codec panicked: {}", panic_message(payload.as_ref())))
                    });
                processed += 1;
                downstream.deliver(StageOutput::Item(result));
            }
            Some(Cmd::Eof) => {
                log::debug!("[{}] end of stream after {} items", tag, processed);
                break;
            }
            None => {
                log::warn!("[{}] input closed without end of stream", tag);
                break;
            }
        }
    }

    lifecycle.store(Lifecycle::Draining as u8, Ordering::Release);
    match codec.flush() {
        Ok(rest) if rest.is_empty() => {}
        result => downstream.deliver(StageOutput::Item(result)),
    }
    downstream.deliver(StageOutput::Eof);
    codec.close();
}

#[cfg(test)]
#[path = "stage_test.rs"]
mod stage_test;
