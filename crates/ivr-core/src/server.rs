//! IVR server lifecycle
//!
//! [`IvrServer`] wires a [`Driver`] to its worker tasks and owns their
//! cancellation. Stopping is ordered: event producers stop first, then every
//! active call is ended, then the call-detail poster drains what those calls
//! wrote.
//!
//! ```no_run
//! use rvoip_ivr_core::prelude::*;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = IvrConfig::from_file("ivr.toml")?;
//! let driver = DriverBuilder::new(config).build()?;
//!
//! let mut server = IvrServer::new(driver);
//! server.start()?;
//! let queue = server.messages().expect("started");
//! queue.send(0, Event::Hangup)?;
//!
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::cdr::{CdrSink, TracingSink};
use crate::driver::Driver;
use crate::logging;
use crate::workers::{message_queue, CdrPoster, Dispatcher, MessageQueue, Ticker};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long `stop` waits for each worker before aborting it
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Worker {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct IvrServer {
    driver: Arc<Driver>,
    sink: Arc<dyn CdrSink>,
    cancel: CancellationToken,
    messages: Option<MessageQueue>,
    producers: Vec<Worker>,
    poster: Option<Worker>,
}

impl IvrServer {
    /// Server writing call-detail records to the `cdr` tracing target
    pub fn new(driver: Arc<Driver>) -> Self {
        Self {
            driver,
            sink: Arc::new(TracingSink),
            cancel: CancellationToken::new(),
            messages: None,
            producers: Vec::new(),
            poster: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn CdrSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    /// Producer handle for the dispatcher queue, once started
    pub fn messages(&self) -> Option<MessageQueue> {
        self.messages.clone()
    }

    pub fn is_running(&self) -> bool {
        self.poster.is_some()
    }

    /// Install the `[logging]` subscriber, then spawn the ticker, dispatcher
    /// and poster. Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            anyhow::bail!("IVR server is already running");
        }
        logging::init_logging(&self.driver.config().logging).context("Failed to set up logging")?;
        logging::log_startup(self.driver.config());
        let queue = self
            .driver
            .take_cdr_queue()
            .context("Call detail queue was already taken from this driver")?;

        let poster = CdrPoster::new(self.driver.cdr_pool(), self.sink.clone());
        self.poster = Some(self.spawn("cdr-poster", |cancel| poster.run(queue, cancel)));

        let ticker = Ticker::new(self.driver.clone());
        let worker = self.spawn("ticker", |cancel| ticker.run(cancel));
        self.producers.push(worker);

        let (messages, receiver) =
            message_queue(self.driver.config().workers.message_queue_capacity);
        let dispatcher = Dispatcher::new(self.driver.clone());
        let worker = self.spawn("dispatcher", |cancel| dispatcher.run(receiver, cancel));
        self.producers.push(worker);
        self.messages = Some(messages);

        info!(
            "IVR server started with {} timeslots, script generation {}",
            self.driver.slot_count(),
            self.driver.generation()
        );
        Ok(())
    }

    fn spawn<F, Fut>(&self, name: &'static str, run: F) -> Worker
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run(cancel.clone()));
        debug!("Spawned {} worker", name);
        Worker {
            name,
            cancel,
            handle,
        }
    }

    /// Stop the workers, ending every active call. Returns how many calls
    /// were ended.
    pub async fn stop(&mut self) -> Result<usize> {
        if !self.is_running() {
            return Ok(0);
        }
        info!("Stopping IVR server");

        self.messages = None;
        for worker in std::mem::take(&mut self.producers) {
            worker.cancel.cancel();
            join(worker).await;
        }

        let ended = self.driver.shutdown();

        if let Some(poster) = self.poster.take() {
            poster.cancel.cancel();
            join(poster).await;
        }
        info!("IVR server stopped, {} calls ended", ended);
        Ok(ended)
    }
}

impl Drop for IvrServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn join(worker: Worker) {
    let Worker { name, handle, .. } = worker;
    let abort = handle.abort_handle();
    match tokio::time::timeout(STOP_TIMEOUT, handle).await {
        Ok(Ok(())) => debug!("{} worker stopped", name),
        Ok(Err(e)) => warn!("{} worker failed: {}", name, e),
        Err(_) => {
            warn!("{} worker did not stop within {:?}, aborting", name, STOP_TIMEOUT);
            abort.abort();
        }
    }
}
