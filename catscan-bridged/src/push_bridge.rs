use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use shared::types::ScanRecord;

/// Receives normalized records, one call per record, in delivery order
pub trait Observer: Send + 'static {
    fn on_record(&mut self, record: ScanRecord);
}

impl<F> Observer for F
where
    F: FnMut(ScanRecord) + Send + 'static,
{
    fn on_record(&mut self, record: ScanRecord) {
        self(record)
    }
}

/// Forwards records into a flume channel so an async task can consume them
pub struct ChannelObserver(pub flume::Sender<ScanRecord>);

impl Observer for ChannelObserver {
    fn on_record(&mut self, record: ScanRecord) {
        if self.0.send(record).is_err() {
            tracing::debug!("Observer channel closed, record discarded");
        }
    }
}

/// Delivery counters since the bridge started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Commands sent to the delivery thread
enum BridgeCommand {
    Register(Box<dyn Observer>),
    Notify(ScanRecord),
    Flush(oneshot::Sender<BridgeStats>),
    Shutdown(oneshot::Sender<BridgeStats>),
}

/// Handle to the push bridge.
///
/// Every command goes through one channel drained by a single thread, so the
/// order in which `notify` calls reach the channel is the order the observer
/// sees. `register` shares that channel: records notified after it returns
/// only reach the new observer.
#[derive(Clone)]
pub struct PushBridge {
    tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl PushBridge {
    /// Spawn the delivery thread with no observer registered
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BridgeCommand>();

        thread::spawn(move || {
            let mut observer: Option<Box<dyn Observer>> = None;
            let mut stats = BridgeStats::default();

            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    BridgeCommand::Register(next) => {
                        if observer.replace(next).is_some() {
                            tracing::info!("Push bridge observer replaced");
                        } else {
                            tracing::info!("Push bridge observer registered");
                        }
                    }
                    BridgeCommand::Notify(record) => match observer.as_mut() {
                        Some(obs) => {
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| obs.on_record(record)));
                            if outcome.is_ok() {
                                stats.delivered += 1;
                            } else {
                                // A panicking observer is unregistered; the bridge keeps running
                                tracing::error!("Push bridge observer panicked, unregistering it");
                                observer = None;
                                stats.dropped += 1;
                            }
                        }
                        None => {
                            tracing::debug!("No observer registered, dropping record");
                            stats.dropped += 1;
                        }
                    },
                    BridgeCommand::Flush(reply) => {
                        let _ = reply.send(stats);
                    }
                    BridgeCommand::Shutdown(reply) => {
                        tracing::info!(
                            delivered = stats.delivered,
                            dropped = stats.dropped,
                            "Push bridge shutting down"
                        );
                        let _ = reply.send(stats);
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Make `observer` the only recipient of subsequent records
    pub fn register(&self, observer: impl Observer) {
        self.send(BridgeCommand::Register(Box::new(observer)));
    }

    /// Queue a record for the current observer. Never blocks on the observer.
    pub fn notify(&self, record: ScanRecord) {
        self.send(BridgeCommand::Notify(record));
    }

    /// Wait until everything notified so far has been delivered or dropped
    pub async fn flush(&self) -> Result<BridgeStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BridgeCommand::Flush(reply))
            .map_err(|_| anyhow::anyhow!("push bridge is shut down"))?;
        Ok(rx.await?)
    }

    /// Stop the delivery thread after draining queued records. Resolves once
    /// every record queued before the call has been delivered or dropped.
    pub async fn shutdown(&self) -> Result<BridgeStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BridgeCommand::Shutdown(reply))
            .map_err(|_| anyhow::anyhow!("push bridge is already shut down"))?;
        Ok(rx.await?)
    }

    /// Shut down, then hand every record the observer forwarded into
    /// `forwarded` and nobody consumed yet to `present`
    pub async fn shutdown_and_drain(
        &self,
        forwarded: &flume::Receiver<ScanRecord>,
        mut present: impl FnMut(&ScanRecord),
    ) -> Result<BridgeStats> {
        let stats = self.shutdown().await?;
        for record in forwarded.try_iter() {
            present(&record);
        }
        Ok(stats)
    }

    fn send(&self, cmd: BridgeCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::warn!("Push bridge is shut down, command ignored");
        }
    }
}
