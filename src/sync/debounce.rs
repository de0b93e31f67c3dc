//! Debounced write batching.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Command<T> {
    Submit(T),
    Flush(oneshot::Sender<()>),
}

/// Coalesces rapid submissions into a single write.
///
/// Each submission replaces the pending payload and restarts the quiescence
/// window; the sink runs once with the latest payload when the window elapses
/// with no new submissions. [`Self::flush`] forces the pending payload out
/// immediately, and dropping the writer drains whatever is still pending.
pub struct DebouncedWriter<T> {
    tx: Option<mpsc::UnboundedSender<Command<T>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> DebouncedWriter<T> {
    /// Spawns a writer that feeds quiesced payloads into `sink`.
    #[must_use]
    pub fn new<F, Fut>(window: Duration, sink: F) -> Self
    where
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command<T>>();

        let worker = tokio::spawn(async move {
            let mut pending: Option<T> = None;

            loop {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(Command::Submit(value)) => {
                            // Last payload wins; the window restarts below
                            pending = Some(value);
                        },
                        Some(Command::Flush(ack)) => {
                            if let Some(value) = pending.take() {
                                sink(value).await;
                                metrics::counter!("debounce_flush_total", "kind" => "forced")
                                    .increment(1);
                            }
                            let _ = ack.send(());
                        },
                        None => {
                            // Writer dropped: drain and stop
                            if let Some(value) = pending.take() {
                                sink(value).await;
                                metrics::counter!("debounce_flush_total", "kind" => "drain")
                                    .increment(1);
                            }
                            break;
                        },
                    },
                    () = tokio::time::sleep(window), if pending.is_some() => {
                        if let Some(value) = pending.take() {
                            sink(value).await;
                            metrics::counter!("debounce_flush_total", "kind" => "quiesced")
                                .increment(1);
                        }
                    },
                }
            }
        });

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Replaces the pending payload and restarts the quiescence window.
    pub fn submit(&self, value: T) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Command::Submit(value));
        }
    }

    /// Forces the pending payload (if any) through the sink and waits for
    /// the write to complete.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else { return };

        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Drains the pending payload and waits for the worker to finish.
    pub async fn shutdown(mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl<T> Drop for DebouncedWriter<T> {
    fn drop(&mut self) {
        // Closing the channel makes the worker drain asynchronously
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_sink() -> (
        Arc<Mutex<Vec<u32>>>,
        impl Fn(u32) -> std::future::Ready<()> + Send + 'static,
    ) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink_writes = writes.clone();
        let sink = move |value: u32| {
            sink_writes.lock().unwrap().push(value);
            std::future::ready(())
        };
        (writes, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_submissions_coalesce_to_last() {
        let (writes, sink) = recording_sink();
        let writer = DebouncedWriter::new(Duration::from_millis(100), sink);

        for i in 1..=5 {
            writer.submit(i);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*writes.lock().unwrap(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_submissions_each_flush() {
        let (writes, sink) = recording_sink();
        let writer = DebouncedWriter::new(Duration::from_millis(50), sink);

        writer.submit(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer.submit(2);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*writes.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_forces_pending_write() {
        let (writes, sink) = recording_sink();
        let writer = DebouncedWriter::new(Duration::from_secs(3600), sink);

        writer.submit(7);
        writer.flush().await;

        assert_eq!(*writes.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_with_nothing_pending_is_noop() {
        let (writes, sink) = recording_sink();
        let writer = DebouncedWriter::new(Duration::from_millis(50), sink);

        writer.flush().await;
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_pending() {
        let (writes, sink) = recording_sink();
        let writer = DebouncedWriter::new(Duration::from_secs(3600), sink);

        writer.submit(9);
        writer.shutdown().await;

        assert_eq!(*writes.lock().unwrap(), vec![9]);
    }
}
