//! Background aggregation of dependency edges.
//!
//! Written spans are sent over a bounded channel to one tokio task, which
//! buffers them and flushes a batch when it is full, when the flush
//! interval elapses, on request, and when the last handle goes away.

use super::derive::EdgeDeriver;
use super::writer::CounterWriter;
use crate::core::config::DependencyConfig;
use crate::core::{Result, Span, TraceKvError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

enum Command {
    Span(Box<Span>),
    Flush(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Handle to the aggregation task. Cheap to clone.
#[derive(Clone)]
pub struct DependencyAggregator {
    sender: mpsc::Sender<Command>,
}

struct AggregatorTask {
    receiver: mpsc::Receiver<Command>,
    deriver: Arc<dyn EdgeDeriver>,
    writer: CounterWriter,
    batch: Vec<Span>,
    batch_size: usize,
    flush_interval: Duration,
}

impl DependencyAggregator {
    /// Starts the aggregation task on the current runtime.
    pub fn spawn(
        deriver: Arc<dyn EdgeDeriver>,
        writer: CounterWriter,
        config: &DependencyConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let task = AggregatorTask {
            receiver,
            deriver,
            writer,
            batch: Vec::with_capacity(config.batch_size),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval.max(Duration::from_millis(1)),
        };
        let handle = tokio::spawn(task.run());
        (Self { sender }, handle)
    }

    /// Queues a span for derivation. Waits when the channel is full.
    pub async fn record(&self, span: &Span) -> Result<()> {
        self.sender
            .send(Command::Span(Box::new(span.clone())))
            .await
            .map_err(|_| TraceKvError::AggregatorClosed)
    }

    /// Derives and persists everything queued so far.
    pub async fn flush(&self) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(Command::Flush(reply))
            .await
            .map_err(|_| TraceKvError::AggregatorClosed)?;
        result.await.map_err(|_| TraceKvError::AggregatorClosed)?
    }

    /// Flushes and stops the task. Later calls on any handle fail.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(Command::Shutdown(reply))
            .await
            .map_err(|_| TraceKvError::AggregatorClosed)?;
        result.await.map_err(|_| TraceKvError::AggregatorClosed)?
    }
}

impl AggregatorTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(Command::Span(span)) => {
                        self.batch.push(*span);
                        if self.batch.len() >= self.batch_size {
                            self.flush_logged().await;
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        let result = self.flush().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.drain_and_close(reply).await;
                        break;
                    }
                    None => {
                        self.flush_logged().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush_logged().await,
            }
        }
        tracing::debug!("Dependency aggregator stopped");
    }

    async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let spans = std::mem::take(&mut self.batch);
        let counts = self.deriver.derive(&spans).await?;
        tracing::debug!(
            "Flushing {} dependency pairs derived from {} spans",
            counts.len(),
            spans.len()
        );
        self.writer.write(&counts, self.deriver.name(), Utc::now()).await
    }

    /// Takes every command still queued, so spans accepted before the close
    /// are part of the final flush and every waiting caller gets an answer.
    async fn drain_and_close(&mut self, reply: oneshot::Sender<Result<()>>) {
        self.receiver.close();
        let mut waiting = Vec::new();
        while let Ok(command) = self.receiver.try_recv() {
            match command {
                Command::Span(span) => self.batch.push(*span),
                Command::Flush(other) | Command::Shutdown(other) => waiting.push(other),
            }
        }
        let result = self.flush().await;
        for other in waiting {
            let shared = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(TraceKvError::store(e.to_string())),
            };
            let _ = other.send(shared);
        }
        let _ = reply.send(result);
    }

    /// Background flushes have no caller to report to.
    async fn flush_logged(&mut self) {
        if let Err(e) = self.flush().await {
            tracing::error!("Dependency flush failed, batch dropped: {}", e);
        }
    }
}
