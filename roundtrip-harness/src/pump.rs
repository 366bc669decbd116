//! Pull loop over a bounded queue fed by a consumer.
//!
//! The consumer is polled by a pump that pushes records into an `mpsc`
//! channel; the caller pulls from the channel until its stop condition holds
//! or the cancellation signal fires. The pump may read ahead of the caller,
//! so only records the caller has handled are acknowledged back to the
//! consumer. The pump is told to stop and has returned before `pull_records`
//! does, so the consumer can be disconnected safely afterwards.

use log::{debug, warn};
use roundtrip_broker::{BrokerError, ConsumedRecord, RecordConsumer};
use tokio::sync::{Notify, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    AfterRecords(usize),
    UntilCancelled,
}

impl StopPolicy {
    /// `0` means no limit.
    pub fn from_max(max_messages: usize) -> Self {
        match max_messages {
            0 => StopPolicy::UntilCancelled,
            limit => StopPolicy::AfterRecords(limit),
        }
    }

    pub fn satisfied_by(&self, received: usize) -> bool {
        match self {
            StopPolicy::AfterRecords(limit) => received >= *limit,
            StopPolicy::UntilCancelled => false,
        }
    }
}

#[derive(Debug)]
pub struct PullOutcome {
    pub records: Vec<ConsumedRecord>,
    pub cancelled: bool,
}

pub async fn pull_records<F>(
    consumer: &mut dyn RecordConsumer,
    policy: StopPolicy,
    capacity: usize,
    cancel: &Notify,
    mut on_record: F,
) -> Result<PullOutcome, BrokerError>
where
    F: FnMut(&ConsumedRecord),
{
    let (tx, mut rx) = mpsc::channel::<ConsumedRecord>(capacity.max(1));
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<ConsumedRecord>();
    let stop = Notify::new();
    let stop = &stop;

    let pump = {
        let consumer = &mut *consumer;
        let handled = &mut ack_rx;
        async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.notified() => break Ok(()),
                    Some(record) = handled.recv() => {
                        if let Err(err) = consumer.ack(&record).await {
                            break Err(err);
                        }
                    }
                    polled = consumer.poll() => match polled {
                        Ok(record) => {
                            if tx.send(record).await.is_err() {
                                break Ok(());
                            }
                        }
                        Err(err) => break Err(err),
                    },
                }
            }
        }
    };

    let pull = async move {
        let mut records = Vec::new();
        let mut cancelled = false;
        while !policy.satisfied_by(records.len()) {
            tokio::select! {
                biased;
                _ = cancel.notified() => {
                    cancelled = true;
                    break;
                }
                next = rx.recv() => match next {
                    Some(record) => {
                        on_record(&record);
                        // The receiver outlives both halves, so this cannot fail.
                        let _ = ack_tx.send(record.clone());
                        records.push(record);
                    }
                    None => break,
                },
            }
        }
        stop.notify_one();
        PullOutcome { records, cancelled }
    };

    let (pumped, outcome): (Result<(), BrokerError>, PullOutcome) = tokio::join!(pump, pull);
    let pumped = pumped.and(ack_pending(consumer, &mut ack_rx).await);
    match pumped {
        Err(err) if !policy.satisfied_by(outcome.records.len()) => Err(err),
        Err(err) => {
            warn!("Consumer failed after the stop condition was met: {}", err);
            Ok(outcome)
        }
        Ok(()) => {
            debug!("Pump stopped after {} record(s)", outcome.records.len());
            Ok(outcome)
        }
    }
}

/// Acknowledge handled records the pump had not picked up before it stopped.
async fn ack_pending(
    consumer: &mut dyn RecordConsumer,
    handled: &mut mpsc::UnboundedReceiver<ConsumedRecord>,
) -> Result<(), BrokerError> {
    while let Ok(record) = handled.try_recv() {
        consumer.ack(&record).await?;
    }
    Ok(())
}
