use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ClientId, FeeBreakdown, Provenance, Ticker, TransactionFeeType};
use crate::error::{AuditError, EngineResult};

/// One completed fee calculation, as handed to the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub client_id: ClientId,
    pub ticker: Ticker,
    pub position_value: Decimal,
    pub loan_days: u32,
    pub borrow_rate_used: Decimal,
    pub provenance: Provenance,
    pub breakdown: FeeBreakdown,
    /// Which transaction-fee formula was applied.
    pub fee_model: TransactionFeeType,
}

/// Where audit records end up. Persistence is a collaborator concern; the
/// engine only guarantees delivery into the sink, best effort.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, record: AuditRecord) -> EngineResult<()>;
}

/// Sink that emits each record as one structured JSON log line under the
/// `audit` target, for deployments where the log pipeline is the sink.
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn persist(&self, record: AuditRecord) -> EngineResult<()> {
        let json = serde_json::to_string(&record).map_err(AuditError::Encode)?;
        info!(target: "audit", record = %json, "locate fee calculated");
        Ok(())
    }
}

/// In-process sink for tests.
#[derive(Default)]
pub struct MemorySink {
    records: std::sync::Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn persist(&self, record: AuditRecord) -> EngineResult<()> {
        self.records.lock().expect("sink lock poisoned").push(record);
        Ok(())
    }
}

/// Non-blocking front of the audit pipeline.
///
/// `emit` enqueues onto a bounded channel and returns immediately; a spawned
/// worker drains into the sink. When the queue is full the oldest record is
/// evicted and counted rather than blocking the response path, and a sink
/// failure is logged and forgotten.
pub struct AuditEmitter {
    tx: Sender<AuditRecord>,
    rx: Receiver<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditEmitter {
    pub fn start(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        let drain = rx.clone();
        tokio::spawn(async move {
            while let Ok(record) = drain.recv().await {
                if let Err(e) = sink.persist(record).await {
                    warn!(error = %e, "audit sink rejected a record");
                }
            }
        });
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(rejected)) => {
                // Evict the oldest queued record to make room.
                if self.rx.try_recv().is_ok() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("audit queue full, dropped the oldest record");
                }
                if self.tx.try_send(rejected).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("audit queue still full, dropped the new record");
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("audit worker is gone, record dropped");
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::{Origin, TransactionFeeType};

    fn record(request_id: &str) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            client_id: ClientId::from("standard"),
            ticker: Ticker::parse("AAPL").unwrap(),
            position_value: dec!(100000),
            loan_days: 30,
            borrow_rate_used: dec!(0.0575),
            provenance: Provenance {
                base: Origin::Live,
                volatility: Origin::Live,
                event: Origin::Absent,
            },
            breakdown: FeeBreakdown {
                borrow_cost: dec!(472.60),
                markup: dec!(23.63),
                transaction_fees: dec!(25.00),
                total_fee: dec!(521.23),
                borrow_rate_used: dec!(0.0575),
            },
            fee_model: TransactionFeeType::Flat,
        }
    }

    async fn drain_until(sink: &MemorySink, expected: usize) -> Vec<AuditRecord> {
        for _ in 0..100 {
            let records = sink.records();
            if records.len() >= expected {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sink.records()
    }

    #[tokio::test]
    async fn records_reach_the_sink() {
        let sink = Arc::new(MemorySink::new());
        let emitter = AuditEmitter::start(sink.clone(), 16);

        emitter.emit(record("req-1"));
        emitter.emit(record("req-2"));

        let records = drain_until(&sink, 2).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request_id, "req-1");
        assert_eq!(emitter.dropped(), 0);
    }

    /// Sink that never finishes, pinning the worker so the queue backs up.
    struct StuckSink;

    #[async_trait]
    impl AuditSink for StuckSink {
        async fn persist(&self, _record: AuditRecord) -> EngineResult<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_without_blocking() {
        let emitter = AuditEmitter::start(Arc::new(StuckSink), 2);

        // The worker swallows at most one record; the rest contend for the
        // two queue slots.
        for i in 0..10 {
            emitter.emit(record(&format!("req-{i}")));
        }

        assert!(emitter.dropped() > 0, "overflow must be counted");
    }

    #[tokio::test]
    async fn sink_failures_do_not_propagate() {
        struct RejectingSink;

        #[async_trait]
        impl AuditSink for RejectingSink {
            async fn persist(&self, _record: AuditRecord) -> EngineResult<()> {
                Err(AuditError::Sink("disk full".into()).into())
            }
        }

        let emitter = AuditEmitter::start(Arc::new(RejectingSink), 4);
        emitter.emit(record("req-1"));
        // Give the worker a beat; nothing to assert beyond "no panic, no
        // propagation".
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(emitter.dropped(), 0);
    }
}
