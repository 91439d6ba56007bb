use async_trait::async_trait;
use changefeed_core::Lease;
use changefeed_lease_store::LeaseStoreError;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSeverity {
    Critical,
    Error,
    Informational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredOperation {
    AcquireLease,
}

impl fmt::Display for MonitoredOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitoredOperation::AcquireLease => f.write_str("acquire_lease"),
        }
    }
}

/// A failure worth surfacing to whoever watches the processor.
#[derive(Debug, Clone)]
pub struct HealthMonitoringRecord {
    pub severity: HealthSeverity,
    pub operation: MonitoredOperation,
    pub lease: Lease,
    pub cause: Arc<LeaseStoreError>,
}

/// Receives unexpected lease acquisition failures. Must not block for long:
/// it is called inline from the balancing loop.
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    async fn inspect(&self, record: HealthMonitoringRecord);
}

/// Logs every record and carries on.
#[derive(Debug, Clone, Default)]
pub struct TraceHealthMonitor;

#[async_trait]
impl HealthMonitor for TraceHealthMonitor {
    async fn inspect(&self, record: HealthMonitoringRecord) {
        let lease_token = record.lease.lease_token.as_str();
        match record.severity {
            HealthSeverity::Critical | HealthSeverity::Error => error!(
                operation = %record.operation,
                lease_token = %lease_token,
                severity = ?record.severity,
                error = %record.cause,
                "health monitor: operation failed"
            ),
            HealthSeverity::Informational => info!(
                operation = %record.operation,
                lease_token = %lease_token,
                error = %record.cause,
                "health monitor"
            ),
        }
    }
}
