use tracing::info;

pub struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub const COUNTERS: [Metric; 6] = [
    LEASES_ACQUIRED_TOTAL,
    LEASES_LOST_TOTAL,
    LEASE_ACQUIRE_FAILURES_TOTAL,
    CHECKPOINTS_TOTAL,
    DOCUMENTS_PROCESSED_TOTAL,
    OBSERVER_ERRORS_TOTAL,
];
pub const GAUGES: [Metric; 2] = [PARTITIONS_OWNED, REMAINING_WORK_ESTIMATE];

// LEASE Metrics --------------------------

pub const LEASES_ACQUIRED_TOTAL: Metric = Metric {
    name: "changefeed_leases_acquired_total",
    description: "Total number of leases acquired by this host",
};

pub const LEASES_LOST_TOTAL: Metric = Metric {
    name: "changefeed_leases_lost_total",
    description: "Total number of leases taken over by another host while owned",
};

pub const LEASE_ACQUIRE_FAILURES_TOTAL: Metric = Metric {
    name: "changefeed_lease_acquire_failures_total",
    description: "Total number of unexpected lease acquisition failures",
};

pub const PARTITIONS_OWNED: Metric = Metric {
    name: "changefeed_partitions_owned",
    description: "Number of partitions currently processed by this host",
};

// PARTITION Metrics --------------------------

pub const CHECKPOINTS_TOTAL: Metric = Metric {
    name: "changefeed_checkpoints_total",
    description: "Total number of continuation checkpoints written",
};

pub const DOCUMENTS_PROCESSED_TOTAL: Metric = Metric {
    name: "changefeed_documents_processed_total",
    description: "Total number of changed documents delivered to observers",
};

pub const OBSERVER_ERRORS_TOTAL: Metric = Metric {
    name: "changefeed_observer_errors_total",
    description: "Total number of partitions stopped by an observer failure",
};

pub const REMAINING_WORK_ESTIMATE: Metric = Metric {
    name: "changefeed_remaining_work",
    description: "Estimated number of changes not yet processed, summed over all leases",
};

/// Describes every processor metric to the installed recorder.
/// Call it after installing the recorder, e.g. a Prometheus exporter.
pub fn register_metrics() {
    info!("registering change feed processor metrics");

    for metric in COUNTERS {
        register_counter(metric)
    }

    for metric in GAUGES {
        register_gauge(metric)
    }
}

fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}
