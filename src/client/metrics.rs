use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Which protocol an operation ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Register,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetric {
    pub operation: OperationKind,
    pub local_index: Option<u32>,
    pub start_time: u64, // milliseconds since epoch
    pub latency_ms: u64,
    pub success: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub failure_rate: f64,

    // Latency statistics (milliseconds), successful operations only
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    pub latency_avg_ms: f64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,

    pub operations_by_kind: HashMap<OperationKind, usize>,
    pub failures_by_kind: HashMap<OperationKind, usize>,

    // Failure reasons breakdown
    pub failure_reasons: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct ClientMetrics {
    client_name: String,
    start_time: Instant,
    operations: Vec<OperationMetric>,
}

impl ClientMetrics {
    /// Start collecting for `client_name`; the run clock starts now.
    pub fn new(client_name: String) -> Self {
        Self {
            client_name,
            start_time: Instant::now(),
            operations: Vec::new(),
        }
    }

    /// Record one finished operation.
    ///
    /// # Arguments
    ///
    /// * `operation` - Register or write
    /// * `local_index` - Mailbox involved, when known
    /// * `latency` - Time from dispatch to result
    /// * `success` - Whether the operation completed
    /// * `failure_reason` - Short error label, `None` on success
    pub fn record_operation(
        &mut self,
        operation: OperationKind,
        local_index: Option<u32>,
        latency: Duration,
        success: bool,
        failure_reason: Option<String>,
    ) {
        let start_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(latency.as_millis() as u64);

        self.operations.push(OperationMetric {
            operation,
            local_index,
            start_time,
            latency_ms: latency.as_millis() as u64,
            success,
            failure_reason,
        });
    }

    pub fn aggregate(&self) -> AggregatedStats {
        let mut stats = AggregatedStats::default();

        if self.operations.is_empty() {
            return stats;
        }

        stats.total_operations = self.operations.len();
        stats.successful_operations = self.operations.iter().filter(|o| o.success).count();
        stats.failed_operations = stats.total_operations - stats.successful_operations;
        stats.failure_rate =
            (stats.failed_operations as f64 / stats.total_operations as f64) * 100.0;

        let mut successful_latencies: Vec<u64> = self
            .operations
            .iter()
            .filter(|o| o.success)
            .map(|o| o.latency_ms)
            .collect();

        if !successful_latencies.is_empty() {
            successful_latencies.sort_unstable();

            stats.latency_min_ms = successful_latencies[0];
            stats.latency_max_ms = successful_latencies[successful_latencies.len() - 1];
            stats.latency_avg_ms = successful_latencies.iter().sum::<u64>() as f64
                / successful_latencies.len() as f64;

            stats.latency_p50_ms = percentile(&successful_latencies, 50.0);
            stats.latency_p95_ms = percentile(&successful_latencies, 95.0);
            stats.latency_p99_ms = percentile(&successful_latencies, 99.0);
        }

        for operation in &self.operations {
            *stats
                .operations_by_kind
                .entry(operation.operation)
                .or_insert(0) += 1;
        }

        for operation in self.operations.iter().filter(|o| !o.success) {
            *stats
                .failures_by_kind
                .entry(operation.operation)
                .or_insert(0) += 1;
            if let Some(reason) = &operation.failure_reason {
                *stats.failure_reasons.entry(reason.clone()).or_insert(0) += 1;
            }
        }

        stats
    }

    pub fn export_to_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let stats = self.aggregate();

        let output = serde_json::json!({
            "client_name": self.client_name,
            "run_duration_secs": self.start_time.elapsed().as_secs(),
            "aggregated_stats": stats,
            "operations": self.operations,
        });

        let json_string = serde_json::to_string_pretty(&output)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;

        Ok(())
    }
}

fn percentile(sorted_data: &[u64], percentile: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }

    let index = (percentile / 100.0 * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(percentile(&data, 50.0), 5);
        assert_eq!(percentile(&data, 95.0), 10);
        assert_eq!(percentile(&data, 0.0), 1);
        assert_eq!(percentile(&[], 50.0), 0);
    }

    #[test]
    fn test_metrics_aggregation() {
        let mut metrics = ClientMetrics::new("TestClient".to_string());

        metrics.record_operation(OperationKind::Register, Some(0), Duration::from_millis(100), true, None);
        metrics.record_operation(OperationKind::Write, Some(0), Duration::from_millis(200), true, None);
        metrics.record_operation(
            OperationKind::Write,
            Some(5),
            Duration::from_millis(150),
            false,
            Some("unknown_mailbox".to_string()),
        );

        let stats = metrics.aggregate();

        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.successful_operations, 2);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.latency_min_ms, 100);
        assert_eq!(stats.latency_max_ms, 200);
        assert_eq!(stats.operations_by_kind.get(&OperationKind::Write), Some(&2));
        assert_eq!(stats.operations_by_kind.get(&OperationKind::Register), Some(&1));
        assert_eq!(stats.failures_by_kind.get(&OperationKind::Write), Some(&1));
        assert_eq!(stats.failures_by_kind.get(&OperationKind::Register), None);
        assert_eq!(stats.failure_reasons.get("unknown_mailbox"), Some(&1));
    }

    #[test]
    fn test_export_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let mut metrics = ClientMetrics::new("TestClient".to_string());
        metrics.record_operation(OperationKind::Register, Some(1), Duration::from_millis(10), true, None);
        metrics.export_to_json(&path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["client_name"], "TestClient");
        assert_eq!(written["aggregated_stats"]["total_operations"], 1);
        assert_eq!(written["aggregated_stats"]["operations_by_kind"]["register"], 1);
    }
}
