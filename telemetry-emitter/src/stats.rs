//! Running totals across cycles.

use crate::workload::CycleReport;

/// Statistics for the emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitterStats {
    pub cycles: u64,
    pub spans_emitted: u64,
    pub logs_emitted: u64,
    pub metric_points: u64,
    pub emission_errors: u64,
}

impl EmitterStats {
    /// Add one cycle's results.
    pub fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.spans_emitted += report.spans_emitted;
        self.logs_emitted += report.logs_emitted;
        self.metric_points += report.metric_points;
        self.emission_errors += report.failures.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationContext;
    use crate::error::EmitterError;
    use crate::logs::LogMessage;
    use crate::pipeline::SignalKind;
    use crate::workload::{OperationLabel, SyntheticOperation};

    #[test]
    fn test_record_accumulates() {
        let report = CycleReport {
            operation: SyntheticOperation {
                label: OperationLabel::ApiCall,
                simulated_latency_ms: 42,
            },
            message: LogMessage::FetchingData,
            context: CorrelationContext::new("0".repeat(31) + "1", "0".repeat(15) + "2"),
            spans_emitted: 2,
            logs_emitted: 0,
            metric_points: 2,
            failures: vec![EmitterError::emit(SignalKind::Logs, "sink down")],
        };

        let mut stats = EmitterStats::default();
        stats.record(&report);
        stats.record(&report);

        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.spans_emitted, 4);
        assert_eq!(stats.logs_emitted, 0);
        assert_eq!(stats.metric_points, 4);
        assert_eq!(stats.emission_errors, 2);
    }
}
