//! Scrape run bookkeeping: sessions, error log, aggregate statistics and
//! per-source health. Purely additive; nothing here blocks or fails the
//! pipeline, and every method swallows its own lock failures.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Bound on the retained error log.
const ERROR_LOG_CAP: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSession {
    pub id: Uuid,
    pub task_id: Uuid,
    pub source_name: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub items_saved: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub source: String,
    pub message: String,
    pub category: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceHealth {
    pub source: String,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub total_items: i64,
    pub error_count: i64,
    pub average_execution_seconds: f64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceHealth {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 0.0;
        }
        self.successful_runs as f64 / self.total_runs as f64
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStatistics {
    pub active_sessions: usize,
    pub completed_runs: i64,
    pub failed_runs: i64,
    pub total_items_saved: i64,
    pub total_errors: i64,
    pub average_execution_seconds: f64,
}

#[derive(Default)]
struct MonitorState {
    active: HashMap<Uuid, MonitoringSession>,
    per_source: HashMap<String, SourceBucket>,
    error_log: VecDeque<ErrorEntry>,
    completed_runs: i64,
    failed_runs: i64,
    total_items_saved: i64,
    total_errors: i64,
    total_duration_seconds: f64,
}

#[derive(Default)]
struct SourceBucket {
    total_runs: i64,
    successful_runs: i64,
    failed_runs: i64,
    total_items: i64,
    error_count: i64,
    total_duration_seconds: f64,
    last_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_session(&self, task_id: Uuid, source_name: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.active.insert(
            task_id,
            MonitoringSession {
                id: Uuid::new_v4(),
                task_id,
                source_name: source_name.to_string(),
                started_at: Utc::now(),
                stopped_at: None,
                success: None,
                items_saved: 0,
            },
        );
    }

    pub fn stop_session(&self, task_id: Uuid, success: bool, items_saved: i64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(mut session) = state.active.remove(&task_id) else {
            return;
        };
        let stopped = Utc::now();
        session.stopped_at = Some(stopped);
        session.success = Some(success);
        session.items_saved = items_saved;

        let duration = (stopped - session.started_at).num_milliseconds() as f64 / 1000.0;
        if success {
            state.completed_runs += 1;
        } else {
            state.failed_runs += 1;
        }
        state.total_items_saved += items_saved;
        state.total_duration_seconds += duration;

        let bucket = state
            .per_source
            .entry(session.source_name.clone())
            .or_default();
        bucket.total_runs += 1;
        if success {
            bucket.successful_runs += 1;
        } else {
            bucket.failed_runs += 1;
        }
        bucket.total_items += items_saved;
        bucket.total_duration_seconds += duration;
        bucket.last_run_at = Some(stopped);
    }

    pub fn record_error(&self, source: &str, message: &str, category: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.total_errors += 1;
        if state.error_log.len() >= ERROR_LOG_CAP {
            state.error_log.pop_front();
        }
        state.error_log.push_back(ErrorEntry {
            source: source.to_string(),
            message: message.to_string(),
            category: category.to_string(),
            at: Utc::now(),
        });

        let bucket = state.per_source.entry(source.to_string()).or_default();
        bucket.error_count += 1;
        bucket.last_error = Some(message.to_string());
    }

    pub fn statistics(&self) -> MonitorStatistics {
        let Ok(state) = self.state.lock() else {
            return MonitorStatistics::default();
        };
        let finished = state.completed_runs + state.failed_runs;
        MonitorStatistics {
            active_sessions: state.active.len(),
            completed_runs: state.completed_runs,
            failed_runs: state.failed_runs,
            total_items_saved: state.total_items_saved,
            total_errors: state.total_errors,
            average_execution_seconds: if finished > 0 {
                state.total_duration_seconds / finished as f64
            } else {
                0.0
            },
        }
    }

    pub fn health_report(&self) -> Vec<SourceHealth> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut report: Vec<SourceHealth> = state
            .per_source
            .iter()
            .map(|(name, bucket)| SourceHealth {
                source: name.clone(),
                total_runs: bucket.total_runs,
                successful_runs: bucket.successful_runs,
                failed_runs: bucket.failed_runs,
                total_items: bucket.total_items,
                error_count: bucket.error_count,
                average_execution_seconds: if bucket.total_runs > 0 {
                    bucket.total_duration_seconds / bucket.total_runs as f64
                } else {
                    0.0
                },
                last_run_at: bucket.last_run_at,
                last_error: bucket.last_error.clone(),
            })
            .collect();
        report.sort_by(|a, b| a.source.cmp(&b.source));
        report
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorEntry> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state.error_log.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle_rolls_into_statistics() {
        let monitor = Monitor::new();
        let task = Uuid::new_v4();
        monitor.start_session(task, "board-a");
        assert_eq!(monitor.statistics().active_sessions, 1);

        monitor.stop_session(task, true, 7);
        let stats = monitor.statistics();
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.completed_runs, 1);
        assert_eq!(stats.total_items_saved, 7);
    }

    #[test]
    fn errors_accumulate_per_source() {
        let monitor = Monitor::new();
        monitor.record_error("board-a", "boom", "fetch");
        monitor.record_error("board-a", "bust", "extraction");
        monitor.record_error("board-b", "nope", "fetch");

        let report = monitor.health_report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].source, "board-a");
        assert_eq!(report[0].error_count, 2);
        assert_eq!(report[0].last_error.as_deref(), Some("bust"));
        assert_eq!(monitor.statistics().total_errors, 3);
    }

    #[test]
    fn stopping_unknown_session_is_a_no_op() {
        let monitor = Monitor::new();
        monitor.stop_session(Uuid::new_v4(), true, 3);
        assert_eq!(monitor.statistics().completed_runs, 0);
    }

    #[test]
    fn health_report_tracks_failures() {
        let monitor = Monitor::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        monitor.start_session(t1, "board-a");
        monitor.stop_session(t1, true, 2);
        monitor.start_session(t2, "board-a");
        monitor.stop_session(t2, false, 0);

        let report = monitor.health_report();
        assert_eq!(report[0].total_runs, 2);
        assert_eq!(report[0].successful_runs, 1);
        assert_eq!(report[0].failed_runs, 1);
        assert!((report[0].success_rate() - 0.5).abs() < f64::EPSILON);
    }
}
