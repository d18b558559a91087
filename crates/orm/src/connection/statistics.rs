//! Session Statistics
//!
//! Counters of the statements a session sent to its connections and of
//! the results it was served from the query cache.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub selects: u64,
    pub executes: u64,
    pub inserts: u64,
    pub cache_hits: u64,
    pub slow_queries: u64,
    pub total_time: Duration,
}

impl SessionStats {
    /// Statements that reached a database
    pub fn queries(&self) -> u64 {
        self.selects + self.executes + self.inserts
    }

    pub fn average_time(&self) -> Duration {
        match self.queries() {
            0 => Duration::ZERO,
            n => self.total_time / n as u32,
        }
    }

    pub(crate) fn record(&mut self, kind: StatementKind, elapsed: Duration, slow: bool) {
        match kind {
            StatementKind::Select => self.selects += 1,
            StatementKind::Execute => self.executes += 1,
            StatementKind::Insert => self.inserts += 1,
        }
        self.total_time += elapsed;
        if slow {
            self.slow_queries += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatementKind {
    Select,
    Execute,
    Insert,
}

impl StatementKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Execute => "execute",
            StatementKind::Insert => "insert",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = SessionStats::default();
        stats.record(StatementKind::Select, Duration::from_millis(4), false);
        stats.record(StatementKind::Insert, Duration::from_millis(2), true);
        assert_eq!(stats.queries(), 2);
        assert_eq!(stats.slow_queries, 1);
        assert_eq!(stats.average_time(), Duration::from_millis(3));
    }
}
