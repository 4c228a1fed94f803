//! In-process counters for the resolution pipeline.
//!
//! Lightweight event collection for the stats command and operator
//! spot-checks. Not an external metrics surface.

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Pipeline event types
#[derive(Debug, Clone)]
pub enum AssistEvent {
    QueryReceived {
        timestamp: Instant,
    },
    OutOfScope {
        timestamp: Instant,
    },
    BookingDetected {
        timestamp: Instant,
    },
    KnowledgeHit {
        score: f32,
        timestamp: Instant,
    },
    KnowledgeMiss {
        timestamp: Instant,
    },
    Escalated {
        timestamp: Instant,
    },
    PartialAnswer {
        timestamp: Instant,
    },
    SupervisorAnswer {
        late: bool,
        timestamp: Instant,
    },
    EntryLearned {
        timestamp: Instant,
    },
    EmailAttempted {
        success: bool,
        timestamp: Instant,
    },
    InternalFailure {
        stage: String,
        timestamp: Instant,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AssistStats {
    pub queries_received: usize,
    pub out_of_scope: usize,
    pub booking_detected: usize,
    pub knowledge_hits: usize,
    pub knowledge_misses: usize,
    pub escalations: usize,
    pub partial_answers: usize,
    pub supervisor_answers: usize,
    pub late_answers: usize,
    pub entries_learned: usize,
    pub emails_attempted: usize,
    pub emails_sent: usize,
    pub internal_failures: usize,
}

/// Event collector shared across pipeline components
#[derive(Clone)]
pub struct AssistCollector {
    events: Arc<Mutex<Vec<AssistEvent>>>,
    stats: Arc<Mutex<AssistStats>>,
    start_time: Instant,
}

impl AssistCollector {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(AssistStats::default())),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, event: AssistEvent) {
        {
            let mut stats = self.stats.lock().unwrap();
            match &event {
                AssistEvent::QueryReceived { .. } => stats.queries_received += 1,
                AssistEvent::OutOfScope { .. } => stats.out_of_scope += 1,
                AssistEvent::BookingDetected { .. } => stats.booking_detected += 1,
                AssistEvent::KnowledgeHit { .. } => stats.knowledge_hits += 1,
                AssistEvent::KnowledgeMiss { .. } => stats.knowledge_misses += 1,
                AssistEvent::Escalated { .. } => stats.escalations += 1,
                AssistEvent::PartialAnswer { .. } => stats.partial_answers += 1,
                AssistEvent::SupervisorAnswer { late, .. } => {
                    stats.supervisor_answers += 1;
                    if *late {
                        stats.late_answers += 1;
                    }
                }
                AssistEvent::EntryLearned { .. } => stats.entries_learned += 1,
                AssistEvent::EmailAttempted { success, .. } => {
                    stats.emails_attempted += 1;
                    if *success {
                        stats.emails_sent += 1;
                    }
                }
                AssistEvent::InternalFailure { .. } => stats.internal_failures += 1,
            }
        }

        let mut events = self.events.lock().unwrap();
        events.push(event);
    }

    pub fn get_stats(&self) -> AssistStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Fraction of scored lookups that cleared the similarity cutoff
    pub fn hit_rate(&self) -> f64 {
        let stats = self.stats.lock().unwrap();
        let total = stats.knowledge_hits + stats.knowledge_misses;
        if total == 0 {
            1.0
        } else {
            stats.knowledge_hits as f64 / total as f64
        }
    }
}

impl Default for AssistCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_starts_empty() {
        let collector = AssistCollector::new();
        assert_eq!(collector.event_count(), 0);
        assert_eq!(collector.get_stats().queries_received, 0);
    }

    #[test]
    fn test_record_updates_counters() {
        let collector = AssistCollector::new();
        collector.record(AssistEvent::QueryReceived {
            timestamp: Instant::now(),
        });
        collector.record(AssistEvent::Escalated {
            timestamp: Instant::now(),
        });

        let stats = collector.get_stats();
        assert_eq!(stats.queries_received, 1);
        assert_eq!(stats.escalations, 1);
        assert_eq!(collector.event_count(), 2);
    }

    #[test]
    fn test_late_answers_counted_separately() {
        let collector = AssistCollector::new();
        collector.record(AssistEvent::SupervisorAnswer {
            late: false,
            timestamp: Instant::now(),
        });
        collector.record(AssistEvent::SupervisorAnswer {
            late: true,
            timestamp: Instant::now(),
        });

        let stats = collector.get_stats();
        assert_eq!(stats.supervisor_answers, 2);
        assert_eq!(stats.late_answers, 1);
    }

    #[test]
    fn test_hit_rate() {
        let collector = AssistCollector::new();
        for _ in 0..2 {
            collector.record(AssistEvent::KnowledgeHit {
                score: 0.9,
                timestamp: Instant::now(),
            });
        }
        collector.record(AssistEvent::KnowledgeMiss {
            timestamp: Instant::now(),
        });

        assert!((collector.hit_rate() - 0.666).abs() < 0.01);
    }
}
