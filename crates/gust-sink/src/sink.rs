use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::{debug, warn};

use gust_core::{Delivery, MessageCodec, ProduceAck, ProduceRequest};

/// Sequence bookkeeping for one producing worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerTally {
    pub received: u64,
    pub last_sequence: Option<u64>,
    /// Sequences skipped between consecutive messages
    pub gaps: u64,
    /// Messages at or below the last seen sequence
    pub out_of_order: u64,
    /// Times the worker started over from sequence 0
    pub restarts: u64,
}

impl WorkerTally {
    fn observe(&mut self, sequence: u64) {
        self.received += 1;
        match self.last_sequence {
            Some(last) if sequence == 0 && last > 0 => self.restarts += 1,
            Some(last) if sequence > last => self.gaps += sequence - last - 1,
            Some(_) => {
                self.out_of_order += 1;
                return;
            }
            None => {}
        }
        self.last_sequence = Some(sequence);
    }
}

#[derive(Debug, Default)]
pub struct SinkMetrics {
    pub total_messages: AtomicU64,
    pub total_bytes: AtomicU64,
    pub rejected: AtomicU64,
    pub undecodable: AtomicU64,
    pub active_connections: AtomicU64,
}

/// In-memory broker: assigns per-topic offsets and tracks worker sequences
#[derive(Debug, Default)]
pub struct Sink {
    /// Next offset by topic
    offsets: DashMap<String, AtomicI64>,
    /// When set, produce requests for any other topic are rejected
    allowed_topics: Option<Vec<String>>,
    workers: DashMap<u32, WorkerTally>,
    metrics: SinkMetrics,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.allowed_topics = Some(topics);
        self
    }

    /// Accept one produce request and build its acknowledgement
    pub fn ingest(&self, req: &ProduceRequest) -> ProduceAck {
        if let Some(allowed) = &self.allowed_topics {
            if !allowed.iter().any(|t| t == &req.topic) {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return ProduceAck::Rejected(format!("unknown topic '{}'", req.topic));
            }
        }

        let offset = self
            .offsets
            .entry(req.topic.clone())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        self.metrics.total_messages.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_bytes
            .fetch_add(req.payload.len() as u64, Ordering::Relaxed);

        match MessageCodec::decode(&req.payload) {
            Ok(message) => {
                self.workers
                    .entry(message.worker_id)
                    .or_default()
                    .observe(message.sequence);
                debug!(
                    topic = %req.topic,
                    offset,
                    worker_id = message.worker_id,
                    sequence = message.sequence,
                    "Message stored"
                );
            }
            Err(e) => {
                self.metrics.undecodable.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %req.topic, offset, "Payload is not a load test message: {}", e);
            }
        }

        ProduceAck::Accepted(Delivery {
            partition: 0,
            offset,
        })
    }

    pub fn tally(&self, worker_id: u32) -> Option<WorkerTally> {
        self.workers.get(&worker_id).map(|entry| *entry)
    }

    /// All worker tallies ordered by worker id
    pub fn tallies(&self) -> Vec<(u32, WorkerTally)> {
        let mut tallies: Vec<_> = self
            .workers
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        tallies.sort_by_key(|(id, _)| *id);
        tallies
    }

    pub fn total_gaps(&self) -> u64 {
        self.workers.iter().map(|entry| entry.gaps).sum()
    }

    pub fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gust_core::LoadTestMessage;

    fn request(worker_id: u32, sequence: u64) -> ProduceRequest {
        let message = LoadTestMessage::new(worker_id, sequence);
        ProduceRequest {
            topic: "test-topic".to_string(),
            payload: MessageCodec::encode(&message).unwrap(),
        }
    }

    fn offset(ack: ProduceAck) -> i64 {
        match ack {
            ProduceAck::Accepted(delivery) => delivery.offset,
            ProduceAck::Rejected(reason) => panic!("rejected: {}", reason),
        }
    }

    #[test]
    fn test_offsets_per_topic() {
        let sink = Sink::new();
        assert_eq!(offset(sink.ingest(&request(0, 0))), 0);
        assert_eq!(offset(sink.ingest(&request(1, 0))), 1);

        let other = ProduceRequest {
            topic: "other".to_string(),
            ..request(0, 1)
        };
        assert_eq!(offset(sink.ingest(&other)), 0);
        assert_eq!(sink.metrics().total_messages.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_tracks_gaps_and_reordering() {
        let sink = Sink::new();
        for sequence in [0, 1, 2, 5, 4, 6] {
            sink.ingest(&request(3, sequence));
        }

        let tally = sink.tally(3).unwrap();
        assert_eq!(tally.received, 6);
        assert_eq!(tally.gaps, 2);
        assert_eq!(tally.out_of_order, 1);
        assert_eq!(tally.last_sequence, Some(6));
        assert_eq!(sink.total_gaps(), 2);
    }

    #[test]
    fn test_sequence_restart() {
        let sink = Sink::new();
        for sequence in [0, 1, 2, 0, 1] {
            sink.ingest(&request(0, sequence));
        }

        let tally = sink.tally(0).unwrap();
        assert_eq!(tally.restarts, 1);
        assert_eq!(tally.gaps, 0);
        assert_eq!(tally.last_sequence, Some(1));
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let sink = Sink::new().with_topics(vec!["test-topic".to_string()]);
        let req = ProduceRequest {
            topic: "elsewhere".to_string(),
            payload: Bytes::from_static(b"{}"),
        };

        assert!(matches!(sink.ingest(&req), ProduceAck::Rejected(_)));
        assert_eq!(sink.metrics().rejected.load(Ordering::Relaxed), 1);
        assert!(matches!(sink.ingest(&request(0, 0)), ProduceAck::Accepted(_)));
    }

    #[test]
    fn test_undecodable_payload_still_accepted() {
        let sink = Sink::new();
        let req = ProduceRequest {
            topic: "test-topic".to_string(),
            payload: Bytes::from_static(b"not json"),
        };

        assert!(matches!(sink.ingest(&req), ProduceAck::Accepted(_)));
        assert_eq!(sink.metrics().undecodable.load(Ordering::Relaxed), 1);
        assert!(sink.tallies().is_empty());
    }
}
