use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Direction};
use uuid::Uuid;

use crate::models::event::UploadEvent;

/// Durable, append-only channel for upload events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append to every topic the log fans out to. All topics or none.
    async fn append(&self, event: &UploadEvent) -> Result<(), QueueError>;

    /// Check connectivity (for health checks).
    async fn ping(&self) -> Result<(), QueueError>;
}

/// Partition an event is routed to. Stable per record so a partition's single
/// consumer sees one record's events in order.
pub fn partition_for(record_id: Uuid, partitions: u32) -> u32 {
    (record_id.as_u128() % u128::from(partitions.max(1))) as u32
}

fn pending_key(topic: &str, partition: u32) -> String {
    format!("{topic}:{partition}")
}

fn processing_key(topic: &str, partition: u32) -> String {
    format!("{topic}:{partition}:processing")
}

fn deliveries_key(topic: &str) -> String {
    format!("{topic}:deliveries")
}

fn dead_key(topic: &str) -> String {
    format!("{topic}:dead")
}

/// Redis-backed event log: one list per `(topic, partition)` and a
/// processing list per partition for at-least-once delivery.
pub struct RedisEventLog {
    client: redis::Client,
    topics: Vec<String>,
    partitions: u32,
}

impl RedisEventLog {
    pub fn new(redis_url: &str, topics: Vec<String>, partitions: u32) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            topics,
            partitions: partitions.max(1),
        })
    }

    /// Subscribe to one topic. Each consumer group uses its own topic.
    pub fn subscribe(&self, topic: &str, max_deliveries: u32) -> Subscription {
        Subscription {
            client: self.client.clone(),
            topic: topic.to_string(),
            partitions: self.partitions,
            next_partition: 0,
            max_deliveries: max_deliveries.max(1),
        }
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn append(&self, event: &UploadEvent) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;
        let partition = partition_for(event.record_id, self.partitions);

        let mut pipe = redis::pipe();
        pipe.atomic();
        for topic in &self.topics {
            pipe.lpush(pending_key(topic, partition), &payload).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// One event handed to a consumer. Must be settled with `ack` or `nack`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: UploadEvent,
    /// 1 for the first delivery of this record on this topic.
    pub attempt: u32,
    partition: u32,
    payload: String,
}

/// What `nack` did with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    DeadLettered,
}

/// Where a failed delivery goes: the dead-letter list once `attempt` reaches
/// `max_deliveries`, otherwise back onto its partition.
pub fn settle(attempt: u32, max_deliveries: u32) -> NackOutcome {
    if attempt >= max_deliveries {
        NackOutcome::DeadLettered
    } else {
        NackOutcome::Requeued
    }
}

/// A consumer's handle on one topic, polling its partitions round-robin.
pub struct Subscription {
    client: redis::Client,
    topic: String,
    partitions: u32,
    next_partition: u32,
    max_deliveries: u32,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Settle in-flight events left behind by a crashed consumer, oldest first.
    /// Each counts as a failed delivery: it goes back on its partition, or to
    /// the dead-letter list once its deliveries reached `max_deliveries`.
    /// Returns how many were requeued.
    pub async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let mut recovered = 0;

        for partition in 0..self.partitions {
            let processing = processing_key(&self.topic, partition);
            loop {
                let payload: Option<String> = conn.lindex(&processing, 0).await?;
                let Some(payload) = payload else {
                    break;
                };

                let record_id = serde_json::from_str::<UploadEvent>(&payload)
                    .ok()
                    .map(|event| event.record_id.to_string());
                let attempt = match &record_id {
                    Some(id) => {
                        let count: Option<u32> = conn.hget(deliveries_key(&self.topic), id).await?;
                        count.unwrap_or(0)
                    }
                    None => u32::MAX,
                };

                let mut pipe = redis::pipe();
                pipe.atomic().lrem(&processing, 1, &payload).ignore();
                match settle(attempt, self.max_deliveries) {
                    NackOutcome::Requeued => {
                        pipe.rpush(pending_key(&self.topic, partition), &payload).ignore();
                        recovered += 1;
                    }
                    NackOutcome::DeadLettered => {
                        tracing::warn!(topic = %self.topic, attempt, "In-flight event at delivery limit, dead-lettering");
                        pipe.lpush(dead_key(&self.topic), &payload).ignore();
                        if let Some(id) = &record_id {
                            pipe.hdel(deliveries_key(&self.topic), id).ignore();
                        }
                    }
                }
                pipe.query_async::<()>(&mut conn).await?;
            }
        }

        Ok(recovered)
    }

    /// Take the next event, moving it to the partition's processing list.
    pub async fn next(&mut self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn().await?;

        for _ in 0..self.partitions {
            let partition = self.next_partition;
            self.next_partition = (self.next_partition + 1) % self.partitions;

            let payload: Option<String> = conn
                .rpoplpush(
                    pending_key(&self.topic, partition),
                    processing_key(&self.topic, partition),
                )
                .await?;
            let Some(payload) = payload else {
                continue;
            };

            let event: UploadEvent = match serde_json::from_str(&payload) {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(topic = %self.topic, error = %e, "Undecodable event, dead-lettering");
                    let mut pipe = redis::pipe();
                    pipe.atomic()
                        .lrem(processing_key(&self.topic, partition), 1, &payload)
                        .ignore()
                        .lpush(dead_key(&self.topic), &payload)
                        .ignore();
                    pipe.query_async::<()>(&mut conn).await?;
                    continue;
                }
            };

            let count: i64 = conn
                .hincr(deliveries_key(&self.topic), event.record_id.to_string(), 1)
                .await?;

            return Ok(Some(Delivery {
                event,
                attempt: u32::try_from(count).unwrap_or(u32::MAX),
                partition,
                payload,
            }));
        }

        Ok(None)
    }

    /// Settle a successfully handled delivery.
    pub async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(processing_key(&self.topic, delivery.partition), 1, &delivery.payload)
            .ignore()
            .hdel(deliveries_key(&self.topic), delivery.event.record_id.to_string())
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Settle a failed delivery: put it back at the head of its partition, or
    /// move it to the topic's dead-letter list once `max_deliveries` is reached.
    pub async fn nack(&self, delivery: &Delivery) -> Result<NackOutcome, QueueError> {
        let mut conn = self.conn().await?;
        let processing = processing_key(&self.topic, delivery.partition);
        let mut pipe = redis::pipe();
        pipe.atomic().lrem(&processing, 1, &delivery.payload).ignore();

        let outcome = settle(delivery.attempt, self.max_deliveries);
        match outcome {
            NackOutcome::DeadLettered => {
                pipe.lpush(dead_key(&self.topic), &delivery.payload)
                    .ignore()
                    .hdel(deliveries_key(&self.topic), delivery.event.record_id.to_string())
                    .ignore();
            }
            NackOutcome::Requeued => {
                pipe.rpush(pending_key(&self.topic, delivery.partition), &delivery.payload)
                    .ignore();
            }
        }

        pipe.query_async::<()>(&mut conn).await?;
        Ok(outcome)
    }

    /// Events waiting across all partitions.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let mut depth = 0;
        for partition in 0..self.partitions {
            let len: u64 = conn.llen(pending_key(&self.topic, partition)).await?;
            depth += len;
        }
        Ok(depth)
    }

    /// Events the consumer gave up on.
    pub async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(dead_key(&self.topic)).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
