//! Produces extracted rows to a Kafka topic, and consumes rows from a
//! topic into the Loader.
//!
//! Producer and consumer are deliberately two separate, single-purpose
//! functions rather than one type holding both a reader and a writer open
//! (core specification §9 design note: "Kafka bridge as separate role").
//! The wire format is one JSON object per message, keys are column names,
//! values are native JSON types — no envelope, no schema registry.

use getl_core::{ColumnTypeMap, GetlError, Job, NormalizedType, Row, Value};
use getl_loader::{Loader, RowSink};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as RdkafkaConsumerExt, StreamConsumer};
use rdkafka::message::Message as RdkafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::consumer::CommitMode;
use std::time::Duration;

/// Result of a `produce` run: how many rows were written to the topic
/// before either the source was exhausted or a write failed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProduceReport {
    pub rows_sent: usize,
}

/// Result of a `consume` run: per-message outcomes, since individual
/// message failures do not abort the run (core specification §4.10).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeReport {
    pub rows_loaded: usize,
    pub rows_skipped_deserialize: usize,
    pub rows_failed_load: usize,
}

/// Runs the Extractor against `job`'s source and writes one JSON message
/// per row to `job.kafka_topic`. Aborts on the first write failure;
/// already-written messages are not retracted (at-least-once, per
/// core specification §4.10).
pub async fn produce(job: &Job) -> Result<ProduceReport, GetlError> {
    let topic = job
        .kafka_topic
        .as_deref()
        .ok_or_else(|| GetlError::BadConfig("kafkaTopic is required to produce".to_string()))?;
    let brokers = job
        .kafka_url
        .as_deref()
        .ok_or_else(|| GetlError::BadConfig("kafkaURL is required to produce".to_string()))?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()
        .map_err(|e| GetlError::ConnectionFailed {
            vendor: "kafka".to_string(),
            source: anyhow::anyhow!(e),
        })?;

    let (mut source, _columns) = getl_extractor::extract(job).await?;
    let mut rows_sent = 0usize;

    while let Some(row) = source.next().await? {
        let payload = serde_json::to_vec(&row_to_json(&row)).map_err(|e| GetlError::BadConfig(
            format!("failed to serialize row for kafka: {e}"),
        ))?;
        let record = FutureRecord::<(), _>::to(topic).payload(&payload);
        producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| GetlError::ExecFailed {
                vendor: "kafka".to_string(),
                statement_fragment: topic.to_string(),
                source: anyhow::anyhow!(e),
            })?;
        rows_sent += 1;
    }

    source.close().await?;
    tracing::info!(topic, rows_sent, "produced rows to kafka topic");
    Ok(ProduceReport { rows_sent })
}

/// Reads messages from `job.kafka_topic`/`job.kafka_group_id` and loads
/// each into the destination as its own one-row transaction (no batching
/// across messages, per core specification §4.10). A deserialize failure
/// logs and skips the message; a load failure logs and continues to the
/// next message without rewinding the consumer group's offsets — this
/// lossy-on-load behavior is deliberate for streaming ingest.
///
/// `max_messages`, when set, bounds how many messages are polled before
/// returning (used by callers that want a finite run, e.g. tests); `None`
/// consumes until the topic is exhausted for the configured poll timeout.
pub async fn consume(job: &Job, max_messages: Option<usize>) -> Result<ConsumeReport, GetlError> {
    let topic = job
        .kafka_topic
        .as_deref()
        .ok_or_else(|| GetlError::BadConfig("kafkaTopic is required to consume".to_string()))?;
    let brokers = job
        .kafka_url
        .as_deref()
        .ok_or_else(|| GetlError::BadConfig("kafkaURL is required to consume".to_string()))?;
    let group_id = job.kafka_group_id.as_deref().unwrap_or("getl-consumer");

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .map_err(|e| GetlError::ConnectionFailed {
            vendor: "kafka".to_string(),
            source: anyhow::anyhow!(e),
        })?;
    consumer.subscribe(&[topic]).map_err(|e| GetlError::ConnectionFailed {
        vendor: "kafka".to_string(),
        source: anyhow::anyhow!(e),
    })?;

    let mut destination = Some(getl_schema_sync::connect(job).await?);
    let mut loader: Option<Loader> = None;
    let mut report = ConsumeReport::default();

    loop {
        if let Some(max) = max_messages {
            if report.rows_loaded + report.rows_skipped_deserialize + report.rows_failed_load >= max {
                break;
            }
        }

        let msg = match consumer.recv().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "kafka consumer recv failed, stopping");
                break;
            }
        };

        let payload = msg.payload();
        let row = payload.and_then(|bytes| serde_json::from_slice::<serde_json::Value>(bytes).ok())
            .and_then(|json| json_object_to_row(&json).ok());

        let Some(row) = row else {
            tracing::warn!(topic, offset = msg.offset(), "failed to deserialize kafka message, skipping");
            report.rows_skipped_deserialize += 1;
            let _ = consumer.commit_message(&msg, CommitMode::Async);
            continue;
        };

        if loader.is_none() {
            let mut conn = destination.take().expect("destination present until loader is built");
            let columns = infer_column_types(&row);
            getl_schema_sync::ensure(&mut conn, &job.destination_table, &columns, job.update_key.as_deref())
                .await?;
            loader = Some(Loader::new(conn, job.destination_table.clone(), job.update_key.clone()));
        }

        let l = loader.as_mut().expect("loader initialized above");
        let outcome = load_one_row(l, &row).await;
        match outcome {
            Ok(()) => report.rows_loaded += 1,
            Err(e) => {
                tracing::warn!(error = %e, topic, offset = msg.offset(), "failed to load kafka message, continuing");
                report.rows_failed_load += 1;
            }
        }

        let _ = consumer.commit_message(&msg, CommitMode::Async);
    }

    tracing::info!(
        topic,
        rows_loaded = report.rows_loaded,
        rows_skipped_deserialize = report.rows_skipped_deserialize,
        rows_failed_load = report.rows_failed_load,
        "kafka consume run finished"
    );
    Ok(report)
}

async fn load_one_row(loader: &mut Loader, row: &Row) -> Result<(), GetlError> {
    loader.begin().await?;
    match loader.write(std::slice::from_ref(row)).await {
        Ok(()) => loader.commit().await,
        Err(e) => {
            let _ = loader.rollback().await;
            Err(e)
        }
    }
}

fn row_to_json(row: &Row) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(row.columns.len());
    for (column, value) in row.columns.iter().zip(row.values.iter()) {
        map.insert(column.clone(), value_to_json(value));
    }
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Real(r) => serde_json::json!(r),
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Text(s) => serde_json::Value::from(s.clone()),
        Value::Bytes(b) => {
            use base64::Engine;
            serde_json::Value::from(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::Timestamp(ts) => serde_json::Value::from(ts.to_rfc3339()),
    }
}

/// Deserializes a JSON object message into a [`Row`]. Fails if the
/// top-level value is not an object, or any field holds a JSON array or
/// nested object (outside this wire format's closed value set).
fn json_object_to_row(json: &serde_json::Value) -> Result<Row, GetlError> {
    let object = json.as_object().ok_or_else(|| {
        GetlError::BadConversion {
            field: "<message>".to_string(),
            reason: "kafka message payload is not a JSON object".to_string(),
        }
    })?;

    let mut columns = Vec::with_capacity(object.len());
    let mut values = Vec::with_capacity(object.len());
    for (key, value) in object {
        columns.push(key.clone());
        values.push(json_to_value(key, value)?);
    }
    Ok(Row::new(columns, values))
}

fn json_to_value(field: &str, value: &serde_json::Value) -> Result<Value, GetlError> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Real(f))
            } else {
                Err(GetlError::BadConversion {
                    field: field.to_string(),
                    reason: format!("number '{n}' is out of range"),
                })
            }
        }
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        other => Err(GetlError::BadConversion {
            field: field.to_string(),
            reason: format!("unsupported JSON value in kafka message: {other}"),
        }),
    }
}

/// Infers a destination column-type map from the first row of a streamed
/// batch, the same closed rule set the Extractor applies when a driver
/// reports no declared column type (core specification §4.3).
fn infer_column_types(row: &Row) -> ColumnTypeMap {
    let mut map = ColumnTypeMap::new();
    for (column, value) in row.columns.iter().zip(row.values.iter()) {
        let ty = match value {
            Value::Text(_) => NormalizedType::Text,
            Value::Int(_) => NormalizedType::Integer,
            Value::Real(_) => NormalizedType::Real,
            Value::Bool(_) => NormalizedType::Integer,
            Value::Bytes(_) => NormalizedType::Blob,
            Value::Null | Value::Timestamp(_) => NormalizedType::Text,
        };
        map.insert(column.clone(), ty);
    }
    map
}
