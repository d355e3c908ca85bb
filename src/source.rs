/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Streaming report source over a MongoDB collection.
//!
//! Two delivery modes: batch mode drains the existing collection,
//! grouping consecutive documents that share a timestamp into one
//! [`GroupedReport`]; stream mode follows a change stream and emits one
//! report per inserted document. Connectivity is verified with a ping at
//! connect time; an unreachable store fails fast instead of surfacing
//! later inside the subscription.

use std::time::Duration;

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::error::SourceError;
use crate::report::GroupedReport;

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);
const TIMESTAMP_KEY: &str = "timestamp";

/// Groups consecutive documents sharing a timestamp.
///
/// `push` returns the previous group when a document with a new timestamp
/// arrives; `finish` flushes whatever is buffered once the input is
/// exhausted, so the last group of a drained collection is not lost.
#[derive(Debug, Default)]
pub struct TimestampBatcher {
    timestamp: Option<Value>,
    pending: Vec<Value>,
}

impl TimestampBatcher {
    pub fn new() -> Self {
        TimestampBatcher::default()
    }

    /// Buffer a document; returns the completed previous group when this
    /// document opens a new one.
    pub fn push(&mut self, document: Value) -> Option<Vec<Value>> {
        let timestamp = document.get(TIMESTAMP_KEY).cloned().unwrap_or(Value::Null);
        match &self.timestamp {
            Some(current) if *current == timestamp => {
                self.pending.push(document);
                None
            }
            None => {
                self.timestamp = Some(timestamp);
                self.pending.push(document);
                None
            }
            Some(_) => {
                let completed = std::mem::take(&mut self.pending);
                self.timestamp = Some(timestamp);
                self.pending.push(document);
                Some(completed)
            }
        }
    }

    /// Flush the trailing group, if any.
    pub fn finish(&mut self) -> Option<Vec<Value>> {
        self.timestamp = None;
        let completed = std::mem::take(&mut self.pending);
        if completed.is_empty() {
            None
        } else {
            Some(completed)
        }
    }
}

/// Report source backed by a MongoDB collection.
pub struct MongoSource {
    name: String,
    rt: Runtime,
    client: Client,
    collection: Collection<Document>,
    stream_mode: bool,
}

impl MongoSource {
    /// Connect to the store and verify it is reachable with a ping.
    pub fn connect(
        uri: &str,
        db_name: &str,
        collection_name: &str,
        stream_mode: bool,
    ) -> Result<Self, SourceError> {
        let name = format!("mongo:{db_name}/{collection_name}");
        let rt = Builder::new_current_thread().enable_all().build()?;

        let client = rt.block_on(async {
            let mut options = ClientOptions::parse(uri)
                .await
                .map_err(|cause| unreachable(&name, cause))?;
            options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
            let client =
                Client::with_options(options).map_err(|cause| unreachable(&name, cause))?;
            client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .await
                .map_err(|cause| unreachable(&name, cause))?;
            Ok::<_, SourceError>(client)
        })?;

        let collection = client.database(db_name).collection(collection_name);
        info!(source = %name, stream_mode, "source connected");
        Ok(MongoSource {
            name,
            rt,
            client,
            collection,
            stream_mode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver grouped reports to the callback until the source is
    /// exhausted (batch mode) or the change stream ends (stream mode).
    pub fn subscribe(
        &self,
        mut on_report: impl FnMut(GroupedReport),
    ) -> Result<(), SourceError> {
        if self.stream_mode {
            self.follow_inserts(&mut on_report)
        } else {
            self.drain_collection(&mut on_report)
        }
    }

    fn drain_collection(
        &self,
        on_report: &mut dyn FnMut(GroupedReport),
    ) -> Result<(), SourceError> {
        self.rt.block_on(async {
            let mut cursor = self
                .collection
                .find(doc! {})
                .await
                .map_err(|cause| subscribe_failed(&self.name, cause))?;

            let mut batcher = TimestampBatcher::new();
            while let Some(document) = cursor
                .try_next()
                .await
                .map_err(|cause| subscribe_failed(&self.name, cause))?
            {
                if let Some(group) = batcher.push(document_to_value(document)) {
                    debug!(source = %self.name, size = group.len(), "emitting group");
                    on_report(GroupedReport::from_documents(&group)?);
                }
            }
            if let Some(group) = batcher.finish() {
                debug!(source = %self.name, size = group.len(), "emitting final group");
                on_report(GroupedReport::from_documents(&group)?);
            }
            Ok(())
        })
    }

    fn follow_inserts(
        &self,
        on_report: &mut dyn FnMut(GroupedReport),
    ) -> Result<(), SourceError> {
        self.rt.block_on(async {
            let pipeline = [doc! { "$match": { "operationType": "insert" } }];
            let mut stream = self
                .collection
                .watch()
                .pipeline(pipeline)
                .await
                .map_err(|cause| subscribe_failed(&self.name, cause))?;

            while let Some(event) = stream
                .try_next()
                .await
                .map_err(|cause| subscribe_failed(&self.name, cause))?
            {
                if let Some(document) = event.full_document {
                    on_report(GroupedReport::from_documents(&[document_to_value(
                        document,
                    )])?);
                }
            }
            Ok(())
        })
    }

    /// Shut the client down, releasing its connections.
    pub fn close(self) {
        let MongoSource { rt, client, name, .. } = self;
        rt.block_on(async { client.shutdown().await });
        info!(source = %name, "source closed");
    }
}

fn document_to_value(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

fn unreachable(name: &str, cause: mongodb::error::Error) -> SourceError {
    SourceError::Unreachable {
        source_name: name.to_owned(),
        cause,
    }
}

fn subscribe_failed(name: &str, cause: mongodb::error::Error) -> SourceError {
    SourceError::Subscribe {
        source_name: name.to_owned(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(ts: u64, target: &str) -> Value {
        json!({ "timestamp": ts, "sensor": "s1", "target": target, "groups": {} })
    }

    #[test]
    fn test_batcher_groups_consecutive_timestamps() {
        let mut batcher = TimestampBatcher::new();
        assert!(batcher.push(row(10, "t1")).is_none());
        assert!(batcher.push(row(10, "t2")).is_none());

        let group = batcher.push(row(20, "t1")).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group[0]["target"], json!("t1"));
        assert_eq!(group[1]["target"], json!("t2"));
    }

    #[test]
    fn test_batcher_flushes_trailing_group() {
        let mut batcher = TimestampBatcher::new();
        batcher.push(row(10, "t1"));
        batcher.push(row(20, "t1"));

        let last = batcher.finish().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0]["timestamp"], json!(20));
        assert!(batcher.finish().is_none());
    }

    #[test]
    fn test_batcher_does_not_merge_equal_timestamps_across_groups() {
        let mut batcher = TimestampBatcher::new();
        batcher.push(row(10, "t1"));
        batcher.push(row(20, "t1"));
        // Back to a previously seen timestamp: still a new group.
        let group = batcher.push(row(10, "t2")).unwrap();
        assert_eq!(group[0]["timestamp"], json!(20));
    }
}
