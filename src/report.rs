/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Grouped report model: one logical observation keyed by timestamp and
//! sensor, holding per-target nested group/socket/core/event readings.
//!
//! The report is stored as flat rows in arrival order. Construction
//! flattens one persisted document per target into rows; serialization
//! rebuilds the nested per-target documents. Read-side queries that miss
//! return `None`; only construction can fail.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::error::ReportError;

const TIMESTAMP_KEY: &str = "timestamp";
const SENSOR_KEY: &str = "sensor";
const TARGET_KEY: &str = "target";
const METADATA_KEY: &str = "metadata";
const GROUPS_KEY: &str = "groups";

/// One flat measurement row: a single event value located by target,
/// group, socket and core.
#[derive(Debug, Clone, PartialEq)]
pub struct EventReading {
    pub target: String,
    pub group: String,
    pub socket: String,
    pub core: String,
    pub event: String,
    pub value: f64,
}

/// A group of readings sharing one timestamp, sensor and metadata.
#[derive(Debug, Clone)]
pub struct GroupedReport {
    pub timestamp: Value,
    pub sensor: String,
    pub metadata: Map<String, Value>,
    readings: Vec<EventReading>,
}

impl GroupedReport {
    /// Build a report from flat rows directly, in row order.
    pub fn new(
        timestamp: Value,
        sensor: impl Into<String>,
        metadata: Map<String, Value>,
        readings: Vec<EventReading>,
    ) -> Self {
        GroupedReport {
            timestamp,
            sensor: sensor.into(),
            metadata,
            readings,
        }
    }

    /// Build a report from persisted documents, one document per target.
    ///
    /// Every document must carry `timestamp`, `sensor`, `target` and a
    /// `groups` object nested as group -> socket -> core -> event ->
    /// numeric value. Timestamp, sensor and metadata are taken from the
    /// first document; the caller guarantees they agree across the batch.
    pub fn from_documents(documents: &[Value]) -> Result<Self, ReportError> {
        let first = documents.first().ok_or_else(|| ReportError::BadInputData {
            reason: "empty document batch".into(),
            input: Value::Array(Vec::new()),
        })?;

        let mut readings = Vec::new();
        for document in documents {
            let fields = document.as_object().ok_or_else(|| bad_input("document is not an object", document))?;
            for key in [TIMESTAMP_KEY, SENSOR_KEY, TARGET_KEY, GROUPS_KEY] {
                if !fields.contains_key(key) {
                    return Err(bad_input(format!("missing required key {key:?}"), document));
                }
            }
            let target = fields[TARGET_KEY]
                .as_str()
                .ok_or_else(|| bad_input("target is not a string", document))?;
            let groups = fields[GROUPS_KEY]
                .as_object()
                .ok_or_else(|| bad_input("groups is not an object", document))?;

            for (group, sockets) in groups {
                let sockets = sockets
                    .as_object()
                    .ok_or_else(|| bad_input(format!("group {group:?} is not an object"), document))?;
                for (socket, cores) in sockets {
                    let cores = cores
                        .as_object()
                        .ok_or_else(|| bad_input(format!("socket {socket:?} is not an object"), document))?;
                    for (core, events) in cores {
                        let events = events
                            .as_object()
                            .ok_or_else(|| bad_input(format!("core {core:?} is not an object"), document))?;
                        for (event, value) in events {
                            let value = value.as_f64().ok_or_else(|| {
                                bad_input(format!("event {event:?} value is not numeric"), document)
                            })?;
                            readings.push(EventReading {
                                target: target.to_owned(),
                                group: group.clone(),
                                socket: socket.clone(),
                                core: core.clone(),
                                event: event.clone(),
                                value,
                            });
                        }
                    }
                }
            }
        }

        let fields = first.as_object().ok_or_else(|| bad_input("document is not an object", first))?;
        let metadata = fields
            .get(METADATA_KEY)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let sensor = fields[SENSOR_KEY]
            .as_str()
            .ok_or_else(|| bad_input("sensor is not a string", first))?;

        Ok(GroupedReport {
            timestamp: fields[TIMESTAMP_KEY].clone(),
            sensor: sensor.to_owned(),
            metadata,
            readings,
        })
    }

    /// Serialize back to persisted form: one document per target carrying
    /// the shared timestamp, sensor and metadata plus that target's
    /// nested readings.
    pub fn to_documents(&self) -> Vec<Value> {
        self.targets()
            .into_iter()
            .map(|target| {
                let mut groups = Map::new();
                for reading in self.readings.iter().filter(|r| r.target == target) {
                    let sockets = groups
                        .entry(reading.group.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    let cores = sockets
                        .as_object_mut()
                        .expect("groups leaves are objects")
                        .entry(reading.socket.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    let events = cores
                        .as_object_mut()
                        .expect("socket leaves are objects")
                        .entry(reading.core.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    events
                        .as_object_mut()
                        .expect("core leaves are objects")
                        .insert(reading.event.clone(), json_number(reading.value));
                }

                let mut document = Map::new();
                document.insert(TIMESTAMP_KEY.into(), self.timestamp.clone());
                document.insert(SENSOR_KEY.into(), Value::String(self.sensor.clone()));
                if !self.metadata.is_empty() {
                    document.insert(METADATA_KEY.into(), Value::Object(self.metadata.clone()));
                }
                document.insert(TARGET_KEY.into(), Value::String(target.to_owned()));
                document.insert(GROUPS_KEY.into(), Value::Object(groups));
                Value::Object(document)
            })
            .collect()
    }

    pub fn readings(&self) -> &[EventReading] {
        &self.readings
    }

    /// Distinct targets in first-appearance order.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for reading in &self.readings {
            if !targets.contains(&reading.target.as_str()) {
                targets.push(&reading.target);
            }
        }
        targets
    }

    /// Exact event lookup; `None` when no row matches.
    pub fn event_value(
        &self,
        target: &str,
        group: &str,
        socket: &str,
        core: &str,
        event: &str,
    ) -> Option<f64> {
        self.readings
            .iter()
            .find(|r| {
                r.target == target
                    && r.group == group
                    && r.socket == socket
                    && r.core == core
                    && r.event == event
            })
            .map(|r| r.value)
    }

    /// Event lookup on the first core seen for (target, group, socket).
    pub fn event_value_first_core(
        &self,
        target: &str,
        group: &str,
        socket: &str,
        event: &str,
    ) -> Option<f64> {
        let core = self
            .readings
            .iter()
            .find(|r| r.target == target && r.group == group && r.socket == socket)
            .map(|r| r.core.clone())?;
        self.event_value(target, group, socket, &core, event)
    }

    /// Mean of an event's values across cores; `None` when no row
    /// matches.
    pub fn event_average(
        &self,
        target: &str,
        group: &str,
        socket: &str,
        event: &str,
    ) -> Option<f64> {
        let values: Vec<f64> = self
            .readings
            .iter()
            .filter(|r| {
                r.target == target && r.group == group && r.socket == socket && r.event == event
            })
            .map(|r| r.value)
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Distinct event names of a group, across all targets and sockets,
    /// in first-appearance order. Empty when the group does not exist.
    pub fn group_events(&self, group: &str) -> Vec<&str> {
        let mut events: Vec<&str> = Vec::new();
        for reading in self.readings.iter().filter(|r| r.group == group) {
            if !events.contains(&reading.event.as_str()) {
                events.push(&reading.event);
            }
        }
        events
    }

    /// Per-event average across cores for (target, group, socket).
    ///
    /// `None` when the group has no events or any group event has no
    /// value under the given target and socket.
    pub fn group_event_averages(
        &self,
        group: &str,
        target: &str,
        socket: &str,
    ) -> Option<HashMap<String, f64>> {
        self.fold_group_events(group, |event| self.event_average(target, group, socket, event))
    }

    /// Per-event sum across cores for (target, group, socket). Same miss
    /// behavior as [`GroupedReport::group_event_averages`].
    pub fn group_event_sums(
        &self,
        group: &str,
        target: &str,
        socket: &str,
    ) -> Option<HashMap<String, f64>> {
        self.fold_group_events(group, |event| self.event_sum(target, group, socket, event))
    }

    /// Per-event sum across cores and across every target other than the
    /// excluded one, used to compute a rest-of-system residual.
    ///
    /// `None` when the group has no events or some remaining target lacks
    /// a group event under the given socket. With no remaining targets
    /// the residual is an empty map.
    pub fn group_event_sums_excluding(
        &self,
        group: &str,
        excluded_target: &str,
        socket: &str,
    ) -> Option<HashMap<String, f64>> {
        let events = self.group_events(group);
        if events.is_empty() {
            return None;
        }
        let events: Vec<String> = events.into_iter().map(str::to_owned).collect();

        let mut sums: HashMap<String, f64> = HashMap::new();
        for target in self.targets() {
            if target == excluded_target {
                continue;
            }
            for event in &events {
                let value = self.event_sum(target, group, socket, event)?;
                *sums.entry(event.clone()).or_insert(0.0) += value;
            }
        }
        Some(sums)
    }

    fn event_sum(&self, target: &str, group: &str, socket: &str, event: &str) -> Option<f64> {
        let values: Vec<f64> = self
            .readings
            .iter()
            .filter(|r| {
                r.target == target && r.group == group && r.socket == socket && r.event == event
            })
            .map(|r| r.value)
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum())
    }

    fn fold_group_events(
        &self,
        group: &str,
        per_event: impl Fn(&str) -> Option<f64>,
    ) -> Option<HashMap<String, f64>> {
        let events = self.group_events(group);
        if events.is_empty() {
            return None;
        }
        let mut folded = HashMap::with_capacity(events.len());
        for event in events {
            folded.insert(event.to_owned(), per_event(event)?);
        }
        Some(folded)
    }
}

fn bad_input(reason: impl Into<String>, input: &Value) -> ReportError {
    ReportError::BadInputData {
        reason: reason.into(),
        input: input.clone(),
    }
}

fn json_number(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
