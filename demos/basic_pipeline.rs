/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Basic Pipeline Example - One report-processing actor fed locally
//!
//! Demonstrates:
//! - Defining and registering a custom message
//! - The start handshake and poison-pill termination
//! - Dispatch through ordered handler bindings
//! - Routing grouped reports through a Filter
//! - Grouped-report queries (per-group event sums)

use std::thread;
use std::time::Duration;

use serde_json::json;
use wattrun::{
    define_message, local_pair, Actor, ActorState, Filter, GroupedReport, KillHandler, Manager,
    Message, MessageMatch, OkMessage, PoisonPillMessage, StartHandler, StartMessage,
    APPLICATION_MESSAGE_BASE, POISON_PILL_MESSAGE_ID, START_MESSAGE_ID,
};

// Custom message carrying the persisted form of one grouped report.
struct ReportMessage {
    documents: Vec<serde_json::Value>,
}
define_message!(ReportMessage, APPLICATION_MESSAGE_BASE);

fn sample_documents(timestamp: u64, target: &str, watts: f64) -> Vec<serde_json::Value> {
    vec![json!({
        "timestamp": timestamp,
        "sensor": "cpu-sensor",
        "target": target,
        "groups": { "rapl": { "0": { "0": { "RAPL_PKG": watts } } } }
    })]
}

fn main() {
    tracing_subscriber::fmt::init();

    // Route reports by target: system reports go to the formula, every
    // report is archived.
    let mut filter: Filter<GroupedReport, &str> = Filter::new();
    filter.add_rule(
        Box::new(|report: &GroupedReport| report.targets().contains(&"system")),
        "formula",
    );
    filter.add_rule(Box::new(|_: &GroupedReport| true), "archive");

    let (socket, handle) = local_pair();
    let mut actor = Actor::new("report-processor", Box::new(socket));
    actor.add_handler(
        MessageMatch::Id(START_MESSAGE_ID),
        Box::new(StartHandler::with_initialization(Box::new(|state| {
            println!("report-processor: initialized");
            Ok(state)
        }))),
    );
    actor.add_handler(
        MessageMatch::Id(POISON_PILL_MESSAGE_ID),
        Box::new(KillHandler),
    );
    actor.add_handler(
        MessageMatch::Id(APPLICATION_MESSAGE_BASE),
        Box::new(move |msg: Box<dyn Message>, state: ActorState| {
            let message_id = msg.message_id();
            let report_msg = msg
                .as_any()
                .downcast_ref::<ReportMessage>()
                .ok_or(wattrun::ActorError::UnknownMessageType { message_id })?;
            let report = GroupedReport::from_documents(&report_msg.documents)?;

            let destinations = filter.route(&report).unwrap_or_default();
            for target in report.targets() {
                let sums = report.group_event_sums("rapl", target, "0");
                println!("{target}: rapl sums {sums:?} -> routed to {destinations:?}");
            }
            Ok(state)
        }),
    );

    let mut manager = Manager::new();
    manager.watch_signals().expect("signal watcher");
    manager.spawn(actor).expect("spawn actor");

    // Start handshake over the local transport.
    handle.send(Box::new(StartMessage)).expect("send start");
    loop {
        if let Some(reply) = handle.try_recv_control() {
            assert!(reply.as_any().is::<OkMessage>(), "start refused");
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    handle
        .send(Box::new(ReportMessage {
            documents: sample_documents(10, "system", 42.5),
        }))
        .expect("send report");
    handle
        .send(Box::new(ReportMessage {
            documents: sample_documents(11, "firefox", 7.25),
        }))
        .expect("send report");

    handle
        .send_monitor(Box::new(PoisonPillMessage))
        .expect("send poison pill");
    manager.join().expect("pipeline finished cleanly");
}
