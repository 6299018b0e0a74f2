// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::{json, Value};
use vireo_dry_tests::{keyed_list, CounterView, KeyedListView, RecordingTransport, ScriptedView};
use vireo_proto::{topic, ClientEvt, Location};
use vireo_session::{Session, SessionConfig, SessionError, TransportError};

fn ops(data: &Value) -> Vec<(String, Value)> {
    data.as_array()
        .unwrap()
        .iter()
        .map(|p| (p["op"].as_str().unwrap().to_string(), p["index"].clone()))
        .collect()
}

#[test]
fn keyed_list_frames_are_minimal() {
    let view = KeyedListView::new(["a", "b", "c", "d"]);
    let session = Session::new("s", view.clone(), SessionConfig::default());
    session.render_initial().unwrap();
    let t = Arc::new(RecordingTransport::live());
    session.set_transport(Some(t.clone()));

    view.set_keys(["d", "a", "b", "c"]);
    assert_eq!(session.flush().unwrap(), 1);
    view.set_keys(Vec::<String>::new());
    assert_eq!(session.flush().unwrap(), 4);
    assert_eq!(session.flush().unwrap(), 0);

    let frames = t.sends_on(topic::FRAME);
    assert_eq!(frames.len(), 2);
    assert_eq!(ops(&frames[0].data)[0].0, "moveChild");
    let deletes = ops(&frames[1].data);
    assert!(deletes.iter().all(|(op, _)| op == "delChild"));
    let indices: Vec<Value> = deletes.into_iter().map(|(_, i)| i).collect();
    assert_eq!(indices, vec![json!(3), json!(2), json!(1), json!(0)]);
    assert_eq!(session.snapshot(), Some(keyed_list::<&str>("ul", &[])));
}

#[test]
fn counter_events_round_trip_through_the_bus() {
    let session = Session::new("s", CounterView::default(), SessionConfig::default());
    session.render_initial().unwrap();
    let t = Arc::new(RecordingTransport::live());
    session.set_transport(Some(t.clone()));

    session.receive(ClientEvt::handler("inc", Value::Null)).unwrap();
    session.receive(ClientEvt::handler("inc", Value::Null)).unwrap();
    session.receive(ClientEvt::handler("dec", Value::Null)).unwrap();

    let frames = t.sends_on(topic::FRAME);
    assert_eq!(frames.len(), 3);
    let last = frames[2].data.as_array().unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0]["op"], "setText");
    assert_eq!(last[0]["value"], "1");

    assert!(matches!(
        session.receive(ClientEvt::handler("reset", Value::Null)),
        Err(SessionError::UnknownHandler(name)) if name == "reset"
    ));
}

#[test]
fn scripted_view_sees_every_event_in_order() {
    let view = ScriptedView::new([keyed_list("ul", &["a"])]);
    let session = Session::new("s", view.clone(), SessionConfig::default());
    session.render_initial().unwrap();
    session
        .receive(ClientEvt::new("custom", "first", json!(1)))
        .unwrap();
    session
        .receive(ClientEvt::new("custom", "second", json!(2)))
        .unwrap();
    let actions: Vec<String> = view.events().into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec!["first", "second"]);
}

#[test]
fn outbound_pushes_reach_the_bound_transport() {
    let session = Session::new("s", CounterView::default(), SessionConfig::default());
    session.render_initial().unwrap();
    let t = Arc::new(RecordingTransport::live());
    session.set_transport(Some(t.clone()));

    session.navigate("/settings").unwrap();
    session.dom_action("count", "focus", Value::Null).unwrap();
    session.script_send("clock", json!({"now": 1})).unwrap();

    let topics: Vec<String> = t.sends().into_iter().map(|s| s.topic).collect();
    assert_eq!(topics, vec![topic::ROUTER, topic::DOM, topic::SCRIPT]);
    assert!(matches!(
        session.dom_action("missing", "focus", Value::Null),
        Err(SessionError::UnknownRef(_))
    ));
}

#[test]
fn failed_sends_surface_as_session_errors() {
    let session = Session::new("s", CounterView::default(), SessionConfig::default());
    session.render_initial().unwrap();
    let t = Arc::new(RecordingTransport::live());
    t.set_failure(Some(TransportError::Backpressure));
    session.set_transport(Some(t.clone()));

    let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = errors.clone();
    session.bus().subscribe(topic::SESSION, move |ev| {
        sink.lock().unwrap().push(ev.data.clone());
    });
    session.navigate("/x").unwrap();
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["topic"], topic::ROUTER);
}

#[test]
fn boot_carries_the_acked_sequence() {
    let session = Session::new("s", CounterView::default(), SessionConfig::default());
    let t = Arc::new(RecordingTransport::live());
    session.set_transport(Some(t.clone()));
    vireo_session::Transport::ack_through(t.as_ref(), 7);
    let boot = session.boot(Location::default(), None).unwrap();
    assert_eq!(boot.seq, 7);
    assert_eq!(boot.sid, "s");
    assert!(!boot.patch.is_empty());
}
