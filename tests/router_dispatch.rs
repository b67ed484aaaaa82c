//! Black-box scenarios for tag routing: match precedence, glob semantics,
//! filter chains, and copy fan-out, driven through the public agent API.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tagrelay::event::record_from_pairs;
use tagrelay::{Element, EmitError, EventStream, Output, Registry, RootAgent};

type Captured = Arc<Mutex<Vec<(String, String, i64)>>>;

struct CaptureOutput {
    label: String,
    seen: Captured,
}

#[async_trait]
impl Output for CaptureOutput {
    fn kind(&self) -> &'static str {
        "capture"
    }

    fn emit(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
        let mut seen = self.seen.lock().expect("lock");
        for event in stream.iter() {
            seen.push((self.label.clone(), tag.to_string(), event.time));
        }
        Ok(())
    }
}

/// Registry whose `capture` output records `(name, tag, time)` triples into
/// a shared log; the `name` attribute tells instances apart.
fn capture_registry() -> (Registry, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let mut registry = Registry::with_builtins();
    let handle = Arc::clone(&captured);
    registry.register_output(
        "capture",
        Box::new(move |el, _ctx| {
            Ok(Arc::new(CaptureOutput {
                label: el.get_or("name", "capture").to_string(),
                seen: Arc::clone(&handle),
            }))
        }),
    );
    (registry, captured)
}

fn match_el(pattern: &str, name: &str) -> Element {
    Element::new("match")
        .with_arg(pattern)
        .set("@type", "capture")
        .set("name", name)
}

/// `app.*` before `**`: `app.access` takes the first rule, `sys.ping` the
/// catch-all, and `app.sub.x` also the catch-all because `*` spans exactly
/// one segment.
#[test]
fn match_precedence_and_single_segment_star() {
    let (registry, captured) = capture_registry();
    let config = Element::new("root")
        .child(match_el("app.*", "o1"))
        .child(match_el("**", "o2"));
    let agent = RootAgent::from_element(&registry, &config).expect("config");

    agent.emit("app.access", 1, record_from_pairs([])).expect("emit");
    agent.emit("sys.ping", 2, record_from_pairs([])).expect("emit");
    agent.emit("app.sub.x", 3, record_from_pairs([])).expect("emit");

    let seen = captured.lock().expect("lock");
    assert_eq!(
        *seen,
        vec![
            ("o1".to_string(), "app.access".to_string(), 1),
            ("o2".to_string(), "sys.ping".to_string(), 2),
            ("o2".to_string(), "app.sub.x".to_string(), 3),
        ]
    );
}

#[test]
fn alternation_and_multi_glob_patterns() {
    let (registry, captured) = capture_registry();
    let config = Element::new("root")
        .child(match_el("web.{get,post}.**", "verbs"))
        .child(match_el("db.* cache.*", "stores"))
        .child(match_el("**", "rest"));
    let agent = RootAgent::from_element(&registry, &config).expect("config");

    for (tag, time) in [
        ("web.get.users", 1),
        ("web.post.orders", 2),
        ("web.delete.users", 3),
        ("db.query", 4),
        ("cache.hit", 5),
        ("queue.push", 6),
    ] {
        agent.emit(tag, time, record_from_pairs([])).expect("emit");
    }

    let seen = captured.lock().expect("lock");
    let by_output = |name: &str| {
        seen.iter()
            .filter(|(o, _, _)| o == name)
            .map(|(_, t, _)| t.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(by_output("verbs"), vec!["web.get.users", "web.post.orders"]);
    assert_eq!(by_output("stores"), vec!["db.query", "cache.hit"]);
    assert_eq!(by_output("rest"), vec!["web.delete.users", "queue.push"]);
}

/// A multi-record stream flows through the filter chain once and reaches
/// the output with the surviving events in order.
#[test]
fn filtered_stream_keeps_event_order() {
    let (registry, captured) = capture_registry();
    let config = Element::new("root")
        .child(
            Element::new("filter")
                .with_arg("**")
                .set("@type", "grep")
                .child(
                    Element::new("exclude")
                        .set("key", "level")
                        .set("pattern", "debug"),
                ),
        )
        .child(match_el("**", "out"));
    let agent = RootAgent::from_element(&registry, &config).expect("config");

    let stream: EventStream = vec![
        tagrelay::Event::new(1, record_from_pairs([("level", "info")])),
        tagrelay::Event::new(2, record_from_pairs([("level", "debug")])),
        tagrelay::Event::new(3, record_from_pairs([("level", "warn")])),
    ]
    .into();
    agent.emit_stream("svc.log", stream).expect("emit");

    let seen = captured.lock().expect("lock");
    let times: Vec<i64> = seen.iter().map(|(_, _, t)| *t).collect();
    assert_eq!(times, vec![1, 3]);
}

/// `copy` delivers the same batch to every store.
#[test]
fn copy_fans_out_to_all_stores() {
    let (registry, captured) = capture_registry();
    let config = Element::new("root").child(
        Element::new("match")
            .with_arg("**")
            .set("@type", "copy")
            .child(
                Element::new("store")
                    .set("@type", "capture")
                    .set("name", "left"),
            )
            .child(
                Element::new("store")
                    .set("@type", "capture")
                    .set("name", "right"),
            ),
    );
    let agent = RootAgent::from_element(&registry, &config).expect("config");

    agent.emit("t", 7, record_from_pairs([])).expect("emit");

    let seen = captured.lock().expect("lock");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], ("left".to_string(), "t".to_string(), 7));
    assert_eq!(seen[1], ("right".to_string(), "t".to_string(), 7));
}

/// Record transforms apply before delivery; removed keys never reach the
/// output, added ones always do.
#[test]
fn record_transform_enriches_and_strips() {
    let captured: Arc<Mutex<Vec<tagrelay::Record>>> = Arc::new(Mutex::new(Vec::new()));
    struct RecordCapture {
        seen: Arc<Mutex<Vec<tagrelay::Record>>>,
    }

    #[async_trait]
    impl Output for RecordCapture {
        fn kind(&self) -> &'static str {
            "record_capture"
        }

        fn emit(&self, _tag: &str, stream: EventStream) -> Result<(), EmitError> {
            let mut seen = self.seen.lock().expect("lock");
            for event in stream.into_events() {
                seen.push(event.record);
            }
            Ok(())
        }
    }

    let mut registry = Registry::with_builtins();
    let handle = Arc::clone(&captured);
    registry.register_output(
        "record_capture",
        Box::new(move |_el, _ctx| {
            Ok(Arc::new(RecordCapture {
                seen: Arc::clone(&handle),
            }))
        }),
    );

    let config = Element::new("root")
        .child(
            Element::new("filter")
                .with_arg("**")
                .set("@type", "record_transform")
                .set("remove_keys", "password")
                .child(Element::new("record").set("env", "prod")),
        )
        .child(
            Element::new("match")
                .with_arg("**")
                .set("@type", "record_capture"),
        );
    let agent = RootAgent::from_element(&registry, &config).expect("config");

    agent
        .emit(
            "auth.login",
            1,
            record_from_pairs([("user", "ada"), ("password", "hunter2")]),
        )
        .expect("emit");

    let seen = captured.lock().expect("lock");
    assert_eq!(seen[0]["user"], "ada");
    assert_eq!(seen[0]["env"], "prod");
    assert!(!seen[0].contains_key("password"));
}
