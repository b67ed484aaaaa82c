//! Configuration assembly and lifecycle coordination.
//!
//! A [`RootAgent`] is built from the top of the configuration tree: the
//! root scope's `<filter>` and `<match>` directives in document order, plus
//! one extra scope per `<label @NAME>`. Labels are wired statically after
//! the whole tree is built; unknown label targets and label cycles are
//! rejected here, at configuration time, not at emit time.
//!
//! Start resumes every output's buffer and spawns its flusher (labels
//! first, so forward targets are live before traffic can reach them);
//! shutdown drains in the opposite order.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{ConfigError, Element};
use crate::event::{EventStream, Record};
use crate::output::{EmitError, Output, RelabelOutput};
use crate::registry::{OutputBuildCtx, Registry};
use crate::router::{EventRouter, FilterRule, MatchPattern, MatchRule};

/// One routing scope: the root pipeline or a named label.
pub struct Agent {
    name: Option<String>,
    router: Arc<EventRouter>,
    outputs: Vec<Arc<dyn Output>>,
}

impl Agent {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    async fn start(&self) -> Result<(), ConfigError> {
        for output in &self.outputs {
            output.start().await?;
        }
        Ok(())
    }

    async fn shutdown(&self) {
        join_all(self.outputs.iter().map(|o| o.shutdown())).await;
    }

    fn observe(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "scope".to_string(),
            Value::String(self.name.clone().unwrap_or_else(|| "root".to_string())),
        );
        map.insert(
            "unmatched".to_string(),
            Value::from(self.router.unmatched_count()),
        );
        map.insert(
            "outputs".to_string(),
            Value::Array(
                self.outputs
                    .iter()
                    .map(|o| Value::Object(o.observe()))
                    .collect(),
            ),
        );
        Value::Object(map)
    }
}

/// The whole pipeline: root scope plus labels, with lifecycle control.
pub struct RootAgent {
    root: Agent,
    labels: HashMap<String, Agent>,
}

impl std::fmt::Debug for RootAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootAgent").finish_non_exhaustive()
    }
}

impl RootAgent {
    /// Assembles the pipeline from a configuration tree.
    ///
    /// Directives are consumed in document order. `<source>` elements are
    /// skipped (inputs live with the embedder and talk to [`RootAgent::emit`]);
    /// any other unknown directive is an error, as is a `<label>` nested
    /// inside another label, a forward to an undefined label, or a cycle
    /// between labels.
    pub fn from_element(registry: &Registry, config: &Element) -> Result<Self, ConfigError> {
        let mut root_children: Vec<&Element> = Vec::new();
        let mut label_elements: Vec<&Element> = Vec::new();
        for child in config.children() {
            if child.name() == "label" {
                label_elements.push(child);
            } else {
                root_children.push(child);
            }
        }

        let (root, root_relabels) = build_scope(registry, &root_children, None)?;

        let mut labels = HashMap::new();
        let mut relabels: Vec<(Option<String>, Vec<Arc<RelabelOutput>>)> =
            vec![(None, root_relabels)];
        for label_el in label_elements {
            let name = label_el.arg().to_string();
            if !name.starts_with('@') {
                return Err(ConfigError::InvalidLabelName(name));
            }
            let children: Vec<&Element> = label_el.children().iter().collect();
            let (agent, label_relabels) = build_scope(registry, &children, Some(&name))?;
            relabels.push((Some(name.clone()), label_relabels));
            labels.insert(name, agent);
        }

        // static label resolution: every target must exist...
        for (_, scope_relabels) in &relabels {
            for relabel in scope_relabels {
                let target = labels
                    .get(relabel.label())
                    .ok_or_else(|| ConfigError::UnknownLabel(relabel.label().to_string()))?;
                relabel.wire(Arc::clone(target.router()));
            }
        }

        // ...and forwarding between labels must not loop
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for (scope, scope_relabels) in &relabels {
            if let Some(scope) = scope {
                edges
                    .entry(scope.clone())
                    .or_default()
                    .extend(scope_relabels.iter().map(|r| r.label().to_string()));
            }
        }
        if let Some(node) = find_cycle(&edges) {
            return Err(ConfigError::LabelCycle(node));
        }

        info!(
            labels = labels.len(),
            "pipeline assembled from configuration"
        );
        Ok(RootAgent { root, labels })
    }

    /// Routes a single record through the root scope.
    pub fn emit(&self, tag: &str, time: i64, record: Record) -> Result<(), EmitError> {
        self.root.router.emit(tag, time, record)
    }

    /// Routes a stream through the root scope.
    pub fn emit_stream(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
        self.root.router.emit_stream(tag, stream)
    }

    #[must_use]
    pub fn root(&self) -> &Agent {
        &self.root
    }

    #[must_use]
    pub fn label(&self, name: &str) -> Option<&Agent> {
        self.labels.get(name)
    }

    /// Starts every output: labels first, then the root scope.
    pub async fn start(&self) -> Result<(), ConfigError> {
        for (name, label) in &self.labels {
            debug!(label = %name, "starting label outputs");
            label.start().await?;
        }
        self.root.start().await?;
        info!("agent started");
        Ok(())
    }

    /// Drains and stops every output: root first, then labels.
    pub async fn shutdown(&self) {
        self.root.shutdown().await;
        join_all(self.labels.values().map(Agent::shutdown)).await;
        info!("agent stopped");
    }

    /// Monitoring snapshot across all scopes, in the shape the monitor
    /// endpoint serves.
    #[must_use]
    pub fn observe(&self) -> Value {
        let mut scopes = vec![self.root.observe()];
        let mut names: Vec<&String> = self.labels.keys().collect();
        names.sort();
        for name in names {
            if let Some(label) = self.labels.get(name) {
                scopes.push(label.observe());
            }
        }
        let mut map = Map::new();
        map.insert(
            "version".to_string(),
            Value::String(crate::VERSION.to_string()),
        );
        map.insert("scopes".to_string(), Value::Array(scopes));
        Value::Object(map)
    }
}

/// Builds one scope's router and output set from its child directives.
fn build_scope(
    registry: &Registry,
    children: &[&Element],
    scope: Option<&str>,
) -> Result<(Agent, Vec<Arc<RelabelOutput>>), ConfigError> {
    let mut rules = Vec::new();
    let mut filter_rules = Vec::new();
    let mut outputs: Vec<Arc<dyn Output>> = Vec::new();
    let mut relabels = Vec::new();

    for el in children {
        match el.name() {
            "filter" => {
                let pattern = MatchPattern::parse(el.arg())?;
                let filter = registry.build_filter(el)?;
                filter_rules.push(FilterRule { pattern, filter });
            }
            "match" => {
                let pattern = MatchPattern::parse(el.arg())?;
                let mut ctx = OutputBuildCtx {
                    registry,
                    relabels: &mut relabels,
                };
                let output = registry.build_output(el, &mut ctx)?;
                outputs.push(Arc::clone(&output));
                rules.push(MatchRule { pattern, output });
            }
            "source" => {
                // inputs are owned by the embedder; they reach the agent
                // through `emit`
                debug!(kind = el.get_or("@type", "?"), "skipping <source> directive");
            }
            "label" => {
                return Err(ConfigError::UnknownDirective(format!(
                    "label inside label `{}`",
                    scope.unwrap_or("root")
                )));
            }
            other => return Err(ConfigError::UnknownDirective(other.to_string())),
        }
    }

    Ok((
        Agent {
            name: scope.map(str::to_string),
            router: Arc::new(EventRouter::new(rules, filter_rules)),
            outputs,
        },
        relabels,
    ))
}

/// Depth-first search for a cycle in the label forwarding graph.
fn find_cycle(edges: &HashMap<String, Vec<String>>) -> Option<String> {
    const IN_PROGRESS: u8 = 1;
    const DONE: u8 = 2;

    fn dfs(
        node: &str,
        edges: &HashMap<String, Vec<String>>,
        state: &mut HashMap<String, u8>,
    ) -> Option<String> {
        match state.get(node).copied() {
            Some(IN_PROGRESS) => return Some(node.to_string()),
            Some(DONE) => return None,
            _ => {}
        }
        state.insert(node.to_string(), IN_PROGRESS);
        if let Some(targets) = edges.get(node) {
            for target in targets {
                if let Some(cycle) = dfs(target, edges, state) {
                    return Some(cycle);
                }
            }
        }
        state.insert(node.to_string(), DONE);
        None
    }

    let mut state = HashMap::new();
    for node in edges.keys() {
        if let Some(cycle) = dfs(node, edges, &mut state) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::lock;
    use crate::event::record_from_pairs;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Captured = Arc<Mutex<Vec<(String, String)>>>;

    struct CaptureOutput {
        seen: Captured,
    }

    #[async_trait]
    impl Output for CaptureOutput {
        fn kind(&self) -> &'static str {
            "capture"
        }

        fn emit(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
            let mut seen = lock(&self.seen);
            for event in stream.iter() {
                let message = event
                    .record
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                seen.push((tag.to_string(), message));
            }
            Ok(())
        }
    }

    fn registry_with_capture() -> (Registry, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::with_builtins();
        let handle = Arc::clone(&captured);
        registry.register_output(
            "capture",
            Box::new(move |_el, _ctx| {
                Ok(Arc::new(CaptureOutput {
                    seen: Arc::clone(&handle),
                }))
            }),
        );
        (registry, captured)
    }

    fn emit_message(agent: &RootAgent, tag: &str, message: &str) {
        agent
            .emit(tag, 1, record_from_pairs([("message", message)]))
            .unwrap();
    }

    #[test]
    fn builds_rules_in_document_order() {
        let (registry, captured) = registry_with_capture();
        let config = Element::new("root")
            .child(Element::new("match").with_arg("app.*").set("@type", "capture"))
            .child(Element::new("match").with_arg("**").set("@type", "null"));
        let agent = RootAgent::from_element(&registry, &config).unwrap();

        emit_message(&agent, "app.access", "hit");
        emit_message(&agent, "sys.ping", "miss");
        let seen = lock(&captured);
        assert_eq!(*seen, vec![("app.access".to_string(), "hit".to_string())]);
    }

    #[test]
    fn label_forwarding_reenters_matching_with_original_tag() {
        let (registry, captured) = registry_with_capture();
        let config = Element::new("root")
            .child(
                Element::new("match")
                    .with_arg("x")
                    .set("@type", "relabel")
                    .set("@label", "@ERR"),
            )
            .child(
                Element::new("label").with_arg("@ERR").child(
                    Element::new("match").with_arg("**").set("@type", "capture"),
                ),
            );
        let agent = RootAgent::from_element(&registry, &config).unwrap();

        emit_message(&agent, "x", "boom");
        let seen = lock(&captured);
        assert_eq!(*seen, vec![("x".to_string(), "boom".to_string())]);
    }

    #[test]
    fn unknown_label_is_rejected_at_config_time() {
        let (registry, _) = registry_with_capture();
        let config = Element::new("root").child(
            Element::new("match")
                .with_arg("**")
                .set("@type", "relabel")
                .set("@label", "@NOWHERE"),
        );
        let err = RootAgent::from_element(&registry, &config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLabel(l) if l == "@NOWHERE"));
    }

    #[test]
    fn label_cycles_are_rejected_at_config_time() {
        let (registry, _) = registry_with_capture();
        let config = Element::new("root")
            .child(
                Element::new("label").with_arg("@A").child(
                    Element::new("match")
                        .with_arg("**")
                        .set("@type", "relabel")
                        .set("@label", "@B"),
                ),
            )
            .child(
                Element::new("label").with_arg("@B").child(
                    Element::new("match")
                        .with_arg("**")
                        .set("@type", "relabel")
                        .set("@label", "@A"),
                ),
            );
        let err = RootAgent::from_element(&registry, &config).unwrap_err();
        assert!(matches!(err, ConfigError::LabelCycle(_)));
    }

    #[test]
    fn forwarding_chains_between_labels_are_allowed() {
        let (registry, captured) = registry_with_capture();
        let config = Element::new("root")
            .child(
                Element::new("match")
                    .with_arg("**")
                    .set("@type", "relabel")
                    .set("@label", "@A"),
            )
            .child(
                Element::new("label").with_arg("@A").child(
                    Element::new("match")
                        .with_arg("**")
                        .set("@type", "relabel")
                        .set("@label", "@B"),
                ),
            )
            .child(
                Element::new("label").with_arg("@B").child(
                    Element::new("match").with_arg("**").set("@type", "capture"),
                ),
            );
        let agent = RootAgent::from_element(&registry, &config).unwrap();
        emit_message(&agent, "deep.tag", "pass");
        assert_eq!(lock(&captured)[0], ("deep.tag".to_string(), "pass".to_string()));
    }

    #[test]
    fn unknown_directives_and_bad_label_names_are_rejected() {
        let registry = Registry::with_builtins();
        let err = RootAgent::from_element(
            &registry,
            &Element::new("root").child(Element::new("mystery")),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDirective(_)));

        let err = RootAgent::from_element(
            &registry,
            &Element::new("root").child(Element::new("label").with_arg("ERR")),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLabelName(_)));
    }

    #[test]
    fn sources_are_skipped() {
        let registry = Registry::with_builtins();
        let config = Element::new("root")
            .child(Element::new("source").set("@type", "tcp"))
            .child(Element::new("match").with_arg("**").set("@type", "null"));
        assert!(RootAgent::from_element(&registry, &config).is_ok());
    }

    #[test]
    fn filters_run_before_the_matched_output() {
        let (registry, captured) = registry_with_capture();
        let config = Element::new("root")
            .child(
                Element::new("filter")
                    .with_arg("app.**")
                    .set("@type", "grep")
                    .child(
                        Element::new("exclude")
                            .set("key", "message")
                            .set("pattern", "skip"),
                    ),
            )
            .child(Element::new("match").with_arg("**").set("@type", "capture"));
        let agent = RootAgent::from_element(&registry, &config).unwrap();

        emit_message(&agent, "app.a", "keep");
        emit_message(&agent, "app.a", "skip this");
        emit_message(&agent, "other", "skip not filtered");
        let seen = lock(&captured);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, "keep");
        assert_eq!(seen[1].1, "skip not filtered");
    }

    #[test]
    fn observe_reports_every_scope() {
        let (registry, _) = registry_with_capture();
        let config = Element::new("root")
            .child(Element::new("match").with_arg("**").set("@type", "null"))
            .child(
                Element::new("label").with_arg("@ERR").child(
                    Element::new("match").with_arg("**").set("@type", "null"),
                ),
            );
        let agent = RootAgent::from_element(&registry, &config).unwrap();
        agent.emit("nomatch", 1, record_from_pairs([])).unwrap();

        let snapshot = agent.observe();
        let scopes = snapshot["scopes"].as_array().unwrap();
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0]["scope"], "root");
        assert_eq!(scopes[1]["scope"], "@ERR");
        // "nomatch" matched `**`, so nothing was dropped
        assert_eq!(scopes[0]["unmatched"], 0);
    }
}
