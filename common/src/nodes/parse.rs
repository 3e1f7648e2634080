// Parsers for the two output shapes of the node-status command
//
// Each parser is a strategy: it names the command arguments that make the
// command produce its shape, and either parses the output or reports that
// the output is not in its shape. Both canonicalize fields the same way.

use crate::errors::NodeStatusError;
use crate::nodes::model::{NodeInfo, UNKNOWN_STATE};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

/// Values the node-status command prints for "nothing here"
const EMPTY_SENTINELS: [&str; 4] = ["(null)", "N/A", "none", "None"];

lazy_static! {
    static ref FEATURE_SEPARATORS: Regex = Regex::new(r"[,\s]+").unwrap();
}

fn is_sentinel(value: &str) -> bool {
    EMPTY_SENTINELS.contains(&value)
}

/// Normalize a reported node state to its canonical token.
///
/// Keeps the first word, drops `(reason)` and `+FLAG` suffixes and trailing
/// `*`/`!` markers, and uppercases the rest. Anything left empty is `UNKNOWN`.
pub fn canonical_state(raw: Option<&str>) -> String {
    let word = match raw.and_then(|s| s.split_whitespace().next()) {
        Some(word) => word,
        None => return UNKNOWN_STATE.to_string(),
    };
    let word = word.split('(').next().unwrap_or_default();
    let word = word.split('+').next().unwrap_or_default();
    let word = word.trim_end_matches(&['*', '!'][..]).to_uppercase();

    if word.is_empty() {
        UNKNOWN_STATE.to_string()
    } else {
        word
    }
}

/// Split a feature string on commas and whitespace
pub fn parse_features(raw: &str) -> BTreeSet<String> {
    let raw = raw.trim();
    if raw.is_empty() || is_sentinel(raw) {
        return BTreeSet::new();
    }
    FEATURE_SEPARATORS
        .split(raw)
        .filter(|t| !t.is_empty() && !is_sentinel(t))
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated partition list
pub fn parse_partitions(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || is_sentinel(raw) {
        return Vec::new();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// One way of asking for and reading the node list
pub trait NodeListParser: Send + Sync {
    /// Short label for logs and metrics
    fn name(&self) -> &'static str;

    /// Arguments for the node-status command
    fn args(&self) -> &'static [&'static str];

    /// `Err(NotThisFormat)` when `output` is not in this parser's shape
    fn parse(&self, output: &str) -> Result<Vec<NodeInfo>, NodeStatusError>;
}

/// The strategies in the order they are tried
pub fn default_parsers() -> Vec<Box<dyn NodeListParser>> {
    vec![Box::new(JsonNodeParser), Box::new(TextNodeParser)]
}

/// Structured output: `{"nodes": [ {...}, ... ]}`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonNodeParser;

impl JsonNodeParser {
    fn node_from_value(node: &Value) -> NodeInfo {
        let partitions = first_present(node, &["partitions", "Partitions"])
            .map(partitions_from_value)
            .unwrap_or_default();

        let state_text = first_present(node, &["state", "State"]).and_then(state_from_value);
        let state = canonical_state(state_text.as_deref());

        let features = first_present(node, &["features", "available_features", "AvailableFeatures"])
            .map(features_from_value)
            .unwrap_or_default();

        NodeInfo {
            partitions,
            state,
            features,
        }
    }
}

impl NodeListParser for JsonNodeParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn args(&self) -> &'static [&'static str] {
        &["--json", "show", "nodes", "-o"]
    }

    fn parse(&self, output: &str) -> Result<Vec<NodeInfo>, NodeStatusError> {
        if !output.trim_start().starts_with('{') {
            return Err(NodeStatusError::NotThisFormat);
        }
        let data: Value =
            serde_json::from_str(output).map_err(|e| NodeStatusError::Invalid(e.to_string()))?;

        let nodes = match first_present(&data, &["nodes", "Nodes"]) {
            Some(Value::Array(nodes)) => nodes,
            Some(other) => {
                return Err(NodeStatusError::Invalid(format!(
                    "expected a node list, found {}",
                    json_kind(other)
                )))
            }
            None => return Ok(Vec::new()),
        };

        Ok(nodes
            .iter()
            .filter(|n| n.is_object())
            .map(Self::node_from_value)
            .collect())
    }
}

/// First key holding a non-empty value, the way a chain of `or` fallbacks reads
fn first_present<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find(|v| is_truthy(v))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn partitions_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && !is_sentinel(p))
            .collect(),
        Value::String(s) => parse_partitions(s),
        _ => Vec::new(),
    }
}

/// State may be a string, a list of flags (first is the base state) or an
/// object carrying `current_state` / `state`
fn state_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => first_present(value, &["current_state", "state"]).and_then(state_from_value),
        Value::Array(items) => items.first().and_then(state_from_value),
        other => scalar_text(other),
    }
}

fn features_from_value(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Object(_) => first_present(value, &["available", "avail", "Available"])
            .map(features_from_value)
            .unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .flat_map(|f| parse_features(&f))
            .collect(),
        Value::String(s) => parse_features(s),
        _ => BTreeSet::new(),
    }
}

/// Plain output: whitespace-separated `Key=Value` tokens, one block per node.
///
/// A `NodeName=` token opens a new block. Tokens without `=` continue the
/// value of the preceding key, which reassembles unquoted multi-word values.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextNodeParser;

impl TextNodeParser {
    fn split_blocks(output: &str) -> Vec<Vec<&str>> {
        let mut blocks = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for token in output.split_whitespace() {
            if token.starts_with("NodeName=") && !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            current.push(token);
        }
        if !current.is_empty() {
            blocks.push(current);
        }
        blocks
    }

    /// Reassemble tokens into ordered `(key, value)` pairs
    pub fn pairs<'a>(tokens: &[&'a str]) -> Vec<(&'a str, String)> {
        let mut pairs: Vec<(&'a str, String)> = Vec::new();
        for token in tokens {
            match token.split_once('=') {
                Some((key, value)) => pairs.push((key, value.to_string())),
                None => {
                    if let Some((_, value)) = pairs.last_mut() {
                        value.push(' ');
                        value.push_str(token);
                    }
                }
            }
        }
        pairs
    }

    /// Later duplicates win, as when the pairs are collected into a map
    fn lookup<'a>(pairs: &'a [(&str, String)], key: &str) -> Option<&'a str> {
        pairs
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn node_from_pairs(pairs: &[(&str, String)]) -> NodeInfo {
        NodeInfo {
            partitions: Self::lookup(pairs, "Partitions")
                .map(parse_partitions)
                .unwrap_or_default(),
            state: canonical_state(Self::lookup(pairs, "State")),
            features: Self::lookup(pairs, "AvailableFeatures")
                .map(parse_features)
                .unwrap_or_default(),
        }
    }
}

impl NodeListParser for TextNodeParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn args(&self) -> &'static [&'static str] {
        &["show", "nodes", "-o"]
    }

    fn parse(&self, output: &str) -> Result<Vec<NodeInfo>, NodeStatusError> {
        let output = output.replace('\u{a0}', " ");
        Ok(Self::split_blocks(&output)
            .iter()
            .map(|block| Self::pairs(block))
            .filter(|pairs| !pairs.is_empty())
            .map(|pairs| Self::node_from_pairs(&pairs))
            .collect())
    }
}
