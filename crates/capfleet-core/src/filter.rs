//! Declarative filter config and its display-filter compiler.
//!
//! A [`FilterConfig`] is a flat mapping from recognized field names to
//! comma-separated raw values. [`compile`] turns it into a Wireshark
//! display-filter expression consumed by the external filter tool.
//!
//! Compilation is pure and total: unrecognized fields are ignored, values
//! are trimmed with blanks dropped, and a config with no surviving values
//! compiles to the empty expression (match everything).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Latest-wins filter configuration submitted by an operator.
///
/// Any mapping is accepted; only the fields named in [`CLAUSE_ORDER`]
/// contribute to the compiled expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterConfig(pub BTreeMap<String, String>);

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for FilterConfig {
    fn from(entries: [(&str, &str); N]) -> Self {
        Self(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }
}

/// Canonical clause order. Compiled output always lists sub-expressions in
/// this sequence regardless of config key order.
pub const CLAUSE_ORDER: [&str; 13] = [
    "ip",
    "sourceIp",
    "destinationIp",
    "port",
    "sourcePort",
    "destinationPort",
    "protocol",
    "packetSizeMin",
    "packetSizeMax",
    "timeRange",
    "tcpFlags",
    "payloadContent",
    "macAddress",
];

/// Compile a config into a display-filter expression.
///
/// Present fields each yield one parenthesized sub-expression; multiple
/// values within a field OR together; fields AND together at the top level.
pub fn compile(config: &FilterConfig) -> String {
    let mut clauses = Vec::new();

    for field in CLAUSE_ORDER {
        let Some(raw) = config.get(field) else {
            continue;
        };
        let values = split_values(raw);
        if values.is_empty() {
            continue;
        }
        if let Some(clause) = expand(field, &values) {
            clauses.push(clause);
        }
    }

    clauses.join(" && ")
}

/// Split a comma-separated value list, trimming entries and dropping blanks.
fn split_values(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

fn expand(field: &str, values: &[&str]) -> Option<String> {
    let clause = match field {
        "ip" => any_of(values, |v| format!("ip.addr == {v}")),
        "sourceIp" => any_of(values, |v| format!("ip.src == {v}")),
        "destinationIp" => any_of(values, |v| format!("ip.dst == {v}")),
        "port" => any_of(values, |v| format!("(tcp.port == {v} || udp.port == {v})")),
        "sourcePort" => any_of(values, |v| {
            format!("(tcp.srcport == {v} || udp.srcport == {v})")
        }),
        "destinationPort" => any_of(values, |v| {
            format!("(tcp.dstport == {v} || udp.dstport == {v})")
        }),
        "protocol" => any_of(values, |v| v.to_lowercase()),
        "packetSizeMin" => format!("frame.len >= {}", values[0]),
        "packetSizeMax" => format!("frame.len <= {}", values[0]),
        "timeRange" => time_range(values[0])?,
        "tcpFlags" => any_of(values, |v| format!("tcp.flags.{} == 1", v.to_lowercase())),
        "payloadContent" => any_of(values, |v| format!("frame contains \"{v}\"")),
        "macAddress" => any_of(values, |v| format!("eth.addr == {v}")),
        _ => return None,
    };
    Some(clause)
}

/// OR the per-value predicates, parenthesizing when more than one.
fn any_of(values: &[&str], predicate: impl Fn(&str) -> String) -> String {
    let parts: Vec<String> = values.iter().map(|v| predicate(v)).collect();
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(" || "))
    }
}

/// Expand `"<start>/<end>"` where either side may be blank.
fn time_range(raw: &str) -> Option<String> {
    let (start, end) = match raw.split_once('/') {
        Some((s, e)) => (s.trim(), e.trim()),
        None => (raw.trim(), ""),
    };

    let mut bounds = Vec::new();
    if !start.is_empty() {
        bounds.push(format!("frame.time >= \"{start}\""));
    }
    if !end.is_empty() {
        bounds.push(format!("frame.time <= \"{end}\""));
    }

    match bounds.len() {
        0 => None,
        1 => bounds.pop(),
        _ => Some(format!("({})", bounds.join(" && "))),
    }
}
