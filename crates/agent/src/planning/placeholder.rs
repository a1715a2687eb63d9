//! Placeholder substitution for plan-step parameters.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::path::{Component, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static ANGLE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]+)>").expect("static angle pattern"));
static DEPENDENCY_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+?)\s+결과:[^\]]*\]").expect("static reference pattern"));

/// Location aliases, checked in order against the lowercased token body.
const LOCATION_ALIASES: &[(&str, &str)] = &[
    ("바탕화면", "Desktop"),
    ("desktop", "Desktop"),
    ("데스크탑", "Desktop"),
    ("문서", "Documents"),
    ("documents", "Documents"),
    ("다운로드", "Downloads"),
    ("downloads", "Downloads"),
    ("홈", ""),
    ("home", ""),
];

/// Whole-value keywords meaning "the latest dependency result".
const LATEST_RESULT_KEYWORDS: &[&str] = &["탐색_결과_기반", "이전_단계_결과", "최근_결과"];

/// Results of a step's dependencies, in dependency order.
pub type DependencyResults = Vec<(String, Value)>;

/// Rewrites symbolic tokens in tool parameters into concrete values.
#[derive(Debug, Clone)]
pub struct PlaceholderResolver {
    home: PathBuf,
}

impl Default for PlaceholderResolver {
    fn default() -> Self {
        Self::new(steward_config::dirs_home())
    }
}

impl PlaceholderResolver {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve every string inside `params`, recursing into maps and lists.
    pub fn resolve(&self, params: &Map<String, Value>, deps: &DependencyResults) -> Map<String, Value> {
        params
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v, deps)))
            .collect()
    }

    fn resolve_value(&self, value: &Value, deps: &DependencyResults) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.resolve(map, deps)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_value(v, deps)).collect())
            }
            Value::String(s) => Value::String(self.resolve_str(s, deps)),
            other => other.clone(),
        }
    }

    /// Resolve one string: location aliases, step references, keywords, then path normalization.
    pub fn resolve_str(&self, original: &str, deps: &DependencyResults) -> String {
        let value = self.resolve_angle_tokens(original);
        let value = resolve_dependency_refs(&value, deps);
        let value = if LATEST_RESULT_KEYWORDS.contains(&value.as_str()) {
            latest_result(deps)
        } else {
            value
        };
        let value = self.normalize_path(&value);
        if value != original {
            info!(from = %original, to = %value, "Resolved placeholder");
        }
        value
    }

    fn resolve_angle_tokens(&self, value: &str) -> String {
        ANGLE_TOKEN
            .replace_all(value, |caps: &Captures| {
                let body = caps[1].to_lowercase();
                match LOCATION_ALIASES.iter().find(|(alias, _)| body.contains(alias)) {
                    Some((_, dir)) => {
                        let path = self.home_join(dir);
                        debug!(token = &caps[0], path = %path, "Mapped location placeholder");
                        path
                    }
                    None => {
                        warn!(token = &caps[0], "Unresolved placeholder left as is");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn home_join(&self, dir: &str) -> String {
        if dir.is_empty() {
            self.home.display().to_string()
        } else {
            self.home.join(dir).display().to_string()
        }
    }

    fn normalize_path(&self, value: &str) -> String {
        let expanded = if value == "~" {
            self.home.display().to_string()
        } else if let Some(rest) = value.strip_prefix("~/") {
            self.home.join(rest).display().to_string()
        } else {
            value.to_string()
        };
        if expanded.contains('/') && !expanded.contains("://") {
            lexical_normalize(&expanded)
        } else {
            expanded
        }
    }
}

fn resolve_dependency_refs(value: &str, deps: &DependencyResults) -> String {
    DEPENDENCY_REF
        .replace_all(value, |caps: &Captures| {
            let step_ref = caps[1].trim();
            match deps.iter().find(|(id, _)| id == step_ref) {
                Some((_, result)) => representative_value(result),
                None => {
                    warn!(step = step_ref, "Dependency result not found");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn latest_result(deps: &DependencyResults) -> String {
    deps.last()
        .map(|(_, result)| representative_value(result))
        .unwrap_or_default()
}

/// A scalar standing in for a whole step result: `path`, else the first
/// list element, else the stringified value.
pub fn representative_value(result: &Value) -> String {
    match result {
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) if first.contains_key("path") => scalar(&first["path"]),
            Some(first) => scalar(first),
            None => String::new(),
        },
        Value::Object(map) => map
            .get("path")
            .or_else(|| map.get("value"))
            .map(scalar)
            .unwrap_or_else(|| result.to_string()),
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collapse `.`, `..` and repeated separators without touching the filesystem.
fn lexical_normalize(path: &str) -> String {
    let mut out = PathBuf::new();
    for component in std::path::Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    let normalized = out.display().to_string();
    if normalized.is_empty() { ".".into() } else { normalized }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> PlaceholderResolver {
        PlaceholderResolver::new("/home/kim")
    }

    #[test]
    fn location_aliases() {
        let r = resolver();
        let none = DependencyResults::new();
        assert_eq!(r.resolve_str("<바탕화면_경로>", &none), "/home/kim/Desktop");
        assert_eq!(r.resolve_str("<Downloads folder>/a.txt", &none), "/home/kim/Downloads/a.txt");
        assert_eq!(r.resolve_str("<home>", &none), "/home/kim");
    }

    #[test]
    fn unknown_angle_token_kept() {
        let r = resolver();
        assert_eq!(r.resolve_str("<식별된_파일>", &DependencyResults::new()), "<식별된_파일>");
    }

    #[test]
    fn dependency_reference_prefers_path() {
        let deps = vec![(
            "step_1".to_string(),
            json!([{"path": "/home/kim/Desktop/shot.png", "size": 10}]),
        )];
        let r = resolver();
        assert_eq!(
            r.resolve_str("[step_1 결과: 찾은 파일]", &deps),
            "/home/kim/Desktop/shot.png"
        );
        assert_eq!(
            r.resolve_str("[step_9 결과: 없음]", &deps),
            "[step_9 결과: 없음]"
        );
    }

    #[test]
    fn magic_keyword_takes_latest() {
        let deps = vec![
            ("a".to_string(), json!({"path": "/x/first"})),
            ("b".to_string(), json!({"value": 42})),
        ];
        let r = resolver();
        assert_eq!(r.resolve_str("이전_단계_결과", &deps), "42");
        assert_eq!(r.resolve_str("탐색_결과_기반", &DependencyResults::new()), "");
    }

    #[test]
    fn home_relative_and_normalization() {
        let r = resolver();
        let none = DependencyResults::new();
        assert_eq!(r.resolve_str("~/Desktop/./a//b/../c", &none), "/home/kim/Desktop/a/c");
        assert_eq!(r.resolve_str("~", &none), "/home/kim");
        assert_eq!(r.resolve_str("https://example.com/a/../b", &none), "https://example.com/a/../b");
        assert_eq!(r.resolve_str("plain text", &none), "plain text");
    }

    #[test]
    fn recurses_into_maps_and_lists() {
        let params = json!({
            "action": "move",
            "src": ["<desktop>/a.png", 3],
            "opts": {"dst": "<문서>"}
        });
        let out = resolver().resolve(params.as_object().unwrap(), &DependencyResults::new());
        assert_eq!(out["src"], json!(["/home/kim/Desktop/a.png", 3]));
        assert_eq!(out["opts"]["dst"], "/home/kim/Documents");
        assert_eq!(out["action"], "move");
    }

    #[test]
    fn representative_values() {
        assert_eq!(representative_value(&json!(["a", "b"])), "a");
        assert_eq!(representative_value(&json!([])), "");
        assert_eq!(representative_value(&json!({"k": 1})), r#"{"k":1}"#);
        assert_eq!(representative_value(&json!(7)), "7");
    }
}
