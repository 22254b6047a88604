//! Step normalization: shorthand DSL steps into one closed action type.
//!
//! This is the only place that inspects which keys a raw step carries. The
//! engine and the repair loop work exclusively with [`CanonicalAction`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::RawStep;

/// Separator between a color literal and the element text, e.g. `red on Submit`
static COLOR_TARGET_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+on\s+").expect("static regex"));

/// A normalized, executable step.
///
/// Serialized with a `type` tag so failure records read like the plan DSL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalAction {
    /// Text is visible on the page
    See { value: String },

    /// Legacy: a CSS selector is visible
    AssertVisible { selector: String },

    /// Legacy: a selector's text contains a value
    AssertText { selector: String, value: String },

    /// Click the element showing this text
    Click { value: String },

    /// Fill the input found by label (or placeholder) with a value
    TypeSmart { value: String, label: String },

    /// Legacy: fill the input matching a selector
    TypeSelector {
        selector: String,
        #[serde(default)]
        value: String,
    },

    /// Current URL contains this fragment
    AssertUrl { value: String },

    /// Expect a successful response for `method` on a URL containing `url_part`
    NetworkListen {
        method: String,
        #[serde(rename = "urlPart")]
        url_part: String,
    },

    /// Computed text color of the element showing `element`
    AssertColor { color: String, element: String },

    /// Computed background color of the element showing `element`
    AssertBackground { color: String, element: String },

    /// Computed border color of the element showing `element`
    AssertBorderColor { color: String, element: String },

    /// Sleep for a number of milliseconds
    Wait { ms: u64 },

    /// A step no rule recognized, kept verbatim
    Unknown { original: RawStep },
}

impl CanonicalAction {
    /// Whether this action counts toward the executed test total
    pub fn is_counted(&self) -> bool {
        !matches!(self, CanonicalAction::NetworkListen { .. })
    }

    /// Whether this action may trigger a pending network expectation
    pub fn triggers_network(&self) -> bool {
        matches!(
            self,
            CanonicalAction::Click { .. } | CanonicalAction::TypeSmart { .. }
        )
    }

    /// Short label for progress output
    pub fn describe(&self) -> String {
        match self {
            CanonicalAction::See { value } => format!("see \"{}\"", value),
            CanonicalAction::AssertVisible { selector } => format!("visible {}", selector),
            CanonicalAction::AssertText { selector, value } => {
                format!("text \"{}\" in {}", value, selector)
            }
            CanonicalAction::Click { value } => format!("click \"{}\"", value),
            CanonicalAction::TypeSmart { value, label } => {
                format!("type \"{}\" into \"{}\"", value, label)
            }
            CanonicalAction::TypeSelector { selector, .. } => format!("type into {}", selector),
            CanonicalAction::AssertUrl { value } => format!("url contains \"{}\"", value),
            CanonicalAction::NetworkListen { method, url_part } => {
                format!("listen {} {}", method, url_part)
            }
            CanonicalAction::AssertColor { color, element } => {
                format!("color {} on \"{}\"", color, element)
            }
            CanonicalAction::AssertBackground { color, element } => {
                format!("background {} on \"{}\"", color, element)
            }
            CanonicalAction::AssertBorderColor { color, element } => {
                format!("border-color {} on \"{}\"", color, element)
            }
            CanonicalAction::Wait { ms } => format!("wait {}ms", ms),
            CanonicalAction::Unknown { original } => {
                format!("unknown {}", serde_json::to_string(original).unwrap_or_default())
            }
        }
    }
}

/// Normalize a raw plan step. Total: unrecognized steps become `Unknown`.
pub fn normalize(step: &RawStep) -> CanonicalAction {
    // "type X into Y" shares its key with the legacy explicit-type form, so it
    // has to be resolved before any generic `type` handling.
    if let (Some(value), Some(label)) = (step.get_str("type"), step.get_str("into")) {
        return CanonicalAction::TypeSmart { value, label };
    }

    if let Some(kind) = step.get_str("type") {
        if kind == "type" {
            if let Some(selector) = step.get_str("selector") {
                return CanonicalAction::TypeSelector {
                    selector,
                    value: step.get_str("value").unwrap_or_default(),
                };
            }
        }
        return decode_explicit(step);
    }

    if let Some(value) = step.get_str("see") {
        return CanonicalAction::See { value };
    }
    if let Some(value) = step.get_str("click") {
        return CanonicalAction::Click { value };
    }
    if let Some(ms) = step.get_str("wait").and_then(|raw| raw.trim().parse::<u64>().ok()) {
        return CanonicalAction::Wait { ms };
    }
    if let Some(value) = step.get_str("url") {
        return CanonicalAction::AssertUrl { value };
    }

    if let Some((color, element)) = step.get_str("color").and_then(|v| split_color_target(&v)) {
        return CanonicalAction::AssertColor { color, element };
    }
    if let Some((color, element)) = step
        .get_str("background")
        .and_then(|v| split_color_target(&v))
    {
        return CanonicalAction::AssertBackground { color, element };
    }
    if let Some((color, element)) = step
        .get_str("border-color")
        .and_then(|v| split_color_target(&v))
    {
        return CanonicalAction::AssertBorderColor { color, element };
    }

    if let Some(value) = step.get_str("network") {
        if let Some((method, url_part)) = parse_network(&value) {
            return CanonicalAction::NetworkListen { method, url_part };
        }
    }

    unknown(step)
}

/// Decode a legacy step that names its action through an explicit `type` key
fn decode_explicit(step: &RawStep) -> CanonicalAction {
    // `type: unknown` is a record tag, never a plan action
    match serde_yaml::from_value(serde_yaml::Value::Mapping(step.0.clone())) {
        Ok(CanonicalAction::Unknown { .. }) | Err(_) => unknown(step),
        Ok(action) => action,
    }
}

fn unknown(step: &RawStep) -> CanonicalAction {
    CanonicalAction::Unknown {
        original: step.clone(),
    }
}

/// Split `"<color> on <element text>"` into exactly two non-empty parts
fn split_color_target(value: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = COLOR_TARGET_SEPARATOR.split(value).collect();
    match parts.as_slice() {
        [color, element] => {
            let (color, element) = (color.trim(), element.trim());
            if color.is_empty() || element.is_empty() {
                None
            } else {
                Some((color.to_string(), element.to_string()))
            }
        }
        _ => None,
    }
}

/// Parse `"POST /api/login"` or `"/api/health"` (GET implied)
fn parse_network(value: &str) -> Option<(String, String)> {
    let mut tokens = value.split_whitespace();
    let first = tokens.next()?;
    match tokens.next() {
        Some(url_part) => Some((first.to_uppercase(), url_part.to_string())),
        None => Some(("GET".to_string(), first.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn step(yaml: &str) -> RawStep {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn type_into_wins_over_everything() {
        let action = normalize(&step(
            "{type: 'user@test.com', into: 'Email', selector: '#email', see: 'Hi', click: 'Go'}",
        ));
        assert_eq!(
            action,
            CanonicalAction::TypeSmart {
                value: "user@test.com".into(),
                label: "Email".into()
            }
        );
    }

    #[test]
    fn legacy_type_selector() {
        let action = normalize(&step("{type: type, selector: '#name', value: Ada}"));
        assert_eq!(
            action,
            CanonicalAction::TypeSelector {
                selector: "#name".into(),
                value: "Ada".into()
            }
        );
    }

    #[test]
    fn legacy_explicit_types_pass_through() {
        assert_eq!(
            normalize(&step("{type: assert_visible, selector: '.hero'}")),
            CanonicalAction::AssertVisible {
                selector: ".hero".into()
            }
        );
        assert_eq!(
            normalize(&step("{type: assert_text, selector: h1, value: Hello}")),
            CanonicalAction::AssertText {
                selector: "h1".into(),
                value: "Hello".into()
            }
        );
    }

    #[test]
    fn legacy_type_without_selector_is_unknown() {
        let raw = step("{type: type, value: Ada}");
        assert_eq!(normalize(&raw), CanonicalAction::Unknown { original: raw });
    }

    #[test]
    fn unknown_tag_in_plan_keeps_whole_step() {
        let raw = step("{type: unknown, original: {see: Hi}}");
        assert_eq!(normalize(&raw), CanonicalAction::Unknown { original: raw });
    }

    #[test]
    fn shorthand_priority_order() {
        assert_eq!(
            normalize(&step("{see: Welcome, click: Go}")),
            CanonicalAction::See {
                value: "Welcome".into()
            }
        );
        assert_eq!(
            normalize(&step("{click: Sign In, url: /dashboard}")),
            CanonicalAction::Click {
                value: "Sign In".into()
            }
        );
        assert_eq!(normalize(&step("{wait: 250}")), CanonicalAction::Wait { ms: 250 });
        assert_eq!(
            normalize(&step("{url: /dashboard}")),
            CanonicalAction::AssertUrl {
                value: "/dashboard".into()
            }
        );
    }

    #[test]
    fn non_numeric_wait_falls_through() {
        assert_eq!(
            normalize(&step("{wait: soon, url: /done}")),
            CanonicalAction::AssertUrl {
                value: "/done".into()
            }
        );
    }

    #[test]
    fn color_shorthands() {
        assert_eq!(
            normalize(&step("{color: 'red on Delete'}")),
            CanonicalAction::AssertColor {
                color: "red".into(),
                element: "Delete".into()
            }
        );
        assert_eq!(
            normalize(&step("{background: '#00f ON Save changes'}")),
            CanonicalAction::AssertBackground {
                color: "#00f".into(),
                element: "Save changes".into()
            }
        );
        assert_eq!(
            normalize(&step("{border-color: 'rgb(0, 0, 0) on Card'}")),
            CanonicalAction::AssertBorderColor {
                color: "rgb(0, 0, 0)".into(),
                element: "Card".into()
            }
        );
    }

    #[test]
    fn color_without_target_is_unknown() {
        let raw = step("{color: red}");
        assert_eq!(normalize(&raw), CanonicalAction::Unknown { original: raw });

        let raw = step("{color: 'red on A on B'}");
        assert!(matches!(normalize(&raw), CanonicalAction::Unknown { .. }));
    }

    #[test]
    fn network_forms() {
        assert_eq!(
            normalize(&step("{network: 'POST /api/login'}")),
            CanonicalAction::NetworkListen {
                method: "POST".into(),
                url_part: "/api/login".into()
            }
        );
        assert_eq!(
            normalize(&step("{network: '/api/health'}")),
            CanonicalAction::NetworkListen {
                method: "GET".into(),
                url_part: "/api/health".into()
            }
        );
    }

    #[test]
    fn unrecognized_step_is_kept_verbatim() {
        let raw = step("{hover: Menu}");
        assert_eq!(normalize(&raw), CanonicalAction::Unknown { original: raw });
    }

    #[test]
    fn counting_and_triggers() {
        let listen = CanonicalAction::NetworkListen {
            method: "GET".into(),
            url_part: "/x".into(),
        };
        assert!(!listen.is_counted());
        assert!(CanonicalAction::Click { value: "Go".into() }.triggers_network());
        assert!(!CanonicalAction::See { value: "Go".into() }.triggers_network());
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(CanonicalAction::NetworkListen {
            method: "POST".into(),
            url_part: "/api".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "network_listen");
        assert_eq!(json["urlPart"], "/api");
    }
}
