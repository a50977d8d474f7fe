//! Interaction notifications and element snapshots.
//!
//! The hosting environment (browser glue, webview bridge, test harness)
//! flattens a DOM interaction into an `ElementSnapshot` before handing it to
//! the agent; the agent never touches a live DOM node.

use std::collections::BTreeMap;

/// The interaction kinds the agent knows how to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    /// Page became interactive. Fired once per page load.
    View,
    Click,
    Submit,
    Change,
}

impl InteractionKind {
    /// CSS-like selector the event source should match targets against.
    /// `View` has no target; its selector is empty.
    pub fn selector(&self) -> &'static str {
        match self {
            InteractionKind::View => "",
            InteractionKind::Click => "a, button, input[type=submit], img",
            InteractionKind::Submit => "form",
            InteractionKind::Change => "input, textarea, select",
        }
    }

    /// Event name used in the emitted record.
    pub fn event_name(&self) -> &'static str {
        match self {
            InteractionKind::View => "$view",
            InteractionKind::Click => "$click",
            InteractionKind::Submit => "$submit",
            InteractionKind::Change => "$change",
        }
    }

    pub const ALL: [InteractionKind; 4] = [
        InteractionKind::View,
        InteractionKind::Click,
        InteractionKind::Submit,
        InteractionKind::Change,
    ];
}

/// One observed interaction, as delivered by the event source.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub target: ElementSnapshot,
}

impl Interaction {
    /// A page-ready notification. Carries no target element.
    pub fn page_ready() -> Self {
        Self {
            kind: InteractionKind::View,
            target: ElementSnapshot::default(),
        }
    }
}

/// An enclosing container in the element's ownership chain, innermost first.
#[derive(Debug, Clone, Default)]
pub struct Container {
    /// Declared section label (`data-section`), if any.
    pub section: Option<String>,
}

/// Flattened view of the interaction target.
#[derive(Debug, Clone, Default)]
pub struct ElementSnapshot {
    /// Lowercase tag name. Empty for targetless notifications.
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
    /// Raw text content. Normalized by `display_text`.
    pub text: Option<String>,
    /// Control value, used in place of text for `input` elements.
    pub value: Option<String>,
    /// Link target, for anchors.
    pub href: Option<String>,
    /// Plain attributes, used for selector matching (e.g. `type`).
    pub attributes: BTreeMap<String, String>,
    /// Author-supplied `data-*` key/value pairs.
    pub dataset: BTreeMap<String, String>,
    /// Enclosing containers from the target up to the traversal root.
    pub chain: Vec<Container>,
}

impl ElementSnapshot {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Nearest declared section label: the element's own, else the first one
    /// found walking the container chain upward. Absent when the walk reaches
    /// the root without finding one.
    pub fn closest_section(&self) -> Option<&str> {
        self.dataset
            .get("section")
            .map(String::as_str)
            .or_else(|| self.chain.iter().find_map(|c| c.section.as_deref()))
    }

    /// Visible text for the record: the control value for `input` elements,
    /// otherwise the text content with internal whitespace collapsed and
    /// trimmed. Empty text is absent, not `""`. Tag casing comes from the
    /// hosting environment and is not trusted here.
    pub fn display_text(&self) -> Option<String> {
        let raw = if self.tag.eq_ignore_ascii_case("input") {
            self.value.as_deref()
        } else {
            self.text.as_deref()
        }?;
        presence(&collapse_whitespace(raw))
    }
}

/// Empty-string-to-absent normalization. Consumers must be able to tell
/// "empty" from "not applicable", so `""` never reaches the wire.
pub fn presence(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_text_collapses_whitespace() {
        let mut el = ElementSnapshot::new("button");
        el.text = Some("  Buy   Now ".to_string());
        assert_eq!(el.display_text().as_deref(), Some("Buy Now"));
    }

    #[test]
    fn display_text_uses_value_for_inputs() {
        let mut el = ElementSnapshot::new("input");
        el.text = Some("ignored".to_string());
        el.value = Some("Search".to_string());
        assert_eq!(el.display_text().as_deref(), Some("Search"));
    }

    #[test]
    fn display_text_ignores_tag_case() {
        // Hosts that hand over uppercase DOM tag names still get the value.
        let mut el = ElementSnapshot::new("INPUT");
        el.text = Some("ignored".to_string());
        el.value = Some("Search".to_string());
        assert_eq!(el.display_text().as_deref(), Some("Search"));
    }

    #[test]
    fn empty_text_is_absent() {
        let mut el = ElementSnapshot::new("a");
        el.text = Some("   ".to_string());
        assert_eq!(el.display_text(), None);
        assert_eq!(presence(""), None);
    }

    #[test]
    fn closest_section_walks_chain() {
        let mut el = ElementSnapshot::new("button");
        el.chain = vec![
            Container { section: None },
            Container {
                section: Some("checkout".to_string()),
            },
            Container {
                section: Some("page".to_string()),
            },
        ];
        assert_eq!(el.closest_section(), Some("checkout"));
    }

    #[test]
    fn own_section_wins_over_chain() {
        let mut el = ElementSnapshot::new("button");
        el.dataset
            .insert("section".to_string(), "hero".to_string());
        el.chain = vec![Container {
            section: Some("page".to_string()),
        }];
        assert_eq!(el.closest_section(), Some("hero"));
    }

    #[test]
    fn section_absent_at_root() {
        let mut el = ElementSnapshot::new("button");
        el.chain = vec![Container { section: None }, Container { section: None }];
        assert_eq!(el.closest_section(), None);
    }
}
