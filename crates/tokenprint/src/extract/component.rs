//! Component anatomy and interactive-state coverage.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

use super::{ConfidenceBasis, ParsedPage, RawSignal};
use crate::css::{pseudo_classes, selector_tokens, StyleRule};
use crate::types::{Category, ComponentAnatomy, ComponentRole, InteractiveState, ObservedValue, StateCoverage};

/// How a role is located in markup and recognized in style rules.
struct RoleSpec {
    role: ComponentRole,
    selector: &'static str,
    /// Element and class tokens that tie a style rule to the role.
    keys: &'static [&'static str],
}

const CATALOG: [RoleSpec; 12] = [
    RoleSpec {
        role: ComponentRole::Nav,
        selector: "nav, [role=navigation]",
        keys: &["nav", ".nav", ".navbar", ".menu"],
    },
    RoleSpec {
        role: ComponentRole::Hero,
        selector: ".hero, section.banner, header.masthead",
        keys: &[".hero", ".banner", ".masthead"],
    },
    RoleSpec {
        role: ComponentRole::Button,
        selector: "button, .btn, .button, input[type=submit]",
        keys: &["button", ".btn", ".button", ".cta"],
    },
    RoleSpec {
        role: ComponentRole::Card,
        selector: ".card",
        keys: &[".card"],
    },
    RoleSpec {
        role: ComponentRole::Form,
        selector: "form",
        keys: &["form", "input", "select", "textarea", ".form-control", ".input"],
    },
    RoleSpec {
        role: ComponentRole::Table,
        selector: "table",
        keys: &["table", "th", "td", "tr"],
    },
    RoleSpec {
        role: ComponentRole::Badge,
        selector: ".badge, .chip, .pill, .tag",
        keys: &[".badge", ".chip", ".pill", ".tag"],
    },
    RoleSpec {
        role: ComponentRole::Alert,
        selector: ".alert, [role=alert]",
        keys: &[".alert"],
    },
    RoleSpec {
        role: ComponentRole::Accordion,
        selector: "details, .accordion",
        keys: &["details", "summary", ".accordion"],
    },
    RoleSpec {
        role: ComponentRole::Footer,
        selector: "footer, [role=contentinfo]",
        keys: &["footer", ".footer"],
    },
    RoleSpec {
        role: ComponentRole::Tabs,
        selector: "[role=tablist], .tabs",
        keys: &[".tabs", ".tab"],
    },
    RoleSpec {
        role: ComponentRole::Modal,
        selector: "dialog, .modal, [role=dialog]",
        keys: &["dialog", ".modal"],
    },
];

/// Class-name fragments and attribute markers that mean a state.
const STATE_MARKERS: [(InteractiveState, &[&str]); 4] = [
    (InteractiveState::Loading, &[".loading", ".is-loading", "[aria-busy"]),
    (InteractiveState::Disabled, &[".disabled", ".is-disabled", "[disabled", "[aria-disabled"]),
    (InteractiveState::Error, &[".error", ".is-invalid", ".is-error", "[aria-invalid"]),
    (InteractiveState::Active, &[".active", ".is-active", "[aria-selected"]),
];

/// Component signals and whether the page has a hero.
#[derive(Debug, Default)]
pub struct ComponentSignals {
    pub signals: Vec<RawSignal>,
    /// `None` when there is no markup to look in.
    pub has_hero: Option<bool>,
}

fn state_for_pseudo(pseudo: &str) -> Option<InteractiveState> {
    match pseudo {
        "hover" => Some(InteractiveState::Hover),
        "focus" | "focus-visible" | "focus-within" => Some(InteractiveState::Focus),
        "active" => Some(InteractiveState::Active),
        "disabled" => Some(InteractiveState::Disabled),
        "invalid" => Some(InteractiveState::Error),
        _ => None,
    }
}

/// States the style rules declare for a role.
fn states_from_rules(spec: &RoleSpec, rules: &[StyleRule]) -> Vec<InteractiveState> {
    let mut states = Vec::new();
    for rule in rules {
        for selector in rule.selectors() {
            let tokens = selector_tokens(selector);
            if !tokens.iter().any(|t| spec.keys.contains(&t.as_str())) {
                continue;
            }
            states.extend(pseudo_classes(selector).iter().filter_map(|p| state_for_pseudo(p)));
            let lower = selector.to_ascii_lowercase();
            for (state, markers) in STATE_MARKERS {
                if markers.iter().any(|m| lower.contains(m)) {
                    states.push(state);
                }
            }
        }
    }
    states
}

/// States the markup itself shows on matched elements or their descendants.
fn states_from_markup(element: ElementRef<'_>) -> Vec<InteractiveState> {
    let mut states = Vec::new();
    for node in element.descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let v = el.value();
        if v.attr("disabled").is_some() || v.attr("aria-disabled") == Some("true") {
            states.push(InteractiveState::Disabled);
        }
        if v.attr("aria-busy") == Some("true") {
            states.push(InteractiveState::Loading);
        }
        if v.attr("aria-invalid") == Some("true") {
            states.push(InteractiveState::Error);
        }
        if v.attr("aria-selected") == Some("true") {
            states.push(InteractiveState::Active);
        }
        for class in v.classes() {
            let marker = format!(".{}", class.to_ascii_lowercase());
            for (state, markers) in STATE_MARKERS {
                if markers.contains(&marker.as_str()) {
                    states.push(state);
                }
            }
        }
    }
    states
}

fn element_token(el: ElementRef<'_>) -> String {
    let name = el.value().name().to_ascii_lowercase();
    match el.value().classes().next() {
        Some(class) => format!("{name}.{}", class.to_ascii_lowercase()),
        None => name,
    }
}

/// Child token sequence of an element, or the element itself when it has
/// no element children.
fn anatomy_of(el: ElementRef<'_>) -> Vec<String> {
    let children: Vec<String> = el.children().filter_map(ElementRef::wrap).map(element_token).collect();
    if children.is_empty() {
        vec![element_token(el)]
    } else {
        children
    }
}

fn detect(spec: &RoleSpec, document: &Html, rules: &[StyleRule]) -> Option<RawSignal> {
    let sel = Selector::parse(spec.selector).ok()?;
    let matches: Vec<ElementRef<'_>> = document.select(&sel).collect();
    let first = *matches.first()?;

    let mut observed = vec![InteractiveState::Default];
    observed.extend(states_from_rules(spec, rules));
    for el in &matches {
        observed.extend(states_from_markup(*el));
    }

    let states: BTreeMap<InteractiveState, StateCoverage> = InteractiveState::ALL
        .into_iter()
        .map(|s| {
            let coverage = if observed.contains(&s) {
                StateCoverage::Observed
            } else {
                StateCoverage::Missing
            };
            (s, coverage)
        })
        .collect();

    let nodes = u32::try_from(matches.len()).unwrap_or(u32::MAX);
    Some(RawSignal::new(
        Category::Component,
        spec.role.subcategory(),
        ObservedValue::Component(ComponentAnatomy {
            role: spec.role,
            anatomy: anatomy_of(first),
            states,
        }),
        ConfidenceBasis::Nodes(nodes),
    ))
}

/// Detect catalog components present in the page markup.
pub fn extract(page: &ParsedPage<'_>) -> ComponentSignals {
    let Some(document) = page.document else {
        return ComponentSignals::default();
    };

    let signals: Vec<RawSignal> = CATALOG
        .iter()
        .filter_map(|spec| detect(spec, document, page.rules))
        .collect();
    let has_hero = signals
        .iter()
        .any(|s| s.subcategory == ComponentRole::Hero.subcategory());

    ComponentSignals {
        signals,
        has_hero: Some(has_hero),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::parse_stylesheet;

    fn components(markup: &str, css: &str) -> ComponentSignals {
        let doc = Html::parse_document(markup);
        let rules = parse_stylesheet(css);
        extract(&ParsedPage {
            document: Some(&doc),
            rules: &rules,
            text: None,
        })
    }

    fn anatomy(signals: &ComponentSignals, role: ComponentRole) -> Option<ComponentAnatomy> {
        signals.signals.iter().find_map(|s| match &s.value {
            ObservedValue::Component(c) if c.role == role => Some(c.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_button_states_from_rules() {
        let found = components(
            r#"<html><body><button class="btn">Go</button><button class="btn">Stop</button></body></html>"#,
            ".btn { color: #fff } .btn:hover { opacity: .9 } .btn:focus-visible { outline: 2px solid }",
        );
        let button = anatomy(&found, ComponentRole::Button).unwrap();
        assert!(button.states[&InteractiveState::Default].is_observed());
        assert!(button.states[&InteractiveState::Hover].is_observed());
        assert!(button.states[&InteractiveState::Focus].is_observed());
        assert_eq!(button.states[&InteractiveState::Disabled], StateCoverage::Missing);
        assert_eq!(button.states[&InteractiveState::Loading], StateCoverage::Missing);
        assert_eq!(button.anatomy, vec!["button.btn".to_string()]);

        let signal = found
            .signals
            .iter()
            .find(|s| s.subcategory == "component.button")
            .unwrap();
        assert_eq!(signal.basis, ConfidenceBasis::Nodes(2));
        assert_eq!(found.has_hero, Some(false));
    }

    #[test]
    fn test_form_states_from_markup() {
        let found = components(
            r#"<html><body><form><label>Email</label><input aria-invalid="true">
               <button disabled>Send</button></form></body></html>"#,
            "input:focus { border-color: blue }",
        );
        let form = anatomy(&found, ComponentRole::Form).unwrap();
        assert!(form.states[&InteractiveState::Focus].is_observed());
        assert!(form.states[&InteractiveState::Error].is_observed());
        assert!(form.states[&InteractiveState::Disabled].is_observed());
        assert_eq!(form.anatomy, vec!["label", "input", "button"]);
    }

    #[test]
    fn test_hero_detection() {
        let found = components(
            r#"<html><body><section class="hero"><h1>Hi</h1><a class="btn">Start</a></section></body></html>"#,
            "",
        );
        assert_eq!(found.has_hero, Some(true));
        let hero = anatomy(&found, ComponentRole::Hero).unwrap();
        assert_eq!(hero.anatomy, vec!["h1", "a.btn"]);
    }

    #[test]
    fn test_no_markup_means_unknown_hero() {
        let rules = parse_stylesheet(".btn:hover { color: red }");
        let found = extract(&ParsedPage {
            document: None,
            rules: &rules,
            text: None,
        });
        assert!(found.signals.is_empty());
        assert_eq!(found.has_hero, None);
    }
}
