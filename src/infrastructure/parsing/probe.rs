//! Field probes: declarative lookup candidates and their compiled form

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// One lookup candidate for a field.
///
/// In JSON a bare string is a CSS selector; the two structured forms are
/// told apart by their keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Probe {
    Css(String),
    /// A container matching `container` whose text includes `text`;
    /// the value is read from the first `value` descendant.
    ContainerWithText { container: String, text: String, value: String },
    /// An element (default `span`) whose text includes `label`;
    /// the value is read from its next element sibling.
    LabelledSibling {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
}

impl Probe {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn labelled(label: impl Into<String>) -> Self {
        Self::LabelledSibling { label: label.into(), tag: None }
    }

    pub fn container(container: impl Into<String>, text: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ContainerWithText { container: container.into(), text: text.into(), value: value.into() }
    }

    /// Short human-readable form used in logs
    pub fn describe(&self) -> String {
        match self {
            Self::Css(selector) => selector.clone(),
            Self::ContainerWithText { container, text, value } => format!("{container}[text~\"{text}\"] {value}"),
            Self::LabelledSibling { label, tag } => {
                let tag = tag.as_deref().unwrap_or(DEFAULT_LABEL_TAG);
                format!("{tag}[text~\"{label}\"] + *")
            }
        }
    }
}

const DEFAULT_LABEL_TAG: &str = "span";

#[derive(Debug)]
pub(crate) enum CompiledProbe {
    Css(Selector),
    ContainerWithText { container: Selector, text: String, value: Selector },
    LabelledSibling { anchor: Selector, label: String },
}

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| e.to_string())
}

impl CompiledProbe {
    pub(crate) fn compile(probe: &Probe) -> Result<Self, String> {
        Ok(match probe {
            Probe::Css(selector) => Self::Css(parse_selector(selector)?),
            Probe::ContainerWithText { container, text, value } => Self::ContainerWithText {
                container: parse_selector(container)?,
                text: text.to_lowercase(),
                value: parse_selector(value)?,
            },
            Probe::LabelledSibling { label, tag } => Self::LabelledSibling {
                anchor: parse_selector(tag.as_deref().unwrap_or(DEFAULT_LABEL_TAG))?,
                label: label.to_lowercase(),
            },
        })
    }

    /// Trimmed text of the element this candidate points at, if any.
    /// An element with no text counts as unresolved.
    pub(crate) fn resolve(&self, document: &Html) -> Option<String> {
        let element = match self {
            Self::Css(selector) => document.select(selector).next(),
            Self::ContainerWithText { container, text, value } => document
                .select(container)
                .filter(|el| element_text(*el).to_lowercase().contains(text.as_str()))
                .find_map(|el| el.select(value).next()),
            Self::LabelledSibling { anchor, label } => document
                .select(anchor)
                .filter(|el| element_text(*el).to_lowercase().contains(label.as_str()))
                .find_map(|el| el.next_siblings().find_map(ElementRef::wrap)),
        }?;

        let text = element_text(element);
        (!text.is_empty()).then_some(text)
    }
}

/// Collapsed, trimmed text content
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Numeric coercion for scraped text.
///
/// Everything except ASCII digits and `.` is dropped, then the longest valid
/// decimal prefix is parsed. `"Rp 15.000"` therefore reads as `15.0` and
/// `"\"120 pcs\""` as `120.0`. Returns `None` when no digit survives.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();

    let mut end = 0;
    let mut seen_dot = false;
    let mut digits = 0usize;
    for (index, c) in cleaned.char_indices() {
        if c == '.' {
            if seen_dot {
                break;
            }
            seen_dot = true;
        } else {
            digits += 1;
        }
        end = index + 1;
    }

    if digits == 0 {
        return None;
    }
    cleaned[..end].trim_end_matches('.').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("\"120 pcs\"", Some(120.0))]
    #[case("Rp 15.000", Some(15.0))]
    #[case("1.234.567", Some(1.234))]
    #[case("  42 ", Some(42.0))]
    #[case(".5 koin", Some(0.5))]
    #[case("12.", Some(12.0))]
    #[case("N/A", None)]
    #[case("...", None)]
    #[case("", None)]
    fn coerce_number_cases(#[case] raw: &str, #[case] expected: Option<f64>) {
        assert_eq!(coerce_number(raw), expected);
    }

    proptest! {
        #[test]
        fn coerce_never_panics_and_is_non_negative(raw in ".{0,40}") {
            if let Some(value) = coerce_number(&raw) {
                prop_assert!(value >= 0.0);
                prop_assert!(value.is_finite());
            }
        }

        #[test]
        fn plain_integers_round_trip(n in 0u32..10_000_000) {
            prop_assert_eq!(coerce_number(&format!("{n} orders")), Some(f64::from(n)));
        }
    }

    #[test]
    fn json_forms_map_to_probe_kinds() {
        let probes: Vec<Probe> = serde_json::from_str(
            r#"[
                ".sold-qty",
                {"container": ".tab-item", "text": "Siap Kirim", "value": ".count"},
                {"label": "Saldo Iklan"}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            probes,
            vec![
                Probe::css(".sold-qty"),
                Probe::container(".tab-item", "Siap Kirim", ".count"),
                Probe::labelled("Saldo Iklan"),
            ]
        );
    }

    #[test]
    fn labelled_sibling_reads_next_element() {
        let html = Html::parse_document(
            r"<div><span>Pengeluaran Hari Ini</span> <span>Rp 25.000</span></div>",
        );
        let probe = CompiledProbe::compile(&Probe::labelled("pengeluaran hari ini")).unwrap();

        assert_eq!(probe.resolve(&html).as_deref(), Some("Rp 25.000"));
    }

    #[test]
    fn container_with_text_reads_descendant() {
        let html = Html::parse_document(
            r#"<ul>
                <li class="tab-item">Pending <b class="count">3</b></li>
                <li class="tab-item">Siap Kirim <b class="count">17</b></li>
            </ul>"#,
        );
        let probe = CompiledProbe::compile(&Probe::container(".tab-item", "Siap Kirim", ".count")).unwrap();

        assert_eq!(probe.resolve(&html).as_deref(), Some("17"));
    }

    #[test]
    fn empty_element_is_unresolved() {
        let html = Html::parse_document(r#"<span class="coins-balance">  </span>"#);
        let probe = CompiledProbe::compile(&Probe::css(".coins-balance")).unwrap();
        assert!(probe.resolve(&html).is_none());
    }

    #[test]
    fn invalid_selector_fails_to_compile() {
        assert!(CompiledProbe::compile(&Probe::css(r#".tab-item:contains("Pending")"#)).is_err());
    }
}
