//! Voice signals from visible copy and calls to action.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{ConfidenceBasis, ParsedPage, RawSignal};
use crate::types::{Category, ObservedValue};

/// Words per shingle used for near-duplicate detection.
const SHINGLE_WORDS: usize = 5;
/// Mean sentence length below which copy reads as concise.
const CONCISE_MEAN_WORDS: f64 = 12.0;
/// Per-100-word rate at which a pronoun family sets the person.
const PERSON_RATE: f64 = 1.5;
/// Share of imperative CTAs at which the style is imperative.
const IMPERATIVE_SHARE: f64 = 0.5;

const CTA_SELECTORS: &str = "button, a.btn, a.button, a.cta, [class*=\"btn-\"], [role=button], input[type=submit]";

const IMPERATIVE_VERBS: [&str; 23] = [
    "get", "start", "try", "sign", "buy", "learn", "contact", "book", "download", "join",
    "explore", "discover", "create", "see", "view", "request", "subscribe", "shop", "read",
    "watch", "talk", "schedule", "build",
];

const SECOND_PERSON: [&str; 5] = ["you", "your", "yours", "you're", "yourself"];
const FIRST_PLURAL: [&str; 5] = ["we", "our", "ours", "us", "we're"];

const SKIPPED_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "svg"];

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z'’]*").expect("word regex is valid"))
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+(\s|$)|\n{2,}").expect("sentence regex is valid"))
}

/// Voice signals plus the text shingles the weighter uses.
#[derive(Debug, Default)]
pub struct VoiceSignals {
    pub signals: Vec<RawSignal>,
    pub shingles: Option<BTreeSet<u64>>,
}

/// Visible text of a document: every text node outside script-like
/// elements, block elements separated by blank lines.
pub fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    collect_text(document.root_element(), &mut out);
    out.trim().to_string()
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    let block = matches!(
        name,
        "p" | "div" | "section" | "article" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
            | "header" | "footer" | "nav" | "main" | "button" | "td" | "th" | "title"
    );
    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            collect_text(el, out);
        } else if let Some(text) = child.value().as_text() {
            let t = text.trim();
            if !t.is_empty() {
                if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
                out.push_str(t);
            }
        }
    }
    if block && !out.ends_with("\n\n") {
        out.push_str("\n\n");
    }
}

fn words(text: &str) -> Vec<String> {
    word_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase().replace('’', "'"))
        .collect()
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Sentence length distribution and punctuation of one text.
#[derive(Debug, Clone, PartialEq)]
struct SentenceStats {
    mean: f64,
    p90: usize,
    exclamation_rate: f64,
}

fn sentence_stats(text: &str) -> Option<SentenceStats> {
    let mut lengths: Vec<usize> = sentence_re()
        .split(text)
        .map(|s| word_re().find_iter(s).count())
        .filter(|n| *n > 0)
        .collect();
    if lengths.is_empty() {
        return None;
    }
    let exclaimed = sentence_re().find_iter(text).filter(|m| m.as_str().contains('!')).count();
    let count = lengths.len();
    let mean = lengths.iter().sum::<usize>() as f64 / count as f64;
    lengths.sort_unstable();
    // nearest rank
    let rank = ((count as f64 * 0.9).ceil() as usize).clamp(1, count);
    Some(SentenceStats {
        mean: round_to(mean, 1),
        p90: lengths[rank - 1],
        exclamation_rate: round_to((exclaimed as f64 / count as f64).min(1.0), 2),
    })
}

fn tone(mean_length: f64, words: &[String]) -> &'static str {
    let contractions = words.iter().filter(|w| w.contains('\'')).count();
    let second = words.iter().filter(|w| SECOND_PERSON.contains(&w.as_str())).count();
    if mean_length < CONCISE_MEAN_WORDS {
        "concise"
    } else if contractions > 0 || second > 0 {
        "conversational"
    } else {
        "formal"
    }
}

fn person(words: &[String]) -> &'static str {
    let per_100 = |list: &[&str]| {
        let hits = words.iter().filter(|w| list.contains(&w.as_str())).count();
        hits as f64 * 100.0 / words.len().max(1) as f64
    };
    let second = per_100(&SECOND_PERSON);
    let first = per_100(&FIRST_PLURAL);
    if second >= PERSON_RATE && second >= first {
        "second_person"
    } else if first >= PERSON_RATE {
        "first_person_plural"
    } else {
        "neutral"
    }
}

fn shingles(words: &[String]) -> BTreeSet<u64> {
    words
        .windows(SHINGLE_WORDS)
        .map(|w| {
            let mut hasher = DefaultHasher::new();
            w.hash(&mut hasher);
            hasher.finish()
        })
        .collect()
}

fn cta_texts(document: &Html) -> Vec<String> {
    let Ok(sel) = Selector::parse(CTA_SELECTORS) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| {
            let text = if el.value().name() == "input" {
                el.value().attr("value").unwrap_or_default().to_string()
            } else {
                el.text().collect::<Vec<_>>().join(" ")
            };
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty()).then_some(text)
        })
        .collect()
}

fn is_imperative(cta: &str) -> bool {
    words(cta)
        .first()
        .map(|w| IMPERATIVE_VERBS.contains(&w.as_str()))
        .unwrap_or(false)
}

/// Extract voice signals. Text-based signals need visible text; CTA
/// signals need markup.
pub fn extract(page: &ParsedPage<'_>) -> VoiceSignals {
    let mut out = VoiceSignals::default();

    if let Some(text) = page.text {
        let words = words(text);
        if !words.is_empty() {
            let basis = ConfidenceBasis::Words(words.len());
            if let Some(stats) = sentence_stats(text) {
                out.signals.push(RawSignal::new(
                    Category::Voice,
                    "voice.sentence_length",
                    ObservedValue::Number(stats.mean),
                    basis,
                ));
                out.signals.push(RawSignal::new(
                    Category::Voice,
                    "voice.sentence_length_p90",
                    ObservedValue::Number(stats.p90 as f64),
                    basis,
                ));
                out.signals.push(RawSignal::new(
                    Category::Voice,
                    "voice.exclamation_rate",
                    ObservedValue::Number(stats.exclamation_rate),
                    basis,
                ));
                out.signals.push(RawSignal::new(
                    Category::Voice,
                    "voice.tone",
                    ObservedValue::Text(tone(stats.mean, &words).to_string()),
                    basis,
                ));
            }
            out.signals.push(RawSignal::new(
                Category::Voice,
                "voice.person",
                ObservedValue::Text(person(&words).to_string()),
                basis,
            ));
            out.shingles = Some(shingles(&words));
        }
    }

    if let Some(doc) = page.document {
        let ctas = cta_texts(doc);
        if !ctas.is_empty() {
            let imperative = ctas.iter().filter(|c| is_imperative(c)).count();
            let ratio = imperative as f64 / ctas.len() as f64;
            let style = if ratio >= IMPERATIVE_SHARE { "imperative" } else { "descriptive" };
            let basis = ConfidenceBasis::Ctas(ctas.len());
            out.signals.push(RawSignal::new(
                Category::Voice,
                "voice.cta_style",
                ObservedValue::Text(style.to_string()),
                basis,
            ));
            out.signals.push(RawSignal::new(
                Category::Voice,
                "voice.cta_imperative_ratio",
                ObservedValue::Number(round_to(ratio, 2)),
                basis,
            ));
            let cta_words: usize = ctas.iter().map(|c| c.split_whitespace().count()).sum();
            out.signals.push(RawSignal::new(
                Category::Voice,
                "voice.cta_length",
                ObservedValue::Number(round_to(cta_words as f64 / ctas.len() as f64, 1)),
                basis,
            ));
            // Document order; feeds the copying check.
            out.signals.push(RawSignal::new(
                Category::Voice,
                "voice.cta_sequence",
                ObservedValue::Sequence(ctas.iter().map(|c| c.to_lowercase()).collect()),
                basis,
            ));
        }
    }

    out
}
