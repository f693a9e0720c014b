//! Core data types for pages, evidence, canonical values, and findings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::signature::StructuralSignature;

/// Stable identifier of a captured page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric cluster identifier. Lower ids win ties during clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Identifier of one evidence observation: `<page>#<n>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(pub String);

impl ObservationId {
    pub fn new(page: &PageId, seq: usize) -> Self {
        Self(format!("{page}#{seq}"))
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal capture status of a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    #[default]
    Ok,
    Partial,
    Excluded,
}

impl PageStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Excluded => "excluded",
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A captured page with its derived structural signature. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub url: String,
    pub cluster_hint: Option<String>,
    pub status: PageStatus,
    pub signature: StructuralSignature,
    /// Partial capture with too little style data to trust visual evidence.
    pub insufficient_style: bool,
}

/// A template cluster: pages sharing structural layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub template: String,
    pub members: Vec<PageId>,
    pub cluster_weight: f64,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Which weighting signal produced a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSignal {
    Base,
    RuleDensity,
    TemplateRole,
    NoiseFree,
    DuplicatePenalty,
    RenderIncompletePenalty,
    UnknownSignal,
}

/// One term of a page's quality weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightReason {
    pub signal: WeightSignal,
    pub contribution: f64,
    pub detail: String,
}

/// Evidentiary value of a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageWeight {
    pub page_id: PageId,
    pub quality_weight: f64,
    pub reasons: Vec<WeightReason>,
}

/// Broad evidence category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Visual,
    Voice,
    Component,
    Layout,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Voice => "voice",
            Self::Component => "component",
            Self::Layout => "layout",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Token group used to organise the canonical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenGroup {
    Color,
    Typography,
    Spacing,
    Radius,
    Shadow,
    Border,
    Motion,
    Layout,
    Voice,
    Component,
}

impl TokenGroup {
    /// Group of a dotted subcategory such as `spacing.scale`.
    pub fn of(subcategory: &str) -> Self {
        match subcategory.split('.').next().unwrap_or_default() {
            "color" => Self::Color,
            "typography" => Self::Typography,
            "spacing" => Self::Spacing,
            "radius" => Self::Radius,
            "shadow" => Self::Shadow,
            "border" => Self::Border,
            "motion" => Self::Motion,
            "voice" => Self::Voice,
            "component" => Self::Component,
            _ => Self::Layout,
        }
    }
}

/// Unit of a scalar dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Px,
    Ms,
}

impl Unit {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Px => "px",
            Self::Ms => "ms",
        }
    }
}

/// A scalar measurement with a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub value: f64,
    pub unit: Unit,
}

impl Dimension {
    pub fn px(value: f64) -> Self {
        Self { value, unit: Unit::Px }
    }

    pub fn ms(value: f64) -> Self {
        Self { value, unit: Unit::Ms }
    }
}

/// A box-shadow profile reduced to its geometric character.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub offset_x: f64,
    pub offset_y: f64,
    pub blur: f64,
    pub spread: f64,
    pub alpha: f64,
}

/// Expected component roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    Nav,
    Hero,
    Button,
    Card,
    Form,
    Table,
    Badge,
    Alert,
    Accordion,
    Footer,
    Tabs,
    Modal,
}

impl ComponentRole {
    pub const ALL: [ComponentRole; 12] = [
        Self::Nav,
        Self::Hero,
        Self::Button,
        Self::Card,
        Self::Form,
        Self::Table,
        Self::Badge,
        Self::Alert,
        Self::Accordion,
        Self::Footer,
        Self::Tabs,
        Self::Modal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nav => "nav",
            Self::Hero => "hero",
            Self::Button => "button",
            Self::Card => "card",
            Self::Form => "form",
            Self::Table => "table",
            Self::Badge => "badge",
            Self::Alert => "alert",
            Self::Accordion => "accordion",
            Self::Footer => "footer",
            Self::Tabs => "tabs",
            Self::Modal => "modal",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }

    /// Subcategory under which observations of this role are filed.
    pub fn subcategory(&self) -> String {
        format!("component.{}", self.name())
    }

    /// Interactive states a canonical component of this role must document.
    pub fn required_states(&self) -> &'static [InteractiveState] {
        use InteractiveState::*;
        match self {
            Self::Button => &[Hover, Focus, Disabled, Loading],
            Self::Form => &[Focus, Disabled, Error],
            Self::Nav => &[Hover, Focus],
            Self::Tabs => &[Focus, Active],
            Self::Modal | Self::Accordion => &[Focus],
            _ => &[],
        }
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interactive states a component may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveState {
    Default,
    Hover,
    Focus,
    Active,
    Disabled,
    Loading,
    Error,
}

impl InteractiveState {
    pub const ALL: [InteractiveState; 7] = [
        Self::Default,
        Self::Hover,
        Self::Focus,
        Self::Active,
        Self::Disabled,
        Self::Loading,
        Self::Error,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Hover => "hover",
            Self::Focus => "focus",
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Loading => "loading",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for InteractiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a state was seen in the capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "coverage", rename_all = "snake_case")]
pub enum StateCoverage {
    Observed,
    Missing,
    /// Inserted by validation; never evidence.
    Placeholder { label: String },
}

impl StateCoverage {
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Observed)
    }
}

/// Structural anatomy of a matched component plus its state coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentAnatomy {
    pub role: ComponentRole,
    /// Child token sequence of the matched element (`tag` or `tag.class`).
    pub anatomy: Vec<String>,
    pub states: BTreeMap<InteractiveState, StateCoverage>,
}

impl ComponentAnatomy {
    pub fn observed_states(&self) -> impl Iterator<Item = InteractiveState> + '_ {
        self.states
            .iter()
            .filter(|(_, c)| c.is_observed())
            .map(|(s, _)| *s)
    }
}

/// A typed observed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ObservedValue {
    Color(Rgb),
    Dimension(Dimension),
    /// Ascending px steps.
    Scale(Vec<f64>),
    Text(String),
    Number(f64),
    Shadow(Shadow),
    Component(ComponentAnatomy),
    /// Ordered labels, e.g. a page's calls to action.
    Sequence(Vec<String>),
}

impl ObservedValue {
    /// Short human-readable rendering for logs and narrative consumers.
    pub fn describe(&self) -> String {
        match self {
            Self::Color(c) => c.to_hex(),
            Self::Dimension(d) => format!("{}{}", trim_float(d.value), d.unit.suffix()),
            Self::Scale(steps) => steps
                .iter()
                .map(|s| trim_float(*s))
                .collect::<Vec<_>>()
                .join("/"),
            Self::Text(t) => t.clone(),
            Self::Number(n) => format!("{n:.2}"),
            Self::Shadow(s) => format!(
                "{}px {}px {}px a={:.2}",
                trim_float(s.offset_x),
                trim_float(s.offset_y),
                trim_float(s.blur),
                s.alpha
            ),
            Self::Component(c) => format!("{}[{}]", c.role, c.anatomy.join(" ")),
            Self::Sequence(labels) => labels.join(" | "),
        }
    }

    /// Numeric magnitude used for range inference, if the value has one.
    pub fn magnitude(&self) -> Option<(f64, Option<Unit>)> {
        match self {
            Self::Dimension(d) => Some((d.value, Some(d.unit))),
            Self::Number(n) => Some((*n, None)),
            _ => None,
        }
    }

    /// Literal token sequence used for copying-risk comparison.
    pub fn literal_tokens(&self) -> Option<Vec<String>> {
        match self {
            Self::Scale(steps) => Some(steps.iter().map(|s| trim_float(*s)).collect()),
            Self::Component(c) => Some(c.anatomy.clone()),
            Self::Sequence(labels) => Some(
                labels
                    .iter()
                    .flat_map(|l| l.split_whitespace())
                    .map(str::to_lowercase)
                    .collect(),
            ),
            _ => None,
        }
    }
}

fn trim_float(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{}", v.round() as i64)
    } else {
        format!("{v:.2}")
    }
}

/// A single typed observation from one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceObservation {
    pub id: ObservationId,
    pub category: Category,
    pub subcategory: String,
    pub value: ObservedValue,
    pub page_id: PageId,
    pub raw_confidence: f64,
    /// Independent DOM nodes, rules, or samples exhibiting the value.
    pub occurrences: u32,
    /// Set when the source page was flagged as an unreliable capture.
    pub low_confidence: bool,
}

/// Pointer from a canonical value back to its evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub observation: ObservationId,
    pub page_id: PageId,
    pub cluster_id: Option<ClusterId>,
}

/// An equivalence class of observations within one subcategory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub subcategory: String,
    pub value: ObservedValue,
    pub confidence: f64,
    pub support: f64,
    pub agreement: f64,
    pub evidence: Vec<EvidenceRef>,
    pub pages: Vec<PageId>,
    pub clusters: Vec<ClusterId>,
}

/// The single authoritative value chosen for a subcategory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalValue {
    pub subcategory: String,
    pub value: ObservedValue,
    pub confidence: f64,
    pub evidence: Vec<EvidenceRef>,
}

/// Outcome of canonicalization for one subcategory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Canonical,
    LowConfidenceCandidate,
    /// Claims a role another subcategory also claimed with a different
    /// value. Neither side is asserted.
    Contradicted,
}

/// A value offered by a permissive fallback, with its confidence visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedValue {
    pub value: ObservedValue,
    pub confidence: f64,
}

/// What the fallback policy produced for a subcategory without consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackResolution {
    Suggested { candidates: Vec<SuggestedValue> },
    Unknown,
    Range { min: f64, max: f64, unit: Option<Unit> },
    ScaleRange { steps: Vec<(f64, f64)> },
}

impl FallbackResolution {
    /// True when the fallback put any value in front of consumers.
    pub fn emits_values(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Aggregation result for one subcategory in one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubcategoryResult {
    pub subcategory: String,
    pub category: Category,
    pub status: ResolutionStatus,
    pub canonical: Option<CanonicalValue>,
    /// Every equivalence class, highest confidence first.
    pub candidates: Vec<Candidate>,
    pub fallback: Option<FallbackResolution>,
}

impl SubcategoryResult {
    /// Candidates that did not become canonical.
    pub fn accidental_variants(&self) -> &[Candidate] {
        if self.canonical.is_some() {
            &self.candidates[1..]
        } else {
            &self.candidates
        }
    }
}

/// Validation finding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Contradiction,
    MissingState,
    ContrastRisk,
    CopyingRisk,
    LowConfidence,
}

impl FindingKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Contradiction => "contradiction",
            Self::MissingState => "missing_state",
            Self::ContrastRisk => "contrast_risk",
            Self::CopyingRisk => "copying_risk",
            Self::LowConfidence => "low_confidence",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The entity a finding is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingTarget {
    Subcategory { subcategory: String },
    Pair { foreground: String, background: String },
    ComponentState { role: ComponentRole, state: InteractiveState },
}

impl fmt::Display for FindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subcategory { subcategory } => f.write_str(subcategory),
            Self::Pair {
                foreground,
                background,
            } => write!(f, "{foreground} on {background}"),
            Self::ComponentState { role, state } => write!(f, "component.{role}:{state}"),
        }
    }
}

/// Adjustment the validator is allowed to make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingPatch {
    Contrast {
        original: Rgb,
        patched: Rgb,
        background: Rgb,
        original_ratio: f64,
        patched_ratio: f64,
        required_ratio: f64,
    },
    StatePlaceholder {
        role: ComponentRole,
        state: InteractiveState,
        label: String,
    },
}

/// A validation finding. Every finding reaches the output list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub id: String,
    pub kind: FindingKind,
    pub target: FindingTarget,
    pub severity: Severity,
    pub remediation: String,
    pub patch: Option<FindingPatch>,
    pub generation: u32,
}

/// Errors that can occur in the canonicalization core.
#[derive(thiserror::Error, Debug)]
pub enum CanonError {
    #[error("Capture incomplete for page {page}: missing {missing}")]
    CaptureIncomplete { page: PageId, missing: String },

    #[error("No consensus for {subcategory}: best confidence {best:.2} below threshold {threshold:.2}")]
    NoConsensus {
        subcategory: String,
        best: f64,
        threshold: f64,
    },

    #[error("Run aborted: {0}")]
    RunAborted(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Convenience result type.
pub type CanonResult<T> = Result<T, CanonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_group_of() {
        assert_eq!(TokenGroup::of("color.text"), TokenGroup::Color);
        assert_eq!(TokenGroup::of("spacing.scale"), TokenGroup::Spacing);
        assert_eq!(TokenGroup::of("component.button"), TokenGroup::Component);
        assert_eq!(TokenGroup::of("layout.container_width"), TokenGroup::Layout);
    }

    #[test]
    fn test_describe_scale() {
        let v = ObservedValue::Scale(vec![8.0, 16.0, 24.0, 32.0]);
        assert_eq!(v.describe(), "8/16/24/32");
    }

    #[test]
    fn test_role_round_trip_names() {
        for role in ComponentRole::ALL {
            assert_eq!(ComponentRole::from_name(role.name()), Some(role));
        }
    }

    #[test]
    fn test_accidental_variants_excludes_canonical() {
        let cand = |c: f64| Candidate {
            subcategory: "radius.base".into(),
            value: ObservedValue::Dimension(Dimension::px(4.0)),
            confidence: c,
            support: c,
            agreement: 1.0,
            evidence: Vec::new(),
            pages: Vec::new(),
            clusters: Vec::new(),
        };
        let result = SubcategoryResult {
            subcategory: "radius.base".into(),
            category: Category::Visual,
            status: ResolutionStatus::Canonical,
            canonical: Some(CanonicalValue {
                subcategory: "radius.base".into(),
                value: ObservedValue::Dimension(Dimension::px(4.0)),
                confidence: 0.9,
                evidence: Vec::new(),
            }),
            candidates: vec![cand(0.9), cand(0.2)],
            fallback: None,
        };
        assert_eq!(result.accidental_variants().len(), 1);
    }

    #[test]
    fn test_error_display() {
        let err = CanonError::InvalidConfig(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Invalid config: a; b");
    }
}
