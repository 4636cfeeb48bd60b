//! Request options and their canonical, fully-resolved form.

use crate::ids::ProposalId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A concrete rendering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMethod {
    /// Headless browser engine. Full CSS and graphics fidelity, higher cost.
    Browser,
    /// Office-suite command-line converter. Fast, text-optimised.
    Office,
}

impl RenderMethod {
    pub const ALL: [RenderMethod; 2] = [RenderMethod::Browser, RenderMethod::Office];

    /// The method to suggest when this one is unavailable.
    pub fn alternative(self) -> Self {
        match self {
            RenderMethod::Browser => RenderMethod::Office,
            RenderMethod::Office => RenderMethod::Browser,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RenderMethod::Browser => "browser",
            RenderMethod::Office => "office",
        }
    }
}

impl fmt::Display for RenderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(RenderMethod::Browser),
            "office" => Ok(RenderMethod::Office),
            _ => Err(format!("Invalid render method: {}", s)),
        }
    }
}

/// What the caller asked for: a concrete method, or `auto`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodPreference {
    /// Let the method selector decide from the proposal's complexity.
    #[default]
    Auto,
    Browser,
    Office,
}

impl MethodPreference {
    /// The requested method, or `None` for `auto`.
    pub fn explicit(self) -> Option<RenderMethod> {
        match self {
            MethodPreference::Auto => None,
            MethodPreference::Browser => Some(RenderMethod::Browser),
            MethodPreference::Office => Some(RenderMethod::Office),
        }
    }
}

impl From<RenderMethod> for MethodPreference {
    fn from(method: RenderMethod) -> Self {
        match method {
            RenderMethod::Browser => MethodPreference::Browser,
            RenderMethod::Office => MethodPreference::Office,
        }
    }
}

impl FromStr for MethodPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(MethodPreference::Auto),
            other => other.parse::<RenderMethod>().map(MethodPreference::from),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    High,
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Quality::Draft),
            "standard" => Ok(Quality::Standard),
            "high" => Ok(Quality::High),
            _ => Err(format!("Invalid quality: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Page margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Margins {
    pub const DEFAULT_MM: f32 = 20.0;

    pub fn uniform(mm: f32) -> Self {
        Self {
            top: mm,
            right: mm,
            bottom: mm,
            left: mm,
        }
    }

    /// All sides finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [self.top, self.right, self.bottom, self.left]
            .iter()
            .all(|m| m.is_finite() && *m >= 0.0)
    }

    /// Collapses `-0.0` so that equal margins always serialize identically.
    fn canonical(self) -> Self {
        let fix = |v: f32| if v == 0.0 { 0.0 } else { v };
        Self {
            top: fix(self.top),
            right: fix(self.right),
            bottom: fix(self.bottom),
            left: fix(self.left),
        }
    }
}

impl Default for Margins {
    fn default() -> Self {
        Self::uniform(Self::DEFAULT_MM)
    }
}

/// Options as supplied by a caller. Omitted fields take their defaults
/// when resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<MethodPreference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margins: Option<Margins>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_toc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_footer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: MethodPreference) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = Some(margins);
        self
    }

    pub fn with_toc(mut self, include: bool) -> Self {
        self.include_toc = Some(include);
        self
    }

    pub fn with_header_footer(mut self, enabled: bool) -> Self {
        self.header_footer = Some(enabled);
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    /// Substitutes explicit defaults for every omitted field.
    pub fn resolve(&self) -> ResolvedOptions {
        ResolvedOptions {
            method: self.method.unwrap_or_default(),
            quality: self.quality.unwrap_or_default(),
            margins: self.margins.unwrap_or_default().canonical(),
            include_toc: self.include_toc.unwrap_or(true),
            header_footer: self.header_footer.unwrap_or(true),
            orientation: self.orientation.unwrap_or_default(),
        }
    }
}

/// Fully-resolved options. Field order here is the canonical order used
/// when fingerprinting a request; do not reorder fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOptions {
    pub method: MethodPreference,
    pub quality: Quality,
    pub margins: Margins,
    pub include_toc: bool,
    pub header_footer: bool,
    pub orientation: Orientation,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        GenerationOptions::default().resolve()
    }
}

/// One caller invocation: which proposal, rendered how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub proposal_id: ProposalId,
    pub options: ResolvedOptions,
}

impl GenerationRequest {
    pub fn new(proposal_id: impl Into<ProposalId>, options: &GenerationOptions) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            options: options.resolve(),
        }
    }
}
