use crate::options::RenderMethod;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeSpeed {
    Fast,
    Moderate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Standard,
    High,
}

/// Wall-clock range a render with this method usually takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedTimeRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl EstimatedTimeRange {
    pub fn midpoint_ms(&self) -> u64 {
        self.min_ms + (self.max_ms.saturating_sub(self.min_ms)) / 2
    }
}

/// Static, read-only descriptor of what a rendering method can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCapabilities {
    pub method: RenderMethod,
    pub supports_charts: bool,
    pub supports_diagrams: bool,
    pub supports_custom_fonts: bool,
    pub supports_toc: bool,
    pub supports_bookmarks: bool,
    pub relative_speed: RelativeSpeed,
    pub quality_tier: QualityTier,
    pub estimated_time_range: EstimatedTimeRange,
}

impl MethodCapabilities {
    pub const BROWSER: MethodCapabilities = MethodCapabilities {
        method: RenderMethod::Browser,
        supports_charts: true,
        supports_diagrams: true,
        supports_custom_fonts: true,
        supports_toc: true,
        supports_bookmarks: true,
        relative_speed: RelativeSpeed::Moderate,
        quality_tier: QualityTier::High,
        estimated_time_range: EstimatedTimeRange {
            min_ms: 3_000,
            max_ms: 15_000,
        },
    };

    pub const OFFICE: MethodCapabilities = MethodCapabilities {
        method: RenderMethod::Office,
        supports_charts: false,
        supports_diagrams: false,
        supports_custom_fonts: false,
        supports_toc: true,
        supports_bookmarks: false,
        relative_speed: RelativeSpeed::Fast,
        quality_tier: QualityTier::Standard,
        estimated_time_range: EstimatedTimeRange {
            min_ms: 1_000,
            max_ms: 5_000,
        },
    };

    pub fn of(method: RenderMethod) -> &'static MethodCapabilities {
        match method {
            RenderMethod::Browser => &Self::BROWSER,
            RenderMethod::Office => &Self::OFFICE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_lookup_matches_method() {
        for method in RenderMethod::ALL {
            assert_eq!(MethodCapabilities::of(method).method, method);
        }
        assert!(MethodCapabilities::of(RenderMethod::Browser).supports_charts);
        assert!(!MethodCapabilities::of(RenderMethod::Office).supports_diagrams);
    }

    #[test]
    fn midpoint_of_range() {
        let range = EstimatedTimeRange {
            min_ms: 1_000,
            max_ms: 5_000,
        };
        assert_eq!(range.midpoint_ms(), 3_000);
    }
}
