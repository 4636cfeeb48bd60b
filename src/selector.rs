// src/selector.rs
use quire_types::{ComplexitySignals, MethodPreference, RenderMethod};

pub const DEFAULT_SECTION_THRESHOLD: usize = 5;

/// Chooses a rendering backend from a proposal's complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelector {
    section_threshold: usize,
}

impl Default for MethodSelector {
    fn default() -> Self {
        Self::new(DEFAULT_SECTION_THRESHOLD)
    }
}

impl MethodSelector {
    pub fn new(section_threshold: usize) -> Self {
        Self { section_threshold }
    }

    /// Long or visual proposals need the browser's layout fidelity;
    /// everything else goes to the faster office converter.
    pub fn select_method(&self, signals: &ComplexitySignals) -> RenderMethod {
        if signals.section_count > self.section_threshold || signals.visualization_count() > 0 {
            RenderMethod::Browser
        } else {
            RenderMethod::Office
        }
    }

    /// An explicit preference wins; `auto` defers to [`Self::select_method`].
    pub fn resolve(&self, preference: MethodPreference, signals: &ComplexitySignals) -> RenderMethod {
        preference
            .explicit()
            .unwrap_or_else(|| self.select_method(signals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(sections: usize, charts: usize, diagrams: usize, tables: usize) -> ComplexitySignals {
        ComplexitySignals {
            section_count: sections,
            chart_count: charts,
            diagram_count: diagrams,
            table_count: tables,
        }
    }

    #[test]
    fn plain_short_proposals_use_office() {
        let selector = MethodSelector::default();
        assert_eq!(selector.select_method(&signals(3, 0, 0, 0)), RenderMethod::Office);
        assert_eq!(selector.select_method(&signals(5, 0, 0, 0)), RenderMethod::Office);
        assert_eq!(selector.select_method(&signals(0, 0, 0, 0)), RenderMethod::Office);
    }

    #[test]
    fn long_or_visual_proposals_use_browser() {
        let selector = MethodSelector::default();
        assert_eq!(selector.select_method(&signals(6, 0, 0, 0)), RenderMethod::Browser);
        assert_eq!(selector.select_method(&signals(1, 1, 0, 0)), RenderMethod::Browser);
        assert_eq!(selector.select_method(&signals(1, 0, 1, 0)), RenderMethod::Browser);
        assert_eq!(selector.select_method(&signals(8, 2, 0, 0)), RenderMethod::Browser);
    }

    #[test]
    fn explicit_preference_bypasses_the_heuristic() {
        let selector = MethodSelector::default();
        let heavy = signals(20, 4, 4, 0);
        assert_eq!(selector.resolve(MethodPreference::Office, &heavy), RenderMethod::Office);
        assert_eq!(
            selector.resolve(MethodPreference::Browser, &signals(1, 0, 0, 0)),
            RenderMethod::Browser
        );
        assert_eq!(selector.resolve(MethodPreference::Auto, &heavy), RenderMethod::Browser);
    }

    #[test]
    fn threshold_is_configurable() {
        let selector = MethodSelector::new(2);
        assert_eq!(selector.select_method(&signals(3, 0, 0, 0)), RenderMethod::Browser);
    }
}
