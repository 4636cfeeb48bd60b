use crate::ids::ProposalId;
use serde::{Deserialize, Serialize};

/// The proposal record handed to a renderer: ordered sections, branding and
/// any pre-rendered visualizations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalContent {
    #[serde(default)]
    pub proposal_id: ProposalId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub branding: Branding,
    #[serde(default)]
    pub visualizations: Vec<Visualization>,
}

impl ProposalContent {
    /// Sections sorted by their `order` field, stable for equal orders.
    pub fn ordered_sections(&self) -> Vec<&Section> {
        let mut sections: Vec<&Section> = self.sections.iter().collect();
        sections.sort_by_key(|s| s.order);
        sections
    }

    /// Visualizations attached to the given section.
    pub fn visualizations_for<'a>(
        &'a self,
        section_id: &'a str,
    ) -> impl Iterator<Item = &'a Visualization> + 'a {
        self.visualizations
            .iter()
            .filter(move |v| v.section_id.as_deref() == Some(section_id))
    }

    pub fn signals(&self) -> ComplexitySignals {
        ComplexitySignals::from_content(self)
    }
}

/// One section of a proposal. `content` is an HTML fragment produced by the
/// editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    Chart,
    Diagram,
    Table,
}

/// An embedded visual. `rendered` carries pre-rasterized markup (an SVG
/// document or an `<img>` data URI); rasterization happens upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visualization {
    pub id: String,
    pub kind: VisualizationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,
}

/// The inputs the method selector looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexitySignals {
    pub section_count: usize,
    pub chart_count: usize,
    pub diagram_count: usize,
    pub table_count: usize,
}

impl ComplexitySignals {
    pub fn from_content(content: &ProposalContent) -> Self {
        let count = |kind: VisualizationKind| {
            content
                .visualizations
                .iter()
                .filter(|v| v.kind == kind)
                .count()
        };
        Self {
            section_count: content.sections.len(),
            chart_count: count(VisualizationKind::Chart),
            diagram_count: count(VisualizationKind::Diagram),
            table_count: count(VisualizationKind::Table),
        }
    }

    pub fn visualization_count(&self) -> usize {
        self.chart_count + self.diagram_count + self.table_count
    }
}
