use quire_traits::InMemoryContentSource;
use quire_types::{
    Branding, ProposalContent, ProposalId, Section, Visualization, VisualizationKind,
};

pub const SIMPLE: &str = "p-simple";
pub const RICH: &str = "p-rich";
pub const MISSING: &str = "p-missing";

pub fn sections(count: usize) -> Vec<Section> {
    (0..count)
        .map(|i| Section {
            id: format!("s{}", i),
            title: format!("Section {}", i + 1),
            content: format!("<p>Body of section {}.</p>", i + 1),
            order: i as u32,
        })
        .collect()
}

/// Three plain text sections: the office path's territory.
pub fn simple() -> ProposalContent {
    ProposalContent {
        proposal_id: ProposalId::new(SIMPLE),
        title: "Office Refresh".to_string(),
        sections: sections(3),
        branding: Branding {
            company_name: Some("Acme".to_string()),
            ..Branding::default()
        },
        visualizations: Vec::new(),
    }
}

/// Eight sections and two charts: needs the browser.
pub fn rich() -> ProposalContent {
    let charts = ["revenue", "timeline"]
        .iter()
        .enumerate()
        .map(|(i, name)| Visualization {
            id: name.to_string(),
            kind: VisualizationKind::Chart,
            title: Some(format!("Chart {}", i + 1)),
            section_id: Some(format!("s{}", i)),
            rendered: Some("<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>".to_string()),
        })
        .collect();
    ProposalContent {
        proposal_id: ProposalId::new(RICH),
        title: "Platform Migration".to_string(),
        sections: sections(8),
        branding: Branding::default(),
        visualizations: charts,
    }
}

pub fn proposal(id: &str, section_count: usize) -> ProposalContent {
    ProposalContent {
        proposal_id: ProposalId::new(id),
        title: format!("Proposal {}", id),
        sections: sections(section_count),
        ..ProposalContent::default()
    }
}

pub fn content_source() -> InMemoryContentSource {
    let source = InMemoryContentSource::new();
    for content in [simple(), rich()] {
        source.insert(content).expect("insert fixture");
    }
    source
}
