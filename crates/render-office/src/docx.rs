use std::io::Cursor;

use docx_rs::{
    AlignmentType, BreakType, Docx, Footer, Header, PageMargin, Paragraph, Run, RunFonts, Style,
    StyleType,
};
use quire_render_core::{PageSetup, RenderError, html};
use quire_types::{Branding, ProposalContent, RenderMethod, Visualization};

use crate::builder::DocumentBuilder;

const TITLE_SIZE_PT: usize = 26;
const HEADING_SIZE_PT: usize = 16;
const BODY_SIZE_PT: usize = 11;
const DEFAULT_FONT: &str = "Liberation Sans";

/// Builds a DOCX document from proposal content.
///
/// Section HTML is flattened into plain paragraphs; the office path is
/// text-oriented, so visualizations become italic caption lines.
#[derive(Debug, Default, Clone)]
pub struct DocxBuilder;

impl DocxBuilder {
    pub fn new() -> Self {
        Self
    }
}

struct Theme {
    font: String,
    primary: Option<String>,
    secondary: Option<String>,
}

impl Theme {
    fn from_branding(branding: &Branding) -> Self {
        Self {
            font: branding
                .font_family
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FONT.to_string()),
            primary: hex_color(branding.primary_color.as_deref()),
            secondary: hex_color(branding.secondary_color.as_deref()),
        }
    }

    fn run(&self, text: &str) -> Run {
        Run::new()
            .add_text(text)
            .size(BODY_SIZE_PT * 2)
            .fonts(RunFonts::new().ascii(&self.font).hi_ansi(&self.font))
    }

    fn accent(&self, run: Run) -> Run {
        match &self.primary {
            Some(color) => run.color(color),
            None => run,
        }
    }

    fn muted(&self, run: Run) -> Run {
        match &self.secondary {
            Some(color) => run.color(color),
            None => run,
        }
    }
}

/// OOXML wants `RRGGBB` without the hash.
fn hex_color(value: Option<&str>) -> Option<String> {
    let hex = value?.trim().strip_prefix('#')?;
    let expanded = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    expanded
        .chars()
        .all(|c| c.is_ascii_hexdigit())
        .then(|| expanded.to_ascii_uppercase())
}

fn heading_style(style_id: &str, name: &str, size_pt: usize) -> Style {
    Style::new(style_id, StyleType::Paragraph)
        .name(name)
        .size(size_pt * 2)
        .bold()
}

fn page_break() -> Paragraph {
    Paragraph::new().add_run(Run::new().add_break(BreakType::Page))
}

fn caption(theme: &Theme, viz: &Visualization) -> Paragraph {
    let label = match &viz.title {
        Some(title) => format!("[{:?}: {}]", viz.kind, title),
        None => format!("[{:?} {}]", viz.kind, viz.id),
    };
    Paragraph::new()
        .align(AlignmentType::Center)
        .add_run(theme.muted(theme.run(&label).italic()))
}

impl DocumentBuilder for DocxBuilder {
    fn extension(&self) -> &'static str {
        "docx"
    }

    fn build(&self, content: &ProposalContent, setup: &PageSetup) -> Result<Vec<u8>, RenderError> {
        let theme = Theme::from_branding(&content.branding);
        let sections = content.ordered_sections();
        let twips = PageSetup::mm_to_twips;

        let mut docx = Docx::new()
            .page_size(twips(setup.width_mm), twips(setup.height_mm))
            .page_margin(
                PageMargin::new()
                    .top(twips(setup.margins.top) as i32)
                    .right(twips(setup.margins.right) as i32)
                    .bottom(twips(setup.margins.bottom) as i32)
                    .left(twips(setup.margins.left) as i32),
            )
            .add_style(heading_style("Title", "title", TITLE_SIZE_PT))
            .add_style(heading_style("Heading1", "heading 1", HEADING_SIZE_PT));

        if setup.header_footer {
            let company = content.branding.company_name.as_deref().unwrap_or_default();
            docx = docx
                .header(Header::new().add_paragraph(
                    Paragraph::new().add_run(theme.muted(theme.run(company))),
                ))
                .footer(Footer::new().add_paragraph(
                    Paragraph::new()
                        .align(AlignmentType::Right)
                        .add_run(theme.muted(theme.run(&content.title))),
                ));
        }

        docx = docx.add_paragraph(
            Paragraph::new()
                .style("Title")
                .add_run(theme.accent(Run::new().add_text(&content.title))),
        );

        if setup.include_toc && !sections.is_empty() {
            docx = docx.add_paragraph(
                Paragraph::new()
                    .style("Heading1")
                    .add_run(theme.accent(Run::new().add_text("Contents"))),
            );
            for (n, section) in sections.iter().enumerate() {
                docx = docx.add_paragraph(
                    Paragraph::new().add_run(theme.run(&format!("{}. {}", n + 1, section.title))),
                );
            }
        }

        for section in &sections {
            docx = docx.add_paragraph(page_break()).add_paragraph(
                Paragraph::new()
                    .style("Heading1")
                    .add_run(theme.accent(Run::new().add_text(&section.title))),
            );
            for block in html::text_blocks(&section.content) {
                docx = docx.add_paragraph(
                    Paragraph::new()
                        .align(AlignmentType::Left)
                        .add_run(theme.run(&block)),
                );
            }
            for viz in content.visualizations_for(&section.id) {
                docx = docx.add_paragraph(caption(&theme, viz));
            }
        }

        let mut buf = Cursor::new(Vec::new());
        docx.build().pack(&mut buf).map_err(|e| {
            RenderError::failed(RenderMethod::Office, format!("DOCX generation failed: {}", e))
        })?;
        Ok(buf.into_inner())
    }
}
