//! HTML helpers shared by the rendering backends.
//!
//! Section bodies arrive as HTML fragments from the editor and are trusted;
//! everything else (titles, branding values) is escaped or validated before
//! it is spliced into markup.

use crate::page::PageSetup;
use quire_types::{Branding, ProposalContent, Visualization};
use std::fmt::Write;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Accepts `#rgb`/`#rrggbb` hex colours and bare CSS colour names.
fn css_color(value: Option<&str>, fallback: &'static str) -> String {
    match value.map(str::trim) {
        Some(v)
            if v.strip_prefix('#').is_some_and(|hex| {
                matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
            }) =>
        {
            v.to_string()
        }
        Some(v) if !v.is_empty() && v.chars().all(|c| c.is_ascii_alphabetic()) => v.to_string(),
        _ => fallback.to_string(),
    }
}

fn css_font(value: Option<&str>) -> String {
    let family = value
        .map(|f| {
            f.chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
                .collect::<String>()
        })
        .filter(|f| !f.trim().is_empty());
    match family {
        Some(f) => format!("\"{}\", sans-serif", f.trim()),
        None => "sans-serif".to_string(),
    }
}

fn stylesheet(setup: &PageSetup, branding: &Branding) -> String {
    let primary = css_color(branding.primary_color.as_deref(), "#1f2937");
    let secondary = css_color(branding.secondary_color.as_deref(), "#6b7280");
    let font = css_font(branding.font_family.as_deref());
    let mut css = String::new();
    let _ = writeln!(css, "{}", setup.css_page_rule());
    let _ = writeln!(
        css,
        ":root {{ --primary: {}; --secondary: {}; }}\n\
         body {{ font-family: {}; color: #111827; line-height: 1.5; }}\n\
         h1, h2 {{ color: var(--primary); }}\n\
         section {{ break-before: page; }}\n\
         nav.toc {{ break-after: page; }}\n\
         nav.toc a {{ color: inherit; text-decoration: none; }}\n\
         figure {{ break-inside: avoid; margin: 1em 0; }}\n\
         figcaption {{ color: var(--secondary); font-size: 0.9em; }}",
        primary, secondary, font
    );
    if setup.header_footer {
        let _ = writeln!(
            css,
            "header.running, footer.running {{ position: fixed; left: 0; right: 0; \
             color: var(--secondary); font-size: 0.8em; }}\n\
             header.running {{ top: 0; }}\n\
             footer.running {{ bottom: 0; text-align: right; }}"
        );
    }
    css
}

fn figure(out: &mut String, viz: &Visualization) {
    out.push_str("<figure>");
    match &viz.rendered {
        Some(markup) => out.push_str(markup),
        None => {
            let _ = write!(out, "<div class=\"placeholder\">[{:?} {}]</div>", viz.kind, escape(&viz.id));
        }
    }
    if let Some(title) = &viz.title {
        let _ = write!(out, "<figcaption>{}</figcaption>", escape(title));
    }
    out.push_str("</figure>");
}

/// Assembles the standalone HTML document a browser prints to PDF.
pub fn document(content: &ProposalContent, setup: &PageSetup) -> String {
    let sections = content.ordered_sections();
    let mut out = String::with_capacity(4096);

    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    let _ = write!(out, "<title>{}</title>", escape(&content.title));
    let _ = write!(out, "<style>{}</style></head><body>", stylesheet(setup, &content.branding));

    if setup.header_footer {
        let company = content.branding.company_name.as_deref().unwrap_or_default();
        let _ = write!(
            out,
            "<header class=\"running\">{}</header><footer class=\"running\">{}</footer>",
            escape(company),
            escape(&content.title)
        );
    }

    out.push_str("<div class=\"cover\">");
    if let Some(logo) = &content.branding.logo_url {
        let _ = write!(out, "<img class=\"logo\" src=\"{}\" alt=\"\">", escape(logo));
    }
    let _ = write!(out, "<h1>{}</h1></div>", escape(&content.title));

    if setup.include_toc && !sections.is_empty() {
        out.push_str("<nav class=\"toc\"><h2>Contents</h2><ol>");
        for section in &sections {
            let _ = write!(
                out,
                "<li><a href=\"#{}\">{}</a></li>",
                escape(&section.id),
                escape(&section.title)
            );
        }
        out.push_str("</ol></nav>");
    }

    for section in &sections {
        let _ = write!(
            out,
            "<section id=\"{}\"><h2>{}</h2>{}",
            escape(&section.id),
            escape(&section.title),
            section.content
        );
        for viz in content.visualizations_for(&section.id) {
            figure(&mut out, viz);
        }
        out.push_str("</section>");
    }

    let orphans: Vec<&Visualization> = content
        .visualizations
        .iter()
        .filter(|v| {
            v.section_id
                .as_deref()
                .is_none_or(|id| !sections.iter().any(|s| s.id == id))
        })
        .collect();
    if !orphans.is_empty() {
        out.push_str("<section id=\"appendix\"><h2>Appendix</h2>");
        for viz in orphans {
            figure(&mut out, viz);
        }
        out.push_str("</section>");
    }

    out.push_str("</body></html>");
    out
}

const BLOCK_TAGS: &[&str] = &[
    "p", "/p", "br", "br/", "div", "/div", "li", "/li", "tr", "/tr", "h1", "/h1", "h2", "/h2",
    "h3", "/h3", "h4", "/h4", "h5", "/h5", "h6", "/h6", "ul", "/ul", "ol", "/ol", "table",
    "/table", "blockquote", "/blockquote",
];

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Flattens an HTML fragment into plain-text paragraphs, one per block-level
/// element. Inline markup is dropped and whitespace collapsed.
pub fn text_blocks(fragment: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut chars = fragment.chars().peekable();

    let flush = |current: &mut String, blocks: &mut Vec<String>| {
        let text = current.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            blocks.push(text);
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let mut tag = String::new();
                for t in chars.by_ref() {
                    if t == '>' {
                        break;
                    }
                    tag.push(t);
                }
                let name: String = tag
                    .trim()
                    .split(|ch: char| ch.is_whitespace())
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if BLOCK_TAGS.contains(&name.as_str()) {
                    flush(&mut current, &mut blocks);
                }
            }
            '&' => {
                let mut entity = String::new();
                while let Some(&next) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '#') || entity.len() > 8 {
                        break;
                    }
                    entity.push(next);
                    chars.next();
                }
                if chars.peek() == Some(&';') {
                    chars.next();
                    match decode_entity(&entity) {
                        Some(decoded) => current.push(decoded),
                        None => {
                            current.push('&');
                            current.push_str(&entity);
                            current.push(';');
                        }
                    }
                } else {
                    current.push('&');
                    current.push_str(&entity);
                }
            }
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut blocks);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_types::{GenerationOptions, ProposalId, ResolvedOptions, Section, VisualizationKind};

    fn content() -> ProposalContent {
        ProposalContent {
            proposal_id: ProposalId::new("P1"),
            title: "Q3 <Plan>".to_string(),
            sections: vec![
                Section {
                    id: "b".into(),
                    title: "Budget".into(),
                    content: "<p>Costs</p>".into(),
                    order: 2,
                },
                Section {
                    id: "a".into(),
                    title: "Aims".into(),
                    content: "<p>Goals</p>".into(),
                    order: 1,
                },
            ],
            branding: Branding {
                company_name: Some("Acme & Co".into()),
                primary_color: Some("red;} body{display:none".into()),
                ..Default::default()
            },
            visualizations: vec![Visualization {
                id: "c1".into(),
                kind: VisualizationKind::Chart,
                title: Some("Spend".into()),
                section_id: Some("b".into()),
                rendered: Some("<svg></svg>".into()),
            }],
        }
    }

    fn setup(options: ResolvedOptions) -> PageSetup {
        PageSetup::from_options(&options)
    }

    #[test]
    fn document_orders_sections_and_escapes_titles() {
        let html = document(&content(), &setup(ResolvedOptions::default()));
        assert!(html.contains("<title>Q3 &lt;Plan&gt;</title>"));
        let aims = html.find("<h2>Aims</h2>").unwrap();
        let budget = html.find("<h2>Budget</h2>").unwrap();
        assert!(aims < budget);
        assert!(html.contains("<figure><svg></svg><figcaption>Spend</figcaption></figure>"));
        assert!(html.contains("Acme &amp; Co"));
    }

    #[test]
    fn invalid_branding_colour_falls_back() {
        let html = document(&content(), &setup(ResolvedOptions::default()));
        assert!(!html.contains("display:none"));
        assert!(html.contains("--primary: #1f2937"));
    }

    #[test]
    fn toc_and_running_header_follow_options() {
        let on = document(&content(), &setup(ResolvedOptions::default()));
        assert!(on.contains("<nav class=\"toc\">"));
        assert!(on.contains("header class=\"running\""));

        let off = document(
            &content(),
            &setup(
                GenerationOptions::new()
                    .with_toc(false)
                    .with_header_footer(false)
                    .resolve(),
            ),
        );
        assert!(!off.contains("<nav class=\"toc\">"));
        assert!(!off.contains("header class=\"running\""));
    }

    #[test]
    fn text_blocks_split_on_block_elements() {
        let blocks = text_blocks(
            "<h3>Scope</h3><p>Two <b>floors</b> &amp; a   roof.</p><ul><li>One</li><li>Two&#33;</li></ul>",
        );
        assert_eq!(blocks, ["Scope", "Two floors & a roof.", "One", "Two!"]);
    }

    #[test]
    fn text_blocks_keep_unknown_entities() {
        assert_eq!(text_blocks("R&D &bogus; done"), ["R&D &bogus; done"]);
    }
}
