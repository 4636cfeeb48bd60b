use quire_types::{Margins, Orientation, Quality, ResolvedOptions};

/// Physical page parameters derived from the request options. Paper is
/// always A4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSetup {
    pub width_mm: f32,
    pub height_mm: f32,
    pub margins: Margins,
    pub orientation: Orientation,
    pub quality: Quality,
    pub include_toc: bool,
    pub header_footer: bool,
}

const A4_WIDTH_MM: f32 = 210.0;
const A4_HEIGHT_MM: f32 = 297.0;
const TWIPS_PER_MM: f32 = 1440.0 / 25.4;

impl PageSetup {
    pub fn from_options(options: &ResolvedOptions) -> Self {
        let (width_mm, height_mm) = match options.orientation {
            Orientation::Portrait => (A4_WIDTH_MM, A4_HEIGHT_MM),
            Orientation::Landscape => (A4_HEIGHT_MM, A4_WIDTH_MM),
        };
        Self {
            width_mm,
            height_mm,
            margins: options.margins,
            orientation: options.orientation,
            quality: options.quality,
            include_toc: options.include_toc,
            header_footer: options.header_footer,
        }
    }

    /// The CSS `@page` rule for this setup.
    pub fn css_page_rule(&self) -> String {
        let orientation = match self.orientation {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        };
        format!(
            "@page {{ size: A4 {}; margin: {}mm {}mm {}mm {}mm; }}",
            orientation, self.margins.top, self.margins.right, self.margins.bottom, self.margins.left
        )
    }

    /// Browser device scale factor; sharper rasterised visuals at higher
    /// quality.
    pub fn device_scale_factor(&self) -> f32 {
        match self.quality {
            Quality::Draft => 1.0,
            Quality::Standard => 1.5,
            Quality::High => 2.0,
        }
    }

    /// JPEG quality for embedded images in office exports.
    pub fn jpeg_quality(&self) -> u8 {
        match self.quality {
            Quality::Draft => 60,
            Quality::Standard => 85,
            Quality::High => 95,
        }
    }

    pub fn mm_to_twips(mm: f32) -> u32 {
        (mm.max(0.0) * TWIPS_PER_MM).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_types::GenerationOptions;

    #[test]
    fn landscape_swaps_dimensions() {
        let options = GenerationOptions::new()
            .with_orientation(Orientation::Landscape)
            .resolve();
        let setup = PageSetup::from_options(&options);
        assert_eq!((setup.width_mm, setup.height_mm), (297.0, 210.0));
        assert!(setup.css_page_rule().contains("A4 landscape"));
    }

    #[test]
    fn page_rule_carries_margins() {
        let options = GenerationOptions::new()
            .with_margins(Margins::uniform(12.5))
            .resolve();
        let rule = PageSetup::from_options(&options).css_page_rule();
        assert_eq!(
            rule,
            "@page { size: A4 portrait; margin: 12.5mm 12.5mm 12.5mm 12.5mm; }"
        );
    }

    #[test]
    fn twips_conversion() {
        assert_eq!(PageSetup::mm_to_twips(25.4), 1440);
        assert_eq!(PageSetup::mm_to_twips(-3.0), 0);
    }
}
