//! Donut chart icons for cluster markers.

use crate::config::StyleConfig;
use crate::types::{Category, CategoryCounts};
use std::f64::consts::PI;
use std::fmt::Write;

/// Shrinks a segment holding the whole total so it still draws as an arc.
const FULL_CIRCLE_EPSILON: f64 = 0.00001;

/// Segment fill colors in [`Category`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette(pub [String; 4]);

impl Default for Palette {
    fn default() -> Self {
        Palette::from(&StyleConfig::default())
    }
}

impl From<&StyleConfig> for Palette {
    fn from(style: &StyleConfig) -> Self {
        Palette(Category::ALL.map(|c| style.color(c).to_string()))
    }
}

impl Palette {
    pub fn color(&self, category: Category) -> &str {
        &self.0[category.index()]
    }
}

/// Outer radius and font size for a cluster of `total` members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartSize {
    pub radius: u32,
    pub inner_radius: u32,
    pub font_size: u32,
}

pub fn chart_size(total: u32) -> ChartSize {
    let (radius, font_size) = match total {
        1000.. => (50, 22),
        100..=999 => (32, 20),
        10..=99 => (24, 18),
        _ => (18, 16),
    };
    ChartSize {
        radius,
        inner_radius: (radius as f64 * 0.6).round() as u32,
        font_size,
    }
}

/// One ring segment, as fractions of the full circle.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub category: Category,
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn large_arc(&self) -> bool {
        self.end - self.start > 0.5
    }
}

/// Segments for every category with a non-zero count, in category order.
///
/// # Panics
///
/// Panics if all counts are zero. Clusters always have members, so a zero total is a
/// data bug upstream.
pub fn segments(counts: &CategoryCounts) -> Vec<Segment> {
    let total = counts.total();
    assert!(total > 0, "donut chart requested for an empty cluster");
    let total = total as f64;

    let mut offset = 0u32;
    let mut segments = Vec::new();
    for category in Category::ALL {
        let count = counts[category];
        if count > 0 {
            let start = offset as f64 / total;
            let mut end = (offset + count) as f64 / total;
            if end - start == 1.0 {
                end -= FULL_CIRCLE_EPSILON;
            }
            segments.push(Segment { category, start, end });
        }
        offset += count;
    }
    segments
}

/// SVG path of an annular segment, starting at 12 o'clock and running clockwise.
pub fn donut_segment(segment: &Segment, r: f64, r0: f64, color: &str) -> String {
    let a0 = 2.0 * PI * (segment.start - 0.25);
    let a1 = 2.0 * PI * (segment.end - 0.25);
    let (y0, x0) = a0.sin_cos();
    let (y1, x1) = a1.sin_cos();
    let large_arc = segment.large_arc() as u8;

    format!(
        r#"<path d="M {} {} L {} {} A {r} {r} 0 {large_arc} 1 {} {} L {} {} A {r0} {r0} 0 {large_arc} 0 {} {}" fill="{color}" />"#,
        r + r0 * x0,
        r + r0 * y0,
        r + r * x0,
        r + r * y0,
        r + r * x1,
        r + r * y1,
        r + r0 * x1,
        r + r0 * y1,
        r + r0 * x0,
        r + r0 * y0,
    )
}

/// Decimal with comma thousands separators, e.g. `12,345`.
pub fn format_grouped(value: u32) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// A rendered donut chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartIcon {
    pub svg: String,
    pub counts: CategoryCounts,
    pub size: ChartSize,
}

impl ChartIcon {
    /// Width and height of the icon in pixels.
    pub fn pixel_size(&self) -> u32 {
        self.size.radius * 2
    }
}

/// Build the donut chart for a cluster's category counts.
///
/// # Panics
///
/// Panics if all counts are zero.
pub fn synthesize(counts: &CategoryCounts, palette: &Palette) -> ChartIcon {
    let segments = segments(counts);
    let total = counts.total();
    let size = chart_size(total);
    let r = size.radius as f64;
    let r0 = size.inner_radius as f64;
    let w = size.radius * 2;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{w}" viewBox="0 0 {w} {w}" text-anchor="middle" style="font: {}px sans-serif; display: block">"#,
        size.font_size
    );
    svg.push('\n');

    for segment in &segments {
        svg.push_str(&donut_segment(segment, r, r0, palette.color(segment.category)));
        svg.push('\n');
    }

    // Writing into a String cannot fail
    let _ = write!(
        svg,
        "<circle cx=\"{r}\" cy=\"{r}\" r=\"{r0}\" fill=\"white\" opacity=\"0.3\" />\n\
         <text dominant-baseline=\"central\" transform=\"translate({r}, {r})\">{}</text>\n\
         </svg>",
        format_grouped(total)
    );

    ChartIcon { svg, counts: *counts, size }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_size_tiers() {
        assert_eq!(chart_size(1).radius, 18);
        assert_eq!(chart_size(9).radius, 18);
        assert_eq!(chart_size(10).radius, 24);
        assert_eq!(chart_size(99).radius, 24);
        assert_eq!(chart_size(100).radius, 32);
        assert_eq!(chart_size(999).radius, 32);
        assert_eq!(chart_size(1000).radius, 50);
        assert_eq!(chart_size(1000).font_size, 22);
        assert_eq!(chart_size(9).font_size, 16);
    }

    #[test]
    fn test_inner_radius_rounding() {
        assert_eq!(chart_size(1).inner_radius, 11); // 10.8
        assert_eq!(chart_size(10).inner_radius, 14); // 14.4
        assert_eq!(chart_size(100).inner_radius, 19); // 19.2
        assert_eq!(chart_size(1000).inner_radius, 30);
    }

    #[test]
    fn test_grouping() {
        assert_eq!(format_grouped(0), "0");
        assert_eq!(format_grouped(999), "999");
        assert_eq!(format_grouped(1000), "1,000");
        assert_eq!(format_grouped(12345), "12,345");
        assert_eq!(format_grouped(1234567), "1,234,567");
    }

    #[test]
    fn test_single_category_is_shrunk() {
        let segs = segments(&CategoryCounts::new(1, 0, 0, 0));
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].category, Category::High);
        assert_eq!(segs[0].start, 0.0);
        assert_relative_eq!(segs[0].end, 1.0 - FULL_CIRCLE_EPSILON);
        assert!(segs[0].large_arc());

        let icon = synthesize(&CategoryCounts::new(1, 0, 0, 0), &Palette::default());
        assert_eq!(icon.svg.matches("<path").count(), 1);
        assert!(icon.svg.contains("fill=\"#d01c8b\""));
        assert!(!icon.svg.contains("NaN"));
    }

    #[test]
    fn test_segments_are_contiguous() {
        let segs = segments(&CategoryCounts::new(2, 0, 5, 3));
        let cats: Vec<Category> = segs.iter().map(|s| s.category).collect();
        assert_eq!(cats, vec![Category::High, Category::Low, Category::NoData]);
        assert_relative_eq!(segs[0].end, 0.2);
        assert_relative_eq!(segs[1].start, 0.2);
        assert_relative_eq!(segs[1].end, 0.7);
        assert_relative_eq!(segs[2].end, 1.0);
        assert!(!segs[0].large_arc());
        assert!(!segs[1].large_arc());
    }

    #[test]
    fn test_segment_starts_at_top() {
        let seg = Segment { category: Category::Mid, start: 0.0, end: 0.25 };
        let path = donut_segment(&seg, 18.0, 11.0, "#f1b6da");
        // top of the inner ring, then the outer ring, ending at 3 o'clock
        assert!(path.starts_with("<path d=\"M 18 7 L 18 0 A 18 18 0 0 1 36 18"));
    }

    #[test]
    fn test_icon_dimensions_and_text() {
        let icon = synthesize(&CategoryCounts::new(5000, 4000, 3000, 345), &Palette::default());
        assert_eq!(icon.pixel_size(), 100);
        assert!(icon.svg.contains("width=\"100\" height=\"100\""));
        assert!(icon.svg.contains(">12,345</text>"));
        assert!(icon.svg.contains("font: 22px"));
        assert_eq!(icon.svg.matches("<path").count(), 4);
    }

    #[test]
    #[should_panic(expected = "empty cluster")]
    fn test_empty_counts_rejected() {
        synthesize(&CategoryCounts::default(), &Palette::default());
    }
}
