//! Graph rendering.
//!
//! A [`Renderer`] turns a [`Snapshot`] into an image file covering the most
//! recent `window` of history. The driver calls every renderer with a short
//! window on each tick and with a full-day window after each day boundary.
//!
//! [`SvgRenderer`] draws one line per data source from a [`GraphSpec`]:
//! unknown rows break the line, and [`Band`]s shade value ranges such as a
//! low-SNR warning zone.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RenderError;
use crate::snapshot::Snapshot;

/// Draws a snapshot window to a file.
pub trait Renderer: Send + Sync {
    /// Base name of the files this renderer produces.
    fn file_stem(&self) -> &str;

    /// File extension, without the dot.
    fn extension(&self) -> &str;

    /// Renders the newest `window` of `snapshot` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] if the window is empty, a source is missing
    /// from the snapshot, or the file could not be written.
    fn render(
        &self,
        snapshot: &Snapshot,
        window: Duration,
        destination: &Path,
    ) -> Result<(), RenderError>;
}

impl<R: Renderer + ?Sized> Renderer for Arc<R> {
    fn file_stem(&self) -> &str {
        (**self).file_stem()
    }

    fn extension(&self) -> &str {
        (**self).extension()
    }

    fn render(
        &self,
        snapshot: &Snapshot,
        window: Duration,
        destination: &Path,
    ) -> Result<(), RenderError> {
        (**self).render(snapshot, window, destination)
    }
}

/// A shaded horizontal value range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Legend text.
    pub label: String,
    /// Lower bound.
    pub from: f64,
    /// Upper bound.
    pub to: f64,
}

/// What one graph shows and how large it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    /// File stem, e.g. `snr`.
    pub file_stem: String,
    /// Title drawn above the plot.
    pub title: String,
    /// Vertical axis label.
    pub vertical_label: String,
    /// Sources drawn, in legend order.
    pub sources: Vec<String>,
    /// Shaded ranges.
    pub bands: Vec<Band>,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Font size in pixels.
    pub font_size: u32,
}

const PALETTE: [&str; 8] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#17becf",
];

const BAND_FILL: &str = "#ffcc00";

/// Renders a [`GraphSpec`] as an SVG line chart.
#[derive(Debug, Clone)]
pub struct SvgRenderer {
    spec: GraphSpec,
}

impl SvgRenderer {
    /// Creates a renderer for `spec`.
    pub fn new(spec: GraphSpec) -> Self {
        Self { spec }
    }

    /// The graph definition.
    pub fn spec(&self) -> &GraphSpec {
        &self.spec
    }

    /// Builds the SVG document for the newest `window_secs` of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::EmptyWindow`] for a zero window and
    /// [`RenderError::UnknownSource`] if a configured source is missing.
    #[allow(clippy::cast_precision_loss)] // pixel and timestamp arithmetic
    pub fn to_svg(&self, snapshot: &Snapshot, window_secs: u64) -> Result<String, RenderError> {
        if window_secs == 0 {
            return Err(RenderError::EmptyWindow);
        }

        let windowed = snapshot.window(window_secs);
        let mut lines = Vec::with_capacity(self.spec.sources.len());
        for name in &self.spec.sources {
            let series = windowed
                .series(name)
                .ok_or_else(|| RenderError::UnknownSource { name: name.clone() })?;
            lines.push(series);
        }

        let spec = &self.spec;
        let font = spec.font_size.max(1);
        let width = f64::from(spec.width.max(200));
        let height = f64::from(spec.height.max(150));
        let left = f64::from(font) * 5.0;
        let right = f64::from(font) * 2.0;
        let top = f64::from(font) * 3.0;
        let legend_rows = (lines.len() + spec.bands.len()).div_ceil(4);
        let bottom = f64::from(font) * (3.0 + 1.6 * legend_rows as f64);
        let plot_w = (width - left - right).max(1.0);
        let plot_h = (height - top - bottom).max(1.0);

        let end = snapshot.last_update;
        let start = end.saturating_sub(window_secs);
        let span = (end - start).max(1) as f64;

        let (mut lo, mut hi) = lines
            .iter()
            .filter_map(|s| s.value_range())
            .chain(spec.bands.iter().map(|b| (b.from.min(b.to), b.from.max(b.to))))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (a, b)| {
                (lo.min(a), hi.max(b))
            });
        if !lo.is_finite() || !hi.is_finite() {
            (lo, hi) = (0.0, 1.0);
        }
        if (hi - lo).abs() < f64::EPSILON {
            lo -= 1.0;
            hi += 1.0;
        }
        let pad = (hi - lo) * 0.05;
        lo -= pad;
        hi += pad;

        let x_of = |ts: u64| left + ts.saturating_sub(start) as f64 / span * plot_w;
        let y_of = |v: f64| top + (hi - v) / (hi - lo) * plot_h;

        let mut svg = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" font-family="sans-serif" font-size="{font}">"#
        );
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-weight="bold">{}</text>"#,
            width / 2.0,
            top / 2.0 + f64::from(font) / 2.0,
            escape(&spec.title)
        );

        for band in &spec.bands {
            let y1 = y_of(band.from.max(band.to).min(hi));
            let y2 = y_of(band.from.min(band.to).max(lo));
            if y2 > y1 {
                let _ = writeln!(
                    svg,
                    r#"<rect x="{left:.1}" y="{y1:.1}" width="{plot_w:.1}" height="{:.1}" fill="{BAND_FILL}" fill-opacity="0.3"/>"#,
                    y2 - y1
                );
            }
        }

        for i in 0..=4 {
            let value = lo + (hi - lo) * f64::from(i) / 4.0;
            let y = y_of(value);
            let _ = writeln!(
                svg,
                r##"<line x1="{left:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#dddddd"/>"##,
                left + plot_w
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{value:.1}</text>"#,
                left - f64::from(font) * 0.4,
                y + f64::from(font) * 0.35
            );
        }
        for i in 0..=4u64 {
            let ts = start + (end - start) * i / 4;
            let label = DateTime::from_timestamp(i64::try_from(ts).unwrap_or(i64::MAX), 0)
                .map(|t| t.format("%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{label}</text>"#,
                x_of(ts),
                top + plot_h + f64::from(font) * 1.4
            );
        }
        let _ = writeln!(
            svg,
            r#"<text transform="translate({:.1},{:.1}) rotate(-90)" text-anchor="middle">{}</text>"#,
            f64::from(font),
            top + plot_h / 2.0,
            escape(&spec.vertical_label)
        );
        let _ = writeln!(
            svg,
            r#"<rect x="{left:.1}" y="{top:.1}" width="{plot_w:.1}" height="{plot_h:.1}" fill="none" stroke="black"/>"#
        );

        for (index, series) in lines.iter().enumerate() {
            let color = PALETTE[index % PALETTE.len()];
            let mut segment = Vec::new();
            for (ts, value) in &series.rows {
                match value {
                    Some(v) => segment.push(format!("{:.1},{:.1}", x_of(*ts), y_of(*v))),
                    None => flush_segment(&mut svg, &mut segment, color),
                }
            }
            flush_segment(&mut svg, &mut segment, color);
        }

        let legend_top = top + plot_h + f64::from(font) * 2.6;
        let column_w = plot_w / 4.0;
        let entries = lines
            .iter()
            .enumerate()
            .map(|(i, s)| (PALETTE[i % PALETTE.len()], s.name.as_str()))
            .chain(spec.bands.iter().map(|b| (BAND_FILL, b.label.as_str())));
        for (i, (color, label)) in entries.enumerate() {
            let x = left + column_w * (i % 4) as f64;
            let y = legend_top + f64::from(font) * 1.6 * (i / 4) as f64;
            let _ = writeln!(
                svg,
                r#"<rect x="{x:.1}" y="{:.1}" width="{font}" height="{font}" fill="{color}"/>"#,
                y - f64::from(font) * 0.8
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{y:.1}">{}</text>"#,
                x + f64::from(font) * 1.4,
                escape(label)
            );
        }

        svg.push_str("</svg>\n");
        Ok(svg)
    }
}

fn flush_segment(svg: &mut String, segment: &mut Vec<String>, color: &str) {
    match segment.len() {
        0 => {}
        1 => {
            let (x, y) = segment[0].split_once(',').unwrap_or(("0", "0"));
            let _ = writeln!(svg, r#"<circle cx="{x}" cy="{y}" r="2" fill="{color}"/>"#);
        }
        _ => {
            let _ = writeln!(
                svg,
                r#"<polyline points="{}" fill="none" stroke="{color}" stroke-width="2"/>"#,
                segment.join(" ")
            );
        }
    }
    segment.clear();
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl Renderer for SvgRenderer {
    fn file_stem(&self) -> &str {
        &self.spec.file_stem
    }

    fn extension(&self) -> &str {
        "svg"
    }

    fn render(
        &self,
        snapshot: &Snapshot,
        window: Duration,
        destination: &Path,
    ) -> Result<(), RenderError> {
        let svg = self.to_svg(snapshot, window.as_secs())?;

        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir).map_err(|e| RenderError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(destination, svg).map_err(|e| RenderError::Io {
            path: destination.to_path_buf(),
            source: e,
        })?;

        debug!(path = %destination.display(), window_secs = window.as_secs(), "rendered graph");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SeriesSnapshot;
    use tempfile::tempdir;

    fn spec() -> GraphSpec {
        GraphSpec {
            file_stem: "snr".into(),
            title: "Signal to Noise Ratio".into(),
            vertical_label: "dB".into(),
            sources: vec!["ch1Snr".into(), "ch2Snr".into()],
            bands: vec![Band {
                label: "Warning".into(),
                from: 0.0,
                to: 33.0,
            }],
            width: 800,
            height: 400,
            font_size: 12,
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            step: 300,
            last_update: 3_600,
            series: vec![
                SeriesSnapshot {
                    name: "ch1Snr".into(),
                    rows: vec![(2_700, Some(38.0)), (3_000, Some(37.5)), (3_300, None), (3_600, Some(36.0))],
                },
                SeriesSnapshot {
                    name: "ch2Snr".into(),
                    rows: vec![(2_700, None), (3_000, None), (3_300, None), (3_600, None)],
                },
            ],
        }
    }

    #[test]
    fn test_svg_breaks_line_at_unknown_rows() {
        let svg = SvgRenderer::new(spec()).to_svg(&snapshot(), 3_600).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<polyline").count(), 1);
        assert_eq!(svg.matches("<circle").count(), 1);
        assert!(svg.contains("Signal to Noise Ratio"));
        assert!(svg.contains("ch2Snr"));
        assert!(svg.contains("Warning"));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = SvgRenderer::new(spec()).to_svg(&snapshot(), 0).unwrap_err();
        assert!(matches!(err, RenderError::EmptyWindow));
    }

    #[test]
    fn test_missing_source_rejected() {
        let mut spec = spec();
        spec.sources.push("ch9Snr".into());
        let err = SvgRenderer::new(spec).to_svg(&snapshot(), 3_600).unwrap_err();
        assert!(matches!(err, RenderError::UnknownSource { name } if name == "ch9Snr"));
    }

    #[test]
    fn test_title_is_escaped() {
        let mut spec = spec();
        spec.title = "Power & <Level>".into();
        let svg = SvgRenderer::new(spec).to_svg(&snapshot(), 3_600).unwrap();
        assert!(svg.contains("Power &amp; &lt;Level&gt;"));
    }

    #[test]
    fn test_render_writes_file() {
        let temp_dir = tempdir().unwrap();
        let destination = temp_dir.path().join("2024-03-01").join("snr.svg");
        let renderer = SvgRenderer::new(spec());

        renderer
            .render(&snapshot(), Duration::from_secs(86_400), &destination)
            .unwrap();

        let written = fs::read_to_string(&destination).unwrap();
        assert!(written.contains("<polyline"));
        assert_eq!(renderer.file_stem(), "snr");
        assert_eq!(renderer.extension(), "svg");
    }

    #[test]
    fn test_empty_snapshot_still_renders() {
        let empty = Snapshot {
            step: 300,
            last_update: 100,
            series: vec![
                SeriesSnapshot { name: "ch1Snr".into(), rows: vec![] },
                SeriesSnapshot { name: "ch2Snr".into(), rows: vec![] },
            ],
        };
        let svg = SvgRenderer::new(spec()).to_svg(&empty, 3_600).unwrap();
        assert_eq!(svg.matches("<polyline").count(), 0);
    }
}
