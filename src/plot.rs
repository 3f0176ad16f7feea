use std::path::Path;

use geo::{BoundingRect, MultiPolygon};
use plotters::prelude::*;

use crate::error::HsaError;
use crate::footprint::parse_polygons;
use crate::table::ObservationTable;

/// Cluster boundary fill color.
const BLUE: RGBColor = RGBColor(0x66, 0x99, 0xcc);

/// Filter-to-color mapping with a fixed fallback cycle for filters not
/// present in the master table.
#[derive(Debug, Clone)]
pub struct FilterPalette {
    master: Vec<(String, RGBColor)>,
    cycle: Vec<RGBColor>,
}

impl Default for FilterPalette {
    fn default() -> Self {
        let master = [
            ("G102", RGBColor(0x1f, 0x77, 0xb4)),
            ("F125W", RGBColor(0xff, 0x7f, 0x0e)),
            ("F160W", RGBColor(0x2c, 0xa0, 0x2c)),
            ("G141", RGBColor(0xd6, 0x27, 0x28)),
            ("F140W", RGBColor(0x94, 0x67, 0xbd)),
            ("F105W", RGBColor(0x8c, 0x56, 0x4b)),
            ("F775W", RGBColor(0x8c, 0x56, 0x4b)),
        ]
        .into_iter()
        .map(|(name, color)| (name.to_string(), color))
        .collect();
        let cycle = vec![
            RGBColor(0x1f, 0x77, 0xb4),
            RGBColor(0xff, 0x7f, 0x0e),
            RGBColor(0x2c, 0xa0, 0x2c),
            RGBColor(0xd6, 0x27, 0x28),
            RGBColor(0x94, 0x67, 0xbd),
            RGBColor(0x8c, 0x56, 0x4b),
            RGBColor(0xe3, 0x77, 0xc2),
            RGBColor(0x7f, 0x7f, 0x7f),
            RGBColor(0xbc, 0xbd, 0x22),
            RGBColor(0x17, 0xbe, 0xcf),
        ];
        Self { master, cycle }
    }
}

impl FilterPalette {
    pub fn color_for(&self, filter: &str, fallback_index: usize) -> RGBColor {
        self.master
            .iter()
            .find(|(name, _)| name == filter)
            .map(|(_, color)| *color)
            .unwrap_or(self.cycle[fallback_index % self.cycle.len()])
    }
}

struct Bounds {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

impl Bounds {
    fn new() -> Self {
        Self {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
        }
    }

    fn include(&mut self, x: f64, y: f64) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    fn pad(&mut self, fraction: f64) {
        let dx = (self.x_max - self.x_min).max(1e-3) * fraction;
        let dy = (self.y_max - self.y_min).max(1e-3) * fraction;
        self.x_min -= dx;
        self.x_max += dx;
        self.y_min -= dy;
        self.y_max += dy;
    }
}

/// Per-row footprint colored by filter, used by both plot entry points.
fn table_series(
    table: &ObservationTable,
    palette: &FilterPalette,
    bounds: &mut Bounds,
) -> Result<Vec<(Vec<(f64, f64)>, RGBColor)>, HsaError> {
    let mut filters: Vec<String> = Vec::new();
    for row in table.rows() {
        let filter = row.filter()?.to_string();
        if !filters.contains(&filter) {
            filters.push(filter);
        }
    }
    filters.sort_unstable();

    let mut series = Vec::new();
    for row in table.rows() {
        let filter = row.filter()?;
        let index = filters.iter().position(|f| f == filter).unwrap_or(0);
        let color = palette.color_for(filter, index);
        for part in parse_polygons(row.footprint()?)? {
            let mut points = Vec::new();
            for coord in &part.exterior().0 {
                bounds.include(coord.x, coord.y);
                points.push((coord.x, coord.y));
            }
            series.push((points, color));
        }
    }
    Ok(series)
}

fn shape_rings(shape: &MultiPolygon<f64>, bounds: &mut Bounds) -> Vec<Vec<(f64, f64)>> {
    let mut rings = Vec::new();
    for polygon in shape.iter() {
        let mut points = Vec::new();
        for coord in &polygon.exterior().0 {
            bounds.include(coord.x, coord.y);
            points.push((coord.x, coord.y));
        }
        rings.push(points);
    }
    rings
}

fn plot_err<E: std::fmt::Display>(err: E) -> HsaError {
    HsaError::Plot(err.to_string())
}

/// Render all footprints of a cluster, its boundary, and the secondary
/// query-box center. RA increases leftward, and the bitmap aspect follows
/// the cos(dec)-corrected sky aspect.
#[allow(clippy::too_many_arguments)]
pub fn render_cluster_plot(
    path: &Path,
    primary: &ObservationTable,
    secondary: &ObservationTable,
    cluster_shape: &MultiPolygon<f64>,
    center: (f64, f64),
    title: &str,
    palette: &FilterPalette,
) -> Result<(), HsaError> {
    let mut bounds = Bounds::new();
    let primary_series = table_series(primary, palette, &mut bounds)?;
    let secondary_series = table_series(secondary, palette, &mut bounds)?;
    let rings = shape_rings(cluster_shape, &mut bounds);
    bounds.include(center.0, center.1);
    bounds.pad(0.05);

    draw(
        path,
        &bounds,
        title,
        &[&primary_series, &secondary_series],
        &rings,
        Some(center),
    )
}

/// Standalone footprint plot of any query result table.
pub fn render_table_plot(
    path: &Path,
    table: &ObservationTable,
    title: &str,
    palette: &FilterPalette,
) -> Result<(), HsaError> {
    let mut bounds = Bounds::new();
    let series = table_series(table, palette, &mut bounds)?;
    bounds.pad(0.05);
    draw(path, &bounds, title, &[&series], &[], None)
}

fn draw(
    path: &Path,
    bounds: &Bounds,
    title: &str,
    series_groups: &[&[(Vec<(f64, f64)>, RGBColor)]],
    rings: &[Vec<(f64, f64)>],
    center: Option<(f64, f64)>,
) -> Result<(), HsaError> {
    let dx = (bounds.x_max - bounds.x_min) * bounds.y_min.to_radians().cos();
    let dy = bounds.y_max - bounds.y_min;
    let width = 800u32;
    let height = ((width as f64 * dy / dx.max(1e-6)) as u32).clamp(200, 2400);

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    // negate RA so it increases leftward; ticks are relabeled back
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-bounds.x_max..-bounds.x_min, bounds.y_min..bounds.y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("RA (deg)")
        .y_desc("Dec (deg)")
        .x_label_formatter(&|value| format!("{:.3}", -value))
        .draw()
        .map_err(plot_err)?;

    for ring in rings {
        let flipped: Vec<(f64, f64)> = ring.iter().map(|&(x, y)| (-x, y)).collect();
        chart
            .draw_series(std::iter::once(plotters::element::Polygon::new(
                flipped.clone(),
                BLUE.mix(0.1).filled(),
            )))
            .map_err(plot_err)?;
        chart
            .draw_series(std::iter::once(PathElement::new(flipped, &BLUE)))
            .map_err(plot_err)?;
    }

    for group in series_groups {
        for (points, color) in group.iter() {
            let flipped: Vec<(f64, f64)> = points.iter().map(|&(x, y)| (-x, y)).collect();
            chart
                .draw_series(std::iter::once(PathElement::new(
                    flipped,
                    color.mix(0.4).stroke_width(1),
                )))
                .map_err(plot_err)?;
        }
    }

    if let Some((ra, dec)) = center {
        chart
            .draw_series(std::iter::once(Cross::new((-ra, dec), 6, &BLACK)))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}
