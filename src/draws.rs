//! Module for visualizing cumulative performance.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use plotters::backend::{BitMapBackend, DrawingBackend, SVGBackend};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::WHITE;

use crate::errors::{Error, Result};
use crate::performance::PerformanceTable;

/// Aspect ratio for the generated charts.
const ASPECT_RATIO: f64 = 0.5625;
/// Size of the X-axis labels.
const X_LABEL_SIZE: i32 = 20;
/// Size of the Y-axis labels.
const Y_LABEL_SIZE: i32 = 20;

/// Output formats for the generated charts with output filename.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOutput {
    /// Save to the output SVG file.
    Svg(PathBuf),
    /// Save to the output PNG file.
    Png(PathBuf),
}

impl DrawOutput {
    /// Picks the format from the file extension, SVG unless it is `.png`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("png") => Self::Png(path),
            _ => Self::Svg(path),
        }
    }
}

impl Default for DrawOutput {
    fn default() -> Self {
        Self::Svg(PathBuf::from("performance.svg"))
    }
}

/// Configuration options for chart generation.
#[derive(Debug, Clone, Default)]
pub struct DrawOptions {
    /// Chart title.
    title: Option<String>,
    /// Output format and path.
    output: DrawOutput,
    /// Value unit of the Y axis; pnl is divided by it.
    unit: Option<(String, f64)>,
}

impl DrawOptions {
    /// Sets the chart title.
    pub fn title(mut self, title: impl ToString) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Sets the output format and path.
    pub fn draw_output(mut self, output: DrawOutput) -> Self {
        self.output = output;
        self
    }

    /// Plots pnl in pips instead of price units.
    pub fn in_pips(mut self, pip_size: f64) -> Self {
        self.unit = Some(("Pips".to_string(), pip_size));
        self
    }
}

/// Line chart of every cumulative column of a [`PerformanceTable`].
#[derive(Debug)]
pub struct Draw<'d> {
    /// Reference to the performance table.
    table: &'d PerformanceTable,
    /// Drawing options.
    options: DrawOptions,
}

impl<'d> From<&'d PerformanceTable> for Draw<'d> {
    fn from(table: &'d PerformanceTable) -> Self {
        Self::with_table(table)
    }
}

impl<'d> Draw<'d> {
    /// Creates a new `Draw` instance with the given table.
    pub fn with_table(table: &'d PerformanceTable) -> Self {
        Self {
            table,
            options: DrawOptions::default(),
        }
    }

    /// Sets the drawing options.
    pub fn with_options(mut self, options: DrawOptions) -> Self {
        self.options = options;
        self
    }

    /// Generates and saves the chart based on the configured options.
    pub fn plot(&self) -> Result<()> {
        let series = self.series()?;
        let title = self.options.title.as_deref().unwrap_or("Cumulative PnL");

        let width = 1280.max(10 * self.table.dates().len() as u32);
        let height = ((width as f64 * ASPECT_RATIO) as u32).min(900);

        match &self.options.output {
            DrawOutput::Svg(path) => {
                let root = SVGBackend::new(path, (width, height)).into_drawing_area();
                root.fill(&WHITE).map_err(|e| Error::Plotters(e.to_string()))?;
                self.draw_chart(&root, &series, title)
            }
            DrawOutput::Png(path) => {
                let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
                root.fill(&WHITE).map_err(|e| Error::Plotters(e.to_string()))?;
                self.draw_chart(&root, &series, title)
            }
        }?;

        tracing::info!(output = ?self.options.output, columns = series.len(), "chart saved");
        Ok(())
    }

    /// Cumulative columns as time series, scaled to the chart unit.
    fn series(&self) -> Result<Vec<(&'d str, Vec<(DateTime<Utc>, f64)>)>> {
        let dates = self.table.dates();
        if dates.is_empty() || self.table.columns().is_empty() {
            return Err(Error::Msg("Nothing to plot: the performance table is empty".to_string()));
        }
        let scale = self.options.unit.as_ref().map_or(1.0, |(_, size)| *size);
        let table: &'d PerformanceTable = self.table;

        Ok(table
            .columns()
            .iter()
            .map(|column| {
                let points = dates
                    .iter()
                    .zip(&column.cumulative)
                    .map(|(date, value)| (day_start(*date), value / scale))
                    .collect();
                (column.label.as_str(), points)
            })
            .collect())
    }

    /// Draws every series with its legend.
    fn draw_chart<DB: DrawingBackend>(
        &self,
        drawing_area: &DrawingArea<DB, Shift>,
        series: &[(&str, Vec<(DateTime<Utc>, f64)>)],
        title: &str,
    ) -> Result<()> {
        let (first_time, last_time, min_value, max_value) = bounds(series).ok_or(Error::Msg("Nothing to plot".to_string()))?;
        let padding = ((max_value - min_value) * 0.1).max(f64::EPSILON);

        let drawing_area = drawing_area.margin(10, 10, 70, 70);
        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(title, ("sans-serif", 30).into_font())
            .x_label_area_size(X_LABEL_SIZE)
            .y_label_area_size(Y_LABEL_SIZE)
            .build_cartesian_2d(first_time..last_time, min_value - padding..max_value + padding)
            .map_err(|e| Error::Plotters(e.to_string()))?;

        let y_desc = self.options.unit.as_ref().map_or("PnL", |(unit, _)| unit.as_str());
        chart
            .configure_mesh()
            .x_desc("Date")
            .y_desc(y_desc)
            .x_label_style(("sans-serif", X_LABEL_SIZE))
            .y_label_style(("sans-serif", Y_LABEL_SIZE))
            .x_labels(10)
            .y_labels(5)
            .draw()
            .map_err(|e| Error::Plotters(e.to_string()))?;

        for (idx, (label, points)) in series.iter().enumerate() {
            let color = Palette99::pick(idx).to_rgba();
            chart
                .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
                .map_err(|e| Error::Plotters(e.to_string()))?
                .label(*label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .position(SeriesLabelPosition::UpperLeft)
            .draw()
            .map_err(|e| Error::Plotters(e.to_string()))?;

        drawing_area.present().map_err(|e| Error::Plotters(e.to_string()))
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Time span and value range covered by the series.
fn bounds(series: &[(&str, Vec<(DateTime<Utc>, f64)>)]) -> Option<(DateTime<Utc>, DateTime<Utc>, f64, f64)> {
    let points = series.iter().flat_map(|(_, points)| points.iter());
    let first_time = points.clone().map(|(time, _)| *time).min()?;
    let last_time = points.clone().map(|(time, _)| *time).max()?;
    let min_value = points.clone().map(|(_, v)| *v).fold(0.0, f64::min);
    let max_value = points.map(|(_, v)| *v).fold(0.0, f64::max);
    // a single day still needs a non-empty axis
    let last_time = if last_time == first_time {
        last_time + chrono::Duration::days(1)
    } else {
        last_time
    };
    Some((first_time, last_time, min_value, max_value))
}

#[cfg(test)]
fn table() -> PerformanceTable {
    use crate::engine::{Order, OrderSide};
    use crate::performance::GroupBy;
    use chrono::TimeZone;

    let time = |day| Utc.with_ymd_and_hms(2020, 3, day, 8, 0, 0).unwrap();
    let mut win = Order::new(time(2), OrderSide::Long, 1.1000, 1.0950, 1.1050).unwrap();
    win.fill(time(2)).unwrap();
    win.close(time(2), 1.1050).unwrap();
    let mut loss = Order::new(time(3), OrderSide::Long, 1.1000, 1.0950, 1.1050).unwrap();
    loss.fill(time(3)).unwrap();
    loss.close(time(4), 1.0950).unwrap();

    let orders = [win, loss];
    PerformanceTable::from_runs([("0", orders.iter())], GroupBy::OrderDate)
}

#[cfg(test)]
#[test]
fn series_in_pips() {
    let table = table();
    let draw = Draw::from(&table).with_options(DrawOptions::default().in_pips(0.0001));
    let series = draw.series().unwrap();

    assert_eq!(series.len(), 1);
    assert_eq!(series[0].0, "0");
    let values = series[0].1.iter().map(|(_, v)| v.round()).collect::<Vec<_>>();
    assert_eq!(values, vec![50.0, 0.0]);

    let (first, last, min, max) = bounds(&series).unwrap();
    assert!(first < last);
    assert!(min.abs() < 1e-9);
    assert!(max > 49.0);
}

#[cfg(test)]
#[test]
fn output_from_extension() {
    assert_eq!(DrawOutput::from_path("out.PNG"), DrawOutput::Png("out.PNG".into()));
    assert_eq!(DrawOutput::from_path("out.svg"), DrawOutput::Svg("out.svg".into()));
    assert_eq!(DrawOutput::from_path("out"), DrawOutput::Svg("out".into()));
}

#[cfg(test)]
#[test]
fn empty_table_is_an_error() {
    let orders: Vec<crate::engine::Order> = Vec::new();
    let table = PerformanceTable::from_runs([("0", orders.iter())], crate::performance::GroupBy::CloseDate);
    assert!(Draw::from(&table).series().is_err());
}
