//! Visualization builder: time-animated scatter of the enriched table as a
//! self-contained Plotly HTML page.
//!
//! One animation frame per date. Position is (`d1`, `d2`), color is the
//! day's return, marker shape is the sector, hover text is the security
//! name. The slider opens on the most recent frame and both axes are hidden.

use chrono::NaiveDateTime;
use corrlab_core::domain::Granularity;
use corrlab_core::enrich::{frame_timestamps, EnrichedRow};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use thiserror::Error;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const FIGURE_SIZE: u32 = 1000;
const NO_SECTOR: &str = "(no sector)";

/// Marker shapes assigned to sectors in sorted sector order.
const SYMBOL_SEQUENCE: [&str; 20] = [
    "circle",
    "square",
    "diamond",
    "cross",
    "x",
    "triangle-up",
    "triangle-down",
    "triangle-left",
    "triangle-right",
    "pentagon",
    "hexagon",
    "octagon",
    "star",
    "hexagram",
    "star-triangle-up",
    "star-square",
    "diamond-tall",
    "hourglass",
    "bowtie",
    "asterisk",
];

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("nothing to plot: the enriched table is empty")]
    Empty,

    #[error("failed to serialize figure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Continuous color scale anchored on the return distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
    /// `(position in [0, 1], color)`, non-decreasing positions.
    pub stops: Vec<(f64, &'static str)>,
}

impl ColorScale {
    /// Dark red at the minimum, orange and salmon at the 2/3 and 8/9
    /// quantiles of the negative returns, grey at zero, green-yellow and
    /// lawn green at the 1/9 and 1/3 quantiles of the non-negative returns,
    /// dark green at the maximum.
    pub fn from_returns(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);
        let (&min, &max) = (sorted.first()?, sorted.last()?);
        if max <= min {
            return Some(Self {
                min,
                max,
                stops: vec![(0.0, "grey"), (1.0, "grey")],
            });
        }

        let split = sorted.partition_point(|v| *v < 0.0);
        let (neg, pos) = sorted.split_at(split);
        let norm = |v: f64| ((v - min) / (max - min)).clamp(0.0, 1.0);

        let mut stops = vec![(0.0, "darkred")];
        if let Some(q) = quantile(neg, 2.0 / 3.0) {
            stops.push((norm(q), "darkorange"));
        }
        if let Some(q) = quantile(neg, 8.0 / 9.0) {
            stops.push((norm(q), "LightSalmon"));
        }
        stops.push((norm(0.0), "grey"));
        if let Some(q) = quantile(pos, 1.0 / 9.0) {
            stops.push((norm(q), "GreenYellow"));
        }
        if let Some(q) = quantile(pos, 1.0 / 3.0) {
            stops.push((norm(q), "lawngreen"));
        }
        stops.push((1.0, "darkgreen"));

        // Plotly rejects decreasing stop positions.
        let mut floor = 0.0;
        for stop in &mut stops {
            stop.0 = stop.0.max(floor);
            floor = stop.0;
        }

        Some(Self { min, max, stops })
    }

    fn to_json(&self) -> Value {
        Value::Array(
            self.stops
                .iter()
                .map(|(p, c)| json!([p, c]))
                .collect(),
        )
    }
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn sector_of(row: &EnrichedRow) -> &str {
    row.sector.as_deref().unwrap_or(NO_SECTOR)
}

/// One trace per sector for the rows at `ts`; every frame carries every
/// sector so traces line up across frames.
fn frame_traces(rows: &[EnrichedRow], sectors: &[&str], ts: NaiveDateTime) -> Vec<Value> {
    sectors
        .iter()
        .enumerate()
        .map(|(k, sector)| {
            let members: Vec<&EnrichedRow> = rows
                .iter()
                .filter(|r| r.timestamp == ts && sector_of(r) == *sector)
                .collect();
            json!({
                "type": "scatter",
                "mode": "markers",
                "name": sector,
                "legendgroup": sector,
                "showlegend": true,
                "x": members.iter().map(|r| r.d1).collect::<Vec<_>>(),
                "y": members.iter().map(|r| r.d2).collect::<Vec<_>>(),
                "ids": members.iter().map(|r| r.symbol.as_str()).collect::<Vec<_>>(),
                "hovertext": members
                    .iter()
                    .map(|r| r.name.as_deref().unwrap_or(&r.symbol))
                    .collect::<Vec<_>>(),
                "customdata": members.iter().map(|r| r.symbol.as_str()).collect::<Vec<_>>(),
                "hovertemplate": "<b>%{hovertext}</b> (%{customdata})<br>Return=%{marker.color:.2%}<extra></extra>",
                "marker": {
                    "symbol": SYMBOL_SEQUENCE[k % SYMBOL_SEQUENCE.len()],
                    "color": members.iter().map(|r| r.value).collect::<Vec<_>>(),
                    "coloraxis": "coloraxis",
                },
            })
        })
        .collect()
}

/// Build the Plotly figure (`data`, `layout`, `frames`).
pub fn build_figure(rows: &[EnrichedRow], title: &str) -> Result<Value, PlotError> {
    let dates = frame_timestamps(rows);
    let last = *dates.last().ok_or(PlotError::Empty)?;

    let sectors: Vec<&str> = rows
        .iter()
        .map(sector_of)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let returns: Vec<f64> = rows.iter().map(|r| r.value).collect();
    let scale = ColorScale::from_returns(&returns).ok_or(PlotError::Empty)?;

    let label = |ts: NaiveDateTime| Granularity::Daily.format_timestamp(ts);
    let frames: Vec<Value> = dates
        .iter()
        .map(|ts| {
            json!({
                "name": label(*ts),
                "data": frame_traces(rows, &sectors, *ts),
            })
        })
        .collect();

    let steps: Vec<Value> = dates
        .iter()
        .map(|ts| {
            json!({
                "label": label(*ts),
                "method": "animate",
                "args": [[label(*ts)], {
                    "mode": "immediate",
                    "frame": {"duration": 0, "redraw": true},
                    "transition": {"duration": 0},
                }],
            })
        })
        .collect();

    let layout = json!({
        "title": {"text": title},
        "width": FIGURE_SIZE,
        "height": FIGURE_SIZE,
        "xaxis": {"visible": false},
        "yaxis": {"visible": false},
        "legend": {"title": {"text": "GICS Sector"}},
        "coloraxis": {
            "colorscale": scale.to_json(),
            "cmin": scale.min,
            "cmax": scale.max,
            "colorbar": {"title": {"text": "Return"}, "x": -0.15},
        },
        "sliders": [{
            "active": dates.len() - 1,
            "currentvalue": {"prefix": "Date="},
            "steps": steps,
        }],
        "updatemenus": [{
            "type": "buttons",
            "showactive": false,
            "buttons": [
                {
                    "label": "▶",
                    "method": "animate",
                    "args": [null, {"frame": {"duration": 500, "redraw": true}, "fromcurrent": true}],
                },
                {
                    "label": "◼",
                    "method": "animate",
                    "args": [[null], {"mode": "immediate", "frame": {"duration": 0, "redraw": true}}],
                },
            ],
        }],
    });

    Ok(json!({
        "data": frame_traces(rows, &sectors, last),
        "layout": layout,
        "frames": frames,
    }))
}

/// Standalone HTML page for the figure.
pub fn render_html(rows: &[EnrichedRow], title: &str) -> Result<String, PlotError> {
    let figure = build_figure(rows, title)?;
    // `</script>` inside a string would end the script block early.
    let figure_json = serde_json::to_string(&figure)?.replace("</", "<\\/");
    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{PLOTLY_CDN}"></script>
</head>
<body>
<div id="plot"></div>
<script>
const figure = {figure_json};
Plotly.newPlot("plot", figure.data, figure.layout).then(function () {{
  Plotly.addFrames("plot", figure.frames);
}});
</script>
</body>
</html>
"#,
        title = html_escape(title),
    ))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
