//! Chart Planner
//!
//! Asks the model for a small chart specification (type, axes, aggregation)
//! over a successful result set and renders it to a Plotly-style figure.
//! One attempt only: any failure means "no chart", never a failed answer.

use crate::agent_prompts::build_chart_prompt;
use crate::extraction::normalize::fold_text;
use crate::llm::{CompletionClient, CompletionConfig};
use crate::plan_parser::{parse_query_plan, QueryPlan};
use crate::sql_engine::ResultSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

static NULL: Value = Value::Null;

const CHART_KEYWORDS: &[&str] = &[
    "chart", "graph", "plot", "visualiz", "visualis", "histogram", "pie", "trend",
    "grafico", "plote", "plotar", "pizza", "barras", "linha do tempo", "evolucao",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
    Pie,
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartType::Bar => write!(f, "bar"),
            ChartType::Line => write!(f, "line"),
            ChartType::Scatter => write!(f, "scatter"),
            ChartType::Pie => write!(f, "pie"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    None,
    Sum,
    #[serde(alias = "mean", alias = "average")]
    Avg,
    Count,
    Min,
    Max,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::None => write!(f, "none"),
            Aggregation::Sum => write!(f, "sum"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(alias = "type")]
    pub chart_type: ChartType,

    /// Column used for categories / the horizontal axis
    pub x: String,

    /// Column holding the values; optional for `count`
    #[serde(default)]
    pub y: Option<String>,

    #[serde(default)]
    pub aggregation: Aggregation,

    #[serde(default)]
    pub title: Option<String>,
}

impl ChartSpec {
    /// Check the chart only references columns the result actually has.
    pub fn validate(&self, result: &ResultSet) -> std::result::Result<(), String> {
        if result.column_index(&self.x).is_none() {
            return Err(format!("x column '{}' is not in the result", self.x));
        }
        match (&self.y, self.aggregation) {
            (Some(y), _) if result.column_index(y).is_none() => {
                Err(format!("y column '{}' is not in the result", y))
            }
            (None, Aggregation::Count) => Ok(()),
            (None, _) => Err("a y column is required unless aggregation is count".to_string()),
            _ => Ok(()),
        }
    }

    /// Render to `{"data": [...], "layout": {...}}`.
    pub fn render(&self, result: &ResultSet) -> std::result::Result<Value, String> {
        self.validate(result)?;

        let (xs, ys) = self.series(result);
        let y_label = match (&self.y, self.aggregation) {
            (Some(y), Aggregation::None) => y.clone(),
            (Some(y), agg) => format!("{}({})", agg, y),
            (None, _) => "count".to_string(),
        };
        let title = self
            .title
            .clone()
            .unwrap_or_else(|| format!("{} by {}", y_label, self.x));

        let mut trace = json!({
            "type": match self.chart_type {
                ChartType::Bar => "bar",
                ChartType::Pie => "pie",
                ChartType::Line | ChartType::Scatter => "scatter",
            },
            "x": xs,
            "y": ys,
            "name": y_label,
        });
        match self.chart_type {
            ChartType::Line => trace["mode"] = json!("lines+markers"),
            ChartType::Scatter => trace["mode"] = json!("markers"),
            ChartType::Pie => {
                trace["labels"] = trace["x"].clone();
                trace["values"] = trace["y"].clone();
            }
            ChartType::Bar => {}
        }

        Ok(json!({
            "data": [trace],
            "layout": {
                "title": title,
                "xaxis": {"title": self.x},
                "yaxis": {"title": y_label},
            }
        }))
    }

    fn series(&self, result: &ResultSet) -> (Vec<Value>, Vec<Value>) {
        let x_values = result.column_values(&self.x).unwrap_or_default();
        let y_values = self
            .y
            .as_deref()
            .and_then(|y| result.column_values(y))
            .unwrap_or_else(|| vec![&NULL; x_values.len()]);

        if self.aggregation == Aggregation::None {
            return (
                x_values.into_iter().cloned().collect(),
                y_values.into_iter().cloned().collect(),
            );
        }

        // Group by x, keeping first-appearance order.
        let mut keys: Vec<Value> = Vec::new();
        let mut groups: Vec<Vec<Option<f64>>> = Vec::new();
        for (x, y) in x_values.into_iter().zip(y_values) {
            let idx = match keys.iter().position(|k| k == x) {
                Some(idx) => idx,
                None => {
                    keys.push(x.clone());
                    groups.push(Vec::new());
                    keys.len() - 1
                }
            };
            groups[idx].push(as_number(y));
        }

        let ys = groups
            .iter()
            .map(|values| {
                let numbers: Vec<f64> = values.iter().flatten().copied().collect();
                let aggregated = match self.aggregation {
                    Aggregation::Count => Some(values.len() as f64),
                    Aggregation::Sum => Some(numbers.iter().sum()),
                    Aggregation::Avg if !numbers.is_empty() => {
                        Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
                    }
                    Aggregation::Min => numbers.iter().copied().reduce(f64::min),
                    Aggregation::Max => numbers.iter().copied().reduce(f64::max),
                    _ => None,
                };
                aggregated.map(|v| json!(v)).unwrap_or(Value::Null)
            })
            .collect();

        (keys, ys)
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether a question asks for a visualization. Keywords match at word
/// starts, so "plotting" counts and "copies" does not.
pub fn wants_chart(question: &str) -> bool {
    let folded = fold_text(question);
    let words: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    CHART_KEYWORDS.iter().any(|keyword| {
        let parts: Vec<&str> = keyword.split(' ').collect();
        words
            .windows(parts.len())
            .any(|window| window.iter().zip(&parts).all(|(word, part)| word.starts_with(part)))
    })
}

pub struct ChartPlanner {
    completion: Arc<dyn CompletionClient>,
    completion_config: CompletionConfig,
    timeout: Duration,
    sample_rows: usize,
}

impl ChartPlanner {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        completion_config: CompletionConfig,
        timeout: Duration,
        sample_rows: usize,
    ) -> Self {
        Self {
            completion,
            completion_config,
            timeout,
            sample_rows,
        }
    }

    /// A chart needs at least one row and one column.
    pub fn can_plan(result: &ResultSet) -> bool {
        !result.is_empty() && !result.columns.is_empty()
    }

    /// Single attempt. Returns `None` on any failure.
    pub async fn plan(
        &self,
        question: &str,
        result: &ResultSet,
        cancel: &CancellationToken,
    ) -> Option<ChartSpec> {
        if !Self::can_plan(result) {
            return None;
        }

        let prompt = build_chart_prompt(question, result, self.sample_rows);
        let call = tokio::time::timeout(
            self.timeout,
            self.completion.complete(&prompt, &self.completion_config),
        );
        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Chart planning cancelled");
                return None;
            }
            outcome = call => match outcome {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    warn!("Chart planning skipped: {}", e);
                    return None;
                }
                Err(_) => {
                    warn!("Chart planning skipped: completion timed out");
                    return None;
                }
            }
        };

        let spec = match parse_query_plan(&raw) {
            Ok(QueryPlan::ChartSpec(spec)) => spec,
            Ok(other) => {
                warn!("Chart planning skipped: model returned a {} plan", other.kind());
                return None;
            }
            Err(e) => {
                warn!("Chart planning skipped: {}", e);
                return None;
            }
        };

        match spec.validate(result) {
            Ok(()) => {
                info!("✅ Planned {} chart of {}", spec.chart_type, spec.x);
                Some(spec)
            }
            Err(reason) => {
                warn!("Chart planning skipped: {}", reason);
                None
            }
        }
    }
}
