//! Built-in analyst tools.
//!
//! The handlers here only shape arguments and results. Data access goes through
//! [`QueryBackend`] and image rendering through [`ChartRenderer`]; deployments plug
//! in real collaborators, the server defaults to the `Unconfigured*` ones.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{Attachment, ToolArguments};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::schema::{ParamKind, ToolSpec};
use crate::tools::{RegistryError, ToolFailure, ToolHandler, ToolOutput, ToolRegistry};

pub const MAX_TABLE_ROWS: usize = 1000;

const READ_ONLY_VIOLATIONS: &[&str] = &[
    "insert", "update", "delete", "merge", "drop", "alter", "create", "truncate", "grant",
    "revoke", "call", "execute",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn run_query(&self, sql: &str) -> Result<QueryRows, ToolFailure>;

    /// Non-null values of `column` in `table`, used for fuzzy name resolution.
    async fn distinct_values(&self, column: &str, table: &str) -> Result<Vec<String>, ToolFailure>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    BarChart,
    PieChart,
    LineChart,
    AreaChart,
    MultiLineChart,
    StackedAreaChart,
}

impl ChartKind {
    pub const ALL: [ChartKind; 6] = [
        Self::BarChart,
        Self::PieChart,
        Self::LineChart,
        Self::AreaChart,
        Self::MultiLineChart,
        Self::StackedAreaChart,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BarChart => "bar_chart",
            Self::PieChart => "pie_chart",
            Self::LineChart => "line_chart",
            Self::AreaChart => "area_chart",
            Self::MultiLineChart => "multi_line_chart",
            Self::StackedAreaChart => "stacked_area_chart",
        }
    }

    fn tool_name(self) -> &'static str {
        match self {
            Self::BarChart => "create_bar_chart",
            Self::PieChart => "create_pie_chart",
            Self::LineChart => "create_single_line_graph",
            Self::AreaChart => "create_single_area_chart",
            Self::MultiLineChart => "create_multiple_line_graph",
            Self::StackedAreaChart => "create_stacked_area_chart",
        }
    }

    /// Multi-series kinds carry their data in [`ChartRequest::series`].
    pub fn is_multi_series(self) -> bool {
        matches!(self, Self::MultiLineChart | Self::StackedAreaChart)
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Palette {
    Categorical,
    Sequential,
    Diverging,
}

impl Palette {
    const NAMES: [&'static str; 3] = ["CATEGORICAL", "SEQUENTIAL", "DIVERGING"];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueFormat {
    Number,
    Currency,
    Percentage,
}

impl ValueFormat {
    const NAMES: [&'static str; 3] = ["NUMBER", "CURRENCY", "PERCENTAGE"];
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<ChartPoint>,
}

/// A validated chart ready for rendering. Single-series kinds fill `points` and
/// leave `series` empty; multi-series kinds do the opposite.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartRequest {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub palette: Palette,
    pub value_format: ValueFormat,
    pub points: Vec<ChartPoint>,
    pub series: Vec<ChartSeries>,
    pub explode_largest: bool,
}

impl ChartRequest {
    pub fn point_count(&self) -> usize {
        self.points.len() + self.series.iter().map(|series| series.points.len()).sum::<usize>()
    }
}

#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Returns PNG bytes.
    async fn render(&self, request: &ChartRequest) -> Result<Vec<u8>, ToolFailure>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredQueryBackend;

#[async_trait]
impl QueryBackend for UnconfiguredQueryBackend {
    async fn run_query(&self, _sql: &str) -> Result<QueryRows, ToolFailure> {
        Err(ToolFailure::Unavailable("no query backend is configured".to_string()))
    }

    async fn distinct_values(
        &self,
        _column: &str,
        _table: &str,
    ) -> Result<Vec<String>, ToolFailure> {
        Err(ToolFailure::Unavailable("no query backend is configured".to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredChartRenderer;

#[async_trait]
impl ChartRenderer for UnconfiguredChartRenderer {
    async fn render(&self, _request: &ChartRequest) -> Result<Vec<u8>, ToolFailure> {
        Err(ToolFailure::Unavailable("no chart renderer is configured".to_string()))
    }
}

pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    backend: Arc<dyn QueryBackend>,
    renderer: Arc<dyn ChartRenderer>,
) -> Result<(), RegistryError> {
    registry.register(sql_query_spec(), SqlQueryTool { backend: Arc::clone(&backend) })?;
    registry.register(resolve_name_spec(), ResolveNameTool { backend })?;
    for kind in ChartKind::ALL {
        registry.register(chart_spec(kind), ChartTool { kind, renderer: Arc::clone(&renderer) })?;
    }
    Ok(())
}

fn sql_query_spec() -> ToolSpec {
    ToolSpec::new(
        "execute_sql_query",
        "Runs a read-only SQL query against the analytics warehouse and returns the rows \
         as a Markdown table prefixed by the explanation.",
    )
    .required("sql_query", ParamKind::String, "A single SELECT statement ending in LIMIT 15")
    .required("explanation", ParamKind::String, "One sentence describing what the query answers")
}

fn resolve_name_spec() -> ToolSpec {
    ToolSpec::new(
        "resolve_name",
        "Finds the stored spelling of a name the user typed by fuzzy-matching it against \
         the distinct values of a column. Call this before filtering on any name.",
    )
    .required("user_input", ParamKind::String, "The name as the user wrote it")
    .required("column", ParamKind::String, "Column holding the names")
    .required("table", ParamKind::String, "Fully qualified table name")
}

const TIME_LABELS: &str = "Time labels must already be formatted: months as Jan'24, \
                           quarters as Q1,23, years as 2023.";

fn chart_spec(kind: ChartKind) -> ToolSpec {
    let palette = ParamKind::one_of(Palette::NAMES);
    let value_format = ParamKind::one_of(ValueFormat::NAMES);
    let spec = match kind {
        ChartKind::BarChart => ToolSpec::new(
            kind.tool_name(),
            format!("Renders a bar chart of one value per category. {TIME_LABELS}"),
        )
        .required("categories", ParamKind::array_of(ParamKind::String), "X-axis category labels")
        .required(
            "values",
            ParamKind::array_of(ParamKind::Number),
            "Non-negative value per category, same length as categories",
        ),
        ChartKind::PieChart => ToolSpec::new(
            kind.tool_name(),
            "Renders a pie chart showing each slice's share of the total.",
        )
        .required(
            "data",
            ParamKind::array_of(ParamKind::Object),
            "Slices as objects with `label` and a positive `value`",
        ),
        ChartKind::LineChart | ChartKind::AreaChart => {
            let shape = if kind == ChartKind::LineChart { "line" } else { "filled area" };
            ToolSpec::new(
                kind.tool_name(),
                format!("Renders a {shape} chart of a trend over ordered points. {TIME_LABELS}"),
            )
            .required(
                "points",
                ParamKind::array_of(ParamKind::Object),
                "Ordered points as objects with `x` label and numeric `y`",
            )
        }
        ChartKind::MultiLineChart | ChartKind::StackedAreaChart => {
            let (shape, series_note) = if kind == ChartKind::MultiLineChart {
                ("several lines", "one line per series")
            } else {
                ("stacked filled areas", "every series must use the same x values in order")
            };
            ToolSpec::new(
                kind.tool_name(),
                format!("Renders {shape} to compare trends across series. {TIME_LABELS}"),
            )
            .required(
                "series",
                ParamKind::array_of(ParamKind::Object),
                format!(
                    "Series as objects with a unique `name` and ordered `points` of \
                     `{{x, y}}`; {series_note}"
                ),
            )
        }
    };

    let spec = spec.required("title", ParamKind::String, "Short chart title");
    let spec = match kind {
        ChartKind::PieChart => spec.optional(
            "explode_largest",
            ParamKind::Boolean,
            "Pull the largest slice out for emphasis",
        ),
        _ => spec
            .required("x_label", ParamKind::String, "X-axis label")
            .required("y_label", ParamKind::String, "Y-axis label, including the unit")
            .required("value_type", value_format, "How values are formatted"),
    };
    spec.required("palette_type", palette, "Color palette")
}

struct SqlQueryTool {
    backend: Arc<dyn QueryBackend>,
}

#[derive(Deserialize)]
struct SqlQueryArgs {
    sql_query: String,
    explanation: String,
}

#[async_trait]
impl ToolHandler for SqlQueryTool {
    async fn execute(&self, arguments: ToolArguments) -> Result<ToolOutput, ToolFailure> {
        let args: SqlQueryArgs = parse_arguments(arguments)?;
        ensure_read_only(&args.sql_query)?;

        let rows = self.backend.run_query(&args.sql_query).await?;
        info!(
            event_name = "agent.catalog.sql_query",
            rows = rows.rows.len(),
            columns = rows.columns.len(),
            "sql query completed"
        );
        let table = markdown_table(&rows);
        Ok(ToolOutput::new(Value::String(format!(
            "{}\n\n**Table Data:**\n\n{table}",
            args.explanation.trim()
        ))))
    }
}

/// Rejects anything that is not a single SELECT (or WITH ... SELECT) statement.
pub fn ensure_read_only(sql: &str) -> Result<(), ToolFailure> {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() {
        return Err(ToolFailure::InvalidInput("sql_query is empty".to_string()));
    }
    if statement.contains(';') {
        return Err(ToolFailure::InvalidInput(
            "only a single statement is allowed".to_string(),
        ));
    }

    let lowered = statement.to_ascii_lowercase();
    let mut words = lowered
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty());
    match words.next() {
        Some("select") | Some("with") => {}
        _ => {
            return Err(ToolFailure::InvalidInput(
                "only SELECT queries are allowed".to_string(),
            ))
        }
    }
    if let Some(keyword) = words.find(|word| READ_ONLY_VIOLATIONS.contains(word)) {
        return Err(ToolFailure::InvalidInput(format!(
            "query contains forbidden keyword `{}`",
            keyword.to_ascii_uppercase()
        )));
    }
    Ok(())
}

pub fn markdown_table(rows: &QueryRows) -> String {
    if rows.rows.is_empty() {
        return "| No Data | Query returned no results |\n| --- | --- |".to_string();
    }

    let mut lines = Vec::with_capacity(rows.rows.len().min(MAX_TABLE_ROWS) + 3);
    lines.push(format!("| {} |", rows.columns.join(" | ")));
    lines.push(format!("| {} |", vec!["---"; rows.columns.len()].join(" | ")));
    for row in rows.rows.iter().take(MAX_TABLE_ROWS) {
        let cells: Vec<String> = row.iter().map(table_cell).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }
    if rows.rows.len() > MAX_TABLE_ROWS {
        lines.push(format!(
            "| ... | (showing first {MAX_TABLE_ROWS} rows out of {} total) | ... |",
            rows.rows.len()
        ));
    }
    lines.join("\n")
}

fn table_cell(value: &Value) -> String {
    let text = match value {
        Value::Null => return "NULL".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    text.replace('|', "\\|")
}

struct ResolveNameTool {
    backend: Arc<dyn QueryBackend>,
}

#[derive(Deserialize)]
struct ResolveNameArgs {
    user_input: String,
    column: String,
    table: String,
}

#[async_trait]
impl ToolHandler for ResolveNameTool {
    async fn execute(&self, arguments: ToolArguments) -> Result<ToolOutput, ToolFailure> {
        let args: ResolveNameArgs = parse_arguments(arguments)?;
        ensure_identifier("column", &args.column)?;
        ensure_identifier("table", &args.table)?;

        let candidates = self.backend.distinct_values(&args.column, &args.table).await?;
        let best = best_match(&args.user_input, &candidates);
        info!(
            event_name = "agent.catalog.resolve_name",
            candidates = candidates.len(),
            matched = best.is_some(),
            "name resolution completed"
        );

        Ok(ToolOutput::new(match best {
            Some((name, score)) => json!({
                "user_input": args.user_input,
                "match": name,
                "score": score,
            }),
            None => json!({ "user_input": args.user_input, "match": Value::Null }),
        }))
    }
}

fn ensure_identifier(field: &str, value: &str) -> Result<(), ToolFailure> {
    let valid = !value.is_empty()
        && value.split('.').all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(ToolFailure::InvalidInput(format!("`{value}` is not a valid {field} identifier")))
    }
}

/// Lowercases and keeps ASCII letters only, so spacing and punctuation never affect matching.
pub fn normalize_name(value: &str) -> String {
    value.chars().filter(char::is_ascii_alphabetic).map(|c| c.to_ascii_lowercase()).collect()
}

/// Indel similarity in `0.0..=100.0`: twice the longest common subsequence over total length.
pub fn similarity(left: &str, right: &str) -> f64 {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    let total = left.len() + right.len();
    if total == 0 {
        return 100.0;
    }

    let mut previous = vec![0usize; right.len() + 1];
    for a in &left {
        let mut current = vec![0usize; right.len() + 1];
        for (j, b) in right.iter().enumerate() {
            current[j + 1] =
                if a == b { previous[j] + 1 } else { previous[j + 1].max(current[j]) };
        }
        previous = current;
    }
    let common = previous[right.len()];
    (2 * common) as f64 * 100.0 / total as f64
}

/// Best-scoring candidate by normalized similarity. Earlier candidates win ties.
pub fn best_match<'a>(input: &str, candidates: &'a [String]) -> Option<(&'a str, f64)> {
    let needle = normalize_name(input);
    candidates
        .iter()
        .filter_map(|candidate| {
            let normalized = normalize_name(candidate);
            (!normalized.is_empty())
                .then(|| (candidate.as_str(), similarity(&needle, &normalized)))
        })
        .fold(None, |best: Option<(&str, f64)>, (name, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((name, score)),
        })
}

struct ChartTool {
    kind: ChartKind,
    renderer: Arc<dyn ChartRenderer>,
}

#[derive(Deserialize)]
struct BarArgs {
    categories: Vec<String>,
    values: Vec<f64>,
    title: String,
    x_label: String,
    y_label: String,
    palette_type: Palette,
    value_type: ValueFormat,
}

#[derive(Deserialize)]
struct Slice {
    label: String,
    value: f64,
}

#[derive(Deserialize)]
struct PieArgs {
    data: Vec<Slice>,
    title: String,
    palette_type: Palette,
    #[serde(default)]
    explode_largest: bool,
}

#[derive(Deserialize)]
struct TrendPoint {
    x: Value,
    y: f64,
}

#[derive(Deserialize)]
struct SeriesArg {
    name: String,
    points: Vec<TrendPoint>,
}

#[derive(Deserialize)]
struct MultiTrendArgs {
    series: Vec<SeriesArg>,
    title: String,
    x_label: String,
    y_label: String,
    palette_type: Palette,
    value_type: ValueFormat,
}

#[derive(Deserialize)]
struct TrendArgs {
    points: Vec<TrendPoint>,
    title: String,
    x_label: String,
    y_label: String,
    palette_type: Palette,
    value_type: ValueFormat,
}

#[async_trait]
impl ToolHandler for ChartTool {
    async fn execute(&self, arguments: ToolArguments) -> Result<ToolOutput, ToolFailure> {
        let request = self.build_request(arguments)?;
        let image = self.renderer.render(&request).await?;
        info!(
            event_name = "agent.catalog.chart_rendered",
            chart_type = %request.kind,
            series = request.series.len(),
            points = request.point_count(),
            bytes = image.len(),
            "chart rendered"
        );

        let summary = json!({
            "chart_type": request.kind.as_str(),
            "title": request.title,
            "image": "generated successfully",
        });
        Ok(ToolOutput::new(summary).with_attachment(Attachment {
            file_name: format!("{}.png", request.kind),
            media_type: "image/png".to_string(),
            data: image,
        }))
    }
}

impl ChartTool {
    fn build_request(&self, arguments: ToolArguments) -> Result<ChartRequest, ToolFailure> {
        let request = match self.kind {
            ChartKind::BarChart => {
                let args: BarArgs = parse_arguments(arguments)?;
                if args.categories.len() != args.values.len() {
                    return Err(ToolFailure::InvalidInput(format!(
                        "categories has {} items but values has {}",
                        args.categories.len(),
                        args.values.len()
                    )));
                }
                if let Some(value) = args.values.iter().find(|value| **value < 0.0) {
                    return Err(ToolFailure::InvalidInput(format!(
                        "bar values must be non-negative, found {value}"
                    )));
                }
                let points = args
                    .categories
                    .into_iter()
                    .zip(args.values)
                    .map(|(label, value)| ChartPoint { label, value })
                    .collect();
                ChartRequest {
                    kind: self.kind,
                    title: args.title,
                    x_label: Some(args.x_label),
                    y_label: Some(args.y_label),
                    palette: args.palette_type,
                    value_format: args.value_type,
                    points,
                    series: Vec::new(),
                    explode_largest: false,
                }
            }
            ChartKind::PieChart => {
                let args: PieArgs = parse_arguments(arguments)?;
                if let Some(slice) = args.data.iter().find(|slice| slice.value <= 0.0) {
                    return Err(ToolFailure::InvalidInput(format!(
                        "pie values must be positive, found {} for `{}`",
                        slice.value, slice.label
                    )));
                }
                ChartRequest {
                    kind: self.kind,
                    title: args.title,
                    x_label: None,
                    y_label: None,
                    palette: args.palette_type,
                    value_format: ValueFormat::Number,
                    points: args
                        .data
                        .into_iter()
                        .map(|slice| ChartPoint { label: slice.label, value: slice.value })
                        .collect(),
                    series: Vec::new(),
                    explode_largest: args.explode_largest,
                }
            }
            ChartKind::LineChart | ChartKind::AreaChart => {
                let args: TrendArgs = parse_arguments(arguments)?;
                let points = args
                    .points
                    .into_iter()
                    .map(|point| ChartPoint { label: axis_label(point.x), value: point.y })
                    .collect();
                ChartRequest {
                    kind: self.kind,
                    title: args.title,
                    x_label: Some(args.x_label),
                    y_label: Some(args.y_label),
                    palette: args.palette_type,
                    value_format: args.value_type,
                    points,
                    series: Vec::new(),
                    explode_largest: false,
                }
            }
            ChartKind::MultiLineChart | ChartKind::StackedAreaChart => {
                let args: MultiTrendArgs = parse_arguments(arguments)?;
                let series = args
                    .series
                    .into_iter()
                    .map(|series| ChartSeries {
                        name: series.name,
                        points: series
                            .points
                            .into_iter()
                            .map(|point| ChartPoint { label: axis_label(point.x), value: point.y })
                            .collect(),
                    })
                    .collect();
                ChartRequest {
                    kind: self.kind,
                    title: args.title,
                    x_label: Some(args.x_label),
                    y_label: Some(args.y_label),
                    palette: args.palette_type,
                    value_format: args.value_type,
                    points: Vec::new(),
                    series,
                    explode_largest: false,
                }
            }
        };
        validate_chart(&request)?;
        Ok(request)
    }
}

fn axis_label(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn validate_chart(request: &ChartRequest) -> Result<(), ToolFailure> {
    let blank = |field: &str| ToolFailure::InvalidInput(format!("{field} cannot be empty"));
    if request.title.trim().is_empty() {
        return Err(blank("title"));
    }
    if request.x_label.as_deref().is_some_and(|label| label.trim().is_empty()) {
        return Err(blank("x_label"));
    }
    if request.y_label.as_deref().is_some_and(|label| label.trim().is_empty()) {
        return Err(blank("y_label"));
    }
    if !request.kind.is_multi_series() {
        return validate_points(&request.points, "");
    }

    if request.series.is_empty() {
        return Err(ToolFailure::InvalidInput("chart needs at least one series".to_string()));
    }
    let mut seen = HashSet::new();
    for series in &request.series {
        let name = series.name.trim();
        if name.is_empty() {
            return Err(blank("series name"));
        }
        if !seen.insert(name) {
            return Err(ToolFailure::InvalidInput(format!("series `{name}` appears twice")));
        }
        validate_points(&series.points, &format!("series `{name}`: "))?;
    }

    if request.kind == ChartKind::StackedAreaChart {
        let labels = |series: &ChartSeries| -> Vec<String> {
            series.points.iter().map(|point| point.label.trim().to_string()).collect()
        };
        let expected = labels(&request.series[0]);
        if let Some(series) = request.series.iter().find(|series| labels(series) != expected) {
            return Err(ToolFailure::InvalidInput(format!(
                "series `{}` must use the same x values as `{}`",
                series.name.trim(),
                request.series[0].name.trim()
            )));
        }
    }
    Ok(())
}

fn validate_points(points: &[ChartPoint], context: &str) -> Result<(), ToolFailure> {
    if points.is_empty() {
        return Err(ToolFailure::InvalidInput(format!(
            "{context}chart needs at least one data point"
        )));
    }
    for (index, point) in points.iter().enumerate() {
        if point.label.trim().is_empty() {
            return Err(ToolFailure::InvalidInput(format!(
                "{context}label at index {index} is empty"
            )));
        }
        if !point.value.is_finite() {
            return Err(ToolFailure::InvalidInput(format!(
                "{context}value at index {index} is not a finite number"
            )));
        }
    }
    Ok(())
}

fn parse_arguments<T: DeserializeOwned>(arguments: ToolArguments) -> Result<T, ToolFailure> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|error| ToolFailure::InvalidInput(error.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use parley_core::ToolArguments;
    use serde_json::{json, Value};

    use super::{
        best_match, ensure_read_only, markdown_table, normalize_name, register_builtin_tools,
        ChartKind, ChartRenderer, ChartRequest, Palette, QueryBackend, QueryRows,
        UnconfiguredChartRenderer, UnconfiguredQueryBackend, MAX_TABLE_ROWS,
    };
    use crate::tools::{ToolFailure, ToolOutput, ToolRegistry};

    #[derive(Default)]
    struct FakeWarehouse {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryBackend for FakeWarehouse {
        async fn run_query(&self, sql: &str) -> Result<QueryRows, ToolFailure> {
            self.queries
                .lock()
                .map_err(|_| ToolFailure::Backend("poisoned".into()))?
                .push(sql.into());
            Ok(QueryRows {
                columns: vec!["region".into(), "sales".into()],
                rows: vec![
                    vec![json!("North"), json!(120)],
                    vec![json!("South|East"), Value::Null],
                ],
            })
        }

        async fn distinct_values(
            &self,
            _column: &str,
            _table: &str,
        ) -> Result<Vec<String>, ToolFailure> {
            Ok(vec!["Jonathan Smith".into(), "Joanna Smythe".into(), "".into()])
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        requests: Mutex<Vec<ChartRequest>>,
    }

    #[async_trait]
    impl ChartRenderer for RecordingRenderer {
        async fn render(&self, request: &ChartRequest) -> Result<Vec<u8>, ToolFailure> {
            self.requests
                .lock()
                .map_err(|_| ToolFailure::Backend("poisoned".into()))?
                .push(request.clone());
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    fn args(value: Value) -> ToolArguments {
        match value {
            Value::Object(map) => map,
            _ => ToolArguments::new(),
        }
    }

    fn catalog(
        backend: Arc<FakeWarehouse>,
        renderer: Arc<RecordingRenderer>,
    ) -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        register_builtin_tools(&mut registry, backend, renderer).expect("catalog registers");
        registry
    }

    async fn run(
        registry: &ToolRegistry,
        name: &str,
        arguments: Value,
    ) -> Result<ToolOutput, ToolFailure> {
        let tool = registry.lookup(name).expect("tool registered");
        let validated = tool.spec.validate(&args(arguments)).expect("arguments validate");
        tool.handler.execute(validated).await
    }

    #[test]
    fn catalog_registers_every_builtin_with_a_schema() {
        let registry = catalog(Arc::default(), Arc::default());
        assert_eq!(
            registry.names(),
            vec![
                "execute_sql_query",
                "resolve_name",
                "create_bar_chart",
                "create_pie_chart",
                "create_single_line_graph",
                "create_single_area_chart",
                "create_multiple_line_graph",
                "create_stacked_area_chart",
            ]
        );
        for spec in registry.list_specs() {
            let schema = spec.to_json_schema();
            assert_eq!(schema["function"]["name"], json!(spec.name));
            assert_eq!(schema["function"]["parameters"]["additionalProperties"], json!(false));
        }
        let bar = registry.lookup("create_bar_chart").expect("bar chart");
        let palette = &bar.spec.to_json_schema()["function"]["parameters"]["properties"]
            ["palette_type"];
        assert_eq!(palette["enum"], json!(["CATEGORICAL", "SEQUENTIAL", "DIVERGING"]));
    }

    #[test]
    fn read_only_guard_accepts_selects_and_rejects_writes() {
        assert!(ensure_read_only("SELECT region, SUM(sales) FROM t GROUP BY 1 LIMIT 15").is_ok());
        assert!(ensure_read_only("with x as (select 1) select * from x").is_ok());
        assert!(ensure_read_only("select updated_at from t").is_ok());
        assert!(ensure_read_only("DELETE FROM t").is_err());
        assert!(ensure_read_only("select 1; drop table t").is_err());
        assert!(ensure_read_only("select * from t where 1 = (delete from t)").is_err());
        assert!(ensure_read_only("   ").is_err());
    }

    #[test]
    fn markdown_table_escapes_pipes_and_marks_nulls() {
        let rows = QueryRows {
            columns: vec!["region".into(), "sales".into()],
            rows: vec![vec![json!("South|East"), Value::Null], vec![json!("North"), json!(12.5)]],
        };
        assert_eq!(
            markdown_table(&rows),
            "| region | sales |\n| --- | --- |\n| South\\|East | NULL |\n| North | 12.5 |"
        );
        assert_eq!(
            markdown_table(&QueryRows::default()),
            "| No Data | Query returned no results |\n| --- | --- |"
        );
    }

    #[test]
    fn markdown_table_truncates_large_results() {
        let rows = QueryRows {
            columns: vec!["n".into()],
            rows: (0..MAX_TABLE_ROWS + 5).map(|n| vec![json!(n)]).collect(),
        };
        let table = markdown_table(&rows);
        assert_eq!(table.lines().count(), MAX_TABLE_ROWS + 3);
        assert!(table.ends_with("(showing first 1000 rows out of 1005 total) | ... |"));
    }

    #[test]
    fn name_matching_ignores_case_spacing_and_punctuation() {
        assert_eq!(normalize_name("  O'Brien-Smith 2 "), "obriensmith");
        let candidates = vec!["Jonathan Smith".to_string(), "Joanna Smythe".to_string()];
        let (name, score) = best_match("jonathan  smith!", &candidates).expect("match");
        assert_eq!(name, "Jonathan Smith");
        assert!((score - 100.0).abs() < f64::EPSILON);
        assert_eq!(best_match("anyone", &[]), None);
    }

    #[tokio::test]
    async fn sql_tool_prefixes_explanation_and_runs_query() {
        let backend = Arc::new(FakeWarehouse::default());
        let registry = catalog(Arc::clone(&backend), Arc::default());

        let output = run(
            &registry,
            "execute_sql_query",
            json!({"sql_query": "SELECT region, sales FROM t LIMIT 15", "explanation": "Sales."}),
        )
        .await
        .expect("query succeeds");

        let text = output.content.as_str().unwrap_or_default().to_string();
        assert!(text.starts_with("Sales.\n\n**Table Data:**\n\n| region | sales |"));
        assert!(text.contains("| South\\|East | NULL |"));
        assert_eq!(backend.queries.lock().map(|q| q.len()).unwrap_or(0), 1);
    }

    #[tokio::test]
    async fn sql_tool_rejects_writes_before_reaching_backend() {
        let backend = Arc::new(FakeWarehouse::default());
        let registry = catalog(Arc::clone(&backend), Arc::default());

        let result = run(
            &registry,
            "execute_sql_query",
            json!({"sql_query": "DROP TABLE sales", "explanation": "oops"}),
        )
        .await;

        assert!(matches!(result, Err(ToolFailure::InvalidInput(_))));
        assert_eq!(backend.queries.lock().map(|q| q.len()).unwrap_or(1), 0);
    }

    #[tokio::test]
    async fn resolve_name_returns_stored_spelling() {
        let registry = catalog(Arc::default(), Arc::default());

        let output = run(
            &registry,
            "resolve_name",
            json!({"user_input": "joanna smythe", "column": "rep_name", "table": "crm.reps"}),
        )
        .await
        .expect("resolution succeeds");
        assert_eq!(output.content["match"], json!("Joanna Smythe"));

        let rejected = run(
            &registry,
            "resolve_name",
            json!({"user_input": "x", "column": "name; --", "table": "crm.reps"}),
        )
        .await;
        assert!(matches!(rejected, Err(ToolFailure::InvalidInput(_))));
    }

    #[tokio::test]
    async fn bar_chart_returns_summary_and_png_attachment() {
        let renderer = Arc::new(RecordingRenderer::default());
        let registry = catalog(Arc::default(), Arc::clone(&renderer));

        let output = run(
            &registry,
            "create_bar_chart",
            json!({
                "categories": ["North", "South"],
                "values": ["120", 95],
                "title": "Sales by Region",
                "x_label": "Region",
                "y_label": "Sales ($)",
                "palette_type": "categorical",
                "value_type": "CURRENCY",
            }),
        )
        .await
        .expect("chart renders");

        assert_eq!(
            output.content,
            json!({
                "chart_type": "bar_chart",
                "title": "Sales by Region",
                "image": "generated successfully",
            })
        );
        assert_eq!(output.attachments.len(), 1);
        assert_eq!(output.attachments[0].file_name, "bar_chart.png");
        assert_eq!(output.attachments[0].media_type, "image/png");

        let requests = renderer.requests.lock().map(|r| r.clone()).unwrap_or_default();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, ChartKind::BarChart);
        assert_eq!(requests[0].palette, Palette::Categorical);
        assert_eq!(requests[0].points[0].value, 120.0);
    }

    #[tokio::test]
    async fn chart_validation_rejects_bad_data() {
        let renderer = Arc::new(RecordingRenderer::default());
        let registry = catalog(Arc::default(), Arc::clone(&renderer));

        let mismatched = run(
            &registry,
            "create_bar_chart",
            json!({
                "categories": ["North", "South"],
                "values": [1],
                "title": "t",
                "x_label": "x",
                "y_label": "y",
                "palette_type": "SEQUENTIAL",
                "value_type": "NUMBER",
            }),
        )
        .await;
        assert!(matches!(
            mismatched,
            Err(ToolFailure::InvalidInput(message)) if message.contains("values has 1")
        ));

        let non_positive = run(
            &registry,
            "create_pie_chart",
            json!({
                "data": [{"label": "A", "value": 3}, {"label": "B", "value": 0}],
                "title": "Share",
                "palette_type": "DIVERGING",
            }),
        )
        .await;
        assert!(matches!(
            non_positive,
            Err(ToolFailure::InvalidInput(message)) if message.contains("positive")
        ));

        let blank_label = run(
            &registry,
            "create_single_line_graph",
            json!({
                "points": [{"x": "Jan'24", "y": 1}, {"x": " ", "y": 2}],
                "title": "Trend",
                "x_label": "Month",
                "y_label": "Users",
                "palette_type": "SEQUENTIAL",
                "value_type": "NUMBER",
            }),
        )
        .await;
        assert!(matches!(
            blank_label,
            Err(ToolFailure::InvalidInput(message)) if message.contains("index 1")
        ));

        assert!(renderer.requests.lock().map(|r| r.is_empty()).unwrap_or(false));
    }

    #[tokio::test]
    async fn area_chart_accepts_numeric_x_values() {
        let renderer = Arc::new(RecordingRenderer::default());
        let registry = catalog(Arc::default(), Arc::clone(&renderer));

        let output = run(
            &registry,
            "create_single_area_chart",
            json!({
                "points": [{"x": 2023, "y": 10.5}, {"x": 2024, "y": 12}],
                "title": "Yearly users",
                "x_label": "Year",
                "y_label": "Users",
                "palette_type": "SEQUENTIAL",
                "value_type": "NUMBER",
            }),
        )
        .await
        .expect("chart renders");

        assert_eq!(output.content["chart_type"], json!("area_chart"));
        let requests = renderer.requests.lock().map(|r| r.clone()).unwrap_or_default();
        assert_eq!(requests[0].points[0].label, "2023");
    }

    fn trend_chart(series: Value) -> Value {
        json!({
            "series": series,
            "title": "Signups by plan",
            "x_label": "Month",
            "y_label": "Signups",
            "palette_type": "CATEGORICAL",
            "value_type": "NUMBER",
        })
    }

    #[tokio::test]
    async fn multiple_line_graph_keeps_each_series() {
        let renderer = Arc::new(RecordingRenderer::default());
        let registry = catalog(Arc::default(), Arc::clone(&renderer));

        let output = run(
            &registry,
            "create_multiple_line_graph",
            trend_chart(json!([
                {"name": "Free", "points": [{"x": "Jan'24", "y": 40}, {"x": "Feb'24", "y": 52}]},
                {"name": "Pro", "points": [{"x": "Jan'24", "y": 7}]},
            ])),
        )
        .await
        .expect("chart renders");

        assert_eq!(output.content["chart_type"], json!("multi_line_chart"));
        assert_eq!(output.attachments[0].file_name, "multi_line_chart.png");
        let requests = renderer.requests.lock().map(|r| r.clone()).unwrap_or_default();
        assert_eq!(requests[0].kind, ChartKind::MultiLineChart);
        assert!(requests[0].points.is_empty());
        let names: Vec<&str> = requests[0].series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Free", "Pro"]);
        assert_eq!(requests[0].series[0].points[1].label, "Feb'24");
        assert_eq!(requests[0].point_count(), 3);
    }

    #[tokio::test]
    async fn stacked_area_chart_accepts_aligned_series() {
        let renderer = Arc::new(RecordingRenderer::default());
        let registry = catalog(Arc::default(), Arc::clone(&renderer));

        let output = run(
            &registry,
            "create_stacked_area_chart",
            trend_chart(json!([
                {"name": "EMEA", "points": [{"x": 2023, "y": 10}, {"x": 2024, "y": 12}]},
                {"name": "APAC", "points": [{"x": 2023, "y": 4}, {"x": 2024, "y": 9.5}]},
            ])),
        )
        .await
        .expect("chart renders");

        assert_eq!(output.content["chart_type"], json!("stacked_area_chart"));
        let requests = renderer.requests.lock().map(|r| r.clone()).unwrap_or_default();
        assert_eq!(requests[0].series[1].points[0].label, "2023");
    }

    #[tokio::test]
    async fn multi_series_validation_rejects_bad_series() {
        let renderer = Arc::new(RecordingRenderer::default());
        let registry = catalog(Arc::default(), Arc::clone(&renderer));
        let rejection = |result: Result<ToolOutput, ToolFailure>| match result {
            Err(ToolFailure::InvalidInput(message)) => message,
            other => panic!("expected invalid input, got {other:?}"),
        };

        let empty = run(&registry, "create_multiple_line_graph", trend_chart(json!([]))).await;
        assert!(rejection(empty).contains("at least one series"));

        let unnamed = run(
            &registry,
            "create_multiple_line_graph",
            trend_chart(json!([{"name": " ", "points": [{"x": "Q1,23", "y": 1}]}])),
        )
        .await;
        assert!(rejection(unnamed).contains("series name cannot be empty"));

        let repeated = run(
            &registry,
            "create_multiple_line_graph",
            trend_chart(json!([
                {"name": "Pro", "points": [{"x": "Q1,23", "y": 1}]},
                {"name": "Pro ", "points": [{"x": "Q1,23", "y": 2}]},
            ])),
        )
        .await;
        assert!(rejection(repeated).contains("`Pro` appears twice"));

        let pointless = run(
            &registry,
            "create_stacked_area_chart",
            trend_chart(json!([{"name": "EMEA", "points": []}])),
        )
        .await;
        assert!(rejection(pointless).contains("`EMEA`: chart needs at least one data point"));

        let blank_label = run(
            &registry,
            "create_multiple_line_graph",
            trend_chart(json!([
                {"name": "Free", "points": [{"x": "Jan'24", "y": 1}, {"x": "", "y": 2}]},
            ])),
        )
        .await;
        assert!(rejection(blank_label).contains("series `Free`: label at index 1 is empty"));

        let misaligned = run(
            &registry,
            "create_stacked_area_chart",
            trend_chart(json!([
                {"name": "EMEA", "points": [{"x": 2023, "y": 10}, {"x": 2024, "y": 12}]},
                {"name": "APAC", "points": [{"x": 2023, "y": 4}]},
            ])),
        )
        .await;
        assert!(rejection(misaligned).contains("`APAC` must use the same x values as `EMEA`"));

        assert!(renderer.requests.lock().map(|r| r.is_empty()).unwrap_or(false));
    }

    #[tokio::test]
    async fn unconfigured_collaborators_fail_clearly() {
        let mut registry = ToolRegistry::default();
        register_builtin_tools(
            &mut registry,
            Arc::new(UnconfiguredQueryBackend),
            Arc::new(UnconfiguredChartRenderer),
        )
        .expect("catalog registers");

        let result = run(
            &registry,
            "execute_sql_query",
            json!({"sql_query": "SELECT 1", "explanation": "connectivity"}),
        )
        .await;

        assert_eq!(
            result,
            Err(ToolFailure::Unavailable("no query backend is configured".to_string()))
        );
    }
}
