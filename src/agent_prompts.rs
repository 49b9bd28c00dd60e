//! Agent Prompts - Prompt builders for SQL planning, repair, extraction and charts
//!
//! Every builder is a pure function of its inputs: same history, schema and
//! observation in, same prompt out. Sections always appear in the same order:
//! preamble, history, schema context, contract, current input, repair.

use crate::conversation::{recent_turns, ConversationTurn};
use crate::execution_loop::observation::Observation;
use crate::extraction::{ExtractionRequest, FIELD_NAMES};
use crate::schema_context::SchemaContext;
use crate::sql_engine::ResultSet;
use serde_json::Value;

/// Preamble of the SQL planning prompt
pub const SQL_AGENT_PREAMBLE: &str = r#"You are a data assistant that answers business questions by querying a PostgreSQL database.
You work in steps: you propose ONE SQL query, the system runs it and shows you what happened, and you correct the query if it failed."#;

const SQL_CONTRACT: &str = r#"## Rules
1. Always quote table and column names separately with double quotes: "Table"."Column", never "Table.Column".
2. Never invent tables or columns. When the descriptions and the real schema disagree, the schema is the source of truth.
3. Only read data: a single SELECT (or WITH ... SELECT) statement. No INSERT, UPDATE, DELETE or DDL.
4. When the question involves columns from more than one table, JOIN them explicitly on the related columns.
5. For text comparisons prefer ILIKE with % wildcards.
6. Select only the columns needed to answer. Use SUM/COUNT/AVG when the question asks "how many" or "how much".
7. If the question can be answered without querying (for example, it asks what data is available), answer directly.

## Response format
Return ONLY a JSON object, no Markdown, in one of these shapes:
{"action": "sql", "sql": "SELECT ..."}
{"action": "answer", "answer": "..."}"#;

/// Everything the SQL planning prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub question: &'a str,
    pub history: &'a [ConversationTurn],
    pub schema: &'a SchemaContext,
    pub observation: Option<&'a Observation>,
    /// Statement that produced `observation`, if any
    pub failed_sql: Option<&'a str>,
    /// 1-based number of the attempt this prompt is for
    pub attempt: u32,
    pub history_window: usize,
    pub sample_rows: usize,
}

/// Serialize history as `role: content` lines.
pub fn format_history(history: &[ConversationTurn], window: usize) -> String {
    let turns = recent_turns(history, window);
    if turns.is_empty() {
        return "(no previous messages)".to_string();
    }
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_sql_prompt(input: &PromptInput<'_>) -> String {
    let mut parts = Vec::new();

    parts.push(SQL_AGENT_PREAMBLE.to_string());

    parts.push("\n## Conversation so far".to_string());
    parts.push(
        "Use it only to resolve references such as \"and in March?\" or \"that client\".".to_string(),
    );
    parts.push(format_history(input.history, input.history_window));

    parts.push("\n## Database schema".to_string());
    parts.push(input.schema.render_for_prompt(input.sample_rows));

    parts.push(format!("\n{}", SQL_CONTRACT));

    parts.push(format!("\n## Question\n{}", input.question.trim()));

    if let Some(observation) = input.observation {
        parts.push(format!(
            "\n{}",
            build_recovery_section(observation, input.failed_sql, input.attempt)
        ));
    }

    parts.join("\n")
}

/// Repair instructions derived from the last observation.
pub fn build_recovery_section(
    observation: &Observation,
    failed_sql: Option<&str>,
    attempt: u32,
) -> String {
    let mut parts = Vec::new();

    parts.push(format!(
        "## ⚠️ RETRY ATTEMPT {}: your previous step did not produce an answer.",
        attempt
    ));

    match observation {
        Observation::ExecutionError(failure) => {
            if let Some(sql) = failed_sql {
                parts.push(format!("Failed query:\n{}", sql));
            }
            parts.push(format!("Database error ({}): {}", failure.class, failure.message));
            if let Some(ref fragment) = failure.fragment {
                parts.push(format!("Offending fragment: {}", fragment));
            }
            parts.push(failure.class.repair_hint().to_string());
            parts.push("Diagnose the error and return a corrected query.".to_string());
        }
        Observation::ParseError { message, raw } => {
            parts.push(format!("Your response could not be parsed: {}", message));
            if !raw.trim().is_empty() {
                parts.push(format!("Your response was:\n{}", truncate_chars(raw.trim(), 500)));
            }
            parts.push("Return ONLY the JSON object described in the response format.".to_string());
        }
        Observation::Timeout { stage } => {
            if let Some(sql) = failed_sql {
                parts.push(format!("Query:\n{}", sql));
            }
            parts.push(format!("The step timed out waiting for the {}.", stage));
            parts.push("Return a simpler, faster query: filter early, aggregate, or add a LIMIT.".to_string());
        }
        Observation::ResultSet(result) => {
            parts.push(format!(
                "The previous query returned {} row(s); refine it if it does not answer the question.",
                result.row_count()
            ));
        }
    }

    parts.join("\n")
}

/// Structured order extraction prompt.
pub fn build_extraction_prompt(
    request: &ExtractionRequest,
    schema: &SchemaContext,
    observation: Option<&Observation>,
    attempt: u32,
    history_window: usize,
) -> String {
    let mut parts = Vec::new();

    parts.push(
        "You extract sales order fields from a free-text message written by a sales representative."
            .to_string(),
    );

    parts.push("\n## Conversation so far".to_string());
    parts.push(
        "History is ONLY for resolving references. Never copy a field value from history: \
a field that the current message does not state is null."
            .to_string(),
    );
    parts.push(format_history(&request.history, history_window));

    if !schema.materials.is_empty() {
        parts.push("\n## Material catalog".to_string());
        parts.push(schema.materials.join("\n"));
    }
    if !schema.glossary.is_empty() {
        parts.push("\n## Glossary".to_string());
        for (term, meaning) in &schema.glossary {
            parts.push(format!("- {}: {}", term, meaning));
        }
    }

    parts.push("\n## Fields".to_string());
    parts.push(format!(
        "Return ONLY a JSON object with exactly these keys, every key present, null when the current message does not state it:\n{}",
        FIELD_NAMES.join(", ")
    ));

    parts.push(
        r#"
## Rules
- tax_id: digits only, strip dots, slashes and dashes ("040.074.561-51" -> "04007456151").
- payment_method and payment_term are separate fields even when written together: "Boleto 30 dias" -> payment_method "Boleto", payment_term "30 dias".
- material: use the catalog spelling, ignoring accents and case differences.
- price, freight_price, total_quantity: numbers only, no currency symbols or units.
- incoterm: upper case (CIF, FOB, ...).
- freight_price: null unless the message explicitly gives a freight figure ("frete 150", "CIF 170"). An Incoterm alone is not a freight figure.
- cadence: when the schedule is written as several "Month/Year quantity" lines, copy the lines exactly, one per line, quantities unchanged. When it is written inline ("40 fev 20 mar"), copy it as written.
- negotiation_date: dd/mm/yyyy.
- Never guess. Absence is null."#
            .to_string(),
    );

    if !request.focus_fields.is_empty() {
        parts.push(format!(
            "\nATTENTION: the user is answering a question about these fields only: {}. \
Extract only these; every other field is null.",
            request.focus_fields.join(", ")
        ));
    }

    parts.push(format!("\n## Current message\n{}", request.text.trim()));

    if let Some(observation) = observation {
        parts.push(format!("\n{}", build_recovery_section(observation, None, attempt)));
    }

    parts.join("\n")
}

/// Chart planning prompt over a sample of the result set.
pub fn build_chart_prompt(question: &str, result: &ResultSet, sample_rows: usize) -> String {
    let sample = Value::Array(
        result
            .to_records(sample_rows)
            .into_iter()
            .map(Value::Object)
            .collect(),
    );

    format!(
        r#"You pick the best chart for a question and a query result.

Question: {}
Result columns: {}
Sample rows (JSON):
{}

Choose chart_type from bar, line, scatter, pie and aggregation from none, sum, avg, count, min, max.
x and y must be column names from the result; y may be null only when aggregation is count.

Return ONLY this JSON object, no Markdown:
{{"action": "chart", "chart_type": "bar", "x": "<column>", "y": "<column>", "aggregation": "sum", "title": "<title>"}}"#,
        question.trim(),
        result.columns.join(", "),
        sample
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

/// Answer turns include the SQL that produced them so follow-up questions can
/// refer back to it.
pub fn agent_turn_content(answer: &str, sql: Option<&str>) -> String {
    match sql {
        Some(sql) => format!("{}\n[sql] {}", answer, sql),
        None => answer.to_string(),
    }
}
