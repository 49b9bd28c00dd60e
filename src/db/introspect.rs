//! Schema introspection
//!
//! Builds a `SchemaContext` from the live database: columns and comments from
//! the catalog, plus a few sample rows per table.

use crate::error::Result;
use crate::schema_context::{ColumnContext, SchemaContext, TableContext};
use crate::sql_engine::row_to_values;
use serde_json::{Map, Value};
use sqlx::{Column, PgPool, Row};
use std::collections::BTreeMap;
use tracing::{info, warn};

const COLUMNS_QUERY: &str = r#"
SELECT c.table_name::text,
       c.column_name::text,
       c.data_type::text,
       col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, c.ordinal_position::int)
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
WHERE c.table_schema = $1 AND t.table_type IN ('BASE TABLE', 'VIEW')
ORDER BY c.table_name, c.ordinal_position
"#;

const TABLE_COMMENTS_QUERY: &str = r#"
SELECT c.relname::text, obj_description(c.oid, 'pg_class')
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'v', 'm', 'p')
"#;

/// One row of `COLUMNS_QUERY`
type ColumnRow = (String, String, String, Option<String>);

/// Introspect the `public` schema.
pub async fn load_schema_context(pool: &PgPool, sample_rows: usize) -> Result<SchemaContext> {
    load_schema_context_for(pool, "public", sample_rows).await
}

pub async fn load_schema_context_for(
    pool: &PgPool,
    schema: &str,
    sample_rows: usize,
) -> Result<SchemaContext> {
    let columns: Vec<ColumnRow> = sqlx::query_as(COLUMNS_QUERY)
        .bind(schema)
        .fetch_all(pool)
        .await?;
    let comments: Vec<(String, Option<String>)> = sqlx::query_as(TABLE_COMMENTS_QUERY)
        .bind(schema)
        .fetch_all(pool)
        .await?;

    let mut tables = group_columns(columns);
    for (table, comment) in comments {
        if let (Some(context), Some(comment)) = (tables.get_mut(&table), comment) {
            context.description = comment;
        }
    }

    if sample_rows > 0 {
        for (name, table) in tables.iter_mut() {
            let sql = format!(
                "SELECT * FROM {}.{} LIMIT {}",
                quote_ident(schema),
                quote_ident(name),
                sample_rows
            );
            match sqlx::raw_sql(&sql).fetch_all(pool).await {
                Ok(rows) => {
                    table.samples = rows
                        .iter()
                        .map(|row| {
                            let names = row.columns().iter().map(|c| c.name().to_string());
                            names.zip(row_to_values(row)).collect::<Map<String, Value>>()
                        })
                        .collect();
                }
                Err(e) => warn!("Could not sample table '{}': {}", name, e),
            }
        }
    }

    info!(
        "✅ Introspected schema '{}': {} tables",
        schema,
        tables.len()
    );
    Ok(SchemaContext {
        tables,
        ..SchemaContext::default()
    })
}

fn group_columns(rows: Vec<ColumnRow>) -> BTreeMap<String, TableContext> {
    let mut tables: BTreeMap<String, TableContext> = BTreeMap::new();
    for (table, column, data_type, description) in rows {
        tables.entry(table).or_default().columns.push(ColumnContext {
            name: column,
            data_type: Some(data_type),
            description,
        });
    }
    tables
}

/// Double-quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
