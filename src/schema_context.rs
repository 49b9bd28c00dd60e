//! Schema Context Provider
//!
//! Static knowledge used to ground every prompt: table and column
//! descriptions, a few sample rows per table, the business glossary and the
//! material catalog. Built once per process and shared read-only.

use crate::error::{AgentError, Result};
use crate::extraction::normalize::fold_text;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Minimum Jaro-Winkler similarity for a fuzzy catalog hit
const MATERIAL_SIMILARITY_THRESHOLD: f64 = 0.92;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnContext {
    pub name: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableContext {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnContext>,
    #[serde(default)]
    pub samples: Vec<Map<String, Value>>,
}

impl TableContext {
    pub fn column(&self, name: &str) -> Option<&ColumnContext> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaContext {
    #[serde(default)]
    pub tables: BTreeMap<String, TableContext>,

    /// Business terms and what they mean in this database
    #[serde(default)]
    pub glossary: BTreeMap<String, String>,

    /// Catalog spelling of every material name
    #[serde(default)]
    pub materials: Vec<String>,
}

impl SchemaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a schema context (or an overlay) from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let context: SchemaContext = serde_json::from_str(&raw).map_err(|e| {
            AgentError::Config(format!("invalid schema context {}: {}", path.display(), e))
        })?;
        info!(
            "Loaded schema context from {} ({} tables, {} glossary terms, {} materials)",
            path.display(),
            context.tables.len(),
            context.glossary.len(),
            context.materials.len()
        );
        Ok(context)
    }

    pub fn with_table(mut self, name: impl Into<String>, table: TableContext) -> Self {
        self.tables.insert(name.into(), table);
        self
    }

    pub fn describe(&self, table_name: &str) -> Option<&TableContext> {
        self.tables.get(table_name).or_else(|| {
            self.tables
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(table_name))
                .map(|(_, table)| table)
        })
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Copy hand-written descriptions, glossary and catalog from `overlay`
    /// onto an introspected context. Structural facts (columns, types,
    /// samples) stay as introspected.
    pub fn merge_descriptions(&mut self, overlay: SchemaContext) {
        for (name, described) in overlay.tables {
            match self.tables.get_mut(&name) {
                Some(table) => {
                    if !described.description.is_empty() {
                        table.description = described.description;
                    }
                    for described_col in described.columns {
                        if let Some(col) = table.columns.iter_mut().find(|c| c.name == described_col.name) {
                            if described_col.description.is_some() {
                                col.description = described_col.description;
                            }
                        }
                    }
                }
                None => {
                    debug!("Overlay describes table '{}' that the database does not have", name);
                }
            }
        }
        self.glossary.extend(overlay.glossary);
        for material in overlay.materials {
            if !self.materials.contains(&material) {
                self.materials.push(material);
            }
        }
    }

    /// Map a free-text material name to its catalog spelling, ignoring case
    /// and accents. Returns `None` when nothing in the catalog is close.
    pub fn resolve_material(&self, raw: &str) -> Option<&str> {
        let folded = fold_text(raw);
        if folded.is_empty() {
            return None;
        }

        if let Some(exact) = self.materials.iter().find(|m| fold_text(m) == folded) {
            return Some(exact.as_str());
        }

        self.materials
            .iter()
            .map(|m| (m, strsim::jaro_winkler(&fold_text(m), &folded)))
            .filter(|(_, score)| *score >= MATERIAL_SIMILARITY_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(m, _)| m.as_str())
    }

    /// Stable text block describing the schema. Tables come out sorted by
    /// name so identical contexts always produce identical prompts.
    pub fn render_for_prompt(&self, max_samples: usize) -> String {
        let mut parts = Vec::new();

        for (name, table) in &self.tables {
            parts.push(format!("- Table: \"{}\"", name));
            if !table.description.trim().is_empty() {
                parts.push(format!("  Description: {}", table.description.trim()));
            }
            parts.push("  Columns:".to_string());
            for col in &table.columns {
                let mut line = format!("    - \"{}\"", col.name);
                if let Some(ref data_type) = col.data_type {
                    line.push_str(&format!(" ({})", data_type));
                }
                if let Some(ref description) = col.description {
                    line.push_str(&format!(": {}", description));
                }
                parts.push(line);
            }
            if max_samples > 0 && !table.samples.is_empty() {
                parts.push("  Sample rows:".to_string());
                for sample in table.samples.iter().take(max_samples) {
                    parts.push(format!("    {}", Value::Object(sample.clone())));
                }
            }
        }

        if !self.glossary.is_empty() {
            parts.push("\nGlossary:".to_string());
            for (term, meaning) in &self.glossary {
                parts.push(format!("- {}: {}", term, meaning));
            }
        }

        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn precipitation() -> SchemaContext {
        let mut sample = Map::new();
        sample.insert("city".to_string(), Value::String("Seattle".to_string()));
        sample.insert("average".to_string(), serde_json::json!(37.7));

        SchemaContext::new().with_table(
            "us_precipitation",
            TableContext {
                description: "Annual precipitation per weather station".to_string(),
                columns: vec![
                    ColumnContext {
                        name: "city".to_string(),
                        data_type: Some("text".to_string()),
                        description: None,
                    },
                    ColumnContext {
                        name: "average".to_string(),
                        data_type: Some("double precision".to_string()),
                        description: Some("Historical annual average, inches".to_string()),
                    },
                ],
                samples: vec![sample],
            },
        )
    }

    #[test]
    fn test_describe_is_case_insensitive_fallback() {
        let context = precipitation();
        assert!(context.describe("us_precipitation").is_some());
        assert!(context.describe("US_PRECIPITATION").is_some());
        assert!(context.describe("rainfall").is_none());
    }

    #[test]
    fn test_render_includes_columns_and_samples() {
        let rendered = precipitation().render_for_prompt(1);
        assert!(rendered.contains("- Table: \"us_precipitation\""));
        assert!(rendered.contains("\"average\" (double precision): Historical annual average, inches"));
        assert!(rendered.contains("Seattle"));

        let without_samples = precipitation().render_for_prompt(0);
        assert!(!without_samples.contains("Sample rows"));
    }

    #[test]
    fn test_resolve_material_ignores_accents() {
        let context = SchemaContext {
            materials: vec!["Milho Moído".to_string(), "FS Ouro".to_string()],
            ..SchemaContext::default()
        };
        assert_eq!(context.resolve_material("milho moido"), Some("Milho Moído"));
        assert_eq!(context.resolve_material("FS OURO"), Some("FS Ouro"));
        assert_eq!(context.resolve_material("Soja"), None);
    }

    #[test]
    fn test_merge_descriptions_keeps_structure() {
        let mut introspected = precipitation();
        let overlay = SchemaContext {
            tables: BTreeMap::from([(
                "us_precipitation".to_string(),
                TableContext {
                    description: String::new(),
                    columns: vec![ColumnContext {
                        name: "city".to_string(),
                        data_type: None,
                        description: Some("City of the station".to_string()),
                    }],
                    samples: Vec::new(),
                },
            )]),
            glossary: BTreeMap::from([("wet".to_string(), "precipitation".to_string())]),
            materials: vec!["FS Ouro".to_string()],
        };

        introspected.merge_descriptions(overlay);
        let table = introspected.describe("us_precipitation").unwrap();
        assert_eq!(table.description, "Annual precipitation per weather station");
        assert_eq!(
            table.column("city").and_then(|c| c.description.as_deref()),
            Some("City of the station")
        );
        assert_eq!(table.column("city").and_then(|c| c.data_type.as_deref()), Some("text"));
        assert_eq!(table.samples.len(), 1);
        assert_eq!(introspected.glossary.get("wet").map(String::as_str), Some("precipitation"));
        assert_eq!(introspected.materials, vec!["FS Ouro".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tables": {{"orders": {{"description": "Sales orders", "columns": [{{"name": "id"}}]}}}}, "materials": ["FS Ouro"]}}"#
        )
        .unwrap();

        let context = SchemaContext::load(file.path()).unwrap();
        assert_eq!(context.table_names(), vec!["orders"]);
        assert_eq!(context.describe("orders").unwrap().columns[0].name, "id");
        assert!(context.glossary.is_empty());
    }
}
