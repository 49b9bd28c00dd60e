//! Structured order extraction
//!
//! Reads a free-text sales order and returns a fixed set of fields. Every
//! field is always present; absence is `null`, and only the current message
//! may supply values.

pub mod cadence;
pub mod normalize;

use crate::agent_prompts::build_extraction_prompt;
use crate::config::AgentConfig;
use crate::conversation::{ConversationTurn, Role};
use crate::error::{AgentError, Result};
use crate::execution_loop::observation::{Observation, RetryState, TimeoutStage};
use crate::llm::{CompletionClient, CompletionConfig};
use crate::plan_parser::{clean_llm_output, extract_json_object};
use crate::schema_context::SchemaContext;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::cadence::{cadence_year, format_cadence};
use self::normalize::{
    contains_phrase, digits_only, fold_text, freight_in_text, normalize_incoterm,
    numbers_in_text, parse_number, split_payment, BUYER_FREIGHT_INCOTERMS,
};

/// JSON keys of the extraction contract, in prompt order
pub const FIELD_NAMES: [&str; 17] = [
    "client_name",
    "client_code",
    "tax_id",
    "plant",
    "payment_method",
    "payment_term",
    "material",
    "total_quantity",
    "cadence",
    "seller",
    "seller_email",
    "city",
    "negotiation_date",
    "incoterm",
    "price",
    "freight_price",
    "campaign",
];

const REQUIRED_FIELDS: [&str; 11] = [
    "tax_id",
    "plant",
    "payment_term",
    "payment_method",
    "material",
    "cadence",
    "seller",
    "city",
    "negotiation_date",
    "incoterm",
    "price",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub client_name: Option<String>,
    pub client_code: Option<String>,
    /// CNPJ/CPF, digits only
    pub tax_id: Option<String>,
    pub plant: Option<String>,
    pub payment_method: Option<String>,
    pub payment_term: Option<String>,
    pub material: Option<String>,
    pub total_quantity: Option<f64>,
    pub cadence: Option<String>,
    pub seller: Option<String>,
    pub seller_email: Option<String>,
    pub city: Option<String>,
    pub negotiation_date: Option<String>,
    pub incoterm: Option<String>,
    pub price: Option<f64>,
    pub freight_price: Option<f64>,
    pub campaign: Option<String>,
}

impl ExtractedFields {
    fn text_field_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        let field = match name {
            "client_name" => &mut self.client_name,
            "client_code" => &mut self.client_code,
            "tax_id" => &mut self.tax_id,
            "plant" => &mut self.plant,
            "payment_method" => &mut self.payment_method,
            "payment_term" => &mut self.payment_term,
            "material" => &mut self.material,
            "cadence" => &mut self.cadence,
            "seller" => &mut self.seller,
            "seller_email" => &mut self.seller_email,
            "city" => &mut self.city,
            "negotiation_date" => &mut self.negotiation_date,
            "incoterm" => &mut self.incoterm,
            "campaign" => &mut self.campaign,
            _ => return None,
        };
        Some(field)
    }

    fn number_field_mut(&mut self, name: &str) -> Option<&mut Option<f64>> {
        let field = match name {
            "total_quantity" => &mut self.total_quantity,
            "price" => &mut self.price,
            "freight_price" => &mut self.freight_price,
            _ => return None,
        };
        Some(field)
    }

    fn text_value(&self, name: &str) -> Option<&str> {
        let field = match name {
            "client_name" => &self.client_name,
            "client_code" => &self.client_code,
            "tax_id" => &self.tax_id,
            "plant" => &self.plant,
            "payment_method" => &self.payment_method,
            "payment_term" => &self.payment_term,
            "material" => &self.material,
            "cadence" => &self.cadence,
            "seller" => &self.seller,
            "seller_email" => &self.seller_email,
            "city" => &self.city,
            "negotiation_date" => &self.negotiation_date,
            "incoterm" => &self.incoterm,
            "campaign" => &self.campaign,
            _ => return None,
        };
        field.as_deref()
    }

    fn number_value(&self, name: &str) -> Option<f64> {
        match name {
            "total_quantity" => self.total_quantity,
            "price" => self.price,
            "freight_price" => self.freight_price,
            _ => None,
        }
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.text_value(name).is_some() || self.number_value(name).is_some()
    }

    fn clear(&mut self, name: &str) {
        if let Some(field) = self.text_field_mut(name) {
            *field = None;
        } else if let Some(field) = self.number_field_mut(name) {
            *field = None;
        }
    }

    /// Mandatory fields still missing. Freight is mandatory unless the
    /// buyer arranges it (FOB, TPD).
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing: Vec<&'static str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|name| !self.is_present(name))
            .collect();

        let buyer_freight = self
            .incoterm
            .as_deref()
            .map(|i| BUYER_FREIGHT_INCOTERMS.contains(&i.to_uppercase().as_str()))
            .unwrap_or(false);
        if !buyer_freight && self.freight_price.is_none() {
            missing.push("freight_price");
        }
        missing
    }

    /// Copy in every field `update` has, keeping current values elsewhere.
    pub fn merge(&mut self, update: &ExtractedFields) {
        for name in FIELD_NAMES {
            if let Some(value) = update.text_value(name) {
                if let Some(field) = self.text_field_mut(name) {
                    *field = Some(value.to_string());
                }
            } else if let Some(value) = update.number_value(name) {
                if let Some(field) = self.number_field_mut(name) {
                    *field = Some(value);
                }
            }
        }
    }

    /// Order summary shown back to the seller for confirmation.
    pub fn summary(&self) -> String {
        fn or_na(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("N/A")
        }
        fn number_or_na(value: Option<f64>) -> String {
            value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "N/A".to_string())
        }

        let incoterm = self.incoterm.as_deref().map(str::to_uppercase);
        let freight = match (self.freight_price, incoterm.as_deref()) {
            (Some(value), Some("CIF")) => format!("{:.2} (CIF)", value),
            (Some(value), Some(i)) if BUYER_FREIGHT_INCOTERMS.contains(&i) => {
                format!("{:.2} ({} - informative)", value, i)
            }
            (Some(value), Some(i)) => format!("{:.2} (Incoterm: {})", value, i),
            (Some(value), None) => format!("{:.2} (Incoterm not given)", value),
            (None, Some("CIF")) => "N/A (CIF - value not given)".to_string(),
            (None, Some(i)) => format!("N/A ({})", i),
            (None, None) => "N/A".to_string(),
        };

        let mut parts = Vec::new();
        parts.push(format!("Client: {} ({})", or_na(&self.client_name), or_na(&self.client_code)));
        parts.push(format!("Tax ID: {}", or_na(&self.tax_id)));
        parts.push(format!("Plant: {}", or_na(&self.plant)));
        parts.push(format!("City: {}", or_na(&self.city)));
        parts.push(format!("Material: {}", or_na(&self.material)));
        parts.push(format!("Total quantity: {}", number_or_na(self.total_quantity)));
        parts.push(format!("Price: {}", number_or_na(self.price)));
        parts.push(format!("Incoterm: {}", incoterm.as_deref().unwrap_or("N/A")));
        parts.push(format!("Freight: {}", freight));
        parts.push(format!("Payment method: {}", or_na(&self.payment_method)));
        parts.push(format!("Payment term: {}", or_na(&self.payment_term)));
        parts.push(format!("Negotiation date: {}", or_na(&self.negotiation_date)));
        parts.push(format!("Seller: {} <{}>", or_na(&self.seller), or_na(&self.seller_email)));
        parts.push(format!("Campaign: {}", or_na(&self.campaign)));
        parts.push(format!("Cadence:\n{}", or_na(&self.cadence)));
        parts.join("\n")
    }
}

/// Order assembled across the turns of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderDraft {
    pub fields: ExtractedFields,
    /// Mandatory fields still missing
    pub missing: Vec<String>,
    /// Question for the seller; `None` once the order is complete
    pub follow_up: Option<String>,
}

impl OrderDraft {
    pub fn from_fields(fields: ExtractedFields) -> Self {
        let missing = fields.missing_required();
        let follow_up = follow_up_question(&fields, &missing);
        Self {
            missing: missing.into_iter().map(str::to_string).collect(),
            follow_up,
            fields,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Agent turn for this draft: the summary, then either the follow-up or
    /// a request for confirmation.
    pub fn message(&self) -> String {
        match &self.follow_up {
            Some(question) => format!("{}\n\n{}", self.fields.summary(), question),
            None => format!(
                "Please review the order before confirming:\n\n{}",
                self.fields.summary()
            ),
        }
    }
}

fn field_label(name: &str) -> &str {
    match name {
        "tax_id" => "Tax ID (CNPJ/CPF)",
        "plant" => "Plant",
        "payment_term" => "Payment term",
        "payment_method" => "Payment method",
        "material" => "Material",
        "cadence" => "Cadence",
        "seller" => "Seller",
        "city" => "City",
        "negotiation_date" => "Negotiation date",
        "incoterm" => "Incoterm",
        "price" => "Price",
        "freight_price" => "Freight price",
        other => other,
    }
}

/// Question asking the seller for the missing mandatory fields.
pub fn follow_up_question(fields: &ExtractedFields, missing: &[&str]) -> Option<String> {
    match missing {
        [] => None,
        ["freight_price"] => Some(format!(
            "Since the Incoterm is '{}', please give the freight price.",
            fields.incoterm.as_deref().unwrap_or("N/A")
        )),
        _ => Some(format!(
            "Almost there! I still need: {}.",
            missing.iter().map(|name| field_label(name)).join(", ")
        )),
    }
}

/// Input of one extraction: the current message plus the session history.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub text: String,
    pub history: Vec<ConversationTurn>,
    /// Fallback year source for cadence expansion
    pub reference_date: NaiveDate,
    /// When the user answers a follow-up about specific fields
    pub focus_fields: Vec<String>,
}

impl ExtractionRequest {
    pub fn new(text: impl Into<String>, history: Vec<ConversationTurn>, reference_date: NaiveDate) -> Self {
        Self {
            text: text.into(),
            history,
            reference_date,
            focus_fields: Vec::new(),
        }
    }

    pub fn with_focus_fields(mut self, fields: Vec<String>) -> Self {
        self.focus_fields = fields;
        self
    }

    fn history_text(&self) -> String {
        self.history
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse and normalize the model's extraction JSON.
pub fn parse_extracted_fields(
    raw: &str,
    request: &ExtractionRequest,
    schema: &SchemaContext,
) -> Result<ExtractedFields> {
    let cleaned = clean_llm_output(raw).replace('\t', "    ");
    let object = extract_json_object(&cleaned)?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| AgentError::Parse(format!("invalid JSON: {}", e)))?;
    let map = value
        .as_object()
        .ok_or_else(|| AgentError::Parse("extraction is not a JSON object".to_string()))?;

    let missing: Vec<&str> = FIELD_NAMES
        .iter()
        .copied()
        .filter(|name| !map.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(AgentError::Parse(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }

    let mut fields = read_fields(map);

    if !request.focus_fields.is_empty() {
        for name in FIELD_NAMES {
            if !request.focus_fields.iter().any(|f| f == name) {
                fields.clear(name);
            }
        }
    }

    normalize_fields(&mut fields, request, schema);
    Ok(fields)
}

fn read_fields(map: &Map<String, Value>) -> ExtractedFields {
    let mut fields = ExtractedFields::default();
    for name in FIELD_NAMES {
        let value = map.get(name).unwrap_or(&Value::Null);
        if let Some(slot) = fields.number_field_mut(name) {
            *slot = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) if !is_blank(s) => {
                    let parsed = parse_number(s);
                    if parsed.is_none() {
                        warn!("Field '{}' is not a number: '{}'", name, s);
                    }
                    parsed
                }
                _ => None,
            };
        } else if let Some(slot) = fields.text_field_mut(name) {
            *slot = match value {
                Value::String(s) if !is_blank(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            };
        }
    }
    fields
}

fn is_blank(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "" | "null" | "none" | "n/a" | "na" | "-"
    )
}

fn normalize_fields(fields: &mut ExtractedFields, request: &ExtractionRequest, schema: &SchemaContext) {
    let source = request.text.as_str();
    let focus_allows = |name: &str| {
        request.focus_fields.is_empty() || request.focus_fields.iter().any(|f| f == name)
    };

    drop_history_leaks(fields, request);

    fields.tax_id = fields
        .tax_id
        .take()
        .map(|t| digits_only(&t))
        .filter(|t| !t.is_empty());

    let (method, term) = split_payment(fields.payment_method.take(), fields.payment_term.take());
    fields.payment_method = method;
    fields.payment_term = if focus_allows("payment_term") { term } else { None };

    if let Some(material) = fields.material.take() {
        let resolved = schema
            .resolve_material(&material)
            .map(str::to_string)
            .unwrap_or(material);
        fields.material = Some(resolved);
    }

    fields.incoterm = fields.incoterm.take().and_then(|i| normalize_incoterm(&i));

    let stated_freight = freight_in_text(source);
    match (&stated_freight, fields.freight_price) {
        (None, Some(value)) => {
            warn!(
                "Dropping freight_price {} the message does not state explicitly",
                value
            );
            fields.freight_price = None;
        }
        (Some((incoterm, value)), None) => {
            if focus_allows("freight_price") {
                debug!("Freight {} taken from the message text", value);
                fields.freight_price = Some(*value);
            }
            if fields.incoterm.is_none() && focus_allows("incoterm") {
                fields.incoterm = incoterm.clone();
            }
        }
        (Some((Some(incoterm), _)), Some(_)) if fields.incoterm.is_none() && focus_allows("incoterm") => {
            fields.incoterm = Some(incoterm.clone());
        }
        _ => {}
    }

    if let Some(raw) = fields.cadence.take() {
        let year = cadence_year(fields.negotiation_date.as_deref(), request.reference_date);
        fields.cadence = Some(format_cadence(&raw, year));
    }
}

/// Null every field whose value appears only in earlier turns, never in
/// the current message. Numbers compare by value, the tax id by digits and
/// everything else as folded whole words.
fn drop_history_leaks(fields: &mut ExtractedFields, request: &ExtractionRequest) {
    let history_raw = request.history_text();
    if history_raw.trim().is_empty() {
        return;
    }
    let current = fold_text(&request.text);
    let history = fold_text(&history_raw);
    let current_numbers = numbers_in_text(&request.text);
    let history_numbers = numbers_in_text(&history_raw);
    let current_digits = digits_only(&request.text);
    let history_digits = digits_only(&history_raw);

    fn mentions(numbers: &[f64], value: f64) -> bool {
        numbers.iter().any(|n| (n - value).abs() < 1e-6)
    }

    for name in FIELD_NAMES {
        let leaked = if let Some(value) = fields.number_value(name) {
            !mentions(&current_numbers, value) && mentions(&history_numbers, value)
        } else if let Some(value) = fields.text_value(name) {
            if name == "tax_id" {
                let digits = digits_only(value);
                !digits.is_empty()
                    && !current_digits.contains(&digits)
                    && history_digits.contains(&digits)
            } else {
                let folded = fold_text(value);
                !contains_phrase(&current, &folded) && contains_phrase(&history, &folded)
            }
        } else {
            false
        };
        if leaked {
            warn!("Field '{}' was copied from history, clearing it", name);
            fields.clear(name);
        }
    }
}

/// Extraction with the same bounded repair loop as the SQL agent: parse
/// errors and timeouts are fed back, provider outages end the run.
pub struct ExtractionAgent {
    completion: Arc<dyn CompletionClient>,
    completion_config: CompletionConfig,
    schema: Arc<SchemaContext>,
    config: AgentConfig,
}

impl ExtractionAgent {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        completion_config: CompletionConfig,
        schema: Arc<SchemaContext>,
        config: AgentConfig,
    ) -> Self {
        Self {
            completion,
            completion_config,
            schema,
            config,
        }
    }

    pub async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractedFields> {
        self.extract_with_cancel(request, &CancellationToken::new()).await
    }

    pub async fn extract_with_cancel(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedFields> {
        let mut retry = RetryState::new(self.config.max_attempts);

        while retry.can_attempt() {
            retry.record_attempt();
            let attempt = retry.attempts_made;
            info!("Extraction attempt {} of {}", attempt, retry.max_attempts);

            let prompt = build_extraction_prompt(
                request,
                &self.schema,
                retry.last_observation.as_ref(),
                attempt,
                self.config.history_window,
            );
            debug!(prompt = %prompt, "Extraction prompt");

            let call = tokio::time::timeout(
                self.config.completion_timeout,
                self.completion.complete(&prompt, &self.completion_config),
            );
            let raw = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = call => match outcome {
                    Ok(Ok(raw)) => raw,
                    Ok(Err(AgentError::Timeout(_))) | Err(_) => {
                        warn!("Extraction attempt {} timed out", attempt);
                        retry.observe(Observation::Timeout { stage: TimeoutStage::Completion });
                        continue;
                    }
                    Ok(Err(e)) => return Err(e),
                }
            };

            match parse_extracted_fields(&raw, request, &self.schema) {
                Ok(fields) => {
                    info!("✅ Extraction succeeded on attempt {}", attempt);
                    return Ok(fields);
                }
                Err(e) => {
                    warn!("Extraction attempt {} unparseable: {}", attempt, e);
                    retry.observe(Observation::ParseError {
                        message: e.to_string(),
                        raw,
                    });
                }
            }
        }

        let cause = retry
            .last_observation
            .as_ref()
            .map(Observation::summary)
            .unwrap_or_else(|| "no attempts allowed".to_string());
        Err(AgentError::RetryBudgetExhausted {
            attempts: retry.attempts_made,
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(text: &str) -> ExtractionRequest {
        ExtractionRequest::new(text, Vec::new(), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap())
    }

    fn all_null() -> Map<String, Value> {
        FIELD_NAMES.iter().map(|f| (f.to_string(), Value::Null)).collect()
    }

    fn with(mut map: Map<String, Value>, pairs: &[(&str, Value)]) -> String {
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        Value::Object(map).to_string()
    }

    #[test]
    fn test_missing_keys_are_parse_errors() {
        let err = parse_extracted_fields(r#"{"client_name": "ACME"}"#, &request("x"), &SchemaContext::new())
            .unwrap_err();
        match err {
            AgentError::Parse(msg) => assert!(msg.contains("tax_id")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_every_field_serialized() {
        let fields = parse_extracted_fields(&with(all_null(), &[]), &request("oi"), &SchemaContext::new()).unwrap();
        let value = serde_json::to_value(&fields).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), FIELD_NAMES.len());
        assert!(FIELD_NAMES.iter().all(|f| object[*f].is_null()));
    }

    #[test]
    fn test_numbers_and_tax_id_normalized() {
        let raw = with(
            all_null(),
            &[
                ("tax_id", json!("040.074.561-51")),
                ("price", json!("R$ 2.200,50")),
                ("total_quantity", json!("120 ton")),
            ],
        );
        let fields = parse_extracted_fields(&raw, &request("CPF 040.074.561-51"), &SchemaContext::new()).unwrap();
        assert_eq!(fields.tax_id.as_deref(), Some("04007456151"));
        assert_eq!(fields.price, Some(2200.5));
        assert_eq!(fields.total_quantity, Some(120.0));
    }

    #[test]
    fn test_freight_guard_and_fill() {
        let raw = with(all_null(), &[("incoterm", json!("FOB")), ("freight_price", json!(150))]);
        let fields = parse_extracted_fields(&raw, &request("Incoterm FOB"), &SchemaContext::new()).unwrap();
        assert_eq!(fields.incoterm.as_deref(), Some("FOB"));
        assert_eq!(fields.freight_price, None);

        let fields = parse_extracted_fields(&with(all_null(), &[]), &request("CIF 170"), &SchemaContext::new()).unwrap();
        assert_eq!(fields.incoterm.as_deref(), Some("CIF"));
        assert_eq!(fields.freight_price, Some(170.0));
    }

    #[test]
    fn test_focus_fields_null_everything_else() {
        let raw = with(all_null(), &[("price", json!(10)), ("city", json!("Patos"))]);
        let req = request("preço 10").with_focus_fields(vec!["price".to_string()]);
        let fields = parse_extracted_fields(&raw, &req, &SchemaContext::new()).unwrap();
        assert_eq!(fields.price, Some(10.0));
        assert_eq!(fields.city, None);
    }

    #[test]
    fn test_history_leak_is_cleared() {
        let raw = with(all_null(), &[("city", json!("Uberaba")), ("price", json!(12))]);
        let req = ExtractionRequest::new(
            "preço 12",
            vec![ConversationTurn::user("Cliente em Uberaba")],
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        );
        let fields = parse_extracted_fields(&raw, &req, &SchemaContext::new()).unwrap();
        assert_eq!(fields.city, None);
        assert_eq!(fields.price, Some(12.0));
    }

    #[test]
    fn test_missing_required_and_freight_rule() {
        let mut fields = ExtractedFields {
            tax_id: Some("1".into()),
            plant: Some("P1".into()),
            payment_term: Some("30 dias".into()),
            payment_method: Some("Boleto".into()),
            material: Some("FS Ouro".into()),
            cadence: Some("02.2025:40 ton".into()),
            seller: Some("Ana".into()),
            city: Some("Uberaba".into()),
            negotiation_date: Some("10/01/2025".into()),
            incoterm: Some("CIF".into()),
            price: Some(10.0),
            ..ExtractedFields::default()
        };
        assert_eq!(fields.missing_required(), vec!["freight_price"]);
        fields.incoterm = Some("FOB".into());
        assert!(fields.missing_required().is_empty());
    }

    #[test]
    fn test_merge_keeps_existing_values() {
        let mut order = ExtractedFields {
            city: Some("Uberaba".into()),
            price: Some(10.0),
            ..ExtractedFields::default()
        };
        order.merge(&ExtractedFields {
            price: Some(12.0),
            seller: Some("Ana".into()),
            ..ExtractedFields::default()
        });
        assert_eq!(order.city.as_deref(), Some("Uberaba"));
        assert_eq!(order.price, Some(12.0));
        assert_eq!(order.seller.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_follow_up_question() {
        let fields = ExtractedFields {
            incoterm: Some("CIF".into()),
            ..ExtractedFields::default()
        };
        assert_eq!(follow_up_question(&fields, &[]), None);
        assert_eq!(
            follow_up_question(&fields, &["freight_price"]).as_deref(),
            Some("Since the Incoterm is 'CIF', please give the freight price.")
        );
        assert_eq!(
            follow_up_question(&fields, &["tax_id", "price"]).as_deref(),
            Some("Almost there! I still need: Tax ID (CNPJ/CPF), Price.")
        );

        let draft = OrderDraft::from_fields(fields);
        assert!(!draft.is_complete());
        assert!(draft.missing.contains(&"freight_price".to_string()));
        assert!(draft.message().ends_with(draft.follow_up.as_deref().unwrap()));
    }

    #[test]
    fn test_summary_freight_display() {
        let fields = ExtractedFields {
            incoterm: Some("CIF".into()),
            ..ExtractedFields::default()
        };
        assert!(fields.summary().contains("Freight: N/A (CIF - value not given)"));
    }
}
