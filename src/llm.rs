//! Cliente de recomendaciones sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El contrato con el modelo es estricto: un array JSON de objetos
//! `{id, explanation, relevance_score}`, como máximo cinco, que el validador
//! local re-comprueba antes de entregarlos al orquestador.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{AppConfig, LlmProvider, RetryPolicy};
use crate::models::{Product, Recommendation};

/// Máximo de recomendaciones que se aceptan del modelo.
pub const MAX_RECOMMENDATIONS: usize = 5;
/// Longitud mínima (tras recortar espacios) de una explicación útil.
pub const MIN_EXPLANATION_CHARS: usize = 10;
/// Las descripciones se truncan en el prompt para acotar su tamaño.
const PROMPT_DESCRIPTION_CHARS: usize = 200;

/// Atributos que se destacan en el prompt cuando están presentes.
const KEY_FEATURE_ATTRIBUTES: [&str; 9] = [
    "brand", "color", "material", "storage", "processor", "memory", "type", "style", "capacity",
];

const ASSISTANT_PREAMBLE: &str = r#"
You are a helpful shopping assistant helping customers find the perfect products. Your goal is to explain why specific products match what the customer is looking for in a friendly, conversational way.

INSTRUCTIONS FOR EXPLANATIONS:
- Write like you're personally recommending to a friend
- Focus on benefits and value, not technical matching
- Be specific about why this product fits their needs
- Keep explanations conversational and engaging (2-3 sentences)
- Avoid phrases like "matches your query" or "key matches"

SCORING CRITERIA (1-10):
- 9-10: Perfect match for the user's specific needs
- 7-8: Very good match with minor limitations
- 5-6: Good option but may not be ideal
- 3-4: Okay alternative but missing key features
- 1-2: Poor fit for the user's needs

Only recommend products with scores of 5 or higher. If no products score 5+, return empty array [].

REQUIRED JSON FORMAT:
[
  {
    "id": number,
    "explanation": "Natural, conversational explanation of why this product is great for them",
    "relevance_score": number
  }
]

Maximum 5 products. Focus on the best matches. Respond with the JSON array only, no extra text.
"#;

const HEALTH_PROMPT: &str = r#"Respond with exactly "CONNECTION_OK""#;
const HEALTH_EXPECTED: &str = "CONNECTION_OK";

/// Error tipado del cliente de recomendaciones. Cada variante se corresponde
/// con un tratamiento distinto en el orquestador (código externo y reintentos).
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("petición inválida: {0}")]
    Validation(String),
    #[error("configuración incompleta: {0}")]
    Configuration(String),
    #[error("límite de peticiones de la API alcanzado: {0}")]
    RateLimit(String),
    #[error("cuota de la API agotada: {0}")]
    Quota(String),
    #[error("tiempo de espera agotado: {0}")]
    Timeout(String),
    #[error("respuesta del modelo inválida: {0}")]
    Response(String),
    #[error("error de la API del modelo: {0}")]
    Api(String),
}

impl LlmError {
    /// Etiqueta estable con la que se registra el fallo en el historial.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::RateLimit(_) => "RATE_LIMIT_ERROR",
            Self::Quota(_) => "QUOTA_ERROR",
            Self::Timeout(_) => "TIMEOUT_ERROR",
            Self::Response(_) => "RESPONSE_ERROR",
            Self::Api(_) => "API_ERROR",
        }
    }

    /// Los errores de cuota y credenciales no se reintentan jamás; el resto
    /// de fallos del proveedor se consideran transitorios.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit(_) | Self::Timeout(_) | Self::Response(_) | Self::Api(_)
        )
    }

    /// Clasifica un error del proveedor a partir de su mensaje.
    fn classify(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            Self::RateLimit(message)
        } else if lower.contains("insufficient_quota") {
            Self::Quota(message)
        } else if lower.contains("invalid_api_key") || lower.contains("incorrect api key") {
            Self::Configuration(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(message)
        } else {
            Self::Api(message)
        }
    }
}

/// Interfaz del recomendador que consume el orquestador de búsqueda.
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Pide al modelo que puntúe y explique los candidatos para una query.
    /// Una lista vacía es un resultado legítimo (nada encaja), no un error.
    async fn recommend(
        &self,
        query: &str,
        products: &[Product],
    ) -> Result<Vec<Recommendation>, LlmError>;

    /// Comprobación de vida sin efectos secundarios, con su propio timeout.
    async fn health_check(&self) -> Result<bool, LlmError>;
}

/// Cliente real contra la API del proveedor configurado.
#[derive(Debug, Clone)]
pub struct LlmRecommender {
    provider: LlmProvider,
    model: String,
    temperature: f64,
    max_tokens: u64,
    request_timeout: Duration,
    health_timeout: Duration,
    retry: RetryPolicy,
    max_query_len: usize,
}

impl LlmRecommender {
    /// Construye el cliente a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            model: cfg.llm_model.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
            request_timeout: cfg.llm_timeout,
            health_timeout: cfg.llm_health_timeout,
            retry: cfg.retry.clone(),
            max_query_len: cfg.max_query_len,
        })
    }

    // ---------------------------------------------------------------------
    // LLAMADA AL MODELO
    // ---------------------------------------------------------------------

    /// Un único intento: llamada con timeout, parseo y validación local.
    async fn call_model(
        &self,
        prompt: &str,
        candidates: &[Product],
    ) -> Result<Vec<Recommendation>, LlmError> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();
        let agent = client
            .agent(&self.model)
            .preamble(ASSISTANT_PREAMBLE)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build();

        let response = match tokio::time::timeout(self.request_timeout, agent.prompt(prompt)).await
        {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return Err(LlmError::classify(err.to_string())),
            Err(_) => {
                return Err(LlmError::Timeout(format!(
                    "la llamada al modelo superó los {} ms",
                    self.request_timeout.as_millis()
                )))
            }
        };

        let raw = parse_model_response(&response)?;
        Ok(validate_recommendations(&raw, candidates))
    }
}

#[async_trait]
impl Recommender for LlmRecommender {
    async fn recommend(
        &self,
        query: &str,
        products: &[Product],
    ) -> Result<Vec<Recommendation>, LlmError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(LlmError::Validation(
                "la query debe ser una cadena no vacía".into(),
            ));
        }
        if trimmed.chars().count() > self.max_query_len {
            return Err(LlmError::Validation(format!(
                "la query supera los {} caracteres admitidos",
                self.max_query_len
            )));
        }
        if products.is_empty() {
            return Err(LlmError::Validation(
                "se necesita al menos un producto candidato".into(),
            ));
        }
        if env::var("OPENAI_API_KEY").is_err() {
            return Err(LlmError::Configuration(
                "falta OPENAI_API_KEY en el entorno".into(),
            ));
        }
        if !matches!(self.provider, LlmProvider::OpenAI) {
            return Err(LlmError::Configuration(format!(
                "proveedor LLM {:?} aún no implementado",
                self.provider
            )));
        }

        info!(
            "🤖 Petición LLM - query: \"{}\", candidatos: {}",
            preview(trimmed, 50),
            products.len()
        );
        let prompt = build_prompt(trimmed, products);

        let mut attempt = 0;
        loop {
            match self.call_model(&prompt, products).await {
                Ok(recommendations) => {
                    info!("✅ Respuesta LLM - recomendaciones: {}", recommendations.len());
                    return Ok(recommendations);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "🔄 Reintento LLM {}/{} en {} ms - {}",
                        attempt,
                        self.retry.max_retries,
                        delay.as_millis(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn health_check(&self) -> Result<bool, LlmError> {
        use rig::providers::openai;
        use rig::client::CompletionClient as _;

        if env::var("OPENAI_API_KEY").is_err() {
            error!("❌ Falta OPENAI_API_KEY en el entorno");
            return Ok(false);
        }

        info!("🧪 Probando la conexión con el LLM...");
        let client = openai::Client::from_env();
        let agent = client.agent(&self.model).build();

        match tokio::time::timeout(self.health_timeout, agent.prompt(HEALTH_PROMPT)).await {
            Ok(Ok(reply)) => Ok(reply.contains(HEALTH_EXPECTED)),
            Ok(Err(err)) => {
                error!("❌ La prueba de conexión con el LLM ha fallado: {err}");
                Ok(false)
            }
            Err(_) => {
                error!("❌ La prueba de conexión con el LLM ha superado el tiempo máximo");
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------
// PROMPT
// ---------------------------------------------------------------------

/// Mensaje de usuario: la petición y los candidatos en formato compacto.
fn build_prompt(query: &str, products: &[Product]) -> String {
    let compact = format_products(products);
    format!(
        "USER'S REQUEST: \"{}\"\n\nAVAILABLE PRODUCTS:\n{}\n\nJSON Response:",
        query,
        serde_json::to_string_pretty(&compact).unwrap_or_else(|_| "[]".to_string())
    )
}

/// Registro compacto por producto para acotar el tamaño del prompt.
fn format_products(products: &[Product]) -> Value {
    Value::Array(
        products
            .iter()
            .map(|p| {
                json!({
                    "id": p.id,
                    "name": p.name,
                    "description": truncate_chars(&p.description, PROMPT_DESCRIPTION_CHARS),
                    "price": format!("${}", p.price),
                    "category": p.category,
                    "key_features": extract_key_features(p),
                    "brand": p.brand().unwrap_or("Unknown"),
                })
            })
            .collect(),
    )
}

fn extract_key_features(product: &Product) -> Vec<String> {
    KEY_FEATURE_ATTRIBUTES
        .iter()
        .filter_map(|key| {
            product
                .attribute_text(key)
                .map(|value| format!("{key}: {value}"))
        })
        .collect()
}

// ---------------------------------------------------------------------
// PARSEO Y VALIDACIÓN DE LA RESPUESTA
// ---------------------------------------------------------------------

/// Extrae el array JSON de la respuesta del modelo. Un array vacío es válido;
/// cualquier otra forma (texto suelto, objeto) es un error de respuesta.
fn parse_model_response(response: &str) -> Result<Vec<Value>, LlmError> {
    // Limpiar la respuesta del LLM para asegurar que solo contenga el JSON
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed: Value = serde_json::from_str(cleaned).map_err(|err| {
        warn!("No se pudo parsear el JSON del modelo. Error: {err}. Respuesta: '{}'", preview(response, 200));
        LlmError::Response(format!("el modelo no devolvió JSON válido: {err}"))
    })?;

    match parsed {
        Value::Array(items) => Ok(items),
        other => Err(LlmError::Response(format!(
            "el modelo devolvió {} en lugar de un array",
            value_kind(&other)
        ))),
    }
}

/// Re-valida localmente lo que el prompt ya exige al modelo: ids existentes,
/// puntuación en [1,10], explicación con sustancia, cinco resultados como
/// máximo ordenados por puntuación descendente.
pub fn validate_recommendations(raw: &[Value], candidates: &[Product]) -> Vec<Recommendation> {
    let known_ids: HashSet<i64> = candidates.iter().map(|p| p.id).collect();
    let mut validated = Vec::new();

    for item in raw {
        let Some(object) = item.as_object() else {
            warn!("⚠️ Se descarta una recomendación que no es un objeto: {item}");
            continue;
        };
        let Some(id) = object.get("id").and_then(value_as_i64) else {
            warn!("⚠️ Se descarta una recomendación sin id: {item}");
            continue;
        };
        let Some(explanation) = object.get("explanation").and_then(Value::as_str) else {
            warn!("⚠️ Se descarta una recomendación sin explicación para el producto {id}");
            continue;
        };
        let Some(score_value) = object.get("relevance_score") else {
            warn!("⚠️ Se descarta una recomendación sin puntuación para el producto {id}");
            continue;
        };

        if !known_ids.contains(&id) {
            warn!("⚠️ Se descarta una recomendación para un producto inexistente: {id}");
            continue;
        }

        let explanation = explanation.trim().to_string();
        if explanation.chars().count() < MIN_EXPLANATION_CHARS {
            warn!("⚠️ Se descarta una recomendación con explicación insuficiente para el producto {id}");
            continue;
        }

        let relevance_score = value_as_i64(score_value).unwrap_or(1).clamp(1, 10) as u8;
        validated.push(Recommendation {
            product_id: id,
            explanation,
            relevance_score,
        });
    }

    validated.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    validated.truncate(MAX_RECOMMENDATIONS);
    validated
}

fn value_as_i64(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Some(f) = value.as_f64() {
        return Some(f as i64);
    }
    value
        .as_str()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|f| f as i64)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "un booleano",
        Value::Number(_) => "un número",
        Value::String(_) => "una cadena",
        Value::Array(_) => "un array",
        Value::Object(_) => "un objeto",
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", truncate_chars(text, max_chars))
    }
}
