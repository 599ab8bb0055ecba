//! Modelos de dominio (catálogo de productos, recomendaciones e historial).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Un producto del catálogo. Los atributos son un mapa abierto
/// (marca, color, material...) para no cerrar el esquema del catálogo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Marca del producto, leída del mapa de atributos.
    pub fn brand(&self) -> Option<&str> {
        self.attributes.get("brand").and_then(Value::as_str)
    }

    /// Valor de un atributo como texto (los escalares no-string se formatean).
    pub fn attribute_text(&self, key: &str) -> Option<String> {
        self.attributes.get(key).map(value_text)
    }
}

/// Representación textual de un valor de atributo para comparaciones.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Filtros estructurados de una búsqueda. Todos los criterios son opcionales
/// y se combinan en AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
            && self.brand.is_none()
            && self.attributes.as_ref().map_or(true, Map::is_empty)
    }
}

/// Criterios de ordenación de los resultados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    PriceAsc,
    PriceDesc,
    NameAsc,
    NameDesc,
    Newest,
    Oldest,
    #[default]
    Relevance,
}

impl SortKey {
    /// Interpreta la clave recibida del cliente. Una clave desconocida
    /// cae en `Relevance`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "price_asc" => Self::PriceAsc,
            "price_desc" => Self::PriceDesc,
            "name_asc" => Self::NameAsc,
            "name_desc" => Self::NameDesc,
            "newest" => Self::Newest,
            "oldest" => Self::Oldest,
            _ => Self::Relevance,
        }
    }
}

/// Recomendación producida por el modelo para un producto concreto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub product_id: i64,
    pub explanation: String,
    /// Puntuación 1-10 ya normalizada por el validador.
    pub relevance_score: u8,
}

/// Producto completo enriquecido con la explicación y puntuación del modelo.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedProduct {
    #[serde(flatten)]
    pub product: Product,
    pub ai_explanation: String,
    pub ai_relevance_score: u8,
}

/// Metadatos de paginación de una lista de resultados.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// Una página de elementos junto con sus metadatos.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Registro duradero de un intento de búsqueda (con o sin éxito).
/// Lo crea el orquestador una única vez por petición y nunca se modifica.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistoryEntry {
    pub id: Uuid,
    pub query: String,
    pub results_count: u32,
    pub execution_time_ms: u64,
    pub success: bool,
    pub error_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub filters: Value,
    pub sort_by: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Datos de un registro de historial antes de persistirlo.
#[derive(Debug, Clone)]
pub struct NewSearchRecord {
    pub query: String,
    pub results_count: u32,
    pub execution_time_ms: u64,
    pub success: bool,
    pub error_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub filters: Value,
    pub sort_by: Option<String>,
    pub user_id: Option<i64>,
}

impl Default for NewSearchRecord {
    fn default() -> Self {
        Self {
            query: String::new(),
            results_count: 0,
            execution_time_ms: 0,
            success: true,
            error_type: None,
            user_agent: None,
            ip_address: None,
            filters: Value::Object(Map::new()),
            sort_by: None,
            user_id: None,
        }
    }
}

/// Opciones de consulta del historial de búsquedas.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub page: u32,
    pub limit: u32,
    pub success_only: bool,
    pub text_filter: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub user_id: Option<i64>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            success_only: false,
            text_filter: None,
            from: None,
            to: None,
            user_id: None,
        }
    }
}

/// Término de búsqueda agregado para el ranking de populares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularSearch {
    pub query: String,
    #[serde(rename = "searchCount")]
    pub search_count: u64,
}

/// Datos para crear un producto nuevo en el catálogo.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub category: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Cambios parciales sobre un producto existente.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub attributes: Option<Map<String, Value>>,
}
