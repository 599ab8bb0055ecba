//! Orquestación de la búsqueda asistida por IA.
//!
//! Flujo por petición:
//!   1. Validación de la query (escalera: ausente → tipo → vacía → longitud).
//!   2. Carga del catálogo completo desde el almacén.
//!   3. Filtrado estructurado antes de llamar al modelo (acota el prompt).
//!   4. Llamada al cliente de recomendaciones (reintentos incluidos).
//!   5. Enriquecimiento de los ids recomendados con el producto completo.
//!   6. Ordenación y paginación.
//!   7. Registro del desenlace en el historial, pase lo que pase.
//!
//! Cada desenlace terminal registra exactamente una entrada de historial; un
//! fallo al registrar se traza y se traga, nunca tumba la respuesta primaria.

use std::cmp::Ordering;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::llm::{LlmError, Recommender};
use crate::models::{
    EnrichedProduct, NewSearchRecord, Page, PaginationMeta, Product, Recommendation,
    SearchFilters, SortKey,
};
use crate::product_store::ProductStore;
use crate::search_history::SearchHistoryStore;

/// Longitud máxima admitida para la query del usuario.
pub const MAX_QUERY_CHARS: usize = 500;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;

/// Mensaje que acompaña a una búsqueda correcta sin resultados.
const NO_MATCHES_MESSAGE: &str =
    "Ningún producto coincide con tu búsqueda. Prueba con otras palabras o amplía los filtros.";

/// Petición de búsqueda tal y como llega del cliente. La query se transporta
/// como JSON crudo para poder distinguir "ausente" de "no es una cadena".
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: Option<Value>,
    pub filters: SearchFilters,
    pub sort_by: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Metadatos del cliente que acompañan al registro de historial.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub user_id: Option<i64>,
}

/// Motivo por el que la query no supera la validación de entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRejection {
    Missing,
    NotAString,
    Empty,
    TooLong,
}

impl QueryRejection {
    /// Código estable que ve el cliente y que se guarda en el historial.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "MISSING_QUERY",
            Self::NotAString => "INVALID_QUERY_TYPE",
            Self::Empty => "EMPTY_QUERY",
            Self::TooLong => "QUERY_TOO_LONG",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Missing => "La query de búsqueda es obligatoria",
            Self::NotAString => "La query debe ser una cadena de texto",
            Self::Empty => "La query no puede estar vacía",
            Self::TooLong => "La query debe tener menos de 500 caracteres",
        }
    }
}

/// Resultado completo de una búsqueda con éxito.
#[derive(Debug, Clone)]
pub struct SearchSuccess {
    pub query: String,
    pub results: Vec<EnrichedProduct>,
    pub filters: SearchFilters,
    pub sort_by: String,
    pub pagination: PaginationMeta,
    /// Total de resultados enriquecidos antes de paginar.
    pub total_results: usize,
    pub message: Option<String>,
    pub execution_time_ms: u64,
}

/// Desenlace terminal de una petición de búsqueda. El manejador HTTP lo
/// traduce a un código de estado y un cuerpo; aquí ya está todo decidido.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Success(Box<SearchSuccess>),
    InvalidQuery {
        rejection: QueryRejection,
        execution_time_ms: u64,
    },
    NoProducts {
        execution_time_ms: u64,
    },
    Llm {
        error: LlmError,
        execution_time_ms: u64,
    },
    Storage {
        execution_time_ms: u64,
    },
}

// ---------------------------------------------------------------------
// ORQUESTADOR
// ---------------------------------------------------------------------

/// Ejecuta el pipeline completo de una búsqueda.
pub async fn run_search(
    products: &ProductStore,
    history: &SearchHistoryStore,
    recommender: &dyn Recommender,
    request: SearchRequest,
    meta: ClientMeta,
) -> SearchOutcome {
    let started = Instant::now();
    let elapsed = |s: &Instant| s.elapsed().as_millis() as u64;

    // 1) Escalera de validación: el primer fallo gana y se registra con su
    //    propio motivo.
    let query = match validate_query(&request.query) {
        Ok(query) => query,
        Err((rejection, recorded_query)) => {
            let execution_time_ms = elapsed(&started);
            record_outcome(
                history,
                NewSearchRecord {
                    query: recorded_query,
                    success: false,
                    error_type: Some(rejection.code().to_string()),
                    execution_time_ms,
                    user_agent: meta.user_agent,
                    ip_address: meta.ip_address,
                    user_id: meta.user_id,
                    ..Default::default()
                },
            );
            return SearchOutcome::InvalidQuery {
                rejection,
                execution_time_ms,
            };
        }
    };

    let sort_by_raw = request
        .sort_by
        .clone()
        .unwrap_or_else(|| "relevance".to_string());
    let sort_key = SortKey::parse(&sort_by_raw);
    let page = request.page.unwrap_or(DEFAULT_PAGE).max(1);
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT).max(1);
    let filters_json =
        serde_json::to_value(&request.filters).unwrap_or_else(|_| json!({}));

    info!(
        "🔍 Búsqueda - usuario: {}, query: \"{}\", orden: {}",
        meta.user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "anónimo".to_string()),
        query,
        sort_by_raw
    );

    // 2) Catálogo completo
    let all_products = match products.list_products(None) {
        Ok(all) => all,
        Err(err) => {
            error!("❌ Error de almacenamiento al listar el catálogo: {err}");
            let execution_time_ms = elapsed(&started);
            record_outcome(
                history,
                NewSearchRecord {
                    query,
                    success: false,
                    error_type: Some("DATABASE_ERROR".to_string()),
                    execution_time_ms,
                    filters: filters_json,
                    sort_by: Some(sort_by_raw),
                    user_agent: meta.user_agent,
                    ip_address: meta.ip_address,
                    user_id: meta.user_id,
                    ..Default::default()
                },
            );
            return SearchOutcome::Storage { execution_time_ms };
        }
    };

    if all_products.is_empty() {
        let execution_time_ms = elapsed(&started);
        record_outcome(
            history,
            NewSearchRecord {
                query,
                success: false,
                error_type: Some("NO_PRODUCTS".to_string()),
                execution_time_ms,
                filters: filters_json,
                sort_by: Some(sort_by_raw),
                user_agent: meta.user_agent,
                ip_address: meta.ip_address,
                user_id: meta.user_id,
                ..Default::default()
            },
        );
        return SearchOutcome::NoProducts { execution_time_ms };
    }

    // 3) Filtros estructurados antes del modelo
    let candidates = apply_filters(all_products, &request.filters);
    if candidates.is_empty() {
        // Los filtros han vaciado el conjunto de candidatos: es el mismo
        // desenlace que "el modelo no encontró nada", sin gastar la llamada.
        info!("📭 Búsqueda completada - los filtros no dejan candidatos");
        return empty_success(
            history, meta, query, request.filters, sort_by_raw, limit, started,
        );
    }

    // 4) Recomendación con reintentos dentro del cliente
    let recommendations = match recommender.recommend(&query, &candidates).await {
        Ok(recommendations) => recommendations,
        Err(err) => {
            let execution_time_ms = elapsed(&started);
            error!("❌ Error de búsqueda - {} ms - {err}", execution_time_ms);
            record_outcome(
                history,
                NewSearchRecord {
                    query,
                    success: false,
                    error_type: Some(err.kind_str().to_string()),
                    execution_time_ms,
                    filters: filters_json,
                    sort_by: Some(sort_by_raw),
                    user_agent: meta.user_agent,
                    ip_address: meta.ip_address,
                    user_id: meta.user_id,
                    ..Default::default()
                },
            );
            return SearchOutcome::Llm {
                error: err,
                execution_time_ms,
            };
        }
    };

    if recommendations.is_empty() {
        info!("📭 Búsqueda completada - el modelo no encontró coincidencias");
        return empty_success(
            history, meta, query, request.filters, sort_by_raw, limit, started,
        );
    }

    // 5) Enriquecer, 6) ordenar, 7) paginar
    let enriched = enrich(&recommendations, products);
    let total_results = enriched.len();
    let sorted = apply_sorting(enriched, sort_key);
    let page_result = paginate(sorted, page, limit);

    let execution_time_ms = elapsed(&started);
    info!(
        "✅ Búsqueda completada - {} productos, {} ms",
        total_results, execution_time_ms
    );
    record_outcome(
        history,
        NewSearchRecord {
            query: query.clone(),
            results_count: total_results as u32,
            success: true,
            execution_time_ms,
            filters: filters_json,
            sort_by: Some(sort_by_raw.clone()),
            user_agent: meta.user_agent,
            ip_address: meta.ip_address,
            user_id: meta.user_id,
            ..Default::default()
        },
    );

    SearchOutcome::Success(Box::new(SearchSuccess {
        query,
        results: page_result.data,
        filters: request.filters,
        sort_by: sort_by_raw,
        pagination: page_result.pagination,
        total_results,
        message: None,
        execution_time_ms,
    }))
}

/// Desenlace de éxito sin resultados (distinto de "catálogo vacío").
fn empty_success(
    history: &SearchHistoryStore,
    meta: ClientMeta,
    query: String,
    filters: SearchFilters,
    sort_by_raw: String,
    limit: u32,
    started: Instant,
) -> SearchOutcome {
    let execution_time_ms = started.elapsed().as_millis() as u64;
    let filters_json = serde_json::to_value(&filters).unwrap_or_else(|_| json!({}));
    record_outcome(
        history,
        NewSearchRecord {
            query: query.clone(),
            results_count: 0,
            success: true,
            execution_time_ms,
            filters: filters_json,
            sort_by: Some(sort_by_raw.clone()),
            user_agent: meta.user_agent,
            ip_address: meta.ip_address,
            user_id: meta.user_id,
            ..Default::default()
        },
    );
    let page_result: Page<EnrichedProduct> = paginate(Vec::new(), 1, limit);
    SearchOutcome::Success(Box::new(SearchSuccess {
        query,
        results: Vec::new(),
        filters,
        sort_by: sort_by_raw,
        pagination: page_result.pagination,
        total_results: 0,
        message: Some(NO_MATCHES_MESSAGE.to_string()),
        execution_time_ms,
    }))
}

/// Valida la query cruda. Devuelve la query recortada, o el motivo de
/// rechazo junto con el texto que debe quedar en el historial.
fn validate_query(raw: &Option<Value>) -> Result<String, (QueryRejection, String)> {
    match raw {
        None => Err((QueryRejection::Missing, "MISSING_QUERY".to_string())),
        Some(Value::String(text)) => {
            if text.trim().is_empty() {
                return Err((QueryRejection::Empty, text.clone()));
            }
            if text.chars().count() > MAX_QUERY_CHARS {
                let prefix: String = text.chars().take(100).collect();
                return Err((QueryRejection::TooLong, format!("{prefix}...")));
            }
            Ok(text.trim().to_string())
        }
        Some(other) => Err((QueryRejection::NotAString, other.to_string())),
    }
}

/// Registra una entrada de historial tragándose cualquier error.
fn record_outcome(history: &SearchHistoryStore, record: NewSearchRecord) {
    if let Err(err) = history.record(record) {
        error!("No se pudo registrar el historial de búsqueda: {err}");
    }
}

// ---------------------------------------------------------------------
// ETAPAS PURAS DEL PIPELINE
// ---------------------------------------------------------------------

/// Aplica los filtros estructurados en AND. Sin criterios, es la identidad.
pub fn apply_filters(products: Vec<Product>, filters: &SearchFilters) -> Vec<Product> {
    if filters.is_empty() {
        return products;
    }
    products
        .into_iter()
        .filter(|p| matches_filters(p, filters))
        .collect()
}

fn matches_filters(product: &Product, filters: &SearchFilters) -> bool {
    if let Some(category) = &filters.category {
        if product.category.to_lowercase() != category.to_lowercase() {
            return false;
        }
    }
    if let Some(min) = filters.min_price {
        if product.price < min {
            return false;
        }
    }
    if let Some(max) = filters.max_price {
        if product.price > max {
            return false;
        }
    }
    if let Some(brand) = &filters.brand {
        match product.brand() {
            Some(b) if b.to_lowercase() == brand.to_lowercase() => {}
            _ => return false,
        }
    }
    if let Some(wanted) = &filters.attributes {
        for (key, value) in wanted {
            // Un atributo ausente nunca coincide.
            match product.attribute_text(key) {
                Some(actual)
                    if actual.to_lowercase()
                        == crate::models::value_text(value).to_lowercase() => {}
                _ => return false,
            }
        }
    }
    true
}

/// Une cada recomendación con su producto completo. Un id que ya no existe
/// se omite con un aviso: una recomendación mala no tumba la búsqueda.
pub fn enrich(recommendations: &[Recommendation], store: &ProductStore) -> Vec<EnrichedProduct> {
    let mut enriched = Vec::with_capacity(recommendations.len());
    for recommendation in recommendations {
        match store.get_product_by_id(recommendation.product_id) {
            Ok(Some(product)) => enriched.push(EnrichedProduct {
                product,
                ai_explanation: recommendation.explanation.clone(),
                ai_relevance_score: recommendation.relevance_score,
            }),
            Ok(None) => {
                warn!(
                    "⚠️ El producto {} recomendado por el modelo no existe",
                    recommendation.product_id
                );
            }
            Err(err) => {
                error!(
                    "❌ Error de almacenamiento al cargar el producto {}: {err}",
                    recommendation.product_id
                );
            }
        }
    }
    enriched
}

/// Reordena los resultados según la clave pedida.
pub fn apply_sorting(mut results: Vec<EnrichedProduct>, key: SortKey) -> Vec<EnrichedProduct> {
    match key {
        SortKey::PriceAsc => results.sort_by(|a, b| compare_prices(&a.product, &b.product)),
        SortKey::PriceDesc => {
            results.sort_by(|a, b| compare_prices(&b.product, &a.product))
        }
        SortKey::NameAsc => results.sort_by(|a, b| compare_names(&a.product, &b.product)),
        SortKey::NameDesc => results.sort_by(|a, b| compare_names(&b.product, &a.product)),
        SortKey::Newest => {
            results.sort_by(|a, b| b.product.created_at.cmp(&a.product.created_at))
        }
        SortKey::Oldest => {
            results.sort_by(|a, b| a.product.created_at.cmp(&b.product.created_at))
        }
        SortKey::Relevance => {
            results.sort_by(|a, b| b.ai_relevance_score.cmp(&a.ai_relevance_score))
        }
    }
    results
}

fn compare_prices(a: &Product, b: &Product) -> Ordering {
    a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal)
}

fn compare_names(a: &Product, b: &Product) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}

/// Pagina una lista ya ordenada. Una página fuera de rango devuelve datos
/// vacíos con los metadatos correctos, nunca un error.
pub fn paginate<T>(items: Vec<T>, page: u32, limit: u32) -> Page<T> {
    let total = items.len();
    let total_pages = (total as u32).div_ceil(limit);
    let offset = (page as usize - 1).saturating_mul(limit as usize);
    let data: Vec<T> = items
        .into_iter()
        .skip(offset)
        .take(limit as usize)
        .collect();
    Page {
        data,
        pagination: PaginationMeta {
            page,
            limit,
            total,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryQuery;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;

    // -----------------------------------------------------------------
    // Utilidades de prueba
    // -----------------------------------------------------------------

    fn product(id: i64, name: &str, price: f64, category: &str, brand: &str) -> Product {
        let mut attributes = serde_json::Map::new();
        attributes.insert("brand".into(), json!(brand));
        Product {
            id,
            name: name.to_string(),
            description: format!("Descripción de {name}"),
            price,
            category: category.to_string(),
            image_url: None,
            attributes,
            created_at: Utc::now() - Duration::minutes(id),
            updated_at: Utc::now(),
        }
    }

    fn enriched(p: Product, score: u8) -> EnrichedProduct {
        EnrichedProduct {
            product: p,
            ai_explanation: "Una explicación suficientemente larga".into(),
            ai_relevance_score: score,
        }
    }

    /// Recomendador de pruebas que devuelve siempre la misma respuesta.
    struct StubRecommender(Result<Vec<Recommendation>, LlmError>);

    #[async_trait]
    impl Recommender for StubRecommender {
        async fn recommend(
            &self,
            _query: &str,
            _products: &[Product],
        ) -> Result<Vec<Recommendation>, LlmError> {
            self.0.clone()
        }

        async fn health_check(&self) -> Result<bool, LlmError> {
            Ok(true)
        }
    }

    /// Recomendador que no debe llegar a invocarse.
    struct UnreachableRecommender;

    #[async_trait]
    impl Recommender for UnreachableRecommender {
        async fn recommend(
            &self,
            _query: &str,
            _products: &[Product],
        ) -> Result<Vec<Recommendation>, LlmError> {
            panic!("el cliente de recomendaciones no debería haberse llamado");
        }

        async fn health_check(&self) -> Result<bool, LlmError> {
            Ok(true)
        }
    }

    fn seeded_store() -> ProductStore {
        let store = ProductStore::new();
        store
            .create_product(crate::models::NewProduct {
                name: "MacBook Pro 14-inch".into(),
                description: "Professional laptop with M3 chip".into(),
                price: 1999.99,
                category: "Electronics".into(),
                image_url: None,
                attributes: [("brand".to_string(), json!("Apple"))].into_iter().collect(),
            })
            .unwrap();
        store
            .create_product(crate::models::NewProduct {
                name: "Sony WH-1000XM5 Headphones".into(),
                description: "Premium noise-canceling headphones".into(),
                price: 399.99,
                category: "Electronics".into(),
                image_url: None,
                attributes: [("brand".to_string(), json!("Sony"))].into_iter().collect(),
            })
            .unwrap();
        store
    }

    fn request(query: Value) -> SearchRequest {
        SearchRequest {
            query: Some(query),
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------
    // Filtros
    // -----------------------------------------------------------------

    #[test]
    fn filters_are_conjunctive_and_case_insensitive() {
        let products = vec![
            product(1, "Portátil", 1200.0, "Electronics", "Apple"),
            product(2, "Auriculares", 300.0, "Electronics", "Sony"),
            product(3, "Zapatillas", 120.0, "Footwear", "Nike"),
        ];

        let filters = SearchFilters {
            category: Some("ELECTRONICS".into()),
            min_price: Some(200.0),
            max_price: Some(1500.0),
            brand: Some("apple".into()),
            attributes: None,
        };
        let out = apply_filters(products.clone(), &filters);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);

        // Sin criterios, identidad.
        let out = apply_filters(products.clone(), &SearchFilters::default());
        assert_eq!(out.len(), 3);

        // Todo superviviente cumple todos los predicados.
        let filters = SearchFilters {
            min_price: Some(150.0),
            ..Default::default()
        };
        let out = apply_filters(products, &filters);
        assert!(out.iter().all(|p| p.price >= 150.0));
    }

    #[test]
    fn attribute_filter_requires_every_key() {
        let mut with_color = product(1, "Camiseta", 20.0, "Clothing", "Nike");
        with_color.attributes.insert("color".into(), json!("Black"));
        let without_color = product(2, "Pantalón", 30.0, "Clothing", "Nike");

        let mut wanted = serde_json::Map::new();
        wanted.insert("color".into(), json!("black"));
        let filters = SearchFilters {
            attributes: Some(wanted),
            ..Default::default()
        };

        let out = apply_filters(vec![with_color, without_color], &filters);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
    }

    // -----------------------------------------------------------------
    // Ordenación
    // -----------------------------------------------------------------

    #[test]
    fn sorting_is_a_permutation_with_the_right_order() {
        let items = vec![
            enriched(product(1, "beta", 30.0, "X", "A"), 5),
            enriched(product(2, "Alfa", 10.0, "X", "A"), 9),
            enriched(product(3, "gamma", 20.0, "X", "A"), 1),
        ];

        let by_price = apply_sorting(items.clone(), SortKey::PriceAsc);
        let prices: Vec<f64> = by_price.iter().map(|e| e.product.price).collect();
        assert_eq!(prices, vec![10.0, 20.0, 30.0]);
        assert_eq!(by_price.len(), items.len());

        let by_price_desc = apply_sorting(items.clone(), SortKey::PriceDesc);
        assert_eq!(by_price_desc[0].product.price, 30.0);

        let by_name = apply_sorting(items.clone(), SortKey::NameAsc);
        let names: Vec<&str> = by_name.iter().map(|e| e.product.name.as_str()).collect();
        assert_eq!(names, vec!["Alfa", "beta", "gamma"]);

        let newest = apply_sorting(items.clone(), SortKey::Newest);
        assert_eq!(newest[0].product.id, 1);
        let oldest = apply_sorting(items.clone(), SortKey::Oldest);
        assert_eq!(oldest[0].product.id, 3);

        let by_relevance = apply_sorting(items.clone(), SortKey::Relevance);
        let scores: Vec<u8> = by_relevance.iter().map(|e| e.ai_relevance_score).collect();
        assert_eq!(scores, vec![9, 5, 1]);

        // Una clave desconocida equivale a relevancia.
        assert_eq!(SortKey::parse("no_existe"), SortKey::Relevance);
        assert_eq!(SortKey::parse("price_asc"), SortKey::PriceAsc);
    }

    // -----------------------------------------------------------------
    // Paginación
    // -----------------------------------------------------------------

    #[test]
    fn pagination_slices_and_reports_meta() {
        let items: Vec<i32> = (1..=25).collect();

        let page = paginate(items.clone(), 1, 10);
        assert_eq!(page.data, (1..=10).collect::<Vec<_>>());
        assert_eq!(page.pagination.total, 25);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(page.pagination.has_next_page);
        assert!(!page.pagination.has_prev_page);

        let page = paginate(items.clone(), 3, 10);
        assert_eq!(page.data, (21..=25).collect::<Vec<_>>());
        assert!(!page.pagination.has_next_page);
        assert!(page.pagination.has_prev_page);

        // Fuera de rango: datos vacíos, metadatos correctos.
        let page = paginate(items.clone(), 9, 10);
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.total, 25);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(!page.pagination.has_next_page);

        let page = paginate(Vec::<i32>::new(), 1, 10);
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.total_pages, 0);

        // Longitud de página: min(limit, total - offset).
        for p in 1..=4u32 {
            let expected = (25i64 - (p as i64 - 1) * 7).clamp(0, 7) as usize;
            assert_eq!(paginate(items.clone(), p, 7).data.len(), expected);
        }
    }

    // -----------------------------------------------------------------
    // Enriquecimiento
    // -----------------------------------------------------------------

    #[test]
    fn enrich_skips_missing_products() {
        let store = seeded_store();
        let recommendations = vec![
            Recommendation {
                product_id: 1,
                explanation: "Una explicación suficientemente larga".into(),
                relevance_score: 9,
            },
            Recommendation {
                product_id: 999,
                explanation: "Otra explicación suficientemente larga".into(),
                relevance_score: 7,
            },
        ];
        let out = enrich(&recommendations, &store);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].product.id, 1);
        assert_eq!(out[0].ai_relevance_score, 9);
    }

    // -----------------------------------------------------------------
    // Orquestador: escenarios extremo a extremo
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn scenario_happy_path_enriches_and_paginates() {
        let store = seeded_store();
        let history = SearchHistoryStore::new();
        let stub = StubRecommender(Ok(vec![Recommendation {
            product_id: 1,
            explanation: "Perfect for campus life and creative work".into(),
            relevance_score: 9,
        }]));

        let outcome = run_search(
            &store,
            &history,
            &stub,
            request(json!("laptop for college")),
            ClientMeta::default(),
        )
        .await;

        let SearchOutcome::Success(success) = outcome else {
            panic!("se esperaba un desenlace de éxito");
        };
        assert_eq!(success.query, "laptop for college");
        assert_eq!(success.results.len(), 1);
        assert_eq!(success.results[0].product.id, 1);
        assert_eq!(success.results[0].ai_relevance_score, 9);
        assert!(!success.results[0].ai_explanation.is_empty());
        assert_eq!(success.pagination.total, 1);
        assert_eq!(success.total_results, 1);
        assert!(success.message.is_none());

        let entries = history.history(&HistoryQuery::default()).unwrap();
        assert_eq!(entries.pagination.total, 1);
        assert!(entries.data[0].success);
        assert_eq!(entries.data[0].results_count, 1);
        assert_eq!(entries.data[0].query, "laptop for college");
    }

    #[tokio::test]
    async fn scenario_blank_and_missing_queries_are_rejected_and_logged() {
        let store = seeded_store();
        let history = SearchHistoryStore::new();

        let outcome = run_search(
            &store,
            &history,
            &UnreachableRecommender,
            request(json!("   ")),
            ClientMeta::default(),
        )
        .await;
        assert!(matches!(
            outcome,
            SearchOutcome::InvalidQuery { rejection: QueryRejection::Empty, .. }
        ));

        let outcome = run_search(
            &store,
            &history,
            &UnreachableRecommender,
            SearchRequest::default(),
            ClientMeta::default(),
        )
        .await;
        assert!(matches!(
            outcome,
            SearchOutcome::InvalidQuery { rejection: QueryRejection::Missing, .. }
        ));

        let outcome = run_search(
            &store,
            &history,
            &UnreachableRecommender,
            request(json!(42)),
            ClientMeta::default(),
        )
        .await;
        assert!(matches!(
            outcome,
            SearchOutcome::InvalidQuery { rejection: QueryRejection::NotAString, .. }
        ));

        let outcome = run_search(
            &store,
            &history,
            &UnreachableRecommender,
            request(json!("x".repeat(501))),
            ClientMeta::default(),
        )
        .await;
        assert!(matches!(
            outcome,
            SearchOutcome::InvalidQuery { rejection: QueryRejection::TooLong, .. }
        ));

        let entries = history.history(&HistoryQuery::default()).unwrap();
        assert_eq!(entries.pagination.total, 4);
        assert!(entries.data.iter().all(|e| !e.success));
        let kinds: Vec<Option<&str>> = entries
            .data
            .iter()
            .map(|e| e.error_type.as_deref())
            .collect();
        assert!(kinds.contains(&Some("EMPTY_QUERY")));
        assert!(kinds.contains(&Some("MISSING_QUERY")));
        assert!(kinds.contains(&Some("INVALID_QUERY_TYPE")));
        assert!(kinds.contains(&Some("QUERY_TOO_LONG")));
        // La query demasiado larga se guarda recortada a un prefijo.
        let too_long = entries
            .data
            .iter()
            .find(|e| e.error_type.as_deref() == Some("QUERY_TOO_LONG"))
            .unwrap();
        assert_eq!(too_long.query.chars().count(), 103);
        assert!(too_long.query.ends_with("..."));
    }

    #[tokio::test]
    async fn scenario_empty_catalog_short_circuits_before_the_model() {
        let store = ProductStore::new();
        let history = SearchHistoryStore::new();

        let outcome = run_search(
            &store,
            &history,
            &UnreachableRecommender,
            request(json!("laptop")),
            ClientMeta::default(),
        )
        .await;
        assert!(matches!(outcome, SearchOutcome::NoProducts { .. }));

        let entries = history.history(&HistoryQuery::default()).unwrap();
        assert_eq!(entries.pagination.total, 1);
        assert_eq!(entries.data[0].error_type.as_deref(), Some("NO_PRODUCTS"));
    }

    #[tokio::test]
    async fn scenario_rate_limit_error_is_classified_and_logged() {
        let store = seeded_store();
        let history = SearchHistoryStore::new();
        let stub = StubRecommender(Err(LlmError::RateLimit("rate limit reached".into())));

        let outcome = run_search(
            &store,
            &history,
            &stub,
            request(json!("laptop")),
            ClientMeta {
                user_id: Some(3),
                ..Default::default()
            },
        )
        .await;

        let SearchOutcome::Llm { error, .. } = outcome else {
            panic!("se esperaba un fallo del cliente LLM");
        };
        assert_eq!(error.kind_str(), "RATE_LIMIT_ERROR");

        let entries = history
            .history(&HistoryQuery { user_id: Some(3), ..Default::default() })
            .unwrap();
        assert_eq!(entries.pagination.total, 1);
        assert!(!entries.data[0].success);
        assert_eq!(entries.data[0].error_type.as_deref(), Some("RATE_LIMIT_ERROR"));
    }

    #[tokio::test]
    async fn scenario_no_matches_is_a_successful_empty_response() {
        let store = seeded_store();
        let history = SearchHistoryStore::new();
        let stub = StubRecommender(Ok(Vec::new()));

        let outcome = run_search(
            &store,
            &history,
            &stub,
            request(json!("submarino nuclear")),
            ClientMeta::default(),
        )
        .await;

        let SearchOutcome::Success(success) = outcome else {
            panic!("se esperaba un desenlace de éxito vacío");
        };
        assert!(success.results.is_empty());
        assert!(success.message.is_some());
        assert_eq!(success.pagination.total, 0);

        let entries = history.history(&HistoryQuery::default()).unwrap();
        assert_eq!(entries.pagination.total, 1);
        assert!(entries.data[0].success);
        assert_eq!(entries.data[0].results_count, 0);
    }

    #[tokio::test]
    async fn narrow_filters_short_circuit_without_calling_the_model() {
        let store = seeded_store();
        let history = SearchHistoryStore::new();

        let outcome = run_search(
            &store,
            &history,
            &UnreachableRecommender,
            SearchRequest {
                query: Some(json!("laptop")),
                filters: SearchFilters {
                    category: Some("Jardinería".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ClientMeta::default(),
        )
        .await;

        let SearchOutcome::Success(success) = outcome else {
            panic!("se esperaba un desenlace de éxito vacío");
        };
        assert!(success.results.is_empty());
        assert!(success.message.is_some());
    }

    #[tokio::test]
    async fn unknown_sort_key_falls_back_to_relevance() {
        let store = seeded_store();
        let history = SearchHistoryStore::new();
        let stub = StubRecommender(Ok(vec![
            Recommendation {
                product_id: 2,
                explanation: "Ideal para aislarte en la biblioteca".into(),
                relevance_score: 6,
            },
            Recommendation {
                product_id: 1,
                explanation: "Potencia de sobra para la carrera".into(),
                relevance_score: 9,
            },
        ]));

        let outcome = run_search(
            &store,
            &history,
            &stub,
            SearchRequest {
                query: Some(json!("equipo para estudiar")),
                sort_by: Some("lo_que_sea".into()),
                ..Default::default()
            },
            ClientMeta::default(),
        )
        .await;

        let SearchOutcome::Success(success) = outcome else {
            panic!("se esperaba un desenlace de éxito");
        };
        assert_eq!(success.sort_by, "lo_que_sea");
        let ids: Vec<i64> = success.results.iter().map(|e| e.product.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
