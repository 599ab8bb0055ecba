use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::{
    app_state::AppState,
    llm::LlmError,
    models::{NewProduct, Product, ProductPatch, SearchFilters, SortKey},
    product_store::ProductQueryFilter,
    search::{self, ClientMeta, SearchOutcome, SearchRequest},
};

/// Segundos que se le piden al cliente de espera tras un 429.
const RETRY_AFTER_SECS: u64 = 60;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct SearchPayload {
    /// JSON crudo: el orquestador distingue "ausente" de "no es una cadena".
    #[serde(default)]
    query: Option<Value>,
    #[serde(default)]
    filters: SearchFilters,
    #[serde(rename = "sortBy")]
    sort_by: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    page: Option<u32>,
    limit: Option<u32>,
    #[serde(rename = "successOnly", default)]
    success_only: bool,
    query: Option<String>,
    #[serde(rename = "startDate")]
    start_date: Option<DateTime<Utc>>,
    #[serde(rename = "endDate")]
    end_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct PopularParams {
    limit: Option<usize>,
    days: Option<i64>,
}

#[derive(Deserialize)]
pub struct ProductListParams {
    category: Option<String>,
    #[serde(rename = "minPrice")]
    min_price: Option<f64>,
    #[serde(rename = "maxPrice")]
    max_price: Option<f64>,
    brand: Option<String>,
    #[serde(rename = "sortBy")]
    sort_by: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/search", post(search_handler))
        .route("/api/search/health", get(health_handler))
        .route("/api/search/history", get(history_handler))
        .route("/api/search/popular", get(popular_handler))
        .route("/api/products", get(list_products_handler).post(create_product_handler))
        .route(
            "/api/products/:id",
            get(get_product_handler)
                .put(update_product_handler)
                .delete(delete_product_handler),
        )
        .route("/api/products/category/:category", get(products_by_category_handler))
        .route("/api/products/search", get(search_products_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<SearchPayload>,
) -> (StatusCode, Json<Value>) {
    let meta = client_meta(&headers, &addr);
    let request = SearchRequest {
        query: payload.query,
        filters: payload.filters,
        sort_by: payload.sort_by,
        page: payload.page,
        limit: payload.limit,
    };

    let outcome = search::run_search(
        &state.products,
        &state.history,
        state.recommender.as_ref(),
        request,
        meta,
    )
    .await;
    search_response(outcome)
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let started = std::time::Instant::now();
    info!(
        "🩺 Ejecutando el health check del LLM (modelo {})...",
        state.config.llm_model
    );

    let result = state.recommender.health_check().await;
    let execution_time_ms = started.elapsed().as_millis() as u64;
    let timestamp = Utc::now().to_rfc3339();

    match result {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "healthy",
                "message": "El servicio LLM responde correctamente",
                "execution_time_ms": execution_time_ms,
                "timestamp": timestamp,
            })),
        ),
        Ok(false) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "status": "unhealthy",
                "message": "El servicio LLM no responde correctamente",
                "execution_time_ms": execution_time_ms,
                "timestamp": timestamp,
            })),
        ),
        Err(err) => {
            error!("❌ El health check ha fallado: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "status": "error",
                    "message": "El health check ha fallado",
                    "error": err.to_string(),
                    "execution_time_ms": execution_time_ms,
                    "timestamp": timestamp,
                })),
            )
        }
    }
}

#[axum::debug_handler]
async fn history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> (StatusCode, Json<Value>) {
    let user_id = user_id_from_headers(&headers);
    info!(
        "📚 Consultando el historial del usuario: {}",
        user_label(user_id)
    );

    let options = crate::models::HistoryQuery {
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(20),
        success_only: params.success_only,
        text_filter: params.query,
        from: params.start_date,
        to: params.end_date,
        user_id,
    };

    match state.history.history(&options) {
        Ok(page) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": page.data,
                "pagination": page.pagination,
                "userSpecific": user_id.is_some(),
                "currentUser": user_id,
            })),
        ),
        Err(err) => {
            error!("Error consultando el historial de búsquedas: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "HISTORY_FETCH_ERROR",
                    "message": "No se pudo recuperar el historial de búsquedas",
                })),
            )
        }
    }
}

#[axum::debug_handler]
async fn popular_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PopularParams>,
) -> (StatusCode, Json<Value>) {
    let user_id = user_id_from_headers(&headers);
    let limit = params.limit.unwrap_or(10);
    let days = params.days.unwrap_or(30);
    info!(
        "🔥 Consultando búsquedas populares para {} ({days} días, límite {limit})",
        user_label(user_id)
    );

    match state.history.popular(limit, days, user_id) {
        Ok(popular) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": popular,
                "period": format!("{days} days"),
                "limit": limit,
                "userSpecific": user_id.is_some(),
                "currentUser": user_id,
            })),
        ),
        Err(err) => {
            error!("Error consultando las búsquedas populares: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "POPULAR_SEARCHES_ERROR",
                    "message": "No se pudieron recuperar las búsquedas populares",
                })),
            )
        }
    }
}

#[axum::debug_handler]
async fn list_products_handler(
    State(state): State<AppState>,
    Query(params): Query<ProductListParams>,
) -> (StatusCode, Json<Value>) {
    let filter = ProductQueryFilter {
        category: params.category,
        min_price: params.min_price,
        max_price: params.max_price,
        brand: params.brand,
    };

    match state.products.list_products(Some(&filter)) {
        Ok(mut products) => {
            if let Some(sort_by) = params.sort_by.as_deref() {
                products = sort_products(products, SortKey::parse(sort_by));
            }
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "count": products.len(),
                    "data": products,
                })),
            )
        }
        Err(err) => {
            error!("Error listando productos: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": "Error al recuperar los productos"})),
            )
        }
    }
}

#[axum::debug_handler]
async fn get_product_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match state.products.get_product_by_id(id) {
        Ok(Some(product)) => (
            StatusCode::OK,
            Json(json!({"success": true, "data": product})),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "Producto no encontrado"})),
        ),
        Err(err) => {
            error!("Error recuperando el producto {id}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": "Error al recuperar el producto"})),
            )
        }
    }
}

#[axum::debug_handler]
async fn create_product_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewProduct>,
) -> (StatusCode, Json<Value>) {
    match state.products.create_product(payload) {
        Ok(product) => (
            StatusCode::CREATED,
            Json(json!({"success": true, "data": product})),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": err.to_string()})),
        ),
    }
}

#[axum::debug_handler]
async fn update_product_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ProductPatch>,
) -> (StatusCode, Json<Value>) {
    match state.products.update_product(id, patch) {
        Ok(Some(product)) => (
            StatusCode::OK,
            Json(json!({"success": true, "data": product})),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "Producto no encontrado"})),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": err.to_string()})),
        ),
    }
}

#[axum::debug_handler]
async fn delete_product_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match state.products.delete_product(id) {
        Ok(Some(product)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Producto eliminado",
                "data": product,
            })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "Producto no encontrado"})),
        ),
        Err(err) => {
            error!("Error eliminando el producto {id}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": "Error al eliminar el producto"})),
            )
        }
    }
}

#[axum::debug_handler]
async fn products_by_category_handler(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.products.find_by_category(&category) {
        Ok(products) => (
            StatusCode::OK,
            Json(json!({"success": true, "count": products.len(), "data": products})),
        ),
        Err(err) => {
            error!("Error listando la categoría {category}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": "Error al recuperar los productos"})),
            )
        }
    }
}

#[derive(Deserialize)]
pub struct TextSearchParams {
    q: Option<String>,
}

#[axum::debug_handler]
async fn search_products_handler(
    State(state): State<AppState>,
    Query(params): Query<TextSearchParams>,
) -> (StatusCode, Json<Value>) {
    let Some(term) = params.q.filter(|t| !t.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "El término de búsqueda es obligatorio"})),
        );
    };
    match state.products.text_search(&term) {
        Ok(products) => (
            StatusCode::OK,
            Json(json!({"success": true, "count": products.len(), "data": products})),
        ),
        Err(err) => {
            error!("Error en la búsqueda de texto '{term}': {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": "Error al buscar productos"})),
            )
        }
    }
}

// --- Traducción de desenlaces a respuestas HTTP ---

/// Traduce el desenlace del orquestador al contrato HTTP: cada código de
/// error estable tiene su código de estado.
fn search_response(outcome: SearchOutcome) -> (StatusCode, Json<Value>) {
    match outcome {
        SearchOutcome::Success(success) => {
            let mut body = json!({
                "success": true,
                "query": success.query,
                "results": success.results,
                "filters": success.filters,
                "sortBy": success.sort_by,
                "pagination": success.pagination,
                "total_results": success.total_results,
                "execution_time_ms": success.execution_time_ms,
            });
            if let Some(message) = success.message {
                body["message"] = Value::String(message);
            }
            (StatusCode::OK, Json(body))
        }
        SearchOutcome::InvalidQuery {
            rejection,
            execution_time_ms,
        } => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": rejection.code(),
                "message": rejection.message(),
                "execution_time_ms": execution_time_ms,
            })),
        ),
        SearchOutcome::NoProducts { execution_time_ms } => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": "NO_PRODUCTS",
                "message": "No hay productos disponibles en el catálogo",
                "execution_time_ms": execution_time_ms,
            })),
        ),
        SearchOutcome::Storage { execution_time_ms } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "DATABASE_ERROR",
                "message": "Error de base de datos al buscar productos",
                "execution_time_ms": execution_time_ms,
            })),
        ),
        SearchOutcome::Llm {
            error,
            execution_time_ms,
        } => llm_error_response(error, execution_time_ms),
    }
}

fn llm_error_response(error: LlmError, execution_time_ms: u64) -> (StatusCode, Json<Value>) {
    let (status, code, message) = match &error {
        LlmError::Validation(_) => (
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "La petición de búsqueda no es válida",
        ),
        LlmError::Configuration(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "El servicio de búsqueda no está disponible temporalmente por un problema de configuración",
        ),
        LlmError::RateLimit(_) => (
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_EXCEEDED",
            "Demasiadas peticiones. Inténtalo de nuevo en un momento.",
        ),
        LlmError::Quota(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_QUOTA_EXCEEDED",
            "El servicio de búsqueda no está disponible temporalmente por límites de cuota",
        ),
        LlmError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            "SEARCH_TIMEOUT",
            "La búsqueda ha superado el tiempo máximo. Prueba con una consulta más sencilla.",
        ),
        LlmError::Response(_) => (
            StatusCode::BAD_GATEWAY,
            "INVALID_AI_RESPONSE",
            "El servicio de búsqueda devolvió una respuesta inválida. Inténtalo de nuevo.",
        ),
        LlmError::Api(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "AI_SERVICE_ERROR",
            "El servicio de búsqueda encontró un error. Inténtalo de nuevo.",
        ),
    };

    let mut body = json!({
        "success": false,
        "error": code,
        "message": message,
        "execution_time_ms": execution_time_ms,
    });
    match &error {
        LlmError::Validation(detail) => {
            body["details"] = Value::String(detail.clone());
        }
        LlmError::RateLimit(_) => {
            body["retry_after"] = json!(RETRY_AFTER_SECS);
        }
        _ => {}
    }
    (status, Json(body))
}

// --- Utilidades ---

/// Frontera con el colaborador de autenticación: un id de usuario opcional
/// por petición, que el núcleo sólo usa para atribuir el historial.
fn user_id_from_headers(headers: &HeaderMap) -> Option<i64> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse().ok())
}

fn user_label(user_id: Option<i64>) -> String {
    user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "anónimo".to_string())
}

fn client_meta(headers: &HeaderMap, addr: &SocketAddr) -> ClientMeta {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ClientMeta {
        user_agent,
        ip_address: Some(addr.ip().to_string()),
        user_id: user_id_from_headers(headers),
    }
}

/// Ordenación para el listado plano de productos (sin puntuación de IA:
/// `relevance` deja el orden del almacén).
fn sort_products(mut products: Vec<Product>, key: SortKey) -> Vec<Product> {
    match key {
        SortKey::PriceAsc => products.sort_by(|a, b| {
            a.price
                .partial_cmp(&b.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        SortKey::PriceDesc => products.sort_by(|a, b| {
            b.price
                .partial_cmp(&a.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        SortKey::NameAsc => {
            products.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        }
        SortKey::NameDesc => {
            products.sort_by(|a, b| b.name.to_lowercase().cmp(&a.name.to_lowercase()))
        }
        SortKey::Newest => products.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Oldest => products.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortKey::Relevance => {}
    }
    products
}
