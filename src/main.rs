// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod llm;
mod models;
mod product_store;
mod search;
mod search_history;
mod seed;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::product_store::ProductStore;
use crate::search_history::SearchHistoryStore;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Preparar el catálogo y el historial
    let products = ProductStore::new();
    if products.is_empty().unwrap_or(true) {
        seed::seed_catalog(&products).expect("Error al cargar el catálogo de muestra");
    }
    let history = SearchHistoryStore::new();

    // 4. Inicializar el cliente de recomendaciones
    let recommender =
        llm::LlmRecommender::from_config(&cfg).expect("Error inicializando el cliente LLM");

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        products,
        history,
        recommender: Arc::new(recommender),
    };

    // 6. Configurar el router de la API
    let app = api::create_router(app_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .unwrap();
    info!("🚀 Servidor escuchando en http://{}", &cfg.server_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
