use std::sync::Arc;

use crate::{
    config::AppConfig, llm::Recommender, product_store::ProductStore,
    search_history::SearchHistoryStore,
};

/// Estado compartido de la aplicación. Clonar es barato: los colaboradores
/// van detrás de Arc.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub products: ProductStore,
    pub history: SearchHistoryStore,
    pub recommender: Arc<dyn Recommender>,
}
