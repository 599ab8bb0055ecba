//! Historial duradero de búsquedas.
//!
//! Registro de sólo-añadir: cada intento de búsqueda (con o sin éxito) crea
//! exactamente una entrada que nunca se modifica ni se borra. Expone la
//! consulta paginada del historial y el ranking de términos populares.

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::models::{HistoryQuery, NewSearchRecord, Page, PopularSearch, SearchHistoryEntry};
use crate::search::paginate;

/// Longitud máxima de la query tal y como se persiste.
const MAX_STORED_QUERY_CHARS: usize = 500;

#[derive(Clone)]
pub struct SearchHistoryStore {
    entries: Arc<RwLock<Vec<SearchHistoryEntry>>>,
}

impl SearchHistoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Persiste un intento de búsqueda. La query se trunca en la frontera
    /// del almacén para respetar el límite del esquema.
    pub fn record(&self, record: NewSearchRecord) -> Result<SearchHistoryEntry> {
        let entry = SearchHistoryEntry {
            id: Uuid::new_v4(),
            query: truncate_chars(&record.query, MAX_STORED_QUERY_CHARS),
            results_count: record.results_count,
            execution_time_ms: record.execution_time_ms,
            success: record.success,
            error_type: record.error_type,
            user_agent: record.user_agent,
            ip_address: record.ip_address,
            filters: record.filters,
            sort_by: record.sort_by,
            user_id: record.user_id,
            created_at: Utc::now(),
        };
        self.write()?.push(entry.clone());
        Ok(entry)
    }

    /// Historial paginado, más reciente primero. El filtrado por usuario es
    /// estricto: `user_id = None` devuelve sólo las búsquedas anónimas.
    pub fn history(&self, options: &HistoryQuery) -> Result<Page<SearchHistoryEntry>> {
        let entries = self.read()?;
        let text_filter = options.text_filter.as_ref().map(|t| t.to_lowercase());

        let mut matching: Vec<SearchHistoryEntry> = entries
            .iter()
            .filter(|e| e.user_id == options.user_id)
            .filter(|e| !options.success_only || e.success)
            .filter(|e| {
                text_filter
                    .as_ref()
                    .map_or(true, |t| e.query.to_lowercase().contains(t))
            })
            .filter(|e| options.from.map_or(true, |from| e.created_at >= from))
            .filter(|e| options.to.map_or(true, |to| e.created_at <= to))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page = options.page.max(1);
        let limit = options.limit.max(1);
        Ok(paginate(matching, page, limit))
    }

    /// Términos más buscados con éxito en la ventana de los últimos
    /// `window_days` días, opcionalmente restringidos a un usuario.
    pub fn popular(
        &self,
        limit: usize,
        window_days: i64,
        user_id: Option<i64>,
    ) -> Result<Vec<PopularSearch>> {
        let since = Utc::now() - Duration::days(window_days);
        let entries = self.read()?;

        let mut counts: Vec<PopularSearch> = Vec::new();
        for entry in entries.iter() {
            if !entry.success || entry.created_at < since {
                continue;
            }
            if user_id.is_some() && entry.user_id != user_id {
                continue;
            }
            match counts.iter_mut().find(|c| c.query == entry.query) {
                Some(existing) => existing.search_count += 1,
                None => counts.push(PopularSearch {
                    query: entry.query.clone(),
                    search_count: 1,
                }),
            }
        }

        counts.sort_by(|a, b| b.search_count.cmp(&a.search_count).then(a.query.cmp(&b.query)));
        counts.truncate(limit);
        Ok(counts)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<SearchHistoryEntry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("El historial de búsquedas está envenenado"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<SearchHistoryEntry>>> {
        self.entries
            .write()
            .map_err(|_| anyhow!("El historial de búsquedas está envenenado"))
    }
}

impl Default for SearchHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
