//! Carga y gestión de configuración de la aplicación (servidor + LLM).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Política de reintentos con retroceso exponencial para las llamadas al LLM.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Reintentos máximos, sin contar el intento inicial.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Espera antes del reintento `attempt` (0-indexado): base·mult^n, con tope.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_model: String,
    /// Temperatura muy baja para que la selección de productos sea estable.
    pub llm_temperature: f64,
    pub llm_max_tokens: u64,
    /// Tiempo máximo de una llamada de recomendación.
    pub llm_timeout: Duration,
    /// Tiempo máximo del health check (más corto que el de recomendación).
    pub llm_health_timeout: Duration,
    pub retry: RetryPolicy,

    /// Longitud máxima admitida para la query de búsqueda.
    pub max_query_len: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_model =
            env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let llm_timeout = env_millis("LLM_TIMEOUT_MS", 30_000)?;
        let llm_health_timeout = env_millis("LLM_HEALTH_TIMEOUT_MS", 10_000)?;

        Ok(Self {
            server_addr,
            llm_provider,
            llm_model,
            llm_temperature: 0.1,
            llm_max_tokens: 1000,
            llm_timeout,
            llm_health_timeout,
            retry: RetryPolicy::default(),
            max_query_len: 500,
        })
    }
}

fn env_millis(var: &str, default_ms: u64) -> Result<Duration> {
    match env::var(var) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .map_err(|_| anyhow!("El valor de {var} no es un número de milisegundos válido: {raw}"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}
