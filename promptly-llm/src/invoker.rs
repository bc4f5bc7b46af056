//! [`Invoker`]: the entry point tool handlers call.
//!
//! Owns the provider adapters, the retry engine (and through it the
//! telemetry bus), the result cache and the retry policy. Every public
//! operation validates its input before a backend is touched.

use std::collections::HashMap;
use std::sync::Arc;

use promptly_core::cache::{self, CacheKey, ResultCache};
use promptly_core::config::{PromptlyConfig, RetrySettings};
use promptly_core::metrics::InvocationCounters;
use promptly_core::telemetry::{Subscription, TelemetryEvent};
use promptly_core::Provider;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cancel::compose;
use crate::classify::classify;
use crate::client::{CallOptions, TextBackend, build_backend};
use crate::error::{BackendError, LlmError};
use crate::extract::recover_text;
use crate::retry::RetryEngine;
use crate::structured;
use crate::types::{Completion, InvocationRequest, Structured, StructuredOptions};

/// A refinement, either fresh from the model or served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refinement {
    /// Cleaned refined prompt.
    pub text: String,
    /// Whether it came from the cache.
    pub cached: bool,
    /// Attempts consumed; 0 for a cache hit.
    pub attempts: u32,
}

/// Resilient invocation facade.
pub struct Invoker {
    backends: HashMap<Provider, Arc<dyn TextBackend>>,
    default_provider: Provider,
    engine: RetryEngine,
    cache: Arc<ResultCache>,
    settings: RetrySettings,
    counters: Option<Arc<InvocationCounters>>,
    subscriptions: Vec<Subscription>,
}

impl Invoker {
    /// An invoker with no backends registered yet.
    #[must_use]
    pub fn new(engine: RetryEngine, cache: Arc<ResultCache>, settings: RetrySettings) -> Self {
        Self {
            backends: HashMap::new(),
            default_provider: Provider::OpenAi,
            engine,
            cache,
            settings,
            counters: None,
            subscriptions: Vec::new(),
        }
    }

    /// Build from configuration: the configured backend, the process-wide
    /// cache and telemetry bus, plus counters and event logging if enabled.
    ///
    /// # Errors
    /// Configuration errors, or `AuthFailed` if the provider credential is
    /// missing.
    pub fn from_config(config: &PromptlyConfig) -> Result<Self, LlmError> {
        config.validate()?;
        let backend = build_backend(&config.llm)?;
        if !cache::init_global(&config.cache) {
            debug!("global result cache already initialised; keeping it");
        }

        let mut invoker = Self::new(RetryEngine::global(), Arc::clone(cache::global()), config.retry)
            .with_default_provider(backend.provider())
            .with_backend(backend);
        if config.telemetry.counters {
            invoker = invoker.with_counters();
        }
        if config.telemetry.log_events {
            invoker = invoker.with_event_logging();
        }

        info!(
            provider = %invoker.default_provider,
            model = %config.llm.model,
            max_retries = config.retry.max_retries,
            "invoker ready"
        );
        Ok(invoker)
    }

    /// Register (or replace) the adapter for its provider.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn TextBackend>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    /// Provider used when a request does not name one.
    #[must_use]
    pub fn with_default_provider(mut self, provider: Provider) -> Self {
        self.default_provider = provider;
        self
    }

    /// Attach fresh [`InvocationCounters`] to the engine's bus.
    #[must_use]
    pub fn with_counters(mut self) -> Self {
        let counters = Arc::new(InvocationCounters::new());
        self.subscriptions.push(counters.attach(self.engine.bus()));
        self.counters = Some(counters);
        self
    }

    /// Log every telemetry event at `info`.
    #[must_use]
    pub fn with_event_logging(mut self) -> Self {
        self.subscriptions.push(self.engine.bus().subscribe(log_event));
        self
    }

    /// Counters, if attached.
    #[must_use]
    pub fn counters(&self) -> Option<&Arc<InvocationCounters>> {
        self.counters.as_ref()
    }

    /// The cache this invoker reads and fills.
    #[must_use]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// The retry engine.
    #[must_use]
    pub fn engine(&self) -> &RetryEngine {
        &self.engine
    }

    /// Active retry policy.
    #[must_use]
    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    fn backend(&self, provider: Provider) -> Result<&Arc<dyn TextBackend>, LlmError> {
        self.backends
            .get(&provider)
            .ok_or_else(|| LlmError::Config(format!("no backend registered for {provider}")))
    }

    /// Resilient text completion.
    ///
    /// # Errors
    /// `InvalidInput` before any call; otherwise whatever the retry engine
    /// ends with.
    pub async fn complete(&self, request: &InvocationRequest) -> Result<Completion, LlmError> {
        request.validate()?;
        let backend = self.backend(request.provider)?.as_ref();
        let token = compose(request.timeout, request.cancel.as_ref());

        let prompt = request.prompt.as_str();
        let max_tokens = request.max_output_tokens;
        let options = CallOptions {
            model: &request.model,
            timeout: request.timeout,
            signal: &token,
        };
        let options = &options;

        self.engine
            .execute(
                move || backend.generate_text(prompt, max_tokens, options),
                request.provider,
                &request.model,
                &token,
                &self.settings,
            )
            .await
    }

    /// Structured output validated by `validate`.
    ///
    /// # Errors
    /// See [`structured::request_structured`].
    pub async fn request_structured<T, V>(
        &self,
        prompt: &str,
        validate: V,
        options: &StructuredOptions,
    ) -> Result<Structured<T>, LlmError>
    where
        V: Fn(Value) -> Result<T, String>,
    {
        let provider = options.provider.unwrap_or(self.default_provider);
        let backend = self.backend(provider)?;
        structured::request_structured(
            &self.engine,
            backend.as_ref(),
            &self.settings,
            prompt,
            validate,
            options,
        )
        .await
    }

    /// Refine `source_prompt` with `technique` into `format`, consulting the
    /// cache first. `request` carries the fully built refinement prompt; the
    /// cache is keyed on the caller's inputs, not on that text.
    ///
    /// Failures are never cached, and neither is output that is empty once
    /// fences and labels are stripped.
    ///
    /// # Errors
    /// Whatever [`Invoker::complete`] returns.
    pub async fn refine_cached(
        &self,
        source_prompt: &str,
        technique: &str,
        format: &str,
        request: &InvocationRequest,
    ) -> Result<Refinement, LlmError> {
        let key = CacheKey::derive(source_prompt, technique, format);
        if let Some(text) = self.cache.get_by_key(&key) {
            info!(%key, technique, format, "refinement served from cache");
            return Ok(Refinement {
                text,
                cached: true,
                attempts: 0,
            });
        }

        let completion = self.complete(request).await?;
        let text = recover_text(&completion.content).to_string();
        if text.is_empty() {
            warn!(%key, technique, format, "refinement empty after recovery; not caching");
            return Err(LlmError::Classified(classify(
                BackendError::EmptyResponse,
                request.provider,
            )));
        }
        self.cache.set_by_key(key, text.clone());
        Ok(Refinement {
            text,
            cached: false,
            attempts: completion.attempts,
        })
    }
}

impl Drop for Invoker {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

fn log_event(event: &TelemetryEvent) {
    info!(
        invocation_id = %event.invocation_id,
        kind = ?event.kind,
        provider = %event.provider,
        model = %event.model,
        attempts = event.attempts,
        duration_ms = event.duration_ms,
        ok = event.ok,
        error_code = ?event.error_code,
        used_fallback = event.used_fallback,
        "invocation finished"
    );
}
