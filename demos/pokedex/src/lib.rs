//! # Pokedex Demo
//!
//! A walkthrough of the keyfetch architecture against a small embedded
//! pokedex: a subject key (a pokemon name) drives an asynchronous lookup
//! with simulated latency, a consumer renders the lifecycle snapshots, and
//! a recovery coordinator supervises the failures.
//!
//! The fetcher is a *validating* fetcher: entries that decode but fail
//! validation (the glitched `missingno` record) reject with
//! `FetchError::Invalid` instead of resolving with unusable data.
//!
//! ## Example
//!
//! ```no_run
//! use pokedex_demo::{Pokemon, PokedexFetcher};
//! use keyfetch_runtime::{RequestController, RequestEnvironment};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Arc::new(PokedexFetcher::new()?);
//! let controller: RequestController<String, Pokemon> =
//!     RequestController::new(RequestEnvironment::new(fetcher));
//!
//! controller.set_key("pikachu".to_string()).await?;
//! # Ok(())
//! # }
//! ```

use futures::future::BoxFuture;
use keyfetch_core::environment::Fetcher;
use keyfetch_core::error::FetchError;
use keyfetch_core::prelude::{Phase, RequestState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The embedded pokedex. The `missingno` record is deliberately glitched:
/// it decodes but fails validation.
const POKEDEX_JSON: &str = r#"
[
    { "name": "pikachu",  "number": 25,  "types": ["electric"],          "base_experience": 112 },
    { "name": "raichu",   "number": 26,  "types": ["electric"],          "base_experience": 243 },
    { "name": "ditto",    "number": 132, "types": ["normal"],            "base_experience": 101 },
    { "name": "slowpoke", "number": 79,  "types": ["water", "psychic"],  "base_experience": 63 },
    { "name": "mew",      "number": 151, "types": ["psychic"],           "base_experience": 300 },
    { "name": "missingno", "number": 0,  "types": [],                    "base_experience": 0 }
]
"#;

/// A pokedex entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pokemon {
    /// Display name, also the subject key
    pub name: String,
    /// National dex number
    pub number: u32,
    /// Type names
    pub types: Vec<String>,
    /// Base experience yield
    pub base_experience: u32,
}

impl Pokemon {
    /// Validate a decoded entry
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Invalid`] for records that decoded but are
    /// unusable: a blank name, a dex number of zero, or no types.
    pub fn validated(self) -> Result<Self, FetchError> {
        if self.name.trim().is_empty() {
            return Err(FetchError::Invalid("entry has a blank name".to_string()));
        }
        if self.number == 0 {
            return Err(FetchError::Invalid(format!(
                "`{}` has dex number 0",
                self.name
            )));
        }
        if self.types.is_empty() {
            return Err(FetchError::Invalid(format!("`{}` has no types", self.name)));
        }
        Ok(self)
    }
}

/// A validating pokedex fetcher with simulated latency
///
/// Lookups are case-insensitive. Latency defaults to 120ms per lookup and
/// can be overridden per pokemon to make settlement-order races observable
/// from a terminal.
pub struct PokedexFetcher {
    dex: HashMap<String, serde_json::Value>,
    latency: Duration,
    slow_entries: HashMap<String, Duration>,
}

impl PokedexFetcher {
    /// Build the fetcher from the embedded pokedex
    ///
    /// # Errors
    ///
    /// Returns a decode error if the embedded fixture is not valid JSON.
    pub fn new() -> Result<Self, serde_json::Error> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(POKEDEX_JSON)?;

        let mut dex = HashMap::new();
        for entry in entries {
            if let Some(name) = entry.get("name").and_then(serde_json::Value::as_str) {
                dex.insert(name.to_lowercase(), entry);
            }
        }

        Ok(Self {
            dex,
            latency: Duration::from_millis(120),
            slow_entries: HashMap::new(),
        })
    }

    /// Set the default lookup latency
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Slow down one pokemon's lookups
    ///
    /// The lever for demonstrating the stale-completion race: a slow lookup
    /// issued first settles after a fast lookup issued second.
    #[must_use]
    pub fn with_slow_entry(mut self, name: &str, latency: Duration) -> Self {
        self.slow_entries.insert(name.to_lowercase(), latency);
        self
    }
}

impl Fetcher<String, Pokemon> for PokedexFetcher {
    fn fetch(&self, key: &String) -> BoxFuture<'static, Result<Pokemon, FetchError>> {
        let lookup = key.trim().to_lowercase();
        let raw = self.dex.get(&lookup).cloned();
        let latency = self
            .slow_entries
            .get(&lookup)
            .copied()
            .unwrap_or(self.latency);

        Box::pin(async move {
            tokio::time::sleep(latency).await;

            let raw = raw.ok_or_else(|| FetchError::not_found(&lookup))?;
            let pokemon: Pokemon = serde_json::from_value(raw)
                .map_err(|decode| FetchError::Invalid(decode.to_string()))?;
            pokemon.validated()
        })
    }
}

/// Render a lifecycle snapshot the way a display layer would
#[must_use]
pub fn render(state: &RequestState<String, Pokemon>) -> String {
    match &state.phase {
        Phase::Idle => "nothing selected".to_string(),
        Phase::Pending { key } => format!("looking up `{key}`..."),
        Phase::Resolved { value, .. } => format!(
            "#{:03} {} ({}), base exp {}",
            value.number,
            value.name,
            value.types.join("/"),
            value.base_experience
        ),
        Phase::Rejected { key, error } => format!("lookup of `{key}` failed: {error}"),
    }
}
