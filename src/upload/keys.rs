//! API-key pool and the credential-refill capability.
//!
//! The pool is a plain value handed to the orchestrator. When every key has
//! served its chunk, the orchestrator asks a [`CredentialProvider`] for a
//! *new* pool instead of mutating shared state, so the whole exchange can be
//! scripted in tests and prompted interactively in the CLI.

use crate::error::SquareshotError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// Ordered API keys, consumed left to right.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKeyPool {
    keys: Vec<String>,
}

impl ApiKeyPool {
    /// Build a pool, trimming whitespace and dropping empty entries.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.as_ref().trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Parse a comma- or newline-separated list, as found in env vars and key files.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split([',', '\n']))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// Show only a short prefix of a key in logs.
pub fn redact(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{prefix}…")
}

impl fmt::Debug for ApiKeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| redact(k)))
            .finish()
    }
}

/// Supplies replacement keys once the current pool is used up.
///
/// Called at most once per exhaustion, with no uploads in flight. Returning
/// an error stops the run after pending results have been flushed.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn refill(
        &self,
        exhausted: &ApiKeyPool,
        remaining_files: usize,
    ) -> Result<ApiKeyPool, SquareshotError>;
}

/// Never supplies new keys: exhaustion ends the run.
pub struct NoRefill;

#[async_trait]
impl CredentialProvider for NoRefill {
    async fn refill(
        &self,
        _exhausted: &ApiKeyPool,
        remaining_files: usize,
    ) -> Result<ApiKeyPool, SquareshotError> {
        Err(SquareshotError::CredentialsExhausted {
            remaining: remaining_files,
            hint: "Supply more keys and run again; completed uploads will be skipped.".into(),
        })
    }
}

/// Hands out a fixed sequence of pools, then behaves like [`NoRefill`].
pub struct ScriptedCredentials {
    pools: Mutex<VecDeque<ApiKeyPool>>,
}

impl ScriptedCredentials {
    pub fn new(pools: impl IntoIterator<Item = ApiKeyPool>) -> Self {
        Self {
            pools: Mutex::new(pools.into_iter().collect()),
        }
    }
}

#[async_trait]
impl CredentialProvider for ScriptedCredentials {
    async fn refill(
        &self,
        exhausted: &ApiKeyPool,
        remaining_files: usize,
    ) -> Result<ApiKeyPool, SquareshotError> {
        let next = self
            .pools
            .lock()
            .map_err(|_| SquareshotError::Internal("credential script lock poisoned".into()))?
            .pop_front();
        match next {
            Some(pool) => Ok(pool),
            None => NoRefill.refill(exhausted, remaining_files).await,
        }
    }
}
