//! AI rewrite of rendered messages, backed by the enhancement cache.

use crate::cache::{Cache, CacheEntry, fingerprint};
use crate::config::{Generate, GenerateMode};
use crate::generator::{GenerateError, MessageGenerator};
use crate::store::StoreError;
use crate::template::{self, TemplateContext, TemplateError};
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("rendering enhancement prompt: {0}")]
    Prompt(#[from] TemplateError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error("enhancement cache: {0}")]
    Cache(#[from] StoreError),
}

/// Prompt used when a rule has no custom `generate.prompt`.
fn default_prompt(original: &str) -> String {
    format!(
        "You are helping an AI coding assistant follow a project's conventions. \
         Rewrite the guidance below so it is positive and educational: say what \
         to do instead and briefly why, in two or three sentences. Reply with the \
         rewritten guidance only.\n\
         \n\
         Do not edit, create or run anything in the project. Answer within about \
         15 seconds; if you cannot improve the text, return it unchanged.\n\
         \n\
         Guidance:\n\
         {original}"
    )
}

pub struct Enhancer<'a> {
    cache: Cache,
    generator: &'a dyn MessageGenerator,
    project_root: Option<PathBuf>,
    ttl: Duration,
}

impl<'a> Enhancer<'a> {
    pub fn new(
        cache: Cache,
        generator: &'a dyn MessageGenerator,
        project_root: Option<&Path>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            generator,
            project_root: project_root.map(Path::to_path_buf),
            ttl,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Enhance `original` per `generate`. `pattern` is the rule pattern (or
    /// command/note identity) that produced the message and only feeds the
    /// cache key.
    pub fn enhance(
        &self,
        original: &str,
        generate: &Generate,
        pattern: &str,
    ) -> Result<String, EnhanceError> {
        if generate.mode == GenerateMode::Off {
            return Ok(original.to_string());
        }
        let custom_prompt = generate.prompt.as_deref().unwrap_or("");
        let key = fingerprint(
            self.cache.session_tag(),
            original,
            custom_prompt,
            generate.mode,
            pattern,
        );

        if generate.mode == GenerateMode::Once {
            match self.cache.get(&key) {
                Ok(Some(entry)) => {
                    tracing::debug!(key = %key, "enhancement cache hit");
                    return Ok(entry.generated_message);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "enhancement cache read failed"),
            }
        }

        let prompt = if custom_prompt.is_empty() {
            default_prompt(original)
        } else {
            let ctx = TemplateContext::new(self.project_root.as_deref()).with("Message", original);
            template::render(custom_prompt, &ctx)?
        };

        let generated = self.generator.generate(&prompt)?.trim_end().to_string();

        let now = Utc::now();
        let entry = CacheEntry {
            generated_message: generated.clone(),
            original_message: original.to_string(),
            created_at: now,
            expires_at: match generate.mode {
                GenerateMode::Once => None,
                _ => now.checked_add_signed(self.ttl),
            },
            session_tag: self.cache.session_tag().to_string(),
        };
        if let Err(e) = self.cache.put(&key, &entry) {
            tracing::warn!(error = %e, "enhancement cache write failed");
        }
        Ok(generated)
    }

    /// [`Self::enhance`], falling back to `original` on any failure.
    pub fn enhance_or_original(&self, original: &str, generate: &Generate, pattern: &str) -> String {
        match self.enhance(original, generate, pattern) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, mode = generate.mode.as_str(), "enhancement failed, using rendered message");
                original.to_string()
            }
        }
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.cache.close()
    }
}
