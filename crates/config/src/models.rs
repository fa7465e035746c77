//! C9: model registry. Maps a model identifier to its context/output/
//! safety-buffer limits, loaded from a JSON manifest with wildcard and
//! keyword-based inference for unregistered model ids.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use domain::ModelLimits;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    context_window: u32,
    max_output: u32,
    safety_buffer: u32,
}

impl From<ManifestEntry> for ModelLimits {
    fn from(e: ManifestEntry) -> Self {
        ModelLimits {
            context_window: e.context_window,
            max_output: e.max_output,
            safety_buffer: e.safety_buffer,
        }
    }
}

/// Swap-pointer discipline: `reload()` builds a fresh map and atomically
/// replaces the one readers see, so in-flight lookups never observe a
/// half-updated registry.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RwLock<HashMap<String, ModelLimits>>>,
    default_context_window: u32,
}

impl ModelRegistry {
    pub fn empty(default_context_window: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            default_context_window,
        }
    }

    pub fn load_from(path: impl AsRef<Path>, default_context_window: u32) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let parsed: HashMap<String, ManifestEntry> = serde_json::from_str(&raw)?;
        let map = parsed
            .into_iter()
            .map(|(k, v)| (k, ModelLimits::from(v)))
            .collect();
        Ok(Self {
            inner: Arc::new(RwLock::new(map)),
            default_context_window,
        })
    }

    pub fn reload_from(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = fs::read_to_string(path)?;
        let parsed: HashMap<String, ManifestEntry> = serde_json::from_str(&raw)?;
        let map = parsed
            .into_iter()
            .map(|(k, v)| (k, ModelLimits::from(v)))
            .collect();
        *self.inner.write().expect("registry lock poisoned") = map;
        Ok(())
    }

    /// Resolve limits for `model`:
    /// 1. exact registered id match
    /// 2. any registered id that is a substring of `model`
    /// 3. a size hint inferred from the model name (`\d+[kK]` or named
    ///    sizes like `128k`), with `safety_buffer = max(10% window, 500)`
    ///    and `max_output = 4096`
    /// 4. the environment-derived default window
    pub fn lookup(&self, model: &str) -> ModelLimits {
        let map = self.inner.read().expect("registry lock poisoned");

        if let Some(limits) = map.get(model) {
            return *limits;
        }

        if let Some((_, limits)) = map.iter().find(|(id, _)| model.contains(id.as_str())) {
            return *limits;
        }

        if let Some(window) = infer_context_window(model) {
            return ModelLimits {
                context_window: window,
                max_output: 4096,
                safety_buffer: (window as f64 * 0.10).max(500.0) as u32,
            };
        }

        ModelLimits {
            context_window: self.default_context_window,
            max_output: 4096,
            safety_buffer: 500,
        }
    }
}

/// Infer a context-window size hint from a model name: a `\d+[kK]` token
/// (e.g. "128k"), or a fallback keyword scan for common named sizes.
fn infer_context_window(model: &str) -> Option<u32> {
    let re = Regex::new(r"(?i)(\d+)\s*k\b").expect("static regex is valid");
    if let Some(caps) = re.captures(model) {
        if let Ok(n) = caps[1].parse::<u32>() {
            return Some(n * 1000);
        }
    }

    const NAMED_SIZES: &[(&str, u32)] = &[
        ("128k", 128_000),
        ("64k", 64_000),
        ("32k", 32_000),
        ("16k", 16_000),
        ("8k", 8_000),
        ("4k", 4_000),
        ("1k", 1_000),
    ];
    let lower = model.to_lowercase();
    NAMED_SIZES
        .iter()
        .find(|(name, _)| lower.contains(name))
        .map(|(_, window)| *window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("models.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"gpt-4o-mini":{{"context_window":128000,"max_output":16384,"safety_buffer":2000}}}}"#
        )
        .unwrap();
        path
    }

    #[test]
    fn exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::load_from(write_manifest(&dir), 16_000).unwrap();
        let limits = registry.lookup("gpt-4o-mini");
        assert_eq!(limits.context_window, 128_000);
    }

    #[test]
    fn substring_match() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::load_from(write_manifest(&dir), 16_000).unwrap();
        let limits = registry.lookup("openrouter/gpt-4o-mini:free");
        assert_eq!(limits.context_window, 128_000);
    }

    #[test]
    fn inferred_from_name() {
        let registry = ModelRegistry::empty(16_000);
        let limits = registry.lookup("some-vendor-model-64k-v2");
        assert_eq!(limits.context_window, 64_000);
        assert_eq!(limits.max_output, 4096);
        assert_eq!(limits.safety_buffer, 6400);
    }

    #[test]
    fn falls_back_to_default() {
        let registry = ModelRegistry::empty(16_000);
        let limits = registry.lookup("unknown-model");
        assert_eq!(limits.context_window, 16_000);
        assert_eq!(limits.safety_buffer, 500);
    }
}
