//! Resolution of a model identifier to files on disk.
//!
//! An identifier is either a local path (a directory, or a `.gguf` file) or a
//! Hugging Face repo id such as `bartowski/Qwen2.5-0.5B-Instruct-GGUF`. Hub
//! files are fetched through the `hf-hub` cache, so a second start is offline.
//!
//! Resolution blocks on network I/O; call it from a blocking thread.

use std::fs;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::{Api, ApiRepo};
use tracing::info;

use crate::error::CandleEngineError;

const TOKENIZER_FILE: &str = "tokenizer.json";
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Where to find the weights and the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    /// Local path or hub repo id holding the GGUF weights.
    pub model: String,
    /// Specific weights file; the first `.gguf` in name order when `None`.
    pub model_file: Option<String>,
    /// Local path or hub repo id holding `tokenizer.json`; `model` when `None`.
    pub tokenizer: Option<String>,
}

/// Files needed to build a [`crate::CandleEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
    /// Carries the chat template; optional because some repos omit it.
    pub tokenizer_config: Option<PathBuf>,
}

impl ModelSource {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            model_file: None,
            tokenizer: None,
        }
    }

    pub fn resolve(&self) -> Result<ModelFiles, CandleEngineError> {
        let weights = self.resolve_weights()?;
        let tokenizer_location = match &self.tokenizer {
            Some(t) => t.clone(),
            None if Path::new(&self.model).is_file() => Path::new(&self.model)
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".into()),
            None => self.model.clone(),
        };
        let (tokenizer, tokenizer_config) = resolve_tokenizer(&tokenizer_location)?;

        info!(
            weights = %weights.display(),
            tokenizer = %tokenizer.display(),
            has_chat_template_config = tokenizer_config.is_some(),
            "model files resolved"
        );
        Ok(ModelFiles {
            weights,
            tokenizer,
            tokenizer_config,
        })
    }

    fn resolve_weights(&self) -> Result<PathBuf, CandleEngineError> {
        let path = Path::new(&self.model);
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        if path.is_dir() {
            let names = list_dir(path)?;
            let file = pick_weights(&names, self.model_file.as_deref(), &self.model)?;
            return Ok(path.join(file));
        }

        let repo = hub_repo(&self.model)?;
        let names: Vec<String> = repo
            .info()
            .map_err(|source| hub_error(&self.model, source))?
            .siblings
            .into_iter()
            .map(|s| s.rfilename)
            .collect();
        let file = pick_weights(&names, self.model_file.as_deref(), &self.model)?;
        info!(repo = %self.model, file = %file, "fetching weights from the hub");
        repo.get(&file).map_err(|source| hub_error(&self.model, source))
    }
}

fn resolve_tokenizer(location: &str) -> Result<(PathBuf, Option<PathBuf>), CandleEngineError> {
    let dir = Path::new(location);
    if dir.is_dir() {
        let tokenizer = dir.join(TOKENIZER_FILE);
        if !tokenizer.is_file() {
            return Err(CandleEngineError::TokenizerNotFound {
                location: location.to_owned(),
            });
        }
        let config = dir.join(TOKENIZER_CONFIG_FILE);
        return Ok((tokenizer, config.is_file().then_some(config)));
    }

    let repo = hub_repo(location)?;
    let tokenizer = repo
        .get(TOKENIZER_FILE)
        .map_err(|source| hub_error(location, source))?;
    // A missing config only means falling back to the default template.
    let config = repo.get(TOKENIZER_CONFIG_FILE).ok();
    Ok((tokenizer, config))
}

/// Choose the weights file among `names`.
fn pick_weights(
    names: &[String],
    requested: Option<&str>,
    location: &str,
) -> Result<String, CandleEngineError> {
    if let Some(requested) = requested {
        return names
            .iter()
            .find(|n| n.as_str() == requested)
            .cloned()
            .ok_or_else(|| CandleEngineError::WeightsNotFound {
                file: requested.to_owned(),
                location: location.to_owned(),
            });
    }

    let mut ggufs: Vec<&String> = names.iter().filter(|n| n.ends_with(".gguf")).collect();
    ggufs.sort();
    ggufs
        .first()
        .map(|n| (*n).clone())
        .ok_or_else(|| CandleEngineError::NoWeights {
            location: location.to_owned(),
        })
}

fn list_dir(dir: &Path) -> Result<Vec<String>, CandleEngineError> {
    let io_error = |source| CandleEngineError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    Ok(names)
}

fn hub_repo(repo_id: &str) -> Result<ApiRepo, CandleEngineError> {
    let api = Api::new().map_err(|source| hub_error(repo_id, source))?;
    Ok(api.model(repo_id.to_owned()))
}

fn hub_error(repo: &str, source: hf_hub::api::sync::ApiError) -> CandleEngineError {
    CandleEngineError::Hub {
        repo: repo.to_owned(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_first_gguf_in_name_order() {
        let files = names(&["README.md", "model-Q8_0.gguf", "model-Q4_K_M.gguf", "config.json"]);
        assert_eq!(pick_weights(&files, None, "repo").unwrap(), "model-Q4_K_M.gguf");
    }

    #[test]
    fn requested_file_must_exist() {
        let files = names(&["a.gguf", "b.gguf"]);
        assert_eq!(pick_weights(&files, Some("b.gguf"), "repo").unwrap(), "b.gguf");
        assert!(matches!(
            pick_weights(&files, Some("c.gguf"), "repo"),
            Err(CandleEngineError::WeightsNotFound { .. })
        ));
    }

    #[test]
    fn no_gguf_is_an_error() {
        let files = names(&["model.safetensors"]);
        assert!(matches!(
            pick_weights(&files, None, "repo"),
            Err(CandleEngineError::NoWeights { .. })
        ));
    }

    #[test]
    fn resolves_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m.gguf"), b"").unwrap();
        fs::write(dir.path().join(TOKENIZER_FILE), b"{}").unwrap();
        fs::write(dir.path().join(TOKENIZER_CONFIG_FILE), b"{}").unwrap();

        let files = ModelSource::new(dir.path().display().to_string()).resolve().unwrap();
        assert_eq!(files.weights, dir.path().join("m.gguf"));
        assert_eq!(files.tokenizer, dir.path().join(TOKENIZER_FILE));
        assert_eq!(files.tokenizer_config, Some(dir.path().join(TOKENIZER_CONFIG_FILE)));
    }

    #[test]
    fn local_gguf_file_uses_sibling_tokenizer() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("m.gguf");
        fs::write(&weights, b"").unwrap();
        fs::write(dir.path().join(TOKENIZER_FILE), b"{}").unwrap();

        let files = ModelSource::new(weights.display().to_string()).resolve().unwrap();
        assert_eq!(files.weights, weights);
        assert_eq!(files.tokenizer_config, None);
    }

    #[test]
    fn local_directory_without_tokenizer_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m.gguf"), b"").unwrap();
        let err = ModelSource::new(dir.path().display().to_string()).resolve().unwrap_err();
        assert!(matches!(err, CandleEngineError::TokenizerNotFound { .. }));
    }
}
