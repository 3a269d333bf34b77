//! Query templates and weighted selection

use crate::bench::scenario::WeightedQuery;
use crate::error::{LoaderError, Result};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// A named search request body
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    pub id: String,
    pub body: Value,
}

impl QueryTemplate {
    /// Wrap a body, defaulting `track_total_hits` to true so hit totals are exact
    pub fn new(id: impl Into<String>, mut body: Value) -> Self {
        if let Value::Object(map) = &mut body {
            map.entry("track_total_hits").or_insert(Value::Bool(true));
        }
        Self {
            id: id.into(),
            body,
        }
    }
}

/// All templates available to a benchmark, in file-name order
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    templates: Vec<QueryTemplate>,
}

impl QueryCatalog {
    pub fn new(templates: Vec<QueryTemplate>) -> Self {
        Self { templates }
    }

    /// Load every `*.json` file in `dir`, sorted by file name
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| {
            LoaderError::Config(format!("query directory {}: {e}", dir.display()))
        })? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut templates = Vec::with_capacity(paths.len());
        for path in paths {
            let id = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let text = std::fs::read_to_string(&path)?;
            let body: Value = serde_json::from_str(&text).map_err(|e| {
                LoaderError::Serialization(format!("query template {}: {e}", path.display()))
            })?;
            debug!(template = %id, "Loaded query template");
            templates.push(QueryTemplate::new(id, body));
        }

        if templates.is_empty() {
            return Err(LoaderError::Config(format!(
                "no query templates found in {}",
                dir.display()
            )));
        }
        Ok(Self { templates })
    }

    pub fn get(&self, id: &str) -> Option<&QueryTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn templates(&self) -> &[QueryTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Resolve a weighted mix against the catalog.
    ///
    /// An empty mix selects every template with equal weight.
    pub fn mix(&self, weights: &[WeightedQuery]) -> Result<QueryMix> {
        let entries: Vec<(QueryTemplate, f64)> = if weights.is_empty() {
            self.templates.iter().map(|t| (t.clone(), 1.0)).collect()
        } else {
            weights
                .iter()
                .map(|w| {
                    self.get(&w.query)
                        .map(|t| (t.clone(), w.weight))
                        .ok_or_else(|| {
                            LoaderError::Config(format!("unknown query template '{}'", w.query))
                        })
                })
                .collect::<Result<_>>()?
        };
        QueryMix::new(entries)
    }
}

/// Weighted random selection over resolved templates
#[derive(Debug, Clone)]
pub struct QueryMix {
    templates: Vec<QueryTemplate>,
    weights: Vec<f64>,
    dist: WeightedIndex<f64>,
}

impl QueryMix {
    pub fn new(entries: Vec<(QueryTemplate, f64)>) -> Result<Self> {
        let (templates, weights): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| LoaderError::Config(format!("invalid query mix: {e}")))?;
        Ok(Self {
            templates,
            weights,
            dist,
        })
    }

    /// Draw one template according to the weights
    pub fn pick<R: Rng>(&self, rng: &mut R) -> &QueryTemplate {
        &self.templates[self.dist.sample(rng)]
    }

    /// The first `n` templates in mix order, for warm-up
    pub fn warmup(&self, n: usize) -> impl Iterator<Item = &QueryTemplate> {
        self.templates.iter().take(n)
    }

    pub fn templates(&self) -> &[QueryTemplate] {
        &self.templates
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
