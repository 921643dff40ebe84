//! Static model catalog and selector resolution.

use serde::{Deserialize, Serialize};

/// One selectable model in the host's picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub key: &'static str,
    pub label: &'static str,
}

/// Models in picker order; the index is the selector's numeric form.
pub const MODEL_CATALOG: &[ModelEntry] = &[
    ModelEntry {
        key: "gemini-pro-high",
        label: "Gemini 3 Pro (High)",
    },
    ModelEntry {
        key: "gemini-pro-low",
        label: "Gemini 3 Pro (Low)",
    },
    ModelEntry {
        key: "claude-sonnet",
        label: "Claude Sonnet 4.5",
    },
    ModelEntry {
        key: "claude-sonnet-thinking",
        label: "Claude Sonnet 4.5 (Thinking)",
    },
    ModelEntry {
        key: "claude-opus",
        label: "Claude Opus 4.5 (Thinking)",
    },
    ModelEntry {
        key: "gpt-oss",
        label: "GPT-OSS 120B (Medium)",
    },
];

/// A caller's model choice: a catalog index or a name fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSelector {
    Index(usize),
    Name(String),
}

/// A selector matched against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedModel {
    pub index: usize,
    pub entry: ModelEntry,
}

impl ModelSelector {
    /// Match against [`MODEL_CATALOG`].
    ///
    /// Numeric strings are treated as indices. Names match a key exactly
    /// (ignoring case) before falling back to a substring of a key or label.
    #[must_use]
    pub fn resolve(&self) -> Option<ResolvedModel> {
        match self {
            Self::Index(index) => by_index(*index),
            Self::Name(name) => {
                let name = name.trim();
                if let Ok(index) = name.parse::<usize>() {
                    return by_index(index);
                }
                if name.is_empty() {
                    return None;
                }
                let needle = name.to_lowercase();
                find(|entry| entry.key.eq_ignore_ascii_case(&needle)).or_else(|| {
                    find(|entry| {
                        entry.key.contains(&needle) || entry.label.to_lowercase().contains(&needle)
                    })
                })
            }
        }
    }
}

fn by_index(index: usize) -> Option<ResolvedModel> {
    MODEL_CATALOG
        .get(index)
        .map(|entry| ResolvedModel {
            index,
            entry: *entry,
        })
}

fn find(pred: impl Fn(&ModelEntry) -> bool) -> Option<ResolvedModel> {
    MODEL_CATALOG
        .iter()
        .position(pred)
        .and_then(by_index)
}
