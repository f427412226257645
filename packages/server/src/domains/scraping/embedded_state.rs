use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;

/// Result of a secondary handle source. A parse failure is reported rather
/// than raised so callers can fall back to link extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryHandles {
    pub handles: Vec<String>,
    pub parse_error: Option<String>,
}

/// Pulls creator handles out of something other than visible links.
pub trait AuxiliaryExtractor: Send + Sync {
    fn extract(&self, document: &Html) -> AuxiliaryHandles;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EmbeddedState {
    #[serde(default)]
    item_module: HashMap<String, Item>,
    #[serde(default)]
    user_module: UserModule,
}

#[derive(Debug, Default, Deserialize)]
struct Item {
    author: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UserModule {
    #[serde(default)]
    users: HashMap<String, User>,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(rename = "uniqueId")]
    unique_id: Option<String>,
}

/// Reads the `script#SIGI_STATE` JSON the page ships for hydration.
#[derive(Debug, Default, Clone)]
pub struct EmbeddedStateExtractor;

impl EmbeddedStateExtractor {
    pub fn parse_state(raw: &str) -> Result<Vec<String>, String> {
        let state: EmbeddedState = serde_json::from_str(raw).map_err(|e| e.to_string())?;

        let mut handles: Vec<String> = Vec::new();
        let mut push = |h: &str| {
            if !h.is_empty() && !handles.iter().any(|x| x == h) {
                handles.push(h.to_string());
            }
        };

        // Sorted for a stable order; the map itself carries none.
        let mut items: Vec<_> = state.item_module.iter().collect();
        items.sort_by(|a, b| a.0.cmp(b.0));
        for (_, item) in items {
            let Some(author) = item.author.as_deref() else {
                continue;
            };
            match state.user_module.users.get(author).and_then(|u| u.unique_id.as_deref()) {
                Some(unique_id) => push(unique_id),
                None => push(author),
            }
        }

        let mut users: Vec<_> = state.user_module.users.iter().collect();
        users.sort_by(|a, b| a.0.cmp(b.0));
        for (_, user) in users {
            if let Some(unique_id) = user.unique_id.as_deref() {
                push(unique_id);
            }
        }

        Ok(handles)
    }
}

impl AuxiliaryExtractor for EmbeddedStateExtractor {
    fn extract(&self, document: &Html) -> AuxiliaryHandles {
        let Ok(selector) = Selector::parse("script#SIGI_STATE") else {
            return AuxiliaryHandles::default();
        };
        let Some(script) = document.select(&selector).next() else {
            return AuxiliaryHandles::default();
        };

        let raw: String = script.text().collect();
        match Self::parse_state(&raw) {
            Ok(handles) => AuxiliaryHandles {
                handles,
                parse_error: None,
            },
            Err(e) => AuxiliaryHandles {
                handles: Vec::new(),
                parse_error: Some(e),
            },
        }
    }
}
