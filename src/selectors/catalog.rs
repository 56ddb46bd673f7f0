use crate::errors::{AutomationError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Ordered locators for one logical element, preferred expression first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorSet {
    key: String,
    candidates: Arc<[String]>,
}

impl LocatorSet {
    pub fn new<I, S>(key: impl Into<String>, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn primary(&self) -> Option<&str> {
        self.candidates.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Read-only address book of locator sets, keyed by logical element name.
#[derive(Debug, Clone, Default)]
pub struct LocatorCatalog {
    sets: HashMap<String, LocatorSet>,
}

impl LocatorCatalog {
    /// Parse `{ "ELEMENT_NAME": ["xpath1", "xpath2", ...], ... }`.
    ///
    /// Keys with an empty list are dropped with a warning; lookups for them
    /// then behave like any other missing entry.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(json)?;
        let mut sets = HashMap::with_capacity(raw.len());
        for (key, candidates) in raw {
            let candidates: Vec<String> = candidates
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if candidates.is_empty() {
                warn!(key = %key, "Locator catalog entry has no candidates, skipping");
                continue;
            }
            sets.insert(key.clone(), LocatorSet::new(key, candidates));
        }
        Ok(Self { sets })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::Configuration(format!("locator catalog {:?}: {}", path, e))
        })?;
        let catalog = Self::from_json_str(&content)?;
        info!("Loaded {} locator sets from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Built-in catalog for the SIGGES portal.
    pub fn sigges_default() -> Self {
        Self::from_json_str(DEFAULT_CATALOG).unwrap_or_default()
    }

    pub fn insert(&mut self, set: LocatorSet) {
        self.sets.insert(set.key().to_string(), set);
    }

    pub fn get(&self, key: &str) -> Option<&LocatorSet> {
        self.sets.get(key)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

const DEFAULT_CATALOG: &str = r#"{
    "LOGIN_ENTER_BUTTON": [
        "//button[normalize-space()='Ingresar']",
        "//button[contains(@class,'btn-ingresar')]",
        "//a[contains(normalize-space(),'Ingresar')]"
    ],
    "LOGIN_UNIT_OPTION": [
        "//select[@id='unidad']/option[2]",
        "//div[contains(@class,'unidad')]//li[1]"
    ],
    "LOGIN_FACILITY_OPTION": [
        "//select[@id='establecimiento']/option[2]",
        "//div[contains(@class,'establecimiento')]//li[1]"
    ],
    "LOGIN_PROFILE_TILE": [
        "//div[contains(@class,'perfil')]//div[contains(@class,'card')][1]",
        "//div[contains(@class,'tile')][1]"
    ],
    "LOGIN_CONNECT_BUTTON": [
        "//button[normalize-space()='Conectar']",
        "//button[contains(normalize-space(),'Conectar')]"
    ],
    "MENU_CONTAINER": [
        "//nav[@id='menu']",
        "//div[contains(@class,'menu-lateral')]"
    ],
    "MENU_HOME": [
        "//nav[@id='menu']//a[contains(normalize-space(),'Inicio')]",
        "//a[@href='#/actualizaciones']"
    ],
    "MENU_CASES": [
        "//nav[@id='menu']//a[contains(normalize-space(),'Casos')]",
        "//a[contains(@href,'casos')]"
    ],
    "MENU_CASE_SEARCH": [
        "//a[contains(normalize-space(),'Consultar Caso')]",
        "//a[contains(@href,'busqueda')]"
    ]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_ordered_candidates() {
        let catalog = LocatorCatalog::from_json_str(
            r#"{ "LOGIN": ["//button[@id='a']", "//button[@id='b']"] }"#,
        )
        .unwrap();
        let set = catalog.get("LOGIN").unwrap();
        assert_eq!(set.key(), "LOGIN");
        assert_eq!(set.primary(), Some("//button[@id='a']"));
        assert_eq!(set.candidates().len(), 2);
    }

    #[test]
    fn test_empty_entries_are_skipped() {
        let catalog =
            LocatorCatalog::from_json_str(r#"{ "EMPTY": [], "BLANK": ["  "], "OK": ["//a"] }"#)
                .unwrap();
        assert!(catalog.get("EMPTY").is_none());
        assert!(catalog.get("BLANK").is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_malformed_catalog_is_an_error() {
        assert!(LocatorCatalog::from_json_str(r#"{ "KEY": "not a list" }"#).is_err());
    }

    #[test]
    fn test_default_catalog_covers_login_flow() {
        let catalog = LocatorCatalog::sigges_default();
        for key in [
            "LOGIN_ENTER_BUTTON",
            "LOGIN_UNIT_OPTION",
            "LOGIN_FACILITY_OPTION",
            "LOGIN_PROFILE_TILE",
            "LOGIN_CONNECT_BUTTON",
            "MENU_CONTAINER",
        ] {
            assert!(catalog.get(key).is_some(), "missing {}", key);
        }
    }
}
