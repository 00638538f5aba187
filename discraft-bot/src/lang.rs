//! Localised bot texts.
//!
//! Languages are declared in `<lang_dir>/langs.json`; each one has a mapping
//! tree under `<lang_dir>/<id>/` made of JSON files whose top-level keys map to
//! texts. A key missing from a language is looked up along its fallback chain.
//!
//! ```json
//! {
//!   "fallback": "en_us",
//!   "langs": [
//!     { "id": "en_us", "name": "English (US)" },
//!     { "id": "fr", "name": "Français", "fallback": "en_us" }
//!   ]
//! }
//! ```

use discraft_common::error::ResultExt;
use discraft_common::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Name of the declaration file inside the language directory.
pub const LANGS_FILE: &str = "langs.json";

/// Fallback used when `langs.json` does not name one.
pub const DEFAULT_FALLBACK: &str = "en_us";

/// Declaration of one language.
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fallback: Option<String>,
}

impl LanguageDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, fallback: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fallback: fallback.map(str::to_string),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LangsFile {
    #[serde(default = "default_fallback")]
    fallback: String,
    langs: Vec<LanguageDef>,
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK.into()
}

/// A loaded language.
#[derive(Debug)]
pub struct Language {
    id: String,
    name: String,
    texts: HashMap<String, String>,
    fallback: Option<usize>,
}

impl Language {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of keys defined by this language itself.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// All loaded languages, with fallbacks resolved.
#[derive(Debug)]
pub struct LanguageRegistry {
    languages: Vec<Language>,
    index: HashMap<String, usize>,
}

impl LanguageRegistry {
    /// Load the languages declared in `<lang_dir>/langs.json`.
    pub fn load_dir(lang_dir: &Path) -> Result<Self> {
        let path = lang_dir.join(LANGS_FILE);
        if !path.is_file() {
            return Err(Error::Config(format!(
                "missing language declarations: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(&path).context(path.display().to_string())?;
        let file: LangsFile = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?;
        Self::load_all(file.langs, lang_dir, &file.fallback)
    }

    /// Load a set of languages.
    ///
    /// A declared fallback that names no loaded language resolves to
    /// `default_fallback`. Nothing is returned unless every language loads and
    /// the fallback graph is acyclic.
    pub fn load_all(defs: Vec<LanguageDef>, lang_dir: &Path, default_fallback: &str) -> Result<Self> {
        let mut index = HashMap::with_capacity(defs.len());
        let mut dirs: Vec<PathBuf> = Vec::with_capacity(defs.len());

        for (i, def) in defs.iter().enumerate() {
            if def.id.is_empty() || def.id != def.id.to_lowercase() {
                return Err(Error::Config(format!(
                    "language id must be lowercase: {:?}",
                    def.id
                )));
            }
            if index.insert(def.id.clone(), i).is_some() {
                return Err(Error::Config(format!("duplicate language id: {}", def.id)));
            }
            let dir = lang_dir.join(&def.id);
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "missing language files for {}: {}",
                    def.id,
                    dir.display()
                )));
            }
            dirs.push(dir);
        }

        let fallbacks = resolve_fallbacks(&defs, &index, default_fallback)?;

        let mut languages = Vec::with_capacity(defs.len());
        for ((def, dir), fallback) in defs.into_iter().zip(dirs).zip(fallbacks) {
            let texts = load_tree(&dir)?;
            tracing::debug!(lang = %def.id, keys = texts.len(), "Loaded language");
            languages.push(Language {
                id: def.id,
                name: def.name,
                texts,
                fallback,
            });
        }

        Ok(Self { languages, index })
    }

    /// Look up a language by id, ignoring case.
    pub fn language(&self, id: &str) -> Option<&Language> {
        self.index
            .get(&id.to_lowercase())
            .map(|&i| &self.languages[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.language(id).is_some()
    }

    /// Loaded languages in declaration order.
    pub fn languages(&self) -> impl Iterator<Item = &Language> {
        self.languages.iter()
    }

    /// Text for `key` in `lang`, walking the fallback chain.
    pub fn get(&self, lang: &str, key: &str) -> Option<&str> {
        let mut current = self.index.get(&lang.to_lowercase()).copied();
        // Fallbacks were checked for cycles at load time; the bound is a backstop.
        for _ in 0..self.languages.len() {
            let language = &self.languages[current?];
            if let Some(text) = language.texts.get(key) {
                return Some(text);
            }
            current = language.fallback;
        }
        None
    }

    /// Like [`get`](Self::get), replacing `{0}`, `{1}`, ... with `args`.
    pub fn format(&self, lang: &str, key: &str, args: &[&str]) -> Option<String> {
        self.get(lang, key).map(|text| substitute(text, args))
    }
}

/// Texts in the bot's own language.
///
/// Missing keys come back as the key itself, so a gap in a mapping tree shows
/// up in chat instead of failing the command.
#[derive(Debug, Clone)]
pub struct BotTexts {
    registry: Arc<LanguageRegistry>,
    lang: String,
}

impl BotTexts {
    /// Fails with `Config` when `lang` is not loaded.
    pub fn new(registry: Arc<LanguageRegistry>, lang: &str) -> Result<Self> {
        let lang = registry
            .language(lang)
            .map(|l| l.id().to_string())
            .ok_or_else(|| Error::Config(format!("bot language {lang} is not loaded")))?;
        Ok(Self { registry, lang })
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn get(&self, key: &str) -> String {
        match self.registry.get(&self.lang, key) {
            Some(text) => text.to_string(),
            None => {
                tracing::debug!(lang = %self.lang, key, "Missing text");
                key.to_string()
            }
        }
    }

    pub fn format(&self, key: &str, args: &[&str]) -> String {
        substitute(&self.get(key), args)
    }
}

/// Map every language to the index of its fallback, rejecting cycles.
fn resolve_fallbacks(
    defs: &[LanguageDef],
    index: &HashMap<String, usize>,
    default_fallback: &str,
) -> Result<Vec<Option<usize>>> {
    let mut fallbacks = Vec::with_capacity(defs.len());
    for def in defs {
        let Some(declared) = def.fallback.as_deref() else {
            fallbacks.push(None);
            continue;
        };
        let target = match index.get(&declared.to_lowercase()) {
            Some(&i) => i,
            None => *index.get(default_fallback).ok_or_else(|| {
                Error::Config(format!(
                    "fallback {declared} of {} is not loaded and default {default_fallback} is missing",
                    def.id
                ))
            })?,
        };
        fallbacks.push(Some(target));
    }

    for (start, def) in defs.iter().enumerate() {
        let mut current = fallbacks[start];
        let mut steps = 0;
        while let Some(next) = current {
            if next == start || steps >= defs.len() {
                return Err(Error::Config(format!(
                    "circular fallback involving {}",
                    def.id
                )));
            }
            steps += 1;
            current = fallbacks[next];
        }
    }

    Ok(fallbacks)
}

/// Read every file of a mapping tree, in path order.
fn load_tree(dir: &Path) -> Result<HashMap<String, String>> {
    let mut texts = HashMap::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Config(format!("cannot read {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(Error::Config(format!(
                "language files must be JSON: {}",
                path.display()
            )));
        }
        load_file(path, &mut texts)?;
    }
    Ok(texts)
}

fn load_file(path: &Path, texts: &mut HashMap<String, String>) -> Result<()> {
    let raw = std::fs::read_to_string(path).context(path.display().to_string())?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid JSON in {}: {e}", path.display())))?;
    let Value::Object(map) = value else {
        return Err(Error::Config(format!(
            "language file must be a JSON object: {}",
            path.display()
        )));
    };

    for (key, value) in map {
        let text = match value {
            Value::Array(items) => items
                .iter()
                .map(primitive_text)
                .collect::<Option<String>>(),
            other => primitive_text(&other),
        }
        .ok_or_else(|| {
            Error::Config(format!(
                "{key} in {} must be a primitive or an array of primitives",
                path.display()
            ))
        })?;
        texts.insert(key, text);
    }
    Ok(())
}

fn primitive_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn substitute(text: &str, args: &[&str]) -> String {
    args.iter()
        .enumerate()
        .fold(text.to_string(), |acc, (i, arg)| {
            acc.replace(&format!("{{{i}}}"), arg)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "en_us/general.json", r#"{"greet": "Hello", "bye": "Bye"}"#);
        write(dir.path(), "fr/general.json", r#"{"bye": "Au revoir"}"#);
        dir
    }

    #[test]
    fn test_fallback_chain_resolves() {
        let dir = tree();
        let registry = LanguageRegistry::load_all(
            vec![
                LanguageDef::new("en_us", "English", None),
                LanguageDef::new("fr", "French", Some("en_us")),
            ],
            dir.path(),
            "en_us",
        )
        .unwrap();

        assert_eq!(registry.get("fr", "greet"), Some("Hello"));
        assert_eq!(registry.get("fr", "bye"), Some("Au revoir"));
        assert_eq!(registry.get("FR", "bye"), Some("Au revoir"));
        assert_eq!(registry.get("fr", "missing"), None);
        assert_eq!(registry.get("de", "greet"), None);
    }

    #[test]
    fn test_unknown_fallback_uses_default() {
        let dir = tree();
        let registry = LanguageRegistry::load_all(
            vec![
                LanguageDef::new("en_us", "English", None),
                LanguageDef::new("fr", "French", Some("fr_ca")),
            ],
            dir.path(),
            "en_us",
        )
        .unwrap();
        assert_eq!(registry.get("fr", "greet"), Some("Hello"));
    }

    #[test]
    fn test_mutual_fallback_rejected() {
        let dir = tree();
        let err = LanguageRegistry::load_all(
            vec![
                LanguageDef::new("en_us", "English", Some("fr")),
                LanguageDef::new("fr", "French", Some("en_us")),
            ],
            dir.path(),
            "en_us",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("circular")));
    }

    #[test]
    fn test_self_fallback_rejected() {
        let dir = tree();
        let result = LanguageRegistry::load_all(
            vec![LanguageDef::new("en_us", "English", Some("en_us"))],
            dir.path(),
            "en_us",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_longer_cycle_rejected() {
        let dir = tree();
        write(dir.path(), "de/a.json", "{}");
        let result = LanguageRegistry::load_all(
            vec![
                LanguageDef::new("en_us", "English", Some("fr")),
                LanguageDef::new("fr", "French", Some("de")),
                LanguageDef::new("de", "German", Some("en_us")),
            ],
            dir.path(),
            "en_us",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_uppercase_id_rejected() {
        let dir = tree();
        let result = LanguageRegistry::load_all(
            vec![LanguageDef::new("EN_US", "English", None)],
            dir.path(),
            "en_us",
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_directory_rejected() {
        let dir = tree();
        let err = LanguageRegistry::load_all(
            vec![LanguageDef::new("de", "German", None)],
            dir.path(),
            "en_us",
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing language files"));
    }

    #[test]
    fn test_arrays_concatenate_and_nested_dirs_load() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "en_us/a.json", r#"{"long": ["Line one, ", "line ", 2, " ", true]}"#);
        write(dir.path(), "en_us/sub/b.json", r#"{"nested": "yes"}"#);
        let registry = LanguageRegistry::load_all(
            vec![LanguageDef::new("en_us", "English", None)],
            dir.path(),
            "en_us",
        )
        .unwrap();

        assert_eq!(registry.get("en_us", "long"), Some("Line one, line 2 true"));
        assert_eq!(registry.get("en_us", "nested"), Some("yes"));
    }

    #[test]
    fn test_bad_files_rejected() {
        for (name, content) in [
            ("en_us/a.json", r#"{"k": {"nested": 1}}"#),
            ("en_us/a.json", r#"{"k": [[1]]}"#),
            ("en_us/a.json", "not json"),
            ("en_us/a.txt", "plain"),
        ] {
            let dir = TempDir::new().unwrap();
            write(dir.path(), name, content);
            let result = LanguageRegistry::load_all(
                vec![LanguageDef::new("en_us", "English", None)],
                dir.path(),
                "en_us",
            );
            assert!(matches!(result, Err(Error::Config(_))), "{name}: {content}");
        }
    }

    #[test]
    fn test_unreadable_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("en_us/latin1.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [b'{', 0xff, b'}']).unwrap();

        let err = LanguageRegistry::load_all(
            vec![LanguageDef::new("en_us", "English", None)],
            dir.path(),
            "en_us",
        )
        .unwrap_err();
        assert!(err.to_string().contains("latin1.json"), "{err}");
        assert!(matches!(err, Error::WithContext { ref source, .. } if matches!(**source, Error::Io(_))));
    }

    #[test]
    fn test_load_dir_and_format() {
        let dir = tree();
        write(
            dir.path(),
            LANGS_FILE,
            r#"{"langs": [{"id": "en_us", "name": "English"}, {"id": "fr", "name": "French", "fallback": "en_us"}]}"#,
        );
        write(dir.path(), "en_us/fmt.json", r#"{"hi": "Hi {0}, your code is {1}"}"#);

        let registry = LanguageRegistry::load_dir(dir.path()).unwrap();
        assert!(registry.contains("fr"));
        assert_eq!(
            registry.languages().map(Language::id).collect::<Vec<_>>(),
            vec!["en_us", "fr"]
        );
        assert_eq!(
            registry.format("fr", "hi", &["Steve", "ABC123"]).as_deref(),
            Some("Hi Steve, your code is ABC123")
        );
    }

    #[test]
    fn test_bot_texts() {
        let dir = tree();
        let registry = LanguageRegistry::load_all(
            vec![
                LanguageDef::new("en_us", "English", None),
                LanguageDef::new("fr", "French", Some("en_us")),
            ],
            dir.path(),
            "en_us",
        )
        .unwrap();
        let registry = Arc::new(registry);

        let texts = BotTexts::new(registry.clone(), "FR").unwrap();
        assert_eq!(texts.lang(), "fr");
        assert_eq!(texts.get("greet"), "Hello");
        assert_eq!(texts.get("no.such.key"), "no.such.key");

        assert!(BotTexts::new(registry, "de").is_err());
    }

    #[test]
    fn test_load_dir_without_declarations() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            LanguageRegistry::load_dir(dir.path()),
            Err(Error::Config(_))
        ));
    }
}
