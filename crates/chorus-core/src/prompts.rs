//! Prompt table loading
//!
//! Prompts are index-addressed: a prompt's position in the table is its
//! identity for output naming and resume matching, so order is preserved
//! exactly and rows are never dropped or deduplicated.

use std::path::Path;

use crate::config::PromptConfig;
use crate::error::PromptError;

/// Ordered, immutable list of prompt texts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompts {
    texts: Vec<String>,
}

impl Prompts {
    pub fn new(texts: Vec<String>) -> Self {
        Self { texts }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Prompt text at `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.texts.get(index).map(String::as_str)
    }

    /// `(index, text)` pairs in table order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.texts.iter().map(String::as_str).enumerate()
    }
}

impl<S: Into<String>> FromIterator<S> for Prompts {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Load prompts from the configured CSV table
///
/// Reads the `text_column` column, or the first column (with a warning) when
/// the table has no such header. Only the first `max_prompts` rows are kept.
pub fn load_prompts(config: &PromptConfig) -> Result<Prompts, PromptError> {
    load_prompts_from(&config.path, &config.text_column, config.max_prompts)
}

/// Load prompts from a CSV file with an explicit column and limit
pub fn load_prompts_from(
    path: &Path,
    text_column: &str,
    max_prompts: usize,
) -> Result<Prompts, PromptError> {
    if !path.is_file() {
        return Err(PromptError::NotFound(path.to_path_buf()));
    }
    log::info!("load_prompts: Reading prompts from {:?}", path);

    let read_err = |source: csv::Error| PromptError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(read_err)?;

    let headers = reader.headers().map_err(read_err)?.clone();
    if headers.is_empty() {
        return Err(PromptError::NoColumns(path.to_path_buf()));
    }

    let column = match headers.iter().position(|h| h.trim() == text_column) {
        Some(column) => column,
        None => {
            log::warn!(
                "load_prompts: '{}' column not found, using the first column ('{}')",
                text_column,
                &headers[0]
            );
            0
        }
    };

    let mut texts = Vec::new();
    for record in reader.records().take(max_prompts) {
        let record = record.map_err(read_err)?;
        texts.push(record.get(column).unwrap_or_default().to_string());
    }

    log::info!("load_prompts: Loaded {} prompts", texts.len());
    Ok(Prompts::new(texts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_csv(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("prompts.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_reads_text_column_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "id,text\n1,\"Hello world.\"\n2,\"This is a test.\"\n",
        );

        let prompts = load_prompts_from(&path, "text", 500).unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts.get(0), Some("Hello world."));
        assert_eq!(prompts.get(1), Some("This is a test."));
        assert_eq!(
            prompts.iter().collect::<Vec<_>>(),
            vec![(0, "Hello world."), (1, "This is a test.")]
        );
    }

    #[test]
    fn test_falls_back_to_first_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "sentence,speaker\nFirst one.,a\nSecond one.,b\n");

        let prompts = load_prompts_from(&path, "text", 500).unwrap();
        assert_eq!(prompts, Prompts::from_iter(["First one.", "Second one."]));
    }

    #[test]
    fn test_quoted_commas_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "\"text\"\n\"Hi there, Sarah here, have you got a minute?\"\n",
        );

        let prompts = load_prompts_from(&path, "text", 500).unwrap();
        assert_eq!(
            prompts.get(0),
            Some("Hi there, Sarah here, have you got a minute?")
        );
    }

    #[test]
    fn test_limit_keeps_leading_rows() {
        let dir = tempfile::tempdir().unwrap();
        let rows: String = (0..20).map(|i| format!("prompt {}\n", i)).collect();
        let path = write_csv(dir.path(), &format!("text\n{}", rows));

        let prompts = load_prompts_from(&path, "text", 5).unwrap();
        assert_eq!(prompts.len(), 5);
        assert_eq!(prompts.get(4), Some("prompt 4"));
    }

    #[test]
    fn test_short_rows_keep_their_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "id,text\n1,one\n2\n3,three\n");

        let prompts = load_prompts_from(&path, "text", 500).unwrap();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts.get(1), Some(""));
        assert_eq!(prompts.get(2), Some("three"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_prompts_from(&dir.path().join("missing.csv"), "text", 500).unwrap_err();
        assert!(matches!(err, PromptError::NotFound(_)));
    }
}
