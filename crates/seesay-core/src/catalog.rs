//! Question catalog loader.
//!
//! Turns raw tabular rows into a validated, sorted sequence of [`Question`]s.
//! Rows missing the question text, type or age group are dropped without
//! surfacing an error.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;

use crate::answer::AnswerVariant;
use crate::model::{AgeGroup, ImageCount, Question};

/// One row of the catalog as it arrives from the CSV source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub query_number: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    /// Older sheets name the question column `text`; `query` wins when both
    /// are filled.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub age_group: Option<String>,
    #[serde(default)]
    pub image_count: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

/// The full normalized, sorted question set for a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    questions: Vec<Question>,
}

impl Catalog {
    /// Normalize and sort raw rows.
    ///
    /// Order is age-group rank, then numeric query number; ties keep their
    /// input order.
    pub fn from_rows(rows: impl IntoIterator<Item = RawRow>) -> Self {
        let mut questions: Vec<Question> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(line, row)| {
                let question = normalize_row(row);
                if question.is_none() {
                    tracing::debug!("dropping catalog row {}", line + 1);
                }
                question
            })
            .collect();

        // sort_by_key is stable
        questions.sort_by_key(|q| (q.age_group.rank(), q.number()));

        Self { questions }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter()
    }

    /// Question counts per age group, in catalog order.
    pub fn count_by_age_group(&self) -> Vec<(AgeGroup, usize)> {
        AgeGroup::ALL
            .into_iter()
            .map(|g| (g, self.questions.iter().filter(|q| q.age_group == g).count()))
            .collect()
    }
}

fn normalize(s: &str) -> String {
    s.trim().nfc().collect()
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.map(|s| normalize(&s)).filter(|s| !s.is_empty())
}

fn normalize_row(row: RawRow) -> Option<Question> {
    let text = non_empty(row.query).or_else(|| non_empty(row.text))?;
    let query_type = non_empty(row.query_type)?.parse().ok()?;
    let age_group = non_empty(row.age_group)?.parse().ok()?;

    Some(Question {
        query_number: row.query_number.map(|s| normalize(&s)).unwrap_or_default(),
        text,
        query_type,
        age_group,
        image_count: ImageCount::parse(row.image_count.as_deref().unwrap_or("")),
        answer_spec: row.answer.map(|s| normalize(&s)).unwrap_or_default(),
        hint: non_empty(row.hint),
    })
}

/// Parse CSV text (header row first) into a catalog.
pub fn parse_catalog_str(content: &str) -> Result<Catalog> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers = reader.headers().context("failed to read catalog header")?;
    anyhow::ensure!(
        headers.iter().any(|h| h == "query" || h == "text"),
        "catalog header has no query column"
    );

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<RawRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => tracing::debug!("skipping unreadable catalog row {}: {e}", line + 1),
        }
    }

    Ok(Catalog::from_rows(rows))
}

/// Load a catalog CSV file from disk.
pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file: {}", path.display()))?;

    parse_catalog_str(&content)
        .with_context(|| format!("failed to parse catalog: {}", path.display()))
}

/// A warning from catalog validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The query number (if applicable).
    pub query_number: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Validate a catalog for content mistakes that still load fine.
pub fn validate_catalog(catalog: &Catalog) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut warn = |q: &Question, message: String| {
        warnings.push(ValidationWarning {
            query_number: Some(q.query_number.clone()),
            message,
        })
    };

    let mut seen = HashSet::new();
    for q in catalog.iter() {
        if q.query_number.is_empty() {
            warn(q, "missing query number".into());
        } else if !seen.insert(q.query_number.as_str()) {
            warn(q, format!("duplicate query number: {}", q.query_number));
        }

        let total = q.image_count.total();
        let out_of_range = |i: &u32| *i == 0 || *i > total;

        match q.answer_variant() {
            AnswerVariant::Single { target } if out_of_range(&target) => {
                warn(q, format!("answer {target} is outside 1..={total}"))
            }
            AnswerVariant::Multi { required } => {
                if let Some(i) = required.iter().find(|i| out_of_range(i)) {
                    warn(q, format!("answer {i} is outside 1..={total}"));
                }
            }
            AnswerVariant::Ordered { sequence } => {
                if sequence.len() < 2 {
                    warn(q, "ordered answer needs at least two steps".into());
                }
                if let Some(i) = sequence.iter().find(|i| out_of_range(i)) {
                    warn(q, format!("answer {i} is outside 1..={total}"));
                }
            }
            AnswerVariant::NonClickable { excluded, target } => {
                if excluded == target {
                    warn(q, format!("image {target} is both excluded and correct"));
                }
                if out_of_range(&target) {
                    warn(q, format!("answer {target} is outside 1..={total}"));
                }
            }
            _ => {}
        }
    }

    warnings
}
