//! Core data model types for seesay.
//!
//! These are the fundamental types the session engine uses to represent
//! questions, their layout, and where their assets live.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::answer::AnswerVariant;

/// Literal catalog label for comprehension questions.
pub const COMPREHENSION_LABEL: &str = "הבנה";
/// Literal catalog label for expression questions.
pub const EXPRESSION_LABEL: &str = "הבעה";

/// What the respondent is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Point at the right picture.
    Comprehension,
    /// Say something out loud; the answer is recorded.
    Expression,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Comprehension => write!(f, "comprehension"),
            QueryType::Expression => write!(f, "expression"),
        }
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            COMPREHENSION_LABEL => return Ok(QueryType::Comprehension),
            EXPRESSION_LABEL => return Ok(QueryType::Expression),
            _ => {}
        }
        match s.trim().to_lowercase().as_str() {
            "comprehension" | "c" => Ok(QueryType::Comprehension),
            "expression" | "e" => Ok(QueryType::Expression),
            other => Err(format!("unknown query type: {other}")),
        }
    }
}

/// Developmental age bucket. Declaration order is the catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "2:00-2:06")]
    From2y0m,
    #[serde(rename = "2:07-3:00")]
    From2y7m,
    #[serde(rename = "3:00-4:00")]
    From3y,
    #[serde(rename = "4:00-5:00")]
    From4y,
    #[serde(rename = "5:00-6:00")]
    From5y,
}

impl AgeGroup {
    /// All buckets in catalog order.
    pub const ALL: [AgeGroup; 5] = [
        AgeGroup::From2y0m,
        AgeGroup::From2y7m,
        AgeGroup::From3y,
        AgeGroup::From4y,
        AgeGroup::From5y,
    ];

    /// The literal label used in the catalog.
    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::From2y0m => "2:00-2:06",
            AgeGroup::From2y7m => "2:07-3:00",
            AgeGroup::From3y => "3:00-4:00",
            AgeGroup::From4y => "4:00-5:00",
            AgeGroup::From5y => "5:00-6:00",
        }
    }

    /// Position in the catalog ordering.
    pub fn rank(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AgeGroup::ALL
            .into_iter()
            .find(|g| g.label() == s)
            .ok_or_else(|| format!("unknown age group: {s}"))
    }
}

/// How many images a question shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageCount {
    /// One row of `n` images.
    Single(u32),
    /// Two rows: `top` images on the first row, `total` overall.
    TwoRow { top: u32, total: u32 },
}

impl ImageCount {
    /// Parse the catalog's `image_count` cell. Unparsable counts become 1.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some((top, total)) = raw.split_once('|') {
            let top = leading_number(top).unwrap_or(0);
            let total = leading_number(total).unwrap_or(1).max(1);
            return ImageCount::TwoRow {
                top: top.min(total),
                total,
            };
        }
        ImageCount::Single(leading_number(raw).filter(|n| *n > 0).unwrap_or(1))
    }

    /// Total number of images, across both rows.
    pub fn total(&self) -> u32 {
        match self {
            ImageCount::Single(n) => *n,
            ImageCount::TwoRow { total, .. } => *total,
        }
    }

    /// Row split for the visual layer.
    pub fn layout(&self) -> Layout {
        match *self {
            ImageCount::Single(n) => Layout {
                top_row: n,
                bottom_row: 0,
                top_row_bigger: false,
            },
            ImageCount::TwoRow { top, total } => Layout {
                top_row: top,
                bottom_row: total - top,
                top_row_bigger: (top as f64) < (total as f64) / 2.0,
            },
        }
    }
}

impl fmt::Display for ImageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageCount::Single(n) => write!(f, "{n}"),
            ImageCount::TwoRow { top, total } => write!(f, "{top}|{total}"),
        }
    }
}

/// Row split of a question's images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub top_row: u32,
    pub bottom_row: u32,
    /// Fewer images on top than half the total: draw them larger.
    pub top_row_bigger: bool,
}

/// A single catalog question. Immutable once the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Identifier, also the asset directory name.
    pub query_number: String,
    /// The question read aloud by the operator.
    pub text: String,
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub age_group: AgeGroup,
    pub image_count: ImageCount,
    /// Raw answer string, see [`AnswerVariant::parse`].
    pub answer_spec: String,
    #[serde(default)]
    pub hint: Option<String>,
}

impl Question {
    /// Numeric value of the query number (leading digits, 0 if none).
    pub fn number(&self) -> u32 {
        leading_number(&self.query_number).unwrap_or(0)
    }

    /// Parse the answer string into its scoring rule.
    pub fn answer_variant(&self) -> AnswerVariant {
        AnswerVariant::parse(&self.answer_spec, &self.query_number)
    }

    /// Hint text if present and not blank.
    pub fn hint_text(&self) -> Option<&str> {
        self.hint.as_deref().filter(|h| !h.trim().is_empty())
    }
}

/// Where question assets live: `{base}/{query_number}/image_{index}.webp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLayout {
    base: String,
}

impl Default for AssetLayout {
    fn default() -> Self {
        Self::new("resources/test_assets")
    }
}

impl AssetLayout {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// URL of one answer image (1-based index).
    pub fn image_url(&self, query_number: &str, index: u32) -> String {
        format!("{}/{}/image_{}.webp", self.base, query_number, index)
    }

    /// Every image URL of a question, in index order.
    pub fn question_urls(&self, query_number: &str, count: ImageCount) -> Vec<String> {
        (1..=count.total())
            .map(|i| self.image_url(query_number, i))
            .collect()
    }

    /// Resolve a path relative to the asset base (e.g. a mask reference).
    pub fn resolve(&self, relative: &str) -> String {
        format!("{}/{}", self.base, relative.trim_start_matches('/'))
    }

    pub fn fireworks_url(&self) -> String {
        self.resolve("general/fireworks.webp")
    }

    pub fn chest_url(&self) -> String {
        self.resolve("general/chest.webp")
    }
}

/// Leading decimal digits of `s` as a number, like a lenient integer parse.
pub(crate) fn leading_number(s: &str) -> Option<u32> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_labels() {
        assert_eq!(
            "הבנה".parse::<QueryType>().unwrap(),
            QueryType::Comprehension
        );
        assert_eq!(" הבעה ".parse::<QueryType>().unwrap(), QueryType::Expression);
        assert_eq!(
            "Expression".parse::<QueryType>().unwrap(),
            QueryType::Expression
        );
        assert!("other".parse::<QueryType>().is_err());
    }

    #[test]
    fn age_group_order_follows_labels() {
        let mut groups = vec![AgeGroup::From5y, AgeGroup::From2y0m, AgeGroup::From3y];
        groups.sort();
        assert_eq!(
            groups,
            vec![AgeGroup::From2y0m, AgeGroup::From3y, AgeGroup::From5y]
        );
        assert_eq!("2:07-3:00".parse::<AgeGroup>().unwrap(), AgeGroup::From2y7m);
        assert_eq!(AgeGroup::From4y.rank(), 3);
        assert!("6:00-7:00".parse::<AgeGroup>().is_err());
    }

    #[test]
    fn image_count_parsing() {
        assert_eq!(ImageCount::parse("3"), ImageCount::Single(3));
        assert_eq!(ImageCount::parse(""), ImageCount::Single(1));
        assert_eq!(ImageCount::parse("abc"), ImageCount::Single(1));
        assert_eq!(
            ImageCount::parse("2|6"),
            ImageCount::TwoRow { top: 2, total: 6 }
        );
        assert_eq!(ImageCount::parse("2|6").total(), 6);
    }

    #[test]
    fn two_row_layout() {
        let layout = ImageCount::parse("2|6").layout();
        assert_eq!(layout.top_row, 2);
        assert_eq!(layout.bottom_row, 4);
        assert!(layout.top_row_bigger);

        let even = ImageCount::parse("3|6").layout();
        assert!(!even.top_row_bigger);
    }

    #[test]
    fn asset_paths() {
        let assets = AssetLayout::new("https://cdn.example/test_assets/");
        assert_eq!(
            assets.image_url("12", 3),
            "https://cdn.example/test_assets/12/image_3.webp"
        );
        assert_eq!(
            assets.resolve("12/A.webp"),
            "https://cdn.example/test_assets/12/A.webp"
        );
        assert_eq!(
            assets.question_urls("5", ImageCount::Single(2)),
            vec![
                "https://cdn.example/test_assets/5/image_1.webp".to_string(),
                "https://cdn.example/test_assets/5/image_2.webp".to_string(),
            ]
        );
    }

    #[test]
    fn leading_number_is_lenient() {
        assert_eq!(leading_number("42a"), Some(42));
        assert_eq!(leading_number(" 7 "), Some(7));
        assert_eq!(leading_number("x1"), None);
    }
}
