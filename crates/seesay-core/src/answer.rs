//! Answer strings and click evaluation.
//!
//! Parsing is a pure function from the catalog's `answer` cell to an
//! [`AnswerVariant`]. Evaluation is a small per-question state machine fed
//! with clicks. Its verdict only drives visual feedback and the continue
//! affordance; the authoritative score is the grader's manual choice.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::leading_number;

/// The sequence the historical ordered check compared against.
pub const LEGACY_ORDERED_PAIR: [u32; 2] = [2, 1];

/// Parsed scoring rule for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerVariant {
    /// Exactly one correct image.
    Single { target: u32 },
    /// Every image in the set must be found, in any order.
    Multi { required: BTreeSet<u32> },
    /// Images must be clicked in this order.
    Ordered { sequence: Vec<u32> },
    /// Correctness comes from the green area of a mask bitmap.
    Mask { mask_ref: String },
    /// `excluded` is inert; `target` is the correct image.
    NonClickable { excluded: u32, target: u32 },
}

impl AnswerVariant {
    /// Parse an answer string. First matching rule wins:
    ///
    /// 1. `A` → mask at `{query_number}/A.webp`
    /// 2. `x{excluded}|{correct}` → non-clickable
    /// 3. contains `,` → multi
    /// 4. contains `->` → ordered
    /// 5. anything else → single (target 1 if unparsable)
    pub fn parse(raw: &str, query_number: &str) -> Self {
        let raw = raw.trim();

        if raw == "A" {
            return AnswerVariant::Mask {
                mask_ref: format!("{query_number}/A.webp"),
            };
        }

        if let Some(rest) = raw.strip_prefix('x') {
            if let Some((excluded, target)) = rest.split_once('|') {
                match (leading_number(excluded), leading_number(target)) {
                    (Some(excluded), Some(target)) => {
                        return AnswerVariant::NonClickable { excluded, target };
                    }
                    _ => tracing::warn!(
                        "malformed non-clickable answer '{raw}' for question {query_number}"
                    ),
                }
            }
        }

        if raw.contains(',') {
            let (required, unreadable) = parse_multi(raw);
            if unreadable > 0 {
                tracing::warn!(
                    "ignoring {unreadable} unreadable entries in answer '{raw}' for question {query_number}"
                );
            }
            return AnswerVariant::Multi { required };
        }

        if raw.contains("->") {
            let sequence: Vec<u32> = raw.split("->").filter_map(leading_number).collect();
            return AnswerVariant::Ordered { sequence };
        }

        AnswerVariant::Single {
            target: leading_number(raw).unwrap_or(1),
        }
    }

    /// Image index the respondent cannot interact with, if any.
    pub fn excluded(&self) -> Option<u32> {
        match self {
            AnswerVariant::NonClickable { excluded, .. } => Some(*excluded),
            _ => None,
        }
    }
}

/// Required images of a multi answer, plus how many entries did not parse.
/// Repeated indices are not unreadable.
fn parse_multi(raw: &str) -> (BTreeSet<u32>, usize) {
    let mut required = BTreeSet::new();
    let mut unreadable = 0;
    for entry in raw.split(',') {
        match leading_number(entry) {
            Some(n) => {
                required.insert(n);
            }
            None => unreadable += 1,
        }
    }
    (required, unreadable)
}

/// How ordered answers are matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderedRule {
    /// Trailing distinct clicks must equal the parsed sequence.
    #[default]
    ParsedSequence,
    /// Last two distinct clicks must be `2 → 1`, whatever the catalog says.
    LegacyPair,
}

/// A decoded mask image; only RGB matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBitmap {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 3]>,
}

impl MaskBitmap {
    /// Build a bitmap from row-major RGB pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 3]>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            pixels.len() == (width as usize) * (height as usize),
            "mask has {} pixels, expected {}x{}",
            pixels.len(),
            width,
            height
        );
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGB at a bitmap coordinate.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Whether a click on the displayed image lands on the green area.
    pub fn hit(&self, point: ClickPoint) -> bool {
        let Some((x, y)) = point.to_bitmap(self.width, self.height) else {
            return false;
        };
        let hit = self.pixel(x, y).is_some_and(is_dominant_green);
        tracing::debug!("mask click at {x},{y}: green={hit}");
        hit
    }
}

fn is_dominant_green([r, g, b]: [u8; 3]) -> bool {
    r < 50 && g > 200 && b < 50
}

/// A click position on the displayed image, in display pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickPoint {
    pub x: f64,
    pub y: f64,
    pub display_width: f64,
    pub display_height: f64,
}

impl ClickPoint {
    /// Map to bitmap coordinates. `None` when outside the image.
    pub fn to_bitmap(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        if self.display_width <= 0.0 || self.display_height <= 0.0 {
            return None;
        }
        let x = (self.x * width as f64 / self.display_width).floor();
        let y = (self.y * height as f64 / self.display_height).floor();
        if x < 0.0 || y < 0.0 || x >= width as f64 || y >= height as f64 {
            return None;
        }
        Some((x as u32, y as u32))
    }
}

/// What a single click did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// The click had no effect at all (inert image).
    Ignored,
    /// The click registered; `correct` is the running verdict.
    Registered { correct: bool },
}

/// Per-question click evaluator.
#[derive(Debug, Clone)]
pub struct AnswerEvaluator {
    variant: AnswerVariant,
    ordered_rule: OrderedRule,
    mask: Option<MaskBitmap>,
    found: BTreeSet<u32>,
    click_trail: Vec<u32>,
    last_click: Option<u32>,
    resolved: bool,
    continue_enabled: bool,
}

impl AnswerEvaluator {
    pub fn new(variant: AnswerVariant, ordered_rule: OrderedRule) -> Self {
        if let (AnswerVariant::Ordered { sequence }, OrderedRule::LegacyPair) =
            (&variant, ordered_rule)
        {
            if sequence[..] != LEGACY_ORDERED_PAIR[..] {
                tracing::warn!(
                    "ordered answer {sequence:?} is graded against the legacy pair {LEGACY_ORDERED_PAIR:?}"
                );
            }
        }
        Self {
            variant,
            ordered_rule,
            mask: None,
            found: BTreeSet::new(),
            click_trail: Vec::new(),
            last_click: None,
            resolved: false,
            continue_enabled: false,
        }
    }

    pub fn variant(&self) -> &AnswerVariant {
        &self.variant
    }

    /// Provide the decoded mask for a mask variant.
    pub fn attach_mask(&mut self, mask: MaskBitmap) {
        self.mask = Some(mask);
    }

    /// Advisory verdict: the respondent found the answer.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Whether the manual grading buttons may be shown.
    pub fn continue_enabled(&self) -> bool {
        self.continue_enabled
    }

    /// Multi-answer images found so far.
    pub fn found(&self) -> &BTreeSet<u32> {
        &self.found
    }

    /// Register a click on image `index` (1-based). `point` is only used by
    /// mask answers.
    pub fn click(&mut self, index: u32, point: Option<ClickPoint>) -> ClickOutcome {
        match &self.variant {
            AnswerVariant::NonClickable { excluded, target } => {
                if index == *excluded {
                    return ClickOutcome::Ignored;
                }
                let target = *target;
                self.resolve_if(index == target);
                self.continue_enabled = true;
            }
            AnswerVariant::Single { target } => {
                let target = *target;
                self.resolve_if(index == target);
                self.continue_enabled = true;
            }
            AnswerVariant::Multi { required } => {
                if required.contains(&index) && self.found.insert(index) {
                    let complete = self.found.len() == required.len();
                    self.resolve_if(complete);
                }
                self.continue_enabled = true;
            }
            AnswerVariant::Ordered { sequence } => {
                let target: Vec<u32> = match self.ordered_rule {
                    OrderedRule::ParsedSequence => sequence.clone(),
                    OrderedRule::LegacyPair => LEGACY_ORDERED_PAIR.to_vec(),
                };
                if self.click_trail.last() != Some(&index) {
                    self.click_trail.push(index);
                    let keep = target.len().max(2);
                    if self.click_trail.len() > keep {
                        let excess = self.click_trail.len() - keep;
                        self.click_trail.drain(..excess);
                    }
                    if self.click_trail.len() >= target.len().max(2) {
                        self.continue_enabled = true;
                        self.resolve_if(self.click_trail == target);
                    }
                } else {
                    // repeated click restarts the trail
                    self.click_trail = vec![index];
                }
            }
            AnswerVariant::Mask { .. } => {
                let hit = match (&self.mask, point) {
                    (Some(mask), Some(point)) => mask.hit(point),
                    _ => false,
                };
                self.resolve_if(hit);
                self.continue_enabled = true;
            }
        }
        self.last_click = Some(index);
        ClickOutcome::Registered {
            correct: self.resolved,
        }
    }

    fn resolve_if(&mut self, correct: bool) {
        if correct {
            self.resolved = true;
        }
    }

    /// Celebration and highlight flags for the visual layer.
    pub fn feedback(&self, image_count: u32) -> Vec<ImageFeedback> {
        (1..=image_count)
            .map(|index| {
                let celebrate = self.resolved
                    && match &self.variant {
                        AnswerVariant::Single { target }
                        | AnswerVariant::NonClickable { target, .. } => index == *target,
                        AnswerVariant::Multi { .. } => true,
                        AnswerVariant::Mask { .. } => self.last_click == Some(index),
                        AnswerVariant::Ordered { sequence } => sequence.last() == Some(&index),
                    };
                ImageFeedback {
                    index,
                    celebrate,
                    highlighted: matches!(self.variant, AnswerVariant::Multi { .. })
                        && self.found.contains(&index),
                    inert: self.variant.excluded() == Some(index),
                }
            })
            .collect()
    }
}

/// Visual state of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFeedback {
    pub index: u32,
    /// Show the fireworks overlay.
    pub celebrate: bool,
    /// Multi answer found so far.
    pub highlighted: bool,
    /// Rendered dimmed, ignores clicks.
    pub inert: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(raw: &str) -> AnswerEvaluator {
        AnswerEvaluator::new(AnswerVariant::parse(raw, "9"), OrderedRule::default())
    }

    #[test]
    fn multi_duplicates_are_not_unreadable() {
        let (required, unreadable) = parse_multi("1,1,3");
        assert_eq!(required, [1, 3].into_iter().collect());
        assert_eq!(unreadable, 0);

        let (required, unreadable) = parse_multi("1,?,3,");
        assert_eq!(required, [1, 3].into_iter().collect());
        assert_eq!(unreadable, 2);
    }

    #[test]
    fn parse_precedence() {
        assert_eq!(
            AnswerVariant::parse("A", "9"),
            AnswerVariant::Mask {
                mask_ref: "9/A.webp".into()
            }
        );
        assert_eq!(
            AnswerVariant::parse("x2|4", "9"),
            AnswerVariant::NonClickable {
                excluded: 2,
                target: 4
            }
        );
        assert_eq!(
            AnswerVariant::parse("1, 3,4", "9"),
            AnswerVariant::Multi {
                required: [1, 3, 4].into_iter().collect()
            }
        );
        assert_eq!(
            AnswerVariant::parse("2->1", "9"),
            AnswerVariant::Ordered {
                sequence: vec![2, 1]
            }
        );
        assert_eq!(
            AnswerVariant::parse(" 3 ", "9"),
            AnswerVariant::Single { target: 3 }
        );
    }

    #[test]
    fn parse_defaults_to_single_one() {
        assert_eq!(
            AnswerVariant::parse("", "9"),
            AnswerVariant::Single { target: 1 }
        );
        assert_eq!(
            AnswerVariant::parse("a", "9"),
            AnswerVariant::Single { target: 1 }
        );
        // lower-case "a" is not a mask, and "x" without "|" is not non-clickable
        assert_eq!(
            AnswerVariant::parse("x3", "9"),
            AnswerVariant::Single { target: 1 }
        );
    }

    #[test]
    fn single_answer() {
        let mut eval = evaluator("2");
        assert!(!eval.continue_enabled());

        eval.click(1, None);
        assert!(eval.continue_enabled());
        assert!(!eval.is_resolved());

        eval.click(3, None);
        assert!(!eval.is_resolved());

        assert_eq!(eval.click(2, None), ClickOutcome::Registered { correct: true });
        assert!(eval.is_resolved());
    }

    #[test]
    fn multi_answer_needs_every_required_image() {
        let mut eval = evaluator("1,3,4");
        for (click, resolved) in [(2, false), (1, false), (2, false), (4, false), (4, false), (3, true)] {
            eval.click(click, None);
            assert_eq!(eval.is_resolved(), resolved, "after clicking {click}");
        }
        assert!(eval.continue_enabled());
        assert!(!eval.found().contains(&2));
    }

    #[test]
    fn multi_answer_wrong_click_unlocks_continue() {
        let mut eval = evaluator("1,3");
        eval.click(2, None);
        assert!(eval.continue_enabled());
        assert!(!eval.is_resolved());
    }

    #[test]
    fn non_clickable_image_is_inert() {
        let mut eval = evaluator("x2|4");
        assert_eq!(eval.click(2, None), ClickOutcome::Ignored);
        assert!(!eval.continue_enabled());
        assert!(!eval.is_resolved());

        eval.click(4, None);
        assert!(eval.is_resolved());
        assert!(eval.continue_enabled());
    }

    #[test]
    fn ordered_matches_parsed_sequence() {
        let mut eval = evaluator("1->3");
        eval.click(1, None);
        assert!(!eval.continue_enabled());
        eval.click(3, None);
        assert!(eval.continue_enabled());
        assert!(eval.is_resolved());
    }

    #[test]
    fn ordered_uses_trailing_clicks() {
        let mut eval = evaluator("2->1");
        eval.click(1, None);
        eval.click(2, None);
        assert!(eval.continue_enabled());
        assert!(!eval.is_resolved());
        eval.click(1, None);
        assert!(eval.is_resolved());
    }

    #[test]
    fn ordered_three_steps() {
        let mut eval = evaluator("3->1->2");
        for i in [3, 1] {
            eval.click(i, None);
        }
        assert!(!eval.continue_enabled());
        eval.click(2, None);
        assert!(eval.is_resolved());
    }

    #[test]
    fn ordered_repeated_click_restarts() {
        let mut eval = evaluator("2->1");
        eval.click(2, None);
        eval.click(2, None);
        assert!(!eval.continue_enabled());
        eval.click(1, None);
        assert!(eval.is_resolved());
    }

    #[test]
    fn legacy_pair_ignores_parsed_sequence() {
        let mut eval = AnswerEvaluator::new(
            AnswerVariant::parse("1->3", "9"),
            OrderedRule::LegacyPair,
        );
        eval.click(1, None);
        eval.click(3, None);
        assert!(!eval.is_resolved());
        eval.click(2, None);
        eval.click(1, None);
        assert!(eval.is_resolved());
    }

    fn green_square_mask() -> MaskBitmap {
        // 4x4, green in the top-left 2x2
        let pixels = (0..16)
            .map(|i| {
                let (x, y) = (i % 4, i / 4);
                if x < 2 && y < 2 {
                    [0, 255, 0]
                } else {
                    [255, 255, 255]
                }
            })
            .collect();
        MaskBitmap::new(4, 4, pixels).unwrap()
    }

    #[test]
    fn mask_click_maps_display_coordinates() {
        let mut eval = evaluator("A");
        eval.attach_mask(green_square_mask());

        let miss = ClickPoint {
            x: 300.0,
            y: 300.0,
            display_width: 400.0,
            display_height: 400.0,
        };
        eval.click(1, Some(miss));
        assert!(eval.continue_enabled());
        assert!(!eval.is_resolved());

        let hit = ClickPoint {
            x: 100.0,
            y: 150.0,
            display_width: 400.0,
            display_height: 400.0,
        };
        eval.click(1, Some(hit));
        assert!(eval.is_resolved());
    }

    #[test]
    fn mask_click_without_bitmap_never_resolves() {
        let mut eval = evaluator("A");
        eval.click(
            1,
            Some(ClickPoint {
                x: 1.0,
                y: 1.0,
                display_width: 4.0,
                display_height: 4.0,
            }),
        );
        assert!(eval.continue_enabled());
        assert!(!eval.is_resolved());
    }

    #[test]
    fn click_point_outside_image() {
        let point = ClickPoint {
            x: 400.0,
            y: 10.0,
            display_width: 400.0,
            display_height: 400.0,
        };
        assert_eq!(point.to_bitmap(4, 4), None);
        assert!(MaskBitmap::new(2, 2, vec![[0, 0, 0]]).is_err());
    }

    #[test]
    fn feedback_flags() {
        let mut eval = evaluator("1,3");
        eval.click(1, None);
        let flags = eval.feedback(3);
        assert!(flags[0].highlighted);
        assert!(!flags[0].celebrate);

        eval.click(3, None);
        assert!(eval.feedback(3).iter().all(|f| f.celebrate));

        let eval = evaluator("x2|1");
        assert!(eval.feedback(3)[1].inert);
    }
}
