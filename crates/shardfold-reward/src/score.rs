//! Scoring of generated solutions

use std::sync::LazyLock;

use regex::Regex;

static ANSWER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<answer>(.*?)</answer>").expect("answer pattern is valid"));

static COT_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>.*?</think>\s*<answer>.*?</answer>\s*")
        .expect("reasoning format pattern is valid")
});

static WHWM_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s)<what>.*?</what>\s*",
        r"<how>.*?</how>\s*",
        r"<why>.*?</why>\s*",
        r"<meaningful>.*?</meaningful>\s*",
        r"<answer>.*?</answer>\s*",
    ))
    .expect("what/how/why/meaningful format pattern is valid")
});

/// Score awarded for a well-formed response
pub const FORMAT_SCORE: f64 = 1.0;
/// Score awarded for a correct final answer
pub const ANSWER_SCORE: f64 = 2.0;

/// Contents of the first `<answer>` block, trimmed, with thousands
/// separators and dollar signs removed
#[must_use]
pub fn extract_answer(solution: &str) -> Option<String> {
    let caps = ANSWER.captures(solution)?;
    Some(caps[1].trim().replace([',', '$'], ""))
}

/// `match_score` if the extracted answer equals `ground_truth`, else 0
#[must_use]
pub fn answer_score(solution: &str, ground_truth: &str, match_score: f64) -> f64 {
    match extract_answer(solution) {
        Some(answer) if answer == ground_truth => match_score,
        _ => 0.0,
    }
}

/// `match_score` if a `<think>` block is followed by an `<answer>` block
#[must_use]
pub fn cot_format_score(solution: &str, match_score: f64) -> f64 {
    if COT_FORMAT.is_match(solution) {
        match_score
    } else {
        0.0
    }
}

/// `match_score` if `<what>`, `<how>`, `<why>`, `<meaningful>` and
/// `<answer>` blocks appear in that order
#[must_use]
pub fn whwm_format_score(solution: &str, match_score: f64) -> f64 {
    if WHWM_FORMAT.is_match(solution) {
        match_score
    } else {
        0.0
    }
}

/// Reasoning-format reward: format plus answer
#[must_use]
pub fn cot_score(solution: &str, ground_truth: &str) -> f64 {
    cot_format_score(solution, FORMAT_SCORE) + answer_score(solution, ground_truth, ANSWER_SCORE)
}

/// What/how/why/meaningful-format reward: format plus answer
#[must_use]
pub fn whwm_score(solution: &str, ground_truth: &str) -> f64 {
    whwm_format_score(solution, FORMAT_SCORE) + answer_score(solution, ground_truth, ANSWER_SCORE)
}
