//! GSM8K training records
//!
//! Raw examples carry a `question` and a worked `answer` ending in
//! `#### <number>`. Each becomes a chat prompt with the what/how/why/meaningful
//! instruction, plus the rule-based reward target.

use std::io::{BufRead, Write};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, RewardError};

/// Dataset identifier recorded on every record
pub const DATA_SOURCE: &str = "openai/gsm8k";

/// Suffix appended to every question to disable the model's thinking mode
pub const NO_THINK_SUFFIX: &str = " /no_think";

/// System prompt asking for tagged reasoning and a tagged answer
pub const WHWM_INSTRUCTION: &str = "
Answer the given question.
You must conduct reasoning inside <think> and </think> each time you process new information.
During reasoning, you must think through the following sub-questions, in any order and as many times as needed. Each time you consider one, wrap your reasoning using the appropriate tag:
- Use <what> and </what> to describe what are the known and unknown objects in the question, and the relationships between them.
- Use <how> and </how> to explain how these objects and relationships can be used to solve the question.
- Use <why> and </why> to justify why this solution method is valid.
- Use <meaningful> and </meaningful> to verify whether the solution correctly and meaningfully solves the question.
You may revisit any sub-question multiple times and in any order inside <think> and </think>.
Once you are confident that the question is correctly solved, provide the answer inside <answer> and </answer>, without detailed illustrations
";

static SOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#### (-?[0-9.,]+)").expect("solution pattern is valid"));

/// Final numeric answer of a reference solution, without `,` or `$`
pub fn extract_gsm8k_solution(answer: &str) -> Result<String> {
    let caps = SOLUTION
        .captures(answer)
        .ok_or_else(|| RewardError::MissingSolution(answer.to_string()))?;
    Ok(caps[1].replace([',', '$'], ""))
}

/// One raw dataset row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gsm8kExample {
    /// Word problem
    pub question: String,
    /// Worked solution ending in `#### <number>`
    pub answer: String,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `system` or `user`
    pub role: String,
    /// Message text
    pub content: String,
}

/// Reward target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardModel {
    /// Scoring style; always `rule`
    pub style: String,
    /// Expected final answer
    pub ground_truth: String,
}

/// Provenance of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraInfo {
    /// Dataset split
    pub split: String,
    /// Row index within the split
    pub index: usize,
    /// Original worked solution
    pub answer: String,
    /// Original question
    pub question: String,
}

/// A training record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gsm8kRecord {
    /// Dataset identifier
    pub data_source: String,
    /// System instruction then the user question
    pub prompt: Vec<Message>,
    /// Skill label; always `math`
    pub ability: String,
    /// Reward target
    pub reward_model: RewardModel,
    /// Provenance
    pub extra_info: ExtraInfo,
}

impl Gsm8kRecord {
    /// Build the record for row `index` of `split`.
    pub fn from_example(example: Gsm8kExample, split: &str, index: usize) -> Result<Self> {
        let ground_truth = extract_gsm8k_solution(&example.answer)?;

        Ok(Self {
            data_source: DATA_SOURCE.to_string(),
            prompt: vec![
                Message {
                    role: "system".to_string(),
                    content: WHWM_INSTRUCTION.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: format!("{}{NO_THINK_SUFFIX}", example.question),
                },
            ],
            ability: "math".to_string(),
            reward_model: RewardModel {
                style: "rule".to_string(),
                ground_truth,
            },
            extra_info: ExtraInfo {
                split: split.to_string(),
                index,
                answer: example.answer,
                question: example.question,
            },
        })
    }
}

/// Convert a JSON-lines file of raw examples into JSON-lines records.
///
/// Blank lines are skipped and do not advance the row index. Returns the
/// number of records written.
pub fn prepare_split<R: BufRead, W: Write>(reader: R, mut writer: W, split: &str) -> Result<usize> {
    let mut index = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let example: Gsm8kExample = serde_json::from_str(&line).map_err(|source| {
            RewardError::Json {
                line: line_no + 1,
                source,
            }
        })?;
        let record = Gsm8kRecord::from_example(example, split, index)?;
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        index += 1;
    }
    writer.flush()?;

    debug!(split, records = index, "prepared split");
    Ok(index)
}
