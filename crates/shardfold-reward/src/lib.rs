//! Rule-based rewards for GSM8K-style math training
//!
//! - [`score`]: answer extraction and format/answer scoring of model output
//! - [`dataset`]: turning raw GSM8K examples into training records
//! - [`eval`]: accuracy over a file of generated responses

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod dataset;
pub mod eval;
pub mod score;

pub use dataset::{Gsm8kExample, Gsm8kRecord, extract_gsm8k_solution, prepare_split};
pub use eval::{Accuracy, evaluate_responses};
pub use score::{
    answer_score, cot_format_score, cot_score, extract_answer, whwm_format_score, whwm_score,
};

use thiserror::Error;

/// Result type for reward operations
pub type Result<T> = std::result::Result<T, RewardError>;

/// Reward and dataset errors
#[derive(Error, Debug)]
pub enum RewardError {
    /// A reference answer has no `#### <number>` line
    #[error("no final answer marker in solution: {0}")]
    MissingSolution(String),

    /// A JSON line could not be decoded
    #[error("line {line}: {source}")]
    Json {
        /// 1-based line number
        line: usize,
        /// Decode error
        #[source]
        source: serde_json::Error,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
