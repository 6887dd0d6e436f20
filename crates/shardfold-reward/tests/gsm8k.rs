//! Dataset preparation feeding evaluation

use shardfold_reward::{
    Gsm8kRecord, evaluate_responses, extract_gsm8k_solution, prepare_split, whwm_score,
};

const RAW: &str = r#"{"question": "Weng earns $12 an hour for babysitting. Yesterday, she just did 50 minutes of babysitting. How much did she earn?", "answer": "Weng earns 12/60 = $<<12/60=0.2>>0.2 per minute.\nWorking 50 minutes, she earned 0.2 x 50 = $<<0.2*50=10>>10.\n#### 10"}
{"question": "A robe takes 2 bolts of blue fiber and half that much white fiber. How many bolts in total does it take?", "answer": "It takes 2/2=<<2/2=1>>1 bolt of white fiber\nSo the total amount of fabric is 2+1=<<2+1=3>>3 bolts of fabric\n#### 3"}
"#;

#[test]
fn test_prepared_records_grade_responses() {
    let mut prepared = Vec::new();
    let count = prepare_split(RAW.as_bytes(), &mut prepared, "test").unwrap();
    assert_eq!(count, 2);

    let records: Vec<Gsm8kRecord> = String::from_utf8(prepared)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records[0].reward_model.ground_truth, "10");
    assert_eq!(records[1].reward_model.ground_truth, "3");

    let responses = [
        "<what>rate</what><how>multiply</how><why>linear</why>\
         <meaningful>yes</meaningful><answer>$10</answer>",
        "<think>2 + 1</think><answer>4</answer>",
    ];

    let mut rows = String::new();
    for (record, response) in records.iter().zip(responses) {
        let row = serde_json::json!({
            "responses": response,
            "reward_model": record.reward_model,
        });
        rows.push_str(&row.to_string());
        rows.push('\n');
    }

    let accuracy = evaluate_responses(rows.as_bytes()).unwrap();
    assert_eq!(accuracy.total, 2);
    assert_eq!(accuracy.correct, 1);

    assert_eq!(whwm_score(responses[0], &records[0].reward_model.ground_truth), 3.0);
    assert_eq!(whwm_score(responses[1], &records[1].reward_model.ground_truth), 0.0);
}

#[test]
fn test_solution_marker_required() {
    assert!(extract_gsm8k_solution("The answer is 10.").is_err());
}
