use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use sift_core::config::LlmConfig;
use sift_core::{AgentParams, Job, LlmClient, ScrapeRequest, SiftError};
use sift_pipeline::ScrapeCoordinator;
use sift_storage::Storage;

use crate::engine::JobOutcome;

const SYSTEM_PROMPT: &str = "You extract structured data from web page content. \
Answer with JSON only: no prose, no code fences, no commentary. \
When a JSON Schema is provided, the answer must conform to it exactly.";

const ELISION_MARKER: &str = "\n\n[... content elided ...]\n\n";

/// Corrective round-trips after the first response, per the validation
/// retry contract.
const MAX_CORRECTIONS: usize = 2;

/// Scrape the target, hand its Markdown to the LLM with the caller's
/// instruction and optional schema, and validate the structured reply.
pub async fn run(
    storage: &Storage,
    coordinator: &ScrapeCoordinator,
    llm: &dyn LlmClient,
    config: &LlmConfig,
    job: &Job,
) -> Result<JobOutcome, SiftError> {
    let params: AgentParams = serde_json::from_value(job.input_params.clone())
        .map_err(|e| SiftError::Validation(format!("bad extract parameters: {e}")))?;
    params.validate()?;

    let mut req = ScrapeRequest::new(&params.url);
    req.render = params.render;
    req.timeout_ms = params.timeout_ms;
    let outcome = coordinator.scrape_admitted(&req).await?;
    let page = outcome.page;

    if storage.heartbeat_job(job.id).await? {
        return Ok(JobOutcome::Cancelled);
    }

    let content = truncate_head_tail(&page.markdown, config.max_input_chars, config.tail_chars);
    let timeout = params
        .timeout_ms
        .map(|ms| Duration::from_millis(ms.min(60_000)))
        .unwrap_or(Duration::from_secs(config.timeout_seconds));

    let validator = params
        .schema_definition
        .as_ref()
        .map(|schema| {
            jsonschema::validator_for(schema)
                .map_err(|e| SiftError::Validation(format!("bad schema_definition: {e}")))
        })
        .transpose()?;

    let mut prompt = build_prompt(&params.prompt, &content, params.schema_definition.as_ref());
    let mut last_problem = String::new();

    for attempt in 0..=MAX_CORRECTIONS {
        if attempt > 0 {
            // Cancellation is observed between LLM attempts, never
            // mid-call.
            if storage.heartbeat_job(job.id).await? {
                return Ok(JobOutcome::Cancelled);
            }
            prompt = build_correction_prompt(&params.prompt, &content, &last_problem);
        }

        let response = llm.complete(SYSTEM_PROMPT, &prompt, timeout).await?;

        match parse_llm_json(&response) {
            Ok(value) => {
                if let Some(validator) = &validator {
                    if let Err(problem) = validate(validator, &value) {
                        warn!(job_id = %job.id, attempt, "schema validation failed: {problem}");
                        last_problem = problem;
                        continue;
                    }
                }
                debug!(job_id = %job.id, attempt, "extraction validated");
                return Ok(JobOutcome::Completed(json!({
                    "data": value,
                    "source_url": page.canonical_url,
                    "markdown_fingerprint": page.content_hash,
                })));
            }
            Err(problem) => {
                warn!(job_id = %job.id, attempt, "response is not JSON: {problem}");
                last_problem = problem;
            }
        }
    }

    Err(SiftError::LlmOutputInvalid(format!(
        "output still invalid after {MAX_CORRECTIONS} corrections: {last_problem}"
    )))
}

fn build_prompt(instruction: &str, content: &str, schema: Option<&Value>) -> String {
    let mut prompt = format!(
        "Instruction:\n{instruction}\n\nPage content (Markdown):\n<content>\n{content}\n</content>\n"
    );
    if let Some(schema) = schema {
        prompt.push_str(&format!(
            "\nThe JSON answer MUST validate against this JSON Schema:\n{}\n",
            serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
        ));
    }
    prompt.push_str("\nRespond with the JSON value only.");
    prompt
}

fn build_correction_prompt(instruction: &str, content: &str, problem: &str) -> String {
    format!(
        "Your previous answer was rejected: {problem}\n\n\
         Produce a corrected JSON answer for the same task.\n\n\
         Instruction:\n{instruction}\n\nPage content (Markdown):\n<content>\n{content}\n</content>\n\n\
         Respond with the JSON value only."
    )
}

/// Head-heavy truncation: keep the first `head` chars and the last
/// `tail` chars with an elision marker between.
pub fn truncate_head_tail(text: &str, head: usize, tail: usize) -> String {
    let total: usize = text.chars().count();
    if total <= head + tail {
        return text.to_string();
    }
    let head_part: String = text.chars().take(head).collect();
    let tail_part: String = text
        .chars()
        .skip(total - tail)
        .collect();
    format!("{head_part}{ELISION_MARKER}{tail_part}")
}

/// Parse the model's reply as JSON, tolerating code fences and prose
/// around the value.
pub fn parse_llm_json(response: &str) -> Result<Value, String> {
    let trimmed = response.trim();

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }

    // Last resort: the outermost braced region.
    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&unfenced[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(format!("not valid JSON: {}", &trimmed.chars().take(120).collect::<String>()))
}

fn validate(validator: &jsonschema::Validator, value: &Value) -> Result<(), String> {
    let mut problems: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        problems.truncate(3);
        Err(problems.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_head_tail("hello", 100, 10), "hello");
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = "a".repeat(50) + &"b".repeat(50) + &"c".repeat(50);
        let out = truncate_head_tail(&text, 40, 20);
        assert!(out.starts_with(&"a".repeat(40)));
        assert!(out.ends_with(&"c".repeat(20)));
        assert!(out.contains("content elided"));
        assert!(out.len() < text.len() + ELISION_MARKER.len());
    }

    #[test]
    fn parses_bare_and_fenced_json() {
        assert_eq!(parse_llm_json(r#"{"a":1}"#).unwrap(), json!({"a":1}));
        assert_eq!(
            parse_llm_json("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a":1})
        );
        assert_eq!(
            parse_llm_json("Here you go: {\"a\": 1} hope that helps").unwrap(),
            json!({"a":1})
        );
        assert!(parse_llm_json("no json here").is_err());
    }

    #[test]
    fn schema_validation_reports_problems() {
        let schema = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"],
        });
        let validator = jsonschema::validator_for(&schema).unwrap();
        assert!(validate(&validator, &json!({"name": "Ada"})).is_ok());
        let err = validate(&validator, &json!({"name": 7})).unwrap_err();
        assert!(err.contains("name"));
        assert!(validate(&validator, &json!({})).is_err());
    }
}
