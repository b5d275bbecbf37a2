//! Built-in workflow templates for common browser automation jobs.
//!
//! Seed variables each template expects are listed in its description and
//! referenced as `${name}` placeholders.

use serde_json::{Value, json};
use taskloom_types::workflow::{Parameters, TaskSpec, WorkflowDefinition};

fn task(id: &str, agent_type: &str, action: &str, depends_on: &[&str], parameters: Value) -> TaskSpec {
    TaskSpec {
        id: id.to_string(),
        agent_type: agent_type.to_string(),
        action: action.to_string(),
        parameters: match parameters {
            Value::Object(map) => map,
            _ => Parameters::new(),
        },
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        alternative_parameters: Vec::new(),
        retry_overrides: None,
        timeout_secs: None,
    }
}

fn workflow(id: &str, name: &str, description: &str, tasks: Vec<TaskSpec>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        tasks,
        metadata: [("template".to_string(), Value::Bool(true))].into_iter().collect(),
    }
}

pub fn price_comparison() -> WorkflowDefinition {
    workflow(
        "price-comparison",
        "Price Comparison",
        "Compare product prices across two sites (seeds: site1Url, site2Url, priceSelector)",
        vec![
            task("navigate-1", "navigator", "navigate", &[], json!({"url": "${site1Url}"})),
            task(
                "extract-1",
                "extractor",
                "extract",
                &["navigate-1"],
                json!({"selector": "${priceSelector}", "extractType": "text"}),
            ),
            task("navigate-2", "navigator", "navigate", &[], json!({"url": "${site2Url}"})),
            task(
                "extract-2",
                "extractor",
                "extract",
                &["navigate-2"],
                json!({"selector": "${priceSelector}", "extractType": "text"}),
            ),
            task(
                "analyze",
                "analyzer",
                "analyze",
                &["extract-1", "extract-2"],
                json!({
                    "data": {"site1": "${extract-1}", "site2": "${extract-2}"},
                    "analysisType": "price-comparison",
                }),
            ),
        ],
    )
}

pub fn form_filling() -> WorkflowDefinition {
    let mut submit = task(
        "submit",
        "executor",
        "click",
        &["fill-name", "fill-email"],
        json!({"selector": "button[type=\"submit\"]"}),
    );
    submit.alternative_parameters = vec![
        json!({"selector": "input[type=\"submit\"]"}),
        json!({"selector": "form button"}),
    ]
    .into_iter()
    .filter_map(|v| v.as_object().cloned())
    .collect();

    workflow(
        "form-filling",
        "Form Filling",
        "Fill out and submit a web form (seeds: formUrl, name, email)",
        vec![
            task("navigate", "navigator", "navigate", &[], json!({"url": "${formUrl}"})),
            task(
                "fill-name",
                "executor",
                "type",
                &["navigate"],
                json!({"selector": "input[name=\"name\"]", "value": "${name}"}),
            ),
            task(
                "fill-email",
                "executor",
                "type",
                &["navigate"],
                json!({"selector": "input[name=\"email\"]", "value": "${email}"}),
            ),
            submit,
        ],
    )
}

pub fn data_extraction() -> WorkflowDefinition {
    workflow(
        "data-extraction",
        "Data Extraction",
        "Extract structured rows from a table (seeds: targetUrl)",
        vec![
            task("navigate", "navigator", "navigate", &[], json!({"url": "${targetUrl}"})),
            task(
                "extract-table",
                "extractor",
                "extract",
                &["navigate"],
                json!({
                    "selector": "table tbody tr",
                    "extractType": "structured",
                    "fields": {
                        "name": "td:nth-child(1)",
                        "value": "td:nth-child(2)",
                        "date": "td:nth-child(3)",
                    },
                }),
            ),
            task(
                "analyze",
                "analyzer",
                "analyze",
                &["extract-table"],
                json!({"data": "${extract-table}", "analysisType": "data-extraction"}),
            ),
        ],
    )
}

pub fn content_aggregation() -> WorkflowDefinition {
    workflow(
        "content-aggregation",
        "Content Aggregation",
        "Collect article links from a page and summarize them (seeds: sourceUrl)",
        vec![
            task("navigate", "navigator", "navigate", &[], json!({"url": "${sourceUrl}"})),
            task(
                "extract-links",
                "extractor",
                "extract",
                &["navigate"],
                json!({"selector": "a.article-link", "extractType": "href", "maxItems": 10}),
            ),
            task(
                "aggregate",
                "analyzer",
                "analyze",
                &["extract-links"],
                json!({"data": "${extract-links}", "analysisType": "content-aggregation"}),
            ),
        ],
    )
}

/// All built-in templates, ordered by id.
pub fn builtin() -> Vec<WorkflowDefinition> {
    vec![
        content_aggregation(),
        data_extraction(),
        form_filling(),
        price_comparison(),
    ]
}

/// Look up a built-in template by id.
pub fn find(id: &str) -> Option<WorkflowDefinition> {
    builtin().into_iter().find(|t| t.id == id)
}
