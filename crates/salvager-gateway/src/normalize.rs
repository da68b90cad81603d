//! Mapping of the platform's loosely shaped records onto the domain types.
//!
//! The MCP tools and the REST API describe the same objects with slightly
//! different field names; every accessor here accepts both spellings.

use chrono::{DateTime, Utc};
use salvager_core::{GatheringTask, ResourceType, Result, SalvagerError, TaskStatus};
use serde_json::Value;

/// Strip a `{"data": {...}}` envelope if present.
pub fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// A list of records, given either bare or as `{"items": [...]}`.
pub fn items(value: Value) -> Option<Vec<Value>> {
    match unwrap_data(value) {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

pub fn resource_from_actor(actor: &Value) -> ResourceType {
    let id = first_str(actor, &["id", "actorId"])
        .map(str::to_string)
        .or_else(|| qualified_name(actor))
        .unwrap_or_default();
    resource_with_id(actor, id)
}

/// Store listings are identified as `username/name`, the form the REST
/// endpoints take; the opaque id is only a fallback.
pub fn resource_from_store_item(actor: &Value) -> ResourceType {
    let id = qualified_name(actor)
        .or_else(|| first_str(actor, &["id", "actorId"]).map(str::to_string))
        .unwrap_or_default();
    resource_with_id(actor, id)
}

fn qualified_name(actor: &Value) -> Option<String> {
    let username = actor.get("username").and_then(Value::as_str)?;
    let name = actor.get("name").and_then(Value::as_str)?;
    Some(format!("{}/{}", username, name))
}

fn resource_with_id(actor: &Value, id: String) -> ResourceType {
    let name = first_str(actor, &["title", "name"])
        .map(str::to_string)
        .unwrap_or_else(|| if id.is_empty() { "Unknown".to_string() } else { id.clone() });

    ResourceType {
        id,
        name,
        description: first_str(actor, &["description"]).unwrap_or_default().to_string(),
        category: actor
            .get("categories")
            .and_then(Value::as_array)
            .and_then(|categories| categories.first())
            .and_then(Value::as_str)
            .unwrap_or("general")
            .to_string(),
        input_schema: None,
    }
}

/// Actor details. `requested_id` wins over whatever id the record carries.
pub fn resource_details(requested_id: &str, actor: &Value, input_schema: Option<Value>) -> ResourceType {
    let mut resource = resource_from_actor(actor);
    resource.id = requested_id.to_string();
    if resource.name.is_empty() || resource.name == "Unknown" {
        resource.name = requested_id.to_string();
    }
    resource.input_schema = input_schema
        .or_else(|| actor.get("inputSchema").cloned())
        .or_else(|| actor.get("defaultRunOptions").cloned())
        .filter(|schema| !schema.is_null());
    resource
}

pub fn task_from_run(run: &Value) -> Result<GatheringTask> {
    let id = first_str(run, &["runId", "id"]).ok_or_else(|| {
        SalvagerError::ProtocolError(format!("Run record without an id: {}", run))
    })?;

    let status = first_str(run, &["status"])
        .map(TaskStatus::from_remote)
        .unwrap_or(TaskStatus::Pending);

    Ok(GatheringTask {
        id: id.to_string(),
        status,
        created_at: first_timestamp(run, &["startedAt", "createdAt"]).unwrap_or_else(Utc::now),
        completed_at: first_timestamp(run, &["finishedAt", "completedAt"]),
        dataset_id: first_str(run, &["defaultDatasetId", "datasetId"]).map(str::to_string),
    })
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn first_timestamp(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}
