//! Survey documents as exchanged with the remote resource store.
//!
//! Updates are sent back as a full replace, so a [`Survey`] keeps the document exactly as the store
//! sent it (explicit nulls, unknown fields, odd step shapes) and only reads or writes the few keys
//! this server cares about.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("survey document has no string id")]
pub struct MissingSurveyId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Survey {
    id: String,
    document: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for Survey {
    type Error = MissingSurveyId;

    fn try_from(document: Map<String, Value>) -> Result<Self, Self::Error> {
        let id = document.get("id").and_then(Value::as_str).ok_or(MissingSurveyId)?.to_string();
        Ok(Self { id, document })
    }
}

impl From<Survey> for Map<String, Value> {
    fn from(survey: Survey) -> Self {
        survey.document
    }
}

impl Survey {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current icon reference, if it is a string
    pub fn icon(&self) -> Option<&str> {
        self.document.get("icon").and_then(Value::as_str)
    }

    /// Point the icon at `path`, returning the previous reference if there was one.
    pub fn set_icon(&mut self, path: &str) -> Option<String> {
        let previous = self.document.insert("icon".to_string(), Value::String(path.to_string()));
        previous.and_then(|value| value.as_str().map(str::to_string))
    }

    fn steps_mut(&mut self) -> impl Iterator<Item = &mut Map<String, Value>> {
        self.document
            .get_mut("task")
            .and_then(|task| task.get_mut("steps"))
            .and_then(Value::as_array_mut)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object_mut)
    }

    fn steps(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.document
            .get("task")
            .and_then(|task| task.get("steps"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
    }

    pub fn has_step(&self, step_id: &str) -> bool {
        self.steps().any(|step| step.get("id").and_then(Value::as_str) == Some(step_id))
    }

    /// Set `settings[key]` on the step with `step_id`. A missing or non-object `settings` is
    /// replaced by a fresh map. Returns false when there is no such step.
    pub fn set_step_setting(&mut self, step_id: &str, key: &str, value: Value) -> bool {
        let Some(step) = self
            .steps_mut()
            .find(|step| step.get("id").and_then(Value::as_str) == Some(step_id))
        else {
            return false;
        };

        let settings = step.entry("settings").or_insert(Value::Null);
        if !settings.is_object() {
            *settings = Value::Object(Map::new());
        }
        if let Value::Object(settings) = settings {
            settings.insert(key.to_string(), value);
        }
        true
    }
}
