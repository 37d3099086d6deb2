use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Agent name carried by records the reply parser could not attribute.
pub const UNKNOWN_AGENT: &str = "Unknown";

/// Result of one specialist (or treatment coordinator) call.
///
/// The model decides which keys a successful report carries, so `Success`
/// keeps the raw JSON object and callers probe for the fields they expect.
/// On the wire a `Failure` is the two-key object `{"error", "agent_name"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialistReport {
    Success(Map<String, Value>),
    Failure { error: String, agent_name: String },
}

impl SpecialistReport {
    pub fn failure(agent_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            agent_name: agent_name.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Error text to show instead of the report body.
    ///
    /// A successful reply whose JSON itself carries an `error` key is
    /// displayed as an error too.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failure { error, .. } => Some(error.as_str()),
            Self::Success(fields) => fields.get("error").and_then(Value::as_str),
        }
    }

    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Self::Failure { agent_name, .. } => Some(agent_name.as_str()),
            Self::Success(fields) => fields.get("agent_name").and_then(Value::as_str),
        }
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Success(fields) => Some(fields),
            Self::Failure { .. } => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields().and_then(|fields| fields.get(key))
    }

    /// Scalar field rendered as text. Lists and objects are not scalars.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    /// Entries of a list-valued field. Non-string entries are rendered as
    /// compact JSON; a missing or non-list field yields nothing.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        let Some(Value::Array(rows)) = self.get(key) else {
            return Vec::new();
        };
        rows.iter()
            .map(|row| match row {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect()
    }

    pub fn list_len(&self, key: &str) -> usize {
        match self.get(key) {
            Some(Value::Array(rows)) => rows.len(),
            _ => 0,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(fields) => Value::Object(fields.clone()),
            Self::Failure { error, agent_name } => {
                let mut object = Map::new();
                object.insert("error".to_string(), Value::String(error.clone()));
                object.insert("agent_name".to_string(), Value::String(agent_name.clone()));
                Value::Object(object)
            }
        }
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(object) = value else {
            return Err("specialist report must be a JSON object".to_string());
        };
        if object.len() == 2 {
            if let (Some(Value::String(error)), Some(Value::String(agent_name))) =
                (object.get("error"), object.get("agent_name"))
            {
                return Ok(Self::failure(agent_name.clone(), error.clone()));
            }
        }
        Ok(Self::Success(object))
    }
}

impl Serialize for SpecialistReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SpecialistReport {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}
