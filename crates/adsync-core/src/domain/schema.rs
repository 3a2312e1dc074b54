use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ConfigError;

/// Provider-agnostic field type assigned in a field dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SemanticType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Array,
    Object,
    /// A type name the dictionary uses but the engine does not know.
    Unknown(String),
}

impl SemanticType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "STRING",
            Self::Number => "NUMBER",
            Self::Integer => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Array => "ARRAY",
            Self::Object => "OBJECT",
            Self::Unknown(name) => name.as_str(),
        }
    }

    /// Resolves the spellings used by provider dictionaries. Never fails: unrecognized
    /// names are kept as [`SemanticType::Unknown`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "numeric string" | "text" => Self::String,
            "number" | "float" | "double" | "decimal" => Self::Number,
            "integer" | "int" | "int32" | "int64" | "long" => Self::Integer,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "timestamp" => Self::Timestamp,
            "array" => Self::Array,
            "object" | "json" => Self::Object,
            _ => Self::Unknown(value.trim().to_owned()),
        }
    }
}

impl Display for SemanticType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SemanticType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SemanticType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        if value.trim().is_empty() {
            return Err(D::Error::custom("field type cannot be empty"));
        }
        Ok(Self::parse(&value))
    }
}

/// Static description of one field of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    pub description: Option<String>,
    pub is_unique_key: bool,
    pub is_time_partition: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            description: None,
            is_unique_key: false,
            is_time_partition: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn time_partition(mut self) -> Self {
        self.is_time_partition = true;
        self
    }
}

/// Field dictionary for one fetchable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSchema {
    pub node_name: String,
    pub description: Option<String>,
    pub fields: BTreeMap<String, FieldDescriptor>,
    pub unique_keys: Vec<String>,
    pub is_time_series: bool,
    pub page_limit: Option<u32>,
    pub destination_name: Option<String>,
}

impl NodeSchema {
    pub fn new(
        node_name: impl Into<String>,
        fields: impl IntoIterator<Item = FieldDescriptor>,
        unique_keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut seen = BTreeSet::new();
        let unique_keys = unique_keys
            .into_iter()
            .map(Into::into)
            .filter(|key: &String| seen.insert(key.clone()))
            .collect::<Vec<_>>();

        let fields = fields
            .into_iter()
            .map(|mut field| {
                field.is_unique_key = unique_keys.contains(&field.name);
                (field.name.clone(), field)
            })
            .collect();

        Self {
            node_name: node_name.into(),
            description: None,
            fields,
            unique_keys,
            is_time_series: false,
            page_limit: None,
            destination_name: None,
        }
    }

    pub fn time_series(mut self) -> Self {
        self.is_time_series = true;
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = Some(page_limit);
        self
    }

    pub fn with_destination_name(mut self, destination_name: impl Into<String>) -> Self {
        self.destination_name = Some(destination_name.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Returns the selected fields in request order without duplicates; an empty
    /// selection means every field of the node.
    pub fn resolve_fields(&self, selected: &[String]) -> Vec<String> {
        if selected.is_empty() {
            return self.fields.keys().cloned().collect();
        }

        let mut seen = BTreeSet::new();
        selected
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    /// Unique keys absent from `selected`.
    pub fn missing_unique_keys(&self, selected: &[String]) -> Vec<String> {
        self.unique_keys
            .iter()
            .filter(|key| !selected.contains(key))
            .cloned()
            .collect()
    }
}

/// Field dictionaries of every node a provider exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    nodes: BTreeMap<String, NodeSchema>,
}

impl FieldSchema {
    pub fn new(nodes: impl IntoIterator<Item = NodeSchema>) -> Self {
        Self {
            nodes: nodes
                .into_iter()
                .map(|node| (node.node_name.clone(), node))
                .collect(),
        }
    }

    /// Parses a JSON dictionary keyed by node name.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, RawNodeSchema> = serde_json::from_str(input)?;
        Ok(Self::new(
            raw.into_iter().map(|(node_name, node)| node.into_schema(node_name)),
        ))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json_str(&input)
    }

    pub fn node(&self, node_name: &str) -> Option<&NodeSchema> {
        self.nodes.get(node_name)
    }

    pub fn insert(&mut self, node: NodeSchema) {
        self.nodes.insert(node.node_name.clone(), node);
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNodeSchema {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    unique_keys: Vec<String>,
    #[serde(default)]
    is_time_series: bool,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    destination_name: Option<String>,
    fields: BTreeMap<String, RawFieldDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldDescriptor {
    #[serde(rename = "type")]
    semantic_type: SemanticType,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    time_partition: bool,
}

impl RawNodeSchema {
    fn into_schema(self, node_name: String) -> NodeSchema {
        let fields = self.fields.into_iter().map(|(name, raw)| FieldDescriptor {
            name,
            semantic_type: raw.semantic_type,
            description: raw.description,
            is_unique_key: false,
            is_time_partition: raw.time_partition,
        });

        let mut node = NodeSchema::new(node_name, fields, self.unique_keys);
        node.description = self.description;
        node.is_time_series = self.is_time_series;
        node.page_limit = self.limit;
        node.destination_name = self.destination_name;
        node
    }
}
