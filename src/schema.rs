//! Schema model shared by the registry, validator, executor and runner
//!
//! Everything here is plain data. `module_id` is the only identity key;
//! nothing is ever derived from a module's name or tags.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::table::Table;

/// Protocol version stamped on definitions and results unless overridden
pub const DEFAULT_PROTOCOL_VERSION: &str = "v1";

/// Open, ordered key-value map of validated parameters
pub type Parameters = Map<String, Value>;

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Declared type of a module parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[default]
    Text,
    Number,
    #[serde(alias = "select")]
    Choice,
    #[serde(alias = "regex")]
    Pattern,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::Text => write!(f, "text"),
            ParameterKind::Number => write!(f, "number"),
            ParameterKind::Choice => write!(f, "choice"),
            ParameterKind::Pattern => write!(f, "pattern"),
        }
    }
}

/// One user-supplied parameter a module accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub key: String,
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: ParameterKind,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Allowed values for `choice`; `None` or empty accepts anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    /// Preset regular expression offered for `pattern` parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_template: Option<String>,
}

impl ParameterSpec {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
            required: true,
            default: None,
            choices: None,
            help_text: None,
            pattern_template: None,
        }
    }

    pub fn text(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(key, label, ParameterKind::Text)
    }

    pub fn number(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(key, label, ParameterKind::Number)
    }

    pub fn choice(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(key, label, ParameterKind::Choice)
    }

    pub fn pattern(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(key, label, ParameterKind::Pattern)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help_text = Some(help.into());
        self
    }

    pub fn with_pattern_template(mut self, pattern: impl Into<String>) -> Self {
        self.pattern_template = Some(pattern.into());
        self
    }

    /// The declared default, ignoring an explicit JSON `null`
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref().filter(|v| !v.is_null())
    }
}

// ============================================================================
// COLUMNS
// ============================================================================

/// Display metadata for one output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Chart kinds this column can be plotted with (e.g. "bar")
    #[serde(default)]
    pub chart_kinds: BTreeSet<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: None,
            chart_kinds: BTreeSet::new(),
            extra: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_chart_kind(mut self, kind: impl Into<String>) -> Self {
        self.chart_kinds.insert(kind.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// MODULE DEFINITION
// ============================================================================

/// Catalog entry describing a module's contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub module_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameter_specs: Vec<ParameterSpec>,
    #[serde(default)]
    pub required_columns: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Whether the module may use the injected external client
    #[serde(default)]
    pub allow_privileged_calls: bool,
}

impl ModuleDefinition {
    pub fn new(module_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            name: name.into(),
            description: None,
            parameter_specs: Vec::new(),
            required_columns: BTreeSet::new(),
            tags: BTreeSet::new(),
            protocol_version: default_protocol_version(),
            allow_privileged_calls: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameter_specs.push(spec);
        self
    }

    pub fn require_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn allow_privileged_calls(mut self, allow: bool) -> Self {
        self.allow_privileged_calls = allow;
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&ParameterSpec> {
        self.parameter_specs.iter().find(|p| p.key == key)
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// Caller-supplied request to run one module against one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub module_id: String,
    pub task_id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn new(module_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            task_id: task_id.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Opaque handle to an externally injected client (an LLM client, say).
///
/// The kernel never inspects it; modules that know the concrete type
/// downcast through [`as_any`](Self::as_any).
pub trait ExternalClient: Send + Sync {
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Per-invocation context handed to a module handler
#[derive(Clone)]
pub struct AnalysisContext {
    pub task_id: String,
    pub user_id: Option<i64>,
    pub client: Option<Arc<dyn ExternalClient>>,
    pub metadata: Map<String, Value>,
    /// Logger handle; entered by the executor while the handler runs
    pub span: Option<tracing::Span>,
}

impl AnalysisContext {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: None,
            client: None,
            metadata: Map::new(),
            span: None,
        }
    }

    pub fn with_user_id(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_client(mut self, client: Arc<dyn ExternalClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Copy of this context without the external client
    pub fn without_client(&self) -> Self {
        Self {
            client: None,
            ..self.clone()
        }
    }
}

impl fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("task_id", &self.task_id)
            .field("user_id", &self.user_id)
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Output of one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub table: Table,
    pub column_descriptors: Vec<ColumnDescriptor>,
    pub insights: Vec<String>,
    pub usage_stats: Option<Map<String, Value>>,
    pub protocol_version: String,
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            column_descriptors: Vec::new(),
            insights: Vec::new(),
            usage_stats: None,
            protocol_version: default_protocol_version(),
            extra: Map::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.column_descriptors = columns;
        self
    }

    pub fn with_insight(mut self, insight: impl Into<String>) -> Self {
        self.insights.push(insight.into());
        self
    }

    pub fn with_insights(mut self, insights: Vec<String>) -> Self {
        self.insights = insights;
        self
    }

    pub fn with_usage_stats(mut self, stats: Map<String, Value>) -> Self {
        self.usage_stats = Some(stats);
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}
