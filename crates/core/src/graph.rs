//! Read-only view of a model graph
//!
//! The dispatcher never builds or validates graphs. It only walks operators
//! in definition order and looks at their type names and input element types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Element type of an operator input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    F16,
    Bf16,
    I8,
    U8,
    I32,
    I64,
    Boolean,
    Dynamic,
}

impl ElementType {
    /// Short declared name, e.g. `f32`
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F16 => "f16",
            ElementType::Bf16 => "bf16",
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::Boolean => "boolean",
            ElementType::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// One operator of a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique friendly name; this is the id reported by operation queries
    pub name: String,
    /// Operator type, e.g. `Convolution`
    pub type_name: String,
    #[serde(default)]
    pub inputs: Vec<ElementType>,
}

impl Operation {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            inputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, element_type: ElementType) -> Self {
        self.inputs.push(element_type);
        self
    }

    pub fn input_element_type(&self, index: usize) -> Option<ElementType> {
        self.inputs.get(index).copied()
    }

    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }
}

pub trait ModelGraph: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Operators in topological/definition order
    fn ordered_ops(&self) -> &[Operation];

    fn has_op_with_type(&self, type_name: &str) -> bool {
        self.ordered_ops().iter().any(|op| op.is_type(type_name))
    }
}

/// In-memory graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    #[serde(default)]
    pub ops: Vec<Operation>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
        }
    }

    pub fn with_op(mut self, op: Operation) -> Self {
        self.ops.push(op);
        self
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl ModelGraph for Graph {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordered_ops(&self) -> &[Operation] {
        &self.ops
    }
}

/// What a compile request points at
#[derive(Debug, Clone)]
pub enum ModelSource {
    Path(PathBuf),
    Graph(Arc<dyn ModelGraph>),
}

impl ModelSource {
    pub fn graph(&self) -> Option<&Arc<dyn ModelGraph>> {
        match self {
            ModelSource::Graph(graph) => Some(graph),
            ModelSource::Path(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ModelSource::Path(path) => path.display().to_string(),
            ModelSource::Graph(graph) => format!("graph:{}", graph.name()),
        }
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        ModelSource::Path(path)
    }
}

impl From<Arc<dyn ModelGraph>> for ModelSource {
    fn from(graph: Arc<dyn ModelGraph>) -> Self {
        ModelSource::Graph(graph)
    }
}
