use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{now_micros, EdgeType, PropValue, ResultCode, SpaceId};

/// Default expression of a column.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    /// A constant.
    Value(PropValue),
    /// The wall clock at evaluation time. Non-deterministic: evaluate once per
    /// request so both mirrored copies store the same value.
    Now,
}

impl DefaultValue {
    /// Evaluates the expression; `now` is the request-wide clock reading.
    pub fn evaluate(&self, now: i64) -> PropValue {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Now => PropValue::Timestamp(now),
        }
    }
}

/// One column of an edge schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Whether null is allowed.
    pub nullable: bool,
    /// Value used when the column is omitted.
    pub default: Option<DefaultValue>,
}

impl ColumnDef {
    /// A column without default.
    pub fn new(name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            nullable,
            default: None,
        }
    }

    /// Sets the default expression.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Columns of one edge type, shared by the type and its negated mirror.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeSchema {
    /// Columns in storage order.
    pub columns: Vec<ColumnDef>,
}

impl EdgeSchema {
    /// Creates a schema from columns.
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    /// Index of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value for an omitted or null column: its default, else null if allowed.
    pub fn fill_value(&self, idx: usize, now: i64) -> Result<PropValue, ResultCode> {
        let column = self.columns.get(idx).ok_or(ResultCode::InvalidData)?;
        match &column.default {
            Some(default) => Ok(default.evaluate(now)),
            None if column.nullable => Ok(PropValue::Null),
            None => Err(ResultCode::InvalidData),
        }
    }

    /// Builds a full row from named values, filling the rest from defaults.
    pub fn build_row(&self, names: &[String], values: &[PropValue]) -> Result<Vec<PropValue>, ResultCode> {
        if names.len() != values.len() {
            return Err(ResultCode::InvalidData);
        }
        let now = now_micros();
        let mut row: Vec<Option<PropValue>> = vec![None; self.columns.len()];
        for (name, value) in names.iter().zip(values) {
            let idx = self.column_index(name).ok_or(ResultCode::InvalidData)?;
            row[idx] = Some(value.clone());
        }
        row.into_iter()
            .enumerate()
            .map(|(idx, value)| match value {
                Some(PropValue::Null) if !self.columns[idx].nullable => self.fill_value(idx, now),
                Some(value) => Ok(value),
                None => self.fill_value(idx, now),
            })
            .collect()
    }
}

/// Schema and topology oracle of the meta service.
pub trait SchemaManager: Send + Sync {
    /// Fixed vertex-id length of the space.
    fn vid_len(&self, space: SpaceId) -> Result<usize, ResultCode>;

    /// Number of partitions of the space.
    fn part_num(&self, space: SpaceId) -> Result<u32, ResultCode>;

    /// Schema of an edge type; negative types resolve to their positive twin.
    fn edge_schema(&self, space: SpaceId, edge_type: EdgeType) -> Result<EdgeSchema, ResultCode>;
}

#[derive(Clone, Debug, Default)]
struct SpaceDesc {
    vid_len: usize,
    part_num: u32,
    edges: HashMap<EdgeType, EdgeSchema>,
}

/// In-memory [`SchemaManager`].
#[derive(Default)]
pub struct StaticSchema {
    spaces: RwLock<HashMap<SpaceId, SpaceDesc>>,
}

impl StaticSchema {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a space.
    pub fn add_space(&self, space: SpaceId, vid_len: usize, part_num: u32) {
        self.spaces.write().insert(
            space,
            SpaceDesc {
                vid_len,
                part_num,
                edges: HashMap::new(),
            },
        );
    }

    /// Registers an edge type in a space added earlier.
    pub fn add_edge(&self, space: SpaceId, edge_type: EdgeType, schema: EdgeSchema) {
        if let Some(desc) = self.spaces.write().get_mut(&space) {
            desc.edges.insert(edge_type.wrapping_abs(), schema);
        }
    }
}

impl SchemaManager for StaticSchema {
    fn vid_len(&self, space: SpaceId) -> Result<usize, ResultCode> {
        self.spaces
            .read()
            .get(&space)
            .map(|d| d.vid_len)
            .ok_or(ResultCode::SpaceNotFound)
    }

    fn part_num(&self, space: SpaceId) -> Result<u32, ResultCode> {
        self.spaces
            .read()
            .get(&space)
            .map(|d| d.part_num)
            .ok_or(ResultCode::SpaceNotFound)
    }

    fn edge_schema(&self, space: SpaceId, edge_type: EdgeType) -> Result<EdgeSchema, ResultCode> {
        let spaces = self.spaces.read();
        let desc = spaces.get(&space).ok_or(ResultCode::SpaceNotFound)?;
        desc.edges
            .get(&edge_type.wrapping_abs())
            .cloned()
            .ok_or(ResultCode::InvalidData)
    }
}
