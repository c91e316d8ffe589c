//! Parsed command records handed to the executors.

use common::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators usable in criteria and join conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "=" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            ">" => Some(CompareOp::Gt),
            "<=" => Some(CompareOp::Le),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        }
    }
}

/// Predicate tree. AND binds tighter than OR: adjacent AND-linked conditions
/// group into one `And` node first, and the groups join under `Or`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Criteria {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// Inclusive on both ends.
    Between {
        field: String,
        low: Value,
        high: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// `%` matches any sequence, `_` any single character; case-insensitive.
    Like {
        field: String,
        pattern: String,
    },
    IsNull {
        field: String,
        negated: bool,
    },
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// One `JOIN t ON left OP right` clause. Fields may be qualified
/// (`table.column`); CROSS joins carry no condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub on: Option<JoinCondition>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: String,
    pub op: CompareOp,
    pub right: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// `*` expands to every field present in each row.
    Wildcard,
    Column(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectCommand {
    pub table: String,
    pub items: Vec<SelectItem>,
    pub distinct: bool,
    pub joins: Vec<JoinClause>,
    pub criteria: Option<Criteria>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateCommand {
    pub table: String,
    pub func: AggFunc,
    /// `None` for `COUNT(*)`.
    pub field: Option<String>,
    pub criteria: Option<Criteria>,
    pub group_by: Option<String>,
    /// Post-aggregation filter on the aggregate result.
    pub having: Option<(CompareOp, Value)>,
}

/// Declared field kinds for `DEFINE SCHEMA`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Number,
    Boolean,
    Date,
    Text,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Number => "NUMBER",
            FieldKind::Boolean => "BOOLEAN",
            FieldKind::Date => "DATE",
            FieldKind::Text => "TEXT",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "NUMBER" => Some(FieldKind::Number),
            "BOOLEAN" => Some(FieldKind::Boolean),
            "DATE" => Some(FieldKind::Date),
            "TEXT" => Some(FieldKind::Text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

/// Fully parsed statement. Parse failures surface as `Err(DbError::Parse)`
/// rather than a variant, and blank input parses to `Empty`.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateTable { table: String },
    ShowTables,
    ShowIndexes,
    ShowStats,
    Insert { table: String, rows: Vec<Row> },
    Select(SelectCommand),
    Delete { table: String, criteria: Option<Criteria> },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        criteria: Option<Criteria>,
    },
    DropTable { table: String },
    CreateIndex { table: String, field: String },
    Aggregate(AggregateCommand),
    Explain(Box<Command>),
    Begin,
    Commit,
    Rollback,
    CreateView { name: String, query: SelectCommand },
    DropView { name: String },
    DefineSchema { table: String, fields: Vec<SchemaField> },
    CreateTrigger {
        name: String,
        table: String,
        timing: TriggerTiming,
        event: TriggerEvent,
        statement: String,
    },
    DropTrigger { name: String },
    CreateProcedure { name: String, statements: Vec<String> },
    ExecuteProcedure { name: String },
    Backup { path: String },
    Restore { path: String },
    Empty,
}

/// Statements the front-end executes without a current database.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerCommand {
    CreateDatabase(String),
    UseDatabase(String),
    ShowDatabases,
    DropDatabase(String),
}
