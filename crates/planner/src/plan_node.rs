//! The plan-node tree shipped to workers.
//!
//! The node set is closed and known at compile time. Every node carries the
//! schema of the rows it produces; interior nodes own their inputs. The
//! dispatcher itself only serializes, deserializes, and pattern-matches these
//! trees (the reduce path special-cases [`MailboxReceiveNode`] roots); the
//! upstream planner is responsible for building them.

use msq_common::schema::{DataSchema, Value};
use serde::{Deserialize, Serialize};

/// How rows cross a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    /// All rows go to the single receiving worker.
    Singleton,
    /// Rows are hash-partitioned across receiving workers.
    Hash,
    /// Every receiving worker sees all rows.
    Broadcast,
}

/// Join flavor of a [`HashJoinNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

/// One sort specification entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Input column index to sort on.
    pub column: usize,
    /// Descending order when set.
    pub descending: bool,
}

/// One fragment-tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanNode {
    /// Receive rows from an upstream stage's send node.
    MailboxReceive(MailboxReceiveNode),
    /// Send rows to a downstream stage's receive node.
    MailboxSend(MailboxSendNode),
    /// Table scan leaf.
    TableScan(TableScanNode),
    /// Row filter.
    Filter(FilterNode),
    /// Projection.
    Project(ProjectNode),
    /// Hash join.
    HashJoin(HashJoinNode),
    /// Hash aggregate.
    Aggregate(AggregateNode),
    /// Sort, optionally fetch-limited.
    Sort(SortNode),
    /// Offset/fetch limit.
    Limit(LimitNode),
    /// Literal row source leaf.
    Values(ValuesNode),
}

/// Receive side of a stage boundary; the reduce stage's root is always one
/// of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxReceiveNode {
    /// Schema of the received rows.
    pub data_schema: DataSchema,
    /// Stage id of the sending side.
    pub sender_stage_id: i32,
    /// Distribution of rows across receivers.
    pub exchange: ExchangeType,
    /// Sort order the sender guarantees, if any.
    pub sort_keys: Vec<SortKey>,
}

/// Send side of a stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxSendNode {
    /// Schema of the sent rows.
    pub data_schema: DataSchema,
    /// Stage id of the receiving side.
    pub receiver_stage_id: i32,
    /// Distribution of rows across receivers.
    pub exchange: ExchangeType,
    /// Input plan.
    pub input: Box<PlanNode>,
}

/// Table scan leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScanNode {
    /// Schema of the scanned columns.
    pub data_schema: DataSchema,
    /// Table name.
    pub table: String,
    /// Scanned column names, in output order.
    pub columns: Vec<String>,
}

/// Row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    /// Output schema (same as input).
    pub data_schema: DataSchema,
    /// Rendered predicate expression.
    pub predicate: String,
    /// Input plan.
    pub input: Box<PlanNode>,
}

/// Projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    /// Output schema.
    pub data_schema: DataSchema,
    /// Rendered projection expressions, one per output column.
    pub exprs: Vec<String>,
    /// Input plan.
    pub input: Box<PlanNode>,
}

/// Hash join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashJoinNode {
    /// Output schema.
    pub data_schema: DataSchema,
    /// Join flavor.
    pub join_type: JoinType,
    /// Left-side key column indices.
    pub left_keys: Vec<usize>,
    /// Right-side key column indices.
    pub right_keys: Vec<usize>,
    /// Left input.
    pub left: Box<PlanNode>,
    /// Right input.
    pub right: Box<PlanNode>,
}

/// Hash aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateNode {
    /// Output schema: group keys then aggregate values.
    pub data_schema: DataSchema,
    /// Group-by column indices.
    pub group_keys: Vec<usize>,
    /// Rendered aggregate calls.
    pub agg_calls: Vec<String>,
    /// Input plan.
    pub input: Box<PlanNode>,
}

/// Sort, optionally fetch-limited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortNode {
    /// Output schema (same as input).
    pub data_schema: DataSchema,
    /// Sort specification.
    pub sort_keys: Vec<SortKey>,
    /// Optional row cap applied after sorting.
    pub fetch: Option<usize>,
    /// Input plan.
    pub input: Box<PlanNode>,
}

/// Offset/fetch limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitNode {
    /// Output schema (same as input).
    pub data_schema: DataSchema,
    /// Rows to skip.
    pub offset: usize,
    /// Rows to emit after the offset.
    pub fetch: usize,
    /// Input plan.
    pub input: Box<PlanNode>,
}

/// Literal row source leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesNode {
    /// Schema of the literal rows.
    pub data_schema: DataSchema,
    /// Literal rows.
    pub rows: Vec<Vec<Value>>,
}

impl PlanNode {
    /// Returns direct child nodes.
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::MailboxReceive(_) => vec![],
            PlanNode::MailboxSend(x) => vec![x.input.as_ref()],
            PlanNode::TableScan(_) => vec![],
            PlanNode::Filter(x) => vec![x.input.as_ref()],
            PlanNode::Project(x) => vec![x.input.as_ref()],
            PlanNode::HashJoin(x) => vec![x.left.as_ref(), x.right.as_ref()],
            PlanNode::Aggregate(x) => vec![x.input.as_ref()],
            PlanNode::Sort(x) => vec![x.input.as_ref()],
            PlanNode::Limit(x) => vec![x.input.as_ref()],
            PlanNode::Values(_) => vec![],
        }
    }

    /// Schema of the rows this node produces.
    pub fn data_schema(&self) -> &DataSchema {
        match self {
            PlanNode::MailboxReceive(x) => &x.data_schema,
            PlanNode::MailboxSend(x) => &x.data_schema,
            PlanNode::TableScan(x) => &x.data_schema,
            PlanNode::Filter(x) => &x.data_schema,
            PlanNode::Project(x) => &x.data_schema,
            PlanNode::HashJoin(x) => &x.data_schema,
            PlanNode::Aggregate(x) => &x.data_schema,
            PlanNode::Sort(x) => &x.data_schema,
            PlanNode::Limit(x) => &x.data_schema,
            PlanNode::Values(x) => &x.data_schema,
        }
    }

    /// Stable node name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PlanNode::MailboxReceive(_) => "MailboxReceive",
            PlanNode::MailboxSend(_) => "MailboxSend",
            PlanNode::TableScan(_) => "TableScan",
            PlanNode::Filter(_) => "Filter",
            PlanNode::Project(_) => "Project",
            PlanNode::HashJoin(_) => "HashJoin",
            PlanNode::Aggregate(_) => "Aggregate",
            PlanNode::Sort(_) => "Sort",
            PlanNode::Limit(_) => "Limit",
            PlanNode::Values(_) => "Values",
        }
    }

    /// Pre-order traversal over the tree.
    pub fn walk(&self, visit: &mut impl FnMut(&PlanNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msq_common::schema::ColumnDataType;

    fn schema(names: &[&str]) -> DataSchema {
        DataSchema {
            column_names: names.iter().map(|n| n.to_string()).collect(),
            column_types: names.iter().map(|_| ColumnDataType::Long).collect(),
        }
    }

    #[test]
    fn walk_visits_every_node_once() {
        let tree = PlanNode::MailboxSend(MailboxSendNode {
            data_schema: schema(&["k", "v"]),
            receiver_stage_id: 0,
            exchange: ExchangeType::Singleton,
            input: Box::new(PlanNode::Filter(FilterNode {
                data_schema: schema(&["k", "v"]),
                predicate: "v > 10".to_string(),
                input: Box::new(PlanNode::TableScan(TableScanNode {
                    data_schema: schema(&["k", "v"]),
                    table: "t".to_string(),
                    columns: vec!["k".to_string(), "v".to_string()],
                })),
            })),
        });

        let mut names = Vec::new();
        tree.walk(&mut |node| names.push(node.name()));
        assert_eq!(names, vec!["MailboxSend", "Filter", "TableScan"]);
    }

    #[test]
    fn receive_node_is_a_leaf() {
        let node = PlanNode::MailboxReceive(MailboxReceiveNode {
            data_schema: schema(&["a"]),
            sender_stage_id: 1,
            exchange: ExchangeType::Singleton,
            sort_keys: vec![],
        });
        assert!(node.children().is_empty());
        assert_eq!(node.data_schema().size(), 1);
    }
}
