//! Query assembly and SQL rendering

use serde_json::Value;
use tracing::trace;

use super::node::Node;
use super::visitor::JoinType;

/// A joined translation table
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinType,
    pub table: String,
    pub alias: String,
    pub on: Node,
}

/// A select over one model table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    joins: Vec<Join>,
    predicates: Vec<Node>,
    order: Vec<(Node, bool)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            joins: Vec::new(),
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn join_for(&self, alias: &str) -> Option<&Join> {
        self.joins.iter().find(|j| j.alias == alias)
    }

    pub fn predicates(&self) -> &[Node] {
        &self.predicates
    }

    /// Adds a join unless one with the same alias already covers `kind`
    ///
    /// A weaker existing join (INNER where OUTER is needed) is upgraded in
    /// place so the join order stays stable.
    pub fn join(&mut self, kind: JoinType, table: impl Into<String>, alias: impl Into<String>, on: Node) {
        let alias = alias.into();
        match self.joins.iter_mut().find(|j| j.alias == alias) {
            Some(existing) if existing.kind.satisfies(kind) => {}
            Some(existing) => {
                trace!(alias = %alias, "upgrading join to outer");
                existing.kind = kind;
                existing.on = on;
            }
            None => self.joins.push(Join {
                kind,
                table: table.into(),
                alias,
                on,
            }),
        }
    }

    pub fn filter(&mut self, predicate: Node) {
        self.predicates.push(predicate);
    }

    pub fn order_by(&mut self, node: Node, descending: bool) {
        self.order.push((node, descending));
    }

    pub fn limit(&mut self, limit: usize) {
        self.limit = Some(limit);
    }

    /// Renders the query selecting model ids, with `?` placeholders
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = SqlWriter::default();
        let table = quote(&self.table);

        sql.push(&format!("SELECT {}.\"id\" FROM {}", table, table));

        for join in &self.joins {
            sql.push(&format!(
                " {} {} {} ON ",
                join.kind.sql(),
                quote(&join.table),
                quote(&join.alias)
            ));
            sql.node(&join.on);
        }

        if !self.predicates.is_empty() {
            sql.push(" WHERE ");
            for (i, predicate) in self.predicates.iter().enumerate() {
                if i > 0 {
                    sql.push(" AND ");
                }
                sql.wrapped(predicate);
            }
        }

        if !self.order.is_empty() {
            sql.push(" ORDER BY ");
            for (i, (node, descending)) in self.order.iter().enumerate() {
                if i > 0 {
                    sql.push(", ");
                }
                sql.node(node);
                sql.push(if *descending { " DESC" } else { " ASC" });
            }
        }

        if let Some(limit) = self.limit {
            sql.push(&format!(" LIMIT {}", limit));
        }

        (sql.sql, sql.params)
    }
}

/// Double-quoted SQL identifier
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    /// Renders `node`, parenthesizing compound predicates
    fn wrapped(&mut self, node: &Node) {
        match node {
            Node::And(children) if children.len() > 1 => {
                self.push("(");
                self.node(node);
                self.push(")");
            }
            _ => self.node(node),
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Column { table, name } => {
                let column = format!("{}.{}", quote(table), quote(name));
                self.push(&column);
            }
            Node::Attribute(attr) => self.node(&attr.expr),
            Node::Literal(Value::Null) => self.push("NULL"),
            Node::Literal(value) => {
                self.params.push(value.clone());
                self.push("?");
            }
            Node::Sql(fragment) => self.push(fragment),

            Node::Equality(left, right) => self.comparison(left, right, "=", "IS NULL"),
            Node::NotEqual(left, right) => self.comparison(left, right, "!=", "IS NOT NULL"),
            Node::Matches(left, right) => {
                self.node(left);
                self.push(" LIKE ");
                self.node(right);
            }
            Node::In(left, items) => self.in_list(left, items),

            Node::And(children) if children.is_empty() => self.push("1=1"),
            Node::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.push(" AND ");
                    }
                    self.operand(child);
                }
            }
            Node::Or(left, right) => {
                self.push("(");
                self.operand(left);
                self.push(" OR ");
                self.operand(right);
                self.push(")");
            }
            Node::Not(inner) => {
                self.push("NOT (");
                self.node(inner);
                self.push(")");
            }
            Node::Grouping(inner) => {
                self.push("(");
                self.node(inner);
                self.push(")");
            }
            Node::Function { name, args } => {
                self.push(name);
                self.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.node(arg);
                }
                self.push(")");
            }
        }
    }

    /// Nested conjunctions inside a disjunction keep their own parentheses
    fn operand(&mut self, node: &Node) {
        match node {
            Node::And(children) if children.len() > 1 => {
                self.push("(");
                self.node(node);
                self.push(")");
            }
            _ => self.node(node),
        }
    }

    fn comparison(&mut self, left: &Node, right: &Node, op: &str, null_test: &str) {
        match (left.is_null(), right.is_null()) {
            (_, true) => {
                self.node(left);
                self.push(" ");
                self.push(null_test);
            }
            (true, false) => {
                self.node(right);
                self.push(" ");
                self.push(null_test);
            }
            (false, false) => {
                self.node(left);
                self.push(" ");
                self.push(op);
                self.push(" ");
                self.node(right);
            }
        }
    }

    fn in_list(&mut self, left: &Node, items: &[Node]) {
        let (nulls, values): (Vec<&Node>, Vec<&Node>) = items.iter().partition(|n| n.is_null());

        match (values.is_empty(), nulls.is_empty()) {
            (true, true) => self.push("1=0"),
            (true, false) => {
                self.node(left);
                self.push(" IS NULL");
            }
            (false, has_no_null) => {
                if !has_no_null {
                    self.push("(");
                }
                self.node(left);
                self.push(" IN (");
                for (i, item) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.node(item);
                }
                self.push(")");
                if !has_no_null {
                    self.push(" OR ");
                    self.node(left);
                    self.push(" IS NULL)");
                }
            }
        }
    }
}
