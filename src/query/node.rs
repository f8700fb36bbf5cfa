//! Predicate expression tree
//!
//! Nodes are built with the combinators on [`Node`] and rendered by
//! [`Query::to_sql`](super::Query::to_sql). Translated attributes appear as
//! [`Node::Attribute`] placeholders carrying the id of the backend class and
//! the locale they were built for, which is what the join visitors match on.

use serde_json::Value;

use crate::locale::Locale;

/// A translated attribute reference produced by a backend's `build_node`
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRef {
    pub attribute: String,
    pub locale: Locale,

    /// Id of the backend class that built the node
    pub backend_id: usize,

    /// Physical translation table, for backends that join one
    pub table_name: Option<String>,

    /// SQL expression the reference renders to
    pub expr: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Column { table: String, name: String },
    Attribute(AttributeRef),
    Literal(Value),
    /// Raw SQL fragment, rendered verbatim
    Sql(String),
    Equality(Box<Node>, Box<Node>),
    NotEqual(Box<Node>, Box<Node>),
    /// `LIKE`
    Matches(Box<Node>, Box<Node>),
    In(Box<Node>, Vec<Node>),
    And(Vec<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Grouping(Box<Node>),
    Function { name: String, args: Vec<Node> },
}

impl Node {
    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Node {
        Node::Column {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn attribute(
        attribute: impl Into<String>,
        locale: Locale,
        backend_id: usize,
        table_name: Option<String>,
        expr: Node,
    ) -> Node {
        Node::Attribute(AttributeRef {
            attribute: attribute.into(),
            locale,
            backend_id,
            table_name,
            expr: Box::new(expr),
        })
    }

    pub fn literal(value: impl Into<Value>) -> Node {
        Node::Literal(value.into())
    }

    pub fn null() -> Node {
        Node::Literal(Value::Null)
    }

    pub fn sql(fragment: impl Into<String>) -> Node {
        Node::Sql(fragment.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Node>) -> Node {
        Node::Function {
            name: name.into(),
            args,
        }
    }

    pub fn eq(self, other: impl Into<Node>) -> Node {
        Node::Equality(Box::new(self), Box::new(other.into()))
    }

    pub fn not_eq(self, other: impl Into<Node>) -> Node {
        Node::NotEqual(Box::new(self), Box::new(other.into()))
    }

    pub fn matches(self, pattern: impl Into<Node>) -> Node {
        Node::Matches(Box::new(self), Box::new(pattern.into()))
    }

    pub fn in_list<I, N>(self, items: I) -> Node
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        Node::In(Box::new(self), items.into_iter().map(Into::into).collect())
    }

    /// Conjunction; nested conjunctions are flattened
    pub fn and(self, other: impl Into<Node>) -> Node {
        let mut children = match self {
            Node::And(children) => children,
            node => vec![node],
        };
        match other.into() {
            Node::And(more) => children.extend(more),
            node => children.push(node),
        }
        Node::And(children)
    }

    pub fn or(self, other: impl Into<Node>) -> Node {
        Node::Or(Box::new(self), Box::new(other.into()))
    }

    pub fn not(self) -> Node {
        Node::Not(Box::new(self))
    }

    pub fn grouped(self) -> Node {
        Node::Grouping(Box::new(self))
    }

    /// Returns true for a literal SQL null
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Literal(Value::Null))
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Literal(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Literal(Value::String(value))
    }
}

impl From<i32> for Node {
    fn from(value: i32) -> Self {
        Node::Literal(Value::from(value))
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::Literal(Value::from(value))
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::Literal(Value::Bool(value))
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Node::null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens() {
        let a = Node::column("posts", "a").eq(1);
        let b = Node::column("posts", "b").eq(2);
        let c = Node::column("posts", "c").eq(3);

        match a.and(b).and(c) {
            Node::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected a conjunction, got {:?}", other),
        }
    }

    #[test]
    fn none_is_null() {
        let node: Node = Option::<&str>::None.into();
        assert!(node.is_null());
        assert!(!Node::from("x").is_null());
    }
}
