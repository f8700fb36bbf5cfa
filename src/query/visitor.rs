//! Join-type inference
//!
//! A predicate that references translated attributes stored in another table
//! needs that table joined. An INNER join drops records without a matching
//! translation row, which is only correct when the predicate can never be
//! satisfied by a missing (NULL) value. The visitors walk a predicate and
//! report the weakest join that keeps its meaning.
//!
//! | Node | [`AttributeJoinVisitor`] (per attribute) | [`TableJoinVisitor`] (one join) |
//! |------|------------------------------------------|---------------------------------|
//! | attribute of this backend | INNER | INNER |
//! | `a = b` | INNER if neither side is NULL, else OUTER | same, OUTER across backends sharing a table |
//! | AND | merge, INNER wins | first INNER, else first signal |
//! | OR | merge, every attribute OUTER | INNER only if both sides INNER |
//! | NOT, grouping | wrapped node | wrapped node |
//! | column, literal, raw SQL | no signal | no signal |
//!
//! Every node kind of [`Node`] is walked structurally. Raw SQL fragments are
//! opaque and cannot carry attribute references, so they give no signal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::node::{AttributeRef, Node};
use crate::locale::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Outer,
}

impl JoinType {
    /// Returns true if an existing join of this kind covers `needed`
    pub fn satisfies(&self, needed: JoinType) -> bool {
        matches!((self, needed), (JoinType::Outer, _) | (JoinType::Inner, JoinType::Inner))
    }

    pub fn sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Outer => "LEFT OUTER JOIN",
        }
    }
}

/// Attribute name -> join needed
pub type JoinMap = BTreeMap<String, JoinType>;

/// Join inference for backends that join once per attribute (key-value)
#[derive(Debug, Clone)]
pub struct AttributeJoinVisitor<'a> {
    backend_id: usize,
    locale: &'a Locale,
}

impl<'a> AttributeJoinVisitor<'a> {
    pub fn new(backend_id: usize, locale: &'a Locale) -> Self {
        Self { backend_id, locale }
    }

    /// Joins needed by `node`, or `None` if it references no attribute of
    /// this backend at this locale
    pub fn visit(&self, node: &Node) -> Option<JoinMap> {
        match node {
            Node::Attribute(attr) if self.matches(attr) => {
                Some(JoinMap::from([(attr.attribute.clone(), JoinType::Inner)]))
            }
            Node::Attribute(_) | Node::Column { .. } | Node::Literal(_) | Node::Sql(_) => None,

            Node::Equality(left, right) => self.visit_equality(left, right),
            Node::NotEqual(left, right) | Node::Matches(left, right) => {
                self.visit_collection([left.as_ref(), right.as_ref()])
            }
            Node::In(left, items) => {
                let has_null = items.iter().any(Node::is_null);
                let joins = self.visit_collection(std::iter::once(left.as_ref()).chain(items))?;
                Some(if has_null { all(joins, JoinType::Outer) } else { joins })
            }

            Node::And(children) => self.visit_collection(children),
            Node::Function { args, .. } => self.visit_collection(args),
            Node::Or(left, right) => {
                let merged = merge(self.visit(left), self.visit(right))?;
                Some(all(merged, JoinType::Outer))
            }
            Node::Not(inner) | Node::Grouping(inner) => self.visit(inner),
        }
    }

    fn matches(&self, attr: &AttributeRef) -> bool {
        attr.backend_id == self.backend_id && &attr.locale == self.locale
    }

    /// Equality: INNER when both operands are non-null, OUTER otherwise
    fn visit_equality(&self, left: &Node, right: &Node) -> Option<JoinMap> {
        let (nils, nodes): (Vec<&Node>, Vec<&Node>) =
            [left, right].into_iter().partition(|n| n.is_null());

        let joins = self.visit_collection(nodes)?;
        let join = if nils.is_empty() {
            JoinType::Inner
        } else {
            JoinType::Outer
        };
        Some(all(joins, join))
    }

    /// Conjunction of children: INNER dominates OUTER
    fn visit_collection<'n>(&self, nodes: impl IntoIterator<Item = &'n Node>) -> Option<JoinMap> {
        nodes
            .into_iter()
            .map(|node| self.visit(node))
            .fold(None, merge)
    }
}

/// Merges two results; an attribute that is INNER on either side stays INNER
fn merge(left: Option<JoinMap>, right: Option<JoinMap>) -> Option<JoinMap> {
    match (left, right) {
        (None, None) => None,
        (Some(joins), None) | (None, Some(joins)) => Some(joins),
        (Some(mut joins), Some(other)) => {
            for (attribute, join) in other {
                joins
                    .entry(attribute)
                    .and_modify(|existing| {
                        if join == JoinType::Inner {
                            *existing = JoinType::Inner;
                        }
                    })
                    .or_insert(join);
            }
            Some(joins)
        }
    }
}

fn all(joins: JoinMap, join: JoinType) -> JoinMap {
    joins.into_keys().map(|attribute| (attribute, join)).collect()
}

/// Join inference for backends that share one join per attribute set
/// (translation tables)
#[derive(Debug, Clone)]
pub struct TableJoinVisitor<'a> {
    backend_id: usize,
    table_name: &'a str,
    locale: &'a Locale,
}

impl<'a> TableJoinVisitor<'a> {
    pub fn new(backend_id: usize, table_name: &'a str, locale: &'a Locale) -> Self {
        Self {
            backend_id,
            table_name,
            locale,
        }
    }

    /// Join needed by `node`, or `None` if it references no attribute of
    /// this backend at this locale
    pub fn visit(&self, node: &Node) -> Option<JoinType> {
        match node {
            Node::Attribute(attr) if self.matches(attr) => Some(JoinType::Inner),
            Node::Attribute(_) | Node::Column { .. } | Node::Literal(_) | Node::Sql(_) => None,

            Node::Equality(left, right) => self.visit_equality(left, right),
            Node::NotEqual(left, right) | Node::Matches(left, right) => {
                self.visit_collection([left.as_ref(), right.as_ref()])
            }
            Node::In(left, items) => {
                let join = self.visit_collection(std::iter::once(left.as_ref()).chain(items))?;
                if items.iter().any(Node::is_null) {
                    Some(JoinType::Outer)
                } else {
                    Some(join)
                }
            }

            Node::And(children) => self.visit_collection(children),
            Node::Function { args, .. } => self.visit_collection(args),
            Node::Or(left, right) => match (self.visit(left), self.visit(right)) {
                (Some(JoinType::Inner), Some(JoinType::Inner)) => Some(JoinType::Inner),
                (None, None) => None,
                _ => Some(JoinType::Outer),
            },
            Node::Not(inner) | Node::Grouping(inner) => self.visit(inner),
        }
    }

    fn matches(&self, attr: &AttributeRef) -> bool {
        attr.backend_id == self.backend_id && &attr.locale == self.locale
    }

    fn visit_equality(&self, left: &Node, right: &Node) -> Option<JoinType> {
        let (nils, nodes): (Vec<&Node>, Vec<&Node>) =
            [left, right].into_iter().partition(|n| n.is_null());

        self.visit_collection(nodes.iter().copied())?;

        if !nils.is_empty() || self.crosses_backends(&nodes) {
            Some(JoinType::Outer)
        } else {
            Some(JoinType::Inner)
        }
    }

    /// Another backend's attribute on the same physical table
    fn crosses_backends(&self, nodes: &[&Node]) -> bool {
        nodes.iter().any(|node| match node {
            Node::Attribute(attr) => {
                attr.backend_id != self.backend_id
                    && attr.table_name.as_deref() == Some(self.table_name)
            }
            _ => false,
        })
    }

    /// First INNER verdict, else the first signal
    fn visit_collection<'n>(&self, nodes: impl IntoIterator<Item = &'n Node>) -> Option<JoinType> {
        let mut first = None;
        for node in nodes {
            match self.visit(node) {
                Some(JoinType::Inner) => return Some(JoinType::Inner),
                Some(join) if first.is_none() => first = Some(join),
                _ => {}
            }
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn en() -> Locale {
        "en".parse().unwrap()
    }

    fn attr(name: &str, backend_id: usize) -> Node {
        Node::attribute(
            name,
            en(),
            backend_id,
            Some("post_translations".into()),
            Node::column("post_translations_en", name),
        )
    }

    #[test]
    fn equality_with_value_is_inner() {
        let locale = en();
        let visitor = AttributeJoinVisitor::new(1, &locale);

        let joins = visitor.visit(&attr("title", 1).eq("foo")).unwrap();
        assert_eq!(joins, JoinMap::from([("title".into(), JoinType::Inner)]));
    }

    #[test]
    fn equality_with_null_is_outer() {
        let locale = en();
        let visitor = AttributeJoinVisitor::new(1, &locale);

        let joins = visitor.visit(&attr("title", 1).eq(Node::null())).unwrap();
        assert_eq!(joins["title"], JoinType::Outer);
    }

    #[test]
    fn and_keeps_each_attribute_verdict() {
        let locale = en();
        let visitor = AttributeJoinVisitor::new(1, &locale);

        let predicate = attr("title", 1).eq("x").and(attr("content", 1).eq(Node::null()));
        let joins = visitor.visit(&predicate).unwrap();

        assert_eq!(joins["title"], JoinType::Inner);
        assert_eq!(joins["content"], JoinType::Outer);
    }

    #[test]
    fn and_prefers_inner_for_same_attribute() {
        let locale = en();
        let visitor = AttributeJoinVisitor::new(1, &locale);

        let predicate = attr("title", 1)
            .eq(Node::null())
            .grouped()
            .or(attr("title", 1).eq("x"))
            .and(attr("title", 1).not_eq("y"));
        let joins = visitor.visit(&predicate).unwrap();

        assert_eq!(joins["title"], JoinType::Inner);
    }

    #[test]
    fn or_forces_outer() {
        let locale = en();
        let visitor = AttributeJoinVisitor::new(1, &locale);

        let predicate = attr("title", 1).eq("x").or(attr("content", 1).eq(Node::null()));
        let joins = visitor.visit(&predicate).unwrap();

        assert_eq!(joins["title"], JoinType::Outer);
        assert_eq!(joins["content"], JoinType::Outer);

        let both_inner = attr("title", 1).eq("x").or(attr("content", 1).eq("y"));
        assert!(visitor
            .visit(&both_inner)
            .unwrap()
            .values()
            .all(|j| *j == JoinType::Outer));
    }

    #[test]
    fn other_backends_and_locales_give_no_signal() {
        let locale = en();
        let visitor = AttributeJoinVisitor::new(1, &locale);

        assert_eq!(visitor.visit(&attr("title", 2).eq("x")), None);
        assert_eq!(visitor.visit(&Node::column("posts", "published").eq(true)), None);
        assert_eq!(visitor.visit(&Node::sql("1 = 1")), None);

        let ja: Locale = "ja".parse().unwrap();
        let visitor = AttributeJoinVisitor::new(1, &ja);
        assert_eq!(visitor.visit(&attr("title", 1).eq("x")), None);
    }

    #[test]
    fn functions_and_negation_are_walked() {
        let locale = en();
        let visitor = AttributeJoinVisitor::new(1, &locale);

        let lowered = Node::function("lower", vec![attr("title", 1)]).eq("foo");
        assert_eq!(visitor.visit(&lowered).unwrap()["title"], JoinType::Inner);

        let negated = attr("title", 1).eq(Node::null()).not();
        assert_eq!(visitor.visit(&negated).unwrap()["title"], JoinType::Outer);
    }

    #[test]
    fn table_both_null_is_outer() {
        let locale = en();
        let visitor = TableJoinVisitor::new(1, "post_translations", &locale);

        let predicate = attr("title", 1)
            .eq(Node::null())
            .and(attr("content", 1).eq(Node::null()));
        assert_eq!(visitor.visit(&predicate), Some(JoinType::Outer));
    }

    #[test]
    fn table_collection_short_circuits_on_inner() {
        let locale = en();
        let visitor = TableJoinVisitor::new(1, "post_translations", &locale);

        let predicate = attr("title", 1)
            .eq(Node::null())
            .and(attr("content", 1).eq("x"));
        assert_eq!(visitor.visit(&predicate), Some(JoinType::Inner));
    }

    #[test]
    fn table_or_stays_inner_only_when_both_sides_are() {
        let locale = en();
        let visitor = TableJoinVisitor::new(1, "post_translations", &locale);

        let both = attr("title", 1).eq("x").or(attr("content", 1).eq("y"));
        assert_eq!(visitor.visit(&both), Some(JoinType::Inner));

        let mixed = attr("title", 1).eq("x").or(attr("content", 1).eq(Node::null()));
        assert_eq!(visitor.visit(&mixed), Some(JoinType::Outer));

        let one_sided = attr("title", 1).eq("x").or(Node::column("posts", "id").eq(1));
        assert_eq!(visitor.visit(&one_sided), Some(JoinType::Outer));

        let none = Node::column("posts", "id").eq(1).or(Node::column("posts", "id").eq(2));
        assert_eq!(visitor.visit(&none), None);
    }

    #[test]
    fn table_comparison_across_backends_sharing_a_table_is_outer() {
        let locale = en();
        let visitor = TableJoinVisitor::new(1, "post_translations", &locale);

        let predicate = attr("title", 1).eq(attr("subtitle", 2));
        assert_eq!(visitor.visit(&predicate), Some(JoinType::Outer));
    }

    #[test]
    fn join_satisfaction() {
        assert!(JoinType::Outer.satisfies(JoinType::Inner));
        assert!(JoinType::Outer.satisfies(JoinType::Outer));
        assert!(JoinType::Inner.satisfies(JoinType::Inner));
        assert!(!JoinType::Inner.satisfies(JoinType::Outer));
    }
}
