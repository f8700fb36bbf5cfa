//! # Querying Translated Attributes
//!
//! Backends that keep translations queryable build [`Node::Attribute`]
//! references for an attribute at a locale. Before a predicate is added to a
//! [`Query`], every attribute set's backend inspects it with a join visitor
//! and joins its translation tables INNER or LEFT OUTER as needed.
//!
//! ```text
//! model.scope("i18n")?.filter(title = "foo", content = null)
//!   ├─ build_node(title, en)    -> title_string_translations_en.value
//!   ├─ build_node(content, en)  -> content_text_translations_en.value
//!   ├─ apply_scope              -> INNER title, OUTER content
//!   └─ Query::to_sql            -> SELECT ... JOIN ... WHERE ...
//! ```
//!
//! ## Key Types
//!
//! - [`Node`] - Predicate expression tree
//! - [`AttributeJoinVisitor`] / [`TableJoinVisitor`] - Join-type inference
//! - [`Query`] - Joins, predicates and ordering rendered to SQL
//! - [`I18nScope`] - Query builder aware of translated attributes

mod builder;
mod node;
mod scope;
mod visitor;

pub use builder::{Join, Query};
pub use node::{AttributeRef, Node};
pub use scope::I18nScope;
pub use visitor::{AttributeJoinVisitor, JoinMap, JoinType, TableJoinVisitor};
