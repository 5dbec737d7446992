//! Flattens a parsed document into one record per selected field.
//!
//! Fragment spreads are inlined at the spread site. A fragment that spreads
//! itself, directly or through others, is expanded once per path and then
//! skipped.

use std::collections::HashMap;

use async_graphql::parser::types::{ExecutableDocument, FragmentDefinition, Selection, SelectionSet};
use async_graphql::parser::Positioned;
use async_graphql::Name;
use serde_json::{Map, Value};

use crate::engine::schema::SchemaIndex;
use crate::engine::types::{OperationKind, TypeExpr};

/// One field selection, after fragment expansion.
#[derive(Debug, Clone)]
pub struct FieldVisit {
    pub operation: OperationKind,
    pub name: String,
    pub alias: Option<String>,
    /// Enclosing object type, when the schema knows it
    pub parent_type: Option<String>,
    /// Declared type of the field, when the schema knows it
    pub ty: Option<TypeExpr>,
    /// 1 for root fields
    pub depth: usize,
    /// Response keys from the root down to this field
    pub path: Vec<String>,
    /// Constant arguments; variables are left out
    pub args: Map<String, Value>,
    /// Direct sub-selections of this field
    pub children: usize,
}

impl FieldVisit {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// True when the schema declares a list, or, without schema information,
    /// when the field takes a page-size argument.
    pub fn is_list(&self) -> bool {
        match &self.ty {
            Some(ty) => ty.is_list(),
            None => self.page_size().is_some(),
        }
    }

    /// The `limit`, `first` or `last` argument, whichever comes first.
    pub fn page_size(&self) -> Option<u64> {
        ["limit", "first", "last"]
            .iter()
            .find_map(|name| self.args.get(*name).and_then(Value::as_u64))
    }
}

/// Fields of one operation of the document.
#[derive(Debug, Clone)]
pub struct OperationVisit {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub fields: Vec<FieldVisit>,
}

impl OperationVisit {
    pub fn depth(&self) -> usize {
        self.fields.iter().map(|f| f.depth).max().unwrap_or(0)
    }
}

pub fn walk(document: &ExecutableDocument, schema: Option<&SchemaIndex>) -> Vec<OperationVisit> {
    document
        .operations
        .iter()
        .map(|(name, operation)| {
            let kind = OperationKind::from(operation.node.ty);
            let mut walker = Walker {
                fragments: &document.fragments,
                schema,
                kind,
                fields: Vec::new(),
                active: Vec::new(),
            };
            walker.selection_set(
                &operation.node.selection_set.node,
                Some(kind.root_type().to_owned()),
                &[],
            );
            OperationVisit {
                kind,
                name: name.map(|n| n.to_string()),
                fields: walker.fields,
            }
        })
        .collect()
}

struct Walker<'a> {
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    schema: Option<&'a SchemaIndex>,
    kind: OperationKind,
    fields: Vec<FieldVisit>,
    /// Fragments being expanded on the current path
    active: Vec<&'a str>,
}

impl<'a> Walker<'a> {
    /// Visits `set` and returns how many fields it selects directly.
    fn selection_set(&mut self, set: &'a SelectionSet, parent: Option<String>, path: &[String]) -> usize {
        let mut selected = 0;
        for item in &set.items {
            match &item.node {
                Selection::Field(field) => {
                    selected += 1;
                    let field = &field.node;
                    let name = field.name.node.to_string();
                    let alias = field.alias.as_ref().map(|a| a.node.to_string());
                    let ty = match (self.schema, parent.as_deref()) {
                        (Some(schema), Some(parent)) => schema.field_type(parent, &name).cloned(),
                        _ => None,
                    };
                    let args = field
                        .arguments
                        .iter()
                        .filter_map(|(arg, value)| {
                            let value = value.node.clone().into_const()?.into_json().ok()?;
                            Some((arg.node.to_string(), value))
                        })
                        .collect();

                    let mut field_path = path.to_vec();
                    field_path.push(alias.clone().unwrap_or_else(|| name.clone()));

                    let index = self.fields.len();
                    self.fields.push(FieldVisit {
                        operation: self.kind,
                        name,
                        alias,
                        parent_type: parent.clone(),
                        ty: ty.clone(),
                        depth: path.len() + 1,
                        path: field_path.clone(),
                        args,
                        children: 0,
                    });

                    let child_parent = ty.map(|ty| ty.named_type().to_owned());
                    let children =
                        self.selection_set(&field.selection_set.node, child_parent, &field_path);
                    self.fields[index].children = children;
                }
                Selection::InlineFragment(fragment) => {
                    let fragment = &fragment.node;
                    let parent = match &fragment.type_condition {
                        Some(condition) => Some(condition.node.on.node.to_string()),
                        None => parent.clone(),
                    };
                    selected += self.selection_set(&fragment.selection_set.node, parent, path);
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    let fragments = self.fragments;
                    let Some(fragment) = fragments.get(name) else {
                        continue;
                    };
                    if self.active.contains(&name) {
                        continue;
                    }
                    self.active.push(name);
                    let parent = Some(fragment.node.type_condition.node.on.node.to_string());
                    selected += self.selection_set(&fragment.node.selection_set.node, parent, path);
                    self.active.pop();
                }
            }
        }
        selected
    }
}
