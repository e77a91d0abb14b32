//! Model tree
//!
//! A model is a named collection of entities and nested models. Ids are
//! derived from the path of names alone, so two peers that declare the same
//! model shape agree on every id without negotiating.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tether_core::{EntityId, TetherError, TetherResult};

use crate::entity::Entity;

/// One member of a model
pub enum Member<'a> {
    Entity(Arc<dyn Entity>),
    Model(&'a dyn Model),
}

/// A named composition of entities
///
/// Member order is the declaration order; names must be unique within one
/// model.
pub trait Model: Send + Sync {
    fn members(&self) -> Vec<(&'static str, Member<'_>)>;
}

/// An entity together with its structural id and dotted path
#[derive(Clone)]
pub struct BindTarget {
    pub id: EntityId,
    pub path: String,
    pub entity: Arc<dyn Entity>,
}

impl fmt::Debug for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindTarget")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("kind", &self.entity.kind())
            .finish()
    }
}

/// Id of a model root named `root_name`
pub fn root_id(root_name: &str) -> EntityId {
    EntityId::ROOT.child(root_name)
}

/// Flatten a model into its entities, depth first in declaration order
///
/// Fails with `DuplicateId` when two members resolve to the same id, which
/// only happens for a repeated name within one model.
pub fn collect(root_name: &str, model: &dyn Model) -> TetherResult<Vec<BindTarget>> {
    let mut targets = Vec::new();
    walk(root_id(root_name), root_name, model, &mut targets);

    let mut seen = HashSet::with_capacity(targets.len());
    for target in &targets {
        if !seen.insert(target.id) {
            return Err(TetherError::DuplicateId(target.id));
        }
    }
    Ok(targets)
}

fn walk(parent: EntityId, prefix: &str, model: &dyn Model, out: &mut Vec<BindTarget>) {
    for (name, member) in model.members() {
        let id = parent.child(name);
        let path = format!("{prefix}.{name}");
        match member {
            Member::Entity(entity) => out.push(BindTarget { id, path, entity }),
            Member::Model(nested) => walk(id, &path, nested, out),
        }
    }
}
