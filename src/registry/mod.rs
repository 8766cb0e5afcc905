//! Relationship registry.
//!
//! A relationship is a directed edge: rows of a child entity type reference a
//! parent entity type through a named foreign-key column. The registry is the
//! only source of table and column names for the resolver's dynamic SQL.
//!
//! # Ordering
//!
//! Every listing is returned in a stable order (child type, then foreign-key
//! column, then id) so that dependency counts are reported identically from
//! call to call.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::schema::{self, RELATIONSHIPS_TABLE};
use crate::store::{encode_timestamp, Row, Store, StoreError, StoreResult, Value};

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The backing store could not be read.
    #[error("relationship registry unavailable: {0}")]
    Unavailable(#[source] StoreError),

    /// An active definition already exists for the same edge.
    #[error("an active relationship {parent} -> {child}.{column} already exists")]
    Duplicate {
        parent: String,
        child: String,
        column: String,
    },

    /// No definition has the given id.
    #[error("relationship {0} not found")]
    NotFound(i64),

    /// A stored or supplied relationship kind was not recognised.
    #[error("unknown relationship kind '{0}' (expected one_to_many or many_to_many)")]
    InvalidKind(String),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err)
    }
}

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    #[default]
    OneToMany,
    ManyToMany,
}

impl RelationshipKind {
    /// Stored representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneToMany => "one_to_many",
            Self::ManyToMany => "many_to_many",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "one_to_many" => Ok(Self::OneToMany),
            "many_to_many" => Ok(Self::ManyToMany),
            _ => Err(RegistryError::InvalidKind(s.to_string())),
        }
    }
}

/// One registered edge in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub id: i64,
    pub parent_entity_type: String,
    pub child_entity_type: String,
    pub foreign_key_column: String,
    pub relationship_kind: RelationshipKind,
    /// Dependents along this edge do not block deletion of the parent.
    pub cascade_allowed: bool,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RelationshipDefinition {
    fn from_row(row: &Row) -> Result<Self, RegistryError> {
        Ok(Self {
            id: row.get_i64("id")?,
            parent_entity_type: row.get_str("parent_entity_type")?.to_string(),
            child_entity_type: row.get_str("child_entity_type")?.to_string(),
            foreign_key_column: row.get_str("foreign_key_column")?.to_string(),
            relationship_kind: row.get_str("relationship_kind")?.parse()?,
            cascade_allowed: row.get_bool("cascade_allowed")?,
            active: row.get_bool("active")?,
            description: row.get_opt_str("description")?.map(str::to_string),
            created_at: row.get_timestamp("created_at")?,
        })
    }
}

/// Input for [`Registry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelationship {
    pub parent_entity_type: String,
    pub child_entity_type: String,
    pub foreign_key_column: String,
    pub relationship_kind: RelationshipKind,
    pub cascade_allowed: bool,
    pub description: Option<String>,
}

impl NewRelationship {
    /// A one-to-many, non-cascading edge.
    #[must_use]
    pub fn new(parent: &str, child: &str, foreign_key_column: &str) -> Self {
        Self {
            parent_entity_type: parent.to_string(),
            child_entity_type: child.to_string(),
            foreign_key_column: foreign_key_column.to_string(),
            relationship_kind: RelationshipKind::OneToMany,
            cascade_allowed: false,
            description: None,
        }
    }

    /// Mark dependents along this edge as non-blocking.
    #[must_use]
    pub fn with_cascade(mut self, cascade_allowed: bool) -> Self {
        self.cascade_allowed = cascade_allowed;
        self
    }

    /// Set the relationship kind.
    #[must_use]
    pub fn with_kind(mut self, kind: RelationshipKind) -> Self {
        self.relationship_kind = kind;
        self
    }

    /// Attach a human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

const SELECT_COLUMNS: &str = "id, parent_entity_type, child_entity_type, foreign_key_column, \
     relationship_kind, cascade_allowed, active, description, created_at";

/// Read/write access to relationship definitions.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn Store>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Create a registry over a shared store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn load(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<RelationshipDefinition>, RegistryError> {
        self.store
            .query(sql, params)?
            .iter()
            .map(RelationshipDefinition::from_row)
            .collect()
    }

    /// Active relationships whose parent is `parent_entity_type`.
    pub fn active_relationships_for(
        &self,
        parent_entity_type: &str,
    ) -> Result<Vec<RelationshipDefinition>, RegistryError> {
        self.load(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM {RELATIONSHIPS_TABLE} \
                 WHERE parent_entity_type = ?1 AND active = 1 \
                 ORDER BY child_entity_type, foreign_key_column, id"
            ),
            &[Value::from(parent_entity_type)],
        )
    }

    /// Every active relationship, grouped by parent type.
    pub fn all_active(&self) -> Result<Vec<RelationshipDefinition>, RegistryError> {
        self.load(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM {RELATIONSHIPS_TABLE} WHERE active = 1 \
                 ORDER BY parent_entity_type, child_entity_type, foreign_key_column, id"
            ),
            &[],
        )
    }

    /// Every relationship, optionally including deactivated ones.
    pub fn list(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<RelationshipDefinition>, RegistryError> {
        let filter = if include_inactive { "" } else { "WHERE active = 1" };
        self.load(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM {RELATIONSHIPS_TABLE} {filter} \
                 ORDER BY parent_entity_type, child_entity_type, foreign_key_column, id"
            ),
            &[],
        )
    }

    /// Look up one relationship by id.
    pub fn get(&self, id: i64) -> Result<RelationshipDefinition, RegistryError> {
        self.load(
            &format!("SELECT {SELECT_COLUMNS} FROM {RELATIONSHIPS_TABLE} WHERE id = ?1"),
            &[Value::Integer(id)],
        )?
        .into_iter()
        .next()
        .ok_or(RegistryError::NotFound(id))
    }

    /// Register a new active relationship and return its id.
    pub fn register(&self, new: &NewRelationship) -> Result<i64, RegistryError> {
        let result = self.store.execute(
            &format!(
                "INSERT INTO {RELATIONSHIPS_TABLE} (parent_entity_type, child_entity_type, \
                 foreign_key_column, relationship_kind, cascade_allowed, active, description, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)"
            ),
            &[
                Value::from(new.parent_entity_type.as_str()),
                Value::from(new.child_entity_type.as_str()),
                Value::from(new.foreign_key_column.as_str()),
                Value::from(new.relationship_kind.as_str()),
                Value::from(new.cascade_allowed),
                Value::from(new.description.clone()),
                Value::from(encode_timestamp(&Utc::now())),
            ],
        );

        match result {
            Ok(outcome) => {
                log::info!(
                    "Registered relationship {} -> {}.{} (id {})",
                    new.parent_entity_type,
                    new.child_entity_type,
                    new.foreign_key_column,
                    outcome.insert_id
                );
                Ok(outcome.insert_id)
            }
            Err(e) if e.is_constraint_violation() => Err(RegistryError::Duplicate {
                parent: new.parent_entity_type.clone(),
                child: new.child_entity_type.clone(),
                column: new.foreign_key_column.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Activate or deactivate a relationship.
    ///
    /// Cached summaries are not touched; they change on the next refresh.
    pub fn set_active(&self, id: i64, active: bool) -> Result<(), RegistryError> {
        let current = self.get(id)?;
        let result = self.store.execute(
            &format!("UPDATE {RELATIONSHIPS_TABLE} SET active = ?1 WHERE id = ?2"),
            &[Value::from(active), Value::Integer(id)],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_constraint_violation() => Err(RegistryError::Duplicate {
                parent: current.parent_entity_type,
                child: current.child_entity_type,
                column: current.foreign_key_column,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Change whether dependents along a relationship block deletion.
    pub fn set_cascade_allowed(&self, id: i64, cascade_allowed: bool) -> Result<(), RegistryError> {
        let outcome = self.store.execute(
            &format!("UPDATE {RELATIONSHIPS_TABLE} SET cascade_allowed = ?1 WHERE id = ?2"),
            &[Value::from(cascade_allowed), Value::Integer(id)],
        )?;
        if outcome.affected_rows == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    /// Whether the registry table has been provisioned.
    pub fn is_provisioned(&self) -> StoreResult<bool> {
        schema::table_exists(self.store.as_ref(), RELATIONSHIPS_TABLE)
    }
}
