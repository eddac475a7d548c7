//! Read-only schema metadata for the entity graph fetcher.
//!
//! A [`Schema`] is built once, explicitly, via [`Schema::builder`] and handed
//! to every compile/fetch call. There is no process-wide registry: the
//! builder itself is the thing that used to be populated by decorators at
//! type-definition time (see DESIGN.md, REDESIGN FLAGS).

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use error::{FetchErrorKind, Result};
use indexmap::IndexMap;

pub use error::{FetchError, Result as FetchResult};

/// The five relation shapes every switch over a relation must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    OwnerToOne,
    OneToOwner,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    /// "To-many" iff the last token is `many`.
    pub fn is_to_many(self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::OwnerToOne => "owner-to-one",
            RelationKind::OneToOwner => "one-to-owner",
            RelationKind::ManyToOne => "many-to-one",
            RelationKind::OneToMany => "one-to-many",
            RelationKind::ManyToMany => "many-to-many",
        }
    }
}

/// Driver-type descriptor for an own (non-relation) column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Boolean,
    /// An ISO date string; the hydrator's default value-hook normalizes this.
    DateIso,
    /// A `json`/`jsonb` column, passed through as-is.
    Json,
}

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub property_name: String,
    pub database_name: String,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone)]
pub struct JunctionMeta {
    pub table: String,
    /// FK column in the junction table referencing the owning side.
    pub own_key: String,
    /// FK column in the junction table referencing the inverse side.
    pub remote_key: String,
}

/// A relation of some entity. `inverse_entity` is a name, resolved against
/// the owning [`Schema`] on demand (see [`Schema::relation_inverse`]) rather
/// than embedded as an `Arc`, since two entities may reference each other.
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    pub property_name: String,
    pub kind: RelationKind,
    pub inverse_entity: String,
    pub inverse_side_property: Option<String>,
    pub is_owning: bool,
    /// The single (non-composite) FK column involved in this relation.
    /// For `owner-to-one`/`many-to-one` this lives on the owning (local)
    /// side; for `one-to-owner`/`one-to-many` this is the backlink column
    /// living on the inverse (remote) side. Unused for `many-to-many`.
    pub fk_column: String,
    pub junction: Option<JunctionMeta>,
}

#[derive(Debug)]
pub struct EntityMeta {
    pub name: String,
    pub table_path: String,
    pub display_name: String,
    pub primary_key: String,
    pub columns: Vec<ColumnMeta>,
    pub relations: Vec<ResolvedRelation>,
}

impl EntityMeta {
    pub fn relation(&self, property_name: &str) -> Option<&ResolvedRelation> {
        self.relations
            .iter()
            .find(|r| r.property_name == property_name)
    }
}

/// Builder-supplied, not-yet-resolved relation definition.
pub struct RelationDef {
    property_name: String,
    kind: RelationKind,
    inverse_entity: String,
    inverse_side_property: Option<String>,
    is_owning: bool,
    fk_columns: Vec<String>,
    junction: Option<(String, Vec<String>, Vec<String>)>,
}

impl RelationDef {
    fn new(
        property_name: impl Into<String>,
        kind: RelationKind,
        inverse_entity: impl Into<String>,
        is_owning: bool,
        fk_columns: Vec<String>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            kind,
            inverse_entity: inverse_entity.into(),
            inverse_side_property: None,
            is_owning,
            fk_columns,
            junction: None,
        }
    }

    /// This side owns the FK column (one-to-one).
    pub fn owner_to_one(
        property_name: impl Into<String>,
        inverse_entity: impl Into<String>,
        fk_column: impl Into<String>,
    ) -> Self {
        Self::new(
            property_name,
            RelationKind::OwnerToOne,
            inverse_entity,
            true,
            vec![fk_column.into()],
        )
    }

    /// The remote side owns the FK column (one-to-one).
    pub fn one_to_owner(
        property_name: impl Into<String>,
        inverse_entity: impl Into<String>,
        backlink_fk_column: impl Into<String>,
    ) -> Self {
        Self::new(
            property_name,
            RelationKind::OneToOwner,
            inverse_entity,
            false,
            vec![backlink_fk_column.into()],
        )
    }

    /// This side owns the FK column.
    pub fn many_to_one(
        property_name: impl Into<String>,
        inverse_entity: impl Into<String>,
        fk_column: impl Into<String>,
    ) -> Self {
        Self::new(
            property_name,
            RelationKind::ManyToOne,
            inverse_entity,
            true,
            vec![fk_column.into()],
        )
    }

    /// The remote side owns the FK column.
    pub fn one_to_many(
        property_name: impl Into<String>,
        inverse_entity: impl Into<String>,
        backlink_fk_column: impl Into<String>,
    ) -> Self {
        Self::new(
            property_name,
            RelationKind::OneToMany,
            inverse_entity,
            false,
            vec![backlink_fk_column.into()],
        )
    }

    pub fn many_to_many(
        property_name: impl Into<String>,
        inverse_entity: impl Into<String>,
        junction_table: impl Into<String>,
        own_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        let mut this = Self::new(
            property_name,
            RelationKind::ManyToMany,
            inverse_entity,
            false,
            vec![],
        );
        this.junction = Some((
            junction_table.into(),
            vec![own_key.into()],
            vec![remote_key.into()],
        ));
        this
    }

    /// Exercises the `UnsupportedComposite` path: a relation declared with
    /// more than one FK column on either side.
    pub fn with_composite_fk(mut self, extra_column: impl Into<String>) -> Self {
        if let Some((_, own, _)) = &mut self.junction {
            own.push(extra_column.into());
        } else {
            self.fk_columns.push(extra_column.into());
        }
        self
    }

    pub fn inverse_side_property(mut self, property: impl Into<String>) -> Self {
        self.inverse_side_property = Some(property.into());
        self
    }
}

pub struct EntityDef {
    name: String,
    table_path: String,
    primary_key: Vec<String>,
    columns: Vec<ColumnMeta>,
    relations: Vec<RelationDef>,
    relation_id_overrides: HashMap<String, String>,
}

impl EntityDef {
    pub fn new(
        name: impl Into<String>,
        table_path: impl Into<String>,
        primary_key: impl Into<Vec<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            table_path: table_path.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
            relations: Vec::new(),
            relation_id_overrides: HashMap::new(),
        }
    }

    pub fn column(mut self, property_name: impl Into<String>, sql_type: SqlType) -> Self {
        let property_name = property_name.into();
        self.columns.push(ColumnMeta {
            database_name: property_name.clone(),
            property_name,
            sql_type,
        });
        self
    }

    pub fn column_as(
        mut self,
        property_name: impl Into<String>,
        database_name: impl Into<String>,
        sql_type: SqlType,
    ) -> Self {
        self.columns.push(ColumnMeta {
            property_name: property_name.into(),
            database_name: database_name.into(),
            sql_type,
        });
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Overrides the caller-visible name under which a relation's FK value
    /// is projected. Defaults to the relation's own `property_name`.
    pub fn with_relation_id(
        mut self,
        relation_property: impl Into<String>,
        id_property: impl Into<String>,
    ) -> Self {
        self.relation_id_overrides
            .insert(relation_property.into(), id_property.into());
        self
    }
}

/// Immutable, `Arc`-backed view of the whole schema. Clone is cheap.
#[derive(Clone)]
pub struct Schema(Arc<SchemaInner>);

struct SchemaInner {
    entities: IndexMap<String, Arc<EntityMeta>>,
    id_property_names: HashMap<(String, String), String>,
    strict_ids: bool,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            entities: Vec::new(),
            strict_ids: true,
        }
    }

    pub fn entity(&self, name: &str) -> Result<&Arc<EntityMeta>> {
        match self.0.entities.get(name) {
            Some(e) => Ok(e),
            None => fail!(FetchErrorKind::SchemaError, "unknown entity '{name}'"),
        }
    }

    pub fn strict_ids(&self) -> bool {
        self.0.strict_ids
    }

    /// Resolves a relation's inverse entity.
    pub fn relation_inverse(&self, relation: &ResolvedRelation) -> Result<&Arc<EntityMeta>> {
        self.entity(&relation.inverse_entity)
    }

    /// Finds the relation from `entity` whose inverse table matches
    /// `table_path`. Used by the tree builder to line up a fetch-tree child
    /// against a relation, and by the compiler to find backlinks.
    pub fn relation_to_table<'e>(
        &self,
        entity: &'e EntityMeta,
        table_path: &str,
    ) -> Result<Option<&'e ResolvedRelation>> {
        for rel in &entity.relations {
            if self.relation_inverse(rel)?.table_path == table_path {
                return Ok(Some(rel));
            }
        }
        Ok(None)
    }

    /// The id-property-name registry: returns the same name for a
    /// `(entity, relation-property)` pair for the schema's whole lifetime.
    pub fn get_id_property_name(&self, entity: &EntityMeta, relation_property: &str) -> Result<&str> {
        match self
            .0
            .id_property_names
            .get(&(entity.name.clone(), relation_property.to_string()))
        {
            Some(name) => Ok(name.as_str()),
            None => fail!(
                FetchErrorKind::SchemaError,
                "no id-property mapping for {}.{}",
                entity.name,
                relation_property
            ),
        }
    }
}

pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
    strict_ids: bool,
}

impl SchemaBuilder {
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    /// Tightens id-shape validation in the executor (rejects empty id
    /// strings outright instead of letting them fail to parse). Defaults
    /// to `true`.
    pub fn strict_ids(mut self, strict: bool) -> Self {
        self.strict_ids = strict;
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut known_entities: HashMap<String, ()> = HashMap::new();
        for def in &self.entities {
            ensure!(
                def.primary_key.len() == 1,
                FetchErrorKind::UnsupportedComposite,
                "entity '{}' has a composite primary key",
                def.name
            );
            known_entities.insert(def.name.clone(), ());
        }

        let mut entities: IndexMap<String, Arc<EntityMeta>> = IndexMap::new();
        let mut id_property_names = HashMap::new();

        for def in self.entities {
            let mut relations = Vec::with_capacity(def.relations.len());
            for rel in def.relations {
                ensure!(
                    known_entities.contains_key(&rel.inverse_entity),
                    FetchErrorKind::SchemaError,
                    "entity '{}' has a relation '{}' referencing unknown entity '{}'",
                    def.name,
                    rel.property_name,
                    rel.inverse_entity
                );

                if rel.kind == RelationKind::ManyToMany {
                    let (table, own, remote) = rel.junction.as_ref().unwrap();
                    ensure!(
                        own.len() == 1 && remote.len() == 1,
                        FetchErrorKind::UnsupportedComposite,
                        "relation '{}.{}' has a composite junction key",
                        def.name,
                        rel.property_name
                    );
                    relations.push(ResolvedRelation {
                        property_name: rel.property_name,
                        kind: rel.kind,
                        inverse_entity: rel.inverse_entity,
                        inverse_side_property: rel.inverse_side_property,
                        is_owning: rel.is_owning,
                        fk_column: String::new(),
                        junction: Some(JunctionMeta {
                            table: table.clone(),
                            own_key: own[0].clone(),
                            remote_key: remote[0].clone(),
                        }),
                    });
                } else {
                    ensure!(
                        rel.fk_columns.len() == 1,
                        FetchErrorKind::UnsupportedComposite,
                        "relation '{}.{}' has a composite foreign key",
                        def.name,
                        rel.property_name
                    );
                    relations.push(ResolvedRelation {
                        property_name: rel.property_name,
                        kind: rel.kind,
                        inverse_entity: rel.inverse_entity,
                        inverse_side_property: rel.inverse_side_property,
                        is_owning: rel.is_owning,
                        fk_column: rel.fk_columns[0].clone(),
                        junction: None,
                    });
                }
            }

            for (prop, id_prop) in &def.relation_id_overrides {
                id_property_names.insert((def.name.clone(), prop.clone()), id_prop.clone());
            }
            // Default: id-property name equals the relation's own property
            // name unless the caller overrode it.
            for rel in &relations {
                id_property_names
                    .entry((def.name.clone(), rel.property_name.clone()))
                    .or_insert_with(|| rel.property_name.clone());
            }

            let name = def.name.clone();
            entities.insert(
                name.clone(),
                Arc::new(EntityMeta {
                    display_name: name,
                    name: def.name,
                    table_path: def.table_path,
                    primary_key: def.primary_key[0].clone(),
                    columns: def.columns,
                    relations,
                }),
            );
        }

        Ok(Schema(Arc::new(SchemaInner {
            entities,
            id_property_names,
            strict_ids: self.strict_ids,
        })))
    }
}
