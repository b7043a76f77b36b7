//! Entity metadata: table, field and key descriptions.
//!
//! This is the read-only, type-erased half of an entity descriptor. It is
//! what the SQL-text collaborator and the persister look at; the typed
//! accessor table lives next to it in the session crate.

use crate::error::{Error, MappingError, MappingErrorKind, Result};
use crate::value::{Value, ValueType};
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The type of relationship a field represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelationshipKind {
    /// Plain column, no relationship.
    #[default]
    None,
    /// Many-to-one: this side stores the foreign key.
    ToOne,
    /// One-to-many where this entity owns the collection.
    ToManyOwned,
    /// One-to-many mapped by a foreign key on the element side.
    ToManyInverse,
    /// One-to-one: this side stores the foreign key.
    OneToOne,
}

impl RelationshipKind {
    /// Does this relationship store a foreign-key column on the owning table?
    pub const fn has_foreign_key(&self) -> bool {
        matches!(self, RelationshipKind::ToOne | RelationshipKind::OneToOne)
    }

    /// Is this a collection-valued relationship?
    pub const fn is_collection(&self) -> bool {
        matches!(
            self,
            RelationshipKind::ToManyOwned | RelationshipKind::ToManyInverse
        )
    }
}

/// When a relationship is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchMode {
    /// Resolve while the owning entity is loaded.
    Eager,
    /// Defer until first access through a lazy handle.
    #[default]
    Lazy,
}

/// Identity of a mapped Rust type.
///
/// Equality and hashing use the `TypeId` only; the name is carried for
/// diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct EntityType {
    id: TypeId,
    name: &'static str,
}

impl EntityType {
    /// The entity type of `T`.
    pub fn of<T: 'static>() -> Self {
        let full = std::any::type_name::<T>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self {
            id: TypeId::of::<T>(),
            name,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Short type name (last path segment).
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A primary-key value normalized for hashing.
///
/// All integer widths collapse to `Int`, so `Value::Int(1)` and
/// `Value::BigInt(1)` address the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid([u8; 16]),
}

impl KeyValue {
    /// Normalize a value into a key.
    ///
    /// NULL never forms a key; floating point and JSON values are rejected.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(Error::Mapping(MappingError::new(
                MappingErrorKind::MissingId,
                "id value is NULL",
            ))),
            Value::Bool(_)
            | Value::TinyInt(_)
            | Value::SmallInt(_)
            | Value::Int(_)
            | Value::BigInt(_) => value.as_i64().map(KeyValue::Int).ok_or_else(|| {
                Error::mapping(MappingErrorKind::Conversion, "integer key out of range")
            }),
            Value::Date(d) => Ok(KeyValue::Int(i64::from(*d))),
            Value::Timestamp(t) => Ok(KeyValue::Int(*t)),
            Value::Text(s) | Value::Decimal(s) => Ok(KeyValue::Text(s.clone())),
            Value::Bytes(b) => Ok(KeyValue::Bytes(b.clone())),
            Value::Uuid(u) => Ok(KeyValue::Uuid(*u)),
            Value::Float(_) | Value::Double(_) | Value::Json(_) => Err(Error::mapping(
                MappingErrorKind::Conversion,
                format!("{} cannot be used as an entity key", value.type_name()),
            )),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Text(s) => write!(f, "{:?}", s),
            KeyValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            KeyValue::Uuid(u) => {
                for byte in u {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Identity-map key: `(entity type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity: EntityType,
    pub id: KeyValue,
}

impl EntityKey {
    /// Build a key from a raw id value; fails on NULL.
    pub fn new(entity: EntityType, id: &Value) -> Result<Self> {
        let id = KeyValue::from_value(id).map_err(|e| match e {
            Error::Mapping(m) => Error::Mapping(m.entity(entity.name())),
            other => other,
        })?;
        Ok(Self { entity, id })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// Metadata about one mapped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    /// Rust field name
    pub name: &'static str,
    /// Column name; `None` for collection relationships
    pub column_name: Option<String>,
    pub value_type: ValueType,
    pub is_id: bool,
    /// Id is assigned by the database on insert
    pub is_generated: bool,
    pub nullable: bool,
    pub unique: bool,
    pub relationship: RelationshipKind,
    /// Target entity of a relationship field
    pub target: Option<EntityType>,
    /// For collections: foreign-key column on the element table
    pub inverse_field: Option<String>,
    pub fetch: FetchMode,
}

impl FieldMeta {
    /// A plain column mapped 1:1 to the field name.
    pub fn column(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            column_name: Some(name.to_string()),
            value_type,
            is_id: false,
            is_generated: false,
            nullable: true,
            unique: false,
            relationship: RelationshipKind::None,
            target: None,
            inverse_field: None,
            fetch: FetchMode::Eager,
        }
    }

    /// A to-one relationship stored as `<name>_id`.
    pub fn to_one(name: &'static str, target: EntityType) -> Self {
        Self {
            name,
            column_name: Some(format!("{}_id", name)),
            value_type: ValueType::BigInt,
            is_id: false,
            is_generated: false,
            nullable: true,
            unique: false,
            relationship: RelationshipKind::ToOne,
            target: Some(target),
            inverse_field: None,
            fetch: FetchMode::Lazy,
        }
    }

    /// An inverse-mapped collection. No column on this side.
    pub fn to_many(name: &'static str, target: EntityType, inverse_column: String) -> Self {
        Self {
            name,
            column_name: None,
            value_type: ValueType::BigInt,
            is_id: false,
            is_generated: false,
            nullable: true,
            unique: false,
            relationship: RelationshipKind::ToManyInverse,
            target: Some(target),
            inverse_field: Some(inverse_column),
            fetch: FetchMode::Lazy,
        }
    }

    /// Does this field occupy a column on the entity's own table?
    pub fn is_persistable(&self) -> bool {
        self.column_name.is_some()
    }

    /// The column name, or the field name for column-less fields.
    pub fn sql_column(&self) -> &str {
        self.column_name.as_deref().unwrap_or(self.name)
    }
}

/// Immutable metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    pub entity: EntityType,
    pub table_name: String,
    pub fields: Vec<FieldMeta>,
    id_index: usize,
}

impl EntityMeta {
    /// Build and validate metadata.
    ///
    /// Requires exactly one id field, which must be a plain column, and
    /// unique column names.
    pub fn new(entity: EntityType, table_name: impl Into<String>, fields: Vec<FieldMeta>) -> Result<Self> {
        let invalid = |message: String| {
            Error::Mapping(
                MappingError::new(MappingErrorKind::InvalidDescriptor, message).entity(entity.name()),
            )
        };

        let ids: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_id)
            .map(|(i, _)| i)
            .collect();
        let id_index = match ids.as_slice() {
            [single] => *single,
            [] => return Err(invalid("no id field declared".to_string())),
            _ => return Err(invalid(format!("{} id fields declared", ids.len()))),
        };
        if fields[id_index].relationship != RelationshipKind::None {
            return Err(invalid("id field cannot be a relationship".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if let Some(column) = &field.column_name {
                if !seen.insert(column.to_ascii_lowercase()) {
                    return Err(invalid(format!("duplicate column '{}'", column)));
                }
            }
            if field.relationship.is_collection() && field.inverse_field.is_none() {
                return Err(invalid(format!(
                    "collection field '{}' has no inverse column",
                    field.name
                )));
            }
        }

        Ok(Self {
            entity,
            table_name: table_name.into(),
            fields,
            id_index,
        })
    }

    pub fn id_field(&self) -> &FieldMeta {
        &self.fields[self.id_index]
    }

    pub fn id_index(&self) -> usize {
        self.id_index
    }

    /// Fields stored on this table, in declaration order (id included).
    pub fn persistable_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|f| f.is_persistable())
    }

    /// Fields bound by INSERT: every persistable field except a generated id.
    pub fn insert_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.persistable_fields()
            .filter(|f| !(f.is_id && f.is_generated))
    }

    /// Fields bound by UPDATE's SET clause: every persistable non-id field.
    pub fn update_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.persistable_fields().filter(|f| !f.is_id)
    }

    /// Look up a field by its Rust name.
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by column name (case-insensitive).
    pub fn field_by_column(&self, column: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| {
            f.column_name
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(column))
        })
    }
}
