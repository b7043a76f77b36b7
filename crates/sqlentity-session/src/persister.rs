//! Entity persister: CRUD for one entity at a time.
//!
//! The persister binds values in field order, runs the statement the
//! [`StatementSource`] produced, and maps rows back to instances. Driver
//! failures come back as [`Error::Sql`] carrying the statement text. It
//! never retries.

use crate::descriptor::AnyDescriptor;
use crate::entity::AnyRef;
use crate::lazy::LazyFactory;
use crate::registry::EntityRegistry;
use crate::resolver::RelationResolver;
use sqlentity_core::{Connection, Error, Result, Row, StatementSource, Value};

#[derive(Clone, Copy)]
pub struct EntityPersister<'a> {
    conn: &'a dyn Connection,
    statements: &'a dyn StatementSource,
    registry: &'a EntityRegistry,
}

impl<'a> EntityPersister<'a> {
    pub fn new(
        conn: &'a dyn Connection,
        statements: &'a dyn StatementSource,
        registry: &'a EntityRegistry,
    ) -> Self {
        Self {
            conn,
            statements,
            registry,
        }
    }

    pub fn registry(&self) -> &'a EntityRegistry {
        self.registry
    }

    /// INSERT one entity. Returns the database-generated id, converted to
    /// the id field's type, when the id is generated.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %descriptor.meta().table_name))]
    pub fn insert(&self, descriptor: &dyn AnyDescriptor, entity: &AnyRef) -> Result<Option<Value>> {
        let meta = descriptor.meta();
        let values = descriptor.column_values(entity, self.registry)?;
        let params: Vec<Value> = meta
            .persistable_fields()
            .zip(values)
            .filter(|(field, _)| !(field.is_id && field.is_generated))
            .map(|(_, value)| value)
            .collect();

        let sql = self.statements.insert_statement(meta);
        tracing::debug!(binds = params.len(), "executing INSERT");
        let generated = self
            .conn
            .insert(&sql, &params)
            .map_err(|e| e.into_sql_error(&sql))?;

        let id_field = meta.id_field();
        if !id_field.is_generated {
            return Ok(None);
        }
        Ok(generated
            .filter(|v| !v.is_null())
            .map(|v| v.coerce(id_field.value_type)))
    }

    /// SELECT by primary key and map the row. `Ok(None)` if no row matches.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %descriptor.meta().table_name, id = ?id))]
    pub fn load(
        &self,
        descriptor: &dyn AnyDescriptor,
        id: &Value,
        resolver: &mut dyn RelationResolver,
        lazy: Option<&LazyFactory>,
    ) -> Result<Option<AnyRef>> {
        let sql = self.statements.select_by_id_statement(descriptor.meta());
        tracing::debug!(binds = 1, "executing SELECT by id");
        let rows = self
            .conn
            .query(&sql, std::slice::from_ref(id))
            .map_err(|e| e.into_sql_error(&sql))?;

        let Some(row) = rows.first() else {
            tracing::debug!("no row found");
            return Ok(None);
        };
        if rows.len() > 1 {
            tracing::warn!(rows = rows.len(), "primary key lookup returned more than one row");
        }
        self.hydrate(descriptor, row, resolver, lazy).map(Some)
    }

    /// Like [`load`](Self::load), with LAZY relationship fields wrapped in
    /// handles issued by `lazy`.
    pub fn load_with_lazy_support(
        &self,
        descriptor: &dyn AnyDescriptor,
        id: &Value,
        resolver: &mut dyn RelationResolver,
        lazy: &LazyFactory,
    ) -> Result<Option<AnyRef>> {
        self.load(descriptor, id, resolver, Some(lazy))
    }

    /// Map one row onto a fresh instance.
    ///
    /// The instance is handed to [`RelationResolver::adopt`] once its columns
    /// are set and before its EAGER relationships are resolved.
    pub fn hydrate(
        &self,
        descriptor: &dyn AnyDescriptor,
        row: &Row,
        resolver: &mut dyn RelationResolver,
        lazy: Option<&LazyFactory>,
    ) -> Result<AnyRef> {
        let entity = descriptor.hydrate(row, lazy)?;
        resolver.adopt(descriptor.meta().entity, &entity)?;
        descriptor.realize_eager(&entity, resolver)?;
        Ok(entity)
    }

    /// SELECT all rows whose `column` equals `value`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %descriptor.meta().table_name, column = column))]
    pub fn select_by_column(
        &self,
        descriptor: &dyn AnyDescriptor,
        column: &str,
        value: &Value,
    ) -> Result<Vec<Row>> {
        let sql = self
            .statements
            .select_by_column_statement(descriptor.meta(), column);
        tracing::debug!(binds = 1, "executing SELECT by column");
        self.conn
            .query(&sql, std::slice::from_ref(value))
            .map_err(|e| e.into_sql_error(&sql))
    }

    /// UPDATE every non-id persistable field, keyed by id. No version check.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %descriptor.meta().table_name))]
    pub fn update(&self, descriptor: &dyn AnyDescriptor, entity: &AnyRef) -> Result<u64> {
        let meta = descriptor.meta();
        let values = descriptor.column_values(entity, self.registry)?;
        let mut id = Value::Null;
        let mut params = Vec::with_capacity(values.len());
        for (field, value) in meta.persistable_fields().zip(values) {
            if field.is_id {
                id = value;
            } else {
                params.push(value);
            }
        }
        if id.is_null() {
            return Err(missing_id(descriptor));
        }
        params.push(id);

        let sql = self.statements.update_statement(meta);
        tracing::debug!(binds = params.len(), "executing UPDATE");
        let affected = self
            .conn
            .execute(&sql, &params)
            .map_err(|e| e.into_sql_error(&sql))?;
        if affected == 0 {
            tracing::debug!("UPDATE matched no rows");
        }
        Ok(affected)
    }

    /// DELETE by id.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %descriptor.meta().table_name))]
    pub fn delete(&self, descriptor: &dyn AnyDescriptor, entity: &AnyRef) -> Result<u64> {
        let id = descriptor.id_value(entity)?;
        if id.is_null() {
            return Err(missing_id(descriptor));
        }
        let sql = self.statements.delete_statement(descriptor.meta());
        tracing::debug!(binds = 1, "executing DELETE");
        self.conn
            .execute(&sql, &[id])
            .map_err(|e| e.into_sql_error(&sql))
    }
}

fn missing_id(descriptor: &dyn AnyDescriptor) -> Error {
    Error::mapping(
        sqlentity_core::MappingErrorKind::MissingId,
        format!("{} has no id", descriptor.meta().entity),
    )
}
