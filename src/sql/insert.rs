//! Create Handler
//!
//! Builds `INSERT INTO <table> (<columns>) VALUES (<placeholders>)` with
//! the inserted row read back. Store parameters are validated against the
//! write permission pattern and the property descriptors before anything
//! is assembled. Database-generated keys are omitted from the column
//! list; gateway-generated keys and concurrency stamps are injected.

use serde_json::Value;

use crate::core::operation::Operation;
use crate::error::{AppResult, ApplicationError};
use crate::model::permissions::{effective_rule, EffectiveRule};
use crate::model::types::{EntitySchema, KeyStrategy, PropertyDescriptor, PropertyType};
use crate::sql::binder::{ParamBinder, SqlStatement};
use crate::sql::dialect::{Dialect, ReturningMode};
use crate::sql::value::{to_db_value, SqlValue};

/// A generated column value: either bound, or a SQL expression like
/// CURRENT_TIMESTAMP that the database evaluates
pub enum GeneratedValue {
    Bound(SqlValue),
    Expression(&'static str),
}

/// New value for a concurrency stamp or uuid key, typed by the property
pub fn generated_value(property: &PropertyDescriptor) -> GeneratedValue {
    match property.api_type {
        PropertyType::Uuid | PropertyType::String => {
            GeneratedValue::Bound(SqlValue::Text(uuid::Uuid::new_v4().to_string()))
        }
        PropertyType::DateTime => GeneratedValue::Expression("CURRENT_TIMESTAMP"),
        // Numeric stamps tick on the database clock
        _ => GeneratedValue::Expression("CURRENT_TIMESTAMP"),
    }
}

/// The complete create plan: one statement for engines with RETURNING,
/// insert-then-select for the rest
#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub statements: Vec<SqlStatement>,
    /// Property names of the returned row, in select-list order
    pub columns: Vec<String>,
}

pub struct InsertQueryBuilder<'a> {
    operation: &'a Operation,
    entity: &'a EntitySchema,
    dialect: Dialect,
    db_schema: Option<String>,
}

impl<'a> InsertQueryBuilder<'a> {
    pub fn new(
        operation: &'a Operation,
        entity: &'a EntitySchema,
        dialect: Dialect,
        db_schema: Option<String>,
    ) -> Self {
        Self {
            operation,
            entity,
            dialect,
            db_schema,
        }
    }

    pub fn build(&self) -> AppResult<InsertPlan> {
        let rule = effective_rule(self.entity, self.operation.action, &self.operation.claims)?;
        if !rule.allowed {
            return Err(ApplicationError::forbidden(format!(
                "subject is not allowed to create {}",
                self.entity.api_name
            )));
        }

        self.validate_store_params(&rule)?;

        let strategy = self.entity.pk_strategy();
        let pk_supplied = self
            .operation
            .store_params
            .contains_key(&self.entity.primary_key);

        match strategy {
            KeyStrategy::Auto | KeyStrategy::Sequence => {
                if pk_supplied {
                    return Err(ApplicationError::bad_request(format!(
                        "primary key '{}' is generated and may not be supplied",
                        self.entity.primary_key
                    )));
                }
            }
            KeyStrategy::Manual => {
                if !pk_supplied {
                    return Err(ApplicationError::bad_request(format!(
                        "primary key '{}' is required",
                        self.entity.primary_key
                    )));
                }
            }
            KeyStrategy::Uuid => {
                if pk_supplied {
                    return Err(ApplicationError::bad_request(format!(
                        "primary key '{}' is generated and may not be supplied",
                        self.entity.primary_key
                    )));
                }
            }
        }

        self.validate_required()?;

        let mut binder = ParamBinder::new(self.dialect);
        let mut columns: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        // Retained for the mysql re-select when the key is gateway-generated
        let mut generated_pk: Option<SqlValue> = None;

        for (name, raw) in &self.operation.store_params {
            let property = &self.entity.properties[name];
            columns.push(property.column_name.clone());
            values.push(binder.bind(to_db_value(property, raw)?));
        }

        if strategy == KeyStrategy::Uuid {
            let pk = &self.entity.properties[&self.entity.primary_key];
            let generated = SqlValue::Text(uuid::Uuid::new_v4().to_string());
            generated_pk = Some(generated.clone());
            columns.push(pk.column_name.clone());
            values.push(binder.bind(generated));
        }

        if let Some(concurrency) = self.entity.concurrency_descriptor() {
            columns.push(concurrency.column_name.clone());
            match generated_value(concurrency) {
                GeneratedValue::Bound(value) => values.push(binder.bind(value)),
                GeneratedValue::Expression(expr) => values.push(expr.to_string()),
            }
        }

        let select_list: Vec<String> = self
            .entity
            .properties
            .values()
            .map(|p| p.column_name.clone())
            .collect();
        let returned: Vec<String> = self.entity.properties.keys().cloned().collect();

        let table = self.entity.table_expression(self.db_schema.as_deref());
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            values.join(", ")
        );

        let statements = match self.dialect.returning_mode() {
            ReturningMode::Clause => {
                let sql = format!("{} RETURNING {}", insert, select_list.join(", "));
                vec![binder.finish(sql)]
            }
            ReturningMode::LastInsertId => {
                let insert_statement = binder.finish(insert);
                let mut select_binder = ParamBinder::new(self.dialect);
                let pk_column = &self.entity.properties[&self.entity.primary_key].column_name;

                let key_expr = match (&generated_pk, pk_supplied) {
                    (Some(pk), _) => select_binder.bind(pk.clone()),
                    (None, true) => {
                        let pk_property = &self.entity.properties[&self.entity.primary_key];
                        let raw = &self.operation.store_params[&self.entity.primary_key];
                        select_binder.bind(to_db_value(pk_property, raw)?)
                    }
                    (None, false) => "LAST_INSERT_ID()".to_string(),
                };

                let select = format!(
                    "SELECT {} FROM {} WHERE {} = {}",
                    select_list.join(", "),
                    table,
                    pk_column,
                    key_expr
                );
                vec![insert_statement, select_binder.finish(select)]
            }
        };

        Ok(InsertPlan {
            statements,
            columns: returned,
        })
    }

    /// Every store-param key must name a property inside the caller's
    /// write pattern; the concurrency stamp is system-managed
    fn validate_store_params(&self, rule: &EffectiveRule) -> AppResult<()> {
        if self.operation.store_params.is_empty() {
            return Err(ApplicationError::bad_request(format!(
                "create on {} requires store parameters",
                self.entity.api_name
            )));
        }

        for name in self.operation.store_params.keys() {
            if self.entity.concurrency_property.as_deref() == Some(name.as_str()) {
                return Err(ApplicationError::bad_request(format!(
                    "concurrency property '{}' is system-managed and may not be supplied",
                    name
                )));
            }
            if !self.entity.properties.contains_key(name) || !rule.permits(name) {
                return Err(ApplicationError::forbidden(format!(
                    "subject may not write property '{}' of {}",
                    name, self.entity.api_name
                )));
            }
        }
        Ok(())
    }

    fn validate_required(&self) -> AppResult<()> {
        for (name, property) in &self.entity.properties {
            if !property.required {
                continue;
            }
            if name == &self.entity.primary_key
                && self.entity.pk_strategy() != KeyStrategy::Manual
            {
                continue;
            }
            if self.entity.concurrency_property.as_deref() == Some(name.as_str()) {
                continue;
            }
            match self.operation.store_params.get(name) {
                None | Some(Value::Null) => {
                    return Err(ApplicationError::bad_request(format!(
                        "required property '{}' is missing",
                        name
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
