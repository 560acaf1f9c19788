//! Read Handler
//!
//! Builds `SELECT <projection> FROM <table> [<joins>] [WHERE ...]
//! [ORDER BY ...] [LIMIT/OFFSET]`. The projection is the intersection of
//! the requested properties with the caller's permission pattern; an
//! empty intersection is a permission failure, never an empty select
//! list. Object relations join inline; array relations become keyed
//! follow-up queries executed by the DAO and stitched in memory.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::operation::Operation;
use crate::error::{AppResult, ApplicationError};
use crate::model::permissions::{effective_rule, render_row_filter, EffectiveRule};
use crate::model::types::{ApiModel, EntitySchema, RelationKind};
use crate::sql::binder::{ParamBinder, SqlStatement};
use crate::sql::expression::FilterExpression;
use crate::sql::soft_delete::live_row_condition;
use crate::sql::value::SqlValue;

/// Where a projected column lands in the materialized row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKey {
    /// Property of the requested entity
    Own(String),
    /// Property of an inline-joined object relation, nested under the
    /// relation name
    Related { relation: String, property: String },
}

/// One column of the result set, in select-list order
#[derive(Debug, Clone)]
pub struct ProjectedColumn {
    pub key: ColumnKey,
}

/// A keyed follow-up query for an array relation
#[derive(Debug, Clone)]
pub struct SubSelect {
    /// Relation name the grouped rows attach under
    pub relation: String,
    /// Property on the parent whose values key the lookup
    pub parent_property: String,
    /// FK property on the child matched against parent keys
    pub child_property: String,
    pub child_entity: Arc<EntitySchema>,
    /// Child properties projected, child FK first
    pub columns: Vec<String>,
    db_schema: Option<String>,
}

impl SubSelect {
    /// Render the follow-up statement for the collected parent keys
    pub fn statement(
        &self,
        dialect: crate::sql::dialect::Dialect,
        keys: Vec<SqlValue>,
    ) -> AppResult<SqlStatement> {
        if keys.is_empty() {
            return Err(ApplicationError::internal(
                "subselect invoked with no parent keys",
            ));
        }

        let mut binder = ParamBinder::new(dialect);
        let alias = "c";
        let select_list: Vec<String> = self
            .columns
            .iter()
            .map(|name| {
                let column = &self.child_entity.properties[name].column_name;
                format!("{}.{}", alias, column)
            })
            .collect();

        let fk_column = &self.child_entity.properties[&self.child_property].column_name;
        let placeholders: Vec<String> = keys.into_iter().map(|k| binder.bind(k)).collect();

        let sql = format!(
            "SELECT {} FROM {} AS {} WHERE {}.{} IN ({})",
            select_list.join(", "),
            self.child_entity.table_expression(self.db_schema.as_deref()),
            alias,
            alias,
            fk_column,
            placeholders.join(", ")
        );
        Ok(binder.finish(sql))
    }
}

/// The complete read plan
#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub statement: SqlStatement,
    pub columns: Vec<ProjectedColumn>,
    pub sub_selects: Vec<SubSelect>,
}

/// Builds a `SelectPlan` from an operation and the loaded model
pub struct SelectQueryBuilder<'a> {
    operation: &'a Operation,
    entity: &'a EntitySchema,
    model: &'a ApiModel,
    dialect: crate::sql::dialect::Dialect,
    db_schema: Option<String>,
    default_page_size: u64,
}

/// An inline join derived from an object relation
struct Join {
    relation: String,
    alias: String,
    target: Arc<EntitySchema>,
    on: String,
}

impl<'a> SelectQueryBuilder<'a> {
    pub fn new(
        operation: &'a Operation,
        entity: &'a EntitySchema,
        model: &'a ApiModel,
        dialect: crate::sql::dialect::Dialect,
        db_schema: Option<String>,
        default_page_size: u64,
    ) -> Self {
        Self {
            operation,
            entity,
            model,
            dialect,
            db_schema,
            default_page_size,
        }
    }

    pub fn build(&self) -> AppResult<SelectPlan> {
        let rule = effective_rule(self.entity, self.operation.action, &self.operation.claims)?;
        if !rule.allowed {
            return Err(ApplicationError::forbidden(format!(
                "subject is not allowed to read {}",
                self.entity.api_name
            )));
        }

        let requested = RequestedProjection::parse(self.operation)?;
        let parent_alias = alias_for(&self.entity.api_name, &mut BTreeSet::new());

        // Own projection: requested ∩ permitted, in property order
        let mut columns: Vec<ProjectedColumn> = Vec::new();
        let mut select_list: Vec<String> = Vec::new();
        for (name, descriptor) in &self.entity.properties {
            if requested.wants_own(name) && rule.permits(name) {
                columns.push(ProjectedColumn {
                    key: ColumnKey::Own(name.clone()),
                });
                select_list.push(format!("{}.{}", parent_alias, descriptor.column_name));
            }
        }
        if columns.is_empty() {
            return Err(ApplicationError::forbidden(format!(
                "no readable properties of {} for the caller's roles",
                self.entity.api_name
            )));
        }

        // Inline joins and follow-up queries for requested relations
        let mut used_aliases = BTreeSet::new();
        used_aliases.insert(parent_alias.clone());
        let mut joins: Vec<Join> = Vec::new();
        let mut sub_selects: Vec<SubSelect> = Vec::new();

        for relation_name in requested.relations() {
            let relation = self.entity.relations.get(relation_name).ok_or_else(|| {
                ApplicationError::bad_request(format!(
                    "unknown relation '{}' on entity '{}'",
                    relation_name, self.entity.api_name
                ))
            })?;
            let target = self.model.entity(&relation.entity)?;
            let target_rule =
                effective_rule(&target, self.operation.action, &self.operation.claims)?;
            if !target_rule.allowed {
                return Err(ApplicationError::forbidden(format!(
                    "subject is not allowed to read {}",
                    target.api_name
                )));
            }

            match relation.kind {
                RelationKind::Object => {
                    let alias = alias_for(&target.api_name, &mut used_aliases);
                    let parent_fk =
                        &self.entity.properties[&relation.parent_property].column_name;
                    let target_pk = &target.properties[&target.primary_key].column_name;
                    let on = format!(
                        "{}.{} = {}.{}",
                        parent_alias, parent_fk, alias, target_pk
                    );

                    for (name, descriptor) in &target.properties {
                        if requested.wants_related(relation_name, name)
                            && target_rule.permits(name)
                        {
                            columns.push(ProjectedColumn {
                                key: ColumnKey::Related {
                                    relation: relation_name.clone(),
                                    property: name.clone(),
                                },
                            });
                            select_list.push(format!("{}.{}", alias, descriptor.column_name));
                        }
                    }

                    joins.push(Join {
                        relation: relation_name.clone(),
                        alias,
                        target,
                        on,
                    });
                }
                RelationKind::Array => {
                    let child_property = relation.child_property.clone().ok_or_else(|| {
                        ApplicationError::internal(format!(
                            "array relation '{}' lost its child property",
                            relation_name
                        ))
                    })?;

                    let mut sub_columns = vec![child_property.clone()];
                    for name in target.properties.keys() {
                        if name != &child_property
                            && requested.wants_related(relation_name, name)
                            && target_rule.permits(name)
                        {
                            sub_columns.push(name.clone());
                        }
                    }

                    sub_selects.push(SubSelect {
                        relation: relation_name.clone(),
                        parent_property: relation.parent_property.clone(),
                        child_property,
                        child_entity: Arc::clone(&target),
                        columns: sub_columns,
                        db_schema: self.db_schema.clone(),
                    });
                }
            }
        }

        // Array relations need the parent key projected to group by
        for sub in &sub_selects {
            let present = columns
                .iter()
                .any(|c| c.key == ColumnKey::Own(sub.parent_property.clone()));
            if !present {
                return Err(ApplicationError::forbidden(format!(
                    "relation '{}' requires readable property '{}'",
                    sub.relation, sub.parent_property
                )));
            }
        }

        let mut binder = ParamBinder::new(self.dialect);
        let conditions =
            self.search_conditions(&rule, &parent_alias, &mut joins, &mut used_aliases, &mut binder)?;

        let mut sql = format!(
            "SELECT {} FROM {} AS {}",
            select_list.join(", "),
            self.entity.table_expression(self.db_schema.as_deref()),
            parent_alias
        );
        for join in &joins {
            sql.push_str(&format!(
                " INNER JOIN {} AS {} ON {}",
                join.target.table_expression(self.db_schema.as_deref()),
                join.alias,
                join.on
            ));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if let Some(order_by) = self.order_by(&parent_alias)? {
            sql.push_str(&order_by);
        }
        sql.push_str(&self.paging()?);

        Ok(SelectPlan {
            statement: binder.finish(sql),
            columns,
            sub_selects,
        })
    }

    /// WHERE conjuncts: query-parameter filters plus the permission
    /// row filter
    fn search_conditions(
        &self,
        rule: &EffectiveRule,
        parent_alias: &str,
        joins: &mut Vec<Join>,
        used_aliases: &mut BTreeSet<String>,
        binder: &mut ParamBinder,
    ) -> AppResult<Vec<String>> {
        let mut conditions = Vec::new();

        for (key, raw) in &self.operation.query_params {
            let expression = FilterExpression::parse(raw)?;

            match key.split_once('.') {
                None => {
                    let property = self.entity.properties.get(key).ok_or_else(|| {
                        ApplicationError::bad_request(format!(
                            "invalid query parameter, property not found. entity: {}, property: {}",
                            self.entity.api_name, key
                        ))
                    })?;
                    let column = format!("{}.{}", parent_alias, property.column_name);
                    conditions.push(expression.render(property, &column, binder)?);
                }
                Some((relation_name, property_name)) => {
                    let relation =
                        self.entity.relations.get(relation_name).ok_or_else(|| {
                            ApplicationError::bad_request(format!(
                                "invalid query parameter, property not found. entity: {}, property: {}",
                                self.entity.api_name, key
                            ))
                        })?;
                    if relation.kind == RelationKind::Array {
                        return Err(ApplicationError::bad_request(format!(
                            "queries using properties in arrays are not supported. entity: {}, property: {}",
                            self.entity.api_name, key
                        )));
                    }

                    let target = self.model.entity(&relation.entity)?;
                    let property = target.properties.get(property_name).ok_or_else(|| {
                        ApplicationError::bad_request(format!(
                            "invalid query parameter, property not found. entity: {}, property: {}",
                            relation.entity, property_name
                        ))
                    })?;

                    // Reuse an existing join or add one purely for filtering
                    let alias = match joins.iter().find(|j| j.relation == *relation_name) {
                        Some(join) => join.alias.clone(),
                        None => {
                            let alias = alias_for(&target.api_name, used_aliases);
                            let parent_fk =
                                &self.entity.properties[&relation.parent_property].column_name;
                            let target_pk = &target.properties[&target.primary_key].column_name;
                            let on = format!(
                                "{}.{} = {}.{}",
                                parent_alias, parent_fk, alias, target_pk
                            );
                            joins.push(Join {
                                relation: relation_name.to_string(),
                                alias: alias.clone(),
                                target: Arc::clone(&target),
                                on,
                            });
                            alias
                        }
                    };

                    let column = format!("{}.{}", alias, property.column_name);
                    conditions.push(expression.render(property, &column, binder)?);
                }
            }
        }

        // Soft-deleted rows stay out of reads; a query parameter naming
        // the marker column itself overrides that column's filter
        for property in self.entity.properties.values() {
            if self.operation.query_params.contains_key(&property.api_name) {
                continue;
            }
            let column = format!("{}.{}", parent_alias, property.column_name);
            if let Some(condition) = live_row_condition(property, &column, binder)? {
                conditions.push(condition);
            }
        }

        if let Some(row_filter) = render_row_filter(rule, &self.operation.claims, binder)? {
            conditions.push(row_filter);
        }

        Ok(conditions)
    }

    fn order_by(&self, parent_alias: &str) -> AppResult<Option<String>> {
        let sort = match self.operation.metadata_str("__sort") {
            Some(sort) if !sort.trim().is_empty() => sort,
            _ => return Ok(None),
        };

        let mut terms = Vec::new();
        for segment in sort.split(',') {
            let segment = segment.trim();
            let (name, direction) = match segment.split_once(':') {
                Some((name, "asc")) => (name, "ASC"),
                Some((name, "desc")) => (name, "DESC"),
                Some((_, other)) => {
                    return Err(ApplicationError::bad_request(format!(
                        "invalid sort direction '{}', expected asc or desc",
                        other
                    )))
                }
                None => (segment, "ASC"),
            };

            let property = self.entity.properties.get(name).ok_or_else(|| {
                ApplicationError::bad_request(format!(
                    "invalid sort column '{}' on entity '{}'",
                    name, self.entity.api_name
                ))
            })?;
            terms.push(format!(
                "{}.{} {}",
                parent_alias, property.column_name, direction
            ));
        }

        Ok(Some(format!(" ORDER BY {}", terms.join(", "))))
    }

    fn paging(&self) -> AppResult<String> {
        let limit = self
            .operation
            .metadata_u64("__limit")?
            .unwrap_or(self.default_page_size);
        let offset = self.operation.metadata_u64("__offset")?;
        Ok(self.dialect.limit_clause(Some(limit), offset))
    }
}

/// What the caller asked to see: `__properties` patterns and `__include`
/// relation names
struct RequestedProjection {
    own_patterns: Vec<regex::Regex>,
    relation_patterns: Vec<(String, regex::Regex)>,
    included_relations: Vec<String>,
}

impl RequestedProjection {
    fn parse(operation: &Operation) -> AppResult<Self> {
        let mut own_patterns = Vec::new();
        let mut relation_patterns = Vec::new();
        let mut included_relations = Vec::new();

        if let Some(spec) = operation.metadata_str("__properties") {
            for token in spec.split_whitespace() {
                match token.split_once(':') {
                    Some((relation, pattern)) => {
                        let compiled =
                            regex::Regex::new(&format!("^({})$", pattern)).map_err(|e| {
                                ApplicationError::bad_request(format!(
                                    "invalid __properties pattern '{}': {}",
                                    token, e
                                ))
                            })?;
                        if !included_relations.contains(&relation.to_string()) {
                            included_relations.push(relation.to_string());
                        }
                        relation_patterns.push((relation.to_string(), compiled));
                    }
                    None => {
                        let compiled =
                            regex::Regex::new(&format!("^({})$", token)).map_err(|e| {
                                ApplicationError::bad_request(format!(
                                    "invalid __properties pattern '{}': {}",
                                    token, e
                                ))
                            })?;
                        own_patterns.push(compiled);
                    }
                }
            }
        }

        if let Some(spec) = operation.metadata_str("__include") {
            for name in spec.split(',') {
                let name = name.trim();
                if !name.is_empty() && !included_relations.contains(&name.to_string()) {
                    included_relations.push(name.to_string());
                }
            }
        }

        Ok(Self {
            own_patterns,
            relation_patterns,
            included_relations,
        })
    }

    fn wants_own(&self, property: &str) -> bool {
        if self.own_patterns.is_empty() {
            return true;
        }
        self.own_patterns.iter().any(|p| p.is_match(property))
    }

    fn wants_related(&self, relation: &str, property: &str) -> bool {
        let patterns: Vec<&regex::Regex> = self
            .relation_patterns
            .iter()
            .filter(|(r, _)| r == relation)
            .map(|(_, p)| p)
            .collect();
        if patterns.is_empty() {
            // Included via __include without a pattern: all permitted
            return true;
        }
        patterns.iter().any(|p| p.is_match(property))
    }

    fn relations(&self) -> &[String] {
        &self.included_relations
    }
}

/// Single-letter aliases with collision suffixes: invoice → i,
/// invoice_line → i2
fn alias_for(entity_name: &str, used: &mut BTreeSet<String>) -> String {
    let base: String = entity_name.chars().take(1).collect();
    let mut candidate = base.clone();
    let mut counter = 2;
    while used.contains(&candidate) {
        candidate = format!("{}{}", base, counter);
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::claims::ClaimSet;
    use crate::core::operation::Action;
    use crate::model::loader::load_model;
    use crate::sql::dialect::Dialect;
    use serde_json::{json, Map};

    fn chinook() -> ApiModel {
        let doc = json!({
            "schema_objects": {
                "invoice": {
                    "database": "chinook",
                    "primary-key": "invoice_id",
                    "properties": {
                        "invoice_id": {"type": "integer", "key": "auto"},
                        "customer_id": {"type": "integer"},
                        "invoice_date": {"type": "date-time"},
                        "total": {"type": "number"}
                    },
                    "relations": {
                        "customer": {
                            "type": "object",
                            "entity": "customer",
                            "parent-property": "customer_id"
                        },
                        "line_items": {
                            "type": "array",
                            "entity": "invoice_line",
                            "parent-property": "invoice_id",
                            "child-property": "invoice_id"
                        }
                    }
                },
                "customer": {
                    "database": "chinook",
                    "primary-key": "customer_id",
                    "properties": {
                        "customer_id": {"type": "integer", "key": "auto"},
                        "email": {"type": "string"}
                    }
                },
                "invoice_line": {
                    "database": "chinook",
                    "primary-key": "invoice_line_id",
                    "properties": {
                        "invoice_line_id": {"type": "integer", "key": "auto"},
                        "invoice_id": {"type": "integer"},
                        "unit_price": {"type": "number"}
                    }
                },
                "album": {
                    "database": "chinook",
                    "primary-key": "album_id",
                    "properties": {
                        "album_id": {"type": "integer", "key": "auto"},
                        "artist_id": {"type": "integer"},
                        "title": {"type": "string"}
                    },
                    "permissions": {
                        "sales_associate": {"read": "album_id|title"}
                    }
                },
                "product": {
                    "database": "catalog",
                    "primary-key": "product_id",
                    "properties": {
                        "product_id": {"type": "integer", "key": "auto"},
                        "name": {"type": "string"},
                        "status": {
                            "type": "string",
                            "soft_delete": {
                                "strategy": "exclude_values",
                                "values": ["archived", "deleted"]
                            }
                        },
                        "is_active": {
                            "type": "boolean",
                            "soft_delete": {"strategy": "boolean_flag", "active_value": true}
                        },
                        "deleted_at": {
                            "type": "date-time",
                            "soft_delete": {"strategy": "null_check"}
                        }
                    }
                }
            }
        });
        load_model(&doc).unwrap()
    }

    fn build(model: &ApiModel, op: &Operation) -> AppResult<SelectPlan> {
        let entity = model.entity(&op.entity).unwrap();
        SelectQueryBuilder::new(op, &entity, model, Dialect::Postgres, None, 100).build()
    }

    #[test]
    fn test_basic_select_with_filters() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("invoice_id".to_string(), json!("24"));
        query.insert("total".to_string(), json!("gt::5"));

        let op = Operation::new("invoice", Action::Read).with_query_params(query);
        let plan = build(&model, &op).unwrap();

        assert_eq!(
            plan.statement.sql,
            "SELECT i.customer_id, i.invoice_date, i.invoice_id, i.total \
             FROM invoice AS i \
             WHERE i.invoice_id = $1 AND i.total > $2 LIMIT 100"
        );
        assert_eq!(
            plan.statement.params,
            vec![SqlValue::Int(24), SqlValue::Float(5.0)]
        );
    }

    #[test]
    fn test_permission_projection() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("artist_id".to_string(), json!("eq::1"));
        let mut metadata = Map::new();
        metadata.insert("__sort".to_string(), json!("title:asc"));
        metadata.insert("__limit".to_string(), json!("2"));

        let mut claims = ClaimSet::default();
        claims.roles = vec!["sales_associate".to_string()];

        let op = Operation::new("album", Action::Read)
            .with_query_params(query)
            .with_metadata_params(metadata)
            .with_claims(claims);
        let plan = build(&model, &op).unwrap();

        // Projection is exactly the permitted pair, filter still binds
        assert_eq!(
            plan.statement.sql,
            "SELECT a.album_id, a.title FROM album AS a \
             WHERE a.artist_id = $1 ORDER BY a.title ASC LIMIT 2"
        );
        assert_eq!(plan.statement.params, vec![SqlValue::Int(1)]);
        assert_eq!(plan.columns.len(), 2);
    }

    #[test]
    fn test_no_roles_denied() {
        let model = chinook();
        let op = Operation::new("album", Action::Read);
        let err = build(&model, &op).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_projection_outside_permissions_is_forbidden() {
        let model = chinook();
        let mut metadata = Map::new();
        metadata.insert("__properties".to_string(), json!("artist_id"));

        let mut claims = ClaimSet::default();
        claims.roles = vec!["sales_associate".to_string()];

        let op = Operation::new("album", Action::Read)
            .with_metadata_params(metadata)
            .with_claims(claims);

        let err = build(&model, &op).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_object_relation_join() {
        let model = chinook();
        let mut metadata = Map::new();
        metadata.insert("__include".to_string(), json!("customer"));

        let op = Operation::new("invoice", Action::Read).with_metadata_params(metadata);
        let plan = build(&model, &op).unwrap();

        assert!(plan
            .statement
            .sql
            .contains("INNER JOIN customer AS c ON i.customer_id = c.customer_id"));
        assert!(plan.statement.sql.contains("c.email"));
        assert!(plan
            .columns
            .iter()
            .any(|c| c.key
                == ColumnKey::Related {
                    relation: "customer".to_string(),
                    property: "email".to_string()
                }));
    }

    #[test]
    fn test_filter_through_object_relation() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("customer.customer_id".to_string(), json!("gt::5"));
        query.insert("invoice_id".to_string(), json!("gt::24"));

        let op = Operation::new("invoice", Action::Read).with_query_params(query);
        let plan = build(&model, &op).unwrap();

        assert!(plan
            .statement
            .sql
            .contains("INNER JOIN customer AS c ON i.customer_id = c.customer_id"));
        assert!(plan.statement.sql.contains("c.customer_id > $1"));
        assert!(plan.statement.sql.contains("i.invoice_id > $2"));
    }

    #[test]
    fn test_filter_on_array_relation_rejected() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("line_items.unit_price".to_string(), json!("gt::5"));

        let op = Operation::new("invoice", Action::Read).with_query_params(query);
        let err = build(&model, &op).unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("arrays"));
    }

    #[test]
    fn test_unknown_query_property_rejected() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("track_id".to_string(), json!("gt::5"));

        let op = Operation::new("invoice", Action::Read).with_query_params(query);
        let err = build(&model, &op).unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("property not found"));
    }

    #[test]
    fn test_unknown_sort_column_rejected() {
        let model = chinook();
        let mut metadata = Map::new();
        metadata.insert("__sort".to_string(), json!("tittle:asc"));

        let op = Operation::new("invoice", Action::Read).with_metadata_params(metadata);
        let err = build(&model, &op).unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("sort"));
    }

    #[test]
    fn test_array_relation_becomes_subselect() {
        let model = chinook();
        let mut metadata = Map::new();
        metadata.insert("__include".to_string(), json!("line_items"));

        let op = Operation::new("invoice", Action::Read).with_metadata_params(metadata);
        let plan = build(&model, &op).unwrap();

        assert_eq!(plan.sub_selects.len(), 1);
        let sub = &plan.sub_selects[0];
        assert_eq!(sub.relation, "line_items");
        assert_eq!(sub.parent_property, "invoice_id");
        assert_eq!(sub.columns[0], "invoice_id");

        let statement = sub
            .statement(Dialect::Postgres, vec![SqlValue::Int(1), SqlValue::Int(2)])
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT c.invoice_id, c.invoice_line_id, c.unit_price \
             FROM invoice_line AS c WHERE c.invoice_id IN ($1, $2)"
        );
    }

    #[test]
    fn test_soft_deleted_rows_filtered_from_reads() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("name".to_string(), json!("Test Product"));

        let op = Operation::new("product", Action::Read).with_query_params(query);
        let plan = build(&model, &op).unwrap();

        let sql = &plan.statement.sql;
        assert!(sql.contains("p.deleted_at IS NULL"));
        assert!(sql.contains("p.is_active = $2"));
        assert!(sql.contains("p.status NOT IN ($3, $4)"));
        assert_eq!(
            plan.statement.params,
            vec![
                SqlValue::Text("Test Product".into()),
                SqlValue::Bool(true),
                SqlValue::Text("archived".into()),
                SqlValue::Text("deleted".into()),
            ]
        );
    }

    #[test]
    fn test_marker_query_param_overrides_its_own_filter() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("status".to_string(), json!("archived"));

        let op = Operation::new("product", Action::Read).with_query_params(query);
        let plan = build(&model, &op).unwrap();

        let sql = &plan.statement.sql;
        // The explicitly-queried marker keeps its caller filter only
        assert!(sql.contains("p.status = $1"));
        assert!(!sql.contains("NOT IN"));
        // The other markers still filter
        assert!(sql.contains("p.is_active = $2"));
        assert!(sql.contains("p.deleted_at IS NULL"));
    }

    #[test]
    fn test_multiple_marker_conflicts_skip_each_filter() {
        let model = chinook();
        let mut query = Map::new();
        query.insert("status".to_string(), json!("deleted"));
        query.insert("is_active".to_string(), json!("false"));

        let op = Operation::new("product", Action::Read).with_query_params(query);
        let plan = build(&model, &op).unwrap();

        let sql = &plan.statement.sql;
        assert!(!sql.contains("NOT IN"));
        // Only the caller's is_active equality remains, plus the
        // untouched null_check marker
        assert_eq!(sql.matches("p.is_active = ").count(), 1);
        assert!(sql.contains("p.is_active = $1"));
        assert!(sql.contains("p.deleted_at IS NULL"));
    }

    #[test]
    fn test_offset_and_default_limit() {
        let model = chinook();
        let mut metadata = Map::new();
        metadata.insert("__offset".to_string(), json!("40"));

        let op = Operation::new("invoice", Action::Read).with_metadata_params(metadata);
        let plan = build(&model, &op).unwrap();

        assert!(plan.statement.sql.ends_with("LIMIT 100 OFFSET 40"));
    }
}
