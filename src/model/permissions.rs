//! Permission Resolver
//!
//! Projects the permission table onto a single request: given an entity,
//! an action, and the caller's claims, produces the *effective rule*:
//! whether the action is allowed at all, which properties are visible,
//! and which row-level predicates apply.
//!
//! Rules union across every role the caller holds: a property is
//! permitted if any role's pattern matches it, and the row predicate is
//! the OR of the role predicates. A permissive role without a `where`
//! template drops row filtering entirely for that action.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use crate::core::claims::ClaimSet;
use crate::core::operation::Action;
use crate::error::{AppResult, ApplicationError};
use crate::model::types::{EntitySchema, PermissionAction, Rule};
use crate::sql::binder::ParamBinder;
use crate::sql::value::SqlValue;

/// The per-request projection of an entity's permission table
#[derive(Debug, Clone)]
pub struct EffectiveRule {
    /// Whether the action is allowed at all
    pub allowed: bool,
    /// Anchored union of allowed-property patterns; `None` means all
    pub properties: Option<Arc<Regex>>,
    /// Row predicates, OR-combined; `None` means no row filtering
    pub where_templates: Option<Vec<String>>,
}

impl EffectiveRule {
    pub fn unrestricted() -> Self {
        Self {
            allowed: true,
            properties: None,
            where_templates: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            allowed: false,
            properties: None,
            where_templates: Some(Vec::new()),
        }
    }

    /// Whether the given property may be projected or written
    pub fn permits(&self, property: &str) -> bool {
        if !self.allowed {
            return false;
        }
        match &self.properties {
            None => true,
            Some(pattern) => pattern.is_match(property),
        }
    }
}

/// Compiled-pattern cache keyed by the union source. Role sets repeat
/// across requests, so the same unions recur.
fn pattern_cache() -> &'static Mutex<HashMap<String, Arc<Regex>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<Regex>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn compile_union(patterns: &[&str]) -> AppResult<Arc<Regex>> {
    let source = format!("^({})$", patterns.join("|"));

    if let Ok(cache) = pattern_cache().lock() {
        if let Some(compiled) = cache.get(&source) {
            return Ok(Arc::clone(compiled));
        }
    }

    let compiled = Arc::new(Regex::new(&source).map_err(|e| {
        ApplicationError::internal(format!("permission pattern union failed to compile: {}", e))
    })?);

    if let Ok(mut cache) = pattern_cache().lock() {
        cache.insert(source, Arc::clone(&compiled));
    }
    Ok(compiled)
}

/// Resolve the effective rule for (entity, action, claims)
pub fn effective_rule(
    entity: &EntitySchema,
    action: Action,
    claims: &ClaimSet,
) -> AppResult<EffectiveRule> {
    // An entity with no permission table is unrestricted
    if entity.permissions.is_empty() {
        return Ok(EffectiveRule::unrestricted());
    }

    let permission_action = action.permission_action();
    let rules = entity.permissions.rules_for(permission_action);
    // Restore rules are optional; a role without one is gated by its
    // write rule instead
    let fallback = if permission_action == PermissionAction::Restore {
        entity.permissions.rules_for(PermissionAction::Write)
    } else {
        None
    };
    if rules.is_none() && fallback.is_none() {
        return Ok(EffectiveRule::denied());
    }

    // Union across the caller's roles; a role without its own rule falls
    // back to the wildcard role, then to the fallback table
    let mut matched: Vec<&Rule> = Vec::new();
    for role in &claims.roles {
        let rule = rules
            .and_then(|r| r.get(role).or_else(|| r.get("*")))
            .or_else(|| fallback.and_then(|r| r.get(role).or_else(|| r.get("*"))));
        if let Some(rule) = rule {
            matched.push(rule);
        }
    }

    let allowing: Vec<&Rule> = matched.iter().filter(|r| r.allow).copied().collect();
    if allowing.is_empty() {
        return Ok(EffectiveRule::denied());
    }

    // Property union: an allowing rule without a pattern grants all
    let mut patterns: Vec<&str> = Vec::new();
    let mut grants_all = false;
    for rule in &allowing {
        match rule.properties.as_deref() {
            None | Some(".*") => grants_all = true,
            Some(pattern) => patterns.push(pattern),
        }
    }
    let properties = if grants_all {
        None
    } else {
        Some(compile_union(&patterns)?)
    };

    // Row predicates OR together; a permissive rule without one is an
    // unconditional TRUE, which makes the whole disjunction TRUE
    let mut templates: Vec<String> = Vec::new();
    let mut unconditional = false;
    for rule in &allowing {
        match &rule.where_template {
            None => unconditional = true,
            Some(template) => templates.push(template.clone()),
        }
    }
    let where_templates = if unconditional { None } else { Some(templates) };

    Ok(EffectiveRule {
        allowed: true,
        properties,
        where_templates,
    })
}

/// Render the effective rule's row predicates into a SQL fragment,
/// binding every `${claims.PATH}` token as a parameter. A missing claim
/// binds SQL NULL; equality against NULL matches no rows, so a missing
/// claim never widens access.
///
/// Returns `None` when no row filtering applies.
pub fn render_row_filter(
    rule: &EffectiveRule,
    claims: &ClaimSet,
    binder: &mut ParamBinder,
) -> AppResult<Option<String>> {
    let templates = match &rule.where_templates {
        None => return Ok(None),
        Some(templates) if templates.is_empty() => return Ok(None),
        Some(templates) => templates,
    };

    let mut rendered = Vec::with_capacity(templates.len());
    for template in templates {
        rendered.push(render_template(template, claims, binder)?);
    }

    if rendered.len() == 1 {
        Ok(Some(format!("({})", rendered[0])))
    } else {
        Ok(Some(format!("({})", rendered.join(" OR "))))
    }
}

fn render_template(
    template: &str,
    claims: &ClaimSet,
    binder: &mut ParamBinder,
) -> AppResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ApplicationError::internal("unterminated claim token in permission template")
        })?;
        let path = &after[..end];

        let claim_path = path.strip_prefix("claims.").ok_or_else(|| {
            ApplicationError::internal(format!("unsupported template token: ${{{}}}", path))
        })?;

        let value = match claims.lookup(claim_path) {
            Some(value) => SqlValue::from_json(&value)?,
            None => SqlValue::Null,
        };
        output.push_str(&binder.bind(value));

        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}
