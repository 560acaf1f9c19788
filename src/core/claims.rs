//! Claim Set
//!
//! Claims lifted from the gateway authorizer context. Well-known keys
//! (`sub`, `roles`, `scope`, `permissions`) are pulled into typed fields;
//! everything else stays in a side map so provider-specific claims remain
//! addressable by dotted path from permission templates.

use serde_json::{Map, Value};

use crate::core::operation::Action;

/// Claims carried by a request
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    /// Subject identifier
    pub sub: Option<String>,
    /// Roles consulted by the permission resolver
    pub roles: Vec<String>,
    /// OAuth-style scope tokens, space-delimited in the source claim
    pub scopes: Vec<String>,
    /// Permission tokens of the form `entity.action`
    pub permissions: Vec<String>,
    /// Remaining provider-specific claims
    pub extra: Map<String, Value>,
}

impl ClaimSet {
    /// Lift claims from a gateway authorizer map
    pub fn from_authorizer(authorizer: &Map<String, Value>) -> Self {
        let sub = authorizer
            .get("sub")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let roles = string_list(authorizer.get("roles"));
        let permissions = string_list(authorizer.get("permissions"));

        let scopes = match authorizer.get("scope") {
            Some(Value::String(s)) => s.split_whitespace().map(|t| t.to_string()).collect(),
            other => string_list(other),
        };

        let mut extra = Map::new();
        for (key, value) in authorizer {
            if !matches!(key.as_str(), "sub" | "roles" | "scope" | "permissions") {
                extra.insert(key.clone(), value.clone());
            }
        }

        Self {
            sub,
            roles,
            scopes,
            permissions,
            extra,
        }
    }

    /// Whether any claim material is present at all
    pub fn is_empty(&self) -> bool {
        self.sub.is_none()
            && self.roles.is_empty()
            && self.scopes.is_empty()
            && self.permissions.is_empty()
            && self.extra.is_empty()
    }

    /// Look up a claim by dotted path, e.g. `sub` or `org.tenant_id`.
    /// Missing claims return `None`; they never default.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;

        let mut current: Value = match first {
            "sub" => Value::String(self.sub.clone()?),
            "roles" => Value::Array(self.roles.iter().cloned().map(Value::String).collect()),
            "scope" => Value::String(self.scopes.join(" ")),
            "permissions" => Value::Array(
                self.permissions.iter().cloned().map(Value::String).collect(),
            ),
            other => self.extra.get(other)?.clone(),
        };

        for segment in segments {
            current = match &current {
                Value::Object(map) => map.get(segment)?.clone(),
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?.clone()
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Route-level scope check: the caller must hold a scope token or a
    /// permission token matching the action on the entity.
    pub fn allows_route(&self, action: Action, entity: &str) -> bool {
        let verb = action.permission_verb();

        // `read:*` is implied by write/delete/admin wildcards, `write:*`
        // by delete/admin, `delete:*` by admin
        let implied: &[&str] = match verb {
            "read" => &["read:*", "write:*", "delete:*", "admin:*"],
            "write" => &["write:*", "delete:*", "admin:*"],
            "delete" => &["delete:*", "admin:*"],
            _ => &[],
        };

        let exact = format!("{}:{}", verb, entity);
        let verb_wild = format!("{}:*", verb);
        for token in &self.scopes {
            if token == &exact
                || token == &verb_wild
                || token == "*:*"
                || token == "*"
                || implied.contains(&token.as_str())
            {
                return true;
            }
        }

        let perm_exact = format!("{}.{}", entity, verb);
        let perm_wild = format!("{}.*", entity);
        self.permissions
            .iter()
            .any(|token| token == &perm_exact || token == &perm_wild)
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => {
            // Some authorizers flatten lists to comma-separated strings
            s.split(',').map(|t| t.trim().to_string()).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn authorizer() -> Map<String, Value> {
        json!({
            "sub": "user123",
            "scope": "read:* write:album",
            "permissions": ["album.read", "customer.*"],
            "roles": ["sales_associate"],
            "org": {"tenant_id": "acme"}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_lift_from_authorizer() {
        let claims = ClaimSet::from_authorizer(&authorizer());
        assert_eq!(claims.sub.as_deref(), Some("user123"));
        assert_eq!(claims.roles, vec!["sales_associate"]);
        assert_eq!(claims.scopes, vec!["read:*", "write:album"]);
        assert!(claims.extra.contains_key("org"));
    }

    #[test]
    fn test_lookup_dotted_path() {
        let claims = ClaimSet::from_authorizer(&authorizer());
        assert_eq!(claims.lookup("sub"), Some(json!("user123")));
        assert_eq!(claims.lookup("org.tenant_id"), Some(json!("acme")));
        assert_eq!(claims.lookup("org.missing"), None);
        assert_eq!(claims.lookup("nonexistent"), None);
    }

    #[test]
    fn test_scope_wildcards() {
        let claims = ClaimSet::from_authorizer(&authorizer());

        // read:* matches any read
        assert!(claims.allows_route(Action::Read, "customer"));
        // explicit write:album
        assert!(claims.allows_route(Action::Update, "album"));
        // no delete grant via scopes, but customer.* permission covers it
        assert!(claims.allows_route(Action::Delete, "customer"));
        assert!(!claims.allows_route(Action::Delete, "invoice"));
    }

    #[test]
    fn test_write_scope_implies_read() {
        let mut claims = ClaimSet::default();
        claims.scopes = vec!["write:*".to_string()];

        assert!(claims.allows_route(Action::Read, "album"));
        assert!(claims.allows_route(Action::Create, "album"));
        assert!(!claims.allows_route(Action::Delete, "album"));
    }

    #[test]
    fn test_permission_tokens() {
        let mut claims = ClaimSet::default();
        claims.permissions = vec!["album.read".to_string()];

        assert!(claims.allows_route(Action::Read, "album"));
        assert!(!claims.allows_route(Action::Create, "album"));
    }

    #[test]
    fn test_empty_claims() {
        let claims = ClaimSet::default();
        assert!(claims.is_empty());
        assert!(!claims.allows_route(Action::Read, "album"));
    }
}
