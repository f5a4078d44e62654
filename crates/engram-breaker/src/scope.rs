//! Scope-key computation. Scheduler and worker must compute the same
//! key for the same logical scope, so this lives in one place rather than
//! being reimplemented at each call site.

#[derive(Debug, Clone)]
pub enum Scope {
    Global,
    Instance(String),
    Tenant(String),
    Pool(String),
}

pub fn scope_key(project: &str, scope: &Scope) -> String {
    match scope {
        Scope::Global => format!("{project}:global"),
        Scope::Instance(host) => format!("{project}:instance:{host}"),
        Scope::Tenant(id) => format!("{project}:tenant:{id}"),
        Scope::Pool(name) => format!("{project}:pool:{name}"),
    }
}

/// Older deployments keyed breaker state without the `project` prefix.
/// Used only when reading persisted state for an upgrade path; never
/// written.
pub fn legacy_keys(scope: &Scope) -> Vec<String> {
    match scope {
        Scope::Global => vec!["global".to_string()],
        Scope::Instance(host) => vec![format!("instance:{host}"), host.clone()],
        Scope::Tenant(id) => vec![format!("tenant:{id}"), id.clone()],
        Scope::Pool(name) => vec![format!("pool:{name}"), name.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_scope_kind() {
        assert_eq!(scope_key("engram", &Scope::Global), "engram:global");
        assert_eq!(scope_key("engram", &Scope::Instance("gitlab-1".into())), "engram:instance:gitlab-1");
        assert_eq!(scope_key("engram", &Scope::Tenant("t1".into())), "engram:tenant:t1");
        assert_eq!(scope_key("engram", &Scope::Pool("default".into())), "engram:pool:default");
    }
}
