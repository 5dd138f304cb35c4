use serde::{Deserialize, Serialize};

/// A monitored (instance, database) pair. Built from configuration at
/// startup and treated as immutable for the duration of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Target {
    pub instance_name: String,
    pub database_name: String,
    pub enabled: bool,
    pub tags: Vec<String>,
    /// Production targets refuse remediation unless explicitly allowed.
    pub is_production: bool,
}

impl Target {
    pub fn new(instance: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            instance_name: instance.into(),
            database_name: database.into(),
            enabled: true,
            tags: Vec::new(),
            is_production: false,
        }
    }

    /// Stable display key, used in logs and cooldown bookkeeping.
    pub fn key(&self) -> String {
        format!("{}/{}", self.instance_name, self.database_name)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instance_name, self.database_name)
    }
}

/// Operator-supplied filter for one-shot commands (`collect-once` etc.)
#[derive(Debug, Clone, Default)]
pub struct TargetSelector {
    pub instance: Option<String>,
    pub database: Option<String>,
}

impl TargetSelector {
    pub fn matches(&self, target: &Target) -> bool {
        if let Some(instance) = &self.instance
            && !target.instance_name.eq_ignore_ascii_case(instance)
        {
            return false;
        }
        if let Some(database) = &self.database
            && !target.database_name.eq_ignore_ascii_case(database)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let target = Target::new("prod-01", "sales");

        assert!(TargetSelector::default().matches(&target));
        assert!(
            TargetSelector { instance: Some("PROD-01".into()), database: None }.matches(&target)
        );
        assert!(
            !TargetSelector { instance: None, database: Some("crm".into()) }.matches(&target)
        );
    }
}
