//! Tenant plan tiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription tier that gates which actions a tenant's flows may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// Parse a stored plan name. Unknown names get the most restrictive tier.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pro" | "professional" => PlanTier::Pro,
            "enterprise" => PlanTier::Enterprise,
            _ => PlanTier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant's current plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPlan {
    pub tenant_id: Uuid,
    pub plan: PlanTier,
}

impl TenantPlan {
    pub fn free(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            plan: PlanTier::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_is_lenient() {
        assert_eq!(PlanTier::from_name("Pro"), PlanTier::Pro);
        assert_eq!(PlanTier::from_name(" enterprise "), PlanTier::Enterprise);
        assert_eq!(PlanTier::from_name("platinum"), PlanTier::Free);
        assert_eq!(PlanTier::from_name(""), PlanTier::Free);
    }

    #[test]
    fn test_is_paid() {
        assert!(!PlanTier::Free.is_paid());
        assert!(PlanTier::Pro.is_paid());
        assert!(PlanTier::Enterprise.is_paid());
    }
}
