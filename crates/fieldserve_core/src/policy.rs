//! SLA and Service policy models.
//!
//! Scope filters (product, category, country/state/city) are nullable,
//! null meaning wildcard. Service policy rules are a tagged sum type per
//! policy type, with a generic fallback for types the engine does not
//! interpret, serialized in the store's `{policy_type, rules}` shape.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{LocationId, OrganizationId, PolicyId, ProductId, TicketPriority};

// ============================================================================
// SLA policies
// ============================================================================

/// What the SLA clock measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaType {
    /// Time to first response
    FirstResponse,
    /// Time to assign an engineer
    Assignment,
    /// Time to resolve
    Resolution,
    /// Time to reach the customer location
    OnSite,
}

/// Daily business-hours window, "HH:MM" local times. Carried so a real
/// business calendar can be plugged in without a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessWindow {
    pub start: String,
    pub end: String,
}

/// An SLA target scoped to an organization and optional product/location
/// filters. Within one organization and SLA type many policies may match a
/// ticket; the resolver picks exactly one by specificity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub id: PolicyId,
    pub organization_id: OrganizationId,

    // Scope (None = wildcard)
    #[serde(default)]
    pub product_category: Option<String>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub country_id: Option<LocationId>,
    #[serde(default)]
    pub state_id: Option<LocationId>,
    #[serde(default)]
    pub city_id: Option<LocationId>,

    pub sla_type: SlaType,
    /// Target time in hours.
    pub target_hours: i64,

    /// Per-priority replacement for `target_hours`.
    #[serde(default)]
    pub priority_overrides: HashMap<TicketPriority, i64>,

    #[serde(default)]
    pub business_hours_only: bool,
    #[serde(default)]
    pub business_hours: BTreeMap<String, BusinessWindow>,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl SlaPolicy {
    /// A policy with no scope filters at all: the global fallback.
    pub fn is_global(&self) -> bool {
        self.product_id.is_none()
            && self.product_category.is_none()
            && self.country_id.is_none()
            && self.state_id.is_none()
            && self.city_id.is_none()
    }
}

// ============================================================================
// Service policies
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarrantyRules {
    #[serde(default = "default_warranty_months")]
    pub warranty_period_months: u32,
}

fn default_warranty_months() -> u32 {
    12
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeableRules {
    /// Conditions under which service is charged, e.g. "out_of_warranty".
    #[serde(default)]
    pub charge_if: Vec<String>,
    /// Conditions under which service is free, e.g. "in_warranty".
    #[serde(default)]
    pub free_if: Vec<String>,
    /// Pass-through pricing table for the billing layer.
    #[serde(default)]
    pub pricing: serde_json::Value,
}

/// Typed rules per service policy type. Several policies of different types
/// are expected to coexist on a ticket and are composed, not chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRules {
    Warranty(WarrantyRules),
    Chargeable(ChargeableRules),
    /// Parts sourcing/approval rules, passed through uninterpreted.
    Parts(serde_json::Value),
    /// Policy types this engine does not interpret.
    Other {
        policy_type: String,
        rules: serde_json::Value,
    },
}

impl ServiceRules {
    /// Build from the store's `(policy_type, rules)` pair. Unrecognized
    /// types land in `Other`; recognized types with missing fields take
    /// their documented defaults.
    pub fn from_parts(policy_type: &str, rules: serde_json::Value) -> Self {
        match policy_type {
            "warranty" => ServiceRules::Warranty(
                serde_json::from_value(rules).unwrap_or_default(),
            ),
            "chargeable" => ServiceRules::Chargeable(
                serde_json::from_value(rules).unwrap_or_default(),
            ),
            "parts" => ServiceRules::Parts(rules),
            other => ServiceRules::Other {
                policy_type: other.to_string(),
                rules,
            },
        }
    }

    pub fn policy_type(&self) -> &str {
        match self {
            ServiceRules::Warranty(_) => "warranty",
            ServiceRules::Chargeable(_) => "chargeable",
            ServiceRules::Parts(_) => "parts",
            ServiceRules::Other { policy_type, .. } => policy_type,
        }
    }

    fn rules_value(&self) -> serde_json::Value {
        match self {
            ServiceRules::Warranty(r) => serde_json::to_value(r).unwrap_or_default(),
            ServiceRules::Chargeable(r) => serde_json::to_value(r).unwrap_or_default(),
            ServiceRules::Parts(v) => v.clone(),
            ServiceRules::Other { rules, .. } => rules.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawRules {
    policy_type: String,
    #[serde(default)]
    rules: serde_json::Value,
}

impl Serialize for ServiceRules {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawRules {
            policy_type: self.policy_type().to_string(),
            rules: self.rules_value(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServiceRules {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawRules::deserialize(deserializer)?;
        Ok(ServiceRules::from_parts(&raw.policy_type, raw.rules))
    }
}

/// Service rules (warranty/chargeable/parts/...) scoped like an SLA policy.
/// Multiple may apply to one ticket simultaneously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePolicy {
    pub id: PolicyId,
    pub organization_id: OrganizationId,

    #[serde(flatten)]
    pub rules: ServiceRules,

    // Scope (None = wildcard)
    #[serde(default)]
    pub product_category: Option<String>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub country_id: Option<LocationId>,
    #[serde(default)]
    pub state_id: Option<LocationId>,
    #[serde(default)]
    pub city_id: Option<LocationId>,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

// ============================================================================
// PolicySet snapshot
// ============================================================================

/// Immutable snapshot of one organization's active policies, loaded once per
/// engine invocation so every decision in it sees the same facts.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub sla: Vec<SlaPolicy>,
    pub service: Vec<ServicePolicy>,
}

impl PolicySet {
    pub fn new(sla: Vec<SlaPolicy>, service: Vec<ServicePolicy>) -> Self {
        Self { sla, service }
    }
}
