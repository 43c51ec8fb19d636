//! Data models for sigmahub.
//!
//! Mapped record shapes written to the cache, plus the value types a sync run
//! produces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::range::SyncRange;
use crate::error::{HubError, Result};

// =============================================================================
// Resources
// =============================================================================

/// Remote resource kinds mirrored into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Products,
    /// Derived from sales; there is no remote listing.
    Customers,
    Sales,
    Withdrawals,
    Balances,
}

impl Resource {
    /// All resources, in sync order.
    pub const ALL: &'static [Self] = &[
        Self::Products,
        Self::Customers,
        Self::Sales,
        Self::Withdrawals,
        Self::Balances,
    ];

    /// Resources synced when the caller does not name any.
    pub const DEFAULT_SYNC: &'static [Self] = &[Self::Products, Self::Sales];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Customers => "customers",
            Self::Sales => "sales",
            Self::Withdrawals => "withdrawals",
            Self::Balances => "balances",
        }
    }

    /// Parse a CLI or query-string name (singular or plural).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] for unknown names.
    pub fn from_arg(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "products" | "product" => Ok(Self::Products),
            "customers" | "customer" => Ok(Self::Customers),
            "sales" | "sale" => Ok(Self::Sales),
            "withdrawals" | "withdrawal" => Ok(Self::Withdrawals),
            "balances" | "balance" => Ok(Self::Balances),
            other => Err(HubError::Config(format!(
                "unknown resource '{other}'. Valid resources: products, customers, sales, withdrawals, balances"
            ))),
        }
    }

    /// Whether remote listings of this resource are filtered by date.
    #[must_use]
    pub const fn is_range_scoped(&self) -> bool {
        matches!(self, Self::Sales)
    }

    /// Whether the remote platform exposes a listing for this resource.
    #[must_use]
    pub const fn is_listable(&self) -> bool {
        !matches!(self, Self::Customers)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Status enums
// =============================================================================

/// Local sale status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Approved,
    Pending,
    Refunded,
    Chargeback,
    Rejected,
    Canceled,
    Expired,
}

impl SaleStatus {
    /// Map a remote status; unknown values are treated as pending.
    #[must_use]
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "approved" | "paid" => Self::Approved,
            "refunded" => Self::Refunded,
            "chargeback" | "chargedback" => Self::Chargeback,
            "rejected" | "refused" => Self::Rejected,
            "canceled" | "cancelled" => Self::Canceled,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Pending => "pending",
            Self::Refunded => "refunded",
            Self::Chargeback => "chargeback",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }
}

/// Local payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    Card,
    Boleto,
    Unknown,
}

impl PaymentMethod {
    #[must_use]
    pub fn from_remote(raw: Option<&str>) -> Self {
        match raw.map(|m| m.trim().to_lowercase()).as_deref() {
            Some("pix") => Self::Pix,
            Some("credit_card" | "card") => Self::Card,
            Some("boleto" | "bank_slip") => Self::Boleto,
            _ => Self::Unknown,
        }
    }
}

// =============================================================================
// Mapped records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub external_id: String,
    pub title: String,
    pub price_cents: i64,
    pub currency: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub external_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub external_id: String,
    pub status: SaleStatus,
    pub payment_method: PaymentMethod,
    pub product_id: Option<String>,
    pub customer_id: Option<String>,
    pub gross_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub currency: String,
    pub installments: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub external_id: String,
    pub status: String,
    pub amount_cents: i64,
    pub legal_entity_id: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    /// The legal entity the balance belongs to.
    pub external_id: String,
    pub available_cents: i64,
    pub pending_cents: i64,
    pub currency: String,
}

/// A remote payload mapped into the local schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedRecord {
    Product(ProductRecord),
    Customer(CustomerRecord),
    Sale(SaleRecord),
    Withdrawal(WithdrawalRecord),
    Balance(BalanceRecord),
}

impl MappedRecord {
    #[must_use]
    pub const fn resource(&self) -> Resource {
        match self {
            Self::Product(_) => Resource::Products,
            Self::Customer(_) => Resource::Customers,
            Self::Sale(_) => Resource::Sales,
            Self::Withdrawal(_) => Resource::Withdrawals,
            Self::Balance(_) => Resource::Balances,
        }
    }

    #[must_use]
    pub fn external_id(&self) -> &str {
        match self {
            Self::Product(r) => &r.external_id,
            Self::Customer(r) => &r.external_id,
            Self::Sale(r) => &r.external_id,
            Self::Withdrawal(r) => &r.external_id,
            Self::Balance(r) => &r.external_id,
        }
    }

    /// Status column used by cache filters.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        match self {
            Self::Product(r) => Some(r.status.clone()),
            Self::Sale(r) => Some(r.status.as_str().to_string()),
            Self::Withdrawal(r) => Some(r.status.clone()),
            Self::Customer(_) | Self::Balance(_) => None,
        }
    }

    /// Timestamp used for range queries.
    #[must_use]
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Product(r) => r.created_at.or(r.updated_at),
            Self::Sale(r) => Some(r.created_at),
            Self::Withdrawal(r) => r.requested_at.or(r.updated_at),
            Self::Customer(_) | Self::Balance(_) => None,
        }
    }

    /// The mapped fields as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Json`] if serialization fails.
    pub fn to_payload(&self) -> Result<Value> {
        let value = match self {
            Self::Product(r) => serde_json::to_value(r)?,
            Self::Customer(r) => serde_json::to_value(r)?,
            Self::Sale(r) => serde_json::to_value(r)?,
            Self::Withdrawal(r) => serde_json::to_value(r)?,
            Self::Balance(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }
}

// =============================================================================
// Sync results
// =============================================================================

/// One record that could not be mapped or written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub resource: Resource,
    pub external_id: String,
    pub reason: String,
}

/// Position of a sync run: resource, date window index, and next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub resource: Resource,
    pub window: usize,
    pub page: u32,
}

impl SyncCursor {
    #[must_use]
    pub const fn start_of(resource: Resource) -> Self {
        Self {
            resource,
            window: 0,
            page: 1,
        }
    }
}

/// Summary of one `run_sync` invocation. Returned, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub range: SyncRange,
    pub resources: Vec<Resource>,
    pub fetched: usize,
    pub upserted: usize,
    /// Customers derived from sales and written alongside them.
    pub derived_upserted: usize,
    pub failed: Vec<SyncFailure>,
    pub pages_fetched: usize,
    /// False when the run stopped early on its time budget.
    pub done: bool,
    pub next_cursor: Option<SyncCursor>,
    pub resumed_from: Option<SyncCursor>,
}

impl SyncResult {
    #[must_use]
    pub const fn new(range: SyncRange, resources: Vec<Resource>) -> Self {
        Self {
            range,
            resources,
            fetched: 0,
            upserted: 0,
            derived_upserted: 0,
            failed: Vec::new(),
            pages_fetched: 0,
            done: false,
            next_cursor: None,
            resumed_from: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_defaults_to_pending() {
        assert_eq!(SaleStatus::from_remote("paid"), SaleStatus::Approved);
        assert_eq!(SaleStatus::from_remote("WAITING_PAYMENT"), SaleStatus::Pending);
        assert_eq!(SaleStatus::from_remote("chargeback"), SaleStatus::Chargeback);
        assert_eq!(SaleStatus::from_remote("something-new"), SaleStatus::Pending);
    }

    #[test]
    fn payment_method_mapping() {
        assert_eq!(PaymentMethod::from_remote(Some("credit_card")), PaymentMethod::Card);
        assert_eq!(PaymentMethod::from_remote(Some("PIX")), PaymentMethod::Pix);
        assert_eq!(PaymentMethod::from_remote(Some("crypto")), PaymentMethod::Unknown);
        assert_eq!(PaymentMethod::from_remote(None), PaymentMethod::Unknown);
    }

    #[test]
    fn resource_names_round_trip_through_from_arg() {
        for resource in Resource::ALL {
            assert_eq!(Resource::from_arg(resource.as_str()).unwrap(), *resource);
        }
        assert_eq!(Resource::from_arg("Sale").unwrap(), Resource::Sales);
        assert!(Resource::from_arg("orders").is_err());
    }

    #[test]
    fn sale_payload_serializes_enums_as_snake_case() {
        let record = MappedRecord::Sale(SaleRecord {
            external_id: "s1".into(),
            status: SaleStatus::Approved,
            payment_method: PaymentMethod::Card,
            product_id: None,
            customer_id: None,
            gross_cents: 1000,
            fee_cents: 100,
            net_cents: 900,
            currency: "BRL".into(),
            installments: None,
            created_at: Utc::now(),
            paid_at: None,
            updated_at: None,
        });
        let payload = record.to_payload().unwrap();
        assert_eq!(payload["status"], "approved");
        assert_eq!(payload["payment_method"], "card");
        assert_eq!(record.status().as_deref(), Some("approved"));
    }
}
