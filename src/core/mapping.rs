//! Remote payload to local schema mapping.
//!
//! Mapping is strict about shape: a payload that is not an object, has no id,
//! carries an amount or timestamp that cannot be parsed, or (for sales) has
//! no timestamp at all is a [`HubError::Mapping`] for that record only.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::core::models::{
    BalanceRecord, CustomerRecord, MappedRecord, PaymentMethod, ProductRecord, Resource,
    SaleRecord, SaleStatus, WithdrawalRecord,
};
use crate::error::{HubError, Result};

const DEFAULT_CURRENCY: &str = "BRL";
const FALLBACK_CUSTOMER_NAME: &str = "Cliente sem nome";

/// A mapped record plus any records derived from the same payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapped {
    pub record: MappedRecord,
    /// Written before `record` (the customer embedded in a sale).
    pub derived: Vec<MappedRecord>,
}

/// Best-effort id of a payload, used to label failures.
#[must_use]
pub fn external_id_of(payload: &Value) -> Option<String> {
    let obj = payload.as_object()?;
    first_string(obj, &["id", "uuid", "external_id", "sale_id", "legal_entity_id"])
}

/// Map one remote payload of the given resource.
///
/// # Errors
///
/// Returns [`HubError::Mapping`] when the payload is malformed.
pub fn map_record(resource: Resource, payload: &Value) -> Result<Mapped> {
    let ctx = Ctx::new(resource, payload)?;
    let record = match resource {
        Resource::Products => MappedRecord::Product(map_product(&ctx)?),
        Resource::Customers => MappedRecord::Customer(map_customer(&ctx, ctx.obj)?),
        Resource::Sales => return map_sale(&ctx),
        Resource::Withdrawals => MappedRecord::Withdrawal(map_withdrawal(&ctx)?),
        Resource::Balances => MappedRecord::Balance(map_balance(&ctx)?),
    };
    Ok(Mapped {
        record,
        derived: Vec::new(),
    })
}

struct Ctx<'a> {
    resource: Resource,
    obj: &'a Map<String, Value>,
    external_id: String,
}

impl<'a> Ctx<'a> {
    fn new(resource: Resource, payload: &'a Value) -> Result<Self> {
        let Some(obj) = payload.as_object() else {
            return Err(HubError::Mapping {
                resource: resource.to_string(),
                external_id: "<unknown>".to_string(),
                reason: format!("expected a JSON object, got {}", kind_of(payload)),
            });
        };
        let keys: &[&str] = match resource {
            Resource::Balances => &["legal_entity_id", "id"],
            Resource::Sales => &["id", "uuid", "sale_id", "external_id"],
            _ => &["id", "uuid", "external_id"],
        };
        let external_id = first_string(obj, keys).ok_or_else(|| HubError::Mapping {
            resource: resource.to_string(),
            external_id: "<unknown>".to_string(),
            reason: "missing id".to_string(),
        })?;
        Ok(Self {
            resource,
            obj,
            external_id,
        })
    }

    fn fail(&self, reason: impl Into<String>) -> HubError {
        HubError::Mapping {
            resource: self.resource.to_string(),
            external_id: self.external_id.clone(),
            reason: reason.into(),
        }
    }

    /// The first non-null value among `keys`, in `obj`.
    fn pick<'o, 'k>(obj: &'o Map<String, Value>, keys: &[&'k str]) -> Option<(&'k str, &'o Value)> {
        keys.iter()
            .find_map(|key| obj.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
    }

    fn cents(&self, obj: &Map<String, Value>, cents_keys: &[&str], major_keys: &[&str]) -> Result<Option<i64>> {
        if let Some((key, value)) = Self::pick(obj, cents_keys) {
            return parse_cents(value, true).map(Some).ok_or_else(|| {
                self.fail(format!("field '{key}' is not a valid amount: {value}"))
            });
        }
        if let Some((key, value)) = Self::pick(obj, major_keys) {
            return parse_cents(value, false).map(Some).ok_or_else(|| {
                self.fail(format!("field '{key}' is not a valid amount: {value}"))
            });
        }
        Ok(None)
    }

    fn timestamp(&self, obj: &Map<String, Value>, keys: &[&str]) -> Result<Option<DateTime<Utc>>> {
        match Self::pick(obj, keys) {
            None => Ok(None),
            Some((_, Value::String(s))) if s.trim().is_empty() => Ok(None),
            Some((key, value)) => parse_timestamp(value)
                .map(Some)
                .ok_or_else(|| self.fail(format!("field '{key}' is not a valid timestamp: {value}"))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn nested<'v>(obj: &'v Map<String, Value>, key: &str) -> Option<&'v Map<String, Value>> {
    obj.get(key).and_then(Value::as_object)
}

/// Parse an amount into integer cents.
///
/// Values from `*_cents` fields are already cents. Other integers are taken as
/// cents too, decimals and decimal strings as major units.
fn parse_cents(value: &Value, already_cents: bool) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if already_cents {
                None
            } else {
                n.as_f64().and_then(major_to_cents)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Some(0);
            }
            let normalized = if trimmed.contains(',') && trimmed.contains('.') {
                trimmed.replace('.', "").replace(',', ".")
            } else {
                trimmed.replace(',', ".")
            };
            if normalized.contains('.') {
                if already_cents {
                    return None;
                }
                normalized.parse::<f64>().ok().and_then(major_to_cents)
            } else {
                normalized.parse::<i64>().ok()
            }
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn major_to_cents(major: f64) -> Option<i64> {
    let cents = (major * 100.0).round();
    (cents.is_finite() && cents.abs() < 9.0e15).then_some(cents as i64)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 1_000_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(naive.and_utc());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(naive.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        }
        _ => None,
    }
}

fn currency(obj: &Map<String, Value>) -> String {
    first_string(obj, &["currency", "price_currency"])
        .or_else(|| nested(obj, "amount").and_then(|a| first_string(a, &["currency"])))
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
}

fn map_product(ctx: &Ctx<'_>) -> Result<ProductRecord> {
    let obj = ctx.obj;
    let price = match ctx.cents(obj, &["price_cents"], &["price", "price_amount"])? {
        Some(cents) => Some(cents),
        None => match nested(obj, "amount") {
            Some(amount) => ctx.cents(amount, &[], &["price", "value"])?,
            None => None,
        },
    };
    Ok(ProductRecord {
        external_id: ctx.external_id.clone(),
        title: first_string(obj, &["title", "name", "product_name"])
            .unwrap_or_else(|| "Produto sem título".to_string()),
        price_cents: price.unwrap_or(0),
        currency: currency(obj),
        status: first_string(obj, &["status", "state"])
            .map_or_else(|| "active".to_string(), |s| s.to_lowercase()),
        created_at: ctx.timestamp(obj, &["created_at", "createdAt"])?,
        updated_at: ctx.timestamp(obj, &["updated_at", "updatedAt"])?,
    })
}

fn map_customer(ctx: &Ctx<'_>, obj: &Map<String, Value>) -> Result<CustomerRecord> {
    let external_id = first_string(obj, &["id", "external_id", "customer_id", "user_id"])
        .ok_or_else(|| ctx.fail("customer without id"))?;
    let full_name = match (first_string(obj, &["first_name"]), first_string(obj, &["last_name"])) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(first), None) => Some(first),
        (None, last) => last,
    };
    Ok(CustomerRecord {
        external_id,
        name: first_string(obj, &["name", "full_name"])
            .or(full_name)
            .unwrap_or_else(|| FALLBACK_CUSTOMER_NAME.to_string()),
        email: first_string(obj, &["email", "contact_email", "customer_email"]),
        phone: first_string(obj, &["phone", "mobile", "phone_number"]),
        country: first_string(obj, &["country", "country_code"]),
    })
}

/// Customer embedded in a sale, or built from flat `customer_*` fields.
fn derived_customer(ctx: &Ctx<'_>, customer_id: Option<&str>) -> Option<CustomerRecord> {
    let obj = ctx.obj;
    if let Some(embedded) = nested(obj, "customer").or_else(|| nested(obj, "buyer")) {
        let mut embedded = embedded.clone();
        if first_string(&embedded, &["id", "external_id", "customer_id", "user_id"]).is_none() {
            embedded.insert("id".to_string(), Value::String(customer_id?.to_string()));
        }
        return map_customer(ctx, &embedded).ok();
    }
    let id = customer_id?;
    Some(CustomerRecord {
        external_id: id.to_string(),
        name: first_string(obj, &["customer_name", "client_name"])
            .unwrap_or_else(|| FALLBACK_CUSTOMER_NAME.to_string()),
        email: first_string(obj, &["customer_email", "client_email"]),
        phone: first_string(obj, &["customer_phone", "client_phone"]),
        country: first_string(obj, &["customer_country"]),
    })
}

fn map_sale(ctx: &Ctx<'_>) -> Result<Mapped> {
    let obj = ctx.obj;
    let payment = nested(obj, "payment");
    let amount = nested(obj, "amount");

    let created_at = ctx.timestamp(obj, &["created_at", "createdAt", "date"])?;
    let paid_at = ctx.timestamp(obj, &["paid_at", "approved_at"])?;
    let updated_at = ctx.timestamp(obj, &["updated_at", "updatedAt"])?;
    let occurred_at = created_at
        .or(paid_at)
        .or(updated_at)
        .ok_or_else(|| ctx.fail("sale has no timestamp"))?;

    let mut gross = ctx.cents(
        obj,
        &["gross_cents", "total_amount_cents", "amount_cents"],
        &["amount_gross", "gross_amount", "total_amount", "amount_total"],
    )?;
    if gross.is_none() {
        if let Some(payment) = payment {
            gross = ctx.cents(payment, &["charge_amount_cents"], &["charge_amount", "amount"])?;
        }
    }
    if gross.is_none() {
        if let Some(amount) = amount {
            gross = ctx.cents(amount, &[], &["gross", "total"])?;
        }
    }
    let fee = match ctx.cents(obj, &["fee_cents"], &["fee_amount", "amount_fee"])? {
        Some(fee) => Some(fee),
        None => match payment {
            Some(payment) => ctx.cents(payment, &["fee_cents"], &["fee"])?,
            None => None,
        },
    };
    let net = match ctx.cents(obj, &["net_cents"], &["net_amount", "amount_net", "amount_received"])? {
        Some(net) => Some(net),
        None => match payment {
            Some(payment) => ctx.cents(payment, &["net_amount_cents"], &["net_amount"])?,
            None => None,
        },
    };
    let gross = gross.unwrap_or(0);
    let fee = fee.unwrap_or(0);

    let product_id = first_string(obj, &["product_id", "product_external_id"])
        .or_else(|| nested(obj, "product").and_then(|p| first_string(p, &["id"])));
    let customer_id = first_string(obj, &["customer_id", "client_id", "user_id"])
        .or_else(|| nested(obj, "customer").and_then(|c| first_string(c, &["id"])));

    let payment_method = first_string(obj, &["payment_method", "method"])
        .or_else(|| payment.and_then(|p| first_string(p, &["method", "payment_method"])));
    let installments = obj
        .get("installments")
        .or_else(|| payment.and_then(|p| p.get("installments")))
        .and_then(Value::as_i64);

    let customer = derived_customer(ctx, customer_id.as_deref());

    let sale = SaleRecord {
        external_id: ctx.external_id.clone(),
        status: SaleStatus::from_remote(
            &first_string(obj, &["status", "payment_status", "state"]).unwrap_or_default(),
        ),
        payment_method: PaymentMethod::from_remote(payment_method.as_deref()),
        product_id,
        customer_id: customer.as_ref().map(|c| c.external_id.clone()).or(customer_id),
        gross_cents: gross,
        fee_cents: fee,
        net_cents: net.unwrap_or(gross - fee),
        currency: currency(obj),
        installments,
        created_at: occurred_at,
        paid_at,
        updated_at,
    };

    Ok(Mapped {
        record: MappedRecord::Sale(sale),
        derived: customer.into_iter().map(MappedRecord::Customer).collect(),
    })
}

fn map_withdrawal(ctx: &Ctx<'_>) -> Result<WithdrawalRecord> {
    let obj = ctx.obj;
    Ok(WithdrawalRecord {
        external_id: ctx.external_id.clone(),
        status: first_string(obj, &["status", "state"])
            .map_or_else(|| "pending".to_string(), |s| s.to_lowercase()),
        amount_cents: ctx.cents(obj, &["amount_cents"], &["amount", "value"])?.unwrap_or(0),
        legal_entity_id: first_string(obj, &["legal_entity_id"]),
        requested_at: ctx.timestamp(obj, &["requested_at", "created_at", "createdAt"])?,
        updated_at: ctx.timestamp(obj, &["updated_at", "updatedAt"])?,
    })
}

fn map_balance(ctx: &Ctx<'_>) -> Result<BalanceRecord> {
    let obj = ctx.obj;
    Ok(BalanceRecord {
        external_id: ctx.external_id.clone(),
        available_cents: ctx.cents(obj, &["available_cents"], &["available"])?.unwrap_or(0),
        pending_cents: ctx.cents(obj, &["pending_cents"], &["pending"])?.unwrap_or(0),
        currency: currency(obj),
    })
}
