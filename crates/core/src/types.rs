use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A registered car together with its owner's contact details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarWithOwner {
    pub id: i64,
    pub vin: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year_of_manufacture: i64,
    pub owner_id: i64,
    pub owner_name: String,
    pub owner_email: Option<String>,
}

/// One insurance coverage period for a car. Both boundary dates are
/// inclusive and `start_date <= end_date` holds for every stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyPeriod {
    pub id: i64,
    pub car_id: i64,
    pub provider: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_processed: bool,
}

/// A damage claim filed against a car.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: i64,
    pub car_id: i64,
    pub claim_date: NaiveDate,
    pub description: String,
    pub amount: f64,
}

/// Flat projection of a policy that is a candidate for expiry
/// notification. The car model is joined in by the store so the alert can
/// be built without a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringPolicy {
    pub id: i64,
    pub provider: String,
    pub end_date: NaiveDate,
    pub car_model: Option<String>,
}
