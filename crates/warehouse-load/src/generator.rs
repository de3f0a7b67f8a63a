// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Randomized request payloads and identifiers.

use std::fmt::{self, Display};

use rand::{Rng, distributions::Alphanumeric, seq::SliceRandom};
use serde::{Deserialize, Serialize};

const ID_SUFFIX_LEN: usize = 6;

/// Errors returned when drawing test data.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TestDataError {
    /// Sampling from an empty list of values.
    #[error("cannot pick a random element from an empty pool")]
    EmptyPool,
    /// A pool category has no values.
    #[error("the test data category {0} is empty")]
    EmptyCategory(PoolCategory),
    /// The lower bound of a range exceeds the upper bound.
    #[error("invalid range: min {min} is greater than max {max}")]
    InvalidRange {
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },
}

/// The categories of values held by a [`TestDataPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolCategory {
    /// Picker identifiers.
    PickerIds,
    /// SKU codes.
    SkuCodes,
    /// Bin locations.
    BinLocations,
    /// Package order types.
    OrderTypes,
    /// Shipping cities.
    Cities,
    /// Shipping states.
    States,
    /// Shipping countries.
    Countries,
}

impl PoolCategory {
    /// All categories.
    pub const ALL: [PoolCategory; 7] = [
        Self::PickerIds,
        Self::SkuCodes,
        Self::BinLocations,
        Self::OrderTypes,
        Self::Cities,
        Self::States,
        Self::Countries,
    ];
}

impl Display for PoolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolCategory::PickerIds => "picker_ids",
            PoolCategory::SkuCodes => "sku_codes",
            PoolCategory::BinLocations => "bin_locations",
            PoolCategory::OrderTypes => "order_types",
            PoolCategory::Cities => "cities",
            PoolCategory::States => "states",
            PoolCategory::Countries => "countries",
        };
        f.write_str(name)
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

/// The raw, unvalidated form of a [`TestDataPool`], as found in configuration files.
///
/// Categories missing from the file keep their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TestDataPoolRecord {
    /// Picker identifiers.
    pub picker_ids: Vec<String>,
    /// SKU codes.
    pub sku_codes: Vec<String>,
    /// Bin locations.
    pub bin_locations: Vec<String>,
    /// Package order types.
    pub order_types: Vec<String>,
    /// Shipping cities.
    pub cities: Vec<String>,
    /// Shipping states.
    pub states: Vec<String>,
    /// Shipping countries.
    pub countries: Vec<String>,
}

impl Default for TestDataPoolRecord {
    fn default() -> Self {
        Self {
            picker_ids: strings(&[
                "picker-001",
                "picker-002",
                "picker-003",
                "picker-004",
                "picker-005",
            ]),
            sku_codes: strings(&["SKU-001", "SKU-002", "SKU-003", "SKU-004", "SKU-005"]),
            bin_locations: strings(&["A-01-01", "A-01-02", "B-02-01", "B-02-02", "C-03-01"]),
            order_types: strings(&["STANDARD", "PRIORITY", "EXPRESS"]),
            cities: strings(&["New York", "Los Angeles", "Chicago", "Houston", "Phoenix"]),
            states: strings(&["NY", "CA", "IL", "TX", "AZ"]),
            countries: strings(&["USA"]),
        }
    }
}

/// Read-only value pools sampled when building payloads. Every category is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TestDataPoolRecord", into = "TestDataPoolRecord")]
pub struct TestDataPool {
    record: TestDataPoolRecord,
}

impl TryFrom<TestDataPoolRecord> for TestDataPool {
    type Error = TestDataError;

    fn try_from(record: TestDataPoolRecord) -> Result<Self, Self::Error> {
        let pool = Self { record };
        if let Some(empty) = PoolCategory::ALL
            .into_iter()
            .find(|category| pool.values(*category).is_empty())
        {
            return Err(TestDataError::EmptyCategory(empty));
        }
        Ok(pool)
    }
}

impl From<TestDataPool> for TestDataPoolRecord {
    fn from(pool: TestDataPool) -> Self {
        pool.record
    }
}

impl TestDataPool {
    /// The values of one category.
    pub fn values(&self, category: PoolCategory) -> &[String] {
        let record = &self.record;
        match category {
            PoolCategory::PickerIds => &record.picker_ids,
            PoolCategory::SkuCodes => &record.sku_codes,
            PoolCategory::BinLocations => &record.bin_locations,
            PoolCategory::OrderTypes => &record.order_types,
            PoolCategory::Cities => &record.cities,
            PoolCategory::States => &record.states,
            PoolCategory::Countries => &record.countries,
        }
    }

    /// Picks a value of `category` uniformly at random.
    pub fn pick<R: Rng + ?Sized>(
        &self,
        category: PoolCategory,
        rng: &mut R,
    ) -> Result<String, TestDataError> {
        random_element(self.values(category), rng)
            .cloned()
            .map_err(|_| TestDataError::EmptyCategory(category))
    }

    /// Picker identifiers, in configuration order.
    pub fn picker_ids(&self) -> &[String] {
        self.values(PoolCategory::PickerIds)
    }
}

/// Picks an element of `values` uniformly at random.
pub fn random_element<'a, T, R: Rng + ?Sized>(
    values: &'a [T],
    rng: &mut R,
) -> Result<&'a T, TestDataError> {
    values.choose(rng).ok_or(TestDataError::EmptyPool)
}

/// Returns an integer drawn uniformly from the inclusive range `[min, max]`.
pub fn random_int<R: Rng + ?Sized>(min: u32, max: u32, rng: &mut R) -> Result<u32, TestDataError> {
    if min > max {
        return Err(TestDataError::InvalidRange { min, max });
    }
    Ok(rng.gen_range(min..=max))
}

/// One line of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageItem {
    /// The SKU code of the item.
    pub sku_code: String,
    /// Number of units.
    pub quantity: u32,
}

/// Body of a package creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePayload {
    /// Order type, e.g. `STANDARD`.
    pub order_type: String,
    /// Street line of the shipping address.
    pub street: String,
    /// Shipping city.
    pub city: String,
    /// Shipping state.
    pub state: String,
    /// Shipping postal code.
    pub postal_code: String,
    /// Shipping country.
    pub country: String,
    /// The package contents.
    pub items: Vec<PackageItem>,
}

/// Body of a confirm-pick request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickConfirmationPayload {
    /// The SKU code picked.
    pub sku_code: String,
    /// Number of units picked.
    pub quantity: u32,
    /// The bin the units were picked from.
    pub bin_location: String,
}

impl PickConfirmationPayload {
    /// Turns the confirmation into a partial pick of one unit fewer, never below one unit.
    pub fn into_partial(mut self) -> Self {
        self.quantity = self.quantity.saturating_sub(1).max(1);
        self
    }
}

fn random_items<R: Rng + ?Sized>(
    pool: &TestDataPool,
    count: u32,
    max_quantity: u32,
    rng: &mut R,
) -> Result<Vec<PackageItem>, TestDataError> {
    (0..count)
        .map(|_| {
            Ok(PackageItem {
                sku_code: pool.pick(PoolCategory::SkuCodes, rng)?,
                quantity: random_int(1, max_quantity, rng)?,
            })
        })
        .collect()
}

/// Builds a package with 1 to 3 items of 1 to 5 units each and a random shipping address.
pub fn generate_package_payload<R: Rng + ?Sized>(
    pool: &TestDataPool,
    rng: &mut R,
) -> Result<PackagePayload, TestDataError> {
    let item_count = random_int(1, 3, rng)?;
    Ok(PackagePayload {
        order_type: pool.pick(PoolCategory::OrderTypes, rng)?,
        street: format!("{} Test Street", random_int(1, 9999, rng)?),
        city: pool.pick(PoolCategory::Cities, rng)?,
        state: pool.pick(PoolCategory::States, rng)?,
        postal_code: random_int(10_000, 99_999, rng)?.to_string(),
        country: pool.pick(PoolCategory::Countries, rng)?,
        items: random_items(pool, item_count, 5, rng)?,
    })
}

/// Appends 1 to 3 further items of 1 to 3 units each.
pub fn add_extra_items<R: Rng + ?Sized>(
    payload: &mut PackagePayload,
    pool: &TestDataPool,
    rng: &mut R,
) -> Result<(), TestDataError> {
    let extra = random_int(1, 3, rng)?;
    payload.items.extend(random_items(pool, extra, 3, rng)?);
    Ok(())
}

/// Builds a pick confirmation of 1 to 3 units.
pub fn generate_pick_confirmation_payload<R: Rng + ?Sized>(
    pool: &TestDataPool,
    rng: &mut R,
) -> Result<PickConfirmationPayload, TestDataError> {
    Ok(PickConfirmationPayload {
        sku_code: pool.pick(PoolCategory::SkuCodes, rng)?,
        quantity: random_int(1, 3, rng)?,
        bin_location: pool.pick(PoolCategory::BinLocations, rng)?,
    })
}

/// Returns `<prefix>-<epoch millis>-<random suffix>`.
pub fn generate_id<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_lowercase())
        .collect();
    format!("{prefix}-{}-{suffix}", epoch_millis())
}

/// A synthetic order identifier.
pub fn generate_order_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    generate_id("ord", rng)
}

/// A synthetic pick-list identifier.
pub fn generate_pick_list_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    generate_id("pl", rng)
}

/// Milliseconds since the Unix epoch, used to make synthetic identifiers unique.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn random_element_of_singleton_returns_it() {
        let values = ["only"];
        let mut rng = rng();
        for _ in 0..10 {
            assert_eq!(random_element(&values, &mut rng), Ok(&"only"));
        }
    }

    #[test]
    fn random_element_of_empty_pool_fails() {
        let values: [u8; 0] = [];
        assert_eq!(
            random_element(&values, &mut rng()),
            Err(TestDataError::EmptyPool)
        );
    }

    #[test]
    fn random_int_is_inclusive_and_rejects_inverted_ranges() {
        let mut rng = rng();
        let draws: Vec<u32> = (0..500)
            .map(|_| random_int(1, 3, &mut rng))
            .collect::<Result<_, _>>()
            .expect("valid range");
        assert!(draws.iter().all(|value| (1..=3).contains(value)));
        assert!(draws.contains(&1) && draws.contains(&3));

        assert_eq!(random_int(7, 7, &mut rng), Ok(7));
        assert_eq!(
            random_int(5, 2, &mut rng),
            Err(TestDataError::InvalidRange { min: 5, max: 2 })
        );
    }

    #[test]
    fn package_payloads_respect_item_bounds() {
        let pool = TestDataPool::default();
        let mut rng = rng();
        for _ in 0..200 {
            let payload = generate_package_payload(&pool, &mut rng).expect("default pool");
            assert!((1..=3).contains(&payload.items.len()));
            assert!(payload.items.iter().all(|item| (1..=5).contains(&item.quantity)));
            assert!(payload.street.ends_with(" Test Street"));
            let postal: u32 = payload.postal_code.parse().expect("numeric postal code");
            assert!((10_000..=99_999).contains(&postal));
            assert!(pool.values(PoolCategory::Cities).contains(&payload.city));
            assert_eq!(payload.country, "USA");
        }
    }

    #[test]
    fn package_payload_serializes_in_camel_case() {
        let payload = PackagePayload {
            order_type: "STANDARD".to_owned(),
            street: "12 Test Street".to_owned(),
            city: "Chicago".to_owned(),
            state: "IL".to_owned(),
            postal_code: "60601".to_owned(),
            country: "USA".to_owned(),
            items: vec![PackageItem {
                sku_code: "SKU-003".to_owned(),
                quantity: 2,
            }],
        };
        let json = serde_json::to_value(&payload).expect("serializable");
        assert_eq!(json["orderType"], "STANDARD");
        assert_eq!(json["postalCode"], "60601");
        assert_eq!(json["items"][0]["skuCode"], "SKU-003");
    }

    #[test]
    fn extra_items_extend_the_package() {
        let pool = TestDataPool::default();
        let mut rng = rng();
        let mut payload = generate_package_payload(&pool, &mut rng).expect("default pool");
        let before = payload.items.len();
        add_extra_items(&mut payload, &pool, &mut rng).expect("default pool");
        let added = &payload.items[before..];
        assert!((1..=3).contains(&added.len()));
        assert!(added.iter().all(|item| (1..=3).contains(&item.quantity)));
    }

    #[test]
    fn pick_confirmations_have_small_quantities() {
        let pool = TestDataPool::default();
        let mut rng = rng();
        for _ in 0..200 {
            let payload = generate_pick_confirmation_payload(&pool, &mut rng).expect("default pool");
            assert!((1..=3).contains(&payload.quantity));
            assert!(pool.values(PoolCategory::BinLocations).contains(&payload.bin_location));
        }
    }

    #[test]
    fn partial_pick_never_drops_below_one() {
        let payload = PickConfirmationPayload {
            sku_code: "SKU-001".to_owned(),
            quantity: 3,
            bin_location: "A-01-01".to_owned(),
        };
        assert_eq!(payload.clone().into_partial().quantity, 2);
        let single = PickConfirmationPayload {
            quantity: 1,
            ..payload
        };
        assert_eq!(single.into_partial().quantity, 1);
    }

    #[test]
    fn identifiers_carry_prefix_timestamp_and_suffix() {
        let mut rng = rng();
        let order_id = generate_order_id(&mut rng);
        let parts: Vec<&str> = order_id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ord");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), ID_SUFFIX_LEN);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );

        assert!(generate_pick_list_id(&mut rng).starts_with("pl-"));
        assert_ne!(generate_order_id(&mut rng), generate_order_id(&mut rng));
    }

    #[test]
    fn pool_with_empty_category_is_rejected() {
        let record = TestDataPoolRecord {
            bin_locations: vec![],
            ..Default::default()
        };
        assert_eq!(
            TestDataPool::try_from(record),
            Err(TestDataError::EmptyCategory(PoolCategory::BinLocations))
        );
    }

    #[test]
    fn pool_deserialization_keeps_defaults_for_missing_categories() {
        let pool: TestDataPool =
            serde_json::from_str(r#"{"picker_ids": ["picker-100"]}"#).expect("valid pool");
        assert_eq!(pool.picker_ids(), ["picker-100".to_owned()]);
        assert_eq!(pool.values(PoolCategory::SkuCodes).len(), 5);

        let empty: Result<TestDataPool, _> = serde_json::from_str(r#"{"countries": []}"#);
        assert!(empty.is_err());
    }
}
