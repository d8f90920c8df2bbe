use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type MaterialId = String;

/// Material quantities keyed by material id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialBundle(BTreeMap<MaterialId, f64>);

impl MaterialBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, material: impl Into<MaterialId>, quantity: f64) -> Self {
        self.add(material, quantity);
        self
    }

    pub fn add(&mut self, material: impl Into<MaterialId>, quantity: f64) {
        *self.0.entry(material.into()).or_insert(0.0) += quantity;
    }

    pub fn add_scaled(&mut self, other: &MaterialBundle, scale: f64) {
        for (material, &quantity) in other.0.iter() {
            *self.0.entry(material.clone()).or_insert(0.0) += quantity * scale;
        }
    }

    pub fn scaled(&self, scale: f64) -> Self {
        Self(
            self.0
                .iter()
                .map(|(material, &quantity)| (material.clone(), quantity * scale))
                .collect(),
        )
    }

    pub fn get(&self, material: &str) -> f64 {
        self.0.get(material).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0
            .iter()
            .map(|(material, &quantity)| (material.as_str(), quantity))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<MaterialId>> FromIterator<(K, f64)> for MaterialBundle {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut bundle = Self::new();
        for (material, quantity) in iter {
            bundle.add(material, quantity);
        }
        bundle
    }
}

/// Anything that can quote a gold price for a material by name.
pub trait PriceSource {
    fn price_of(&self, material: &str) -> Option<f64>;
}

impl PriceSource for BTreeMap<String, f64> {
    fn price_of(&self, material: &str) -> Option<f64> {
        self.get(material).copied()
    }
}

impl PriceSource for HashMap<String, f64> {
    fn price_of(&self, material: &str) -> Option<f64> {
        self.get(material).copied()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CostModelError {
    #[error("price of {material} must be finite and non-negative (got {value})")]
    InvalidPrice { material: MaterialId, value: f64 },
    #[error("no price available for {material}")]
    MissingPrice { material: MaterialId },
}

/// A snapshot of material prices used for one evaluation or ranking call.
///
/// Excluded materials keep showing up in quantity totals but are charged
/// zero gold, which is how "growth materials" are left out of the cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostModel {
    prices: BTreeMap<MaterialId, f64>,
    excluded: BTreeSet<MaterialId>,
}

impl CostModel {
    /// Create a cost model with validation.
    pub fn new<K, I>(prices: I) -> Result<Self, CostModelError>
    where
        K: Into<MaterialId>,
        I: IntoIterator<Item = (K, f64)>,
    {
        let mut model = Self::default();
        for (material, price) in prices {
            model.set_price(material, price)?;
        }
        Ok(model)
    }

    /// Read the price of every listed material once from `source`.
    pub fn snapshot<S, M>(source: &S, materials: M) -> Result<Self, CostModelError>
    where
        S: PriceSource + ?Sized,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        let mut model = Self::default();
        for material in materials {
            let material = material.as_ref();
            let price = source
                .price_of(material)
                .ok_or_else(|| CostModelError::MissingPrice {
                    material: material.to_string(),
                })?;
            model.set_price(material, price)?;
        }
        Ok(model)
    }

    fn validate_price(material: &str, price: f64) -> Result<(), CostModelError> {
        if !price.is_finite() || price < 0.0 {
            return Err(CostModelError::InvalidPrice {
                material: material.to_string(),
                value: price,
            });
        }
        Ok(())
    }

    /// Validate a new price and store it, replacing any earlier quote.
    pub fn set_price(
        &mut self,
        material: impl Into<MaterialId>,
        price: f64,
    ) -> Result<(), CostModelError> {
        let material = material.into();
        Self::validate_price(&material, price)?;
        self.prices.insert(material, price);
        Ok(())
    }

    pub fn exclude(&mut self, material: impl Into<MaterialId>) {
        self.excluded.insert(material.into());
    }

    pub fn include(&mut self, material: &str) {
        self.excluded.remove(material);
    }

    pub fn is_excluded(&self, material: &str) -> bool {
        self.excluded.contains(material)
    }

    /// The gold charged per unit of `material`.
    pub fn price(&self, material: &str) -> Result<f64, CostModelError> {
        if self.is_excluded(material) {
            return Ok(0.0);
        }
        self.prices
            .get(material)
            .copied()
            .ok_or_else(|| CostModelError::MissingPrice {
                material: material.to_string(),
            })
    }

    pub fn bundle_cost(&self, bundle: &MaterialBundle) -> Result<f64, CostModelError> {
        let mut total = 0.0;
        for (material, quantity) in bundle.iter() {
            if quantity == 0.0 {
                continue;
            }
            total += quantity * self.price(material)?;
        }
        Ok(total)
    }
}
