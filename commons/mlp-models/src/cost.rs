//! Cost model: maps a resource class and an elapsed duration to money.
//!
//! All amounts are integer micro-units so that repeated incremental charges
//! never drift from the charge for the whole window by more than one micro.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::enums::UnknownVariant;

const MILLIS_PER_MINUTE: u128 = 60_000;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const MICROS_PER_UNIT: u64 = 1_000_000;

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    /// Lossy conversion for display and JSON views.
    pub fn as_units(self) -> f64 {
        self.0 as f64 / Self::MICROS_PER_UNIT as f64
    }

    pub fn saturating_mul(self, n: u64) -> Self {
        Self(self.0.saturating_mul(n))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0 / Self::MICROS_PER_UNIT,
            self.0 % Self::MICROS_PER_UNIT
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GpuTier {
    #[serde(rename = "tesla-v100")]
    TeslaV100,
    #[serde(rename = "tesla-t4")]
    TeslaT4,
    #[serde(rename = "rtx-4090")]
    Rtx4090,
}

impl GpuTier {
    pub const ALL: [GpuTier; 3] =
        [GpuTier::TeslaV100, GpuTier::TeslaT4, GpuTier::Rtx4090];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TeslaV100 => "tesla-v100",
            Self::TeslaT4 => "tesla-t4",
            Self::Rtx4090 => "rtx-4090",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::TeslaV100 => "Tesla V100 GPU, 8 CPU cores, 32GB RAM",
            Self::TeslaT4 => "Tesla T4 GPU, 4 CPU cores, 16GB RAM",
            Self::Rtx4090 => "RTX 4090 GPU, 6 CPU cores, 24GB RAM",
        }
    }
}

impl std::str::FromStr for GpuTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GpuTier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "gpu type",
                value: s.to_string(),
            })
    }
}

/// Billing class of a notebook sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Cpu,
    Gpu(GpuTier),
}

impl RateClass {
    /// Absent or unknown GPU tags bill at the CPU rate.
    pub fn from_gpu_type(gpu_type: Option<&str>) -> Self {
        gpu_type
            .and_then(|t| t.parse::<GpuTier>().ok())
            .map(RateClass::Gpu)
            .unwrap_or(RateClass::Cpu)
    }

    pub fn rate_per_minute(&self) -> Money {
        match self {
            RateClass::Cpu => Money::from_micros(5_000),
            RateClass::Gpu(GpuTier::TeslaV100) => Money::from_micros(50_000),
            RateClass::Gpu(GpuTier::TeslaT4) => Money::from_micros(20_000),
            RateClass::Gpu(GpuTier::Rtx4090) => Money::from_micros(30_000),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            RateClass::Cpu => "cpu",
            RateClass::Gpu(tier) => tier.as_str(),
        }
    }
}

/// Cost of running `class` for `duration_ms`, rounded down to the micro.
pub fn cost(class: RateClass, duration_ms: u64) -> Money {
    let micros = u128::from(class.rate_per_minute().micros())
        * u128::from(duration_ms)
        / MILLIS_PER_MINUTE;
    Money::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

/// Serving tier of a deployment, derived from its instance type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServingTier {
    Cpu,
    GpuT4,
}

impl ServingTier {
    pub fn from_instance_type(instance_type: &str) -> Self {
        if instance_type.trim().eq_ignore_ascii_case("gpu-t4") {
            ServingTier::GpuT4
        } else {
            ServingTier::Cpu
        }
    }

    pub fn price_per_request(&self) -> Money {
        match self {
            ServingTier::Cpu => Money::from_micros(1_000),
            ServingTier::GpuT4 => Money::from_micros(10_000),
        }
    }

    pub fn price_per_hour(&self) -> Money {
        match self {
            ServingTier::Cpu => Money::from_micros(100_000),
            ServingTier::GpuT4 => Money::from_micros(600_000),
        }
    }
}

pub const STORAGE_PRICE_PER_GB_MONTH: Money = Money::from_micros(50_000);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotebookPrice {
    pub price_per_hour: f64,
    pub price_per_minute: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServingPrice {
    pub price_per_hour: f64,
    pub price_per_request: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoragePrice {
    pub price_per_gb_month: f64,
    pub description: String,
}

/// Published price list, derived from the same rates the meter charges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingTable {
    pub notebooks: BTreeMap<String, NotebookPrice>,
    pub deployments: BTreeMap<String, ServingPrice>,
    pub storage: StoragePrice,
}

impl PricingTable {
    pub fn current() -> Self {
        let mut notebooks = BTreeMap::new();
        let classes = std::iter::once((RateClass::Cpu, "2 CPU cores, 8GB RAM"))
            .chain(
                GpuTier::ALL
                    .into_iter()
                    .map(|t| (RateClass::Gpu(t), t.description())),
            );
        for (class, description) in classes {
            let per_minute = class.rate_per_minute();
            notebooks.insert(
                class.tag().to_string(),
                NotebookPrice {
                    price_per_hour: per_minute.saturating_mul(60).as_units(),
                    price_per_minute: per_minute.as_units(),
                    description: description.to_string(),
                },
            );
        }

        let mut deployments = BTreeMap::new();
        for (key, tier, description) in [
            ("cpu", ServingTier::Cpu, "CPU inference endpoint"),
            ("gpu-t4", ServingTier::GpuT4, "GPU T4 inference endpoint"),
        ] {
            deployments.insert(
                key.to_string(),
                ServingPrice {
                    price_per_hour: tier.price_per_hour().as_units(),
                    price_per_request: tier.price_per_request().as_units(),
                    description: description.to_string(),
                },
            );
        }

        Self {
            notebooks,
            deployments,
            storage: StoragePrice {
                price_per_gb_month: STORAGE_PRICE_PER_GB_MONTH.as_units(),
                description: "Model storage and notebook data".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: u64 = 60_000;

    #[test]
    fn thirty_cpu_minutes_cost_fifteen_cents() {
        let c = cost(RateClass::Cpu, 30 * MINUTE);
        assert_eq!(c, Money::from_micros(150_000));
        assert_eq!(c.to_string(), "0.150000");
    }

    #[test]
    fn unknown_gpu_bills_as_cpu() {
        assert_eq!(RateClass::from_gpu_type(None), RateClass::Cpu);
        assert_eq!(RateClass::from_gpu_type(Some("a100")), RateClass::Cpu);
        assert_eq!(
            RateClass::from_gpu_type(Some("Tesla-T4")),
            RateClass::Gpu(GpuTier::TeslaT4)
        );
    }

    #[test]
    fn split_windows_lose_at_most_one_micro() {
        let classes = [
            RateClass::Cpu,
            RateClass::Gpu(GpuTier::TeslaV100),
            RateClass::Gpu(GpuTier::TeslaT4),
            RateClass::Gpu(GpuTier::Rtx4090),
        ];
        let durations = [0, 1, 7, 999, 1_001, 59_999, 60_000, 123_457, 3_600_001];
        for class in classes {
            for &d1 in &durations {
                for &d2 in &durations {
                    let whole = cost(class, d1 + d2).micros();
                    let parts = cost(class, d1).micros() + cost(class, d2).micros();
                    assert!(parts <= whole, "{class:?} {d1} {d2}");
                    assert!(whole - parts <= 1, "{class:?} {d1} {d2}");
                }
            }
        }
    }

    #[test]
    fn whole_minutes_are_exactly_additive() {
        let class = RateClass::Gpu(GpuTier::Rtx4090);
        assert_eq!(
            cost(class, 10 * MINUTE) + cost(class, 20 * MINUTE),
            cost(class, 30 * MINUTE)
        );
    }

    #[test]
    fn cost_is_monotonic() {
        let mut last = Money::ZERO;
        for ms in (0..10 * MINUTE).step_by(777) {
            let c = cost(RateClass::Gpu(GpuTier::TeslaV100), ms);
            assert!(c >= last);
            last = c;
        }
    }

    #[test]
    fn pricing_table_matches_rates() {
        let table = PricingTable::current();
        assert!((table.notebooks["cpu"].price_per_hour - 0.30).abs() < 1e-9);
        assert!((table.notebooks["tesla-v100"].price_per_hour - 3.0).abs() < 1e-9);
        assert!((table.notebooks["rtx-4090"].price_per_hour - 1.8).abs() < 1e-9);
        assert!((table.deployments["gpu-t4"].price_per_request - 0.01).abs() < 1e-9);
        assert!((table.storage.price_per_gb_month - 0.05).abs() < 1e-9);
    }
}
