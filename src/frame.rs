//! Per-product-group frames: variable registry, routes, delta thresholds and
//! Monte-Carlo jitter.
//!
//! Frames are plain configuration values. They are built once at start-up
//! and handed to each component constructor.

use crate::domain::{
    ProductGroup, TimeMs, VariableGroup, VariableKey, VariableMeta, VariableRegistry,
    VariableSnapshot, VariableValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A physical path from a terminal to a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFrame {
    pub product_group: ProductGroup,
    pub variables: VariableRegistry,
    /// Solver result vectors are index-aligned with this list.
    pub routes: Vec<Route>,
    /// Absolute delta a tracked variable must exceed to trigger an auto-solve.
    pub thresholds: BTreeMap<VariableKey, f64>,
    /// Half-width of the uniform Monte-Carlo perturbation per variable.
    pub jitter: BTreeMap<VariableKey, f64>,
    /// Starting values used until the first live update arrives.
    pub defaults: BTreeMap<VariableKey, VariableValue>,
}

impl GroupFrame {
    pub fn default_snapshot(&self) -> VariableSnapshot {
        VariableSnapshot::new(self.defaults.clone(), TimeMs::new(0))
    }

    pub fn route_keys(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.key.clone()).collect()
    }
}

/// All configured frames, keyed by product group.
#[derive(Debug, Clone, Default)]
pub struct FrameRegistry {
    frames: BTreeMap<ProductGroup, GroupFrame>,
}

impl FrameRegistry {
    pub fn new(frames: impl IntoIterator<Item = GroupFrame>) -> Self {
        Self {
            frames: frames
                .into_iter()
                .map(|f| (f.product_group, f))
                .collect(),
        }
    }

    /// Built-in frames for the barge and vessel ammonia desks.
    pub fn default_frames() -> Self {
        Self::new([ammonia_domestic(), ammonia_international()])
    }

    pub fn get(&self, group: ProductGroup) -> Option<&GroupFrame> {
        self.frames.get(&group)
    }

    pub fn groups(&self) -> impl Iterator<Item = ProductGroup> + '_ {
        self.frames.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupFrame> {
        self.frames.values()
    }
}

struct FrameBuilder {
    group: ProductGroup,
    metas: Vec<VariableMeta>,
    thresholds: BTreeMap<VariableKey, f64>,
    jitter: BTreeMap<VariableKey, f64>,
    defaults: BTreeMap<VariableKey, VariableValue>,
}

impl FrameBuilder {
    fn new(group: ProductGroup) -> Self {
        Self {
            group,
            metas: Vec::new(),
            thresholds: BTreeMap::new(),
            jitter: BTreeMap::new(),
            defaults: BTreeMap::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn number(
        mut self,
        key: &str,
        label: &str,
        unit: &str,
        group: VariableGroup,
        bounds: (f64, f64, f64),
        default: f64,
        threshold: Option<f64>,
        jitter: f64,
    ) -> Self {
        let meta = VariableMeta::number(key, label, unit, group, bounds);
        let k = meta.key.clone();
        self.metas.push(meta);
        self.defaults.insert(k.clone(), VariableValue::Number(default));
        if let Some(t) = threshold {
            self.thresholds.insert(k.clone(), t);
        }
        if jitter > 0.0 {
            self.jitter.insert(k, jitter);
        }
        self
    }

    fn flag(mut self, key: &str, label: &str, group: VariableGroup) -> Self {
        let meta = VariableMeta::flag(key, label, group);
        let k = meta.key.clone();
        self.metas.push(meta);
        self.defaults.insert(k.clone(), VariableValue::Flag(false));
        // Any flip of a flag is a material change.
        self.thresholds.insert(k, 0.5);
        self
    }

    fn routes(self, routes: &[(&str, &str)]) -> GroupFrame {
        GroupFrame {
            product_group: self.group,
            variables: VariableRegistry::new(self.metas),
            routes: routes
                .iter()
                .map(|(key, label)| Route {
                    key: key.to_string(),
                    label: label.to_string(),
                })
                .collect(),
            thresholds: self.thresholds,
            jitter: self.jitter,
            defaults: self.defaults,
        }
    }
}

fn ammonia_domestic() -> GroupFrame {
    use VariableGroup::{Commercial, Environment, Operations};
    FrameBuilder::new(ProductGroup::AmmoniaDomestic)
        .number("river_stage", "River Stage", "ft", Environment, (0.0, 50.0, 0.5), 18.0, Some(0.5), 2.0)
        .number("river_flow", "River Flow", "kcfs", Environment, (50.0, 1500.0, 10.0), 400.0, Some(50.0), 60.0)
        .number("temp_f", "Temperature", "°F", Environment, (-10.0, 110.0, 1.0), 65.0, Some(10.0), 6.0)
        .number("wind_mph", "Wind", "mph", Environment, (0.0, 60.0, 1.0), 8.0, Some(10.0), 5.0)
        .number("precip_in", "Precip (3d)", "in", Environment, (0.0, 10.0, 0.1), 0.5, Some(1.0), 0.5)
        .number("lock_hrs", "Lock Delay", "hrs", Operations, (0.0, 96.0, 1.0), 12.0, Some(2.0), 4.0)
        .number("nat_gas", "Henry Hub", "$/MMBtu", Commercial, (1.0, 15.0, 0.05), 2.8, Some(0.25), 0.4)
        .number("nola_buy", "NOLA Buy", "$/t", Commercial, (200.0, 800.0, 1.0), 320.0, Some(2.0), 10.0)
        .number("sell_stl", "StL Delivered", "$/t", Commercial, (200.0, 900.0, 1.0), 410.0, Some(3.0), 10.0)
        .number("sell_mem", "Memphis Delivered", "$/t", Commercial, (200.0, 900.0, 1.0), 395.0, Some(3.0), 10.0)
        .number("fr_don_stl", "Freight Don→StL", "$/t", Commercial, (10.0, 150.0, 1.0), 55.0, Some(3.0), 6.0)
        .number("fr_don_mem", "Freight Don→Mem", "$/t", Commercial, (10.0, 150.0, 1.0), 42.0, Some(3.0), 6.0)
        .number("fr_geis_stl", "Freight Geis→StL", "$/t", Commercial, (10.0, 150.0, 1.0), 58.0, Some(3.0), 6.0)
        .number("fr_geis_mem", "Freight Geis→Mem", "$/t", Commercial, (10.0, 150.0, 1.0), 45.0, Some(3.0), 6.0)
        .number("inv_don", "Inventory Donaldsonville", "t", Operations, (0.0, 60000.0, 100.0), 12000.0, Some(500.0), 1500.0)
        .number("inv_geis", "Inventory Geismar", "t", Operations, (0.0, 60000.0, 100.0), 8000.0, Some(500.0), 1500.0)
        .number("barge_count", "Barges Available", "", Operations, (0.0, 40.0, 1.0), 12.0, Some(1.0), 1.0)
        .number("working_cap", "Working Capital", "$", Commercial, (0.0, 50_000_000.0, 100_000.0), 8_000_000.0, Some(500_000.0), 0.0)
        .flag("stl_outage", "StL Dock Outage", Operations)
        .flag("mem_outage", "Memphis Dock Outage", Operations)
        .routes(&[
            ("don_stl", "Donaldsonville → St. Louis"),
            ("don_mem", "Donaldsonville → Memphis"),
            ("geis_stl", "Geismar → St. Louis"),
            ("geis_mem", "Geismar → Memphis"),
        ])
}

fn ammonia_international() -> GroupFrame {
    use VariableGroup::{Commercial, Environment, Operations};
    FrameBuilder::new(ProductGroup::AmmoniaInternational)
        .number("tampa_cfr", "Tampa CFR", "$/t", Commercial, (200.0, 1000.0, 1.0), 450.0, Some(5.0), 20.0)
        .number("me_fob", "Middle East FOB", "$/t", Commercial, (150.0, 900.0, 1.0), 360.0, Some(5.0), 20.0)
        .number("nwe_cfr", "NW Europe CFR", "$/t", Commercial, (200.0, 1100.0, 1.0), 520.0, Some(5.0), 20.0)
        .number("vessel_rate", "Vessel Freight", "$/t", Commercial, (10.0, 200.0, 1.0), 65.0, Some(4.0), 8.0)
        .number("bunker", "Bunker (VLSFO)", "$/t", Commercial, (300.0, 1200.0, 5.0), 610.0, Some(25.0), 40.0)
        .number("transit_days", "Transit", "days", Operations, (5.0, 60.0, 1.0), 24.0, Some(2.0), 3.0)
        .number("wave_m", "Sig. Wave Height", "m", Environment, (0.0, 12.0, 0.1), 1.8, Some(1.0), 0.8)
        .number("vessel_count", "Vessels Available", "", Operations, (0.0, 10.0, 1.0), 3.0, Some(1.0), 0.0)
        .routes(&[("me_tampa", "Middle East → Tampa"), ("me_nwe", "Middle East → NW Europe")])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domestic_frame_has_twenty_variables_and_four_routes() {
        let frames = FrameRegistry::default_frames();
        let frame = frames.get(ProductGroup::AmmoniaDomestic).unwrap();
        assert_eq!(frame.variables.len(), 20);
        assert_eq!(frame.route_keys(), vec!["don_stl", "don_mem", "geis_stl", "geis_mem"]);
        assert_eq!(frame.thresholds[&VariableKey::new("river_stage")], 0.5);
        assert_eq!(frame.thresholds[&VariableKey::new("inv_don")], 500.0);
    }

    #[test]
    fn test_flags_are_never_jittered() {
        let frames = FrameRegistry::default_frames();
        let frame = frames.get(ProductGroup::AmmoniaDomestic).unwrap();
        assert!(!frame.jitter.contains_key(&VariableKey::new("stl_outage")));
        assert_eq!(
            frame.default_snapshot().get(&VariableKey::new("mem_outage")),
            Some(VariableValue::Flag(false))
        );
    }

    #[test]
    fn test_unconfigured_group_is_absent() {
        let frames = FrameRegistry::default_frames();
        assert!(frames.get(ProductGroup::Petcoke).is_none());
        assert_eq!(frames.groups().count(), 2);
    }
}
