// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

/// Describes how recognized road classes translate into travel speeds.
///
/// The four arrays are parallel and indexed by road class: `names[i]` is the
/// `highway` tag value of class `i`, `speed[i]`/`speed_in_city[i]` its
/// default speed in km/h outside and inside settlements, and
/// `average_percentage[i]` the percentage of that speed actually achieved on
/// average (congestion, curves, junctions).
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedProfile {
    pub names: Vec<String>,
    pub speed: Vec<f64>,
    pub speed_in_city: Vec<f64>,
    pub average_percentage: Vec<u32>,
}

impl SpeedProfile {
    /// Returns the road class index for a `highway` tag value,
    /// or `None` if the value is not part of this profile.
    pub fn class_index(&self, highway: &str) -> Option<usize> {
        self.names.iter().position(|name| name == highway)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// A ready-made profile for passenger cars.
    pub fn default_car() -> Self {
        const CLASSES: &[(&str, f64, f64, u32)] = &[
            ("motorway", 130.0, 100.0, 85),
            ("motorway_link", 60.0, 60.0, 80),
            ("trunk", 100.0, 80.0, 85),
            ("trunk_link", 60.0, 50.0, 80),
            ("primary", 80.0, 60.0, 80),
            ("primary_link", 60.0, 50.0, 75),
            ("secondary", 70.0, 55.0, 75),
            ("secondary_link", 55.0, 45.0, 70),
            ("tertiary", 60.0, 45.0, 70),
            ("unclassified", 50.0, 35.0, 70),
            ("residential", 40.0, 30.0, 70),
            ("service", 30.0, 20.0, 60),
            ("living_street", 10.0, 10.0, 50),
        ];

        let mut profile = SpeedProfile {
            names: Vec::with_capacity(CLASSES.len()),
            speed: Vec::with_capacity(CLASSES.len()),
            speed_in_city: Vec::with_capacity(CLASSES.len()),
            average_percentage: Vec::with_capacity(CLASSES.len()),
        };
        for &(name, speed, speed_in_city, average_percentage) in CLASSES {
            profile.names.push(name.to_string());
            profile.speed.push(speed);
            profile.speed_in_city.push(speed_in_city);
            profile.average_percentage.push(average_percentage);
        }
        profile
    }
}

/// Configuration of a single import run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Path to the OSM XML input, optionally gzip- or bzip2-compressed.
    pub input: PathBuf,

    pub speed_profile: SpeedProfile,

    /// Use [SpeedProfile::speed_in_city] for untagged segments with at least
    /// one endpoint inside a settlement.
    pub default_city_speed: bool,

    /// Treat every way as bidirectional, regardless of its tags.
    pub ignore_oneway: bool,

    /// Discard all `maxspeed` tags.
    pub ignore_maxspeed: bool,

    /// Seconds added per traffic signal on a segment endpoint; half the
    /// penalty is accounted to each adjacent segment.
    pub traffic_light_penalty: f64,

    /// [Access tags](https://wiki.openstreetmap.org/wiki/Key:access) to
    /// consider when checking for road prohibitions, most specific first.
    /// Earlier entries override later ones.
    pub access_list: Vec<String>,
}

impl Settings {
    /// Settings for a default car import of `input`.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            speed_profile: SpeedProfile::default_car(),
            default_city_speed: true,
            ignore_oneway: false,
            ignore_maxspeed: false,
            traffic_light_penalty: 0.0,
            access_list: ["motorcar", "motor_vehicle", "vehicle", "access"]
                .iter()
                .map(|key| key.to_string())
                .collect(),
        }
    }
}
