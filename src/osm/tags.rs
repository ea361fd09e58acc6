// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Pure interpretation of the loose OSM tag folksonomy into the strict
//! import model. Unrecognized keys and values are ignored silently.

use std::collections::HashMap;

use super::profile::SpeedProfile;
use crate::Place;

/// Conversion factor from miles per hour to kilometers per hour.
const MPH_TO_KMH: f64 = 1.609344;

/// Travel direction of a way, as determined by its tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    NotSure,
    Bidirectional,
    Oneway,
    /// One-way against the node order of the way (`oneway=-1`).
    Opposite,
}

/// Interpreted tags of a way.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WayInfo {
    pub name: Option<String>,
    /// Name under which a closed way describes a settlement outline.
    pub place_name: Option<String>,
    pub place: Place,
    /// Road class index into the speed profile.
    pub class: Option<usize>,
    /// Speed limit in km/h.
    pub maximum_speed: Option<f64>,
    pub direction: Direction,
    /// The way has a recognized road class and can carry routing edges.
    pub usable: bool,
    /// The way is legally accessible per the configured access tags.
    pub access: bool,
}

/// Interpreted tags of a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeInfo {
    pub name: Option<String>,
    pub place: Place,
    pub population: Option<i32>,
    pub traffic_signal: bool,
}

pub fn interpret_way(
    tags: &HashMap<String, String>,
    profile: &SpeedProfile,
    access_list: &[String],
) -> WayInfo {
    let class = tags
        .get("highway")
        .and_then(|highway| profile.class_index(highway));

    WayInfo {
        name: tags.get("name").cloned(),
        place_name: tags.get("place_name").cloned(),
        place: tags
            .get("place")
            .map(|value| place_from_tag(value))
            .unwrap_or(Place::None),
        usable: class.is_some(),
        class,
        maximum_speed: tags.get("maxspeed").and_then(|value| parse_maxspeed(value)),
        direction: way_direction(tags),
        access: resolve_access(tags, access_list),
    }
}

pub fn interpret_node(tags: &HashMap<String, String>) -> NodeInfo {
    NodeInfo {
        name: tags.get("name").cloned(),
        place: tags
            .get("place")
            .map(|value| place_from_tag(value))
            .unwrap_or(Place::None),
        population: tags
            .get("population")
            .and_then(|value| value.parse().ok()),
        traffic_signal: tags.get("highway").map(String::as_str) == Some("traffic_signals"),
    }
}

pub fn place_from_tag(value: &str) -> Place {
    match value {
        "city" => Place::City,
        "town" => Place::Town,
        "village" => Place::Village,
        "hamlet" => Place::Hamlet,
        "suburb" => Place::Suburb,
        _ => Place::None,
    }
}

/// Parses a `maxspeed` value into km/h.
///
/// Only a fixed family of spellings is recognized: the numeric value
/// rendered without decimals or with exactly six, followed by nothing,
/// ` kmh`, ` km/h`, `kmh`, `km/h` (kilometers), or ` mph`, `mph` (miles,
/// converted). Anything else returns `None`.
pub fn parse_maxspeed(value: &str) -> Option<f64> {
    let number = leading_number(value)?;

    for rendered in [format!("{:.0}", number), format!("{:.6}", number)] {
        for suffix in ["", " kmh", " km/h", "kmh", "km/h"] {
            if value == format!("{rendered}{suffix}") {
                return Some(number);
            }
        }
        for suffix in [" mph", "mph"] {
            if value == format!("{rendered}{suffix}") {
                return Some(number * MPH_TO_KMH);
            }
        }
    }

    None
}

/// Parses the longest numeric prefix of `value`, ignoring leading whitespace.
fn leading_number(value: &str) -> Option<f64> {
    let value = value.trim_start();
    (1..=value.len())
        .rev()
        .filter(|&end| value.is_char_boundary(end))
        .find_map(|end| value[..end].parse().ok())
}

fn way_direction(tags: &HashMap<String, String>) -> Direction {
    let mut direction = match tags.get("oneway").map(String::as_str) {
        Some("yes") | Some("true") | Some("1") => Direction::Oneway,
        Some("no") | Some("false") | Some("0") => Direction::Bidirectional,
        Some("-1") => Direction::Opposite,
        _ => Direction::NotSure,
    };

    // Roundabouts and motorways default to one-way unless tagged otherwise
    if direction == Direction::NotSure
        && tags.get("junction").map(String::as_str) == Some("roundabout")
    {
        direction = Direction::Oneway;
    }
    if direction == Direction::NotSure {
        match tags.get("highway").map(String::as_str) {
            Some("motorway") | Some("motorway_link") => direction = Direction::Oneway,
            _ => {}
        }
    }

    direction
}

/// Resolves the configured access tags, most specific first: the first key
/// present with a recognized value decides. Ways are accessible by default.
fn resolve_access(tags: &HashMap<String, String>, access_list: &[String]) -> bool {
    for key in access_list {
        if let Some(value) = tags.get(key) {
            match value.as_str() {
                "private" | "no" | "agricultural" | "forestry" | "delivery" => return false,
                "yes" | "designated" | "official" | "permissive" => return true,
                _ => {}
            }
        }
    }
    true
}
