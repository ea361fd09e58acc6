// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

/// Represents an [OSM node](https://wiki.openstreetmap.org/wiki/Node)
/// with its raw, uninterpreted tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    pub tags: HashMap<String, String>,
}

/// Represents an [OSM way](https://wiki.openstreetmap.org/wiki/Way)
/// with its raw, uninterpreted tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: u64,
    pub nodes: Vec<u64>,
    pub tags: HashMap<String, String>,
}

/// The declared extent of the data set, from a `<bound>`/`<bounds>` element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// Union over the OSM features relevant to the import.
/// Relations are not part of the import model and are skipped at parse time.
#[derive(Debug, Clone)]
pub enum Feature {
    Node(Node),
    Way(Way),
    Bounds(Bounds),
}
