// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! osmpack ingests OpenStreetMap XML data describing a geographic region and
//! produces a compact set of binary artifacts consumed by downstream routing
//! and address-search components: a routing graph (node coordinates plus
//! edges weighted by travel time), a gazetteer of named places with
//! approximate extents, and per-edge street-name records for reverse-address
//! lookup.
//!
//! The entry point is [osm::Importer], which runs the batch two-pass import
//! over a (possibly compressed) `.osm` file.

mod coords;
mod kd;
mod storage;

pub mod osm;

pub use coords::{point_in_polygon, GpsCoordinate, UnsignedCoordinate};

/// Dense 0-based identifier of a routing node.
///
/// Routing nodes are exactly the distinct OSM nodes referenced by at least
/// one usable way; their dense ids are assigned in ascending order of the
/// raw OSM id. This ordering is the contract between all on-disk artifacts.
pub type NodeId = u32;

/// Classification of a named settlement, ordered by increasing default
/// assignment radius. `None` and `Suburb` carry no default radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Place {
    #[default]
    None,
    Suburb,
    Hamlet,
    Village,
    Town,
    City,
}

impl Place {
    pub(crate) fn from_u32(value: u32) -> Place {
        match value {
            1 => Place::Suburb,
            2 => Place::Hamlet,
            3 => Place::Village,
            4 => Place::Town,
            5 => Place::City,
            _ => Place::None,
        }
    }
}

/// A named place or settlement, as discovered during pass 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub name: String,
    /// Population from the `population` tag, or -1 when the tag was absent.
    pub population: i32,
    pub coordinate: GpsCoordinate,
    pub place_type: Place,
}

/// Result of the spatial reconciliation for a single routing node:
/// whether any place claimed the node, and which one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeLocation {
    pub is_in_place: bool,
    /// Index into the places list. Only meaningful if [is_in_place](Self::is_in_place) is set.
    pub place: u32,
    /// Distance to the claiming place in meters; 0 for polygon containment,
    /// [f64::INFINITY] while unclaimed.
    pub distance: f64,
}

/// A routing node as read back from the `node_coordinates` artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingNode {
    pub coordinate: UnsignedCoordinate,
}

/// A single directed or bidirectional connection between two routing nodes.
///
/// `seconds` is the travel time across the segment, including any
/// traffic-signal penalties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub bidirectional: bool,
    pub seconds: f64,
}

/// Associates a named way with one of the places its nodes lie in.
/// `way_start..way_end` indexes the shared coordinate buffer returned
/// alongside the addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub name: String,
    /// Index into the places list.
    pub near_place: u32,
    pub way_start: u32,
    pub way_end: u32,
}

/// Axis-aligned bounding box of the imported region, in projected
/// coordinates. `min.x <= max.x` and `min.y <= max.y` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min: UnsignedCoordinate,
    pub max: UnsignedCoordinate,
}
