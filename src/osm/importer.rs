// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! The two-pass import pipeline.
//!
//! Pass 1 streams the XML input exactly once, interprets tags and spills
//! everything of interest into flat intermediate files. Pass 2 reduces those
//! files into the final artifacts: dense routing-node coordinates, mapped
//! edges with travel-time weights, and the per-node settlement assignment.

use std::fs::{self, File};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Instant;

use crate::coords::{point_in_polygon, GpsCoordinate, UnsignedCoordinate};
use crate::kd::KdTree;
use crate::storage::{StreamReader, StreamWriter};
use crate::{Address, BoundingBox, Location, NodeId, NodeLocation, Place, RoutingEdge, RoutingNode};

use super::profile::Settings;
use super::reader::{model, xml, FileFormat};
use super::tags::{self, Direction};
use super::Error;

type FileWriter = StreamWriter<io::BufWriter<File>>;

/// Coordinate sentinel for nodes referenced by a way but absent from the
/// input. Kept on disk for format compatibility.
const MISSING: GpsCoordinate = GpsCoordinate {
    latitude: -1.0,
    longitude: -1.0,
};

/// Edges taking longer than a day are suspicious enough to log.
const VERY_LARGE_EDGE_SECONDS: f64 = 86_400.0;

/// Default assignment radius in meters for places without a matching
/// outline. `None` and `Suburb` never claim nodes by radius.
fn default_radius(place: Place) -> Option<f64> {
    match place {
        Place::None | Place::Suburb => None,
        Place::Hamlet => Some(300.0),
        Place::Village => Some(1000.0),
        Place::Town => Some(5000.0),
        Place::City => Some(10_000.0),
    }
}

/// Aggregate counters of a single import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    pub nodes: u64,
    pub ways: u64,
    pub edges: u64,
    pub places: u64,
    pub outlines: u64,
    pub maxspeed: u64,
    pub zero_speed: u64,
    pub default_city_speed: u64,
    pub city_edges: u64,
}

/// Everything [Importer::address_data] reconstructs for the address search:
/// the gazetteer, one [Address] per (named way, nearby place) pair, and the
/// shared coordinate buffer the addresses index into.
#[derive(Debug, Clone, Default)]
pub struct AddressData {
    pub places: Vec<Location>,
    pub addresses: Vec<Address>,
    pub way_buffer: Vec<UnsignedCoordinate>,
}

/// A settlement outline assembled from a closed, named, place-tagged way.
#[derive(Debug, Clone)]
struct Outline {
    name: String,
    polygon: Vec<UnsignedCoordinate>,
}

/// The batch OSM importer. See the [module documentation](self) for the
/// overall data flow.
///
/// Lifecycle: construct with [Importer::new], run [Importer::preprocess],
/// store the external id assignment with [Importer::set_id_map], consume the
/// artifacts through the getters, and finally [Importer::delete_temporary_files].
pub struct Importer {
    settings: Settings,
    output_directory: PathBuf,
    statistics: Statistics,

    /// Sorted raw ids of nodes referenced by at least one usable way.
    /// The position in this vector is the node's dense id.
    used_nodes: Vec<u32>,

    /// Sorted raw ids of nodes referenced by at least one outline way.
    outline_nodes: Vec<u32>,

    /// Sorted raw ids of nodes tagged `highway=traffic_signals`.
    signal_nodes: Vec<u32>,
}

impl Importer {
    pub fn new(settings: Settings, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            output_directory: output_directory.into(),
            statistics: Statistics::default(),
            used_nodes: Vec::new(),
            outline_nodes: Vec::new(),
            signal_nodes: Vec::new(),
        }
    }

    /// Counters of the last [Importer::preprocess] run.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Runs the full two-pass import over [Settings::input], leaving all
    /// intermediate files and final artifacts in the output directory.
    ///
    /// Partial intermediate files of a failed run are left on disk; they are
    /// overwritten by the next run.
    pub fn preprocess(&mut self) -> Result<(), Error> {
        if self.settings.speed_profile.is_empty() {
            return Err(Error::NoSpeedProfile);
        }

        self.statistics = Statistics::default();
        self.used_nodes.clear();
        self.outline_nodes.clear();
        self.signal_nodes.clear();

        let time = Instant::now();
        self.read_input()?;
        log::info!(target: "osmpack", "finished import pass 1: {} ms", time.elapsed().as_millis());

        if self.used_nodes.is_empty() {
            return Err(Error::NoRoutingNodes);
        }

        self.used_nodes.sort_unstable();
        self.used_nodes.dedup();
        self.outline_nodes.sort_unstable();
        self.outline_nodes.dedup();
        self.signal_nodes.sort_unstable();

        let time = Instant::now();
        self.second_pass()?;
        log::info!(target: "osmpack", "finished import pass 2: {} ms", time.elapsed().as_millis());

        log::info!(target: "osmpack", "nodes: {}", self.statistics.nodes);
        log::info!(target: "osmpack", "ways: {}", self.statistics.ways);
        log::info!(target: "osmpack", "places: {}", self.statistics.places);
        log::info!(target: "osmpack", "place outlines: {}", self.statistics.outlines);
        log::info!(target: "osmpack", "edges: {}", self.statistics.edges);
        log::info!(target: "osmpack", "routing nodes: {}", self.used_nodes.len());
        log::info!(target: "osmpack", "traffic signal nodes: {}", self.signal_nodes.len());
        log::info!(target: "osmpack", "maxspeed specified: {}", self.statistics.maxspeed);
        log::info!(target: "osmpack", "zero speed ways: {}", self.statistics.zero_speed);
        log::info!(
            target: "osmpack",
            "edges with default city speed: {}",
            self.statistics.default_city_speed,
        );

        self.used_nodes = Vec::new();
        self.outline_nodes = Vec::new();
        self.signal_nodes = Vec::new();
        Ok(())
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.output_directory.join(name)
    }

    // ---- pass 1 ----

    /// Opens the input file, sniffs its format and runs pass 1 over the
    /// decompressed XML stream.
    fn read_input(&mut self) -> Result<(), Error> {
        let mut out = Pass1Files::create(self)?;

        let input = self.settings.input.clone();
        let file = File::open(&input)?;
        let mut reader = io::BufReader::new(file);

        let mut format = FileFormat::detect(reader.fill_buf()?);
        if format == FileFormat::Unknown {
            format = FileFormat::from_extension(&input);
        }

        match format {
            FileFormat::Unknown => return Err(Error::UnknownFileFormat),

            FileFormat::Xml => {
                self.pass1(xml::features_from_file(reader), &mut out)?;
            }

            FileFormat::XmlGz => {
                let d = flate2::bufread::MultiGzDecoder::new(reader);
                let b = io::BufReader::new(d);
                self.pass1(xml::features_from_file(b), &mut out)?;
            }

            FileFormat::XmlBz2 => {
                let d = bzip2::bufread::MultiBzDecoder::new(reader);
                let b = io::BufReader::new(d);
                self.pass1(xml::features_from_file(b), &mut out)?;
            }
        }

        out.flush()
    }

    fn pass1<I>(&mut self, features: I, out: &mut Pass1Files) -> Result<(), Error>
    where
        I: IntoIterator<Item = Result<model::Feature, quick_xml::Error>>,
    {
        for feature in features {
            match feature? {
                model::Feature::Node(node) => self.pass1_node(node, out)?,
                model::Feature::Way(way) => self.pass1_way(way, out)?,
                model::Feature::Bounds(bounds) => self.pass1_bounds(bounds, out)?,
            }
        }
        Ok(())
    }

    fn pass1_node(&mut self, node: model::Node, out: &mut Pass1Files) -> Result<(), Error> {
        self.statistics.nodes += 1;
        let info = tags::interpret_node(&node.tags);

        if info.traffic_signal {
            self.signal_nodes.push(node.id as u32);
        }

        out.all_nodes.write_u32(node.id as u32)?;
        out.all_nodes.write_f64(node.lat)?;
        out.all_nodes.write_f64(node.lon)?;

        if info.place != Place::None {
            if let Some(name) = &info.name {
                out.places.write_f64(node.lat)?;
                out.places.write_f64(node.lon)?;
                out.places.write_u32(info.place as u32)?;
                out.places.write_u32(info.population.unwrap_or(-1) as u32)?;
                out.places.write_string(name)?;
                self.statistics.places += 1;
            }
        }

        Ok(())
    }

    fn pass1_way(&mut self, way: model::Way, out: &mut Pass1Files) -> Result<(), Error> {
        self.statistics.ways += 1;
        let mut info = tags::interpret_way(
            &way.tags,
            &self.settings.speed_profile,
            &self.settings.access_list,
        );

        if info.maximum_speed.is_some() {
            self.statistics.maxspeed += 1;
        }
        if self.settings.ignore_oneway {
            info.direction = Direction::Bidirectional;
        }
        if self.settings.ignore_maxspeed {
            info.maximum_speed = None;
        }

        if info.usable && info.access && !way.nodes.is_empty() {
            let mut path: Vec<u32> = way.nodes.iter().map(|&id| id as u32).collect();
            self.used_nodes.extend_from_slice(&path);

            out.edges.write_string(info.name.as_deref().unwrap_or(""))?;
            out.edges.write_i32(info.class.map_or(-1, |c| c as i32))?;
            out.edges.write_f64(info.maximum_speed.unwrap_or(-1.0))?;
            let bidirectional = !matches!(info.direction, Direction::Oneway | Direction::Opposite);
            out.edges.write_i32(bidirectional as i32)?;
            out.edges.write_i32(path.len() as i32)?;

            if info.direction == Direction::Opposite {
                path.reverse();
            }
            for &id in &path {
                out.edges.write_u32(id)?;
            }

            self.statistics.edges += path.len() as u64 - 1;
        }

        if info.place != Place::None
            && way.nodes.len() > 1
            && way.nodes.first() == way.nodes.last()
        {
            if let Some(place_name) = &info.place_name {
                out.city_outlines.write_u32(info.place as u32)?;
                out.city_outlines.write_u32((way.nodes.len() - 1) as u32)?;
                out.city_outlines.write_string(place_name)?;
                for &id in &way.nodes[1..] {
                    self.outline_nodes.push(id as u32);
                    out.city_outlines.write_u32(id as u32)?;
                }
                self.statistics.outlines += 1;
            }
        }

        Ok(())
    }

    fn pass1_bounds(&mut self, bounds: model::Bounds, out: &mut Pass1Files) -> Result<(), Error> {
        out.bounding_box.write_f64(bounds.min_lat)?;
        out.bounding_box.write_f64(bounds.min_lon)?;
        out.bounding_box.write_f64(bounds.max_lat)?;
        out.bounding_box.write_f64(bounds.max_lon)?;
        Ok(())
    }

    // ---- pass 2 ----

    fn second_pass(&mut self) -> Result<(), Error> {
        let mut node_coordinates = vec![MISSING; self.used_nodes.len()];
        let mut outline_coordinates = vec![MISSING; self.outline_nodes.len()];
        self.materialize_coordinates(&mut node_coordinates, &mut outline_coordinates)?;
        self.write_node_coordinates(&node_coordinates)?;

        let outlines = self.assemble_outlines(&outline_coordinates)?;
        drop(outline_coordinates);
        let places = self.read_places()?;

        let node_location = assign_places(&node_coordinates, &outlines, &places);
        self.write_locations(&node_location)?;

        self.map_edges(&node_coordinates, &node_location)
    }

    /// Streams `all_nodes`, storing coordinates into the dense slots of the
    /// routing and outline node vectors. Duplicate raw ids resolve to the
    /// last-written coordinate.
    fn materialize_coordinates(
        &self,
        node_coordinates: &mut [GpsCoordinate],
        outline_coordinates: &mut [GpsCoordinate],
    ) -> Result<(), Error> {
        let mut data = StreamReader::open(self.artifact_path("all_nodes"))?;
        while let Some(id) = data.try_read_u32()? {
            let gps = GpsCoordinate::new(data.read_f64()?, data.read_f64()?);
            if let Ok(slot) = self.used_nodes.binary_search(&id) {
                node_coordinates[slot] = gps;
            }
            if let Ok(slot) = self.outline_nodes.binary_search(&id) {
                outline_coordinates[slot] = gps;
            }
        }
        Ok(())
    }

    fn write_node_coordinates(&self, node_coordinates: &[GpsCoordinate]) -> Result<(), Error> {
        let mut out = StreamWriter::create(self.artifact_path("node_coordinates"))?;
        for (dense, gps) in node_coordinates.iter().enumerate() {
            out.write_f64(gps.latitude)?;
            out.write_f64(gps.longitude)?;
            if *gps == MISSING {
                log::warn!(
                    target: "osmpack.osm",
                    "inconsistent OSM data: missing way node coordinate {}",
                    dense,
                );
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Reads `city_outlines` back, resolving node ids to projected
    /// coordinates. Outlines with a missing node are dropped. The result is
    /// sorted by name so places can look their outline up by equal range.
    fn assemble_outlines(
        &self,
        outline_coordinates: &[GpsCoordinate],
    ) -> Result<Vec<Outline>, Error> {
        let mut data = StreamReader::open(self.artifact_path("city_outlines"))?;
        let mut outlines = Vec::new();

        while let Some(_place_type) = data.try_read_u32()? {
            let count = data.read_u32()?;
            let name = data.read_string()?;
            let mut polygon = Vec::with_capacity(count as usize);
            let mut valid = true;

            for _ in 0..count {
                let id = data.read_u32()?;
                let gps = match self.outline_nodes.binary_search(&id) {
                    Ok(slot) => outline_coordinates[slot],
                    Err(_) => MISSING,
                };
                if gps == MISSING {
                    log::warn!(
                        target: "osmpack.osm",
                        "inconsistent OSM data: missing outline node coordinate {}",
                        id,
                    );
                    valid = false;
                }
                polygon.push(UnsignedCoordinate::from_gps(gps));
            }

            if valid {
                outlines.push(Outline { name, polygon });
            }
        }

        outlines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(outlines)
    }

    fn read_places(&self) -> Result<Vec<Location>, Error> {
        let mut data = StreamReader::open(self.artifact_path("places"))?;
        let mut places = Vec::new();
        while let Some(latitude) = data.try_read_f64()? {
            let longitude = data.read_f64()?;
            let place_type = Place::from_u32(data.read_u32()?);
            let population = data.read_u32()? as i32;
            let name = data.read_string()?;
            places.push(Location {
                name,
                population,
                coordinate: GpsCoordinate::new(latitude, longitude),
                place_type,
            });
        }
        Ok(places)
    }

    fn write_locations(&self, node_location: &[NodeLocation]) -> Result<(), Error> {
        let mut out = StreamWriter::create(self.artifact_path("location"))?;
        for location in node_location {
            out.write_u32(location.is_in_place as u32)?;
            out.write_u32(location.place)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Streams `edges` a second time, resolving raw node ids to dense ids
    /// and weighting every segment with seconds of travel time. Ways with a
    /// missing coordinate or without any usable speed are dropped entirely.
    fn map_edges(
        &mut self,
        node_coordinates: &[GpsCoordinate],
        node_location: &[NodeLocation],
    ) -> Result<(), Error> {
        let mut data = StreamReader::open(self.artifact_path("edges"))?;
        let mut out = StreamWriter::create(self.artifact_path("mapped_edges"))?;
        let profile = &self.settings.speed_profile;

        while let Some(name) = data.try_read_string()? {
            let recorded_class = data.read_i32()?;
            let recorded_speed = data.read_f64()?;
            let bidirectional = data.read_i32()?;
            let count = data.read_i32()? as usize;

            let mut raw = Vec::with_capacity(count);
            for _ in 0..count {
                raw.push(data.read_u32()?);
            }

            let mut dense: Vec<NodeId> = Vec::with_capacity(count);
            let mut valid = true;
            for &id in &raw {
                let slot = match self.used_nodes.binary_search(&id) {
                    Ok(slot) => slot,
                    Err(_) => {
                        valid = false;
                        continue;
                    }
                };
                if node_coordinates[slot] == MISSING {
                    log::warn!(
                        target: "osmpack.osm",
                        "inconsistent OSM data: skipping way with missing node coordinate {}",
                        slot,
                    );
                    valid = false;
                }
                dense.push(slot as NodeId);
            }
            if !valid {
                continue;
            }

            if recorded_speed == 0.0 || (recorded_speed < 0.0 && recorded_class < 0) {
                self.statistics.zero_speed += 1;
                continue;
            }

            out.write_string(&name)?;
            out.write_u32(bidirectional as u32)?;
            out.write_u32(count as u32)?;
            for &id in &dense {
                out.write_u32(id)?;
            }

            // Ways of an unrecognized class carry their own speed; promote
            // them past the profile so no per-class adjustment applies.
            let class = if recorded_class < 0 {
                profile.len()
            } else {
                recorded_class as usize
            };

            for i in 1..count {
                let from = dense[i - 1] as usize;
                let to = dense[i] as usize;
                let in_place = node_location[from].is_in_place || node_location[to].is_in_place;
                let meters = node_coordinates[from].distance(node_coordinates[to]);

                let mut speed = recorded_speed;
                if speed < 0.0 {
                    // speed < 0 implies a recognized class; the unroutable
                    // combination was dropped above
                    if self.settings.default_city_speed && in_place {
                        self.statistics.default_city_speed += 1;
                        speed = profile.speed_in_city[class];
                    } else {
                        speed = profile.speed[class];
                    }
                }
                if class < profile.len() {
                    if in_place {
                        self.statistics.city_edges += 1;
                    }
                    speed *= profile.average_percentage[class] as f64 / 100.0;
                }

                let mut seconds = meters * 3.6 / speed;
                if seconds < 0.0 {
                    log::error!(target: "osmpack.osm", "segment with negative travel time: {}", seconds);
                }
                if seconds > VERY_LARGE_EDGE_SECONDS {
                    log::debug!(
                        target: "osmpack.osm",
                        "very large edge: {} seconds, {} -> {} at {} km/h",
                        seconds,
                        from,
                        to,
                        speed,
                    );
                }

                if self.signal_nodes.binary_search(&raw[i - 1]).is_ok() {
                    seconds += self.settings.traffic_light_penalty / 2.0;
                }
                if self.signal_nodes.binary_search(&raw[i]).is_ok() {
                    seconds += self.settings.traffic_light_penalty / 2.0;
                }

                out.write_f64(seconds)?;
            }
        }

        out.flush()?;
        Ok(())
    }

    // ---- artifact access ----

    /// Stores the dense-to-raw id assignment produced by the external
    /// collaborator into the `id_map` artifact.
    pub fn set_id_map(&self, id_map: &[NodeId]) -> Result<(), Error> {
        let mut out = StreamWriter::create(self.artifact_path("id_map"))?;
        out.write_u32(id_map.len() as u32)?;
        for &id in id_map {
            out.write_u32(id)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn id_map(&self) -> Result<Vec<NodeId>, Error> {
        let mut data = StreamReader::open(self.artifact_path("id_map"))?;
        let count = data.read_u32()?;
        let mut id_map = Vec::with_capacity(count as usize);
        for _ in 0..count {
            id_map.push(data.read_u32()?);
        }
        Ok(id_map)
    }

    /// Expands `mapped_edges` into one [RoutingEdge] per segment.
    pub fn routing_edges(&self) -> Result<Vec<RoutingEdge>, Error> {
        let mut data = StreamReader::open(self.artifact_path("mapped_edges"))?;
        let mut edges = Vec::new();

        while let Some(_name) = data.try_read_string()? {
            let bidirectional = data.read_u32()? == 1;
            let count = data.read_u32()? as usize;
            let mut path = Vec::with_capacity(count);
            for _ in 0..count {
                path.push(data.read_u32()?);
            }
            for pair in path.windows(2) {
                edges.push(RoutingEdge {
                    source: pair[0],
                    target: pair[1],
                    bidirectional,
                    seconds: data.read_f64()?,
                });
            }
        }

        Ok(edges)
    }

    /// Reads the dense routing-node coordinates, projected.
    pub fn routing_nodes(&self) -> Result<Vec<RoutingNode>, Error> {
        let mut data = StreamReader::open(self.artifact_path("node_coordinates"))?;
        let mut nodes = Vec::new();
        while let Some(latitude) = data.try_read_f64()? {
            let longitude = data.read_f64()?;
            nodes.push(RoutingNode {
                coordinate: UnsignedCoordinate::from_gps(GpsCoordinate::new(latitude, longitude)),
            });
        }
        Ok(nodes)
    }

    /// Reconstructs the address-search records: for every named way, one
    /// [Address] per distinct place its in-place nodes belong to.
    pub fn address_data(&self) -> Result<AddressData, Error> {
        let coordinates = self.read_raw_node_coordinates()?;
        let node_location = self.read_node_locations()?;
        let places = self.read_places()?;

        let mut data = StreamReader::open(self.artifact_path("mapped_edges"))?;
        let mut addresses = Vec::new();
        let mut way_nodes: Vec<NodeId> = Vec::new();

        while let Some(name) = data.try_read_string()? {
            let _bidirectional = data.read_u32()?;
            let count = data.read_u32()? as usize;
            let name = normalize_whitespace(&name);
            let way_start = way_nodes.len() as u32;
            let mut address_places = Vec::new();

            for _ in 0..count {
                let node = data.read_u32()?;
                if !name.is_empty() {
                    way_nodes.push(node);
                    let location = node_location[node as usize];
                    if location.is_in_place {
                        address_places.push(location.place);
                    }
                }
            }
            for _ in 1..count {
                data.read_f64()?;
            }

            let way_end = way_nodes.len() as u32;

            if address_places.is_empty() {
                way_nodes.truncate(way_start as usize);
                continue;
            }
            address_places.sort_unstable();
            address_places.dedup();

            for &near_place in &address_places {
                addresses.push(Address {
                    name: name.clone(),
                    near_place,
                    way_start,
                    way_end,
                });
            }
        }

        let way_buffer = way_nodes
            .iter()
            .map(|&node| UnsignedCoordinate::from_gps(coordinates[node as usize]))
            .collect();

        Ok(AddressData {
            places,
            addresses,
            way_buffer,
        })
    }

    pub fn bounding_box(&self) -> Result<BoundingBox, Error> {
        let mut data = StreamReader::open(self.artifact_path("bounding_box"))?;
        let min = GpsCoordinate::new(data.read_f64()?, data.read_f64()?);
        let max = GpsCoordinate::new(data.read_f64()?, data.read_f64()?);

        let mut min = UnsignedCoordinate::from_gps(min);
        let mut max = UnsignedCoordinate::from_gps(max);
        if min.x > max.x {
            std::mem::swap(&mut min.x, &mut max.x);
        }
        if min.y > max.y {
            std::mem::swap(&mut min.y, &mut max.y);
        }

        Ok(BoundingBox { min, max })
    }

    /// Removes every intermediate file and final artifact from the output
    /// directory. Missing files are ignored.
    pub fn delete_temporary_files(&self) {
        for name in [
            "all_nodes",
            "bounding_box",
            "city_outlines",
            "edges",
            "id_map",
            "location",
            "mapped_edges",
            "node_coordinates",
            "places",
        ] {
            let _ = fs::remove_file(self.artifact_path(name));
        }
    }

    fn read_raw_node_coordinates(&self) -> Result<Vec<GpsCoordinate>, Error> {
        let mut data = StreamReader::open(self.artifact_path("node_coordinates"))?;
        let mut coordinates = Vec::new();
        while let Some(latitude) = data.try_read_f64()? {
            coordinates.push(GpsCoordinate::new(latitude, data.read_f64()?));
        }
        Ok(coordinates)
    }

    fn read_node_locations(&self) -> Result<Vec<NodeLocation>, Error> {
        let mut data = StreamReader::open(self.artifact_path("location"))?;
        let mut locations = Vec::new();
        while let Some(is_in_place) = data.try_read_u32()? {
            locations.push(NodeLocation {
                is_in_place: is_in_place == 1,
                place: data.read_u32()?,
                distance: f64::INFINITY,
            });
        }
        Ok(locations)
    }
}

/// The five intermediate files written during pass 1.
struct Pass1Files {
    all_nodes: FileWriter,
    edges: FileWriter,
    places: FileWriter,
    city_outlines: FileWriter,
    bounding_box: FileWriter,
}

impl Pass1Files {
    fn create(importer: &Importer) -> Result<Self, Error> {
        Ok(Self {
            all_nodes: StreamWriter::create(importer.artifact_path("all_nodes"))?,
            edges: StreamWriter::create(importer.artifact_path("edges"))?,
            places: StreamWriter::create(importer.artifact_path("places"))?,
            city_outlines: StreamWriter::create(importer.artifact_path("city_outlines"))?,
            bounding_box: StreamWriter::create(importer.artifact_path("bounding_box"))?,
        })
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.all_nodes.flush()?;
        self.edges.flush()?;
        self.places.flush()?;
        self.city_outlines.flush()?;
        self.bounding_box.flush()?;
        Ok(())
    }
}

/// Step D of the reconciliation: assigns every routing node its place.
///
/// Places are processed in pass-1 order. A place with a matching containing
/// outline claims every routing node inside the polygon with distance 0,
/// overriding any previous assignment. Without an outline, nodes within the
/// type's default radius are claimed if strictly closer than their current
/// assignment, so equal distances retain the earlier place.
fn assign_places(
    node_coordinates: &[GpsCoordinate],
    outlines: &[Outline],
    places: &[Location],
) -> Vec<NodeLocation> {
    let mut node_location = vec![
        NodeLocation {
            is_in_place: false,
            place: 0,
            distance: f64::INFINITY,
        };
        node_coordinates.len()
    ];

    let kd_tree = KdTree::build(
        node_coordinates
            .iter()
            .enumerate()
            .map(|(dense, &gps)| (dense as NodeId, gps))
            .collect(),
    );
    let Some(kd_tree) = kd_tree else {
        return node_location;
    };

    for (place_index, place) in places.iter().enumerate() {
        let projected = UnsignedCoordinate::from_gps(place.coordinate);

        let begin = outlines.partition_point(|outline| outline.name.as_str() < place.name.as_str());
        let containing = outlines[begin..]
            .iter()
            .take_while(|outline| outline.name == place.name)
            .find(|outline| point_in_polygon(&outline.polygon, projected));

        if let Some(outline) = containing {
            let mut radius: f64 = 0.0;
            for vertex in &outline.polygon {
                radius = radius.max(vertex.to_gps().approximate_distance(place.coordinate));
            }

            for (dense, gps) in kd_tree.near_neighbors(place.coordinate, radius) {
                if !point_in_polygon(&outline.polygon, UnsignedCoordinate::from_gps(gps)) {
                    continue;
                }
                node_location[dense as usize] = NodeLocation {
                    is_in_place: true,
                    place: place_index as u32,
                    distance: 0.0,
                };
            }
        } else {
            let Some(radius) = default_radius(place.place_type) else {
                continue;
            };

            for (dense, gps) in kd_tree.near_neighbors(place.coordinate, radius) {
                let distance = gps.approximate_distance(place.coordinate);
                if distance >= node_location[dense as usize].distance {
                    continue;
                }
                node_location[dense as usize] = NodeLocation {
                    is_in_place: true,
                    place: place_index as u32,
                    distance,
                };
            }
        }
    }

    node_location
}

/// Collapses all whitespace runs into single spaces and trims the ends,
/// mirroring how the address search normalizes street names.
fn normalize_whitespace(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::profile::SpeedProfile;

    /// One-class profile so travel times are easy to predict.
    fn residential_profile(speed: f64, speed_in_city: f64) -> SpeedProfile {
        SpeedProfile {
            names: vec!["residential".to_string()],
            speed: vec![speed],
            speed_in_city: vec![speed_in_city],
            average_percentage: vec![100],
        }
    }

    fn import(
        xml: &str,
        configure: impl FnOnce(&mut Settings),
    ) -> (Importer, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("map.osm");
        std::fs::write(&input, xml).expect("write input");

        let mut settings = Settings::new(&input);
        settings.speed_profile = residential_profile(30.0, 30.0);
        configure(&mut settings);

        let mut importer = Importer::new(settings, dir.path());
        importer.preprocess().expect("preprocess");
        (importer, dir)
    }

    fn expected_seconds(a: (f64, f64), b: (f64, f64), speed: f64) -> f64 {
        GpsCoordinate::new(a.0, a.1).distance(GpsCoordinate::new(b.0, b.1)) * 3.6 / speed
    }

    const TWO_NODE_WAY: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.0' lon='0.0'/>
  <node id='2' lat='0.0' lon='0.001'/>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
    <tag k='maxspeed' v='30'/>
  </way>
</osm>
"#;

    #[test]
    fn single_bidirectional_edge() {
        let (importer, _dir) = import(TWO_NODE_WAY, |_| {});

        let nodes = importer.routing_nodes().expect("routing nodes");
        assert_eq!(nodes.len(), 2);
        assert_eq!(
            nodes[0].coordinate,
            UnsignedCoordinate::from_gps(GpsCoordinate::new(0.0, 0.0)),
        );

        let edges = importer.routing_edges().expect("routing edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source, 0);
        assert_eq!(edges[0].target, 1);
        assert!(edges[0].bidirectional);
        // ~111.3 m at 30 km/h
        assert!((edges[0].seconds - 13.36).abs() < 0.27, "got {}", edges[0].seconds);
        let expected = expected_seconds((0.0, 0.0), (0.0, 0.001), 30.0);
        assert!((edges[0].seconds - expected).abs() < 1e-9);
    }

    #[test]
    fn oneway_reversal() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.0' lon='0.0'/>
  <node id='2' lat='0.0' lon='0.001'/>
  <node id='3' lat='0.0' lon='0.002'/>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <nd ref='3'/>
    <tag k='highway' v='residential'/>
    <tag k='oneway' v='-1'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        let edges = importer.routing_edges().expect("routing edges");
        assert_eq!(edges.len(), 2);
        // Path 1-2-3 reversed to 3-2-1, in dense ids 2-1-0
        assert_eq!((edges[0].source, edges[0].target), (2, 1));
        assert_eq!((edges[1].source, edges[1].target), (1, 0));
        assert!(!edges[0].bidirectional);
    }

    #[test]
    fn ignore_oneway_disables_reversal() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.0' lon='0.0'/>
  <node id='2' lat='0.0' lon='0.001'/>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
    <tag k='oneway' v='-1'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |settings| settings.ignore_oneway = true);
        let edges = importer.routing_edges().expect("routing edges");
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].source, edges[0].target), (0, 1));
        assert!(edges[0].bidirectional);
    }

    #[test]
    fn traffic_light_penalty() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.0' lon='0.0'/>
  <node id='2' lat='0.0' lon='0.001'>
    <tag k='highway' v='traffic_signals'/>
  </node>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
    <tag k='maxspeed' v='30'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |settings| settings.traffic_light_penalty = 6.0);
        let edges = importer.routing_edges().expect("routing edges");
        assert_eq!(edges.len(), 1);
        // Only the target carries a signal: half the penalty applies
        let expected = expected_seconds((0.0, 0.0), (0.0, 0.001), 30.0) + 3.0;
        assert!((edges[0].seconds - expected).abs() < 1e-9, "got {}", edges[0].seconds);
    }

    #[test]
    fn default_city_speed_override() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.0' lon='0.0'/>
  <node id='2' lat='0.0' lon='0.001'/>
  <node id='20' lat='0.0005' lon='0.0005'>
    <tag k='place' v='city'/>
    <tag k='name' v='X'/>
  </node>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
    <tag k='name' v='Main Street'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |settings| {
            settings.speed_profile = residential_profile(50.0, 30.0);
            settings.default_city_speed = true;
        });

        let edges = importer.routing_edges().expect("routing edges");
        assert_eq!(edges.len(), 1);
        let expected = expected_seconds((0.0, 0.0), (0.0, 0.001), 30.0);
        assert!((edges[0].seconds - expected).abs() < 1e-9, "got {}", edges[0].seconds);
        assert_eq!(importer.statistics().default_city_speed, 1);

        let address_data = importer.address_data().expect("address data");
        assert_eq!(address_data.places.len(), 1);
        assert_eq!(address_data.places[0].name, "X");
        assert_eq!(address_data.places[0].place_type, Place::City);
        assert_eq!(address_data.places[0].population, -1);
        assert_eq!(
            address_data.addresses,
            [Address {
                name: "Main Street".to_string(),
                near_place: 0,
                way_start: 0,
                way_end: 2,
            }]
        );
        assert_eq!(address_data.way_buffer.len(), 2);
    }

    #[test]
    fn outline_containment_beats_radius() {
        // A 2 km x 2 km square outline around a town; one street inside the
        // polygon, another 3 km out - within the town's default 5 km radius,
        // but the outline must win.
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.005' lon='0.0'/>
  <node id='2' lat='0.005' lon='0.001'/>
  <node id='3' lat='0.027' lon='0.0'/>
  <node id='4' lat='0.027' lon='0.001'/>
  <node id='10' lat='-0.009' lon='-0.009'/>
  <node id='11' lat='-0.009' lon='0.009'/>
  <node id='12' lat='0.009' lon='0.009'/>
  <node id='13' lat='0.009' lon='-0.009'/>
  <node id='20' lat='0.0' lon='0.0'>
    <tag k='place' v='town'/>
    <tag k='name' v='Borowo'/>
  </node>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
    <tag k='name' v='Inner Street'/>
  </way>
  <way id='101'>
    <nd ref='3'/>
    <nd ref='4'/>
    <tag k='highway' v='residential'/>
    <tag k='name' v='Outer Street'/>
  </way>
  <way id='102'>
    <nd ref='10'/>
    <nd ref='11'/>
    <nd ref='12'/>
    <nd ref='13'/>
    <nd ref='10'/>
    <tag k='place' v='town'/>
    <tag k='place_name' v='Borowo'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        assert_eq!(importer.statistics().outlines, 1);
        assert_eq!(importer.statistics().places, 1);

        let address_data = importer.address_data().expect("address data");
        let names: Vec<&str> = address_data
            .addresses
            .iter()
            .map(|address| address.name.as_str())
            .collect();
        assert_eq!(names, ["Inner Street"]);
        assert_eq!(address_data.addresses[0].near_place, 0);
    }

    #[test]
    fn radius_assignment_without_outline() {
        // Hamlet radius is 300 m: the nearby street is claimed,
        // the 1 km-away street is not.
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.001' lon='0.0'/>
  <node id='2' lat='0.001' lon='0.001'/>
  <node id='3' lat='0.01' lon='0.0'/>
  <node id='4' lat='0.01' lon='0.001'/>
  <node id='20' lat='0.0' lon='0.0'>
    <tag k='place' v='hamlet'/>
    <tag k='name' v='Borek'/>
  </node>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
    <tag k='name' v='Near Street'/>
  </way>
  <way id='101'>
    <nd ref='3'/>
    <nd ref='4'/>
    <tag k='highway' v='residential'/>
    <tag k='name' v='Far Street'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        let address_data = importer.address_data().expect("address data");
        let names: Vec<&str> = address_data
            .addresses
            .iter()
            .map(|address| address.name.as_str())
            .collect();
        assert_eq!(names, ["Near Street"]);
    }

    #[test]
    fn zero_speed_way_is_dropped() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.0' lon='0.0'/>
  <node id='2' lat='0.0' lon='0.001'/>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
    <tag k='maxspeed' v='0'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        assert_eq!(importer.statistics().zero_speed, 1);
        assert!(importer.routing_edges().expect("routing edges").is_empty());
        // The nodes still count as routing nodes
        assert_eq!(importer.routing_nodes().expect("routing nodes").len(), 2);
    }

    #[test]
    fn way_with_missing_node_is_dropped() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.0' lon='0.0'/>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        assert!(importer.routing_edges().expect("routing edges").is_empty());
        assert_eq!(importer.routing_nodes().expect("routing nodes").len(), 2);
    }

    #[test]
    fn dense_ids_are_monotone_in_raw_ids() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='42' lat='0.001' lon='0.0'/>
  <node id='7' lat='0.002' lon='0.0'/>
  <way id='100'>
    <nd ref='42'/>
    <nd ref='7'/>
    <tag k='highway' v='residential'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        let nodes = importer.routing_nodes().expect("routing nodes");
        // Raw id 7 < 42, so dense id 0 belongs to node 7
        assert_eq!(
            nodes[0].coordinate,
            UnsignedCoordinate::from_gps(GpsCoordinate::new(0.002, 0.0)),
        );
        let edges = importer.routing_edges().expect("routing edges");
        assert_eq!((edges[0].source, edges[0].target), (1, 0));
    }

    #[test]
    fn duplicate_node_takes_last_coordinate() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <node id='1' lat='0.5' lon='0.5'/>
  <node id='1' lat='0.25' lon='0.25'/>
  <node id='2' lat='0.25' lon='0.251'/>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        let nodes = importer.routing_nodes().expect("routing nodes");
        assert_eq!(
            nodes[0].coordinate,
            UnsignedCoordinate::from_gps(GpsCoordinate::new(0.25, 0.25)),
        );
    }

    #[test]
    fn bounding_box_corners_are_ordered() {
        let xml = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version='0.6'>
  <bound box='51.9,20.9,52.1,21.1'/>
  <node id='1' lat='52.0' lon='21.0'/>
  <node id='2' lat='52.0' lon='21.001'/>
  <way id='100'>
    <nd ref='1'/>
    <nd ref='2'/>
    <tag k='highway' v='residential'/>
  </way>
</osm>
"#;
        let (importer, _dir) = import(xml, |_| {});
        let bounding_box = importer.bounding_box().expect("bounding box");
        assert!(bounding_box.min.x <= bounding_box.max.x);
        assert!(bounding_box.min.y <= bounding_box.max.y);
        // Mercator y grows southwards, so the minimum y comes from the
        // northern corner
        let north = UnsignedCoordinate::from_gps(GpsCoordinate::new(52.1, 21.1));
        assert_eq!(bounding_box.min.y, north.y);
        assert_eq!(bounding_box.max.x, north.x);
    }

    #[test]
    fn id_map_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let importer = Importer::new(Settings::new("unused.osm"), dir.path());
        importer.set_id_map(&[5, 7, 9]).expect("set id map");
        assert_eq!(importer.id_map().expect("id map"), [5, 7, 9]);
    }

    #[test]
    fn no_routing_nodes_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("map.osm");
        std::fs::write(&input, "<osm version='0.6'></osm>").expect("write input");
        let mut importer = Importer::new(Settings::new(&input), dir.path());
        assert!(matches!(
            importer.preprocess(),
            Err(Error::NoRoutingNodes)
        ));
    }

    #[test]
    fn empty_speed_profile_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut settings = Settings::new("unused.osm");
        settings.speed_profile = SpeedProfile {
            names: vec![],
            speed: vec![],
            speed_in_city: vec![],
            average_percentage: vec![],
        };
        let mut importer = Importer::new(settings, dir.path());
        assert!(matches!(importer.preprocess(), Err(Error::NoSpeedProfile)));
    }

    #[test]
    fn delete_temporary_files_cleans_the_output() {
        let (importer, dir) = import(TWO_NODE_WAY, |_| {});
        importer.set_id_map(&[0, 1]).expect("set id map");
        assert!(dir.path().join("mapped_edges").exists());
        importer.delete_temporary_files();
        assert!(!dir.path().join("mapped_edges").exists());
        assert!(!dir.path().join("id_map").exists());
        assert!(!dir.path().join("all_nodes").exists());
    }
}
