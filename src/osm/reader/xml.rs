// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::io;
use std::str::from_utf8;

use super::model;

pub fn features_from_file<R: io::BufRead>(
    reader: R,
) -> impl Iterator<Item = Result<model::Feature, quick_xml::Error>> {
    Reader::from_io(reader)
}

pub fn features_from_buffer(
    b: &[u8],
) -> impl Iterator<Item = Result<model::Feature, quick_xml::Error>> + '_ {
    Reader::from_buffer(b)
}

/// Parser is a trait for objects which can parse XML.
///
/// This trait only exists to fix the mismatch of
/// [quick_xml::Reader::read_event] when working on buffered data
/// and [quick_xml::Reader::read_event_into] when working on IO.
trait Parser {
    fn read_event<'a>(&'a mut self) -> quick_xml::Result<quick_xml::events::Event<'a>>;
}

/// IoParser implements [Parser] over an [std::io::BufRead].
struct IoParser<R: io::BufRead>(quick_xml::Reader<R>, Vec<u8>);

impl<R: io::BufRead> IoParser<R> {
    #[inline]
    fn new(reader: R) -> Self {
        Self(quick_xml::Reader::from_reader(reader), Vec::default())
    }
}

impl<R: io::BufRead> Parser for IoParser<R> {
    #[inline]
    fn read_event<'a>(&'a mut self) -> quick_xml::Result<quick_xml::events::Event<'a>> {
        self.0.read_event_into(&mut self.1)
    }
}

/// BufParser implements [Parser] over a slice of bytes (`&[u8]`).
struct BufParser<'a>(quick_xml::Reader<&'a [u8]>);

impl<'a> BufParser<'a> {
    #[inline]
    fn new(data: &'a [u8]) -> Self {
        Self(quick_xml::Reader::from_reader(data))
    }
}

impl<'a> Parser for BufParser<'a> {
    #[inline]
    fn read_event<'b>(&'b mut self) -> quick_xml::Result<quick_xml::events::Event<'b>> {
        self.0.read_event()
    }
}

/// Reader reads osm [Features](model::Feature) from an XML file, holding at
/// most one feature in memory at a time.
struct Reader<P: Parser> {
    parser: P,
    eof: bool,
}

impl<P: Parser> Reader<P> {
    #[inline]
    fn new(parser: P) -> Self {
        Self { parser, eof: false }
    }
}

impl<P: Parser> Iterator for Reader<P> {
    type Item = Result<model::Feature, quick_xml::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut f: Option<model::Feature> = None;

        while !self.eof {
            let event = match self.parser.read_event() {
                Ok(e) => e,
                Err(e) => return Some(Err(e)),
            };

            match event {
                quick_xml::events::Event::Empty(start) => {
                    match start.local_name().as_ref() {
                        b"node" => match parse_node(start) {
                            Some(n) => return Some(Ok(model::Feature::Node(n))),
                            None => warn_malformed("node"),
                        },
                        b"bound" | b"bounds" => match parse_bounds(start) {
                            Some(b) => return Some(Ok(model::Feature::Bounds(b))),
                            None => warn_malformed("bound"),
                        },
                        // "way" can't be self-closing
                        b"tag" => {
                            if let Some(tags) = feature_tags(&mut f) {
                                if let Some((k, v)) = parse_tag(start) {
                                    tags.insert(k, v);
                                }
                            }
                        }
                        b"nd" => {
                            if let Some(nodes) = feature_nodes(&mut f) {
                                if let Some(ref_) = parse_nd(start) {
                                    nodes.push(ref_);
                                }
                            }
                        }
                        _ => {}
                    }
                }

                quick_xml::events::Event::Start(start) => match start.local_name().as_ref() {
                    b"node" => {
                        f = parse_node(start).map(model::Feature::Node);
                        if f.is_none() {
                            warn_malformed("node");
                        }
                    }
                    b"way" => {
                        f = parse_way(start).map(model::Feature::Way);
                        if f.is_none() {
                            warn_malformed("way");
                        }
                    }
                    b"bound" | b"bounds" => {
                        f = parse_bounds(start).map(model::Feature::Bounds);
                        if f.is_none() {
                            warn_malformed("bound");
                        }
                    }
                    // "tag" and "nd" must be self-closing
                    _ => {}
                },

                quick_xml::events::Event::End(end) => match end.local_name().as_ref() {
                    b"node" | b"way" | b"bound" | b"bounds" => {
                        if let Some(f) = f.take() {
                            return Some(Ok(f));
                        }
                    }
                    _ => {}
                },

                quick_xml::events::Event::Eof => {
                    self.eof = true;
                }

                _ => {}
            }
        }

        f.map(Ok)
    }
}

impl<'a> Reader<BufParser<'a>> {
    #[inline]
    fn from_buffer(data: &'a [u8]) -> Self {
        Self::new(BufParser::new(data))
    }
}

impl<R: io::BufRead> Reader<IoParser<R>> {
    #[inline]
    fn from_io(reader: R) -> Self {
        Self::new(IoParser::new(reader))
    }
}

fn warn_malformed(element: &str) {
    log::warn!(target: "osmpack.osm", "malformed <{}> element - skipping", element);
}

fn parse_node(start: quick_xml::events::BytesStart<'_>) -> Option<model::Node> {
    let mut id: u64 = 0;
    let mut lat = f64::NAN;
    let mut lon = f64::NAN;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        match attr.key.as_ref() {
            b"id" => id = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"lat" => lat = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"lon" => lon = from_utf8(&attr.value).ok()?.parse().ok()?,
            _ => {}
        }
    }

    if id != 0 && lat.is_finite() && lon.is_finite() {
        Some(model::Node {
            id,
            lat,
            lon,
            tags: HashMap::default(),
        })
    } else {
        None
    }
}

fn parse_way(start: quick_xml::events::BytesStart<'_>) -> Option<model::Way> {
    let mut id: u64 = 0;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        if attr.key.as_ref() == b"id" {
            id = from_utf8(&attr.value).ok()?.parse().ok()?;
        }
    }

    if id != 0 {
        Some(model::Way {
            id,
            nodes: Vec::default(),
            tags: HashMap::default(),
        })
    } else {
        None
    }
}

fn parse_bounds(start: quick_xml::events::BytesStart<'_>) -> Option<model::Bounds> {
    // min lat, min lon, max lat, max lon
    let mut corners = [f64::NAN; 4];

    for attr in start.attributes() {
        let attr = attr.ok()?;
        match attr.key.as_ref() {
            // Legacy form: box="minLat,minLon,maxLat,maxLon"
            b"box" => {
                let text = from_utf8(&attr.value).ok()?;
                let parts: Vec<&str> = text.split(',').collect();
                if parts.len() != 4 {
                    return None;
                }
                for (corner, part) in corners.iter_mut().zip(&parts) {
                    *corner = part.trim().parse().ok()?;
                }
            }
            b"minlat" => corners[0] = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"minlon" => corners[1] = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"maxlat" => corners[2] = from_utf8(&attr.value).ok()?.parse().ok()?,
            b"maxlon" => corners[3] = from_utf8(&attr.value).ok()?.parse().ok()?,
            _ => {}
        }
    }

    if corners.iter().all(|corner| corner.is_finite()) {
        let [min_lat, min_lon, max_lat, max_lon] = corners;
        Some(model::Bounds {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    } else {
        None
    }
}

fn parse_tag(start: quick_xml::events::BytesStart<'_>) -> Option<(String, String)> {
    let mut k = None;
    let mut v = None;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        match attr.key.as_ref() {
            b"k" => k = from_utf8(&attr.value).ok().map(|s| s.to_string()),
            b"v" => v = from_utf8(&attr.value).ok().map(|s| s.to_string()),
            _ => {}
        }
    }

    k.map(|k| (k, v.unwrap_or_default()))
}

fn parse_nd(start: quick_xml::events::BytesStart<'_>) -> Option<u64> {
    let mut ref_: u64 = 0;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        if attr.key.as_ref() == b"ref" {
            ref_ = from_utf8(&attr.value).ok()?.parse().ok()?;
        }
    }

    if ref_ != 0 {
        Some(ref_)
    } else {
        None
    }
}

fn feature_tags(f: &mut Option<model::Feature>) -> Option<&mut HashMap<String, String>> {
    match f {
        Some(model::Feature::Node(ref mut n)) => Some(&mut n.tags),
        Some(model::Feature::Way(ref mut w)) => Some(&mut w.tags),
        _ => None,
    }
}

fn feature_nodes(f: &mut Option<model::Feature>) -> Option<&mut Vec<u64>> {
    match f {
        Some(model::Feature::Way(ref mut w)) => Some(&mut w.nodes),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! tags {
        {} => { HashMap::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    const SIMPLE_XML: &[u8] = include_bytes!("test_fixtures/simple.osm");

    fn get_expected_nodes() -> Vec<model::Node> {
        vec![
            model::Node {
                id: 1,
                lat: 52.0,
                lon: 21.0,
                tags: tags! {},
            },
            model::Node {
                id: 2,
                lat: 52.0,
                lon: 21.001,
                tags: tags! {"highway": "traffic_signals"},
            },
            model::Node {
                id: 3,
                lat: 52.0005,
                lon: 21.0005,
                tags: tags! {"place": "town", "name": "Borowo", "population": "7000"},
            },
        ]
    }

    fn get_expected_ways() -> Vec<model::Way> {
        vec![
            model::Way {
                id: 100,
                nodes: vec![1, 2],
                tags: tags! {"highway": "residential", "name": "Długa"},
            },
            model::Way {
                id: 101,
                nodes: vec![1, 2, 3, 1],
                tags: tags! {"place": "town", "place_name": "Borowo"},
            },
        ]
    }

    fn collect_all<E: std::error::Error, F: IntoIterator<Item = Result<model::Feature, E>>>(
        features: F,
    ) -> Result<(Vec<model::Node>, Vec<model::Way>, Vec<model::Bounds>), E> {
        let mut nodes = Vec::default();
        let mut ways = Vec::default();
        let mut bounds = Vec::default();

        for f in features {
            match f {
                Ok(model::Feature::Node(n)) => nodes.push(n),
                Ok(model::Feature::Way(w)) => ways.push(w),
                Ok(model::Feature::Bounds(b)) => bounds.push(b),
                Err(e) => return Err(e),
            }
        }

        Ok((nodes, ways, bounds))
    }

    fn check_against_expected<
        E: std::error::Error,
        F: IntoIterator<Item = Result<model::Feature, E>>,
    >(
        features: F,
    ) -> Result<(), E> {
        let (nodes, ways, bounds) = collect_all(features)?;
        assert_eq!(nodes, get_expected_nodes());
        assert_eq!(ways, get_expected_ways());
        assert_eq!(
            bounds,
            [model::Bounds {
                min_lat: 51.9,
                min_lon: 20.9,
                max_lat: 52.1,
                max_lon: 21.1,
            }]
        );
        Ok(())
    }

    #[test]
    fn parse_from_buf() -> Result<(), quick_xml::Error> {
        check_against_expected(Reader::from_buffer(SIMPLE_XML))
    }

    #[test]
    fn parse_from_io() -> Result<(), quick_xml::Error> {
        check_against_expected(Reader::from_io(io::Cursor::new(SIMPLE_XML)))
    }

    #[test]
    fn parse_bounds_attribute_form() {
        let xml = br#"<osm><bounds minlat="1.5" minlon="2.5" maxlat="3.5" maxlon="4.5"/></osm>"#;
        let (_, _, bounds) = collect_all(Reader::from_buffer(xml)).expect("well-formed xml");
        assert_eq!(
            bounds,
            [model::Bounds {
                min_lat: 1.5,
                min_lon: 2.5,
                max_lat: 3.5,
                max_lon: 4.5,
            }]
        );
    }

    #[test]
    fn malformed_bound_is_skipped() {
        let xml = br#"<osm><bound box="1.0,2.0,3.0"/><node id="7" lat="0.5" lon="0.5"/></osm>"#;
        let (nodes, _, bounds) = collect_all(Reader::from_buffer(xml)).expect("well-formed xml");
        assert!(bounds.is_empty());
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn node_without_position_is_skipped() {
        let xml = br#"<osm><node id="7"/><node id="8" lat="0.5" lon="0.5"/></osm>"#;
        let (nodes, _, _) = collect_all(Reader::from_buffer(xml)).expect("well-formed xml");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, 8);
    }
}
