// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::ffi::OsStr;
use std::path::Path;

pub mod model;
pub mod xml;

/// Format of the input OSM file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Unknown format - guess the format based on the content
    Unknown,

    /// Force uncompressed [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    Xml,

    /// Force [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    /// with [gzip](https://en.wikipedia.org/wiki/Gzip) compression
    XmlGz,

    /// Force [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    /// with [bzip2](https://en.wikipedia.org/wiki/Bzip2) compression
    XmlBz2,
}

impl FileFormat {
    /// Attempts to detect the file format based on the initial bytes of the file.
    pub fn detect(b: &[u8]) -> FileFormat {
        if b.starts_with(b"<?xml") || b.starts_with(b"<osm") {
            FileFormat::Xml
        } else if b.starts_with(b"\x1F\x8B") {
            FileFormat::XmlGz // Gzip magic bytes
        } else if b.starts_with(b"BZh") {
            FileFormat::XmlBz2 // Bzip2 magic bytes
        } else {
            FileFormat::Unknown
        }
    }

    /// Guesses the file format from the file name extension, as a fallback
    /// for content detection (e.g. XML with a leading byte-order mark).
    pub fn from_extension(path: &Path) -> FileFormat {
        match path.extension().and_then(OsStr::to_str) {
            Some("bz2") => FileFormat::XmlBz2,
            Some("gz") => FileFormat::XmlGz,
            Some("osm") | Some("xml") => FileFormat::Xml,
            _ => FileFormat::Unknown,
        }
    }
}
