// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::io;
use std::sync::Arc;

pub mod importer;
pub mod profile;
pub mod reader;
pub mod tags;

pub use importer::{AddressData, Importer, Statistics};
pub use profile::{Settings, SpeedProfile};

/// Error which can occur during the OSM import.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] Arc<io::Error>),

    #[error("xml: {0}")]
    Xml(quick_xml::Error),

    #[error("unknown file format: data does not look like .osm/.osm.gz/.osm.bz2")]
    UnknownFileFormat,

    #[error("no speed profile specified")]
    NoSpeedProfile,

    #[error("no routing nodes found in the data set")]
    NoRoutingNodes,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        match e {
            quick_xml::Error::Io(ioe) => Error::Io(ioe),
            _ => Error::Xml(e),
        }
    }
}
