// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use crate::{GpsCoordinate, NodeId};

/// KdTree implements the [k-d tree data structure](https://en.wikipedia.org/wiki/K-d_tree)
/// over indexed lat-lon points, used to speed up the radius queries of the
/// spatial reconciliation step. It trades memory usage for CPU time compared
/// to a linear scan over every routing node per place.
///
/// This implementation assumes euclidean geometry, even though distances are
/// measured with [GpsCoordinate::approximate_distance]. This results in
/// undefined behavior when points are close to the ante meridian
/// (180°/-180° longitude) or poles (90°/-90° latitude), or when the data
/// spans multiple continents.
#[derive(Debug, Clone)]
pub struct KdTree {
    pivot: (NodeId, GpsCoordinate),
    left: Option<Box<KdTree>>,
    right: Option<Box<KdTree>>,
}

impl KdTree {
    /// Builds a k-d tree from a vector of indexed points.
    /// Returns `None` for an empty input.
    pub fn build(mut points: Vec<(NodeId, GpsCoordinate)>) -> Option<Self> {
        Self::build_impl(points.as_mut_slice(), false)
    }

    fn build_impl(points: &mut [(NodeId, GpsCoordinate)], lon_divides: bool) -> Option<Self> {
        match points.len() {
            0 => None,
            1 => Some(Self {
                pivot: points[0],
                left: None,
                right: None,
            }),
            _ => {
                if lon_divides {
                    points.sort_by(|a, b| a.1.longitude.total_cmp(&b.1.longitude));
                } else {
                    points.sort_by(|a, b| a.1.latitude.total_cmp(&b.1.latitude));
                }
                let median = points.len() / 2;
                let pivot = points[median];
                let (left, right_and_pivot) = points.split_at_mut(median);
                let right = &mut right_and_pivot[1..];
                Some(Self {
                    pivot,
                    left: box_option(Self::build_impl(left, !lon_divides)),
                    right: box_option(Self::build_impl(right, !lon_divides)),
                })
            }
        }
    }

    /// Collects every point within `radius` meters of `center`, measured with
    /// [GpsCoordinate::approximate_distance]. Results are returned in
    /// deterministic traversal order for a given tree.
    pub fn near_neighbors(
        &self,
        center: GpsCoordinate,
        radius: f64,
    ) -> Vec<(NodeId, GpsCoordinate)> {
        let mut hits = Vec::new();
        self.near_neighbors_impl(center, radius, false, &mut hits);
        hits
    }

    fn near_neighbors_impl(
        &self,
        center: GpsCoordinate,
        radius: f64,
        lon_divides: bool,
        hits: &mut Vec<(NodeId, GpsCoordinate)>,
    ) {
        if center.approximate_distance(self.pivot.1) <= radius {
            hits.push(self.pivot);
        }

        // Recurse into the branch containing the query point first
        let first_left = if lon_divides {
            center.longitude < self.pivot.1.longitude
        } else {
            center.latitude < self.pivot.1.latitude
        };
        let (first, second) = if first_left {
            (&self.left, &self.right)
        } else {
            (&self.right, &self.left)
        };

        if let Some(ref branch) = first {
            branch.near_neighbors_impl(center, radius, !lon_divides, hits);
        }

        // The far branch can only contain hits if the splitting axis itself
        // is within the query radius.
        if let Some(ref branch) = second {
            let axis_point = if lon_divides {
                GpsCoordinate::new(center.latitude, self.pivot.1.longitude)
            } else {
                GpsCoordinate::new(self.pivot.1.latitude, center.longitude)
            };
            if center.approximate_distance(axis_point) <= radius {
                branch.near_neighbors_impl(center, radius, !lon_divides, hits);
            }
        }
    }
}

#[inline]
fn box_option<T>(o: Option<T>) -> Option<Box<T>> {
    o.map(|thing| Box::new(thing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<(NodeId, GpsCoordinate)> {
        vec![
            (1, GpsCoordinate::new(0.01, 0.01)),
            (2, GpsCoordinate::new(0.01, 0.05)),
            (3, GpsCoordinate::new(0.03, 0.09)),
            (4, GpsCoordinate::new(0.04, 0.03)),
            (5, GpsCoordinate::new(0.04, 0.07)),
            (6, GpsCoordinate::new(0.07, 0.03)),
            (7, GpsCoordinate::new(0.07, 0.01)),
            (8, GpsCoordinate::new(0.08, 0.05)),
            (9, GpsCoordinate::new(0.08, 0.09)),
        ]
    }

    fn sorted_indices(mut hits: Vec<(NodeId, GpsCoordinate)>) -> Vec<NodeId> {
        hits.sort_by_key(|&(index, _)| index);
        hits.into_iter().map(|(index, _)| index).collect()
    }

    #[test]
    fn radius_query_single() {
        let tree = KdTree::build(grid()).expect("k-d tree from non-empty input");
        // 0.01 degrees is roughly 1.1 km; 500 m around a grid point catches
        // only the point itself.
        let hits = tree.near_neighbors(GpsCoordinate::new(0.04, 0.03), 500.0);
        assert_eq!(sorted_indices(hits), [4]);
    }

    #[test]
    fn radius_query_neighborhood() {
        let tree = KdTree::build(grid()).expect("k-d tree from non-empty input");
        // 4.1 km around (0.04, 0.03): one degree is roughly 111.2 km, so this
        // catches the points within ~0.0369 degrees and leaves out 5 and 8.
        let hits = tree.near_neighbors(GpsCoordinate::new(0.04, 0.03), 4100.0);
        assert_eq!(sorted_indices(hits), [1, 2, 4, 6, 7]);
    }

    #[test]
    fn radius_query_everything() {
        let tree = KdTree::build(grid()).expect("k-d tree from non-empty input");
        let hits = tree.near_neighbors(GpsCoordinate::new(0.05, 0.05), 50_000.0);
        assert_eq!(sorted_indices(hits), [1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn empty_input() {
        assert!(KdTree::build(Vec::new()).is_none());
    }
}
