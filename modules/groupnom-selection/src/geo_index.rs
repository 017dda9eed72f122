//! Geohash cell cover for "restaurants within R km of a point".
//!
//! The catalog stores each restaurant's geohash at two precisions. A query
//! turns (point, radius) into the block of cells around the point's cell, large
//! enough that no restaurant inside the disc is missed. The block
//! over-approximates the disc, so callers re-check with [`haversine_km`].

use std::collections::BTreeSet;
use std::fmt;

use geohash::Coord;
use serde::{Deserialize, Serialize};

use groupnom_common::{haversine_km, GeoPoint};

/// Earth radius of the sphere `haversine_km` uses.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers per degree of arc on that sphere.
const KM_PER_DEGREE: f64 = 111.195;

/// Radii at or below this use the fine grid.
pub const FINE_RADIUS_THRESHOLD_KM: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Geohash precision 6, ~1.22 km x 0.61 km.
    Coarse,
    /// Geohash precision 7, ~153 m x 153 m.
    Fine,
}

impl Resolution {
    pub fn precision(self) -> usize {
        match self {
            Resolution::Coarse => 6,
            Resolution::Fine => 7,
        }
    }

    /// Fixed threshold: small discs on a coarse grid would drag in a pool
    /// many times the size of the disc.
    pub fn for_radius(radius_km: f64) -> Self {
        if radius_km <= FINE_RADIUS_THRESHOLD_KM {
            Resolution::Fine
        } else {
            Resolution::Coarse
        }
    }

    /// Cell size in degrees as (longitude span, latitude span). Geohash
    /// interleaves bits starting with longitude, so longitude gets the odd bit.
    pub fn cell_degrees(self) -> (f64, f64) {
        let bits = 5 * self.precision() as i32;
        let lng_bits = (bits + 1) / 2;
        let lat_bits = bits / 2;
        (360.0 / 2f64.powi(lng_bits), 180.0 / 2f64.powi(lat_bits))
    }

    /// Shorter cell side in km at the equator.
    pub fn edge_km(self) -> f64 {
        let (lng_deg, lat_deg) = self.cell_degrees();
        lat_deg.min(lng_deg) * KM_PER_DEGREE
    }

    /// Cells in one full row of longitude.
    pub fn columns(self) -> i64 {
        let (lng_deg, _) = self.cell_degrees();
        (360.0 / lng_deg).round() as i64
    }

    /// Catalog column holding the geohash at this precision.
    pub fn column(self) -> &'static str {
        match self {
            Resolution::Coarse => "geohash6",
            Resolution::Fine => "geohash7",
        }
    }
}

/// A geohash cell identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The cell containing a point. `None` only for out-of-range coordinates.
pub fn cell_for(lat: f64, lng: f64, resolution: Resolution) -> Option<CellId> {
    geohash::encode(Coord { x: lng, y: lat }, resolution.precision())
        .ok()
        .map(CellId)
}

/// How far a block reaches from the center cell, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSpan {
    /// Rows above and below the center row.
    pub lat_rings: u32,
    /// Columns either side of the center column. `None` takes whole rows.
    pub lng_rings: Option<u32>,
}

impl RingSpan {
    pub fn square(rings: u32) -> Self {
        Self {
            lat_rings: rings,
            lng_rings: Some(rings),
        }
    }

    pub fn is_whole_rows(&self) -> bool {
        self.lng_rings.is_none()
    }
}

/// Rows and columns needed so a block around `point`'s cell contains every
/// point within `radius_km`, plus one cell of slack on each axis.
///
/// The north-south reach is the same everywhere. The east-west reach is the
/// widest longitude the disc spans, `asin(sin δ / cos φ)`; a disc touching a
/// pole spans every longitude and takes whole rows.
pub fn ring_span(point: GeoPoint, radius_km: f64, resolution: Resolution) -> RingSpan {
    let (lng_step, lat_step) = resolution.cell_degrees();
    let delta = radius_km.max(0.0) / EARTH_RADIUS_KM;
    let delta_deg = delta.to_degrees();
    let lat_rings = (delta_deg / lat_step).ceil() as u32 + 1;

    if point.lat.abs() + delta_deg >= 90.0 {
        return RingSpan {
            lat_rings,
            lng_rings: None,
        };
    }

    let ratio = delta.sin() / point.lat.to_radians().cos();
    let lng_reach_deg = ratio.min(1.0).asin().to_degrees();
    let lng_rings = (lng_reach_deg / lng_step).ceil() as u32 + 1;
    if 2 * lng_rings as i64 + 1 >= resolution.columns() {
        return RingSpan {
            lat_rings,
            lng_rings: None,
        };
    }
    RingSpan {
        lat_rings,
        lng_rings: Some(lng_rings),
    }
}

/// The center cell plus `rings` rings of adjacent cells: a (2k+1)² block.
/// `neighborhood(k) ⊆ neighborhood(k + 1)`.
pub fn neighborhood(lat: f64, lng: f64, rings: u32, resolution: Resolution) -> BTreeSet<CellId> {
    block(lat, lng, RingSpan::square(rings), resolution)
}

/// Cells within `span` of the cell holding (lat, lng).
///
/// Built by stepping whole cell widths away from the center cell's centroid,
/// so every step lands mid-cell. Longitude wraps at the antimeridian; rows
/// past a pole are dropped.
pub fn block(lat: f64, lng: f64, span: RingSpan, resolution: Resolution) -> BTreeSet<CellId> {
    let mut cells = BTreeSet::new();
    let Some(center) = cell_for(lat, lng, resolution) else {
        return cells;
    };
    let Ok((centroid, _, _)) = geohash::decode(center.as_str()) else {
        cells.insert(center);
        return cells;
    };

    let (lng_step, lat_step) = resolution.cell_degrees();
    let k = span.lat_rings as i64;
    for dy in -k..=k {
        let row_lat = centroid.y + dy as f64 * lat_step;
        if !(-90.0..=90.0).contains(&row_lat) {
            continue;
        }
        match span.lng_rings {
            Some(lng_rings) => {
                let j = lng_rings as i64;
                for dx in -j..=j {
                    let col_lng = wrap_lng(centroid.x + dx as f64 * lng_step);
                    if let Some(cell) = cell_for(row_lat, col_lng, resolution) {
                        cells.insert(cell);
                    }
                }
            }
            None => {
                for col in 0..resolution.columns() {
                    let col_lng = -180.0 + (col as f64 + 0.5) * lng_step;
                    if let Some(cell) = cell_for(row_lat, col_lng, resolution) {
                        cells.insert(cell);
                    }
                }
            }
        }
    }
    cells
}

fn wrap_lng(lng: f64) -> f64 {
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

/// Smallest square ring count whose coverage reaches `radius_km`, plus one
/// ring of slack, using the equatorial cell edge. Away from the equator use
/// [`ring_span`], which sizes each axis separately.
pub fn radius_to_ring_count(radius_km: f64, resolution: Resolution) -> u32 {
    (radius_km.max(0.0) / resolution.edge_km()).ceil() as u32 + 1
}

/// Exact distance for the final filter after the cell prefilter.
pub fn precise_distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_km(lat1, lng1, lat2, lng2)
}

/// Cells to hand the catalog for one query.
#[derive(Debug, Clone)]
pub struct CellCover {
    pub resolution: Resolution,
    pub span: RingSpan,
    pub cells: BTreeSet<CellId>,
}

impl CellCover {
    /// Cover for a disc: resolution by radius threshold, reach per axis by
    /// [`ring_span`]. A disc that needs whole rows of fine cells drops to the
    /// coarse grid, which has an eighth as many columns.
    pub fn for_radius(point: GeoPoint, radius_km: f64) -> Self {
        let mut resolution = Resolution::for_radius(radius_km);
        let mut span = ring_span(point, radius_km, resolution);
        if span.is_whole_rows() && resolution == Resolution::Fine {
            resolution = Resolution::Coarse;
            span = ring_span(point, radius_km, resolution);
        }
        Self {
            resolution,
            span,
            cells: block(point.lat, point.lng, span, resolution),
        }
    }

    pub fn around(point: GeoPoint, rings: u32, resolution: Resolution) -> Self {
        Self {
            resolution,
            span: RingSpan::square(rings),
            cells: neighborhood(point.lat, point.lng, rings, resolution),
        }
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        cell_for(lat, lng, self.resolution)
            .map(|cell| self.cells.contains(&cell))
            .unwrap_or(false)
    }
}
