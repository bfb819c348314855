//! Geographic resolution.
//!
//! Maps coordinates to the nearest known location (great-circle distance)
//! and to the cache key that bucket requests share. Pure functions of the
//! coordinates and the catalog loaded at startup.

pub mod catalog;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use crate::types::{Coordinates, KnownLocation, LocationKey};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points, in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

// ---------------------------------------------------------------------------
// Bounding box
// ---------------------------------------------------------------------------

/// The rectangle of coordinates the service accepts (inclusive edges).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self { min_lat, max_lat, min_lon, max_lon }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

impl Default for BoundingBox {
    /// Zimbabwe and its immediate surroundings.
    fn default() -> Self {
        Self::new(-23.0, -15.0, 24.0, 34.0)
    }
}

impl FromStr for BoundingBox {
    type Err = anyhow::Error;

    /// Parse `"min_lat,max_lat,min_lon,max_lon"`.
    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Bounding box contains a non-numeric value: {s}"))?;

        let [min_lat, max_lat, min_lon, max_lon] = parts[..] else {
            return Err(anyhow!(
                "Bounding box needs 4 values (min_lat,max_lat,min_lon,max_lon), got {}",
                parts.len()
            ));
        };
        if min_lat > max_lat || min_lon > max_lon {
            return Err(anyhow!("Bounding box minimums exceed maximums: {s}"));
        }
        Ok(Self::new(min_lat, max_lat, min_lon, max_lon))
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// The outcome of resolving a coordinate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub key: LocationKey,
    /// Nearest known location, regardless of distance.
    pub nearest: Option<NearestLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearestLocation {
    pub location: KnownLocation,
    pub distance_km: f64,
}

/// Resolves coordinates against a static catalog.
#[derive(Debug, Clone)]
pub struct GeoResolver {
    catalog: Vec<KnownLocation>,
    resolution_radius_km: f64,
}

impl GeoResolver {
    pub fn new(catalog: Vec<KnownLocation>, resolution_radius_km: f64) -> Self {
        Self { catalog, resolution_radius_km }
    }

    /// Resolver with no catalog: every key is synthetic.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0.0)
    }

    pub fn catalog(&self) -> &[KnownLocation] {
        &self.catalog
    }

    pub fn find_slug(&self, slug: &str) -> Option<&KnownLocation> {
        self.catalog.iter().find(|l| l.slug == slug)
    }

    /// Nearest known location by great-circle distance.
    pub fn nearest(&self, coords: Coordinates) -> Option<NearestLocation> {
        self.catalog
            .iter()
            .map(|loc| (loc, haversine_km(coords, loc.coordinates())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(loc, distance_km)| NearestLocation {
                location: loc.clone(),
                distance_km,
            })
    }

    /// Resolve coordinates to a cache key plus the nearest known location.
    ///
    /// The key is the nearest location's slug when it lies within the
    /// resolution radius, otherwise the synthetic rounded-coordinate key.
    pub fn resolve(&self, coords: Coordinates) -> Resolution {
        let nearest = self.nearest(coords);
        let key = match &nearest {
            Some(n) if n.distance_km <= self.resolution_radius_km => n.location.key(),
            _ => LocationKey::synthetic(coords),
        };
        debug!(
            %coords,
            location_key = %key,
            nearest = nearest.as_ref().map(|n| n.location.slug.as_str()),
            "Resolved coordinates"
        );
        Resolution { key, nearest }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
