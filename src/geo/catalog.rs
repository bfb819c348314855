//! Known-location catalog.
//!
//! A built-in list of Zimbabwean towns and destinations, replaceable at
//! startup by a TOML file of `[[locations]]` tables.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::types::KnownLocation;

/// Static catalog row (slug, name, lat, lon, elevation, province, tags).
struct Entry {
    slug: &'static str,
    name: &'static str,
    lat: f64,
    lon: f64,
    elevation: f64,
    province: &'static str,
    tags: &'static [&'static str],
}

const BUILTIN: &[Entry] = &[
    Entry { slug: "harare", name: "Harare", lat: -17.8292, lon: 31.0522, elevation: 1490.0, province: "Harare", tags: &["city"] },
    Entry { slug: "bulawayo", name: "Bulawayo", lat: -20.1500, lon: 28.5833, elevation: 1358.0, province: "Bulawayo", tags: &["city"] },
    Entry { slug: "mutare", name: "Mutare", lat: -18.9707, lon: 32.6709, elevation: 1120.0, province: "Manicaland", tags: &["city"] },
    Entry { slug: "gweru", name: "Gweru", lat: -19.4500, lon: 29.8167, elevation: 1420.0, province: "Midlands", tags: &["city"] },
    Entry { slug: "masvingo", name: "Masvingo", lat: -20.0637, lon: 30.8277, elevation: 1070.0, province: "Masvingo", tags: &["city"] },
    Entry { slug: "victoria-falls", name: "Victoria Falls", lat: -17.9243, lon: 25.8572, elevation: 915.0, province: "Matabeleland North", tags: &["waterfall", "adventure"] },
    Entry { slug: "hwange", name: "Hwange National Park", lat: -18.6297, lon: 26.4990, elevation: 1050.0, province: "Matabeleland North", tags: &["safari", "park"] },
    Entry { slug: "kariba", name: "Kariba", lat: -16.5167, lon: 28.8000, elevation: 520.0, province: "Mashonaland West", tags: &["lake", "fishing"] },
    Entry { slug: "mana-pools", name: "Mana Pools", lat: -15.7333, lon: 29.3667, elevation: 370.0, province: "Mashonaland West", tags: &["safari", "canoeing"] },
    Entry { slug: "nyanga", name: "Nyanga", lat: -18.2167, lon: 32.7500, elevation: 1880.0, province: "Manicaland", tags: &["hiking", "mountains"] },
    Entry { slug: "chimanimani", name: "Chimanimani", lat: -19.8000, lon: 32.8667, elevation: 1530.0, province: "Manicaland", tags: &["hiking", "mountains"] },
    Entry { slug: "great-zimbabwe", name: "Great Zimbabwe", lat: -20.2674, lon: 30.9338, elevation: 1100.0, province: "Masvingo", tags: &["heritage"] },
    Entry { slug: "matobo", name: "Matobo Hills", lat: -20.5500, lon: 28.5000, elevation: 1450.0, province: "Matabeleland South", tags: &["hiking", "heritage"] },
    Entry { slug: "gonarezhou", name: "Gonarezhou National Park", lat: -21.6667, lon: 31.6667, elevation: 350.0, province: "Masvingo", tags: &["safari", "park"] },
];

/// The built-in catalog.
pub fn builtin() -> Vec<KnownLocation> {
    BUILTIN
        .iter()
        .map(|e| KnownLocation {
            slug: e.slug.to_string(),
            name: e.name.to_string(),
            latitude: e.lat,
            longitude: e.lon,
            elevation: e.elevation,
            province: Some(e.province.to_string()),
            tags: e.tags.iter().map(|t| t.to_string()).collect(),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    locations: Vec<KnownLocation>,
}

/// Parse a TOML catalog. Slugs must be unique.
pub fn parse(contents: &str) -> Result<Vec<KnownLocation>> {
    let file: CatalogFile = toml::from_str(contents).context("Invalid location catalog")?;

    let mut seen = HashSet::new();
    for loc in &file.locations {
        if !seen.insert(loc.slug.as_str()) {
            bail!("Duplicate location slug in catalog: {}", loc.slug);
        }
    }
    Ok(file.locations)
}

/// Load the catalog from `path`, or the built-in catalog when `None`.
pub fn load(path: Option<&str>) -> Result<Vec<KnownLocation>> {
    match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read location catalog: {path}"))?;
            parse(&contents).with_context(|| format!("Failed to load location catalog: {path}"))
        }
        None => Ok(builtin()),
    }
}
