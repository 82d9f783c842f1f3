//! Property-boundary helpers: address extraction, geocoding, and the area
//! and polygon approximations that become extra prompt context.

use std::f64::consts::PI;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};

use crate::logging::{EventLevel, EventLog};
use crate::models::{LatLng, PropertyBoundary};

const EARTH_RADIUS_M: f64 = 6_378_137.0;
const SQ_METERS_PER_ACRE: f64 = 4_046.856_42;
const MAX_DESCRIBED_POINTS: usize = 20;
const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Rectangular extent as returned by the geocoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub northeast: LatLng,
    pub southwest: LatLng,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub formatted_address: String,
    pub bounds: GeoBounds,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the address resolves to nothing usable.
    async fn geocode(&self, address: &str) -> Result<Option<GeocodeResult>>;
}

/// Google Geocoding JSON API.
pub struct GoogleGeocoder {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GoogleGeocoder {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: GEOCODE_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodeResult>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Geocode API failed ({status}): {body}"));
        }
        let body: Value = response.json().await?;
        let Some(result) = body.get("results").and_then(|r| r.get(0)) else {
            return Ok(None);
        };
        let geometry = result.get("geometry");
        let bounds = geometry
            .and_then(|g| g.get("bounds"))
            .or_else(|| geometry.and_then(|g| g.get("viewport")))
            .and_then(parse_bounds);
        Ok(bounds.map(|bounds| GeocodeResult {
            formatted_address: result
                .get("formatted_address")
                .and_then(Value::as_str)
                .unwrap_or(address)
                .to_string(),
            bounds,
        }))
    }
}

fn parse_bounds(value: &Value) -> Option<GeoBounds> {
    let point = |key: &str| -> Option<LatLng> {
        let node = value.get(key)?;
        Some(LatLng::new(node.get("lat")?.as_f64()?, node.get("lng")?.as_f64()?))
    };
    Some(GeoBounds {
        northeast: point("northeast")?,
        southwest: point("southwest")?,
    })
}

fn address_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)address\s*:\s*(.+)").expect("static address pattern"),
            Regex::new(r"(?i)property\s+(?:located\s+)?at\s+(.+)").expect("static property pattern"),
        ]
    })
}

/// Pull a free-text address out of a prompt, if it names one.
pub fn extract_address(prompt: &str) -> Option<String> {
    address_patterns().iter().find_map(|pattern| {
        let capture = pattern.captures(prompt)?.get(1)?;
        let line = capture.as_str().lines().next()?.trim();
        (!line.is_empty()).then(|| line.to_string())
    })
}

fn to_radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

pub fn haversine_distance_meters(a: LatLng, b: LatLng) -> f64 {
    let d_lat = to_radians(b.lat - a.lat);
    let d_lng = to_radians(b.lng - a.lng);
    let lat1 = to_radians(a.lat);
    let lat2 = to_radians(b.lat);
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Width times height of the box, in acres.
pub fn approximate_area_acres(bounds: &GeoBounds) -> f64 {
    let north_west = LatLng::new(bounds.northeast.lat, bounds.southwest.lng);
    let north_east = bounds.northeast;
    let south_west = bounds.southwest;
    let width = haversine_distance_meters(north_west, north_east);
    let height = haversine_distance_meters(north_west, south_west);
    (width * height / SQ_METERS_PER_ACRE).max(0.0)
}

/// Closed ring NW, NE, SE, SW, NW.
pub fn polygon_from_bounds(bounds: &GeoBounds) -> Vec<LatLng> {
    let ne = bounds.northeast;
    let sw = bounds.southwest;
    vec![
        LatLng::new(ne.lat, sw.lng),
        LatLng::new(ne.lat, ne.lng),
        LatLng::new(sw.lat, ne.lng),
        LatLng::new(sw.lat, sw.lng),
        LatLng::new(ne.lat, sw.lng),
    ]
}

/// Spherical area of a (possibly unclosed) ring, in acres.
pub fn polygon_area_acres(path: &[LatLng]) -> f64 {
    if path.len() < 3 {
        return 0.0;
    }
    let mut total = 0.0;
    for (i, a) in path.iter().enumerate() {
        let b = path[(i + 1) % path.len()];
        total += to_radians(b.lng - a.lng)
            * (2.0 + to_radians(a.lat).sin() + to_radians(b.lat).sin());
    }
    (total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs() / SQ_METERS_PER_ACRE
}

impl PropertyBoundary {
    pub fn from_drawn(path: Vec<LatLng>) -> Self {
        Self {
            address: "Hand-drawn boundary".to_string(),
            area_acres: polygon_area_acres(&path),
            polygon: path,
        }
    }

    pub fn from_bounds(address: impl Into<String>, bounds: &GeoBounds) -> Self {
        Self {
            address: address.into(),
            area_acres: approximate_area_acres(bounds),
            polygon: polygon_from_bounds(bounds),
        }
    }
}

/// Geocode an address mentioned in the prompt into a boundary description.
/// Every failure mode is silent apart from the event log.
pub async fn build_property_context(
    geocoder: Option<&dyn Geocoder>,
    prompt: &str,
    events: &EventLog,
) -> Option<String> {
    let geocoder = geocoder?;
    let address = extract_address(prompt)?;
    let result = match geocoder.geocode(&address).await {
        Ok(result) => result?,
        Err(err) => {
            events.log_event(
                EventLevel::Warn,
                Some("GEO-0100"),
                "geo",
                "Failed to build property boundary context",
                None,
                Some(json!({ "address": address, "error": format!("{err:#}") })),
            );
            return None;
        }
    };
    let boundary = PropertyBoundary::from_bounds(result.formatted_address, &result.bounds);
    let polygon = boundary
        .polygon
        .iter()
        .map(|p| format!("{:.5}, {:.5}", p.lat, p.lng))
        .collect::<Vec<_>>()
        .join(" | ");
    Some(format!(
        "Property boundary (Google Maps) for {}:\n- Approximate area: {:.2} acres\n- Boundary coordinates (lat,lng): {polygon}",
        boundary.address, boundary.area_acres
    ))
}

pub fn format_boundary_context(boundary: &PropertyBoundary) -> String {
    let coords = boundary
        .polygon
        .iter()
        .take(MAX_DESCRIBED_POINTS)
        .map(|p| format!("({:.5}, {:.5})", p.lat, p.lng))
        .collect::<Vec<_>>()
        .join(" -> ");
    let ellipsis = if boundary.polygon.len() > MAX_DESCRIBED_POINTS {
        " -> ..."
    } else {
        ""
    };
    format!(
        "User supplied a hand-drawn property boundary on the map.\n- Estimated area: {:.2} acres.\n- Coordinate path: {coords}{ellipsis}.\nIncorporate this polygon when discussing cover types, habitat composition, and acreage-aware recommendations.",
        boundary.area_acres
    )
}

/// Parse `lat,lng;lat,lng;...` as typed by a user.
pub fn parse_path(input: &str) -> Result<Vec<LatLng>> {
    input
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_point)
        .collect()
}

pub fn parse_point(input: &str) -> Result<LatLng> {
    let (lat, lng) = input
        .split_once(',')
        .ok_or_else(|| anyhow!("expected `lat,lng`, got `{input}`"))?;
    let lat: f64 = lat.trim().parse()?;
    let lng: f64 = lng.trim().parse()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(anyhow!("coordinates out of range: {lat}, {lng}"));
    }
    Ok(LatLng::new(lat, lng))
}
