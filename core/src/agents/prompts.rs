use serde_json::{json, Value};

use crate::models::{LatLng, MapBounds};

pub const SYSTEM_PROMPT: &str = "You are Dr. Elias Whitetail, the world's foremost expert on whitetail deer habitat management. You provide professional, science-backed advice in a friendly, avuncular tone. Your goal is to help landowners create thriving deer habitats. Analyze user queries, including any provided images and location data, to give specific, actionable recommendations. Cite data sources when you rely on external research and respond in Markdown.";

pub const EMPTY_INPUT_REPLY: &str = "Please share a prompt or upload an image.";

pub const PREDICTION_SYSTEM: &str = "Return valid JSON that matches the required schema.";
pub const DENSITY_SYSTEM: &str = "Return only valid JSON that matches the requested schema.";

pub fn location_line(location: Option<LatLng>) -> String {
    match location {
        Some(loc) => format!(
            "The landowner is currently near latitude {:.4} and longitude {:.4}.",
            loc.lat, loc.lng
        ),
        None => "The landowner did not share their location.".to_string(),
    }
}

/// System text for the providers without a separate system-instruction slot
/// for location.
pub fn system_context(location: Option<LatLng>) -> String {
    format!(
        "{SYSTEM_PROMPT}\n{}\nBe concise but thorough.",
        location_line(location)
    )
}

pub fn prediction_prompt(plan: &str, location: Option<LatLng>) -> String {
    format!(
        "Analyze the following habitat management plan and predict its success rate for achieving trophy buck goals. {}\nPlan:\n{plan}\nRespond with JSON: {{\n  \"probability\": number (0-100),\n  \"confidence\": \"High\" | \"Medium\" | \"Low\",\n  \"reasoning\": string\n}}",
        location_line(location)
    )
}

pub fn density_prompt(bounds: &MapBounds) -> String {
    format!(
        "Act as a wildlife GIS analyst. Based on the provided geographical map boundaries, generate a plausible dataset for whitetail deer population density hotspots and common movement corridors. Return JSON with the shape {{ \"hotspots\": [{{ \"lat\": number, \"lng\": number, \"weight\": 1-5 }}], \"corridors\": [{{ \"path\": [{{ \"lat\": number, \"lng\": number }}] }}] }}. The map boundaries are: North={}, South={}, East={}, West={}. Create between 5-15 hotspots and 2-5 corridors.",
        bounds.north, bounds.south, bounds.east, bounds.west
    )
}

pub fn prediction_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "probability": { "type": "NUMBER" },
            "confidence": { "type": "STRING" },
            "reasoning": { "type": "STRING" }
        },
        "required": ["probability", "confidence", "reasoning"]
    })
}

pub fn density_schema() -> Value {
    let point = json!({
        "type": "OBJECT",
        "properties": {
            "lat": { "type": "NUMBER" },
            "lng": { "type": "NUMBER" }
        },
        "required": ["lat", "lng"]
    });
    json!({
        "type": "OBJECT",
        "properties": {
            "hotspots": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "lat": { "type": "NUMBER" },
                        "lng": { "type": "NUMBER" },
                        "weight": { "type": "NUMBER" }
                    },
                    "required": ["lat", "lng", "weight"]
                }
            },
            "corridors": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "path": { "type": "ARRAY", "items": point }
                    },
                    "required": ["path"]
                }
            }
        },
        "required": ["hotspots", "corridors"]
    })
}
