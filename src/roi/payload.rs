//! ROI polygon extraction from backend payloads.
//!
//! Payloads arrive from MQTT notifications, MQTT request responses and HTTP
//! attribute fetches, and their shape depends on which dashboard widget wrote
//! the attribute. The parser therefore walks an untyped `serde_json::Value`
//! tree and accepts every encoding seen in practice:
//!
//! - flat interleaved numbers: `[x1, y1, x2, y2, x3, y3, ...]`
//! - a history of flat snapshots: `[[...], [...]]` (newest valid entry wins)
//! - structured points: `[{"x": .., "y": ..}, ...]` or `[[x, y], ...]`
//! - mappings with a polygon field (`roi_points`, `roi`, `polygon`, ...)
//! - `zones` / `areas` collections
//! - any of the above JSON-encoded (or literal-encoded) inside a string
//!
//! Nothing here returns an error to the caller: malformed input degrades to
//! "no ROI found".

use std::borrow::Cow;

use serde_json::{Map, Value};

use super::literal::parse_literal;
use super::{RoiPoint, MIN_POLYGON_POINTS};
use crate::error::{Error, Result};

/// Shared attribute written by the dashboard ROI widget.
pub const ROI_CONFIG_KEY: &str = "statistic_config";
/// Alternate attribute name carrying the polygon directly.
pub const ROI_POINTS_KEY: &str = "roi_points";

/// Polygon field names checked, in priority order, after the points key.
const POLYGON_FIELD_KEYS: [&str; 5] = ["roi", "roi_polygon", "polygon", "points", "area_points"];
const ZONE_COLLECTION_KEYS: [&str; 2] = ["zones", "areas"];
const MIN_FLAT_LEN: usize = MIN_POLYGON_POINTS * 2;

/// Outcome of scanning a payload.
///
/// `found_key` distinguishes "the ROI attribute is present but empty/invalid"
/// (`points: None, found_key: true`) from "this payload says nothing about the ROI".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedRoi {
    pub points: Option<Vec<RoiPoint>>,
    pub found_key: bool,
}

impl ParsedRoi {
    fn found(points: Option<Vec<RoiPoint>>) -> Self {
        Self {
            points,
            found_key: true,
        }
    }

    fn absent() -> Self {
        Self::default()
    }
}

/// Extracts an ROI polygon from arbitrary payload trees.
#[derive(Clone, Debug)]
pub struct RoiPayloadParser {
    config_key: String,
    points_key: String,
}

impl Default for RoiPayloadParser {
    fn default() -> Self {
        Self::new(ROI_CONFIG_KEY, ROI_POINTS_KEY)
    }
}

impl RoiPayloadParser {
    pub fn new(config_key: impl Into<String>, points_key: impl Into<String>) -> Self {
        Self {
            config_key: config_key.into(),
            points_key: points_key.into(),
        }
    }

    /// Attribute requested from the backend on resync.
    pub fn config_key(&self) -> &str {
        &self.config_key
    }

    pub fn points_key(&self) -> &str {
        &self.points_key
    }

    /// Decode raw bytes as JSON and scan them.
    ///
    /// Returns `Error::Parse` only when the bytes are not JSON at all; callers
    /// drop such messages.
    pub fn parse_bytes(&self, payload: &[u8]) -> Result<ParsedRoi> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Parse(format!("payload is not JSON: {}", e)))?;
        Ok(self.parse(&value))
    }

    /// Deep scan of a payload tree. The first subtree carrying an ROI
    /// attribute wins; sequences are scanned newest (last) first.
    pub fn parse(&self, payload: &Value) -> ParsedRoi {
        match self.deep_scan(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("discarding malformed roi payload: {}", e);
                ParsedRoi::absent()
            }
        }
    }

    fn deep_scan(&self, node: &Value) -> Result<ParsedRoi> {
        let node = decode_embedded(node);
        match node.as_ref() {
            Value::Object(map) => {
                for key in [self.config_key.as_str(), self.points_key.as_str()] {
                    if let Some(child) = map.get(key) {
                        return Ok(ParsedRoi::found(self.extract_points(child)?));
                    }
                }
                if self.is_roi_record(map) {
                    let value = map.get("value").unwrap_or(&Value::Null);
                    return Ok(ParsedRoi::found(self.extract_points(value)?));
                }
                for child in map.values() {
                    let parsed = self.deep_scan(child)?;
                    if parsed.found_key {
                        return Ok(parsed);
                    }
                }
                Ok(ParsedRoi::absent())
            }
            Value::Array(items) => {
                for item in items.iter().rev() {
                    let parsed = self.deep_scan(item)?;
                    if parsed.found_key {
                        return Ok(parsed);
                    }
                }
                Ok(ParsedRoi::absent())
            }
            _ => Ok(ParsedRoi::absent()),
        }
    }

    /// `{"key": "statistic_config", "value": ...}` as returned by telemetry/attribute APIs.
    fn is_roi_record(&self, map: &Map<String, Value>) -> bool {
        matches!(map.get("key"), Some(Value::String(k)) if *k == self.config_key || *k == self.points_key)
    }

    /// Extract a polygon from a value that is expected to *be* the polygon
    /// (or a container holding it). `Ok(None)` means no usable polygon;
    /// `Err` means the value was malformed (e.g. a non-numeric coordinate).
    pub fn extract_points(&self, value: &Value) -> Result<Option<Vec<RoiPoint>>> {
        let value = decode_embedded(value);
        match value.as_ref() {
            Value::Array(items) => self.extract_from_sequence(items),
            Value::Object(map) => {
                let keys = std::iter::once(self.points_key.as_str()).chain(POLYGON_FIELD_KEYS);
                for key in keys {
                    if let Some(child) = map.get(key) {
                        if let Some(points) = self.extract_points(child)? {
                            return Ok(Some(points));
                        }
                    }
                }
                for key in ZONE_COLLECTION_KEYS {
                    if let Some(Value::Array(zones)) = map.get(key) {
                        for zone in zones {
                            if let Some(points) = self.extract_points(zone)? {
                                return Ok(Some(points));
                            }
                        }
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn extract_from_sequence(&self, items: &[Value]) -> Result<Option<Vec<RoiPoint>>> {
        if !items.is_empty() && items.iter().all(Value::is_number) {
            return Ok(flat_pairs(items));
        }

        // History of flat snapshots: newest valid entry wins, invalid ones are skipped.
        if matches!(items.first(), Some(Value::Array(_))) {
            for candidate in items.iter().rev() {
                if let Value::Array(flat) = candidate {
                    if flat.iter().all(Value::is_number) {
                        if let Some(points) = flat_pairs(flat) {
                            return Ok(Some(points));
                        }
                    }
                }
            }
        }

        let mut points = Vec::new();
        for item in items {
            let (x, y) = match item {
                Value::Object(map) => (map.get("x"), map.get("y")),
                Value::Array(pair) if pair.len() >= 2 => (pair.first(), pair.get(1)),
                _ => continue,
            };
            let (Some(x), Some(y)) = (x.filter(|v| !v.is_null()), y.filter(|v| !v.is_null())) else {
                continue;
            };
            points.push(RoiPoint::new(coordinate(x)?, coordinate(y)?));
        }
        Ok(at_least_polygon(points))
    }
}

/// Strings where structure is expected: strict JSON first, then the lenient
/// literal form, otherwise the string stays an opaque scalar.
fn decode_embedded(value: &Value) -> Cow<'_, Value> {
    let Value::String(raw) = value else {
        return Cow::Borrowed(value);
    };
    if let Ok(decoded) = serde_json::from_str::<Value>(raw) {
        return Cow::Owned(decoded);
    }
    match parse_literal(raw) {
        Ok(decoded) => Cow::Owned(decoded),
        Err(_) => Cow::Borrowed(value),
    }
}

/// Interleaved `x,y` numbers; requires an even count of at least six.
fn flat_pairs(flat: &[Value]) -> Option<Vec<RoiPoint>> {
    if flat.len() < MIN_FLAT_LEN || flat.len() % 2 != 0 {
        return None;
    }
    let points: Vec<RoiPoint> = flat
        .chunks_exact(2)
        .filter_map(|pair| Some(RoiPoint::new(pair[0].as_f64()?, pair[1].as_f64()?)))
        .collect();
    at_least_polygon(points)
}

fn at_least_polygon(points: Vec<RoiPoint>) -> Option<Vec<RoiPoint>> {
    (points.len() >= MIN_POLYGON_POINTS).then_some(points)
}

fn coordinate(value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| Error::Parse(format!("non-numeric coordinate: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pts(raw: &[(f64, f64)]) -> Vec<RoiPoint> {
        raw.iter().copied().map(RoiPoint::from).collect()
    }

    #[test]
    fn flat_statistic_config() {
        let parser = RoiPayloadParser::default();
        let parsed = parser.parse(&json!({"statistic_config": [10, 10, 100, 10, 100, 100]}));
        assert!(parsed.found_key);
        assert_eq!(
            parsed.points,
            Some(pts(&[(10.0, 10.0), (100.0, 10.0), (100.0, 100.0)]))
        );
    }

    #[test]
    fn empty_roi_points_is_found_but_missing() {
        let parsed = RoiPayloadParser::default().parse(&json!({"roi_points": []}));
        assert!(parsed.found_key);
        assert_eq!(parsed.points, None);
    }

    #[test]
    fn odd_or_short_flat_sequences_are_rejected() {
        let parser = RoiPayloadParser::default();
        assert_eq!(parser.extract_points(&json!([1, 2, 3, 4, 5])).unwrap(), None);
        assert_eq!(parser.extract_points(&json!([1, 2, 3, 4])).unwrap(), None);
    }

    #[test]
    fn history_prefers_newest_valid_entry() {
        let parser = RoiPayloadParser::default();
        let history = json!([
            [0, 0, 10, 0, 10, 10],
            [1, 1, 20, 1, 20, 20, 1, 20],
            [5, 5, 6],
            ["a", "b", "c", "d", "e", "f"]
        ]);
        let points = parser.extract_points(&history).unwrap().unwrap();
        assert_eq!(
            points,
            pts(&[(1.0, 1.0), (20.0, 1.0), (20.0, 20.0), (1.0, 20.0)])
        );
    }

    #[test]
    fn pairs_and_objects_drop_incomplete_points() {
        let parser = RoiPayloadParser::default();
        let pairs = parser.extract_points(&json!([[0.1, 0.2], [0.5, 0.2], [0.5, 0.9]])).unwrap();
        assert_eq!(pairs.unwrap().len(), 3);

        let objects = json!([
            {"x": 1, "y": 2},
            {"x": 3},
            {"x": 4, "y": 5},
            {"x": 6, "y": null},
            {"x": "7", "y": 8}
        ]);
        assert_eq!(
            parser.extract_points(&objects).unwrap(),
            Some(pts(&[(1.0, 2.0), (4.0, 5.0), (7.0, 8.0)]))
        );
    }

    #[test]
    fn non_numeric_coordinate_degrades_to_absent() {
        let parser = RoiPayloadParser::default();
        let parsed = parser.parse(&json!({
            "statistic_config": [{"x": "left", "y": 1}, {"x": 2, "y": 2}, {"x": 3, "y": 3}]
        }));
        assert_eq!(parsed, ParsedRoi::default());
    }

    #[test]
    fn string_encoded_values_are_decoded() {
        let parser = RoiPayloadParser::default();
        let json_str = parser.parse(&json!({"statistic_config": "[1, 2, 30, 2, 30, 40]"}));
        assert_eq!(json_str.points.map(|p| p.len()), Some(3));

        let literal = parser.parse(&json!({"statistic_config": "{'points': [(1, 2), (30, 2), (30, 40)]}"}));
        assert_eq!(literal.points.map(|p| p.len()), Some(3));

        let opaque = parser.parse(&json!({"statistic_config": "not structured"}));
        assert!(opaque.found_key);
        assert_eq!(opaque.points, None);
    }

    #[test]
    fn polygon_field_priority_and_zones() {
        let parser = RoiPayloadParser::default();
        let value = json!({
            "polygon": [0, 0, 1, 0, 1, 1],
            "roi": [5, 5, 6, 5, 6, 6]
        });
        assert_eq!(parser.extract_points(&value).unwrap().unwrap()[0], RoiPoint::new(5.0, 5.0));

        let zones = json!({"zones": [{"name": "empty"}, {"area_points": [7, 7, 8, 7, 8, 8]}]});
        assert_eq!(parser.extract_points(&zones).unwrap().unwrap()[0], RoiPoint::new(7.0, 7.0));
    }

    #[test]
    fn key_value_record_yields_polygon() {
        let parser = RoiPayloadParser::default();
        let parsed = parser.parse(&json!([
            {"key": "other", "value": 1},
            {"key": "statistic_config", "value": "[0, 0, 0.5, 0, 0.5, 0.5]"}
        ]));
        assert!(parsed.found_key);
        assert_eq!(parsed.points.unwrap()[1], RoiPoint::new(0.5, 0.0));
    }

    #[test]
    fn deep_scan_prefers_last_sequence_entry_and_does_not_merge() {
        let parser = RoiPayloadParser::default();
        let parsed = parser.parse(&json!({
            "shared": [
                {"statistic_config": [1, 1, 2, 1, 2, 2]},
                {"statistic_config": [9, 9, 8, 9, 8, 8]}
            ]
        }));
        assert_eq!(parsed.points.unwrap()[0], RoiPoint::new(9.0, 9.0));
    }

    #[test]
    fn payload_without_roi_is_absent() {
        let parser = RoiPayloadParser::default();
        assert_eq!(parser.parse(&json!({"shared": {"brightness": 3}})), ParsedRoi::default());
        assert!(parser.parse_bytes(b"{not json").is_err());
    }

    #[test]
    fn custom_attribute_names() {
        let parser = RoiPayloadParser::new("zone_config", "zone_points");
        let parsed = parser.parse(&json!({"zone_config": {"zone_points": [0, 0, 4, 0, 4, 4]}}));
        assert_eq!(parsed.points.map(|p| p.len()), Some(3));
        assert!(!parser.parse(&json!({"statistic_config": [0, 0, 4, 0, 4, 4]})).found_key);
    }
}
