//! Vector tile decoding and bucket building.
//!
//! A tile payload is a sequence of `Layer` messages. Each layer carries its
//! name, the key and value dictionaries referenced by its features, and the
//! features themselves. Decoding is two-phase:
//!
//! 1. [`VectorTile::decode`] walks the message structure. Feature geometry is
//!    kept as a borrowed slice of the payload and not decoded yet.
//! 2. [`VectorTile::build_buckets`] evaluates bucket rules against each
//!    feature's resolved properties and decodes the geometry of the features
//!    that match.
//!
//! A feature whose geometry exceeds [`MAX_GEOMETRY_VERTICES`] is dropped and
//! decoding carries on. Any other error means the tile bytes are malformed
//! and the whole tile is rejected.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::style::{BucketKind, BucketRule, Style};
use crate::wire::{WireError, WireReader};

/// Largest number of vertices a single feature may decode to.
///
/// Render buffers index vertices with 16-bit integers.
pub const MAX_GEOMETRY_VERTICES: usize = u16::MAX as usize;

/// Extent assumed when a layer does not declare one.
pub const DEFAULT_EXTENT: u32 = 4096;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Deflate method with a 32K window, the usual first zlib header byte.
const ZLIB_CMF: u8 = 0x78;

// Geometry command ids.
const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while decoding a tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed tile: {0}")]
    Wire(#[from] WireError),

    /// A feature's geometry is larger than the render buffers allow.
    #[error("geometry too long: more than {max} vertices")]
    GeometryTooLong { max: usize },

    #[error("invalid geometry command {0}")]
    InvalidCommand(u32),

    #[error("geometry command before the first MoveTo")]
    MissingMoveTo,

    #[error("failed to decompress tile: {0}")]
    Decompress(String),
}

impl DecodeError {
    /// True for errors that only invalidate a single feature.
    pub fn is_feature_scoped(&self) -> bool {
        matches!(self, DecodeError::GeometryTooLong { .. })
    }
}

// =============================================================================
// Values and properties
// =============================================================================

/// A feature property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Double(f64),
    String(String),
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::UInt(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality with numbers compared by value regardless of encoding.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Ordering between two strings or two numbers; `None` otherwise.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }

    fn decode(mut reader: WireReader<'_>) -> Result<Value, DecodeError> {
        let mut value = Value::Null;
        while reader.next()? {
            value = match (reader.tag(), reader.raw_wire_type()) {
                (1, 2) => Value::String(reader.string()?),
                (2, 5) => Value::Double(f64::from(reader.float32()?)),
                (3, 1) => Value::Double(reader.float64()?),
                (4, 0) => Value::Int(reader.varint::<i64>()?),
                (5, 0) => Value::UInt(reader.varint::<u64>()?),
                (6, 0) => Value::Int(reader.svarint::<i64>()?),
                (7, 0) => Value::Bool(reader.varint::<u64>()? != 0),
                _ => {
                    reader.skip()?;
                    continue;
                }
            };
        }
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

/// Resolved key/value properties of a feature.
pub type Properties = BTreeMap<String, Value>;

// =============================================================================
// Geometry
// =============================================================================

/// Geometry type declared by a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeomType {
    Unknown,
    Point,
    LineString,
    Polygon,
}

impl GeomType {
    /// Name used by the `$type` filter key.
    pub fn name(&self) -> &'static str {
        match self {
            GeomType::Unknown => "Unknown",
            GeomType::Point => "Point",
            GeomType::LineString => "LineString",
            GeomType::Polygon => "Polygon",
        }
    }
}

impl From<u32> for GeomType {
    fn from(value: u32) -> Self {
        match value {
            1 => GeomType::Point,
            2 => GeomType::LineString,
            3 => GeomType::Polygon,
            _ => GeomType::Unknown,
        }
    }
}

/// A vertex in tile coordinates (0..extent, may overshoot into the buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Decoded geometry: one entry per MoveTo (a point, line part or ring).
pub type Geometry = Vec<Vec<Point>>;

/// Decodes a geometry command stream into absolute coordinates.
pub fn decode_geometry(raw: &[u8], max_vertices: usize) -> Result<Geometry, DecodeError> {
    let mut reader = WireReader::new(raw);
    let mut parts: Geometry = Vec::new();
    let mut cursor = Point::new(0, 0);
    let mut vertices = 0usize;

    let mut count_vertex = || -> Result<(), DecodeError> {
        vertices += 1;
        if vertices > max_vertices {
            return Err(DecodeError::GeometryTooLong { max: max_vertices });
        }
        Ok(())
    };

    while !reader.is_empty() {
        let command = reader.varint::<u32>()?;
        let (id, count) = (command & 0x7, command >> 3);
        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                if id == CMD_LINE_TO && parts.is_empty() {
                    return Err(DecodeError::MissingMoveTo);
                }
                for _ in 0..count {
                    let dx = reader.svarint::<i32>()?;
                    let dy = reader.svarint::<i32>()?;
                    cursor = Point::new(cursor.x.wrapping_add(dx), cursor.y.wrapping_add(dy));
                    count_vertex()?;
                    if id == CMD_MOVE_TO {
                        parts.push(vec![cursor]);
                    } else if let Some(part) = parts.last_mut() {
                        part.push(cursor);
                    }
                }
            }
            CMD_CLOSE_PATH => {
                let ring = parts.last_mut().ok_or(DecodeError::MissingMoveTo)?;
                if let Some(&first) = ring.first() {
                    count_vertex()?;
                    ring.push(first);
                }
            }
            other => return Err(DecodeError::InvalidCommand(other)),
        }
    }

    Ok(parts)
}

// =============================================================================
// Tile structure
// =============================================================================

/// A feature whose geometry has not been decoded yet.
#[derive(Debug, Clone)]
pub struct Feature<'a> {
    pub id: Option<u64>,
    pub geom_type: GeomType,
    /// Flattened `(key_index, value_index)` pairs.
    tags: Vec<u32>,
    geometry: &'a [u8],
}

impl<'a> Feature<'a> {
    fn decode(mut reader: WireReader<'a>) -> Result<Self, DecodeError> {
        let mut feature = Feature {
            id: None,
            geom_type: GeomType::Unknown,
            tags: Vec::new(),
            geometry: &[],
        };
        while reader.next()? {
            match (reader.tag(), reader.raw_wire_type()) {
                (1, 0) => feature.id = Some(reader.varint::<u64>()?),
                (2, 2) => {
                    for tag in reader.packed_varints()? {
                        feature.tags.push(tag?);
                    }
                }
                (2, 0) => feature.tags.push(reader.varint::<u32>()?),
                (3, 0) => feature.geom_type = GeomType::from(reader.varint::<u32>()?),
                (4, 2) => feature.geometry = reader.bytes()?,
                _ => reader.skip()?,
            }
        }
        Ok(feature)
    }

    /// Decodes this feature's geometry.
    pub fn geometry(&self) -> Result<Geometry, DecodeError> {
        decode_geometry(self.geometry, MAX_GEOMETRY_VERTICES)
    }
}

/// A decoded layer.
#[derive(Debug, Clone)]
pub struct Layer<'a> {
    pub name: String,
    pub version: u32,
    pub extent: u32,
    pub keys: Vec<String>,
    pub values: Vec<Value>,
    pub features: Vec<Feature<'a>>,
}

impl<'a> Layer<'a> {
    fn decode(mut reader: WireReader<'a>) -> Result<Self, DecodeError> {
        let mut layer = Layer {
            name: String::new(),
            version: 1,
            extent: DEFAULT_EXTENT,
            keys: Vec::new(),
            values: Vec::new(),
            features: Vec::new(),
        };
        while reader.next()? {
            match (reader.tag(), reader.raw_wire_type()) {
                (1, 2) => layer.name = reader.string()?,
                (2, 2) => layer.features.push(Feature::decode(reader.message()?)?),
                (3, 2) => layer.keys.push(reader.string()?),
                (4, 2) => layer.values.push(Value::decode(reader.message()?)?),
                (5, 0) => layer.extent = reader.varint::<u32>()?,
                (15, 0) => layer.version = reader.varint::<u32>()?,
                _ => reader.skip()?,
            }
        }
        Ok(layer)
    }

    /// Resolves a feature's tag indices against this layer's dictionaries.
    ///
    /// Pairs pointing outside the dictionaries are ignored.
    pub fn properties(&self, feature: &Feature<'_>) -> Properties {
        let mut properties = Properties::new();
        for pair in feature.tags.chunks_exact(2) {
            let key = self.keys.get(pair[0] as usize);
            let value = self.values.get(pair[1] as usize);
            match (key, value) {
                (Some(key), Some(value)) => {
                    properties.insert(key.clone(), value.clone());
                }
                _ => trace!(
                    layer = %self.name,
                    key_index = pair[0],
                    value_index = pair[1],
                    "Ignoring out-of-range feature tag"
                ),
            }
        }
        properties
    }
}

/// A tile's layers, borrowing from the payload.
#[derive(Debug, Clone, Default)]
pub struct VectorTile<'a> {
    pub layers: Vec<Layer<'a>>,
}

impl<'a> VectorTile<'a> {
    /// Decodes the layer structure of an uncompressed tile payload.
    pub fn decode(data: &'a [u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(data);
        let mut layers = Vec::new();
        while reader.next()? {
            match (reader.tag(), reader.raw_wire_type()) {
                (3, 2) => layers.push(Layer::decode(reader.message()?)?),
                _ => reader.skip()?,
            }
        }
        Ok(Self { layers })
    }

    /// Finds a layer by name.
    pub fn layer(&self, name: &str) -> Option<&Layer<'a>> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    /// Groups matching features into one bucket per rule.
    ///
    /// Rules whose source layer is absent produce no bucket. Features whose
    /// geometry is too long are dropped.
    pub fn build_buckets<'r>(
        &self,
        rules: impl IntoIterator<Item = &'r BucketRule>,
    ) -> Result<BTreeMap<String, Bucket>, DecodeError> {
        let mut buckets = BTreeMap::new();
        for rule in rules {
            let Some(layer) = self.layer(&rule.source_layer) else {
                continue;
            };
            let mut bucket = Bucket::new(&rule.name, rule.kind);
            for feature in &layer.features {
                let properties = layer.properties(feature);
                if !rule.filter.evaluate(&properties, feature.geom_type) {
                    continue;
                }
                match feature.geometry() {
                    Ok(geometry) => bucket.features.push(BucketFeature {
                        id: feature.id,
                        geom_type: feature.geom_type,
                        geometry,
                        properties,
                    }),
                    Err(e) if e.is_feature_scoped() => {
                        debug!(
                            layer = %layer.name,
                            bucket = %rule.name,
                            feature_id = ?feature.id,
                            error = %e,
                            "Dropping feature"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            buckets.insert(rule.name.clone(), bucket);
        }
        Ok(buckets)
    }
}

// =============================================================================
// Buckets
// =============================================================================

/// A render-ready feature.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketFeature {
    pub id: Option<u64>,
    pub geom_type: GeomType,
    pub geometry: Geometry,
    pub properties: Properties,
}

/// Decoded geometry grouped under one bucket rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub name: String,
    pub kind: BucketKind,
    pub features: Vec<BucketFeature>,
}

impl Bucket {
    pub fn new(name: impl Into<String>, kind: BucketKind) -> Self {
        Self {
            name: name.into(),
            kind,
            features: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Total vertices across every feature in the bucket.
    pub fn vertex_count(&self) -> usize {
        self.features
            .iter()
            .flat_map(|f| f.geometry.iter())
            .map(Vec::len)
            .sum()
    }
}

/// Inflates gzip or zlib compressed payloads; other payloads are returned as is.
pub fn decompress(data: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    let mut inflated = Vec::with_capacity(data.len() * 4);
    let result = if data.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(data).read_to_end(&mut inflated)
    } else if is_zlib_header(data) {
        ZlibDecoder::new(data).read_to_end(&mut inflated)
    } else {
        return Ok(Cow::Borrowed(data));
    };
    result.map_err(|e| DecodeError::Decompress(e.to_string()))?;
    Ok(Cow::Owned(inflated))
}

/// A zlib header is `0x78` followed by a flag byte making the pair a
/// multiple of 31.
fn is_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => *cmf == ZLIB_CMF && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

/// Decodes a (possibly compressed) tile payload into buckets for `zoom`.
pub fn decode_buckets(
    data: &[u8],
    style: &Style,
    zoom: f32,
) -> Result<BTreeMap<String, Bucket>, DecodeError> {
    let data = decompress(data)?;
    let tile = VectorTile::decode(&data)?;
    tile.build_buckets(style.active_rules(zoom))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::style::{BucketRule, Filter};
    use crate::wire::WireWriter;

    fn water_style() -> Style {
        Style::new(vec![BucketRule::new("water", BucketKind::Fill, "water")
            .with_filter(Filter::eq("class", "ocean"))])
        .unwrap()
    }

    #[test]
    fn test_decode_layer_structure() {
        let data = water_tile();
        let tile = VectorTile::decode(&data).unwrap();
        assert_eq!(tile.layers.len(), 1);

        let layer = tile.layer("water").unwrap();
        assert_eq!(layer.version, 2);
        assert_eq!(layer.extent, 4096);
        assert_eq!(layer.keys, vec!["class"]);
        assert_eq!(layer.values.len(), 2);
        assert_eq!(layer.features.len(), 2);
        assert_eq!(layer.features[0].geom_type, GeomType::Polygon);
    }

    #[test]
    fn test_ocean_polygon_lands_in_water_bucket() {
        let buckets = decode_buckets(&water_tile(), &water_style(), 5.0).unwrap();
        let bucket = &buckets["water"];
        assert_eq!(bucket.features.len(), 1);

        let feature = &bucket.features[0];
        assert_eq!(feature.id, Some(1));
        assert_eq!(feature.properties["class"], Value::from("ocean"));
        assert_eq!(
            feature.geometry,
            vec![vec![
                Point::new(2, 3),
                Point::new(12, 3),
                Point::new(12, 13),
                Point::new(2, 13),
                Point::new(2, 3),
            ]]
        );
    }

    #[test]
    fn test_rule_outside_zoom_range_builds_nothing() {
        let style = Style::new(vec![
            BucketRule::new("water", BucketKind::Fill, "water").with_min_zoom(10.0)
        ])
        .unwrap();
        let buckets = decode_buckets(&water_tile(), &style, 5.0).unwrap();
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_rule_for_missing_layer_builds_nothing() {
        let style = Style::new(vec![BucketRule::new("roads", BucketKind::Line, "road")]).unwrap();
        let buckets = decode_buckets(&water_tile(), &style, 5.0).unwrap();
        assert!(!buckets.contains_key("roads"));
    }

    #[test]
    fn test_multi_point_and_line_geometry() {
        // MoveTo(2): (5,5) (8,9)
        let points = [command(1, 2), zz(5), zz(5), zz(3), zz(4)];
        assert_eq!(
            decode_geometry(&packed(&points), MAX_GEOMETRY_VERTICES).unwrap(),
            vec![vec![Point::new(5, 5)], vec![Point::new(8, 9)]]
        );

        // MoveTo (1,1) LineTo (3,1) (3,-2)
        let line = [command(1, 1), zz(1), zz(1), command(2, 2), zz(2), zz(0), zz(0), zz(-3)];
        assert_eq!(
            decode_geometry(&packed(&line), MAX_GEOMETRY_VERTICES).unwrap(),
            vec![vec![Point::new(1, 1), Point::new(3, 1), Point::new(3, -2)]]
        );
    }

    #[test]
    fn test_line_to_before_move_to() {
        let geometry = [command(2, 1), zz(1), zz(1)];
        assert_eq!(
            decode_geometry(&packed(&geometry), MAX_GEOMETRY_VERTICES).unwrap_err(),
            DecodeError::MissingMoveTo
        );
    }

    #[test]
    fn test_invalid_command() {
        let geometry = [command(1, 1), zz(0), zz(0), command(4, 1)];
        assert_eq!(
            decode_geometry(&packed(&geometry), MAX_GEOMETRY_VERTICES).unwrap_err(),
            DecodeError::InvalidCommand(4)
        );
    }

    #[test]
    fn test_geometry_too_long() {
        let geometry = [command(1, 1), zz(0), zz(0), command(2, 3), 2, 2, 2, 2, 2, 2];
        assert_eq!(
            decode_geometry(&packed(&geometry), 3).unwrap_err(),
            DecodeError::GeometryTooLong { max: 3 }
        );
    }

    #[test]
    fn test_oversized_feature_is_dropped_not_fatal() {
        let mut huge = vec![command(1, 1), zz(0), zz(0)];
        let count = MAX_GEOMETRY_VERTICES as u32;
        huge.push(command(2, count));
        for _ in 0..count {
            huge.push(zz(1));
            huge.push(zz(0));
        }
        let data = tile(&[layer(
            "water",
            &["class"],
            &["ocean"],
            &[
                feature(1, 2, &[0, 0], &huge),
                feature(2, 3, &[0, 0], &square_geometry()),
            ],
        )]);

        let buckets = decode_buckets(&data, &water_style(), 5.0).unwrap();
        let ids: Vec<_> = buckets["water"].features.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![Some(2)]);
    }

    #[test]
    fn test_truncated_tile_is_rejected() {
        let data = water_tile();
        let truncated = &data[..data.len() - 5];
        let err = decode_buckets(truncated, &water_style(), 5.0).unwrap_err();
        assert!(matches!(err, DecodeError::Wire(_)));
    }

    #[test]
    fn test_out_of_range_tag_is_ignored() {
        let data = tile(&[layer(
            "water",
            &["class"],
            &["ocean"],
            &[feature(1, 3, &[0, 0, 5, 9], &square_geometry())],
        )]);
        let tile = VectorTile::decode(&data).unwrap();
        let layer = tile.layer("water").unwrap();
        let props = layer.properties(&layer.features[0]);
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn test_value_types() {
        let mut w = WireWriter::new();
        w.tag(4, crate::wire::WireType::Varint).varint(7);
        let int = Value::decode(WireReader::new(w.as_bytes())).unwrap();
        assert_eq!(int, Value::Int(7));

        let mut w = WireWriter::new();
        w.tag(6, crate::wire::WireType::Varint).svarint(-4);
        assert_eq!(
            Value::decode(WireReader::new(w.as_bytes())).unwrap(),
            Value::Int(-4)
        );

        let mut w = WireWriter::new();
        w.float64_field(3, 0.5);
        assert_eq!(
            Value::decode(WireReader::new(w.as_bytes())).unwrap(),
            Value::Double(0.5)
        );

        let mut w = WireWriter::new();
        w.varint_field(7, 1);
        assert_eq!(
            Value::decode(WireReader::new(w.as_bytes())).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_gzipped_payload() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&water_tile()).unwrap();
        let gzipped = encoder.finish().unwrap();

        let buckets = decode_buckets(&gzipped, &water_style(), 5.0).unwrap();
        assert_eq!(buckets["water"].features.len(), 1);
    }

    #[test]
    fn test_zlib_payload() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&water_tile()).unwrap();
        let deflated = encoder.finish().unwrap();
        assert!(is_zlib_header(&deflated));

        let buckets = decode_buckets(&deflated, &water_style(), 5.0).unwrap();
        assert_eq!(buckets["water"].features.len(), 1);
    }

    #[test]
    fn test_raw_payload_is_not_inflated() {
        let raw = water_tile();
        assert!(matches!(decompress(&raw).unwrap(), Cow::Borrowed(_)));
        assert!(!is_zlib_header(&[0x78, 0x00]));
    }

    #[test]
    fn test_corrupt_gzip() {
        let err = decompress(&[0x1f, 0x8b, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, DecodeError::Decompress(_)));
    }

    #[test]
    fn test_bucket_vertex_count() {
        let buckets = decode_buckets(&water_tile(), &water_style(), 5.0).unwrap();
        assert_eq!(buckets["water"].vertex_count(), 5);
    }

    fn packed(values: &[u32]) -> Vec<u8> {
        let mut w = WireWriter::new();
        for v in values {
            w.varint(u64::from(*v));
        }
        w.into_bytes()
    }
}
