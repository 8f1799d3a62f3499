//! Bucket rules consumed by the vector tile decoder.
//!
//! The style sheet itself is parsed elsewhere. What reaches this crate is the
//! flattened result: a list of [`BucketRule`]s, each naming the source layer
//! it reads from, a [`Filter`] over feature properties, and the zoom range in
//! which it applies. The decoder appends every matching feature to the bucket
//! named after the rule.
//!
//! Rules can be built in code or deserialized from JSON:
//!
//! ```
//! use tilestream::style::Style;
//!
//! let style = Style::from_json(r#"{
//!     "rules": [{
//!         "name": "water",
//!         "kind": "fill",
//!         "source_layer": "water",
//!         "filter": { "op": "eq", "key": "class", "value": "ocean" },
//!         "min_zoom": 0,
//!         "max_zoom": 14
//!     }]
//! }"#).unwrap();
//! assert_eq!(style.rules().len(), 1);
//! ```

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vector_tile::{GeomType, Properties, Value};

/// Pseudo-property resolving to the feature's geometry type.
pub const GEOMETRY_TYPE_KEY: &str = "$type";

/// Errors raised while building a style.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("invalid style JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate bucket name: {0}")]
    DuplicateBucket(String),

    #[error("bucket {name}: min_zoom {min} is greater than max_zoom {max}")]
    InvalidZoomRange { name: String, min: f32, max: f32 },
}

/// Kind of render bucket a rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    Fill,
    Line,
    Symbol,
}

/// Predicate over a feature's properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// True when every sub-filter matches (and for an empty list).
    All { filters: Vec<Filter> },
    /// True when at least one sub-filter matches.
    Any { filters: Vec<Filter> },
    /// True when no sub-filter matches.
    None { filters: Vec<Filter> },
    Eq { key: String, value: Value },
    Ne { key: String, value: Value },
    Lt { key: String, value: Value },
    Le { key: String, value: Value },
    Gt { key: String, value: Value },
    Ge { key: String, value: Value },
    In { key: String, values: Vec<Value> },
    NotIn { key: String, values: Vec<Value> },
    Has { key: String },
    NotHas { key: String },
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All {
            filters: Vec::new(),
        }
    }
}

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn any_of(key: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Filter::In {
            key: key.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Evaluates the filter against a feature.
    pub fn evaluate(&self, properties: &Properties, geom_type: GeomType) -> bool {
        let lookup = |key: &str| -> Option<Value> {
            if key == GEOMETRY_TYPE_KEY {
                Some(Value::String(geom_type.name().to_string()))
            } else {
                properties.get(key).cloned()
            }
        };
        let compare = |key: &str, value: &Value, accept: fn(Ordering) -> bool| {
            lookup(key)
                .and_then(|actual| actual.compare(value))
                .is_some_and(accept)
        };

        match self {
            Filter::All { filters } => filters.iter().all(|f| f.evaluate(properties, geom_type)),
            Filter::Any { filters } => filters.iter().any(|f| f.evaluate(properties, geom_type)),
            Filter::None { filters } => !filters.iter().any(|f| f.evaluate(properties, geom_type)),
            Filter::Eq { key, value } => lookup(key).is_some_and(|actual| actual.loose_eq(value)),
            Filter::Ne { key, value } => !lookup(key).is_some_and(|actual| actual.loose_eq(value)),
            Filter::Lt { key, value } => compare(key, value, Ordering::is_lt),
            Filter::Le { key, value } => compare(key, value, Ordering::is_le),
            Filter::Gt { key, value } => compare(key, value, Ordering::is_gt),
            Filter::Ge { key, value } => compare(key, value, Ordering::is_ge),
            Filter::In { key, values } => lookup(key)
                .is_some_and(|actual| values.iter().any(|v| actual.loose_eq(v))),
            Filter::NotIn { key, values } => !lookup(key)
                .is_some_and(|actual| values.iter().any(|v| actual.loose_eq(v))),
            Filter::Has { key } => lookup(key).is_some(),
            Filter::NotHas { key } => lookup(key).is_none(),
        }
    }
}

fn default_visible() -> bool {
    true
}

/// A rule grouping features of one source layer into a named bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRule {
    /// Bucket name; buckets are keyed by this in a parsed tile.
    pub name: String,
    pub kind: BucketKind,
    /// Name of the vector tile layer the rule reads from.
    pub source_layer: String,
    #[serde(default)]
    pub filter: Filter,
    /// Inclusive lower zoom bound.
    #[serde(default)]
    pub min_zoom: Option<f32>,
    /// Exclusive upper zoom bound.
    #[serde(default)]
    pub max_zoom: Option<f32>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl BucketRule {
    /// Creates a visible rule matching every feature at every zoom.
    pub fn new(name: impl Into<String>, kind: BucketKind, source_layer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            source_layer: source_layer.into(),
            filter: Filter::default(),
            min_zoom: None,
            max_zoom: None,
            visible: true,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_min_zoom(mut self, zoom: f32) -> Self {
        self.min_zoom = Some(zoom);
        self
    }

    pub fn with_max_zoom(mut self, zoom: f32) -> Self {
        self.max_zoom = Some(zoom);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Returns true if the rule applies at `zoom`.
    pub fn covers_zoom(&self, zoom: f32) -> bool {
        self.min_zoom.map_or(true, |min| zoom >= min) && self.max_zoom.map_or(true, |max| zoom < max)
    }
}

/// An immutable set of bucket rules, shared by every tile of a map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Style {
    rules: Vec<BucketRule>,
}

impl Style {
    /// Builds a style, rejecting duplicate bucket names and inverted zoom ranges.
    pub fn new(rules: Vec<BucketRule>) -> Result<Self, StyleError> {
        let style = Self { rules };
        style.validate()?;
        Ok(style)
    }

    /// Parses a style from its JSON rule list.
    pub fn from_json(json: &str) -> Result<Self, StyleError> {
        let style: Style = serde_json::from_str(json)?;
        style.validate()?;
        Ok(style)
    }

    pub fn rules(&self) -> &[BucketRule] {
        &self.rules
    }

    /// Rules that produce a bucket at `zoom`.
    pub fn active_rules(&self, zoom: f32) -> impl Iterator<Item = &BucketRule> {
        self.rules
            .iter()
            .filter(move |rule| rule.visible && rule.covers_zoom(zoom))
    }

    fn validate(&self) -> Result<(), StyleError> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            if !names.insert(rule.name.as_str()) {
                return Err(StyleError::DuplicateBucket(rule.name.clone()));
            }
            if let (Some(min), Some(max)) = (rule.min_zoom, rule.max_zoom) {
                if min > max {
                    return Err(StyleError::InvalidZoomRange {
                        name: rule.name.clone(),
                        min,
                        max,
                    });
                }
            }
        }
        Ok(())
    }
}
