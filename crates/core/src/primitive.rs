//! Object model for the three primitive kinds: points, paths and groups.
//!
//! A [`Primitive`] carries the attributes shared by every kind (identity,
//! version, flags, user, timestamp, tags) and a [`Body`] variant holding the
//! kind-specific structure. Structural references are stored as
//! [`PrimitiveId`]s that are resolved through the owning [`Graph`](crate::graph::Graph).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GraphError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The three kinds of primitive.
///
/// The declaration order is the merge order: points before paths before
/// groups, because paths reference points and groups reference anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Point,
    Path,
    Group,
}

impl PrimitiveKind {
    /// All kinds in merge order.
    pub const ALL: [PrimitiveKind; 3] = [Self::Point, Self::Path, Self::Group];
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Point => write!(f, "point"),
            Self::Path => write!(f, "path"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// Identity of a primitive: its kind plus a numeric id.
///
/// Ids `<= 0` denote *new* primitives that were created locally and have no
/// server-assigned id yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimitiveId {
    pub kind: PrimitiveKind,
    pub id: i64,
}

impl PrimitiveId {
    pub fn new(kind: PrimitiveKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn point(id: i64) -> Self {
        Self::new(PrimitiveKind::Point, id)
    }

    pub fn path(id: i64) -> Self {
        Self::new(PrimitiveKind::Path, id)
    }

    pub fn group(id: i64) -> Self {
        Self::new(PrimitiveKind::Group, id)
    }

    /// Whether this identity names a new, not yet persisted primitive.
    pub fn is_new(&self) -> bool {
        self.id <= 0
    }
}

impl std::fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

// ---------------------------------------------------------------------------
// Kind-specific structure
// ---------------------------------------------------------------------------

/// Geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Coordinates closer than this (in degrees, per axis) are treated as equal.
    pub const EPSILON: f64 = 1e-7;

    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn equals_epsilon(&self, other: &Coordinate) -> bool {
        (self.lat - other.lat).abs() <= Self::EPSILON && (self.lon - other.lon).abs() <= Self::EPSILON
    }

    /// Order by latitude, then longitude. Identical coordinates compare equal.
    pub fn cmp_position(&self, other: &Coordinate) -> Ordering {
        let d_lat = self.lat - other.lat;
        let d_lon = self.lon - other.lon;
        if d_lat > 0.0 {
            Ordering::Greater
        } else if d_lat < 0.0 {
            Ordering::Less
        } else if d_lon == 0.0 {
            Ordering::Equal
        } else if d_lon > 0.0 {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}

/// A role-tagged member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub role: String,
    pub member: PrimitiveId,
}

impl Member {
    pub fn new(role: impl Into<String>, member: PrimitiveId) -> Self {
        Self {
            role: role.into(),
            member,
        }
    }
}

/// The kind-specific part of a primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    Point {
        #[serde(default)]
        coord: Option<Coordinate>,
    },
    Path {
        #[serde(default)]
        points: Vec<PrimitiveId>,
    },
    Group {
        #[serde(default)]
        members: Vec<Member>,
    },
}

impl Body {
    fn empty(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Point => Self::Point { coord: None },
            PrimitiveKind::Path => Self::Path { points: Vec::new() },
            PrimitiveKind::Group => Self::Group {
                members: Vec::new(),
            },
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Point { .. } => PrimitiveKind::Point,
            Self::Path { .. } => PrimitiveKind::Path,
            Self::Group { .. } => PrimitiveKind::Group,
        }
    }
}

/// Author of the last change to a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

impl User {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Primitive
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// A point, path or group together with its technical attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    id: i64,
    #[serde(default)]
    version: u64,
    #[serde(default = "default_true")]
    visible: bool,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    modified: bool,
    #[serde(default)]
    incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
    #[serde(flatten)]
    body: Body,
}

impl Primitive {
    /// An empty, complete, visible primitive of the given kind.
    pub fn empty(kind: PrimitiveKind, id: i64) -> Self {
        Self {
            id,
            version: 0,
            visible: true,
            deleted: false,
            modified: false,
            incomplete: false,
            user: None,
            timestamp: None,
            tags: BTreeMap::new(),
            body: Body::empty(kind),
        }
    }

    pub fn point(id: i64, coord: Coordinate) -> Self {
        let mut p = Self::empty(PrimitiveKind::Point, id);
        p.body = Body::Point { coord: Some(coord) };
        p
    }

    /// A path over the points with the given ids.
    pub fn path(id: i64, points: impl IntoIterator<Item = i64>) -> Self {
        let mut p = Self::empty(PrimitiveKind::Path, id);
        p.body = Body::Path {
            points: points.into_iter().map(PrimitiveId::point).collect(),
        };
        p
    }

    pub fn group(id: i64, members: Vec<Member>) -> Self {
        let mut p = Self::empty(PrimitiveKind::Group, id);
        p.body = Body::Group { members };
        p
    }

    /// A stub that only carries an identity.
    pub fn incomplete(id: PrimitiveId) -> Self {
        let mut p = Self::empty(id.kind, id.id);
        p.incomplete = true;
        p
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_modified(mut self, modified: bool) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.body.kind()
    }

    pub fn primitive_id(&self) -> PrimitiveId {
        PrimitiveId::new(self.kind(), self.id)
    }

    pub fn is_new(&self) -> bool {
        self.id <= 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The coordinate of a point; `None` for other kinds or incomplete points.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match &self.body {
            Body::Point { coord } => *coord,
            _ => None,
        }
    }

    /// The point sequence of a path; empty for other kinds.
    pub fn points(&self) -> &[PrimitiveId] {
        match &self.body {
            Body::Path { points } => points,
            _ => &[],
        }
    }

    /// The member sequence of a group; empty for other kinds.
    pub fn members(&self) -> &[Member] {
        match &self.body {
            Body::Group { members } => members,
            _ => &[],
        }
    }

    /// Every identity this primitive references, in structural order.
    pub fn references(&self) -> Vec<PrimitiveId> {
        match &self.body {
            Body::Point { .. } => Vec::new(),
            Body::Path { points } => points.clone(),
            Body::Group { members } => members.iter().map(|m| m.member).collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Attribute mutators
    // -----------------------------------------------------------------------

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user;
    }

    pub fn set_timestamp(&mut self, timestamp: Option<DateTime<Utc>>) {
        self.timestamp = timestamp;
    }

    pub fn set_tags(&mut self, tags: BTreeMap<String, String>) {
        self.tags = tags;
    }

    pub fn put_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn set_coordinate(&mut self, coordinate: Option<Coordinate>) -> Result<(), GraphError> {
        match &mut self.body {
            Body::Point { coord } => {
                *coord = coordinate;
                Ok(())
            }
            other => Err(GraphError::KindMismatch {
                id: PrimitiveId::new(other.kind(), self.id),
                expected: PrimitiveKind::Point,
                actual: other.kind(),
            }),
        }
    }

    // Structural mutators are crate-private: the graph keeps its referrer
    // index in sync with them.

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    pub(crate) fn replace_points(&mut self, new_points: Vec<PrimitiveId>) {
        if let Body::Path { points } = &mut self.body {
            *points = new_points;
        }
    }

    pub(crate) fn replace_members(&mut self, new_members: Vec<Member>) {
        if let Body::Group { members } = &mut self.body {
            *members = new_members;
        }
    }

    pub(crate) fn clear_references(&mut self) {
        match &mut self.body {
            Body::Point { .. } => {}
            Body::Path { points } => points.clear(),
            Body::Group { members } => members.clear(),
        }
    }

    // -----------------------------------------------------------------------
    // Merge support
    // -----------------------------------------------------------------------

    /// Copy tags, technical attributes and (for points) the coordinate from
    /// `source` onto `self`.
    ///
    /// Path point lists and group member lists are *not* copied: they name
    /// objects of the source graph and are rebuilt by the merger once every
    /// referenced object has a merge target.
    pub fn merge_from(&mut self, source: &Primitive) {
        debug_assert_eq!(self.kind(), source.kind());
        self.version = source.version;
        self.visible = source.visible;
        self.deleted = source.deleted;
        self.modified = source.modified;
        self.incomplete = source.incomplete;
        self.user = source.user.clone();
        self.timestamp = source.timestamp;
        self.tags = source.tags.clone();
        if let (Body::Point { coord }, Body::Point { coord: theirs }) = (&mut self.body, &source.body) {
            *coord = *theirs;
        }
    }

    /// Compare tags and kind-specific structure with `other`, ignoring
    /// version, user, timestamp and the modified flag.
    ///
    /// `resolve` maps identities referenced by `other` into the identity space
    /// of `self` (for example through the merger's resolved-map). A reference
    /// it cannot map never equals anything. Incomplete primitives are only
    /// ever equal to an incomplete primitive with the same identity.
    pub fn has_equal_semantic_attributes<F>(&self, other: &Primitive, resolve: F) -> bool
    where
        F: Fn(PrimitiveId) -> Option<PrimitiveId>,
    {
        if self.kind() != other.kind() {
            return false;
        }
        if self.incomplete || other.incomplete {
            return self.incomplete && other.incomplete && self.id == other.id;
        }
        if !self.is_new() && self.id != other.id {
            return false;
        }
        if self.tags != other.tags {
            return false;
        }
        match (&self.body, &other.body) {
            (Body::Point { coord: mine }, Body::Point { coord: theirs }) => match (mine, theirs) {
                (Some(a), Some(b)) => a.equals_epsilon(b),
                (None, None) => true,
                _ => false,
            },
            (Body::Path { points: mine }, Body::Path { points: theirs }) => {
                mine.len() == theirs.len()
                    && mine.iter().zip(theirs).all(|(m, t)| resolve(*t) == Some(*m))
            }
            (Body::Group { members: mine }, Body::Group { members: theirs }) => {
                mine.len() == theirs.len()
                    && mine
                        .iter()
                        .zip(theirs)
                        .all(|(m, t)| m.role == t.role && resolve(t.member) == Some(m.member))
            }
            _ => false,
        }
    }
}
