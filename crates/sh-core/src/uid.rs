//! Segmented identifiers: `binding:type`, `binding:type:id`, `binding:type:id:channel`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between identifier segments
pub const SEPARATOR: char = ':';

/// Separator between a channel group and the channel id inside the last segment
pub const GROUP_SEPARATOR: char = '#';

/// Error type for invalid identifiers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UidError {
    #[error("identifier cannot be empty")]
    Empty,

    #[error("identifier '{uid}' needs at least {min} segments, found {found}")]
    TooFewSegments { uid: String, min: usize, found: usize },

    #[error("identifier '{uid}' allows at most {max} segments, found {found}")]
    TooManySegments { uid: String, max: usize, found: usize },

    #[error(
        "segment '{segment}' contains invalid characters (must be ASCII alphanumeric, '_' or '-')"
    )]
    InvalidSegment { segment: String },
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn check_segment(segment: &str) -> Result<(), UidError> {
    if is_valid_segment(segment) {
        Ok(())
    } else {
        Err(UidError::InvalidSegment {
            segment: segment.to_string(),
        })
    }
}

/// Split `uid` into segments and check the segment count
fn split(uid: &str, min: usize, max: Option<usize>) -> Result<Vec<&str>, UidError> {
    if uid.is_empty() {
        return Err(UidError::Empty);
    }
    let segments: Vec<&str> = uid.split(SEPARATOR).collect();
    if segments.len() < min {
        return Err(UidError::TooFewSegments {
            uid: uid.to_string(),
            min,
            found: segments.len(),
        });
    }
    if let Some(max) = max {
        if segments.len() > max {
            return Err(UidError::TooManySegments {
                uid: uid.to_string(),
                max,
                found: segments.len(),
            });
        }
    }
    Ok(segments)
}

/// Identifies a kind of entity, e.g. `hue:bridge`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityTypeId {
    binding: String,
    id: String,
}

impl EntityTypeId {
    pub fn new(binding: impl Into<String>, id: impl Into<String>) -> Result<Self, UidError> {
        let binding = binding.into();
        let id = id.into();
        check_segment(&binding)?;
        check_segment(&id)?;
        Ok(Self { binding, id })
    }

    /// The binding (integration) this type belongs to
    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for EntityTypeId {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split(s, 2, Some(2))?;
        Self::new(segments[0], segments[1])
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.binding, SEPARATOR, self.id)
    }
}

/// Identifies a kind of channel, e.g. `hue:brightness`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelTypeId {
    binding: String,
    id: String,
}

impl ChannelTypeId {
    pub fn new(binding: impl Into<String>, id: impl Into<String>) -> Result<Self, UidError> {
        let binding = binding.into();
        let id = id.into();
        check_segment(&binding)?;
        check_segment(&id)?;
        Ok(Self { binding, id })
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for ChannelTypeId {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split(s, 2, Some(2))?;
        Self::new(segments[0], segments[1])
    }
}

impl fmt::Display for ChannelTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.binding, SEPARATOR, self.id)
    }
}

/// Identifies a single entity, e.g. `hue:bridge:001788fffe23`
///
/// The first segment is always the binding. The usual shape is
/// `binding:type:id`, built with [`EntityId::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    segments: Vec<String>,
}

impl EntityId {
    /// Create the id of an entity of `entity_type` named `id`
    pub fn new(entity_type: &EntityTypeId, id: impl Into<String>) -> Result<Self, UidError> {
        let id = id.into();
        check_segment(&id)?;
        Ok(Self {
            segments: vec![
                entity_type.binding().to_string(),
                entity_type.id().to_string(),
                id,
            ],
        })
    }

    /// Create an id from raw segments (at least two)
    pub fn from_segments<I, S>(segments: I) -> Result<Self, UidError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.len() < 2 {
            return Err(UidError::TooFewSegments {
                uid: segments.join(":"),
                min: 2,
                found: segments.len(),
            });
        }
        for segment in &segments {
            check_segment(segment)?;
        }
        Ok(Self { segments })
    }

    pub fn binding(&self) -> &str {
        &self.segments[0]
    }

    /// The last segment
    pub fn id(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl FromStr for EntityId {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split(s, 2, None)?;
        Self::from_segments(segments)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(":"))
    }
}

/// Identifies a channel of an entity, e.g. `hue:bridge:001788fffe23:color`
///
/// The last segment may carry a group prefix: `...:light#brightness`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    entity: EntityId,
    id: String,
}

impl ChannelId {
    pub fn new(entity: &EntityId, id: impl Into<String>) -> Result<Self, UidError> {
        let id = id.into();
        Self::check_channel_segment(&id)?;
        Ok(Self {
            entity: entity.clone(),
            id,
        })
    }

    /// Create a channel id inside a channel group
    pub fn in_group(
        entity: &EntityId,
        group: impl AsRef<str>,
        id: impl AsRef<str>,
    ) -> Result<Self, UidError> {
        Self::new(
            entity,
            format!("{}{}{}", group.as_ref(), GROUP_SEPARATOR, id.as_ref()),
        )
    }

    fn check_channel_segment(segment: &str) -> Result<(), UidError> {
        match segment.split_once(GROUP_SEPARATOR) {
            Some((group, id)) => {
                check_segment(group)?;
                check_segment(id)
            }
            None => check_segment(segment),
        }
    }

    /// The entity owning this channel
    pub fn entity_id(&self) -> &EntityId {
        &self.entity
    }

    /// The channel segment including a group prefix, if any
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> Option<&str> {
        self.id.split_once(GROUP_SEPARATOR).map(|(group, _)| group)
    }

    /// The channel segment without its group prefix
    pub fn id_without_group(&self) -> &str {
        self.id
            .split_once(GROUP_SEPARATOR)
            .map(|(_, id)| id)
            .unwrap_or(&self.id)
    }
}

impl FromStr for ChannelId {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split(s, 3, None)?;
        let (last, entity) = segments
            .split_last()
            .ok_or(UidError::Empty)?;
        let entity = EntityId::from_segments(entity.iter().copied())?;
        Self::new(&entity, *last)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity, SEPARATOR, self.id)
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = UidError;

                fn try_from(s: String) -> Result<Self, Self::Error> {
                    s.parse()
                }
            }

            impl From<$ty> for String {
                fn from(id: $ty) -> String {
                    id.to_string()
                }
            }
        )*
    };
}

string_conversions!(EntityTypeId, ChannelTypeId, EntityId, ChannelId);
