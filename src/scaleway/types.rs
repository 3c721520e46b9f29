//! Scaleway value types and the mappings onto normalised resource state.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use crate::model::{STATE_RUNNING, STATE_STOPPED};

/// Tag holding the pool shape recorded when a node group is stopped.
pub(crate) const RESTORE_TAG_KEY: &str = "nocturne-restore";
/// Size restored when a stopped pool carries no restore tag.
pub(crate) const DEFAULT_RESTORE_SIZE: u32 = 1;

/// Availability zone such as `fr-par-1`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Zone(String);

impl Zone {
    /// Parses a zone, rejecting values without a trailing zone number.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (region, number) = trimmed.rsplit_once('-')?;
        let valid = !region.is_empty()
            && region.contains('-')
            && !number.is_empty()
            && number.chars().all(|ch| ch.is_ascii_digit());
        valid.then(|| Self(trimmed.to_owned()))
    }

    /// Region hosting the zone: `fr-par-1` lives in `fr-par`.
    pub(crate) fn region(&self) -> &str {
        self.0.rsplit_once('-').map_or(self.0.as_str(), |(region, _)| region)
    }

    pub(crate) const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for Zone {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits Scaleway's flat `key=value` tags into a map. Tags without `=` map
/// to an empty value; later duplicates win.
pub(crate) fn parse_tags(tags: &[String]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|tag| match tag.split_once('=') {
            Some((key, value)) => (key.trim().to_owned(), value.trim().to_owned()),
            None => (tag.trim().to_owned(), String::new()),
        })
        .collect()
}

/// Renders a tag filter in the form the Instances API matches on.
pub(crate) fn render_tag(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Maps a server state onto the normalised vocabulary.
pub(crate) fn normalise_server_state(state: &str) -> String {
    match state {
        "stopped in place" => String::from(STATE_STOPPED),
        other => other.to_owned(),
    }
}

/// Maps a pool status and size onto the normalised vocabulary.
pub(crate) fn normalise_pool_state(status: &str, size: u32) -> String {
    match (status, size) {
        ("ready", 0) => String::from(STATE_STOPPED),
        ("ready", _) => String::from(STATE_RUNNING),
        (other, _) => other.to_owned(),
    }
}

/// Pool shape captured before scaling to zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PoolShape {
    pub(crate) size: u32,
    pub(crate) min_size: u32,
    pub(crate) autoscaling: bool,
}

impl PoolShape {
    /// Encodes the shape as a `nocturne-restore=size/min/autoscaling` tag.
    pub(crate) fn to_tag(self) -> String {
        render_tag(
            RESTORE_TAG_KEY,
            &format!("{}/{}/{}", self.size, self.min_size, self.autoscaling),
        )
    }

    /// Recovers the shape from a pool's tags; missing or garbled tags fall
    /// back to a fixed pool of [`DEFAULT_RESTORE_SIZE`] nodes.
    pub(crate) fn from_tags(tags: &[String]) -> Self {
        parse_tags(tags)
            .get(RESTORE_TAG_KEY)
            .and_then(|raw| Self::decode(raw))
            .unwrap_or(Self {
                size: DEFAULT_RESTORE_SIZE,
                min_size: 0,
                autoscaling: false,
            })
    }

    fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.split('/');
        let size = parts.next()?.parse::<u32>().ok()?;
        let min_size = parts.next()?.parse::<u32>().ok()?;
        let autoscaling = parts.next()?.parse::<bool>().ok()?;
        if parts.next().is_some() || size == 0 {
            return None;
        }
        Some(Self {
            size,
            min_size: min_size.min(size),
            autoscaling,
        })
    }
}

/// Returns `tags` without any restore tag, followed by `extra` when given.
pub(crate) fn replace_restore_tag(tags: &[String], extra: Option<String>) -> Vec<String> {
    let prefix = format!("{RESTORE_TAG_KEY}=");
    tags.iter()
        .filter(|tag| !tag.starts_with(&prefix))
        .cloned()
        .chain(extra)
        .collect()
}
