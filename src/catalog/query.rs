//! Pure helpers over in-memory record lists: search, sort and facet listing.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::model::{MusicRecord, PlaylistRecord};

/// Moment value the library picker uses for "no moment filter".
pub const ALL_MOMENTS: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MusicFilter {
    /// Case-insensitive substring matched against title and author.
    #[serde(default)]
    #[ts(optional)]
    pub term: Option<String>,
    /// Exact liturgical moment tag.
    #[serde(default)]
    #[ts(optional)]
    pub moment: Option<String>,
}

impl MusicFilter {
    pub fn matches(&self, record: &MusicRecord) -> bool {
        let term_ok = match self.term.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let needle = term.to_lowercase();
                record.title.to_lowercase().contains(&needle)
                    || record
                        .author
                        .as_deref()
                        .map(|a| a.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            }
            _ => true,
        };
        let moment_ok = match self.moment.as_deref().map(str::trim) {
            Some(moment) if !moment.is_empty() && !moment.eq_ignore_ascii_case(ALL_MOMENTS) => {
                record.liturgical_moment.iter().any(|m| m == moment)
            }
            _ => true,
        };
        term_ok && moment_ok
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SortKey {
    #[default]
    Title,
    Author,
    /// Newest first.
    DateAdded,
    /// Favorites first, then by title.
    Favorite,
}

pub fn search(records: &[MusicRecord], filter: &MusicFilter) -> Vec<MusicRecord> {
    records
        .iter()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect()
}

fn by_title(a: &MusicRecord, b: &MusicRecord) -> Ordering {
    a.title
        .to_lowercase()
        .cmp(&b.title.to_lowercase())
        .then_with(|| a.id.cmp(&b.id))
}

/// Stable sort. Records missing the sort field go last.
pub fn sort(records: &mut [MusicRecord], key: SortKey) {
    match key {
        SortKey::Title => records.sort_by(by_title),
        SortKey::Author => records.sort_by(|a, b| {
            let left = a.author.as_deref().map(str::to_lowercase);
            let right = b.author.as_deref().map(str::to_lowercase);
            match (left, right) {
                (Some(l), Some(r)) => l.cmp(&r).then_with(|| by_title(a, b)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => by_title(a, b),
            }
        }),
        SortKey::DateAdded => records.sort_by(|a, b| match (a.date_added, b.date_added) {
            (Some(l), Some(r)) => r.cmp(&l).then_with(|| by_title(a, b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => by_title(a, b),
        }),
        SortKey::Favorite => {
            records.sort_by(|a, b| b.favorite.cmp(&a.favorite).then_with(|| by_title(a, b)))
        }
    }
}

/// Distinct liturgical moments across `records`, sorted.
pub fn liturgical_moments(records: &[MusicRecord]) -> Vec<String> {
    records
        .iter()
        .flat_map(|record| record.liturgical_moment.iter())
        .filter(|moment| !moment.trim().is_empty())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn filter_playlists(playlists: &[PlaylistRecord], term: &str) -> Vec<PlaylistRecord> {
    let needle = term.trim().to_lowercase();
    playlists
        .iter()
        .filter(|playlist| needle.is_empty() || playlist.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
