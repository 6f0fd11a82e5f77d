//! Track query model: filtering, sorting, pagination
//!
//! The listing endpoint needs a deterministic total order for stable
//! pagination; the default sort is (artist, title, path) with the path as
//! the final tiebreak everywhere.

use crate::models::{Camelot, Mood, Track};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_PER_PAGE: usize = 50;
pub const MAX_PER_PAGE: usize = 500;

/// Filter over the analysed library
#[derive(Debug, Clone, Default)]
pub struct TrackFilter {
    /// Substring match on artist, title or filename (case-insensitive)
    pub search: Option<String>,
    pub keys: Vec<String>,
    pub camelots: Vec<Camelot>,
    pub moods: Vec<Mood>,
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
}

impl TrackFilter {
    pub fn matches(&self, track: &Track) -> bool {
        let Some(features) = &track.features else {
            return false;
        };

        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let artist = track.tags.artist.as_deref().unwrap_or("").to_lowercase();
            let title = track.tags.title.as_deref().unwrap_or("").to_lowercase();
            let filename = track.filename().to_lowercase();
            if !artist.contains(&needle)
                && !title.contains(&needle)
                && !filename.contains(&needle)
            {
                return false;
            }
        }
        if !self.keys.is_empty()
            && !self
                .keys
                .iter()
                .any(|k| k.eq_ignore_ascii_case(&features.key))
        {
            return false;
        }
        if !self.camelots.is_empty() && !self.camelots.contains(&features.camelot) {
            return false;
        }
        if !self.moods.is_empty() && !self.moods.contains(&features.mood) {
            return false;
        }
        if let Some(min) = self.min_bpm {
            if features.bpm < min {
                return false;
            }
        }
        if let Some(max) = self.max_bpm {
            if features.bpm > max {
                return false;
            }
        }
        if let Some(min) = self.min_energy {
            if features.energy < min {
                return false;
            }
        }
        if let Some(max) = self.max_energy {
            if features.energy > max {
                return false;
            }
        }
        true
    }
}

/// Sortable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Artist,
    Title,
    Bpm,
    Energy,
    Path,
    AnalysedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Total order over tracks for the given sort; always falls through to the
/// path so equal keys stay deterministic
pub fn compare_tracks(a: &Track, b: &Track, sort_by: SortBy, order: SortOrder) -> Ordering {
    let primary = match sort_by {
        SortBy::Artist => cmp_opt_str(&a.tags.artist, &b.tags.artist)
            .then_with(|| cmp_opt_str(&a.tags.title, &b.tags.title)),
        SortBy::Title => cmp_opt_str(&a.tags.title, &b.tags.title),
        SortBy::Bpm => cmp_feature(a, b, |f| f.bpm),
        SortBy::Energy => cmp_feature(a, b, |f| f.energy),
        SortBy::Path => Ordering::Equal,
        SortBy::AnalysedAt => a.analysed_at.cmp(&b.analysed_at),
    };
    let primary = match order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    primary.then_with(|| a.path.cmp(&b.path))
}

fn cmp_opt_str(a: &Option<String>, b: &Option<String>) -> Ordering {
    // present sorts before absent so untagged files sink to the end
    match (a, b) {
        (Some(a), Some(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_feature(a: &Track, b: &Track, get: impl Fn(&crate::models::Features) -> f64) -> Ordering {
    let av = a.features.as_ref().map(&get).unwrap_or(f64::NAN);
    let bv = b.features.as_ref().map(&get).unwrap_or(f64::NAN);
    av.total_cmp(&bv)
}

/// Clamped pagination over a total count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-indexed page number, clamped into range
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
    pub offset: usize,
}

/// Compute pagination bounds; out-of-range requests clamp rather than fail
pub fn paginate(total: usize, requested_page: usize, per_page: usize) -> Page {
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let total_pages = total.div_ceil(per_page);
    let page = requested_page.max(1).min(total_pages.max(1));
    Page {
        page,
        per_page,
        total_pages,
        offset: (page - 1) * per_page,
    }
}
