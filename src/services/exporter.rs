//! Playlist export
//!
//! Pure rendering of a playlist into one of the closed set of formats,
//! plus the write into `<data_root>/exports/`. Rekordbox cue points and
//! beatgrids are emitted only when the data exists; the analyzer does not
//! produce them, so absent means absent, never zeroed placeholders.

use crate::error::AppError;
use crate::models::Playlist;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The closed export format set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    M3u,
    Json,
    Csv,
    Rekordbox,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::M3u => "m3u",
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Rekordbox => "xml",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "m3u" => Some(ExportFormat::M3u),
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            "rekordbox" => Some(ExportFormat::Rekordbox),
            _ => None,
        }
    }
}

/// Render a playlist into the requested format
pub fn render(
    playlist: &Playlist,
    format: ExportFormat,
    include_metadata: bool,
) -> Result<Vec<u8>, AppError> {
    Ok(match format {
        ExportFormat::M3u => render_m3u(playlist, include_metadata).into_bytes(),
        ExportFormat::Json => serde_json::to_vec_pretty(playlist)
            .map_err(|e| AppError::internal(format!("json render failed: {e}")))?,
        ExportFormat::Csv => render_csv(playlist).into_bytes(),
        ExportFormat::Rekordbox => render_rekordbox(playlist).into_bytes(),
    })
}

/// Extended M3U: one path line per track, EXTINF lines when metadata is on
fn render_m3u(playlist: &Playlist, include_metadata: bool) -> String {
    let mut out = String::from("#EXTM3U\n");
    for entry in &playlist.tracks {
        if include_metadata {
            let title = entry
                .title
                .clone()
                .unwrap_or_else(|| file_stem(&entry.path));
            let label = match &entry.artist {
                Some(artist) => format!("{artist} - {title}"),
                None => title,
            };
            out.push_str(&format!(
                "#EXTINF:{},{}\n",
                entry.duration_seconds.round() as i64,
                label
            ));
        }
        out.push_str(&entry.path.to_string_lossy());
        out.push('\n');
    }
    out
}

fn render_csv(playlist: &Playlist) -> String {
    let mut out = String::from(
        "position,path,title,artist,bpm,camelot,duration_seconds,transition_score\n",
    );
    for (position, entry) in playlist.tracks.iter().enumerate() {
        out.push_str(&format!(
            "{},{},{},{},{:.1},{},{:.1},{:.3}\n",
            position + 1,
            csv_field(&entry.path.to_string_lossy()),
            csv_field(entry.title.as_deref().unwrap_or("")),
            csv_field(entry.artist.as_deref().unwrap_or("")),
            entry.bpm,
            entry.camelot,
            entry.duration_seconds,
            entry.transition_score,
        ));
    }
    out
}

/// Quote a CSV field when it contains a delimiter, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Rekordbox DJ_PLAYLISTS XML. Tracks carry AverageBpm and Tonality; cue
/// and beatgrid nodes would require data the analyzer does not emit, so
/// none are written.
fn render_rekordbox(playlist: &Playlist) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<DJ_PLAYLISTS Version=\"1.0.0\">\n");
    out.push_str("  <PRODUCT Name=\"mixdeck\" Version=\"");
    out.push_str(env!("CARGO_PKG_VERSION"));
    out.push_str("\" Company=\"\"/>\n");

    out.push_str(&format!(
        "  <COLLECTION Entries=\"{}\">\n",
        playlist.tracks.len()
    ));
    for (idx, entry) in playlist.tracks.iter().enumerate() {
        let track_id = idx + 1;
        out.push_str(&format!(
            "    <TRACK TrackID=\"{}\" Name=\"{}\" Artist=\"{}\" Location=\"file://localhost{}\" TotalTime=\"{}\" AverageBpm=\"{:.2}\" Tonality=\"{}\"/>\n",
            track_id,
            xml_escape(entry.title.as_deref().unwrap_or(&file_stem(&entry.path))),
            xml_escape(entry.artist.as_deref().unwrap_or("")),
            xml_escape(&entry.path.to_string_lossy()),
            entry.duration_seconds.round() as i64,
            entry.bpm,
            entry.camelot,
        ));
    }
    out.push_str("  </COLLECTION>\n");

    out.push_str("  <PLAYLISTS>\n");
    out.push_str("    <NODE Type=\"0\" Name=\"ROOT\" Count=\"1\">\n");
    out.push_str(&format!(
        "      <NODE Name=\"{}\" Type=\"1\" KeyType=\"0\" Entries=\"{}\">\n",
        xml_escape(&playlist.metadata.preset_name),
        playlist.tracks.len()
    ));
    for idx in 0..playlist.tracks.len() {
        out.push_str(&format!("        <TRACK Key=\"{}\"/>\n", idx + 1));
    }
    out.push_str("      </NODE>\n");
    out.push_str("    </NODE>\n");
    out.push_str("  </PLAYLISTS>\n");
    out.push_str("</DJ_PLAYLISTS>\n");
    out
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Write rendered bytes under the exports directory. Filenames are
/// flattened to their final component so requests cannot traverse out.
pub fn write_export(
    exports_dir: &Path,
    filename: &str,
    format: ExportFormat,
    payload: &[u8],
) -> Result<PathBuf, AppError> {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .ok_or_else(|| AppError::invalid_argument(format!("invalid export filename: {filename}")))?;

    let with_ext = if base.to_lowercase().ends_with(&format!(".{}", format.extension())) {
        base
    } else {
        format!("{base}.{}", format.extension())
    };

    std::fs::create_dir_all(exports_dir)?;
    let target = exports_dir.join(&with_ext);
    std::fs::write(&target, payload)?;
    tracing::info!(path = %target.display(), bytes = payload.len(), "export written");
    Ok(target)
}
