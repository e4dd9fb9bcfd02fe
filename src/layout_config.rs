//! Loading and saving the plot layout: which derived-signal series each
//! display column shows.
//!
//! The format is a CSV file with exactly two rows, one per column, each a
//! comma-separated list of indices into the available series. A missing
//! or malformed file is regenerated from the hardcoded default.

use log::{info, warn};
use std::fs;
use std::io;
use std::path::Path;

/// Number of display columns the layout describes.
pub const NUM_COLUMNS: usize = 2;

/// The layout written when no valid config exists.
pub fn default_layout() -> Vec<Vec<usize>> {
    vec![vec![0, 1], vec![2, 3]]
}

/// Loads the layout from `path`, regenerating (and writing) the default
/// when the file is missing or does not parse to exactly two rows of
/// indices.
pub fn load_layout(path: &Path) -> io::Result<Vec<Vec<usize>>> {
    if let Some(layout) = try_parse(path) {
        info!("loaded plot layout from {}", path.display());
        return Ok(layout);
    }

    warn!(
        "plot layout at {} missing or broken, regenerating",
        path.display()
    );
    let layout = default_layout();
    save_layout(path, &layout)?;
    Ok(layout)
}

/// Writes `layout` to `path` as two CSV rows.
pub fn save_layout(path: &Path, layout: &[Vec<usize>]) -> io::Result<()> {
    let rows: Vec<String> = layout
        .iter()
        .map(|col| {
            col.iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    fs::write(path, rows.join("\n") + "\n")
}

fn try_parse(path: &Path) -> Option<Vec<Vec<usize>>> {
    let contents = fs::read_to_string(path).ok()?;
    let rows: Vec<Vec<usize>> = contents
        .lines()
        .map(|line| {
            line.split(',')
                .map(|field| field.trim().parse::<usize>())
                .collect::<Result<Vec<usize>, _>>()
        })
        .collect::<Result<_, _>>()
        .ok()?;

    if rows.len() == NUM_COLUMNS {
        Some(rows)
    } else {
        None
    }
}
