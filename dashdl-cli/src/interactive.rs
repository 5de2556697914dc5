//! Manual group/representation choice, saving one track on its own.

use std::fmt;

use dash_engine::{ManifestIndex, Track, TrackGroup};
use inquire::Select;

use crate::error::{AppError, Result};

struct GroupChoice<'a>(&'a TrackGroup);

impl fmt::Display for GroupChoice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.index, self.0.describe())
    }
}

struct TrackChoice<'a>(&'a Track);

impl fmt::Display for TrackChoice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.describe())
    }
}

/// Prompt for a track group, then for one of its representations.
pub fn choose_track(index: &ManifestIndex) -> Result<Track> {
    let groups = index.list_groups().map(|(_, g)| GroupChoice(g)).collect();
    let group = select_one("Select a track group:", groups)?.0;

    let tracks = index
        .list_tracks(group)
        .iter()
        .map(TrackChoice)
        .collect();
    let track = select_one("Select a representation:", tracks)?.0;
    Ok(track.clone())
}

/// File name a single saved track is written to.
pub fn output_name_for(track: &Track) -> String {
    let stem: String = track
        .id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    if stem.is_empty() {
        "track.mp4".to_string()
    } else {
        format!("{stem}.mp4")
    }
}

/// Nothing to choose from is an error; a single option is taken without asking.
fn select_one<T: fmt::Display>(message: &str, mut options: Vec<T>) -> Result<T> {
    match options.len() {
        0 => Err(AppError::InvalidInput(format!(
            "{} nothing to choose from",
            message.trim_end_matches(':')
        ))),
        1 => Ok(options.remove(0)),
        _ => Ok(Select::new(message, options).prompt()?),
    }
}
