use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    /// Sink-error recovery attempts before skipping to the next queue item.
    #[serde(default = "default_max_track_retries")]
    pub max_track_retries: u32,
    #[serde(default = "default_max_playlists")]
    pub max_playlists: usize,
    #[serde(default = "default_max_playlist_name_len")]
    pub max_playlist_name_len: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_track_retries: default_max_track_retries(),
            max_playlists: default_max_playlists(),
            max_playlist_name_len: default_max_playlist_name_len(),
        }
    }
}

fn default_max_track_retries() -> u32 {
    3
}

fn default_max_playlists() -> usize {
    10
}

fn default_max_playlist_name_len() -> usize {
    50
}
