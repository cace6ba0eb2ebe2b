//! Audioscrobbler plugin: now-playing and playback state
//!
//! The daemon submits the scrobbles itself; the client only reports when a
//! track starts and when playback stops, pauses or resumes. These calls need
//! an authenticated transport.

use crate::client::PlaydarClient;
use crate::error::Result;
use crate::transport::ApiCall;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Track reported to the audioscrobbler plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrobbleTrack {
    pub artist: String,
    pub track: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    /// MusicBrainz recording id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbid: Option<String>,
}

impl ScrobbleTrack {
    pub fn new(artist: impl Into<String>, track: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            track: track.into(),
            ..Default::default()
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_track_number(mut self, number: u32) -> Self {
        self.track_number = Some(number);
        self
    }

    pub fn with_mbid(mut self, mbid: impl Into<String>) -> Self {
        self.mbid = Some(mbid.into());
        self
    }
}

impl ApiCall {
    /// `start` command announcing `track`
    ///
    /// Empty and zero optional fields are left out, as the plugin treats
    /// them as unknown anyway.
    pub fn scrobble_start(track: &ScrobbleTrack) -> Self {
        // source "P": chosen by the user
        let mut call = Self::audioscrobbler("start")
            .param("a", track.artist.as_str())
            .param("t", track.track.as_str())
            .param("o", "P");
        if let Some(album) = track.album.as_deref().filter(|a| !a.is_empty()) {
            call = call.param("b", album);
        }
        if let Some(duration) = track.duration.filter(|d| *d > 0) {
            call = call.param("l", duration.to_string());
        }
        if let Some(number) = track.track_number.filter(|n| *n > 0) {
            call = call.param("n", number.to_string());
        }
        if let Some(mbid) = track.mbid.as_deref().filter(|m| !m.is_empty()) {
            call = call.param("m", mbid);
        }
        call
    }
}

impl PlaydarClient {
    /// Report that `track` started playing
    pub async fn scrobble_start(&self, track: &ScrobbleTrack) -> Result<()> {
        debug!(artist = %track.artist, track = %track.track, "Scrobbler start");
        self.scrobble(ApiCall::scrobble_start(track)).await
    }

    /// Report that playback stopped
    pub async fn scrobble_stop(&self) -> Result<()> {
        self.scrobble(ApiCall::audioscrobbler("stop")).await
    }

    pub async fn scrobble_pause(&self) -> Result<()> {
        self.scrobble(ApiCall::audioscrobbler("pause")).await
    }

    pub async fn scrobble_resume(&self) -> Result<()> {
        self.scrobble(ApiCall::audioscrobbler("resume")).await
    }

    async fn scrobble(&self, call: ApiCall) -> Result<()> {
        let name = call.name();
        let request = self.transport().call(call);
        match self.settings().call_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await??,
            None => request.await?,
        };
        debug!(call = %name, "Scrobbler acknowledged");
        Ok(())
    }
}
