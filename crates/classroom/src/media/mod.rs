//! Local media acquisition.
//!
//! Media is acquired once per session and the same track handles are attached
//! to every peer connection. Muting flips an enabled flag consulted by
//! whoever pumps samples; tracks are never detached and nothing is
//! renegotiated. [`MediaSource`] is the seam to the platform capture layer;
//! [`SyntheticMediaSource`] keeps RTP flowing without devices for tests and
//! demos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{Error, Result};

/// Opus DTX frame. Keeps the RTP stream alive with near-zero bandwidth when
/// there is no real capture behind the track.
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Audio frame cadence for sample pumps.
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Which kinds to acquire. Acquisition is all-or-nothing: failure of any
/// requested kind fails the whole acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

impl MediaConstraints {
    /// Audio-only constraints, the usual retry after a camera failure when
    /// the caller opts into degraded joins.
    pub fn audio_only() -> Self {
        Self { audio: true, video: false }
    }
}

/// Why local capture could not be acquired. Fatal for a join by default.
#[derive(Debug, Clone, Error)]
pub enum MediaAccessError {
    /// The user or platform denied capture permission
    #[error("media permission denied")]
    PermissionDenied,

    /// No capture device matches the constraints
    #[error("no capture device available")]
    NoDevice,

    /// A device exists but another application holds it
    #[error("capture device busy")]
    DeviceBusy,

    /// Anything else the capture layer reports
    #[error("media acquisition failed: {0}")]
    Failed(String),
}

/// The acquired local media bundle: at most one audio and one video track,
/// shared by every peer connection of the session.
pub struct LocalMedia {
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    audio_enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    pump_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalMedia {
    /// Bundle freshly created tracks. Sources call this, then optionally
    /// register pump tasks via [`LocalMedia::attach_pump`].
    pub fn new(
        audio: Option<Arc<TrackLocalStaticSample>>,
        video: Option<Arc<TrackLocalStaticSample>>,
    ) -> Self {
        Self {
            audio,
            video,
            audio_enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
            pump_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }

    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    /// Flag shared with sample pumps; pumps skip writes while disabled.
    pub fn audio_enabled_flag(&self) -> Arc<AtomicBool> {
        self.audio_enabled.clone()
    }

    /// Flag shared with sample pumps; set once by [`LocalMedia::stop`].
    pub fn stopped_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    /// Push one captured audio sample through the local track. Returns
    /// whether the sample was written: muted or stopped bundles skip the
    /// write, so capture shells do not need to track mute state themselves.
    pub async fn send_audio_sample(&self, sample: &Sample) -> Result<bool> {
        if self.stopped.load(Ordering::SeqCst) || !self.is_audio_enabled() {
            return Ok(false);
        }
        let Some(track) = &self.audio else {
            return Ok(false);
        };
        track
            .write_sample(sample)
            .await
            .map_err(|e| Error::WebRtc(format!("audio write failed: {}", e)))?;
        Ok(true)
    }

    /// Register a pump task to be aborted on stop.
    pub fn attach_pump(&self, handle: JoinHandle<()>) {
        self.pump_tasks.lock().push(handle);
    }

    /// Stop the bundle: marks it stopped and aborts pump tasks. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks = std::mem::take(&mut *self.pump_tasks.lock());
        for task in tasks {
            task.abort();
        }
        debug!("local media stopped");
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Seam to the platform capture layer.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local media once for a session. Errors are fatal for the
    /// join; callers wanting a degraded join retry with narrower
    /// constraints themselves.
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<Arc<LocalMedia>, MediaAccessError>;
}

/// Device-free media source: an Opus track fed DTX silence at the audio
/// frame cadence, plus an unpumped VP8 track when video is requested.
/// Honors the mute flag by not writing while disabled.
#[derive(Debug, Default)]
pub struct SyntheticMediaSource;

impl SyntheticMediaSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<Arc<LocalMedia>, MediaAccessError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaAccessError::Failed(
                "no media kinds requested".to_string(),
            ));
        }

        let stream_id = format!("classroom-{}", uuid::Uuid::new_v4());

        let audio = constraints.audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48_000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_string(),
                stream_id.clone(),
            ))
        });

        let video = constraints.video.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90_000,
                    ..Default::default()
                },
                "video".to_string(),
                stream_id.clone(),
            ))
        });

        let media = Arc::new(LocalMedia::new(audio.clone(), video));

        if let Some(track) = audio {
            let enabled = media.audio_enabled_flag();
            let stopped = media.stopped_flag();
            let pump = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(AUDIO_FRAME_DURATION);
                loop {
                    ticker.tick().await;
                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    if !enabled.load(Ordering::SeqCst) {
                        continue;
                    }
                    let sample = Sample {
                        data: Bytes::from_static(&OPUS_SILENCE_FRAME),
                        duration: AUDIO_FRAME_DURATION,
                        ..Default::default()
                    };
                    if track.write_sample(&sample).await.is_err() {
                        break;
                    }
                }
            });
            media.attach_pump(pump);
        }

        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_constraints_request_both_kinds() {
        let constraints = MediaConstraints::default();
        assert!(constraints.audio);
        assert!(constraints.video);
        assert!(!MediaConstraints::audio_only().video);
    }

    #[tokio::test]
    async fn synthetic_acquire_creates_requested_tracks() {
        let media = SyntheticMediaSource::new()
            .acquire(MediaConstraints::default())
            .await
            .unwrap();
        assert!(media.audio_track().is_some());
        assert!(media.video_track().is_some());
        media.stop();
    }

    #[tokio::test]
    async fn synthetic_acquire_audio_only() {
        let media = SyntheticMediaSource::new()
            .acquire(MediaConstraints::audio_only())
            .await
            .unwrap();
        assert!(media.audio_track().is_some());
        assert!(media.video_track().is_none());
        media.stop();
    }

    #[tokio::test]
    async fn empty_constraints_are_rejected() {
        let result = SyntheticMediaSource::new()
            .acquire(MediaConstraints { audio: false, video: false })
            .await;
        assert!(matches!(result, Err(MediaAccessError::Failed(_))));
    }

    #[tokio::test]
    async fn mute_flag_round_trips() {
        let media = SyntheticMediaSource::new()
            .acquire(MediaConstraints::audio_only())
            .await
            .unwrap();
        assert!(media.is_audio_enabled());
        media.set_audio_enabled(false);
        assert!(!media.is_audio_enabled());
        media.set_audio_enabled(true);
        assert!(media.is_audio_enabled());
        media.stop();
    }

    #[tokio::test]
    async fn send_audio_sample_skips_while_muted_or_stopped() {
        let media = SyntheticMediaSource::new()
            .acquire(MediaConstraints::audio_only())
            .await
            .unwrap();
        let sample = Sample {
            data: Bytes::from_static(&OPUS_SILENCE_FRAME),
            duration: AUDIO_FRAME_DURATION,
            ..Default::default()
        };

        assert!(media.send_audio_sample(&sample).await.unwrap());

        media.set_audio_enabled(false);
        assert!(!media.send_audio_sample(&sample).await.unwrap());

        media.set_audio_enabled(true);
        media.stop();
        assert!(!media.send_audio_sample(&sample).await.unwrap());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let media = SyntheticMediaSource::new()
            .acquire(MediaConstraints::audio_only())
            .await
            .unwrap();
        media.stop();
        media.stop();
    }
}
