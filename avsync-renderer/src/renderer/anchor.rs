//! Anchor pair mapping media time to wall-clock time
//!
//! `deadline = (media_us - anchor_media_us) + anchor_real_us`. Either half may
//! be missing: start gating fixes the media half first and the first audio
//! drain fills in the real half.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnchorClock {
    media_us: Option<i64>,
    real_us: Option<i64>,
}

impl AnchorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.media_us = None;
        self.real_us = None;
    }

    pub fn set(&mut self, media_us: i64, real_us: i64) {
        self.media_us = Some(media_us);
        self.real_us = Some(real_us);
    }

    /// Fix the media half only (real half left as is)
    pub fn set_media(&mut self, media_us: i64) {
        self.media_us = Some(media_us);
    }

    pub fn media_us(&self) -> Option<i64> {
        self.media_us
    }

    pub fn real_us(&self) -> Option<i64> {
        self.real_us
    }

    /// Both halves present and non-negative
    pub fn is_valid(&self) -> bool {
        self.pair().is_some()
    }

    /// Wall-clock deadline of a media timestamp
    pub fn deadline_us(&self, media_us: i64) -> Option<i64> {
        self.pair()
            .map(|(anchor_media, anchor_real)| media_us - anchor_media + anchor_real)
    }

    /// Media position at wall-clock time `now_us`
    pub fn position_us(&self, now_us: i64) -> Option<i64> {
        self.pair()
            .map(|(anchor_media, anchor_real)| now_us - anchor_real + anchor_media)
    }

    fn pair(&self) -> Option<(i64, i64)> {
        match (self.media_us, self.real_us) {
            (Some(media), Some(real)) if media >= 0 && real >= 0 => Some((media, real)),
            _ => None,
        }
    }
}
