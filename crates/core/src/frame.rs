//! Decoded frame records and the shared stream-info cell.
//!
//! The ingestor publishes each decoded frame once as an `Arc` handle and
//! fans the handle out to every subscriber queue. Frames are immutable
//! after publication — analyzers and the TS persister only ever read them,
//! so no per-consumer copies are made.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::RwLock;

use crate::stop::StopFlag;

/// Rational time base of a stream (`num / den` seconds per PTS unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// `1 / clock_rate` — the time base of an RTP media clock.
    pub fn from_clock_rate(clock_rate: u32) -> Self {
        TimeBase {
            num: 1,
            den: clock_rate,
        }
    }

    /// Seconds per PTS unit.
    pub fn as_secs_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// A decoded video frame in packed planar YUV 4:2:0.
///
/// `data` holds the Y plane (`width × height` bytes) followed by the U and
/// V planes (`(width/2) × (height/2)` bytes each), rows tightly packed.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation timestamp in clock-rate units.
    pub pts: i64,
    pub time_base: TimeBase,
    /// Whether the frame was decoded from a sync point.
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Presentation time in seconds.
    pub fn time(&self) -> f64 {
        self.pts as f64 * self.time_base.as_secs_f64()
    }

    /// The Y plane (`width × height` bytes).
    pub fn y_plane(&self) -> &[u8] {
        &self.data[..(self.width * self.height) as usize]
    }

    /// The U and V planes, each `(width/2) × (height/2)` bytes.
    pub fn chroma_planes(&self) -> (&[u8], &[u8]) {
        let y_len = (self.width * self.height) as usize;
        let c_len = ((self.width / 2) * (self.height / 2)) as usize;
        (
            &self.data[y_len..y_len + c_len],
            &self.data[y_len + c_len..y_len + 2 * c_len],
        )
    }
}

/// A decoded audio frame as interleaved signed 16-bit samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation timestamp in clock-rate units (clock rate = sample rate).
    pub pts: i64,
    pub time_base: TimeBase,
    pub sample_rate: u32,
    pub channels: u32,
    pub samples: Vec<i16>,
}

/// Deliver a frame handle to every subscriber that has room.
///
/// Ingest must never block on a slow consumer: a full queue drops the frame
/// for that subscriber only and the others still receive it.
pub fn fan_out<T>(subscribers: &[Sender<Arc<T>>], frame: Arc<T>) {
    for sub in subscribers {
        let _ = sub.try_send(frame.clone());
    }
}

/// Lifecycle of the ingested stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// The ingestor has not probed the stream yet.
    Uninitialized,
    /// Stream probed; the info record is final.
    Start,
    /// The ingestor exited.
    End,
}

/// What the ingestor learned while probing the stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamInfo {
    pub has_video: bool,
    pub has_audio: bool,
    pub video_clock_rate: Option<u32>,
    pub audio_clock_rate: Option<u32>,
    pub audio_channels: Option<u32>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
}

/// Shared stream-info record.
///
/// Written by the ingestor — once with the probed info (status `Start`),
/// once more to flip status to `End` on exit. Analyzers block in
/// [`wait_for_start`](Self::wait_for_start) until the record is published
/// and treat the returned copy as immutable.
#[derive(Clone, Default)]
pub struct SharedStreamInfo {
    inner: Arc<RwLock<(StreamStatus, StreamInfo)>>,
}

impl Default for StreamStatus {
    fn default() -> Self {
        StreamStatus::Uninitialized
    }
}

impl SharedStreamInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StreamStatus {
        self.inner.read().0
    }

    pub fn get(&self) -> StreamInfo {
        self.inner.read().1
    }

    /// Publish the probed info and mark the stream started.
    pub fn publish(&self, info: StreamInfo) {
        let mut guard = self.inner.write();
        *guard = (StreamStatus::Start, info);
    }

    /// Mark the stream ended. The info record is left in place so late
    /// readers still see what was probed.
    pub fn mark_end(&self) {
        self.inner.write().0 = StreamStatus::End;
    }

    /// Spin-wait (10 ms) until the status leaves `Uninitialized`.
    ///
    /// Returns the probed info once published, or `None` when the stop
    /// signal fires first or the stream ended without ever starting.
    pub fn wait_for_start(&self, stop: &StopFlag) -> Option<StreamInfo> {
        loop {
            match self.status() {
                StreamStatus::Start => return Some(self.get()),
                StreamStatus::End => return None,
                StreamStatus::Uninitialized => {
                    if stop.is_set() {
                        return None;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}
