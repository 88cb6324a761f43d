//! RTSP stream ingest: decode the relayed session into raw frames.
//!
//! The ingestor is its own RTSP client — it connects to the forwarder's
//! local endpoint (so its session is the one being measured) and decodes
//! both tracks:
//!
//! ```text
//! rtspsrc protocols=tcp
//!   ├─ application/x-rtp,media=video ! decodebin ! videoconvert ! I420  ! appsink
//!   └─ application/x-rtp,media=audio ! decodebin ! audioconvert ! S16LE ! appsink
//! ```
//!
//! Once the first samples reveal what the stream carries, the shared
//! stream-info record is published and two puller threads convert samples
//! into [`VideoFrame`]/[`AudioFrame`] handles, fanning each one out to all
//! subscriber queues. A full queue drops the frame for that subscriber
//! only — ingest never blocks on a slow consumer.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use gst::prelude::*;

use probe::frame::{AudioFrame, SharedStreamInfo, StreamInfo, TimeBase, VideoFrame, fan_out};
use probe::{ProbeError, StopFlag};

/// RTP video media clock (RFC 3551: 90 kHz for all video payloads).
const VIDEO_CLOCK: u32 = 90000;

const OPEN_ATTEMPTS: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Deadline for the first decoded sample of a fresh pipeline.
const PROBE_DEADLINE: Duration = Duration::from_secs(10);
/// Grace period for the second track once the first has produced.
const SECOND_TRACK_GRACE: Duration = Duration::from_secs(2);

/// The stream ingest task.
pub struct StreamIngestor {
    url: String,
    video_subs: Vec<Sender<Arc<VideoFrame>>>,
    audio_subs: Vec<Sender<Arc<AudioFrame>>>,
    info: SharedStreamInfo,
    stop: StopFlag,
}

struct Opened {
    pipeline: gst::Pipeline,
    vsink: gst_app::AppSink,
    asink: gst_app::AppSink,
    first_video: Option<gst::Sample>,
    first_audio: Option<gst::Sample>,
}

impl StreamIngestor {
    pub fn new(
        url: String,
        video_subs: Vec<Sender<Arc<VideoFrame>>>,
        audio_subs: Vec<Sender<Arc<AudioFrame>>>,
        info: SharedStreamInfo,
        stop: StopFlag,
    ) -> Self {
        StreamIngestor {
            url,
            video_subs,
            audio_subs,
            info,
            stop,
        }
    }

    pub fn run(self) {
        if let Err(e) = gst::init() {
            tracing::error!(error = %e, "GStreamer init failed");
            self.stop.set();
            self.info.mark_end();
            return;
        }

        let Some(opened) = self.open_with_retries() else {
            tracing::error!(url = %self.url, "could not open stream");
            self.stop.set();
            self.info.mark_end();
            return;
        };

        let info = probe_stream_info(&opened);
        tracing::info!(
            has_video = info.has_video,
            has_audio = info.has_audio,
            width = info.video_width,
            height = info.video_height,
            audio_rate = info.audio_clock_rate,
            "stream probed"
        );
        self.info.publish(info);

        let video_puller = {
            let sink = opened.vsink.clone();
            let first = opened.first_video.clone();
            let subs = self.video_subs.clone();
            let stop = self.stop.clone();
            thread::spawn(move || pull_video(sink, first, subs, stop))
        };
        let audio_puller = {
            let sink = opened.asink.clone();
            let first = opened.first_audio.clone();
            let subs = self.audio_subs.clone();
            let stop = self.stop.clone();
            thread::spawn(move || pull_audio(sink, first, subs, stop))
        };

        // watch the bus until the session ends one way or another
        if let Some(bus) = opened.pipeline.bus() {
            while !self.stop.is_set() {
                let Some(msg) = bus.timed_pop_filtered(
                    gst::ClockTime::from_mseconds(100),
                    &[gst::MessageType::Error, gst::MessageType::Eos],
                ) else {
                    continue;
                };
                match msg.view() {
                    gst::MessageView::Error(err) => {
                        tracing::warn!(error = %err.error(), "pipeline error, stopping");
                        break;
                    }
                    gst::MessageView::Eos(_) => {
                        tracing::info!("stream ended");
                        break;
                    }
                    _ => {}
                }
            }
        }

        self.stop.set();
        let _ = video_puller.join();
        let _ = audio_puller.join();
        let _ = opened.pipeline.set_state(gst::State::Null);
        self.info.mark_end();
        tracing::debug!("ingestor exited");
    }

    fn open_with_retries(&self) -> Option<Opened> {
        for attempt in 1..=OPEN_ATTEMPTS {
            if self.stop.is_set() {
                return None;
            }
            match self.try_open() {
                Ok(opened) => return Some(opened),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "open attempt failed");
                    if attempt < OPEN_ATTEMPTS {
                        thread::sleep(OPEN_RETRY_DELAY);
                    }
                }
            }
        }
        None
    }

    /// Build and start a pipeline, then wait for its first decoded samples.
    fn try_open(&self) -> Result<Opened, ProbeError> {
        let desc = format!(
            "rtspsrc name=src location={url} protocols=tcp tcp-timeout=10000000 latency=5000 \
             src. ! application/x-rtp,media=video ! queue ! decodebin ! videoconvert ! \
             video/x-raw,format=I420 ! \
             appsink name=vsink sync=false async=false max-buffers=32 drop=true \
             src. ! application/x-rtp,media=audio ! queue ! decodebin ! audioconvert ! audioresample ! \
             audio/x-raw,format=S16LE,layout=interleaved ! \
             appsink name=asink sync=false async=false max-buffers=64 drop=true",
            url = self.url
        );

        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| ProbeError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ProbeError::Pipeline("launch did not yield a pipeline".into()))?;

        let vsink = app_sink(&pipeline, "vsink")?;
        let asink = app_sink(&pipeline, "asink")?;

        if pipeline.set_state(gst::State::Playing).is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(ProbeError::Pipeline("cannot reach PLAYING".into()));
        }

        match self.wait_first_samples(&pipeline, &vsink, &asink) {
            Ok((first_video, first_audio)) => Ok(Opened {
                pipeline,
                vsink,
                asink,
                first_video,
                first_audio,
            }),
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                Err(e)
            }
        }
    }

    /// Pull until at least one track has produced a sample (then give the
    /// other track a short grace period), watching the bus for hard errors.
    #[allow(clippy::type_complexity)]
    fn wait_first_samples(
        &self,
        pipeline: &gst::Pipeline,
        vsink: &gst_app::AppSink,
        asink: &gst_app::AppSink,
    ) -> Result<(Option<gst::Sample>, Option<gst::Sample>), ProbeError> {
        let bus = pipeline.bus();
        let deadline = Instant::now() + PROBE_DEADLINE;
        let mut first_seen: Option<Instant> = None;
        let mut video = None;
        let mut audio = None;

        while Instant::now() < deadline && !self.stop.is_set() {
            if video.is_none() {
                video = vsink.try_pull_sample(gst::ClockTime::from_mseconds(50));
            }
            if audio.is_none() {
                audio = asink.try_pull_sample(gst::ClockTime::from_mseconds(50));
            }

            if (video.is_some() || audio.is_some()) && first_seen.is_none() {
                first_seen = Some(Instant::now());
            }
            if video.is_some() && audio.is_some() {
                break;
            }
            if first_seen.is_some_and(|t| t.elapsed() > SECOND_TRACK_GRACE) {
                break;
            }

            if let Some(bus) = &bus {
                if let Some(msg) =
                    bus.timed_pop_filtered(gst::ClockTime::ZERO, &[gst::MessageType::Error])
                {
                    if let gst::MessageView::Error(err) = msg.view() {
                        // a single-track stream fails its unused branch's
                        // delayed link; that is fatal only with no media at all
                        if video.is_none() && audio.is_none() {
                            return Err(ProbeError::Pipeline(err.error().to_string()));
                        }
                        tracing::debug!(error = %err.error(), "pipeline error after first sample");
                    }
                }
            }
        }

        if video.is_none() && audio.is_none() {
            return Err(ProbeError::Pipeline(
                "no decodable media before deadline".into(),
            ));
        }
        Ok((video, audio))
    }
}

fn app_sink(pipeline: &gst::Pipeline, name: &str) -> Result<gst_app::AppSink, ProbeError> {
    pipeline
        .by_name(name)
        .and_then(|el| el.downcast::<gst_app::AppSink>().ok())
        .ok_or_else(|| ProbeError::Pipeline(format!("missing appsink {name}")))
}

fn probe_stream_info(opened: &Opened) -> StreamInfo {
    let mut info = StreamInfo::default();

    if let Some(vinfo) = opened
        .first_video
        .as_ref()
        .and_then(|s| s.caps())
        .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok())
    {
        info.has_video = true;
        info.video_clock_rate = Some(VIDEO_CLOCK);
        info.video_width = Some(vinfo.width());
        info.video_height = Some(vinfo.height());
    }

    if let Some(ainfo) = opened
        .first_audio
        .as_ref()
        .and_then(|s| s.caps())
        .and_then(|caps| gst_audio::AudioInfo::from_caps(caps).ok())
    {
        info.has_audio = true;
        info.audio_clock_rate = Some(ainfo.rate());
        info.audio_channels = Some(ainfo.channels());
    }

    info
}

fn pull_video(
    sink: gst_app::AppSink,
    first: Option<gst::Sample>,
    subs: Vec<Sender<Arc<VideoFrame>>>,
    stop: StopFlag,
) {
    if let Some(frame) = first.as_ref().and_then(video_frame_from_sample) {
        fan_out(&subs, Arc::new(frame));
    }
    while !stop.is_set() {
        match sink.try_pull_sample(gst::ClockTime::from_mseconds(50)) {
            Some(sample) => match video_frame_from_sample(&sample) {
                Some(frame) => fan_out(&subs, Arc::new(frame)),
                None => tracing::debug!("unusable video sample dropped"),
            },
            None => {
                if sink.is_eos() {
                    break;
                }
            }
        }
    }
}

fn pull_audio(
    sink: gst_app::AppSink,
    first: Option<gst::Sample>,
    subs: Vec<Sender<Arc<AudioFrame>>>,
    stop: StopFlag,
) {
    if let Some(frame) = first.as_ref().and_then(audio_frame_from_sample) {
        fan_out(&subs, Arc::new(frame));
    }
    while !stop.is_set() {
        match sink.try_pull_sample(gst::ClockTime::from_mseconds(50)) {
            Some(sample) => match audio_frame_from_sample(&sample) {
                Some(frame) => fan_out(&subs, Arc::new(frame)),
                None => tracing::debug!("unusable audio sample dropped"),
            },
            None => {
                if sink.is_eos() {
                    break;
                }
            }
        }
    }
}

/// Copy a decoded I420 sample into a packed [`VideoFrame`].
///
/// GStreamer pads plane rows to alignment boundaries; the analyzers expect
/// tight rows, so each plane is repacked row by row.
fn video_frame_from_sample(sample: &gst::Sample) -> Option<VideoFrame> {
    let caps = sample.caps()?;
    let vinfo = gst_video::VideoInfo::from_caps(caps).ok()?;
    let buffer = sample.buffer()?;
    let vframe = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &vinfo).ok()?;

    let width = vinfo.width();
    let height = vinfo.height();
    let mut data =
        Vec::with_capacity((width * height + 2 * ((width / 2) * (height / 2))) as usize);
    for plane in 0..3u32 {
        let plane_bytes = vframe.plane_data(plane).ok()?;
        let stride = vframe.plane_stride()[plane as usize] as usize;
        let (row_bytes, rows) = if plane == 0 {
            (width as usize, height as usize)
        } else {
            ((width / 2) as usize, (height / 2) as usize)
        };
        for row in 0..rows {
            let start = row * stride;
            data.extend_from_slice(plane_bytes.get(start..start + row_bytes)?);
        }
    }

    let pts_ns = buffer.pts()?.nseconds();
    Some(VideoFrame {
        pts: (pts_ns as u128 * VIDEO_CLOCK as u128 / 1_000_000_000) as i64,
        time_base: TimeBase::from_clock_rate(VIDEO_CLOCK),
        keyframe: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
        width,
        height,
        data,
    })
}

/// Copy a decoded S16LE sample into an interleaved [`AudioFrame`].
fn audio_frame_from_sample(sample: &gst::Sample) -> Option<AudioFrame> {
    let caps = sample.caps()?;
    let ainfo = gst_audio::AudioInfo::from_caps(caps).ok()?;
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;

    let samples: Vec<i16> = map
        .as_slice()
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let rate = ainfo.rate();
    let pts_ns = buffer.pts()?.nseconds();
    Some(AudioFrame {
        pts: (pts_ns as u128 * rate as u128 / 1_000_000_000) as i64,
        time_base: TimeBase::from_clock_rate(rate),
        sample_rate: rate,
        channels: ainfo.channels(),
        samples,
    })
}
