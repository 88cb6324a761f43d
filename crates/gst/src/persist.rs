//! MPEG-TS persistence of the decoded stream.
//!
//! The decoded frames are re-encoded and muxed to
//! `results/output_stream.ts`:
//!
//! ```text
//! appsrc (I420)  ! videoconvert ! x264enc bitrate=3000 ! h264parse ┐
//!                                                                  mpegtsmux ! filesink
//! appsrc (S16LE) ! audioconvert ! avenc_aac        ! aacparse     ┘
//! ```
//!
//! One writer thread per present track pushes timestamped buffers into its
//! appsrc. Encode and mux hiccups are logged and swallowed — most are
//! transient fallout of upstream packet loss and the next keyframe heals
//! the file. On stop both appsrcs send EOS so the muxer flushes and the
//! file stays playable.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use gst::prelude::*;

use probe::frame::{AudioFrame, SharedStreamInfo, StreamInfo, VideoFrame};
use probe::{ProbeError, StopFlag};

/// Target H.264 bitrate for the persisted copy, in kbit/s.
const VIDEO_BITRATE_KBPS: u32 = 3000;
const IDLE_SLEEP: Duration = Duration::from_millis(10);
const EOS_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// The MPEG-TS persister task.
pub struct TsPersister {
    video_rx: Receiver<Arc<VideoFrame>>,
    audio_rx: Receiver<Arc<AudioFrame>>,
    info: SharedStreamInfo,
    path: PathBuf,
    stop: StopFlag,
}

impl TsPersister {
    pub fn new(
        video_rx: Receiver<Arc<VideoFrame>>,
        audio_rx: Receiver<Arc<AudioFrame>>,
        info: SharedStreamInfo,
        path: PathBuf,
        stop: StopFlag,
    ) -> Self {
        TsPersister {
            video_rx,
            audio_rx,
            info,
            path,
            stop,
        }
    }

    pub fn run(self) {
        let Some(info) = self.info.wait_for_start(&self.stop) else {
            return;
        };
        if !info.has_video && !info.has_audio {
            return;
        }

        if let Err(e) = gst::init() {
            tracing::error!(error = %e, "GStreamer init failed");
            return;
        }
        if let Some(dir) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::error!(error = %e, "cannot create results directory");
                return;
            }
        }

        let pipeline = match self.build_pipeline(&info) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!(error = %e, "persist pipeline failed");
                return;
            }
        };

        let mut writers: Vec<JoinHandle<()>> = Vec::new();
        if info.has_video {
            match app_src(&pipeline, "vsrc") {
                Ok(src) => {
                    let rx = self.video_rx.clone();
                    let stop = self.stop.clone();
                    writers.push(thread::spawn(move || write_loop(rx, stop, src, video_buffer)));
                }
                Err(e) => tracing::error!(error = %e, "video appsrc missing"),
            }
        }
        if info.has_audio {
            match app_src(&pipeline, "asrc") {
                Ok(src) => {
                    let rx = self.audio_rx.clone();
                    let stop = self.stop.clone();
                    writers.push(thread::spawn(move || write_loop(rx, stop, src, audio_buffer)));
                }
                Err(e) => tracing::error!(error = %e, "audio appsrc missing"),
            }
        }

        for writer in writers {
            let _ = writer.join();
        }

        // wait for the muxer to flush so the file ends on a clean packet
        if let Some(bus) = pipeline.bus() {
            let _ = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(EOS_FLUSH_TIMEOUT.as_millis() as u64),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
        }
        let _ = pipeline.set_state(gst::State::Null);
        tracing::info!(path = %self.path.display(), "TS file closed");
    }

    fn build_pipeline(&self, info: &StreamInfo) -> Result<gst::Pipeline, ProbeError> {
        let mut desc = format!(
            "mpegtsmux name=mux ! filesink location=\"{}\" ",
            self.path.display()
        );
        if info.has_video {
            let width = info.video_width.unwrap_or(0);
            let height = info.video_height.unwrap_or(0);
            desc.push_str(&format!(
                "appsrc name=vsrc is-live=true format=time \
                 caps=\"video/x-raw,format=I420,width={width},height={height},framerate=0/1\" ! \
                 videoconvert ! x264enc bitrate={VIDEO_BITRATE_KBPS} tune=zerolatency ! \
                 h264parse ! queue ! mux. "
            ));
        }
        if info.has_audio {
            let rate = info.audio_clock_rate.unwrap_or(16000);
            let channels = info.audio_channels.unwrap_or(1);
            desc.push_str(&format!(
                "appsrc name=asrc is-live=true format=time \
                 caps=\"audio/x-raw,format=S16LE,layout=interleaved,rate={rate},channels={channels}\" ! \
                 audioconvert ! avenc_aac ! aacparse ! queue ! mux. "
            ));
        }

        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| ProbeError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ProbeError::Pipeline("launch did not yield a pipeline".into()))?;

        if pipeline.set_state(gst::State::Playing).is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(ProbeError::Pipeline("cannot reach PLAYING".into()));
        }
        Ok(pipeline)
    }
}

fn app_src(pipeline: &gst::Pipeline, name: &str) -> Result<gst_app::AppSrc, ProbeError> {
    pipeline
        .by_name(name)
        .and_then(|el| el.downcast::<gst_app::AppSrc>().ok())
        .ok_or_else(|| ProbeError::Pipeline(format!("missing appsrc {name}")))
}

/// Drain a frame queue into an appsrc until stop (plus leftover frames),
/// then signal EOS on the branch.
fn write_loop<T, F>(rx: Receiver<Arc<T>>, stop: StopFlag, src: gst_app::AppSrc, to_buffer: F)
where
    F: Fn(&T) -> Option<gst::Buffer>,
{
    loop {
        match rx.try_recv() {
            Ok(frame) => {
                let Some(buffer) = to_buffer(&frame) else {
                    continue;
                };
                if let Err(flow) = src.push_buffer(buffer) {
                    // frame data errors out of lossy networks; keep muxing
                    tracing::debug!(?flow, "mux push rejected");
                }
            }
            Err(TryRecvError::Empty) => {
                if stop.is_set() {
                    break;
                }
                thread::sleep(IDLE_SLEEP);
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }
    let _ = src.end_of_stream();
}

fn video_buffer(frame: &VideoFrame) -> Option<gst::Buffer> {
    buffer_with_pts(frame.data.clone(), frame.pts, frame.time_base.den)
}

fn audio_buffer(frame: &AudioFrame) -> Option<gst::Buffer> {
    let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
    for sample in &frame.samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    buffer_with_pts(bytes, frame.pts, frame.sample_rate)
}

fn buffer_with_pts(data: Vec<u8>, pts: i64, clock_rate: u32) -> Option<gst::Buffer> {
    let mut buffer = gst::Buffer::from_mut_slice(data);
    let pts_ns = (pts.max(0) as u128 * 1_000_000_000 / clock_rate as u128) as u64;
    buffer
        .get_mut()?
        .set_pts(gst::ClockTime::from_nseconds(pts_ns));
    Some(buffer)
}
