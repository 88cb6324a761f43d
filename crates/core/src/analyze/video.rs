//! Decoded-video metrics over ~0.45 s frame buffers.
//!
//! Frames accumulate until the newest one sits more than 0.45 s past the
//! last flush; the buffer (when it holds at least two frames) is then
//! analyzed as a unit and reported as one SRT block covering
//! `[first.pts, last.pts]`:
//!
//! ```text
//! Resolution:(1280, 720), Bitrate: 3.32 mbps, Frame Rate: 30.00 fps, Mosaic Ratio: 0.00 %, Green Ratio: 2.41 %
//! ```
//!
//! The two picture-quality heuristics:
//!
//! - **Green ratio** — fraction of pixels whose HSV value (OpenCV scale,
//!   H 0–180) falls in the "decoder painted it green" band H∈[35,85],
//!   S≥30, V≥20. Whole-frame green is the classic look of a stream whose
//!   reference frames were lost.
//! - **Mosaic ratio** — fraction of 128×128 blocks of the blurred
//!   luma plane with variance below 400. Flat macroblock plateaus are the
//!   look of heavy compression artifacts.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use image::{GrayImage, imageops};

use crate::frame::{SharedStreamInfo, VideoFrame};
use crate::report::SrtWriter;
use crate::stop::StopFlag;

const FLUSH_INTERVAL_SECS: f64 = 0.45;
const MOSAIC_BLOCK: u32 = 128;
const MOSAIC_VARIANCE_THRESHOLD: f64 = 400.0;
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Video metrics task. Waits for the stream info record, then consumes
/// decoded frames until stop (draining its queue) and flushes whatever
/// buffer remains.
pub struct VideoAnalyzer {
    rx: Receiver<Arc<VideoFrame>>,
    info: SharedStreamInfo,
    results_dir: PathBuf,
    stop: StopFlag,
}

impl VideoAnalyzer {
    pub fn new(
        rx: Receiver<Arc<VideoFrame>>,
        info: SharedStreamInfo,
        results_dir: PathBuf,
        stop: StopFlag,
    ) -> Self {
        VideoAnalyzer {
            rx,
            info,
            results_dir,
            stop,
        }
    }

    pub fn run(self) {
        let Some(info) = self.info.wait_for_start(&self.stop) else {
            return;
        };
        if !info.has_video {
            return;
        }
        let clock_rate = info.video_clock_rate.unwrap_or(90000);

        let mut srt = match SrtWriter::create(&self.results_dir, "Video-Status", clock_rate) {
            Ok(srt) => srt,
            Err(e) => {
                tracing::error!(error = %e, "cannot create video report file");
                return;
            }
        };

        let mut buffer: Vec<Arc<VideoFrame>> = Vec::new();
        let mut last_flush = 0.0f64;

        loop {
            match self.rx.try_recv() {
                Ok(frame) => {
                    buffer.push(frame);
                    let newest = buffer.last().map(|f| f.time()).unwrap_or(0.0);
                    if newest - last_flush > FLUSH_INTERVAL_SECS && buffer.len() >= 2 {
                        analyze_buffer(&buffer, &mut srt);
                        buffer.clear();
                        last_flush = newest;
                    }
                }
                Err(TryRecvError::Empty) => {
                    if self.stop.is_set() {
                        break;
                    }
                    thread::sleep(IDLE_SLEEP);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }

        // whatever arrived since the last flush still deserves a report
        if buffer.len() >= 2 {
            analyze_buffer(&buffer, &mut srt);
        }
        tracing::debug!("video analyzer exited");
    }
}

fn analyze_buffer(buffer: &[Arc<VideoFrame>], srt: &mut SrtWriter) {
    let first = &buffer[0];
    let last = &buffer[buffer.len() - 1];
    let duration = last.time() - first.time();
    if duration <= 0.0 {
        tracing::debug!("buffer with non-increasing times, skipped");
        return;
    }

    let mut total_bits = 0.0;
    let mut frame_rates = Vec::new();
    let mut green_ratios = Vec::new();
    let mut mosaic_ratios = Vec::new();

    for (i, frame) in buffer.iter().enumerate() {
        mosaic_ratios.push(mosaic_ratio(frame));
        green_ratios.push(green_ratio(frame));
        total_bits += frame_bits(frame);
        if i > 0 {
            let pts_interval = frame.pts - buffer[i - 1].pts;
            if pts_interval != 0 {
                frame_rates.push(1.0 / (frame.time_base.as_secs_f64() * pts_interval as f64));
            }
        }
    }

    let bitrate_mbps = total_bits / duration / 1e6;
    let text = format!(
        "Resolution:({}, {}), Bitrate: {:.2} mbps, Frame Rate: {:.2} fps, Mosaic Ratio: {:.2} %, Green Ratio: {:.2} %",
        last.width,
        last.height,
        bitrate_mbps,
        mean(&frame_rates),
        mean(&mosaic_ratios) * 100.0,
        mean(&green_ratios) * 100.0
    );
    srt.write(&text, first.pts, last.pts);
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Payload size of one raw YUV 4:2:0 frame, in the units the bitrate
/// figure has always been quoted in.
fn frame_bits(frame: &VideoFrame) -> f64 {
    let y = frame.width * frame.height;
    let uv = (frame.width / 2) * (frame.height / 2) * 2;
    (y + uv) as f64 / 8.0
}

/// Fraction of pixels in the green HSV band.
fn green_ratio(frame: &VideoFrame) -> f64 {
    let w = frame.width as usize;
    let h = frame.height as usize;
    if w == 0 || h == 0 {
        return 0.0;
    }
    let y_plane = frame.y_plane();
    let (u_plane, v_plane) = frame.chroma_planes();
    let chroma_w = w / 2;
    let chroma_h = h / 2;
    if chroma_w == 0 || chroma_h == 0 {
        return 0.0;
    }

    let mut masked = 0usize;
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col];
            // odd edge rows/columns share the last chroma sample
            let c = (row / 2).min(chroma_h - 1) * chroma_w + (col / 2).min(chroma_w - 1);
            let (r, g, b) = yuv_to_rgb(y, u_plane[c], v_plane[c]);
            let (hue, sat, val) = rgb_to_hsv(r, g, b);
            if (35..=85).contains(&hue) && sat >= 30 && val >= 20 {
                masked += 1;
            }
        }
    }
    masked as f64 / (w * h) as f64
}

/// Fraction of low-variance 128×128 blocks in the blurred luma plane.
fn mosaic_ratio(frame: &VideoFrame) -> f64 {
    let Some(gray) = GrayImage::from_raw(frame.width, frame.height, frame.y_plane().to_vec())
    else {
        return 0.0;
    };
    // 3×3 Gaussian kernel
    let kernel = [
        1.0 / 16.0,
        2.0 / 16.0,
        1.0 / 16.0,
        2.0 / 16.0,
        4.0 / 16.0,
        2.0 / 16.0,
        1.0 / 16.0,
        2.0 / 16.0,
        1.0 / 16.0,
    ];
    let blurred = imageops::filter3x3(&gray, &kernel);

    let mut low_variance = 0usize;
    let mut total = 0usize;
    for block_y in (0..frame.height).step_by(MOSAIC_BLOCK as usize) {
        for block_x in (0..frame.width).step_by(MOSAIC_BLOCK as usize) {
            let x_end = (block_x + MOSAIC_BLOCK).min(frame.width);
            let y_end = (block_y + MOSAIC_BLOCK).min(frame.height);

            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            let count = ((x_end - block_x) * (y_end - block_y)) as f64;
            for y in block_y..y_end {
                for x in block_x..x_end {
                    let px = blurred.get_pixel(x, y)[0] as f64;
                    sum += px;
                    sum_sq += px * px;
                }
            }
            let mean = sum / count;
            let variance = sum_sq / count - mean * mean;
            if variance < MOSAIC_VARIANCE_THRESHOLD {
                low_variance += 1;
            }
            total += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        low_variance as f64 / total as f64
    }
}

/// BT.601 limited-range YUV → RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    (
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    )
}

/// RGB → HSV on the OpenCV 8-bit scale: H in 0–180, S and V in 0–255.
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let value = max;
    let saturation = if max == 0.0 { 0.0 } else { 255.0 * delta / max };
    let hue_degrees = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let hue_degrees = if hue_degrees < 0.0 {
        hue_degrees + 360.0
    } else {
        hue_degrees
    };

    (
        (hue_degrees / 2.0).round() as u8,
        saturation.round() as u8,
        value.round() as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TimeBase;

    /// Frame filled with one RGB color, converted into packed I420 planes.
    fn solid_frame(width: u32, height: u32, rgb: (u8, u8, u8), pts: i64) -> VideoFrame {
        let (y, u, v) = rgb_to_yuv(rgb.0, rgb.1, rgb.2);
        let y_len = (width * height) as usize;
        let c_len = ((width / 2) * (height / 2)) as usize;
        let mut data = vec![y; y_len];
        data.extend(std::iter::repeat_n(u, c_len));
        data.extend(std::iter::repeat_n(v, c_len));
        VideoFrame {
            pts,
            time_base: TimeBase::from_clock_rate(90000),
            keyframe: true,
            width,
            height,
            data,
        }
    }

    /// BT.601 limited-range RGB → YUV (inverse of `yuv_to_rgb`).
    fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
        let (r, g, b) = (r as i32, g as i32, b as i32);
        let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
        let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
        (y as u8, u as u8, v as u8)
    }

    #[test]
    fn hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv(0, 255, 0), (60, 255, 255));
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 255), (120, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 0), (0, 0, 0));
        assert_eq!(rgb_to_hsv(128, 128, 128), (0, 0, 128));
    }

    #[test]
    fn green_frame_saturates_ratio() {
        // HSV (60, 200, 200) on the OpenCV scale → a mid-bright green
        let frame = solid_frame(64, 64, (43, 200, 43), 0);
        assert_eq!(green_ratio(&frame), 1.0);
    }

    #[test]
    fn gray_frame_has_no_green() {
        let frame = solid_frame(64, 64, (128, 128, 128), 0);
        assert_eq!(green_ratio(&frame), 0.0);
    }

    #[test]
    fn constant_frame_is_all_mosaic() {
        let frame = solid_frame(256, 256, (90, 90, 90), 0);
        assert_eq!(mosaic_ratio(&frame), 1.0);
    }

    #[test]
    fn textured_frame_is_not_mosaic() {
        // 8-pixel luma stripes survive the 3×3 blur with huge variance
        let mut frame = solid_frame(256, 256, (90, 90, 90), 0);
        let w = frame.width as usize;
        for row in 0..frame.height as usize {
            for col in 0..w {
                frame.data[row * w + col] = if (col / 8) % 2 == 0 { 16 } else { 235 };
            }
        }
        assert_eq!(mosaic_ratio(&frame), 0.0);
    }

    #[test]
    fn edge_blocks_are_clipped_not_dropped() {
        // 200×200 with 128-blocks → 2×2 grid, three of them partial
        let frame = solid_frame(200, 200, (90, 90, 90), 0);
        assert_eq!(mosaic_ratio(&frame), 1.0);
    }

    #[test]
    fn frame_bits_yuv420() {
        let frame = solid_frame(1280, 720, (0, 0, 0), 0);
        // (1280·720 + 2·640·360) / 8
        assert_eq!(frame_bits(&frame), 172_800.0);
    }

    #[test]
    fn buffer_report_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut srt = SrtWriter::create(dir.path(), "Video-Status", 90000).unwrap();

        // 30 fps → 3000 PTS units apart
        let buffer: Vec<Arc<VideoFrame>> = (0..15)
            .map(|i| Arc::new(solid_frame(64, 64, (128, 128, 128), i * 3000)))
            .collect();
        analyze_buffer(&buffer, &mut srt);

        let text = std::fs::read_to_string(dir.path().join("Video-Status.srt")).unwrap();
        assert!(text.contains("Resolution:(64, 64)"), "{text}");
        assert!(text.contains("Frame Rate: 30.00 fps"), "{text}");
        assert!(text.contains("Mosaic Ratio: 100.00 %"), "{text}");
        assert!(text.contains("Green Ratio: 0.00 %"), "{text}");
    }

    #[test]
    fn zero_duration_buffer_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut srt = SrtWriter::create(dir.path(), "Video-Status", 90000).unwrap();
        let buffer = vec![
            Arc::new(solid_frame(64, 64, (0, 0, 0), 100)),
            Arc::new(solid_frame(64, 64, (0, 0, 0), 100)),
        ];
        analyze_buffer(&buffer, &mut srt);
        let text = std::fs::read_to_string(dir.path().join("Video-Status.srt")).unwrap();
        assert!(text.is_empty());
    }
}
