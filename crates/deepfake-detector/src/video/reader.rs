use std::path::Path;

use gstreamer::prelude::*;

use super::VideoError;
use crate::frame::{ImageSize, RgbFrame};

/// How long a single pull waits for a sample before the bus is checked again.
const PULL_TIMEOUT_MS: u64 = 100;

/// A pull based video file reader using GStreamer.
///
/// Frames are decoded, converted to RGB and scaled to a fixed size by the
/// pipeline. Reading is synchronous: [`VideoReader::read`] blocks until the
/// next frame is available or the end of the stream is reached.
pub struct VideoReader {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    running: bool,
}

impl VideoReader {
    /// Create a new VideoReader.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the video file.
    /// * `size` - The size the decoded frames are scaled to.
    pub fn new(path: impl AsRef<Path>, size: ImageSize) -> Result<Self, VideoError> {
        // make sure that we do not initialize gstreamer several times
        if !gstreamer::INITIALIZED.load(std::sync::atomic::Ordering::Relaxed) {
            gstreamer::init()?;
        }

        let path = path.as_ref();
        let location = path
            .to_str()
            .ok_or_else(|| VideoError::InvalidPath(path.to_path_buf()))?;

        // NOTE: the bounded appsink queue keeps the decoder from running ahead of us
        let pipeline_str = format!(
            "filesrc name=src ! decodebin ! videoconvert ! videoscale ! \
            video/x-raw,format=RGB,width={},height={} ! \
            appsink name=sink sync=false max-buffers=8 drop=false",
            size.width, size.height
        );

        log::debug!("Video pipeline for {}: {pipeline_str}", path.display());

        let pipeline = gstreamer::parse::launch(&pipeline_str)?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(VideoError::DowncastPipelineError)?;

        // set as a property so that quotes and separators in the path stay verbatim
        pipeline
            .by_name("src")
            .ok_or(VideoError::GetElementByNameError)?
            .set_property("location", location);

        let appsink = pipeline
            .by_name("sink")
            .ok_or(VideoError::GetElementByNameError)?
            .dynamic_cast::<gstreamer_app::AppSink>()
            .map_err(VideoError::DowncastPipelineError)?;

        Ok(Self {
            pipeline,
            appsink,
            running: false,
        })
    }

    /// Start the decoding pipeline.
    ///
    /// A file that cannot be opened fails here, with the error posted by the
    /// pipeline when there is one.
    pub fn start(&mut self) -> Result<(), VideoError> {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Playing) {
            let bus_result = self.check_bus();
            // leave the pipeline in a state that can be dropped cleanly
            let _ = self.pipeline.set_state(gstreamer::State::Null);
            bus_result?;
            return Err(e.into());
        }
        self.running = true;
        Ok(())
    }

    /// Read the next frame.
    ///
    /// # Returns
    ///
    /// The next decoded frame, or `None` once the end of the stream is reached.
    ///
    /// # Errors
    ///
    /// Fails if the reader was not started or the pipeline reported an error.
    pub fn read(&mut self) -> Result<Option<RgbFrame>, VideoError> {
        if !self.running {
            return Err(VideoError::PipelineNotRunning);
        }

        loop {
            self.check_bus()?;

            if let Some(sample) = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
            {
                return Self::extract_frame(&sample).map(Some);
            }

            if self.appsink.is_eos() {
                return Ok(None);
            }
        }
    }

    /// Stop the pipeline and release its resources.
    pub fn close(&mut self) -> Result<(), VideoError> {
        self.pipeline.set_state(gstreamer::State::Null)?;
        self.running = false;
        Ok(())
    }

    /// Surface the first error message posted on the pipeline bus.
    fn check_bus(&self) -> Result<(), VideoError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };

        while let Some(msg) = bus.pop_filtered(&[gstreamer::MessageType::Error]) {
            if let gstreamer::MessageView::Error(err) = msg.view() {
                return Err(VideoError::PipelineError(format!(
                    "{} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
        }

        Ok(())
    }

    /// Copy an RGB sample into a tightly packed frame.
    fn extract_frame(sample: &gstreamer::Sample) -> Result<RgbFrame, VideoError> {
        let caps = sample
            .caps()
            .ok_or_else(|| VideoError::GetCapsError("missing caps".to_string()))?;

        let structure = caps
            .structure(0)
            .ok_or_else(|| VideoError::GetCapsError("missing structure".to_string()))?;

        let width = structure
            .get::<i32>("width")
            .map_err(|e| VideoError::GetCapsError(e.to_string()))? as usize;

        let height = structure
            .get::<i32>("height")
            .map_err(|e| VideoError::GetCapsError(e.to_string()))? as usize;

        let buffer = sample
            .buffer()
            .ok_or(VideoError::GetBufferError)?
            .map_readable()?;

        // rows of packed RGB are padded to a multiple of 4 bytes
        let row_bytes = width * 3;
        let stride = (row_bytes + 3) & !3;
        let src = buffer.as_slice();

        if src.len() < stride * (height.saturating_sub(1)) + row_bytes {
            return Err(VideoError::GetCapsError(format!(
                "buffer of {} bytes is too small for {}x{} RGB",
                src.len(),
                width,
                height
            )));
        }

        let mut data = Vec::with_capacity(row_bytes * height);
        for row in src.chunks(stride).take(height) {
            data.extend_from_slice(&row[..row_bytes]);
        }

        Ok(RgbFrame::new(ImageSize { width, height }, data)?)
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        if self.running {
            if let Err(e) = self.close() {
                log::warn!("Failed to close VideoReader: {e}");
            }
        }
    }
}
