//! H.264 decode capability backed by an FFmpeg subprocess.
//!
//! Coded samples are rewritten to Annex-B and streamed into
//! `ffmpeg -f h264 -i -`; raw RGBA frames come back on stdout and are
//! stamped with the pending input timestamps in presentation order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use splice_core::codec::{
    DecodedFrame, EncodedChunk, ErrorCallback, OutputCallback, VideoDecodeCapability,
    VideoDecoderConfig,
};
use splice_core::ffmpeg::{self, FfmpegProcess};
use splice_core::{FrameBuffer, SpliceError, SpliceResult};
use splice_demux::nal;
use splice_demux::parse_avcc;

type Pending = Arc<Mutex<BinaryHeap<Reverse<(i64, i64)>>>>;

struct Running {
    process: FfmpegProcess,
    reader: JoinHandle<()>,
}

pub struct FfmpegVideoDecoder {
    binary: PathBuf,
    length_size: usize,
    prelude: Option<Vec<u8>>,
    pending: Pending,
    running: Option<Running>,
}

impl FfmpegVideoDecoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            length_size: 4,
            prelude: None,
            pending: Arc::new(Mutex::new(BinaryHeap::new())),
            running: None,
        }
    }

    fn lock_pending(
        pending: &Pending,
    ) -> std::sync::MutexGuard<'_, BinaryHeap<Reverse<(i64, i64)>>> {
        pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn to_annex_b(&self, data: &[u8]) -> SpliceResult<Vec<u8>> {
        if nal::is_annex_b(data) {
            return Ok(data.to_vec());
        }
        let units = nal::split_length_prefixed(data, self.length_size).ok_or_else(|| {
            SpliceError::Codec(format!(
                "sample is neither Annex-B nor {}-byte length prefixed",
                self.length_size
            ))
        })?;
        Ok(nal::to_annex_b(units))
    }
}

#[async_trait]
impl VideoDecodeCapability for FfmpegVideoDecoder {
    async fn is_config_supported(&self, config: &VideoDecoderConfig) -> bool {
        let codec_ok = config.codec.starts_with("avc1") || config.codec.starts_with("avc3");
        let record_ok = config.description.as_deref().and_then(parse_avcc).is_some();
        codec_ok
            && record_ok
            && config.coded_width > 0
            && config.coded_height > 0
            && ffmpeg::is_available(&self.binary).await
    }

    fn configure(
        &mut self,
        config: &VideoDecoderConfig,
        output: OutputCallback<DecodedFrame>,
        error: ErrorCallback,
    ) -> SpliceResult<()> {
        if let Some(record) = config.description.as_deref().and_then(parse_avcc) {
            self.length_size = record.length_size as usize;
            self.prelude = Some(record.annex_b_prelude());
        }
        let args: Vec<String> = [
            "-probesize", "32", "-analyzeduration", "0", "-fflags", "nobuffer",
            "-flags", "low_delay", "-threads", "1", "-f", "h264", "-i", "-",
            "-f", "rawvideo", "-pix_fmt", "rgba",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([
            "-s".to_string(),
            format!("{}x{}", config.coded_width, config.coded_height),
            "-".to_string(),
        ])
        .collect();

        let (process, stdout) = FfmpegProcess::spawn(&self.binary, &args)?;
        let reader = tokio::spawn(read_frames(
            stdout,
            config.coded_width,
            config.coded_height,
            self.pending.clone(),
            output,
            error,
        ));
        self.running = Some(Running { process, reader });
        debug!(
            codec = %config.codec,
            width = config.coded_width,
            height = config.coded_height,
            "ffmpeg decoder configured"
        );
        Ok(())
    }

    async fn decode(&mut self, chunk: EncodedChunk) -> SpliceResult<()> {
        let mut payload = self.prelude.take().unwrap_or_default();
        payload.extend(self.to_annex_b(&chunk.data)?);
        let running = self.running.as_mut().ok_or_else(|| {
            SpliceError::Codec("decoder is not configured or already flushed".into())
        })?;
        Self::lock_pending(&self.pending).push(Reverse((chunk.timestamp_us, chunk.duration_us)));
        running.process.write(&payload).await?;
        Ok(())
    }

    async fn flush(&mut self) -> SpliceResult<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        running.process.close_stdin();
        if let Err(e) = (&mut running.reader).await {
            warn!("ffmpeg decoder reader task ended abnormally: {}", e);
        }
        running.process.finish().await?;
        Ok(())
    }

    fn decode_queue_size(&self) -> usize {
        Self::lock_pending(&self.pending).len()
    }

    async fn close(&mut self) -> SpliceResult<()> {
        if let Some(mut running) = self.running.take() {
            running.reader.abort();
            running.process.kill().await;
        }
        Self::lock_pending(&self.pending).clear();
        Ok(())
    }
}

async fn read_frames(
    mut stdout: ChildStdout,
    width: u32,
    height: u32,
    pending: Pending,
    mut output: OutputCallback<DecodedFrame>,
    mut error: ErrorCallback,
) {
    let frame_size = (width as usize) * (height as usize) * 4;
    let mut last: Option<(i64, i64)> = None;
    loop {
        let mut data = vec![0u8; frame_size];
        match stdout.read_exact(&mut data).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                error(SpliceError::Codec(format!("reading decoded frame: {}", e)));
                break;
            }
        }
        let next = FfmpegVideoDecoder::lock_pending(&pending).pop().map(|Reverse(t)| t);
        // More frames than inputs: continue the previous frame's cadence.
        let (timestamp_us, duration_us) =
            match next.or_else(|| last.map(|(ts, dur)| (ts + dur, dur))) {
                Some(t) => t,
                None => (0, 1),
            };
        last = Some((timestamp_us, duration_us));
        match FrameBuffer::from_rgba(width, height, data) {
            Ok(image) => output(DecodedFrame {
                timestamp_us,
                duration_us,
                image,
            }),
            Err(e) => {
                error(e);
                break;
            }
        }
    }
}
