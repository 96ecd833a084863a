//! Frame-accurate, forward-only decode over one asset's coded samples.
//!
//! The cursor owns the asset's decode capability and feeds it one sample
//! at a time until the newest produced frame reaches the requested time.
//! Decoder callbacks are forwarded into a channel the cursor awaits, so
//! callers only ever see `ensure_frame_at` resolve or fail.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use splice_core::codec::{DecodedFrame, VideoDecodeCapability, VideoDecoderConfig};
use splice_core::config::DecodeConfig;
use splice_core::supervise::{wait_with_timeout, WaitError};
use splice_core::{JobContext, SpliceError, SpliceResult};
use splice_demux::DecodedVideoTrack;

#[derive(Debug, Clone, Copy)]
pub struct CursorOptions {
    /// Requests allowed in flight before the cursor waits for output.
    pub max_outstanding: usize,
    pub stall_timeout: Duration,
    /// A frame this close before the requested time counts as reaching it.
    pub epsilon_us: i64,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self::from_config(&DecodeConfig::default())
    }
}

impl CursorOptions {
    pub fn from_config(config: &DecodeConfig) -> Self {
        Self {
            max_outstanding: config.max_outstanding,
            stall_timeout: Duration::from_millis(config.stall_timeout_ms),
            epsilon_us: config.epsilon_us,
        }
    }
}

enum DecodeEvent {
    Frame(DecodedFrame),
    Error(SpliceError),
}

pub struct DecodeCursor {
    ctx: JobContext,
    track: Arc<DecodedVideoTrack>,
    decoder: Option<Box<dyn VideoDecodeCapability>>,
    events: mpsc::UnboundedReceiver<DecodeEvent>,
    options: CursorOptions,
    next_sample: usize,
    outstanding: usize,
    flushed: bool,
    latest: Option<DecodedFrame>,
}

impl DecodeCursor {
    /// Negotiate and configure `decoder` for `track`.
    ///
    /// An unsupported configuration fails here, before any sample is fed:
    /// with `ParamSetMissing` when the track has no configuration record,
    /// `ConfigUnsupported` otherwise.
    pub async fn open(
        ctx: &JobContext,
        track: Arc<DecodedVideoTrack>,
        mut decoder: Box<dyn VideoDecodeCapability>,
        options: CursorOptions,
    ) -> SpliceResult<Self> {
        let config = VideoDecoderConfig {
            codec: track.codec.clone(),
            coded_width: track.coded_width,
            coded_height: track.coded_height,
            description: track.description.clone(),
        };
        if !decoder.is_config_supported(&config).await {
            let _ = decoder.close().await;
            return Err(if config.description.is_none() {
                SpliceError::ParamSetMissing(format!(
                    "track {} ({}) has no decoder configuration",
                    track.track_id, track.codec
                ))
            } else {
                SpliceError::ConfigUnsupported(format!(
                    "decoder rejected {} at {}x{}",
                    config.codec, config.coded_width, config.coded_height
                ))
            });
        }

        let (tx, events) = mpsc::unbounded_channel();
        let err_tx = tx.clone();
        let configured = decoder.configure(
            &config,
            Box::new(move |frame| {
                let _ = tx.send(DecodeEvent::Frame(frame));
            }),
            Box::new(move |err| {
                let _ = err_tx.send(DecodeEvent::Error(err));
            }),
        );
        if let Err(e) = configured {
            let _ = decoder.close().await;
            return Err(e);
        }
        debug!(
            track_id = track.track_id,
            codec = %track.codec,
            samples = track.samples.len(),
            "decode cursor opened"
        );

        Ok(Self {
            ctx: ctx.clone(),
            track,
            decoder: Some(decoder),
            events,
            options,
            next_sample: 0,
            outstanding: 0,
            flushed: false,
            latest: None,
        })
    }

    /// Decode forward until the newest frame is at or after
    /// `timestamp_us - epsilon`, or the samples run out. Returns the newest
    /// frame, which is only ever replaced by later ones.
    pub async fn ensure_frame_at(
        &mut self,
        timestamp_us: i64,
    ) -> SpliceResult<Option<&DecodedFrame>> {
        if self.decoder.is_none() {
            return Err(SpliceError::Render("decode cursor is closed".into()));
        }
        let target = timestamp_us - self.options.epsilon_us;
        loop {
            self.ctx.check_cancelled()?;
            self.drain_ready()?;
            if self.latest.as_ref().is_some_and(|f| f.timestamp_us >= target) {
                break;
            }
            if self.next_sample < self.track.samples.len() {
                if self.outstanding > self.options.max_outstanding {
                    self.wait_for_frame().await?;
                    continue;
                }
                self.feed_next().await?;
            } else if !self.flushed {
                self.flushed = true;
                trace!(
                    track_id = self.track.track_id,
                    "samples exhausted, flushing decoder"
                );
                if let Some(decoder) = self.decoder.as_mut() {
                    decoder.flush().await?;
                }
            } else {
                break;
            }
        }
        Ok(self.latest.as_ref())
    }

    /// The most recently produced frame.
    pub fn frame(&self) -> Option<&DecodedFrame> {
        self.latest.as_ref()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_closed(&self) -> bool {
        self.decoder.is_none()
    }

    /// Release the decoder and the held frame. Later calls are no-ops.
    pub async fn close(&mut self) -> SpliceResult<()> {
        self.latest = None;
        self.events.close();
        match self.decoder.take() {
            Some(mut decoder) => {
                debug!(track_id = self.track.track_id, "decode cursor closed");
                decoder.close().await
            }
            None => Ok(()),
        }
    }

    async fn feed_next(&mut self) -> SpliceResult<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(());
        };
        let chunk = self.track.samples[self.next_sample].to_chunk();
        trace!(
            sample = self.next_sample,
            timestamp_us = chunk.timestamp_us,
            key = chunk.is_key(),
            "feed"
        );
        decoder.decode(chunk).await?;
        self.next_sample += 1;
        self.outstanding += 1;
        Ok(())
    }

    fn drain_ready(&mut self) -> SpliceResult<()> {
        while let Ok(event) = self.events.try_recv() {
            self.accept(event)?;
        }
        Ok(())
    }

    async fn wait_for_frame(&mut self) -> SpliceResult<()> {
        let timeout = self.options.stall_timeout;
        match wait_with_timeout(&self.ctx, self.events.recv(), timeout).await {
            Ok(Some(event)) => self.accept(event),
            Ok(None) => Err(SpliceError::Codec("decoder output channel closed".into())),
            Err(WaitError::Cancelled) => Err(SpliceError::Cancelled),
            Err(WaitError::TimedOut) => Err(SpliceError::DecodeStall {
                waited_ms: timeout.as_millis() as u64,
                outstanding: self.outstanding,
            }),
        }
    }

    fn accept(&mut self, event: DecodeEvent) -> SpliceResult<()> {
        match event {
            DecodeEvent::Frame(frame) => {
                self.outstanding = self.outstanding.saturating_sub(1);
                if let Some(prev) = &self.latest {
                    if frame.timestamp_us < prev.timestamp_us {
                        debug!(
                            prev = prev.timestamp_us,
                            got = frame.timestamp_us,
                            "decoder output went backwards"
                        );
                    }
                }
                self.latest = Some(frame);
                Ok(())
            }
            DecodeEvent::Error(err) => Err(err),
        }
    }
}
