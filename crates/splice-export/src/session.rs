//! Encoder callbacks turned into a queue the driver drains between calls.

use tokio::sync::mpsc;

use splice_core::codec::{EncodedChunk, ErrorCallback, OutputCallback};
use splice_core::{SpliceError, SpliceResult};

enum ChunkEvent {
    Chunk(EncodedChunk),
    Error(SpliceError),
}

pub struct ChunkQueue {
    rx: mpsc::UnboundedReceiver<ChunkEvent>,
    received: usize,
}

impl ChunkQueue {
    /// A queue plus the output and error callbacks that feed it.
    pub fn new() -> (Self, OutputCallback<EncodedChunk>, ErrorCallback) {
        let (tx, rx) = mpsc::unbounded_channel();
        let err_tx = tx.clone();
        let output: OutputCallback<EncodedChunk> = Box::new(move |chunk| {
            let _ = tx.send(ChunkEvent::Chunk(chunk));
        });
        let error: ErrorCallback = Box::new(move |e| {
            let _ = err_tx.send(ChunkEvent::Error(e));
        });
        (Self { rx, received: 0 }, output, error)
    }

    /// Hand every chunk produced so far to `sink`, in arrival order. The
    /// first reported encoder error ends the drain.
    pub fn drain<F>(&mut self, mut sink: F) -> SpliceResult<usize>
    where
        F: FnMut(&EncodedChunk) -> SpliceResult<()>,
    {
        let mut drained = 0;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                ChunkEvent::Chunk(chunk) => {
                    sink(&chunk)?;
                    drained += 1;
                }
                ChunkEvent::Error(e) => return Err(e),
            }
        }
        self.received += drained;
        Ok(drained)
    }

    pub fn received(&self) -> usize {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_core::codec::ChunkKind;
    use std::sync::Arc;

    fn chunk(ts: i64) -> EncodedChunk {
        EncodedChunk {
            kind: ChunkKind::Delta,
            timestamp_us: ts,
            duration_us: 1,
            data: Arc::from(vec![0u8]),
            decoder_config: None,
        }
    }

    #[test]
    fn test_drain_in_order() {
        let (mut queue, mut output, _error) = ChunkQueue::new();
        output(chunk(0));
        output(chunk(10));
        let mut seen = Vec::new();
        assert_eq!(
            queue
                .drain(|c| {
                    seen.push(c.timestamp_us);
                    Ok(())
                })
                .unwrap(),
            2
        );
        assert_eq!(seen, vec![0, 10]);
        assert_eq!(queue.drain(|_| Ok(())).unwrap(), 0);
        assert_eq!(queue.received(), 2);
    }

    #[test]
    fn test_encoder_error_surfaces() {
        let (mut queue, mut output, mut error) = ChunkQueue::new();
        output(chunk(0));
        error(SpliceError::Encode("device lost".into()));
        let err = queue.drain(|_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("device lost"));
    }
}
