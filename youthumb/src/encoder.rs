use crate::domain::CacheEntry;
use bytes::Bytes;
use futures::{Sink, SinkExt};
use shared::{Error, Result};

/// Default frame payload. gRPC caps messages at 4 MiB; this leaves ample room.
pub const DEFAULT_MAX_CHUNK: usize = 64 * 1024;

/// One unit of a streamed thumbnail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Set on the first frame of a stream only.
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Splits thumbnails into ordered frames of at most `max_chunk` bytes.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    max_chunk: usize,
}

impl FrameEncoder {
    pub fn new(max_chunk: usize) -> Result<Self> {
        if max_chunk == 0 {
            return Err(Error::Config("frame size must be positive".into()));
        }
        Ok(Self { max_chunk })
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// `max(1, ceil(len / max_chunk))`: empty thumbnails still get a frame.
    pub fn frame_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_chunk).max(1)
    }

    pub fn encode(&self, entry: &CacheEntry) -> Frames {
        Frames {
            content_type: Some(entry.content_type.clone()),
            data: entry.data.clone(),
            offset: 0,
            max_chunk: self.max_chunk,
            remaining: self.frame_count(entry.data.len()),
        }
    }

    /// Pushes every frame of `entry` into `sink`, in order, stopping at the
    /// first failed send. Frames sent before the failure stay sent.
    pub async fn send<S>(
        &self,
        entry: &CacheEntry,
        sink: &mut S,
    ) -> std::result::Result<usize, S::Error>
    where
        S: Sink<Frame> + Unpin,
    {
        let mut sent = 0;
        for frame in self.encode(entry) {
            sink.send(frame).await?;
            sent += 1;
        }
        Ok(sent)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            max_chunk: DEFAULT_MAX_CHUNK,
        }
    }
}

/// Iterator over the frames of one thumbnail; slices share the original buffer.
#[derive(Debug)]
pub struct Frames {
    content_type: Option<String>,
    data: Bytes,
    offset: usize,
    max_chunk: usize,
    remaining: usize,
}

impl Iterator for Frames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.remaining == 0 {
            return None;
        }
        let end = (self.offset + self.max_chunk).min(self.data.len());
        let frame = Frame {
            content_type: self.content_type.take(),
            data: self.data.slice(self.offset..end),
        };
        self.offset = end;
        self.remaining -= 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Frames {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceKey;
    use chrono::{Duration, Utc};
    use std::sync::{Arc, Mutex};

    fn entry_of(len: usize) -> CacheEntry {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        CacheEntry::new(
            ResourceKey::new("abc").unwrap(),
            "image/jpeg",
            data,
            Utc::now() + Duration::hours(1),
        )
    }

    #[test]
    fn test_frame_layout() {
        for chunk in [1, 5, 16, 64 * 1024] {
            let encoder = FrameEncoder::new(chunk).unwrap();
            for len in [0, 1, chunk - 1, chunk, chunk + 1, 3 * chunk, 17] {
                let entry = entry_of(len);
                let frames: Vec<Frame> = encoder.encode(&entry).collect();

                let expected = if len == 0 { 1 } else { len.div_ceil(chunk) };
                assert_eq!(frames.len(), expected, "len={len} chunk={chunk}");
                assert!(frames.iter().all(|f| f.data.len() <= chunk));

                let tagged: Vec<_> = frames.iter().filter(|f| f.content_type.is_some()).collect();
                assert_eq!(tagged.len(), 1);
                assert_eq!(frames[0].content_type.as_deref(), Some("image/jpeg"));

                let joined: Vec<u8> = frames.iter().flat_map(|f| f.data.iter().copied()).collect();
                assert_eq!(joined, entry.data.to_vec());
            }
        }
    }

    #[test]
    fn test_empty_thumbnail_keeps_content_type() {
        let frames: Vec<Frame> = FrameEncoder::default().encode(&entry_of(0)).collect();
        assert_eq!(
            frames,
            vec![Frame {
                content_type: Some("image/jpeg".into()),
                data: Bytes::new(),
            }]
        );
    }

    #[test]
    fn test_rejects_zero_chunk() {
        assert!(matches!(FrameEncoder::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_size_hint_is_exact() {
        let encoder = FrameEncoder::new(4).unwrap();
        let mut frames = encoder.encode(&entry_of(10));
        assert_eq!(frames.len(), 3);
        frames.next();
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn test_send_delivers_in_order() {
        let encoder = FrameEncoder::new(4).unwrap();
        let entry = entry_of(17);
        let mut sink: Vec<Frame> = Vec::new();

        let sent = encoder.send(&entry, &mut sink).await.unwrap();
        assert_eq!(sent, 5);
        assert_eq!(sink, encoder.encode(&entry).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_stops_at_first_failure() {
        let encoder = FrameEncoder::new(4).unwrap();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let sink = futures::sink::unfold(0usize, {
            let delivered = delivered.clone();
            move |sent, frame: Frame| {
                let delivered = delivered.clone();
                async move {
                    if sent == 2 {
                        return Err("client disconnected");
                    }
                    delivered.lock().unwrap().push(frame);
                    Ok(sent + 1)
                }
            }
        });
        let mut sink = std::pin::pin!(sink);

        let result = encoder.send(&entry_of(17), &mut sink).await;
        assert_eq!(result, Err("client disconnected"));
        assert_eq!(delivered.lock().unwrap().len(), 2);
    }
}
