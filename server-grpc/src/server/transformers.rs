use crate::generated;
use youthumb::Frame;

/// Maps a domain frame to the wire chunk; later frames leave `content_type`
/// empty.
pub fn frame_to_chunk(frame: Frame) -> generated::ThumbnailChunk {
    generated::ThumbnailChunk {
        content_type: frame.content_type.unwrap_or_default(),
        data: frame.data.to_vec(),
    }
}
