use std::io::Read;

use crate::gif_patch::gif_layout::{scan_layout, GifLayout};
use crate::gif_patch::patched_stream::{Edit, PatchedStream};
use crate::shared::data_source::DataSource;
use crate::shared::error::MediaResult;
use crate::shared::loop_count::LoopCount;

/// Length of a NETSCAPE2.0 looping extension.
pub const NETSCAPE_BLOCK_LEN: usize = 19;

/// `21 FF 0B "NETSCAPE2.0" 03 01 <count le16> 00`
pub fn netscape_block(count: u16) -> [u8; NETSCAPE_BLOCK_LEN] {
    let mut block = [0u8; NETSCAPE_BLOCK_LEN];
    block[..3].copy_from_slice(&[0x21, 0xFF, 0x0B]);
    block[3..14].copy_from_slice(b"NETSCAPE2.0");
    block[14..16].copy_from_slice(&[0x03, 0x01]);
    block[16..18].copy_from_slice(&count.to_le_bytes());
    block[18] = 0x00;
    block
}

/// Offset of the three version bytes after `GIF`.
const VERSION_OFFSET: u64 = 3;

/// Edits replacing every application extension with a single looping
/// block, or with nothing when `loop_count` plays once. A GIF87a header
/// is upgraded to `89a` when a block is inserted.
pub fn loop_count_edits(layout: &GifLayout, loop_count: LoopCount) -> Vec<(u64, Edit)> {
    let mut edits: Vec<(u64, Edit)> = layout
        .application_extensions
        .iter()
        .map(|range| (range.start, Edit::Delete(range.end - range.start)))
        .collect();
    if let Some(count) = loop_count.netscape_value() {
        if !layout.supports_extensions() {
            edits.push((VERSION_OFFSET, Edit::Insert(b"89a".to_vec())));
            edits.push((VERSION_OFFSET, Edit::Delete(3)));
        }
        edits.push((layout.insertion_point, Edit::Insert(netscape_block(count).to_vec())));
    }
    edits
}

/// Re-reads `source` with its loop count set to `loop_count`.
///
/// The source is read twice: once to find the blocks to edit, then again
/// through the returned stream. No pixel data is decoded.
pub fn rewrite_loop_count(
    source: &DataSource,
    loop_count: LoopCount,
) -> MediaResult<PatchedStream<Box<dyn Read + Send>>> {
    let layout = scan_layout(source.new_stream()?)?;
    log::debug!(
        "Rewriting loop count of {} to {:?}: removing {} application extension(s)",
        source.name(),
        loop_count,
        layout.application_extensions.len()
    );
    let edits = loop_count_edits(&layout, loop_count);
    Ok(PatchedStream::new(source.new_stream()?, edits))
}

pub fn rewrite_loop_count_bytes(bytes: &[u8], loop_count: LoopCount) -> MediaResult<Vec<u8>> {
    let layout = scan_layout(bytes)?;
    let mut out = Vec::with_capacity(bytes.len() + NETSCAPE_BLOCK_LEN);
    PatchedStream::new(bytes, loop_count_edits(&layout, loop_count)).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gif_patch::gif_layout::tests::{minimal_gif, XMP_BLOCK};
    use crate::media::domain::media_reader::MediaReader;
    use crate::media::infrastructure::gif_reader::open_gif;
    use crate::media::infrastructure::gif_reader::tests::encode_gif;
    use crate::shared::error::MediaError;
    use rstest::rstest;

    fn loop_count_of(bytes: Vec<u8>) -> LoopCount {
        open_gif(&DataSource::from_bytes("patched.gif", bytes)).unwrap().loop_count()
    }

    fn animated(repeat: Option<gif::Repeat>) -> Vec<u8> {
        let keep = gif::DisposalMethod::Keep;
        encode_gif(3, 3, &[(0, 0, 3, 3, 1, 10, keep), (0, 0, 3, 3, 2, 20, keep)], repeat)
    }

    #[test]
    fn test_netscape_block_layout() {
        let block = netscape_block(0x0102);
        assert_eq!(&block[..3], &[0x21, 0xFF, 0x0B]);
        assert_eq!(&block[3..14], b"NETSCAPE2.0");
        assert_eq!(&block[14..], &[0x03, 0x01, 0x02, 0x01, 0x00]);
    }

    #[rstest]
    #[case::add_forever(None, LoopCount::Forever)]
    #[case::add_finite(None, LoopCount::Extra(4))]
    #[case::replace(Some(gif::Repeat::Infinite), LoopCount::Extra(2))]
    #[case::remove(Some(gif::Repeat::Finite(7)), LoopCount::Never)]
    #[case::keep_never(None, LoopCount::Never)]
    fn test_round_trip(#[case] original: Option<gif::Repeat>, #[case] wanted: LoopCount) {
        let patched = rewrite_loop_count_bytes(&animated(original), wanted).unwrap();
        assert_eq!(loop_count_of(patched), wanted);
    }

    #[test]
    fn test_frames_survive_patching() {
        let original = animated(Some(gif::Repeat::Infinite));
        let patched = rewrite_loop_count_bytes(&original, LoopCount::Extra(1)).unwrap();
        let reader = open_gif(&DataSource::from_bytes("p.gif", patched)).unwrap();
        assert_eq!(reader.frame_count(), 2);
        assert_eq!(reader.duration(), std::time::Duration::from_millis(300));
    }

    #[test]
    fn test_other_application_extensions_are_removed() {
        let original = minimal_gif(&[XMP_BLOCK]);
        let patched = rewrite_loop_count_bytes(&original, LoopCount::Forever).unwrap();
        assert_eq!(patched.len(), original.len() - XMP_BLOCK.len() + NETSCAPE_BLOCK_LEN);
        assert_eq!(&patched[19..19 + NETSCAPE_BLOCK_LEN], &netscape_block(0));
        let layout = scan_layout(patched.as_slice()).unwrap();
        assert_eq!(layout.application_extensions.len(), 1);
    }

    #[test]
    fn test_patching_twice_is_stable() {
        let once = rewrite_loop_count_bytes(&animated(None), LoopCount::Extra(3)).unwrap();
        let twice = rewrite_loop_count_bytes(&once, LoopCount::Extra(3)).unwrap();
        assert_eq!(once, twice);
    }

    /// `bytes` with the given ranges cut out.
    fn without(bytes: &[u8], ranges: &[std::ops::Range<u64>]) -> Vec<u8> {
        bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| !ranges.iter().any(|r| r.contains(&(*i as u64))))
            .map(|(_, b)| *b)
            .collect()
    }

    #[test]
    fn test_repatching_leaves_one_block_and_other_bytes_untouched() {
        let original = animated(Some(gif::Repeat::Finite(7)));
        let first = rewrite_loop_count_bytes(&original, LoopCount::Extra(3)).unwrap();
        let second = rewrite_loop_count_bytes(&first, LoopCount::Extra(5)).unwrap();
        assert_eq!(loop_count_of(second.clone()), LoopCount::Extra(5));

        let before = scan_layout(original.as_slice()).unwrap();
        let after = scan_layout(second.as_slice()).unwrap();
        assert_eq!(after.application_extensions.len(), 1);
        let block = after.application_extensions[0].clone();
        assert_eq!(block.start, after.insertion_point);
        assert_eq!(
            &second[block.start as usize..block.end as usize],
            &netscape_block(5)
        );
        assert_eq!(
            without(&second, &[block]),
            without(&original, &before.application_extensions)
        );
    }

    #[test]
    fn test_gif87a_header_is_upgraded_when_block_is_added() {
        let mut original = minimal_gif(&[]);
        original[3..6].copy_from_slice(b"87a");
        let patched = rewrite_loop_count_bytes(&original, LoopCount::Extra(2)).unwrap();
        assert_eq!(&patched[..6], b"GIF89a");
        assert_eq!(patched.len(), original.len() + NETSCAPE_BLOCK_LEN);
        assert_eq!(&patched[6..19], &original[6..19]);
        let layout = scan_layout(patched.as_slice()).unwrap();
        assert_eq!(layout.application_extensions, vec![19..19 + NETSCAPE_BLOCK_LEN as u64]);
        assert_eq!(&patched[19..19 + NETSCAPE_BLOCK_LEN], &netscape_block(2));
        assert_eq!(&patched[19 + NETSCAPE_BLOCK_LEN..], &original[19..]);
    }

    #[test]
    fn test_gif87a_header_is_kept_without_block() {
        let mut original = minimal_gif(&[]);
        original[3..6].copy_from_slice(b"87a");
        let patched = rewrite_loop_count_bytes(&original, LoopCount::Never).unwrap();
        assert_eq!(patched, original);
    }

    #[test]
    fn test_streaming_matches_bytes() {
        let original = animated(Some(gif::Repeat::Finite(9)));
        let source = DataSource::from_bytes("a.gif", original.clone());
        let mut streamed = Vec::new();
        rewrite_loop_count(&source, LoopCount::Forever)
            .unwrap()
            .read_to_end(&mut streamed)
            .unwrap();
        assert_eq!(streamed, rewrite_loop_count_bytes(&original, LoopCount::Forever).unwrap());
    }

    #[test]
    fn test_not_a_gif() {
        let err = rewrite_loop_count_bytes(b"\x89PNG\r\n\x1a\n", LoopCount::Forever).unwrap_err();
        assert!(matches!(err, MediaError::NotAGif(_)));
    }
}
