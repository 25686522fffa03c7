//! Blob tracking: deferred resolution of logical write spans
//!
//! A blob is one caller-defined span of the uncompressed stream whose final
//! virtual offsets only become known once the blocks it starts and ends in
//! have been physically written. Blobs resolve strictly in creation order:
//! resolution is a queue scan that stops at the first entry that is still
//! open or whose end block has not been written yet.

use std::collections::{BTreeMap, VecDeque};

use crate::offset::VirtualOffset;

/// Callback receiving the span's final (start, end) virtual offsets
pub type BlobCallback = Box<dyn FnOnce(VirtualOffset, VirtualOffset) + Send>;

pub(crate) struct Blob {
    start_id: u64,
    start_byte: u16,
    /// End block id and intra-block offset, captured at close time before
    /// any further bytes land in that block
    end: Option<(u64, u16)>,
    callback: Option<BlobCallback>,
}

impl Blob {
    pub fn new(start_id: u64, start_byte: u16, callback: BlobCallback) -> Self {
        Self {
            start_id,
            start_byte,
            end: None,
            callback: Some(callback),
        }
    }

    pub fn close(&mut self, end_id: u64, end_byte: u16) {
        debug_assert!(self.end.is_none());
        self.end = Some((end_id, end_byte));
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    pub fn start_id(&self) -> u64 {
        self.start_id
    }
}

/// Fires callbacks for every leading blob whose boundary blocks are written.
///
/// `starts` maps written block ids to their on-disk start offsets, retained
/// while any pending blob may still reference them; entries no longer
/// reachable by the remaining blobs are pruned. Blocks with id below
/// `next_write_id` are exactly the written ones.
pub(crate) fn resolve_ready(
    blobs: &mut VecDeque<Blob>,
    starts: &mut BTreeMap<u64, u64>,
    next_write_id: u64,
) {
    loop {
        // start_id <= end_id, so a written end block implies a written start
        let ready = blobs
            .front()
            .and_then(|blob| blob.end)
            .is_some_and(|(end_id, _)| end_id < next_write_id);
        if !ready {
            break;
        }
        let Some(mut blob) = blobs.pop_front() else {
            break;
        };
        let Some((end_id, end_byte)) = blob.end else {
            break;
        };
        if let (Some(callback), Some(&start_off), Some(&end_off)) = (
            blob.callback.take(),
            starts.get(&blob.start_id),
            starts.get(&end_id),
        ) {
            callback(
                VirtualOffset::new(start_off, blob.start_byte),
                VirtualOffset::new(end_off, end_byte),
            );
        }
    }

    match blobs.front() {
        Some(front) => {
            let keep_from = front.start_id();
            starts.retain(|&id, _| id >= keep_from);
        }
        None => starts.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Fired = Arc<Mutex<Vec<(u64, u16, u64, u16)>>>;

    fn recording_blob(start_id: u64, start_byte: u16, fired: &Fired) -> Blob {
        let fired = Arc::clone(fired);
        Blob::new(
            start_id,
            start_byte,
            Box::new(move |s, e| {
                fired
                    .lock()
                    .push((s.block_start(), s.intra_offset(), e.block_start(), e.intra_offset()));
            }),
        )
    }

    #[test]
    fn test_resolution_waits_for_end_block() {
        let fired: Fired = Arc::default();
        let mut blobs = VecDeque::new();
        let mut starts = BTreeMap::from([(0, 0u64), (1, 1000u64)]);

        let mut blob = recording_blob(0, 10, &fired);
        blob.close(1, 20);
        blobs.push_back(blob);

        // End block (id 1) not yet written
        resolve_ready(&mut blobs, &mut starts, 1);
        assert!(fired.lock().is_empty());
        assert_eq!(blobs.len(), 1);

        // Now it is
        resolve_ready(&mut blobs, &mut starts, 2);
        assert_eq!(fired.lock().as_slice(), &[(0, 10, 1000, 20)]);
        assert!(blobs.is_empty());
        assert!(starts.is_empty());
    }

    #[test]
    fn test_fifo_scan_stops_at_first_unresolved() {
        let fired: Fired = Arc::default();
        let mut blobs = VecDeque::new();
        let mut starts = BTreeMap::from([(0, 0u64), (1, 500u64), (2, 900u64)]);

        // Older blob is still open; newer one is closed and its blocks are
        // written, but it must not resolve out of order
        blobs.push_back(recording_blob(0, 0, &fired));
        let mut newer = recording_blob(1, 5, &fired);
        newer.close(1, 9);
        blobs.push_back(newer);

        resolve_ready(&mut blobs, &mut starts, 3);
        assert!(fired.lock().is_empty());
        assert_eq!(blobs.len(), 2);

        // Closing the older blob unblocks both, oldest first
        blobs.front_mut().unwrap().close(2, 4);
        resolve_ready(&mut blobs, &mut starts, 3);
        assert_eq!(
            fired.lock().as_slice(),
            &[(0, 0, 900, 4), (500, 5, 500, 9)]
        );
    }

    #[test]
    fn test_start_offsets_pruned_to_pending() {
        let fired: Fired = Arc::default();
        let mut blobs = VecDeque::new();
        let mut starts = BTreeMap::from([(0, 0u64), (1, 100u64), (2, 200u64)]);

        let mut done = recording_blob(0, 0, &fired);
        done.close(0, 1);
        blobs.push_back(done);
        blobs.push_back(recording_blob(2, 0, &fired));

        resolve_ready(&mut blobs, &mut starts, 3);
        // Offsets for blocks 0 and 1 are no longer reachable
        assert_eq!(starts.keys().copied().collect::<Vec<_>>(), vec![2]);
    }
}
