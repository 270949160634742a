#![no_main]

use libfuzzer_sys::fuzz_target;
use seqlog_core::record::{next_record_offset, previous_record_offset};
use seqlog_core::{ReadDirection, RecordView};
use seqlog_reader::CacheWindow;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a block buffer. Parsing and walking must never
    // panic on:
    // - Lengths below the fixed header size
    // - Lengths running past the buffer
    // - Trailers disagreeing with the leading length
    // - Bad signatures
    let mut offset = 0;
    while let Ok(view) = RecordView::parse(data, offset) {
        let _ = view.record_number();
        let _ = view.timestamp();
        let _ = view.payload();
        let _ = view.to_entry();
        let _ = previous_record_offset(data, offset);
        match next_record_offset(data, offset) {
            Some(next) => offset = next,
            None => break,
        }
    }

    if data.len() < 9 {
        return;
    }

    // First byte picks the orientation, the next eight the anchor record.
    let direction = if data[0] & 1 == 0 {
        ReadDirection::Forward
    } else {
        ReadDirection::Backward
    };
    let mut anchor = [0u8; 8];
    anchor.copy_from_slice(&data[1..9]);
    let first_index = u64::from_le_bytes(anchor) >> 1;
    let block = &data[9..];

    let mut window = CacheWindow::new(block.len().max(1));
    window.fill_target()[..block.len()].copy_from_slice(block);
    window.install(direction, first_index, block.len());

    for delta in [0u64, 1, 2, 5, 17] {
        for index in [first_index.saturating_add(delta), first_index.saturating_sub(delta)] {
            let _ = window.can_locate(index);
            if window.locate(index).is_some() {
                let _ = window.current();
            }
        }
    }
});
