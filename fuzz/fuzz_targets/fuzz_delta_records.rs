#![no_main]

use libfuzzer_sys::fuzz_target;
use nebulous_client::core::codec::{read_delta, Reader};
use nebulous_client::session::Session;

fuzz_target!(|data: &[u8]| {
    // Decode as many delta records as the input holds and apply them.
    let mut reader = Reader::new(data);
    let mut deltas = Vec::new();
    while reader.remaining() > 0 {
        match read_delta(&mut reader) {
            Ok(delta) => deltas.push(delta),
            Err(_) => break,
        }
    }

    let mut session = Session::new();
    session.apply_batch(&deltas);
    assert!(session.len() <= deltas.len());
});
