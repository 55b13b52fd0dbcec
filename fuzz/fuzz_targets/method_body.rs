#![no_main]

use cilcover::il::{MethodDecoder, MethodEncoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut method) = MethodDecoder::decode(data) else {
        return;
    };

    // Empty exception regions decode but are refused by the encoder
    let Ok(bytes) = MethodEncoder::new().encode(&mut method) else {
        return;
    };

    // Whatever encodes must decode again to the same shape
    let again = MethodDecoder::decode(&bytes).expect("encoded body failed to decode");
    assert_eq!(again.len(), method.len());
    assert_eq!(again.handlers.len(), method.handlers.len());
});
