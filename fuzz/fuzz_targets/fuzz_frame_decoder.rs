//! Fuzz target: `Codec::open_wire`
//!
//! Drives arbitrary radio packets through envelope parsing, base64,
//! decryption, unpadding and checksum.  Must never panic.  Anything that
//! does open must re-seal into a packet that opens to the same message.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use lorabridge::config::KeyMaterial;
use lorabridge::protocol::Codec;

fuzz_target!(|data: &[u8]| {
    let codec = Codec::new(KeyMaterial::default());

    if let Ok(message) = codec.open_wire(data) {
        // Re-encoding may legitimately exceed one packet (e.g. escaped
        // strings); only a successful seal is checked.
        if let Ok(wire) = codec.seal_message(&message) {
            let again = codec.open_wire(&wire).expect("resealed frame must open");
            assert_eq!(again, message);
        }
    }
});
