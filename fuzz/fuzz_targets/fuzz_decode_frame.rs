#![no_main]

use libfuzzer_sys::fuzz_target;
use nebulous_client::core::codec::PacketCodec;
use nebulous_client::core::registry::Registry;
use nebulous_client::core::transform::XorKeystream;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Ok(registry) = Registry::standard() else {
        return;
    };
    let registry = Arc::new(registry);

    // Both directions, before and after the session keystream is installed.
    let mut client = PacketCodec::client(registry.clone());
    let mut server = PacketCodec::server(registry);
    let _ = client.decode_frame(data);
    let _ = server.decode_frame(data);

    client.set_transforms(Box::new(XorKeystream::new(1)), Box::new(XorKeystream::new(1)));
    if let Ok(packet) = client.decode_frame(data) {
        // Anything accepted must be encodable again by the peer role.
        let mut peer = PacketCodec::server(client.registry().clone());
        let _ = peer.encode_packet(&packet);
    }
});
