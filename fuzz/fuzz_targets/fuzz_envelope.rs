#![no_main]

use atlantium_client::normalize::{
    message_from_payload, normalize, normalize_lobby, unwrap_envelope,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Normalization must never panic on arbitrary JSON.
    let _ = normalize(&raw);
    let _ = normalize_lobby(&raw);
    if let Some((_, payload)) = unwrap_envelope(&raw) {
        let _ = message_from_payload(payload);
    }
});
