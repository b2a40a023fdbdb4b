use rand::RngCore;

/// Generate a random 128-bit identifier, hex-encoded, for use as a `reqId`.
pub fn new_req_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
