use rand::RngCore;

/// Generate a random 128-bit identifier, hex-encoded, for a one-shot swap
/// token.
pub fn new_swap_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
