/// Generates a random ID.
pub fn random_id() -> u32 {
    rand::random()
}

/// Rounds a price to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
#[test]
fn round_prices() {
    assert_eq!(round_to(1.123456, 5), 1.12346);
    assert_eq!(round_to(1.10999999999, 4), 1.11);
    assert_eq!(round_to(2.5, 0), 3.0);
}
