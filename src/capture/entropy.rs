/// Shannon entropy of `data` in bits per byte, in the range `[0, 8]`.
///
/// Empty input yields exactly `0.0`.
pub fn entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0usize; 256];
    for b in data {
        freq[*b as usize] += 1;
    }

    let len = data.len() as f64;
    freq.iter()
        .filter(|count| **count > 0)
        .map(|count| {
            let p = *count as f64 / len;
            -p * p.log2()
        })
        .sum()
}
