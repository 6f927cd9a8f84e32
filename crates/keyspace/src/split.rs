use num_bigint::BigUint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    #[error("word max length must be positive")]
    InvalidWordMaxLength,
    #[error("alphabet length must be positive")]
    InvalidAlphabetLength,
    #[error("chunk size must be positive")]
    InvalidChunkSize,
    #[error("part count exceeds the limits of u64")]
    PartCountOverflow,
}

/// Number of chunks needed to cover every candidate word of length
/// `1..=max_length` over an alphabet of `alphabet_len` symbols.
///
/// The candidate total `N = Σ_{k=1..L} A^k` overflows machine integers
/// already at modest inputs, so it is computed exactly; only the final
/// ceil-divided part count must fit in a `u64`.
pub fn split(max_length: u32, alphabet_len: usize, chunk_size: u64) -> Result<u64, SplitError> {
    if max_length == 0 {
        return Err(SplitError::InvalidWordMaxLength);
    }
    if alphabet_len == 0 {
        return Err(SplitError::InvalidAlphabetLength);
    }
    if chunk_size == 0 {
        return Err(SplitError::InvalidChunkSize);
    }

    let alphabet = BigUint::from(alphabet_len);
    let mut total = BigUint::from(0u32);
    let mut power = BigUint::from(1u32);
    for _ in 0..max_length {
        power *= &alphabet;
        total += &power;
    }

    let parts = (total + (chunk_size - 1)) / chunk_size;
    u64::try_from(&parts).map_err(|_| SplitError::PartCountOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_inputs() {
        assert_eq!(split(0, 26, 100), Err(SplitError::InvalidWordMaxLength));
        assert_eq!(split(4, 0, 100), Err(SplitError::InvalidAlphabetLength));
        assert_eq!(split(4, 26, 0), Err(SplitError::InvalidChunkSize));
    }

    #[test]
    fn exact_and_ragged_chunking() {
        // |{a,b,c}|^1 + ^2 + ^3 = 3 + 9 + 27 = 39.
        assert_eq!(split(3, 3, 39), Ok(1));
        assert_eq!(split(3, 3, 13), Ok(3));
        assert_eq!(split(3, 3, 38), Ok(2));
        assert_eq!(split(3, 3, 40), Ok(1));
        assert_eq!(split(3, 3, 1), Ok(39));
    }

    #[test]
    fn unary_alphabet() {
        // One symbol yields exactly one word per length.
        assert_eq!(split(6, 1, 2), Ok(3));
        assert_eq!(split(6, 1, 10), Ok(1));
    }

    #[test]
    fn covers_the_space_without_excess() {
        // partCount·C ≥ N and (partCount−1)·C < N.
        for (max_length, alphabet_len, chunk_size) in
            [(3u32, 3usize, 5u64), (4, 26, 1000), (6, 36, 10_000_000), (2, 7, 3)]
        {
            let n: u64 = (1..=max_length)
                .map(|k| (alphabet_len as u64).pow(k))
                .sum();
            let parts = split(max_length, alphabet_len, chunk_size).unwrap();
            assert!(parts * chunk_size >= n, "undershoot for {parts} parts");
            assert!((parts - 1) * chunk_size < n, "overshoot for {parts} parts");
        }
    }

    #[test]
    fn huge_spaces_do_not_overflow_internally() {
        // Σ 36^k for k=1..24 dwarfs u64, yet the part count still fits.
        let parts = split(24, 36, u64::MAX).unwrap();
        assert!(parts > 0);

        // But a part count beyond u64 is reported, not wrapped.
        assert_eq!(split(64, 64, 1), Err(SplitError::PartCountOverflow));
    }
}
