//! Bit fields inside register words.
//!
//! Bit 0 is the least significant bit.
//! Indices at or beyond 64 read as zero and leave words untouched when written.

/// The bit at `index`, as 0 or 1.
pub fn get_bit(word: u64, index: u32) -> u64 {
    word.checked_shr(index).map_or(0, |shifted| shifted & 1)
}

/// The `len` bit field starting at `index`, right-justified.
pub fn get_bits(word: u64, index: u32, len: u32) -> u64 {
    (0..len).fold(0, |field, offset| {
        field | get_bit(word, index.saturating_add(offset)) << offset
    })
}

/// `word` with the bit at `index` set to the low bit of `val`.
pub fn set_bit(word: u64, index: u32, val: u64) -> u64 {
    let Some(mask) = 1u64.checked_shl(index) else {
        return word;
    };

    if val & 1 == 1 {
        word | mask
    } else {
        word & !mask
    }
}

/// `word` with the low `len` bits of `val` written at `index..index + len`, low bit first.
pub fn set_bits(word: u64, index: u32, len: u32, val: u64) -> u64 {
    (0..len).fold(word, |word, offset| {
        set_bit(word, index.saturating_add(offset), get_bit(val, offset))
    })
}
