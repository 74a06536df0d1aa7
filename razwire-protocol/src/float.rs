//! Portable IEEE-754 packing.
//!
//! Floats are never written with their native in-memory representation.
//! Instead the sign, exponent and significand are extracted arithmetically
//! and assembled into an integer of the same width, which the codec then
//! writes like any other integer.
//!
//! Bit-exact behavior:
//! - `+0.0` packs to all zeros, `-0.0` to the sign bit alone.
//! - Infinities pack to an all-ones exponent with a zero significand.
//! - NaN packs to the canonical quiet NaN with its sign kept. Payload bits
//!   are dropped.
//! - Subnormals pack to a zero exponent and round-trip exactly.
//!
//! For every non-NaN input the result equals the IEEE-754 binary32/64 pattern.

/// Packs `value` into a `bits`-wide pattern with `expbits` exponent bits.
fn pack(value: f64, bits: u32, expbits: u32) -> u64 {
    let sigbits = bits - expbits - 1;
    let bias = (1i64 << (expbits - 1)) - 1;
    let exp_max = (1u64 << expbits) - 1;
    let sign_bit = u64::from(value.is_sign_negative()) << (bits - 1);

    if value.is_nan() {
        return sign_bit | (exp_max << sigbits) | (1u64 << (sigbits - 1));
    }
    if value.is_infinite() {
        return sign_bit | (exp_max << sigbits);
    }
    if value == 0.0 {
        return sign_bit;
    }

    // Normalize into [1, 2) and count the binary exponent.
    let mut norm = value.abs();
    let mut shift: i64 = 0;
    while norm >= 2.0 {
        norm /= 2.0;
        shift += 1;
    }
    while norm < 1.0 {
        norm *= 2.0;
        shift -= 1;
    }

    if shift < 1 - bias {
        let scale = sigbits as i64 + shift + bias - 1;
        if scale < 0 {
            return sign_bit;
        }
        let significand = (norm * 2f64.powi(scale as i32)).round() as u64;
        return sign_bit | significand;
    }

    let exponent = (shift + bias) as u64;
    if exponent >= exp_max {
        return sign_bit | (exp_max << sigbits);
    }

    let significand = ((norm - 1.0) * 2f64.powi(sigbits as i32)).round() as u64;
    sign_bit | (exponent << sigbits) | significand
}

/// Reverses [`pack`].
fn unpack(packed: u64, bits: u32, expbits: u32) -> f64 {
    let sigbits = bits - expbits - 1;
    let bias = (1i32 << (expbits - 1)) - 1;
    let exp_max = (1u64 << expbits) - 1;

    let negative = (packed >> (bits - 1)) & 1 == 1;
    let exponent = (packed >> sigbits) & exp_max;
    let significand = packed & ((1u64 << sigbits) - 1);
    let fraction = significand as f64 / 2f64.powi(sigbits as i32);

    let magnitude = if exponent == exp_max {
        if significand == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else if exponent == 0 {
        fraction * 2f64.powi(1 - bias)
    } else {
        (1.0 + fraction) * 2f64.powi(exponent as i32 - bias)
    };

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Packs an `f32` into its portable 32-bit pattern.
pub fn pack_f32(value: f32) -> u32 {
    pack(f64::from(value), 32, 8) as u32
}

/// Unpacks a portable 32-bit pattern into an `f32`.
pub fn unpack_f32(packed: u32) -> f32 {
    unpack(u64::from(packed), 32, 8) as f32
}

/// Packs an `f64` into its portable 64-bit pattern.
pub fn pack_f64(value: f64) -> u64 {
    pack(value, 64, 11)
}

/// Unpacks a portable 64-bit pattern into an `f64`.
pub fn unpack_f64(packed: u64) -> f64 {
    unpack(packed, 64, 11)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_is_all_zero() {
        assert_eq!(pack_f32(0.0), 0);
        assert_eq!(pack_f64(0.0), 0);
        assert_eq!(unpack_f32(0), 0.0);
        assert_eq!(unpack_f64(0), 0.0);
    }

    #[test]
    fn test_negative_zero_keeps_sign() {
        assert_eq!(pack_f32(-0.0), 0x8000_0000);
        assert_eq!(pack_f64(-0.0), 0x8000_0000_0000_0000);
        assert!(unpack_f32(0x8000_0000).is_sign_negative());
        assert!(unpack_f64(0x8000_0000_0000_0000).is_sign_negative());
    }

    #[test]
    fn test_known_patterns() {
        assert_eq!(pack_f32(1.0), 0x3f80_0000);
        assert_eq!(pack_f32(-2.5), 0xc020_0000);
        assert_eq!(pack_f64(1.0), 0x3ff0_0000_0000_0000);
        assert_eq!(pack_f64(0.1), 0.1f64.to_bits());
        assert_eq!(pack_f64(f64::MAX), f64::MAX.to_bits());
        assert_eq!(pack_f32(f32::MIN_POSITIVE), f32::MIN_POSITIVE.to_bits());
    }

    #[test]
    fn test_infinities() {
        assert_eq!(pack_f32(f32::INFINITY), 0x7f80_0000);
        assert_eq!(pack_f32(f32::NEG_INFINITY), 0xff80_0000);
        assert_eq!(unpack_f64(pack_f64(f64::INFINITY)), f64::INFINITY);
        assert_eq!(unpack_f64(pack_f64(f64::NEG_INFINITY)), f64::NEG_INFINITY);
    }

    #[test]
    fn test_nan_is_canonical() {
        assert_eq!(pack_f32(f32::NAN), 0x7fc0_0000);
        assert_eq!(pack_f64(f64::NAN), 0x7ff8_0000_0000_0000);
        assert_eq!(pack_f64(-f64::NAN), 0xfff8_0000_0000_0000);
        assert!(unpack_f32(0x7fc0_0001).is_nan());
        assert!(unpack_f64(pack_f64(f64::NAN)).is_nan());
    }

    #[test]
    fn test_subnormals() {
        let tiny = f64::from_bits(1);
        assert_eq!(pack_f64(tiny), 1);
        assert_eq!(unpack_f64(1), tiny);

        let tiny32 = f32::from_bits(0x0000_0400);
        assert_eq!(pack_f32(tiny32), 0x0000_0400);
        assert_eq!(unpack_f32(0x0000_0400), tiny32);
    }

    proptest! {
        #[test]
        fn prop_f64_matches_ieee(v in any::<f64>().prop_filter("not nan", |v| !v.is_nan())) {
            prop_assert_eq!(pack_f64(v), v.to_bits());
            prop_assert_eq!(unpack_f64(pack_f64(v)).to_bits(), v.to_bits());
        }

        #[test]
        fn prop_f32_matches_ieee(v in any::<f32>().prop_filter("not nan", |v| !v.is_nan())) {
            prop_assert_eq!(pack_f32(v), v.to_bits());
            prop_assert_eq!(unpack_f32(pack_f32(v)).to_bits(), v.to_bits());
        }
    }
}
