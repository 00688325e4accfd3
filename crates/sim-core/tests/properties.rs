//! Property coverage for width-bounded arithmetic and field decoding.

use log as _;
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use serde_json as _;
use sim_core::bits::{extract, fits_signed, insert, narrow, sign_extend, unsigned_bits};
use sim_core::{Field, MachineInstruction};
use thiserror as _;

proptest! {
    #[test]
    fn narrowing_fits_and_preserves_low_bits(value in any::<i64>(), width in 1_u32..=64) {
        let wide = i128::from(value) * 3 + 7;
        let narrowed = narrow(wide, width);
        prop_assert!(fits_signed(i128::from(narrowed), width));
        prop_assert_eq!(unsigned_bits(narrowed, width), unsigned_bits(wide as i64, width));
    }

    #[test]
    fn insert_then_extract_returns_the_range(
        value in any::<i64>(),
        bits in any::<u64>(),
        width in 1_u32..=64,
        from_right in any::<bool>(),
        (start, num_bits) in (0_u32..64, 1_u32..=64),
    ) {
        prop_assume!(start < width && num_bits <= width - start);
        let merged = insert(narrow(i128::from(value), width), width, start, num_bits, bits, from_right);
        let mask = if num_bits == 64 { u64::MAX } else { (1 << num_bits) - 1 };
        prop_assert_eq!(extract(merged, width, start, num_bits, from_right), bits & mask);
    }

    #[test]
    fn field_values_recover_each_field(op in 0_u64..16, addr in 0_i64..256, offset in -8_i64..8) {
        let instruction = MachineInstruction::new(
            "mix",
            op,
            vec![Field::new("op", 4), Field::new("addr", 8), Field::new("offset", 4).signed(true)],
        );
        let word = (op << 12) | ((addr as u64) << 4) | unsigned_bits(offset, 4);
        let values = instruction.field_values(sign_extend(word, 16));
        prop_assert_eq!(values, vec![op as i64, addr, offset]);
    }
}
