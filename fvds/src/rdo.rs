/// Bits-per-SAD weight of the motion search cost.
pub const MOTION_LAMBDA: i32 = 4;

/// Weight of SAD against bits when choosing between intra and inter coding of a block.
pub const BLOCK_LAMBDA: f32 = 0.35;

/// Share of intra blocks above which a P-frame is re-coded as an I-frame.
pub const INTRA_BLOCK_RATIO: f32 = 0.6;

/// Cost of a candidate vector during motion search: four times its vector
/// bits plus its SAD, both in half-pel search units.
#[inline]
pub fn motion_rd_cost(bits: u32, distortion: i32) -> i32 {
    bits as i32 * MOTION_LAMBDA + distortion
}

#[inline]
pub fn block_cost(bits: u32, sad: u32) -> f32 {
    bits as f32 + sad as f32 * BLOCK_LAMBDA
}

/// Intra coding has to be strictly cheaper to win; ties go to inter.
pub fn prefer_intra(intra_bits: u32, intra_sad: u32, inter_bits: u32, inter_sad: u32) -> bool {
    block_cost(intra_bits, intra_sad) < block_cost(inter_bits, inter_sad)
}

/// Largest number of intra blocks a P-frame of this size may contain.
pub fn intra_block_threshold(width: u32, height: u32) -> u32 {
    (((width / 8) * (height / 8)) as f32 * INTRA_BLOCK_RATIO) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_cost_weighs_bits() {
        assert_eq!(motion_rd_cost(1, 0), 4);
        assert_eq!(motion_rd_cost(7, 100), 128);
    }

    #[test]
    fn one_vector_bit_trades_for_four_sad() {
        assert_eq!(motion_rd_cost(3, 20), motion_rd_cost(4, 16));
        assert!(motion_rd_cost(2, 10) < motion_rd_cost(3, 10));
    }

    #[test]
    fn ties_go_to_inter() {
        assert!(!prefer_intra(10, 20, 10, 20));
        assert!(prefer_intra(9, 20, 10, 20));
        // 85 bits of intra against 4 bits and a SAD of 200 for inter
        assert!(prefer_intra(85, 0, 4, 300));
        assert!(!prefer_intra(85, 0, 4, 200));
    }

    #[test]
    fn threshold_truncates() {
        // 32 * 24 blocks * 0.6 = 460.8
        assert_eq!(intra_block_threshold(256, 192), 460);
        assert_eq!(intra_block_threshold(8, 8), 0);
        assert_eq!(intra_block_threshold(16, 8), 1);
    }
}
