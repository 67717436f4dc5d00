//! Per-block dequantization of GGUF quantized formats
//!
//! Each function consumes exactly `type_size` bytes of one packed block and
//! writes exactly `block_size` f32 values. Dispatch happens per tensor via
//! [`dequant_func`]; formats without an entry there are reported as
//! unsupported at read time, never at parse time.
//!
//! Layout references: the ggml `block_*` structs. Legacy formats carry an
//! f16 scale (and optionally an f16 min) per 32 elements; K-quants carry
//! hierarchically packed 6-bit sub-block scales per 256 elements.

use std::sync::LazyLock;

use super::tensor_type::TensorType;

/// Pre-computed f16 to f32 lookup table (65536 entries = 256KB)
///
/// Built once on first use; eliminates per-value conversion in block loops.
static F16_TO_F32_LUT: LazyLock<Box<[f32; 65536]>> = LazyLock::new(|| {
    let mut lut = Box::new([0.0f32; 65536]);
    for (i, slot) in lut.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let bits = i as u16;
        *slot = half::f16::from_bits(bits).to_f32();
    }
    lut
});

/// Convert IEEE 754 half-precision bits to f32
///
/// Subnormals, infinities, and NaN payloads all convert exactly.
#[inline]
#[must_use]
pub fn f16_to_f32(bits: u16) -> f32 {
    F16_TO_F32_LUT[bits as usize]
}

/// Read a little-endian f16 from the first two bytes of `src`
#[inline]
fn read_f16(src: &[u8]) -> f32 {
    f16_to_f32(u16::from_le_bytes([src[0], src[1]]))
}

/// Dequantizes one block: `src` holds `type_size` raw bytes, `dst` receives
/// `block_size` f32 values
pub type DequantFn = fn(src: &[u8], dst: &mut [f32]);

/// Dequantization function for a tensor type, or `None` if the format has
/// no dequantizer in this engine
#[must_use]
pub fn dequant_func(t: TensorType) -> Option<DequantFn> {
    match t {
        TensorType::Q8_0 => Some(dequant_q8_0),
        TensorType::Q4_0 => Some(dequant_q4_0),
        TensorType::Q4_1 => Some(dequant_q4_1),
        TensorType::Q5_0 => Some(dequant_q5_0),
        TensorType::Q5_1 => Some(dequant_q5_1),
        TensorType::Q2_K => Some(dequant_q2_k),
        TensorType::Q3_K => Some(dequant_q3_k),
        TensorType::Q4_K => Some(dequant_q4_k),
        TensorType::Q5_K => Some(dequant_q5_k),
        TensorType::Q6_K => Some(dequant_q6_k),
        _ => None,
    }
}

/// `Q8_0`: f16 scale + 32 int8 values (34 bytes -> 32 floats)
fn dequant_q8_0(src: &[u8], dst: &mut [f32]) {
    let d = read_f16(src);
    for j in 0..32 {
        #[allow(clippy::cast_possible_wrap)]
        let q = src[2 + j] as i8;
        dst[j] = d * f32::from(q);
    }
}

/// `Q4_0`: f16 scale + 16 bytes of packed nibbles, offset -8 (18 bytes -> 32 floats)
fn dequant_q4_0(src: &[u8], dst: &mut [f32]) {
    let d = read_f16(src);
    let qs = &src[2..];
    for j in 0..16 {
        let x0 = i32::from(qs[j] & 0x0F) - 8;
        let x1 = i32::from(qs[j] >> 4) - 8;
        #[allow(clippy::cast_precision_loss)]
        {
            dst[j] = x0 as f32 * d;
            dst[j + 16] = x1 as f32 * d;
        }
    }
}

/// `Q4_1`: f16 scale + f16 min + 16 bytes of nibbles, no offset (20 bytes -> 32 floats)
fn dequant_q4_1(src: &[u8], dst: &mut [f32]) {
    let d = read_f16(src);
    let m = read_f16(&src[2..]);
    let qs = &src[4..];
    for j in 0..16 {
        dst[j] = f32::from(qs[j] & 0x0F) * d + m;
        dst[j + 16] = f32::from(qs[j] >> 4) * d + m;
    }
}

/// `Q5_0`: f16 scale + u32 high bits + 16 bytes of nibbles, offset -16 (22 bytes -> 32 floats)
fn dequant_q5_0(src: &[u8], dst: &mut [f32]) {
    let d = read_f16(src);
    let qh = u32::from_le_bytes([src[2], src[3], src[4], src[5]]);
    let qs = &src[6..];
    for j in 0..16 {
        let xh0 = ((qh >> j) << 4) & 0x10;
        let xh1 = (qh >> (j + 12)) & 0x10;
        #[allow(clippy::cast_possible_wrap)]
        let x0 = (u32::from(qs[j] & 0x0F) | xh0) as i32 - 16;
        #[allow(clippy::cast_possible_wrap)]
        let x1 = (u32::from(qs[j] >> 4) | xh1) as i32 - 16;
        #[allow(clippy::cast_precision_loss)]
        {
            dst[j] = x0 as f32 * d;
            dst[j + 16] = x1 as f32 * d;
        }
    }
}

/// `Q5_1`: f16 scale + f16 min + u32 high bits + 16 bytes of nibbles (24 bytes -> 32 floats)
fn dequant_q5_1(src: &[u8], dst: &mut [f32]) {
    let d = read_f16(src);
    let m = read_f16(&src[2..]);
    let qh = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
    let qs = &src[8..];
    for j in 0..16 {
        let xh0 = ((qh >> j) << 4) & 0x10;
        let xh1 = (qh >> (j + 12)) & 0x10;
        let x0 = u32::from(qs[j] & 0x0F) | xh0;
        let x1 = u32::from(qs[j] >> 4) | xh1;
        #[allow(clippy::cast_precision_loss)]
        {
            dst[j] = x0 as f32 * d + m;
            dst[j + 16] = x1 as f32 * d + m;
        }
    }
}

/// `Q2_K`: 16 scale/min bytes + 64 bytes of 2-bit quants + f16 d + f16 dmin
/// (84 bytes -> 256 floats)
///
/// Each scales byte packs a 4-bit sub-block scale (low) and min (high).
fn dequant_q2_k(src: &[u8], dst: &mut [f32]) {
    let scales = &src[0..16];
    let qs = &src[16..80];
    let d = read_f16(&src[80..]);
    let dmin = read_f16(&src[82..]);

    let mut idx = 0;
    let mut is = 0;
    for n in (0..256).step_by(128) {
        let mut shift = 0u32;
        for _ in 0..4 {
            let sc = scales[is];
            is += 1;
            let dl = d * f32::from(sc & 0xF);
            let ml = dmin * f32::from(sc >> 4);
            for l in 0..16 {
                dst[idx] = dl * f32::from((qs[n / 4 + l] >> shift) & 3) - ml;
                idx += 1;
            }

            let sc = scales[is];
            is += 1;
            let dl = d * f32::from(sc & 0xF);
            let ml = dmin * f32::from(sc >> 4);
            for l in 0..16 {
                dst[idx] = dl * f32::from((qs[n / 4 + 16 + l] >> shift) & 3) - ml;
                idx += 1;
            }

            shift += 2;
        }
    }
}

/// `Q3_K`: 32-byte high-bit mask + 64 bytes of 2-bit quants + 12 bytes of
/// packed 6-bit scales + f16 d (110 bytes -> 256 floats)
///
/// A value is 3 bits: 2 from `qs` plus 1 from `hmask`; a cleared mask bit
/// subtracts 4. Scales are 6-bit, biased by 32.
fn dequant_q3_k(src: &[u8], dst: &mut [f32]) {
    let hmask = &src[0..32];
    let qs = &src[32..96];
    let scale_bytes = &src[96..108];
    let d_all = read_f16(&src[108..]);

    // Unpack the 12-byte 6-bit scale packing into 16 signed values.
    const KMASK1: u32 = 0x0303_0303;
    const KMASK2: u32 = 0x0f0f_0f0f;

    let mut aux = [0u32; 4];
    aux[0] = u32::from_le_bytes([scale_bytes[0], scale_bytes[1], scale_bytes[2], scale_bytes[3]]);
    aux[1] = u32::from_le_bytes([scale_bytes[4], scale_bytes[5], scale_bytes[6], scale_bytes[7]]);
    let tmp = u32::from_le_bytes([scale_bytes[8], scale_bytes[9], scale_bytes[10], scale_bytes[11]]);

    aux[2] = ((aux[0] >> 4) & KMASK2) | (((tmp >> 4) & KMASK1) << 4);
    aux[3] = ((aux[1] >> 4) & KMASK2) | (((tmp >> 6) & KMASK1) << 4);
    aux[0] = (aux[0] & KMASK2) | ((tmp & KMASK1) << 4);
    aux[1] = (aux[1] & KMASK2) | (((tmp >> 2) & KMASK1) << 4);

    let mut scales = [0i32; 16];
    for i in 0..4 {
        for k in 0..4 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let b = (aux[i] >> (8 * k)) as u8 as i8;
            scales[i * 4 + k] = i32::from(b);
        }
    }

    let mut idx = 0;
    let mut is = 0;
    let mut m = 1u8;
    let mut q_off = 0;
    for _ in 0..2 {
        let mut shift = 0u32;
        for _ in 0..4 {
            #[allow(clippy::cast_precision_loss)]
            let dl = d_all * (scales[is] - 32) as f32;
            is += 1;
            for l in 0..16 {
                let mut q = i32::from((qs[q_off + l] >> shift) & 3);
                if hmask[l] & m == 0 {
                    q -= 4;
                }
                #[allow(clippy::cast_precision_loss)]
                {
                    dst[idx] = dl * q as f32;
                }
                idx += 1;
            }

            #[allow(clippy::cast_precision_loss)]
            let dl = d_all * (scales[is] - 32) as f32;
            is += 1;
            for l in 0..16 {
                let mut q = i32::from((qs[q_off + 16 + l] >> shift) & 3);
                if hmask[16 + l] & m == 0 {
                    q -= 4;
                }
                #[allow(clippy::cast_precision_loss)]
                {
                    dst[idx] = dl * q as f32;
                }
                idx += 1;
            }

            shift += 2;
            m <<= 1;
        }
        q_off += 32;
    }
}

/// Extract the 6-bit scale and min for sub-block `j` (0..8) from the
/// 12-byte packed scales used by `Q4_K` and `Q5_K`
fn scale_min_k4(j: usize, scales: &[u8]) -> (u8, u8) {
    if j < 4 {
        (scales[j] & 63, scales[j + 4] & 63)
    } else {
        (
            (scales[j + 4] & 0xF) | ((scales[j - 4] >> 6) << 4),
            (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4),
        )
    }
}

/// `Q4_K`: f16 d + f16 dmin + 12 bytes of packed scales + 128 bytes of
/// nibbles (144 bytes -> 256 floats)
fn dequant_q4_k(src: &[u8], dst: &mut [f32]) {
    let d = read_f16(src);
    let dmin = read_f16(&src[2..]);
    let scales = &src[4..16];
    let qs = &src[16..];

    let mut idx = 0;
    let mut is = 0;
    for j in (0..256).step_by(64) {
        let (sc1, m1) = scale_min_k4(is, scales);
        let d1 = d * f32::from(sc1);
        let min1 = dmin * f32::from(m1);

        let (sc2, m2) = scale_min_k4(is + 1, scales);
        let d2 = d * f32::from(sc2);
        let min2 = dmin * f32::from(m2);

        let q_off = j / 2;
        for l in 0..32 {
            dst[idx] = d1 * f32::from(qs[q_off + l] & 0xF) - min1;
            idx += 1;
        }
        for l in 0..32 {
            dst[idx] = d2 * f32::from(qs[q_off + l] >> 4) - min2;
            idx += 1;
        }
        is += 2;
    }
}

/// `Q5_K`: f16 d + f16 dmin + 12 bytes of packed scales + 32-byte high bits
/// + 128 bytes of nibbles (176 bytes -> 256 floats)
///
/// Same as `Q4_K` with a 5th bit per value in `qh`; the bit selector rotates
/// through 1, 2, 4, ... per group of 64.
fn dequant_q5_k(src: &[u8], dst: &mut [f32]) {
    let d = read_f16(src);
    let dmin = read_f16(&src[2..]);
    let scales = &src[4..16];
    let qh = &src[16..48];
    let qs = &src[48..];

    let mut idx = 0;
    let mut is = 0;
    let mut u1 = 1u8;
    let mut u2 = 2u8;
    let mut ql_off = 0;
    for _ in 0..4 {
        let (sc1, m1) = scale_min_k4(is, scales);
        let d1 = d * f32::from(sc1);
        let min1 = dmin * f32::from(m1);

        let (sc2, m2) = scale_min_k4(is + 1, scales);
        let d2 = d * f32::from(sc2);
        let min2 = dmin * f32::from(m2);

        for l in 0..32 {
            let hbit = if qh[l] & u1 != 0 { 16u8 } else { 0 };
            dst[idx] = d1 * f32::from((qs[ql_off + l] & 0xF) + hbit) - min1;
            idx += 1;
        }
        for l in 0..32 {
            let hbit = if qh[l] & u2 != 0 { 16u8 } else { 0 };
            dst[idx] = d2 * f32::from((qs[ql_off + l] >> 4) + hbit) - min2;
            idx += 1;
        }
        ql_off += 32;
        is += 2;
        u1 <<= 2;
        u2 <<= 2;
    }
}

/// `Q6_K`: 128 bytes of low 4 bits + 64 bytes of high 2 bits + 16 int8
/// sub-block scales + f16 d (210 bytes -> 256 floats)
///
/// A value is 6 bits (4 low, 2 high), centered by -32.
fn dequant_q6_k(src: &[u8], dst: &mut [f32]) {
    let ql = &src[0..128];
    let qh = &src[128..192];
    let sc = &src[192..208];
    let d = read_f16(&src[208..]);

    let mut idx = 0;
    let mut ql_off = 0;
    let mut qh_off = 0;
    let mut sc_off = 0;
    for _ in 0..2 {
        for l in 0..32 {
            let is = l / 16;
            let q1 = i32::from(ql[ql_off + l] & 0xF | ((qh[qh_off + l] & 3) << 4)) - 32;
            let q2 = i32::from(ql[ql_off + l + 32] & 0xF | (((qh[qh_off + l] >> 2) & 3) << 4)) - 32;
            let q3 = i32::from(ql[ql_off + l] >> 4 | (((qh[qh_off + l] >> 4) & 3) << 4)) - 32;
            let q4 = i32::from(ql[ql_off + l + 32] >> 4 | (((qh[qh_off + l] >> 6) & 3) << 4)) - 32;
            #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
            {
                let s1 = f32::from(sc[sc_off + is] as i8);
                let s2 = f32::from(sc[sc_off + is + 2] as i8);
                let s3 = f32::from(sc[sc_off + is + 4] as i8);
                let s4 = f32::from(sc[sc_off + is + 6] as i8);
                dst[idx + l] = d * s1 * q1 as f32;
                dst[idx + l + 32] = d * s2 * q2 as f32;
                dst[idx + l + 64] = d * s3 * q3 as f32;
                dst[idx + l + 96] = d * s4 * q4 as f32;
            }
        }
        idx += 128;
        ql_off += 64;
        qh_off += 32;
        sc_off += 8;
    }
}
