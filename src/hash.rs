//! Key hashing.
//!
//! Every process that shares a database must compute bit-identical hashes:
//! bucket selection depends on nothing else, and a divergent hash silently
//! sends lookups to the wrong page without tripping any block check.
//!
//! The hash walks a table of 128 pseudo-random 32-bit constants, eight rows
//! of sixteen. Each input byte consumes two rows: its low nibble indexes the
//! first, its high nibble the second. After every full pass over the table
//! the accumulator is rotated left by one bit so that long keys do not just
//! sum the same rows over and over.

/// Number of significant bits in a hash value.
pub const HASH_BITS: u32 = 32;

/// The widest mask a bucket can be resolved at.
pub const MAX_MASK: u64 = u32::MAX as u64;

const ROW_LEN: usize = 16;

#[rustfmt::skip]
const TABLE: [u32; 128] = [
    0o23742330770, 0o03576024251, 0o13127742007, 0o33652616201,
    0o21621643530, 0o33350045504, 0o32635460216, 0o07061141364,
    0o07156051721, 0o16022755352, 0o17215767266, 0o06000434051,
    0o25337671652, 0o07637557061, 0o22275345443, 0o35463227436,
    0o16264714255, 0o16042620630, 0o14052611726, 0o26263777255,
    0o03012701055, 0o14300563627, 0o04656271362, 0o14404537373,
    0o13274635625, 0o01131413175, 0o11320003474, 0o30246473204,
    0o33754556062, 0o06505636142, 0o33514310031, 0o10360511776,
    0o13746766455, 0o12625320116, 0o10730567002, 0o23204472144,
    0o36625762173, 0o07322231264, 0o24602242004, 0o22264612067,
    0o30137755615, 0o24771412714, 0o27101263114, 0o11641073476,
    0o15632056155, 0o35156143376, 0o11431706724, 0o15343020125,
    0o22072213117, 0o10660247176, 0o23323516107, 0o23620065301,
    0o21025324457, 0o34747403475, 0o35574315516, 0o04550100612,
    0o22760547101, 0o15642777522, 0o26201547441, 0o06263600425,
    0o24314041157, 0o05660214721, 0o10455573121, 0o12364560205,
    0o01324644570, 0o17332522050, 0o31376626562, 0o34015752166,
    0o11406450433, 0o37664563560, 0o05413054610, 0o30127721632,
    0o15542231104, 0o07073334051, 0o23062652750, 0o00351313465,
    0o35337546653, 0o15464432177, 0o06357461421, 0o22532007441,
    0o14162740567, 0o15423135154, 0o36263770217, 0o36373623017,
    0o24240500022, 0o07345241252, 0o16360347602, 0o21606365102,
    0o27143473505, 0o21620662367, 0o32755747035, 0o33533733272,
    0o36252210734, 0o20214537366, 0o34313365741, 0o02100770454,
    0o07540262636, 0o03124351634, 0o12001214102, 0o34205303751,
    0o33712104461, 0o20377332573, 0o04573367576, 0o20237664016,
    0o05470074032, 0o25752473107, 0o05642207303, 0o34214413761,
    0o14257524666, 0o32471644742, 0o06425470051, 0o23270305263,
    0o06052530305, 0o27012211770, 0o20214110134, 0o12607344215,
    0o11410565214, 0o35067620101, 0o12001016631, 0o30767722406,
    0o30265064600, 0o01644062374, 0o25770775062, 0o37167722053,
    0o11104434474, 0o14674135762, 0o10143633215, 0o32603334341,
];

/// Computes the hash of `key`.
pub fn calc_hash(key: &[u8]) -> u32 {
    let mut accum: u32 = 0;
    let mut row = 0usize;

    for &byte in key {
        accum = accum.wrapping_add(TABLE[row + (byte & 0x0f) as usize]);
        row += ROW_LEN;
        accum = accum.wrapping_add(TABLE[row + (byte >> 4) as usize]);
        row += ROW_LEN;

        if row == TABLE.len() {
            row = 0;
            accum = accum.rotate_left(1);
        }
    }

    accum
}
