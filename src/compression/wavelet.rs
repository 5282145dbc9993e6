use crate::error::{CodecError, CodecResult};
use num_traits::Float;
use rayon::prelude::*;

/// Analysis lowpass taps of the FBI WSQ 9/7 biorthogonal filter pair.
pub const WSQ_LOWPASS: [f64; 9] = [
    0.037_828_455_507_264_04,
    -0.023_849_465_019_556_85,
    -0.110_624_404_418_437_18,
    0.377_402_855_612_830_66,
    0.852_698_679_008_893_85,
    0.377_402_855_612_830_66,
    -0.110_624_404_418_437_18,
    -0.023_849_465_019_556_85,
    0.037_828_455_507_264_04,
];

/// Analysis highpass taps of the FBI WSQ 9/7 biorthogonal filter pair.
pub const WSQ_HIGHPASS: [f64; 7] = [
    0.064_538_882_628_697_06,
    -0.040_689_417_609_164_06,
    -0.418_092_273_221_617_24,
    0.788_485_616_405_582_9,
    -0.418_092_273_221_617_24,
    -0.040_689_417_609_164_06,
    0.064_538_882_628_697_06,
];

pub const W_TREE_LEN: usize = 20;
pub const Q_TREE_LEN: usize = 64;
/// Subbands carried in the stream; the last four are never coded.
pub const CODED_SUBBANDS: usize = 60;

/// Whole-sample symmetric extension of index `p` into `0..n`.
pub fn reflect(p: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let mut p = p.rem_euclid(period);
    if p >= n as isize {
        p = period - p;
    }
    p as usize
}

/// Lengths of the two halves of an odd-length split. Inverted splits put
/// the shorter (highpass) half first.
pub fn split_len(n: usize, inverted: bool) -> (usize, usize) {
    let (low, high) = (n.div_ceil(2), n / 2);
    if inverted {
        (high, low)
    } else {
        (low, high)
    }
}

/// Odd-length symmetric analysis pair plus the synthesis pair derived from it.
pub struct FilterBank<F> {
    lowpass: Vec<F>,
    highpass: Vec<F>,
    synth_low: Vec<F>,
    synth_high: Vec<F>,
}

impl<F: Float + Send + Sync> FilterBank<F> {
    pub fn new(lowpass: &[f64], highpass: &[f64]) -> CodecResult<Self> {
        for taps in [lowpass, highpass] {
            if taps.is_empty() || taps.len() % 2 == 0 {
                return Err(CodecError::Unsupported(format!(
                    "filter of length {}; only odd-length symmetric filters are supported",
                    taps.len()
                )));
            }
        }

        let convert = |taps: &[f64]| -> CodecResult<Vec<F>> {
            taps.iter()
                .map(|&t| {
                    F::from(t).ok_or_else(|| {
                        CodecError::InvalidInput(format!("filter tap {} is not representable", t))
                    })
                })
                .collect()
        };
        let lo = convert(lowpass)?;
        let hi = convert(highpass)?;

        // Quadrature mirror: each synthesis filter is the other analysis
        // filter with alternating signs about its centre.
        let modulate = |taps: &[F]| -> Vec<F> {
            let half = taps.len() / 2;
            taps.iter()
                .enumerate()
                .map(|(k, &t)| if k.abs_diff(half) % 2 == 1 { -t } else { t })
                .collect()
        };
        let synth_low = modulate(&hi);
        let synth_high = modulate(&lo);

        Ok(Self {
            lowpass: lo,
            highpass: hi,
            synth_low,
            synth_high,
        })
    }

    pub fn wsq() -> CodecResult<Self> {
        Self::new(&WSQ_LOWPASS, &WSQ_HIGHPASS)
    }

    /// One level of 1-D analysis. `output` receives the lowpass half then
    /// the highpass half, or the reverse when `inverted`.
    pub fn analyze(&self, input: &[F], output: &mut [F], inverted: bool) {
        let n = input.len();
        debug_assert_eq!(n, output.len());
        if n < 2 {
            output.copy_from_slice(input);
            return;
        }

        let low_len = n.div_ceil(2);
        let high_len = n / 2;
        let (low_off, high_off) = if inverted { (high_len, 0) } else { (0, low_len) };
        let lh = (self.lowpass.len() / 2) as isize;
        let hh = (self.highpass.len() / 2) as isize;

        for j in 0..low_len {
            let base = 2 * j as isize - lh;
            let mut acc = F::zero();
            for (k, &tap) in self.lowpass.iter().enumerate() {
                acc = acc + tap * input[reflect(base + k as isize, n)];
            }
            output[low_off + j] = acc;
        }
        for j in 0..high_len {
            let base = 2 * j as isize + 1 - hh;
            let mut acc = F::zero();
            for (k, &tap) in self.highpass.iter().enumerate() {
                acc = acc + tap * input[reflect(base + k as isize, n)];
            }
            output[high_off + j] = acc;
        }
    }

    /// Inverse of [`FilterBank::analyze`] for the same length and layout.
    pub fn synthesize(&self, input: &[F], output: &mut [F], inverted: bool) {
        let n = input.len();
        debug_assert_eq!(n, output.len());
        if n < 2 {
            output.copy_from_slice(input);
            return;
        }

        let low_len = n.div_ceil(2);
        let high_len = n / 2;
        let (low, high) = if inverted {
            (&input[high_len..], &input[..high_len])
        } else {
            (&input[..low_len], &input[low_len..])
        };
        let approx = |j: isize| low[reflect(2 * j, n) / 2];
        let detail = |j: isize| high[(reflect(2 * j + 1, n) - 1) / 2];

        let gl = (self.synth_low.len() / 2) as isize;
        let gh = (self.synth_high.len() / 2) as isize;

        for (i, out) in output.iter_mut().enumerate() {
            let i = i as isize;
            let mut acc = F::zero();

            // Lowpass taps sit on even positions 2j.
            let mut j = (i - gl).div_euclid(2);
            while 2 * j <= i + gl {
                let t = i - 2 * j;
                if t.abs() <= gl {
                    acc = acc + self.synth_low[(t + gl) as usize] * approx(j);
                }
                j += 1;
            }

            // Highpass taps sit on odd positions 2j + 1.
            let mut j = (i - gh - 1).div_euclid(2);
            while 2 * j + 1 <= i + gh {
                let t = i - (2 * j + 1);
                if t.abs() <= gh {
                    acc = acc + self.synth_high[(t + gh) as usize] * detail(j);
                }
                j += 1;
            }

            *out = acc;
        }
    }
}

/// Rectangle of the coefficient plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    fn quadrants(&self, invert_x: bool, invert_y: bool) -> [Region; 4] {
        let (w0, w1) = split_len(self.width, invert_x);
        let (h0, h1) = split_len(self.height, invert_y);
        [
            Region::new(self.x, self.y, w0, h0),
            Region::new(self.x + w0, self.y, w1, h0),
            Region::new(self.x, self.y + h0, w0, h1),
            Region::new(self.x + w0, self.y + h0, w1, h1),
        ]
    }
}

/// One level of 2-D decomposition applied to `region`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaveletNode {
    pub region: Region,
    pub invert_rows: bool,
    pub invert_cols: bool,
}

/// The 20-node decomposition schedule and the 64-subband partition
/// derived from it.
#[derive(Debug, Clone)]
pub struct SubbandLayout {
    pub nodes: [WaveletNode; W_TREE_LEN],
    pub subbands: [Region; Q_TREE_LEN],
}

impl SubbandLayout {
    pub fn new(width: usize, height: usize) -> CodecResult<Self> {
        let mut nodes = [WaveletNode::default(); W_TREE_LEN];
        for i in [2, 4, 7, 9, 11, 13, 16, 18] {
            nodes[i].invert_rows = true;
        }
        for i in [3, 5, 8, 9, 12, 13, 17, 18] {
            nodes[i].invert_cols = true;
        }

        Self::split4(&mut nodes, 0, 1, Region::new(0, 0, width, height), true);

        let first = nodes[1].region;
        let (lenx, lenx2) = split_len(first.width, false);
        let (leny, leny2) = split_len(first.height, false);
        Self::split4(&mut nodes, 4, 6, Region::new(lenx, 0, lenx2, leny), false);
        Self::split4(&mut nodes, 5, 10, Region::new(0, leny, lenx, leny2), false);
        Self::split4(&mut nodes, 14, 15, Region::new(0, 0, lenx, leny), false);

        let corner = nodes[15].region;
        nodes[19].region = Region::new(0, 0, corner.width.div_ceil(2), corner.height.div_ceil(2));

        if let Some(small) = nodes
            .iter()
            .find(|n| n.region.width < 2 || n.region.height < 2)
        {
            return Err(CodecError::InvalidInput(format!(
                "{}x{} image is too small for a five-level decomposition \
                 (a level would be {}x{})",
                width, height, small.region.width, small.region.height
            )));
        }

        let mut subbands = [Region::default(); Q_TREE_LEN];
        Self::split16(&mut subbands, 3, nodes[14].region, false, false);
        Self::split16(&mut subbands, 19, nodes[4].region, true, false);
        Self::split16(&mut subbands, 48, nodes[0].region, false, false);
        Self::split16(&mut subbands, 35, nodes[5].region, false, true);
        subbands[..4].copy_from_slice(&nodes[19].region.quadrants(false, false));

        Ok(Self { nodes, subbands })
    }

    /// Places `region` at `nodes[parent]` and its quadrants at
    /// `nodes[child..child + 4]`. Nodes 4 and 5 give their odd leftover
    /// to the second half along x and y respectively.
    fn split4(
        nodes: &mut [WaveletNode; W_TREE_LEN],
        parent: usize,
        child: usize,
        region: Region,
        skip_last: bool,
    ) {
        nodes[parent].region = region;
        let quads = region.quadrants(parent == 4, parent == 5);
        let count = if skip_last { 3 } else { 4 };
        for (offset, quad) in quads.iter().take(count).enumerate() {
            nodes[child + offset].region = *quad;
        }
    }

    fn split16(
        subbands: &mut [Region; Q_TREE_LEN],
        start: usize,
        region: Region,
        invert_x: bool,
        invert_y: bool,
    ) {
        let inversions = [(false, false), (true, false), (false, true), (true, true)];
        for (q, quad) in region.quadrants(invert_x, invert_y).iter().enumerate() {
            let (ix, iy) = inversions[q];
            let cells = quad.quadrants(ix, iy);
            subbands[start + 4 * q..start + 4 * q + 4].copy_from_slice(&cells);
        }
    }

    pub fn coded(&self) -> &[Region] {
        &self.subbands[..CODED_SUBBANDS]
    }
}

/// Forward transform of a row-major plane of `width` columns, in place.
pub fn decompose<F: Float + Send + Sync>(
    plane: &mut [F],
    width: usize,
    layout: &SubbandLayout,
    bank: &FilterBank<F>,
) {
    for node in &layout.nodes {
        transform_rows(plane, width, node, |src, dst| {
            bank.analyze(src, dst, node.invert_rows)
        });
        transform_cols(plane, width, node, |src, dst| {
            bank.analyze(src, dst, node.invert_cols)
        });
    }
}

/// Inverse of [`decompose`], in place.
pub fn reconstruct<F: Float + Send + Sync>(
    plane: &mut [F],
    width: usize,
    layout: &SubbandLayout,
    bank: &FilterBank<F>,
) {
    for node in layout.nodes.iter().rev() {
        transform_cols(plane, width, node, |src, dst| {
            bank.synthesize(src, dst, node.invert_cols)
        });
        transform_rows(plane, width, node, |src, dst| {
            bank.synthesize(src, dst, node.invert_rows)
        });
    }
}

fn transform_rows<F, T>(plane: &mut [F], width: usize, node: &WaveletNode, op: T)
where
    F: Float + Send + Sync,
    T: Fn(&[F], &mut [F]) + Sync,
{
    let r = node.region;
    plane
        .par_chunks_mut(width)
        .skip(r.y)
        .take(r.height)
        .for_each(|row| {
            let segment = &mut row[r.x..r.x + r.width];
            let src = segment.to_vec();
            op(&src, segment);
        });
}

fn transform_cols<F, T>(plane: &mut [F], width: usize, node: &WaveletNode, op: T)
where
    F: Float + Send + Sync,
    T: Fn(&[F], &mut [F]) + Sync,
{
    let r = node.region;
    let view: &[F] = plane;
    let columns: Vec<Vec<F>> = (r.x..r.x + r.width)
        .into_par_iter()
        .map(|cx| {
            let src: Vec<F> = (r.y..r.y + r.height)
                .map(|cy| view[cy * width + cx])
                .collect();
            let mut dst = vec![F::zero(); r.height];
            op(&src, &mut dst);
            dst
        })
        .collect();

    for (offset, column) in columns.iter().enumerate() {
        let cx = r.x + offset;
        for (i, &v) in column.iter().enumerate() {
            plane[(r.y + i) * width + cx] = v;
        }
    }
}
