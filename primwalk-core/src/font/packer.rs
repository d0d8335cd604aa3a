//! Square atlas packing.
//!
//! Guillotine packing with best-short-side-fit placement: every box goes into the free region whose
//! shorter leftover side is smallest, and that region is then cut in two along the shorter leftover
//! axis. The atlas side starts at the area lower bound and grows until every box fits.

/// Free region of the atlas, in texels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Region {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

struct Guillotine {
    free: Vec<Region>,
}
impl Guillotine {
    fn new(side: u32) -> Self {
        Self {
            free: vec![Region {
                x: 0,
                y: 0,
                width: side,
                height: side,
            }],
        }
    }
    fn insert(&mut self, [width, height]: [u32; 2]) -> Option<[u32; 2]> {
        // (index, short leftover, long leftover)
        let (index, _, _) = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, r)| r.width >= width && r.height >= height)
            .map(|(i, r)| {
                let (dw, dh) = (r.width - width, r.height - height);
                (i, dw.min(dh), dw.max(dh))
            })
            .min_by_key(|&(_, short, long)| (short, long))?;

        let region = self.free.swap_remove(index);
        let (dw, dh) = (region.width - width, region.height - height);
        // The child that spans the full extent of the region goes along the longer leftover axis.
        let (right, below) = if dw < dh {
            (
                Region {
                    x: region.x + width,
                    y: region.y,
                    width: dw,
                    height,
                },
                Region {
                    x: region.x,
                    y: region.y + height,
                    width: region.width,
                    height: dh,
                },
            )
        } else {
            (
                Region {
                    x: region.x + width,
                    y: region.y,
                    width: dw,
                    height: region.height,
                },
                Region {
                    x: region.x,
                    y: region.y + height,
                    width,
                    height: dh,
                },
            )
        };
        self.free.extend(
            [right, below]
                .into_iter()
                .filter(|r| r.width > 0 && r.height > 0),
        );
        Some([region.x, region.y])
    }
}

/// Result of packing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packing {
    /// Side length of the square atlas.
    pub side: u32,
    /// Top-left of every box, in input order.
    pub positions: Vec<[u32; 2]>,
}

/// Place every `[width, height]` box into the smallest square found.
///
/// Zero-sized boxes are placed at the origin and take no space. An empty input packs into a 1x1 atlas.
#[must_use]
pub fn pack_square(sizes: &[[u32; 2]]) -> Packing {
    let area: u64 = sizes.iter().map(|&[w, h]| u64::from(w) * u64::from(h)).sum();
    let inked = || sizes.iter().filter(|s| s[0] != 0 && s[1] != 0);
    let widest = inked().map(|s| s[0]).max().unwrap_or(0);
    let tallest = inked().map(|s| s[1]).max().unwrap_or(0);
    let lower_bound = ((area as f64).sqrt().ceil() as u32).max(widest).max(tallest).max(1);

    // Big boxes first: tallest, then widest.
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse((sizes[i][1], sizes[i][0])));

    let mut side = lower_bound;
    loop {
        if let Some(positions) = try_pack(side, sizes, &order) {
            return Packing { side, positions };
        }
        // Grow by a few percent each round. A single row of every box always fits eventually.
        side += (side / 32).max(1);
    }
}

fn try_pack(side: u32, sizes: &[[u32; 2]], order: &[usize]) -> Option<Vec<[u32; 2]>> {
    let mut packer = Guillotine::new(side);
    let mut positions = vec![[0, 0]; sizes.len()];
    for &i in order {
        let size = sizes[i];
        if size[0] == 0 || size[1] == 0 {
            continue;
        }
        positions[i] = packer.insert(size)?;
    }
    Some(positions)
}

#[cfg(test)]
mod test {
    use super::{pack_square, Guillotine};

    fn assert_disjoint(sizes: &[[u32; 2]], positions: &[[u32; 2]], side: u32) {
        for (i, (a, sa)) in positions.iter().zip(sizes).enumerate() {
            assert!(a[0] + sa[0] <= side && a[1] + sa[1] <= side, "box {i} out of bounds");
            for (b, sb) in positions[i + 1..].iter().zip(&sizes[i + 1..]) {
                let overlap_x = a[0] < b[0] + sb[0] && b[0] < a[0] + sa[0];
                let overlap_y = a[1] < b[1] + sb[1] && b[1] < a[1] + sa[1];
                assert!(!(overlap_x && overlap_y), "{a:?} overlaps {b:?}");
            }
        }
    }
    #[test]
    fn exact_fit() {
        let sizes = [[16, 16]; 4];
        let packing = pack_square(&sizes);
        assert_eq!(packing.side, 32);
        assert_disjoint(&sizes, &packing.positions, packing.side);
    }
    #[test]
    fn mixed_boxes_disjoint() {
        let sizes: Vec<[u32; 2]> = (1..60u32).map(|i| [5 + i % 13, 7 + (i * 7) % 19]).collect();
        let packing = pack_square(&sizes);
        assert_disjoint(&sizes, &packing.positions, packing.side);
        let area: u32 = sizes.iter().map(|s| s[0] * s[1]).sum();
        assert!(packing.side * packing.side >= area);
    }
    #[test]
    fn degenerate_inputs() {
        assert_eq!(pack_square(&[]).side, 1);
        let packing = pack_square(&[[0, 10], [3, 3]]);
        assert_eq!(packing.side, 3);
        assert_eq!(packing.positions[1], [0, 0]);
    }
    #[test]
    fn full_region_rejects() {
        let mut packer = Guillotine::new(32);
        let mut count = 0;
        while packer.insert([16, 16]).is_some() {
            count += 1;
            assert!(count <= 4);
        }
        assert_eq!(count, 4);
    }
}
