use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BG: Rgba8 = [1, 2, 3, 4];

fn random_contribution(rng: &mut StdRng, rank: usize, w: u32, h: u32) -> Contribution {
    let mut c = Contribution::new(rank, w, h).unwrap();
    let x = rng.gen_range(0..w);
    let y = rng.gen_range(0..h);
    c.valid = PixelRect::new(x, y, rng.gen_range(0..=w - x), rng.gen_range(0..=h - y));
    for i in 0..(w * h) as usize {
        // coarse depths so that ties are frequent; 4/4 is a cleared pixel
        c.depth[i] = rng.gen_range(0..=4) as f32 / 4.0;
        c.color[i * 4..i * 4 + 4].copy_from_slice(&[rank as u8, i as u8, 0, 255]);
    }
    c
}

fn brute_force(cs: &[Contribution], x: u32, y: u32) -> (Rgba8, f32) {
    let mut best: Option<(f32, usize, Rgba8)> = None;
    for c in cs {
        if !c.valid.contains(x, y) {
            continue;
        }
        let (color, d) = c.pixel(x, y);
        if d >= MAX_DEPTH {
            continue;
        }
        let better = match best {
            None => true,
            Some((bd, br, _)) => d < bd || (d == bd && c.rank < br),
        };
        if better {
            best = Some((d, c.rank, color));
        }
    }
    match best {
        Some((d, _, color)) => (color, d),
        None => (BG, MAX_DEPTH),
    }
}

#[test]
fn every_reduction_order_matches_the_depth_minimum() {
    let (w, h) = (13, 9);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for trial in 0..20 {
        let ranks = rng.gen_range(1..=7);
        let cs: Vec<_> = (0..ranks)
            .map(|r| random_contribution(&mut rng, r, w, h))
            .collect();
        let frags: Vec<_> = cs
            .iter()
            .map(|c| Fragment::from_contribution(c, PixelRect::full(w, h)))
            .collect();

        let full = PixelRect::full(w, h);
        let linear = reduce(frags.clone(), ReductionOrder::Linear).resolve(full, BG);
        let balanced = reduce(frags.clone(), ReductionOrder::Balanced).resolve(full, BG);
        let permuted =
            reduce(frags.clone(), ReductionOrder::Permuted(trial)).resolve(full, BG);
        let mut reversed = frags.clone();
        reversed.reverse();
        let reversed = reduce(reversed, ReductionOrder::Linear).resolve(full, BG);

        assert_eq!(linear, balanced);
        assert_eq!(linear, permuted);
        assert_eq!(linear, reversed);

        let (color, depth) = linear;
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) as usize;
                let (ec, ed) = brute_force(&cs, x, y);
                assert_eq!(&color[i * 4..i * 4 + 4], &ec, "trial {trial} pixel ({x},{y})");
                assert_eq!(depth[i], ed, "trial {trial} pixel ({x},{y})");
            }
        }
    }
}

#[test]
fn equal_depth_goes_to_lower_rank() {
    let mut a = Contribution::new(3, 2, 1).unwrap();
    let mut b = Contribution::new(1, 2, 1).unwrap();
    for c in [&mut a, &mut b] {
        c.valid = PixelRect::full(2, 1);
        c.depth.fill(0.25);
        let shade = c.rank as u8;
        c.color.fill(shade);
    }
    let fa = Fragment::from_contribution(&a, PixelRect::full(2, 1));
    let fb = Fragment::from_contribution(&b, PixelRect::full(2, 1));
    for merged in [merge_fragments(&fa, &fb), merge_fragments(&fb, &fa)] {
        assert_eq!(merged.sample(0, 0), Some(([1, 1, 1, 1], 0.25, 1)));
        assert_eq!(merged.sample(1, 0), Some(([1, 1, 1, 1], 0.25, 1)));
    }
}

#[test]
fn uncovered_pixels_resolve_to_background() {
    let mut c = Contribution::new(0, 4, 4).unwrap();
    c.valid = PixelRect::new(1, 1, 1, 1);
    c.color.fill(9);
    c.depth.fill(0.5);
    let f = Fragment::from_contribution(&c, PixelRect::full(4, 4));
    let (color, depth) = f.resolve(PixelRect::full(4, 4), BG);
    assert_eq!(&color[0..4], &BG);
    assert_eq!(depth[0], MAX_DEPTH);
    assert_eq!(&color[5 * 4..5 * 4 + 4], &[9, 9, 9, 9]);
    assert_eq!(depth[5], 0.5);
}

#[test]
fn cleared_pixels_inside_the_valid_rect_resolve_to_background() {
    let mut near = Contribution::new(0, 3, 1).unwrap();
    near.valid = PixelRect::full(3, 1);
    near.color.fill(7);
    near.depth.copy_from_slice(&[0.5, MAX_DEPTH, MAX_DEPTH]);
    let mut far = Contribution::new(1, 3, 1).unwrap();
    far.valid = PixelRect::new(2, 0, 1, 1);
    far.color.fill(8);
    far.depth.fill(0.75);

    let full = PixelRect::full(3, 1);
    let fa = Fragment::from_contribution(&near, full);
    let fb = Fragment::from_contribution(&far, full);
    assert_eq!(fa.sample(1, 0), None);
    for merged in [merge_fragments(&fa, &fb), merge_fragments(&fb, &fa)] {
        let (color, depth) = merged.resolve(full, BG);
        assert_eq!(&color[..4], &[7, 7, 7, 7]);
        assert_eq!(&color[4..8], &BG);
        assert_eq!(&color[8..], &[8, 8, 8, 8]);
        assert_eq!(depth, vec![0.5, MAX_DEPTH, 0.75]);
    }
}

#[test]
fn single_input_reduction_is_identity() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut c = random_contribution(&mut rng, 0, 6, 5);
    c.valid = PixelRect::full(6, 5);
    c.depth.iter_mut().for_each(|d| *d = d.min(0.75));
    let f = Fragment::from_contribution(&c, PixelRect::full(6, 5));
    let (color, depth) = reduce(vec![f], ReductionOrder::Balanced).resolve(c.valid, BG);
    assert_eq!(color, c.color);
    assert_eq!(depth, c.depth);
}

#[test]
fn empty_reduction_resolves_to_background() {
    let (color, depth) =
        reduce(Vec::new(), ReductionOrder::Linear).resolve(PixelRect::full(2, 2), BG);
    assert!(color.chunks(4).all(|p| p == BG));
    assert!(depth.iter().all(|&d| d == MAX_DEPTH));
}

#[test]
fn clip_keeps_only_the_requested_rows() {
    let mut c = Contribution::new(2, 4, 4).unwrap();
    c.valid = PixelRect::full(4, 4);
    c.depth.fill(0.1);
    let f = Fragment::from_contribution(&c, PixelRect::full(4, 4));
    let top = f.clip(PixelRect::new(0, 0, 4, 2));
    assert_eq!(top.rect, PixelRect::new(0, 0, 4, 2));
    assert!(top.sample(0, 1).is_some());
    assert!(top.sample(0, 2).is_none());
}

#[test]
fn packets_survive_transport_with_drop_flag() {
    let mut rng = StdRng::seed_from_u64(11);
    let c = random_contribution(&mut rng, 4, 7, 3);
    let f = Fragment::from_contribution(&c, PixelRect::full(7, 3));

    let (back, dropped) = decode_fragment(&encode_fragment(&f, false)).unwrap();
    assert_eq!(back, f);
    assert!(!dropped);

    let empty = Fragment::uncovered(PixelRect::empty());
    let (_, dropped) = decode_fragment(&encode_fragment(&empty, true)).unwrap();
    assert!(dropped);

    let mut truncated = encode_fragment(&f, false);
    truncated.pop();
    assert!(decode_fragment(&truncated).is_err());
    assert!(decode_fragment(&[0u8; 3]).is_err());
}
