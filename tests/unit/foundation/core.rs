use super::*;

#[test]
fn rect_intersection_and_union() {
    let a = PixelRect::new(0, 0, 10, 10);
    let b = PixelRect::new(5, 5, 10, 10);
    assert_eq!(a.intersect(b), PixelRect::new(5, 5, 5, 5));
    assert_eq!(a.union_bounds(b), PixelRect::new(0, 0, 15, 15));

    let disjoint = PixelRect::new(20, 20, 2, 2);
    assert!(a.intersect(disjoint).is_empty());
    assert_eq!(PixelRect::empty().union_bounds(b), b);
}

#[test]
fn rect_contains_rect_treats_empty_as_contained() {
    let full = PixelRect::full(8, 8);
    assert!(full.contains_rect(PixelRect::new(2, 2, 6, 6)));
    assert!(!full.contains_rect(PixelRect::new(2, 2, 7, 6)));
    assert!(full.contains_rect(PixelRect::empty()));
}

#[test]
fn snap_out_grows_to_tiles_and_clamps() {
    let r = PixelRect::new(5, 9, 3, 2).snap_out(4, 10, 12);
    assert_eq!(r, PixelRect::new(4, 8, 4, 4));

    let clamped = PixelRect::new(60, 60, 10, 10).snap_out(64, 100, 100);
    assert_eq!(clamped, PixelRect::new(0, 0, 100, 100));
}

#[test]
fn bounding_sphere_from_empty_box_is_empty() {
    let s = BoundingSphere::from_aabb(&Aabb::empty());
    assert!(s.is_empty());
    assert_eq!(s.radius, -1.0);
}

#[test]
fn bounding_sphere_spans_box_diagonal() {
    let b = Aabb::new(DVec3::new(-1.0, -1.0, -1.0), DVec3::new(1.0, 1.0, 1.0));
    let s = BoundingSphere::from_aabb(&b);
    assert_eq!(s.center, DVec3::ZERO);
    assert!((s.radius - 3f64.sqrt()).abs() < 1e-12);
}

#[test]
fn aabb_union_with_empty_is_identity() {
    let b = Aabb::new(DVec3::ZERO, DVec3::ONE);
    assert_eq!(Aabb::empty().union(&b), b);
}
