use proptest::prelude::*;
use seismesh::{BoundingBox, PadStyle, RegularGrid, SizingFieldBuilder, SizingOptions, VelocityField};

const BBOX: [f64; 4] = [-1000.0, 0.0, 0.0, 1000.0];

fn velocity(nz: usize, nx: usize, samples: &[f64]) -> VelocityField<2> {
    let bbox = BoundingBox::from_pairs(&BBOX).unwrap();
    let grid = RegularGrid::new(bbox, [nz, nx], samples[..nz * nx].to_vec()).unwrap();
    VelocityField::new(grid).unwrap()
}

fn pad_style() -> impl Strategy<Value = PadStyle> {
    prop_oneof![
        Just(PadStyle::Edge),
        Just(PadStyle::Constant),
        Just(PadStyle::LinearRamp),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn sizes_stay_bounded_and_graded(
        nz in 3usize..8,
        nx in 3usize..8,
        samples in prop::collection::vec(1000.0f64..5000.0, 64),
        grade in 0.05f64..0.5,
        hmin in 20.0f64..80.0,
        span in 1.5f64..6.0,
        ext in 0.0f64..300.0,
        style in pad_style(),
    ) {
        let hmax = hmin * span;
        let options = SizingOptions::new(&BBOX)
            .with_hmin(hmin)
            .with_hmax(hmax)
            .with_wavelength(3.0, 4.0)
            .with_grade(grade)
            .with_domain_ext(ext, style);
        let model = velocity(nz, nx, &samples);
        let field = SizingFieldBuilder::new(&model, options.clone()).build().unwrap();

        for &h in field.grid().values() {
            prop_assert!(h >= hmin - 1e-9 && h <= hmax + 1e-9, "h = {h}");
        }
        prop_assert!(field.max_grade_violation() <= 1e-6);

        let original = BoundingBox::<2>::from_pairs(&BBOX).unwrap();
        let domain = field.domain();
        for axis in 0..2 {
            prop_assert!(domain.min[axis] <= original.min[axis]);
            prop_assert!(domain.max[axis] >= original.max[axis]);
        }
        for corner in domain.corners() {
            let h = field.at(&corner);
            prop_assert!(h >= hmin - 1e-9 && h <= hmax + 1e-9);
        }

        // grading only ever shrinks sizes
        let ungraded = SizingFieldBuilder::new(&model, options.with_grade(0.0)).build().unwrap();
        prop_assert_eq!(ungraded.grid().shape(), field.grid().shape());
        for (g, u) in field.grid().values().iter().zip(ungraded.grid().values()) {
            prop_assert!(*g <= *u + 1e-9);
        }
    }
}
