use approx::assert_relative_eq;
use seismesh::{
    BoundingBox, GeneratedMesh, GeneratorOptions, GeneratorState, MeshGenerator, PadStyle,
    SizingField, SizingFieldBuilder, SizingOptions, VelocityField,
};

/// Depth axis first: 2 km deep, 2 km wide.
const BBOX: [f64; 4] = [-2000.0, 0.0, 0.0, 2000.0];

/// Velocity increasing linearly from 1500 m/s at the surface to 3500 m/s at the bottom.
fn layered_model() -> VelocityField<2> {
    let bbox = BoundingBox::from_pairs(&BBOX).unwrap();
    VelocityField::depth_profile(bbox, 21, |z| 1500.0 - z).unwrap()
}

fn sizing_options() -> SizingOptions {
    SizingOptions::new(&BBOX)
        .with_hmin(75.0)
        .with_hmax(1000.0)
        .with_wavelength(4.0, 5.0)
        .with_grade(0.15)
        .with_grid_shape(&[21, 21])
}

fn build_sizing(options: SizingOptions) -> SizingField<2> {
    SizingFieldBuilder::new(&layered_model(), options)
        .build()
        .unwrap()
}

fn generate(sizing: &SizingField<2>, seed: u64) -> GeneratedMesh<2> {
    let options = GeneratorOptions::default()
        .with_max_iter(40)
        .with_seed(seed);
    MeshGenerator::new(sizing, options).build().unwrap()
}

#[test]
fn serial_mesh_is_valid_and_fills_the_domain() {
    let sizing = build_sizing(sizing_options());
    let generated = generate(&sizing, 0);
    let mesh = &generated.mesh;

    assert_eq!(mesh.validate(), Ok(()));
    assert_relative_eq!(mesh.total_volume(), 4.0e6, max_relative = 1e-9);
    for p in mesh.points() {
        assert!(sizing.domain().contains(p, 1e-9));
    }
    assert!(generated.report.quality.min_dihedral > 0.0);
    assert!(generated.report.iterations <= 40);
    match generated.report.termination {
        GeneratorState::Converged => assert!(generated.report.warnings.is_empty()),
        GeneratorState::MaxIterReached => assert_eq!(generated.report.warnings.len(), 1),
        other => panic!("unexpected termination {other:?}"),
    }
}

#[test]
fn same_seed_gives_identical_arrays() {
    let sizing = build_sizing(sizing_options());
    let a = generate(&sizing, 3);
    let b = generate(&sizing, 3);
    assert_eq!(a.mesh.points_array(), b.mesh.points_array());
    assert_eq!(a.mesh.cells_array(), b.mesh.cells_array());

    let c = generate(&sizing, 4);
    assert_ne!(a.mesh.points(), c.mesh.points());
}

#[test]
fn progress_interval_does_not_change_the_mesh() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let sizing = build_sizing(sizing_options());
    let meshes: Vec<_> = [0, 1, 7]
        .into_iter()
        .map(|nscreen| {
            let options = GeneratorOptions::default()
                .with_max_iter(40)
                .with_seed(3)
                .with_nscreen(nscreen);
            MeshGenerator::new(&sizing, options).build().unwrap().mesh
        })
        .collect();
    for mesh in &meshes[1..] {
        assert_eq!(mesh.points_array(), meshes[0].points_array());
        assert_eq!(mesh.cells_array(), meshes[0].cells_array());
    }
}

#[test]
fn slow_material_gets_smaller_elements() {
    let sizing = build_sizing(sizing_options());
    let mesh = generate(&sizing, 0).mesh;
    // the shallow half is slower than the deep half
    let shallow = mesh.points().iter().filter(|p| p[0] > -1000.0).count();
    let deep = mesh.points().iter().filter(|p| p[0] < -1000.0).count();
    assert!(shallow > deep, "shallow {shallow}, deep {deep}");
}

#[test]
fn domain_extension_scenarios() {
    let constant = build_sizing(sizing_options().with_domain_ext(100.0, PadStyle::Constant));
    let edge = build_sizing(sizing_options().with_domain_ext(300.0, PadStyle::Edge));
    let ramp = build_sizing(sizing_options().with_domain_ext(1000.0, PadStyle::LinearRamp));

    // the free surface at the top of the depth axis is not extended
    for (field, ext) in [(&constant, 100.0), (&edge, 300.0), (&ramp, 1000.0)] {
        let expected = BoundingBox::<2>::from_pairs(&[-2000.0 - ext, 0.0, -ext, 2000.0 + ext]).unwrap();
        let domain = field.domain();
        for axis in 0..2 {
            assert_relative_eq!(domain.min[axis], expected.min[axis], epsilon = 1e-6);
            assert_relative_eq!(domain.max[axis], expected.max[axis], epsilon = 1e-6);
        }
        assert_eq!(field.original_bbox(), &BoundingBox::<2>::from_pairs(&BBOX).unwrap());
    }

    let meshes: Vec<_> = [&constant, &edge, &ramp]
        .into_iter()
        .map(|field| {
            let generated = generate(field, 0);
            assert_eq!(generated.mesh.validate(), Ok(()));
            let extent = field.domain().extent();
            assert_relative_eq!(
                generated.mesh.total_volume(),
                extent[0] * extent[1],
                max_relative = 1e-9
            );
            generated.mesh
        })
        .collect();

    let unextended = generate(&build_sizing(sizing_options()), 0).mesh;
    assert!(unextended.num_points() < meshes[1].num_points());
    assert!(meshes[0].num_points() < meshes[1].num_points());
    assert!(meshes[1].num_points() < meshes[2].num_points());
}

#[test]
fn tetrahedral_mesh_with_improvement() {
    let bbox = [-1000.0, 0.0, 0.0, 1000.0, 0.0, 1000.0];
    let velocity = VelocityField::<3>::constant(BoundingBox::from_pairs(&bbox).unwrap(), 2000.0)
        .unwrap();
    let sizing = SizingFieldBuilder::new(
        &velocity,
        SizingOptions::new(&bbox)
            .with_hmin(200.0)
            .with_wavelength(2.0, 5.0),
    )
    .build()
    .unwrap();
    assert_relative_eq!(sizing.at(&nalgebra::Vector3::new(-500.0, 500.0, 500.0)), 200.0);

    let options = GeneratorOptions::default()
        .with_max_iter(15)
        .with_mesh_improvement(10.0);
    let generated = MeshGenerator::new(&sizing, options).build().unwrap();
    let mesh = &generated.mesh;
    assert_eq!(mesh.validate(), Ok(()));
    assert_relative_eq!(mesh.total_volume(), 1.0e9, max_relative = 1e-9);

    let improvement = generated.report.improvement.as_ref().unwrap();
    assert!(improvement.after.min_dihedral >= improvement.before.min_dihedral);
    assert_eq!(generated.report.quality, improvement.after);
}
