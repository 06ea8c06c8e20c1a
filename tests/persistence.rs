use ndarray::{Array2, ArrayD};
use seismesh::{
    gmsh, BoundingBox, MeshConfig, MeshGenerator, NpyVelocityReader, SizingField,
    SizingFieldBuilder, VelocityField, VelocityUnits,
};

const CONFIG: &str = r#"
[sizing]
bbox = [-1500.0, 0.0, 0.0, 1500.0]
hmin = 100.0
hmax = 500.0
grade = 0.2
freq = 2.0
wl = 5.0
domain_ext = 200.0
padstyle = "linear_ramp"
units = "km-s"

[generator]
max_iter = 25
seed = 11
nscreen = 5
"#;

/// A 16 x 16 model in km/s, slowest at the bottom row.
fn write_model(dir: &std::path::Path) -> std::path::PathBuf {
    let model = Array2::from_shape_fn((16, 16), |(i, _)| 1.5 + 0.1 * i as f64);
    let path = dir.join("vp.npy");
    ndarray_npy::write_npy(&path, &model.into_dyn()).unwrap();
    path
}

#[test]
fn configured_pipeline_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("mesh.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    let config = MeshConfig::from_file(&config_path).unwrap();
    assert_eq!(config.sizing.units, VelocityUnits::KilometersPerSecond);

    let bbox = BoundingBox::<2>::from_pairs(&config.sizing.bbox).unwrap();
    let reader = NpyVelocityReader::new(write_model(dir.path()));
    let velocity = VelocityField::from_reader(&reader, bbox, Some([16, 16])).unwrap();
    // the first row lies at the bottom of the depth axis
    assert!((velocity.at(&nalgebra::Vector2::new(-1500.0, 700.0)) - 1.5).abs() < 1e-12);

    let sizing = SizingFieldBuilder::new(&velocity, config.sizing.clone())
        .build()
        .unwrap();
    assert!(sizing.max_grade_violation() <= 1e-9);
    // samples converted from km/s: 1500 / (2 * 5) = 150 at the bottom
    assert!((sizing.at(&nalgebra::Vector2::new(-1500.0, 700.0)) - 150.0).abs() < 1e-9);

    // the exported field gives the same mesh as the original
    let stem = dir.path().join("sizing");
    sizing.export(&stem).unwrap();
    let loaded = SizingField::<2>::load(&stem).unwrap();
    assert_eq!(loaded, sizing);

    let original = MeshGenerator::new(&sizing, config.generator.clone())
        .build()
        .unwrap();
    let reloaded = MeshGenerator::new(&loaded, config.generator.clone())
        .build()
        .unwrap();
    assert_eq!(original.mesh, reloaded.mesh);

    // and the mesh survives a trip through a .msh file
    let msh = dir.path().join("mesh.msh");
    gmsh::save_msh(&original.mesh, &msh).unwrap();
    let back = gmsh::load_trimesh_2d(&std::fs::read(&msh).unwrap()).unwrap();
    assert_eq!(back, original.mesh);
}

#[test]
fn model_shape_is_checked() {
    let dir = tempfile::tempdir().unwrap();
    let reader = NpyVelocityReader::new(write_model(dir.path()));
    let bbox = BoundingBox::<2>::from_pairs(&[-1500.0, 0.0, 0.0, 1500.0]).unwrap();
    let result = VelocityField::from_reader(&reader, bbox, Some([16, 20]));
    assert!(result.is_err());

    let missing = NpyVelocityReader::new(dir.path().join("nothing.npy"));
    assert!(VelocityField::from_reader(&missing, bbox, None).is_err());
}

#[test]
fn single_precision_models_are_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vp32.npy");
    let model: ArrayD<f32> = ArrayD::from_elem(vec![4, 5], 2000.0f32);
    ndarray_npy::write_npy(&path, &model).unwrap();
    let bbox = BoundingBox::<2>::from_pairs(&[-300.0, 0.0, 0.0, 400.0]).unwrap();
    let velocity = VelocityField::from_reader(&NpyVelocityReader::new(path), bbox, None).unwrap();
    assert_eq!(velocity.grid().shape(), [4, 5]);
    assert!((velocity.at(&nalgebra::Vector2::new(-100.0, 200.0)) - 2000.0).abs() < 1e-9);
}
