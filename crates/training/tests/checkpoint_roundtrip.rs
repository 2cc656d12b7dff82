use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::{DecoderInit, Fcn8, InputSpec, KeepProb, Vgg16Config};
use training::checkpoint::{CheckpointError, GRAPH_FILE, WEIGHTS_FILE};
use training::{load_checkpoint, save_checkpoint, CheckpointManifest, Hyperparameters};

type Backend = NdArray<f32>;

#[test]
fn restored_model_matches_saved_outputs() {
    let temp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = Vgg16Config::compact();
    let handles = config.handles(InputSpec::rgb(32, 64)).unwrap();
    let (model, graph) = Fcn8::<Backend>::assemble(
        config.init(&device),
        &config,
        handles,
        2,
        &DecoderInit::seeded(5),
        &device,
    )
    .unwrap();
    let manifest = CheckpointManifest {
        graph,
        hyperparameters: Hyperparameters::default(),
    };

    let paths = save_checkpoint(&model, &manifest, temp.path()).unwrap();
    assert!(paths.weights.ends_with(WEIGHTS_FILE));
    assert!(paths.graph.ends_with(GRAPH_FILE));

    let (restored, restored_manifest) = load_checkpoint::<Backend>(temp.path(), &device).unwrap();
    assert_eq!(restored_manifest, manifest);

    let images = Tensor::<Backend, 4>::random([1, 3, 32, 64], Distribution::Default, &device);
    let expected = model.forward(images.clone(), KeepProb::ONE);
    let actual = restored.forward(images, KeepProb::ONE);
    let a = expected.into_data().to_vec::<f32>().unwrap();
    let b = actual.into_data().to_vec::<f32>().unwrap();
    assert_eq!(a.len(), 2 * 32 * 64);
    assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-6));
}

#[test]
fn missing_graph_definition_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let err = load_checkpoint::<Backend>(temp.path(), &Default::default()).unwrap_err();
    assert!(matches!(err, CheckpointError::Io { .. }));
}
