use burn::backend::Autodiff;
use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::{
    build_decoder, BackboneFeatures, DecoderInit, Fcn8, FcnDecoder, FcnGraph, GraphError,
    InputSpec, KeepProb, PlanError, SegmentationModel, Vgg16Config, WeightDecay,
};

// CPU backend keeps these shape checks independent of any GPU feature.
type ADBackend = Autodiff<NdArray<f32>>;

fn device() -> <ADBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}

fn random_features(
    handles: &models::BackboneHandles,
    batch: usize,
) -> BackboneFeatures<ADBackend> {
    let dev = device();
    let map = |spec: &models::FeatureMapSpec| {
        Tensor::<ADBackend, 4>::random(
            [batch, spec.channels, spec.height, spec.width],
            Distribution::Normal(0.0, 1.0),
            &dev,
        )
    };
    BackboneFeatures {
        layer3: map(&handles.layer3),
        layer4: map(&handles.layer4),
        layer7: map(&handles.layer7),
    }
}

fn to_vec(t: Tensor<ADBackend, 4>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap_or_default()
}

#[test]
fn decoder_restores_input_resolution() {
    let handles = Vgg16Config::compact()
        .handles(InputSpec::rgb(64, 96))
        .unwrap();
    let (decoder, plan) =
        build_decoder::<ADBackend>(&handles, 2, &DecoderInit::default(), &device()).unwrap();

    let out = decoder.forward(random_features(&handles, 3));
    assert_eq!(out.dims(), [3, 2, 64, 96]);
    assert_eq!(plan.output.resolution(), (64, 96));
    assert_eq!(plan.output.channels, 2);
}

#[test]
fn decoder_handles_full_size_vgg_maps() {
    // Only the decoder is instantiated; the backbone is described by its handles.
    let mut config = Vgg16Config::default();
    config.fc_width = 32;
    let handles = config.handles(InputSpec::rgb(160, 576)).unwrap();
    assert_eq!(handles.layer7.resolution(), (5, 18));
    let (decoder, _) =
        build_decoder::<ADBackend>(&handles, 2, &DecoderInit::default(), &device()).unwrap();
    let out = decoder.forward(random_features(&handles, 1));
    assert_eq!(out.dims(), [1, 2, 160, 576]);
}

#[test]
fn six_regularization_terms_per_decoder() {
    let handles = Vgg16Config::compact()
        .handles(InputSpec::rgb(32, 32))
        .unwrap();
    let (decoder, plan) =
        build_decoder::<ADBackend>(&handles, 2, &DecoderInit::default(), &device()).unwrap();

    assert_eq!(plan.regularization.len(), 6);
    assert_eq!(plan.weighted_layers(), 6);
    let losses = decoder.regularization_losses();
    assert_eq!(losses.len(), 6);

    let total: f32 = losses
        .sum(&device())
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()[0];
    // Small-stddev weights with a 1e-3 factor keep the penalty tiny but positive.
    assert!(total > 0.0 && total < 1e-3, "unexpected penalty {total}");
}

#[test]
fn rebuilding_gives_identical_structure() {
    let handles = Vgg16Config::compact()
        .handles(InputSpec::rgb(64, 64))
        .unwrap();
    let (_, a) = build_decoder::<ADBackend>(&handles, 2, &DecoderInit::default(), &device())
        .unwrap();
    let (_, b) = build_decoder::<ADBackend>(&handles, 2, &DecoderInit::default(), &device())
        .unwrap();

    assert_eq!(a, b);
    let counts = a.op_counts();
    assert_eq!(counts.get("score"), Some(&3));
    assert_eq!(counts.get("upsample"), Some(&3));
    assert_eq!(counts.get("skip"), Some(&2));
}

#[test]
fn pinned_seed_gives_identical_weights() {
    let handles = Vgg16Config::compact()
        .handles(InputSpec::rgb(32, 64))
        .unwrap();
    let init = DecoderInit::seeded(1234);
    let (first, _) = build_decoder::<ADBackend>(&handles, 2, &init, &device()).unwrap();
    let (second, _) = build_decoder::<ADBackend>(&handles, 2, &init, &device()).unwrap();

    let features = random_features(&handles, 1);
    let a = to_vec(first.forward(features.clone()));
    let b = to_vec(second.forward(features));
    assert_eq!(a, b);
}

#[test]
fn fcn8_scores_every_pixel() {
    let dev = device();
    let config = Vgg16Config::compact();
    let handles = config.handles(InputSpec::rgb(32, 64)).unwrap();
    let backbone = config.init::<ADBackend>(&dev);
    let (model, graph) =
        Fcn8::assemble(backbone, &config, handles, 2, &DecoderInit::default(), &dev).unwrap();

    let images = Tensor::<ADBackend, 4>::random([2, 3, 32, 64], Distribution::Default, &dev);
    let scores = model.forward_scores(images, KeepProb::new(0.65));
    assert_eq!(scores.dims(), [2, 2, 32, 64]);
    assert_eq!(model.num_classes(), 2);
    assert_eq!(graph.decoder.output.resolution(), (32, 64));
}

#[test]
fn unknown_weight_decay_layer_is_rejected() {
    let config = Vgg16Config::compact();
    let handles = config.handles(InputSpec::rgb(32, 32)).unwrap();
    let (_, mut plan) =
        build_decoder::<ADBackend>(&handles, 2, &DecoderInit::default(), &device()).unwrap();
    plan.regularization.push(WeightDecay {
        layer: "fc8".to_string(),
        factor: 1e-3,
    });

    let err = FcnDecoder::<ADBackend>::from_plan(&plan, &DecoderInit::default(), &device())
        .unwrap_err();
    assert_eq!(err, PlanError::MissingLayer("fc8".to_string()));

    let graph = FcnGraph {
        backbone: config,
        handles,
        decoder: plan,
    };
    let err = Fcn8::<ADBackend>::from_graph(&graph, &device()).unwrap_err();
    assert!(matches!(err, GraphError::Plan(PlanError::MissingLayer(_))));
}
